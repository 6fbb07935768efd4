//! Human-readable listings of images.

use std::collections::BTreeMap;
use std::fmt;

use crate::image::{Image, ProcedureFlags};
use crate::opcode::Opcode;
use crate::value::{format_float, Value};

/// Full listing: procedure table, identifier and string tables, then code.
pub struct Listing<'a>(pub &'a Image);

/// Header summary only.
pub struct Summary<'a>(pub &'a Image);

pub fn disassemble(image: &Image) -> String {
    Listing(image).to_string()
}

fn flag_names(flags: ProcedureFlags) -> String {
    let names: Vec<&str> = flags.iter_names().map(|(name, _)| name).collect();
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join("|").to_ascii_lowercase()
    }
}

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let image = self.0;
        writeln!(f, "image {}", image.name())?;
        writeln!(f, "  size        {} bytes", image.len())?;
        match image.signature() {
            Some(version) => writeln!(f, "  version     {version}")?,
            None => writeln!(f, "  version     unknown (no signature)")?,
        }
        writeln!(f, "  procedures  {}", image.procedures().len())?;
        writeln!(f, "  identifiers {}", image.identifiers().len())?;
        writeln!(f, "  strings     {}", image.static_strings().len())?;
        writeln!(f, "  code        {:#06x}..{:#06x}", image.code_start(), image.len())?;
        if let Some(name) = image.procedure_name(0) {
            writeln!(
                f,
                "  entry       {name} at {:#06x}",
                image.procedures()[0].entry_address
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let image = self.0;
        write!(f, "{}", Summary(image))?;

        writeln!(f, "\nprocedures:")?;
        let mut entries: BTreeMap<u32, Vec<&str>> = BTreeMap::new();
        for (index, procedure) in image.procedures().iter().enumerate() {
            let name = image.procedure_name(index).unwrap_or("?");
            writeln!(
                f,
                "  [{index:>3}] {name:<24} entry={:#06x} args={} flags={}",
                procedure.entry_address,
                procedure.argument_count,
                flag_names(procedure.flags)
            )?;
            if !procedure.is_imported() {
                entries.entry(procedure.entry_address).or_default().push(name);
            }
        }

        writeln!(f, "\nidentifiers:")?;
        for (offset, text) in image.identifiers() {
            writeln!(f, "  {offset:#06x} {text}")?;
        }

        writeln!(f, "\nstrings:")?;
        for (offset, text) in image.static_strings() {
            writeln!(f, "  {offset:#06x} {text:?}")?;
        }

        writeln!(f, "\ncode:")?;
        let mut address = image.code_start() as u32;
        while let Some(word) = image.read_word(address) {
            if let Some(names) = entries.get(&address) {
                for name in names {
                    writeln!(f, "{name}:")?;
                }
            }
            write!(f, "  {address:#06x}  {word:04x}  ")?;
            address += 2;

            if word & 0x8000 == 0 {
                writeln!(f, ".word")?;
                continue;
            }
            match Opcode::decode(word) {
                Some(Opcode::Push) => {
                    let Some(operand) = image.read_long(address) else {
                        writeln!(f, "PUSH <truncated>")?;
                        break;
                    };
                    address += 4;
                    writeln!(f, "PUSH {}", literal(image, Value::from_literal(word, operand)))?;
                }
                Some(opcode) => writeln!(f, "{opcode}")?,
                None => writeln!(f, "OP_{word:04X}")?,
            }
        }
        Ok(())
    }
}

fn literal(image: &Image, value: Value) -> String {
    match value {
        Value::Int(number) => number.to_string(),
        Value::Float(number) => format_float(number),
        Value::StaticString(offset) => match image.static_string(offset) {
            Some(text) => format!("{text:?}"),
            None => format!("<string {offset}>"),
        },
        Value::DynamicString(offset) => format!("<dynamic {offset}>"),
        Value::Pointer(pointer) => format!("ptr {pointer}"),
    }
}
