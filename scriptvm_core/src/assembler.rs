//! Building images, either programmatically through [`ImageBuilder`] or from the
//! textual form accepted by [`assemble`].
//!
//! ```text
//! .opcode print 0x8072        # extra mnemonic for a host opcode
//! .proc start                 # index 0 is the entry procedure
//!     push "hello"
//!     print
//! loop:
//!     push 1
//!     wait
//!     push @loop
//!     jump
//! .end
//! .proc on_timer args=0 critical
//!     ...
//! .end
//! .import greet args=1        # resolved at run time through the export table
//! ```
//!
//! `push` takes an integer, a float, a `"string"`, `@label` (code address), `#proc`
//! (procedure index) or `$name` (identifier offset). Every other instruction takes no
//! operand.

use std::collections::HashMap;

use thiserror::Error;

use crate::image::{encode_procedures, ProcedureEntry, ProcedureFlags, HEADER_LEN, MAGIC, VERSION};
use crate::opcode::Opcode;
use crate::value::tags;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("label {0} is undefined")]
    UndefinedLabel(String),
    #[error("procedure {0} is undefined")]
    UndefinedProcedure(String),
    #[error("duplicate label {0}")]
    DuplicateLabel(String),
    #[error("duplicate procedure {0}")]
    DuplicateProcedure(String),
    #[error("image needs at least one procedure")]
    NoProcedures,
    #[error("{0}")]
    Message(String),
}

/// A code position that may be referenced before it is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug, Clone)]
struct ProcedureDef {
    name: String,
    name_offset: u32,
    flags: ProcedureFlags,
    argument_count: i32,
    entry: Option<usize>,
}

/// Incrementally lays out an image. Code positions are relative until [`ImageBuilder::build`]
/// knows where the code section starts.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    procedures: Vec<ProcedureDef>,
    identifiers: Vec<u8>,
    identifier_offsets: HashMap<String, u32>,
    strings: Vec<u8>,
    string_offsets: HashMap<String, u32>,
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a procedure and returns its directory index. The first one declared is
    /// the entry procedure.
    pub fn procedure(&mut self, name: &str, argument_count: i32) -> usize {
        let name_offset = self.identifier(name);
        self.procedures.push(ProcedureDef {
            name: name.to_string(),
            name_offset,
            flags: ProcedureFlags::empty(),
            argument_count,
            entry: None,
        });
        self.procedures.len() - 1
    }

    /// Declares a procedure whose body lives in whichever program exports it.
    pub fn import(&mut self, name: &str, argument_count: i32) -> usize {
        let index = self.procedure(name, argument_count);
        self.set_flags(index, ProcedureFlags::IMPORTED);
        index
    }

    pub fn set_flags(&mut self, index: usize, flags: ProcedureFlags) {
        if let Some(procedure) = self.procedures.get_mut(index) {
            procedure.flags.insert(flags);
        }
    }

    pub fn procedure_index(&self, name: &str) -> Option<usize> {
        self.procedures
            .iter()
            .position(|procedure| procedure.name == name)
    }

    /// Interns an identifier and returns its offset in the identifier table.
    pub fn identifier(&mut self, name: &str) -> u32 {
        if let Some(offset) = self.identifier_offsets.get(name) {
            return *offset;
        }
        let offset = 4 + self.identifiers.len() as u32;
        self.identifiers.extend_from_slice(name.as_bytes());
        self.identifiers.push(0);
        self.identifier_offsets.insert(name.to_string(), offset);
        offset
    }

    /// Interns a static string and returns its offset in the string table.
    pub fn string(&mut self, text: &str) -> u32 {
        if let Some(offset) = self.string_offsets.get(text) {
            return *offset;
        }
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(text.as_bytes());
        self.strings.push(0);
        self.string_offsets.insert(text.to_string(), offset);
        offset
    }

    /// Starts procedure `index` at the current code position.
    pub fn bind_entry(&mut self, index: usize) {
        let position = self.code.len();
        if let Some(procedure) = self.procedures.get_mut(index) {
            procedure.entry = Some(position);
        }
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn place(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.code.len());
        }
    }

    /// Code bytes emitted so far.
    pub fn position(&self) -> usize {
        self.code.len()
    }

    pub fn emit(&mut self, opcode: Opcode) {
        self.emit_word(opcode.word());
    }

    pub fn emit_word(&mut self, word: u16) {
        self.code.extend_from_slice(&word.to_be_bytes());
    }

    fn push_literal(&mut self, word: u16, operand: u32) {
        self.emit_word(word);
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    pub fn push_int(&mut self, value: i32) {
        self.push_literal(tags::VALUE_INT, value as u32);
    }

    pub fn push_float(&mut self, value: f32) {
        self.push_literal(tags::VALUE_FLOAT, value.to_bits());
    }

    pub fn push_string(&mut self, offset: u32) {
        self.push_literal(tags::VALUE_STRING, offset);
    }

    pub fn push_pointer(&mut self, address: u32) {
        self.push_literal(tags::VALUE_POINTER, address);
    }

    /// Pushes the absolute address of `label` as an integer.
    pub fn push_address(&mut self, label: Label) {
        self.emit_word(tags::VALUE_INT);
        self.fixups.push((self.code.len(), label));
        self.code.extend_from_slice(&0u32.to_be_bytes());
    }

    /// Lays out the final image.
    pub fn build(&self) -> Result<Vec<u8>, AssemblyError> {
        if self.procedures.is_empty() {
            return Err(AssemblyError::NoProcedures);
        }
        let code_start = HEADER_LEN
            + 4
            + self.procedures.len() * crate::image::PROCEDURE_RECORD_LEN
            + 4
            + self.identifiers.len()
            + 4
            + self.strings.len();

        let entries: Vec<ProcedureEntry> = self
            .procedures
            .iter()
            .map(|procedure| ProcedureEntry {
                name_offset: procedure.name_offset,
                flags: procedure.flags,
                fire_time: 0,
                condition_address: 0,
                entry_address: procedure
                    .entry
                    .map_or(0, |entry| (code_start + entry) as u32),
                argument_count: procedure.argument_count,
            })
            .collect();

        let mut code = self.code.clone();
        for (at, label) in &self.fixups {
            let target = self.labels[label.0]
                .ok_or_else(|| AssemblyError::UndefinedLabel(format!("#{}", label.0)))?;
            let address = (code_start + target) as u32;
            code[*at..*at + 4].copy_from_slice(&address.to_be_bytes());
        }

        let mut bytes = Vec::with_capacity(code_start + code.len());
        bytes.extend_from_slice(&prologue());
        encode_procedures(&entries, &mut bytes);
        bytes.extend_from_slice(&(self.identifiers.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.identifiers);
        bytes.extend_from_slice(&(self.strings.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&self.strings);
        debug_assert_eq!(bytes.len(), code_start);
        bytes.extend_from_slice(&code);
        Ok(bytes)
    }
}

/// Magic, version, and the return trampolines at their fixed addresses.
fn prologue() -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    for chunk in header[6..].chunks_exact_mut(2) {
        chunk.copy_from_slice(&Opcode::Noop.word().to_be_bytes());
    }
    header[..4].copy_from_slice(MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    let trampolines = [
        (20, Opcode::PopFlagsExit),
        (24, Opcode::PopFlagsExit),
        (28, Opcode::PopFlagsExitExtern),
        (32, Opcode::PopFlagsExitExtern),
        (36, Opcode::PopFlagsReturnValExtern),
    ];
    for (at, opcode) in trampolines {
        header[at..at + 2].copy_from_slice(&opcode.word().to_be_bytes());
    }
    header
}

#[derive(Debug)]
struct ProcedureBlock {
    name: String,
    argument_count: i32,
    flags: ProcedureFlags,
    body: Vec<Line>,
    line: usize,
}

#[derive(Debug)]
enum Line {
    Label(String, usize),
    Instruction(String, Option<String>, usize),
}

/// Assembles textual source into image bytes.
pub fn assemble(source: &str) -> Result<Vec<u8>, AssemblyError> {
    let mut aliases: HashMap<String, u16> = HashMap::new();
    let mut blocks: Vec<ProcedureBlock> = Vec::new();
    let mut current: Option<ProcedureBlock> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(block) = current.as_mut() {
            if line == ".end" {
                if let Some(finished) = current.take() {
                    blocks.push(finished);
                }
                continue;
            }
            if let Some(label) = line.strip_suffix(':') {
                block.body.push(Line::Label(label.trim().to_string(), line_no));
            } else {
                let (mnemonic, operand) = match line.split_once(char::is_whitespace) {
                    Some((mnemonic, rest)) => (mnemonic, Some(rest.trim().to_string())),
                    None => (line, None),
                };
                block
                    .body
                    .push(Line::Instruction(mnemonic.to_string(), operand, line_no));
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix(".proc") {
            current = Some(parse_declaration(rest, line_no, ProcedureFlags::empty())?);
            continue;
        }
        if let Some(rest) = line.strip_prefix(".import") {
            blocks.push(parse_declaration(rest, line_no, ProcedureFlags::IMPORTED)?);
            continue;
        }
        if let Some(rest) = line.strip_prefix(".opcode") {
            let parts: Vec<_> = rest.split_whitespace().collect();
            if parts.len() != 2 {
                return Err(AssemblyError::Message(format!(
                    "expected .opcode <name> <word> at line {line_no}"
                )));
            }
            let word = parse_word(parts[1], line_no)?;
            aliases.insert(parts[0].to_ascii_uppercase(), word);
            continue;
        }
        return Err(AssemblyError::Message(format!(
            "unexpected directive {line} at line {line_no}"
        )));
    }

    if let Some(block) = current {
        return Err(AssemblyError::Message(format!(
            "unterminated procedure {} starting at line {}",
            block.name, block.line
        )));
    }

    let mut builder = ImageBuilder::new();
    for block in &blocks {
        if builder.procedure_index(&block.name).is_some() {
            return Err(AssemblyError::DuplicateProcedure(block.name.clone()));
        }
        let index = builder.procedure(&block.name, block.argument_count);
        builder.set_flags(index, block.flags);
    }

    let mut labels: HashMap<String, Label> = HashMap::new();
    for block in &blocks {
        for entry in &block.body {
            if let Line::Label(name, line) = entry {
                if labels.contains_key(name) {
                    return Err(AssemblyError::DuplicateLabel(format!("{name} (line {line})")));
                }
                let label = builder.label();
                labels.insert(name.clone(), label);
            }
        }
    }

    for (index, block) in blocks.iter().enumerate() {
        if block.flags.contains(ProcedureFlags::IMPORTED) {
            continue;
        }
        builder.bind_entry(index);
        for entry in &block.body {
            match entry {
                Line::Label(name, _) => {
                    if let Some(label) = labels.get(name) {
                        builder.place(*label);
                    }
                }
                Line::Instruction(mnemonic, operand, line) => {
                    emit_instruction(&mut builder, &aliases, &labels, mnemonic, operand.as_deref(), *line)?;
                }
            }
        }
    }

    builder.build()
}

fn parse_declaration(
    rest: &str,
    line_no: usize,
    mut flags: ProcedureFlags,
) -> Result<ProcedureBlock, AssemblyError> {
    let mut parts = rest.split_whitespace();
    let name = parts.next().ok_or_else(|| {
        AssemblyError::Message(format!("missing procedure name at line {line_no}"))
    })?;
    let mut argument_count = 0;
    for part in parts {
        if let Some(count) = part.strip_prefix("args=") {
            argument_count = count.parse::<i32>().map_err(|_| {
                AssemblyError::Message(format!("invalid argument count {count} at line {line_no}"))
            })?;
            continue;
        }
        match part {
            "critical" => flags.insert(ProcedureFlags::CRITICAL),
            "export" => flags.insert(ProcedureFlags::EXPORTED),
            other => {
                return Err(AssemblyError::Message(format!(
                    "unknown procedure attribute {other} at line {line_no}"
                )))
            }
        }
    }
    Ok(ProcedureBlock {
        name: name.to_string(),
        argument_count,
        flags,
        body: Vec::new(),
        line: line_no,
    })
}

fn emit_instruction(
    builder: &mut ImageBuilder,
    aliases: &HashMap<String, u16>,
    labels: &HashMap<String, Label>,
    mnemonic: &str,
    operand: Option<&str>,
    line: usize,
) -> Result<(), AssemblyError> {
    let upper = mnemonic.to_ascii_uppercase();
    if upper == "PUSH" {
        let operand = operand.ok_or_else(|| {
            AssemblyError::Message(format!("push needs an operand at line {line}"))
        })?;
        return emit_push(builder, labels, operand, line);
    }
    if let Some(extra) = operand {
        return Err(AssemblyError::Message(format!(
            "unexpected operand {extra} for {mnemonic} at line {line}"
        )));
    }
    if let Some(word) = aliases.get(&upper) {
        builder.emit_word(*word);
        return Ok(());
    }
    let opcode = Opcode::from_mnemonic(&upper).ok_or_else(|| {
        AssemblyError::Message(format!("unknown opcode {mnemonic} at line {line}"))
    })?;
    builder.emit(opcode);
    Ok(())
}

fn emit_push(
    builder: &mut ImageBuilder,
    labels: &HashMap<String, Label>,
    operand: &str,
    line: usize,
) -> Result<(), AssemblyError> {
    if operand.starts_with('"') {
        let text = parse_string_literal(operand, line)?;
        let offset = builder.string(&text);
        builder.push_string(offset);
    } else if let Some(name) = operand.strip_prefix('@') {
        let label = labels
            .get(name)
            .ok_or_else(|| AssemblyError::UndefinedLabel(format!("{name} at line {line}")))?;
        builder.push_address(*label);
    } else if let Some(name) = operand.strip_prefix('#') {
        let index = builder
            .procedure_index(name)
            .ok_or_else(|| AssemblyError::UndefinedProcedure(format!("{name} at line {line}")))?;
        builder.push_int(index as i32);
    } else if let Some(name) = operand.strip_prefix('$') {
        let offset = builder.identifier(name);
        builder.push_int(offset as i32);
    } else if operand.contains('.') {
        let value = operand.parse::<f32>().map_err(|_| {
            AssemblyError::Message(format!("invalid float literal {operand} at line {line}"))
        })?;
        builder.push_float(value);
    } else {
        builder.push_int(parse_int(operand, line)?);
    }
    Ok(())
}

fn parse_int(value: &str, line: usize) -> Result<i32, AssemblyError> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let parsed = match digits.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).map(|bits| bits as i32),
        None => digits.parse::<i32>(),
    }
    .map_err(|_| AssemblyError::Message(format!("invalid integer literal {value} at line {line}")))?;
    Ok(if negative { parsed.wrapping_neg() } else { parsed })
}

fn parse_word(value: &str, line: usize) -> Result<u16, AssemblyError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let word = u16::from_str_radix(digits, 16)
        .map_err(|_| AssemblyError::Message(format!("invalid opcode word {value} at line {line}")))?;
    if word & tags::OPCODE == 0 {
        return Err(AssemblyError::Message(format!(
            "opcode word {value} lacks the opcode bit at line {line}"
        )));
    }
    Ok(word)
}

fn parse_string_literal(value: &str, line: usize) -> Result<String, AssemblyError> {
    let trimmed = value.trim();
    if !trimmed.starts_with('"') || !trimmed.ends_with('"') || trimmed.len() < 2 {
        return Err(AssemblyError::Message(format!(
            "invalid string literal {value} at line {line}"
        )));
    }
    let mut result = String::new();
    let mut chars = trimmed[1..trimmed.len() - 1].chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            let escape = chars.next().ok_or_else(|| {
                AssemblyError::Message(format!(
                    "unterminated escape sequence in string literal at line {line}"
                ))
            })?;
            match escape {
                '\\' => result.push('\\'),
                '"' => result.push('"'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                other => {
                    return Err(AssemblyError::Message(format!(
                        "unsupported escape \\{other} at line {line}"
                    )));
                }
            }
        } else {
            result.push(ch);
        }
    }
    Ok(result)
}

/// Drops a trailing `#` comment. A `#` inside a string literal or starting a
/// procedure reference is kept.
fn strip_comment(line: &str) -> &str {
    let mut in_string = false;
    let mut previous = ' ';
    for (pos, ch) in line.char_indices() {
        match ch {
            '"' if previous != '\\' => in_string = !in_string,
            '#' if !in_string && (previous.is_whitespace() || pos == 0) => {
                let next = line[pos + 1..].chars().next();
                if !next.is_some_and(|c| c.is_alphanumeric() || c == '_') {
                    return &line[..pos];
                }
            }
            _ => {}
        }
        previous = ch;
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{trampoline, Image};

    #[test]
    fn prologue_carries_the_trampolines() {
        let mut builder = ImageBuilder::new();
        let start = builder.procedure("start", 0);
        builder.bind_entry(start);
        builder.emit(Opcode::Noop);
        let image = Image::parse("t", builder.build().expect("builds")).expect("parses");
        assert_eq!(image.signature(), Some(VERSION));
        assert_eq!(
            image.read_word(trampoline::HOST_RETURN),
            Some(Opcode::PopFlagsExit.word())
        );
        assert_eq!(
            image.read_word(trampoline::EXTERN_HOST_RETURN),
            Some(Opcode::PopFlagsExitExtern.word())
        );
        assert_eq!(
            image.read_word(trampoline::EXTERN_CALL_RETURN),
            Some(Opcode::PopFlagsReturnValExtern.word())
        );
    }

    #[test]
    fn labels_resolve_to_absolute_addresses() {
        let mut builder = ImageBuilder::new();
        let start = builder.procedure("start", 0);
        builder.bind_entry(start);
        let target = builder.label();
        builder.push_address(target);
        builder.emit(Opcode::Jump);
        builder.place(target);
        builder.emit(Opcode::Noop);
        let image = Image::parse("t", builder.build().expect("builds")).expect("parses");
        let entry = image.procedures()[0].entry_address;
        assert_eq!(image.read_long(entry + 2), Some(entry + 8));
    }

    #[test]
    fn unplaced_labels_fail_the_build() {
        let mut builder = ImageBuilder::new();
        let start = builder.procedure("start", 0);
        builder.bind_entry(start);
        let nowhere = builder.label();
        builder.push_address(nowhere);
        assert!(matches!(
            builder.build(),
            Err(AssemblyError::UndefinedLabel(_))
        ));
    }

    #[test]
    fn strings_and_identifiers_are_deduplicated() {
        let mut builder = ImageBuilder::new();
        assert_eq!(builder.string("a"), 0);
        assert_eq!(builder.string("bc"), 2);
        assert_eq!(builder.string("a"), 0);
        let first = builder.identifier("x");
        assert_eq!(first, 4);
        assert_eq!(builder.identifier("x"), first);
    }

    #[test]
    fn assembles_text() {
        let source = r#"
            .opcode print 0x8072
            .proc start            # entry
                push "hi # there"
                print
            top:
                push @top
                jump
            .end
            .proc helper args=2 critical export
                push #helper
                push $shared
                push -1.5
                pop_return
            .end
            .import greet args=1
        "#;
        let image = Image::parse("text", assemble(source).expect("assembles")).expect("parses");
        assert_eq!(image.procedures().len(), 3);
        assert_eq!(image.procedure_name(2), Some("greet"));
        let helper = image.procedures()[1];
        assert_eq!(helper.argument_count, 2);
        assert!(helper.flags.contains(ProcedureFlags::CRITICAL | ProcedureFlags::EXPORTED));
        assert!(image.procedures()[2].is_imported());
        assert_eq!(image.static_string(0), Some("hi # there"));

        let entry = image.procedures()[0].entry_address;
        assert_eq!(image.read_word(entry + 6), Some(0x8072));
        assert_eq!(image.read_long(entry + 10), Some(entry + 8));
    }

    #[test]
    fn reports_line_numbers() {
        let err = assemble(".proc start\n  frobnicate\n.end\n").unwrap_err();
        assert_eq!(
            err,
            AssemblyError::Message("unknown opcode frobnicate at line 2".into())
        );
        assert!(matches!(
            assemble(".proc a\n.end\n.proc a\n.end\n"),
            Err(AssemblyError::DuplicateProcedure(_))
        ));
        assert!(matches!(assemble(""), Err(AssemblyError::NoProcedures)));
    }
}
