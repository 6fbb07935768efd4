//! Immutable bytecode images.
//!
//! An image is laid out as a 42-byte prologue, the procedure table (a count followed by
//! 24-byte records), the identifier table and the static string table (each a 4-byte
//! length followed by NUL-terminated names), then code. All integers are big-endian and
//! code addresses are absolute offsets into the image.

use std::io::{Cursor, Read};

use bitflags::bitflags;
use thiserror::Error;

pub const HEADER_LEN: usize = 42;
pub const PROCEDURE_RECORD_LEN: usize = 24;
pub const MAGIC: &[u8; 4] = b"SVMI";
pub const VERSION: u16 = 1;

/// Return trampolines that live inside the prologue. Host-level and cross-program
/// invocations push one of these as the callee's return address.
pub mod trampoline {
    /// `POP_FLAGS_EXIT`, used by event-fired local procedures.
    pub const EVENT_RETURN: u32 = 20;
    /// `POP_FLAGS_EXIT`, used by host-invoked local procedures.
    pub const HOST_RETURN: u32 = 24;
    /// `POP_FLAGS_EXIT_EXTERN`, used by event-fired imported procedures.
    pub const EXTERN_EVENT_RETURN: u32 = 28;
    /// `POP_FLAGS_EXIT_EXTERN`, used by host-invoked imported procedures.
    pub const EXTERN_HOST_RETURN: u32 = 32;
    /// `POP_FLAGS_RETURN_VAL_EXTERN`, used by script-level cross-program calls.
    pub const EXTERN_CALL_RETURN: u32 = 36;
}

bitflags! {
    /// Runtime flags stored in each procedure record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProcedureFlags: u32 {
        const TIMED = 0x01;
        const CONDITIONAL = 0x02;
        const IMPORTED = 0x04;
        const EXPORTED = 0x08;
        const CRITICAL = 0x10;
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image truncated in {0}")]
    Truncated(&'static str),
    #[error("image declares no procedures, so it has no entry point")]
    MissingEntry,
    #[error("procedure {index} names identifier offset {offset}, which is outside the identifier table")]
    BadProcedureName { index: usize, offset: u32 },
}

/// One record of the procedure directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcedureEntry {
    pub name_offset: u32,
    pub flags: ProcedureFlags,
    /// Absolute deadline in milliseconds, meaningful while `TIMED` is set.
    pub fire_time: u32,
    /// Address of the guard snippet, meaningful while `CONDITIONAL` is set.
    pub condition_address: u32,
    pub entry_address: u32,
    pub argument_count: i32,
}

impl ProcedureEntry {
    pub fn is_imported(&self) -> bool {
        self.flags.contains(ProcedureFlags::IMPORTED)
    }

    /// Clears the timing flags, leaving linkage flags untouched.
    pub fn disarm(&mut self) {
        self.flags
            .remove(ProcedureFlags::TIMED | ProcedureFlags::CONDITIONAL);
    }

    pub fn cancel(&mut self) {
        self.disarm();
        self.fire_time = 0;
        self.condition_address = 0;
    }

    fn encode(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.name_offset.to_be_bytes());
        bytes.extend_from_slice(&self.flags.bits().to_be_bytes());
        bytes.extend_from_slice(&self.fire_time.to_be_bytes());
        bytes.extend_from_slice(&self.condition_address.to_be_bytes());
        bytes.extend_from_slice(&self.entry_address.to_be_bytes());
        bytes.extend_from_slice(&self.argument_count.to_be_bytes());
    }
}

/// A loaded image. Shared read-only between every program instantiated from it.
#[derive(Debug, Clone)]
pub struct Image {
    name: String,
    bytes: Vec<u8>,
    procedures: Vec<ProcedureEntry>,
    identifiers: (usize, usize),
    strings: (usize, usize),
    code_start: usize,
}

impl Image {
    pub fn parse(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_LEN {
            return Err(ImageError::Truncated("header"));
        }

        let mut cursor = Cursor::new(&bytes[..]);
        cursor.set_position(HEADER_LEN as u64);
        let count = read_u32(&mut cursor, "procedure table")? as usize;
        if count == 0 {
            return Err(ImageError::MissingEntry);
        }
        let table_len = count
            .checked_mul(PROCEDURE_RECORD_LEN)
            .ok_or(ImageError::Truncated("procedure table"))?;
        if bytes.len() < HEADER_LEN + 4 + table_len {
            return Err(ImageError::Truncated("procedure table"));
        }
        let mut procedures = Vec::with_capacity(count);
        for _ in 0..count {
            procedures.push(read_procedure(&mut cursor)?);
        }

        let identifiers_start = cursor.position() as usize;
        let identifiers_len = read_u32(&mut cursor, "identifier table")? as usize;
        let identifiers_end = identifiers_start + 4 + identifiers_len;
        if identifiers_end > bytes.len() {
            return Err(ImageError::Truncated("identifier table"));
        }

        cursor.set_position(identifiers_end as u64);
        let strings_len = read_u32(&mut cursor, "string table")? as usize;
        let strings_start = identifiers_end + 4;
        let strings_end = strings_start + strings_len;
        if strings_end > bytes.len() {
            return Err(ImageError::Truncated("string table"));
        }

        let image = Self {
            name: name.into(),
            bytes,
            procedures,
            identifiers: (identifiers_start, identifiers_end),
            strings: (strings_start, strings_end),
            code_start: strings_end,
        };
        for (index, procedure) in image.procedures.iter().enumerate() {
            if image.identifier(procedure.name_offset).is_none() {
                return Err(ImageError::BadProcedureName {
                    index,
                    offset: procedure.name_offset,
                });
            }
        }
        Ok(image)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[..HEADER_LEN]
    }

    /// Magic and version from the prologue, if it carries ours.
    pub fn signature(&self) -> Option<u16> {
        if &self.bytes[..4] != MAGIC {
            return None;
        }
        Some(u16::from_be_bytes([self.bytes[4], self.bytes[5]]))
    }

    pub fn procedures(&self) -> &[ProcedureEntry] {
        &self.procedures
    }

    pub fn procedure_name(&self, index: usize) -> Option<&str> {
        self.procedures
            .get(index)
            .and_then(|procedure| self.identifier(procedure.name_offset))
    }

    pub fn code_start(&self) -> usize {
        self.code_start
    }

    /// Resolves an identifier offset. Offsets count from the start of the identifier
    /// table, length prefix included.
    pub fn identifier(&self, offset: u32) -> Option<&str> {
        let (start, end) = self.identifiers;
        let position = start.checked_add(offset as usize)?;
        if position < start + 4 || position >= end {
            return None;
        }
        read_c_str(&self.bytes[position..end])
    }

    /// Resolves a static string offset, counted from the first byte after the length prefix.
    pub fn static_string(&self, offset: u32) -> Option<&str> {
        let (start, end) = self.strings;
        let position = start.checked_add(offset as usize)?;
        if position >= end {
            return None;
        }
        read_c_str(&self.bytes[position..end])
    }

    pub fn identifiers(&self) -> Vec<(u32, &str)> {
        let (start, end) = self.identifiers;
        collect_c_strs(&self.bytes[start + 4..end], 4)
    }

    pub fn static_strings(&self) -> Vec<(u32, &str)> {
        let (start, end) = self.strings;
        collect_c_strs(&self.bytes[start..end], 0)
    }

    pub fn read_word(&self, address: u32) -> Option<u16> {
        let address = address as usize;
        let bytes = self.bytes.get(address..address.checked_add(2)?)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_long(&self, address: u32) -> Option<u32> {
        let address = address as usize;
        let bytes = self.bytes.get(address..address.checked_add(4)?)?;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Serialises a procedure directory back to its on-disk form.
pub(crate) fn encode_procedures(procedures: &[ProcedureEntry], bytes: &mut Vec<u8>) {
    bytes.extend_from_slice(&(procedures.len() as u32).to_be_bytes());
    for procedure in procedures {
        procedure.encode(bytes);
    }
}

fn read_procedure(cursor: &mut Cursor<&[u8]>) -> Result<ProcedureEntry, ImageError> {
    let section = "procedure table";
    let name_offset = read_u32(cursor, section)?;
    let flags = ProcedureFlags::from_bits_retain(read_u32(cursor, section)?);
    let fire_time = read_u32(cursor, section)?;
    let condition_address = read_u32(cursor, section)?;
    let entry_address = read_u32(cursor, section)?;
    let argument_count = read_u32(cursor, section)? as i32;
    Ok(ProcedureEntry {
        name_offset,
        flags,
        fire_time,
        condition_address,
        entry_address,
        argument_count,
    })
}

fn read_u32(cursor: &mut Cursor<&[u8]>, section: &'static str) -> Result<u32, ImageError> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| ImageError::Truncated(section))?;
    Ok(u32::from_be_bytes(buf))
}

fn read_c_str(bytes: &[u8]) -> Option<&str> {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok()
}

fn collect_c_strs(bytes: &[u8], base: u32) -> Vec<(u32, &str)> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let len = rest.iter().position(|byte| *byte == 0).unwrap_or(rest.len());
        if len > 0 {
            if let Ok(text) = std::str::from_utf8(&rest[..len]) {
                out.push((base + offset as u32, text));
            }
        }
        offset += len + 1;
    }
    out
}
