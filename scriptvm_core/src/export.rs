//! Name-keyed linkage tables through which programs share variables and procedures.

use std::collections::HashMap;
use std::fmt;

use crate::program::ProgramId;
use crate::value::Pointer;
use crate::{VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    Variable,
    Procedure,
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternalKind::Variable => write!(f, "variable"),
            ExternalKind::Procedure => write!(f, "procedure"),
        }
    }
}

/// Value held by an exported variable. Strings are owned by the table, never by a program.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportedValue {
    Int(i32),
    Float(f32),
    Pointer(Pointer),
    String(String),
}

impl Default for ExportedValue {
    fn default() -> Self {
        ExportedValue::Int(0)
    }
}

impl fmt::Display for ExportedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportedValue::Int(value) => write!(f, "{value}"),
            ExportedValue::Float(value) => write!(f, "{value:.5}"),
            ExportedValue::Pointer(value) => write!(f, "{value}"),
            ExportedValue::String(value) => write!(f, "{value:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedVariable {
    pub name: String,
    pub owner_name: String,
    pub owner: ProgramId,
    pub value: ExportedValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedProcedure {
    pub name: String,
    pub owner: ProgramId,
    pub address: u32,
    pub argument_count: i32,
}

/// Export tables for one runtime. Lookups ignore ASCII case.
#[derive(Debug, Default)]
pub struct ExportTable {
    variables: HashMap<String, ExportedVariable>,
    procedures: HashMap<String, ExportedProcedure>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl ExportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a variable. Re-exporting from a program with the same name resets the
    /// value; any other owner is rejected while the first export is live.
    pub fn export_variable(&mut self, owner: ProgramId, owner_name: &str, name: &str) -> VmResult<()> {
        if let Some(existing) = self.variables.get_mut(&key(name)) {
            if !existing.owner_name.eq_ignore_ascii_case(owner_name) {
                return Err(VmError::ExportConflict {
                    kind: ExternalKind::Variable,
                    name: name.to_string(),
                    owner: existing.owner_name.clone(),
                });
            }
            existing.owner = owner;
            existing.value = ExportedValue::default();
            return Ok(());
        }
        self.variables.insert(
            key(name),
            ExportedVariable {
                name: name.to_string(),
                owner_name: owner_name.to_string(),
                owner,
                value: ExportedValue::default(),
            },
        );
        Ok(())
    }

    pub fn export_procedure(
        &mut self,
        owner: ProgramId,
        name: &str,
        address: u32,
        argument_count: i32,
    ) -> VmResult<()> {
        if let Some(existing) = self.procedures.get(&key(name)) {
            if existing.owner != owner {
                return Err(VmError::ExportConflict {
                    kind: ExternalKind::Procedure,
                    name: name.to_string(),
                    owner: existing.owner.to_string(),
                });
            }
        }
        self.procedures.insert(
            key(name),
            ExportedProcedure {
                name: name.to_string(),
                owner,
                address,
                argument_count,
            },
        );
        Ok(())
    }

    pub fn fetch(&self, name: &str) -> VmResult<&ExportedValue> {
        self.variables
            .get(&key(name))
            .map(|variable| &variable.value)
            .ok_or_else(|| VmError::UnknownExternal {
                kind: ExternalKind::Variable,
                name: name.to_string(),
            })
    }

    pub fn store(&mut self, name: &str, value: ExportedValue) -> VmResult<()> {
        let variable = self
            .variables
            .get_mut(&key(name))
            .ok_or_else(|| VmError::UnknownExternal {
                kind: ExternalKind::Variable,
                name: name.to_string(),
            })?;
        variable.value = value;
        Ok(())
    }

    pub fn procedure(&self, name: &str) -> Option<&ExportedProcedure> {
        self.procedures.get(&key(name))
    }

    /// Revokes every entry owned by `program`.
    pub fn remove_program(&mut self, program: ProgramId) {
        self.variables.retain(|_, variable| variable.owner != program);
        self.procedures.retain(|_, procedure| procedure.owner != program);
    }

    pub fn clear_all_variables(&mut self) {
        self.variables.clear();
    }

    /// Snapshot of the variable table, sorted by name.
    pub fn variables(&self) -> Vec<&ExportedVariable> {
        let mut out: Vec<_> = self.variables.values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Snapshot of the procedure table, sorted by name.
    pub fn procedures(&self) -> Vec<&ExportedProcedure> {
        let mut out: Vec<_> = self.procedures.values().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.procedures.is_empty()
    }
}
