//! Per-instance execution state.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::host::Host;
use crate::image::{Image, ProcedureEntry, ProcedureFlags};
use crate::memory::{ArenaHandle, StringHeap};
use crate::stack::ValueStack;
use crate::value::{format_float, Value};
use crate::{StackKind, VmError, VmResult};

/// Stable identity of a program owned by a [`crate::Runtime`].
pub type ProgramId = ArenaHandle<Program>;

bitflags! {
    /// Scheduling flags. The low 16 bits are what call frames save and restore.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProgramFlags: u16 {
        const EXITED = 0x01;
        const ERRORED = 0x04;
        const STOPPED = 0x08;
        const WAITING = 0x10;
        const CALLING_CHILD = 0x20;
        const RETURNED = 0x40;
        const CRITICAL = 0x80;
        const DETACHED_CHILD = 0x100;
    }
}

/// Scheduling state as seen by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramState {
    Runnable,
    Waiting,
    Exited,
    ExitedWithError,
    Stopped,
    CallingChildSynchronously,
    HasDetachedChild,
}

pub type WaitPredicate = Arc<dyn Fn(&mut dyn Host) -> bool + Send + Sync>;

/// What a waiting program is waiting for.
#[derive(Clone)]
pub enum WaitCondition {
    /// Resume once the host clock reaches this many milliseconds.
    Until(u32),
    /// Resume once the host-supplied predicate holds.
    Predicate(WaitPredicate),
}

impl WaitCondition {
    pub fn predicate<F>(check: F) -> Self
    where
        F: Fn(&mut dyn Host) -> bool + Send + Sync + 'static,
    {
        WaitCondition::Predicate(Arc::new(check))
    }

    pub fn is_satisfied(&self, host: &mut dyn Host) -> bool {
        match self {
            WaitCondition::Until(deadline) => host.now_ms() >= *deadline,
            WaitCondition::Predicate(check) => check(host),
        }
    }
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::Until(deadline) => f.debug_tuple("Until").field(deadline).finish(),
            WaitCondition::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// One running instance of an image.
#[derive(Debug)]
pub struct Program {
    pub(crate) name: String,
    pub(crate) image: Arc<Image>,
    pub(crate) procedures: Vec<ProcedureEntry>,
    pub(crate) data: ValueStack,
    pub(crate) control: ValueStack,
    pub(crate) ip: u32,
    pub(crate) frame_pointer: i32,
    pub(crate) base_pointer: i32,
    pub(crate) strings: StringHeap,
    pub(crate) flags: ProgramFlags,
    pub(crate) opcode: u16,
    pub(crate) wait: Option<WaitCondition>,
    pub(crate) started_at: Option<u32>,
    pub(crate) host_tag: i32,
    pub(crate) parent: Option<ProgramId>,
    pub(crate) child: Option<ProgramId>,
    pub(crate) purged: bool,
}

impl Program {
    pub fn new(image: Arc<Image>, stack_capacity: usize) -> Self {
        let procedures = image.procedures().to_vec();
        let ip = procedures
            .first()
            .map(|entry| entry.entry_address)
            .unwrap_or_default();
        Self {
            name: image.name().to_string(),
            image,
            procedures,
            data: ValueStack::new(StackKind::Data, stack_capacity),
            control: ValueStack::new(StackKind::Control, stack_capacity),
            ip,
            frame_pointer: -1,
            base_pointer: -1,
            strings: StringHeap::new(),
            flags: ProgramFlags::empty(),
            opcode: 0,
            wait: None,
            started_at: None,
            host_tag: -1,
            parent: None,
            child: None,
            purged: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn procedures(&self) -> &[ProcedureEntry] {
        &self.procedures
    }

    pub fn procedure(&self, index: usize) -> Option<&ProcedureEntry> {
        self.procedures.get(index)
    }

    pub(crate) fn procedure_index(&self, index: i32) -> VmResult<usize> {
        usize::try_from(index)
            .ok()
            .filter(|slot| *slot < self.procedures.len())
            .ok_or(VmError::InvalidProcedure(index))
    }

    pub fn procedure_name(&self, index: usize) -> Option<&str> {
        self.image.procedure_name(index)
    }

    /// Case-insensitive lookup over the whole directory, entry procedure included.
    pub fn find_procedure(&self, name: &str) -> Option<usize> {
        (0..self.procedures.len()).find(|index| {
            self.procedure_name(*index)
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name))
        })
    }

    /// Index of the local procedure whose code range brackets the instruction pointer.
    pub fn current_procedure(&self) -> Option<usize> {
        self.procedures
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.flags.contains(ProcedureFlags::IMPORTED))
            .filter(|(_, entry)| entry.entry_address <= self.ip)
            .max_by_key(|(_, entry)| entry.entry_address)
            .map(|(index, _)| index)
    }

    pub fn current_procedure_name(&self) -> &str {
        self.current_procedure()
            .and_then(|index| self.procedure_name(index))
            .unwrap_or("<unknown>")
    }

    pub fn data(&self) -> &ValueStack {
        &self.data
    }

    pub fn control(&self) -> &ValueStack {
        &self.control
    }

    pub fn ip(&self) -> u32 {
        self.ip
    }

    pub fn frame_pointer(&self) -> i32 {
        self.frame_pointer
    }

    pub fn base_pointer(&self) -> i32 {
        self.base_pointer
    }

    pub fn flags(&self) -> ProgramFlags {
        self.flags
    }

    /// Last opcode word fetched.
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn wait(&self) -> Option<&WaitCondition> {
        self.wait.as_ref()
    }

    pub fn started_at(&self) -> Option<u32> {
        self.started_at
    }

    pub fn host_tag(&self) -> i32 {
        self.host_tag
    }

    pub fn set_host_tag(&mut self, tag: i32) {
        self.host_tag = tag;
    }

    pub fn parent(&self) -> Option<ProgramId> {
        self.parent
    }

    pub fn child(&self) -> Option<ProgramId> {
        self.child
    }

    pub fn is_critical(&self) -> bool {
        self.flags.contains(ProgramFlags::CRITICAL)
    }

    pub fn is_exited(&self) -> bool {
        self.flags.contains(ProgramFlags::EXITED)
    }

    pub fn state(&self) -> ProgramState {
        let flags = self.flags;
        if flags.contains(ProgramFlags::ERRORED) {
            ProgramState::ExitedWithError
        } else if flags.contains(ProgramFlags::EXITED) {
            ProgramState::Exited
        } else if flags.contains(ProgramFlags::STOPPED) {
            ProgramState::Stopped
        } else if flags.contains(ProgramFlags::CALLING_CHILD) {
            ProgramState::CallingChildSynchronously
        } else if flags.contains(ProgramFlags::WAITING) {
            ProgramState::Waiting
        } else if flags.contains(ProgramFlags::DETACHED_CHILD) {
            ProgramState::HasDetachedChild
        } else {
            ProgramState::Runnable
        }
    }

    pub(crate) fn set_wait(&mut self, condition: WaitCondition) {
        self.wait = Some(condition);
        self.flags.insert(ProgramFlags::WAITING);
    }

    /// Text of a string value, looked up in the table its tag names.
    pub fn resolve_string(&self, value: &Value) -> VmResult<&str> {
        match *value {
            Value::StaticString(offset) => {
                self.image
                    .static_string(offset)
                    .ok_or(VmError::InvalidStringRef {
                        table: "static string",
                        offset,
                    })
            }
            Value::DynamicString(offset) => {
                self.strings.get(offset).ok_or(VmError::InvalidStringRef {
                    table: "dynamic string",
                    offset,
                })
            }
            other => Err(VmError::TypeMismatch {
                expected: "string",
                found: other.type_name(),
            }),
        }
    }

    /// Renders any value the way string concatenation and `print` see it.
    pub fn stringify(&self, value: &Value) -> VmResult<String> {
        Ok(match value {
            Value::Int(number) => number.to_string(),
            Value::Float(number) => format_float(*number),
            Value::Pointer(pointer) => pointer.to_string(),
            Value::StaticString(_) | Value::DynamicString(_) => {
                self.resolve_string(value)?.to_string()
            }
        })
    }

    pub fn intern(&mut self, text: &str) -> Value {
        Value::DynamicString(self.strings.intern(text))
    }

    pub fn identifier(&self, offset: u32) -> VmResult<&str> {
        self.image
            .identifier(offset)
            .ok_or(VmError::InvalidStringRef {
                table: "identifier",
                offset,
            })
    }

    pub(crate) fn live_string_refs(&self) -> HashSet<u32> {
        self.data
            .iter()
            .chain(self.control.iter())
            .filter_map(|value| match value {
                Value::DynamicString(offset) => Some(*offset),
                _ => None,
            })
            .collect()
    }

    pub fn dynamic_string_count(&self) -> usize {
        self.strings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::ImageBuilder;
    use crate::Opcode;

    fn program() -> Program {
        let mut builder = ImageBuilder::new();
        let start = builder.procedure("start", 0);
        let helper = builder.procedure("Helper", 0);
        let text = builder.string("static");
        builder.bind_entry(start);
        builder.push_string(text);
        builder.emit(Opcode::Pop);
        builder.bind_entry(helper);
        builder.emit(Opcode::Noop);
        let image = Image::parse("test", builder.build().expect("builds")).expect("parses");
        Program::new(Arc::new(image), 16)
    }

    #[test]
    fn starts_at_the_entry_procedure() {
        let program = program();
        assert_eq!(program.ip(), program.procedures()[0].entry_address);
        assert_eq!(program.current_procedure_name(), "start");
        assert_eq!(program.state(), ProgramState::Runnable);
    }

    #[test]
    fn current_procedure_brackets_the_ip() {
        let mut program = program();
        program.ip = program.procedures()[1].entry_address + 2;
        assert_eq!(program.current_procedure(), Some(1));
    }

    #[test]
    fn procedure_lookup_ignores_case() {
        let program = program();
        assert_eq!(program.find_procedure("helper"), Some(1));
        assert_eq!(program.find_procedure("START"), Some(0));
        assert_eq!(program.find_procedure("missing"), None);
    }

    #[test]
    fn strings_resolve_through_their_table() {
        let mut program = program();
        assert_eq!(
            program.resolve_string(&Value::StaticString(0)),
            Ok("static")
        );
        let dynamic = program.intern("built");
        assert_eq!(program.resolve_string(&dynamic), Ok("built"));
        assert_eq!(
            program.resolve_string(&Value::DynamicString(9)),
            Err(VmError::InvalidStringRef {
                table: "dynamic string",
                offset: 9
            })
        );
        assert_eq!(program.stringify(&Value::Float(1.0)).expect("float"), "1.00000");
    }

    #[test]
    fn state_prefers_terminal_flags() {
        let mut program = program();
        program.flags = ProgramFlags::EXITED | ProgramFlags::ERRORED | ProgramFlags::WAITING;
        assert_eq!(program.state(), ProgramState::ExitedWithError);
        program.flags = ProgramFlags::WAITING | ProgramFlags::CRITICAL;
        assert_eq!(program.state(), ProgramState::Waiting);
    }
}
