//! The intrinsic opcode catalogue.

use std::convert::TryFrom;
use std::fmt;

use crate::value::tags;
use crate::VmError;

macro_rules! opcodes {
    ($($variant:ident = $word:literal => $name:literal,)*) => {
        /// Opcodes implemented by the VM itself. Hosts add their own words through
        /// [`crate::Dispatcher::register`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant = $word,)*
        }

        impl Opcode {
            /// Every intrinsic, ordered by table slot.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }
        }
    };
}

opcodes! {
    Noop = 0x8000 => "NOOP",
    Push = 0x8001 => "PUSH",
    CriticalStart = 0x8002 => "CRITICAL_START",
    CriticalDone = 0x8003 => "CRITICAL_DONE",
    Jump = 0x8004 => "JUMP",
    Call = 0x8005 => "CALL",
    CallAt = 0x8006 => "CALL_AT",
    CallWhen = 0x8007 => "CALL_WHEN",
    CallStart = 0x8008 => "CALLSTART",
    Exec = 0x8009 => "EXEC",
    Spawn = 0x800A => "SPAWN",
    Fork = 0x800B => "FORK",
    AToD = 0x800C => "A_TO_D",
    DToA = 0x800D => "D_TO_A",
    Exit = 0x800E => "EXIT",
    Detach = 0x800F => "DETACH",
    ExitProgram = 0x8010 => "EXIT_PROGRAM",
    StopProgram = 0x8011 => "STOP_PROGRAM",
    FetchGlobal = 0x8012 => "FETCH_GLOBAL",
    StoreGlobal = 0x8013 => "STORE_GLOBAL",
    FetchExternal = 0x8014 => "FETCH_EXTERNAL",
    StoreExternal = 0x8015 => "STORE_EXTERNAL",
    ExportVariable = 0x8016 => "EXPORT_VARIABLE",
    ExportProcedure = 0x8017 => "EXPORT_PROCEDURE",
    Swap = 0x8018 => "SWAP",
    SwapA = 0x8019 => "SWAPA",
    Pop = 0x801A => "POP",
    Dup = 0x801B => "DUP",
    PopReturn = 0x801C => "POP_RETURN",
    PopExit = 0x801D => "POP_EXIT",
    PopAddress = 0x801E => "POP_ADDRESS",
    PopFlags = 0x801F => "POP_FLAGS",
    PopFlagsReturn = 0x8020 => "POP_FLAGS_RETURN",
    PopFlagsExit = 0x8021 => "POP_FLAGS_EXIT",
    PopFlagsReturnExtern = 0x8022 => "POP_FLAGS_RETURN_EXTERN",
    PopFlagsExitExtern = 0x8023 => "POP_FLAGS_EXIT_EXTERN",
    PopFlagsReturnValExtern = 0x8024 => "POP_FLAGS_RETURN_VAL_EXTERN",
    PopFlagsReturnValExit = 0x8025 => "POP_FLAGS_RETURN_VAL_EXIT",
    PopFlagsReturnValExitExtern = 0x8026 => "POP_FLAGS_RETURN_VAL_EXIT_EXTERN",
    CheckArgCount = 0x8027 => "CHECK_ARG_COUNT",
    LookupProcedureByName = 0x8028 => "LOOKUP_PROCEDURE_BY_NAME",
    PopBase = 0x8029 => "POP_BASE",
    PopToBase = 0x802A => "POP_TO_BASE",
    PushBase = 0x802B => "PUSH_BASE",
    SetGlobal = 0x802C => "SET_GLOBAL",
    FetchProcedureAddress = 0x802D => "FETCH_PROCEDURE_ADDRESS",
    Dump = 0x802E => "DUMP",
    If = 0x802F => "IF",
    While = 0x8030 => "WHILE",
    Store = 0x8031 => "STORE",
    Fetch = 0x8032 => "FETCH",
    Equal = 0x8033 => "EQUAL",
    NotEqual = 0x8034 => "NOT_EQUAL",
    LessEqual = 0x8035 => "LESS_EQUAL",
    GreaterEqual = 0x8036 => "GREATER_EQUAL",
    Less = 0x8037 => "LESS",
    Greater = 0x8038 => "GREATER",
    Add = 0x8039 => "ADD",
    Sub = 0x803A => "SUB",
    Mul = 0x803B => "MUL",
    Div = 0x803C => "DIV",
    Mod = 0x803D => "MOD",
    And = 0x803E => "AND",
    Or = 0x803F => "OR",
    BitwiseAnd = 0x8040 => "BITWISE_AND",
    BitwiseOr = 0x8041 => "BITWISE_OR",
    BitwiseXor = 0x8042 => "BITWISE_XOR",
    BitwiseNot = 0x8043 => "BITWISE_NOT",
    Floor = 0x8044 => "FLOOR",
    Not = 0x8045 => "NOT",
    Negate = 0x8046 => "NEGATE",
    Wait = 0x8047 => "WAIT",
    Cancel = 0x8048 => "CANCEL",
    CancelAll = 0x8049 => "CANCEL_ALL",
}

/// Second encodings of the critical-section pair kept by older images.
pub const CRITICAL_START_ALIAS: u16 = 0x804A;
pub const CRITICAL_DONE_ALIAS: u16 = 0x804B;

impl Opcode {
    pub fn word(self) -> u16 {
        self as u16
    }

    /// Table slot the opcode occupies.
    pub fn slot(self) -> usize {
        usize::from(self.word() & 0x3FF)
    }

    /// Bytes of inline operand following the opcode word.
    pub fn operand_len(self) -> usize {
        match self {
            Opcode::Push => 4,
            _ => 0,
        }
    }

    /// Decodes a fetched word into an intrinsic. Type bits on `PUSH` words are ignored.
    pub fn decode(word: u16) -> Option<Opcode> {
        if word & tags::OPCODE == 0 {
            return None;
        }
        match word & 0x3FF {
            0x4A => Some(Opcode::CriticalStart),
            0x4B => Some(Opcode::CriticalDone),
            slot => Opcode::ALL.get(usize::from(slot)).copied(),
        }
    }

    pub fn from_mnemonic(text: &str) -> Option<Opcode> {
        let upper = text.to_ascii_uppercase();
        Opcode::ALL
            .iter()
            .copied()
            .find(|opcode| opcode.name() == upper)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u16> for Opcode {
    type Error = VmError;

    fn try_from(word: u16) -> Result<Self, Self::Error> {
        if word & tags::OPCODE == 0 {
            return Err(VmError::MalformedOpcode {
                word,
                reason: "bad",
            });
        }
        Opcode::decode(word).ok_or(VmError::MalformedOpcode {
            word,
            reason: "undefined",
        })
    }
}
