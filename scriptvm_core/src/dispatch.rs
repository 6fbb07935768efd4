use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::context::Context;
use crate::{VmError, VmResult};

/// Number of slots in the opcode table.
pub const OPCODE_TABLE_SIZE: usize = 342;

/// An opcode implementation. Handlers pop their own arguments from the running program's
/// data stack, push at most one result, and report failures through the returned error.
pub type OpcodeHandler = Arc<dyn Fn(&mut Context<'_>) -> VmResult<()> + Send + Sync>;

static INTRINSICS: Lazy<Vec<Option<OpcodeHandler>>> = Lazy::new(|| {
    let mut table = vec![None; OPCODE_TABLE_SIZE];
    crate::ops::install(&mut table);
    table
});

/// The opcode table shared by every program a host runs.
///
/// Build it once at start-up, register host opcodes, then pass it by reference into the
/// scheduler.
#[derive(Clone)]
pub struct Dispatcher {
    table: Vec<Option<OpcodeHandler>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registered", &self.registered())
            .finish()
    }
}

impl Dispatcher {
    /// A table holding every intrinsic opcode.
    pub fn new() -> Self {
        Self {
            table: INTRINSICS.clone(),
        }
    }

    /// A table with no handlers at all.
    pub fn empty() -> Self {
        Self {
            table: vec![None; OPCODE_TABLE_SIZE],
        }
    }

    /// Binds `word` to `handler`, replacing whatever occupied the slot.
    pub fn register<F>(&mut self, word: u16, handler: F) -> VmResult<()>
    where
        F: Fn(&mut Context<'_>) -> VmResult<()> + Send + Sync + 'static,
    {
        let slot = usize::from(word & 0x3FFF);
        if slot >= OPCODE_TABLE_SIZE {
            return Err(VmError::OpcodeOutOfRange(word));
        }
        self.table[slot] = Some(Arc::new(handler));
        Ok(())
    }

    /// Looks up the handler for a fetched word.
    pub fn handler(&self, word: u16) -> VmResult<&OpcodeHandler> {
        if word & 0x8000 == 0 {
            return Err(VmError::MalformedOpcode { word, reason: "bad" });
        }
        self.table
            .get(usize::from(word & 0x3FF))
            .and_then(Option::as_ref)
            .ok_or(VmError::MalformedOpcode {
                word,
                reason: "undefined",
            })
    }

    pub fn is_registered(&self, word: u16) -> bool {
        self.handler(word).is_ok()
    }

    pub fn registered(&self) -> usize {
        self.table.iter().filter(|slot| slot.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn intrinsics_are_preinstalled() {
        let dispatcher = Dispatcher::new();
        for opcode in Opcode::ALL {
            assert!(dispatcher.is_registered(opcode.word()), "{opcode}");
        }
        assert!(dispatcher.is_registered(0x804A));
        assert!(dispatcher.is_registered(0x804B));
        assert!(!dispatcher.is_registered(0x8072));
    }

    #[test]
    fn registration_is_bounds_checked() {
        let mut dispatcher = Dispatcher::empty();
        dispatcher
            .register(0x8072, |_| Ok(()))
            .expect("slot 0x72 fits");
        assert!(dispatcher.is_registered(0x8072));
        assert_eq!(
            dispatcher.register(0x8156, |_| Ok(())),
            Err(VmError::OpcodeOutOfRange(0x8156))
        );
    }

    #[test]
    fn lookup_rejects_literals_and_empty_slots() {
        let dispatcher = Dispatcher::empty();
        assert_eq!(
            dispatcher.handler(0x4000).err(),
            Some(VmError::MalformedOpcode {
                word: 0x4000,
                reason: "bad"
            })
        );
        assert_eq!(
            dispatcher.handler(0x8000).err(),
            Some(VmError::MalformedOpcode {
                word: 0x8000,
                reason: "undefined"
            })
        );
    }
}
