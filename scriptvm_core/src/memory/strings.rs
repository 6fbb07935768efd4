use std::collections::{HashMap, HashSet};

/// Per-program heap of strings built at run time.
///
/// Offsets handed out by [`StringHeap::intern`] stay valid until a sweep finds them
/// unreferenced. Equal strings share an offset while they are live.
#[derive(Debug, Default)]
pub struct StringHeap {
    entries: Vec<Option<Box<str>>>,
    index: HashMap<Box<str>, u32>,
    free: Vec<u32>,
}

impl StringHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(offset) = self.index.get(value) {
            return *offset;
        }
        let boxed: Box<str> = value.into();
        let offset = match self.free.pop() {
            Some(offset) => {
                self.entries[offset as usize] = Some(boxed.clone());
                offset
            }
            None => {
                self.entries.push(Some(boxed.clone()));
                (self.entries.len() - 1) as u32
            }
        };
        self.index.insert(boxed, offset);
        offset
    }

    pub fn get(&self, offset: u32) -> Option<&str> {
        self.entries
            .get(offset as usize)
            .and_then(|entry| entry.as_deref())
    }

    /// Number of live strings.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Tombstones every string whose offset is not in `live`. Returns how many were freed.
    pub fn sweep(&mut self, live: &HashSet<u32>) -> usize {
        let mut freed = 0;
        for (offset, entry) in self.entries.iter_mut().enumerate() {
            let offset = offset as u32;
            if live.contains(&offset) {
                continue;
            }
            if let Some(value) = entry.take() {
                self.index.remove(&value);
                self.free.push(offset);
                freed += 1;
            }
        }
        freed
    }
}
