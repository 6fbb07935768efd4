use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Handle returned by the arena allocator.
///
/// Handles carry a generation so a handle to a freed slot never aliases the value that
/// later reuses that slot.
pub struct ArenaHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ArenaHandle<T> {
    fn new(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Packs the handle into a single word so it can travel through a value stack.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Rebuilds a handle packed by [`ArenaHandle::to_bits`]. Zero is never a valid
    /// handle because generations start at one.
    pub fn from_bits(bits: u64) -> Option<Self> {
        let generation = (bits >> 32) as u32;
        if generation == 0 {
            return None;
        }
        Some(Self::new((bits & 0xFFFF_FFFF) as usize, generation))
    }
}

impl<T> Clone for ArenaHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ArenaHandle<T> {}

impl<T> PartialEq for ArenaHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for ArenaHandle<T> {}

impl<T> Hash for ArenaHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for ArenaHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaHandle({}v{})", self.index, self.generation)
    }
}

impl<T> fmt::Display for ArenaHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slot arena with free-list reuse.
#[derive(Debug)]
pub struct Arena<T> {
    entries: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn allocate(&mut self, value: T) -> ArenaHandle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.entries[index];
            slot.generation += 1;
            slot.value = Some(value);
            return ArenaHandle::new(index, slot.generation);
        }
        let handle = ArenaHandle::new(self.entries.len(), 1);
        self.entries.push(Slot {
            generation: 1,
            value: Some(value),
        });
        handle
    }

    pub fn get(&self, handle: ArenaHandle<T>) -> Option<&T> {
        self.entries
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: ArenaHandle<T>) -> Option<&mut T> {
        self.entries
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: ArenaHandle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: ArenaHandle<T>) -> Option<T> {
        let slot = self.entries.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        self.free.push(handle.index());
        self.len -= 1;
        Some(value)
    }

    /// Removes every value for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(ArenaHandle<T>, &T) -> bool) {
        for (index, slot) in self.entries.iter_mut().enumerate() {
            let drop = match &slot.value {
                Some(value) => !keep(ArenaHandle::new(index, slot.generation), value),
                None => false,
            };
            if drop {
                slot.value = None;
                self.free.push(index);
                self.len -= 1;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaHandle<T>, &T)> {
        self.entries.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (ArenaHandle::new(index, slot.generation), value))
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Index<ArenaHandle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: ArenaHandle<T>) -> &T {
        self.get(handle).expect("stale arena handle")
    }
}

impl<T> IndexMut<ArenaHandle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: ArenaHandle<T>) -> &mut T {
        self.get_mut(handle).expect("stale arena handle")
    }
}
