//! Fixed pool of EU3 country tags available to the country mapper.
//!
//! Slots are indexed by their position in `common/countries.txt`. Each slot
//! carries a flag set; a slot can be auto-allocated only while its flags are
//! empty.

use std::collections::HashMap;

use bitflags::bitflags;
use tracing::warn;

use crate::ids::NationTag;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SlotFlags: u8 {
        /// Country already exists in the destination history.
        const RESERVED = 1 << 0;
        /// Listed in the blocked-nations file.
        const BLOCKED = 1 << 1;
        /// Bound to a CK2 realm during this run.
        const CONSUMED = 1 << 2;
    }
}

#[derive(Debug, Clone, Default)]
pub struct NationSlotArena {
    tags: Vec<NationTag>,
    flags: Vec<SlotFlags>,
    index: HashMap<NationTag, usize>,
    cursor: usize,
}

impl NationSlotArena {
    /// Build the pool from the engine's tag table, keeping at most `ceiling`
    /// distinct tags in table order.
    pub fn new<I>(universe: I, ceiling: usize) -> Self
    where
        I: IntoIterator<Item = NationTag>,
    {
        let mut arena = Self::default();
        let mut dropped = 0usize;
        for tag in universe {
            if arena.index.contains_key(&tag) {
                continue;
            }
            if arena.tags.len() >= ceiling {
                dropped += 1;
                continue;
            }
            arena.index.insert(tag.clone(), arena.tags.len());
            arena.tags.push(tag);
            arena.flags.push(SlotFlags::empty());
        }
        if dropped > 0 {
            warn!(
                target: "ck2_to_eu3::slots",
                ceiling,
                dropped,
                "nation_slots.truncated=engine_ceiling"
            );
        }
        arena
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn contains(&self, tag: &NationTag) -> bool {
        self.index.contains_key(tag)
    }

    pub fn flags(&self, tag: &NationTag) -> Option<SlotFlags> {
        self.index.get(tag).map(|&idx| self.flags[idx])
    }

    pub fn tags(&self) -> &[NationTag] {
        &self.tags
    }

    /// Mark a tag as an existing country. Returns `false` for unknown tags.
    pub fn reserve(&mut self, tag: &NationTag) -> bool {
        self.set(tag, SlotFlags::RESERVED)
    }

    pub fn block(&mut self, tag: &NationTag) -> bool {
        self.set(tag, SlotFlags::BLOCKED)
    }

    /// Claim a specific slot regardless of its reserved/blocked state.
    pub fn consume(&mut self, tag: &NationTag) -> bool {
        self.set(tag, SlotFlags::CONSUMED)
    }

    /// Number of slots still open to automatic allocation.
    pub fn available(&self) -> usize {
        self.flags.iter().filter(|flags| flags.is_empty()).count()
    }

    /// Take the next free slot in table order.
    pub fn allocate(&mut self) -> Option<NationTag> {
        while self.cursor < self.flags.len() {
            let idx = self.cursor;
            self.cursor += 1;
            if self.flags[idx].is_empty() {
                self.flags[idx].insert(SlotFlags::CONSUMED);
                return Some(self.tags[idx].clone());
            }
        }
        None
    }

    fn set(&mut self, tag: &NationTag, flag: SlotFlags) -> bool {
        match self.index.get(tag) {
            Some(&idx) => {
                self.flags[idx].insert(flag);
                true
            }
            None => false,
        }
    }
}
