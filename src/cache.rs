//! Shared LRU cache for decoded blocks.
//!
//! Decoding a block costs a range coder pass over 4096 positions, so
//! probes with any locality at all should hit here instead. The cache is
//! a fixed number of slots with an intrusive recency list, keyed by
//! material and block index.

use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;

use crate::{material::Material, reader::Block};

const NONE: usize = usize::MAX;

#[derive(Clone, Eq, PartialEq, Hash)]
struct BlockKey {
    material: Material,
    block_index: u64,
}

struct Slot {
    key: BlockKey,
    block: Arc<Block>,
    prev: usize,
    next: usize,
}

struct Slots {
    map: FxHashMap<BlockKey, usize>,
    slots: Vec<Slot>,
    head: usize,
    tail: usize,
}

pub struct BlockCache {
    capacity: usize,
    inner: Mutex<Slots>,
}

impl BlockCache {
    pub fn new(capacity: usize) -> BlockCache {
        assert!(capacity > 0);
        BlockCache {
            capacity,
            inner: Mutex::new(Slots {
                map: FxHashMap::default(),
                slots: Vec::with_capacity(capacity),
                head: NONE,
                tail: NONE,
            }),
        }
    }

    pub fn get(&self, material: &Material, block_index: u64) -> Option<Arc<Block>> {
        let key = BlockKey {
            material: material.clone(),
            block_index,
        };
        let mut inner = self.lock();
        let slot = *inner.map.get(&key)?;
        inner.unlink(slot);
        inner.push_front(slot);
        Some(Arc::clone(&inner.slots[slot].block))
    }

    pub fn insert(&self, material: &Material, block_index: u64, block: Arc<Block>) {
        let key = BlockKey {
            material: material.clone(),
            block_index,
        };
        let mut inner = self.lock();
        if let Some(&slot) = inner.map.get(&key) {
            inner.slots[slot].block = block;
            inner.unlink(slot);
            inner.push_front(slot);
            return;
        }

        let slot = if inner.slots.len() < self.capacity {
            inner.slots.push(Slot {
                key: key.clone(),
                block,
                prev: NONE,
                next: NONE,
            });
            inner.slots.len() - 1
        } else {
            let slot = inner.tail;
            inner.unlink(slot);
            let evicted = std::mem::replace(&mut inner.slots[slot].key, key.clone());
            inner.map.remove(&evicted);
            inner.slots[slot].block = block;
            slot
        };
        inner.map.insert(key, slot);
        inner.push_front(slot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Slots {
    fn unlink(&mut self, slot: usize) {
        let Slot { prev, next, .. } = self.slots[slot];
        match prev {
            NONE => {
                if self.head == slot {
                    self.head = next;
                }
            }
            prev => self.slots[prev].next = next,
        }
        match next {
            NONE => {
                if self.tail == slot {
                    self.tail = prev;
                }
            }
            next => self.slots[next].prev = prev,
        }
        self.slots[slot].prev = NONE;
        self.slots[slot].next = NONE;
    }

    fn push_front(&mut self, slot: usize) {
        self.slots[slot].prev = NONE;
        self.slots[slot].next = self.head;
        match self.head {
            NONE => self.tail = slot,
            head => self.slots[head].prev = slot,
        }
        self.head = slot;
    }
}
