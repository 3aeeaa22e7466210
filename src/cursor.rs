use arrayvec::ArrayVec;
use shakmaty::{Board, Setup};

use crate::{chunk::Chunk, definition::TableDefinition};

/// At most five piece groups per side besides the kings.
const MAX_SLOTS: usize = 10;

/// Sequential walk over all table indices of a definition.
///
/// The cursor keeps the per-group combination indices of the current
/// position, so stepping to the next index and rebuilding the position are
/// both cheap. The last group varies fastest, chunks follow each other in
/// definition order.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    definition: &'a TableDefinition,
    chunk_index: usize,
    counters: ArrayVec<u64, MAX_SLOTS>,
    table_index: u64,
}

impl<'a> Cursor<'a> {
    pub fn new(definition: &'a TableDefinition) -> Cursor<'a> {
        Cursor::at(definition, 0)
    }

    pub fn at(definition: &'a TableDefinition, table_index: u64) -> Cursor<'a> {
        let mut counters = ArrayVec::new();
        for _ in definition.definitions() {
            counters.push(0);
        }
        let mut cursor = Cursor {
            definition,
            chunk_index: 0,
            counters,
            table_index: 0,
        };
        cursor.seek(table_index);
        cursor
    }

    /// Jumps to an arbitrary table index.
    pub fn seek(&mut self, table_index: u64) {
        self.table_index = table_index;
        if table_index >= self.definition.index_count() {
            self.chunk_index = self.definition.chunks().len();
            return;
        }

        self.chunk_index = self
            .definition
            .chunks()
            .partition_point(|c| c.end_index() <= table_index);
        let chunk = &self.definition.chunks()[self.chunk_index];
        let mut remaining = table_index - chunk.first_index();
        for (counter, slot) in self.counters.iter_mut().zip(chunk.slots()) {
            *counter = remaining / slot.multiplier;
            remaining -= *counter * slot.multiplier;
        }
    }

    pub fn is_valid(&self) -> bool {
        self.chunk_index < self.definition.chunks().len()
    }

    pub fn table_index(&self) -> u64 {
        self.table_index
    }

    pub fn chunk(&self) -> &'a Chunk {
        &self.definition.chunks()[self.chunk_index]
    }

    /// Steps to the next table index.
    pub fn advance(&mut self) {
        debug_assert!(self.is_valid());
        let chunk = &self.definition.chunks()[self.chunk_index];
        self.table_index += 1;

        for (counter, slot) in self.counters.iter_mut().zip(chunk.slots()).rev() {
            *counter += 1;
            if *counter < slot.combination.count() {
                return;
            }
            *counter = 0;
        }
        self.chunk_index += 1;
    }

    /// Position setup at the current index. Not every setup is a legal
    /// position, piece groups may collide or leave the king to move in
    /// check.
    pub fn setup(&self) -> Setup {
        let chunk = self.chunk();
        let mut board = Board::empty();
        chunk.fill_board(&mut board);
        for (counter, slot) in self.counters.iter().zip(chunk.slots()) {
            slot.combination.place(&mut board, *counter);
        }
        Setup {
            board,
            turn: chunk.turn(),
            ep_square: chunk.ep_square(),
            ..Setup::empty()
        }
    }
}
