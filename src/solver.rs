//! Retrograde table generation.
//!
//! Both side to move tables of a material placement are solved together.
//! An initial pass grades every position from its immediate consequences
//! alone: checkmates, stalemates and moves that leave the material, with
//! all same material successors taken as draws. Value iteration then
//! re-grades positions whose successors changed until a full pass over
//! both tables changes nothing. Changed positions mark their
//! predecessors, found by retrograde move enumeration, as pending in the
//! other table, so later passes only touch the live frontier.
//!
//! Work is distributed over output pages. Each worker pulls a page,
//! re-grades its pending positions against the committed state of the
//! opposite table and commits the page back.

use std::sync::atomic::{AtomicU64, Ordering};

use shakmaty::{Board, ByColor, Chess, Color, File, Position};
use tracing::{debug, info};

use crate::{
    cursor::Cursor,
    definition::TableDefinition,
    errors::GenResult,
    material::Material,
    staged::{StagedTable, Storage},
    tablebase::Tablebase,
    types::Value,
    unmoves::for_each_unmove,
};

/// Concurrently markable set of table indices.
struct PendingSet {
    bits: Vec<AtomicU64>,
}

impl PendingSet {
    fn new(len: u64) -> PendingSet {
        let words = (len + 63) / 64;
        let mut bits = Vec::with_capacity(words as usize);
        bits.resize_with(words as usize, || AtomicU64::new(0));
        PendingSet { bits }
    }

    fn mark(&self, index: u64) {
        self.bits[(index >> 6) as usize].fetch_or(1 << (index & 63), Ordering::Relaxed);
    }

    fn contains(&self, index: u64) -> bool {
        self.bits[(index >> 6) as usize].load(Ordering::Relaxed) & (1 << (index & 63)) != 0
    }

    fn is_empty(&self) -> bool {
        self.bits.iter().all(|word| word.load(Ordering::Relaxed) == 0)
    }

    fn clear(&mut self) {
        for word in &mut self.bits {
            *word.get_mut() = 0;
        }
    }
}

/// Generates the two tables of one material placement.
pub struct Generator<'a> {
    material: Material,
    definitions: ByColor<TableDefinition>,
    tables: ByColor<StagedTable>,
    pending: ByColor<PendingSet>,
    tablebase: &'a Tablebase,
}

impl<'a> Generator<'a> {
    /// Prepares generation of both side to move tables for the given
    /// material. All capture and promotion targets must already be
    /// registered with `tablebase`.
    pub fn new(
        material: &Material,
        tablebase: &'a Tablebase,
        storage: ByColor<Storage>,
    ) -> Generator<'a> {
        assert!(material.count() > 2, "bare kings have no table");
        let definitions =
            ByColor::new_with(|color| TableDefinition::new(&material.with_turn(color)));
        let tables = ByColor::new_with(|color| {
            StagedTable::new(
                definitions.get(color).index_count(),
                storage.get(color).clone(),
            )
        });
        let pending =
            ByColor::new_with(|color| PendingSet::new(definitions.get(color).index_count()));
        Generator {
            material: material.with_turn(Color::White),
            definitions,
            tables,
            pending,
            tablebase,
        }
    }

    pub fn definition(&self, turn: Color) -> &TableDefinition {
        self.definitions.get(turn)
    }

    pub fn table(&self, turn: Color) -> &StagedTable {
        self.tables.get(turn)
    }

    /// Runs generation to the fixpoint.
    pub fn run(&mut self) -> GenResult<()> {
        info!(material = %self.material, "generating");

        for side in [Color::White, Color::Black] {
            let graded = self.pass(side, true)?;
            debug!(material = %self.material, side = %side, graded, "initial pass");
        }

        let mut side = Color::White;
        let mut pass = 0u32;
        let mut idle = 0;
        while idle < 2 {
            pass += 1;
            let changed = self.pass(side, false)?;
            debug!(material = %self.material, side = %side, pass, changed, "iteration pass");
            idle = if changed == 0 { idle + 1 } else { 0 };
            side = !side;
        }

        info!(material = %self.material, passes = pass, "converged");
        Ok(())
    }

    fn pass(&mut self, side: Color, init: bool) -> GenResult<u64> {
        if !init && self.pending.get(side).is_empty() {
            return Ok(0);
        }
        self.tables.get_mut(side).switch_to_write();

        let pass = Pass {
            definition: self.definitions.get(side),
            other_definition: self.definitions.get(!side),
            table: self.tables.get(side),
            other_table: (!init).then(|| self.tables.get(!side)),
            pending: self.pending.get(side),
            next_pending: self.pending.get(!side),
            tablebase: self.tablebase,
            side,
            init,
        };
        let changed = rayon::broadcast(|_| pass.work())
            .into_iter()
            .try_fold(0, |sum, changed| Ok::<_, crate::errors::GenError>(sum + changed?))?;

        // The initial pass does not consume pending marks, it only
        // leaves marks for the other side.
        if !init {
            self.pending.get_mut(side).clear();
        }
        self.tables.get_mut(side).switch_to_read()?;
        Ok(changed)
    }
}

struct Pass<'a> {
    definition: &'a TableDefinition,
    other_definition: &'a TableDefinition,
    table: &'a StagedTable,
    other_table: Option<&'a StagedTable>,
    pending: &'a PendingSet,
    next_pending: &'a PendingSet,
    tablebase: &'a Tablebase,
    side: Color,
    init: bool,
}

impl Pass<'_> {
    fn work(&self) -> GenResult<u64> {
        let mut changed = 0;
        while let Some(mut page) = self.table.next_output_page() {
            let mut cursor = Cursor::at(self.definition, page.first_index());
            for offset in 0..page.len() {
                let index = page.first_index() + offset as u64;
                if self.init || self.pending.contains(index) {
                    let (value, board) = match self.definition.checked_position(cursor.setup()) {
                        Some(pos) => (self.grade(&pos)?, Some(pos.board().clone())),
                        None => (Value::ILLEGAL, None),
                    };
                    if value != page.get(offset) {
                        changed += 1;
                        page.set(offset, value);
                        // Draws are also the default grade of ungraded
                        // positions, so they wake nobody in the initial
                        // pass.
                        if let Some(board) = board {
                            if !(self.init && value == Value::DRAW) {
                                self.mark_predecessors(&board, cursor.chunk().ep_file());
                            }
                        }
                    }
                }
                cursor.advance();
            }
            self.table.commit(page)?;
        }
        Ok(changed)
    }

    /// Best value over all legal moves. Successors in other materials
    /// are probed, same material successors are read from the committed
    /// generation of the opposite table.
    fn grade(&self, pos: &Chess) -> GenResult<Value> {
        let moves = pos.legal_moves();
        if moves.is_empty() {
            return Ok(if pos.is_check() {
                Value::MATE
            } else {
                Value::DRAW
            });
        }

        let mut best = Value::MATE;
        for m in &moves {
            let mut successor = pos.clone();
            successor.play_unchecked(m);
            let value = if m.is_capture() || m.is_promotion() {
                self.tablebase.probe(&successor)?
            } else {
                match self.other_table {
                    Some(table) => match self.other_definition.table_index(&successor) {
                        Some(index) => table.value_at(index),
                        None => unreachable!("legal successor has no table index"),
                    },
                    None => Value::DRAW,
                }
            };
            best = best.max(value.opposite());
        }
        Ok(best)
    }

    fn mark_predecessors(&self, board: &Board, ep_file: Option<File>) {
        for_each_unmove(board, self.side, ep_file, |unmove| {
            let mut predecessor = board.clone();
            if let Some(piece) = predecessor.remove_piece_at(unmove.to) {
                predecessor.set_piece_at(unmove.from, piece);
            }
            for index in self.other_definition.index_group(&predecessor, unmove.ep_file) {
                self.next_pending.mark(index);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use shakmaty::{fen::Fen, CastlingMode};

    use super::*;

    fn value_of(generator: &Generator<'_>, fen: &str) -> Value {
        let pos: Chess = fen
            .parse::<Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap();
        let turn = pos.turn();
        let index = generator.definition(turn).table_index(&pos).unwrap();
        generator.table(turn).value_at(index)
    }

    #[test]
    fn test_generate_krvk() {
        let tables = Tablebase::new();
        let material: Material = "KRvK w".parse().unwrap();
        let mut generator =
            Generator::new(&material, &tables, ByColor::new_with(|_| Storage::Memory));
        generator.run().unwrap();

        // Checkmate.
        assert_eq!(value_of(&generator, "k7/2K5/8/8/8/8/8/R7 b - - 0 1"), Value::MATE);
        // Mate in one with Rb8.
        assert_eq!(
            value_of(&generator, "k7/2K5/8/8/8/8/8/1R6 w - - 0 1"),
            Value::win_in(1)
        );
        // Stalemate.
        assert_eq!(value_of(&generator, "k7/8/K7/8/8/8/8/1R6 b - - 0 1"), Value::DRAW);
        // The undefended rook can be captured, leaving bare kings.
        assert_eq!(value_of(&generator, "8/8/8/8/8/2k5/2R5/K7 b - - 0 1"), Value::DRAW);
        // White wins from any quiet starting position.
        assert!(value_of(&generator, "8/8/8/3k4/8/8/8/K6R w - - 0 1").is_win());
    }

    #[test]
    fn test_pending_set() {
        let mut pending = PendingSet::new(200);
        assert!(pending.is_empty());
        pending.mark(0);
        pending.mark(63);
        pending.mark(199);
        assert!(pending.contains(0));
        assert!(pending.contains(63));
        assert!(pending.contains(199));
        assert!(!pending.contains(1));
        assert!(!pending.is_empty());
        pending.clear();
        assert!(pending.is_empty());
    }
}
