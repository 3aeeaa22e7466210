//! Context selection for the range coded blocks.
//!
//! The coder keeps one probability model per context. The selector maps
//! the position about to be coded to its context and learns from every
//! coded symbol. Encoder and decoder must drive the same selector through
//! the same symbol sequence, so selector state is reset at block
//! boundaries to keep blocks independently decodable.

use shakmaty::{Bitboard, Board, Color, Role};

use crate::types::{Classification, Value};

const LIGHT_SQUARES: Bitboard = Bitboard(0x55aa_55aa_55aa_55aa);

pub trait ModelSelector {
    fn model_count(&self) -> usize;

    /// Context of the next symbol for the given position.
    fn model_index(&self, board: &Board) -> usize;

    /// Learns a coded symbol.
    fn add_symbol(&mut self, board: &Board, symbol: usize);

    /// Forgets all learned state at a block boundary.
    fn reset(&mut self);
}

/// Number of bishops of each color standing on light squares. Mirrored
/// configurations share a bucket because dark squared play is the light
/// squared play of the mirrored board.
#[derive(Debug, Clone)]
struct BishopBuckets {
    white_count: u32,
    buckets: Vec<usize>,
    bucket_count: usize,
}

impl BishopBuckets {
    fn new(white_bishops: u32, black_bishops: u32) -> BishopBuckets {
        let width = (black_bishops + 1) as usize;
        let mut buckets = vec![usize::MAX; (white_bishops + 1) as usize * width];
        let mut bucket_count = 0;
        for white in 0..=white_bishops as usize {
            for black in 0..=black_bishops as usize {
                if buckets[white * width + black] == usize::MAX {
                    buckets[white * width + black] = bucket_count;
                    let complement =
                        (white_bishops as usize - white) * width + (black_bishops as usize - black);
                    buckets[complement] = bucket_count;
                    bucket_count += 1;
                }
            }
        }
        BishopBuckets {
            white_count: white_bishops,
            buckets,
            bucket_count,
        }
    }

    fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    fn bucket(&self, board: &Board) -> usize {
        let light = |color: Color| {
            (board.by_piece(Role::Bishop.of(color)) & LIGHT_SQUARES).count()
        };
        let width = self.buckets.len() / (self.white_count as usize + 1);
        self.buckets[light(Color::White) * width + light(Color::Black)]
    }
}

/// Context from the bishop bucket, the previous winning (or losing)
/// symbol and a short history of symbol classifications.
#[derive(Debug, Clone)]
pub struct ClassificationSelector {
    symbol_count: usize,
    history_length: u32,
    history_modulus: usize,
    previous_classification: Classification,
    classifications: Vec<Classification>,
    buckets: BishopBuckets,
    previous_symbols: Vec<usize>,
    history: Vec<usize>,
}

pub const DEFAULT_HISTORY_LENGTH: u32 = 2;

impl ClassificationSelector {
    /// `symbol_results` maps each symbol to its table value. `previous_win`
    /// selects whether winning or losing symbols are remembered as the
    /// previous symbol context.
    pub fn new(
        symbol_results: &[Value],
        history_length: u32,
        previous_win: bool,
        white_bishops: u32,
        black_bishops: u32,
    ) -> ClassificationSelector {
        let buckets = BishopBuckets::new(white_bishops, black_bishops);
        let bucket_count = buckets.bucket_count();
        let mut selector = ClassificationSelector {
            symbol_count: symbol_results.len(),
            history_length,
            history_modulus: Classification::LEGAL_COUNT.pow(history_length),
            previous_classification: if previous_win {
                Classification::Win
            } else {
                Classification::Lose
            },
            classifications: symbol_results.iter().map(|v| v.classification()).collect(),
            buckets,
            previous_symbols: vec![0; bucket_count],
            history: vec![0; bucket_count],
        };
        selector.reset();
        selector
    }

    pub fn history_length(&self) -> u32 {
        self.history_length
    }

    pub fn previous_win(&self) -> bool {
        self.previous_classification == Classification::Win
    }
}

impl ModelSelector for ClassificationSelector {
    fn model_count(&self) -> usize {
        self.history_modulus * self.previous_symbols.len() * (self.symbol_count + 1)
    }

    fn model_index(&self, board: &Board) -> usize {
        let bucket = self.buckets.bucket(board);
        let previous = self.previous_symbols[bucket];
        let history = self.history[bucket];
        (bucket * (self.symbol_count + 1) + previous) * self.history_modulus + history
    }

    fn add_symbol(&mut self, board: &Board, symbol: usize) {
        let bucket = self.buckets.bucket(board);
        let classification = self.classifications[symbol];
        if classification == self.previous_classification {
            self.previous_symbols[bucket] = symbol;
        }
        self.history[bucket] = (Classification::LEGAL_COUNT * self.history[bucket]
            + classification.index())
            % self.history_modulus;
    }

    fn reset(&mut self) {
        // The sentinel symbol means that no previous symbol is known.
        self.previous_symbols.fill(self.symbol_count);
        self.history.fill(Classification::Draw.index());
    }
}

#[cfg(test)]
mod tests {
    use shakmaty::Square;

    use super::*;

    fn values(depths: &[u16]) -> Vec<Value> {
        depths.iter().map(|&d| Value::win_in(d)).collect()
    }

    #[test]
    fn test_bishop_buckets_fold_complements() {
        let buckets = BishopBuckets::new(1, 1);
        // (0, 0) folds with (1, 1) and (0, 1) with (1, 0).
        assert_eq!(buckets.bucket_count(), 2);

        let mut board = Board::empty();
        board.set_piece_at(Square::C1, Color::White.bishop());
        board.set_piece_at(Square::F8, Color::Black.bishop());
        let dark_dark = buckets.bucket(&board);

        let mut mirrored = Board::empty();
        mirrored.set_piece_at(Square::B1, Color::White.bishop());
        mirrored.set_piece_at(Square::C8, Color::Black.bishop());
        assert_eq!(buckets.bucket(&mirrored), dark_dark);

        let mut mixed = Board::empty();
        mixed.set_piece_at(Square::B1, Color::White.bishop());
        mixed.set_piece_at(Square::F8, Color::Black.bishop());
        assert_ne!(buckets.bucket(&mixed), dark_dark);
    }

    #[test]
    fn test_selector_state_is_per_bucket() {
        let results = [
            Value::win_in(2),
            Value::lose_in(1),
            Value::DRAW,
            Value::win_in(4),
        ];
        let mut selector = ClassificationSelector::new(&results, 2, true, 0, 0);
        let board = Board::empty();
        let initial = selector.model_index(&board);

        selector.add_symbol(&board, 0);
        let after_win = selector.model_index(&board);
        assert_ne!(initial, after_win);

        selector.add_symbol(&board, 2);
        // The draw does not replace the previous winning symbol.
        let after_draw = selector.model_index(&board);
        assert_ne!(after_draw, after_win);

        selector.reset();
        assert_eq!(selector.model_index(&board), initial);
    }

    #[test]
    fn test_model_index_in_bounds() {
        let results = values(&[1, 3, 5, 7, 9]);
        let mut selector = ClassificationSelector::new(&results, 2, true, 1, 0);
        let mut board = Board::empty();
        board.set_piece_at(Square::C1, Color::White.bishop());
        for symbol in [0, 4, 2, 2, 1, 3] {
            assert!(selector.model_index(&board) < selector.model_count());
            selector.add_symbol(&board, symbol);
        }
    }

}
