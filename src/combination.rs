use std::sync::{Arc, Mutex, PoisonError};

use arrayvec::ArrayVec;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use shakmaty::{Bitboard, Board, Piece, Role, Square};

use crate::symmetry::Symmetry;

pub const fn binomial(mut n: u64, k: u64) -> u64 {
    if k > n {
        return 0;
    }
    let mut result = 1;
    let mut denom = 1;
    while denom <= k {
        result = result * n / denom;
        n -= 1;
        denom += 1;
    }
    result
}

/// Largest piece group that a single combination can hold.
pub const MAX_GROUP: usize = 8;

fn find_combination_number(max_n: u64, k: u64, value: u64) -> u64 {
    let mut low = k - 1;
    let mut high = max_n;
    while high - low > 1 {
        let middle = (high + low) / 2;
        if value >= binomial(middle, k) {
            low = middle;
        } else {
            high = middle;
        }
    }
    low
}

/// Bijection between k-subsets of n items and `0..C(n, k)`.
///
/// Items are numbered `0..n`; a subset maps to the sum of `C(item_i, i+1)`
/// over its sorted items. The zero, one and two piece group shapes are by
/// far the most common and get direct paths.
#[derive(Debug, Copy, Clone)]
enum NumberSystem {
    Empty,
    Single { n: u64 },
    Pair { n: u64 },
    General { n: u64, k: u64 },
}

impl NumberSystem {
    fn new(n: u64, k: u64) -> NumberSystem {
        match k {
            0 => NumberSystem::Empty,
            1 => NumberSystem::Single { n },
            2 => NumberSystem::Pair { n },
            _ => NumberSystem::General { n, k },
        }
    }

    fn count(self) -> u64 {
        match self {
            NumberSystem::Empty => 1,
            NumberSystem::Single { n } => n,
            NumberSystem::Pair { n } => binomial(n, 2),
            NumberSystem::General { n, k } => binomial(n, k),
        }
    }

    fn k(self) -> usize {
        match self {
            NumberSystem::Empty => 0,
            NumberSystem::Single { .. } => 1,
            NumberSystem::Pair { .. } => 2,
            NumberSystem::General { k, .. } => k as usize,
        }
    }

    fn index_of(self, items: &[u8]) -> u64 {
        debug_assert_eq!(items.len(), self.k());
        match self {
            NumberSystem::Empty => 0,
            NumberSystem::Single { .. } => u64::from(items[0]),
            NumberSystem::Pair { .. } => {
                let low = u64::from(items[0].min(items[1]));
                let high = u64::from(items[0].max(items[1]));
                high * (high - 1) / 2 + low
            }
            NumberSystem::General { k, .. } => {
                let mut sorted: ArrayVec<u8, MAX_GROUP> = items.iter().copied().collect();
                sorted.sort_unstable();
                let mut index = 0;
                for i in (1..=k).rev() {
                    index += binomial(u64::from(sorted[i as usize - 1]), i);
                }
                index
            }
        }
    }

    /// Bitmask over `0..n` of the combination with the given index.
    fn mask_of(self, combination_index: u64) -> u64 {
        match self {
            NumberSystem::Empty => 0,
            NumberSystem::Single { .. } => 1 << combination_index,
            NumberSystem::Pair { n } => Self::general_mask(n, 2, combination_index),
            NumberSystem::General { n, k } => Self::general_mask(n, k, combination_index),
        }
    }

    fn general_mask(n: u64, k: u64, combination_index: u64) -> u64 {
        let mut index = combination_index;
        let mut max_item = n;
        let mut mask = 0;
        for i in (1..=k).rev() {
            let item = find_combination_number(max_item, i, index);
            max_item = item;
            index -= binomial(item, i);
            mask |= 1 << item;
        }
        mask
    }
}

const CENTRAL_ORDER: [u8; 64] = [
    63, 62, 61, 60, 59, 58, 57, 56, //
    36, 35, 34, 33, 32, 31, 30, 55, //
    37, 16, 15, 14, 13, 12, 29, 54, //
    38, 17, 4, 3, 2, 11, 28, 53, //
    39, 18, 5, 0, 1, 10, 27, 52, //
    40, 19, 6, 7, 8, 9, 26, 51, //
    41, 20, 21, 22, 23, 24, 25, 50, //
    42, 43, 44, 45, 46, 47, 48, 49,
];

const WHITE_PAWN_ORDER: [u8; 64] = [
    48, 49, 50, 51, 52, 53, 54, 55, //
    5, 11, 17, 23, 29, 35, 41, 47, //
    4, 10, 16, 22, 28, 34, 40, 46, //
    3, 9, 15, 21, 27, 33, 39, 45, //
    2, 8, 14, 20, 26, 32, 38, 44, //
    1, 7, 13, 19, 25, 31, 37, 43, //
    0, 6, 12, 18, 24, 30, 36, 42, //
    56, 57, 58, 59, 60, 61, 62, 63,
];

const BLACK_PAWN_ORDER: [u8; 64] = [
    56, 57, 58, 59, 60, 61, 62, 63, //
    0, 6, 12, 18, 24, 30, 36, 42, //
    1, 7, 13, 19, 25, 31, 37, 43, //
    2, 8, 14, 20, 26, 32, 38, 44, //
    3, 9, 15, 21, 27, 33, 39, 45, //
    4, 10, 16, 22, 28, 34, 40, 46, //
    5, 11, 17, 23, 29, 35, 41, 47, //
    48, 49, 50, 51, 52, 53, 54, 55,
];

const BISHOP_ORDER: [u8; 64] = [
    63, 31, 62, 30, 61, 29, 60, 28, //
    18, 49, 17, 48, 16, 47, 15, 59, //
    50, 8, 39, 7, 38, 6, 46, 27, //
    19, 40, 2, 33, 1, 37, 14, 58, //
    51, 9, 34, 0, 32, 5, 45, 26, //
    20, 41, 3, 35, 4, 36, 13, 57, //
    52, 10, 42, 11, 43, 12, 44, 25, //
    21, 53, 22, 54, 23, 55, 24, 56,
];

fn invert_order(order: &[u8; 64]) -> [Square; 64] {
    let mut sequence = [Square::A1; 64];
    for sq in Square::ALL {
        sequence[usize::from(order[usize::from(sq)])] = sq;
    }
    sequence
}

/// Squares in enumeration order per sequence kind. Central squares first
/// for most pieces, advanced ranks first for pawns, color-alternating for
/// bishops so that bishop square colors form contiguous index ranges.
static SEQUENCES: Lazy<[[Square; 64]; 4]> = Lazy::new(|| {
    [
        invert_order(&CENTRAL_ORDER),
        invert_order(&WHITE_PAWN_ORDER),
        invert_order(&BLACK_PAWN_ORDER),
        invert_order(&BISHOP_ORDER),
    ]
});

fn sequence_for(piece: Piece) -> &'static [Square; 64] {
    let index = match piece.role {
        Role::Pawn => piece.color.fold_wb(1, 2),
        Role::Bishop => 3,
        _ => 0,
    };
    &SEQUENCES[index]
}

/// Key of a memoized square combination.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CombinationKey {
    pub piece: Piece,
    pub count: u8,
    pub allowed: Bitboard,
}

/// Immutable placement model for one group of identical pieces over an
/// allowed square set.
#[derive(Debug)]
pub struct SquareCombination {
    key: CombinationKey,
    system: NumberSystem,
    forward: [i8; 64],
    backward: ArrayVec<Square, 64>,
}

impl SquareCombination {
    fn new(key: CombinationKey) -> SquareCombination {
        let system = NumberSystem::new(key.allowed.count() as u64, u64::from(key.count));
        let mut forward = [-1i8; 64];
        let mut backward = ArrayVec::new();
        for sq in sequence_for(key.piece) {
            if key.allowed.contains(*sq) {
                forward[usize::from(*sq)] = backward.len() as i8;
                backward.push(*sq);
            }
        }
        SquareCombination {
            key,
            system,
            forward,
            backward,
        }
    }

    /// Shared instance from the process-wide registry.
    pub fn shared(key: CombinationKey) -> Arc<SquareCombination> {
        static REGISTRY: Lazy<Mutex<FxHashMap<CombinationKey, Arc<SquareCombination>>>> =
            Lazy::new(|| Mutex::new(FxHashMap::default()));
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            registry
                .entry(key.clone())
                .or_insert_with(|| Arc::new(SquareCombination::new(key))),
        )
    }

    pub fn key(&self) -> &CombinationKey {
        &self.key
    }

    pub fn piece(&self) -> Piece {
        self.key.piece
    }

    pub fn count(&self) -> u64 {
        self.system.count()
    }

    /// Combination index of the pieces after applying the symmetry, or
    /// `None` if some piece stands outside the allowed squares.
    pub fn index(&self, pieces: Bitboard, symmetry: Symmetry) -> Option<u64> {
        let mut items: ArrayVec<u8, MAX_GROUP> = ArrayVec::new();
        for sq in pieces {
            let transformed = symmetry.transform_square(sq);
            let item = self.forward[usize::from(transformed)];
            if item < 0 || items.try_push(item as u8).is_err() {
                return None;
            }
        }
        if items.len() != self.system.k() {
            return None;
        }
        Some(self.system.index_of(&items))
    }

    /// Puts the pieces of the given combination onto the board.
    pub fn place(&self, board: &mut Board, combination_index: u64) {
        let mut mask = self.system.mask_of(combination_index);
        while mask != 0 {
            let item = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            board.set_piece_at(self.backward[item], self.key.piece);
        }
    }
}

#[cfg(test)]
mod tests {
    use shakmaty::Color;

    use super::*;

    #[test]
    fn test_binomial() {
        assert_eq!(binomial(0, 0), 1);
        assert_eq!(binomial(5, 2), 10);
        assert_eq!(binomial(64, 2), 2016);
        assert_eq!(binomial(62, 3), 37820);
        assert_eq!(binomial(3, 5), 0);
    }

    #[test]
    fn test_number_system_round_trip() {
        for (n, k) in [(10u64, 0u64), (10, 1), (10, 2), (10, 3), (62, 2)] {
            let system = NumberSystem::new(n, k);
            assert_eq!(system.count(), binomial(n, k).max(1));
            for index in 0..system.count() {
                let mask = system.mask_of(index);
                assert_eq!(mask.count_ones() as u64, k);
                let items: ArrayVec<u8, MAX_GROUP> =
                    (0..64).filter(|i| mask & (1 << i) != 0).collect();
                assert_eq!(system.index_of(&items), index);
            }
        }
    }

    #[test]
    fn test_sequences_are_permutations() {
        for sequence in SEQUENCES.iter() {
            let mut seen = Bitboard::EMPTY;
            for sq in sequence {
                seen.add(*sq);
            }
            assert_eq!(seen, Bitboard::FULL);
        }
    }

    #[test]
    fn test_combination_round_trip() {
        let key = CombinationKey {
            piece: Color::White.rook(),
            count: 2,
            allowed: Bitboard::FULL
                .without(Bitboard::from(Square::E1))
                .without(Bitboard::from(Square::E8)),
        };
        let combination = SquareCombination::shared(key);
        assert_eq!(combination.count(), binomial(62, 2));
        for index in 0..combination.count() {
            let mut board = Board::empty();
            combination.place(&mut board, index);
            let rooks = board.by_piece(Color::White.rook());
            assert_eq!(rooks.count(), 2);
            assert_eq!(combination.index(rooks, Symmetry::IDENTITY), Some(index));
        }
    }

    #[test]
    fn test_disallowed_square() {
        let key = CombinationKey {
            piece: Color::Black.knight(),
            count: 1,
            allowed: Bitboard::FULL.without(Bitboard::from(Square::A1)),
        };
        let combination = SquareCombination::shared(key);
        assert_eq!(
            combination.index(Bitboard::from(Square::A1), Symmetry::IDENTITY),
            None
        );
    }
}
