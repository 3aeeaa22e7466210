use once_cell::sync::Lazy;
use shakmaty::{Bitboard, Square};

/// One of the eight symmetries of the board, encoded as transform bits.
///
/// Bit 0 rotates a quarter turn counter-clockwise, bit 1 mirrors files
/// (a-file onto h-file), bit 2 mirrors ranks. The rotation is applied
/// first.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Symmetry(u8);

impl Symmetry {
    pub const IDENTITY: Symmetry = Symmetry(0);
    pub const ROTATE: Symmetry = Symmetry(1);
    pub const FLIP_FILE: Symmetry = Symmetry(2);
    pub const FLIP_RANK: Symmetry = Symmetry(4);

    pub const COUNT: usize = 8;

    /// All symmetries, in canonical assignment order.
    pub const ALL: [Symmetry; 8] = [
        Symmetry(0),
        Symmetry(1),
        Symmetry(2),
        Symmetry(3),
        Symmetry(4),
        Symmetry(5),
        Symmetry(6),
        Symmetry(7),
    ];

    /// The two symmetries that preserve pawn structure.
    pub const PAWN_PRESERVING: [Symmetry; 2] = [Symmetry(0), Symmetry(2)];

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    fn rotates(self) -> bool {
        self.0 & 1 != 0
    }

    fn flips_file(self) -> bool {
        self.0 & 2 != 0
    }

    fn flips_rank(self) -> bool {
        self.0 & 4 != 0
    }

    pub fn inverse(self) -> Symmetry {
        // The quarter turn composed with both mirrors is the inverse
        // rotation; everything else is self-inverse.
        const INVERSE: [u8; 8] = [0, 7, 2, 3, 4, 5, 6, 1];
        Symmetry(INVERSE[self.index()])
    }

    pub fn transform_square(self, sq: Square) -> Square {
        let mut sq = sq;
        if self.rotates() {
            sq = sq.flip_diagonal().flip_horizontal();
        }
        if self.flips_file() {
            sq = sq.flip_horizontal();
        }
        if self.flips_rank() {
            sq = sq.flip_vertical();
        }
        sq
    }

    pub fn transform_bitboard(self, bb: Bitboard) -> Bitboard {
        let mut bb = bb;
        if self.rotates() {
            bb = bb.flip_diagonal().flip_horizontal();
        }
        if self.flips_file() {
            bb = bb.flip_horizontal();
        }
        if self.flips_rank() {
            bb = bb.flip_vertical();
        }
        bb
    }
}

/// Canonical symmetry for every pair of king squares.
///
/// The first pair of an orbit, in white king major / black king minor scan
/// order, becomes the canonical representative and is marked with the
/// identity. Every other pair stores the symmetry that maps it onto its
/// representative. The assignment order is part of the file format.
#[derive(Debug)]
pub struct SymmetryTable {
    table: [[Symmetry; 64]; 64],
}

impl SymmetryTable {
    fn new(symmetries: &[Symmetry]) -> SymmetryTable {
        let mut table = [[None::<Symmetry>; 64]; 64];
        for white_king in Square::ALL {
            for black_king in Square::ALL {
                if table[usize::from(white_king)][usize::from(black_king)].is_some() {
                    continue;
                }
                for symmetry in symmetries {
                    let wk = symmetry.transform_square(white_king);
                    let bk = symmetry.transform_square(black_king);
                    let slot = &mut table[usize::from(wk)][usize::from(bk)];
                    if slot.is_none() {
                        *slot = Some(symmetry.inverse());
                    }
                }
            }
        }
        SymmetryTable {
            table: table.map(|row| row.map(|s| s.unwrap_or(Symmetry::IDENTITY))),
        }
    }

    pub fn full() -> &'static SymmetryTable {
        static TABLE: Lazy<SymmetryTable> = Lazy::new(|| SymmetryTable::new(&Symmetry::ALL));
        &TABLE
    }

    pub fn pawn() -> &'static SymmetryTable {
        static TABLE: Lazy<SymmetryTable> =
            Lazy::new(|| SymmetryTable::new(&Symmetry::PAWN_PRESERVING));
        &TABLE
    }

    pub fn symmetry(&self, white_king: Square, black_king: Square) -> Symmetry {
        self.table[usize::from(white_king)][usize::from(black_king)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group() {
        // All eight transforms are distinct and invertible.
        for s in Symmetry::ALL {
            let squares: Vec<Square> = Square::ALL
                .into_iter()
                .map(|sq| s.transform_square(sq))
                .collect();
            let mut sorted = squares.clone();
            sorted.sort();
            assert_eq!(sorted, Square::ALL.to_vec());
            for sq in Square::ALL {
                assert_eq!(s.inverse().transform_square(s.transform_square(sq)), sq);
            }
        }
    }

    #[test]
    fn test_transforms() {
        assert_eq!(Symmetry::ROTATE.transform_square(Square::A1), Square::H1);
        assert_eq!(Symmetry::ROTATE.transform_square(Square::H1), Square::H8);
        assert_eq!(Symmetry::FLIP_FILE.transform_square(Square::A1), Square::H1);
        assert_eq!(Symmetry::FLIP_RANK.transform_square(Square::C2), Square::C7);
        assert_eq!(
            Symmetry::FLIP_FILE.transform_bitboard(Bitboard::from(Square::A4)),
            Bitboard::from(Square::H4)
        );
    }

    #[test]
    fn test_canonical_representatives() {
        // The canonical pair of each orbit carries the identity, and
        // applying the stored symmetry always lands on such a pair.
        let table = SymmetryTable::full();
        for wk in Square::ALL {
            for bk in Square::ALL {
                let s = table.symmetry(wk, bk);
                let cwk = s.transform_square(wk);
                let cbk = s.transform_square(bk);
                assert_eq!(table.symmetry(cwk, cbk), Symmetry::IDENTITY);
            }
        }
    }

    #[test]
    fn test_pawn_table_preserves_ranks() {
        let table = SymmetryTable::pawn();
        for wk in Square::ALL {
            for bk in Square::ALL {
                let s = table.symmetry(wk, bk);
                assert!(s == Symmetry::IDENTITY || s == Symmetry::FLIP_FILE);
            }
        }
    }
}
