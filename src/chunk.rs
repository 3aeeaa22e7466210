use std::sync::Arc;

use shakmaty::{attacks, Bitboard, Board, ByColor, Color, File, Rank, Role, Square};

use crate::{
    combination::{CombinationKey, SquareCombination},
    definition::CombinationDefinition,
    symmetry::Symmetry,
};

/// Rank on which a double-moved pawn of the given color stands.
pub(crate) fn ep_pawn_rank(color: Color) -> Rank {
    color.fold_wb(Rank::Fourth, Rank::Fifth)
}

/// Square of the double-moved pawn of the given color on the given file.
pub(crate) fn ep_pawn_square(color: Color, file: File) -> Square {
    Square::from_coords(file, ep_pawn_rank(color))
}

/// Square passed over by the double move, i.e. the en passant target.
pub(crate) fn ep_target_square(color: Color, file: File) -> Square {
    Square::from_coords(file, color.fold_wb(Rank::Third, Rank::Sixth))
}

/// Squares that the double move left empty: the origin square and the
/// passed square.
pub(crate) fn empty_ep_mask(color: Color, file: File) -> Bitboard {
    Bitboard::from(Square::from_coords(
        file,
        color.fold_wb(Rank::Second, Rank::Seventh),
    )) | Bitboard::from(ep_target_square(color, file))
}

/// Square left of the EP pawn, from which it could be captured.
pub(crate) fn prev_ep_file_mask(color: Color, file: File) -> Bitboard {
    match file.offset(-1) {
        Some(prev) => Bitboard::from(ep_pawn_square(color, prev)),
        None => Bitboard::EMPTY,
    }
}

/// Square right of the EP pawn.
pub(crate) fn next_ep_file_mask(color: Color, file: File) -> Bitboard {
    match file.offset(1) {
        Some(next) => Bitboard::from(ep_pawn_square(color, next)),
        None => Bitboard::EMPTY,
    }
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub combination: Arc<SquareCombination>,
    pub multiplier: u64,
}

/// Immutable mapping between positions and a table index range.
///
/// All positions of a chunk share the side to move, both king squares and
/// the en passant state. The mapping is computed on the fly and never
/// stored, so it must stay stable once tables exist.
#[derive(Debug, Clone)]
pub struct Chunk {
    turn: Color,
    kings: ByColor<Square>,
    ep_file: Option<File>,
    has_prev_ep_file_pawn: bool,
    slots: Vec<Slot>,
    first_index: u64,
    end_index: u64,
    fixed_pawns: [ByColor<Bitboard>; Symmetry::COUNT],
}

impl Chunk {
    pub fn new(
        turn: Color,
        kings: ByColor<Square>,
        ep: Option<(File, bool)>,
        definitions: &[CombinationDefinition],
        first_index: u64,
    ) -> Chunk {
        let (ep_file, has_prev_ep_file_pawn) = match ep {
            Some((file, has_prev)) => (Some(file), has_prev),
            None => (None, false),
        };

        let mut chunk = Chunk {
            turn,
            kings,
            ep_file,
            has_prev_ep_file_pawn,
            slots: Vec::with_capacity(definitions.len()),
            first_index,
            end_index: first_index,
            fixed_pawns: [ByColor::new_with(|_| Bitboard::EMPTY); Symmetry::COUNT],
        };
        chunk.fill_fixed_pawns();

        // The last combination varies fastest.
        let mut multiplier = 1;
        let mut slots = Vec::with_capacity(definitions.len());
        for definition in definitions.iter().rev() {
            let count = if definition.piece.role == Role::Pawn
                && chunk.ep_file.is_some()
                && definition.count >= 1
            {
                definition.count - 1
            } else {
                definition.count
            };
            let combination = SquareCombination::shared(CombinationKey {
                piece: definition.piece,
                count,
                allowed: chunk.allowed_squares(definition),
            });
            let combination_count = combination.count();
            slots.push(Slot {
                combination,
                multiplier,
            });
            multiplier *= combination_count;
        }
        slots.reverse();
        chunk.slots = slots;
        chunk.end_index = first_index + multiplier;
        chunk
    }

    /// Pawns shared by every position of an EP chunk: the double-moved
    /// pawn, and the capturing pawn on the previous or next file.
    fn fill_fixed_pawns(&mut self) {
        let Some(ep_file) = self.ep_file else {
            return;
        };
        let not_on_turn = !self.turn;
        for symmetry in Symmetry::ALL {
            let ep_pawn = Bitboard::from(ep_pawn_square(not_on_turn, ep_file));
            let capturing = if self.has_prev_ep_file_pawn {
                prev_ep_file_mask(not_on_turn, ep_file)
            } else {
                next_ep_file_mask(not_on_turn, ep_file)
            };
            let fixed = &mut self.fixed_pawns[symmetry.index()];
            *fixed.get_mut(not_on_turn) = symmetry.transform_bitboard(ep_pawn);
            *fixed.get_mut(self.turn) = symmetry.transform_bitboard(capturing);
        }
    }

    /// Squares over which the pieces of the definition are combined.
    ///
    /// Pawns stay off the first and eighth rank. Nothing may stand on a
    /// king square, a fixed pawn square, or the squares the EP double move
    /// passed through. Side-to-move pieces stay off squares giving an
    /// unblockable check.
    fn allowed_squares(&self, definition: &CombinationDefinition) -> Bitboard {
        let piece = definition.piece;
        let not_on_turn = !self.turn;

        let mut mask = if piece.role == Role::Pawn {
            !Bitboard::BACKRANKS
        } else {
            Bitboard::FULL
        };

        if let Some(ep_file) = self.ep_file {
            mask &= !empty_ep_mask(not_on_turn, ep_file);
            if piece.role == Role::Pawn && piece.color == self.turn {
                mask &= !prev_ep_file_mask(not_on_turn, ep_file);
            }
        }

        mask &= !Bitboard::from(self.kings.white);
        mask &= !Bitboard::from(self.kings.black);
        mask &= !self.near_check_squares(piece);

        let fixed = &self.fixed_pawns[Symmetry::IDENTITY.index()];
        mask & !(fixed.white | fixed.black)
    }

    /// Squares where the piece gives a check that no other piece could
    /// block. Only side-to-move pieces are pruned this way.
    fn near_check_squares(&self, piece: shakmaty::Piece) -> Bitboard {
        if piece.color != self.turn {
            return Bitboard::EMPTY;
        }
        let king = *self.kings.get(!self.turn);
        match piece.role {
            Role::Pawn => attacks::pawn_attacks(!self.turn, king),
            Role::Knight => attacks::knight_attacks(king),
            role => {
                let moves = match role {
                    Role::Bishop => attacks::bishop_attacks(king, Bitboard::EMPTY),
                    Role::Rook => attacks::rook_attacks(king, Bitboard::EMPTY),
                    _ => attacks::queen_attacks(king, Bitboard::EMPTY),
                };
                let mut near = Bitboard::EMPTY;
                for sq in moves {
                    if attacks::between(sq, king).is_empty() {
                        near.add(sq);
                    }
                }
                near
            }
        }
    }

    pub fn first_index(&self) -> u64 {
        self.first_index
    }

    pub fn end_index(&self) -> u64 {
        self.end_index
    }

    pub fn len(&self) -> u64 {
        self.end_index - self.first_index
    }

    pub fn is_empty(&self) -> bool {
        self.end_index == self.first_index
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn kings(&self) -> ByColor<Square> {
        self.kings
    }

    pub fn ep_file(&self) -> Option<File> {
        self.ep_file
    }

    pub fn has_prev_ep_file_pawn(&self) -> bool {
        self.has_prev_ep_file_pawn
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Table index of the position under the given symmetry, or `None` if
    /// some piece falls outside its combination.
    pub fn table_index(&self, board: &Board, symmetry: Symmetry) -> Option<u64> {
        let mut index = self.first_index;
        for slot in &self.slots {
            let piece = slot.combination.piece();
            let mut pieces = board.by_piece(piece);
            if piece.role == Role::Pawn {
                pieces &= !*self.fixed_pawns[symmetry.index()].get(piece.color);
            }
            index += slot.combination.index(pieces, symmetry)? * slot.multiplier;
        }
        Some(index)
    }

    /// Kings and fixed pawns shared by all positions of the chunk.
    pub fn fill_board(&self, board: &mut Board) {
        board.set_piece_at(self.kings.white, Color::White.king());
        board.set_piece_at(self.kings.black, Color::Black.king());
        let fixed = &self.fixed_pawns[Symmetry::IDENTITY.index()];
        for color in Color::ALL {
            for sq in *fixed.get(color) {
                board.set_piece_at(sq, color.pawn());
            }
        }
    }

    /// En passant target square shared by all positions of the chunk.
    pub fn ep_square(&self) -> Option<Square> {
        self.ep_file.map(|file| ep_target_square(!self.turn, file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::CombinationDefinition;

    #[test]
    fn test_ep_masks() {
        assert_eq!(ep_pawn_square(Color::White, File::E), Square::E4);
        assert_eq!(ep_pawn_square(Color::Black, File::E), Square::E5);
        assert_eq!(ep_target_square(Color::White, File::E), Square::E3);
        assert_eq!(ep_target_square(Color::Black, File::E), Square::E6);
        assert_eq!(
            empty_ep_mask(Color::Black, File::A),
            Bitboard::from(Square::A7) | Bitboard::from(Square::A6)
        );
        assert_eq!(
            prev_ep_file_mask(Color::White, File::B),
            Bitboard::from(Square::A4)
        );
        assert_eq!(prev_ep_file_mask(Color::White, File::A), Bitboard::EMPTY);
        assert_eq!(next_ep_file_mask(Color::Black, File::H), Bitboard::EMPTY);
    }

    #[test]
    fn test_normal_chunk_round_trip() {
        let defs = vec![CombinationDefinition {
            piece: Color::White.rook(),
            count: 1,
        }];
        let chunk = Chunk::new(
            Color::Black,
            ByColor {
                white: Square::C2,
                black: Square::G7,
            },
            None,
            &defs,
            100,
        );
        assert_eq!(chunk.first_index(), 100);
        for index in chunk.first_index()..chunk.end_index() {
            let mut board = Board::empty();
            chunk.fill_board(&mut board);
            let offset = index - chunk.first_index();
            chunk.slots()[0].combination.place(&mut board, offset);
            assert_eq!(chunk.table_index(&board, Symmetry::IDENTITY), Some(index));
        }
    }

    #[test]
    fn test_near_check_pruned() {
        // A white rook next to the black king would be an unblockable
        // check with black to move pruned from the index space entirely.
        let defs = vec![CombinationDefinition {
            piece: Color::White.rook(),
            count: 1,
        }];
        let chunk = Chunk::new(
            Color::White,
            ByColor {
                white: Square::A1,
                black: Square::H8,
            },
            None,
            &defs,
            0,
        );
        let mut board = Board::empty();
        chunk.fill_board(&mut board);
        board.set_piece_at(Square::G8, Color::White.rook());
        assert_eq!(chunk.table_index(&board, Symmetry::IDENTITY), None);
    }
}
