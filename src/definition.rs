use arrayvec::ArrayVec;
use rustc_hash::FxHashMap;
use shakmaty::{
    Bitboard, Board, ByColor, CastlingMode, Chess, Color, EnPassantMode, File, FromSetup, Piece,
    Position, Role, Setup, Square,
};

use crate::{
    chunk::{empty_ep_mask, ep_pawn_square, next_ep_file_mask, prev_ep_file_mask, Chunk},
    material::Material,
    symmetry::{Symmetry, SymmetryTable},
};

/// Piece type order of combination definitions in the file format.
const DEFINITION_ROLES: [Role; 5] = [
    Role::Pawn,
    Role::Bishop,
    Role::Knight,
    Role::Rook,
    Role::Queen,
];

/// One group of identical pieces of a table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CombinationDefinition {
    pub piece: Piece,
    pub count: u8,
}

impl CombinationDefinition {
    /// Packed header byte: color in bit 0, role in bits 1-3, count in
    /// bits 4-7.
    pub fn to_byte(self) -> u8 {
        u8::from(self.piece.color.is_black())
            | (self.piece.role as u8) << 1
            | self.count << 4
    }

    pub fn from_byte(data: u8) -> Option<CombinationDefinition> {
        let color = Color::from_white(data & 1 == 0);
        let role = match (data >> 1) & 0x7 {
            1 => Role::Pawn,
            2 => Role::Knight,
            3 => Role::Bishop,
            4 => Role::Rook,
            5 => Role::Queen,
            _ => return None,
        };
        Some(CombinationDefinition {
            piece: role.of(color),
            count: data >> 4,
        })
    }
}

/// Immutable mapping between positions of one material and table indices.
///
/// The table splits into chunks of positions sharing king squares and the
/// en passant state. Normal chunks come first, white king from a1 to h8 by
/// ranks, black king inner in the same order, one chunk per king pair that
/// is non-adjacent and canonical under the symmetry table. EP chunks
/// follow in the same king scan, each pair spanning EP files a to h with
/// the prev-file-pawn flag inner. This order is a format contract.
#[derive(Debug)]
pub struct TableDefinition {
    material: Material,
    definitions: Vec<CombinationDefinition>,
    chunks: Vec<Chunk>,
    normal_lookup: Box<[[Option<u32>; 64]; 64]>,
    ep_lookup: FxHashMap<(Square, Square, File, bool), u32>,
    index_count: u64,
    piece_count: usize,
    has_pawns: bool,
    ep_possible: bool,
    symmetries: &'static SymmetryTable,
}

impl TableDefinition {
    pub fn new(material: &Material) -> TableDefinition {
        let turn = material.turn;
        let mut definitions = Vec::new();
        for role in DEFINITION_ROLES {
            for color in [!turn, turn] {
                let count = material.side(color).by_role(role);
                if count > 0 {
                    definitions.push(CombinationDefinition {
                        piece: role.of(color),
                        count,
                    });
                }
            }
        }

        let has_pawns = material.has_pawns();
        let ep_possible = material.ep_possible();
        let symmetries = if has_pawns {
            SymmetryTable::pawn()
        } else {
            SymmetryTable::full()
        };

        let mut def = TableDefinition {
            material: material.clone(),
            piece_count: material.count(),
            definitions,
            chunks: Vec::new(),
            normal_lookup: Box::new([[None; 64]; 64]),
            ep_lookup: FxHashMap::default(),
            index_count: 0,
            has_pawns,
            ep_possible,
            symmetries,
        };
        def.fill_chunks();
        def
    }

    fn should_generate_chunk(&self, white_king: Square, black_king: Square) -> bool {
        white_king.distance(black_king) > 1
            && self.symmetries.symmetry(white_king, black_king) == Symmetry::IDENTITY
    }

    fn fill_chunks(&mut self) {
        let turn = self.material.turn;
        let mut next_index = 0;

        for white_king in Square::ALL {
            for black_king in Square::ALL {
                if !self.should_generate_chunk(white_king, black_king) {
                    continue;
                }
                let chunk = Chunk::new(
                    turn,
                    ByColor {
                        white: white_king,
                        black: black_king,
                    },
                    None,
                    &self.definitions,
                    next_index,
                );
                next_index = chunk.end_index();
                self.normal_lookup[usize::from(white_king)][usize::from(black_king)] =
                    Some(self.chunks.len() as u32);
                self.chunks.push(chunk);
            }
        }

        if self.ep_possible {
            let not_on_turn = !turn;
            for white_king in Square::ALL {
                for black_king in Square::ALL {
                    if !self.should_generate_chunk(white_king, black_king) {
                        continue;
                    }
                    let kings = Bitboard::from(white_king) | Bitboard::from(black_king);
                    for ep_file in File::ALL {
                        for has_prev in [false, true] {
                            let file_ok = if has_prev {
                                ep_file > File::A
                            } else {
                                ep_file < File::H
                            };
                            if !file_ok {
                                continue;
                            }
                            let free = empty_ep_mask(not_on_turn, ep_file)
                                | Bitboard::from(ep_pawn_square(not_on_turn, ep_file));
                            if !(free & kings).is_empty() {
                                continue;
                            }
                            let chunk = Chunk::new(
                                turn,
                                ByColor {
                                    white: white_king,
                                    black: black_king,
                                },
                                Some((ep_file, has_prev)),
                                &self.definitions,
                                next_index,
                            );
                            next_index = chunk.end_index();
                            self.ep_lookup.insert(
                                (white_king, black_king, ep_file, has_prev),
                                self.chunks.len() as u32,
                            );
                            self.chunks.push(chunk);
                        }
                    }
                }
            }
        }

        self.index_count = next_index;
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn turn(&self) -> Color {
        self.material.turn
    }

    pub fn definitions(&self) -> &[CombinationDefinition] {
        &self.definitions
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn index_count(&self) -> u64 {
        self.index_count
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn has_pawns(&self) -> bool {
        self.has_pawns
    }

    pub fn ep_possible(&self) -> bool {
        self.ep_possible
    }

    /// Chunk containing the given table index.
    pub fn chunk_at(&self, index: u64) -> &Chunk {
        assert!(index < self.index_count, "table index out of range");
        let chunk_index = self
            .chunks
            .partition_point(|chunk| chunk.end_index() <= index);
        &self.chunks[chunk_index]
    }

    /// Canonical table index of a position, or `None` if the position is
    /// not representable in this table.
    pub fn table_index(&self, pos: &Chess) -> Option<u64> {
        assert_eq!(pos.turn(), self.material.turn);
        self.board_index(
            pos.board(),
            pos.ep_square(EnPassantMode::PseudoLegal).map(|sq| sq.file()),
        )
    }

    pub fn board_index(&self, board: &Board, ep_file: Option<File>) -> Option<u64> {
        let white_king = board.king_of(Color::White)?;
        let black_king = board.king_of(Color::Black)?;
        let symmetry = self.symmetries.symmetry(white_king, black_king);
        self.index_for_symmetry(board, ep_file, symmetry)
    }

    fn index_for_symmetry(
        &self,
        board: &Board,
        ep_file: Option<File>,
        symmetry: Symmetry,
    ) -> Option<u64> {
        let white_king = symmetry.transform_square(board.king_of(Color::White)?);
        let black_king = symmetry.transform_square(board.king_of(Color::Black)?);

        let chunk_index = match ep_file {
            None => self.normal_lookup[usize::from(white_king)][usize::from(black_king)]?,
            Some(ep_file) => {
                if !self.ep_possible {
                    return None;
                }
                let turn = self.material.turn;
                let not_on_turn = !turn;
                // Mirroring swaps which neighbour file is "previous".
                let (transformed_file, prev_mask) = if symmetry == Symmetry::IDENTITY {
                    (ep_file, prev_ep_file_mask(not_on_turn, ep_file))
                } else {
                    (
                        File::new(7 - u32::from(ep_file)),
                        next_ep_file_mask(not_on_turn, ep_file),
                    )
                };
                let has_prev = !(board.by_piece(turn.pawn()) & prev_mask).is_empty();
                *self
                    .ep_lookup
                    .get(&(white_king, black_king, transformed_file, has_prev))?
            }
        };

        self.chunks[chunk_index as usize].table_index(board, symmetry)
    }

    /// All table indices that may represent the position. A handful of
    /// pawnless positions appear under several symmetries.
    pub fn index_group(&self, board: &Board, ep_file: Option<File>) -> ArrayVec<u64, 8> {
        let mut group = ArrayVec::new();
        if self.has_pawns {
            if let Some(index) = self.board_index(board, ep_file) {
                group.push(index);
            }
        } else {
            for symmetry in Symmetry::ALL {
                if let Some(index) = self.index_for_symmetry(board, ep_file, symmetry) {
                    if !group.contains(&index) {
                        group.push(index);
                    }
                }
            }
        }
        group
    }

    /// Validity test of a decoded setup: exact piece count and chess
    /// legality, ignoring checks that could not have arisen in play.
    pub fn checked_position(&self, setup: Setup) -> Option<Chess> {
        if setup.board.occupied().count() != self.piece_count {
            return None;
        }
        match Chess::from_setup(setup, CastlingMode::Standard) {
            Ok(pos) => Some(pos),
            Err(error) => error.ignore_impossible_check().ok(),
        }
    }
}
