//! A collection of tables, indexed by material signature.
//!
//! Tables are registered by path and opened lazily on first probe. Only
//! one orientation of each material needs to be present, probes for the
//! color swapped signature are answered through the mirrored table.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use shakmaty::{Board, Chess, EnPassantMode, File, Piece, Position};
use tracing::warn;

use crate::{
    cache::BlockCache,
    errors::{ProbeResultExt, TbsError, TbsResult},
    material::Material,
    reader::FileTable,
    types::Value,
};

/// Maximum number of pieces on the board for probing.
pub const MAX_PIECES: usize = 9;

/// Default cache capacity in decoded blocks.
const DEFAULT_CACHE_BLOCKS: usize = 256;

/// A collection of tables.
pub struct Tablebase {
    tables: FxHashMap<Material, (PathBuf, OnceCell<FileTable>)>,
    cache: BlockCache,
}

impl Default for Tablebase {
    fn default() -> Tablebase {
        Tablebase::new()
    }
}

impl Tablebase {
    pub fn new() -> Tablebase {
        Tablebase::with_cache_blocks(DEFAULT_CACHE_BLOCKS)
    }

    /// Creates an empty collection with a block cache of the given
    /// capacity.
    pub fn with_cache_blocks(blocks: usize) -> Tablebase {
        Tablebase {
            tables: FxHashMap::default(),
            cache: BlockCache::new(blocks),
        }
    }

    /// Scans a directory for table files. Nothing is opened yet, files
    /// are opened lazily on first probe. Returns the number of
    /// registered files.
    pub fn add_directory<P: AsRef<Path>>(&mut self, path: P) -> io::Result<usize> {
        let mut added = 0;
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            match self.add_file(&entry.path()) {
                Ok(()) => added += 1,
                Err(_) => {
                    if entry.path().extension().is_some_and(|ext| ext == "tbs") {
                        warn!(path = %entry.path().display(), "skipping unrecognized table file");
                    }
                }
            }
        }
        Ok(added)
    }

    /// Registers a single table file. The material is determined from
    /// the file name.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        let material = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(Material::from_file_name)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "invalid table file name")
            })?;
        self.tables
            .insert(material, (path.to_path_buf(), OnceCell::new()));
        Ok(())
    }

    /// Looks up the value of a position.
    ///
    /// Values are from the point of view of the side to move. Positions
    /// with castling rights cannot be probed.
    pub fn probe(&self, pos: &Chess) -> TbsResult<Value> {
        if pos.castles().any() {
            return Err(TbsError::Castling);
        }
        let material = Material::from_position(pos);
        if material.count() > MAX_PIECES {
            return Err(TbsError::TooManyPieces);
        }
        if material.count() == 2 {
            return Ok(Value::DRAW);
        }

        let ep_file = pos.ep_square(EnPassantMode::PseudoLegal).map(|sq| sq.file());
        if self.tables.contains_key(&material) {
            return self.probe_table(&material, pos.board(), ep_file);
        }

        let mirrored = material.flipped();
        if self.tables.contains_key(&mirrored) {
            let board = mirror_board(pos.board());
            return self.probe_table(&mirrored, &board, ep_file);
        }

        Err(TbsError::MissingTable { material })
    }

    fn probe_table(
        &self,
        material: &Material,
        board: &Board,
        ep_file: Option<File>,
    ) -> TbsResult<Value> {
        let (path, cell) = &self.tables[material];
        let table = cell
            .get_or_try_init(|| FileTable::open(path, material))
            .ctx(material)?;

        let index = match table.definition().board_index(board, ep_file) {
            Some(index) => index,
            None => unreachable!("legal position has no table index"),
        };
        let block_index = table.block_index(index);
        let block = match self.cache.get(material, block_index) {
            Some(block) => block,
            None => {
                let block = Arc::new(table.read_block(block_index).ctx(material)?);
                self.cache.insert(material, block_index, Arc::clone(&block));
                block
            }
        };

        let value = block.value_at(index);
        if !value.is_legal() {
            return Err(corrupted(material));
        }
        Ok(value)
    }
}

fn corrupted(material: &Material) -> TbsError {
    TbsError::ProbeFailed {
        material: material.clone(),
        error: Box::new(crate::errors::ProbeError::CorruptedTable {
            backtrace: std::backtrace::Backtrace::capture(),
        }),
    }
}

/// Swaps colors and reflects the board along the horizontal axis.
pub(crate) fn mirror_board(board: &Board) -> Board {
    let mut mirrored = Board::empty();
    for (square, piece) in board.clone() {
        mirrored.set_piece_at(
            square.flip_vertical(),
            Piece {
                color: !piece.color,
                role: piece.role,
            },
        );
    }
    mirrored
}

#[cfg(test)]
mod tests {
    use shakmaty::{fen::Fen, CastlingMode, Color, Role, Square};

    use super::*;

    fn position(fen: &str) -> Chess {
        fen.parse::<Fen>()
            .unwrap()
            .into_position(CastlingMode::Standard)
            .unwrap()
    }

    #[test]
    fn test_bare_kings_draw() {
        let tables = Tablebase::new();
        let pos = position("8/8/4k3/8/8/4K3/8/8 w - - 0 1");
        assert_eq!(tables.probe(&pos).unwrap(), Value::DRAW);
    }

    #[test]
    fn test_missing_table() {
        let tables = Tablebase::new();
        let pos = position("8/8/4k3/8/8/4K3/4R3/8 w - - 0 1");
        assert!(matches!(
            tables.probe(&pos),
            Err(TbsError::MissingTable { .. })
        ));
    }

    #[test]
    fn test_castling_rejected() {
        let tables = Tablebase::new();
        let pos = position("4k3/8/8/8/8/8/8/4K2R w K - 0 1");
        assert!(matches!(tables.probe(&pos), Err(TbsError::Castling)));
    }

    #[test]
    fn test_mirror_board() {
        let pos = position("8/8/4k3/8/8/4K3/4R3/8 w - - 0 1");
        let mirrored = mirror_board(pos.board());
        assert_eq!(
            mirrored.piece_at(Square::E7),
            Some(Piece {
                color: Color::Black,
                role: Role::Rook,
            })
        );
        assert_eq!(mirrored.king_of(Color::Black), Some(Square::E6));
        assert_eq!(mirrored.king_of(Color::White), Some(Square::E3));
    }
}
