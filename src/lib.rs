//! Generate and probe endgame tables in the `.tbs` format.
//!
//! Tables hold the exact game theoretic value of every legal position of
//! a fixed material signature, one file per signature and side to move.
//! Values are distance to mate from the point of view of the side to
//! move.
//!
//! # Examples
//!
//! Probe a set of tables:
//!
//! ```no_run
//! use shakmaty::{CastlingMode, Chess, fen::Fen};
//! use shakmaty_tbs::Tablebase;
//!
//! let mut tables = Tablebase::new();
//! tables.add_directory("tables")?;
//!
//! let pos: Chess = "8/8/8/8/8/4k3/4r3/4K3 b - - 0 1"
//!     .parse::<Fen>()?
//!     .into_position(CastlingMode::Standard)?;
//!
//! let value = tables.probe(&pos)?;
//! assert!(value.is_win());
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
//!
//! Generate the tables for a material signature:
//!
//! ```no_run
//! use shakmaty::{ByColor, Color};
//! use shakmaty_tbs::{Generator, Storage, Tablebase, write_table};
//!
//! let tables = Tablebase::new();
//! let material = "KQvK".parse()?;
//! let mut generator = Generator::new(&material, &tables, ByColor::new_with(|_| Storage::Memory));
//! generator.run()?;
//!
//! for color in Color::ALL {
//!     let name = generator.definition(color).material().file_name();
//!     let mut file = std::fs::File::create(name)?;
//!     write_table(generator.definition(color), generator.table(color), &mut file)?;
//! }
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

#![doc(html_root_url = "https://docs.rs/shakmaty-tbs/0.1.0")]
#![forbid(unsafe_code)]
#![warn(missing_debug_implementations)]

#[macro_use]
mod errors;

mod cache;
mod chunk;
mod combination;
mod cursor;
mod definition;
mod material;
mod model;
mod pagefile;
mod range;
mod reader;
mod solver;
mod staged;
mod symmetry;
mod tablebase;
mod types;
mod unmoves;
mod writer;

pub use crate::{
    chunk::{Chunk, Slot},
    combination::{CombinationKey, SquareCombination},
    cursor::Cursor,
    definition::{CombinationDefinition, TableDefinition},
    errors::{GenError, GenResult, ProbeError, ProbeResult, TbsError, TbsResult},
    material::{Material, MaterialSide, ParseMaterialError},
    reader::{Block, FileTable},
    solver::Generator,
    staged::{StagedTable, Storage},
    symmetry::{Symmetry, SymmetryTable},
    tablebase::{Tablebase, MAX_PIECES},
    types::Value,
    writer::{write_table, BLOCK_LEN, BLOCK_SHIFT},
};
