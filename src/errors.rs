use std::{backtrace::Backtrace, error::Error, fmt, io};

use crate::material::Material;

pub type TbsResult<T> = Result<T, TbsError>;

pub type ProbeResult<T> = Result<T, ProbeError>;

pub type GenResult<T> = Result<T, GenError>;

/// Error when querying a set of tables.
#[derive(Debug)]
pub enum TbsError {
    /// Position has castling rights, but tables never contain positions
    /// with castling rights.
    Castling,
    /// Position has more pieces than any table can hold.
    TooManyPieces,
    /// No table known for this material, in either orientation.
    MissingTable {
        #[allow(missing_docs)]
        material: Material,
    },
    /// Probe failed.
    ProbeFailed {
        #[allow(missing_docs)]
        material: Material,
        #[allow(missing_docs)]
        error: Box<ProbeError>,
    },
}

impl fmt::Display for TbsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TbsError::Castling => {
                write!(f, "tables do not contain positions with castling rights")
            }
            TbsError::TooManyPieces => write!(f, "too many pieces"),
            TbsError::MissingTable { material } => {
                write!(f, "required table not found: {material}")
            }
            TbsError::ProbeFailed { material, error } => {
                write!(f, "failed to probe table {material}: {error}")
            }
        }
    }
}

impl Error for TbsError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TbsError::ProbeFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Error when reading a table file.
#[derive(Debug)]
pub enum ProbeError {
    /// I/O error.
    Read {
        #[allow(missing_docs)]
        error: io::Error,
    },
    /// Table file has unexpected magic header bytes.
    Magic {
        #[allow(missing_docs)]
        magic: [u8; 4],
    },
    /// Table file has an unsupported format version.
    Version {
        #[allow(missing_docs)]
        version: u8,
    },
    /// Table file has flags set that this version does not know about.
    Flags {
        #[allow(missing_docs)]
        flags: u8,
    },
    /// Table file does not describe the expected material.
    Material,
    /// Corrupted table.
    CorruptedTable {
        #[allow(missing_docs)]
        backtrace: Backtrace,
    },
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Read { error } => write!(f, "i/o error reading table file: {error}"),
            ProbeError::Magic { magic } => write!(f, "invalid magic header bytes: {magic:x?}"),
            ProbeError::Version { version } => write!(f, "unsupported table version: {version}"),
            ProbeError::Flags { flags } => write!(f, "unsupported table flags: {flags:#04x}"),
            ProbeError::Material => write!(f, "table file does not match its material"),
            ProbeError::CorruptedTable { backtrace } => write!(f, "corrupted table: {backtrace}"),
        }
    }
}

impl Error for ProbeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProbeError::Read { error } => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for ProbeError {
    fn from(error: io::Error) -> ProbeError {
        match error.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                ProbeError::CorruptedTable {
                    backtrace: Backtrace::capture(),
                }
            }
            _ => ProbeError::Read { error },
        }
    }
}

pub trait ProbeResultExt<T> {
    fn ctx(self, material: &Material) -> TbsResult<T>;
}

impl<T> ProbeResultExt<T> for ProbeResult<T> {
    fn ctx(self, material: &Material) -> TbsResult<T> {
        self.map_err(|error| TbsError::ProbeFailed {
            material: material.clone(),
            error: Box::new(error),
        })
    }
}

/// Error while generating a table.
#[derive(Debug)]
pub enum GenError {
    /// I/O error on staged page files or the output table.
    Io {
        #[allow(missing_docs)]
        error: io::Error,
    },
    /// A capture or promotion successor could not be resolved.
    Subtable {
        #[allow(missing_docs)]
        error: TbsError,
    },
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::Io { error } => write!(f, "i/o error during generation: {error}"),
            GenError::Subtable { error } => write!(f, "sub-table lookup failed: {error}"),
        }
    }
}

impl Error for GenError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GenError::Io { error } => Some(error),
            GenError::Subtable { error } => Some(error),
        }
    }
}

impl From<io::Error> for GenError {
    fn from(error: io::Error) -> GenError {
        GenError::Io { error }
    }
}

impl From<TbsError> for GenError {
    fn from(error: TbsError) -> GenError {
        GenError::Subtable { error }
    }
}

/// Return a `CorruptedTable` error.
macro_rules! throw {
    () => {
        return Err(crate::errors::ProbeError::CorruptedTable {
            backtrace: ::std::backtrace::Backtrace::capture(),
        })
    };
}

/// Unwrap an `Option` or return a `CorruptedTable` error.
macro_rules! u {
    ($e:expr) => {
        match $e {
            Some(ok) => ok,
            None => throw!(),
        }
    };
}

/// Ensure that a condition holds. Otherwise return a `CorruptedTable` error.
macro_rules! ensure {
    ($cond:expr) => {
        if !$cond {
            throw!();
        }
    };
}
