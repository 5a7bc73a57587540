use std::error::Error;
use std::fmt;

use thiserror::Error;

/// The kind of value that overflowed its field in the alcov format.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ValueKind {
    /// Modules in a file, counted by a `u16`.
    Module,
    /// Segments of a single module, counted by a `u16`.
    Segment,
    /// A byte offset that does not fit the signed path offset field.
    PathOffset,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ValueKind::Module => write!(f, "module"),
            ValueKind::Segment => write!(f, "segment"),
            ValueKind::PathOffset => write!(f, "path offset"),
        }
    }
}

/// The kind of an [`AlcovError`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AlcovErrorKind {
    /// The buffer ends before a field or record is complete.
    #[error("unexpected end of input")]
    TruncatedInput,

    /// The first eight bytes are not the alcov magic.
    #[error("bad alcov magic")]
    BadMagic,

    /// The file was written with an incompatible major version.
    #[error("unsupported alcov version {0}")]
    UnsupportedVersion(u64),

    /// A module declares no segments.
    #[error("module without segments")]
    EmptySegmentList,

    /// A block references a module that does not exist.
    #[error("block references unknown module")]
    UnresolvedModuleRef,

    /// A block references a segment its module does not have.
    #[error("block references unknown segment")]
    UnresolvedSegmentRef,

    /// A block id passed to the builder does not exist.
    #[error("unknown block")]
    UnresolvedBlockRef,

    /// An edge points to a block that does not exist.
    #[error("edge references unknown destination block")]
    DanglingEdgeRef,

    /// The out-edge ranges of two blocks share storage.
    #[error("overlapping out-edge ranges")]
    OverlappingEdgeRange,

    /// The header edge count does not match the edges declared by the blocks.
    #[error("header declares {expected} edges, blocks declare {found}")]
    EdgeCountMismatch {
        /// Number of edges declared in the header.
        expected: u64,
        /// Sum of the per-block edge counts.
        found: u64,
    },

    /// A path or chunk offset points outside of its bounds.
    #[error("invalid offset")]
    InvalidOffset,

    /// A path is not valid UTF-8 or contains a NUL byte.
    #[error("invalid path string")]
    InvalidPath,

    /// Two graphs with different topology were merged.
    #[error("coverage graphs are structurally different")]
    StructuralMismatch,

    /// The compressor failed to compress or decompress a chunk.
    #[error("compression failure")]
    CompressionFailure,

    /// A count exceeds the width of its field.
    #[error("too many {0}s for alcov")]
    TooManyValues(ValueKind),

    /// Writing the serialized data failed.
    #[error("failed to write alcov file")]
    WriteFailed,
}

/// An error returned when reading, writing or merging alcov coverage data.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct AlcovError {
    kind: AlcovErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl AlcovError {
    /// Creates a new alcov error from a known kind of error as well as an
    /// arbitrary error payload.
    pub fn new<E>(kind: AlcovErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`AlcovErrorKind`] for this error.
    pub fn kind(&self) -> AlcovErrorKind {
        self.kind
    }
}

impl From<AlcovErrorKind> for AlcovError {
    fn from(kind: AlcovErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<scroll::Error> for AlcovError {
    fn from(source: scroll::Error) -> Self {
        Self::new(AlcovErrorKind::TruncatedInput, source)
    }
}

impl From<std::io::Error> for AlcovError {
    fn from(source: std::io::Error) -> Self {
        Self::new(AlcovErrorKind::WriteFailed, source)
    }
}
