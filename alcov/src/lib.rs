//! Reading, writing and merging of alcov coverage files.
//!
//! An alcov file records the basic blocks of a program that ran, how often each of
//! them ran and, optionally, how often each control-flow edge between them was
//! taken. Blocks are located by module, segment and offset, so coverage captured
//! with address space randomization can still be compared and merged.
//!
//! # Functionality
//!
//! * Parse alcov files with [`CoverageGraph::parse`] or, for files compressed with
//!   something other than LZMA2, [`CoverageGraph::parse_with`].
//! * Collect coverage at runtime with a [`CoverageBuilder`].
//! * Serialize graphs with [`CoverageGraph::serialize`] and
//!   [`CoverageGraph::serialize_compressed`].
//! * Sum the counters of two captures with [`CoverageGraph::merge`].
//! * Inspect the header of a file without decoding it with [`Header::parse`].
//!
//! ## Example
//! ```
//! use alcov::{CoverageBuilder, CoverageGraph, Segment};
//!
//! let mut builder = CoverageBuilder::new();
//! let module = builder
//!     .add_module(0x5555_0000, Some("/usr/bin/target"), vec![Segment::new(0, 0x2000)])
//!     .unwrap();
//! let block = builder.add_block(module, 0, 0x40, 12).unwrap();
//! builder.record_block(block).unwrap();
//!
//! let run = builder.finish().unwrap();
//! let buf = run.to_bytes().unwrap();
//!
//! let parsed = CoverageGraph::parse(&buf).unwrap();
//! let merged = parsed.merge(&run).unwrap();
//! assert_eq!(merged.blocks()[0].nb_taken, 2);
//! assert_eq!(merged.block_address(block), Some(0x5555_0040));
//! ```
//!
//! # Structure of an alcov file
//!
//! All integers are little-endian and records are packed without padding. A file
//! starts with a 76 byte [`Header`] holding the magic, the format version, the
//! record counts, the absolute start offset of every chunk and a set of
//! [`Flags`]. The chunks are:
//!
//! * Modules: one record per loaded image with its base address, the offset of
//!   its path (`-1` for none) and its segments inline.
//! * Paths: NUL-terminated UTF-8 strings. With [`Flags::INPUT_PATH`], the entry
//!   at offset `0` names the input the program processed.
//! * Blocks: 40 byte records with the position of the block, the range of its
//!   out-edges and its hit count.
//! * Edges: only with [`Flags::EDGES`]. 16 byte records with the destination block
//!   and the number of times the edge was taken.
//!
//! A chunk ends where the next one starts. With [`Flags::COMPRESS`], the block
//! and edge chunks are each stored as a single compressed stream.
//!
//! A hit counter of `0` means the block or edge was not measured. Merging keeps
//! it that way unless the other capture measured it.

#![warn(missing_docs)]

mod builder;
mod compression;
mod error;
mod graph;
mod header;
mod paths;
mod raw;
mod read;
mod utils;
mod writer;

pub use builder::CoverageBuilder;
pub use compression::{Compressor, Lzma2, Zlib};
pub use error::{AlcovError, AlcovErrorKind, ValueKind};
pub use graph::{Block, CoverageGraph, Module, OutEdge, Segment};
pub use header::{Flags, Header, ALCOV_MAGIC, ALCOV_VERSION_MAJOR, ALCOV_VERSION_MINOR};
pub use paths::{PathTable, ResolvedPath};
pub use utils::{read_i64, read_u16, read_u32, read_u64, write_i64, write_u16, write_u32, write_u64};
