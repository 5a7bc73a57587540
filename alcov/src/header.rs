use std::fmt;
use std::io::Write;

use crate::utils::{read_u16, read_u64, write_u16, write_u64};
use crate::{AlcovError, AlcovErrorKind};

/// The magic number at the start of every alcov file.
///
/// Serialized as ASCII "alcov" followed by three marker bytes.
pub const ALCOV_MAGIC: u64 = 0xdda2_8f76_6f63_6c61;

/// The major version of the format. Files with a different major are rejected.
pub const ALCOV_VERSION_MAJOR: u64 = 0;

/// The minor version of the format. Newer minors remain readable.
pub const ALCOV_VERSION_MINOR: u64 = 1;

bitflags::bitflags! {
    /// Optional features of an alcov file.
    ///
    /// Bits without a name are kept when reading, so they survive a round trip
    /// through [`Header`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Flags: u16 {
        /// Edge coverage is present.
        const EDGES = 1 << 0;
        /// The block chunk (and edge chunk, if present) are whole-stream compressed.
        const COMPRESS = 1 << 1;
        /// The first entry of the path table is the measured input file.
        const INPUT_PATH = 1 << 2;
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (name, _)) in self.iter_names().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

/// The fixed-size header of an alcov file.
///
/// Chunk offsets are absolute byte offsets into the file. `nb_edges` and
/// `edges_start` only carry meaning when [`Flags::EDGES`] is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Major format version.
    pub version_major: u64,
    /// Minor format version.
    pub version_minor: u64,
    /// Number of module records.
    pub nb_modules: u16,
    /// Number of block records.
    pub nb_blocks: u64,
    /// Total number of out-edge records.
    pub nb_edges: u64,
    /// Start of the module chunk.
    pub modules_start: u64,
    /// Start of the path chunk.
    pub paths_start: u64,
    /// Start of the block chunk.
    pub blocks_start: u64,
    /// Start of the edge chunk.
    pub edges_start: u64,
    /// Optional features.
    pub flags: Flags,
}

impl Header {
    /// Size of the serialized header in bytes.
    pub const SIZE: usize = 76;

    /// Reads and validates the header at the start of `buf`.
    ///
    /// The magic is checked before the version, and the version before the rest of
    /// the fields, so a foreign file is reported as such even when it is short.
    pub fn parse(buf: &[u8]) -> Result<Self, AlcovError> {
        let (magic, offset) = read_u64(buf, 0)?;
        if magic != ALCOV_MAGIC {
            return Err(AlcovErrorKind::BadMagic.into());
        }

        let (version_major, offset) = read_u64(buf, offset)?;
        if version_major != ALCOV_VERSION_MAJOR {
            return Err(AlcovErrorKind::UnsupportedVersion(version_major).into());
        }

        let (version_minor, offset) = read_u64(buf, offset)?;
        let (nb_modules, offset) = read_u16(buf, offset)?;
        let (nb_blocks, offset) = read_u64(buf, offset)?;
        let (nb_edges, offset) = read_u64(buf, offset)?;
        let (modules_start, offset) = read_u64(buf, offset)?;
        let (paths_start, offset) = read_u64(buf, offset)?;
        let (blocks_start, offset) = read_u64(buf, offset)?;
        let (edges_start, offset) = read_u64(buf, offset)?;
        let (flags, offset) = read_u16(buf, offset)?;
        debug_assert_eq!(offset, Self::SIZE);

        if version_minor > ALCOV_VERSION_MINOR {
            tracing::debug!(version_minor, "reading file with a newer minor version");
        }

        let flags = Flags::from_bits_retain(flags);
        let unknown = flags.difference(Flags::all());
        if !unknown.is_empty() {
            tracing::debug!(bits = unknown.bits(), "ignoring unknown header flags");
        }

        Ok(Header {
            version_major,
            version_minor,
            nb_modules,
            nb_blocks,
            nb_edges,
            modules_start,
            paths_start,
            blocks_start,
            edges_start,
            flags,
        })
    }

    /// Writes the header, always emitting [`ALCOV_MAGIC`] first.
    pub fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), AlcovError> {
        write_u64(writer, ALCOV_MAGIC)?;
        write_u64(writer, self.version_major)?;
        write_u64(writer, self.version_minor)?;
        write_u16(writer, self.nb_modules)?;
        write_u64(writer, self.nb_blocks)?;
        write_u64(writer, self.nb_edges)?;
        write_u64(writer, self.modules_start)?;
        write_u64(writer, self.paths_start)?;
        write_u64(writer, self.blocks_start)?;
        write_u64(writer, self.edges_start)?;
        write_u16(writer, self.flags.bits())?;
        Ok(())
    }
}
