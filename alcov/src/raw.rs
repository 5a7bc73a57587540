//! The raw alcov record layouts.
//!
//! None of these types mirror the on-disk layout in memory. Records are packed
//! without padding, so each one is decoded field by field through `scroll` and
//! written back field by field in declaration order.

use std::io::{self, Write};

use scroll::ctx::TryFromCtx;
use scroll::{Endian, Pread};

use crate::utils::{write_i64, write_u16, write_u32, write_u64};
use crate::{AlcovError, AlcovErrorKind, Segment};

/// Size of the fixed part of a module record, before its segments.
pub(crate) const MODULE_RECORD_SIZE: usize = 18;
/// Size of a segment record.
pub(crate) const SEGMENT_RECORD_SIZE: usize = 16;
/// Size of a block record.
pub(crate) const BLOCK_RECORD_SIZE: usize = 40;
/// Size of an out-edge record.
pub(crate) const EDGE_RECORD_SIZE: usize = 16;

/// The `path_offset` value of a module without a path.
pub(crate) const NO_PATH: i64 = -1;

/// A module record followed by its embedded segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ModuleRecord {
    pub(crate) base_address: u64,
    pub(crate) path_offset: i64,
    pub(crate) segments: Vec<Segment>,
}

impl<'a> TryFromCtx<'a, Endian> for ModuleRecord {
    type Error = AlcovError;

    fn try_from_ctx(data: &'a [u8], le: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;

        let base_address = data.gread_with::<u64>(&mut offset, le)?;
        let path_offset = data.gread_with::<i64>(&mut offset, le)?;
        let nb_segments = data.gread_with::<u16>(&mut offset, le)?;

        if nb_segments == 0 {
            return Err(AlcovErrorKind::EmptySegmentList.into());
        }

        let mut segments = Vec::with_capacity(nb_segments as usize);
        for _ in 0..nb_segments {
            let module_offset = data.gread_with::<u64>(&mut offset, le)?;
            let size = data.gread_with::<u64>(&mut offset, le)?;
            segments.push(Segment::new(module_offset, size));
        }

        Ok((
            ModuleRecord {
                base_address,
                path_offset,
                segments,
            },
            offset,
        ))
    }
}

impl ModuleRecord {
    /// Number of bytes this record occupies on disk.
    pub(crate) fn size(&self) -> usize {
        MODULE_RECORD_SIZE + self.segments.len() * SEGMENT_RECORD_SIZE
    }

    pub(crate) fn write<W: Write + ?Sized>(&self, writer: &mut W) -> Result<(), AlcovError> {
        let nb_segments = u16::try_from(self.segments.len()).map_err(|e| {
            AlcovError::new(
                AlcovErrorKind::TooManyValues(crate::ValueKind::Segment),
                e,
            )
        })?;
        if nb_segments == 0 {
            return Err(AlcovErrorKind::EmptySegmentList.into());
        }

        write_u64(writer, self.base_address)?;
        write_i64(writer, self.path_offset)?;
        write_u16(writer, nb_segments)?;
        for segment in &self.segments {
            write_u64(writer, segment.module_offset)?;
            write_u64(writer, segment.size)?;
        }
        Ok(())
    }
}

/// A basic-block record.
///
/// `nb_out_edges` and `out_edges_offset` are only meaningful when the file has
/// edge coverage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlockRecord {
    pub(crate) segment_offset: u64,
    pub(crate) size: u32,
    pub(crate) module_id: u16,
    pub(crate) segment_id: u16,
    pub(crate) nb_out_edges: u64,
    pub(crate) out_edges_offset: u64,
    pub(crate) nb_taken: u64,
}

impl<'a> TryFromCtx<'a, Endian> for BlockRecord {
    type Error = scroll::Error;

    fn try_from_ctx(data: &'a [u8], le: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;

        let record = BlockRecord {
            segment_offset: data.gread_with(&mut offset, le)?,
            size: data.gread_with(&mut offset, le)?,
            module_id: data.gread_with(&mut offset, le)?,
            segment_id: data.gread_with(&mut offset, le)?,
            nb_out_edges: data.gread_with(&mut offset, le)?,
            out_edges_offset: data.gread_with(&mut offset, le)?,
            nb_taken: data.gread_with(&mut offset, le)?,
        };

        Ok((record, offset))
    }
}

impl BlockRecord {
    pub(crate) fn write<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        write_u64(writer, self.segment_offset)?;
        write_u32(writer, self.size)?;
        write_u16(writer, self.module_id)?;
        write_u16(writer, self.segment_id)?;
        write_u64(writer, self.nb_out_edges)?;
        write_u64(writer, self.out_edges_offset)?;
        write_u64(writer, self.nb_taken)
    }
}

/// An out-edge record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EdgeRecord {
    pub(crate) dst_block_id: u64,
    pub(crate) nb_taken: u64,
}

impl<'a> TryFromCtx<'a, Endian> for EdgeRecord {
    type Error = scroll::Error;

    fn try_from_ctx(data: &'a [u8], le: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;

        let dst_block_id = data.gread_with(&mut offset, le)?;
        let nb_taken = data.gread_with(&mut offset, le)?;

        Ok((
            EdgeRecord {
                dst_block_id,
                nb_taken,
            },
            offset,
        ))
    }
}

impl EdgeRecord {
    pub(crate) fn write<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        write_u64(writer, self.dst_block_id)?;
        write_u64(writer, self.nb_taken)
    }
}
