//! Decoding and validation of alcov files.

use std::borrow::Cow;
use std::ops::Range;

use scroll::{Pread, LE};

use crate::compression::Compressor;
use crate::header::{Flags, Header};
use crate::raw::{self, BlockRecord, EdgeRecord, ModuleRecord};
use crate::{AlcovError, AlcovErrorKind, Block, CoverageGraph, Module, OutEdge, PathTable};

/// Byte ranges of every chunk present in a file.
#[derive(Debug, PartialEq, Eq)]
struct ChunkLayout {
    modules: Range<usize>,
    paths: Range<usize>,
    blocks: Range<usize>,
    edges: Option<Range<usize>>,
}

impl ChunkLayout {
    /// Derives the extent of every chunk from the header offsets.
    ///
    /// Chunks may appear in any order and leave gaps. Each one extends up to the
    /// chunk starting after it, the last one up to the end of the file. Chunks
    /// starting at the same offset are ordered as declared in the header, which
    /// leaves all but the last of them empty.
    fn from_header(header: &Header, file_len: usize) -> Result<Self, AlcovError> {
        let mut starts = vec![
            header.modules_start,
            header.paths_start,
            header.blocks_start,
        ];
        if header.flags.contains(Flags::EDGES) {
            starts.push(header.edges_start);
        }

        let mut order = Vec::with_capacity(starts.len());
        for (index, &start) in starts.iter().enumerate() {
            let start = usize::try_from(start).map_err(|e| {
                AlcovError::new(AlcovErrorKind::TruncatedInput, e)
            })?;
            if start < Header::SIZE {
                return Err(AlcovErrorKind::InvalidOffset.into());
            }
            if start > file_len {
                return Err(AlcovErrorKind::TruncatedInput.into());
            }
            order.push((start, index));
        }
        order.sort_unstable();

        if order.iter().map(|&(_, index)| index).ne(0..order.len()) {
            tracing::debug!("chunks are not stored in header order");
        }

        let mut ranges = vec![0..0; order.len()];
        for (position, &(start, index)) in order.iter().enumerate() {
            let end = order.get(position + 1).map_or(file_len, |&(next, _)| next);
            ranges[index] = start..end;
        }

        let mut ranges = ranges.into_iter();
        Ok(ChunkLayout {
            modules: ranges.next().unwrap_or_default(),
            paths: ranges.next().unwrap_or_default(),
            blocks: ranges.next().unwrap_or_default(),
            edges: ranges.next(),
        })
    }
}

fn path_offset(raw_offset: i64) -> Result<Option<u64>, AlcovError> {
    if raw_offset == raw::NO_PATH {
        return Ok(None);
    }
    u64::try_from(raw_offset)
        .map(Some)
        .map_err(|e| AlcovError::new(AlcovErrorKind::InvalidOffset, e))
}

/// Reads the module chunk with a forward scan.
///
/// The size of a module record depends on its segment count, so the records can
/// only be located by reading them in order.
fn parse_modules(data: &[u8], nb_modules: u16) -> Result<Vec<Module>, AlcovError> {
    let mut modules = Vec::with_capacity(nb_modules as usize);
    let mut offset = 0;

    for _ in 0..nb_modules {
        let record = data.gread_with::<ModuleRecord>(&mut offset, LE)?;
        let path_offset = path_offset(record.path_offset)?;
        modules.push(Module::new(
            record.base_address,
            path_offset,
            record.segments,
        )?);
    }

    if offset < data.len() {
        tracing::debug!(
            trailing = data.len() - offset,
            "module chunk has trailing bytes"
        );
    }

    Ok(modules)
}

fn parse_blocks(data: &[u8], nb_blocks: usize) -> Result<Vec<BlockRecord>, AlcovError> {
    let needed = nb_blocks
        .checked_mul(raw::BLOCK_RECORD_SIZE)
        .ok_or(AlcovErrorKind::TruncatedInput)?;
    if data.len() < needed {
        return Err(AlcovErrorKind::TruncatedInput.into());
    }

    let mut blocks = Vec::with_capacity(nb_blocks);
    let mut offset = 0;
    for _ in 0..nb_blocks {
        blocks.push(data.gread_with::<BlockRecord>(&mut offset, LE)?);
    }
    Ok(blocks)
}

/// The number of edge chunk bytes the declared ranges reach into.
///
/// Decompression of the edge chunk stops there. Overflowing ranges saturate and
/// are rejected later by [`parse_edges`].
fn edge_chunk_len(blocks: &[BlockRecord]) -> usize {
    blocks
        .iter()
        .filter(|block| block.nb_out_edges > 0)
        .map(|block| {
            block
                .nb_out_edges
                .saturating_mul(raw::EDGE_RECORD_SIZE as u64)
                .saturating_add(block.out_edges_offset)
        })
        .max()
        .map_or(0, |end| usize::try_from(end).unwrap_or(usize::MAX))
}

/// Slices the edge chunk into the out-edges of every block.
///
/// Ranges may leave gaps between them, but two blocks may not share records. All
/// ranges are checked before any record is decoded, so every record is read at
/// most once.
fn parse_edges(
    data: &[u8],
    blocks: &[BlockRecord],
    nb_edges: u64,
) -> Result<Vec<Vec<OutEdge>>, AlcovError> {
    let mut ranges = Vec::new();
    let mut declared = 0u64;

    for (block_id, block) in blocks.iter().enumerate() {
        if block.nb_out_edges == 0 {
            continue;
        }
        declared = declared.saturating_add(block.nb_out_edges);

        let start = usize::try_from(block.out_edges_offset)
            .ok()
            .filter(|&start| start <= data.len())
            .ok_or(AlcovErrorKind::InvalidOffset)?;
        let end = usize::try_from(block.nb_out_edges)
            .ok()
            .and_then(|count| count.checked_mul(raw::EDGE_RECORD_SIZE))
            .and_then(|len| start.checked_add(len))
            .filter(|&end| end <= data.len())
            .ok_or(AlcovErrorKind::TruncatedInput)?;

        ranges.push((start..end, block_id));
    }

    ranges.sort_unstable_by_key(|(range, _)| range.start);
    if ranges.windows(2).any(|pair| pair[1].0.start < pair[0].0.end) {
        return Err(AlcovErrorKind::OverlappingEdgeRange.into());
    }

    if declared != nb_edges {
        return Err(AlcovErrorKind::EdgeCountMismatch {
            expected: nb_edges,
            found: declared,
        }
        .into());
    }

    let nb_blocks = blocks.len() as u64;
    let mut adjacency = vec![Vec::new(); blocks.len()];
    for (range, block_id) in ranges {
        let out_edges = &mut adjacency[block_id];
        out_edges.reserve_exact(range.len() / raw::EDGE_RECORD_SIZE);

        let mut offset = range.start;
        while offset < range.end {
            let record = data.gread_with::<EdgeRecord>(&mut offset, LE)?;
            if record.dst_block_id >= nb_blocks {
                return Err(AlcovErrorKind::DanglingEdgeRef.into());
            }
            out_edges.push(OutEdge::new(record.dst_block_id, record.nb_taken));
        }
    }

    Ok(adjacency)
}

fn chunk_data<'a>(
    raw: &'a [u8],
    compressed: bool,
    expected_len: Option<usize>,
    compressor: &dyn Compressor,
) -> Result<Cow<'a, [u8]>, AlcovError> {
    if !compressed {
        return Ok(Cow::Borrowed(raw));
    }
    tracing::trace_span!("decompress chunk", compressed_len = raw.len())
        .in_scope(|| compressor.decompress(raw, expected_len))
        .map(Cow::Owned)
}

/// Decodes and validates a whole alcov file.
#[tracing::instrument(level = "trace", name = "CoverageGraph::parse", skip_all)]
pub(crate) fn parse(buf: &[u8], compressor: &dyn Compressor) -> Result<CoverageGraph, AlcovError> {
    let header = Header::parse(buf)?;
    let layout = ChunkLayout::from_header(&header, buf.len())?;
    let compressed = header.flags.contains(Flags::COMPRESS);

    let modules = tracing::trace_span!("modules")
        .in_scope(|| parse_modules(&buf[layout.modules.clone()], header.nb_modules))?;

    let paths = PathTable::from_bytes(
        buf[layout.paths.clone()].to_vec(),
        header.flags.contains(Flags::INPUT_PATH),
    )?;

    let nb_blocks = usize::try_from(header.nb_blocks)
        .map_err(|e| AlcovError::new(AlcovErrorKind::TruncatedInput, e))?;
    let blocks_len = nb_blocks
        .checked_mul(raw::BLOCK_RECORD_SIZE)
        .ok_or(AlcovErrorKind::TruncatedInput)?;
    if !compressed && blocks_len > layout.blocks.len() {
        return Err(AlcovErrorKind::TruncatedInput.into());
    }
    let block_data = chunk_data(
        &buf[layout.blocks.clone()],
        compressed,
        Some(blocks_len),
        compressor,
    )?;
    let block_records =
        tracing::trace_span!("blocks").in_scope(|| parse_blocks(&block_data, nb_blocks))?;

    let edges = match layout.edges {
        Some(range) => {
            let edge_len = edge_chunk_len(&block_records);
            let edge_data = chunk_data(&buf[range], compressed, Some(edge_len), compressor)?;
            let adjacency = tracing::trace_span!("edges")
                .in_scope(|| parse_edges(&edge_data, &block_records, header.nb_edges))?;
            Some(adjacency)
        }
        None => None,
    };

    let blocks = block_records
        .into_iter()
        .map(|record| Block {
            segment_offset: record.segment_offset,
            size: record.size,
            module_id: record.module_id,
            segment_id: record.segment_id,
            nb_taken: record.nb_taken,
        })
        .collect();

    CoverageGraph::new(paths, modules, blocks, edges)
}
