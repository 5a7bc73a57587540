//! Serialization of coverage graphs.

use std::io::Write;

use crate::compression::Compressor;
use crate::header::{Flags, Header, ALCOV_VERSION_MAJOR, ALCOV_VERSION_MINOR};
use crate::raw::{self, BlockRecord, EdgeRecord, ModuleRecord};
use crate::{AlcovError, AlcovErrorKind, CoverageGraph, ValueKind};

/// Encoded chunks of a graph, ready to be laid out behind the header.
struct Chunks {
    modules: Vec<u8>,
    blocks: Vec<u8>,
    edges: Option<Vec<u8>>,
}

fn encode_modules(graph: &CoverageGraph) -> Result<Vec<u8>, AlcovError> {
    let mut buf = Vec::new();
    for module in graph.modules() {
        let path_offset = match module.path_offset() {
            Some(offset) => i64::try_from(offset).map_err(|e| {
                AlcovError::new(AlcovErrorKind::TooManyValues(ValueKind::PathOffset), e)
            })?,
            None => raw::NO_PATH,
        };
        let record = ModuleRecord {
            base_address: module.base_address(),
            path_offset,
            segments: module.segments().to_vec(),
        };
        buf.reserve(record.size());
        record.write(&mut buf)?;
    }
    Ok(buf)
}

/// Encodes the block chunk and, with edge coverage, the edge chunk.
///
/// Out-edge ranges are laid out back to back in block order. A block without
/// out-edges stores an offset of `0`.
fn encode_blocks_and_edges(graph: &CoverageGraph) -> Result<(Vec<u8>, Option<Vec<u8>>), AlcovError> {
    let mut blocks = Vec::with_capacity(graph.blocks().len() * raw::BLOCK_RECORD_SIZE);
    let mut edges = graph.has_edges().then(Vec::new);

    for (block_id, block) in graph.blocks().iter().enumerate() {
        let mut record = BlockRecord {
            segment_offset: block.segment_offset,
            size: block.size,
            module_id: block.module_id,
            segment_id: block.segment_id,
            nb_out_edges: 0,
            out_edges_offset: 0,
            nb_taken: block.nb_taken,
        };

        if let Some(edge_buf) = edges.as_mut() {
            let out_edges = graph.out_edges(block_id as u64);
            if !out_edges.is_empty() {
                record.nb_out_edges = out_edges.len() as u64;
                record.out_edges_offset = edge_buf.len() as u64;
                for edge in out_edges {
                    EdgeRecord {
                        dst_block_id: edge.dst_block_id,
                        nb_taken: edge.nb_taken,
                    }
                    .write(&mut *edge_buf)?;
                }
            }
        }

        record.write(&mut blocks)?;
    }

    Ok((blocks, edges))
}

impl Chunks {
    fn encode(graph: &CoverageGraph, compressor: Option<&dyn Compressor>) -> Result<Self, AlcovError> {
        let modules = encode_modules(graph)?;
        let (mut blocks, mut edges) = encode_blocks_and_edges(graph)?;

        if let Some(compressor) = compressor {
            let _span = tracing::trace_span!("compress chunks").entered();
            blocks = compressor.compress(&blocks)?;
            if let Some(edge_buf) = edges.as_mut() {
                *edge_buf = compressor.compress(edge_buf)?;
            }
        }

        Ok(Self {
            modules,
            blocks,
            edges,
        })
    }
}

/// Writes `graph` as an alcov file.
///
/// Chunks are stored contiguously in the order header, modules, paths, blocks and
/// edges. Without edge coverage the edge fields of the header stay `0`.
#[tracing::instrument(level = "trace", name = "CoverageGraph::serialize", skip_all)]
pub(crate) fn serialize<W: Write>(
    graph: &CoverageGraph,
    writer: &mut W,
    compressor: Option<&dyn Compressor>,
) -> Result<(), AlcovError> {
    let nb_modules = u16::try_from(graph.modules().len())
        .map_err(|e| AlcovError::new(AlcovErrorKind::TooManyValues(ValueKind::Module), e))?;

    let chunks = Chunks::encode(graph, compressor)?;
    let paths = graph.paths().as_bytes();

    let mut flags = Flags::empty();
    flags.set(Flags::EDGES, chunks.edges.is_some());
    flags.set(Flags::COMPRESS, compressor.is_some());
    flags.set(Flags::INPUT_PATH, graph.paths().has_input());

    let modules_start = Header::SIZE as u64;
    let paths_start = modules_start + chunks.modules.len() as u64;
    let blocks_start = paths_start + paths.len() as u64;
    let edges_start = blocks_start + chunks.blocks.len() as u64;

    let header = Header {
        version_major: ALCOV_VERSION_MAJOR,
        version_minor: ALCOV_VERSION_MINOR,
        nb_modules,
        nb_blocks: graph.blocks().len() as u64,
        nb_edges: if chunks.edges.is_some() {
            graph.nb_edges()
        } else {
            0
        },
        modules_start,
        paths_start,
        blocks_start,
        edges_start: if chunks.edges.is_some() {
            edges_start
        } else {
            0
        },
        flags,
    };

    tracing::trace!(%flags, nb_blocks = header.nb_blocks, nb_edges = header.nb_edges, "writing alcov file");

    header.write(writer)?;
    writer.write_all(&chunks.modules)?;
    writer.write_all(paths)?;
    writer.write_all(&chunks.blocks)?;
    if let Some(edges) = &chunks.edges {
        writer.write_all(edges)?;
    }
    writer.flush()?;

    Ok(())
}
