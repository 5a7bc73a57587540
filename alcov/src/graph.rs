use std::io::Write;
use std::num::NonZeroU64;
use std::ops::Range;

use crate::compression::{Compressor, Lzma2};
use crate::{read, writer};
use crate::{AlcovError, AlcovErrorKind, PathTable, ResolvedPath, ValueKind};

/// A contiguous region of a module, such as a section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Segment {
    /// Offset from the owning module's base address.
    pub module_offset: u64,
    /// Size of the segment in bytes.
    pub size: u64,
}

impl Segment {
    /// Creates a segment starting `module_offset` bytes into its module.
    pub fn new(module_offset: u64, size: u64) -> Self {
        Self {
            module_offset,
            size,
        }
    }

    /// Creates a segment covering `range`, relative to the module base.
    pub fn from_range(range: Range<u64>) -> Self {
        Self::new(range.start, range.end.saturating_sub(range.start))
    }

    /// Returns the covered range relative to the module base.
    pub fn range(&self) -> Range<u64> {
        self.module_offset..self.module_offset.saturating_add(self.size)
    }
}

/// An executable image loaded at a base address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    base_address: u64,
    path_offset: Option<u64>,
    segments: Vec<Segment>,
}

impl Module {
    /// Creates a module.
    ///
    /// `path_offset` points into the graph's [`PathTable`]. A module needs at least
    /// one segment, and at most `u16::MAX`.
    pub fn new(
        base_address: u64,
        path_offset: Option<u64>,
        segments: Vec<Segment>,
    ) -> Result<Self, AlcovError> {
        if segments.is_empty() {
            return Err(AlcovErrorKind::EmptySegmentList.into());
        }
        if segments.len() > u16::MAX as usize {
            return Err(AlcovErrorKind::TooManyValues(ValueKind::Segment).into());
        }

        Ok(Self {
            base_address,
            path_offset,
            segments,
        })
    }

    /// The address the module was loaded at.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    /// The offset of the module path in the path table, if it has one.
    pub fn path_offset(&self) -> Option<u64> {
        self.path_offset
    }

    /// The segments of this module, indexed by segment id.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// A basic block within a module segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Block {
    /// Offset of the block within its segment.
    pub segment_offset: u64,
    /// Size of the block in bytes.
    pub size: u32,
    /// Index of the module containing the block.
    pub module_id: u16,
    /// Index of the segment within that module.
    pub segment_id: u16,
    /// Number of times the block ran. `0` means it was not measured.
    pub nb_taken: u64,
}

impl Block {
    /// Creates an unmeasured block.
    pub fn new(module_id: u16, segment_id: u16, segment_offset: u64, size: u32) -> Self {
        Self {
            segment_offset,
            size,
            module_id,
            segment_id,
            nb_taken: 0,
        }
    }

    /// Returns the hit count, or `None` if the block was not measured.
    pub fn hits(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.nb_taken)
    }
}

/// A control-flow edge leaving a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutEdge {
    /// The block the edge leads to.
    pub dst_block_id: u64,
    /// Number of times the edge was taken. `0` means it was not measured.
    pub nb_taken: u64,
}

impl OutEdge {
    /// Creates an edge to `dst_block_id`.
    pub fn new(dst_block_id: u64, nb_taken: u64) -> Self {
        Self {
            dst_block_id,
            nb_taken,
        }
    }

    /// Returns the taken count, or `None` if the edge was not measured.
    pub fn hits(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.nb_taken)
    }
}

/// Sums two hit counters, where `0` means "not measured".
///
/// An unmeasured counter never turns a measured one back into unmeasured, and two
/// unmeasured counters stay unmeasured.
fn merge_counter(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, 0) => 0,
        (a, 0) => a,
        (0, b) => b,
        (a, b) => a.saturating_add(b),
    }
}

/// Validated coverage of one or more runs.
///
/// Modules, blocks and edges are identified by their position: a block refers to
/// its module by index, and an edge refers to its destination by block index.
/// These sequences are never reordered once the graph exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoverageGraph {
    paths: PathTable,
    modules: Vec<Module>,
    blocks: Vec<Block>,
    edges: Option<Vec<Vec<OutEdge>>>,
}

impl CoverageGraph {
    /// Assembles and validates a coverage graph.
    ///
    /// `edges` holds the out-edges of every block, indexed by block id. A shorter
    /// list leaves the remaining blocks without out-edges. Pass `None` when edge
    /// coverage was not recorded.
    pub fn new(
        paths: PathTable,
        modules: Vec<Module>,
        blocks: Vec<Block>,
        edges: Option<Vec<Vec<OutEdge>>>,
    ) -> Result<Self, AlcovError> {
        let edges = match edges {
            Some(mut adjacency) => {
                if adjacency.len() > blocks.len() {
                    return Err(AlcovErrorKind::DanglingEdgeRef.into());
                }
                adjacency.resize_with(blocks.len(), Vec::new);
                Some(adjacency)
            }
            None => None,
        };

        let graph = Self {
            paths,
            modules,
            blocks,
            edges,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> Result<(), AlcovError> {
        if self.modules.len() > u16::MAX as usize {
            return Err(AlcovErrorKind::TooManyValues(ValueKind::Module).into());
        }

        for module in &self.modules {
            if let Some(offset) = module.path_offset {
                if i64::try_from(offset).is_err() {
                    return Err(AlcovErrorKind::TooManyValues(ValueKind::PathOffset).into());
                }
                self.paths.resolve(offset)?;
            }
        }

        for block in &self.blocks {
            let module = self
                .modules
                .get(block.module_id as usize)
                .ok_or(AlcovErrorKind::UnresolvedModuleRef)?;
            if block.segment_id as usize >= module.segments.len() {
                return Err(AlcovErrorKind::UnresolvedSegmentRef.into());
            }
        }

        let nb_blocks = self.blocks.len() as u64;
        for edge in self.edges.iter().flatten().flatten() {
            if edge.dst_block_id >= nb_blocks {
                return Err(AlcovErrorKind::DanglingEdgeRef.into());
            }
        }

        Ok(())
    }

    /// Parses an alcov file, decompressing chunks with [`Lzma2`] if needed.
    pub fn parse(buf: &[u8]) -> Result<Self, AlcovError> {
        Self::parse_with(buf, &Lzma2)
    }

    /// Parses an alcov file, decompressing chunks with `compressor` if needed.
    pub fn parse_with(buf: &[u8], compressor: &dyn Compressor) -> Result<Self, AlcovError> {
        read::parse(buf, compressor)
    }

    /// Serializes the graph without compression.
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<(), AlcovError> {
        writer::serialize(self, writer, None)
    }

    /// Serializes the graph, compressing the block and edge chunks.
    pub fn serialize_compressed<W: Write>(
        &self,
        writer: &mut W,
        compressor: &dyn Compressor,
    ) -> Result<(), AlcovError> {
        writer::serialize(self, writer, Some(compressor))
    }

    /// Serializes the graph without compression into a new buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, AlcovError> {
        let mut buf = Vec::new();
        self.serialize(&mut buf)?;
        Ok(buf)
    }

    /// The path table.
    pub fn paths(&self) -> &PathTable {
        &self.paths
    }

    /// The measured input file, if recorded.
    pub fn input_path(&self) -> Option<&str> {
        self.paths.input_path()
    }

    /// All modules, indexed by module id.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// The module with the given id.
    pub fn module(&self, module_id: u16) -> Option<&Module> {
        self.modules.get(module_id as usize)
    }

    /// Resolves the path of a module.
    ///
    /// Returns `None` for modules without a path and for unknown module ids.
    pub fn module_path(&self, module_id: u16) -> Option<ResolvedPath<'_>> {
        let offset = self.module(module_id)?.path_offset?;
        self.paths.resolve_offset(offset).ok()
    }

    /// All blocks, indexed by block id.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The block with the given id.
    pub fn block(&self, block_id: u64) -> Option<&Block> {
        self.blocks.get(usize::try_from(block_id).ok()?)
    }

    /// Computes the runtime address of a block.
    pub fn block_address(&self, block_id: u64) -> Option<u64> {
        let block = self.block(block_id)?;
        let module = self.module(block.module_id)?;
        let segment = module.segments.get(block.segment_id as usize)?;
        Some(
            module
                .base_address
                .wrapping_add(segment.module_offset)
                .wrapping_add(block.segment_offset),
        )
    }

    /// Returns `true` if the graph carries edge coverage.
    pub fn has_edges(&self) -> bool {
        self.edges.is_some()
    }

    /// The adjacency list, indexed by source block id.
    pub fn edges(&self) -> Option<&[Vec<OutEdge>]> {
        self.edges.as_deref()
    }

    /// The out-edges of a block, in recorded order.
    pub fn out_edges(&self, block_id: u64) -> &[OutEdge] {
        self.edges
            .as_ref()
            .and_then(|edges| edges.get(usize::try_from(block_id).ok()?))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of edges.
    pub fn nb_edges(&self) -> u64 {
        self.edges
            .iter()
            .flatten()
            .map(|out_edges| out_edges.len() as u64)
            .sum()
    }

    /// Sums the hit counters of two captures of the same program.
    ///
    /// Both graphs must have the same topology: the same segment layout per module,
    /// the same blocks and the same edges in the same order. Module base addresses
    /// and paths may differ between captures and are taken from `self`.
    ///
    /// The counters of the result do not depend on the order of the operands. The
    /// whole graph only does when both captures share their bases and paths.
    pub fn merge(&self, other: &CoverageGraph) -> Result<CoverageGraph, AlcovError> {
        let same_modules = self.modules.len() == other.modules.len()
            && self
                .modules
                .iter()
                .zip(&other.modules)
                .all(|(a, b)| a.segments == b.segments);

        let same_blocks = self.blocks.len() == other.blocks.len()
            && self.blocks.iter().zip(&other.blocks).all(|(a, b)| {
                (a.module_id, a.segment_id, a.segment_offset, a.size)
                    == (b.module_id, b.segment_id, b.segment_offset, b.size)
            });

        let same_edges = match (&self.edges, &other.edges) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(a, b)| {
                        a.len() == b.len()
                            && a.iter()
                                .zip(b)
                                .all(|(a, b)| a.dst_block_id == b.dst_block_id)
                    })
            }
            _ => false,
        };

        if !(same_modules && same_blocks && same_edges) {
            return Err(AlcovErrorKind::StructuralMismatch.into());
        }

        let mut merged = self.clone();
        for (block, theirs) in merged.blocks.iter_mut().zip(&other.blocks) {
            block.nb_taken = merge_counter(block.nb_taken, theirs.nb_taken);
        }
        if let (Some(ours), Some(theirs)) = (merged.edges.as_mut(), other.edges.as_ref()) {
            for (a, b) in ours.iter_mut().flatten().zip(theirs.iter().flatten()) {
                a.nb_taken = merge_counter(a.nb_taken, b.nb_taken);
            }
        }

        Ok(merged)
    }
}
