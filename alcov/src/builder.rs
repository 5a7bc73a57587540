//! Incremental construction of coverage graphs while a program runs.

use indexmap::IndexMap;

use crate::{
    AlcovError, AlcovErrorKind, Block, CoverageGraph, Module, OutEdge, PathTable, Segment,
    ValueKind,
};

#[derive(Debug)]
struct PendingModule {
    base_address: u64,
    path: Option<String>,
    segments: Vec<Segment>,
}

/// Collects modules, blocks and hit counts, then produces a [`CoverageGraph`].
///
/// Identifiers handed out by [`add_module`](Self::add_module) and
/// [`add_block`](Self::add_block) are the positions of the records in the final
/// graph.
///
/// ```
/// use alcov::{CoverageBuilder, Segment};
///
/// let mut builder = CoverageBuilder::new();
/// let module = builder
///     .add_module(0x40_0000, Some("/bin/app"), vec![Segment::new(0, 0x1000)])
///     .unwrap();
/// let entry = builder.add_block(module, 0, 0x10, 8).unwrap();
/// let exit = builder.add_block(module, 0, 0x18, 4).unwrap();
///
/// builder.record_block(entry).unwrap();
/// builder.record_edge(entry, exit).unwrap();
///
/// let graph = builder.finish().unwrap();
/// assert_eq!(graph.nb_edges(), 1);
/// assert_eq!(graph.blocks()[1].hits(), None);
/// ```
#[derive(Debug, Default)]
pub struct CoverageBuilder {
    input_path: Option<String>,
    modules: Vec<PendingModule>,
    blocks: Vec<Block>,
    /// Out-edges per source block, keyed by destination, in first-recorded order.
    edges: Option<Vec<IndexMap<u64, u64>>>,
}

impl CoverageBuilder {
    /// Creates an empty builder without edge coverage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the input file the coverage is measured for.
    pub fn set_input_path(&mut self, path: &str) -> Result<(), AlcovError> {
        if path.as_bytes().contains(&0) {
            return Err(AlcovErrorKind::InvalidPath.into());
        }
        self.input_path = Some(path.to_owned());
        Ok(())
    }

    /// Adds a module and returns its id.
    pub fn add_module(
        &mut self,
        base_address: u64,
        path: Option<&str>,
        segments: Vec<Segment>,
    ) -> Result<u16, AlcovError> {
        let module_id = u16::try_from(self.modules.len())
            .ok()
            .filter(|&id| id < u16::MAX)
            .ok_or(AlcovErrorKind::TooManyValues(ValueKind::Module))?;

        if segments.is_empty() {
            return Err(AlcovErrorKind::EmptySegmentList.into());
        }
        if segments.len() > u16::MAX as usize {
            return Err(AlcovErrorKind::TooManyValues(ValueKind::Segment).into());
        }
        if path.is_some_and(|path| path.as_bytes().contains(&0)) {
            return Err(AlcovErrorKind::InvalidPath.into());
        }

        self.modules.push(PendingModule {
            base_address,
            path: path.map(str::to_owned),
            segments,
        });
        Ok(module_id)
    }

    /// Adds an unmeasured block and returns its id.
    pub fn add_block(
        &mut self,
        module_id: u16,
        segment_id: u16,
        segment_offset: u64,
        size: u32,
    ) -> Result<u64, AlcovError> {
        let module = self
            .modules
            .get(module_id as usize)
            .ok_or(AlcovErrorKind::UnresolvedModuleRef)?;
        if segment_id as usize >= module.segments.len() {
            return Err(AlcovErrorKind::UnresolvedSegmentRef.into());
        }

        let block_id = self.blocks.len() as u64;
        self.blocks
            .push(Block::new(module_id, segment_id, segment_offset, size));
        if let Some(edges) = &mut self.edges {
            edges.push(IndexMap::new());
        }
        Ok(block_id)
    }

    /// Turns on edge coverage, even if no edge is ever recorded.
    pub fn enable_edges(&mut self) {
        if self.edges.is_none() {
            self.edges = Some(vec![IndexMap::new(); self.blocks.len()]);
        }
    }

    /// Counts one execution of a block.
    pub fn record_block(&mut self, block_id: u64) -> Result<(), AlcovError> {
        let block = usize::try_from(block_id)
            .ok()
            .and_then(|index| self.blocks.get_mut(index))
            .ok_or(AlcovErrorKind::UnresolvedBlockRef)?;
        block.nb_taken = block.nb_taken.saturating_add(1);
        Ok(())
    }

    /// Counts one traversal of the edge from `src` to `dst`.
    ///
    /// A new edge is appended to the out-edges of `src`, an existing one has its
    /// counter incremented. Recording an edge turns on edge coverage.
    pub fn record_edge(&mut self, src: u64, dst: u64) -> Result<(), AlcovError> {
        let nb_blocks = self.blocks.len() as u64;
        if src >= nb_blocks {
            return Err(AlcovErrorKind::UnresolvedBlockRef.into());
        }
        if dst >= nb_blocks {
            return Err(AlcovErrorKind::DanglingEdgeRef.into());
        }

        self.enable_edges();
        if let Some(edges) = &mut self.edges {
            let counter = edges[src as usize].entry(dst).or_insert(0);
            *counter = counter.saturating_add(1);
        }
        Ok(())
    }

    /// Validates everything collected so far and produces the graph.
    pub fn finish(self) -> Result<CoverageGraph, AlcovError> {
        let mut paths = match &self.input_path {
            Some(input_path) => PathTable::with_input(input_path)?,
            None => PathTable::new(),
        };

        let mut modules = Vec::with_capacity(self.modules.len());
        for pending in self.modules {
            let path_offset = pending
                .path
                .as_deref()
                .map(|path| paths.insert(path))
                .transpose()?;
            modules.push(Module::new(
                pending.base_address,
                path_offset,
                pending.segments,
            )?);
        }

        let edges = self.edges.map(|edges| {
            edges
                .into_iter()
                .map(|out_edges| {
                    out_edges
                        .into_iter()
                        .map(|(dst, nb_taken)| OutEdge::new(dst, nb_taken))
                        .collect()
                })
                .collect()
        });

        CoverageGraph::new(paths, modules, self.blocks, edges)
    }
}
