use alcov::{
    write_i64, write_u16, write_u32, write_u64, AlcovErrorKind, Block, Compressor, CoverageGraph,
    Flags, Header, Lzma2, Module, OutEdge, PathTable, Segment, Zlib, ALCOV_VERSION_MAJOR,
    ALCOV_VERSION_MINOR,
};
use similar_asserts::assert_eq;

fn module(buf: &mut Vec<u8>, base_address: u64, path_offset: i64, segments: &[(u64, u64)]) {
    write_u64(buf, base_address).unwrap();
    write_i64(buf, path_offset).unwrap();
    write_u16(buf, segments.len() as u16).unwrap();
    for &(module_offset, size) in segments {
        write_u64(buf, module_offset).unwrap();
        write_u64(buf, size).unwrap();
    }
}

fn block(buf: &mut Vec<u8>, module_id: u16, segment_id: u16, edges: (u64, u64), nb_taken: u64) {
    write_u64(buf, 0).unwrap();
    write_u32(buf, 4).unwrap();
    write_u16(buf, module_id).unwrap();
    write_u16(buf, segment_id).unwrap();
    write_u64(buf, edges.0).unwrap();
    write_u64(buf, edges.1).unwrap();
    write_u64(buf, nb_taken).unwrap();
}

fn edge(buf: &mut Vec<u8>, dst_block_id: u64, nb_taken: u64) {
    write_u64(buf, dst_block_id).unwrap();
    write_u64(buf, nb_taken).unwrap();
}

/// Lays out hand-encoded chunks contiguously behind a header.
struct RawFile {
    nb_modules: u16,
    nb_blocks: u64,
    nb_edges: u64,
    modules: Vec<u8>,
    paths: Vec<u8>,
    blocks: Vec<u8>,
    edges: Option<Vec<u8>>,
}

impl RawFile {
    fn new() -> Self {
        let mut modules = Vec::new();
        module(&mut modules, 0x1000, -1, &[(0, 0x100)]);
        Self {
            nb_modules: 1,
            nb_blocks: 0,
            nb_edges: 0,
            modules,
            paths: Vec::new(),
            blocks: Vec::new(),
            edges: None,
        }
    }

    fn header(&self) -> Header {
        let modules_start = Header::SIZE as u64;
        let paths_start = modules_start + self.modules.len() as u64;
        let blocks_start = paths_start + self.paths.len() as u64;
        let edges_start = blocks_start + self.blocks.len() as u64;

        Header {
            version_major: ALCOV_VERSION_MAJOR,
            version_minor: ALCOV_VERSION_MINOR,
            nb_modules: self.nb_modules,
            nb_blocks: self.nb_blocks,
            nb_edges: self.nb_edges,
            modules_start,
            paths_start,
            blocks_start,
            edges_start,
            flags: if self.edges.is_some() {
                Flags::EDGES
            } else {
                Flags::empty()
            },
        }
    }

    fn encode_with(&self, header: &Header) -> Vec<u8> {
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        buf.extend_from_slice(&self.modules);
        buf.extend_from_slice(&self.paths);
        buf.extend_from_slice(&self.blocks);
        if let Some(edges) = &self.edges {
            buf.extend_from_slice(edges);
        }
        buf
    }

    fn encode(&self) -> Vec<u8> {
        self.encode_with(&self.header())
    }
}

fn parse_err(buf: &[u8]) -> AlcovErrorKind {
    CoverageGraph::parse(buf).unwrap_err().kind()
}

fn sample_graph() -> CoverageGraph {
    let mut paths = PathTable::with_input("/corpus/input").unwrap();
    let offset = paths.insert("/bin/target").unwrap();
    let modules = vec![
        Module::new(0x5555_0000, Some(offset), vec![Segment::new(0, 0x1000)]).unwrap(),
        Module::new(0x7f00_0000, None, vec![Segment::new(0, 0x10), Segment::new(0x10, 0x10)])
            .unwrap(),
    ];
    let mut blocks = vec![
        Block::new(0, 0, 0, 4),
        Block::new(1, 1, 4, 4),
        Block::new(1, 0, 0, 2),
    ];
    blocks[1].nb_taken = 12;
    let edges = vec![
        vec![OutEdge::new(1, 1), OutEdge::new(2, 3)],
        vec![],
        vec![OutEdge::new(0, 9)],
    ];
    CoverageGraph::new(paths, modules, blocks, Some(edges)).unwrap()
}

#[test]
fn test_bad_magic() {
    let mut buf = sample_graph().to_bytes().unwrap();
    buf[0] = b'A';
    assert_eq!(parse_err(&buf), AlcovErrorKind::BadMagic);

    assert_eq!(parse_err(b"\x7fELF\x02\x01\x01\x00"), AlcovErrorKind::BadMagic);
}

#[test]
fn test_unsupported_version() {
    let file = RawFile::new();
    let mut header = file.header();
    header.version_major = 3;
    assert_eq!(
        parse_err(&file.encode_with(&header)),
        AlcovErrorKind::UnsupportedVersion(3)
    );
}

#[test]
fn test_truncated_prefixes() {
    let buf = sample_graph().to_bytes().unwrap();
    CoverageGraph::parse(&buf).unwrap();

    for len in 0..buf.len() {
        assert_eq!(
            parse_err(&buf[..len]),
            AlcovErrorKind::TruncatedInput,
            "length {len}"
        );
    }
}

#[test]
fn test_truncated_prefixes_without_edges() {
    let graph = sample_graph();
    let graph = CoverageGraph::new(
        graph.paths().clone(),
        graph.modules().to_vec(),
        graph.blocks().to_vec(),
        None,
    )
    .unwrap();
    let buf = graph.to_bytes().unwrap();

    for len in 0..buf.len() {
        assert_eq!(
            parse_err(&buf[..len]),
            AlcovErrorKind::TruncatedInput,
            "length {len}"
        );
    }
}

#[test]
fn test_truncated_prefixes_compressed() {
    let graph = sample_graph();
    let compressors: [&dyn Compressor; 2] = [&Lzma2, &Zlib::default()];

    for compressor in compressors {
        let mut buf = Vec::new();
        graph.serialize_compressed(&mut buf, compressor).unwrap();
        assert_eq!(CoverageGraph::parse_with(&buf, compressor).unwrap(), graph);

        for len in 0..buf.len() {
            assert_eq!(
                CoverageGraph::parse_with(&buf[..len], compressor)
                    .unwrap_err()
                    .kind(),
                AlcovErrorKind::TruncatedInput,
                "length {len}"
            );
        }
    }
}

#[test]
fn test_compressed_chunk_longer_than_needed() {
    let mut records = Vec::new();
    block(&mut records, 0, 0, (0, 0), 3);
    records.resize(1 << 20, 0xab);

    let mut file = RawFile::new();
    file.nb_blocks = 1;
    file.blocks = Lzma2.compress(&records).unwrap();
    let mut header = file.header();
    header.flags |= Flags::COMPRESS;

    let graph = CoverageGraph::parse(&file.encode_with(&header)).unwrap();
    assert_eq!(graph.blocks().len(), 1);
    assert_eq!(graph.blocks()[0].nb_taken, 3);
}

#[test]
fn test_empty_segment_list() {
    let mut file = RawFile::new();
    file.modules.clear();
    module(&mut file.modules, 0x1000, -1, &[]);
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::EmptySegmentList);
}

#[test]
fn test_module_chunk_too_short() {
    let mut file = RawFile::new();
    file.nb_modules = 2;
    file.paths = b"/bin/a\0".to_vec();
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::TruncatedInput);
}

#[test]
fn test_unresolved_refs() {
    let mut file = RawFile::new();
    file.nb_blocks = 1;
    block(&mut file.blocks, 1, 0, (0, 0), 1);
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::UnresolvedModuleRef);

    let mut file = RawFile::new();
    file.nb_blocks = 1;
    block(&mut file.blocks, 0, 1, (0, 0), 1);
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::UnresolvedSegmentRef);
}

#[test]
fn test_path_offsets() {
    let mut file = RawFile::new();
    file.modules.clear();
    module(&mut file.modules, 0x1000, 8, &[(0, 1)]);
    file.paths = b"/bin/a\0".to_vec();
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::InvalidOffset);

    let mut file = RawFile::new();
    file.modules.clear();
    module(&mut file.modules, 0x1000, -5, &[(0, 1)]);
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::InvalidOffset);

    // a path running into the next chunk is not terminated
    let mut file = RawFile::new();
    file.modules.clear();
    module(&mut file.modules, 0x1000, 0, &[(0, 1)]);
    file.paths = b"/bin/a".to_vec();
    file.nb_blocks = 1;
    block(&mut file.blocks, 0, 0, (0, 0), 0);
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::InvalidOffset);

    let mut file = RawFile::new();
    file.modules.clear();
    module(&mut file.modules, 0x1000, 0, &[(0, 1)]);
    file.paths = b"\xff\xfe\0".to_vec();
    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::InvalidPath);
}

#[test]
fn test_chunk_offsets() {
    let file = RawFile::new();
    let mut header = file.header();
    header.paths_start = 12;
    assert_eq!(
        parse_err(&file.encode_with(&header)),
        AlcovErrorKind::InvalidOffset
    );

    let mut header = file.header();
    header.blocks_start = u64::MAX;
    assert_eq!(
        parse_err(&file.encode_with(&header)),
        AlcovErrorKind::TruncatedInput
    );
}

#[test]
fn test_dangling_edge() {
    let mut file = RawFile::new();
    file.nb_blocks = 2;
    file.nb_edges = 1;
    block(&mut file.blocks, 0, 0, (1, 0), 1);
    block(&mut file.blocks, 0, 0, (0, 0), 0);
    let mut edges = Vec::new();
    edge(&mut edges, 2, 1);
    file.edges = Some(edges);

    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::DanglingEdgeRef);
}

#[test]
fn test_overlapping_edges() {
    let mut file = RawFile::new();
    file.nb_blocks = 2;
    file.nb_edges = 3;
    block(&mut file.blocks, 0, 0, (2, 0), 1);
    block(&mut file.blocks, 0, 0, (1, 16), 1);
    let mut edges = Vec::new();
    edge(&mut edges, 1, 1);
    edge(&mut edges, 0, 1);
    file.edges = Some(edges);

    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::OverlappingEdgeRange);
}

#[test]
fn test_aliased_edge_ranges() {
    // every block claims the same 256 records
    let mut file = RawFile::new();
    file.nb_blocks = 500;
    file.nb_edges = 500 * 256;
    for _ in 0..500 {
        block(&mut file.blocks, 0, 0, (256, 0), 0);
    }
    let mut edges = Vec::new();
    for _ in 0..256 {
        edge(&mut edges, 0, 1);
    }
    file.edges = Some(edges);

    assert_eq!(parse_err(&file.encode()), AlcovErrorKind::OverlappingEdgeRange);
}

#[test]
fn test_edge_count_mismatch() {
    let mut file = RawFile::new();
    file.nb_blocks = 1;
    file.nb_edges = 2;
    block(&mut file.blocks, 0, 0, (1, 0), 1);
    let mut edges = Vec::new();
    edge(&mut edges, 0, 1);
    edge(&mut edges, 0, 1);
    file.edges = Some(edges);

    assert_eq!(
        parse_err(&file.encode()),
        AlcovErrorKind::EdgeCountMismatch {
            expected: 2,
            found: 1
        }
    );
}

#[test]
fn test_edge_fields_ignored_without_flag() {
    let mut file = RawFile::new();
    file.nb_blocks = 1;
    file.nb_edges = 99;
    block(&mut file.blocks, 0, 0, (7, 0xdead), 1);

    let graph = CoverageGraph::parse(&file.encode()).unwrap();
    assert!(!graph.has_edges());
    assert_eq!(graph.nb_edges(), 0);
    assert!(graph.out_edges(0).is_empty());
}

#[test]
fn test_reordered_chunks() {
    let graph = sample_graph();
    let buf = graph.to_bytes().unwrap();
    let header = Header::parse(&buf).unwrap();

    let chunk = |start: u64, end: u64| &buf[start as usize..end as usize];
    let modules = chunk(header.modules_start, header.paths_start);
    let paths = chunk(header.paths_start, header.blocks_start);
    let blocks = chunk(header.blocks_start, header.edges_start);
    let edges = chunk(header.edges_start, buf.len() as u64);

    // edges, blocks, paths and modules in reverse, with a gap after the edges
    let mut reordered = Vec::new();
    let mut header = header.clone();
    reordered.resize(Header::SIZE, 0);
    header.edges_start = reordered.len() as u64;
    reordered.extend_from_slice(edges);
    reordered.extend_from_slice(&[0xcc; 5]);
    header.blocks_start = reordered.len() as u64;
    reordered.extend_from_slice(blocks);
    header.paths_start = reordered.len() as u64;
    reordered.extend_from_slice(paths);
    header.modules_start = reordered.len() as u64;
    reordered.extend_from_slice(modules);

    let mut header_bytes = Vec::new();
    header.write(&mut header_bytes).unwrap();
    reordered[..Header::SIZE].copy_from_slice(&header_bytes);

    let parsed = CoverageGraph::parse(&reordered).unwrap();
    assert_eq!(parsed, graph);
}

#[test]
fn test_compression_failure() {
    let graph = sample_graph();
    let mut buf = Vec::new();
    graph.serialize_compressed(&mut buf, &Zlib::default()).unwrap();

    assert_eq!(
        CoverageGraph::parse_with(&buf, &Lzma2).unwrap_err().kind(),
        AlcovErrorKind::CompressionFailure
    );
}

#[test]
fn test_encode_contract() {
    let module = Module::new(0, Some(1000), vec![Segment::new(0, 1)]).unwrap();
    assert_eq!(
        CoverageGraph::new(PathTable::new(), vec![module], vec![], None)
            .unwrap_err()
            .kind(),
        AlcovErrorKind::InvalidOffset
    );

    let module = Module::new(0, None, vec![Segment::new(0, 1)]).unwrap();
    let too_many = vec![module; u16::MAX as usize + 1];
    assert_eq!(
        CoverageGraph::new(PathTable::new(), too_many, vec![], None)
            .unwrap_err()
            .kind(),
        AlcovErrorKind::TooManyValues(alcov::ValueKind::Module)
    );
}
