//! Shared helpers for the region-level integration tests.

use seine::layout::{self, HEADER_SIZE, NIL};

/// Build a formatted in-memory region of `capacity` bytes.
pub fn fresh_region(capacity: i64) -> Vec<u8> {
    let mut region = vec![0u8; capacity as usize];
    layout::format(&mut region, capacity).unwrap();
    region
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Active,
    Free,
}

/// Walk both embedded lists and assert the structural invariants:
/// header consistency, ascending non-adjacent free list, and exact
/// tiling of `[48, total_space)` by active plus free extents.
pub fn audit(region: &[u8]) {
    let header = layout::read_header(region).unwrap();
    header.validate().unwrap();

    let mut extents: Vec<(i64, i64, Kind)> = Vec::new();

    let mut cur = header.head_node;
    let mut count = 0;
    while cur != NIL {
        let node = layout::read_node(region, cur).unwrap();
        extents.push((cur, node.end(cur), Kind::Active));
        count += 1;
        assert!(
            count <= header.active_nodes,
            "active list longer than active_nodes"
        );
        if node.next == NIL {
            assert_eq!(cur, header.tail_node, "active list must end at the tail");
        }
        cur = node.next;
    }
    assert_eq!(count, header.active_nodes);

    let mut cur = header.free_list_node;
    let mut last = NIL;
    let mut steps = 0;
    while cur != NIL {
        steps += 1;
        assert!(steps < 100_000, "free list does not terminate");
        assert!(cur > last, "free list offsets must strictly ascend");
        let node = layout::read_node(region, cur).unwrap();
        extents.push((cur, node.end(cur), Kind::Free));
        last = cur;
        cur = node.next;
    }

    extents.sort_by_key(|e| e.0);
    let mut expected = HEADER_SIZE;
    let mut prev_free = false;
    for (start, end, kind) in &extents {
        assert_eq!(*start, expected, "gap or overlap at offset {}", start);
        assert!(end > start, "empty extent at offset {}", start);
        let is_free = *kind == Kind::Free;
        assert!(!(prev_free && is_free), "adjacent free nodes at {}", start);
        prev_free = is_free;
        expected = *end;
    }
    assert_eq!(
        expected, header.total_space,
        "extents must tile up to the watermark"
    );
    assert!(header.total_space <= header.capacity);
}

/// Small deterministic generator for randomized interleavings.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(2862933555777941757).wrapping_add(3037000493))
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 17
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next() % bound
    }
}
