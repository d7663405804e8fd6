//! Integration tests for the embedded allocator, driven through the
//! queue operations against an in-memory region.

mod common;

use common::{audit, fresh_region, Lcg};
use seine::layout::{self, HEADER_SIZE, NODE_SIZE, NIL};
use seine::queue::{self, SliceWriter, VecReader};
use seine::OpStatus;

fn write_bytes(region: &mut [u8], payload: &[u8]) -> OpStatus {
    let (status, _) = queue::write(
        region,
        payload.len() as i64,
        &mut SliceWriter::new(payload),
    )
    .unwrap();
    status
}

fn read_bytes(region: &mut [u8]) -> (OpStatus, Vec<u8>) {
    let mut out = Vec::new();
    let (status, _) = queue::read(region, &mut VecReader::new(&mut out)).unwrap();
    (status, out)
}

#[test]
fn exact_match_reuses_freed_extent() {
    let mut region = fresh_region(4096);
    assert_eq!(write_bytes(&mut region, b"aaaaa"), OpStatus::Completed);
    assert_eq!(write_bytes(&mut region, b"bbbbb"), OpStatus::Completed);
    let snapshot = queue::state(&region).unwrap().total_space;

    let (status, payload) = read_bytes(&mut region);
    assert_eq!(status, OpStatus::Completed);
    assert_eq!(payload, b"aaaaa");
    audit(&region);

    assert_eq!(write_bytes(&mut region, b"ccccc"), OpStatus::Completed);
    let state = queue::state(&region).unwrap();
    assert_eq!(state.total_space, snapshot);
    assert_eq!(state.active_messages, 2);
    audit(&region);

    // FIFO order survives the reuse.
    assert_eq!(read_bytes(&mut region).1, b"bbbbb");
    assert_eq!(read_bytes(&mut region).1, b"ccccc");
}

#[test]
fn split_reuse_leaves_zero_length_remainder() {
    let mut region = fresh_region(4096);
    assert_eq!(write_bytes(&mut region, &[1u8; 16]), OpStatus::Completed);
    assert_eq!(write_bytes(&mut region, &[2u8; 16]), OpStatus::Completed);
    let snapshot = queue::state(&region).unwrap().total_space;

    read_bytes(&mut region);
    audit(&region);

    // A zero-length message splits the freed 32-byte extent: 16 bytes of
    // descriptor, and a free remainder whose payload length is zero.
    assert_eq!(write_bytes(&mut region, b""), OpStatus::Completed);
    let state = queue::state(&region).unwrap();
    assert_eq!(state.total_space, snapshot);
    assert_eq!(state.active_messages, 2);

    let header = layout::read_header(&region).unwrap();
    assert_eq!(header.free_list_node, HEADER_SIZE + NODE_SIZE);
    let remainder = layout::read_node(&region, header.free_list_node).unwrap();
    assert_eq!(remainder.length, 0);
    assert_eq!(remainder.next, NIL);
    audit(&region);
}

#[test]
fn rightmost_reuse_grows_by_exactly_the_spill() {
    let mut region = fresh_region(4096);
    assert_eq!(write_bytes(&mut region, b"aaaaa"), OpStatus::Completed);
    read_bytes(&mut region);
    audit(&region);

    // The freed extent ends at the watermark; a 6-byte message consumes
    // it whole and spills exactly one byte past the old mark.
    let before = queue::state(&region).unwrap().total_space;
    assert_eq!(write_bytes(&mut region, b"bbbbbb"), OpStatus::Completed);
    let state = queue::state(&region).unwrap();
    assert_eq!(state.total_space, before + 1);
    assert_eq!(state.active_messages, 1);
    audit(&region);

    assert_eq!(read_bytes(&mut region).1, b"bbbbbb");
}

#[test]
fn interior_free_node_is_not_stretched() {
    let mut region = fresh_region(4096);
    assert_eq!(write_bytes(&mut region, b"aaaaa"), OpStatus::Completed);
    assert_eq!(write_bytes(&mut region, b"bbbbb"), OpStatus::Completed);
    let snapshot = queue::state(&region).unwrap().total_space;

    // Frees the first extent, which no longer touches the watermark.
    read_bytes(&mut region);

    // A 6-byte message cannot use the 5-byte interior hole; it must go
    // to the watermark and leave the hole on the free list.
    assert_eq!(write_bytes(&mut region, b"cccccc"), OpStatus::Completed);
    let state = queue::state(&region).unwrap();
    assert_eq!(state.total_space, snapshot + NODE_SIZE + 6);
    let header = layout::read_header(&region).unwrap();
    assert_eq!(header.free_list_node, HEADER_SIZE);
    audit(&region);
}

#[test]
fn out_of_space_leaves_header_untouched() {
    let mut region = fresh_region(128);
    let before = layout::read_header(&region).unwrap();
    // 128 - 48 = 80 available; 65 bytes of payload needs 81.
    assert_eq!(write_bytes(&mut region, &[0u8; 65]), OpStatus::OutOfSpace);
    assert_eq!(layout::read_header(&region).unwrap(), before);
    audit(&region);

    assert_eq!(write_bytes(&mut region, &[0u8; 64]), OpStatus::Completed);
    audit(&region);
}

#[test]
fn draining_restores_one_spanning_free_node() {
    let mut region = fresh_region(8192);
    let payloads: &[&[u8]] = &[b"first", b"", b"a longer third message", b"x"];
    for payload in payloads {
        assert_eq!(write_bytes(&mut region, payload), OpStatus::Completed);
    }
    let total_space = queue::state(&region).unwrap().total_space;

    for expected in payloads {
        let (status, payload) = read_bytes(&mut region);
        assert_eq!(status, OpStatus::Completed);
        assert_eq!(&payload, expected);
        audit(&region);
    }

    // Everything freed and coalesced: one node spanning the used area.
    let header = layout::read_header(&region).unwrap();
    assert_eq!(header.active_nodes, 0);
    assert_eq!(header.head_node, NIL);
    assert_eq!(header.tail_node, NIL);
    assert_eq!(header.free_list_node, HEADER_SIZE);
    let free = layout::read_node(&region, HEADER_SIZE).unwrap();
    assert_eq!(free.next, NIL);
    assert_eq!(free.end(HEADER_SIZE), total_space);
}

#[test]
fn randomized_interleaving_preserves_invariants() {
    let mut region = fresh_region(1 << 16);
    let mut rng = Lcg::new(0x5EED);
    let mut expected: std::collections::VecDeque<Vec<u8>> = Default::default();

    for round in 0..2000usize {
        let write = expected.is_empty() || rng.below(10) < 6;
        if write {
            let len = rng.below(200) as usize;
            let payload: Vec<u8> = (0..len).map(|i| (round + i) as u8).collect();
            match write_bytes(&mut region, &payload) {
                OpStatus::Completed => expected.push_back(payload),
                OpStatus::OutOfSpace => {
                    // Drain one and retry later; the header must be intact.
                    audit(&region);
                }
                other => panic!("unexpected write status {:?}", other),
            }
        } else {
            let (status, payload) = read_bytes(&mut region);
            assert_eq!(status, OpStatus::Completed);
            assert_eq!(payload, expected.pop_front().unwrap());
        }
        if round % 64 == 0 {
            audit(&region);
        }
    }

    while let Some(want) = expected.pop_front() {
        let (status, payload) = read_bytes(&mut region);
        assert_eq!(status, OpStatus::Completed);
        assert_eq!(payload, want);
    }
    audit(&region);
}
