//! First-fit allocator with coalescing-on-free, embedded in the region.
//!
//! The free list is a singly-linked list of node descriptors ordered by
//! ascending offset. Acquisition walks it first-fit; release inserts in
//! offset order and merges with adjacent neighbors immediately, so the
//! list never holds two adjacent extents. Watermark growth is deferred
//! to the caller's commit step.

use crate::error::{Result, SeineError};
use crate::layout::{self, Header, Node, HEADER_SIZE, NODE_SIZE, NIL};

/// Where an acquired extent came from.
///
/// Rolling back a free-list acquisition re-releases the original extent;
/// a high-water acquisition needs no rollback because the watermark only
/// moves at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Space carved out of the free list.
    FreeList {
        offset: i64,
        /// Extent to hand back on rollback (descriptor included).
        rollback_extent: i64,
    },
    /// Space claimed past the high-water mark.
    HighWater { offset: i64 },
    /// Neither the free list nor the remaining capacity can serve it.
    OutOfSpace,
}

impl Reservation {
    /// The reserved offset, if space was found.
    pub fn offset(&self) -> Option<i64> {
        match *self {
            Reservation::FreeList { offset, .. } | Reservation::HighWater { offset } => {
                Some(offset)
            }
            Reservation::OutOfSpace => None,
        }
    }
}

/// Upper bound on list length for a well-formed region; used to detect
/// cycles introduced by corruption.
fn walk_limit(header: &Header) -> i64 {
    (header.total_space - HEADER_SIZE) / NODE_SIZE + 1
}

/// Reserve space for a `data_len`-byte payload.
///
/// Walks the free list first-fit. A node with payload length `L`
/// qualifies when it matches exactly, is large enough to split off a
/// descriptor-bearing remainder, or sits at the high-water mark with the
/// request extending past it. Falls back to the watermark itself when no
/// node qualifies.
pub fn acquire(region: &mut [u8], header: &mut Header, data_len: i64) -> Result<Reservation> {
    let limit = walk_limit(header);
    let mut steps = 0i64;
    let mut prev: Option<i64> = None;
    let mut cur = header.free_list_node;

    while cur != NIL {
        steps += 1;
        if steps > limit {
            return Err(SeineError::corrupted("free list does not terminate"));
        }
        let node = layout::read_node(region, cur)?;
        let exact = node.length == data_len;
        let large = node.length >= data_len + NODE_SIZE;
        let rightmost = node.end(cur) >= header.total_space && data_len > node.length;

        if exact || large || rightmost {
            if rightmost && cur + NODE_SIZE + data_len > header.capacity {
                return Ok(Reservation::OutOfSpace);
            }
            let successor = if large {
                // Split: the remainder keeps its own descriptor and the
                // chosen node's link.
                let split = cur + NODE_SIZE + data_len;
                layout::write_node(
                    region,
                    split,
                    &Node {
                        next: node.next,
                        length: node.length - data_len - NODE_SIZE,
                    },
                )?;
                split
            } else {
                node.next
            };
            match prev {
                Some(p) => {
                    let mut prev_node = layout::read_node(region, p)?;
                    prev_node.next = successor;
                    layout::write_node(region, p, &prev_node)?;
                }
                None => header.free_list_node = successor,
            }
            let rollback_extent = NODE_SIZE + node.length.min(data_len);
            return Ok(Reservation::FreeList {
                offset: cur,
                rollback_extent,
            });
        }

        prev = Some(cur);
        cur = node.next;
    }

    if header.total_space + NODE_SIZE + data_len <= header.capacity {
        Ok(Reservation::HighWater {
            offset: header.total_space,
        })
    } else {
        Ok(Reservation::OutOfSpace)
    }
}

/// Return the extent `[offset, offset + extent)` to the free list,
/// merging with adjacent free neighbors. `extent` counts the descriptor.
pub fn release(region: &mut [u8], header: &mut Header, offset: i64, extent: i64) -> Result<()> {
    let limit = walk_limit(header);
    let mut steps = 0i64;
    let mut prev: Option<i64> = None;
    let mut succ = header.free_list_node;

    while succ != NIL && succ < offset {
        steps += 1;
        if steps > limit {
            return Err(SeineError::corrupted("free list does not terminate"));
        }
        let node = layout::read_node(region, succ)?;
        prev = Some(succ);
        succ = node.next;
    }

    let prev_node = match prev {
        Some(p) => Some((p, layout::read_node(region, p)?)),
        None => None,
    };
    let succ_node = if succ != NIL {
        Some((succ, layout::read_node(region, succ)?))
    } else {
        None
    };

    // A merged-in extent contributes its full byte count to the growing
    // neighbor; only a fresh node spends 16 bytes of its extent on a
    // descriptor of its own.
    let joins_prev = prev_node.filter(|(p, n)| n.end(*p) == offset);
    let joins_succ = succ_node.filter(|(s, _)| offset + extent == *s);

    match (joins_prev, joins_succ) {
        (Some((p, mut pn)), Some((_, sn))) => {
            pn.length += extent + NODE_SIZE + sn.length;
            pn.next = sn.next;
            layout::write_node(region, p, &pn)?;
        }
        (Some((p, mut pn)), None) => {
            pn.length += extent;
            layout::write_node(region, p, &pn)?;
        }
        (None, Some((s, sn))) => {
            layout::write_node(
                region,
                offset,
                &Node {
                    next: sn.next,
                    length: extent + sn.length,
                },
            )?;
            relink(region, header, prev, offset)?;
        }
        (None, None) => {
            layout::write_node(
                region,
                offset,
                &Node {
                    next: succ,
                    length: extent - NODE_SIZE,
                },
            )?;
            relink(region, header, prev, offset)?;
        }
    }
    Ok(())
}

fn relink(region: &mut [u8], header: &mut Header, prev: Option<i64>, target: i64) -> Result<()> {
    match prev {
        Some(p) => {
            let mut prev_node = layout::read_node(region, p)?;
            prev_node.next = target;
            layout::write_node(region, p, &prev_node)
        }
        None => {
            header.free_list_node = target;
            Ok(())
        }
    }
}
