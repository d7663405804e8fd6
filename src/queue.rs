//! FIFO queue operations over a formatted region.
//!
//! `write` appends at the active-list tail, `read` consumes from the
//! head, `state` projects the header. Both data operations hand the user
//! callback a byte window over the payload and commit or roll back on
//! the status it returns. Callers serialize these functions under the
//! channel's exclusive-access lock; the functions themselves only see a
//! byte slice, which is what lets the tests drive them against plain
//! vectors.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::allocator::{self, Reservation};
use crate::error::{OpStatus, Result};
use crate::layout::{self, Header, Node, NODE_SIZE, NIL};

/// Snapshot of a channel's header, taken under the exclusive-access lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelState {
    /// Total bytes the region may use.
    pub capacity: i64,
    /// Messages currently queued.
    pub active_messages: i64,
    /// High-water mark of the embedded allocator.
    pub total_space: i64,
}

impl ChannelState {
    fn of(header: &Header) -> Self {
        Self {
            capacity: header.capacity,
            active_messages: header.active_nodes,
            total_space: header.total_space,
        }
    }
}

/// Producer-side callback: fill the window, report a status.
///
/// `Cancelled` and `DelegateFailed` abandon the message and return its
/// space; any other status commits it.
pub trait WriteOp {
    fn fill(&mut self, window: &mut [u8]) -> OpStatus;
}

impl<F> WriteOp for F
where
    F: FnMut(&mut [u8]) -> OpStatus,
{
    fn fill(&mut self, window: &mut [u8]) -> OpStatus {
        self(window)
    }
}

/// Consumer-side callback: inspect the window, report a status.
///
/// `Cancelled` and `DelegateFailed` leave the message at the head; any
/// other status consumes it.
pub trait ReadOp {
    fn consume(&mut self, window: &[u8]) -> OpStatus;
}

impl<F> ReadOp for F
where
    F: FnMut(&[u8]) -> OpStatus,
{
    fn consume(&mut self, window: &[u8]) -> OpStatus {
        self(window)
    }
}

/// Writer that copies a borrowed payload into the window.
#[derive(Debug)]
pub struct SliceWriter<'a> {
    data: &'a [u8],
}

impl<'a> SliceWriter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl WriteOp for SliceWriter<'_> {
    fn fill(&mut self, window: &mut [u8]) -> OpStatus {
        if window.len() != self.data.len() {
            return OpStatus::DelegateFailed;
        }
        window.copy_from_slice(self.data);
        OpStatus::Completed
    }
}

/// Reader that appends the window's bytes onto a borrowed buffer.
#[derive(Debug)]
pub struct VecReader<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> VecReader<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }
}

impl ReadOp for VecReader<'_> {
    fn consume(&mut self, window: &[u8]) -> OpStatus {
        self.buf.extend_from_slice(window);
        OpStatus::Completed
    }
}

/// Byte range of a node's payload, or the status explaining why the
/// window cannot be opened.
fn payload_range(
    region_len: usize,
    offset: i64,
    length: i64,
) -> std::result::Result<Range<usize>, OpStatus> {
    let start = usize::try_from(offset + NODE_SIZE)
        .map_err(|_| OpStatus::LengthExceedsLogicalAddressSpace)?;
    let len = usize::try_from(length).map_err(|_| OpStatus::LengthExceedsLogicalAddressSpace)?;
    let end = start
        .checked_add(len)
        .ok_or(OpStatus::LengthExceedsLogicalAddressSpace)?;
    if end > region_len {
        return Err(OpStatus::LengthExceedsVirtualAddressSpace);
    }
    Ok(start..end)
}

/// Append a `length`-byte message filled by `op`.
pub fn write(
    region: &mut [u8],
    length: i64,
    op: &mut dyn WriteOp,
) -> Result<(OpStatus, ChannelState)> {
    if length < 0 {
        return Err(crate::error::SeineError::invalid_parameter(
            "length",
            "message length cannot be negative",
        ));
    }
    let mut header = layout::read_header(region)?;
    header.validate()?;

    let (offset, rollback) = match allocator::acquire(region, &mut header, length)? {
        Reservation::OutOfSpace => {
            layout::write_header(region, &header)?;
            return Ok((OpStatus::OutOfSpace, ChannelState::of(&header)));
        }
        Reservation::FreeList {
            offset,
            rollback_extent,
        } => (offset, Some(rollback_extent)),
        Reservation::HighWater { offset } => (offset, None),
    };

    let range = match payload_range(region.len(), offset, length) {
        Ok(range) => range,
        Err(status) => {
            if let Some(extent) = rollback {
                allocator::release(region, &mut header, offset, extent)?;
            }
            layout::write_header(region, &header)?;
            return Ok((status, ChannelState::of(&header)));
        }
    };

    let status = op.fill(&mut region[range]);
    if status.rolls_back() {
        if let Some(extent) = rollback {
            allocator::release(region, &mut header, offset, extent)?;
        }
        layout::write_header(region, &header)?;
        return Ok((status, ChannelState::of(&header)));
    }

    layout::write_node(region, offset, &Node { next: NIL, length })?;
    if header.tail_node != NIL {
        let mut tail = layout::read_node(region, header.tail_node)?;
        tail.next = offset;
        layout::write_node(region, header.tail_node, &tail)?;
    }
    header.tail_node = offset;
    if header.head_node == NIL {
        header.head_node = offset;
    }
    header.active_nodes += 1;
    let grown = offset + NODE_SIZE + length - header.total_space;
    if grown > 0 {
        header.total_space += grown;
    }
    layout::write_header(region, &header)?;
    Ok((status, ChannelState::of(&header)))
}

/// Consume the oldest message, handing its payload to `op`.
pub fn read(region: &mut [u8], op: &mut dyn ReadOp) -> Result<(OpStatus, ChannelState)> {
    let mut header = layout::read_header(region)?;
    header.validate()?;

    if header.head_node == NIL {
        return Ok((OpStatus::QueueIsEmpty, ChannelState::of(&header)));
    }
    let head = header.head_node;
    let node = layout::read_node(region, head)?;

    let range = match payload_range(region.len(), head, node.length) {
        Ok(range) => range,
        Err(status) => return Ok((status, ChannelState::of(&header))),
    };

    let status = op.consume(&region[range]);
    if status.rolls_back() {
        layout::write_header(region, &header)?;
        return Ok((status, ChannelState::of(&header)));
    }

    header.head_node = node.next;
    header.active_nodes -= 1;
    if header.head_node == NIL {
        // Keeps head, tail, and the count in agreement when the queue
        // drains.
        header.tail_node = NIL;
    }
    allocator::release(region, &mut header, head, NODE_SIZE + node.length)?;
    layout::write_header(region, &header)?;
    Ok((status, ChannelState::of(&header)))
}

/// Project the header into a [`ChannelState`].
pub fn state(region: &[u8]) -> Result<ChannelState> {
    let header = layout::read_header(region)?;
    header.validate()?;
    Ok(ChannelState::of(&header))
}
