use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    blockinfo::{partition, BlockInfo},
    error::peer::{PeerError, Result},
    PieceIndex,
};

/// Reassembles one piece from its blocks.
///
/// Blocks are handed out in ascending offset order. A block is only
/// accepted if it exactly matches a request that was handed out and not
/// yet answered, anything else is ignored.
#[derive(Debug)]
pub struct PieceBuffer {
    index: PieceIndex,
    data: Vec<u8>,
    unissued: VecDeque<BlockInfo>,
    pending: Vec<BlockInfo>,
}

impl PieceBuffer {
    pub fn new(index: PieceIndex, len: u32) -> Self {
        Self {
            index,
            data: vec![0; len as usize],
            unissued: partition(index, len).collect(),
            pending: Vec::new(),
        }
    }

    pub fn index(&self) -> PieceIndex {
        self.index
    }

    /// Moves the next unissued block to pending and returns it.
    pub fn next_block(&mut self) -> Option<BlockInfo> {
        let block = self.unissued.pop_front()?;
        self.pending.push(block);
        Some(block)
    }

    pub fn has_unissued(&self) -> bool {
        !self.unissued.is_empty()
    }

    /// Blocks requested but not yet received.
    pub fn pending(&self) -> &[BlockInfo] {
        &self.pending
    }

    /// Copies the block into the piece if it answers a pending request.
    /// Returns whether it did.
    pub fn accept_block(&mut self, offset: u32, data: &[u8]) -> bool {
        let Some(pos) = self
            .pending
            .iter()
            .position(|b| b.offset == offset && b.len as usize == data.len())
        else {
            return false;
        };
        self.pending.swap_remove(pos);
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.unissued.is_empty() && self.pending.is_empty()
    }

    /// The assembled piece. Only meaningful once complete.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// The queued requests of a remote peer against one of our pieces.
#[derive(Debug)]
pub struct UploadBuffer {
    index: PieceIndex,
    data: Bytes,
    requests: VecDeque<BlockInfo>,
}

impl UploadBuffer {
    pub fn new(index: PieceIndex, data: Bytes) -> Self {
        Self {
            index,
            data,
            requests: VecDeque::new(),
        }
    }

    pub fn index(&self) -> PieceIndex {
        self.index
    }

    /// Queues a request, which must lie within the piece.
    pub fn add_request(&mut self, block: BlockInfo) -> Result<()> {
        if block.len == 0 || block.end() > self.data.len() as u64 {
            return Err(PeerError::InvalidBlockInfo);
        }
        self.requests.push_back(block);
        Ok(())
    }

    /// Drops a queued request. Returns whether one was found.
    pub fn remove_request(&mut self, block: &BlockInfo) -> bool {
        match self.requests.iter().position(|b| b == block) {
            Some(pos) => {
                self.requests.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Dequeues the oldest request along with the bytes that answer it.
    pub fn next_block(&mut self) -> Option<(BlockInfo, Bytes)> {
        let block = self.requests.pop_front()?;
        let start = block.offset as usize;
        let data = self.data.slice(start..start + block.len as usize);
        Some((block, data))
    }
}
