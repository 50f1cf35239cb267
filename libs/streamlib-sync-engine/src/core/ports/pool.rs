// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed-depth pool of output segments using crossbeam ArrayQueue.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::core::error::{EngineError, Result};
use crate::core::metadata::DropReason;
use crate::core::stream::{ChannelArena, StreamSegment};

#[derive(Debug)]
struct PoolInner {
    queue: ArrayQueue<StreamSegment>,
    num_channels: usize,
    capacity: usize,
}

/// Output segments preallocated for one external output port.
///
/// Acquire never blocks. An empty pool returns `NeedMore` and the host
/// retries on its own schedule.
#[derive(Debug, Clone)]
pub struct OutputPool {
    inner: Arc<PoolInner>,
}

impl OutputPool {
    pub fn new(depth: usize, num_channels: usize, capacity: usize) -> Result<Self> {
        if depth == 0 {
            return Err(EngineError::Configuration(
                "output pool depth must be at least 1".into(),
            ));
        }
        let queue = ArrayQueue::new(depth);
        for _ in 0..depth {
            let segment = StreamSegment {
                buffers: ChannelArena::try_new(num_channels, capacity)?,
                ..Default::default()
            };
            // The queue was sized for exactly `depth` entries.
            let _ = queue.push(segment);
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                queue,
                num_channels,
                capacity,
            }),
        })
    }

    pub fn acquire(&self) -> Result<PooledBuffer> {
        match self.inner.queue.pop() {
            Some(segment) => Ok(PooledBuffer {
                segment,
                pool: Arc::clone(&self.inner),
            }),
            None => Err(EngineError::NeedMore("output pool is empty".into())),
        }
    }

    pub fn available(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn depth(&self) -> usize {
        self.inner.queue.capacity()
    }

    pub fn num_channels(&self) -> usize {
        self.inner.num_channels
    }

    /// Bytes per channel of each pooled segment.
    pub fn buffer_capacity(&self) -> usize {
        self.inner.capacity
    }
}

/// A segment on loan from an [`OutputPool`]. Dropping it returns the
/// storage, so every acquire is balanced by exactly one return.
#[derive(Debug)]
pub struct PooledBuffer {
    segment: StreamSegment,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = StreamSegment;

    fn deref(&self) -> &StreamSegment {
        &self.segment
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut StreamSegment {
        &mut self.segment
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut segment = std::mem::take(&mut self.segment);
        segment.buffers.clear();
        segment.metadata.destroy_all(DropReason::Dropped);
        segment.flags.clear();
        segment.timestamp = 0;
        if self.pool.queue.push(segment).is_err() {
            tracing::warn!("[OutputPool] Returned buffer found the pool full, discarding it");
        }
    }
}
