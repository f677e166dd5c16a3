#![forbid(unsafe_code)]
#![deny(warnings)]
#![warn(clippy::pedantic)]

use tracing::info;

use crate::error::{SimError, SimResult};
use crate::sampler::MemoryReading;

const FILL_PATTERN: u8 = 0xA5;

/// Number of whole `chunk_bytes` blocks needed to lift `reading` to
/// `target_percent` of total memory. Zero when usage is already there.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn plan_chunks(reading: MemoryReading, target_percent: f64, chunk_bytes: usize) -> usize {
    if chunk_bytes == 0 || !target_percent.is_finite() {
        return 0;
    }
    let target_percent = target_percent.clamp(0.0, 100.0);
    let target_bytes = (reading.total_bytes as f64 * target_percent / 100.0) as u64;
    let need_bytes = target_bytes.saturating_sub(reading.used_bytes);
    usize::try_from(need_bytes / chunk_bytes as u64).unwrap_or(usize::MAX)
}

/// Allocate `chunks` blocks of `chunk_bytes`, each written so the pages are
/// resident. On failure everything allocated so far is dropped.
pub fn allocate_blocks(chunks: usize, chunk_bytes: usize) -> SimResult<Vec<Vec<u8>>> {
    let mut blocks: Vec<Vec<u8>> = Vec::new();
    blocks
        .try_reserve_exact(chunks)
        .map_err(|_| SimError::Allocation { allocated: 0, planned: chunks })?;
    for allocated in 0..chunks {
        let mut block = Vec::new();
        if block.try_reserve_exact(chunk_bytes).is_err() {
            return Err(SimError::Allocation { allocated, planned: chunks });
        }
        block.resize(chunk_bytes, FILL_PATTERN);
        blocks.push(block);
    }
    Ok(blocks)
}

/// Plan and allocate in one step.
pub fn inflate(
    reading: MemoryReading,
    target_percent: f64,
    chunk_bytes: usize,
) -> SimResult<Vec<Vec<u8>>> {
    let planned = plan_chunks(reading, target_percent, chunk_bytes);
    let blocks = allocate_blocks(planned, chunk_bytes)?;
    info!(planned, chunk_bytes, target_percent, used_bytes = reading.used_bytes, "memory inflated");
    Ok(blocks)
}

/// Blocks held on behalf of a run. Only ever filled whole or cleared whole.
#[derive(Debug, Default)]
pub struct MemoryHold {
    blocks: Vec<Vec<u8>>,
}

impl MemoryHold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&mut self, blocks: Vec<Vec<u8>>) {
        self.blocks = blocks;
    }

    pub fn clear(&mut self) {
        self.blocks = Vec::new();
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }
}
