//! The main processing loop

use anyhow::{Context, Result, ensure};
use clap::Parser;
use keel_memory::pool::{MemoryPool, PoolStats};
use keel_memory::utils::format_bytes;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AppConfig;

/// Size of the handle kept alive for the whole run
pub const LEGACY_HANDLE_SIZE: usize = 128;
const LEGACY_HANDLE_TAG: &str = "LegacyHandle";
const LEGACY_HANDLE_SEED: u32 = 0xDEAD_BEEF;

const EVENT_TAG: &str = "QuantumEvent";

/// Initialize the pool, run the processing cycles, and report statistics
#[derive(Debug, Parser)]
pub struct RunCommand {
    /// Number of processing cycles (defaults to `core.processing_cycles`)
    #[arg(long, value_name = "N")]
    pub cycles: Option<u32>,

    /// Print the final statistics as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct RunReport {
    cycles: u32,
    events: usize,
    event_bytes: usize,
    stats: PoolStats,
    utilization: f64,
    fragmentation: f64,
}

impl RunCommand {
    pub fn run(self, config: &AppConfig) -> Result<()> {
        let capacity = config.pool_capacity()?;
        let cycles = self.cycles.unwrap_or(config.core.processing_cycles);

        let pool = MemoryPool::new();
        pool.initialize(capacity)
            .with_context(|| format!("failed to initialize a {} pool", format_bytes(capacity)))?;

        let handle = pool
            .allocate(LEGACY_HANDLE_SIZE, LEGACY_HANDLE_TAG)
            .context("failed to allocate the legacy handle")?;
        pool.with_payload_mut(handle, |bytes| seed_handle(bytes, LEGACY_HANDLE_SEED))?;
        info!(address = %handle, "legacy handle ready");

        let mut events = 0;
        let mut event_bytes = 0;
        for cycle in 1..=cycles {
            info!(cycle, "processing cycle");
            let (count, bytes) = process_cycle(&pool, cycle)
                .with_context(|| format!("processing cycle {cycle} failed"))?;
            events += count;
            event_bytes += bytes;
        }

        pool.deallocate(handle, LEGACY_HANDLE_TAG)
            .context("failed to release the legacy handle")?;

        let stats = pool.stats().context("memory pool vanished before shutdown")?;
        let report = RunReport {
            cycles,
            events,
            event_bytes,
            stats,
            utilization: stats.utilization(),
            fragmentation: stats.fragmentation(),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }

        pool.try_shutdown().context("memory pool still in use at shutdown")?;
        Ok(())
    }
}

/// One cycle: allocate a batch of event payloads, fill each with its state
/// vector, check it back, release them.
///
/// Returns the number of events and payload bytes processed.
fn process_cycle(pool: &MemoryPool, cycle: u32) -> Result<(usize, usize)> {
    let batch = 2 + cycle as usize % 4;
    let mut events = Vec::with_capacity(batch);
    let mut bytes = 0;

    for index in 0..batch {
        let state = state_vector(cycle, index);
        let encoded: Vec<u8> = state.iter().flat_map(|v| v.to_le_bytes()).collect();

        let address = pool.allocate(encoded.len(), EVENT_TAG)?;
        pool.with_payload_mut(address, |payload| payload.copy_from_slice(&encoded))?;
        debug!(cycle, index, address = %address, size = encoded.len(), "event queued");

        bytes += encoded.len();
        events.push((address, encoded));
    }

    // Scratch space for the cycle, released when it goes out of scope.
    let scratch = pool.allocate_scoped(64, "CycleScratch")?;
    scratch.with_bytes_mut(|b| b.fill(cycle.to_le_bytes()[0]))?;

    for (address, expected) in events.iter().rev() {
        let intact = pool.with_payload(*address, |payload| payload == expected.as_slice())?;
        ensure!(intact, "event payload at {address} was overwritten");
        pool.deallocate(*address, EVENT_TAG)?;
    }

    Ok((batch, bytes))
}

/// Deterministic pseudo-random state vector for one event.
fn state_vector(cycle: u32, index: usize) -> Vec<f64> {
    let len = 4 + (cycle as usize * 3 + index * 5) % 12;
    let mut state = cycle.wrapping_mul(31).wrapping_add(index as u32);
    (0..len)
        .map(|_| {
            state = lcg(state);
            f64::from(state) / f64::from(0x7FFF_FFFF_u32)
        })
        .collect()
}

/// Fills `bytes` with a seed-dependent permutation of `0..len`.
fn seed_handle(bytes: &mut [u8], seed: u32) {
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = (i % 256) as u8;
    }

    let mut state = seed;
    for i in (1..bytes.len()).rev() {
        state = lcg(state);
        let j = state as usize % (i + 1);
        bytes.swap(i, j);
    }
}

#[inline]
fn lcg(state: u32) -> u32 {
    state.wrapping_mul(1_103_515_245).wrapping_add(12_345) & 0x7FFF_FFFF
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    println!("cycles:             {}", report.cycles);
    println!("events processed:   {} ({})", report.events, format_bytes(report.event_bytes));
    println!("capacity:           {}", format_bytes(stats.capacity));
    println!("allocated:          {}", format_bytes(stats.allocated_bytes));
    println!("free:               {} in {} block(s)", format_bytes(stats.free_bytes), stats.free_blocks);
    println!("largest free block: {}", format_bytes(stats.largest_free_block));
    println!("live allocations:   {}", stats.live_allocations);
    println!("total allocs:       {}", stats.total_allocs);
    println!("total deallocs:     {}", stats.total_deallocs);
    println!("failed allocs:      {}", stats.failed_allocs);
    println!("double frees:       {}", stats.double_frees);
    println!("peak allocated:     {}", format_bytes(stats.peak_allocated_bytes));
    println!("utilization:        {:.2}%", report.utilization * 100.0);
    println!("fragmentation:      {:.2}%", report.fragmentation * 100.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_handle_is_a_permutation() {
        let mut bytes = [0u8; LEGACY_HANDLE_SIZE];
        seed_handle(&mut bytes, LEGACY_HANDLE_SEED);

        let mut sorted = bytes;
        sorted.sort_unstable();
        assert!(sorted.iter().enumerate().all(|(i, &b)| b as usize == i));
        assert_ne!(bytes, sorted);
    }

    #[test]
    fn seeding_is_deterministic() {
        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        seed_handle(&mut first, 7);
        seed_handle(&mut second, 7);
        assert_eq!(first, second);
    }

    #[test]
    fn cycles_leave_pool_empty() {
        let pool = MemoryPool::with_capacity(64 * 1024).unwrap();
        for cycle in 1..=5 {
            let (events, bytes) = process_cycle(&pool, cycle).unwrap();
            assert!(events >= 2);
            assert!(bytes > 0);
        }
        let stats = pool.stats().unwrap();
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.free_blocks, 1);
    }

    #[test]
    fn state_vectors_are_unit_interval() {
        for value in state_vector(3, 1) {
            assert!((0.0..=1.0).contains(&value));
        }
    }
}
