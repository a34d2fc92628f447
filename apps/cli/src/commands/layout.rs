//! Scripted allocate/free sequence showing splitting and coalescing

use anyhow::{Context, Result};
use clap::Parser;
use keel_memory::pool::{BlockInfo, MemoryPool, PoolConfig};

/// Capacity of the demonstration pool
const LAYOUT_CAPACITY: usize = 1024;

/// Run a short allocation script on a small pool and print its block table
#[derive(Debug, Parser)]
pub struct LayoutCommand {
    /// Print the block table as JSON
    #[arg(long)]
    pub json: bool,
}

impl LayoutCommand {
    pub fn run(self) -> Result<()> {
        let blocks = scripted_layout()?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        } else {
            print_table(&blocks);
        }
        Ok(())
    }
}

/// Allocates four blocks, frees two non-adjacent ones, then frees the block
/// between them so all three merge.
fn scripted_layout() -> Result<Vec<BlockInfo>> {
    let pool = MemoryPool::with_config(PoolConfig::production());
    pool.initialize(LAYOUT_CAPACITY)?;

    let handle = pool.allocate(128, "LegacyHandle")?;
    let first = pool.allocate(40, "Event")?;
    let middle = pool.allocate(100, "Event")?;
    let last = pool.allocate(24, "Event")?;

    pool.deallocate(first, "Event")?;
    pool.deallocate(last, "Event")?;
    pool.deallocate(middle, "Event")?;
    let reused = pool.allocate(64, "Reused")?;

    let blocks = pool.blocks().context("failed to walk the pool")?;

    pool.deallocate(reused, "Reused")?;
    pool.deallocate(handle, "LegacyHandle")?;
    pool.try_shutdown()?;
    Ok(blocks)
}

fn print_table(blocks: &[BlockInfo]) {
    println!("{:>8}  {:>6}  {:<9}  {:>9}  TAG", "OFFSET", "SIZE", "STATE", "REQUESTED");
    for block in blocks {
        let state = if block.is_free { "free" } else { "allocated" };
        println!(
            "{:>#8x}  {:>6}  {:<9}  {:>9}  {}",
            block.offset, block.size, state, block.requested, block.tag
        );
    }
}
