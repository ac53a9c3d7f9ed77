//! Compact command implementation.

use super::open_store;
use std::path::Path;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Frames before compaction.
    pub frames_before: usize,
    /// Frames after compaction.
    pub frames_after: usize,
    /// Bytes before compaction.
    pub bytes_before: u64,
    /// Bytes after compaction.
    pub bytes_after: u64,
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting journal at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let store = open_store(path)?;
    let frames_before = store.frame_count();
    let bytes_before = std::fs::metadata(path)?.len();

    if dry_run {
        println!("  Frames: {}", frames_before);
        println!("  Size:   {} bytes", bytes_before);
        return Ok(());
    }

    store.compact()?;
    let stats = CompactStats {
        frames_before,
        frames_after: store.frame_count(),
        bytes_before,
        bytes_after: std::fs::metadata(path)?.len(),
    };

    println!("  Frames:      {} -> {}", stats.frames_before, stats.frames_after);
    println!("  Size before: {} bytes", stats.bytes_before);
    println!("  Size after:  {} bytes", stats.bytes_after);
    println!(
        "  Space saved: {} bytes",
        stats.bytes_before.saturating_sub(stats.bytes_after)
    );
    println!();
    println!("✓ Compaction complete");

    Ok(())
}
