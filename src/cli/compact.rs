//! Compact command handler.

use std::path::PathBuf;

use anyhow::{Context, Result};

use agentgate::agent::{ContextCompactor, HistoryItem};
use agentgate::utils::unix_millis;

use super::common::{load_config, read_json};

/// Compact a history file and print the summary with its statistics.
pub(crate) async fn cmd_compact(history: PathBuf, max: Option<usize>) -> Result<()> {
    let mut config = load_config()?.compaction;
    if let Some(max) = max {
        config.max_history_count = max;
    }

    let items: Vec<HistoryItem> = read_json(&history)?;
    let compactor = ContextCompactor::new(config).context("Invalid compaction settings")?;
    let result = compactor.compact(&items, unix_millis());

    println!("{}", result.summary);
    println!();
    println!("Items kept:        {} of {}", result.items.len(), items.len());
    println!("Original tokens:   {}", result.original_tokens);
    println!("Compressed tokens: {}", result.compressed_tokens);
    println!("Compression ratio: {:.2}", result.compression_ratio);
    println!("Info retention:    {:.2}", result.info_retention);
    Ok(())
}
