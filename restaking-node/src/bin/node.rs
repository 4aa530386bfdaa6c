//! Restaking Node Binary
//!
//! Replays a JSON file of blocks against the configured store.
//!
//! Usage: `restaking-node [BLOCKS_FILE]`. Configuration comes from the TOML
//! file named by `RESTAKING_CONFIG`, or from `RESTAKING_*` variables.

use anyhow::Context;
use restaking_ledger::{KvStore, MemoryStore, RocksStore, StoreBackend};
use restaking_node::{Block, BlockProcessor, NodeConfig};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    info!("Starting restaking node");

    // Load configuration
    let config = if let Ok(config_path) = std::env::var("RESTAKING_CONFIG") {
        info!("Loading config from: {}", config_path);
        NodeConfig::from_file(&config_path)?
    } else {
        info!("Loading config from environment variables");
        NodeConfig::from_env()?
    };

    let blocks_file = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.blocks_file.clone())
        .context("no blocks file given (argument or RESTAKING_BLOCKS_FILE)")?;

    let mut store: Box<dyn KvStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Box::new(MemoryStore::new())
        }
        StoreBackend::RocksDb => {
            info!("Opening store at: {:?}", config.store.data_dir);
            Box::new(RocksStore::open(&config.store)?)
        }
    };

    let content = std::fs::read_to_string(&blocks_file)
        .with_context(|| format!("reading {}", blocks_file.display()))?;
    let blocks: Vec<Block> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", blocks_file.display()))?;

    let processor = BlockProcessor::from_config(&config)?;
    if let Some(height) = processor.last_height(store.as_ref())? {
        info!(height = height, "Resuming after last applied block");
    }

    info!(
        service = %config.service_name,
        version = %config.service_version,
        blocks = blocks.len(),
        "Replaying blocks"
    );

    for block in &blocks {
        match processor.apply_block(store.as_mut(), block) {
            Ok(result) => {
                for receipt in result.receipts.iter().filter(|r| !r.success) {
                    warn!(height = result.height, index = receipt.index, "{}", receipt.log);
                }
                info!(
                    height = result.height,
                    app_hash = %result.app_hash_hex(),
                    "Applied block"
                );
            }
            Err(err) if err.is_fatal() => {
                error!("Stopping: {}", err);
                return Err(err.into());
            }
            Err(err) => {
                warn!(height = block.height, "Skipping block: {}", err);
            }
        }
    }

    println!("{}", processor.metrics().encode_text()?);

    info!("Restaking node stopped");
    Ok(())
}
