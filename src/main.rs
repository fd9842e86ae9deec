use std::io::Write;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use seqlease::allocator::{AllocatorConfig, BatchedAllocator};
use seqlease::contracts::SequenceGenerator;
use seqlease::storage::FileStore;

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("seqlease=info".parse()?))
        .init();

    let path = std::env::var("SEQLEASE_PATH").unwrap_or_else(|_| "./sequence".into());
    let seed: u64 = match std::env::var("SEQLEASE_SEED") {
        Ok(v) => v.parse()?,
        Err(_) => 0,
    };
    let count: u64 = match std::env::var("SEQLEASE_COUNT") {
        Ok(v) => v.parse()?,
        Err(_) => 1,
    };
    let print_metrics = std::env::var("SEQLEASE_PRINT_METRICS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let config = AllocatorConfig::from_env();
    config.validate()?;

    let store = FileStore::open_with_seed(&path, seed)?;
    let counter = Arc::new(config.durable_counter(store));
    let metrics = Arc::clone(counter.metrics());
    let allocator = BatchedAllocator::from_config(counter, &config)?.with_metrics(metrics);

    tracing::info!(
        path = %path,
        batch_size = config.batch_size,
        count,
        "Issuing identifiers"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for _ in 0..count {
        writeln!(out, "{}", allocator.increment_and_get()?)?;
    }
    out.flush()?;

    // Report the unused tail so the gap shows up in the log.
    allocator.reset()?;

    if print_metrics {
        eprint!("{}", allocator.metrics().format_prometheus());
    }

    Ok(())
}
