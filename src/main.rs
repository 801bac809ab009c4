//! chord-ring-sim - Scenario runner
//!
//! Builds a ring, stores records, seeds a file, churns membership and
//! verifies that every record is still reachable.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use chord_ring_sim::{
    hash_name, CliArgs, Config, FileBackend, Key, MemoryBackend, Network, ReportDisplay, RingError,
    ScenarioFile, ScenarioStats, SeedManifest, StorageBackend,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();
        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("chord-ring-sim starting");
    debug!("CLI arguments: {:?}", args);

    let file = match &args.config {
        Some(path) => Some(
            ScenarioFile::load(path)
                .await
                .with_context(|| format!("Failed to load scenario file {}", path.display()))?,
        ),
        None => None,
    };

    let config = Config::from_args(&args, file).context("Invalid command line")?;
    config.validate().context("Invalid configuration")?;

    let display = ReportDisplay::new(config.is_quiet());
    match run_scenario(&config, &display).await {
        Ok(stats) => {
            display.print_summary(&stats)?;
            info!("chord-ring-sim finished");
            Ok(())
        }
        Err(e) => {
            error!("Scenario failed: {:#}", e);
            display.print_error(&format!("Scenario failed: {:#}", e))?;
            Err(e)
        }
    }
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

/// Pick the storage backend for this run
async fn open_backend(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    match &config.storage_dir {
        Some(dir) => {
            info!("Using file storage under {}", dir.display());
            let backend = FileBackend::new(dir.clone())
                .await
                .with_context(|| format!("Failed to open storage directory {}", dir.display()))?;
            Ok(Arc::new(backend))
        }
        None => {
            info!("Using in-memory storage");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Run the configured scenario end to end
async fn run_scenario(config: &Config, display: &ReportDisplay) -> Result<ScenarioStats> {
    let mut network = Network::new(open_backend(config).await?);
    let mut stats = ScenarioStats::new();
    let mut members: Vec<String> = Vec::new();

    // Build the ring through the first node
    for name in &config.nodes {
        network
            .create_node(name)
            .await
            .with_context(|| format!("Failed to create node {}", name))?;
        if let Some(via) = members.first() {
            let report = network.join(name, via).await.with_context(|| format!("Failed to join {}", name))?;
            stats.joins += 1;
            stats.migrated += report.migrated;
        }
        members.push(name.clone());
    }
    display.print_ring(&network, &members[0])?;

    // Store records from the second node, as a client would
    let entry = members[1 % members.len()].clone();
    let mut records: Vec<(Key, Bytes)> = Vec::new();
    for record in &config.records {
        let key = hash_name(&record.value);
        let value = Bytes::from(record.value.clone());
        let location = network
            .store(&entry, key, value.clone(), &record.name)
            .await
            .with_context(|| format!("Failed to store {}", record.name))?;
        display.print_status(&format!("key = {}.., stored as {}", key.short(), location))?;
        records.push((key, value));
    }

    // Seed a file and read it straight back
    let mut seeded: Option<(SeedManifest, Vec<u8>)> = None;
    if let Some(seed) = &config.seed {
        let content = tokio::fs::read(&seed.path)
            .await
            .with_context(|| format!("Failed to read {}", seed.path.display()))?;
        let base_name = config
            .seed_base_name()
            .context("Seed file needs a base name")?;

        let manifest = network
            .seed(&members[0], &content, &base_name, config.seed_parts())
            .await
            .context("Failed to seed file")?;
        stats.seeded_bytes = content.len() as u64;

        if let Some(path) = &config.manifest_out {
            manifest.save(path).await.context("Failed to save seed manifest")?;
            info!("Seed manifest written to {}", path.display());
        }

        let fetched = network
            .leech_verified(&members[members.len() - 1], &manifest)
            .await
            .context("Failed to leech seeded file")?;
        if fetched != content {
            bail!("Leeched content of {} differs from the seeded file", base_name);
        }
        display.print_status(&format!("Seeded and leeched {} in {} parts", base_name, manifest.part_count))?;
        seeded = Some((manifest, content));
    }

    // Scripted leaves
    for name in &config.leave {
        let report = network.leave(name).await.with_context(|| format!("Failed to remove {}", name))?;
        members.retain(|m| m != name);
        stats.leaves += 1;
        stats.migrated += report.transferred;
        display.print_status(&format!(
            "{} left, {} records handed to {}",
            report.node, report.transferred, report.successor
        ))?;
    }

    if config.is_churn_enabled() {
        run_churn(&mut network, &mut members, &mut stats, config).await?;
    }

    verify(&network, &members, &records, seeded.as_ref()).await?;

    display.print_ring(&network, &members[0])?;
    display.print_indexes(&network, &members[0])?;

    stats.nodes = network.len();
    stats.records = network.record_count();
    Ok(stats)
}

/// Random joins and leaves; the ring never drops below two members
async fn run_churn(
    network: &mut Network,
    members: &mut Vec<String>,
    stats: &mut ScenarioStats,
    config: &Config,
) -> Result<()> {
    info!("Running {} churn rounds (seed {})", config.churn, config.rng_seed);
    let mut rng = StdRng::seed_from_u64(config.rng_seed);

    for round in 0..config.churn {
        if members.len() > 2 && rng.gen_bool(0.5) {
            let victim = members.remove(rng.gen_range(0..members.len()));
            let report = network.leave(&victim).await.with_context(|| format!("Churn: failed to remove {}", victim))?;
            stats.leaves += 1;
            stats.migrated += report.transferred;
        } else {
            let name = format!("churn{}", round);
            let via = members[rng.gen_range(0..members.len())].clone();
            network.create_node(&name).await?;
            match network.join(&name, &via).await {
                Ok(report) => {
                    stats.joins += 1;
                    stats.migrated += report.migrated;
                    members.push(name);
                }
                Err(RingError::MigrationFailure { .. }) => {
                    warn!("Churn: join of {} rolled back, discarding node", name);
                    if let Err(e) = network.leave(&name).await {
                        if !e.is_noop() {
                            return Err(e).with_context(|| format!("Churn: failed to discard {}", name));
                        }
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("Churn: failed to join {}", name)),
            }
        }
        network.check_invariants().with_context(|| format!("Ring broken after churn round {}", round))?;
    }
    Ok(())
}

/// Check ring invariants and that every stored record is reachable from every member
async fn verify(
    network: &Network,
    members: &[String],
    records: &[(Key, Bytes)],
    seeded: Option<&(SeedManifest, Vec<u8>)>,
) -> Result<()> {
    network.check_invariants().context("Ring invariants do not hold")?;

    let mut missing = 0;
    for start in members {
        for (key, value) in records {
            match network.fetch_value(start, key).await {
                Ok(found) if &found == value => {}
                Ok(_) => {
                    error!("Record {}.. fetched from {} has changed", key.short(), start);
                    missing += 1;
                }
                Err(e) => {
                    error!("Record {}.. unreachable from {}: {}", key.short(), start, e);
                    missing += 1;
                }
            }
        }
    }
    if missing > 0 {
        bail!("{} record lookups failed", missing);
    }

    if let Some((manifest, content)) = seeded {
        let fetched = network
            .leech_verified(&members[0], manifest)
            .await
            .context("Seeded file unreachable after churn")?;
        if &fetched != content {
            bail!("Seeded file {} changed after churn", manifest.base_name);
        }
    }

    info!("Verified {} records from {} nodes", records.len(), members.len());
    Ok(())
}
