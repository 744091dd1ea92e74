//! CBOW Shard Cluster Node
//!
//! This binary starts an in-process cluster of parameter shards and drives
//! it with synthetic CBOW frames, reporting progress as frames complete.
//!
//! # Usage
//!
//! ```bash
//! # Run with default settings
//! w2v-node
//!
//! # Four shards, larger frames
//! w2v-node --shards 4 --frame-size 256
//!
//! # Start with configuration file
//! w2v-node --config w2v.toml
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use w2v_core::{spawn_eviction, CbowRequest, LocalCluster, TrainingFrame, W2vConfig};

const CLIENT_ID: u64 = 1;
const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Distributed CBOW training node
#[derive(Parser, Debug)]
#[command(name = "w2v-node")]
#[command(about = "In-process multi-shard CBOW word2vec trainer")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Number of shards (overrides configuration)
    #[arg(long)]
    shards: Option<u16>,

    /// Number of frames to submit
    #[arg(long, default_value = "100")]
    frames: u64,

    /// Requests per frame
    #[arg(long, default_value = "64")]
    frame_size: usize,

    /// Context window on each side of the target word
    #[arg(long, default_value = "2")]
    window: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => W2vConfig::from_file(path)?,
        None => W2vConfig::default(),
    }
    .with_env_overrides();
    if let Some(shards) = args.shards {
        config.cluster.shard_count = shards;
    }
    config.validate()?;

    tracing::info!("Starting CBOW cluster");
    tracing::info!("  Shards: {}", config.cluster.shard_count);
    tracing::info!("  Workers per shard: {}", config.cluster.workers_per_shard);
    tracing::info!(
        "  Model: {} words x {} dimensions",
        config.model.vocab_size,
        config.model.vector_length
    );
    tracing::info!(
        "  Training: alpha {}, {} negative samples",
        config.training.alpha,
        config.training.negative
    );

    let cluster = Arc::new(LocalCluster::start(&config)?);

    // Start background eviction of requests that never completed
    let eviction = spawn_eviction(
        cluster.clone(),
        config.driver.eviction_interval(),
        config.driver.chain_timeout(),
    );

    let client = cluster.client(CLIENT_ID);
    let frames = args.frames;
    let frame_size = args.frame_size;
    let window = args.window.max(1);
    let generator_config = config.clone();

    let started = Instant::now();
    let completed = tokio::task::spawn_blocking(move || -> w2v_core::Result<u64> {
        let mut rng = StdRng::seed_from_u64(generator_config.model.seed);
        let mut task_id = 0u64;
        let mut completed = 0u64;

        for frame_id in 0..frames {
            let requests = (0..frame_size)
                .map(|_| {
                    task_id += 1;
                    synthetic_request(&mut rng, &generator_config, frame_id, task_id, window)
                })
                .collect();
            client.submit_frame(TrainingFrame {
                frame_id,
                originator_id: CLIENT_ID,
                requests,
            })?;

            let done = client.wait_frame_complete(FRAME_TIMEOUT)?;
            tracing::debug!("Frame {} complete", done);
            completed += 1;
        }
        Ok(completed)
    })
    .await??;

    eviction.abort();

    let elapsed = started.elapsed();
    let rounds: u64 = cluster.nodes().iter().map(|node| node.rounds()).sum();
    tracing::info!(
        "Completed {} frames ({} shard rounds) in {:.2?}",
        completed,
        rounds,
        elapsed
    );
    tracing::info!("Live chains at exit: {}", cluster.live_chains());

    Ok(())
}

/// A random CBOW request over the configured vocabulary.
///
/// The Huffman path is a random walk of inner nodes; only its shape matters
/// for exercising the cluster.
fn synthetic_request(
    rng: &mut StdRng,
    config: &W2vConfig,
    frame_id: u64,
    task_id: u64,
    window: usize,
) -> CbowRequest {
    let vocab = config.model.vocab_size as u32;
    let depth = rng.gen_range(1..=8usize);

    CbowRequest {
        originator_id: CLIENT_ID,
        task_id,
        frame_id,
        syn0_rows: (0..2 * window).map(|_| rng.gen_range(0..vocab)).collect(),
        syn1_rows: (0..depth).map(|_| rng.gen_range(0..vocab)).collect(),
        codes: (0..depth).map(|_| rng.gen_range(0..=1u8)).collect(),
        w1: rng.gen_range(0..vocab),
        negative_rows: (0..config.training.negative)
            .map(|_| rng.gen_range(0..vocab))
            .collect(),
        alpha: config.training.alpha,
    }
}
