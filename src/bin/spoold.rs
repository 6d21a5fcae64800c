//! spoold - capture spool daemon
//!
//! This daemon:
//! 1. Reads frames from the configured source (camera snapshot URL, image directory, stub)
//! 2. Runs the detector on each frame
//! 3. Delivers flagged captures to the collection endpoint
//! 4. Spools undelivered captures to local disk and retries them every cycle
//! 5. Evicts spooled captures past the retention deadline

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use capture_spool::ingest::{open_source, Decimate, FrameSource};
use capture_spool::{
    CaptureStore, Deliver, DetectorBackend, DispatchMode, FilesystemCaptureStore,
    HttpDeliveryClient, Pipeline, SpoolConfig, SpoolManager, StaticPosition, StubBackend,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Deliver flagged camera captures with a durable local spool")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "SPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Dispatch mode for new captures (inline|detached). Overrides the config file.
    #[arg(long, env = "SPOOL_DISPATCH")]
    dispatch: Option<DispatchMode>,

    /// Drain the spool once (retry + evict) and exit without reading frames.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = SpoolConfig::load_from(args.config.as_deref())?;
    if let Some(dispatch) = args.dispatch {
        cfg.dispatch = dispatch;
    }

    let fs_store = FilesystemCaptureStore::open(&cfg.store_dir)?;
    let client = HttpDeliveryClient::new(&cfg.endpoint.url, cfg.endpoint.timeout)?;

    log::info!("spoold {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "store={} pending={} endpoint={}",
        fs_store.root().display(),
        fs_store.len()?,
        client.url()
    );

    let store: Arc<dyn CaptureStore> = Arc::new(fs_store);
    let delivery: Arc<dyn Deliver> = Arc::new(client);
    let mut spool = SpoolManager::new(cfg.spool_settings(), store, delivery)?;
    let settings = spool.settings();
    log::info!(
        "retention={}s dispatch={:?} history_capacity={} duplicate_tolerance={}",
        settings.retention.as_secs(),
        settings.dispatch,
        settings.history_capacity,
        settings.duplicate_tolerance
    );

    if args.once {
        let report = spool.run_cycle(None);
        report.log();
        spool.shutdown();
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst))
            .map_err(|e| anyhow!("install signal handler: {}", e))?;
    }

    let source: Box<dyn FrameSource> = Box::new(Decimate::new(
        open_source(&cfg.source.url)?,
        cfg.source.frame_stride,
    ));
    let mut detector: Box<dyn DetectorBackend> = Box::new(StubBackend::new());
    detector.warm_up()?;
    log::info!("detector backend: {}", detector.name());

    let position = Box::new(StaticPosition::new(
        cfg.location.latitude,
        cfg.location.longitude,
    ));

    let mut pipeline = Pipeline::new(
        source,
        detector,
        position,
        spool,
        cfg.detector.min_confidence,
    );
    pipeline.run(cfg.poll_interval, &shutdown)?;

    log::info!(
        "spoold stopped; {} capture(s) left in spool",
        pipeline.spool().store().len()?
    );
    Ok(())
}
