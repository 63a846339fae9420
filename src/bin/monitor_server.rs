use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use fish_monitor::{
    AcquisitionWorker, AppConfig, LoopbackAnnotator, MockCamera, Orchestrator, PixelLayout,
    SharedFrameStore, StreamBroadcastServer, TrackerTable,
};

/// Runs the full monitoring pipeline against synthetic cameras; the real
/// GigE driver and inference pipeline plug in at the same seams.
#[derive(Parser, Debug)]
#[command(author, version, about = "Fish activity monitoring station (mock cameras)")]
struct Args {
    /// JSON configuration file; built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the HTTP port from the config.
    #[arg(long)]
    port: Option<u16>,

    /// Synthetic frame width.
    #[arg(long, default_value = "640")]
    width: u32,

    /// Synthetic frame height.
    #[arg(long, default_value = "480")]
    height: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let store = Arc::new(SharedFrameStore::new(&["top", "side"]));
    let trackers = Arc::new(TrackerTable::new(Arc::new(config.behavior_config())));
    let annotator = Arc::new(LoopbackAnnotator::new(2));
    let shutdown = Arc::new(AtomicBool::new(false));

    let frame_period = Duration::from_secs_f64(1.0 / config.video.fps.max(1.0));
    let top_address = config
        .video
        .top_source
        .clone()
        .unwrap_or_else(|| "mock://top".to_string());
    let side_address = config
        .video
        .side_source
        .clone()
        .unwrap_or_else(|| "mock://side".to_string());

    let workers = vec![
        AcquisitionWorker::start(
            config.channel_config("top", &top_address),
            MockCamera::new(args.width, args.height, PixelLayout::Mono)
                .with_frame_period(frame_period),
            shutdown.clone(),
        ),
        AcquisitionWorker::start(
            config.channel_config("side", &side_address),
            MockCamera::new(args.width, args.height, PixelLayout::Mono)
                .with_frame_period(frame_period),
            shutdown.clone(),
        ),
    ];

    let stale_after = Duration::from_secs_f64(config.tracker.memory * 5.0);
    let orchestrator = Arc::new(Orchestrator::new(
        workers,
        vec!["top".to_string(), "side".to_string()],
        store.clone(),
        trackers,
        annotator.clone(),
        shutdown.clone(),
        stale_after,
    ));
    orchestrator.start_feeder();

    // Pump processed batches back into the pipeline; with the real
    // annotator this is its output callback.
    {
        let orchestrator = orchestrator.clone();
        let annotator = annotator.clone();
        let shutdown = shutdown.clone();
        std::thread::Builder::new()
            .name("annotator-pump".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::SeqCst) {
                    match annotator.take_batch() {
                        Some(batch) => {
                            orchestrator.ingest(batch);
                        }
                        None => std::thread::sleep(Duration::from_millis(5)),
                    }
                }
            })?;
    }

    let server = StreamBroadcastServer::new(store, "top", "side");
    info!(port = config.server.port, "starting fish monitor");

    tokio::select! {
        result = server.serve(config.server.port) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    orchestrator.shutdown();
    Ok(())
}
