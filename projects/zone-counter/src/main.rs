use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zone_counter::cli::Args;
use zone_counter::config::load_zone_specs;
use zone_counter::pipeline::{Detector, Pipeline, ReplayDetector};
use zone_counter::video::opencv_sink::OpencvSink;
use zone_counter::video::opencv_source::OpencvSource;
use zone_counter::video::OutputSink;
use zone_counter::web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();
    let config = args.to_config()?;

    let detector: Box<dyn Detector> = match &args.detections {
        Some(path) => Box::new(ReplayDetector::from_file(path)?),
        None => {
            tracing::warn!("No detections file given, nothing will be counted");
            Box::new(ReplayDetector::empty())
        }
    };
    let sink = config
        .output_url
        .clone()
        .map(|url| Box::new(OpencvSink::new(url)) as Box<dyn OutputSink>);

    let pipeline = Arc::new(Pipeline::new(
        config,
        Box::new(OpencvSource::new(args.source.clone())),
        detector,
        sink,
    ));

    if let Some(path) = &args.zones_file {
        pipeline.replace_all_zones(load_zone_specs(path)?)?;
    }

    pipeline.start()?;
    let served = run_server(args.host, args.port, pipeline.clone()).await;

    let stopping = pipeline.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    served
}
