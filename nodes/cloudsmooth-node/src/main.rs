//! cloudsmooth node entry point.
//!
//! Replays ASCII XYZ files through one smoothing stage and writes the
//! smoothed cloud and normals next to each input.

mod xyz;

use cloudsmooth_core::{
    Config, Header, LocalBus, MovingLeastSquares, NormalCloud, PointCloud, Publisher, Stage,
    Transport,
};
use eyre::{Result, WrapErr, bail};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const FRAME_ID: &str = "map";
const FRAME_PERIOD: Duration = Duration::from_millis(100);

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(config_file) = args.next() else {
        bail!("Usage: cloudsmooth-node <config.yaml> <cloud.xyz>...");
    };
    let inputs: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if inputs.is_empty() {
        bail!("No input clouds given.\nUsage: cloudsmooth-node <config.yaml> <cloud.xyz>...");
    }

    info!(config_file = %config_file, "Loading configuration");
    let config = match Config::load(&config_file) {
        Ok(config) => config,
        Err(err) => {
            error!(config_file = %config_file, "Stage stays inert: {:#}", err);
            return Ok(());
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("Failed to create tokio runtime")?;

    runtime.block_on(replay(config, inputs))?;

    info!("cloudsmooth node shutting down");
    Ok(())
}

async fn replay(config: Config, inputs: Vec<PathBuf>) -> Result<()> {
    let bus = LocalBus::new();

    let smoothed = bus.subscription::<PointCloud>(&config.topics.output)?;
    let normals = bus.subscription::<NormalCloud>(&config.topics.normals)?;

    let core = MovingLeastSquares::with_viewpoint(config.viewpoint.into());
    let stage = Stage::start(&bus, &config, core);
    if !stage.is_active() {
        warn!("Stage is inert, no outputs will be written");
    } else if config.use_indices {
        warn!("Index sets are not replayed, so no cloud will be paired");
    }

    let input = bus.advertise::<PointCloud>(&config.topics.input)?;
    let handle = tokio::spawn(stage.run());

    for (frame, path) in inputs.iter().enumerate() {
        let stamp = FRAME_PERIOD * frame as u32;
        let cloud = xyz::read_cloud(path, Header::new(FRAME_ID, stamp))?;

        info!(
            path = %path.display(),
            num_points = cloud.len(),
            stamp = ?stamp,
            "Publishing cloud"
        );
        input.publish(Arc::new(cloud))?;
    }
    // Closing the inbound topics lets the stage drain and stop.
    bus.close(&config.topics.input);
    bus.close(&config.topics.indices);

    let stats = handle.await.wrap_err("Stage task failed")?;
    info!(
        completed = stats.completed,
        degraded = stats.degraded,
        "Replay finished"
    );

    for cloud in smoothed.drain() {
        let Some(path) = source_of(&cloud.header, &inputs) else {
            warn!(stamp = ?cloud.header.stamp, "Output matches no input");
            continue;
        };
        if cloud.is_empty() {
            warn!(path = %path.display(), "Smoothing produced no points");
        }

        let out = xyz::sibling_path(path, "smoothed");
        xyz::write(&out, &xyz::format_points(&cloud))?;
        info!(path = %out.display(), num_points = cloud.len(), "Wrote smoothed cloud");
    }

    for cloud in normals.drain() {
        let Some(path) = source_of(&cloud.header, &inputs) else {
            warn!(stamp = ?cloud.header.stamp, "Normals match no input");
            continue;
        };

        let out = xyz::sibling_path(path, "normals");
        xyz::write(&out, &xyz::format_normals(&cloud))?;
        info!(path = %out.display(), num_normals = cloud.len(), "Wrote normals");
    }

    Ok(())
}

/// Recover the input file from the stamp it was published with.
fn source_of<'a>(header: &Header, inputs: &'a [PathBuf]) -> Option<&'a PathBuf> {
    let frame = header.stamp.as_nanos() / FRAME_PERIOD.as_nanos();
    inputs.get(usize::try_from(frame).ok()?)
}
