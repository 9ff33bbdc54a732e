//! A streaming point-cloud smoothing stage.
//!
//! A [Stage] consumes clouds from an `input` topic, optionally paired with
//! index sets from an `indices` topic, and publishes a smoothed cloud on
//! `output` and per-point normals on `normals`. Work is skipped entirely
//! while nobody listens on either output. Malformed inputs produce an
//! empty cloud carrying the input header on `output` and nothing on
//! `normals`.
//!
//! # Usage
//!
//! ```rust
//! use cloudsmooth_core::{
//!     Config, Header, LocalBus, MovingLeastSquares, Point, PointCloud, Publisher, Stage,
//!     Transport,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # #[tokio::main]
//! # async fn main() -> eyre::Result<()> {
//! let config = Config::from_yaml("search_radius: 0.2\nspatial_locator: rtree\n")?;
//! let bus = LocalBus::new();
//!
//! // Attach a consumer so that the stage has a reason to work.
//! let smoothed = bus.subscription::<PointCloud>("output")?;
//! let stage = Stage::start(&bus, &config, MovingLeastSquares::new());
//!
//! // Publish a 5x5 grid and close the input so that the stage drains and
//! // stops.
//! let input = bus.advertise::<PointCloud>("input")?;
//! let points = (0..25)
//!     .map(|i| Point::new((i % 5) as f32 * 0.1, (i / 5) as f32 * 0.1, 1.0))
//!     .collect();
//! let header = Header::new("lidar", Duration::from_secs(1));
//! input.publish(Arc::new(PointCloud::new(header.clone(), points)))?;
//! bus.close("input");
//!
//! let stats = stage.run().await;
//! assert_eq!(stats.completed, 1);
//!
//! let outputs = smoothed.drain();
//! assert_eq!(outputs[0].len(), 25);
//! assert_eq!(outputs[0].header, header);
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod buffer;
mod config;
pub mod locator;
mod mls;
pub mod pipeline;
mod processing;
mod stage;
pub mod state;
mod sync;
pub mod transport;
mod types;
pub mod validity;

pub use config::{Config, StageParams, TopicConfig};
pub use locator::SpatialLocatorKind;
pub use mls::MovingLeastSquares;
pub use pipeline::{Invocation, Pipeline, PipelineStats};
pub use processing::{ProcessingCore, ProcessingParams};
pub use stage::{Intake, Stage};
pub use state::{SyncPolicy, SyncStats};
pub use sync::{PairStream, StatsReceiver, sync};
pub use transport::{LocalBus, Publisher, Transport};
pub use types::*;
