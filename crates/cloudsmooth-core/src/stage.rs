//! The smoothing stage: configuration, intake wiring and the run loop.

use crate::{
    config::{Config, StageParams},
    pipeline::{Pipeline, PipelineStats},
    processing::{ProcessingCore, ProcessingParams},
    state::SyncStats,
    sync::{PairStream, StatsReceiver, sync},
    transport::Transport,
    types::{IndexSet, NormalCloud, PointCloud},
};
use eyre::{Result, WrapErr};
use futures::stream::{BoxStream, StreamExt};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info};

const STATS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// How clouds enter the stage. Chosen once at startup.
pub enum Intake {
    /// Every cloud triggers one invocation on the whole cloud.
    CloudOnly {
        clouds: BoxStream<'static, Arc<PointCloud>>,
    },
    /// Clouds are paired with index sets before each invocation.
    Synchronized {
        pairs: PairStream<'static, Arc<PointCloud>, Arc<IndexSet>>,
        stats: StatsReceiver,
    },
}

impl Intake {
    /// Subscribe to the inbound topics named in `params`.
    pub fn connect<T>(transport: &T, params: &StageParams) -> Result<Self>
    where
        T: Transport,
    {
        let clouds = transport
            .subscribe::<PointCloud>(&params.topics.input)
            .wrap_err_with(|| format!("Failed to subscribe to '{}'", params.topics.input))?;

        if !params.use_indices {
            info!(topic = %params.topics.input, "Subscribed to clouds");
            return Ok(Intake::CloudOnly { clouds });
        }

        let indices = transport
            .subscribe::<IndexSet>(&params.topics.indices)
            .wrap_err_with(|| format!("Failed to subscribe to '{}'", params.topics.indices))?;

        let (pairs, stats) = sync(clouds, indices, params.sync_policy, params.max_queue_size)
            .wrap_err("Failed to create synchronization stream")?;

        info!(
            cloud_topic = %params.topics.input,
            indices_topic = %params.topics.indices,
            policy = ?params.sync_policy,
            max_queue_size = params.max_queue_size,
            "Subscribed to clouds and indices"
        );

        Ok(Intake::Synchronized { pairs, stats })
    }

    /// Wait for the next cloud to process. Returns `None` once the inbound
    /// topics are closed.
    pub async fn next(&mut self) -> Option<(Arc<PointCloud>, Option<Arc<IndexSet>>)> {
        match self {
            Intake::CloudOnly { clouds } => clouds.next().await.map(|cloud| (cloud, None)),
            Intake::Synchronized { pairs, .. } => pairs
                .next()
                .await
                .map(|(cloud, indices)| (cloud, Some(indices))),
        }
    }

    /// Join statistics, if this intake pairs two streams.
    pub fn sync_stats(&self) -> Option<SyncStats> {
        match self {
            Intake::CloudOnly { .. } => None,
            Intake::Synchronized { stats, .. } => Some(*stats.borrow()),
        }
    }
}

enum Lifecycle<P> {
    /// Startup failed; the stage never subscribed to anything.
    Inert { error: String },
    Active {
        intake: Intake,
        pipeline: Pipeline<P>,
    },
}

/// A streaming smoothing stage.
///
/// # Example
///
/// ```ignore
/// let bus = LocalBus::new();
/// let config = Config::load("stage.yaml")?;
/// let stage = Stage::start(&bus, &config, MovingLeastSquares::new());
/// let stats = stage.run().await;
/// ```
pub struct Stage<P> {
    lifecycle: Lifecycle<P>,
}

impl<P> Stage<P>
where
    P: ProcessingCore,
{
    /// Validate `config`, advertise the outputs and subscribe to the inputs.
    ///
    /// A configuration error is logged once and leaves the stage inert: it
    /// holds no subscriptions and [run](Stage::run) returns immediately.
    pub fn start<T>(transport: &T, config: &Config, core: P) -> Self
    where
        T: Transport,
    {
        match Self::activate(transport, config, core) {
            Ok(lifecycle) => Self { lifecycle },
            Err(e) => {
                let error = format!("{:#}", e);
                error!(error = %error, "Stage stays inert");
                Self {
                    lifecycle: Lifecycle::Inert { error },
                }
            }
        }
    }

    fn activate<T>(transport: &T, config: &Config, core: P) -> Result<Lifecycle<P>>
    where
        T: Transport,
    {
        let params = config
            .validate()
            .wrap_err("Invalid stage configuration")?;

        info!(
            search_radius = params.search_radius,
            spatial_locator = ?params.spatial_locator,
            use_indices = params.use_indices,
            sync_policy = ?params.sync_policy,
            max_queue_size = params.max_queue_size,
            "Configured smoothing stage"
        );

        let output = transport
            .advertise::<PointCloud>(&params.topics.output)
            .wrap_err_with(|| format!("Failed to advertise '{}'", params.topics.output))?;
        let normals = transport
            .advertise::<NormalCloud>(&params.topics.normals)
            .wrap_err_with(|| format!("Failed to advertise '{}'", params.topics.normals))?;

        let intake = Intake::connect(transport, &params)?;

        let processing = ProcessingParams {
            search_radius: params.search_radius,
            spatial_locator: params.spatial_locator,
        };
        let pipeline = Pipeline::new(core, processing, output, normals);

        Ok(Lifecycle::Active { intake, pipeline })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Active { .. })
    }

    /// The error that kept the stage inert, if any.
    pub fn startup_error(&self) -> Option<&str> {
        match &self.lifecycle {
            Lifecycle::Inert { error } => Some(error.as_str()),
            Lifecycle::Active { .. } => None,
        }
    }

    /// Process clouds until the inbound topics close.
    ///
    /// Invocations run one at a time on the calling task.
    pub async fn run(self) -> PipelineStats {
        let (mut intake, mut pipeline) = match self.lifecycle {
            Lifecycle::Active { intake, pipeline } => (intake, pipeline),
            Lifecycle::Inert { .. } => {
                debug!("Inert stage has nothing to run");
                return PipelineStats::default();
            }
        };

        info!("Starting smoothing loop");

        let mut last_stats_log = Instant::now();

        while let Some((cloud, indices)) = intake.next().await {
            pipeline.invoke(cloud, indices);

            // Periodically log statistics
            if last_stats_log.elapsed() >= STATS_LOG_INTERVAL {
                log_stats(&pipeline, &intake);
                last_stats_log = Instant::now();
            }
        }

        info!("Smoothing loop ended");
        log_stats(&pipeline, &intake);

        pipeline.stats()
    }
}

fn log_stats<P>(pipeline: &Pipeline<P>, intake: &Intake)
where
    P: ProcessingCore,
{
    let stats = pipeline.stats();
    info!(
        invocations = stats.invocations,
        skipped = stats.skipped,
        degraded = stats.degraded,
        completed = stats.completed,
        core_failures = stats.core_failures,
        "Pipeline statistics"
    );

    if let Some(sync) = intake.sync_stats() {
        info!(
            pairs_emitted = sync.pairs_emitted,
            late_rejected = sync.late_rejected,
            evicted = sync.evicted,
            unmatched_dropped = sync.unmatched_dropped,
            "Synchronization statistics"
        );
    }
}
