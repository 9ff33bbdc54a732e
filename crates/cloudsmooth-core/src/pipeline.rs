//! One invocation of the smoothing stage, from activation check to publish.

use crate::{
    activation::{SubscriberCounts, should_run},
    processing::{ProcessingCore, ProcessingParams},
    transport::Publisher,
    types::{IndexSet, NormalCloud, PointCloud},
    validity::{InvalidInput, check_cloud, check_indices},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// The inputs of a single invocation. Dropped when the invocation returns.
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub cloud: Arc<PointCloud>,
    pub indices: Option<Arc<IndexSet>>,
}

/// Why an invocation produced no smoothed output.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureReason {
    #[error(transparent)]
    Invalid(#[from] InvalidInput),

    #[error("processing core failed: {0}")]
    Core(String),
}

/// What the processing step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResult {
    Success {
        smoothed: PointCloud,
        normals: NormalCloud,
    },
    Failure {
        reason: FailureReason,
    },
}

/// The outcome of [Pipeline::invoke].
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Nobody listens on either output; nothing was done.
    Skipped,
    /// An empty cloud was published on the output channel only.
    Degraded(FailureReason),
    /// Both channels received a message.
    Completed { points: usize },
}

/// Counters kept by a [Pipeline].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineStats {
    pub invocations: u64,
    pub skipped: u64,
    pub degraded: u64,
    pub completed: u64,
    /// Degraded invocations caused by the processing core itself.
    pub core_failures: u64,
}

/// Runs the activation gate, the validity gate, the processing core and the
/// publish contract for one cloud at a time.
///
/// Every invocation that passes the activation gate publishes exactly one
/// cloud on the output channel. Only successful invocations publish on the
/// normals channel. Both outputs carry the header of the triggering cloud.
pub struct Pipeline<P> {
    core: P,
    params: ProcessingParams,
    output: Box<dyn Publisher<PointCloud>>,
    normals: Box<dyn Publisher<NormalCloud>>,
    stats: PipelineStats,
}

impl<P> Pipeline<P>
where
    P: ProcessingCore,
{
    pub fn new(
        core: P,
        params: ProcessingParams,
        output: Box<dyn Publisher<PointCloud>>,
        normals: Box<dyn Publisher<NormalCloud>>,
    ) -> Self {
        Self {
            core,
            params,
            output,
            normals,
            stats: PipelineStats::default(),
        }
    }

    pub fn params(&self) -> &ProcessingParams {
        &self.params
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn subscriber_counts(&self) -> SubscriberCounts {
        SubscriberCounts {
            output: self.output.subscriber_count(),
            normals: self.normals.subscriber_count(),
        }
    }

    /// Handle one cloud, optionally restricted to `indices`.
    pub fn invoke(
        &mut self,
        cloud: Arc<PointCloud>,
        indices: Option<Arc<IndexSet>>,
    ) -> Invocation {
        self.stats.invocations += 1;

        if !should_run(self.subscriber_counts()) {
            trace!(
                frame_id = %cloud.header.frame_id,
                stamp = ?cloud.header.stamp,
                "No subscribers, skipping"
            );
            self.stats.skipped += 1;
            return Invocation::Skipped;
        }

        debug!(
            frame_id = %cloud.header.frame_id,
            stamp = ?cloud.header.stamp,
            num_points = cloud.points.len(),
            num_indices = ?indices.as_ref().map(|indices| indices.len()),
            "Received cloud"
        );

        let request = ProcessingRequest { cloud, indices };
        let result = self.execute(&request);
        self.publish(&request, result)
    }

    fn execute(&mut self, request: &ProcessingRequest) -> ProcessingResult {
        match self.process(request) {
            Ok((smoothed, normals)) => ProcessingResult::Success { smoothed, normals },
            Err(reason) => ProcessingResult::Failure { reason },
        }
    }

    fn process(
        &mut self,
        request: &ProcessingRequest,
    ) -> Result<(PointCloud, NormalCloud), FailureReason> {
        let cloud = &request.cloud;
        check_cloud(cloud)?;

        if let Some(indices) = &request.indices {
            check_indices(indices, cloud)?;

            if indices.header.frame_id != cloud.header.frame_id {
                debug!(
                    cloud_frame = %cloud.header.frame_id,
                    indices_frame = %indices.header.frame_id,
                    "Indices and cloud frames differ"
                );
            }
        }

        self.core.set_input(cloud.clone());
        self.core.set_indices(request.indices.clone());
        self.core
            .process(&self.params)
            .map_err(|err| FailureReason::Core(format!("{:#}", err)))
    }

    fn publish(&mut self, request: &ProcessingRequest, result: ProcessingResult) -> Invocation {
        let header = &request.cloud.header;

        match result {
            ProcessingResult::Success {
                mut smoothed,
                mut normals,
            } => {
                smoothed.header = header.clone();
                normals.header = header.clone();
                let points = smoothed.len();

                self.send_output(smoothed);
                self.send_normals(normals);

                self.stats.completed += 1;
                Invocation::Completed { points }
            }
            ProcessingResult::Failure { reason } => {
                match &reason {
                    FailureReason::Invalid(InvalidInput::IndexOutOfRange { .. }) => {
                        error!(
                            frame_id = %header.frame_id,
                            stamp = ?header.stamp,
                            reason = %reason,
                            "Invalid indices"
                        );
                    }
                    FailureReason::Invalid(_) => {
                        error!(
                            frame_id = %header.frame_id,
                            stamp = ?header.stamp,
                            reason = %reason,
                            "Invalid input"
                        );
                    }
                    FailureReason::Core(_) => {
                        error!(
                            frame_id = %header.frame_id,
                            stamp = ?header.stamp,
                            reason = %reason,
                            "Smoothing failed"
                        );
                        self.stats.core_failures += 1;
                    }
                }

                self.send_output(PointCloud::empty(header.clone()));

                self.stats.degraded += 1;
                Invocation::Degraded(reason)
            }
        }
    }

    fn send_output(&self, cloud: PointCloud) {
        if let Err(e) = self.output.publish(Arc::new(cloud)) {
            warn!(error = %e, "Failed to publish smoothed cloud");
        }
    }

    fn send_normals(&self, normals: NormalCloud) {
        if let Err(e) = self.normals.publish(Arc::new(normals)) {
            warn!(error = %e, "Failed to publish normals");
        }
    }
}
