//! The boundary with the geometry library that performs the smoothing.

use crate::{
    locator::SpatialLocatorKind,
    types::{IndexSet, NormalCloud, PointCloud},
};
use eyre::Result;
use std::sync::Arc;

/// Parameters passed to [ProcessingCore::process] on every invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingParams {
    pub search_radius: f64,
    pub spatial_locator: SpatialLocatorKind,
}

/// A surface smoothing capability.
///
/// The input slot is rebound before every call to
/// [process](ProcessingCore::process); nothing bound by an earlier
/// invocation may influence a later one. Implementations read the bound
/// cloud and never modify it.
pub trait ProcessingCore: Send {
    /// Bind the cloud to process, replacing any previous binding.
    fn set_input(&mut self, cloud: Arc<PointCloud>);

    /// Bind the subset of points to process. `None` selects the whole
    /// cloud; an empty set selects nothing.
    fn set_indices(&mut self, indices: Option<Arc<IndexSet>>);

    /// Smooth the bound input and estimate one normal per output point.
    ///
    /// Headers of the returned clouds are overwritten by the caller.
    fn process(&mut self, params: &ProcessingParams) -> Result<(PointCloud, NormalCloud)>;
}

impl<P> ProcessingCore for Box<P>
where
    P: ProcessingCore + ?Sized,
{
    fn set_input(&mut self, cloud: Arc<PointCloud>) {
        (**self).set_input(cloud)
    }

    fn set_indices(&mut self, indices: Option<Arc<IndexSet>>) {
        (**self).set_indices(indices)
    }

    fn process(&mut self, params: &ProcessingParams) -> Result<(PointCloud, NormalCloud)> {
        (**self).process(params)
    }
}
