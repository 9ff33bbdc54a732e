use cloudsmooth_core::{
    Config, Header, IndexSet, LocalBus, NormalCloud, Normal, Pipeline, Point, PointCloud,
    ProcessingCore, ProcessingParams, Publisher, SpatialLocatorKind, Transport,
    transport::Subscription,
};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

pub const FRAME: &str = "lidar";

pub fn header(stamp_ms: u64) -> Header {
    Header::new(FRAME, Duration::from_millis(stamp_ms))
}

/// An unorganized `n`-point cloud laid out on a flat 10-column grid.
pub fn grid_cloud(stamp_ms: u64, n: usize) -> PointCloud {
    let points = (0..n)
        .map(|i| Point::new((i % 10) as f32 * 0.1, (i / 10) as f32 * 0.1, 1.0))
        .collect();
    PointCloud::new(header(stamp_ms), points)
}

#[allow(dead_code)]
pub fn index_set(stamp_ms: u64, indices: &[i32]) -> IndexSet {
    IndexSet::new(header(stamp_ms), indices.to_vec())
}

#[allow(dead_code)]
pub fn processing_params() -> ProcessingParams {
    ProcessingParams {
        search_radius: 0.15,
        spatial_locator: SpatialLocatorKind::BruteForce,
    }
}

/// A configuration with the required options set, followed by `extra`.
#[allow(dead_code)]
pub fn config(extra: &str) -> Config {
    let yaml = format!("search_radius: 0.15\nspatial_locator: brute_force\n{extra}");
    Config::from_yaml(&yaml).unwrap()
}

/// What a [StubCore] has been asked to do.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct CoreCalls {
    pub set_input: usize,
    pub set_indices: usize,
    pub process: usize,
    pub last_indices_len: Option<Option<usize>>,
}

/// A processing core that echoes the selected input points with unit
/// normals and a bogus header.
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct StubCore {
    calls: Arc<Mutex<CoreCalls>>,
    input: Option<Arc<PointCloud>>,
    indices: Option<Arc<IndexSet>>,
}

#[allow(dead_code)]
impl StubCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_calls(&self) -> usize {
        self.calls.lock().unwrap().process
    }

    pub fn calls(&self) -> std::sync::MutexGuard<'_, CoreCalls> {
        self.calls.lock().unwrap()
    }
}

impl ProcessingCore for StubCore {
    fn set_input(&mut self, cloud: Arc<PointCloud>) {
        self.calls.lock().unwrap().set_input += 1;
        self.input = Some(cloud);
    }

    fn set_indices(&mut self, indices: Option<Arc<IndexSet>>) {
        let mut calls = self.calls.lock().unwrap();
        calls.set_indices += 1;
        calls.last_indices_len = Some(indices.as_ref().map(|indices| indices.len()));
        self.indices = indices;
    }

    fn process(&mut self, _params: &ProcessingParams) -> eyre::Result<(PointCloud, NormalCloud)> {
        self.calls.lock().unwrap().process += 1;

        let input = self
            .input
            .as_ref()
            .ok_or_else(|| eyre::eyre!("no input bound"))?;

        let points: Vec<Point> = match &self.indices {
            Some(indices) => indices
                .indices
                .iter()
                .map(|&i| input.points[i as usize])
                .collect(),
            None => input.points.clone(),
        };

        let normal = Normal {
            normal_x: 0.0,
            normal_y: 0.0,
            normal_z: 1.0,
            curvature: 0.0,
        };
        let normals = vec![normal; points.len()];

        let bogus = Header::new("stub", Duration::ZERO);
        Ok((
            PointCloud::new(bogus.clone(), points),
            NormalCloud::new(bogus, normals),
        ))
    }
}

/// A bus with consumers attached to both outputs.
#[allow(dead_code)]
pub struct Sinks {
    pub output: Subscription<PointCloud>,
    pub normals: Subscription<NormalCloud>,
}

#[allow(dead_code)]
impl Sinks {
    pub fn attach(bus: &LocalBus) -> Self {
        Self {
            output: bus.subscription("output").unwrap(),
            normals: bus.subscription("normals").unwrap(),
        }
    }
}

#[allow(dead_code)]
pub fn stub_pipeline(bus: &LocalBus, core: StubCore) -> Pipeline<StubCore> {
    Pipeline::new(
        core,
        processing_params(),
        bus.advertise("output").unwrap(),
        bus.advertise("normals").unwrap(),
    )
}

/// Publishers for the stage inputs.
#[allow(dead_code)]
pub struct Sources {
    pub input: Box<dyn Publisher<PointCloud>>,
    pub indices: Box<dyn Publisher<IndexSet>>,
}

#[allow(dead_code)]
impl Sources {
    pub fn advertise(bus: &LocalBus) -> Self {
        Self {
            input: bus.advertise("input").unwrap(),
            indices: bus.advertise("indices").unwrap(),
        }
    }

    pub fn cloud(&self, cloud: PointCloud) {
        self.input.publish(Arc::new(cloud)).unwrap();
    }

    pub fn indices(&self, indices: IndexSet) {
        self.indices.publish(Arc::new(indices)).unwrap();
    }

    /// Close both inbound topics so that a running stage drains and stops.
    /// The outbound topics stay open.
    pub fn finish(&self, bus: &LocalBus) {
        bus.close("input");
        bus.close("indices");
    }
}
