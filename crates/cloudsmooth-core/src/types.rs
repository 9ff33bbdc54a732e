use std::time::Duration;

/// Creates a timestamp from the message passed to the synchronizer.
pub trait WithTimestamp: Send {
    fn timestamp(&self) -> Duration;
}

impl<T> WithTimestamp for std::sync::Arc<T>
where
    T: WithTimestamp + Sync,
{
    fn timestamp(&self) -> Duration {
        (**self).timestamp()
    }
}

/// The (frame id, timestamp) pair carried by every message.
///
/// Outputs copy the header of the triggering cloud verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Header {
    /// Capture time as a duration since the epoch.
    pub stamp: Duration,

    /// Coordinate frame identifier.
    pub frame_id: String,
}

impl Header {
    pub fn new(frame_id: impl Into<String>, stamp: Duration) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

/// A 3-D point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn squared_distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

impl From<[f32; 3]> for Point {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

/// A surface normal with its curvature estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Normal {
    pub normal_x: f32,
    pub normal_y: f32,
    pub normal_z: f32,
    pub curvature: f32,
}

impl Normal {
    /// A normal marked as undefined.
    pub const UNDEFINED: Normal = Normal {
        normal_x: f32::NAN,
        normal_y: f32::NAN,
        normal_z: f32::NAN,
        curvature: f32::NAN,
    };

    pub fn is_defined(&self) -> bool {
        self.normal_x.is_finite() && self.normal_y.is_finite() && self.normal_z.is_finite()
    }
}

/// An ordered set of points with its header.
///
/// `width * height` is the logical point count. Organized clouds have
/// `height > 1`; unorganized clouds have `height == 1`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub points: Vec<Point>,
}

impl PointCloud {
    /// Create an unorganized cloud.
    pub fn new(header: Header, points: Vec<Point>) -> Self {
        Self {
            header,
            width: points.len() as u32,
            height: 1,
            points,
        }
    }

    /// A cloud without points, used to signal a failed invocation.
    pub fn empty(header: Header) -> Self {
        Self {
            header,
            width: 0,
            height: 0,
            points: Vec::new(),
        }
    }

    /// The logical point count declared by `width * height`.
    pub fn point_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl WithTimestamp for PointCloud {
    fn timestamp(&self) -> Duration {
        self.header.stamp
    }
}

/// Per-point normals published alongside a smoothed cloud.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalCloud {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub normals: Vec<Normal>,
}

impl NormalCloud {
    pub fn new(header: Header, normals: Vec<Normal>) -> Self {
        Self {
            header,
            width: normals.len() as u32,
            height: 1,
            normals,
        }
    }

    pub fn len(&self) -> usize {
        self.normals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.normals.is_empty()
    }
}

/// A subset of a companion cloud's points, identified by position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexSet {
    pub header: Header,
    pub indices: Vec<i32>,
}

impl IndexSet {
    pub fn new(header: Header, indices: Vec<i32>) -> Self {
        Self { header, indices }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl WithTimestamp for IndexSet {
    fn timestamp(&self) -> Duration {
        self.header.stamp
    }
}
