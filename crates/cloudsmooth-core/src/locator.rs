//! Radius search structures used by the surface fit.

use crate::types::Point;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use serde::Deserialize;

/// Which search structure to build over the input cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialLocatorKind {
    /// Linear scan over every point.
    BruteForce,
    /// Bulk-loaded R-tree.
    #[serde(rename = "rtree")]
    RTree,
}

impl SpatialLocatorKind {
    /// Map the numeric `spatial_locator` codes onto locator kinds.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(SpatialLocatorKind::BruteForce),
            1 => Some(SpatialLocatorKind::RTree),
            _ => None,
        }
    }
}

/// A cloud point tagged with its position in the cloud.
pub(crate) struct IndexedPoint {
    index: usize,
    position: [f32; 3],
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        let dz = self.position[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// A search structure built for one cloud.
pub(crate) enum Locator<'a> {
    BruteForce { points: &'a [Point] },
    RTree { tree: RTree<IndexedPoint> },
}

impl<'a> Locator<'a> {
    pub fn build(kind: SpatialLocatorKind, points: &'a [Point]) -> Self {
        match kind {
            SpatialLocatorKind::BruteForce => Locator::BruteForce { points },
            SpatialLocatorKind::RTree => {
                let entries = points
                    .iter()
                    .enumerate()
                    .map(|(index, point)| IndexedPoint {
                        index,
                        position: [point.x, point.y, point.z],
                    })
                    .collect();
                Locator::RTree {
                    tree: RTree::bulk_load(entries),
                }
            }
        }
    }

    /// Collect into `out` the indices of all points within `radius` of
    /// `query`, in ascending order. `out` is cleared first.
    pub fn radius_search(&self, query: &Point, radius: f32, out: &mut Vec<usize>) {
        out.clear();
        let squared_radius = radius * radius;

        match self {
            Locator::BruteForce { points } => {
                out.extend(
                    points
                        .iter()
                        .enumerate()
                        .filter(|(_, point)| point.squared_distance(query) <= squared_radius)
                        .map(|(index, _)| index),
                );
            }
            Locator::RTree { tree } => {
                out.extend(
                    tree.locate_within_distance([query.x, query.y, query.z], squared_radius)
                        .map(|entry| entry.index),
                );
                out.sort_unstable();
            }
        }
    }
}
