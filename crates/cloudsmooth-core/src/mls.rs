//! A planar moving-least-squares smoother.
//!
//! Every selected point is projected onto the least-squares plane through
//! its neighbours within the search radius. The plane normal, oriented
//! towards the viewpoint, becomes the point's normal.

use crate::{
    locator::Locator,
    processing::{ProcessingCore, ProcessingParams},
    types::{IndexSet, Normal, NormalCloud, Point, PointCloud},
};
use eyre::{Result, ensure, eyre};
use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use std::sync::Arc;
use tracing::trace;

/// Minimum neighbourhood size for a plane fit.
const MIN_NEIGHBORS: usize = 3;

/// Reference implementation of [ProcessingCore].
#[derive(Debug, Clone, Default)]
pub struct MovingLeastSquares {
    input: Option<Arc<PointCloud>>,
    indices: Option<Arc<IndexSet>>,
    viewpoint: Point,
}

struct PlaneFit {
    centroid: Vector3<f64>,
    normal: Vector3<f64>,
    curvature: f64,
}

impl MovingLeastSquares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orient normals towards `viewpoint` instead of the origin.
    pub fn with_viewpoint(viewpoint: Point) -> Self {
        Self {
            viewpoint,
            ..Self::default()
        }
    }

    fn selection(&self, point_count: usize) -> Result<Vec<usize>> {
        let Some(indices) = &self.indices else {
            return Ok((0..point_count).collect());
        };

        indices
            .indices
            .iter()
            .map(|&index| {
                usize::try_from(index)
                    .ok()
                    .filter(|&index| index < point_count)
                    .ok_or_else(|| eyre!("index {} outside cloud of {} points", index, point_count))
            })
            .collect()
    }

    fn orient(&self, normal: Vector3<f64>, point: &Point) -> Vector3<f64> {
        let towards_viewpoint = Vector3::new(
            f64::from(self.viewpoint.x - point.x),
            f64::from(self.viewpoint.y - point.y),
            f64::from(self.viewpoint.z - point.z),
        );
        if normal.dot(&towards_viewpoint) < 0.0 {
            -normal
        } else {
            normal
        }
    }
}

impl ProcessingCore for MovingLeastSquares {
    fn set_input(&mut self, cloud: Arc<PointCloud>) {
        self.input = Some(cloud);
    }

    fn set_indices(&mut self, indices: Option<Arc<IndexSet>>) {
        self.indices = indices;
    }

    fn process(&mut self, params: &ProcessingParams) -> Result<(PointCloud, NormalCloud)> {
        let cloud = self
            .input
            .as_ref()
            .ok_or_else(|| eyre!("No input cloud bound"))?;
        let radius = params.search_radius as f32;
        ensure!(
            radius.is_finite() && radius > 0.0,
            "search radius must be a positive single-precision value, got {}",
            params.search_radius
        );

        let selection = self.selection(cloud.points.len())?;
        let locator = Locator::build(params.spatial_locator, &cloud.points);

        let mut points = Vec::with_capacity(selection.len());
        let mut normals = Vec::with_capacity(selection.len());
        let mut neighbors = Vec::new();
        let mut unfitted = 0usize;

        for &index in &selection {
            let point = &cloud.points[index];
            locator.radius_search(point, radius, &mut neighbors);

            match fit_plane(&cloud.points, &neighbors) {
                Some(fit) => {
                    let position = to_vector(point);
                    let offset = (position - fit.centroid).dot(&fit.normal);
                    let projected = position - fit.normal * offset;
                    let normal = self.orient(fit.normal, point);

                    points.push(Point::new(
                        projected.x as f32,
                        projected.y as f32,
                        projected.z as f32,
                    ));
                    normals.push(Normal {
                        normal_x: normal.x as f32,
                        normal_y: normal.y as f32,
                        normal_z: normal.z as f32,
                        curvature: fit.curvature as f32,
                    });
                }
                None => {
                    unfitted += 1;
                    points.push(*point);
                    normals.push(Normal::UNDEFINED);
                }
            }
        }

        trace!(
            selected = selection.len(),
            unfitted,
            "Moving least squares pass finished"
        );

        Ok((
            PointCloud::new(cloud.header.clone(), points),
            NormalCloud::new(cloud.header.clone(), normals),
        ))
    }
}

fn to_vector(point: &Point) -> Vector3<f64> {
    Vector3::new(f64::from(point.x), f64::from(point.y), f64::from(point.z))
}

fn fit_plane(points: &[Point], neighbors: &[usize]) -> Option<PlaneFit> {
    if neighbors.len() < MIN_NEIGHBORS {
        return None;
    }

    let count = neighbors.len() as f64;
    let centroid = neighbors
        .iter()
        .fold(Vector3::<f64>::zeros(), |acc, &index| acc + to_vector(&points[index]))
        / count;

    let mut covariance = Matrix3::<f64>::zeros();
    for &index in neighbors {
        let delta = to_vector(&points[index]) - centroid;
        covariance += delta * delta.transpose();
    }
    covariance /= count;

    let eigen = SymmetricEigen::new(covariance);
    let (smallest, &lambda) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|lhs, rhs| lhs.1.total_cmp(rhs.1))?;

    let normal = eigen.eigenvectors.column(smallest).normalize();
    if !normal.iter().all(|v| v.is_finite()) {
        return None;
    }

    let total = eigen.eigenvalues.sum();
    let curvature = if total > 0.0 { lambda.max(0.0) / total } else { 0.0 };

    Some(PlaneFit {
        centroid,
        normal,
        curvature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{locator::SpatialLocatorKind, types::Header};
    use std::time::Duration;

    fn header() -> Header {
        Header::new("lidar", Duration::from_millis(1000))
    }

    /// A 10x10 grid at z = 1 with a +/-0.01 checkerboard ripple.
    fn rippled_plane() -> PointCloud {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
                points.push(Point::new(i as f32 * 0.1, j as f32 * 0.1, 1.0 + 0.01 * sign));
            }
        }
        PointCloud::new(header(), points)
    }

    fn params(kind: SpatialLocatorKind) -> ProcessingParams {
        ProcessingParams {
            search_radius: 0.15,
            spatial_locator: kind,
        }
    }

    fn is_interior(index: usize) -> bool {
        let (i, j) = (index / 10, index % 10);
        (1..9).contains(&i) && (1..9).contains(&j)
    }

    #[test]
    fn test_flattens_ripple() {
        let mut mls = MovingLeastSquares::new();
        mls.set_input(Arc::new(rippled_plane()));
        mls.set_indices(None);

        let (smoothed, normals) = mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();
        assert_eq!(smoothed.len(), 100);
        assert_eq!(normals.len(), 100);

        for (index, (point, normal)) in smoothed.points.iter().zip(&normals.normals).enumerate() {
            if !is_interior(index) {
                continue;
            }
            assert!((point.z - 1.0).abs() < 0.005, "point {index} at z {}", point.z);
            // The origin lies below the plane.
            assert!(normal.normal_z < -0.99, "normal {index}: {normal:?}");
            assert!(normal.curvature >= 0.0);
        }
    }

    #[test]
    fn test_locators_agree() {
        let cloud = Arc::new(rippled_plane());

        let mut mls = MovingLeastSquares::new();
        mls.set_input(cloud.clone());
        let (brute, _) = mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();
        let (tree, _) = mls.process(&params(SpatialLocatorKind::RTree)).unwrap();

        assert_eq!(brute, tree);
    }

    #[test]
    fn test_viewpoint_orientation() {
        let mut mls = MovingLeastSquares::with_viewpoint(Point::new(0.5, 0.5, 5.0));
        mls.set_input(Arc::new(rippled_plane()));

        let (_, normals) = mls.process(&params(SpatialLocatorKind::RTree)).unwrap();
        assert!(normals.normals[55].normal_z > 0.99);
    }

    #[test]
    fn test_indices_restrict_output() {
        let mut mls = MovingLeastSquares::new();
        mls.set_input(Arc::new(rippled_plane()));
        mls.set_indices(Some(Arc::new(IndexSet::new(header(), vec![11, 55, 88]))));

        let (smoothed, normals) = mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();
        assert_eq!(smoothed.len(), 3);
        assert_eq!(normals.len(), 3);
        assert!((smoothed.points[1].x - 0.5).abs() < 1e-4);

        // Rebinding without indices selects the whole cloud again.
        mls.set_indices(None);
        let (smoothed, _) = mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();
        assert_eq!(smoothed.len(), 100);
    }

    #[test]
    fn test_empty_indices_select_nothing() {
        let mut mls = MovingLeastSquares::new();
        mls.set_input(Arc::new(rippled_plane()));
        mls.set_indices(Some(Arc::new(IndexSet::new(header(), vec![]))));

        let (smoothed, normals) = mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();
        assert!(smoothed.is_empty());
        assert!(normals.is_empty());
    }

    #[test]
    fn test_isolated_point_keeps_position() {
        let cloud = PointCloud::new(
            header(),
            vec![
                Point::new(0.0, 0.0, 0.0),
                Point::new(0.01, 0.0, 0.0),
                Point::new(0.0, 0.01, 0.0),
                Point::new(5.0, 5.0, 5.0),
            ],
        );

        let mut mls = MovingLeastSquares::new();
        mls.set_input(Arc::new(cloud));
        let (smoothed, normals) = mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();

        assert_eq!(smoothed.points[3], Point::new(5.0, 5.0, 5.0));
        assert!(!normals.normals[3].is_defined());
        assert!(normals.normals[0].is_defined());
    }

    #[test]
    fn test_input_left_untouched() {
        let cloud = Arc::new(rippled_plane());
        let snapshot = (*cloud).clone();

        let mut mls = MovingLeastSquares::new();
        mls.set_input(cloud.clone());
        mls.process(&params(SpatialLocatorKind::BruteForce)).unwrap();

        assert_eq!(*cloud, snapshot);
    }

    #[test]
    fn test_process_without_input() {
        let mut mls = MovingLeastSquares::new();
        assert!(mls.process(&params(SpatialLocatorKind::BruteForce)).is_err());
    }

    #[test]
    fn test_out_of_range_indices_error() {
        let mut mls = MovingLeastSquares::new();
        mls.set_input(Arc::new(rippled_plane()));
        mls.set_indices(Some(Arc::new(IndexSet::new(header(), vec![100]))));
        assert!(mls.process(&params(SpatialLocatorKind::BruteForce)).is_err());
    }

    #[test]
    fn test_radius_vanishing_in_single_precision() {
        let mut mls = MovingLeastSquares::new();
        mls.set_input(Arc::new(rippled_plane()));

        let params = ProcessingParams {
            search_radius: 1.0e-50,
            spatial_locator: SpatialLocatorKind::RTree,
        };
        assert!(mls.process(&params).is_err());
    }
}
