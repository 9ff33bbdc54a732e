//! Structural well-formedness checks for clouds and index sets.
//!
//! All functions here are pure. The `check_*` variants report why an input
//! was refused; the `is_valid_*` variants collapse that to a boolean.

use crate::types::{IndexSet, PointCloud};
use thiserror::Error;

/// The reason an input was refused by the validity gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidInput {
    /// `width * height` disagrees with the number of stored points.
    #[error("cloud declares {declared} points (width {width} x height {height}) but stores {stored}")]
    PointCountMismatch {
        width: u32,
        height: u32,
        declared: usize,
        stored: usize,
    },

    /// A point carries a NaN or infinite coordinate.
    #[error("point {position} has a non-finite coordinate")]
    NonFinitePoint { position: usize },

    /// An index falls outside `[0, point_count)` of the paired cloud.
    #[error("index {value} at position {position} is outside [0, {point_count})")]
    IndexOutOfRange {
        position: usize,
        value: i32,
        point_count: usize,
    },
}

/// Check that a cloud is well-formed.
pub fn check_cloud(cloud: &PointCloud) -> Result<(), InvalidInput> {
    let declared = cloud.point_count();
    let stored = cloud.points.len();

    if declared != stored {
        return Err(InvalidInput::PointCountMismatch {
            width: cloud.width,
            height: cloud.height,
            declared,
            stored,
        });
    }

    if let Some(position) = cloud.points.iter().position(|point| !point.is_finite()) {
        return Err(InvalidInput::NonFinitePoint { position });
    }

    Ok(())
}

/// Check that every index addresses a point of `cloud`.
///
/// An empty index set is valid.
pub fn check_indices(indices: &IndexSet, cloud: &PointCloud) -> Result<(), InvalidInput> {
    let point_count = cloud.points.len();

    let out_of_range = indices
        .indices
        .iter()
        .enumerate()
        .find(|&(_, &value)| usize::try_from(value).map_or(true, |value| value >= point_count));

    match out_of_range {
        Some((position, &value)) => Err(InvalidInput::IndexOutOfRange {
            position,
            value,
            point_count,
        }),
        None => Ok(()),
    }
}

pub fn is_valid_cloud(cloud: &PointCloud) -> bool {
    check_cloud(cloud).is_ok()
}

pub fn is_valid_indices(indices: &IndexSet, cloud: &PointCloud) -> bool {
    check_indices(indices, cloud).is_ok()
}
