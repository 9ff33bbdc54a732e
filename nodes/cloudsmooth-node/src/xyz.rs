//! ASCII XYZ cloud files: one point per line, whitespace separated.
//!
//! Blank lines and lines starting with `#` are skipped. Columns beyond the
//! third are ignored on read.

use cloudsmooth_core::{Header, NormalCloud, Point, PointCloud};
use eyre::{Result, WrapErr, bail};
use std::{
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

/// Read a cloud from `path` and stamp it with `header`.
pub fn read_cloud(path: &Path, header: Header) -> Result<PointCloud> {
    let contents = fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read cloud file: {}", path.display()))?;
    let points = parse_points(&contents)
        .wrap_err_with(|| format!("Failed to parse cloud file: {}", path.display()))?;
    Ok(PointCloud::new(header, points))
}

pub fn parse_points(contents: &str) -> Result<Vec<Point>> {
    let mut points = Vec::new();

    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut coords = [0.0f32; 3];
        let mut fields = line.split_whitespace();
        for coord in &mut coords {
            let Some(field) = fields.next() else {
                bail!("line {}: expected 3 coordinates", number + 1);
            };
            *coord = field
                .parse()
                .wrap_err_with(|| format!("line {}: invalid coordinate '{}'", number + 1, field))?;
        }
        points.push(Point::from(coords));
    }

    Ok(points)
}

pub fn format_points(cloud: &PointCloud) -> String {
    let mut out = String::new();
    for point in &cloud.points {
        let _ = writeln!(out, "{} {} {}", point.x, point.y, point.z);
    }
    out
}

/// One line per normal: `nx ny nz curvature`.
pub fn format_normals(normals: &NormalCloud) -> String {
    let mut out = String::new();
    for normal in &normals.normals {
        let _ = writeln!(
            out,
            "{} {} {} {}",
            normal.normal_x, normal.normal_y, normal.normal_z, normal.curvature
        );
    }
    out
}

/// `dir/stem.xyz` becomes `dir/stem_{suffix}.xyz`.
pub fn sibling_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cloud".to_string());
    input.with_file_name(format!("{stem}_{suffix}.xyz"))
}

pub fn write(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).wrap_err_with(|| format!("Failed to write {}", path.display()))
}
