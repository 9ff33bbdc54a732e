//! Configuration parsing and validation for a smoothing stage.

use crate::{locator::SpatialLocatorKind, state::SyncPolicy};
use eyre::{Result, WrapErr, bail, ensure, eyre};
use serde::Deserialize;
use serde_yaml::Value;
use std::{fs, path::Path, time::Duration};

/// Root configuration structure, as read from YAML.
///
/// The required options are kept optional and untyped here so that a
/// missing or malformed value surfaces from [Config::validate] as a
/// configuration error rather than a parse failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Neighbourhood radius used by the surface fit. Required.
    #[serde(default)]
    pub search_radius: Option<Value>,

    /// Nearest-neighbour search structure, by name or numeric code.
    /// Required.
    #[serde(default)]
    pub spatial_locator: Option<Value>,

    /// Pair each cloud with an index set on the indices topic.
    #[serde(default)]
    pub use_indices: bool,

    /// Use approximate rather than exact timestamp pairing.
    #[serde(default)]
    pub approximate_sync: bool,

    /// Maximum number of unpaired messages kept per input.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Maximum stamp difference for approximate pairing.
    #[serde(default = "default_approximate_tolerance", with = "humantime_serde")]
    pub approximate_tolerance: Duration,

    /// Topic names.
    #[serde(default)]
    pub topics: TopicConfig,

    /// Point towards which estimated normals are flipped.
    #[serde(default)]
    pub viewpoint: [f32; 3],
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_radius: None,
            spatial_locator: None,
            use_indices: false,
            approximate_sync: false,
            max_queue_size: default_max_queue_size(),
            approximate_tolerance: default_approximate_tolerance(),
            topics: TopicConfig::default(),
            viewpoint: [0.0; 3],
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a YAML document without validating it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Validate the configuration and freeze it into stage parameters.
    pub fn validate(&self) -> Result<StageParams> {
        let Some(search_radius) = &self.search_radius else {
            bail!("Need a 'search_radius' parameter to be set before continuing");
        };
        let search_radius = parse_search_radius(search_radius)?;

        let Some(spatial_locator) = &self.spatial_locator else {
            bail!("Need a 'spatial_locator' parameter to be set before continuing");
        };
        let spatial_locator = parse_spatial_locator(spatial_locator)?;

        ensure!(
            self.max_queue_size > 0,
            "max_queue_size must be greater than zero"
        );

        let sync_policy = if self.approximate_sync {
            ensure!(
                !self.approximate_tolerance.is_zero(),
                "approximate_tolerance must be greater than zero"
            );
            SyncPolicy::Approximate {
                tolerance: self.approximate_tolerance,
            }
        } else {
            SyncPolicy::Exact
        };

        self.topics.validate(self.use_indices)?;

        ensure!(
            self.viewpoint.iter().all(|v| v.is_finite()),
            "viewpoint must be finite"
        );

        Ok(StageParams {
            search_radius,
            spatial_locator,
            use_indices: self.use_indices,
            sync_policy,
            max_queue_size: self.max_queue_size,
            topics: self.topics.clone(),
            viewpoint: self.viewpoint,
        })
    }
}

fn default_max_queue_size() -> usize {
    3
}

fn default_approximate_tolerance() -> Duration {
    Duration::from_millis(50)
}

fn parse_search_radius(value: &Value) -> Result<f64> {
    let Some(radius) = value.as_f64() else {
        bail!("search_radius must be a number, got {:?}", value);
    };

    // The surface fit searches in single precision.
    let single = radius as f32;
    ensure!(
        radius.is_finite() && single.is_finite() && single > 0.0,
        "search_radius must be a positive finite number, got {}",
        radius
    );
    Ok(radius)
}

fn parse_spatial_locator(value: &Value) -> Result<SpatialLocatorKind> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .and_then(SpatialLocatorKind::from_code)
            .ok_or_else(|| eyre!("Unknown spatial_locator code {}", number)),
        Value::String(name) => serde_yaml::from_value(value.clone()).map_err(|_| {
            eyre!(
                "Unknown spatial_locator '{}', expected brute_force or rtree",
                name
            )
        }),
        other => bail!(
            "spatial_locator must be a locator name or code, got {:?}",
            other
        ),
    }
}

/// Topic names used by the stage.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TopicConfig {
    pub input: String,
    pub indices: String,
    pub output: String,
    pub normals: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            input: "input".to_string(),
            indices: "indices".to_string(),
            output: "output".to_string(),
            normals: "normals".to_string(),
        }
    }
}

impl TopicConfig {
    fn validate(&self, use_indices: bool) -> Result<()> {
        let mut names = vec![
            ("input", &self.input),
            ("output", &self.output),
            ("normals", &self.normals),
        ];
        if use_indices {
            names.push(("indices", &self.indices));
        }

        for (role, name) in &names {
            ensure!(!name.is_empty(), "topics.{} cannot be empty", role);
        }

        let mut sorted: Vec<&str> = names.iter().map(|(_, name)| name.as_str()).collect();
        sorted.sort_unstable();
        for window in sorted.windows(2) {
            if window[0] == window[1] {
                bail!("Duplicate topic name: {}", window[0]);
            }
        }

        Ok(())
    }
}

/// Validated, immutable stage parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StageParams {
    pub search_radius: f64,
    pub spatial_locator: SpatialLocatorKind,
    pub use_indices: bool,
    pub sync_policy: SyncPolicy,
    pub max_queue_size: usize,
    pub topics: TopicConfig,
    pub viewpoint: [f32; 3],
}
