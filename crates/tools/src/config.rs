use std::fs;
use std::path::{Path, PathBuf};

use foundation::MAX_ZOOM;
use scene::{QuadtreeConfig, ShapeConfig, View};
use serde::{Deserialize, Serialize};
use streaming::{TemplateError, TileCacheConfig, TileDownsampler, UrlTemplate};
use thiserror::Error;
use tracing::info;

pub const IMAGERY_URL_ENV: &str = "TILEWALK_IMAGERY_URL";
pub const TERRAIN_URL_ENV: &str = "TILEWALK_TERRAIN_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{source_name} source: {error}")]
    Template {
        source_name: &'static str,
        error: TemplateError,
    },
    #[error("{source_name} source: levels {min_z}..={max_z} must be ordered and within 0..={MAX_ZOOM}")]
    Levels {
        source_name: &'static str,
        min_z: u8,
        max_z: u8,
    },
}

/// One tile source: where to fetch and how much to keep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// URL template with `{z}`, `{x}` and `{y}`.
    pub url: String,
    pub cache: TileCacheConfig,
    pub levels: TileDownsampler,
}

impl SourceConfig {
    fn new(url: &str, min_z: u8, max_z: u8) -> Self {
        Self {
            url: url.to_string(),
            cache: TileCacheConfig::default(),
            levels: TileDownsampler::new(min_z, max_z),
        }
    }

    pub fn template(&self, source_name: &'static str) -> Result<UrlTemplate, ConfigError> {
        UrlTemplate::parse(self.url.clone())
            .map_err(|error| ConfigError::Template { source_name, error })
    }

    pub fn check_levels(&self, source_name: &'static str) -> Result<(), ConfigError> {
        let TileDownsampler { min_z, max_z } = self.levels;
        if min_z > max_z || max_z > MAX_ZOOM {
            return Err(ConfigError::Levels {
                source_name,
                min_z,
                max_z,
            });
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080/{z}/{x}/{y}.png", 0, 22)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub imagery: SourceConfig,
    pub terrain: SourceConfig,
    /// Default zoom of point elevation lookups.
    pub elevation_zoom: u8,
    /// Views closer than this are pushed back before realisation.
    pub min_distance_m: f64,
    pub fetch_timeout_ms: u64,
    pub quadtree: QuadtreeConfig,
    pub shapes: ShapeConfig,
    /// Initial view.
    pub view: View,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            imagery: SourceConfig::new("https://tile.openstreetmap.org/{z}/{x}/{y}.png", 0, 19),
            terrain: SourceConfig::new("http://localhost:8080/terrain-rgb/{z}/{x}/{y}.png", 0, 15),
            elevation_zoom: 10,
            min_distance_m: 100.0,
            fetch_timeout_ms: 10_000,
            quadtree: QuadtreeConfig::default(),
            shapes: ShapeConfig::default(),
            view: View::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, or the JSON file at `path`, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.imagery.template("imagery")?;
        self.terrain.template("terrain")?;
        self.imagery.check_levels("imagery")?;
        self.terrain.check_levels("terrain")
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Replace source URLs from `lookup` (the process environment in
    /// [`EngineConfig::load`]).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(IMAGERY_URL_ENV) {
            self.imagery.url = url;
        }
        if let Some(url) = lookup(TERRAIN_URL_ENV) {
            self.terrain.url = url;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pretty_assertions::assert_eq;

    use super::{ConfigError, EngineConfig, IMAGERY_URL_ENV, TERRAIN_URL_ENV};

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "terrain": { "url": "https://dem.example/{z}/{x}/{y}.png", "levels": { "max_z": 12 } },
                "quadtree": { "max_z": 18 },
                "view": { "distance": 2500.0, "orientation": [45.0, 10.0, 0.0] }
            }"#,
        )
        .unwrap();

        let defaults = EngineConfig::default();
        assert_eq!(config.imagery, defaults.imagery);
        assert_eq!(config.terrain.url, "https://dem.example/{z}/{x}/{y}.png");
        assert_eq!(config.terrain.levels.max_z, 12);
        assert_eq!(config.terrain.levels.min_z, 0);
        assert_eq!(config.terrain.cache.pending_ttl_ms, 200);
        assert_eq!(config.quadtree.max_z, 18);
        assert_eq!(config.quadtree.size_threshold_px, 256.0);
        assert_eq!(config.view.distance, 2500.0);
        assert_eq!(config.view.screen, [800.0, 600.0]);
    }

    #[test]
    fn overrides_replace_urls() {
        let mut config = EngineConfig::default();
        config.apply_overrides(|key| match key {
            IMAGERY_URL_ENV => Some("mem://img/{z}/{x}/{y}".to_string()),
            _ => None,
        });
        assert_eq!(config.imagery.url, "mem://img/{z}/{x}/{y}");
        assert_eq!(config.terrain.url, EngineConfig::default().terrain.url);

        config.apply_overrides(|key| (key == TERRAIN_URL_ENV).then(|| "mem://dem/{z}/{x}/{y}".into()));
        assert_eq!(config.terrain.url, "mem://dem/{z}/{x}/{y}");
    }

    #[test]
    fn bad_template_names_the_source() {
        let mut config = EngineConfig::default();
        config.terrain.url = "https://dem.example/{z}/{x}.png".to_string();
        let err = config.terrain.template("terrain").unwrap_err();
        assert!(matches!(err, ConfigError::Template { source_name: "terrain", .. }));
        assert!(err.to_string().contains("{y}"), "{err}");
    }

    #[test]
    fn inverted_levels_are_rejected() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "terrain": { "levels": { "min_z": 12, "max_z": 4 } } }"#)
                .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Levels {
                source_name: "terrain",
                min_z: 12,
                max_z: 4
            }
        ));

        let mut config = EngineConfig::default();
        config.imagery.levels.max_z = 31;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Levels { source_name: "imagery", .. })
        ));
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/tilewalk.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
