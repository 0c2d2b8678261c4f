//! Server configuration loading and types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration loaded from a YAML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Service title, shown on the landing page.
    pub title: String,

    /// Service abstract, shown on the landing page.
    #[serde(rename = "abstract", default)]
    pub service_abstract: String,

    /// Public base URL clients use to reach this server.
    pub base_url: String,

    /// Value of the API-Version response header.
    #[serde(default = "default_version")]
    pub version: String,

    /// Languages served, in preference order. The first is the default.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,

    /// Directory holding the page templates.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    /// Directory holding the i18n message bundles (one YAML per language).
    #[serde(default = "default_i18n_dir")]
    pub i18n_dir: PathBuf,

    /// Enabled OGC APIs.
    pub ogc_api: OgcApiConfig,
}

impl Config {
    /// Load and validate configuration from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        // normalize so paths can be appended without double slashes
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            bail!("at least one language must be configured");
        }
        if let Some(styles) = &self.ogc_api.styles {
            // the default style must be the first entry in supported styles
            match styles.supported_styles.first() {
                Some(first) if first.id == styles.default => {}
                Some(first) => bail!(
                    "default style must be first entry in supported styles. '{}' does not match '{}'",
                    first.id,
                    styles.default
                ),
                None => bail!("styles api enabled without any supported styles"),
            }
        }
        Ok(())
    }

    /// All collections across the enabled APIs, features first.
    pub fn all_collections(&self) -> Vec<&CollectionConfig> {
        let mut result: Vec<&CollectionConfig> = Vec::new();
        if let Some(features) = &self.ogc_api.features {
            result.extend(features.collections.iter());
        }
        if let Some(geovolumes) = &self.ogc_api.geovolumes {
            result.extend(geovolumes.collections.iter());
        }
        result
    }

    pub fn find_collection(&self, id: &str) -> Option<&CollectionConfig> {
        self.all_collections().into_iter().find(|c| c.id == id)
    }
}

/// Enabled OGC APIs; absent sections are not served.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OgcApiConfig {
    #[serde(default)]
    pub features: Option<FeaturesConfig>,
    #[serde(default)]
    pub styles: Option<StylesConfig>,
    #[serde(default)]
    pub tiles: Option<TilesConfig>,
    #[serde(rename = "3dgeovolumes", default)]
    pub geovolumes: Option<GeoVolumesConfig>,
}

/// OGC API Features configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeaturesConfig {
    pub collections: Vec<CollectionConfig>,
    #[serde(default)]
    pub limit: LimitConfig,
    pub datasource: DatasourceConfig,
}

/// A served collection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CollectionConfig {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,

    /// Override when the collection id differs from the identifier in the
    /// datasource.
    #[serde(default)]
    pub datasource_id: Option<String>,

    /// Basepath to 3D tiles on the tileserver, defaults to the collection id.
    #[serde(default)]
    pub tile_server_path: Option<String>,
}

/// Page size limits for feature collections.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LimitConfig {
    #[serde(default = "default_limit")]
    pub default: u32,
    #[serde(default = "default_limit_max")]
    pub max: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            default: default_limit(),
            max: default_limit_max(),
        }
    }
}

/// Datasource selection; exactly one backend should be configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DatasourceConfig {
    #[serde(default)]
    pub geopackage: Option<GeoPackageConfig>,
}

/// Local GeoPackage backend settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeoPackageConfig {
    pub path: PathBuf,
    #[serde(default = "default_fid_column")]
    pub fid: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Load the spatialite extension; disable to use the builtin spatial
    /// functions.
    #[serde(default = "default_true")]
    pub spatialite: bool,
}

impl GeoPackageConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

/// OGC API Styles configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StylesConfig {
    /// Id of the default style; must be the first supported style.
    pub default: String,
    pub supported_styles: Vec<StyleMetadata>,
}

/// Style metadata per OGC API Styles requirement 7B (trimmed to what the
/// templates render).
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StyleMetadata {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// OGC API Tiles configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TilesConfig {
    /// Upstream tile server serving the actual tile payloads.
    pub tile_server: String,
    /// Tile types served, e.g. "vector".
    #[serde(default)]
    pub types: Vec<String>,
    /// Supported tile matrix sets, e.g. "NetherlandsRDNewQuad".
    #[serde(default)]
    pub supported_srs: Vec<String>,
}

/// OGC API 3D GeoVolumes configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeoVolumesConfig {
    pub tile_server: String,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_languages() -> Vec<String> {
    vec!["en".to_string(), "nl".to_string()]
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("assets/templates")
}

fn default_i18n_dir() -> PathBuf {
    PathBuf::from("assets/i18n")
}

fn default_limit() -> u32 {
    10
}

fn default_limit_max() -> u32 {
    1000
}

fn default_fid_column() -> String {
    "fid".to_string()
}

fn default_query_timeout() -> u64 {
    15
}

fn default_max_connections() -> u32 {
    8
}

fn default_true() -> bool {
    true
}
