//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but is not usable
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// What happens to files whose extension is in the raw set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RawPolicy {
    /// Raw files are dropped from both the asset and media sets.
    #[default]
    Exclude,
    /// Raw files are copied verbatim like any other asset.
    Asset,
    /// Raw files are transcoded alongside the regular media.
    Media,
}

impl fmt::Display for RawPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawPolicy::Exclude => write!(f, "exclude"),
            RawPolicy::Asset => write!(f, "asset"),
            RawPolicy::Media => write!(f, "media"),
        }
    }
}

impl FromStr for RawPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exclude" | "skip" => Ok(RawPolicy::Exclude),
            "asset" | "copy" => Ok(RawPolicy::Asset),
            "media" | "transcode" => Ok(RawPolicy::Media),
            other => Err(format!(
                "unknown raw policy '{}', expected exclude, asset or media",
                other
            )),
        }
    }
}

/// Which media base names suppress a side-car asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SidecarScope {
    /// Only media in the asset's own directory count.
    #[default]
    SameDirectory,
    /// Any media anywhere in the source tree counts.
    Global,
}

impl fmt::Display for SidecarScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SidecarScope::SameDirectory => write!(f, "same_directory"),
            SidecarScope::Global => write!(f, "global"),
        }
    }
}

impl FromStr for SidecarScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "same_directory" | "directory" | "dir" => Ok(SidecarScope::SameDirectory),
            "global" => Ok(SidecarScope::Global),
            other => Err(format!(
                "unknown sidecar scope '{}', expected same_directory or global",
                other
            )),
        }
    }
}

/// Decode probe used to decide whether an output file is valid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityBackend {
    /// Frame decode when ffprobe is available, otherwise the null-mux fallback.
    #[default]
    Auto,
    /// Decode the first video frame with ffprobe.
    FrameDecode,
    /// Decode a bounded window with ffmpeg into the null muxer.
    NullMux,
}

impl fmt::Display for IntegrityBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityBackend::Auto => write!(f, "auto"),
            IntegrityBackend::FrameDecode => write!(f, "frame_decode"),
            IntegrityBackend::NullMux => write!(f, "null_mux"),
        }
    }
}

impl FromStr for IntegrityBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "auto" => Ok(IntegrityBackend::Auto),
            "frame_decode" | "ffprobe" => Ok(IntegrityBackend::FrameDecode),
            "null_mux" | "ffmpeg" => Ok(IntegrityBackend::NullMux),
            other => Err(format!(
                "unknown integrity backend '{}', expected auto, frame_decode or null_mux",
                other
            )),
        }
    }
}

/// Source and destination roots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// Project folder to archive
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    /// Folder the archive root is created in
    #[serde(default)]
    pub destination_root: Option<PathBuf>,
    /// Appended to the source folder name to form the archive root name
    #[serde(default = "default_archive_suffix")]
    pub archive_suffix: String,
}

fn default_archive_suffix() -> String {
    "-265".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: None,
            destination_root: None,
            archive_suffix: default_archive_suffix(),
        }
    }
}

/// Tree walk and classification rules
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifyConfig {
    /// Extensions transcoded to the output container
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,
    /// Camera raw extensions, handled according to `raw_policy`
    #[serde(default = "default_raw_extensions")]
    pub raw_extensions: Vec<String>,
    #[serde(default)]
    pub raw_policy: RawPolicy,
    /// Directory names pruned from the walk (exact match)
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    /// Case-insensitive file name substrings that drop a file entirely
    #[serde(default = "default_excluded_name_patterns")]
    pub excluded_name_patterns: Vec<String>,
}

fn default_media_extensions() -> Vec<String> {
    ["mxf", "mp4", "mov", "crm", "avi"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_raw_extensions() -> Vec<String> {
    ["arw", "cr2", "cr3", "nef", "dng", "raf", "orf", "rw2", "sr2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_excluded_dirs() -> Vec<String> {
    vec!["Exports".to_string(), "Proxies".to_string(), "Proxy".to_string()]
}

fn default_excluded_name_patterns() -> Vec<String> {
    vec!["_proxy".to_string()]
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            media_extensions: default_media_extensions(),
            raw_extensions: default_raw_extensions(),
            raw_policy: RawPolicy::default(),
            excluded_dirs: default_excluded_dirs(),
            excluded_name_patterns: default_excluded_name_patterns(),
        }
    }
}

impl ClassifyConfig {
    /// Normalized media extension set (lowercase, no leading dot)
    pub fn media_extension_set(&self) -> BTreeSet<String> {
        self.media_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// Normalized raw extension set (lowercase, no leading dot)
    pub fn raw_extension_set(&self) -> BTreeSet<String> {
        self.raw_extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect()
    }
}

/// Side-car suppression configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SidecarConfig {
    #[serde(default)]
    pub scope: SidecarScope,
}

/// Integrity probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityConfig {
    #[serde(default)]
    pub backend: IntegrityBackend,
    /// Seconds decoded by the null-mux fallback
    #[serde(default = "default_probe_window_secs")]
    pub probe_window_secs: u32,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
}

fn default_probe_window_secs() -> u32 {
    1
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            backend: IntegrityBackend::default(),
            probe_window_secs: default_probe_window_secs(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
        }
    }
}

/// Transcode output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Container extension forced onto every transcoded output
    #[serde(default = "default_output_extension")]
    pub extension: String,
    /// Attempts made to delete a corrupt output before giving up
    #[serde(default = "default_delete_attempts")]
    pub delete_attempts: u32,
    /// Pause between delete attempts in milliseconds
    #[serde(default = "default_delete_retry_delay_ms")]
    pub delete_retry_delay_ms: u64,
    /// Compare source and output start timecode after a render
    #[serde(default = "default_verify_timecode")]
    pub verify_timecode: bool,
    /// Container for sources with an alpha channel, when `render.preserve_alpha` is set
    #[serde(default = "default_alpha_extension")]
    pub alpha_extension: String,
}

fn default_output_extension() -> String {
    "mp4".to_string()
}

fn default_delete_attempts() -> u32 {
    3
}

fn default_delete_retry_delay_ms() -> u64 {
    500
}

fn default_verify_timecode() -> bool {
    true
}

fn default_alpha_extension() -> String {
    "mov".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            extension: default_output_extension(),
            delete_attempts: default_delete_attempts(),
            delete_retry_delay_ms: default_delete_retry_delay_ms(),
            verify_timecode: default_verify_timecode(),
            alpha_extension: default_alpha_extension(),
        }
    }
}

impl OutputConfig {
    /// Output extension, normalized
    pub fn normalized_extension(&self) -> String {
        normalize_extension(&self.extension)
    }

    /// Alpha output extension, normalized
    pub fn normalized_alpha_extension(&self) -> String {
        normalize_extension(&self.alpha_extension)
    }
}

/// Encoder settings for the ffmpeg render capability
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderConfig {
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Fixed correction preset (3D LUT) applied to every render
    #[serde(default)]
    pub correction_lut: Option<PathBuf>,
    /// Render sources with an alpha channel through the alpha encoder
    #[serde(default = "default_preserve_alpha")]
    pub preserve_alpha: bool,
    #[serde(default = "default_alpha_video_codec")]
    pub alpha_video_codec: String,
    #[serde(default = "default_alpha_profile")]
    pub alpha_profile: String,
}

fn default_video_codec() -> String {
    "libx265".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u32 {
    22
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_preserve_alpha() -> bool {
    true
}

fn default_alpha_video_codec() -> String {
    "prores_ks".to_string()
}

fn default_alpha_profile() -> String {
    "4444".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            correction_lut: None,
            preserve_alpha: default_preserve_alpha(),
            alpha_video_codec: default_alpha_video_codec(),
            alpha_profile: default_alpha_profile(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

/// Lowercases an extension and strips any leading dots.
///
/// `".MOV"`, `"mov"` and `"Mov"` all normalize to `"mov"`.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - ARCHIVE265_SOURCE_ROOT -> paths.source_root
    /// - ARCHIVE265_DESTINATION_ROOT -> paths.destination_root
    /// - ARCHIVE265_RAW_POLICY -> classify.raw_policy
    /// - ARCHIVE265_SIDECAR_SCOPE -> sidecar.scope
    /// - ARCHIVE265_INTEGRITY_BACKEND -> integrity.backend
    /// - ARCHIVE265_FFMPEG_PATH -> integrity.ffmpeg_path
    /// - ARCHIVE265_FFPROBE_PATH -> integrity.ffprobe_path
    /// - ARCHIVE265_VIDEO_CODEC -> render.video_codec
    pub fn apply_env_overrides(&mut self) {
        if let Some(val) = non_empty_var("ARCHIVE265_SOURCE_ROOT") {
            self.paths.source_root = Some(PathBuf::from(val));
        }

        if let Some(val) = non_empty_var("ARCHIVE265_DESTINATION_ROOT") {
            self.paths.destination_root = Some(PathBuf::from(val));
        }

        if let Some(val) = non_empty_var("ARCHIVE265_RAW_POLICY") {
            if let Ok(policy) = val.parse::<RawPolicy>() {
                self.classify.raw_policy = policy;
            }
        }

        if let Some(val) = non_empty_var("ARCHIVE265_SIDECAR_SCOPE") {
            if let Ok(scope) = val.parse::<SidecarScope>() {
                self.sidecar.scope = scope;
            }
        }

        if let Some(val) = non_empty_var("ARCHIVE265_INTEGRITY_BACKEND") {
            if let Ok(backend) = val.parse::<IntegrityBackend>() {
                self.integrity.backend = backend;
            }
        }

        if let Some(val) = non_empty_var("ARCHIVE265_FFMPEG_PATH") {
            self.integrity.ffmpeg_path = PathBuf::from(val);
        }

        if let Some(val) = non_empty_var("ARCHIVE265_FFPROBE_PATH") {
            self.integrity.ffprobe_path = PathBuf::from(val);
        }

        if let Some(val) = non_empty_var("ARCHIVE265_VIDEO_CODEC") {
            self.render.video_codec = val;
        }
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let media = self.classify.media_extension_set();
        let raw = self.classify.raw_extension_set();
        let overlap: Vec<&String> = media.intersection(&raw).collect();
        if !overlap.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "media and raw extension sets must be disjoint, both contain {:?}",
                overlap
            )));
        }

        if self.output.normalized_extension().is_empty() {
            return Err(ConfigError::Invalid(
                "output.extension must not be empty".to_string(),
            ));
        }

        if self.render.preserve_alpha && self.output.normalized_alpha_extension().is_empty() {
            return Err(ConfigError::Invalid(
                "output.alpha_extension must not be empty".to_string(),
            ));
        }

        if self.output.delete_attempts == 0 {
            return Err(ConfigError::Invalid(
                "output.delete_attempts must be at least 1".to_string(),
            ));
        }

        if self.integrity.probe_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "integrity.probe_window_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file and apply environment overrides
    ///
    /// Not validated here: callers layer command-line overrides on top and
    /// call [`Config::validate`] once the final values are known.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}
