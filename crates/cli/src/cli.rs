use archive265::config::{
    normalize_extension, Config, ConfigError, IntegrityBackend, RawPolicy, SidecarScope,
};
use clap::Parser;
use std::path::PathBuf;

/// archive265 - mirror a project into an H.265 archive tree, resumably
#[derive(Parser, Debug)]
#[command(name = "archive265")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a config file (TOML); defaults plus environment when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Project folder to archive
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Folder the `<source>-265` archive is created in
    #[arg(short, long)]
    pub dest: Option<PathBuf>,

    /// Media extensions to transcode (replaces the configured set)
    #[arg(short = 'v', long = "video-exts", num_args = 1.., value_delimiter = ',')]
    pub video_exts: Option<Vec<String>>,

    /// Raw still-image extensions (replaces the configured set)
    #[arg(short = 'r', long = "raw-exts", num_args = 1.., value_delimiter = ',')]
    pub raw_exts: Option<Vec<String>>,

    /// How raw files are handled: exclude, asset or media
    #[arg(long)]
    pub raw_policy: Option<RawPolicy>,

    /// Side-car suppression scope: same_directory or global
    #[arg(long)]
    pub sidecar_scope: Option<SidecarScope>,

    /// Decode probe: auto, frame_decode or null_mux
    #[arg(long)]
    pub integrity_backend: Option<IntegrityBackend>,

    /// Output container extension
    #[arg(long)]
    pub output_ext: Option<String>,

    /// Log what would be copied or rendered without touching anything
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with status 2 when any file failed
    #[arg(long)]
    pub strict: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub verbose: bool,
}

impl Cli {
    /// Applies command-line overrides on top of file and environment values.
    pub fn apply_to(&self, cfg: &mut Config) {
        if let Some(source) = &self.source {
            cfg.paths.source_root = Some(source.clone());
        }
        if let Some(dest) = &self.dest {
            cfg.paths.destination_root = Some(dest.clone());
        }
        if let Some(exts) = &self.video_exts {
            cfg.classify.media_extensions = exts.iter().map(|e| normalize_extension(e)).collect();
        }
        if let Some(exts) = &self.raw_exts {
            cfg.classify.raw_extensions = exts.iter().map(|e| normalize_extension(e)).collect();
        }
        if let Some(policy) = self.raw_policy {
            cfg.classify.raw_policy = policy;
        }
        if let Some(scope) = self.sidecar_scope {
            cfg.sidecar.scope = scope;
        }
        if let Some(backend) = self.integrity_backend {
            cfg.integrity.backend = backend;
        }
        if let Some(ext) = &self.output_ext {
            cfg.output.extension = ext.clone();
        }
    }

    /// Applies the overrides to a loaded config, then validates the result.
    pub fn resolve(&self, mut cfg: Config) -> Result<Config, ConfigError> {
        self.apply_to(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }
}
