//! Output integrity checking.
//!
//! A file is readable when it exists, is non-empty, and the first frame of
//! its first video stream decodes. Two probe backends share that verdict
//! space: a frame decode through ffprobe, and a bounded null-mux decode
//! through ffmpeg whose exit status is the only signal.

use crate::config::{IntegrityBackend, IntegrityConfig};
use crate::probe::ProbeError;
use crate::startup::{find_tool, SetupError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Integrity verdict for a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Missing,
    /// Exists with zero length.
    Empty,
    Valid,
    /// Exists but did not decode; carries the probe's reason.
    Corrupt(String),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    /// True when a file exists on disk but is not usable.
    pub fn needs_replacement(&self) -> bool {
        matches!(self, Verdict::Empty | Verdict::Corrupt(_))
    }
}

/// Outcome of a single decode attempt on a non-empty file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    Decoded,
    Failed(String),
}

/// A decoder that can tell whether a file's first video frame decodes.
///
/// `Err` means the probe itself could not run (tool missing or crashed
/// before producing a verdict), which is not evidence of corruption.
pub trait DecodeProbe {
    fn name(&self) -> &'static str;
    fn decode(&self, path: &Path) -> Result<DecodeResult, ProbeError>;
}

/// Primary probe: asks ffprobe to decode the first frame of `v:0`.
#[derive(Debug, Clone)]
pub struct FrameDecodeProbe {
    ffprobe: PathBuf,
}

impl FrameDecodeProbe {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

/// Build the ffprobe command for a first-frame decode.
pub fn build_frame_decode_command(ffprobe: &Path, path: &Path) -> Command {
    let mut cmd = Command::new(ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-read_intervals",
        "%+#1",
        "-show_frames",
        "-show_entries",
        "frame=media_type",
        "-of",
        "json",
    ])
    .arg(path);
    cmd
}

#[derive(Debug, Deserialize)]
struct FramesOutput {
    #[serde(default)]
    frames: Vec<serde_json::Value>,
}

/// Interprets ffprobe's frame listing; at least one frame means decoded.
pub fn parse_frame_listing(json: &str) -> DecodeResult {
    match serde_json::from_str::<FramesOutput>(json) {
        Ok(out) if !out.frames.is_empty() => DecodeResult::Decoded,
        Ok(_) => DecodeResult::Failed("no decodable video frame".to_string()),
        Err(e) => DecodeResult::Failed(format!("unreadable probe output: {}", e)),
    }
}

fn first_stderr_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("decoder exited with failure")
        .trim()
        .to_string()
}

impl DecodeProbe for FrameDecodeProbe {
    fn name(&self) -> &'static str {
        "frame_decode"
    }

    fn decode(&self, path: &Path) -> Result<DecodeResult, ProbeError> {
        let output = build_frame_decode_command(&self.ffprobe, path).output()?;

        if !output.status.success() {
            return Ok(DecodeResult::Failed(first_stderr_line(&output.stderr)));
        }

        Ok(parse_frame_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Fallback probe: decodes a bounded window with ffmpeg into the null muxer.
#[derive(Debug, Clone)]
pub struct NullMuxProbe {
    ffmpeg: PathBuf,
    window_secs: u32,
}

impl NullMuxProbe {
    pub fn new(ffmpeg: impl Into<PathBuf>, window_secs: u32) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            window_secs: window_secs.max(1),
        }
    }
}

/// Build the ffmpeg command for a null-mux decode of the first `window_secs`.
pub fn build_null_mux_command(ffmpeg: &Path, path: &Path, window_secs: u32) -> Command {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-hide_banner", "-nostdin", "-v", "error", "-i"])
        .arg(path)
        .args(["-map", "0:v:0", "-t"])
        .arg(window_secs.to_string())
        .args(["-f", "null", "-"]);
    cmd
}

impl DecodeProbe for NullMuxProbe {
    fn name(&self) -> &'static str {
        "null_mux"
    }

    fn decode(&self, path: &Path) -> Result<DecodeResult, ProbeError> {
        let output = build_null_mux_command(&self.ffmpeg, path, self.window_secs).output()?;

        if output.status.success() {
            Ok(DecodeResult::Decoded)
        } else {
            Ok(DecodeResult::Failed(first_stderr_line(&output.stderr)))
        }
    }
}

/// Decides whether a media file on disk is a valid, decodable file.
pub struct IntegrityChecker {
    probe: Box<dyn DecodeProbe + Send + Sync>,
}

impl IntegrityChecker {
    pub fn new(probe: Box<dyn DecodeProbe + Send + Sync>) -> Self {
        Self { probe }
    }

    /// Select the probe backend from config.
    ///
    /// `auto` prefers the frame decode when ffprobe resolves on `PATH`, then
    /// the null-mux decode when ffmpeg does.
    pub fn from_config(cfg: &IntegrityConfig) -> Result<Self, SetupError> {
        let probe: Box<dyn DecodeProbe + Send + Sync> = match cfg.backend {
            IntegrityBackend::FrameDecode => {
                let ffprobe = crate::startup::resolve_tool(&cfg.ffprobe_path)?;
                Box::new(FrameDecodeProbe::new(ffprobe))
            }
            IntegrityBackend::NullMux => {
                let ffmpeg = crate::startup::resolve_tool(&cfg.ffmpeg_path)?;
                Box::new(NullMuxProbe::new(ffmpeg, cfg.probe_window_secs))
            }
            IntegrityBackend::Auto => {
                if let Some(ffprobe) = find_tool(&cfg.ffprobe_path) {
                    Box::new(FrameDecodeProbe::new(ffprobe))
                } else if let Some(ffmpeg) = find_tool(&cfg.ffmpeg_path) {
                    Box::new(NullMuxProbe::new(ffmpeg, cfg.probe_window_secs))
                } else {
                    return Err(SetupError::NoProbeTool {
                        ffprobe: cfg.ffprobe_path.display().to_string(),
                        ffmpeg: cfg.ffmpeg_path.display().to_string(),
                    });
                }
            }
        };
        Ok(Self::new(probe))
    }

    pub fn backend_name(&self) -> &'static str {
        self.probe.name()
    }

    /// Full verdict for `path`. Missing and empty files never reach the probe.
    pub fn check(&self, path: &Path) -> Result<Verdict, ProbeError> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Verdict::Missing),
            Err(e) => return Err(ProbeError::Io(e)),
        };

        if !meta.is_file() {
            return Ok(Verdict::Corrupt("not a regular file".to_string()));
        }
        if meta.len() == 0 {
            return Ok(Verdict::Empty);
        }

        let verdict = match self.probe.decode(path)? {
            DecodeResult::Decoded => Verdict::Valid,
            DecodeResult::Failed(reason) => Verdict::Corrupt(reason),
        };
        debug!(
            "{} probe on {}: {:?}",
            self.probe.name(),
            path.display(),
            verdict
        );
        Ok(verdict)
    }

    /// Boolean form of [`check`](Self::check); probe errors count as unreadable.
    pub fn is_readable(&self, path: &Path) -> bool {
        matches!(self.check(path), Ok(Verdict::Valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Decodes files whose contents start with `VALID`.
    struct MarkerProbe {
        calls: Arc<AtomicUsize>,
    }

    impl DecodeProbe for MarkerProbe {
        fn name(&self) -> &'static str {
            "marker"
        }

        fn decode(&self, path: &Path) -> Result<DecodeResult, ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes = std::fs::read(path)?;
            if bytes.starts_with(b"VALID") {
                Ok(DecodeResult::Decoded)
            } else {
                Ok(DecodeResult::Failed("bad header".to_string()))
            }
        }
    }

    fn checker() -> (IntegrityChecker, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = MarkerProbe {
            calls: Arc::clone(&calls),
        };
        (IntegrityChecker::new(Box::new(probe)), calls)
    }

    #[test]
    fn test_missing_and_empty_skip_the_probe() {
        let tmp = TempDir::new().unwrap();
        let (checker, calls) = checker();

        let missing = tmp.path().join("missing.mp4");
        assert_eq!(checker.check(&missing).unwrap(), Verdict::Missing);
        assert!(!checker.is_readable(&missing));

        let empty = tmp.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(checker.check(&empty).unwrap(), Verdict::Empty);
        assert!(checker.check(&empty).unwrap().needs_replacement());

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_decode_verdicts() {
        let tmp = TempDir::new().unwrap();
        let (checker, calls) = checker();

        let good = tmp.path().join("good.mp4");
        std::fs::write(&good, b"VALID frame data").unwrap();
        assert!(checker.is_readable(&good));

        let bad = tmp.path().join("bad.mp4");
        std::fs::write(&bad, b"truncated").unwrap();
        assert_eq!(
            checker.check(&bad).unwrap(),
            Verdict::Corrupt("bad header".to_string())
        );
        assert!(!checker.is_readable(&bad));

        // one decode per query, nothing cached
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_directory_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let (checker, _) = checker();
        assert!(matches!(
            checker.check(tmp.path()).unwrap(),
            Verdict::Corrupt(_)
        ));
    }

    #[test]
    fn test_probe_error_is_not_a_verdict() {
        struct Broken;
        impl DecodeProbe for Broken {
            fn name(&self) -> &'static str {
                "broken"
            }
            fn decode(&self, _path: &Path) -> Result<DecodeResult, ProbeError> {
                Err(ProbeError::ToolFailed {
                    tool: "ffprobe".to_string(),
                    message: "crashed".to_string(),
                })
            }
        }

        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("clip.mp4");
        std::fs::write(&file, b"VALID").unwrap();

        let checker = IntegrityChecker::new(Box::new(Broken));
        assert!(checker.check(&file).is_err());
        assert!(!checker.is_readable(&file));
    }

    #[test]
    fn test_parse_frame_listing() {
        let decoded = r#"{ "frames": [ { "media_type": "video" } ] }"#;
        assert_eq!(parse_frame_listing(decoded), DecodeResult::Decoded);

        assert!(matches!(
            parse_frame_listing(r#"{ "frames": [] }"#),
            DecodeResult::Failed(_)
        ));
        assert!(matches!(parse_frame_listing("{}"), DecodeResult::Failed(_)));
        assert!(matches!(
            parse_frame_listing("garbage"),
            DecodeResult::Failed(_)
        ));
    }

    #[test]
    fn test_frame_decode_command_args() {
        let cmd = build_frame_decode_command(Path::new("ffprobe"), Path::new("/a/clip.mp4"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.get_program(), "ffprobe");
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-select_streams") + 1], "v:0");
        assert_eq!(args[pos("-read_intervals") + 1], "%+#1");
        assert!(args.contains(&"-show_frames".to_string()));
        assert_eq!(args.last().unwrap(), "/a/clip.mp4");
    }

    #[test]
    fn test_null_mux_command_args() {
        let cmd = build_null_mux_command(Path::new("ffmpeg"), Path::new("/a/clip.mp4"), 3);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-i") + 1], "/a/clip.mp4");
        assert_eq!(args[pos("-map") + 1], "0:v:0");
        assert_eq!(args[pos("-t") + 1], "3");
        assert_eq!(args[pos("-f") + 1], "null");
        assert_eq!(args.last().unwrap(), "-");
    }

    #[test]
    fn test_null_mux_window_floor() {
        let probe = NullMuxProbe::new("ffmpeg", 0);
        assert_eq!(probe.window_secs, 1);
    }

    #[test]
    fn test_auto_without_tools_is_setup_error() {
        let cfg = IntegrityConfig {
            backend: IntegrityBackend::Auto,
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg-12345"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe-12345"),
            ..IntegrityConfig::default()
        };
        assert!(matches!(
            IntegrityChecker::from_config(&cfg),
            Err(SetupError::NoProbeTool { .. })
        ));

        let cfg = IntegrityConfig {
            backend: IntegrityBackend::FrameDecode,
            ..cfg
        };
        assert!(matches!(
            IntegrityChecker::from_config(&cfg),
            Err(SetupError::ToolUnavailable { .. })
        ));
    }

    #[test]
    fn test_repeated_checks_are_stable() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("clip.mp4");
        std::fs::write(&file, b"VALID").unwrap();
        let (checker, calls) = checker();

        for _ in 0..3 {
            assert!(checker.is_readable(&file));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
