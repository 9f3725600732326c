//! Source property probing.
//!
//! The render capability is handed the frame size, frame rate and audio
//! channel count of each source so it can match its session to the clip.
//! Properties come from ffprobe's JSON output; a no-op prober that reports
//! everything as unknown is used when ffprobe is not installed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe tool ran but reported a failure.
    #[error("{tool} failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// Failed to parse the probe tool's output.
    #[error("Failed to parse probe output: {0}")]
    ParseError(String),

    /// The probe tool could not be started.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Properties of a source clip that a render session is configured from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceProperties {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Frame rate as reported by the container, e.g. `"30000/1001"`.
    pub frame_rate: Option<String>,
    /// Channel count of the first audio stream; `Some(0)` means no audio.
    pub audio_channels: Option<u32>,
    pub pixel_format: Option<String>,
    /// Embedded start timecode, e.g. `"01:00:00;00"`.
    pub start_timecode: Option<String>,
}

impl SourceProperties {
    /// Frame size, when both dimensions are known.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Frame rate as a float, e.g. `"30000/1001"` -> `29.97`.
    pub fn frame_rate_fps(&self) -> Option<f64> {
        self.frame_rate.as_deref().and_then(parse_rational)
    }

    /// True when the first video stream carries an alpha channel.
    pub fn has_alpha(&self) -> bool {
        self.pixel_format
            .as_deref()
            .map(pixel_format_has_alpha)
            .unwrap_or(false)
    }
}

/// Checks if an ffmpeg pixel format name includes an alpha plane.
///
/// Covers the `yuva*`, `gbrap*` and `ya*` planar families and the packed
/// RGB orderings (`rgba`, `argb`, `bgra`, `abgr`, `rgba64le`, ...).
pub fn pixel_format_has_alpha(pix_fmt: &str) -> bool {
    let fmt = pix_fmt.trim().to_lowercase();
    fmt.starts_with("yuva")
        || fmt.starts_with("gbrap")
        || fmt.starts_with("ya")
        || ["rgba", "argb", "bgra", "abgr"]
            .iter()
            .any(|packed| fmt.contains(packed))
}

/// Parses `"num/den"` or a plain number; zero or malformed rates yield `None`.
pub fn parse_rational(value: &str) -> Option<f64> {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.parse().ok()?,
    };
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Reads source properties from a media file.
pub trait MediaProber {
    fn probe(&self, path: &Path) -> Result<SourceProperties, ProbeError>;

    /// Start timecode embedded in a file, if any can be read.
    fn timecode(&self, path: &Path) -> Option<String> {
        self.probe(path).ok().and_then(|p| p.start_timecode)
    }
}

/// Prober backed by `ffprobe -show_streams -show_format`.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
        }
    }
}

impl MediaProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<SourceProperties, ProbeError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ToolFailed {
                tool: "ffprobe".to_string(),
                message: stderr.lines().next().unwrap_or("(no output)").to_string(),
            });
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Prober used when no probe tool is installed; every property is unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProber;

impl MediaProber for NoopProber {
    fn probe(&self, _path: &Path) -> Result<SourceProperties, ProbeError> {
        Ok(SourceProperties::default())
    }

    fn timecode(&self, _path: &Path) -> Option<String> {
        None
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
        pub r_frame_rate: Option<String>,
        pub avg_frame_rate: Option<String>,
        pub channels: Option<u32>,
        pub pix_fmt: Option<String>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub tags: Option<HashMap<String, String>>,
    }
}

fn timecode_tag(tags: &Option<std::collections::HashMap<String, String>>) -> Option<String> {
    tags.as_ref().and_then(|tags| {
        tags.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("timecode"))
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Parses the JSON printed by `ffprobe -print_format json -show_streams -show_format`.
///
/// The timecode is taken from the first video stream's tags, then any other
/// stream (e.g. a `tmcd` data track), then the container tags.
pub fn parse_ffprobe_output(json: &str) -> Result<SourceProperties, ProbeError> {
    let parsed: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = parsed.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    let frame_rate = video.and_then(|v| {
        [v.r_frame_rate.as_deref(), v.avg_frame_rate.as_deref()]
            .into_iter()
            .flatten()
            .find(|rate| parse_rational(rate).is_some())
            .map(str::to_string)
    });

    let start_timecode = video
        .and_then(|v| timecode_tag(&v.tags))
        .or_else(|| streams.iter().find_map(|s| timecode_tag(&s.tags)))
        .or_else(|| parsed.format.as_ref().and_then(|f| timecode_tag(&f.tags)));

    Ok(SourceProperties {
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        frame_rate,
        // Some(0) only when there is no audio stream at all
        audio_channels: match audio {
            Some(a) => a.channels,
            None => Some(0),
        },
        pixel_format: video.and_then(|v| v.pix_fmt.clone()),
        start_timecode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAMERA_CLIP: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "codec_name": "h264",
                "width": 3840,
                "height": 2160,
                "r_frame_rate": "24000/1001",
                "avg_frame_rate": "24000/1001",
                "pix_fmt": "yuv422p10le",
                "tags": { "timecode": "01:00:00;00" }
            },
            {
                "index": 1,
                "codec_type": "audio",
                "codec_name": "pcm_s24le",
                "channels": 2
            }
        ],
        "format": { "format_name": "mov,mp4,m4a,3gp,3g2,mj2", "tags": {} }
    }"#;

    #[test]
    fn test_parse_camera_clip() {
        let props = parse_ffprobe_output(CAMERA_CLIP).unwrap();

        assert_eq!(props.resolution(), Some((3840, 2160)));
        assert_eq!(props.frame_rate.as_deref(), Some("24000/1001"));
        assert!((props.frame_rate_fps().unwrap() - 23.976).abs() < 0.001);
        assert_eq!(props.audio_channels, Some(2));
        assert_eq!(props.pixel_format.as_deref(), Some("yuv422p10le"));
        assert_eq!(props.start_timecode.as_deref(), Some("01:00:00;00"));
    }

    #[test]
    fn test_parse_timecode_from_data_stream_and_format() {
        let data_track = r#"{
            "streams": [
                { "codec_type": "video", "width": 1920, "height": 1080, "r_frame_rate": "25/1" },
                { "codec_type": "data", "tags": { "timecode": "10:00:00:00" } }
            ]
        }"#;
        let props = parse_ffprobe_output(data_track).unwrap();
        assert_eq!(props.start_timecode.as_deref(), Some("10:00:00:00"));
        assert_eq!(props.audio_channels, Some(0));

        let format_tag = r#"{
            "streams": [{ "codec_type": "video", "r_frame_rate": "0/0", "avg_frame_rate": "50/1" }],
            "format": { "tags": { "TIMECODE": "00:59:58:00" } }
        }"#;
        let props = parse_ffprobe_output(format_tag).unwrap();
        assert_eq!(props.start_timecode.as_deref(), Some("00:59:58:00"));
        assert_eq!(props.frame_rate.as_deref(), Some("50/1"));
    }

    #[test]
    fn test_parse_audio_only_file() {
        let json = r#"{ "streams": [{ "codec_type": "audio", "channels": 6 }] }"#;
        let props = parse_ffprobe_output(json).unwrap();

        assert_eq!(props.resolution(), None);
        assert_eq!(props.frame_rate, None);
        assert_eq!(props.audio_channels, Some(6));
    }

    #[test]
    fn test_audio_stream_without_channel_count_is_unknown() {
        let json = r#"{ "streams": [
            { "codec_type": "video", "width": 1280, "height": 720 },
            { "codec_type": "audio", "codec_name": "pcm_s16le" }
        ] }"#;
        let props = parse_ffprobe_output(json).unwrap();
        assert_eq!(props.audio_channels, None);
    }

    #[test]
    fn test_alpha_pixel_formats() {
        for fmt in ["yuva444p10le", "yuva420p", "gbrap12le", "rgba", "argb", "bgra", "rgba64le", "ya16be"] {
            assert!(pixel_format_has_alpha(fmt), "{} has alpha", fmt);
        }
        for fmt in ["yuv420p", "yuv422p10le", "gbrp10le", "rgb24", "gray", "pal8", "nv12"] {
            assert!(!pixel_format_has_alpha(fmt), "{} has no alpha", fmt);
        }

        let props = SourceProperties {
            pixel_format: Some("yuva444p10le".to_string()),
            ..SourceProperties::default()
        };
        assert!(props.has_alpha());
        assert!(!SourceProperties::default().has_alpha());
    }

    #[test]
    fn test_parse_invalid_json() {
        assert!(matches!(
            parse_ffprobe_output("not json"),
            Err(ProbeError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_rational() {
        assert_eq!(parse_rational("25/1"), Some(25.0));
        assert_eq!(parse_rational("29.97"), Some(29.97));
        assert_eq!(parse_rational("0/0"), None);
        assert_eq!(parse_rational("30/0"), None);
        assert_eq!(parse_rational("abc"), None);
    }

    #[test]
    fn test_noop_prober_reports_unknown() {
        let props = NoopProber.probe(Path::new("/any/clip.mov")).unwrap();
        assert_eq!(props, SourceProperties::default());
        assert_eq!(NoopProber.timecode(Path::new("/any/clip.mov")), None);
    }

    #[test]
    fn test_ffprobe_prober_missing_binary_is_io_error() {
        let prober = FfprobeProber::new("/nonexistent/ffprobe-12345");
        assert!(matches!(
            prober.probe(Path::new("/tmp/clip.mov")),
            Err(ProbeError::Io(_))
        ));
    }
}
