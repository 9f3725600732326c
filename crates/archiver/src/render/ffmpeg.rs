//! ffmpeg render capability.
//!
//! Each source is rendered in a session matched to the clip: frame size and
//! frame rate follow the source, the first video stream and every audio
//! stream are mapped, the fixed correction LUT is applied when configured,
//! and the source start timecode is written into the output container.
//! Sources with an alpha channel go through the alpha encoder instead of
//! HEVC, which has no alpha plane in common players.

use super::{RenderCapability, RenderError};
use crate::config::RenderConfig;
use crate::probe::SourceProperties;
use crate::startup::{
    check_encoders_available, check_preset_file, check_tool_runs, parse_ffmpeg_version,
    resolve_tool, SetupError,
};
use crate::timecode::supports_timecode_tag;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Renderer that shells out to ffmpeg once per file.
#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    ffmpeg: PathBuf,
    settings: RenderConfig,
    resolved: Option<PathBuf>,
}

impl FfmpegRenderer {
    pub fn new(ffmpeg: impl Into<PathBuf>, settings: RenderConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            settings,
            resolved: None,
        }
    }

    pub fn settings(&self) -> &RenderConfig {
        &self.settings
    }
}

impl RenderCapability for FfmpegRenderer {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn prepare(&mut self) -> Result<(), SetupError> {
        let ffmpeg = resolve_tool(&self.ffmpeg)?;
        let version_output = check_tool_runs(&ffmpeg)?;
        match parse_ffmpeg_version(&version_output) {
            Some(major) => info!("Using {} (ffmpeg {})", ffmpeg.display(), major),
            None => info!("Using {} (unrecognized version string)", ffmpeg.display()),
        }

        // "copy" is a stream-copy mode, not an encoder
        let mut wanted: Vec<&str> = vec![
            self.settings.video_codec.as_str(),
            self.settings.audio_codec.as_str(),
        ];
        if self.settings.preserve_alpha {
            wanted.push(self.settings.alpha_video_codec.as_str());
        }
        wanted.retain(|codec| *codec != "copy");
        check_encoders_available(&ffmpeg, &wanted)?;

        if let Some(lut) = &self.settings.correction_lut {
            check_preset_file(lut)?;
            info!("Correction preset: {}", lut.display());
        }

        self.resolved = Some(ffmpeg);
        Ok(())
    }

    fn transcode(
        &mut self,
        source: &Path,
        output: &Path,
        props: &SourceProperties,
    ) -> Result<(), RenderError> {
        let ffmpeg = self.resolved.as_ref().ok_or(RenderError::NotPrepared)?;
        let mut cmd = build_ffmpeg_command(ffmpeg, &self.settings, source, output, props);
        debug!("Running {:?}", cmd);

        let status = cmd.stdin(Stdio::null()).status()?;

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(RenderError::Failed(code)),
                None => Err(RenderError::Terminated),
            }
        }
    }
}

fn is_hevc_codec(codec: &str) -> bool {
    let codec = codec.to_lowercase();
    codec.contains("265") || codec.contains("hevc")
}

/// Quality flag understood by the given encoder.
fn quality_flag(codec: &str) -> &'static str {
    let codec = codec.to_lowercase();
    if codec.contains("nvenc") {
        "-cq"
    } else if codec.contains("qsv") {
        "-global_quality"
    } else {
        "-crf"
    }
}

/// 4:2:0 output needs even frame dimensions.
fn even(dim: u32) -> u32 {
    (dim & !1).max(2)
}

/// Quotes a path for use as a filter option value.
pub fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    format!("'{}'", raw.replace('\'', r"'\''"))
}

fn output_extension(output: &Path) -> String {
    output
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Build the ffmpeg command for one source.
pub fn build_ffmpeg_command(
    ffmpeg: &Path,
    settings: &RenderConfig,
    source: &Path,
    output: &Path,
    props: &SourceProperties,
) -> Command {
    let mut cmd = Command::new(ffmpeg);
    let ext = output_extension(output);
    let quicktime_family = matches!(ext.as_str(), "mp4" | "mov" | "m4v");
    let alpha = settings.preserve_alpha && props.has_alpha();

    cmd.args(["-hide_banner", "-nostdin", "-y", "-loglevel", "error", "-stats"]);
    cmd.arg("-i").arg(source);

    // First video stream; audio only when the source has any
    cmd.args(["-map", "0:v:0"]);
    let has_audio = props.audio_channels != Some(0);
    if has_audio {
        cmd.args(["-map", "0:a?"]);
    }

    let mut filters = Vec::new();
    if let Some((w, h)) = props.resolution() {
        filters.push(format!("scale={}:{}", even(w), even(h)));
    }
    if let Some(lut) = &settings.correction_lut {
        filters.push(format!("lut3d=file={}", escape_filter_path(lut)));
    }
    if !filters.is_empty() {
        cmd.arg("-vf").arg(filters.join(","));
    }

    if let Some(rate) = props.frame_rate.as_deref().filter(|_| props.frame_rate_fps().is_some()) {
        cmd.arg("-r").arg(rate);
    }

    if alpha {
        cmd.arg("-c:v").arg(&settings.alpha_video_codec);
        if !settings.alpha_profile.is_empty() {
            cmd.arg("-profile:v").arg(&settings.alpha_profile);
        }
        cmd.args(["-pix_fmt", "yuva444p10le"]);
    } else {
        cmd.arg("-c:v").arg(&settings.video_codec);
        cmd.arg("-preset").arg(&settings.preset);
        cmd.arg(quality_flag(&settings.video_codec))
            .arg(settings.crf.to_string());

        if let Some(pix_fmt) = &props.pixel_format {
            let target = if pix_fmt.contains("10") || pix_fmt.contains("12") {
                "yuv420p10le"
            } else {
                "yuv420p"
            };
            cmd.arg("-pix_fmt").arg(target);
        }

        if quicktime_family && is_hevc_codec(&settings.video_codec) {
            cmd.args(["-tag:v", "hvc1"]);
        }
    }

    if has_audio {
        cmd.arg("-c:a").arg(&settings.audio_codec);
        // Channel count is probed from the first audio stream only
        if let Some(channels) = props.audio_channels {
            cmd.arg("-ac:a:0").arg(channels.to_string());
        }
    } else {
        cmd.arg("-an");
    }

    if let Some(tc) = &props.start_timecode {
        if supports_timecode_tag(&ext) {
            cmd.arg("-timecode").arg(tc);
        }
    }

    cmd.args(["-map_metadata", "0"]);
    if quicktime_family {
        cmd.args(["-movflags", "+faststart"]);
    }

    cmd.arg(output);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::ffi::OsStr;

    fn get_command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn has_flag(args: &[String], flag: &str) -> bool {
        args.iter().any(|arg| arg == flag)
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        prop::string::string_regex("(/[a-zA-Z0-9_-]{1,12}){0,3}/[a-zA-Z0-9]{1,12}")
            .unwrap()
    }

    fn camera_props() -> SourceProperties {
        SourceProperties {
            width: Some(3840),
            height: Some(2160),
            frame_rate: Some("24000/1001".to_string()),
            audio_channels: Some(2),
            pixel_format: Some("yuv422p10le".to_string()),
            start_timecode: Some("01:00:00;00".to_string()),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_command_completeness(
            source in path_strategy(),
            output_stem in path_strategy(),
            width in 16u32..8192,
            height in 16u32..4320,
            fps in 1u32..121,
            channels in 0u32..9,
            crf in 0u32..52,
        ) {
            let output = format!("{}.mp4", output_stem);
            let props = SourceProperties {
                width: Some(width),
                height: Some(height),
                frame_rate: Some(format!("{}/1", fps)),
                audio_channels: Some(channels),
                ..SourceProperties::default()
            };
            let settings = RenderConfig { crf, ..RenderConfig::default() };

            let cmd = build_ffmpeg_command(
                Path::new("ffmpeg"),
                &settings,
                Path::new(&source),
                Path::new(&output),
                &props,
            );
            let args = get_command_args(&cmd);
            let rate = format!("{}/1", fps);
            let crf_value = crf.to_string();
            let channel_count = channels.to_string();

            prop_assert_eq!(cmd.get_program(), OsStr::new("ffmpeg"));
            prop_assert!(has_flag_with_value(&args, "-i", &source));
            prop_assert!(has_flag_with_value(&args, "-map", "0:v:0"));
            prop_assert!(has_flag_with_value(&args, "-c:v", "libx265"));
            prop_assert!(has_flag_with_value(&args, "-crf", &crf_value));
            prop_assert!(has_flag_with_value(&args, "-r", &rate));
            prop_assert!(has_flag_with_value(&args, "-tag:v", "hvc1"));
            prop_assert_eq!(args.last(), Some(&output));

            // Canvas follows the source, rounded to even dimensions
            let scale = format!("scale={}:{}", width & !1, height & !1);
            prop_assert!(has_flag_with_value(&args, "-vf", &scale), "args: {:?}", args);

            if channels == 0 {
                prop_assert!(has_flag(&args, "-an"));
                prop_assert!(!has_flag_with_value(&args, "-map", "0:a?"));
            } else {
                prop_assert!(has_flag_with_value(&args, "-map", "0:a?"));
                prop_assert!(has_flag_with_value(&args, "-ac:a:0", &channel_count));
                prop_assert!(!has_flag(&args, "-ac"));
            }
        }
    }

    #[test]
    fn test_camera_clip_command() {
        let settings = RenderConfig {
            correction_lut: Some(PathBuf::from("/presets/fix.cube")),
            ..RenderConfig::default()
        };
        let cmd = build_ffmpeg_command(
            Path::new("/usr/bin/ffmpeg"),
            &settings,
            Path::new("/src/A/shot1.mov"),
            Path::new("/dst/Show-265/A/shot1.mp4"),
            &camera_props(),
        );
        let args = get_command_args(&cmd);

        assert!(has_flag_with_value(
            &args,
            "-vf",
            "scale=3840:2160,lut3d=file='/presets/fix.cube'"
        ));
        assert!(has_flag_with_value(&args, "-timecode", "01:00:00;00"));
        assert!(has_flag_with_value(&args, "-pix_fmt", "yuv420p10le"));
        assert!(has_flag_with_value(&args, "-movflags", "+faststart"));
        assert!(has_flag_with_value(&args, "-c:a", "aac"));
        assert!(has_flag_with_value(&args, "-preset", "medium"));
    }

    #[test]
    fn test_unknown_properties_leave_session_defaults() {
        let cmd = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &RenderConfig::default(),
            Path::new("/src/clip.avi"),
            Path::new("/dst/clip.mkv"),
            &SourceProperties::default(),
        );
        let args = get_command_args(&cmd);

        assert!(!has_flag(&args, "-vf"));
        assert!(!has_flag(&args, "-r"));
        assert!(!has_flag(&args, "-ac:a:0"));
        assert!(!has_flag(&args, "-tag:v"));
        assert!(!has_flag(&args, "-movflags"));
        // Unknown channel count still maps whatever audio exists
        assert!(has_flag_with_value(&args, "-map", "0:a?"));
    }

    #[test]
    fn test_alpha_source_uses_alpha_encoder() {
        let props = SourceProperties {
            pixel_format: Some("yuva444p10le".to_string()),
            ..camera_props()
        };
        let cmd = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &RenderConfig::default(),
            Path::new("/src/gfx/logo_anim.mov"),
            Path::new("/dst/gfx/logo_anim.mov"),
            &props,
        );
        let args = get_command_args(&cmd);

        assert!(has_flag_with_value(&args, "-c:v", "prores_ks"));
        assert!(has_flag_with_value(&args, "-profile:v", "4444"));
        assert!(has_flag_with_value(&args, "-pix_fmt", "yuva444p10le"));
        assert!(!has_flag(&args, "-crf"));
        assert!(!has_flag(&args, "-tag:v"));
        assert!(has_flag_with_value(&args, "-timecode", "01:00:00;00"));
        assert_eq!(args.last().unwrap(), "/dst/gfx/logo_anim.mov");
    }

    #[test]
    fn test_alpha_dropped_when_not_preserved() {
        let settings = RenderConfig {
            preserve_alpha: false,
            ..RenderConfig::default()
        };
        let props = SourceProperties {
            pixel_format: Some("yuva444p10le".to_string()),
            ..SourceProperties::default()
        };
        let cmd = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &settings,
            Path::new("/src/logo.mov"),
            Path::new("/dst/logo.mp4"),
            &props,
        );
        let args = get_command_args(&cmd);
        assert!(has_flag_with_value(&args, "-c:v", "libx265"));
        assert!(has_flag_with_value(&args, "-pix_fmt", "yuv420p10le"));
    }

    #[test]
    fn test_timecode_skipped_for_containers_without_tag() {
        let cmd = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &RenderConfig::default(),
            Path::new("/src/clip.mov"),
            Path::new("/dst/clip.mkv"),
            &camera_props(),
        );
        assert!(!has_flag(&get_command_args(&cmd), "-timecode"));
    }

    #[test]
    fn test_quality_flag_per_encoder() {
        let settings = RenderConfig {
            video_codec: "hevc_nvenc".to_string(),
            preset: "p5".to_string(),
            ..RenderConfig::default()
        };
        let cmd = build_ffmpeg_command(
            Path::new("ffmpeg"),
            &settings,
            Path::new("/src/clip.mov"),
            Path::new("/dst/clip.mp4"),
            &SourceProperties::default(),
        );
        let args = get_command_args(&cmd);
        assert!(has_flag_with_value(&args, "-cq", "22"));
        assert!(!has_flag(&args, "-crf"));
        assert!(has_flag_with_value(&args, "-tag:v", "hvc1"));
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(Path::new("/a/b.cube")), "'/a/b.cube'");
        assert_eq!(
            escape_filter_path(Path::new("/a/it's.cube")),
            r"'/a/it'\''s.cube'"
        );
    }

    #[test]
    fn test_odd_dimensions_rounded_down() {
        assert_eq!(even(1919), 1918);
        assert_eq!(even(1080), 1080);
        assert_eq!(even(1), 2);
    }

    #[test]
    fn test_transcode_before_prepare() {
        let mut renderer = FfmpegRenderer::new("ffmpeg", RenderConfig::default());
        let result = renderer.transcode(
            Path::new("/src/a.mov"),
            Path::new("/dst/a.mp4"),
            &SourceProperties::default(),
        );
        assert!(matches!(result, Err(RenderError::NotPrepared)));
    }

    #[test]
    fn test_prepare_with_missing_tool_is_setup_error() {
        let mut renderer =
            FfmpegRenderer::new("/nonexistent/ffmpeg-12345", RenderConfig::default());
        assert!(matches!(
            renderer.prepare(),
            Err(SetupError::ToolUnavailable { .. })
        ));
    }
}
