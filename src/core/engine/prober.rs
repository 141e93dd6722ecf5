//! §4.B Media Prober — query the engine in metadata mode.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;

const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct VideoInfo {
    pub duration: Option<f64>,
    pub size: Option<u64>,
    pub bitrate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    pub fps: Option<f64>,
    pub has_audio: bool,
    /// Never surfaced via `Result` — probe failures are data, not
    /// exceptions (§4.B failure semantics).
    pub error: Option<String>,
}

impl VideoInfo {
    fn failed(msg: impl Into<String>) -> Self {
        VideoInfo {
            error: Some(msg.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
    streams: Vec<ProbeStream>,
}

pub struct MediaProber {
    ffprobe_path: std::path::PathBuf,
}

impl MediaProber {
    pub fn new(ffprobe_path: impl Into<std::path::PathBuf>) -> Self {
        MediaProber {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Parse an ffprobe `r_frame_rate` string of the form `"num/den"` into a
    /// float *without* evaluating it as an arbitrary expression — unlike the
    /// original implementation's bare `eval(...)` call
    /// (`modules/video_processor.py`), which is unsafe against a crafted
    /// probe response.
    pub fn parse_fps(raw: &str) -> Option<f64> {
        let raw = raw.trim();
        if let Some((num, den)) = raw.split_once('/') {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            Some(num / den)
        } else {
            raw.parse().ok()
        }
    }

    pub async fn probe(&self, source: &str) -> VideoInfo {
        let run = async {
            let output = Command::new(&self.ffprobe_path)
                .args([
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                    source,
                ])
                .stdin(Stdio::null())
                .output()
                .await
                .map_err(|e| format!("failed to spawn ffprobe: {e}"))?;

            if !output.status.success() {
                return Err(format!(
                    "ffprobe exited with {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr)
                ));
            }

            let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
                .map_err(|e| format!("unparseable ffprobe output: {e}"))?;
            Ok(parsed)
        };

        let parsed = match tokio::time::timeout(PROBE_TIMEOUT, run).await {
            Ok(Ok(p)) => p,
            Ok(Err(e)) => return VideoInfo::failed(e),
            Err(_) => return VideoInfo::failed("ffprobe timed out after 60s"),
        };

        let Some(video_stream) = parsed.streams.iter().find(|s| s.codec_type == "video") else {
            return VideoInfo::failed("not a video stream");
        };

        let duration: Option<f64> = parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse().ok());
        let duration = match duration {
            Some(d) if d > 0.0 => Some(d),
            Some(_) => return VideoInfo::failed("zero or negative duration"),
            None => return VideoInfo::failed("unparseable duration"),
        };

        let has_audio = parsed.streams.iter().any(|s| s.codec_type == "audio");

        VideoInfo {
            duration,
            size: parsed.format.size.as_deref().and_then(|s| s.parse().ok()),
            bitrate: parsed
                .format
                .bit_rate
                .as_deref()
                .and_then(|s| s.parse().ok()),
            width: video_stream.width,
            height: video_stream.height,
            codec: video_stream.codec_name.clone(),
            fps: video_stream
                .r_frame_rate
                .as_deref()
                .and_then(Self::parse_fps),
            has_audio,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fps_handles_fraction() {
        assert_eq!(MediaProber::parse_fps("30000/1001"), Some(30000.0 / 1001.0));
    }

    #[test]
    fn parse_fps_rejects_non_numeric() {
        assert_eq!(MediaProber::parse_fps("__import__('os')"), None);
    }

    #[test]
    fn parse_fps_handles_zero_denominator() {
        assert_eq!(MediaProber::parse_fps("30/0"), None);
    }

    #[test]
    fn parse_fps_handles_bare_integer() {
        assert_eq!(MediaProber::parse_fps("25"), Some(25.0));
    }
}
