//! §6.3 operation payloads — the JSON wire format `{op, data}`.
//!
//! Per DESIGN_NOTES.md (spec §9 "Dynamic op dispatch"), the source's
//! name→method map with untyped JSON payloads is replaced here with a
//! tagged-variant enum: one variant per op, each carrying its typed
//! payload. Unknown ops and malformed payloads become serde deserialize
//! errors, which the HTTP layer turns into `CoreError::InvalidRequest`
//! before a job is ever persisted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum OperationRecord {
    #[serde(rename = "trim")]
    Trim(TrimPayload),
    #[serde(rename = "compress")]
    Compress(CompressPayload),
    #[serde(rename = "concat")]
    Concat(ConcatPayload),
    #[serde(rename = "extractAudio")]
    ExtractAudio,
    #[serde(rename = "text")]
    Text(TextSegment),
    #[serde(rename = "karaoke")]
    Karaoke(KaraokeText),
    #[serde(rename = "textSequence")]
    TextSequence(TextSequence),
    #[serde(rename = "speed")]
    Speed(SpeedSegment),
    #[serde(rename = "watermark")]
    Watermark(WatermarkOverlay),
    #[serde(rename = "audio")]
    Audio(AudioOverlay),
    #[serde(rename = "backgroundColor")]
    BackgroundColor(BackgroundColor),
    #[serde(rename = "transcode")]
    Transcode(TranscodeOptions),
    #[serde(rename = "gif")]
    Gif(GifOptions),
    #[serde(rename = "convertToPlatform")]
    ConvertToPlatform(ConvertToPlatformOptions),
    #[serde(rename = "external_download")]
    ExternalDownload(DownloadOptions),
}

impl OperationRecord {
    /// The op name as it appears on the wire, used for log lines and for
    /// stripping the download op out of the remaining-ops list (§4.F step
    /// 3).
    pub fn op_name(&self) -> &'static str {
        match self {
            OperationRecord::Trim(_) => "trim",
            OperationRecord::Compress(_) => "compress",
            OperationRecord::Concat(_) => "concat",
            OperationRecord::ExtractAudio => "extractAudio",
            OperationRecord::Text(_) => "text",
            OperationRecord::Karaoke(_) => "karaoke",
            OperationRecord::TextSequence(_) => "textSequence",
            OperationRecord::Speed(_) => "speed",
            OperationRecord::Watermark(_) => "watermark",
            OperationRecord::Audio(_) => "audio",
            OperationRecord::BackgroundColor(_) => "backgroundColor",
            OperationRecord::Transcode(_) => "transcode",
            OperationRecord::Gif(_) => "gif",
            OperationRecord::ConvertToPlatform(_) => "convertToPlatform",
            OperationRecord::ExternalDownload(_) => "external_download",
        }
    }

    pub fn is_external_download(&self) -> bool {
        matches!(self, OperationRecord::ExternalDownload(_))
    }
}

fn default_end_sec() -> i64 {
    -1
}
fn default_one_f64() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimPayload {
    #[serde(default)]
    pub start_sec: i64,
    #[serde(default = "default_end_sec")]
    pub end_sec: i64,
    pub duration: Option<f64>,
}

impl Default for TrimPayload {
    fn default() -> Self {
        TrimPayload {
            start_sec: 0,
            end_sec: -1,
            duration: None,
        }
    }
}

fn default_fontsize() -> i32 {
    24
}
fn default_x() -> String {
    "10".to_string()
}
fn default_y() -> String {
    "10".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSegment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
    #[serde(default = "default_fontsize")]
    pub fontsize: i32,
    #[serde(default = "default_x")]
    pub x: String,
    #[serde(default = "default_y")]
    pub y: String,
    pub fontfile: Option<String>,
    pub fontcolor: Option<String>,
    pub boxcolor: Option<String>,
    pub boxborderw: Option<i32>,
    #[serde(default)]
    pub background: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedSegment {
    #[serde(default)]
    pub start_sec: f64,
    #[serde(default = "default_neg_one_f64")]
    pub end_sec: f64,
    #[serde(default = "default_one_f64")]
    pub speed: f64,
}

fn default_neg_one_f64() -> f64 {
    -1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatermarkPosition {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
    SafeTop,
    SafeBottom,
}

impl WatermarkPosition {
    /// Fixed engine-expression values (§6.3), carried over verbatim from
    /// the original's `WatermarkPosition` enum
    /// (`modules/video_processor.py`).
    pub fn expr(self) -> &'static str {
        match self {
            WatermarkPosition::TopLeft => "10:10",
            WatermarkPosition::TopCenter => "(W-w)/2:10",
            WatermarkPosition::TopRight => "W-w-10:10",
            WatermarkPosition::MiddleLeft => "10:(H-h)/2",
            WatermarkPosition::Center => "(W-w)/2:(H-h)/2",
            WatermarkPosition::MiddleRight => "W-w-10:(H-h)/2",
            WatermarkPosition::BottomLeft => "10:H-h-10",
            WatermarkPosition::BottomCenter => "(W-w)/2:H-h-10",
            WatermarkPosition::BottomRight => "W-w-10:H-h-10",
            WatermarkPosition::SafeTop => "(W-w)/2:80",
            WatermarkPosition::SafeBottom => "(W-w)/2:H-h-80",
        }
    }
}

fn default_opacity() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkOverlay {
    pub path: String,
    pub position: WatermarkPosition,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOverlay {
    pub path: String,
    #[serde(default = "default_one_f64")]
    pub mix_volume: f64,
    #[serde(default)]
    pub r#loop: bool,
    #[serde(default)]
    pub mute_source: bool,
}

fn default_color() -> String {
    "black".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundColor {
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub only_color: bool,
}

fn default_codec() -> String {
    "libx264".to_string()
}
fn default_preset() -> String {
    "medium".to_string()
}
fn default_crf() -> i32 {
    23
}
fn default_audio_codec() -> String {
    "aac".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeOptions {
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: i32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    pub audio_bitrate: Option<String>,
    pub movflags: Option<String>,
    pub target_size_mb: Option<f64>,
    pub scale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressPayload {
    pub target_size_mb: Option<f64>,
    pub scale: Option<String>,
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcatPayload {
    pub input_paths: Vec<String>,
}

fn default_start_time() -> String {
    "00:00:00".to_string()
}
fn default_gif_duration() -> f64 {
    5.0
}
fn default_fps() -> i32 {
    10
}
fn default_gif_scale() -> i32 {
    480
}
fn default_gif_codec() -> String {
    "gif".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GifOptions {
    #[serde(default = "default_start_time")]
    pub start_time: String,
    #[serde(default = "default_gif_duration")]
    pub duration: f64,
    #[serde(default = "default_fps")]
    pub fps: i32,
    #[serde(default = "default_gif_scale")]
    pub scale: i32,
    #[serde(default = "default_gif_codec")]
    pub output_codec: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_sec: f64,
    pub end_sec: f64,
}

fn default_karaoke_fontsize() -> i32 {
    60
}
fn default_white() -> String {
    "white".to_string()
}
fn default_karaoke_boxcolor() -> String {
    "black@1.0".to_string()
}
fn default_boxborderw_12() -> i32 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KaraokeText {
    pub sentence: String,
    pub start_sec: Option<f64>,
    pub end_sec: Option<f64>,
    pub words: Option<Vec<WordTiming>>,
    #[serde(default = "default_karaoke_fontsize")]
    pub fontsize: i32,
    pub x: Option<String>,
    pub y: Option<String>,
    #[serde(default = "default_white")]
    pub fontcolor: String,
    pub highlight_fontcolor: Option<String>,
    #[serde(default = "default_karaoke_boxcolor")]
    pub boxcolor: String,
    #[serde(default = "default_boxborderw_12")]
    pub boxborderw: i32,
}

fn default_timed_text_fontsize() -> i32 {
    60
}
fn default_fade_ms() -> i32 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedText {
    pub text: String,
    pub start_sec: f64,
    pub end_sec: f64,
    #[serde(default = "default_timed_text_fontsize")]
    pub fontsize: i32,
    pub x: Option<String>,
    pub y: Option<String>,
    #[serde(default = "default_white")]
    pub fontcolor: String,
    pub boxcolor: Option<String>,
    #[serde(default)]
    pub boxborderw: i32,
    #[serde(default)]
    pub background: bool,
    #[serde(default = "default_fade_ms")]
    pub fade_in_ms: i32,
    #[serde(default = "default_fade_ms")]
    pub fade_out_ms: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSequence {
    pub items: Vec<TimedText>,
}

fn default_quality() -> String {
    "best".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    #[serde(default = "default_quality")]
    pub quality: String,
    pub format: Option<String>,
    #[serde(default)]
    pub audio_only: bool,
}

fn default_audio_bitrate_128k() -> String {
    "128k".to_string()
}

/// Audio codec/container table for `extractAudio` (supplemental to the
/// wire payloads: `extractAudio` itself carries no data, but the worker
/// needs somewhere to resolve codec/extension from a requested format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AudioFormat {
    Mp3,
    Aac,
    Wav,
    Flac,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Mp3
    }
}

impl AudioFormat {
    /// `(codec, container_extension, default_bitrate)`.
    pub fn codec_ext_bitrate(self) -> (&'static str, &'static str, &'static str) {
        match self {
            AudioFormat::Mp3 => ("libmp3lame", "mp3", "192k"),
            AudioFormat::Aac => ("aac", "m4a", "192k"),
            AudioFormat::Wav => ("pcm_s16le", "wav", "1536k"),
            AudioFormat::Flac => ("flac", "flac", "1536k"),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "MP3" => AudioFormat::Mp3,
            "AAC" => AudioFormat::Aac,
            "WAV" => AudioFormat::Wav,
            "FLAC" => AudioFormat::Flac,
            _ => return None,
        })
    }
}

/// Allow-listed output container extensions (§4.F step 5): anything else
/// is rejected and the worker falls back to `mp4`.
pub const VALID_OUTPUT_EXTENSIONS: &[&str] = &[
    "mp4", "webm", "mkv", "mp3", "m4a", "wav", "flac", "gif", "mov", "avi",
];

pub fn is_valid_output_extension(ext: &str) -> bool {
    VALID_OUTPUT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertToPlatformOptions {
    pub platform: Option<String>,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: i32,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate_128k")]
    pub audio_bitrate: String,
    pub scale: Option<String>,
}
