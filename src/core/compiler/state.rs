//! Mutable builder state accumulated from typed ops (§4.C "Builder state").

use crate::core::ops::{
    AudioOverlay, BackgroundColor, ConcatPayload, ConvertToPlatformOptions, CompressPayload,
    GifOptions, KaraokeText, SpeedSegment, TextSegment, TextSequence, TranscodeOptions,
    TrimPayload, WatermarkOverlay,
};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy)]
pub struct TrimState {
    pub start: f64,
    /// `-1.0` means "to the end of source"; resolved lazily because it
    /// depends on source duration.
    pub end_sec: f64,
    pub duration: Option<f64>,
}

impl TrimState {
    /// Resolve `end`: `-1 -> source.duration`; or `start + duration`.
    pub fn resolve_end(&self, source_duration: f64) -> f64 {
        if let Some(d) = self.duration {
            self.start + d
        } else if self.end_sec < 0.0 {
            source_duration
        } else {
            self.end_sec
        }
    }
}

/// One of the interchangeable middle stages of the general path (§4.C
/// stages 3-6). Each recorded once, at the recipe position of its first
/// occurrence — see [`BuilderState::stage_order`]. This only orders where
/// each stage sits in the filter chain; the `-i` input index Watermark
/// and BackgroundAudio occupy is fixed (watermark always 1, background
/// audio always `1 + watermark?`) regardless of declaration order — see
/// `graph::build`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Text,
    Subtitles,
    Speed,
    Watermark,
    BackgroundAudio,
}

#[derive(Debug, Default, Clone)]
pub struct BuilderState {
    pub trim: Option<TrimState>,
    pub watermark: Option<WatermarkOverlay>,
    pub text_segments: Vec<TextSegment>,
    pub karaoke_segments: Vec<KaraokeText>,
    pub text_sequences: Vec<TextSequence>,
    pub speed_segments: Vec<SpeedSegment>,
    pub background_audio: Option<AudioOverlay>,
    pub background_color: Option<BackgroundColor>,
    pub transcode: Option<TranscodeOptions>,
    pub gif: Option<GifOptions>,
    pub convert_to_platform: Option<ConvertToPlatformOptions>,
    pub concat: Option<ConcatPayload>,
    /// Flipped by the `extractAudio` op (§4.J: "mode flip", no payload).
    pub extract_audio: bool,
    /// Stage kinds in first-occurrence recipe order (§5 "operations apply
    /// to the builder in the recipe's declared order"). Trim is always
    /// emitted first regardless of recipe position (it fixes `D_out`,
    /// which every other stage clamps against); composite/scale/terminal
    /// are structural and always follow last, so neither is tracked here.
    stage_order: Vec<StageKind>,
}

impl BuilderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trim(&mut self, p: TrimPayload) {
        self.trim = Some(TrimState {
            start: p.start_sec as f64,
            end_sec: p.end_sec as f64,
            duration: p.duration,
        });
    }

    /// `compress` populates the same transcode accumulator as `transcode`,
    /// with codec/audio defaults since `CompressPayload` only carries
    /// size/scale/preset.
    pub fn compress(&mut self, p: CompressPayload) {
        let mut opts = self.transcode.clone().unwrap_or(TranscodeOptions {
            codec: "libx264".to_string(),
            preset: p.preset.clone(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate: None,
            movflags: None,
            target_size_mb: None,
            scale: None,
        });
        opts.preset = p.preset;
        opts.target_size_mb = p.target_size_mb.or(opts.target_size_mb);
        opts.scale = p.scale.or(opts.scale);
        self.transcode = Some(opts);
    }

    pub fn concat_videos(&mut self, p: ConcatPayload) -> CoreResult<()> {
        if p.input_paths.len() < 2 {
            return Err(CoreError::invalid(
                "concat requires at least 2 input_paths",
            ));
        }
        self.concat = Some(p);
        Ok(())
    }

    fn record_stage(&mut self, kind: StageKind) {
        if !self.stage_order.contains(&kind) {
            self.stage_order.push(kind);
        }
    }

    pub fn stage_order(&self) -> &[StageKind] {
        &self.stage_order
    }

    pub fn add_text(&mut self, p: TextSegment) {
        self.record_stage(StageKind::Text);
        self.text_segments.push(p);
    }

    pub fn add_karaoke_text(&mut self, p: KaraokeText) {
        self.record_stage(StageKind::Subtitles);
        self.karaoke_segments.push(p);
    }

    pub fn add_text_sequence(&mut self, p: TextSequence) -> CoreResult<()> {
        if p.items.is_empty() {
            return Err(CoreError::invalid("textSequence requires at least 1 item"));
        }
        for item in &p.items {
            if item.end_sec <= item.start_sec {
                return Err(CoreError::invalid(
                    "textSequence item end_sec must be greater than start_sec",
                ));
            }
        }
        self.record_stage(StageKind::Subtitles);
        self.text_sequences.push(p);
        Ok(())
    }

    pub fn speed_control(&mut self, p: SpeedSegment) {
        self.record_stage(StageKind::Speed);
        self.speed_segments.push(p);
    }

    pub fn add_watermark(&mut self, p: WatermarkOverlay) {
        self.record_stage(StageKind::Watermark);
        self.watermark = Some(p);
    }

    pub fn add_background_audio(&mut self, p: AudioOverlay) {
        self.record_stage(StageKind::BackgroundAudio);
        self.background_audio = Some(p);
    }

    pub fn set_background_color(&mut self, p: BackgroundColor) {
        self.background_color = Some(p);
    }

    pub fn transcode(&mut self, p: TranscodeOptions) {
        self.transcode = Some(p);
    }

    pub fn create_gif(&mut self, p: GifOptions) {
        self.gif = Some(p);
    }

    pub fn convert_to_platform(&mut self, p: ConvertToPlatformOptions) {
        self.convert_to_platform = Some(p);
    }

    pub fn set_extract_audio(&mut self) {
        self.extract_audio = true;
    }

    /// The fast path (§4.C) applies only when no filter-altering state has
    /// been accumulated: no trim, text, karaoke, speed, watermark,
    /// background audio/color, or scale.
    pub fn has_filter_state(&self) -> bool {
        self.trim.is_some()
            || self.watermark.is_some()
            || !self.text_segments.is_empty()
            || !self.karaoke_segments.is_empty()
            || !self.text_sequences.is_empty()
            || !self.speed_segments.is_empty()
            || self.background_audio.is_some()
            || self.background_color.is_some()
            || self
                .transcode
                .as_ref()
                .map(|t| t.scale.is_some())
                .unwrap_or(false)
    }
}
