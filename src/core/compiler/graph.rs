//! §4.C general path: compiles `BuilderState` into a `filter_complex`
//! string, the ordered list of extra `-i` inputs, and any scratch files
//! (subtitle documents) the invocation depends on.

use std::path::{Path, PathBuf};

use crate::core::engine::prober::{MediaProber, VideoInfo};
use crate::core::ops::TimedText;
use crate::error::{CoreError, CoreResult};

use super::state::{BuilderState, StageKind, TrimState};
use super::subtitles::{escape_filter_path, render_ass_file};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Export,
    ExtractAudio,
}

#[derive(Debug, Default)]
pub struct CompiledGraph {
    pub filter_complex: String,
    /// Paths appended as `-i` after the main source, in order (index 1, 2, ...).
    pub extra_inputs: Vec<String>,
    pub scratch_files: Vec<PathBuf>,
    pub video_out_label: Option<&'static str>,
    pub audio_out_label: Option<&'static str>,
}

struct Ctx {
    stages: Vec<String>,
    video_label: String,
    audio_label: String,
    extra_inputs: Vec<String>,
    scratch_files: Vec<PathBuf>,
    d_out: f64,
    trim_start: f64,
    trim_end: f64,
    trim_explicit: bool,
    /// Fixed `-i` indices for watermark/background-audio, assigned
    /// unconditionally before the stage loop runs (§4.C stage 6:
    /// background audio's index is always `1 + watermark?`, independent
    /// of which op the recipe declares first).
    watermark_idx: Option<usize>,
    background_audio_idx: Option<usize>,
}

pub async fn build(
    state: &BuilderState,
    info: &VideoInfo,
    mode: OutputMode,
    prober: &MediaProber,
    work_dir: &Path,
    token: &str,
) -> CoreResult<CompiledGraph> {
    let source_duration = info.duration.unwrap_or(0.0);
    let trim_explicit = state.trim.is_some();
    let trim = state.trim.unwrap_or(TrimState {
        start: 0.0,
        end_sec: -1.0,
        duration: None,
    });
    let trim_start = trim.start;
    let trim_end_resolved = trim.resolve_end(source_duration);
    let mut d_out = trim_end_resolved - trim_start;

    let mut bg_pad: Option<f64> = None;
    if let Some(bg) = &state.background_audio {
        if !trim_explicit {
            let bg_info = prober.probe(&bg.path).await;
            if let Some(bg_dur) = bg_info.duration {
                if bg_dur > d_out {
                    bg_pad = Some(bg_dur - d_out);
                    d_out = bg_dur;
                }
            }
        }
    }

    let mut ctx = Ctx {
        stages: Vec::new(),
        video_label: "0:v".to_string(),
        audio_label: "0:a".to_string(),
        extra_inputs: Vec::new(),
        scratch_files: Vec::new(),
        d_out,
        trim_start,
        trim_end: trim_end_resolved,
        trim_explicit,
        watermark_idx: None,
        background_audio_idx: None,
    };

    if state.watermark.is_some() {
        ctx.watermark_idx = Some(ctx.extra_inputs.len() + 1);
        ctx.extra_inputs.push(state.watermark.as_ref().unwrap().path.clone());
    }
    if state.background_audio.is_some() {
        ctx.background_audio_idx = Some(ctx.extra_inputs.len() + 1);
        ctx.extra_inputs.push(state.background_audio.as_ref().unwrap().path.clone());
    }

    emit_canvas_trim(state, &mut ctx, info, trim_explicit);

    for kind in state.stage_order() {
        match kind {
            StageKind::Text => emit_text(state, &mut ctx),
            StageKind::Subtitles => emit_subtitles(state, &mut ctx, work_dir, token)?,
            StageKind::Speed => emit_speed(state, &mut ctx),
            StageKind::Watermark => emit_watermark(state, &mut ctx),
            StageKind::BackgroundAudio => emit_background_audio(state, &mut ctx, bg_pad),
        }
    }

    emit_composite(state, &mut ctx);
    emit_scale(state, &mut ctx);
    let (v_out, a_out) = emit_terminal(&mut ctx, mode);

    Ok(CompiledGraph {
        filter_complex: ctx.stages.join(";"),
        extra_inputs: ctx.extra_inputs,
        scratch_files: ctx.scratch_files,
        video_out_label: v_out,
        audio_out_label: a_out,
    })
}

fn emit_canvas_trim(state: &BuilderState, ctx: &mut Ctx, info: &VideoInfo, trim_explicit: bool) {
    let w = info.width.unwrap_or(1920);
    let h = info.height.unwrap_or(1080);
    let only_color = state
        .background_color
        .as_ref()
        .map(|b| b.only_color)
        .unwrap_or(false);
    let has_color = state.background_color.is_some();
    let mute_source_with_trim = state
        .background_audio
        .as_ref()
        .map(|a| a.mute_source)
        .unwrap_or(false)
        && trim_explicit;

    if only_color {
        let color = state
            .background_color
            .as_ref()
            .map(|b| b.color.as_str())
            .unwrap_or("black");
        ctx.stages.push(format!(
            "color=c={}:s={}x{}:d={}:r=30[bg]",
            color,
            w,
            h,
            fmt_num(ctx.d_out)
        ));
        if !mute_source_with_trim {
            ctx.stages.push(format!(
                "[0:a]atrim=start={}:end={}[a_trim]",
                fmt_num(ctx.trim_start),
                fmt_num(ctx.trim_end)
            ));
            ctx.audio_label = "a_trim".to_string();
        }
        ctx.video_label = "bg".to_string();
        return;
    }

    if has_color {
        let color = state
            .background_color
            .as_ref()
            .map(|b| b.color.as_str())
            .unwrap_or("black");
        ctx.stages.push(format!(
            "color=c={}:s={}x{}:d={}:r=30[bg]",
            color,
            w,
            h,
            fmt_num(ctx.d_out)
        ));
    }

    if trim_explicit {
        ctx.stages.push(format!(
            "[0:v]trim=start={}:end={},setpts=PTS-STARTPTS[v_trim]",
            fmt_num(ctx.trim_start),
            fmt_num(ctx.trim_end)
        ));
        ctx.video_label = "v_trim".to_string();
        if !mute_source_with_trim {
            ctx.stages.push(format!(
                "[0:a]atrim=start={}:end={},asetpts=PTS-STARTPTS[a_trim]",
                fmt_num(ctx.trim_start),
                fmt_num(ctx.trim_end)
            ));
            ctx.audio_label = "a_trim".to_string();
        }
    }
}

fn emit_text(state: &BuilderState, ctx: &mut Ctx) {
    if state.text_segments.is_empty() {
        return;
    }
    let window = ctx.trim_end - ctx.trim_start;
    let mut clauses = Vec::with_capacity(state.text_segments.len());
    for seg in &state.text_segments {
        let b = if seg.end_sec < 0.0 {
            ctx.trim_end
        } else {
            seg.end_sec
        };
        let proj_start = (seg.start_sec - ctx.trim_start).max(0.0);
        let proj_end = window.min(b - ctx.trim_start);
        let (es, ee) = if proj_end <= proj_start {
            (0.0, 0.0)
        } else {
            (proj_start, proj_end)
        };

        let mut clause = format!(
            "drawtext=text='{}':fontsize={}:x={}:y={}",
            escape_single_quotes(&seg.text),
            seg.fontsize,
            seg.x,
            seg.y
        );
        if let Some(ff) = &seg.fontfile {
            clause.push_str(&format!(":fontfile='{}'", escape_single_quotes(ff)));
        }
        if let Some(fc) = &seg.fontcolor {
            clause.push_str(&format!(":fontcolor={fc}"));
        }
        if seg.boxcolor.is_some() || seg.background.unwrap_or(false) {
            clause.push_str(":box=1");
            if let Some(bc) = &seg.boxcolor {
                clause.push_str(&format!(":boxcolor={bc}"));
            }
            if let Some(bw) = seg.boxborderw {
                clause.push_str(&format!(":boxborderw={bw}"));
            }
        }
        clause.push_str(&format!(
            ":enable='between(t,{},{})'",
            fmt_num(es),
            fmt_num(ee)
        ));
        clauses.push(clause);
    }
    ctx.stages
        .push(format!("[{}]{}[v_text]", ctx.video_label, clauses.join(",")));
    ctx.video_label = "v_text".to_string();
}

fn emit_subtitles(state: &BuilderState, ctx: &mut Ctx, work_dir: &Path, token: &str) -> CoreResult<()> {
    if state.karaoke_segments.is_empty() && state.text_sequences.is_empty() {
        return Ok(());
    }
    let items: Vec<TimedText> = state
        .text_sequences
        .iter()
        .flat_map(|seq| seq.items.clone())
        .collect();
    let path = render_ass_file(work_dir, token, &state.karaoke_segments, &items)?;
    ctx.scratch_files.push(path.clone());
    let escaped = escape_filter_path(&path);
    ctx.stages
        .push(format!("[{}]subtitles='{escaped}'[v_sub]", ctx.video_label));
    ctx.video_label = "v_sub".to_string();
    Ok(())
}

fn emit_speed(state: &BuilderState, ctx: &mut Ctx) {
    if state.speed_segments.is_empty() {
        return;
    }
    if state.speed_segments.len() == 1 {
        let f = state.speed_segments[0].speed;
        if (f - 1.0).abs() < f64::EPSILON {
            return;
        }
        ctx.stages
            .push(format!("[{}]setpts=PTS/{}[v_speed]", ctx.video_label, fmt_num(f)));
        let chain = atempo_chain(f).join(",");
        ctx.stages
            .push(format!("[{}]{chain}[a_speed]", ctx.audio_label));
        ctx.video_label = "v_speed".to_string();
        ctx.audio_label = "a_speed".to_string();
        return;
    }

    let mut vlabels = Vec::new();
    let mut alabels = Vec::new();
    for (i, seg) in state.speed_segments.iter().enumerate() {
        let s = seg.start_sec.clamp(0.0, ctx.d_out);
        let e = if seg.end_sec < 0.0 {
            ctx.d_out
        } else {
            seg.end_sec.clamp(0.0, ctx.d_out)
        };
        let f = seg.speed;
        ctx.stages.push(format!(
            "[{}]trim=start={}:end={},setpts=(PTS-STARTPTS)/{}[vseg{i}]",
            ctx.video_label,
            fmt_num(s),
            fmt_num(e),
            fmt_num(f)
        ));
        let chain = atempo_chain(f).join(",");
        ctx.stages.push(format!(
            "[{}]atrim=start={}:end={},asetpts=PTS-STARTPTS,{chain}[aseg{i}]",
            ctx.audio_label,
            fmt_num(s),
            fmt_num(e)
        ));
        vlabels.push(format!("[vseg{i}]"));
        alabels.push(format!("[aseg{i}]"));
    }
    let n = state.speed_segments.len();
    ctx.stages
        .push(format!("{}concat=n={n}:v=1:a=0[v_speed]", vlabels.concat()));
    ctx.stages
        .push(format!("{}concat=n={n}:v=0:a=1[a_speed]", alabels.concat()));
    ctx.video_label = "v_speed".to_string();
    ctx.audio_label = "a_speed".to_string();
}

fn emit_watermark(state: &BuilderState, ctx: &mut Ctx) {
    let Some(wm) = &state.watermark else { return };
    let idx = ctx.watermark_idx.expect("watermark_idx is set whenever state.watermark is Some");
    ctx.stages
        .push(format!("[{idx}]format=rgba,colorchannelmixer=aa={}[wm]", fmt_num(wm.opacity)));
    ctx.stages.push(format!(
        "[{}][wm]overlay={}[v_wm]",
        ctx.video_label,
        wm.position.expr()
    ));
    ctx.video_label = "v_wm".to_string();
}

fn emit_background_audio(state: &BuilderState, ctx: &mut Ctx, bg_pad: Option<f64>) {
    let Some(bg) = &state.background_audio else { return };
    let idx = ctx
        .background_audio_idx
        .expect("background_audio_idx is set whenever state.background_audio is Some");

    if let Some(pad) = bg_pad {
        ctx.stages.push(format!(
            "[{}]tpad=stop_mode=clone:stop_duration={}[v_pad]",
            ctx.video_label,
            fmt_num(pad)
        ));
        ctx.video_label = "v_pad".to_string();
    }

    match (bg.mute_source, ctx.trim_explicit) {
        (true, true) => {
            ctx.stages.push(format!(
                "[{idx}:a]atrim=start=0:end={},volume={}[a_bg]",
                fmt_num(ctx.d_out),
                fmt_num(bg.mix_volume)
            ));
        }
        (true, false) => {
            ctx.stages.push(format!(
                "[{}][{idx}:a]amix=inputs=2:weights='0 {}':duration=longest[a_bg]",
                ctx.audio_label,
                fmt_num(bg.mix_volume)
            ));
        }
        (false, true) => {
            ctx.stages.push(format!(
                "[{}][{idx}:a]amix=inputs=2:weights='1 {}':duration=longest[a_premix]",
                ctx.audio_label,
                fmt_num(bg.mix_volume)
            ));
            ctx.stages
                .push(format!("[a_premix]atrim=start=0:end={}[a_bg]", fmt_num(ctx.d_out)));
        }
        (false, false) => {
            ctx.stages.push(format!(
                "[{}][{idx}:a]amix=inputs=2:weights='1 {}':duration=longest[a_bg]",
                ctx.audio_label,
                fmt_num(bg.mix_volume)
            ));
        }
    }
    ctx.audio_label = "a_bg".to_string();
}

fn emit_composite(state: &BuilderState, ctx: &mut Ctx) {
    let only_color = state
        .background_color
        .as_ref()
        .map(|b| b.only_color)
        .unwrap_or(false);
    if state.background_color.is_some() && !only_color {
        ctx.stages.push(format!(
            "[bg][{}]overlay=(W-w)/2:(H-h)/2[v_composite]",
            ctx.video_label
        ));
        ctx.video_label = "v_composite".to_string();
    }
}

fn emit_scale(state: &BuilderState, ctx: &mut Ctx) {
    if let Some(expr) = state.transcode.as_ref().and_then(|t| t.scale.clone()) {
        ctx.stages
            .push(format!("[{}]scale={expr}[v_scaled]", ctx.video_label));
        ctx.video_label = "v_scaled".to_string();
    }
}

fn emit_terminal(ctx: &mut Ctx, mode: OutputMode) -> (Option<&'static str>, Option<&'static str>) {
    match mode {
        OutputMode::Export => {
            ctx.stages
                .push(format!("[{}]setpts=PTS[v_out]", ctx.video_label));
            ctx.stages
                .push(format!("[{}]anull[a_out]", ctx.audio_label));
            (Some("v_out"), Some("a_out"))
        }
        OutputMode::ExtractAudio => {
            ctx.stages
                .push(format!("[{}]anull[a_out]", ctx.audio_label));
            (None, Some("a_out"))
        }
    }
}

/// Decompose an arbitrary positive tempo factor into a chain of
/// `atempo=` clauses each within ffmpeg's valid `[0.5, 2.0]` range,
/// whose product equals `f` (§8 "Atempo chain").
pub fn atempo_chain(mut f: f64) -> Vec<String> {
    let mut parts = Vec::new();
    while f > 2.0 {
        parts.push("atempo=2.0".to_string());
        f /= 2.0;
    }
    while f < 0.5 {
        parts.push("atempo=0.5".to_string());
        f /= 0.5;
    }
    parts.push(format!("atempo={}", fmt_atempo(f)));
    parts
}

fn escape_single_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Minimal-decimal formatting for trim offsets, durations and speed
/// factors (`0`, `10`, `1.5`), as opposed to [`fmt_atempo`] which always
/// carries a decimal point.
fn fmt_num(f: f64) -> String {
    if (f - f.round()).abs() < 1e-9 {
        format!("{}", f.round() as i64)
    } else {
        trim_trailing_zeros(format!("{f:.6}"))
    }
}

fn fmt_atempo(f: f64) -> String {
    if (f - f.round()).abs() < 1e-9 {
        format!("{:.1}", f)
    } else {
        trim_trailing_zeros(format!("{f:.6}"))
    }
}

fn trim_trailing_zeros(s: String) -> String {
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atempo_chain_decomposes_4x() {
        let chain = atempo_chain(4.0);
        assert_eq!(chain, vec!["atempo=2.0".to_string(), "atempo=2.0".to_string()]);
    }

    #[test]
    fn atempo_chain_decomposes_quarter() {
        let chain = atempo_chain(0.25);
        assert_eq!(chain, vec!["atempo=0.5".to_string(), "atempo=0.5".to_string()]);
    }

    #[test]
    fn atempo_chain_product_matches_factor() {
        for f in [0.1, 0.3, 0.5, 1.0, 1.5, 2.0, 3.7, 8.0] {
            let chain = atempo_chain(f);
            let product: f64 = chain
                .iter()
                .map(|c| c.trim_start_matches("atempo=").parse::<f64>().unwrap())
                .product();
            assert!((product - f).abs() < 1e-6, "f={f} product={product}");
        }
    }

    #[test]
    fn fmt_num_is_integer_for_whole_seconds() {
        assert_eq!(fmt_num(0.0), "0");
        assert_eq!(fmt_num(10.0), "10");
        assert_eq!(fmt_num(1.5), "1.5");
    }
}
