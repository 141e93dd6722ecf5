//! §4.C argument assembly: turn a compiled filter graph (or the fast
//! path, or one of the special output modes) into a full `ffmpeg` argv.

use std::path::PathBuf;

use crate::core::engine::prober::VideoInfo;
use crate::core::ops::AudioFormat;
use crate::error::{CoreError, CoreResult};

use super::graph::CompiledGraph;
use super::state::BuilderState;

pub const INTERMEDIATE_CONTAINER: &str = "matroska";

#[derive(Debug, Default)]
pub struct CompiledInvocation {
    pub argv: Vec<String>,
    /// Extra `-i` paths in the order they must be appended, for the
    /// caller to resolve into absolute filesystem paths if needed.
    pub extra_inputs: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub scratch_files: Vec<PathBuf>,
    /// The output container extension the engine actually writes, used
    /// by the worker to derive the artifact filename (§4.F step 5).
    pub output_ext: String,
}

/// Compute the target video bitrate in kbps for a `target_size_mb`
/// request: `floor(size_mb * 8192 / duration) - 128`, floored at 100.
pub fn target_bitrate_kbps(size_mb: f64, duration: f64) -> i64 {
    if duration <= 0.0 {
        return 100;
    }
    let raw = (size_mb * 8192.0 / duration).floor() as i64 - 128;
    raw.max(100)
}

/// `export` mode, fast path: no filter-altering state accumulated.
/// Stream-copy into the streamable intermediate container.
pub fn fast_path_export(source: &str) -> CompiledInvocation {
    CompiledInvocation {
        argv: vec![
            "-i".to_string(),
            source.to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            INTERMEDIATE_CONTAINER.to_string(),
            "pipe:1".to_string(),
        ],
        output_ext: "mp4".to_string(),
        ..Default::default()
    }
}

/// `export` mode, general path: build from a compiled filter graph plus
/// codec/container flags from the accumulated transcode options.
pub fn general_export(
    source: &str,
    graph: CompiledGraph,
    state: &BuilderState,
    info: &VideoInfo,
) -> CompiledInvocation {
    let mut argv = vec!["-i".to_string(), source.to_string()];
    for extra in &graph.extra_inputs {
        argv.push("-i".to_string());
        argv.push(extra.clone());
    }
    argv.push("-filter_complex".to_string());
    argv.push(graph.filter_complex.clone());

    if let Some(v) = graph.video_out_label {
        argv.push("-map".to_string());
        argv.push(format!("[{v}]"));
    }
    if let Some(a) = graph.audio_out_label {
        argv.push("-map".to_string());
        argv.push(format!("[{a}]"));
    }

    let opts = state.transcode.clone().unwrap_or(crate::core::ops::TranscodeOptions {
        codec: "libx264".to_string(),
        preset: "medium".to_string(),
        crf: 23,
        audio_codec: "aac".to_string(),
        audio_bitrate: None,
        movflags: None,
        target_size_mb: None,
        scale: None,
    });

    argv.push("-c:v".to_string());
    argv.push(opts.codec.clone());
    argv.push("-preset".to_string());
    argv.push(opts.preset.clone());
    argv.push("-c:a".to_string());
    argv.push(opts.audio_codec.clone());

    if let Some(size_mb) = opts.target_size_mb {
        let duration = info.duration.unwrap_or(0.0);
        let kbps = target_bitrate_kbps(size_mb, duration);
        argv.push("-b:v".to_string());
        argv.push(format!("{kbps}k"));
        argv.push("-maxrate".to_string());
        argv.push(format!("{}k", (kbps as f64 * 1.5).round() as i64));
        argv.push("-bufsize".to_string());
        argv.push(format!("{}k", kbps * 2));
    } else {
        argv.push("-crf".to_string());
        argv.push(opts.crf.to_string());
    }

    if let Some(ab) = &opts.audio_bitrate {
        argv.push("-b:a".to_string());
        argv.push(ab.clone());
    }
    if let Some(mf) = &opts.movflags {
        argv.push("-movflags".to_string());
        argv.push(mf.clone());
    }

    argv.push("-f".to_string());
    argv.push(INTERMEDIATE_CONTAINER.to_string());
    argv.push("pipe:1".to_string());

    CompiledInvocation {
        argv,
        extra_inputs: graph.extra_inputs,
        stdin: None,
        scratch_files: graph.scratch_files,
        output_ext: "mp4".to_string(),
    }
}

/// `extract_audio` mode: four flat sub-cases depending on trim/speed
/// presence (§4.C).
pub fn extract_audio(
    source: &str,
    state: &BuilderState,
    info: &VideoInfo,
    graph: Option<CompiledGraph>,
    audio_format: AudioFormat,
) -> CompiledInvocation {
    let (codec, ext, bitrate) = audio_format.codec_ext_bitrate();
    let has_trim = state.trim.is_some();
    let has_speed = !state.speed_segments.is_empty();

    let mut argv = vec!["-i".to_string(), source.to_string()];

    if !has_trim && !has_speed {
        argv.push("-vn".to_string());
        argv.push("-c:a".to_string());
        argv.push(codec.to_string());
        argv.push("-b:a".to_string());
        argv.push(bitrate.to_string());
        argv.push("-f".to_string());
        argv.push(ext.to_string());
        argv.push("pipe:1".to_string());
        return CompiledInvocation {
            argv,
            output_ext: ext.to_string(),
            ..Default::default()
        };
    }

    if has_trim && !has_speed {
        let trim = state.trim.unwrap();
        let end = trim.resolve_end(info.duration.unwrap_or(0.0));
        let duration = end - trim.start;
        argv.push("-ss".to_string());
        argv.push(trim.start.to_string());
        argv.push("-t".to_string());
        argv.push(duration.to_string());
        argv.push("-vn".to_string());
        argv.push("-c:a".to_string());
        argv.push(codec.to_string());
        argv.push("-b:a".to_string());
        argv.push(bitrate.to_string());
        argv.push("-f".to_string());
        argv.push(ext.to_string());
        argv.push("pipe:1".to_string());
        return CompiledInvocation {
            argv,
            output_ext: ext.to_string(),
            ..Default::default()
        };
    }

    // (c) speed only, (d) trim + speed: both need the filter graph with
    // `-map [a_out]`, built by the caller via `OutputMode::ExtractAudio`.
    let graph = graph.expect("extract_audio with speed or trim requires a compiled graph");
    for extra in &graph.extra_inputs {
        argv.push("-i".to_string());
        argv.push(extra.clone());
    }
    argv.push("-filter_complex".to_string());
    argv.push(graph.filter_complex.clone());
    if let Some(a) = graph.audio_out_label {
        argv.push("-map".to_string());
        argv.push(format!("[{a}]"));
    }
    argv.push("-c:a".to_string());
    argv.push(codec.to_string());
    argv.push("-b:a".to_string());
    argv.push(bitrate.to_string());
    argv.push("-f".to_string());
    argv.push(ext.to_string());
    argv.push("pipe:1".to_string());

    CompiledInvocation {
        argv,
        extra_inputs: graph.extra_inputs,
        stdin: None,
        scratch_files: graph.scratch_files,
        output_ext: ext.to_string(),
    }
}

/// `gif` mode: a self-contained single-input palette-based pipeline.
pub fn gif_mode(source: &str, opts: &crate::core::ops::GifOptions) -> CompiledInvocation {
    let vf = format!(
        "fps={},scale={}:-1:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
        opts.fps, opts.scale
    );
    let argv = vec![
        "-ss".to_string(),
        opts.start_time.clone(),
        "-t".to_string(),
        opts.duration.to_string(),
        "-i".to_string(),
        source.to_string(),
        "-vf".to_string(),
        vf,
        "-loop".to_string(),
        "0".to_string(),
        "-f".to_string(),
        "gif".to_string(),
        "pipe:1".to_string(),
    ];
    CompiledInvocation {
        argv,
        output_ext: "gif".to_string(),
        ..Default::default()
    }
}

/// `concat_videos` mode: a concat-demuxer manifest fed over stdin
/// (§4.C). Requires at least 2 inputs.
pub fn concat_mode(input_paths: &[String], container: &str) -> CoreResult<CompiledInvocation> {
    if input_paths.len() < 2 {
        return Err(CoreError::invalid("concat requires at least 2 input_paths"));
    }
    let mut manifest = String::new();
    for p in input_paths {
        manifest.push_str(&format!("file '{}'\n", p.replace('\'', "'\\''")));
    }
    let argv = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-f".to_string(),
        container.to_string(),
        "-movflags".to_string(),
        "+frag_keyframe+empty_moov".to_string(),
        "pipe:1".to_string(),
    ];
    Ok(CompiledInvocation {
        argv,
        stdin: Some(manifest.into_bytes()),
        output_ext: "mp4".to_string(),
        ..Default::default()
    })
}

/// Delivery transmux (§4.D): turn the streamed intermediate bytes
/// (already on disk at `intermediate_path`) into a faststart mp4 at
/// `out_path`.
pub fn transmux_args(
    intermediate_path: &str,
    out_path: &str,
    opts: &crate::core::ops::ConvertToPlatformOptions,
) -> Vec<String> {
    let mut argv = vec![
        "-i".to_string(),
        intermediate_path.to_string(),
        "-c:v".to_string(),
        opts.codec.clone(),
        "-preset".to_string(),
        opts.preset.clone(),
        "-crf".to_string(),
        opts.crf.to_string(),
        "-c:a".to_string(),
        opts.audio_codec.clone(),
        "-b:a".to_string(),
        opts.audio_bitrate.clone(),
    ];
    if let Some(scale) = &opts.scale {
        argv.push("-vf".to_string());
        argv.push(format!("scale={scale}"));
    }
    argv.push("-movflags".to_string());
    argv.push("+faststart".to_string());
    argv.push("-f".to_string());
    argv.push("mp4".to_string());
    argv.push(out_path.to_string());
    argv
}

