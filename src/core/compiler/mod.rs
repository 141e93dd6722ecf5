//! §4.C Filter-Graph Compiler — the builder that turns accumulated op
//! state into a single engine invocation.

pub mod args;
pub mod graph;
pub mod state;
pub mod subtitles;

use std::path::{Path, PathBuf};

use crate::core::engine::prober::{MediaProber, VideoInfo};
use crate::core::ops::AudioFormat;
use crate::error::CoreResult;

pub use args::CompiledInvocation;
pub use graph::OutputMode;
pub use state::BuilderState;

pub struct FilterGraphCompiler {
    work_dir: PathBuf,
}

impl FilterGraphCompiler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        FilterGraphCompiler {
            work_dir: work_dir.into(),
        }
    }

    /// Compile accumulated builder state into a full engine invocation.
    /// `token` should be a fresh random string unique to this job, used
    /// to namespace any scratch subtitle files.
    pub async fn compile(
        &self,
        prober: &MediaProber,
        source: &str,
        info: &VideoInfo,
        state: &BuilderState,
        token: &str,
    ) -> CoreResult<CompiledInvocation> {
        if let Some(concat) = &state.concat {
            return args::concat_mode(&concat.input_paths, args::INTERMEDIATE_CONTAINER);
        }

        if let Some(gif) = &state.gif {
            return Ok(args::gif_mode(source, gif));
        }

        if state.extract_audio {
            let has_trim = state.trim.is_some();
            let has_speed = !state.speed_segments.is_empty();
            let format = AudioFormat::Mp3;

            let graph = if has_trim && !has_speed {
                None
            } else if has_speed {
                Some(
                    graph::build(
                        state,
                        info,
                        OutputMode::ExtractAudio,
                        prober,
                        &self.work_dir,
                        token,
                    )
                    .await?,
                )
            } else {
                None
            };

            return Ok(args::extract_audio(source, state, info, graph, format));
        }

        if !state.has_filter_state() {
            return Ok(args::fast_path_export(source));
        }

        let graph = graph::build(state, info, OutputMode::Export, prober, &self.work_dir, token)
            .await?;
        Ok(args::general_export(source, graph, state, info))
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ops::{SpeedSegment, TextSegment, TrimPayload, WatermarkOverlay, WatermarkPosition};

    fn canonical_info() -> VideoInfo {
        VideoInfo {
            duration: Some(30.0),
            size: Some(1_000_000),
            bitrate: Some(1000),
            width: Some(1920),
            height: Some(1080),
            codec: Some("h264".to_string()),
            fps: Some(30.0),
            has_audio: true,
            error: None,
        }
    }

    fn mk_compiler() -> (FilterGraphCompiler, MediaProber) {
        (
            FilterGraphCompiler::new(std::env::temp_dir()),
            MediaProber::new("ffprobe"),
        )
    }

    #[tokio::test]
    async fn scenario_1_plain_trim() {
        let (compiler, prober) = mk_compiler();
        let mut state = BuilderState::new();
        state.trim(TrimPayload {
            start_sec: 0,
            end_sec: 10,
            duration: None,
        });
        let info = canonical_info();
        let invocation = compiler
            .compile(&prober, "input.mp4", &info, &state, "t1")
            .await
            .unwrap();
        let graph_arg = invocation
            .argv
            .iter()
            .find(|a| a.contains("trim="))
            .cloned()
            .unwrap_or_default();
        assert!(graph_arg.contains("trim=start=0:end=10"));
        assert!(graph_arg.contains("setpts=PTS-STARTPTS"));
        assert!(graph_arg.contains("[v_out]"));
        assert!(graph_arg.contains("[a_out]"));
        assert!(invocation.argv.contains(&args::INTERMEDIATE_CONTAINER.to_string()));
    }

    #[tokio::test]
    async fn scenario_2_text_watermark_speed_trim_ordering() {
        let (compiler, prober) = mk_compiler();
        let mut state = BuilderState::new();
        state.trim(TrimPayload {
            start_sec: 0,
            end_sec: 30,
            duration: None,
        });
        state.add_text(TextSegment {
            start_sec: 0.0,
            end_sec: -1.0,
            text: "Title".to_string(),
            fontsize: 24,
            x: "10".to_string(),
            y: "10".to_string(),
            fontfile: None,
            fontcolor: None,
            boxcolor: None,
            boxborderw: None,
            background: None,
        });
        state.speed_control(SpeedSegment {
            start_sec: 0.0,
            end_sec: -1.0,
            speed: 1.5,
        });
        state.add_watermark(WatermarkOverlay {
            path: "logo.png".to_string(),
            position: WatermarkPosition::SafeBottom,
            opacity: 0.7,
        });

        let info = canonical_info();
        let invocation = compiler
            .compile(&prober, "input.mp4", &info, &state, "t2")
            .await
            .unwrap();

        let idx = invocation
            .argv
            .iter()
            .position(|a| a == "-filter_complex")
            .unwrap();
        let graph_arg = invocation.argv[idx + 1].clone();

        let pos_trim = graph_arg.find("trim=start=0:end=30").unwrap();
        let pos_text = graph_arg.find("drawtext=").unwrap();
        let pos_setpts = graph_arg.find("setpts=PTS/1.5").unwrap();
        let pos_atempo = graph_arg.find("atempo=1.5").unwrap();
        let pos_overlay = graph_arg.find("overlay=(W-w)/2:H-h-80").unwrap();

        assert!(pos_trim < pos_text);
        assert!(pos_text < pos_setpts);
        assert!(pos_setpts < pos_atempo);
        assert!(pos_atempo < pos_overlay);

        let inputs: Vec<&str> = invocation
            .argv
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(inputs, vec!["input.mp4", "logo.png"]);
    }

    /// Background audio declared before watermark in the recipe must not
    /// flip their `-i` indices: watermark is always input 1, background
    /// audio always input `1 + watermark?` (§4.C stage 6, §8 "Watermark
    /// input index"), unlike Text/Speed which do reorder with the recipe.
    #[tokio::test]
    async fn background_audio_before_watermark_keeps_fixed_input_indices() {
        use crate::core::ops::AudioOverlay;

        let (compiler, prober) = mk_compiler();
        let mut state = BuilderState::new();
        state.add_background_audio(AudioOverlay {
            path: "bg.mp3".to_string(),
            mix_volume: 0.5,
            r#loop: false,
            mute_source: false,
        });
        state.add_watermark(WatermarkOverlay {
            path: "logo.png".to_string(),
            position: WatermarkPosition::SafeBottom,
            opacity: 0.7,
        });

        let info = canonical_info();
        let invocation = compiler
            .compile(&prober, "input.mp4", &info, &state, "t3")
            .await
            .unwrap();

        let inputs: Vec<&str> = invocation
            .argv
            .windows(2)
            .filter(|w| w[0] == "-i")
            .map(|w| w[1].as_str())
            .collect();
        assert_eq!(inputs, vec!["input.mp4", "logo.png", "bg.mp3"]);

        let idx = invocation.argv.iter().position(|a| a == "-filter_complex").unwrap();
        let graph_arg = invocation.argv[idx + 1].clone();
        assert!(graph_arg.contains("[1]format=rgba"));
        assert!(graph_arg.contains("[2:a]"));
    }
}
