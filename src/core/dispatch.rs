//! §4.J Op-to-Builder Dispatch — apply a single typed op to a builder.
//!
//! The static `op name -> {method, payload schema}` table from the
//! source (`modules/video_processor.py`'s dict of bound methods) becomes
//! a match over `OperationRecord`'s variants: deserialisation already
//! validated the payload shape, so this step can never produce
//! `InvalidRequest` except for the two ops with extra structural
//! invariants (`concat`, `textSequence`).

use crate::core::compiler::state::BuilderState;
use crate::core::ops::OperationRecord;
use crate::error::CoreResult;

/// Apply one op to the builder. Returns `Ok(true)` if the op was
/// `extractAudio` (a mode flip, not builder state).
pub fn apply(state: &mut BuilderState, op: &OperationRecord) -> CoreResult<()> {
    match op.clone() {
        OperationRecord::Trim(p) => state.trim(p),
        OperationRecord::Compress(p) => state.compress(p),
        OperationRecord::Concat(p) => state.concat_videos(p)?,
        OperationRecord::ExtractAudio => state.set_extract_audio(),
        OperationRecord::Text(p) => state.add_text(p),
        OperationRecord::Karaoke(p) => state.add_karaoke_text(p),
        OperationRecord::TextSequence(p) => state.add_text_sequence(p)?,
        OperationRecord::Speed(p) => state.speed_control(p),
        OperationRecord::Watermark(p) => state.add_watermark(p),
        OperationRecord::Audio(p) => state.add_background_audio(p),
        OperationRecord::BackgroundColor(p) => state.set_background_color(p),
        OperationRecord::Transcode(p) => state.transcode(p),
        OperationRecord::Gif(p) => state.create_gif(p),
        OperationRecord::ConvertToPlatform(p) => state.convert_to_platform(p),
        OperationRecord::ExternalDownload(_) => {
            // Pre-op: resolved by the Worker before the builder is
            // constructed (§4.F step 3), never routed here.
        }
    }
    Ok(())
}

/// Validate a recipe against the dispatch table without mutating
/// caller-visible state: build a scratch builder and apply every op,
/// propagating the first structural error. Used by the HTTP layer and
/// the Workflow Planner (§4.H) before anything is persisted.
pub fn validate_recipe(ops: &[OperationRecord]) -> CoreResult<()> {
    let mut scratch = BuilderState::new();
    for op in ops {
        apply(&mut scratch, op)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ops::ConcatPayload;

    #[test]
    fn validate_recipe_rejects_single_input_concat() {
        let ops = vec![OperationRecord::Concat(ConcatPayload {
            input_paths: vec!["a.mp4".to_string()],
        })];
        assert!(validate_recipe(&ops).is_err());
    }

    #[test]
    fn validate_recipe_accepts_known_ops() {
        let ops = vec![OperationRecord::ExtractAudio];
        assert!(validate_recipe(&ops).is_ok());
    }
}
