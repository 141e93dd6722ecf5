//! ASS subtitle rendering for karaoke sentences and timed-text sequences
//! (§4.C stage 4).

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::core::ops::{KaraokeText, TimedText, WordTiming};
use crate::error::{CoreError, CoreResult};

const ASS_HEADER: &str = "[Script Info]\nScriptType: v4.00+\nPlayResX: 1920\nPlayResY: 1080\nWrapStyle: 0\nScaledBorderAndShadow: yes\n\n[V4+ Styles]\nFormat: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n";

const EVENTS_HEADER: &str =
    "\n[Events]\nFormat: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n";

/// Write an ASS document combining every accumulated karaoke sentence and
/// timed-text item to `<work_dir>/subs_<token>.ass`, returning the path
/// ffmpeg's `subtitles=` filter should reference.
pub fn render_ass_file(
    work_dir: &Path,
    token: &str,
    karaoke: &[KaraokeText],
    sequences_items: &[TimedText],
) -> CoreResult<PathBuf> {
    let mut doc = String::from(ASS_HEADER);

    for (i, k) in karaoke.iter().enumerate() {
        writeln!(
            doc,
            "Style: Karaoke{i},Arial,{},&H00{},&H000000FF,&H00000000,{},0,0,0,0,100,100,0,0,1,{},0,8,40,40,40,1",
            k.fontsize,
            ass_bgr(&k.fontcolor),
            ass_bgr_with_alpha(&k.boxcolor),
            k.boxborderw,
        )
        .ok();
    }
    for (i, _item) in sequences_items.iter().enumerate() {
        writeln!(
            doc,
            "Style: Text{i},Arial,{},&H00FFFFFF,&H000000FF,&H00000000,&H00000000,0,0,0,0,100,100,0,0,1,0,0,2,40,40,40,1",
            sequences_items[i].fontsize,
        )
        .ok();
    }

    doc.push_str(EVENTS_HEADER);

    for (i, k) in karaoke.iter().enumerate() {
        let start = k.start_sec.unwrap_or(0.0);
        let end = k
            .end_sec
            .unwrap_or_else(|| start + estimate_sentence_duration(&k.sentence));
        let text = render_karaoke_line(k, start, end);
        writeln!(
            doc,
            "Dialogue: 0,{},{},Karaoke{i},,0,0,0,,{}",
            ass_time(start),
            ass_time(end),
            text
        )
        .ok();
    }

    for (i, item) in sequences_items.iter().enumerate() {
        let text = render_timed_text_line(item);
        writeln!(
            doc,
            "Dialogue: 0,{},{},Text{i},,0,0,0,,{}",
            ass_time(item.start_sec),
            ass_time(item.end_sec),
            text
        )
        .ok();
    }

    let path = work_dir.join(format!("subs_{token}.ass"));
    std::fs::write(&path, doc).map_err(CoreError::Io)?;
    Ok(path)
}

/// Build the `\k`-tagged karaoke line: either from explicit word timings
/// or, if absent, by distributing the sentence's duration across its
/// tokens proportional to character weight, pinning the last token to the
/// sentence end (§4.C stage 4).
fn render_karaoke_line(k: &KaraokeText, start: f64, end: f64) -> String {
    let color_override = k
        .highlight_fontcolor
        .as_deref()
        .map(|c| format!("{{\\1c&H00{}&}}", ass_bgr(c)))
        .unwrap_or_default();

    let words: Vec<WordTiming> = match &k.words {
        Some(w) if !w.is_empty() => w.clone(),
        _ => distribute_word_timings(&k.sentence, start, end),
    };

    let mut out = String::new();
    for w in &words {
        let dur_cs = ((w.end_sec - w.start_sec) * 100.0).round().max(0.0) as i64;
        let _ = write!(out, "{{\\k{}}}{}{} ", dur_cs, color_override, escape_ass(&w.word));
    }
    out.trim_end().to_string()
}

/// Word-level timing distribution by character-weight, last token pinned
/// to the sentence end (§4.C stage 4 "Word timings").
fn distribute_word_timings(sentence: &str, start: f64, end: f64) -> Vec<WordTiming> {
    let tokens: Vec<&str> = sentence.split_whitespace().collect();
    if tokens.is_empty() {
        return Vec::new();
    }
    let total_chars: usize = tokens.iter().map(|t| t.chars().count().max(1)).sum();
    let duration = (end - start).max(0.0);

    let mut timings = Vec::with_capacity(tokens.len());
    let mut cursor = start;
    for (i, tok) in tokens.iter().enumerate() {
        if i == tokens.len() - 1 {
            timings.push(WordTiming {
                word: tok.to_string(),
                start_sec: cursor,
                end_sec: end,
            });
            break;
        }
        let weight = tok.chars().count().max(1) as f64 / total_chars as f64;
        let seg_end = cursor + duration * weight;
        timings.push(WordTiming {
            word: tok.to_string(),
            start_sec: cursor,
            end_sec: seg_end,
        });
        cursor = seg_end;
    }
    timings
}

/// Estimate a sentence's spoken duration when no explicit `end_sec` is
/// given: 12 characters/second, floored at half a second.
fn estimate_sentence_duration(sentence: &str) -> f64 {
    (sentence.chars().count() as f64 / 12.0).max(0.5)
}

fn render_timed_text_line(item: &TimedText) -> String {
    let fade_tag = format!("{{\\fad({},{})}}", item.fade_in_ms, item.fade_out_ms);
    format!("{}{}", fade_tag, escape_ass(&item.text))
}

fn escape_ass(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\N")
}

fn ass_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let cs = (seconds * 100.0).round() as i64;
    let h = cs / 360000;
    let m = (cs / 6000) % 60;
    let s = (cs / 100) % 60;
    let cs = cs % 100;
    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// ASS colours are `&HAABBGGRR&`; accept a handful of named colours and
/// `#rrggbb`/`rrggbb` hex, falling back to white.
fn ass_bgr(name: &str) -> String {
    let (r, g, b) = named_or_hex_rgb(name).unwrap_or((255, 255, 255));
    format!("{:02X}{:02X}{:02X}", b, g, r)
}

/// `name@alpha` (e.g. `black@1.0`) maps to an ASS colour with an opacity
/// byte prefix; ASS alpha is inverted (00 = opaque).
fn ass_bgr_with_alpha(spec: &str) -> String {
    let (name, alpha) = spec.split_once('@').unwrap_or((spec, "1.0"));
    let alpha: f64 = alpha.parse().unwrap_or(1.0);
    let (r, g, b) = named_or_hex_rgb(name).unwrap_or((0, 0, 0));
    let a = ((1.0 - alpha.clamp(0.0, 1.0)) * 255.0).round() as u8;
    format!("{a:02X}{b:02X}{g:02X}{r:02X}")
}

fn named_or_hex_rgb(name: &str) -> Option<(u8, u8, u8)> {
    match name.to_ascii_lowercase().as_str() {
        "white" => return Some((255, 255, 255)),
        "black" => return Some((0, 0, 0)),
        "red" => return Some((255, 0, 0)),
        "green" => return Some((0, 255, 0)),
        "blue" => return Some((0, 0, 255)),
        "yellow" => return Some((255, 255, 0)),
        _ => {}
    }
    let hex = name.strip_prefix('#').unwrap_or(name);
    if hex.len() == 6 {
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        return Some((r, g, b));
    }
    None
}

/// Escape a filesystem path for embedding inside an ffmpeg filter option
/// value: backslashes, colons and single quotes must not break the
/// `subtitles='...'` argument.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_timings_pin_last_token_to_sentence_end() {
        let timings = distribute_word_timings("a bb ccc", 10.0, 13.0);
        assert_eq!(timings.len(), 3);
        assert_eq!(timings.last().unwrap().end_sec, 13.0);
        assert_eq!(timings[0].start_sec, 10.0);
    }

    #[test]
    fn ass_time_formats_hms_centiseconds() {
        assert_eq!(ass_time(0.0), "0:00:00.00");
        assert_eq!(ass_time(65.5), "0:01:05.50");
    }

    #[test]
    fn escape_filter_path_escapes_colon_and_quote() {
        let p = Path::new("C:/tmp/it's.ass");
        let escaped = escape_filter_path(p);
        assert!(escaped.contains("\\:"));
        assert!(escaped.contains("\\'"));
    }
}
