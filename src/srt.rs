//! SRT subtitle model.
//!
//! Parses a subtitle file into an indexed, immutable sequence of timed
//! text entries. The parser enforces a strict `[1..N]` index space:
//! non-sequential indices or unparseable timestamps are input errors,
//! not warnings, because every later stage addresses the script by
//! SRT index.

use crate::{StoryboardError, StoryboardErrorKind, StoryboardResult};

/// One timed subtitle entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtEntry {
    /// 1-based dense index
    pub index: u32,
    /// Start time in milliseconds
    pub start_ms: u64,
    /// End time in milliseconds
    pub end_ms: u64,
    /// Subtitle text; internal line breaks preserved
    pub text: String,
}

/// Parse SRT text into validated entries.
///
/// # Errors
///
/// Returns `InputInvalid` if indices are non-sequential, a timestamp
/// fails to parse, an entry's end precedes its start, or entries are
/// not ordered by start time.
pub fn parse_srt(input: &str) -> StoryboardResult<Vec<SrtEntry>> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let normalized = input.replace("\r\n", "\n");
    let mut entries = Vec::new();

    for block in normalized
        .split("\n\n")
        .map(str::trim)
        .filter(|b| !b.is_empty())
    {
        let mut lines = block.lines();

        let index_line = lines
            .next()
            .ok_or_else(|| invalid("empty subtitle block"))?;
        let index: u32 = index_line
            .trim()
            .parse()
            .map_err(|_| invalid(&format!("bad subtitle index: {index_line:?}")))?;

        let timing_line = lines
            .next()
            .ok_or_else(|| invalid(&format!("entry {index} is missing its timing line")))?;
        let (start_ms, end_ms) = parse_timing(timing_line)
            .ok_or_else(|| invalid(&format!("entry {index} has a bad timing line: {timing_line:?}")))?;

        if end_ms < start_ms {
            return Err(invalid(&format!("entry {index} ends before it starts")));
        }

        let text = lines.collect::<Vec<_>>().join("\n");
        entries.push(SrtEntry {
            index,
            start_ms,
            end_ms,
            text,
        });
    }

    if entries.is_empty() {
        return Err(invalid("no subtitle entries found"));
    }

    for (i, entry) in entries.iter().enumerate() {
        let expected = (i + 1) as u32;
        if entry.index != expected {
            return Err(invalid(&format!(
                "subtitle indices are not dense: expected {expected}, found {}",
                entry.index
            )));
        }
        if i > 0 && entry.start_ms < entries[i - 1].start_ms {
            return Err(invalid(&format!(
                "entry {} starts before its predecessor",
                entry.index
            )));
        }
    }

    Ok(entries)
}

/// Render entries back to SRT text.
///
/// Round-trips with [`parse_srt`]: parsing the output yields an equal
/// entry sequence.
pub fn render_srt(entries: &[SrtEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            entry.index,
            format_timestamp(entry.start_ms),
            format_timestamp(entry.end_ms),
            entry.text
        ));
    }
    out
}

/// Concatenate the text of entries `start..=end` (1-based, clamped).
pub fn slice_text(entries: &[SrtEntry], start: u32, end: u32) -> String {
    entries
        .iter()
        .filter(|e| e.index >= start && e.index <= end)
        .map(|e| e.text.replace('\n', " "))
        .collect::<Vec<_>>()
        .join(" ")
}

/// The full script as one line-per-entry string, `index: text`.
///
/// Used for prompts that need the whole script with addressable indices.
pub fn numbered_script(entries: &[SrtEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.index, e.text.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let (start, end) = line.split_once("-->")?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

/// Parse `HH:MM:SS,mmm` (a `.` millisecond separator is tolerated).
fn parse_timestamp(ts: &str) -> Option<u64> {
    let ts = ts.replace('.', ",");
    let (hms, millis) = ts.split_once(',')?;
    let mut parts = hms.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    let millis: u64 = millis.parse().ok()?;
    if millis >= 1000 {
        return None;
    }
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1000) % 60;
    let millis = ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

fn invalid(msg: &str) -> StoryboardError {
    StoryboardError::new(StoryboardErrorKind::InputInvalid(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:03,500\nHello there.\n\n2\n00:00:03,600 --> 00:00:06,000\nSecond line\nwith a break.\n";

    #[test]
    fn parses_basic_file() {
        let entries = parse_srt(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 1);
        assert_eq!(entries[0].start_ms, 1000);
        assert_eq!(entries[0].end_ms, 3500);
        assert_eq!(entries[1].text, "Second line\nwith a break.");
    }

    #[test]
    fn round_trips() {
        let entries = parse_srt(SAMPLE).unwrap();
        let rendered = render_srt(&entries);
        assert_eq!(parse_srt(&rendered).unwrap(), entries);
    }

    #[test]
    fn rejects_sparse_indices() {
        let input = "1\n00:00:01,000 --> 00:00:02,000\na\n\n3\n00:00:03,000 --> 00:00:04,000\nb\n";
        let err = parse_srt(input).unwrap_err();
        assert!(matches!(err.kind(), StoryboardErrorKind::InputInvalid(_)));
    }

    #[test]
    fn rejects_bad_timestamp() {
        let input = "1\n00:00:xx,000 --> 00:00:02,000\na\n";
        assert!(parse_srt(input).is_err());
    }

    #[test]
    fn rejects_reversed_times() {
        let input = "1\n00:00:05,000 --> 00:00:02,000\na\n";
        assert!(parse_srt(input).is_err());
    }

    #[test]
    fn tolerates_crlf_and_bom() {
        let input = "\u{feff}1\r\n00:00:01,000 --> 00:00:02,000\r\nhi\r\n\r\n2\r\n00:00:02,000 --> 00:00:03,000\r\nthere\r\n";
        let entries = parse_srt(input).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].text, "there");
    }

    #[test]
    fn slice_and_numbered_views() {
        let entries = parse_srt(SAMPLE).unwrap();
        assert_eq!(slice_text(&entries, 2, 2), "Second line with a break.");
        assert!(numbered_script(&entries).starts_with("1: Hello there."));
    }
}
