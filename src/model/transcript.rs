use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::types::UserId;

/// One attributed, time-bounded span of recognized text.  Offsets are
/// relative to the start of the speaker's recording, in milliseconds.
/// Immutable once produced by the transcription engine.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub user_id: UserId,
    pub start_offset_ms: u32,
    pub end_offset_ms: u32,
    pub text: String,
}

/// Merge per-speaker segments into one chronological transcript.
///
/// Segments are ordered by start offset; ties break on the lower user
/// id so the output is deterministic regardless of which speaker's
/// artifact was transcribed first.  Pure function, no side effects.
pub fn merge_segments(mut segments: Vec<TranscriptSegment>) -> Vec<TranscriptSegment> {
    segments.sort_by_key(|segment| (segment.start_offset_ms, segment.user_id));
    segments
}

/// Render a merged transcript as speaker-labeled lines:
/// `[MM:SS - MM:SS] Name: text`.  Speakers with no label entry fall
/// back to `User_{id}`.
pub fn render_transcript(
    segments: &[TranscriptSegment],
    labels: &HashMap<UserId, String>,
) -> String {
    let mut lines = Vec::with_capacity(segments.len());
    for segment in segments {
        let label = labels
            .get(&segment.user_id)
            .cloned()
            .unwrap_or_else(|| format!("User_{}", segment.user_id));
        lines.push(format!(
            "[{} - {}] {}: {}",
            format_offset(segment.start_offset_ms),
            format_offset(segment.end_offset_ms),
            label,
            segment.text.trim(),
        ));
    }
    lines.join("\n")
}

fn format_offset(offset_ms: u32) -> String {
    let total_seconds = offset_ms / 1000;
    format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod test {
    use super::*;

    fn segment(user_id: UserId, start: u32, end: u32, text: &str) -> TranscriptSegment {
        TranscriptSegment {
            user_id,
            start_offset_ms: start,
            end_offset_ms: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn merge_sorts_by_start_offset() {
        let merged = merge_segments(vec![
            segment(2, 2000, 4000, "hi"),
            segment(1, 0, 5000, "hello"),
        ]);
        assert_eq!(merged[0].user_id, 1);
        assert_eq!(merged[0].text, "hello");
        assert_eq!(merged[1].user_id, 2);
    }

    #[test]
    fn merge_breaks_ties_on_lower_user_id() {
        let merged = merge_segments(vec![
            segment(9, 1000, 2000, "second"),
            segment(3, 1000, 1500, "first"),
            segment(9, 0, 500, "zeroth"),
        ]);
        assert_eq!(merged[0].text, "zeroth");
        assert_eq!(merged[1].user_id, 3);
        assert_eq!(merged[2].user_id, 9);
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge_segments(vec![
            segment(2, 100, 200, "b"),
            segment(1, 100, 200, "a"),
        ]);
        let twice = merge_segments(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn render_labels_speakers_and_formats_offsets() {
        let mut labels = HashMap::new();
        labels.insert(1, "alice".to_string());
        let text = render_transcript(
            &[segment(1, 0, 5000, "hello"), segment(2, 65000, 66000, "hi")],
            &labels,
        );
        assert_eq!(
            text,
            "[00:00 - 00:05] alice: hello\n[01:05 - 01:06] User_2: hi"
        );
    }
}
