//! Timestamp-merged view of a task's two event channels
//!
//! Viewers render one list: the durable context entries interleaved with
//! whatever ephemeral envelopes are still buffered. The merge is the whole
//! interface contract the desktop/web viewer needs from this crate.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::TaskEventEnvelope;
use crate::task::ContextEntry;

/// One rendered line in the merged view
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum TimelineItem {
    Stored { entry: ContextEntry },
    Ephemeral { envelope: TaskEventEnvelope },
}

impl TimelineItem {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Stored { entry } => entry.timestamp,
            Self::Ephemeral { envelope } => envelope.timestamp,
        }
    }
}

/// Merge stored context with buffered ephemeral envelopes, ordered by
/// timestamp. Ties render the stored entry first (stable).
pub fn merge(stored: &[ContextEntry], ephemeral: &[TaskEventEnvelope]) -> Vec<TimelineItem> {
    let mut items: Vec<TimelineItem> = stored
        .iter()
        .cloned()
        .map(|entry| TimelineItem::Stored { entry })
        .chain(
            ephemeral
                .iter()
                .cloned()
                .map(|envelope| TimelineItem::Ephemeral { envelope }),
        )
        .collect();
    items.sort_by_key(|item| item.timestamp());
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamEvent;
    use crate::task::Role;
    use chrono::Duration;
    use serde_json::json;
    use uuid::Uuid;

    fn entry_at(content: &str, at: DateTime<Utc>) -> ContextEntry {
        let mut entry = ContextEntry::new(Role::User, content);
        entry.timestamp = at;
        entry
    }

    fn envelope_at(at: DateTime<Utc>) -> TaskEventEnvelope {
        let mut envelope = TaskEventEnvelope::new(
            Uuid::new_v4(),
            StreamEvent::Thinking { data: json!({}) },
        );
        envelope.timestamp = at;
        envelope
    }

    #[test]
    fn test_merge_orders_by_timestamp() {
        let base = Utc::now();
        let stored = vec![
            entry_at("first", base),
            entry_at("third", base + Duration::seconds(2)),
        ];
        let ephemeral = vec![envelope_at(base + Duration::seconds(1))];

        let merged = merge(&stored, &ephemeral);
        assert_eq!(merged.len(), 3);
        assert!(matches!(merged[0], TimelineItem::Stored { .. }));
        assert!(matches!(merged[1], TimelineItem::Ephemeral { .. }));
        assert!(matches!(merged[2], TimelineItem::Stored { .. }));
    }

    #[test]
    fn test_merge_tie_keeps_stored_first() {
        let base = Utc::now();
        let merged = merge(&[entry_at("tie", base)], &[envelope_at(base)]);
        assert!(matches!(merged[0], TimelineItem::Stored { .. }));
        assert!(matches!(merged[1], TimelineItem::Ephemeral { .. }));
    }

    #[test]
    fn test_merge_empty_channels() {
        assert!(merge(&[], &[]).is_empty());
    }
}
