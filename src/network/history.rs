// Received-message history (client side)
//
// Persisted as message_history.json:
//   {"received_ids": [...], "last_updated": "...",
//    "announcements": [...], "tombstoned_ids": [...]}
// The last two fields are optional so two-field files from older clients
// still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use uuid::Uuid;

use crate::errors::SyncError;
use crate::messages::{Announcement, AnnouncementView, Message};
use crate::store::persist::{read_json, write_json_atomic, Loaded};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageHistory {
    #[serde(default)]
    received_ids: BTreeSet<Uuid>,
    #[serde(default, deserialize_with = "crate::messages::timestamp_opt_de")]
    last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    view: AnnouncementView,
}

/// What one merge changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Messages not seen before this merge
    pub new_messages: usize,
    /// Whether the current announcement differs afterwards
    pub announcement_changed: bool,
}

impl MessageHistory {
    /// Load from disk. Missing or unreadable files start a fresh history.
    pub fn load(path: &Path) -> Self {
        let mut history = match read_json::<MessageHistory>(path) {
            Loaded::Ok(history) => history,
            Loaded::Missing => return Self::default(),
            Loaded::Corrupt(reason) => {
                tracing::warn!(path = %path.display(), %reason, "Message history unreadable, starting fresh");
                return Self::default();
            }
        };

        // A file without derived state (older format) cannot tell us what is
        // current; forget the ids so the next poll replays the log.
        if history.view == AnnouncementView::default() && !history.received_ids.is_empty() {
            tracing::info!(
                received = history.received_ids.len(),
                "History has no announcement state, rebuilding from next poll"
            );
            history.received_ids.clear();
        }
        history
    }

    /// Stamp `last_updated` and write atomically.
    pub fn save(&mut self, path: &Path) -> Result<(), SyncError> {
        self.last_updated = Some(Utc::now());
        write_json_atomic(path, self).map_err(|e| SyncError::io(path, e))
    }

    /// Apply a batch in order, skipping ids already received.
    pub fn merge(&mut self, messages: &[Message]) -> MergeReport {
        let before = self.view.current().cloned();
        let mut new_messages = 0;

        for msg in messages {
            if !self.received_ids.insert(msg.id()) {
                continue;
            }
            new_messages += 1;
            let applied = self.view.apply(msg);
            tracing::debug!(id = %msg.id(), kind = ?msg.kind(), ?applied, "Merged message");
        }

        MergeReport {
            new_messages,
            announcement_changed: self.view.current() != before.as_ref(),
        }
    }

    pub fn current(&self) -> Option<&Announcement> {
        self.view.current()
    }

    pub fn has_received(&self, id: &Uuid) -> bool {
        self.received_ids.contains(id)
    }

    pub fn received_count(&self) -> usize {
        self.received_ids.len()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn view(&self) -> &AnnouncementView {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_is_idempotent() {
        let a1 = Message::announcement("A1", "", "1.0");
        let d1 = Message::delete(a1.id());
        let a2 = Message::announcement("A2", "", "1.0");
        let log = vec![a1, d1, a2.clone()];

        let mut history = MessageHistory::default();
        let first = history.merge(&log);
        assert_eq!(first.new_messages, 3);
        assert!(first.announcement_changed);
        assert_eq!(history.current().unwrap().id, a2.id());

        let snapshot = history.clone();
        let second = history.merge(&log);
        assert_eq!(second, MergeReport::default());
        assert_eq!(history, snapshot);
    }

    #[test]
    fn test_retraction_reports_change() {
        let a1 = Message::announcement("A1", "", "1.0");
        let mut history = MessageHistory::default();
        history.merge(std::slice::from_ref(&a1));

        let report = history.merge(&[a1.clone(), Message::delete(a1.id())]);
        assert_eq!(report.new_messages, 1);
        assert!(report.announcement_changed);
        assert!(history.current().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("message_history.json");
        let a1 = Message::announcement("A1", "", "1.0");

        let mut history = MessageHistory::default();
        history.merge(std::slice::from_ref(&a1));
        history.save(&path).unwrap();

        let reloaded = MessageHistory::load(&path);
        assert!(reloaded.has_received(&a1.id()));
        assert_eq!(reloaded.current().unwrap().title, "A1");
        assert!(reloaded.last_updated().is_some());

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(json["received_ids"].is_array());
        assert!(json["announcements"].is_array());
        assert!(json["tombstoned_ids"].is_array());
    }

    #[test]
    fn test_two_field_format_replays() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("message_history.json");
        std::fs::write(
            &path,
            r#"{"received_ids": ["550e8400-e29b-41d4-a716-446655440000"],
                "last_updated": "2024-03-01T09:15:02.123456"}"#,
        )
        .unwrap();

        let history = MessageHistory::load(&path);
        assert_eq!(history.received_count(), 0);
        assert!(history.last_updated().is_some());
    }

    #[test]
    fn test_corrupt_history_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("message_history.json");
        std::fs::write(&path, b"\x00\x01garbage").unwrap();
        assert_eq!(MessageHistory::load(&path), MessageHistory::default());
    }
}
