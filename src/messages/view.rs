// Derived announcement state
//
// Rule shared by server and clients: the current announcement is the live
// (not tombstoned) announcement with the greatest publish time; on equal
// times the one applied later wins. A tombstone suppresses its target no
// matter which of the two is applied first.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::types::{Announcement, Message};

/// Result of applying one message to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new live announcement was recorded.
    Recorded,
    /// A live announcement was retracted.
    Retracted,
    /// A tombstone for an announcement we have not seen yet.
    ForwardTombstone,
    /// Already known, or suppressed by an earlier tombstone.
    Ignored,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementView {
    /// Live announcements in the order they were applied.
    #[serde(default)]
    announcements: Vec<Announcement>,
    /// Every id that has been the target of a tombstone.
    #[serde(default)]
    tombstoned_ids: BTreeSet<Uuid>,
}

impl AnnouncementView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a view by applying a whole log in order.
    pub fn from_log<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let mut view = Self::new();
        for msg in messages {
            view.apply(msg);
        }
        view
    }

    pub fn apply(&mut self, msg: &Message) -> Applied {
        match msg {
            Message::Announcement { id, .. } => {
                if self.tombstoned_ids.contains(id) || self.announcements.iter().any(|a| a.id == *id)
                {
                    return Applied::Ignored;
                }
                if let Some(ann) = msg.as_announcement() {
                    self.announcements.push(ann);
                }
                Applied::Recorded
            }
            Message::Delete { deleted_id, .. } => {
                let newly_tombstoned = self.tombstoned_ids.insert(*deleted_id);
                let before = self.announcements.len();
                self.announcements.retain(|a| a.id != *deleted_id);
                if self.announcements.len() != before {
                    Applied::Retracted
                } else if newly_tombstoned {
                    Applied::ForwardTombstone
                } else {
                    Applied::Ignored
                }
            }
        }
    }

    /// The current announcement per the shared ordering rule.
    pub fn current(&self) -> Option<&Announcement> {
        // `max_by_key` returns the last of equal maxima, i.e. the later-applied one.
        self.announcements.iter().max_by_key(|a| a.publish_time)
    }

    pub fn is_tombstoned(&self, id: &Uuid) -> bool {
        self.tombstoned_ids.contains(id)
    }

    /// Live announcements in apply order.
    pub fn live(&self) -> &[Announcement] {
        &self.announcements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ann_at(title: &str, offset_secs: i64) -> Message {
        Message::Announcement {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: String::new(),
            version: "1.0".to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    fn title(view: &AnnouncementView) -> Option<&str> {
        view.current().map(|a| a.title.as_str())
    }

    #[test]
    fn test_empty_view_has_no_current() {
        assert!(AnnouncementView::new().current().is_none());
    }

    #[test]
    fn test_publish_delete_publish() {
        let a1 = ann_at("A1", 0);
        let d1 = Message::delete(a1.id());
        let a2 = ann_at("A2", 1);

        let mut view = AnnouncementView::new();
        assert_eq!(view.apply(&a1), Applied::Recorded);
        assert_eq!(title(&view), Some("A1"));

        assert_eq!(view.apply(&d1), Applied::Retracted);
        assert!(view.current().is_none());

        assert_eq!(view.apply(&a2), Applied::Recorded);
        assert_eq!(title(&view), Some("A2"));
    }

    #[test]
    fn test_latest_timestamp_wins_over_arrival_order() {
        let newer = ann_at("newer", 10);
        let older = ann_at("older", 0);

        let view = AnnouncementView::from_log([&newer, &older]);
        assert_eq!(title(&view), Some("newer"));
    }

    #[test]
    fn test_equal_timestamps_prefer_later_entry() {
        let now = Utc::now();
        let make = |t: &str| Message::Announcement {
            id: Uuid::new_v4(),
            title: t.to_string(),
            content: String::new(),
            version: "1.0".to_string(),
            timestamp: now,
        };
        let view = AnnouncementView::from_log([&make("first"), &make("second")]);
        assert_eq!(title(&view), Some("second"));
    }

    #[test]
    fn test_retracting_current_falls_back_to_previous() {
        let a1 = ann_at("A1", 0);
        let a2 = ann_at("A2", 1);
        let d2 = Message::delete(a2.id());

        let view = AnnouncementView::from_log([&a1, &a2, &d2]);
        assert_eq!(title(&view), Some("A1"));
    }

    #[test]
    fn test_forward_tombstone_suppresses_late_announcement() {
        let a1 = ann_at("A1", 0);
        let d1 = Message::delete(a1.id());

        let mut view = AnnouncementView::new();
        assert_eq!(view.apply(&d1), Applied::ForwardTombstone);
        assert_eq!(view.apply(&a1), Applied::Ignored);
        assert!(view.current().is_none());
        assert!(view.is_tombstoned(&a1.id()));
    }

    #[test]
    fn test_delete_of_unknown_id_is_harmless() {
        let a1 = ann_at("A1", 0);
        let mut view = AnnouncementView::from_log([&a1]);
        view.apply(&Message::delete(Uuid::new_v4()));
        assert_eq!(title(&view), Some("A1"));
    }

    #[test]
    fn test_reapplying_is_idempotent() {
        let a1 = ann_at("A1", 0);
        let d = Message::delete(Uuid::new_v4());
        let mut view = AnnouncementView::from_log([&a1, &d]);
        let snapshot = view.clone();

        assert_eq!(view.apply(&a1), Applied::Ignored);
        assert_eq!(view.apply(&d), Applied::Ignored);
        assert_eq!(view, snapshot);
    }
}
