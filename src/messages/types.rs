// Message and announcement types (wire + disk format)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_version() -> String {
    "1.0".to_string()
}

/// One entry of the append-only log.
///
/// Serialized with a `"type"` discriminator:
/// `{"id": .., "type": "announcement", "title": .., "content": .., "version": .., "timestamp": ..}`
/// `{"id": .., "type": "delete", "deleted_id": .., "timestamp": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Announcement {
        id: Uuid,
        title: String,
        content: String,
        #[serde(default = "default_version")]
        version: String,
        #[serde(deserialize_with = "super::timestamp::deserialize")]
        timestamp: DateTime<Utc>,
    },
    /// Tombstone retracting an earlier announcement.
    Delete {
        id: Uuid,
        deleted_id: Uuid,
        #[serde(deserialize_with = "super::timestamp::deserialize")]
        timestamp: DateTime<Utc>,
    },
}

/// Discriminant of [`Message`], handy for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Announcement,
    Delete,
}

impl Message {
    /// New announcement with a fresh id, stamped now.
    pub fn announcement(
        title: impl Into<String>,
        content: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Message::Announcement {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            version: version.into(),
            timestamp: Utc::now(),
        }
    }

    /// New tombstone for `target`, stamped now.
    pub fn delete(target: Uuid) -> Self {
        Message::Delete {
            id: Uuid::new_v4(),
            deleted_id: target,
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Message::Announcement { id, .. } | Message::Delete { id, .. } => *id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Message::Announcement { timestamp, .. } | Message::Delete { timestamp, .. } => {
                *timestamp
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Announcement { .. } => MessageKind::Announcement,
            Message::Delete { .. } => MessageKind::Delete,
        }
    }

    /// The announcement payload, if this is an announcement.
    pub fn as_announcement(&self) -> Option<Announcement> {
        match self {
            Message::Announcement {
                id,
                title,
                content,
                version,
                timestamp,
            } => Some(Announcement {
                id: *id,
                title: title.clone(),
                content: content.clone(),
                publish_time: *timestamp,
                version: version.clone(),
            }),
            Message::Delete { .. } => None,
        }
    }
}

/// The announcement shape served by `GET /announcement` and carried in
/// discovery responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(deserialize_with = "super::timestamp::deserialize")]
    pub publish_time: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
}
