// Message store
//
// Owns the server's durable state under one storage directory:
//   messages.json       full append-only log (authoritative)
//   announcement.json   cache of the current announcement
//   messages.lock       advisory lock shared with other herald processes
//   versions/<v>/...    version catalog
//
// A single mutex covers "allocate id, append, persist" so two writers never
// share a log position and every append is on disk before it is visible.
// The admin CLI opens the same directory from its own process, so the mutex
// is paired with a file lock and the log is reloaded whenever the file on
// disk no longer matches what this instance last read or wrote.

pub mod catalog;
pub mod persist;
pub mod versioning;

pub use catalog::{Artifact, VersionCatalog, VersionInfo};

use fs2::FileExt;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use uuid::Uuid;

use crate::config::constants::{ANNOUNCEMENT_FILE, LOCK_FILE, MESSAGES_FILE, VERSIONS_DIR};
use crate::errors::StoreError;
use crate::messages::{Announcement, AnnouncementView, Message};
use persist::{read_json, write_json_atomic, Loaded};

/// Identifies one version of `messages.json` on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        fs::metadata(path).ok().map(|meta| FileStamp {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

struct LogState {
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
    view: AnnouncementView,
    stamp: Option<FileStamp>,
}

impl LogState {
    fn from_messages(loaded: Vec<Message>) -> Self {
        let mut state = LogState {
            messages: Vec::with_capacity(loaded.len()),
            ids: HashSet::with_capacity(loaded.len()),
            view: AnnouncementView::new(),
            stamp: None,
        };
        for msg in loaded {
            if !state.ids.insert(msg.id()) {
                tracing::warn!(id = %msg.id(), "Dropping duplicate message id from log");
                continue;
            }
            state.view.apply(&msg);
            state.messages.push(msg);
        }
        state
    }
}

/// Held advisory lock on `messages.lock`; released on drop.
struct LogLock<'a> {
    file: &'a File,
}

impl<'a> LogLock<'a> {
    fn exclusive(file: &'a File, path: &Path) -> Result<Self, StoreError> {
        FileExt::lock_exclusive(file).map_err(|e| StoreError::io(path, e))?;
        Ok(Self { file })
    }

    fn shared(file: &'a File, path: &Path) -> Result<Self, StoreError> {
        FileExt::lock_shared(file).map_err(|e| StoreError::io(path, e))?;
        Ok(Self { file })
    }
}

impl Drop for LogLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(self.file) {
            tracing::warn!(error = %e, "Failed to release message log lock");
        }
    }
}

pub struct MessageStore {
    root: PathBuf,
    messages_path: PathBuf,
    announcement_path: PathBuf,
    lock_path: PathBuf,
    lock_file: File,
    state: Mutex<LogState>,
    catalog: VersionCatalog,
}

impl MessageStore {
    /// Open (or initialise) the store rooted at `root`.
    ///
    /// A missing log starts empty. An unreadable log is moved aside to
    /// `messages.json.corrupt` and the store starts empty rather than failing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;

        let messages_path = root.join(MESSAGES_FILE);
        let announcement_path = root.join(ANNOUNCEMENT_FILE);
        let lock_path = root.join(LOCK_FILE);
        let catalog = VersionCatalog::open(root.join(VERSIONS_DIR))?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::io(&lock_path, e))?;
        let guard = LogLock::exclusive(&lock_file, &lock_path)?;

        let loaded = match read_json::<Vec<Message>>(&messages_path) {
            Loaded::Ok(messages) => messages,
            Loaded::Missing => Vec::new(),
            Loaded::Corrupt(reason) => {
                let aside = root.join(format!("{MESSAGES_FILE}.corrupt"));
                tracing::warn!(
                    path = %messages_path.display(),
                    %reason,
                    moved_to = %aside.display(),
                    "Message log unreadable, starting with an empty log"
                );
                if let Err(e) = fs::rename(&messages_path, &aside) {
                    tracing::warn!(error = %e, "Could not move corrupt log aside");
                }
                Vec::new()
            }
        };

        let mut state = LogState::from_messages(loaded);
        state.stamp = FileStamp::of(&messages_path);
        drop(guard);
        tracing::info!(
            root = %root.display(),
            messages = state.messages.len(),
            "Opened message store"
        );

        let store = Self {
            root,
            messages_path,
            announcement_path,
            lock_path,
            lock_file,
            state: Mutex::new(state),
            catalog,
        };
        {
            let mut state = store.lock();
            let _guard = LogLock::exclusive(&store.lock_file, &store.lock_path)?;
            store.reload_if_changed(&mut state);
            store.refresh_announcement_cache(&state);
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &VersionCatalog {
        &self.catalog
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// State for a read, brought up to date with the file on disk.
    ///
    /// If the shared lock cannot be taken the last known state is served.
    fn read_state(&self) -> MutexGuard<'_, LogState> {
        let mut state = self.lock();
        match LogLock::shared(&self.lock_file, &self.lock_path) {
            Ok(_guard) => self.reload_if_changed(&mut state),
            Err(e) => tracing::warn!(error = %e, "Serving cached log, lock unavailable"),
        }
        state
    }

    /// Caller holds the file lock.
    fn reload_if_changed(&self, state: &mut LogState) {
        let current = FileStamp::of(&self.messages_path);
        if current == state.stamp {
            return;
        }
        match read_json::<Vec<Message>>(&self.messages_path) {
            Loaded::Ok(messages) => {
                let before = state.messages.len();
                *state = LogState::from_messages(messages);
                tracing::debug!(before, after = state.messages.len(), "Reloaded message log changed on disk");
            }
            Loaded::Missing => {
                tracing::warn!(path = %self.messages_path.display(), "Message log disappeared, keeping cached entries");
            }
            Loaded::Corrupt(reason) => {
                tracing::warn!(path = %self.messages_path.display(), %reason, "Message log unreadable, keeping cached entries");
            }
        }
        state.stamp = current;
    }

    /// Append a new announcement and persist the log.
    pub fn append_announcement(
        &self,
        title: &str,
        content: &str,
        version: &str,
    ) -> Result<Message, StoreError> {
        self.append(Message::announcement(title, content, version))
    }

    /// Append a tombstone for `target`. The target is not required to exist.
    pub fn append_delete(&self, target: Uuid) -> Result<Message, StoreError> {
        self.append(Message::delete(target))
    }

    fn append(&self, mut msg: Message) -> Result<Message, StoreError> {
        let mut state = self.lock();
        let _guard = LogLock::exclusive(&self.lock_file, &self.lock_path)?;
        self.reload_if_changed(&mut state);

        while state.ids.contains(&msg.id()) {
            msg = match msg {
                Message::Announcement { id: _, title, content, version, timestamp } => {
                    Message::Announcement { id: Uuid::new_v4(), title, content, version, timestamp }
                }
                Message::Delete { id: _, deleted_id, timestamp } => {
                    Message::Delete { id: Uuid::new_v4(), deleted_id, timestamp }
                }
            };
        }

        state.messages.push(msg.clone());
        if let Err(e) = write_json_atomic(&self.messages_path, &state.messages) {
            state.messages.pop();
            return Err(StoreError::io(&self.messages_path, e));
        }
        state.stamp = FileStamp::of(&self.messages_path);

        state.ids.insert(msg.id());
        state.view.apply(&msg);
        self.refresh_announcement_cache(&state);

        tracing::info!(id = %msg.id(), kind = ?msg.kind(), position = state.messages.len() - 1, "Appended message");
        Ok(msg)
    }

    /// Best effort: the log is authoritative, this file is a convenience copy.
    fn refresh_announcement_cache(&self, state: &LogState) {
        let result = match state.view.current() {
            Some(current) => write_json_atomic(&self.announcement_path, current),
            None => match fs::remove_file(&self.announcement_path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        if let Err(e) = result {
            tracing::warn!(path = %self.announcement_path.display(), error = %e, "Failed to update announcement cache");
        }
    }

    /// The current announcement (latest live announcement by publish time).
    pub fn latest_announcement(&self) -> Option<Announcement> {
        self.read_state().view.current().cloned()
    }

    /// Full log in append order.
    pub fn messages(&self) -> Vec<Message> {
        self.read_state().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read_state().messages.len()
    }

    pub fn publish_version(
        &self,
        version: &str,
        file_path: &Path,
        description: &str,
    ) -> Result<VersionInfo, StoreError> {
        self.catalog.publish(version, file_path, description)
    }

    pub fn latest_version(&self) -> Option<VersionInfo> {
        self.catalog.latest()
    }

    pub fn version_info(&self, version: &str) -> Option<VersionInfo> {
        self.catalog.info(version)
    }

    /// All versions, newest first.
    pub fn versions(&self) -> Vec<VersionInfo> {
        self.catalog.list()
    }

    /// Locate the artifact for `version`; `NotFound` if unknown or missing on disk.
    pub fn download_version(&self, version: &str) -> Result<Artifact, StoreError> {
        self.catalog.artifact(version)
    }
}
