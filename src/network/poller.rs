// Polling client
//
// Converges on the server's log by fetching /messages on a fixed interval
// (plus on demand) and merging it into the persisted history. Discovery is
// only a hint; this loop is what guarantees convergence.
//
// Cycles are serialised by the async mutex that owns the history: a timer
// tick that finds a cycle running is skipped, `force_poll` waits its turn.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::client::ApiClient;
use super::download::download_verified;
use super::events::{ClientEvent, EVENT_CHANNEL_CAPACITY};
use super::history::MessageHistory;
use crate::config::constants::SHUTDOWN_TIMEOUT_SECS;
use crate::config::ClientConfig;
use crate::errors::SyncError;
use crate::messages::Announcement;
use crate::store::versioning::compare_versions;
use crate::store::VersionInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
    Merging,
}

/// Summary of one successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub new_messages: usize,
    pub announcement_changed: bool,
    pub versions_changed: bool,
}

struct Shared {
    api: ApiClient,
    history_path: PathBuf,
    /// Doubles as the cycle guard.
    history: AsyncMutex<MessageHistory>,
    current: RwLock<Option<Announcement>>,
    versions: RwLock<Vec<VersionInfo>>,
    phase: Mutex<PollPhase>,
    events: broadcast::Sender<ClientEvent>,
    cancel: CancellationToken,
}

/// Resets the phase to `Idle` however the cycle ends.
struct PhaseGuard<'a>(&'a Shared);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(PollPhase::Idle);
    }
}

pub struct PollingClient {
    shared: Arc<Shared>,
    interval: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl PollingClient {
    pub fn new(config: &ClientConfig) -> Result<Self, SyncError> {
        let api = ApiClient::new(&config.server_url, config.request_timeout())?;
        Ok(Self::with_api(api, &config.history_path, config.poll_interval()))
    }

    /// Build around an existing API client; loads history from `history_path`.
    pub fn with_api(api: ApiClient, history_path: &Path, interval: Duration) -> Self {
        let history = MessageHistory::load(history_path);
        let current = history.current().cloned();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            server = api.base_url(),
            history = %history_path.display(),
            received = history.received_count(),
            "Polling client ready"
        );

        Self {
            shared: Arc::new(Shared {
                api,
                history_path: history_path.to_path_buf(),
                history: AsyncMutex::new(history),
                current: RwLock::new(current),
                versions: RwLock::new(Vec::new()),
                phase: Mutex::new(PollPhase::Idle),
                events,
                cancel: CancellationToken::new(),
            }),
            interval,
            timer: Mutex::new(None),
        }
    }

    /// Begin polling on the fixed interval (first cycle immediately).
    /// Idempotent; a stopped client does not restart.
    pub fn start(&self) {
        let mut timer = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if timer.is_some() {
            return;
        }
        if self.shared.cancel.is_cancelled() {
            tracing::warn!("Polling client already stopped, not restarting");
            return;
        }
        let shared = Arc::clone(&self.shared);
        *timer = Some(tokio::spawn(timer_loop(shared, self.interval)));
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Polling started");
    }

    /// Stop the timer and cancel any in-flight request. Idempotent.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();
        let handle = self
            .timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut handle) = handle else {
            return;
        };
        match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), &mut handle).await {
            Ok(Ok(())) => tracing::info!("Polling stopped"),
            Ok(Err(e)) => tracing::warn!("Polling task failed: {e}"),
            Err(_) => {
                tracing::warn!("Polling task did not stop in time, aborting");
                handle.abort();
            }
        }
    }

    /// Run one cycle now, after any cycle already in progress.
    pub async fn force_poll(&self) -> Result<PollOutcome, SyncError> {
        let history = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(SyncError::Cancelled),
            guard = self.shared.history.lock() => guard,
        };
        self.shared.run_cycle(history).await
    }

    pub fn current_announcement(&self) -> Option<Announcement> {
        self.shared
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Versions from the last successful fetch, newest first.
    pub fn available_versions(&self) -> Vec<VersionInfo> {
        self.shared
            .versions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn phase(&self) -> PollPhase {
        *self
            .shared
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Sender for other producers (e.g. discovery) sharing this event stream.
    pub fn event_sender(&self) -> broadcast::Sender<ClientEvent> {
        self.shared.events.clone()
    }

    pub fn api(&self) -> &ApiClient {
        &self.shared.api
    }

    /// Download and verify `version` into `dest`.
    pub async fn download_version(&self, version: &str, dest: &Path) -> Result<PathBuf, SyncError> {
        let known = self
            .available_versions()
            .into_iter()
            .find(|v| v.version == version);
        let info = match known {
            Some(info) => info,
            None => self
                .shared
                .api
                .version_info(version)
                .await?
                .ok_or_else(|| SyncError::NotFound(format!("version {version}")))?,
        };
        download_verified(&self.shared.api, &info, dest, &self.shared.cancel).await
    }
}

impl Drop for PollingClient {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn timer_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Ok(history) = shared.history.try_lock() else {
            tracing::debug!("Poll already in progress, skipping tick");
            continue;
        };

        match shared.run_cycle(history).await {
            Ok(outcome) => {
                if outcome.new_messages > 0 {
                    tracing::debug!(?outcome, "Poll cycle complete");
                }
            }
            Err(SyncError::Cancelled) => break,
            Err(e) => {
                tracing::warn!(server = shared.api.base_url(), "Poll failed: {e}");
                let _ = shared.events.send(ClientEvent::PollFailed(e.to_string()));
            }
        }
    }
}

impl Shared {
    fn set_phase(&self, phase: PollPhase) {
        *self
            .phase
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = phase;
    }

    async fn run_cycle(
        &self,
        mut history: AsyncMutexGuard<'_, MessageHistory>,
    ) -> Result<PollOutcome, SyncError> {
        let _phase = PhaseGuard(self);
        self.set_phase(PollPhase::Polling);

        let (messages, versions) = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
            fetched = async { tokio::join!(self.api.messages(), self.api.versions()) } => fetched,
        };
        let messages = messages?;

        self.set_phase(PollPhase::Merging);
        let report = history.merge(&messages);
        if let Err(e) = history.save(&self.history_path) {
            tracing::warn!("Failed to persist message history: {e}");
        }

        if report.announcement_changed {
            let current = history.current().cloned();
            *self
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = current.clone();
            tracing::info!(
                id = ?current.as_ref().map(|a| a.id),
                title = ?current.as_ref().map(|a| a.title.as_str()),
                "Current announcement changed"
            );
            let _ = self.events.send(ClientEvent::AnnouncementChanged(current));
        }
        drop(history);

        let versions_changed = match versions {
            Ok(mut versions) => {
                versions.sort_by(|a, b| compare_versions(&b.version, &a.version));
                let mut held = self
                    .versions
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if *held != versions {
                    *held = versions.clone();
                    drop(held);
                    let _ = self.events.send(ClientEvent::VersionsChanged(versions));
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                tracing::warn!("Failed to refresh version list: {e}");
                false
            }
        };

        Ok(PollOutcome {
            new_messages: report.new_messages,
            announcement_changed: report.announcement_changed,
            versions_changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use tempfile::TempDir;

    async fn mock_log(server: &mut mockito::ServerGuard, log: &[Message]) {
        server.reset_async().await;
        server
            .mock("GET", "/messages")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(serde_json::to_string(log).unwrap())
            .create_async()
            .await;
        server
            .mock("GET", "/versions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("[]")
            .create_async()
            .await;
    }

    fn client(server: &mockito::ServerGuard, dir: &TempDir) -> PollingClient {
        let api = ApiClient::new(server.url(), Duration::from_secs(2)).unwrap();
        PollingClient::with_api(api, &dir.path().join("history.json"), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_force_poll_tracks_current() {
        let mut server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let a1 = Message::announcement("A1", "", "1.0");
        mock_log(&mut server, std::slice::from_ref(&a1)).await;

        let poller = client(&server, &dir);
        let mut events = poller.subscribe();
        let outcome = poller.force_poll().await.unwrap();

        assert_eq!(outcome.new_messages, 1);
        assert!(outcome.announcement_changed);
        assert_eq!(poller.current_announcement().unwrap().id, a1.id());
        assert_eq!(poller.phase(), PollPhase::Idle);
        assert!(matches!(
            events.try_recv(),
            Ok(ClientEvent::AnnouncementChanged(Some(_)))
        ));

        let again = poller.force_poll().await.unwrap();
        assert_eq!(again, PollOutcome::default());
    }

    #[tokio::test]
    async fn test_poll_error_is_returned_to_caller() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/messages")
            .with_status(503)
            .create_async()
            .await;
        server
            .mock("GET", "/versions")
            .with_status(503)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let poller = client(&server, &dir);
        let err = poller.force_poll().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(poller.phase(), PollPhase::Idle);
    }

    #[tokio::test]
    async fn test_stopped_client_refuses_polls() {
        let server = mockito::Server::new_async().await;
        let dir = TempDir::new().unwrap();
        let poller = client(&server, &dir);
        poller.start();
        poller.stop().await;
        poller.stop().await;
        assert!(matches!(poller.force_poll().await, Err(SyncError::Cancelled)));
    }
}
