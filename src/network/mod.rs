// Client side of the update system.
//
// `PollingClient` is the authoritative path: it fetches the server's log on
// a fixed interval and merges it into a persisted history. `ApiClient` wraps
// the HTTP API; downloads are verified against the published sha256.

pub mod client;
pub mod download;
pub mod events;
pub mod history;
pub mod poller;

pub use client::{ApiClient, ServerHealth};
pub use download::download_verified;
pub use events::ClientEvent;
pub use history::{MergeReport, MessageHistory};
pub use poller::{PollOutcome, PollPhase, PollingClient};
