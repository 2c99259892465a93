// Defaults and fixed names for herald: ports, poll timing, discovery
// limits and the file layout of the storage directory.

/// Default bind host for the update server (all interfaces, LAN-trust model).
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP port for the update server.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default UDP port shared by discovery responders and clients.
pub const DEFAULT_UDP_PORT: u16 = 12345;

/// Default server URL a polling client talks to.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Default polling interval (5 seconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default per-request timeout for the polling client.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default discovery broadcast address (limited broadcast).
pub const DEFAULT_DISCOVERY_TARGET: &str = "255.255.255.255";

/// Largest discovery datagram we send or accept.
pub const MAX_DATAGRAM_BYTES: usize = 8 * 1024;

/// How long `stop()` waits for background tasks before aborting them.
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 5;

/// Directory under $HOME holding config and default storage.
pub const HERALD_DIR: &str = ".herald";

/// Server-side file names.
pub const MESSAGES_FILE: &str = "messages.json";
pub const ANNOUNCEMENT_FILE: &str = "announcement.json";
pub const LOCK_FILE: &str = "messages.lock";
pub const VERSIONS_DIR: &str = "versions";
pub const VERSION_INFO_FILE: &str = "info.json";

/// Client-side history file name.
pub const HISTORY_FILE: &str = "message_history.json";
