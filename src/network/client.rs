// Update server HTTP client.
//
// Thin typed wrapper over the read-only API:
//
//   GET /messages             -> [Message]
//   GET /announcement         -> Announcement | 404
//   GET /version/latest       -> VersionInfo | 404
//   GET /version/{version}    -> VersionInfo | 404
//   GET /versions             -> [VersionInfo]
//   GET /download/{version}   -> bytes | 404
//   GET /health               -> {status, host, messages, versions}

use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::SyncError;
use crate::messages::{Announcement, Message};
use crate::store::VersionInfo;

/// Client for one update server.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    timeout: Duration,
}

/// Response from GET /health
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerHealth {
    pub status: String,
    #[serde(default)]
    pub host: String,
    pub messages: usize,
    pub versions: usize,
}

impl ApiClient {
    /// `timeout` bounds connecting and each JSON request; downloads are only
    /// bounded on connect.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://"))
            || Url::parse(&base_url).is_err()
        {
            return Err(SyncError::InvalidUrl(base_url));
        }
        let http = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|source| SyncError::Unreachable {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            base_url,
            http,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `<base>/<route>/<version>` with the version percent-encoded.
    fn version_url(&self, route: &str, version: &str) -> Result<String, SyncError> {
        let invalid = || SyncError::InvalidUrl(self.base_url.clone());
        let mut url = Url::parse(&self.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .push(route)
            .push(version);
        Ok(url.into())
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response, SyncError> {
        let mut request = self.http.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request.send().await.map_err(|source| SyncError::Unreachable {
            url: url.to_string(),
            source,
        })
    }

    /// GET a JSON resource; 404 maps to `None`.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, SyncError> {
        self.get_json_at(self.url(path)).await
    }

    async fn get_json_at<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, SyncError> {
        let resp = self.get(&url, Some(self.timeout)).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(SyncError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }

        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|source| SyncError::Decode { url, source })
    }

    /// Like `get_json`, for resources that always exist on a real server.
    async fn get_required<T: DeserializeOwned>(&self, path: &str) -> Result<T, SyncError> {
        self.get_json(path).await?.ok_or_else(|| SyncError::Status {
            url: self.url(path),
            status: StatusCode::NOT_FOUND.as_u16(),
        })
    }

    /// The full message log in append order.
    pub async fn messages(&self) -> Result<Vec<Message>, SyncError> {
        self.get_required("/messages").await
    }

    pub async fn announcement(&self) -> Result<Option<Announcement>, SyncError> {
        self.get_json("/announcement").await
    }

    pub async fn latest_version(&self) -> Result<Option<VersionInfo>, SyncError> {
        self.get_json("/version/latest").await
    }

    pub async fn version_info(&self, version: &str) -> Result<Option<VersionInfo>, SyncError> {
        self.get_json_at(self.version_url("version", version)?).await
    }

    /// Every published version, newest first.
    pub async fn versions(&self) -> Result<Vec<VersionInfo>, SyncError> {
        self.get_required("/versions").await
    }

    pub async fn health(&self) -> Result<ServerHealth, SyncError> {
        self.get_required("/health").await
    }

    /// Start a download; the caller streams the body.
    pub async fn open_download(&self, version: &str) -> Result<Response, SyncError> {
        let url = self.version_url("download", version)?;
        let resp = self.get(&url, None).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(SyncError::NotFound(format!("version {version}"))),
            status if !status.is_success() => Err(SyncError::Status {
                url,
                status: status.as_u16(),
            }),
            _ => Ok(resp),
        }
    }
}
