//! Photo File Storage Client
//!
//! Photos never travel over this server's own protocol as bytes; peers
//! pass opaque references into the messaging platform's file storage.
//! [`PhotoStore`] is the seam both consumers share: the submission
//! pipeline fetches bytes for moderation, and the front-end photo proxy
//! resolves a reference into image content.
//!
//! The HTTP implementation does the platform's two-step lookup: ask the
//! file API for a path, then download from the file host.

use std::future::Future;
use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// References longer than this are refused before any network call.
pub const PHOTO_REF_MAX_LEN: usize = 200;

/// Largest photo the store will hand back.
const PHOTO_SIZE_CAP: u64 = 10 * 1024 * 1024;

/// Default connect/read/write timeout for the HTTP store.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// File storage faults.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// The reference is empty or oversized.
    #[error("invalid photo reference")]
    InvalidRef,

    /// The storage does not know this reference.
    #[error("photo not found")]
    NotFound,

    /// The storage answered with a non-2xx status.
    #[error("file storage returned status {0}")]
    Status(u16),

    /// The request never completed.
    #[error("file storage transport fault: {0}")]
    Transport(String),

    /// The lookup response was not the expected JSON, or the photo body
    /// was unreadable or over the size cap.
    #[error("file storage response unreadable")]
    Malformed,

    /// The blocking fetch task was cancelled before it finished.
    #[error("file fetch task aborted")]
    Canceled,
}

/// Read access to the messaging platform's file storage.
pub trait PhotoStore: Send + Sync + 'static {
    /// Resolves an opaque photo reference to the image bytes.
    fn fetch(
        &self,
        photo_ref: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FileStoreError>> + Send;
}

/// Lookup reply of the file API: a path on the file host.
#[derive(Debug, Deserialize)]
struct FileLookup {
    ok: bool,
    result: Option<FilePath>,
}

#[derive(Debug, Deserialize)]
struct FilePath {
    file_path: String,
}

/// HTTP photo store against the messaging platform's file API. The
/// blocking calls run on the tokio blocking pool.
pub struct HttpPhotoStore {
    api_base: String,
    token: String,
    agent: ureq::Agent,
}

impl HttpPhotoStore {
    /// Store against `api_base` (e.g. `https://api.telegram.org`) using
    /// the platform bot token, with [`DEFAULT_HTTP_TIMEOUT`].
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_timeout(api_base, token, DEFAULT_HTTP_TIMEOUT)
    }

    /// Store with an explicit per-request timeout.
    pub fn with_timeout(
        api_base: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            api_base: api_base.into(),
            token: token.into(),
            agent,
        }
    }

    fn fetch_blocking(&self, photo_ref: &str) -> Result<Vec<u8>, FileStoreError> {
        let lookup_url = format!(
            "{}/bot{}/getFile?file_id={}",
            self.api_base, self.token, photo_ref
        );
        let lookup: FileLookup = self
            .agent
            .get(&lookup_url)
            .call()
            .map_err(map_ureq_error)?
            .into_json()
            .map_err(|_| FileStoreError::Malformed)?;

        let file_path = match lookup.result {
            Some(result) if lookup.ok => result.file_path,
            _ => return Err(FileStoreError::NotFound),
        };
        debug!(photo_ref, file_path, "photo reference resolved");

        let download_url = format!("{}/file/bot{}/{}", self.api_base, self.token, file_path);
        let response = self
            .agent
            .get(&download_url)
            .call()
            .map_err(map_ureq_error)?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(PHOTO_SIZE_CAP + 1)
            .read_to_end(&mut bytes)
            .map_err(|_| FileStoreError::Malformed)?;
        if bytes.len() as u64 > PHOTO_SIZE_CAP {
            return Err(FileStoreError::Malformed);
        }
        Ok(bytes)
    }
}

impl PhotoStore for HttpPhotoStore {
    fn fetch(
        &self,
        photo_ref: &str,
    ) -> impl Future<Output = Result<Vec<u8>, FileStoreError>> + Send {
        let valid = validate_ref(photo_ref);
        let store = HttpPhotoStore {
            api_base: self.api_base.clone(),
            token: self.token.clone(),
            agent: self.agent.clone(),
        };
        let photo_ref = photo_ref.to_string();

        async move {
            valid?;
            tokio::task::spawn_blocking(move || store.fetch_blocking(&photo_ref))
                .await
                .map_err(|_| FileStoreError::Canceled)?
        }
    }
}

/// Length check applied before any reference touches the wire.
pub fn validate_ref(photo_ref: &str) -> Result<(), FileStoreError> {
    if photo_ref.is_empty() || photo_ref.len() > PHOTO_REF_MAX_LEN {
        return Err(FileStoreError::InvalidRef);
    }
    Ok(())
}

fn map_ureq_error(e: ureq::Error) -> FileStoreError {
    match e {
        ureq::Error::Status(404, _) => FileStoreError::NotFound,
        ureq::Error::Status(code, _) => FileStoreError::Status(code),
        ureq::Error::Transport(t) => FileStoreError::Transport(t.to_string()),
    }
}
