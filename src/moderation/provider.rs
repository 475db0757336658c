//! Moderation Collaborator Seam
//!
//! The external moderation service is reached through [`ModerationProvider`],
//! which hands back the raw verdict string. Everything the service can do
//! wrong - timeouts, non-2xx statuses, unreadable bodies - surfaces as a
//! [`ProviderError`], which the gate's retry and fail-closed policy consumes.

use std::fs;
use std::future::Future;
use std::io::Read;
use std::time::Duration;

use thiserror::Error;

use crate::moderation::staging::StagedImage;

/// Default connect/read/write timeout for the HTTP provider.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdicts are one short line; anything past this is a malformed body.
const VERDICT_BODY_CAP: u64 = 4096;

/// Transport or collaborator fault. Never a verdict: a deny comes back as a
/// successful response with a `FAIL:` body.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The staged image could not be read back from disk.
    #[error("staged image unreadable: {0}")]
    Image(#[from] std::io::Error),

    /// The collaborator answered with a non-2xx status.
    #[error("moderation endpoint returned status {0}")]
    Status(u16),

    /// The request never completed (DNS, TLS, timeout, connection reset).
    #[error("moderation transport fault: {0}")]
    Transport(String),

    /// The response body was not a readable verdict string.
    #[error("moderation verdict body unreadable")]
    MalformedBody,

    /// The blocking review task was cancelled before it finished.
    #[error("moderation review task aborted")]
    Canceled,
}

/// A collaborator that reviews a staged image and returns its raw verdict
/// string. Implementations must be cheap to call repeatedly: the gate retries
/// through the same instance.
pub trait ModerationProvider: Send + Sync + 'static {
    /// Submits the image for review and returns the verdict text.
    fn review(
        &self,
        image: &StagedImage,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

/// HTTP provider: POSTs the staged image bytes to a configured endpoint and
/// reads the verdict from the response body. The blocking HTTP call runs on
/// the tokio blocking pool.
pub struct HttpModerator {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpModerator {
    /// Creates a provider against `endpoint` with [`DEFAULT_HTTP_TIMEOUT`].
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_timeout(endpoint, DEFAULT_HTTP_TIMEOUT)
    }

    /// Creates a provider with an explicit per-request timeout.
    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self {
            endpoint: endpoint.into(),
            agent,
        }
    }
}

impl ModerationProvider for HttpModerator {
    fn review(
        &self,
        image: &StagedImage,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send {
        let endpoint = self.endpoint.clone();
        let agent = self.agent.clone();
        let path = image.path().to_path_buf();

        async move {
            tokio::task::spawn_blocking(move || {
                let bytes = fs::read(&path)?;
                post_for_verdict(&agent, &endpoint, &bytes)
            })
            .await
            .map_err(|_| ProviderError::Canceled)?
        }
    }
}

/// Blocking POST of the image bytes; the response body is the verdict.
fn post_for_verdict(
    agent: &ureq::Agent,
    endpoint: &str,
    bytes: &[u8],
) -> Result<String, ProviderError> {
    let response = agent
        .post(endpoint)
        .set("Content-Type", "application/octet-stream")
        .send_bytes(bytes)
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => ProviderError::Status(code),
            ureq::Error::Transport(t) => ProviderError::Transport(t.to_string()),
        })?;

    let mut raw = String::new();
    response
        .into_reader()
        .take(VERDICT_BODY_CAP)
        .read_to_string(&mut raw)
        .map_err(|_| ProviderError::MalformedBody)?;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Answers exactly one HTTP request with the given status and body, on a
    /// freshly bound localhost port.
    fn serve_one_verdict(status: u16, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();

            // Drain headers and the announced body before answering
            let mut buf = Vec::new();
            let mut byte = [0u8; 1];
            while !buf.ends_with(b"\r\n\r\n") {
                if stream.read(&mut byte).unwrap() == 0 {
                    return;
                }
                buf.push(byte[0]);
            }
            let headers = String::from_utf8_lossy(&buf).to_ascii_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            let mut body_buf = vec![0u8; content_length];
            stream.read_exact(&mut body_buf).unwrap();

            let reply = format!(
                "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).unwrap();
        });

        format!("http://{addr}/review")
    }

    #[tokio::test]
    async fn test_http_provider_returns_verdict_body() {
        let endpoint = serve_one_verdict(200, "OK");
        let provider = HttpModerator::new(endpoint);
        let staged = StagedImage::stage("provider-ok", b"image bytes").unwrap();

        let verdict = provider.review(&staged).await.unwrap();
        assert_eq!(verdict, "OK");
    }

    #[tokio::test]
    async fn test_http_provider_maps_non_2xx_to_status_fault() {
        let endpoint = serve_one_verdict(503, "overloaded");
        let provider = HttpModerator::new(endpoint);
        let staged = StagedImage::stage("provider-503", b"image bytes").unwrap();

        let err = provider.review(&staged).await.unwrap_err();
        assert!(matches!(err, ProviderError::Status(503)));
    }

    #[tokio::test]
    async fn test_missing_staged_file_is_image_fault() {
        let provider = HttpModerator::new("http://127.0.0.1:1/unreachable");
        let staged = StagedImage::stage("provider-gone", b"x").unwrap();
        std::fs::remove_file(staged.path()).unwrap();

        let err = provider.review(&staged).await.unwrap_err();
        assert!(matches!(err, ProviderError::Image(_)));
    }
}
