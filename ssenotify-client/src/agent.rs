//! Reconnecting notification client

use futures::StreamExt;
use reqwest::{header, Response, Url};
use serde::Deserialize;
use ssenotify_core::SessionId;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::session::SessionIdSource;
use crate::sse::{ServerEvent, SseDecoder};

/// Initial delay before reopening a failed stream
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum delay between reconnection attempts
const MAX_BACKOFF_SECS: u64 = 30;

/// Timeout for establishing the TCP/TLS connection
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Exponential backoff between stream reconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(INITIAL_BACKOFF_SECS),
            max: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }
}

impl ReconnectPolicy {
    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Acknowledgement body of the fire endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FireAck {
    pub message: String,
    pub session_id: String,
    pub sequence: Option<u64>,
}

enum StreamEnd {
    Cancelled,
    Closed,
}

/// Fires notifications for, and listens to, a single session.
#[derive(Debug, Clone)]
pub struct NotifyClient {
    http: reqwest::Client,
    session_id: SessionId,
    fire_url: Url,
    stream_url: Url,
    reconnect: ReconnectPolicy,
}

impl NotifyClient {
    /// Client for `base_url` using the id supplied by `sessions`
    pub fn new(base_url: &str, sessions: &dyn SessionIdSource) -> Result<Self> {
        Self::with_session_id(base_url, sessions.session_id()?)
    }

    pub fn with_session_id(base_url: &str, session_id: SessionId) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
        let fire_url = endpoint(&base, &session_id, "fire")?;
        let stream_url = endpoint(&base, &session_id, "stream")?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            session_id,
            fire_url,
            stream_url,
            reconnect: ReconnectPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    #[must_use]
    pub fn fire_url(&self) -> &Url {
        &self.fire_url
    }

    #[must_use]
    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    /// Ask the server to publish a notification to this session
    pub async fn fire(&self) -> Result<FireAck> {
        let response = self.http.get(self.fire_url.clone()).send().await?;
        let ack = ensure_success(response)?.json::<FireAck>().await?;
        debug!(session_id = %self.session_id, sequence = ?ack.sequence, "Notification fired");
        Ok(ack)
    }

    /// Listen for events until `cancel` fires, reopening the stream whenever
    /// it fails or the server closes it.
    ///
    /// Opening a new stream evicts any stream the server still holds for this
    /// session, including this client's own stale one.
    pub async fn stream<F>(&self, mut on_event: F, cancel: CancellationToken) -> Result<()>
    where
        F: FnMut(ServerEvent),
    {
        let mut backoff = self.reconnect.initial;

        loop {
            let connected = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                connected = self.connect() => connected,
            };

            match connected {
                Ok(response) => {
                    backoff = self.reconnect.initial;
                    info!(session_id = %self.session_id, "Event stream connected");

                    match self.relay(response, &mut on_event, &cancel).await {
                        Ok(StreamEnd::Cancelled) => return Ok(()),
                        Ok(StreamEnd::Closed) => {
                            info!(session_id = %self.session_id, "Event stream closed by server, reconnecting");
                        }
                        Err(e) => {
                            warn!(session_id = %self.session_id, error = %e, "Event stream failed, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        error = %e,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Failed to open event stream, retrying"
                    );
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = self.reconnect.next(backoff);
        }
    }

    async fn connect(&self) -> Result<Response> {
        let response = self
            .http
            .get(self.stream_url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        ensure_success(response)
    }

    async fn relay<F>(
        &self,
        response: Response,
        on_event: &mut F,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd>
    where
        F: FnMut(ServerEvent),
    {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                chunk = body.next() => chunk,
            };

            match chunk {
                None => return Ok(StreamEnd::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(bytes)) => {
                    for event in decoder.push(&bytes) {
                        on_event(event);
                    }
                }
            }
        }
    }
}

fn endpoint(base: &Url, session_id: &SessionId, action: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| Error::InvalidUrl(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(["api", "v1", "notifications", session_id.as_str(), action]);
    Ok(url)
}

fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Status {
            status,
            url: response.url().to_string(),
        })
    }
}
