//! Streaming client for the conversational agent.
//!
//! The agent answers with a long-lived event stream. A reader task per request
//! consumes the body, turns lines into fragments and hands them over a bounded
//! channel, so the caller never blocks a runtime thread on the open connection.

use crate::auth::AuthTokenProvider;
use crate::config::AgentConfig;
use crate::events::{classify_line, EventLine, LineBuffer};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use waypoint_types::{AccumulatedReply, AgentQuery, AgentStreamError, StreamFragment};

/// Fragments buffered between the reader task and the consumer.
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

/// Producer half of a [`FragmentStream`].
pub type FragmentSender = mpsc::Sender<Result<StreamFragment, AgentStreamError>>;

/// Ordered fragments of one agent reply.
///
/// Ends when the producer finishes. An `Err` item is terminal.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<Result<StreamFragment, AgentStreamError>>,
}

impl FragmentStream {
    /// Creates a connected sender and stream.
    pub fn channel() -> (FragmentSender, Self) {
        let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
        (tx, Self { rx })
    }

    /// A stream that yields the given items and then ends.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<StreamFragment, AgentStreamError>>,
    {
        let items: Vec<_> = items.into_iter().collect();
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item.
            let _ = tx.try_send(item);
        }
        Self { rx }
    }

    pub async fn next_fragment(&mut self) -> Option<Result<StreamFragment, AgentStreamError>> {
        self.rx.recv().await
    }

    /// Consumes the stream to its end, stopping at the first error.
    pub async fn accumulate(mut self) -> Result<AccumulatedReply, AgentStreamError> {
        let mut reply = AccumulatedReply::new();
        while let Some(item) = self.rx.recv().await {
            reply.push(&item?);
        }
        Ok(reply)
    }
}

impl Stream for FragmentStream {
    type Item = Result<StreamFragment, AgentStreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Sends a query to the agent and exposes its reply.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Opens the reply stream. Fragments arrive in the agent's order.
    async fn open_stream(
        &self,
        query: &AgentQuery,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, AgentStreamError>;

    /// Opens the reply stream and consumes it to completion.
    async fn query(
        &self,
        query: &AgentQuery,
        cancel: CancellationToken,
    ) -> Result<AccumulatedReply, AgentStreamError> {
        self.open_stream(query, cancel).await?.accumulate().await
    }
}

/// Agent reached over HTTP with a `data: `-prefixed event stream response.
pub struct HttpAgentGateway {
    client: reqwest::Client,
    url: String,
    tokens: Arc<dyn AuthTokenProvider>,
}

impl HttpAgentGateway {
    pub fn new(
        url: impl Into<String>,
        tokens: Arc<dyn AuthTokenProvider>,
        timeout: Duration,
    ) -> Result<Self, AgentStreamError> {
        let url = url.into();
        if url.is_empty() {
            return Err(AgentStreamError::Connection(
                "agent url is not configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentStreamError::Connection(format!("failed to build client: {}", e)))?;
        Ok(Self { client, url, tokens })
    }

    pub fn from_config(
        config: &AgentConfig,
        tokens: Arc<dyn AuthTokenProvider>,
    ) -> Result<Self, AgentStreamError> {
        Self::new(&config.url, tokens, Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl AgentGateway for HttpAgentGateway {
    async fn open_stream(
        &self,
        query: &AgentQuery,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, AgentStreamError> {
        let token = self.tokens.bearer_token().await?;

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(query)
            .send()
            .await
            .map_err(|e| AgentStreamError::Connection(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.tokens.invalidate().await;
            let body = response.text().await.unwrap_or_default();
            return Err(AgentStreamError::Authorization(format!(
                "agent rejected bearer token ({}): {}",
                status.as_u16(),
                body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentStreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(status = status.as_u16(), "agent stream opened");

        let (tx, stream) = FragmentStream::channel();
        tokio::spawn(read_events(response, tx, cancel).in_current_span());
        Ok(stream)
    }
}

#[derive(Debug, Default)]
struct LineStats {
    fragments: usize,
    keep_alives: usize,
    skipped: usize,
    malformed: usize,
}

/// Reader task: drains the response body into `tx` until the body ends, the
/// request is cancelled or the consumer goes away.
async fn read_events(response: reqwest::Response, tx: FragmentSender, cancel: CancellationToken) {
    let mut body = std::pin::pin!(response.bytes_stream());
    let mut lines = LineBuffer::new();
    let mut stats = LineStats::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("agent stream cancelled");
                let _ = tx.try_send(Err(AgentStreamError::Cancelled));
                return;
            }
            _ = tx.closed() => {
                debug!("fragment consumer dropped, closing agent stream");
                return;
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                let completed = lines.push(&bytes);
                let overflowed = lines.take_overflowed();
                if overflowed > 0 {
                    stats.malformed += overflowed;
                    warn!(count = overflowed, "skipping oversized agent event line");
                }
                for line in completed {
                    if !forward_line(&line, &tx, &mut stats).await {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "agent stream interrupted");
                let _ = tx.send(Err(AgentStreamError::Interrupted(e.to_string()))).await;
                return;
            }
            None => break,
        }
    }

    if let Some(tail) = lines.finish() {
        if !forward_line(&tail, &tx, &mut stats).await {
            return;
        }
    }

    info!(
        fragments = stats.fragments,
        keep_alives = stats.keep_alives,
        skipped = stats.skipped,
        malformed = stats.malformed,
        "agent stream finished"
    );
}

/// Classifies one line and forwards it if it carries content.
///
/// Returns `false` once the consumer is gone.
async fn forward_line(line: &str, tx: &FragmentSender, stats: &mut LineStats) -> bool {
    match classify_line(line) {
        EventLine::Fragment(fragment) => {
            stats.fragments += 1;
            tx.send(Ok(fragment)).await.is_ok()
        }
        EventLine::KeepAlive => {
            stats.keep_alives += 1;
            true
        }
        EventLine::Malformed(reason) => {
            stats.malformed += 1;
            warn!(%reason, "skipping undecodable agent event line");
            true
        }
        EventLine::Blank => true,
        other => {
            stats.skipped += 1;
            debug!(kind = ?other, "skipping agent event line without content");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn accumulate_concatenates_in_order() {
        let stream = FragmentStream::from_items(vec![
            Ok(StreamFragment::new("[{\"route\":1}] ")),
            Ok(StreamFragment::new("")),
            Ok(StreamFragment::new("Turn left in 200 meters")),
        ]);
        let reply = stream.accumulate().await.unwrap();
        assert_eq!(reply.as_str(), "[{\"route\":1}] Turn left in 200 meters");
        assert_eq!(reply.fragment_count(), 3);
    }

    #[tokio::test]
    async fn accumulate_stops_at_first_error() {
        let stream = FragmentStream::from_items(vec![
            Ok(StreamFragment::new("partial")),
            Err(AgentStreamError::Interrupted("reset".to_string())),
            Ok(StreamFragment::new("never seen")),
        ]);
        let err = stream.accumulate().await.unwrap_err();
        assert!(matches!(err, AgentStreamError::Interrupted(_)));
    }

    #[tokio::test]
    async fn empty_stream_is_an_empty_reply() {
        let reply = FragmentStream::from_items(Vec::new()).accumulate().await.unwrap();
        assert_eq!(reply.as_str(), "");
        assert_eq!(reply.fragment_count(), 0);
    }

    #[tokio::test]
    async fn stream_trait_yields_items() {
        let mut stream = FragmentStream::from_items(vec![Ok(StreamFragment::new("a"))]);
        let first = StreamExt::next(&mut stream).await.unwrap().unwrap();
        assert_eq!(first.content, "a");
        assert!(StreamExt::next(&mut stream).await.is_none());
    }
}
