//! Server-Sent Events feed transport
//!
//! `GET {base_url}{endpoint_path}` with `Accept: text/event-stream`;
//! each SSE event's `data:` lines form one frame.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use contracts::{FeedConnector, FeedDescriptor, FeedStream, StreamError};
use futures_util::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, instrument};

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Opens SSE streams against one base URL
#[derive(Debug, Clone)]
pub struct SseFeedConnector {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl SseFeedConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth_token: None,
        }
    }

    /// Present `token` as a bearer credential on every request
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// Full URL of a feed endpoint
    pub fn url_for(&self, descriptor: &FeedDescriptor) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            descriptor.endpoint_path
        )
    }
}

impl FeedConnector for SseFeedConnector {
    type Stream = SseFeedStream;

    #[instrument(
        name = "sse_connect",
        skip(self, descriptor),
        fields(feed = %descriptor.feed_name)
    )]
    async fn connect(&self, descriptor: &FeedDescriptor) -> Result<SseFeedStream, StreamError> {
        let url = self.url_for(descriptor);
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::transport(&descriptor.feed_name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::transport(
                &descriptor.feed_name,
                format!("HTTP {status} from {url}"),
            ));
        }

        debug!(%url, "SSE stream opened");
        Ok(SseFeedStream {
            feed_name: descriptor.feed_name.clone(),
            body: Some(Box::pin(response.bytes_stream())),
            parser: SseParser::default(),
        })
    }
}

/// An open SSE response body
pub struct SseFeedStream {
    feed_name: String,
    body: Option<BodyStream>,
    parser: SseParser,
}

impl FeedStream for SseFeedStream {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            if let Some(frame) = self.parser.next_event() {
                return Some(Ok(frame));
            }
            let body = self.body.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => self.parser.feed(&chunk),
                Some(Err(e)) => {
                    self.body = None;
                    return Some(Err(StreamError::transport(&self.feed_name, e.to_string())));
                }
                None => {
                    self.body = None;
                    return self.parser.finish().map(Ok);
                }
            }
        }
    }

    async fn close(&mut self) {
        // dropping the body releases the connection
        self.body = None;
    }
}

/// Incremental `text/event-stream` decoder
///
/// Only `data:` fields are kept; comments and `event:`/`id:`/`retry:`
/// fields are ignored. Lines may be split across chunks.
#[derive(Debug, Default)]
pub struct SseParser {
    pending: Vec<u8>,
    data: Vec<String>,
    ready: VecDeque<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.process_line(line.trim_end_matches(&['\n', '\r'][..]));
        }
    }

    /// Next complete event payload
    pub fn next_event(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Flush at end of stream; an unterminated event is still delivered
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.process_line(line.trim_end_matches(&['\n', '\r'][..]));
        }
        self.dispatch();
        self.ready.pop_front()
    }

    fn process_line(&mut self, line: &str) {
        if line.is_empty() {
            self.dispatch();
            return;
        }
        if line.starts_with(':') {
            return;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
    }

    fn dispatch(&mut self) {
        if !self.data.is_empty() {
            self.ready.push_back(self.data.join("\n"));
            self.data.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_split_across_chunks() {
        let mut parser = SseParser::default();
        parser.feed(b": keep-alive\n\ndata: {\"a\"");
        assert!(parser.next_event().is_none());
        parser.feed(b":1}\r\n\r\nevent: update\ndata: x\ndata: y\n\n");

        assert_eq!(parser.next_event().as_deref(), Some("{\"a\":1}"));
        assert_eq!(parser.next_event().as_deref(), Some("x\ny"));
        assert!(parser.next_event().is_none());
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut parser = SseParser::default();
        parser.feed(b"data: last");
        assert!(parser.next_event().is_none());
        assert_eq!(parser.finish().as_deref(), Some("last"));
    }

    #[test]
    fn test_url_join() {
        let connector = SseFeedConnector::new("https://example.supabase.co/");
        let desc = FeedDescriptor::new("grid", "/functions/v1/stream-ontario-demand");
        assert_eq!(
            connector.url_for(&desc),
            "https://example.supabase.co/functions/v1/stream-ontario-demand"
        );
    }
}
