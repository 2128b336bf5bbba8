//! Transport traits
//!
//! The core only knows "one-way push" and "duplex". Concrete transports
//! (SSE, WebSocket, in-memory mocks) implement these traits; connections
//! are generic over them.

use crate::{ChannelDescriptor, FeedDescriptor, StreamError};

/// Opens one-way push streams
#[trait_variant::make(FeedConnector: Send)]
pub trait LocalFeedConnector {
    /// Stream type produced by a successful connect
    type Stream: FeedStream + 'static;

    /// Establish the live link described by `descriptor`
    ///
    /// # Errors
    /// Returns `StreamError::Transport` if the link cannot be opened.
    async fn connect(&self, descriptor: &FeedDescriptor) -> Result<Self::Stream, StreamError>;
}

/// An open one-way push stream
#[trait_variant::make(FeedStream: Send)]
pub trait LocalFeedStream {
    /// Next raw frame
    ///
    /// `None` means the upstream closed the stream.
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>>;

    /// Release the transport
    async fn close(&mut self);
}

/// Opens duplex channel links
#[trait_variant::make(ChannelConnector: Send)]
pub trait LocalChannelConnector {
    type Link: ChannelLink + 'static;

    /// Establish (or re-establish) the link described by `descriptor`
    async fn connect(&self, descriptor: &ChannelDescriptor) -> Result<Self::Link, StreamError>;
}

/// An open duplex link
#[trait_variant::make(ChannelLink: Send)]
pub trait LocalChannelLink {
    /// Send one encoded frame
    async fn send(&mut self, frame: String) -> Result<(), StreamError>;

    /// Next inbound frame; `None` on clean close by the peer
    ///
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, StreamError>>;

    async fn close(&mut self);
}
