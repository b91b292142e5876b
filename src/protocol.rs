//! Protocol capability boundary.
//!
//! The engine never inspects frame contents. It only needs a decoder that turns
//! received bytes into frames and an encoder that turns frames into write tasks
//! with a known length. Concrete framings live outside this crate.
//!
//! # Example
//!
//! ```ignore
//! struct LineDecoder;
//!
//! impl ProtocolDecoder for LineDecoder {
//!     type Frame = String;
//!
//!     fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
//!         match src.iter().position(|b| *b == b'\n') {
//!             Some(at) => {
//!                 let line = src.split_to(at + 1);
//!                 Ok(Some(String::from_utf8_lossy(&line[..at]).into_owned()))
//!             }
//!             None => Ok(None),
//!         }
//!     }
//! }
//! ```

use crate::channel::WriteTask;

use bytes::BytesMut;
use std::io;

/// Per-channel decoder. Owned by the event loop thread, never shared.
pub trait ProtocolDecoder: Send + 'static {
    type Frame;

    /// Decodes the next complete frame from `src`.
    ///
    /// Consumes the frame's bytes from `src` and returns it, or returns `Ok(None)`
    /// when more data is needed. The loop calls this repeatedly until `None`, so a
    /// single read can yield zero or more frames. An error closes the channel.
    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Frame>>;
}

/// Frame encoder shared by every producer thread writing to a session.
pub trait ProtocolEncoder: Send + Sync + 'static {
    type Frame;

    /// Serializes `frame` into a write task whose length is the total byte count.
    fn encode(&self, frame: Self::Frame) -> io::Result<WriteTask>;
}

/// Creates the protocol objects for each channel of a context.
pub trait ProtocolFactory: Send + Sync + 'static {
    type Frame: Send + 'static;
    type Decoder: ProtocolDecoder<Frame = Self::Frame>;
    type Encoder: ProtocolEncoder<Frame = Self::Frame>;

    /// Returns a fresh decoder for a newly registered channel.
    fn decoder(&self) -> Self::Decoder;

    /// Returns the encoder shared by all sessions of the context.
    fn encoder(&self) -> Self::Encoder;
}
