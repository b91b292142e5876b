//! Reactor-based TCP server and client engine.
//!
//! A small number of selector threads multiplex many non-blocking sockets.
//! Each socket is wrapped in a [`Channel`] that owns its write queue, its pooled
//! read buffer and its open/closing/closed state. Application code sees
//! [`Session`]s and frames, never sockets.
//!
//! # Architecture
//!
//! - **Channel**: Per-socket write queue, flush protocol and lifecycle
//! - **Selector loop**: Readiness polling, decode, flush dispatch, liveness sweep
//! - **Executor**: Per-loop worker thread running the [`IoEventHandler`]
//! - **SocketAcceptor / SocketConnector**: Inbound and outbound entry points
//! - **Session**: Cloneable handle used by producers on any thread
//! - **ByteBufferPool**: Reusable receive buffers, one pool per loop
//! - **ConfigurationBuilder**: Fluent builder for [`ServerConfiguration`]
//!
//! # Example
//! ```ignore
//! let config = ConfigurationBuilder::new().port(8300).selector_loops(2).build();
//! let context = ChannelContext::new(config, LineProtocol, EchoHandler)
//!     .with_listener(LoggingLifeCycleListener);
//!
//! let acceptor = SocketAcceptor::new(Arc::new(context));
//! acceptor.bind()?;
//! ```

pub mod buffer;
mod builder;
pub mod channel;
pub mod configuration;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod protocol;
mod reactor;
mod runtime;
pub mod session;
mod utils;

pub use buffer::ByteBufferPool;
pub use builder::ConfigurationBuilder;
pub use channel::{
    Channel, ChannelService, ChannelSettings, ChannelState, FlushProgress, SocketIo,
    WriteCallback, WriteDispatcher, WriteTask,
};
pub use configuration::{BackpressurePolicy, ServerConfiguration, SocketOptions};
pub use context::{ChannelContext, IoEventHandler};
pub use error::{Error, Result};
pub use lifecycle::{LifeCycleContext, LifeCycleListener, LoggingLifeCycleListener};
pub use net::{CloseWaiter, SocketAcceptor, SocketConnector};
pub use protocol::{ProtocolDecoder, ProtocolEncoder, ProtocolFactory};
pub use session::{Session, SessionId, SessionRegistry};

pub use mio::Token;
