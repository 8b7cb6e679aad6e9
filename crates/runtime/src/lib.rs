//! Plumbing between the pilot client and its driver process.
//!
//! Layers, bottom up:
//!
//! - [`driver`] and [`server`] find and spawn the driver executable
//! - [`transport`] moves length-prefixed JSON frames over its stdio
//! - [`connection`] numbers commands, matches replies to them, and routes
//!   events and lifecycle messages to the mirrored objects
//! - [`channel_owner`] is the tree of mirrored objects, with disposal
//!
//! Typed objects (request contexts, pages, workers) live in `pilot` and plug
//! in through [`ObjectFactory`].

pub mod channel;
pub mod channel_owner;
pub mod connection;
pub mod driver;
pub mod error;
pub mod server;
pub mod transport;

pub use channel::Channel;
pub use channel_owner::{ChannelOwner, ChannelOwnerImpl, DisposeReason, ParentOrConnection};
pub use connection::{
	AsyncChannelOwnerResult, Connection, ConnectionLike, ErrorPayload, Event, Message, Metadata,
	ObjectFactory, Request, Response,
};
pub use driver::{DriverCommand, get_driver_executable};
pub use error::{Error, Result};
pub use server::DriverProcess;
pub use transport::{PipeTransport, Transport, TransportParts, TransportReceiver};
