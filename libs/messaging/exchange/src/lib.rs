//! # Warden Exchange
//!
//! Request/reply messaging on top of [`warden_channels`].
//!
//! ## Pieces
//!
//! - [`Exchange`]: egress composite plus dispatch channel with correlated
//!   `send_and_receive` and explicit timeouts
//! - [`TransportStrategy`] / [`InMemoryTransport`]: bridge an exchange to the
//!   other side, wrapping incoming requests into `localDispatch` envelopes
//! - [`Dispatcher`]: fans in exchanges' dispatch channels and hands requests
//!   to a [`Responder`]
//! - [`InvocationRouter`]: a [`Responder`] calling `onMsg<Type>` handlers on
//!   a delegate, bracketed by an optional [`DispatchObserver`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use serde_json::json;
//! use warden_exchange::{Dispatcher, Exchange, InvocationRouter};
//! use warden_types::{default_scheduler, Message};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let client = Exchange::new("client", default_scheduler());
//! let server = Exchange::new("server", default_scheduler());
//! client.twine(&server).unwrap();
//!
//! let router = InvocationRouter::new(Arc::new(()))
//!     .handle("ping", |_, _ctx, _payload, reply| reply.ok(json!({"mType": "pong"})));
//! let dispatcher = Dispatcher::new("server", Arc::new(router));
//! dispatcher.attach(&server).unwrap();
//! dispatcher.enable();
//!
//! let reply = client
//!     .send_and_receive(Message::new("ping", json!(null)), Duration::from_secs(1))
//!     .await
//!     .unwrap();
//! assert_eq!(reply.payload["mType"], "pong");
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod exchange;
pub mod router;
pub mod transport;

pub use dispatcher::{DispatchContext, DispatchStats, Dispatcher, Reply, Responder};
pub use error::{ExchangeError, Result};
pub use exchange::{Exchange, Requester};
pub use router::{
    handler_name, DispatchObserver, Handler, InvocationRouter, UnhandledHandler, UNHANDLED,
};
pub use transport::{InMemoryTransport, TransportStrategy};
