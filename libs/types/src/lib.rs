//! # Warden Shared Types
//!
//! Message model and runtime primitives shared by every Warden crate.
//!
//! ## Contents
//!
//! - **Message model**: [`Message`], [`MessageId`], [`ErrorValue`] and the
//!   opaque [`ReplyHandle`] carried by `localDispatch` envelopes
//! - **Scheduling**: the injectable [`Scheduler`] trait and its tokio-backed
//!   default [`TokioScheduler`]
//! - **Cancellation**: [`CancellationSource`] / [`CancellationToken`] pairs
//!   used to reject in-flight work explicitly
//!
//! ## Quick Start
//!
//! ```rust
//! use warden_types::{Message, mtype};
//! use serde_json::json;
//!
//! let request = Message::new("ping", json!({"seq": 1}));
//! let reply = Message::reply_to(&request, json!({"seq": 1}));
//! assert_eq!(reply.in_reply_to, Some(request.msg_id));
//! assert!(!request.is_local_dispatch());
//! assert_eq!(mtype::LOCAL_DISPATCH, "localDispatch");
//! ```

pub mod cancel;
pub mod message;
pub mod scheduler;

pub use cancel::{CancellationReason, CancellationSource, CancellationToken};
pub use message::{
    mtype, current_timestamp_ms, DispatchBody, ErrorValue, Message, MessageId, ReplyHandle,
    ReplyOutcome,
};
pub use scheduler::{
    default_scheduler, BoxFuture, Scheduler, SharedScheduler, TaskHandle, TokioScheduler,
};
