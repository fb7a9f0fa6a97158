//! # Warden State Machines
//!
//! A [`StateMachine`] is a value that components hold and delegate to: a
//! declared set of states, a transition table, an optional initial state and
//! a table of named post-transition callbacks.
//!
//! ## Transition Rules
//!
//! - Every state passed in must be declared, otherwise [`StateError::UnknownState`]
//! - With a current state, the target must be listed for it, otherwise
//!   [`StateError::InvalidTransition`]; the current state is left untouched
//! - A [`StateEvent::Transition`] is published synchronously
//! - Callbacks registered for the target state run later, in order, on the
//!   machine's scheduler; failures are reported as
//!   [`StateEvent::CallbackFailed`] and never reach the caller
//!
//! ```rust
//! use warden_fsm::{StateGraph, StateMachine};
//! use warden_types::default_scheduler;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Door { Open, Closed }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let graph = StateGraph::new([Door::Open, Door::Closed])
//!     .allow(Door::Open, [Door::Closed])
//!     .allow(Door::Closed, [Door::Open])
//!     .initial(Door::Closed);
//! let door = StateMachine::new("door", graph, default_scheduler()).unwrap();
//!
//! door.transition_to(Door::Open).unwrap();
//! assert!(door.transition_to(Door::Open).is_err());
//! assert_eq!(door.current(), Some(Door::Open));
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod machine;

pub use error::{Result, StateError};
pub use graph::{State, StateGraph};
pub use machine::{Callback, StateEvent, StateMachine, StateTransition};
