//! # Warden Channels
//!
//! Single-owner pub/sub endpoints and the pieces built directly on them.
//!
//! - [`Channel`]: ordered subscriber list; only the holder of the owning
//!   [`Sentinel`] may publish
//! - [`CompositeChannel`]: fan-in channel that relays everything published on
//!   its joined sources
//! - [`MessageBus`]: channel with no external owner
//! - [`StateGuard`]: turns any use of a disposed object into an error
//!
//! Delivery is synchronous: `publish` returns after every current subscriber
//! has seen the message, in subscription order.
//!
//! ```rust
//! use std::sync::Arc;
//! use warden_channels::{Channel, Sentinel, SubscriberRef};
//!
//! let owner = Sentinel::new();
//! let channel: Channel<String> = Channel::new("greetings", &owner);
//!
//! let printer: SubscriberRef<String> = Arc::new(|msg: &String| println!("{msg}"));
//! channel.subscribe(printer.clone()).unwrap();
//! assert!(channel.subscribe(printer).is_err());
//!
//! assert_eq!(channel.publish(&owner, &"hello".to_string()).unwrap(), 1);
//! assert!(channel.publish(&Sentinel::new(), &"forged".to_string()).is_err());
//! ```

pub mod bus;
pub mod channel;
pub mod composite;
pub mod error;
pub mod guard;
pub mod sentinel;

pub use bus::MessageBus;
pub use channel::{Channel, Subscriber, SubscriberRef};
pub use composite::CompositeChannel;
pub use error::{ChannelError, Result};
pub use guard::StateGuard;
pub use sentinel::Sentinel;
