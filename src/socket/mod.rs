//! WebSocket fan-out.
//!
//! One WebSocket per connection, any number of connections per user. Every
//! connection is auto-joined to its user room; `matchrequest:` and `lobby:`
//! rooms are joined either by an authenticated client subscribe or
//! server-side when a match finalizes. Delivery is best-effort by design —
//! REST reads are the source of truth after a reconnect.

pub mod connection;
pub mod events;
pub mod fanout;

pub use events::{ClientEvent, ServerEvent};
pub use fanout::{EventBus, Room};
