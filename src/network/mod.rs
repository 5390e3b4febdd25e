//! Peer-facing message handling. Transport is not part of this crate.

pub mod inbox;
pub mod protocol;

pub use inbox::{Envelope, InboxStats, PeerInbox};
pub use protocol::{Message, MessageType, ProtocolHandler};
