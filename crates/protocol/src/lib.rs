//! Wire protocol for the Autodroid agent: the textual message envelope
//! carried on the control and event channels, and the framed binary format
//! carried on the binary channel.

pub mod envelope;
pub mod frame;

pub use envelope::{now_millis, Envelope, MessageType, Metadata, WireError};
pub use frame::{correlation_id_of, flags, BinaryFrame, PayloadKind, FRAME_HEADER_LEN};
