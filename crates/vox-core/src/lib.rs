//! Core types shared by the broker and worker crates: branded ids, the wire
//! protocol (control messages, result events, sentinels), the numeric status
//! taxonomy, caps negotiation and the adaptation-state codec.

pub mod adaptation;
pub mod caps;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod status;
