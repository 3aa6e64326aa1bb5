//! The session broker: accepts client audio streams and decoder workers
//! over WebSockets, pairs each stream with an idle worker, relays audio and
//! result events in both directions, and enforces timeout and cancellation
//! semantics per session.

pub mod config;
pub mod fsm;
pub mod http;
pub mod pool;
pub mod server;
pub mod session;
pub mod state;
pub mod status;
pub mod worker_link;

pub use config::BrokerConfig;
pub use server::{start, ServerHandle};
pub use state::BrokerState;
