//! Worker-side half of the vox broker protocol.
//!
//! A worker process owns one [`pipeline::DecoderPipeline`] instance, keeps
//! an outbound WebSocket connection to the broker (reconnecting forever on
//! failure), and translates between the broker's wire frames and the
//! pipeline's lifecycle calls and events.

pub mod adapter;
pub mod config;
pub mod echo;
pub mod link;
pub mod mock;
pub mod pipeline;

pub use adapter::{DecoderAdapter, WorkerState};
pub use config::WorkerConfig;
pub use echo::EchoPipeline;
pub use mock::{MockCall, MockHandle, MockPipeline};
pub use pipeline::{DecoderPipeline, PipelineError, PipelineEvent};
