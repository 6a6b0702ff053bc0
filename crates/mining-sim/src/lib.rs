//! mining-sim: simulated collaborators for the credit mining scheduler.
//!
//! - [`SimulatedEngine`]: in-memory download engine with a simple status
//!   lifecycle and optional on-disk checkpoints
//! - [`FeedSources`]: discovery sources replaying static JSON feeds
//!
//! Used by the `minerd` daemon and by the scheduler's integration tests.

pub mod engine;
pub mod feed;

pub use engine::{EngineCommand, SimulatedEngine};
pub use feed::{FeedEntry, FeedError, FeedSource, FeedSources};
