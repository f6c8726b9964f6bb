//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BroadcastService`: Single producer driving the replay
//! - `StreamEndpoint`: Per-subscriber drain into an outbound connection
//! - `FeedState`: Replay progress shared with the status surfaces

mod broadcast;
mod feed_state;
mod stream;

pub use broadcast::{BroadcastService, ReplaySummary};
pub use feed_state::{FeedState, ReplayPhase};
pub use stream::{StreamEndpoint, StreamExit};
