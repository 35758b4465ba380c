pub mod aggregator;
pub mod bus;
pub mod config;
pub mod correlate;
pub mod dedup;
pub mod detector;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod normalize;
pub mod watcher;

pub use aggregator::{OpenOptions, SessionAggregator, SessionHandle, TerminalResult, TranscriptView};
pub use bus::{LocalBus, Transport};
pub use config::AggregatorConfig;
