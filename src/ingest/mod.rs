pub mod aggregator;
pub mod tailer;

pub use aggregator::Aggregator;
pub use tailer::Tailer;
