pub mod bins;
pub mod config;
pub mod counter;
pub mod daemon;
pub mod job;
pub mod metrics;
pub mod sink;
pub mod source;
pub mod state;
