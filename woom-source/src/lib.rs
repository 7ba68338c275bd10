//! Inputs for Woom - decoding, scratch storage, and configuration

mod config;
mod loader;
mod scratch;

pub use config::{
    parse_pool_size, parse_timeout, ConfigError, MixerConfig, ENV_BATCH_TIMEOUT, ENV_POOL_SIZE,
    MAX_POOL_SIZE,
};
pub use loader::{ChannelLayout, LoadError, TrackLoader};
pub use scratch::ScratchSpace;
