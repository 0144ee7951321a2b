//! corral-core: configuration shared by the Corral crates.
//!
//! The facade and the `corrald` binary read a single `corral.toml`. Every
//! section is optional; missing values fall back to the defaults documented
//! on [`CorralConfig`].

pub mod config;
pub mod duration;

pub use config::{CoordinatorSection, CorralConfig, HealthSection, LocksSection, LogSection, StoreSection};
pub use duration::parse_duration;
