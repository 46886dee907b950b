//! iconpipe-core: shared vocabulary for the icon resolution pipeline.
//!
//! Everything the other crates agree on lives here: the item identifier,
//! the outcome taxonomy, the cooperative cancellation token, the pure
//! fallback URL derivation, and the TOML configuration model.

pub mod cancel;
pub mod config;
pub mod fallback;
pub mod types;

pub use cancel::CancelToken;
pub use config::{
    ClientConfig, ConfigError, ConfigResult, FallbackConfig, LoaderConfig, PipelineConfig,
    SchedulerConfig, parse_duration,
};
pub use fallback::FallbackScheme;
pub use types::*;
