//! iconpipe-loader: per-consumer icon loading.
//!
//! `IconPipeline` owns the resolution cache and the request scheduler.
//! Each `request_resolution` call spawns a small controller task that
//! walks one identifier through
//!
//! ```text
//! Idle ─► Scheduled ─► Resolving ─┬─► Success ──render failure──► Fallback(0)
//!                         ▲       ├─► Fallback(i) ──render failure──► Fallback(i+1)
//!                         │       └─► Failed
//!                         └── transient / fallbacks exhausted (bounded)
//! ```
//!
//! and reports every state to the consumer's `Subscription`.

pub mod controller;
pub mod error;
pub mod pipeline;
pub mod state;

pub use controller::Subscription;
pub use error::{LoadError, LoadResult};
pub use pipeline::{IconPipeline, PipelineSnapshot};
pub use state::{Decision, LoadController, LoadState, RetryPolicy};
