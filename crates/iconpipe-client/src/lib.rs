//! iconpipe-client: the remote resolution client.
//!
//! Performs exactly one bounded, cancellable lookup per call and
//! classifies the response into a `ResolutionOutcome`. Holds no state
//! between calls and never retries: quota handling belongs to the
//! scheduler, transient retries to the load controller.
//!
//! # Classification
//!
//! ```text
//! 2xx + icon path     → Found(icon_base + path)
//! 2xx + null/empty    → NotFound
//! 2xx + bad body      → Transient
//! 404                 → NotFound
//! 429                 → QuotaExceeded
//! other / io / tls    → Transient
//! timeout             → Transient
//! caller cancelled    → Cancelled
//! ```

pub mod error;
pub mod remote;
pub mod source;
pub mod tls;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ClientError, ClientResult};
pub use remote::{HttpIconClient, classify};
pub use source::{BoxFuture, IconSource};
