//! iconpipe-scheduler: rate-limited admission of remote lookups.
//!
//! Every remote call in the process goes through one `RequestScheduler`.
//! A single admission loop decides, under one lock, which queued request
//! runs next:
//!
//! - Background requests are paced FIFO at `window / quota` and never
//!   admitted while the sliding window is full.
//! - Priority requests skip the window wait and run concurrently up to a
//!   ceiling, a few milliseconds apart.
//! - A `QuotaExceeded` response clears the window, pauses all admission
//!   with doubling backoff and puts the request back at the front of its
//!   lane.
//!
//! # Architecture
//!
//! ```text
//! submit() ──► SchedulerState ◄── admission loop ──► spawned IconSource call
//!                 ├── priority queue                        │
//!                 ├── background queue                      │
//!                 └── SlidingWindow      ◄── completion ────┘
//! ```

pub mod error;
pub mod scheduler;
pub mod window;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{RequestScheduler, ResolutionRequest, SchedulerSnapshot};
pub use window::SlidingWindow;
