//! The seam between the scheduler and whatever answers lookups.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use iconpipe_core::{CancelToken, ItemId, ResolutionOutcome};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Resolves one identifier per call.
///
/// Implementations must return `Cancelled` promptly once `cancel` fires
/// and must not retry internally.
pub trait IconSource: Send + Sync {
    fn resolve(&self, id: ItemId, cancel: CancelToken) -> BoxFuture<'_, ResolutionOutcome>;
}

impl<S> IconSource for Arc<S>
where
    S: IconSource + ?Sized,
{
    fn resolve(&self, id: ItemId, cancel: CancelToken) -> BoxFuture<'_, ResolutionOutcome> {
        (**self).resolve(id, cancel)
    }
}
