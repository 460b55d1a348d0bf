use crate::services::{
    listing_fetcher::ListingFetcher,
    notifier::BroadcastNotifier,
    pagination::{Limits, PaginationController},
    store::BucketStore,
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: PaginationController,
    pub notifier: BroadcastNotifier,
}

impl AppState {
    /// Wire a controller to `notifier` so cap notices reach the event stream.
    pub fn new(
        store: BucketStore,
        fetcher: ListingFetcher,
        notifier: BroadcastNotifier,
        limits: Limits,
    ) -> Self {
        let controller =
            PaginationController::new(store, fetcher, Arc::new(notifier.clone()), limits);
        Self {
            controller,
            notifier,
        }
    }

    pub fn store(&self) -> &BucketStore {
        self.controller.store()
    }
}
