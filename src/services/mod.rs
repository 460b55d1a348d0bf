//! Listing pipeline: fetch a page, extract its fields, persist the files and
//! decide whether to go on.

pub mod listing_fetcher;
pub mod notifier;
pub mod pagination;
pub mod store;
pub mod xml_extractor;
