//! Harvest runner
//!
//! The glue between the configured targets and the control loop: an HTTP
//! fetcher for single pages, a progress tracker and a coordinator that drives
//! a pool of workers.

mod coordinator;
mod fetcher;
mod progress;

pub use coordinator::Harvester;
pub use fetcher::{build_http_client, fetch_page, FetchError, FetchedPage};
pub use progress::{format_eta, RunProgress};
