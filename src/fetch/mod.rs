//! Fetching remote resources
//!
//! [`Fetcher`] is the transport seam: [`HttpFetcher`] in production, scripted
//! fakes in tests. [`RetryPolicy`] wraps any fetcher with the crawl's
//! unbounded fixed-delay retry rules.

pub mod client;
pub mod retry;

pub use client::{FetchResponse, Fetcher, HttpFetcher};
pub use retry::{RetryPolicy, BAD_GATEWAY};
