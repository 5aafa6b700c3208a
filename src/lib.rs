//! Vitrine - product image prefetching for storefront catalogs
//!
//! Vitrine warms a content-addressed image cache in the background, lets
//! user-visible images jump the queue, and retries failures up to a ceiling,
//! keeping a durable ledger of what is cached across sessions.

pub mod adapter;
pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod ledger;
pub mod resource;
pub mod scheduler;
pub mod viewport;

pub use error::{Result, VitrineError};
