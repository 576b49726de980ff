//! Offline-capable caching proxy for web book readers.
//!
//! Every request from the reader is classified and served by one of three
//! strategies: cache-first for chapter content, network-first for the API and
//! stale-while-revalidate for static assets. A side channel lets the reader
//! cache or purge chapters directly.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
