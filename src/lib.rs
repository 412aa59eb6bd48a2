//! Job Mail Monitor: periodic job-related email digests that never repeat.

pub mod classifier;
pub mod config;
pub mod error;
pub mod mail;
pub mod monitor;
pub mod notify;
pub mod tracker;
