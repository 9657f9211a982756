//! Bacheca: a shared classroom whiteboard with optimistic local edits
//! reconciled against a realtime change feed.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod join_link;
pub mod services;
pub mod store;
pub mod types;
