//! HTTP request handlers.

pub mod links;
pub mod sync;
