//! Data models: configuration, documents and invoice records.

pub mod config;
pub mod document;
pub mod invoice;
