//! PDFScope server library — indexing pipeline, full-text search,
//! response cache, and HTTP API.

pub mod ai;
pub mod api;
pub mod cache;
pub mod clean;
pub mod db;
pub mod error;
pub mod index;
pub mod pdf;
pub mod search;
