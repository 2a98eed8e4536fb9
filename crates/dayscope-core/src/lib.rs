//! # dayscope core
//!
//! Pure logic for date-scoped retrieval over chunked operational reports:
//! data models, metadata inference, chunking, date resolution, BM25
//! ranking, the dense-index and corpus-log traits, and the merge step that
//! enforces date purity.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O.

pub mod chunk;
pub mod dates;
pub mod embedding;
pub mod lexical;
pub mod metadata;
pub mod models;
pub mod search;
pub mod store;
