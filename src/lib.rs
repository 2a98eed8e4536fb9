//! # dayscope
//!
//! Date-scoped hybrid retrieval over chunked operational reports.
//!
//! Uploaded reports are split into date- and unit-tagged chunks and kept
//! in two synchronized views: a BM25 lexical index over a JSONL corpus and
//! a dense embedding index. A question plus a set of calendar dates is
//! answered by one dense + lexical search pair per date; no chunk from a
//! date other than the one requested reaches the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────────────────┐
//! │  Upload  │──▶│  Loader + │──▶│ CorpusIndex            │
//! │ (ingest) │   │  Chunker  │   │ JSONL/BM25 │ Dense idx │
//! └──────────┘   └───────────┘   └──────────┬─────────────┘
//!                                           │
//!      query ──▶ DateResolver ──▶ HybridRetriever (per-date tasks)
//! ```
//!
//! Pure logic (models, chunking, date parsing, BM25, merge) lives in
//! `dayscope_core`; this crate adds the runtime.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | File loaders (pdf, docx, xlsx, csv, json, txt) |
//! | [`embedding`] | Ollama / OpenAI / disabled embedding providers |
//! | [`dense`] | SQLite dense backend and backend selection |
//! | [`qdrant`] | Qdrant dense backend |
//! | [`corpus_log`] | JSONL lexical corpus persistence |
//! | [`corpus`] | Dual-view corpus with compensating writes |
//! | [`records`] | Ingestion record store |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retriever`] | Date-scoped hybrid retriever |
//! | [`search`] | Caller-facing retrieval API |
//! | [`stats`] | Corpus statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod corpus;
pub mod corpus_log;
pub mod db;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod qdrant;
pub mod records;
pub mod retriever;
pub mod search;
pub mod stats;
