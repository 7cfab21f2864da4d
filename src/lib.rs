//! # docchat
//!
//! A local-first retrieval-augmented chat service for PDF document
//! collections.
//!
//! docchat ingests PDFs from a documents directory, chunks and embeds them
//! into SQLite (FTS5 + vector BLOBs), and answers natural-language questions
//! over the indexed content through a small web UI and a CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌───────────┐
//! │   Loader   │──▶│  Pipeline   │──▶│  SQLite   │
//! │ PDF pages  │   │ Chunk+Embed │   │ FTS5+Vec  │
//! └────────────┘   └─────────────┘   └────┬──────┘
//!                                         │
//!                     ┌───────────────────┤
//!                     ▼                   ▼
//!                ┌──────────┐       ┌──────────┐
//!                │   CLI    │       │  Web UI  │
//!                │(docchat) │       │  (axum)  │
//!                └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat init                  # create database and directories
//! docchat ingest                # index every PDF in the documents dir
//! docchat search "deployment" --mode hybrid
//! docchat ask "What is covered in chapter 2?"
//! docchat serve                 # start the chat web UI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`loader`] | PDF discovery and per-page text extraction |
//! | [`chunk`] | Page text chunking with deterministic ids |
//! | [`index`] | Corpus indexing (documents, chunks, embeddings) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Completion providers and prompt construction |
//! | [`query`] | Retrieval, hybrid ranking, and answer synthesis |
//! | [`session`] | Signed-cookie chat session state |
//! | [`server`] | Web UI (upload, ask, clear) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod index;
pub mod llm;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod net;
pub mod query;
pub mod server;
pub mod session;
