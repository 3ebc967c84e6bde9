//! # farmhand
//!
//! A Stardew Valley game-help assistant. It crawls the community wiki,
//! indexes the pages into a vector store, plans crop plantings from the
//! indexed data, and answers questions through an LLM agent that can
//! reply in terse hints or full walkthroughs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌────────────┐   ┌──────────┐
//! │  Wiki    │──▶│  Crawler  │──▶│ pages.json │──▶│  Index   │
//! │  (HTTP)  │   │ +Extractor│   └────────────┘   │ Chunk+Emb│
//! └──────────┘   └───────────┘                    └────┬─────┘
//!                                                      │ SQLite
//!                                 ┌────────────────────┤
//!                                 ▼                    ▼
//!                           ┌──────────┐         ┌──────────┐
//!                           │ Retriever│◀────────│  Agent   │◀── HTTP API
//!                           │ +Planner │  tools  │ +Session │
//!                           └──────────┘         └──────────┘
//! ```
//!
//! Pure logic (models, chunker, store trait, hashing embedder, planner)
//! lives in the `farmhand-core` crate. This crate adds I/O: HTTP, SQLite,
//! files, the LLM client and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! farmhand init
//! farmhand crawl --max-pages 100
//! farmhand index
//! farmhand search "parsnip seeds"
//! farmhand plan Wheat 1000 summer
//! farmhand serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`crawl`] | BFS frontier, fetcher, crawl loop |
//! | [`extract`] | Wiki HTML to page records and links |
//! | [`pages`] | Pages JSON file |
//! | [`ingest`] | Index pipeline: chunk, embed, store |
//! | [`embedding`] | Embedding providers (hashing, OpenAI) |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`search`] | Retriever, context formatting, crop plans |
//! | [`llm`] | Chat model abstraction and providers |
//! | [`tools`] | Agent tools and registry |
//! | [`agent`] | Modes, sessions, tool-calling loop |
//! | [`server`] | HTTP chat API |
//! | [`stats`] | Index statistics |
//! | [`progress`] | CLI progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod agent;
pub mod config;
pub mod crawl;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod pages;
pub mod progress;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod tools;
