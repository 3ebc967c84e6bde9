//! # Farmhand Core
//!
//! Shared, I/O-free logic for Farmhand: wiki page models, chunking,
//! the retrieval store abstraction, the embedding trait, and the crop
//! planning calculator.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem access. Every
//! function here is driven by data handed to it by the `farmhand` app
//! crate, which owns crawling, persistence, and serving.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod planner;
pub mod store;
