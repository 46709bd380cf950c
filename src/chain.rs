//! Remote chain source: wire types and the HTTP client.

pub mod client;
pub mod types;

pub use client::{ChainClientOptions, ChainError, ChainSource, HttpChainSource};
