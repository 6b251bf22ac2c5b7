//! A minimal Redis-compatible key-value server. Strings and hashes live in memory and every
//! mutating command is appended to a log that is replayed on startup.

pub mod aof;
pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod frame;
pub mod server;
pub mod store;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
