//! Local TCP control bridge for `messaging-agent`.
//!
//! Exposes the Channel API/Session surface over a line-delimited JSON
//! protocol on `127.0.0.1` so non-Rust host processes can drive a session
//! without linking the library directly.

pub mod connection;
pub mod protocol;
