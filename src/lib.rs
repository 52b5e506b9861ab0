pub mod auth;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod fixtures;
pub mod geo;
pub mod limits;
pub mod mcp;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod time;
pub mod tls;
pub mod tools;
pub mod wal;
pub mod wire;
