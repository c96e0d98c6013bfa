pub mod cache;
pub mod config;
pub mod constructs;
pub mod errors;
pub mod executor;
pub mod orchestrator;
pub mod server;
pub mod sql;
pub mod storage;
pub mod utils;
