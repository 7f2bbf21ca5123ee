pub mod config;
pub mod db;
pub mod errors;
pub mod http;
pub mod mcp;
pub mod types;
