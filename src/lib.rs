// Public API - data types, engine and reporting
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod probe;
pub mod range;
pub mod state;
