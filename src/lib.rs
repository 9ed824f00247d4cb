// Re-export modules for both the binary and tests
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod export;
pub mod logger;
pub mod parse;
pub mod process;
pub mod registry;
pub mod runtime;
pub mod terminate;
