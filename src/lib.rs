// Library surface for headless/integration tests and reuse.
// The binary in main.rs only adds argument parsing and terminal setup.
pub mod app;
pub mod app_dirs;
pub mod combat_log;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod history;
pub mod host;
pub mod runtime;
pub mod store;
pub mod timeline;
pub mod timer;
pub mod tracker;
pub mod ui;
pub mod verdict;
