pub mod config;
pub mod context;
pub mod detection;
pub mod error;
pub mod git;
pub mod host;
pub mod identity;
pub mod logging;
pub mod monitor;
pub mod render;
pub mod setup;
