pub mod cli;
pub mod config;
pub mod controller;
pub mod load_config;
pub mod secrets;

pub use cli::{run, Cli, Commands};
