pub mod cli;
pub mod elastic;
pub mod github;
pub mod load_config;
pub mod queue;

pub use cli::{run, Cli, Commands};
