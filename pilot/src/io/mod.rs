//! I/O for pilot commands: configuration, model access, perception and effectors.

pub mod config;
pub mod desktop;
pub mod effector;
pub mod executor;
pub mod generator;
pub mod model;
pub mod pause;
pub mod perception;
pub mod process;
pub mod prompt;
pub mod webdriver;
