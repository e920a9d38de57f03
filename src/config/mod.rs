//! Configuration module for histmine
//!
//! Per-repository grab settings live in one TOML file, keyed by
//! repository name.

mod grabber_config;

pub use grabber_config::{parse_date, ConfigStore, GrabberConfig, CONFIG_ENV};
