pub mod auth;
pub mod builder;
pub mod cli;
pub mod config;
pub mod constants;
pub mod docker;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod platform;
pub mod reference;
pub mod registry;
pub mod report;
pub mod service;
pub mod ticket;

pub use error::{PorterError, Result};
