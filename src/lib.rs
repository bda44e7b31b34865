pub mod apply;
pub mod common;
pub mod components;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod graylog;
pub mod loggingservice_types;
pub mod manifests;
pub mod migration;
pub mod platform;
pub mod readiness;
pub mod secret_watcher;
pub mod status;
pub mod waiter;

#[cfg(test)]
mod testing;

pub use crate::error::Error;
