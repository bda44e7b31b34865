//! Everything the operator keeps in sync inside a running Graylog.

pub mod accounts;
pub mod api;
pub mod assets;
pub mod connector;
pub mod content;
pub mod inputs;
pub mod streams;
pub mod sync;

pub use connector::{ConnectorFactory, HttpConnectorFactory};
pub use sync::{synchronize, Plan, Session};
