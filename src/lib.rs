//! EcoCatalyst application: configuration, the SQLite local store, CLI
//! sessions and the reference sync server.

pub mod config;
pub mod db;
pub mod server;
pub mod session;
