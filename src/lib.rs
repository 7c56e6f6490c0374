// Public API for integration tests and the server binary

pub mod api;
pub mod app;
pub mod authorization;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod state;
pub mod types;
pub mod ws;
