pub mod config;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod model;
pub mod platform;
pub mod registry;
pub mod runner;
pub mod sandbox;
pub mod server;
pub mod shutdown;
pub mod verifier;
pub mod webhook;
