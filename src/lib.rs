pub mod types;
pub mod error;
pub mod config;
pub mod qr;
pub mod backend;
pub mod store;
pub mod account;
pub mod catalog;
pub mod tier;
pub mod transport;
pub mod push;
pub mod controller;
pub mod scan;
pub mod fake;
pub mod metrics;
pub mod error_handling;
pub mod prometheus_metrics;
pub mod health;
pub mod server;
