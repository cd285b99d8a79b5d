//! Library crate for scan-pilot: one scan at a time, live progress, readable report.
pub mod engine;
pub mod observer;
pub mod orchestrator;
pub mod ports;
pub mod relay;
pub mod report;
pub mod scanner;
pub mod server;
pub mod service;
pub mod targets;
pub mod types;
