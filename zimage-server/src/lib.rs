pub mod batch;
pub mod config;
pub mod http;
pub mod telemetry;
