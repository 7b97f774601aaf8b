pub mod commands;
pub mod config;
pub mod gateway;
pub mod k8s;
pub mod manifest;
pub mod telemetry;
pub mod workload;
pub mod yaml;
