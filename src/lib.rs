// Real-time vitals charting pipeline - decimation, incremental appends and frame batching
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
