// Infrastructure layer - configuration, persistence and renderer adapters
pub mod config;
pub mod legend_store;
pub mod memory_renderer;
