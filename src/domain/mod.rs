// Domain layer - channel descriptions, samples and chart configuration models
pub mod chart;
pub mod error;
pub mod legend;
pub mod series;
pub mod telemetry;
