// Presentation layer - host-facing event decoding and telemetry reports
pub mod telemetry;
pub mod ui_events;
