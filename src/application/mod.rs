// Application layer - streaming pipeline components and the chart session
pub mod appender;
pub mod chart_mode;
pub mod clock;
pub mod decimator;
pub mod history;
pub mod legend_store;
pub mod lifecycle;
pub mod option_builder;
pub mod renderer;
pub mod scheduler;
pub mod session;
