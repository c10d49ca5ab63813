// Renderer traits - the only way the pipeline touches a rendering surface
use crate::domain::chart::{ChartConfiguration, LegendPatch, TimeAxis};
use crate::domain::error::RenderError;
use crate::domain::telemetry::TimeSeriesPoint;

/// Narrow, append-only view of a renderer. This is all the incremental
/// appender is ever handed.
pub trait SeriesSink {
    /// Series names in the renderer's current order.
    fn series_names(&self) -> Result<Vec<String>, RenderError>;

    /// Append one point to the series at `series_index`.
    fn append_point(
        &mut self,
        series_index: usize,
        point: TimeSeriesPoint,
    ) -> Result<(), RenderError>;
}

/// Full renderer handle, owned exclusively by one chart controller.
///
/// The three kinds of mutation have different blast radii on interaction
/// state: `initialize` replaces everything, `append_point` adds data, and the
/// `patch_*`/`clear_series_data` calls reconfigure one aspect in place.
pub trait ChartRenderer: SeriesSink {
    /// Replace the whole configuration. Series data in `configuration` is empty.
    fn initialize(&mut self, configuration: &ChartConfiguration) -> Result<(), RenderError>;

    /// Move the time axis bounds only.
    fn patch_time_axis(&mut self, axis: &TimeAxis) -> Result<(), RenderError>;

    /// Update series visibility and threshold markers only.
    fn patch_legend(&mut self, patch: &LegendPatch) -> Result<(), RenderError>;

    /// Drop a series' data, keeping its configuration.
    fn clear_series_data(&mut self, series_index: usize) -> Result<(), RenderError>;

    /// Release the rendering surface. Must tolerate repeated calls.
    fn dispose(&mut self);
}
