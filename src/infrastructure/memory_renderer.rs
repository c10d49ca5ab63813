// In-memory renderer - headless rendering surface with failure injection
use crate::application::renderer::{ChartRenderer, SeriesSink};
use crate::domain::chart::{ChartConfiguration, LegendPatch, TimeAxis};
use crate::domain::error::RenderError;
use crate::domain::telemetry::TimeSeriesPoint;
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSeries {
    pub name: String,
    pub visible: bool,
    pub points: Vec<TimeSeriesPoint>,
}

/// Everything the surface currently shows plus call counters.
#[derive(Debug, Default)]
pub struct Surface {
    pub configuration: Option<ChartConfiguration>,
    pub series: Vec<RenderedSeries>,
    pub time_axis: Option<TimeAxis>,
    pub legend_selected: BTreeMap<String, bool>,
    /// User zoom range. Only a full initialisation resets it.
    pub zoom: Option<(i64, i64)>,
    pub initializations: u32,
    pub axis_patches: u32,
    pub legend_patches: u32,
    pub appends: u64,
    pub clears: u32,
    pub disposals: u32,
    pub disposed: bool,
    fail_initializations: u32,
    fail_appends: u32,
}

/// Cheap to clone; clones share one surface, so a test can keep a handle
/// while the controller owns the renderer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRenderer {
    label: String,
    surface: Rc<RefCell<Surface>>,
}

impl InMemoryRenderer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            surface: Rc::default(),
        }
    }

    pub fn surface(&self) -> Ref<'_, Surface> {
        self.surface.borrow()
    }

    pub fn points(&self, series_name: &str) -> Vec<TimeSeriesPoint> {
        self.surface
            .borrow()
            .series
            .iter()
            .find(|s| s.name == series_name)
            .map(|s| s.points.clone())
            .unwrap_or_default()
    }

    pub fn total_points(&self) -> usize {
        self.surface.borrow().series.iter().map(|s| s.points.len()).sum()
    }

    pub fn set_zoom(&self, range: (i64, i64)) {
        self.surface.borrow_mut().zoom = Some(range);
    }

    pub fn fail_next_initializations(&self, count: u32) {
        self.surface.borrow_mut().fail_initializations = count;
    }

    pub fn fail_next_appends(&self, count: u32) {
        self.surface.borrow_mut().fail_appends = count;
    }

    fn ready(surface: &Surface) -> Result<(), RenderError> {
        if surface.disposed {
            return Err(RenderError::Disposed);
        }
        if surface.configuration.is_none() {
            return Err(RenderError::NotReady);
        }
        Ok(())
    }
}

fn series_slot(
    surface: &mut Surface,
    series_index: usize,
) -> Result<&mut RenderedSeries, RenderError> {
    let len = surface.series.len();
    surface
        .series
        .get_mut(series_index)
        .ok_or(RenderError::SeriesOutOfRange {
            index: series_index,
            len,
        })
}

impl SeriesSink for InMemoryRenderer {
    fn series_names(&self) -> Result<Vec<String>, RenderError> {
        let surface = self.surface.borrow();
        Self::ready(&surface)?;
        Ok(surface.series.iter().map(|s| s.name.clone()).collect())
    }

    fn append_point(
        &mut self,
        series_index: usize,
        point: TimeSeriesPoint,
    ) -> Result<(), RenderError> {
        let mut surface = self.surface.borrow_mut();
        Self::ready(&surface)?;
        if surface.fail_appends > 0 {
            surface.fail_appends -= 1;
            return Err(RenderError::Backend("injected append failure".into()));
        }
        let retention = surface
            .configuration
            .as_ref()
            .map_or(usize::MAX, |c| c.max_points_per_series.max(1));
        let points = &mut series_slot(&mut surface, series_index)?.points;
        points.push(point);
        if points.len() > retention {
            let excess = points.len() - retention;
            points.drain(..excess);
        }
        surface.appends += 1;
        Ok(())
    }
}

impl ChartRenderer for InMemoryRenderer {
    fn initialize(&mut self, configuration: &ChartConfiguration) -> Result<(), RenderError> {
        let mut surface = self.surface.borrow_mut();
        if surface.disposed {
            return Err(RenderError::Disposed);
        }
        if surface.fail_initializations > 0 {
            surface.fail_initializations -= 1;
            return Err(RenderError::Backend("injected initialisation failure".into()));
        }

        surface.series = configuration
            .series
            .iter()
            .map(|entry| RenderedSeries {
                name: entry.name.clone(),
                visible: entry.visible,
                points: entry.data.clone(),
            })
            .collect();
        surface.time_axis = Some(configuration.time_axis);
        surface.legend_selected = configuration.legend_selected.clone();
        surface.zoom = None;
        surface.configuration = Some(configuration.clone());
        surface.initializations += 1;

        tracing::debug!(
            "Renderer {} initialised with {} series",
            self.label,
            surface.series.len()
        );
        Ok(())
    }

    fn patch_time_axis(&mut self, axis: &TimeAxis) -> Result<(), RenderError> {
        let mut surface = self.surface.borrow_mut();
        Self::ready(&surface)?;
        surface.time_axis = Some(*axis);
        surface.axis_patches += 1;
        Ok(())
    }

    fn patch_legend(&mut self, patch: &LegendPatch) -> Result<(), RenderError> {
        let mut surface = self.surface.borrow_mut();
        Self::ready(&surface)?;
        for item in &patch.series {
            series_slot(&mut surface, item.series_index)?.visible = item.visible;
        }
        surface.legend_selected = patch.selected.clone();
        surface.legend_patches += 1;
        Ok(())
    }

    fn clear_series_data(&mut self, series_index: usize) -> Result<(), RenderError> {
        let mut surface = self.surface.borrow_mut();
        Self::ready(&surface)?;
        series_slot(&mut surface, series_index)?.points.clear();
        surface.clears += 1;
        Ok(())
    }

    fn dispose(&mut self) {
        let mut surface = self.surface.borrow_mut();
        surface.disposals += 1;
        if surface.disposed {
            return;
        }
        surface.disposed = true;
        surface.series.clear();
        surface.configuration = None;
        tracing::debug!("Renderer {} disposed", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::option_builder::{build_configuration, BuildOptions};
    use crate::domain::legend::LegendState;
    use crate::domain::series::SeriesRegistry;

    fn configuration() -> ChartConfiguration {
        let registry = SeriesRegistry::default_vitals();
        build_configuration(
            registry.descriptors(),
            &LegendState::defaults(&registry),
            &BuildOptions {
                window_minutes: 10,
                now_ms: 0,
                incremental_update: true,
                max_points_per_series: 3,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_calls_before_initialise_are_not_ready() {
        let mut renderer = InMemoryRenderer::new("test");

        assert_eq!(renderer.series_names(), Err(RenderError::NotReady));
        assert_eq!(
            renderer.append_point(0, TimeSeriesPoint::new(1, 1.0)),
            Err(RenderError::NotReady)
        );
    }

    #[test]
    fn test_out_of_range_append_rejected() {
        let mut renderer = InMemoryRenderer::new("test");
        renderer.initialize(&configuration()).unwrap();
        let len = renderer.surface().series.len();

        assert_eq!(
            renderer.append_point(len, TimeSeriesPoint::new(1, 1.0)),
            Err(RenderError::SeriesOutOfRange { index: len, len })
        );
    }

    #[test]
    fn test_axis_patch_keeps_zoom_but_initialise_resets_it() {
        let mut renderer = InMemoryRenderer::new("test");
        renderer.initialize(&configuration()).unwrap();
        renderer.set_zoom((10, 20));

        renderer
            .patch_time_axis(&TimeAxis::anchored(5_000, 5))
            .unwrap();
        assert_eq!(renderer.surface().zoom, Some((10, 20)));

        renderer.initialize(&configuration()).unwrap();
        assert_eq!(renderer.surface().zoom, None);
    }

    #[test]
    fn test_retention_drops_oldest_points() {
        let mut renderer = InMemoryRenderer::new("test");
        renderer.initialize(&configuration()).unwrap();

        for t in 0..5 {
            renderer.append_point(0, TimeSeriesPoint::new(t, 70.0)).unwrap();
        }

        let name = renderer.surface().series[0].name.clone();
        let times: Vec<i64> = renderer.points(&name).iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![2, 3, 4]);
        assert_eq!(renderer.surface().appends, 5);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut renderer = InMemoryRenderer::new("test");
        renderer.initialize(&configuration()).unwrap();

        renderer.dispose();
        renderer.dispose();

        assert!(renderer.surface().disposed);
        assert_eq!(renderer.surface().disposals, 2);
        assert_eq!(renderer.series_names(), Err(RenderError::Disposed));
    }
}
