// Decimator - bounded per-channel reduction of a windowed sample sequence
use crate::domain::chart::MINUTE_MS;
use crate::domain::error::ChartError;
use crate::domain::series::SeriesDescriptor;
use crate::domain::telemetry::{Sample, TimeSeriesPoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reduction policy applied once a channel exceeds `max_points`.
///
/// `Stride` keeps every `ceil(n / max_points)`-th point. It is cheap and
/// predictable but does not preserve local extrema; `Lttb` does, at a higher
/// cost per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimationStrategy {
    #[default]
    Stride,
    /// Mean value at the middle timestamp of each bucket.
    Bucket,
    /// Largest-triangle-three-buckets.
    Lttb,
}

/// Per-channel decimated series plus point counts before and after reduction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecimatedView {
    pub series: BTreeMap<String, Vec<TimeSeriesPoint>>,
    pub original_counts: BTreeMap<String, usize>,
    pub decimated_counts: BTreeMap<String, usize>,
}

impl DecimatedView {
    pub fn points(&self, key: &str) -> &[TimeSeriesPoint] {
        self.series.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn total_points(&self) -> usize {
        self.decimated_counts.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decimator {
    max_points: usize,
    strategy: DecimationStrategy,
}

impl Default for Decimator {
    fn default() -> Self {
        Self {
            max_points: 1_000,
            strategy: DecimationStrategy::Stride,
        }
    }
}

impl Decimator {
    pub fn new(max_points: usize, strategy: DecimationStrategy) -> Result<Self, ChartError> {
        if max_points == 0 {
            return Err(ChartError::InvalidMaxPoints);
        }
        Ok(Self {
            max_points,
            strategy,
        })
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    pub fn strategy(&self) -> DecimationStrategy {
        self.strategy
    }

    /// Keeps samples with `timestamp >= now - window`, extracts each charted
    /// channel as rounded points and reduces every channel to at most
    /// `max_points`. Pure: same inputs, same output.
    pub fn decimate(
        &self,
        samples: &[Sample],
        descriptors: &[SeriesDescriptor],
        window_minutes: u32,
        now_ms: i64,
    ) -> DecimatedView {
        let window_start = now_ms - i64::from(window_minutes) * MINUTE_MS;
        let windowed: Vec<&Sample> = samples
            .iter()
            .filter(|s| s.timestamp_ms >= window_start)
            .collect();

        let mut view = DecimatedView::default();
        for descriptor in descriptors.iter().filter(|d| d.is_charted()) {
            let raw = extract_channel(&windowed, &descriptor.key);
            view.original_counts.insert(descriptor.key.clone(), raw.len());
            let reduced = self.reduce(raw);
            view.decimated_counts
                .insert(descriptor.key.clone(), reduced.len());
            view.series.insert(descriptor.key.clone(), reduced);
        }
        view
    }

    /// Reduce an already extracted, strictly increasing series.
    pub fn reduce(&self, points: Vec<TimeSeriesPoint>) -> Vec<TimeSeriesPoint> {
        if points.len() <= self.max_points {
            return points;
        }
        match self.strategy {
            DecimationStrategy::Stride => stride(&points, self.max_points),
            DecimationStrategy::Bucket => bucket_average(&points, self.max_points),
            DecimationStrategy::Lttb => lttb(&points, self.max_points),
        }
    }
}

/// Rounded `(timestamp, value)` pairs for one channel. Absent and non-finite
/// values are skipped, as is any sample that would not strictly advance time.
fn extract_channel(samples: &[&Sample], key: &str) -> Vec<TimeSeriesPoint> {
    let mut points: Vec<TimeSeriesPoint> = Vec::new();
    for sample in samples {
        let Some(value) = sample.value(key) else {
            continue;
        };
        if points
            .last()
            .is_some_and(|last| sample.timestamp_ms <= last.time_ms)
        {
            continue;
        }
        points.push(TimeSeriesPoint::new(sample.timestamp_ms, value.round()));
    }
    points
}

fn stride(points: &[TimeSeriesPoint], max_points: usize) -> Vec<TimeSeriesPoint> {
    let step = points.len().div_ceil(max_points);
    points.iter().step_by(step).copied().collect()
}

fn bucket_average(points: &[TimeSeriesPoint], max_points: usize) -> Vec<TimeSeriesPoint> {
    let bucket_size = points.len().div_ceil(max_points);
    points
        .chunks(bucket_size)
        .map(|chunk| {
            let mid = chunk[chunk.len() / 2];
            let mean = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;
            TimeSeriesPoint::new(mid.time_ms, mean.round())
        })
        .collect()
}

fn lttb(points: &[TimeSeriesPoint], threshold: usize) -> Vec<TimeSeriesPoint> {
    let n = points.len();
    if threshold < 3 {
        return stride(points, threshold);
    }

    let every = (n - 2) as f64 / (threshold - 2) as f64;
    let origin = points[0].time_ms;
    let x = |p: &TimeSeriesPoint| (p.time_ms - origin) as f64;

    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(points[0]);
    let mut a = 0usize;

    for i in 0..threshold - 2 {
        let avg_start = ((((i + 1) as f64) * every).floor() as usize + 1).min(n - 1);
        let avg_end = ((((i + 2) as f64) * every).floor() as usize + 1).clamp(avg_start + 1, n);
        let avg = &points[avg_start..avg_end];
        let avg_x = avg.iter().map(x).sum::<f64>() / avg.len() as f64;
        let avg_y = avg.iter().map(|p| p.value).sum::<f64>() / avg.len() as f64;

        let range_start = (((i as f64) * every).floor() as usize + 1).max(a + 1);
        let range_end = ((((i + 1) as f64) * every).floor() as usize + 1)
            .clamp(range_start + 1, n - 1);

        let (ax, ay) = (x(&points[a]), points[a].value);
        let mut best = range_start;
        let mut best_area = f64::NEG_INFINITY;
        for (offset, candidate) in points[range_start..range_end].iter().enumerate() {
            let area = ((ax - avg_x) * (candidate.value - ay) - (ax - x(candidate)) * (avg_y - ay))
                .abs()
                * 0.5;
            if area > best_area {
                best_area = area;
                best = range_start + offset;
            }
        }
        sampled.push(points[best]);
        a = best;
    }

    sampled.push(points[n - 1]);
    sampled
}

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    raw_len: usize,
    /// A full ring keeps its length, so the newest timestamp is part of the key.
    last_timestamp_ms: Option<i64>,
    window_minutes: u32,
    max_points: usize,
    strategy: DecimationStrategy,
    channels: Vec<String>,
    now_ms: i64,
}

/// Memoises the most recent decimation. Callers wanting hits across calls
/// should quantise `now_ms`.
#[derive(Debug, Default)]
pub struct DecimationCache {
    key: Option<CacheKey>,
    view: DecimatedView,
    hits: u64,
    misses: u64,
}

impl DecimationCache {
    pub fn get_or_compute(
        &mut self,
        decimator: &Decimator,
        samples: &[Sample],
        descriptors: &[SeriesDescriptor],
        window_minutes: u32,
        now_ms: i64,
    ) -> &DecimatedView {
        let key = CacheKey {
            raw_len: samples.len(),
            last_timestamp_ms: samples.last().map(|s| s.timestamp_ms),
            window_minutes,
            max_points: decimator.max_points(),
            strategy: decimator.strategy(),
            channels: descriptors.iter().map(|d| d.key.clone()).collect(),
            now_ms,
        };
        if self.key.as_ref() == Some(&key) {
            self.hits += 1;
        } else {
            self.view = decimator.decimate(samples, descriptors, window_minutes, now_ms);
            self.key = Some(key);
            self.misses += 1;
        }
        &self.view
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.view = DecimatedView::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::DisplayMode;

    const NOW: i64 = 100 * MINUTE_MS;

    fn heart_rate() -> Vec<SeriesDescriptor> {
        vec![SeriesDescriptor::new("heartRate", "Heart Rate", "basicVitals", "#f00")]
    }

    fn dense_samples(count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| {
                let t = NOW - (count - i) as i64 * 100;
                Sample::new(t).with("heartRate", 60.0 + (i % 40) as f64 + 0.4)
            })
            .collect()
    }

    fn assert_strictly_increasing(points: &[TimeSeriesPoint]) {
        assert!(
            points.windows(2).all(|w| w[0].time_ms < w[1].time_ms),
            "timestamps must strictly increase"
        );
    }

    #[test]
    fn test_zero_max_points_rejected() {
        assert_eq!(
            Decimator::new(0, DecimationStrategy::Stride),
            Err(ChartError::InvalidMaxPoints)
        );
    }

    #[test]
    fn test_decimation_bound_for_every_strategy() {
        let samples = dense_samples(1_003);
        for strategy in [
            DecimationStrategy::Stride,
            DecimationStrategy::Bucket,
            DecimationStrategy::Lttb,
        ] {
            for max_points in [1, 2, 3, 7, 100, 500, 1_002] {
                let decimator = Decimator::new(max_points, strategy).unwrap();
                let view = decimator.decimate(&samples, &heart_rate(), 60, NOW);
                let points = view.points("heartRate");
                assert!(
                    points.len() <= max_points,
                    "{strategy:?} with {max_points} produced {}",
                    points.len()
                );
                assert!(!points.is_empty());
                assert_strictly_increasing(points);
                assert_eq!(view.original_counts["heartRate"], 1_003);
            }
        }
    }

    #[test]
    fn test_identity_when_under_bound() {
        let samples = dense_samples(50);
        let decimator = Decimator::new(50, DecimationStrategy::Lttb).unwrap();

        let view = decimator.decimate(&samples, &heart_rate(), 60, NOW);

        let expected: Vec<TimeSeriesPoint> = samples
            .iter()
            .map(|s| TimeSeriesPoint::new(s.timestamp_ms, s.values["heartRate"].round()))
            .collect();
        assert_eq!(view.points("heartRate"), expected.as_slice());
    }

    #[test]
    fn test_stride_keeps_every_step_th_sample() {
        let points: Vec<TimeSeriesPoint> =
            (0..10).map(|i| TimeSeriesPoint::new(i, i as f64)).collect();
        let decimator = Decimator::new(4, DecimationStrategy::Stride).unwrap();

        let reduced = decimator.reduce(points);

        let times: Vec<i64> = reduced.iter().map(|p| p.time_ms).collect();
        assert_eq!(times, vec![0, 3, 6, 9]);
    }

    #[test]
    fn test_bucket_uses_middle_timestamp_and_mean() {
        let points: Vec<TimeSeriesPoint> =
            (0..6).map(|i| TimeSeriesPoint::new(i * 10, i as f64)).collect();
        let decimator = Decimator::new(2, DecimationStrategy::Bucket).unwrap();

        let reduced = decimator.reduce(points);

        assert_eq!(
            reduced,
            vec![TimeSeriesPoint::new(10, 1.0), TimeSeriesPoint::new(40, 4.0)]
        );
    }

    #[test]
    fn test_lttb_keeps_spike() {
        let mut points: Vec<TimeSeriesPoint> =
            (0..200).map(|i| TimeSeriesPoint::new(i, 70.0)).collect();
        points[101].value = 180.0;
        let decimator = Decimator::new(20, DecimationStrategy::Lttb).unwrap();

        let reduced = decimator.reduce(points);

        assert_eq!(reduced.len(), 20);
        assert!(reduced.iter().any(|p| p.value == 180.0));
        assert_eq!(reduced.first().map(|p| p.time_ms), Some(0));
        assert_eq!(reduced.last().map(|p| p.time_ms), Some(199));
    }

    #[test]
    fn test_window_filter_and_missing_channels() {
        let samples = vec![
            Sample::new(NOW - 11 * MINUTE_MS).with("heartRate", 50.0),
            Sample::new(NOW - 9 * MINUTE_MS).with("heartRate", 71.6),
            Sample::new(NOW - 8 * MINUTE_MS).with("heartRate", f64::NAN),
            Sample::new(NOW - 7 * MINUTE_MS).with("spo2", 97.0),
        ];
        let descriptors = vec![
            SeriesDescriptor::new("heartRate", "Heart Rate", "g", "#f00"),
            SeriesDescriptor::new("sdnn", "SDNN", "g", "#0f0"),
            SeriesDescriptor::new("spo2", "SpO2", "g", "#00f").display_mode(DisplayMode::Hidden),
        ];
        let decimator = Decimator::new(100, DecimationStrategy::Stride).unwrap();

        let view = decimator.decimate(&samples, &descriptors, 10, NOW);

        assert_eq!(
            view.points("heartRate"),
            &[TimeSeriesPoint::new(NOW - 9 * MINUTE_MS, 72.0)]
        );
        assert!(view.points("sdnn").is_empty());
        assert_eq!(view.original_counts["sdnn"], 0);
        assert!(!view.series.contains_key("spo2"));
    }

    #[test]
    fn test_empty_window() {
        let decimator = Decimator::new(10, DecimationStrategy::Stride).unwrap();
        let view = decimator.decimate(&[], &heart_rate(), 5, NOW);
        assert!(view.points("heartRate").is_empty());
        assert_eq!(view.total_points(), 0);
    }

    #[test]
    fn test_duplicate_timestamps_dropped() {
        let samples = vec![
            Sample::new(NOW - 3).with("heartRate", 70.0),
            Sample::new(NOW - 3).with("heartRate", 71.0),
            Sample::new(NOW - 4).with("heartRate", 72.0),
            Sample::new(NOW - 1).with("heartRate", 73.0),
        ];
        let decimator = Decimator::new(10, DecimationStrategy::Stride).unwrap();

        let view = decimator.decimate(&samples, &heart_rate(), 1, NOW);

        assert_eq!(
            view.points("heartRate"),
            &[
                TimeSeriesPoint::new(NOW - 3, 70.0),
                TimeSeriesPoint::new(NOW - 1, 73.0)
            ]
        );
    }

    #[test]
    fn test_cache_hits_on_same_inputs() {
        let samples = dense_samples(300);
        let decimator = Decimator::new(100, DecimationStrategy::Stride).unwrap();
        let mut cache = DecimationCache::default();

        let first = cache
            .get_or_compute(&decimator, &samples, &heart_rate(), 60, NOW)
            .clone();
        let second = cache
            .get_or_compute(&decimator, &samples, &heart_rate(), 60, NOW)
            .clone();
        assert_eq!(first, second);
        assert_eq!((cache.hits(), cache.misses()), (1, 1));

        cache.get_or_compute(&decimator, &samples, &heart_rate(), 30, NOW);
        assert_eq!(cache.misses(), 2);
    }
}
