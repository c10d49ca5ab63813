// Sample history - bounded ring of recent samples with monotonic cursors
use crate::domain::telemetry::Sample;
use std::collections::VecDeque;

/// Cursor into a [`SampleHistory`]. Marks only move forward within one
/// generation, so keeping the latest mark loses nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryMark {
    pub sequence: u64,
    pub generation: u64,
}

#[derive(Debug)]
pub struct SampleHistory {
    samples: VecDeque<(u64, Sample)>,
    capacity: usize,
    next_sequence: u64,
    generation: u64,
    dropped: u64,
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(4_096)),
            capacity: capacity.max(1),
            next_sequence: 1,
            generation: 0,
            dropped: 0,
        }
    }

    /// Appends a sample, evicting the oldest when full. Returns the new mark.
    pub fn push(&mut self, sample: Sample) -> HistoryMark {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
            self.dropped += 1;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.samples.push_back((sequence, sample));
        self.mark()
    }

    pub fn extend(&mut self, samples: impl IntoIterator<Item = Sample>) -> HistoryMark {
        for sample in samples {
            self.push(sample);
        }
        self.mark()
    }

    /// Mark of the newest sample in the current generation.
    pub fn mark(&self) -> HistoryMark {
        HistoryMark {
            sequence: self.next_sequence - 1,
            generation: self.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Samples with a sequence greater than `after`, oldest first. Samples
    /// already evicted are silently gone.
    pub fn since(&self, after: u64) -> impl Iterator<Item = &Sample> {
        self.between(after, u64::MAX)
    }

    /// Samples with `after < sequence <= upto`.
    pub fn between(&self, after: u64, upto: u64) -> impl Iterator<Item = &Sample> {
        let start = self.samples.partition_point(|(seq, _)| *seq <= after);
        let end = self.samples.partition_point(|(seq, _)| *seq <= upto);
        self.samples
            .range(start..end.max(start))
            .map(|(_, sample)| sample)
    }

    /// Contiguous copy for bulk decimation.
    pub fn snapshot(&self) -> Vec<Sample> {
        self.samples.iter().map(|(_, s)| s.clone()).collect()
    }

    /// Drops every sample and starts a new generation with sequences from 1.
    pub fn clear(&mut self) -> HistoryMark {
        self.samples.clear();
        self.next_sequence = 1;
        self.generation += 1;
        self.mark()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
