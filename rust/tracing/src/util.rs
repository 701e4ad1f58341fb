use opentelemetry::KeyValue;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub enum StopWatchUnit {
    Micros,
    Millis,
    Seconds,
}

/// Records the time between its creation and its drop into a histogram.
pub struct Stopwatch<'a> {
    histogram: &'a opentelemetry::metrics::Histogram<u64>,
    attributes: &'a [KeyValue],
    started: Instant,
    unit: StopWatchUnit,
}

impl<'a> Stopwatch<'a> {
    pub fn new(
        histogram: &'a opentelemetry::metrics::Histogram<u64>,
        attributes: &'a [KeyValue],
        unit: StopWatchUnit,
    ) -> Self {
        Self {
            histogram,
            attributes,
            started: Instant::now(),
            unit,
        }
    }

    pub fn elapsed(&self) -> u64 {
        let elapsed = self.started.elapsed();
        match self.unit {
            StopWatchUnit::Micros => elapsed.as_micros() as u64,
            StopWatchUnit::Millis => elapsed.as_millis() as u64,
            StopWatchUnit::Seconds => elapsed.as_secs(),
        }
    }
}

impl Drop for Stopwatch<'_> {
    fn drop(&mut self) {
        self.histogram.record(self.elapsed(), self.attributes);
    }
}
