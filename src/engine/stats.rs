//! The engine's stats ring and the report its OBD pump emits.
//!
//! Kept behind its own mutex, acquired separately from `queued_tasks`, so a slow stats
//! report can never stall redelivery or dispatch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// One coarse counter or timing observation recorded by a pump.
#[derive(Debug, Clone)]
pub enum EngineStatEvent {
    TaskDispatched,
    TaskRequeued,
    BackPressureApplied,
    ResultDelivered { processing_duration: Duration },
    UnknownResultDiscarded,
}

#[derive(Debug, Clone)]
struct StatSample {
    at: DateTime<Utc>,
    event: EngineStatEvent,
}

/// Append-only ring of recent [`EngineStatEvent`]s, summarised by the stats pump.
pub struct StatsRing {
    samples: Mutex<Vec<StatSample>>,
    capacity: usize,
}

impl StatsRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub async fn record(&self, event: EngineStatEvent) {
        let mut samples = self.samples.lock().await;
        if samples.len() >= self.capacity {
            samples.remove(0);
        }
        samples.push(StatSample {
            at: Utc::now(),
            event,
        });
    }

    /// Render a multi-line human-readable summary of everything currently in the ring.
    pub async fn report(&self, job: &str) -> String {
        let samples = self.samples.lock().await;
        let mut dispatched = 0u64;
        let mut requeued = 0u64;
        let mut back_pressure = 0u64;
        let mut delivered = 0u64;
        let mut unknown = 0u64;
        let mut total_processing = Duration::ZERO;

        for sample in samples.iter() {
            match &sample.event {
                EngineStatEvent::TaskDispatched => dispatched += 1,
                EngineStatEvent::TaskRequeued => requeued += 1,
                EngineStatEvent::BackPressureApplied => back_pressure += 1,
                EngineStatEvent::ResultDelivered {
                    processing_duration,
                } => {
                    delivered += 1;
                    total_processing += *processing_duration;
                }
                EngineStatEvent::UnknownResultDiscarded => unknown += 1,
            }
        }

        let avg_processing = if delivered > 0 {
            total_processing / delivered as u32
        } else {
            Duration::ZERO
        };

        format!(
            "engine stats [{job}]\n  dispatched: {dispatched}\n  requeued (redelivery): {requeued}\n  back-pressure ticks: {back_pressure}\n  results delivered: {delivered}\n  unknown results discarded: {unknown}\n  avg processing duration: {avg_processing:?}"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn report_summarises_recorded_events() {
        let ring = StatsRing::new(16);
        ring.record(EngineStatEvent::TaskDispatched).await;
        ring.record(EngineStatEvent::TaskRequeued).await;
        ring.record(EngineStatEvent::ResultDelivered {
            processing_duration: Duration::from_millis(250),
        })
        .await;

        let report = ring.report("test-engine").await;
        assert!(report.contains("dispatched: 1"));
        assert!(report.contains("requeued (redelivery): 1"));
        assert!(report.contains("results delivered: 1"));
    }

    #[tokio::test]
    async fn ring_drops_oldest_sample_once_full() {
        let ring = StatsRing::new(2);
        for _ in 0..5 {
            ring.record(EngineStatEvent::TaskDispatched).await;
        }
        let samples = ring.samples.lock().await;
        assert_eq!(samples.len(), 2);
    }
}
