//! Metrics observer for the bulletin board
//!
//! TigerStyle: Explicit metric names with units, type-safe recording.
//!
//! [`LrpMetrics`] is created once at startup and passed as `Arc<LrpMetrics>` to
//! every controller and hub. Values are always kept in atomics (readable through
//! [`LrpMetrics::snapshot`]) and, with the `otel` feature, mirrored into
//! OpenTelemetry instruments built from the meter given at construction.

use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "otel")]
use crate::constants::*;
#[cfg(feature = "otel")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "otel")]
use opentelemetry::KeyValue;

/// Keys per category found by one convergence pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConvergenceCounts {
    pub missing: u64,
    pub extra: u64,
    pub unstarted: u64,
    pub missing_cells: u64,
    pub suspect_existing_cells: u64,
    pub suspect_to_retire: u64,
}

impl ConvergenceCounts {
    fn labelled(&self) -> [(&'static str, u64); 6] {
        [
            ("missing", self.missing),
            ("extra", self.extra),
            ("unstarted", self.unstarted),
            ("missing_cells", self.missing_cells),
            ("suspect_existing_cells", self.suspect_existing_cells),
            ("suspect_to_retire", self.suspect_to_retire),
        ]
    }
}

/// Event stream a hub publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStream {
    Group,
    Instance,
}

impl EventStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Instance => "instance",
        }
    }
}

/// Point-in-time copy of every recorded value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub convergence_runs: u64,
    pub convergence_last_duration_ms: u64,
    pub convergence_unrecoverable: u64,
    pub convergence_counts: ConvergenceCounts,
    pub lrp_crashes: u64,
    pub retire_failures: u64,
    pub auction_requests_submitted: u64,
    pub auction_requests_failed: u64,
    pub group_events_emitted: u64,
    pub instance_events_emitted: u64,
    pub group_subscribers: u64,
    pub instance_subscribers: u64,
    pub subscribers_dropped: u64,
}

#[cfg(feature = "otel")]
struct Instruments {
    convergence_runs: Counter<u64>,
    convergence_duration: Histogram<f64>,
    convergence_unrecoverable: Counter<u64>,
    convergence_keys: UpDownCounter<i64>,
    lrp_crashes: Counter<u64>,
    retire_failures: Counter<u64>,
    auction_requests: Counter<u64>,
    events_emitted: Counter<u64>,
    subscribers: UpDownCounter<i64>,
    subscribers_dropped: Counter<u64>,
}

#[cfg(feature = "otel")]
impl Instruments {
    fn new(meter: &Meter) -> Self {
        Self {
            convergence_runs: meter
                .u64_counter(METRIC_NAME_CONVERGENCE_RUNS_TOTAL)
                .with_description("Total convergence passes")
                .init(),
            convergence_duration: meter
                .f64_histogram(METRIC_NAME_CONVERGENCE_DURATION_SECONDS)
                .with_description("Convergence pass duration in seconds")
                .init(),
            convergence_unrecoverable: meter
                .u64_counter(METRIC_NAME_CONVERGENCE_UNRECOVERABLE_TOTAL)
                .with_description("Convergence passes aborted by the store")
                .init(),
            convergence_keys: meter
                .i64_up_down_counter(METRIC_NAME_CONVERGENCE_KEYS_COUNT)
                .with_description("Keys per category in the last convergence pass")
                .init(),
            lrp_crashes: meter
                .u64_counter(METRIC_NAME_LRP_CRASHES_TOTAL)
                .with_description("Total actual LRP crashes")
                .init(),
            retire_failures: meter
                .u64_counter(METRIC_NAME_LRP_RETIRE_FAILURES_TOTAL)
                .with_description("Total failed retirements")
                .init(),
            auction_requests: meter
                .u64_counter(METRIC_NAME_AUCTION_REQUESTS_TOTAL)
                .with_description("Start requests submitted to the auctioneer")
                .init(),
            events_emitted: meter
                .u64_counter(METRIC_NAME_EVENTS_EMITTED_TOTAL)
                .with_description("Events published")
                .init(),
            subscribers: meter
                .i64_up_down_counter(METRIC_NAME_EVENT_SUBSCRIBERS_COUNT)
                .with_description("Current event subscribers")
                .init(),
            subscribers_dropped: meter
                .u64_counter(METRIC_NAME_EVENT_SUBSCRIBERS_DROPPED_TOTAL)
                .with_description("Subscribers disconnected for falling behind")
                .init(),
        }
    }
}

/// Observer shared by the controllers and hubs
#[derive(Default)]
pub struct LrpMetrics {
    convergence_runs: AtomicU64,
    convergence_last_duration_ms: AtomicU64,
    convergence_unrecoverable: AtomicU64,
    missing: AtomicU64,
    extra: AtomicU64,
    unstarted: AtomicU64,
    missing_cells: AtomicU64,
    suspect_existing_cells: AtomicU64,
    suspect_to_retire: AtomicU64,
    lrp_crashes: AtomicU64,
    retire_failures: AtomicU64,
    auction_requests_submitted: AtomicU64,
    auction_requests_failed: AtomicU64,
    group_events_emitted: AtomicU64,
    instance_events_emitted: AtomicU64,
    group_subscribers: AtomicU64,
    instance_subscribers: AtomicU64,
    subscribers_dropped: AtomicU64,
    #[cfg(feature = "otel")]
    instruments: Option<Instruments>,
}

impl std::fmt::Debug for LrpMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LrpMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl LrpMetrics {
    /// Atomics only
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomics mirrored into instruments built from `meter`
    #[cfg(feature = "otel")]
    pub fn with_meter(meter: &Meter) -> Self {
        Self {
            instruments: Some(Instruments::new(meter)),
            ..Self::default()
        }
    }

    pub fn record_convergence_run(&self, duration_ms: u64, counts: ConvergenceCounts) {
        self.convergence_runs.fetch_add(1, Ordering::Relaxed);
        self.convergence_last_duration_ms
            .store(duration_ms, Ordering::Relaxed);

        let slots = [
            &self.missing,
            &self.extra,
            &self.unstarted,
            &self.missing_cells,
            &self.suspect_existing_cells,
            &self.suspect_to_retire,
        ];

        for (slot, (_category, value)) in slots.iter().zip(counts.labelled()) {
            let _previous = slot.swap(value, Ordering::Relaxed);

            #[cfg(feature = "otel")]
            if let Some(instruments) = &self.instruments {
                instruments.convergence_keys.add(
                    value as i64 - _previous as i64,
                    &[KeyValue::new("category", _category)],
                );
            }
        }

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments.convergence_runs.add(1, &[]);
            instruments
                .convergence_duration
                .record(duration_ms as f64 / 1000.0, &[]);
        }
    }

    pub fn record_convergence_unrecoverable(&self) {
        self.convergence_unrecoverable
            .fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments.convergence_unrecoverable.add(1, &[]);
        }
    }

    pub fn record_lrp_crash(&self) {
        self.lrp_crashes.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments.lrp_crashes.add(1, &[]);
        }
    }

    pub fn record_retire_failure(&self) {
        self.retire_failures.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments.retire_failures.add(1, &[]);
        }
    }

    /// Count start requests handed to the auctioneer
    pub fn record_auction_requests(&self, count: u64, failed: bool) {
        if failed {
            self.auction_requests_failed
                .fetch_add(count, Ordering::Relaxed);
        } else {
            self.auction_requests_submitted
                .fetch_add(count, Ordering::Relaxed);
        }

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            let status = if failed { "error" } else { "success" };
            instruments
                .auction_requests
                .add(count, &[KeyValue::new("status", status)]);
        }
    }

    pub fn record_events_emitted(&self, stream: EventStream, count: u64) {
        match stream {
            EventStream::Group => self.group_events_emitted.fetch_add(count, Ordering::Relaxed),
            EventStream::Instance => self
                .instance_events_emitted
                .fetch_add(count, Ordering::Relaxed),
        };

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments
                .events_emitted
                .add(count, &[KeyValue::new("stream", stream.as_str())]);
        }
    }

    /// Current subscriber count, fed by a hub callback
    pub fn set_subscriber_count(&self, stream: EventStream, count: usize) {
        let slot = match stream {
            EventStream::Group => &self.group_subscribers,
            EventStream::Instance => &self.instance_subscribers,
        };
        let _previous = slot.swap(count as u64, Ordering::Relaxed);

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments.subscribers.add(
                count as i64 - _previous as i64,
                &[KeyValue::new("stream", stream.as_str())],
            );
        }
    }

    pub fn record_subscriber_dropped(&self) {
        self.subscribers_dropped.fetch_add(1, Ordering::Relaxed);

        #[cfg(feature = "otel")]
        if let Some(instruments) = &self.instruments {
            instruments.subscribers_dropped.add(1, &[]);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            convergence_runs: self.convergence_runs.load(Ordering::Relaxed),
            convergence_last_duration_ms: self
                .convergence_last_duration_ms
                .load(Ordering::Relaxed),
            convergence_unrecoverable: self.convergence_unrecoverable.load(Ordering::Relaxed),
            convergence_counts: ConvergenceCounts {
                missing: self.missing.load(Ordering::Relaxed),
                extra: self.extra.load(Ordering::Relaxed),
                unstarted: self.unstarted.load(Ordering::Relaxed),
                missing_cells: self.missing_cells.load(Ordering::Relaxed),
                suspect_existing_cells: self.suspect_existing_cells.load(Ordering::Relaxed),
                suspect_to_retire: self.suspect_to_retire.load(Ordering::Relaxed),
            },
            lrp_crashes: self.lrp_crashes.load(Ordering::Relaxed),
            retire_failures: self.retire_failures.load(Ordering::Relaxed),
            auction_requests_submitted: self.auction_requests_submitted.load(Ordering::Relaxed),
            auction_requests_failed: self.auction_requests_failed.load(Ordering::Relaxed),
            group_events_emitted: self.group_events_emitted.load(Ordering::Relaxed),
            instance_events_emitted: self.instance_events_emitted.load(Ordering::Relaxed),
            group_subscribers: self.group_subscribers.load(Ordering::Relaxed),
            instance_subscribers: self.instance_subscribers.load(Ordering::Relaxed),
            subscribers_dropped: self.subscribers_dropped.load(Ordering::Relaxed),
        }
    }
}
