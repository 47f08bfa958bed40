//! Bulletin Core
//!
//! Core types, errors, and constants for the Bulletin LRP control plane.
//!
//! # Overview
//!
//! Bulletin is the cluster bulletin board of an LRP orchestrator: the record of
//! desired and actual long-running-process state, and the controllers that
//! drive actual state toward desired state. This crate holds what every other
//! crate shares: the actual LRP data model and its transition table, the error
//! taxonomy, configuration, I/O providers, telemetry, the metrics observer, the
//! bounded-retry combinator and the crash restart policy.
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `PROCESS_GUID_LENGTH_BYTES_MAX`)
//! - Bounded iteration only

pub mod cell;
pub mod config;
pub mod constants;
pub mod desired;
pub mod error;
pub mod io;
pub mod lrp;
pub mod metrics;
pub mod restart;
pub mod retry;
pub mod telemetry;

pub use cell::{CellCapacity, CellPresence, CellSet};
pub use config::{
    BulletinConfig, ConvergenceConfig, EventsConfig, LifecycleConfig, RestartConfig,
};
pub use constants::*;
pub use desired::{DesiredLrpSchedulingInfo, DesiredLrpUpdate, LrpStartRequest, Resource};
pub use error::{Error, Result};
pub use io::{IoContext, RngProvider, StdRngProvider, TimeProvider, WallClockTime};
pub use lrp::{
    ActualLrp, ActualLrpFilter, ActualLrpGroup, ActualLrpInstanceKey, ActualLrpKey,
    ActualLrpNetInfo, ActualLrpRunInfo, ActualLrpState, InternalRoute, ModificationTag, PortMapping,
    PreferredAddress, Presence,
};
pub use metrics::{ConvergenceCounts, EventStream, LrpMetrics, MetricsSnapshot};
pub use restart::RestartPolicy;
pub use retry::{attempt, AttemptError};
pub use telemetry::{init_telemetry, Telemetry, TelemetryConfig};
