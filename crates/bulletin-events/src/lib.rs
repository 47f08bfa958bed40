//! Bulletin Events
//!
//! Actual LRP event calculation and delivery.
//!
//! # Overview
//!
//! - [`calculator`]: pure before/after diff producing ordered events
//! - [`hub`]: bounded publish/subscribe broadcaster, one per stream
//! - [`emitter`]: the group and instance hubs plus background dispatch

pub mod calculator;
pub mod emitter;
pub mod event;
pub mod hub;

pub use calculator::{calculate_events, calculate_group_events, calculate_instance_events};
pub use emitter::EventEmitter;
pub use event::{CrashedEvent, EventBatch, GroupEvent, InstanceEvent};
pub use hub::{EventSource, Hub};
