//! Background event emission
//!
//! Controllers hand a calculated [`EventBatch`] to [`EventEmitter::emit_in_background`]
//! and return to their caller without waiting for delivery. Delivery is
//! best effort: a batch is lost if the process exits before the task runs.

use crate::event::{EventBatch, GroupEvent, InstanceEvent};
use crate::hub::{EventSource, Hub};
use bulletin_core::{EventStream, EventsConfig, LrpMetrics, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Owner of the group and instance hubs
#[derive(Clone)]
pub struct EventEmitter {
    group_hub: Hub<GroupEvent>,
    instance_hub: Hub<InstanceEvent>,
}

impl EventEmitter {
    pub fn new(config: &EventsConfig, metrics: Arc<LrpMetrics>) -> Self {
        let group_hub = Hub::new(
            EventStream::Group,
            config.subscriber_buffer_size,
            metrics.clone(),
        );
        let instance_hub = Hub::new(
            EventStream::Instance,
            config.subscriber_buffer_size,
            metrics.clone(),
        );

        let group_metrics = metrics.clone();
        group_hub.register_callback(move |count| {
            group_metrics.set_subscriber_count(EventStream::Group, count)
        });
        instance_hub.register_callback(move |count| {
            metrics.set_subscriber_count(EventStream::Instance, count)
        });

        Self {
            group_hub,
            instance_hub,
        }
    }

    pub fn group_hub(&self) -> &Hub<GroupEvent> {
        &self.group_hub
    }

    pub fn instance_hub(&self) -> &Hub<InstanceEvent> {
        &self.instance_hub
    }

    pub fn subscribe_to_groups(&self) -> Result<EventSource<GroupEvent>> {
        self.group_hub.subscribe()
    }

    pub fn subscribe_to_instances(&self) -> Result<EventSource<InstanceEvent>> {
        self.instance_hub.subscribe()
    }

    /// Instance events for records on `cell_id` only
    pub fn subscribe_to_instances_on_cell(
        &self,
        cell_id: impl Into<String>,
    ) -> Result<EventSource<InstanceEvent>> {
        let cell_id = cell_id.into();
        self.instance_hub
            .subscribe_filtered(move |event: &InstanceEvent| event.cell_id() == cell_id)
    }

    /// Publish `batch` on a spawned task; `None` when there is nothing to send
    pub fn emit_in_background(&self, batch: EventBatch) -> Option<JoinHandle<()>> {
        if batch.is_empty() {
            return None;
        }

        let emitter = self.clone();
        Some(tokio::spawn(async move {
            emitter.emit_now(batch);
        }))
    }

    /// Publish `batch` on the calling task
    pub fn emit_now(&self, batch: EventBatch) {
        for event in batch.group {
            let event_type = event.event_type();
            if let Err(e) = self.group_hub.emit(event) {
                debug!(event_type = event_type, error = %e, "group event not delivered");
            }
        }
        for event in batch.instance {
            let event_type = event.event_type();
            if let Err(e) = self.instance_hub.emit(event) {
                debug!(event_type = event_type, error = %e, "instance event not delivered");
            }
        }
    }

    /// Close both hubs
    pub fn close(&self) -> Result<()> {
        self.group_hub.close()?;
        self.instance_hub.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::calculate_events;
    use bulletin_core::{ActualLrp, ActualLrpInstanceKey, ActualLrpKey, ActualLrpState};

    fn emitter() -> (EventEmitter, Arc<LrpMetrics>) {
        let metrics = Arc::new(LrpMetrics::new());
        (
            EventEmitter::new(&EventsConfig::default(), metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_emit_in_background() {
        let (emitter, metrics) = emitter();
        let mut groups = emitter.subscribe_to_groups().unwrap();
        let mut instances = emitter.subscribe_to_instances().unwrap();
        assert_eq!(metrics.snapshot().group_subscribers, 1);
        assert_eq!(metrics.snapshot().instance_subscribers, 1);

        let before = ActualLrp::unclaimed(ActualLrpKey::new("g", 0, "d"), 0);
        let mut after = before.clone();
        after.state = ActualLrpState::Claimed;
        after.instance_key = ActualLrpInstanceKey::new("i1", "c1");

        let handle = emitter
            .emit_in_background(calculate_events(&[before], &[after]))
            .expect("events to emit");
        handle.await.unwrap();

        assert!(matches!(groups.next().await.unwrap(), GroupEvent::Changed { .. }));
        assert!(matches!(
            instances.next().await.unwrap(),
            InstanceEvent::Changed { .. }
        ));
        assert_eq!(metrics.snapshot().instance_events_emitted, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_spawns_nothing() {
        let (emitter, _) = emitter();
        assert!(emitter.emit_in_background(EventBatch::default()).is_none());
    }

    #[tokio::test]
    async fn test_cell_subscription_filters_other_cells() {
        let (emitter, _) = emitter();
        let mut on_c2 = emitter.subscribe_to_instances_on_cell("c2").unwrap();

        let mut lrp_c1 = ActualLrp::unclaimed(ActualLrpKey::new("g", 0, "d"), 0);
        lrp_c1.state = ActualLrpState::Claimed;
        lrp_c1.instance_key = ActualLrpInstanceKey::new("i1", "c1");
        let mut lrp_c2 = lrp_c1.clone();
        lrp_c2.key.index = 1;
        lrp_c2.instance_key = ActualLrpInstanceKey::new("i2", "c2");

        emitter.emit_now(EventBatch {
            group: Vec::new(),
            instance: vec![
                InstanceEvent::Removed { lrp: lrp_c1 },
                InstanceEvent::Removed {
                    lrp: lrp_c2.clone(),
                },
            ],
        });

        assert_eq!(
            on_c2.next().await.unwrap(),
            InstanceEvent::Removed { lrp: lrp_c2 }
        );
        assert!(on_c2.try_next().unwrap().is_none());
    }
}
