//! Shared helpers for integration tests.
#![allow(dead_code)]

use parking_lot::Mutex;
use rust_scan::events::{DomainEvent, EventBus, EventType};
use rust_scan::scan::{MeasurementUncertainty, ScanPattern, ScanZone, StepScanConfig};
use std::sync::Arc;
use std::time::Duration;

/// Records every event published on a bus.
#[derive(Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<DomainEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let recorder = Self::default();
        let events = Arc::clone(&recorder.events);
        let all: Vec<EventType> = EventType::SCAN
            .into_iter()
            .chain(EventType::CONTINUOUS)
            .collect();
        bus.subscribe_many(&all, move |event| {
            events.lock().push(event.clone());
            Ok(())
        });
        recorder
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn types(&self) -> Vec<EventType> {
        self.events.lock().iter().map(DomainEvent::event_type).collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Unit-square grid with no stabilization delay and single-sample averaging.
pub fn grid(x_points: usize, y_points: usize, pattern: ScanPattern) -> StepScanConfig {
    StepScanConfig::builder(ScanZone::new(0.0, 1.0, 0.0, 1.0).unwrap())
        .points(x_points, y_points)
        .pattern(pattern)
        .stabilization_delay_ms(0)
        .averaging_per_position(1)
        .measurement_uncertainty(MeasurementUncertainty::new(1.0).unwrap())
        .build()
        .unwrap()
}
