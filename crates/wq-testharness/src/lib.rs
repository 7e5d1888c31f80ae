//! ---
//! wq_section: "11-simulation"
//! wq_subsection: "01-bootstrap"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Deterministic test doubles and shared fixtures."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Deterministic doubles for exercising the node and monitor runtimes without
//! hardware.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wq_common::AppConfig;
use wq_core::{AcquisitionError, LinkEvent, SampleProducer, SampleSink};
use wq_msg::{ReadingSet, ReadingUpdate};

/// ADC count returned once a scripted analog channel runs dry.
pub const FALLBACK_ANALOG: u8 = 128;
/// Temperature returned once the scripted temperature channel runs dry.
pub const FALLBACK_TEMPERATURE: f64 = 25.0;

/// Producer replaying queued results per channel, then fixed fallbacks.
#[derive(Debug, Default, Clone)]
pub struct ScriptedProducer {
    turbidity: VecDeque<Result<u8, AcquisitionError>>,
    ph: VecDeque<Result<u8, AcquisitionError>>,
    temperature: VecDeque<Result<f64, AcquisitionError>>,
}

impl ScriptedProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turbidity(mut self, script: impl IntoIterator<Item = Result<u8, AcquisitionError>>) -> Self {
        self.turbidity.extend(script);
        self
    }

    pub fn ph(mut self, script: impl IntoIterator<Item = Result<u8, AcquisitionError>>) -> Self {
        self.ph.extend(script);
        self
    }

    pub fn temperature(mut self, script: impl IntoIterator<Item = Result<f64, AcquisitionError>>) -> Self {
        self.temperature.extend(script);
        self
    }
}

impl SampleProducer for ScriptedProducer {
    fn sample_turbidity(&mut self) -> Result<u8, AcquisitionError> {
        self.turbidity.pop_front().unwrap_or(Ok(FALLBACK_ANALOG))
    }

    fn sample_ph(&mut self) -> Result<u8, AcquisitionError> {
        self.ph.pop_front().unwrap_or(Ok(FALLBACK_ANALOG))
    }

    fn sample_temperature(&mut self) -> Result<f64, AcquisitionError> {
        self.temperature
            .pop_front()
            .unwrap_or(Ok(FALLBACK_TEMPERATURE))
    }
}

/// Everything a [`RecordingSink`] has seen.
#[derive(Debug, Default, Clone)]
pub struct Recording {
    pub updates: Vec<ReadingUpdate>,
    pub snapshots: Vec<ReadingSet>,
    pub events: Vec<LinkEvent>,
}

/// Sink that records into shared storage; clone it before boxing to keep a
/// handle for assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Recording {
        self.inner.lock().clone()
    }

    pub fn updates(&self) -> Vec<ReadingUpdate> {
        self.inner.lock().updates.clone()
    }

    pub fn last_readings(&self) -> Option<ReadingSet> {
        self.inner.lock().snapshots.last().copied()
    }

    pub fn events(&self) -> Vec<LinkEvent> {
        self.inner.lock().events.clone()
    }

    pub fn count_events(&self, predicate: impl Fn(&LinkEvent) -> bool) -> usize {
        self.inner.lock().events.iter().filter(|event| predicate(event)).count()
    }
}

impl SampleSink for RecordingSink {
    fn accept(&mut self, update: &ReadingUpdate, current: &ReadingSet) {
        let mut recording = self.inner.lock();
        recording.updates.push(*update);
        recording.snapshots.push(*current);
    }

    fn link_event(&mut self, event: &LinkEvent) {
        self.inner.lock().events.push(event.clone());
    }
}

/// Configuration with short periods for loopback tests: the node targets
/// `monitor`, the monitor listens on an ephemeral loopback port.
pub fn loopback_config(monitor: SocketAddr, period: Duration) -> AppConfig {
    let mut config = AppConfig::default();
    config.node.monitor_address = Some(monitor.ip().to_string());
    config.node.port = monitor.port();
    config.node.sampling_interval = period;
    config.node.publish_interval = period;
    config.node.display_interval = None;
    config.connect.retry_delay = period;
    config.monitor.listen = SocketAddr::from(([127, 0, 0, 1], 0));
    config
}

#[cfg(test)]
mod tests {
    use wq_core::Channel;

    use super::*;

    #[test]
    fn scripted_values_then_fallbacks() {
        let mut producer = ScriptedProducer::new()
            .turbidity([Ok(0)])
            .temperature([Err(AcquisitionError::unavailable(Channel::Temperature, "unplugged"))]);
        assert_eq!(producer.sample_turbidity(), Ok(0));
        assert_eq!(producer.sample_turbidity(), Ok(FALLBACK_ANALOG));
        assert!(producer.sample_temperature().is_err());
        assert_eq!(producer.sample_temperature(), Ok(FALLBACK_TEMPERATURE));
        assert_eq!(producer.sample_ph(), Ok(FALLBACK_ANALOG));
    }

    #[test]
    fn recording_sink_clones_share_storage() {
        let handle = RecordingSink::new();
        let mut boxed: Box<dyn SampleSink> = Box::new(handle.clone());
        let current = ReadingSet::new(1.0, 2.0, 3.0).unwrap();
        boxed.accept(&ReadingUpdate::from(current), &current);
        boxed.link_event(&LinkEvent::Overflow { discarded: 9 });
        assert_eq!(handle.last_readings(), Some(current));
        assert_eq!(handle.count_events(|e| matches!(e, LinkEvent::Overflow { .. })), 1);
    }
}
