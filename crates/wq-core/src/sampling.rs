//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use tracing::{debug, warn};
use wq_common::TemperatureFailurePolicy;
use wq_msg::{ReadingSet, ReadingUpdate, TEMPERATURE_SENTINEL};

use crate::producer::{ph_value, turbidity_percent, AcquisitionError, Channel, SampleProducer};

/// Counters kept across sampling ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingStats {
    /// Ticks run.
    pub ticks: u64,
    /// Failed turbidity reads.
    pub turbidity_failures: u64,
    /// Failed pH reads.
    pub ph_failures: u64,
    /// Failed temperature reads.
    pub temperature_failures: u64,
}

/// What a single tick changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Fields written into the reading set this tick.
    pub update: ReadingUpdate,
    /// Channels that failed this tick.
    pub failures: Vec<AcquisitionError>,
}

/// Samples every channel once per tick into the node's reading set.
///
/// A failed channel keeps its previous value. Under
/// [`TemperatureFailurePolicy::Sentinel`] a failed temperature read writes
/// [`TEMPERATURE_SENTINEL`] instead. Nothing is retried within a tick.
#[derive(Debug, Clone, Default)]
pub struct SamplingScheduler {
    policy: TemperatureFailurePolicy,
    stats: SamplingStats,
}

impl SamplingScheduler {
    /// Scheduler applying `policy` to temperature failures.
    pub fn new(policy: TemperatureFailurePolicy) -> Self {
        Self {
            policy,
            stats: SamplingStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> SamplingStats {
        self.stats
    }

    /// Sample every channel once and write the results into `readings`.
    pub fn tick(&mut self, producer: &mut dyn SampleProducer, readings: &mut ReadingSet) -> TickReport {
        self.stats.ticks += 1;
        let mut report = TickReport::default();

        let analog = producer.sample_analog();
        match analog.turbidity {
            Ok(raw) => {
                let value = turbidity_percent(raw);
                if readings.set_turbidity(value).is_ok() {
                    report.update.turbidity = Some(value);
                }
            }
            Err(err) => {
                self.stats.turbidity_failures += 1;
                report.failures.push(err);
            }
        }
        match analog.ph {
            Ok(raw) => {
                let value = ph_value(raw);
                if readings.set_ph(value).is_ok() {
                    report.update.ph = Some(value);
                }
            }
            Err(err) => {
                self.stats.ph_failures += 1;
                report.failures.push(err);
            }
        }

        let temperature = producer.sample_temperature().and_then(|value| {
            readings
                .set_temperature(value)
                .map(|()| value)
                .map_err(|_| AcquisitionError::Invalid {
                    channel: Channel::Temperature,
                    value,
                })
        });
        match temperature {
            Ok(value) => report.update.temperature = Some(value),
            Err(err) => {
                self.stats.temperature_failures += 1;
                if self.policy == TemperatureFailurePolicy::Sentinel
                    && readings.set_temperature(TEMPERATURE_SENTINEL).is_ok()
                {
                    report.update.temperature = Some(TEMPERATURE_SENTINEL);
                }
                report.failures.push(err);
            }
        }

        for failure in &report.failures {
            warn!(channel = %failure.channel(), error = %failure, "sensor read failed; keeping previous value");
        }
        debug!(
            tick = self.stats.ticks,
            turbidity = readings.turbidity(),
            temperature = readings.temperature(),
            ph = readings.ph(),
            "sampled"
        );
        report
    }
}
