//! ---
//! wq_section: "11-simulation"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Simulated sensor front-end for running the node without hardware."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
//! Simulated sensor front-end so the node can run without hardware.

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Normal;
use tracing::trace;
use wq_common::SimulationConfig;
use wq_core::{AcquisitionError, AnalogSample, Channel, SampleProducer};

const TURBIDITY_BASELINE: f64 = 230.0;
const PH_BASELINE: f64 = 128.0;
const TEMPERATURE_BASELINE: f64 = 21.0;
const REVERSION: f64 = 0.05;

/// Mean-reverting random walk over the raw sensor values.
#[derive(Debug)]
pub struct SimulatedProducer {
    rng: StdRng,
    noise: Normal<f64>,
    turbidity: f64,
    ph: f64,
    temperature: f64,
    temperature_reads: u64,
    temperature_failure_every: u64,
}

impl SimulatedProducer {
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            noise: Normal::new(0.0, 1.0).context("invalid noise distribution")?,
            turbidity: TURBIDITY_BASELINE,
            ph: PH_BASELINE,
            temperature: TEMPERATURE_BASELINE,
            temperature_reads: 0,
            temperature_failure_every: config.temperature_failure_every,
        })
    }

    fn step(&mut self, value: f64, baseline: f64, sigma: f64) -> f64 {
        let noise = self.noise.sample(&mut self.rng) * sigma;
        value + (baseline - value) * REVERSION + noise
    }

    fn next_count(&mut self, value: f64, baseline: f64) -> (f64, u8) {
        let next = self.step(value, baseline, 3.0).clamp(0.0, 255.0);
        (next, next.round() as u8)
    }
}

impl SampleProducer for SimulatedProducer {
    fn sample_turbidity(&mut self) -> Result<u8, AcquisitionError> {
        let (next, raw) = self.next_count(self.turbidity, TURBIDITY_BASELINE);
        self.turbidity = next;
        Ok(raw)
    }

    fn sample_ph(&mut self) -> Result<u8, AcquisitionError> {
        let (next, raw) = self.next_count(self.ph, PH_BASELINE);
        self.ph = next;
        Ok(raw)
    }

    fn sample_temperature(&mut self) -> Result<f64, AcquisitionError> {
        self.temperature_reads += 1;
        if self.temperature_failure_every > 0
            && self.temperature_reads % self.temperature_failure_every == 0
        {
            return Err(AcquisitionError::unavailable(
                Channel::Temperature,
                "simulated probe dropout",
            ));
        }
        self.temperature = self
            .step(self.temperature, TEMPERATURE_BASELINE, 0.1)
            .clamp(-5.0, 40.0);
        Ok(self.temperature)
    }

    fn sample_analog(&mut self) -> AnalogSample {
        let sample = AnalogSample {
            turbidity: self.sample_turbidity(),
            ph: self.sample_ph(),
        };
        trace!(?sample, "simulated analog read");
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64, every: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            temperature_failure_every: every,
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = SimulatedProducer::new(&config(7, 0)).unwrap();
        let mut b = SimulatedProducer::new(&config(7, 0)).unwrap();
        for _ in 0..50 {
            assert_eq!(a.sample_analog(), b.sample_analog());
            assert_eq!(a.sample_temperature(), b.sample_temperature());
        }
    }

    #[test]
    fn values_stay_near_their_baselines() {
        let mut producer = SimulatedProducer::new(&config(42, 0)).unwrap();
        for _ in 0..500 {
            let sample = producer.sample_analog();
            let turbidity = sample.turbidity.unwrap();
            let ph = sample.ph.unwrap();
            assert!((180..=255).contains(&turbidity), "turbidity {}", turbidity);
            assert!((78..=178).contains(&ph), "ph {}", ph);
            let temperature = producer.sample_temperature().unwrap();
            assert!((-5.0..=40.0).contains(&temperature));
        }
    }

    #[test]
    fn temperature_dropouts_follow_the_configured_cadence() {
        let mut producer = SimulatedProducer::new(&config(1, 3)).unwrap();
        let failures: Vec<bool> = (0..9)
            .map(|_| producer.sample_temperature().is_err())
            .collect();
        assert_eq!(
            failures,
            vec![false, false, true, false, false, true, false, false, true]
        );
    }
}
