//! ---
//! wq_section: "04-runtime"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes built on the reactor."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::fmt;

use thiserror::Error;

/// Sensor channel sampled by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Analog turbidity probe.
    Turbidity,
    /// Analog pH probe.
    Ph,
    /// Digital temperature probe.
    Temperature,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Turbidity => "turbidity",
            Channel::Ph => "pH",
            Channel::Temperature => "temperature",
        })
    }
}

/// Per-channel sensor failure. Never fatal; the previous value is kept.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionError {
    /// The sensor did not answer.
    #[error("{channel} sensor unavailable: {reason}")]
    Unavailable {
        /// Failing channel.
        channel: Channel,
        /// Driver message.
        reason: String,
    },
    /// The sensor answered with a NaN or infinite value.
    #[error("{channel} sensor returned unusable value {value}")]
    Invalid {
        /// Failing channel.
        channel: Channel,
        /// The rejected value.
        value: f64,
    },
}

impl AcquisitionError {
    /// Shorthand for [`AcquisitionError::Unavailable`].
    pub fn unavailable(channel: Channel, reason: impl Into<String>) -> Self {
        AcquisitionError::Unavailable {
            channel,
            reason: reason.into(),
        }
    }

    /// Channel that failed.
    pub fn channel(&self) -> Channel {
        match self {
            AcquisitionError::Unavailable { channel, .. }
            | AcquisitionError::Invalid { channel, .. } => *channel,
        }
    }
}

/// Both analog channels read in one bus transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogSample {
    /// Raw turbidity count.
    pub turbidity: Result<u8, AcquisitionError>,
    /// Raw pH count.
    pub ph: Result<u8, AcquisitionError>,
}

/// Source of raw sensor readings.
///
/// Turbidity and pH arrive as 8-bit ADC counts; temperature in degrees.
pub trait SampleProducer {
    /// Raw turbidity count, 0 for opaque water.
    fn sample_turbidity(&mut self) -> Result<u8, AcquisitionError>;

    /// Raw pH count.
    fn sample_ph(&mut self) -> Result<u8, AcquisitionError>;

    /// Temperature in degrees Celsius.
    fn sample_temperature(&mut self) -> Result<f64, AcquisitionError>;

    /// Read both analog channels together. Hardware that can latch both in a
    /// single transaction should override this.
    fn sample_analog(&mut self) -> AnalogSample {
        AnalogSample {
            turbidity: self.sample_turbidity(),
            ph: self.sample_ph(),
        }
    }
}

impl<P: SampleProducer + ?Sized> SampleProducer for Box<P> {
    fn sample_turbidity(&mut self) -> Result<u8, AcquisitionError> {
        (**self).sample_turbidity()
    }

    fn sample_ph(&mut self) -> Result<u8, AcquisitionError> {
        (**self).sample_ph()
    }

    fn sample_temperature(&mut self) -> Result<f64, AcquisitionError> {
        (**self).sample_temperature()
    }

    fn sample_analog(&mut self) -> AnalogSample {
        (**self).sample_analog()
    }
}

/// Turbidity percentage from the inverted 8-bit count: 0 is opaque (100 %).
pub fn turbidity_percent(raw: u8) -> f64 {
    100.0 - f64::from(raw) * 100.0 / 255.0
}

/// pH from the inverted 8-bit count over the 0-14 scale.
pub fn ph_value(raw: u8) -> f64 {
    14.0 - f64::from(raw) * 14.0 / 255.0
}
