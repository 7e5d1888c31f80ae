//! ---
//! wq_section: "02-messaging-data-model"
//! wq_subsection: "module"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Reading model and frame codec for the telemetry link."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::{MessagingError, Result};

/// Temperature written by the legacy failure policy when the probe cannot be read.
pub const TEMPERATURE_SENTINEL: f64 = -1.0;

fn ensure_finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MessagingError::NonFinite { field, value })
    }
}

/// Snapshot of the three water-quality quantities exchanged between node and monitor.
///
/// Every field is finite at all times; setters refuse NaN and infinities so a
/// failed conversion can never replace the last good value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingSet {
    turbidity: f64,
    temperature: f64,
    ph: f64,
}

impl ReadingSet {
    /// Build a reading set from explicit values.
    pub fn new(turbidity: f64, temperature: f64, ph: f64) -> Result<Self> {
        Ok(Self {
            turbidity: ensure_finite("tur", turbidity)?,
            temperature: ensure_finite("tmp", temperature)?,
            ph: ensure_finite("pH", ph)?,
        })
    }

    /// Turbidity in percent (0 clear, 100 opaque).
    pub fn turbidity(&self) -> f64 {
        self.turbidity
    }

    /// Temperature in degrees Celsius.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Acidity on the 0-14 pH scale.
    pub fn ph(&self) -> f64 {
        self.ph
    }

    /// Replace the turbidity value.
    pub fn set_turbidity(&mut self, value: f64) -> Result<()> {
        self.turbidity = ensure_finite("tur", value)?;
        Ok(())
    }

    /// Replace the temperature value.
    pub fn set_temperature(&mut self, value: f64) -> Result<()> {
        self.temperature = ensure_finite("tmp", value)?;
        Ok(())
    }

    /// Replace the pH value.
    pub fn set_ph(&mut self, value: f64) -> Result<()> {
        self.ph = ensure_finite("pH", value)?;
        Ok(())
    }

    /// Whether the temperature currently holds the failure sentinel.
    pub fn temperature_is_sentinel(&self) -> bool {
        self.temperature == TEMPERATURE_SENTINEL
    }

    /// Apply a partial update, leaving absent fields untouched.
    ///
    /// Returns the number of fields that were written. Non-finite values are
    /// skipped, which keeps the set valid even for hand-built updates.
    pub fn apply(&mut self, update: &ReadingUpdate) -> usize {
        let mut written = 0;
        if let Some(value) = update.turbidity {
            written += usize::from(self.set_turbidity(value).is_ok());
        }
        if let Some(value) = update.temperature {
            written += usize::from(self.set_temperature(value).is_ok());
        }
        if let Some(value) = update.ph {
            written += usize::from(self.set_ph(value).is_ok());
        }
        written
    }
}

/// Partial reading set as decoded from a single wire frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReadingUpdate {
    /// Turbidity in percent, when present in the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turbidity: Option<f64>,
    /// Temperature in degrees Celsius, when present in the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// pH value, when present in the frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ph: Option<f64>,
}

impl ReadingUpdate {
    /// True when the frame carried none of the known fields.
    pub fn is_empty(&self) -> bool {
        self.turbidity.is_none() && self.temperature.is_none() && self.ph.is_none()
    }

    /// Number of fields carried by the update.
    pub fn field_count(&self) -> usize {
        [self.turbidity, self.temperature, self.ph]
            .iter()
            .filter(|field| field.is_some())
            .count()
    }
}

impl From<ReadingSet> for ReadingUpdate {
    fn from(set: ReadingSet) -> Self {
        Self {
            turbidity: Some(set.turbidity),
            temperature: Some(set.temperature),
            ph: Some(set.ph),
        }
    }
}
