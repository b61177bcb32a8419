//! Vital signs snapshot

use serde::{Deserialize, Serialize};

/// Vital signs as captured in the field. Every reading is optional; the
/// triage classifier treats absent readings conservatively.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vitals {
    /// Beats per minute
    #[serde(default)]
    pub heart_rate: Option<f64>,
    /// Systolic/diastolic in mmHg, e.g. `"120/80"`
    #[serde(default)]
    pub blood_pressure: Option<String>,
    /// Peripheral oxygen saturation in percent
    #[serde(default)]
    pub oxygen_saturation: Option<f64>,
    /// Body temperature in °C
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Breaths per minute
    #[serde(default)]
    pub respiratory_rate: Option<f64>,
}

/// A single vital reading as seen by the classifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Missing,
    /// Present but unusable (unparsable, non-finite)
    Invalid,
    Value(f64),
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        match value {
            None => Self::Missing,
            Some(value) if value.is_finite() => Self::Value(value),
            Some(_) => Self::Invalid,
        }
    }
}

impl Vitals {
    /// Systolic pressure parsed from `blood_pressure`.
    pub fn systolic(&self) -> Reading {
        let Some(raw) = self.blood_pressure.as_deref().map(str::trim) else {
            return Reading::Missing;
        };
        if raw.is_empty() {
            return Reading::Missing;
        }
        let systolic = raw.split('/').next().unwrap_or_default().trim();
        systolic
            .parse::<f64>()
            .map_or(Reading::Invalid, |value| Reading::from(Some(value)))
    }

    /// Overlay the readings present in `update` onto `self`.
    pub fn merge(&mut self, update: &Self) {
        if update.heart_rate.is_some() {
            self.heart_rate = update.heart_rate;
        }
        if update.blood_pressure.is_some() {
            self.blood_pressure.clone_from(&update.blood_pressure);
        }
        if update.oxygen_saturation.is_some() {
            self.oxygen_saturation = update.oxygen_saturation;
        }
        if update.temperature.is_some() {
            self.temperature = update.temperature;
        }
        if update.respiratory_rate.is_some() {
            self.respiratory_rate = update.respiratory_rate;
        }
    }
}
