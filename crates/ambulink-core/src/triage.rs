//! Triage classification.
//!
//! [`classify`] maps a vitals snapshot and a chief complaint to an ESI tier.
//! It is total and deterministic: the device (for local display), the hub
//! (for alert severity) and the facility viewer (after a vitals refresh) all
//! call it and must agree without talking to each other.
//!
//! Each vital falls into a [`Band`]. Absent core vitals (heart rate, SpO₂,
//! temperature) count as [`Band::Danger`]; absent supplementary vitals (blood
//! pressure, respiratory rate) count as [`Band::Borderline`]. Unusable values
//! count as [`Band::Danger`].
//!
//! | Bands present          | Tier  |
//! |------------------------|-------|
//! | any critical           | ESI-1 |
//! | any danger             | ESI-2 |
//! | three or more borderline | ESI-3 |
//! | one or two borderline  | ESI-4 |
//! | all normal             | ESI-5 |
//!
//! The complaint can only raise severity: critical keywords cap the tier at
//! ESI-2, urgent keywords at ESI-3.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Reading, Severity, Vitals};

/// Severity band for a single vital reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Normal,
    Borderline,
    Danger,
    Critical,
}

static CRITICAL_COMPLAINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(unconscious|unresponsive|cardiac arrest|not breathing|stroke|seizures?|shock|anaphylaxis|anaphylactic|chest pain|overdose|severe bleeding)\b",
    )
    .expect("Invalid regex")
});

static URGENT_COMPLAINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(pain|breathing|difficulty|bleeding|fracture|trauma|allergic|fall|burns?)\b",
    )
    .expect("Invalid regex")
});

/// Classify a patient into an ESI tier.
pub fn classify(vitals: &Vitals, complaint: &str) -> Severity {
    let bands = vital_bands(vitals);
    let from_vitals = tier_from_bands(&bands);
    let from_complaint = complaint_ceiling(complaint);
    from_vitals.min(from_complaint)
}

/// Bands for each vital, in the order heart rate, SpO₂, temperature,
/// systolic pressure, respiratory rate.
pub fn vital_bands(vitals: &Vitals) -> [Band; 5] {
    [
        core_band(Reading::from(vitals.heart_rate), heart_rate_band),
        core_band(Reading::from(vitals.oxygen_saturation), oxygen_band),
        core_band(Reading::from(vitals.temperature), temperature_band),
        supplementary_band(vitals.systolic(), systolic_band),
        supplementary_band(Reading::from(vitals.respiratory_rate), respiratory_band),
    ]
}

fn tier_from_bands(bands: &[Band]) -> Severity {
    let worst = bands.iter().copied().max().unwrap_or(Band::Danger);
    let borderline = bands.iter().filter(|band| **band == Band::Borderline).count();
    match worst {
        Band::Critical => Severity::Esi1,
        Band::Danger => Severity::Esi2,
        Band::Borderline if borderline >= 3 => Severity::Esi3,
        Band::Borderline => Severity::Esi4,
        Band::Normal => Severity::Esi5,
    }
}

/// Least severe tier the complaint allows.
pub fn complaint_ceiling(complaint: &str) -> Severity {
    if CRITICAL_COMPLAINT.is_match(complaint) {
        Severity::Esi2
    } else if URGENT_COMPLAINT.is_match(complaint) {
        Severity::Esi3
    } else {
        Severity::Esi5
    }
}

fn core_band(reading: Reading, band: fn(f64) -> Option<Band>) -> Band {
    match reading {
        Reading::Missing | Reading::Invalid => Band::Danger,
        Reading::Value(value) => band(value).unwrap_or(Band::Danger),
    }
}

fn supplementary_band(reading: Reading, band: fn(f64) -> Option<Band>) -> Band {
    match reading {
        Reading::Missing => Band::Borderline,
        Reading::Invalid => Band::Danger,
        Reading::Value(value) => band(value).unwrap_or(Band::Danger),
    }
}

// Each band function returns `None` for physiologically impossible values.

fn heart_rate_band(bpm: f64) -> Option<Band> {
    if !(0.0..=350.0).contains(&bpm) {
        return None;
    }
    Some(if !(40.0..=150.0).contains(&bpm) {
        Band::Critical
    } else if bpm < 50.0 || bpm > 120.0 {
        Band::Danger
    } else if bpm < 60.0 || bpm > 100.0 {
        Band::Borderline
    } else {
        Band::Normal
    })
}

fn oxygen_band(percent: f64) -> Option<Band> {
    if !(0.0..=100.0).contains(&percent) {
        return None;
    }
    Some(if percent < 88.0 {
        Band::Critical
    } else if percent < 92.0 {
        Band::Danger
    } else if percent < 95.0 {
        Band::Borderline
    } else {
        Band::Normal
    })
}

fn temperature_band(celsius: f64) -> Option<Band> {
    if !(15.0..=46.0).contains(&celsius) {
        return None;
    }
    Some(if !(32.0..=40.5).contains(&celsius) {
        Band::Critical
    } else if celsius < 35.0 || celsius >= 39.0 {
        Band::Danger
    } else if celsius < 36.0 || celsius >= 38.0 {
        Band::Borderline
    } else {
        Band::Normal
    })
}

fn systolic_band(mmhg: f64) -> Option<Band> {
    if !(0.0..=320.0).contains(&mmhg) {
        return None;
    }
    Some(if !(80.0..=220.0).contains(&mmhg) {
        Band::Critical
    } else if mmhg < 90.0 || mmhg > 180.0 {
        Band::Danger
    } else if mmhg < 100.0 || mmhg > 160.0 {
        Band::Borderline
    } else {
        Band::Normal
    })
}

fn respiratory_band(per_minute: f64) -> Option<Band> {
    if !(0.0..=80.0).contains(&per_minute) {
        return None;
    }
    Some(if !(8.0..=30.0).contains(&per_minute) {
        Band::Critical
    } else if per_minute < 10.0 || per_minute > 24.0 {
        Band::Danger
    } else if per_minute < 12.0 || per_minute > 20.0 {
        Band::Borderline
    } else {
        Band::Normal
    })
}
