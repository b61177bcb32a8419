use ambulink_core::triage::{classify, vital_bands, Band};
use serde::Serialize;

use crate::cli::VitalsArgs;
use crate::commands::common::normalize_complaint;
use crate::error::CliError;

const VITAL_NAMES: [&str; 5] = [
    "heartRate",
    "oxygenSaturation",
    "temperature",
    "systolic",
    "respiratoryRate",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyReport {
    pub severity: String,
    pub critical: bool,
    pub bands: Vec<(&'static str, &'static str)>,
}

pub fn run_classify(
    complaint_parts: &[String],
    vitals: &VitalsArgs,
    as_json: bool,
) -> Result<(), CliError> {
    let complaint = normalize_complaint(complaint_parts)?;
    let report = classify_report(vitals, &complaint);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let marker = if report.critical { "  CRITICAL" } else { "" };
    println!("{}{marker}", report.severity);
    for (name, band) in &report.bands {
        println!("  {name:<18} {band}");
    }
    Ok(())
}

pub fn classify_report(vitals: &VitalsArgs, complaint: &str) -> ClassifyReport {
    let vitals = vitals.to_vitals();
    let severity = classify(&vitals, complaint);
    let bands = VITAL_NAMES
        .into_iter()
        .zip(vital_bands(&vitals))
        .map(|(name, band)| (name, band_label(band)))
        .collect();
    ClassifyReport {
        severity: severity.to_string(),
        critical: severity.is_critical(),
        bands,
    }
}

const fn band_label(band: Band) -> &'static str {
    match band {
        Band::Normal => "normal",
        Band::Borderline => "borderline",
        Band::Danger => "danger",
        Band::Critical => "critical",
    }
}
