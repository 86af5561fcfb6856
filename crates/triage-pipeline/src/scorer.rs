use serde::{Deserialize, Serialize};

use triage_core::types::SeverityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityAssessment {
    pub severity: u8,
    pub tier: SeverityTier,
}

/// Maps a calibrated confidence onto the 1..=5 severity scale and its tier.
pub struct TriageScorer;

impl TriageScorer {
    /// Total over all inputs: NaN counts as 0, out-of-range values are clamped.
    pub fn score(confidence: f32) -> SeverityAssessment {
        let c = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        let severity = ((c * 5.0).floor() as u8).clamp(1, 5);
        SeverityAssessment { severity, tier: Self::tier_for(severity) }
    }

    pub fn tier_for(severity: u8) -> SeverityTier {
        match severity {
            4.. => SeverityTier::Critical,
            3 => SeverityTier::Severe,
            2 => SeverityTier::Moderate,
            _ => SeverityTier::Mild,
        }
    }

    pub fn reason(condition: &str, confidence: f32) -> String {
        format!("Based on analysis of {condition} with {:.2}% confidence", confidence * 100.0)
    }

    pub fn recommendation(tier: SeverityTier, condition: &str, description: Option<&str>) -> String {
        let lead = match tier {
            SeverityTier::Critical => format!("Seek immediate medical attention for {condition}."),
            SeverityTier::Severe => format!("Seek urgent medical care for {condition}."),
            SeverityTier::Moderate => format!("Schedule a routine appointment for {condition}."),
            SeverityTier::Mild => format!("Monitor {condition} and practice self-care."),
        };
        match description.map(str::trim).filter(|d| !d.is_empty()) {
            Some(d) => format!("{lead} {d}"),
            None => lead,
        }
    }
}
