//! Confidence policy shared by detectors and reconciliation.

use super::pattern::PatternFamily;

/// Confidence values for pattern families and corroboration.
///
/// Implementations must keep `normalize` within `[0, ceiling]`.
pub trait ConfidenceModel: Send + Sync {
    /// Base confidence for a pattern family match.
    fn base(&self, family: PatternFamily) -> f32;

    /// Added once per distinct corroborating source.
    fn corroboration_boost(&self) -> f32 {
        0.05
    }

    /// No reconciled confidence exceeds this.
    fn ceiling(&self) -> f32 {
        0.99
    }

    /// Clamp a detector-reported confidence into `[0, ceiling]`.
    fn normalize(&self, raw: f32) -> f32 {
        if raw.is_nan() {
            0.0
        } else {
            raw.clamp(0.0, self.ceiling())
        }
    }

    /// Confidence after `corroborators` distinct sources agreed.
    fn corroborated(&self, base: f32, corroborators: usize) -> f32 {
        (base + corroborators as f32 * self.corroboration_boost()).min(self.ceiling())
    }
}

/// Standard confidence table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfidenceModel;

impl ConfidenceModel for DefaultConfidenceModel {
    fn base(&self, family: PatternFamily) -> f32 {
        match family {
            PatternFamily::Email => 0.95,
            PatternFamily::NumericDate | PatternFamily::Currency | PatternFamily::NiNumber => 0.9,
            PatternFamily::TitledName
            | PatternFamily::Organization
            | PatternFamily::LongDate
            | PatternFamily::NeutralCitation
            | PatternFamily::LegalRole => 0.85,
            PatternFamily::CaseNumber | PatternFamily::Phone => 0.8,
            PatternFamily::Postcode => 0.75,
            PatternFamily::CapitalisedName => 0.6,
        }
    }
}
