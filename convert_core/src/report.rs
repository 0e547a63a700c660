use serde::Serialize;
use tracing::info;

use crate::region_map::{CoverageIssue, Severity};

/// Counters collected while a conversion runs, logged once at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionReport {
    pub realms: usize,
    pub countries_converted: usize,
    pub provinces_converted: usize,
    pub provinces_rest_of_world: usize,
    pub advisors_placed: usize,
    pub advisors_dropped: usize,
    pub coverage_warnings: usize,
    pub coverage_errors: usize,
    pub player: Option<String>,
}

impl ConversionReport {
    pub fn record_coverage(&mut self, issues: &[CoverageIssue]) {
        for issue in issues {
            match issue.severity() {
                Severity::Warning => self.coverage_warnings += 1,
                Severity::Error => self.coverage_errors += 1,
            }
        }
    }

    pub fn log(&self) {
        info!(
            target: "ck2_to_eu3::report",
            realms = self.realms,
            countries = self.countries_converted,
            provinces = self.provinces_converted,
            rest_of_world = self.provinces_rest_of_world,
            advisors_placed = self.advisors_placed,
            advisors_dropped = self.advisors_dropped,
            coverage_warnings = self.coverage_warnings,
            coverage_errors = self.coverage_errors,
            player = self.player.as_deref().unwrap_or("none"),
            "conversion.summary"
        );
    }
}
