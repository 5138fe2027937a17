//! Checker configuration.

use crate::model::MemoryModel;

/// Options shared by every checker. Chosen once, before checking starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckerConfig {
    pub model: MemoryModel,
    /// Skip the non-atomic and write-write race checks.
    pub disable_race_detection: bool,
    pub report_ww_races: bool,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            model: MemoryModel::Rc11,
            disable_race_detection: false,
            report_ww_races: true,
        }
    }
}

impl CheckerConfig {
    pub fn new(model: MemoryModel) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: MemoryModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_race_detection(mut self, enabled: bool) -> Self {
        self.disable_race_detection = !enabled;
        self
    }

    pub fn with_ww_races(mut self, report: bool) -> Self {
        self.report_ww_races = report;
        self
    }
}
