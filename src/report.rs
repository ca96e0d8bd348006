use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SweepMode {
    /// One execution with no layout exploration.
    Baseline,
    AllOutputLayouts,
    AllInputLayouts,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SweepStatus {
    Done,
    Failed,
}

/// Outcome of comparing one layout combination against the expected value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub ordinal: usize,
    pub context: String,
    pub passed: bool,
    /// Rendered [`ComparisonFailure`](crate::comparison::ComparisonFailure) when the
    /// comparison failed.
    pub failure: Option<String>,
    pub actual_digest: String,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub computation: String,
    pub mode: SweepMode,
    pub status: SweepStatus,
    pub records: Vec<ComparisonRecord>,
    pub duration_ms: f64,
}

impl SweepReport {
    pub fn new(computation: impl Into<String>, mode: SweepMode) -> Self {
        Self {
            computation: computation.into(),
            mode,
            status: SweepStatus::Done,
            records: Vec::new(),
            duration_ms: 0.0,
        }
    }

    pub fn push(&mut self, record: ComparisonRecord) {
        if !record.passed {
            self.status = SweepStatus::Failed;
        }
        self.records.push(record);
    }

    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn passed(&self) -> bool {
        self.status == SweepStatus::Done
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComparisonRecord> {
        self.records.iter().filter(|record| !record.passed)
    }

    pub fn contexts(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|record| record.context.as_str())
            .collect()
    }

    /// Every failed comparison, rendered for an assertion message.
    pub fn failure_summary(&self) -> String {
        let failures: Vec<String> = self
            .failures()
            .map(|record| {
                format!(
                    "[{}] {}\n{}",
                    record.ordinal,
                    if record.context.is_empty() {
                        "no layout constraint"
                    } else {
                        record.context.as_str()
                    },
                    record.failure.as_deref().unwrap_or_default()
                )
            })
            .collect();
        format!(
            "{}: {} of {} comparison(s) failed\n{}",
            self.computation,
            failures.len(),
            self.records.len(),
            failures.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{ComparisonRecord, SweepMode, SweepReport, SweepStatus};

    fn record(ordinal: usize, passed: bool) -> ComparisonRecord {
        ComparisonRecord {
            ordinal,
            context: format!("ctx-{ordinal}"),
            passed,
            failure: (!passed).then(|| "values differ".to_string()),
            actual_digest: String::new(),
            duration_ms: 0.0,
        }
    }

    #[test]
    fn one_failure_fails_the_report() {
        let mut report = SweepReport::new("add", SweepMode::AllOutputLayouts);
        report.push(record(0, true));
        assert_eq!(report.status, SweepStatus::Done);
        report.push(record(1, false));
        report.push(record(2, true));
        assert_eq!(report.status, SweepStatus::Failed);
        assert_eq!(report.failures().count(), 1);
        let summary = report.failure_summary();
        assert!(summary.contains("1 of 3"));
        assert!(summary.contains("ctx-1"));
    }
}
