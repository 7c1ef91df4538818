//! Core logging types: step entries, status, and the [`Log`] trait.

/// Result of one orchestrated step, kept for the run summary.
#[derive(Debug, Clone)]
pub struct StepEntry {
    /// Step label, e.g. `1764056138_v8_coords_to_v9` or a config path.
    pub name: String,
    /// Final status of the step.
    pub status: StepStatus,
    /// Optional detail (skip reason, changed files, error description).
    pub message: Option<String>,
}

/// Status of a completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Migration applied and committed.
    Applied,
    /// Migration rolled back and committed.
    RolledBack,
    /// Nothing to do for this step.
    Skipped,
    /// Step ran in dry-run mode; the transaction was aborted.
    DryRun,
    /// Step failed; its transaction was aborted.
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Applied => "applied",
            Self::RolledBack => "rolled back",
            Self::Skipped => "skipped",
            Self::DryRun => "dry run",
            Self::Failed => "failed",
        })
    }
}

/// Abstraction over logging backends.
///
/// The orchestrator only sees this trait, so tests can hand it a logger
/// without a global subscriber.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a step result for the summary.
    fn record_step(&self, name: &str, status: StepStatus, message: Option<&str>);
}
