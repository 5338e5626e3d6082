//! Step identifiers and the transition table.
//!
//! ```text
//! Ingest ─▶ Extract ─▶ Verify ─┬─▶ Enrich ─┬─▶ SideStep(0) ─▶ … ─▶ SideStep(n-1) ─┬─▶ Embed ─▶ Persist ─▶ Done
//!                              └───────────┴──────────────────────────────────────┘
//! ```
//!
//! `Enrich` runs only when the run asked for it; side-steps only when some
//! are registered. A fatal step that fails sets the outcome and the driver
//! stops before consulting the table.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Ingest,
    Extract,
    Verify,
    Enrich,
    /// The i-th registered optional side-step.
    SideStep(usize),
    Embed,
    Persist,
    /// Terminator.
    Done,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Ingest => "ingest",
            Step::Extract => "extract",
            Step::Verify => "verify",
            Step::Enrich => "enrich",
            Step::SideStep(_) => "side_step",
            Step::Embed => "embed",
            Step::Persist => "persist",
            Step::Done => "done",
        }
    }

    /// Whether a failure in this step ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Step::Ingest | Step::Extract | Step::Embed | Step::Persist
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::SideStep(i) => write!(f, "side_step[{}]", i),
            other => f.write_str(other.name()),
        }
    }
}

/// Per-run routing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub enrich: bool,
    pub side_steps: usize,
}

impl Route {
    /// Successor of `step` when the step did not end the run.
    pub fn next(&self, step: Step) -> Step {
        match step {
            Step::Ingest => Step::Extract,
            Step::Extract => Step::Verify,
            Step::Verify if self.enrich => Step::Enrich,
            Step::Verify | Step::Enrich => self.after_description(),
            Step::SideStep(i) if i + 1 < self.side_steps => Step::SideStep(i + 1),
            Step::SideStep(_) => Step::Embed,
            Step::Embed => Step::Persist,
            Step::Persist | Step::Done => Step::Done,
        }
    }

    fn after_description(&self) -> Step {
        if self.side_steps > 0 {
            Step::SideStep(0)
        } else {
            Step::Embed
        }
    }

    /// Full step sequence of a run that never fails.
    pub fn plan(&self) -> Vec<Step> {
        let mut steps = Vec::new();
        let mut step = Step::Ingest;
        while step != Step::Done {
            steps.push(step);
            step = self.next(step);
        }
        steps
    }
}
