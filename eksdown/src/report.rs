use tracing::{error, info, warn};

use crate::resource::{OperationOutcome, OutcomeStatus};

/// Accumulates per-resource outcomes for the run summary
///
/// Purely additive; the reporter never triggers retries or alters control flow
#[derive(Debug, Default)]
pub struct StateReporter {
  outcomes: Vec<OperationOutcome>,
}

impl StateReporter {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record an outcome, logging it as it occurs
  pub fn record(&mut self, outcome: OperationOutcome) {
    let resource = &outcome.resource;
    match outcome.status {
      OutcomeStatus::Deleted if outcome.detail.is_empty() => {
        info!("Deleted {} {}", resource.kind, resource.identifier)
      }
      OutcomeStatus::Deleted => info!("Deleted {} {} ({})", resource.kind, resource.identifier, outcome.detail),
      OutcomeStatus::NotFound => info!("{} {} not found", resource.kind, resource.identifier),
      OutcomeStatus::Skipped => warn!("Skipped {} {}: {}", resource.kind, resource.identifier, outcome.detail),
      OutcomeStatus::Failed => error!(
        "Failed to delete {} {}: {}",
        resource.kind, resource.identifier, outcome.detail
      ),
    }
    self.outcomes.push(outcome);
  }

  pub fn outcomes(&self) -> &[OperationOutcome] {
    &self.outcomes
  }

  pub fn any_failed(&self) -> bool {
    self.outcomes.iter().any(|o| o.status == OutcomeStatus::Failed)
  }

  pub fn into_outcomes(self) -> Vec<OperationOutcome> {
    self.outcomes
  }

  pub fn summary(&self) -> String {
    render_summary(&self.outcomes)
  }
}

/// Render the final summary: status counts, then every failed entry in full so the
/// operator knows exactly what needs manual follow-up
pub fn render_summary(outcomes: &[OperationOutcome]) -> String {
  let count = |status: OutcomeStatus| outcomes.iter().filter(|o| o.status == status).count();
  let failed: Vec<&OperationOutcome> = outcomes.iter().filter(|o| o.status == OutcomeStatus::Failed).collect();

  let mut summary = format!(
    "Teardown summary: {} deleted, {} not found, {} skipped, {} failed",
    count(OutcomeStatus::Deleted),
    count(OutcomeStatus::NotFound),
    count(OutcomeStatus::Skipped),
    failed.len(),
  );

  if !failed.is_empty() {
    summary.push_str("\n\nThe following resources require manual attention:");
    for outcome in failed {
      summary.push_str(&format!(
        "\n  {} {} - {}",
        outcome.resource.kind, outcome.resource.identifier, outcome.detail
      ));
    }
  }

  summary
}
