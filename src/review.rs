//! Administrator review of applications: approve, reject, reset.
//!
//! Shared by the admin HTTP interface and the `approval` CLI commands.

use chrono::Utc;
use serde::Serialize;

use crate::models::application::{Application, ReviewAction, StatusPatch};
use crate::models::approval_number::next_number;
use crate::roster::{self, sheet::SheetClient};
use crate::store::postgres::PgStore;

/// Result of a review. `sync_error` is set when the status change succeeded
/// but the follow-up roster sync did not.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub item: Application,
    pub sync_error: Option<String>,
}

/// Where a review pushes the gate roster afterwards.
pub struct RosterSync<'a> {
    pub sheets: &'a SheetClient,
    pub fallback_url: Option<&'a str>,
}

/// Apply `action` to application `id`. Returns `Ok(None)` when no such
/// application exists.
pub async fn review_application(
    store: &PgStore,
    sync: Option<RosterSync<'_>>,
    id: i64,
    action: &ReviewAction,
    reviewer: &str,
) -> anyhow::Result<Option<ReviewOutcome>> {
    let Some(current) = store.get_application(id).await? else {
        return Ok(None);
    };

    let now = Utc::now();
    let patch = match action {
        ReviewAction::Approve { .. } => {
            let number = match action.requested_number() {
                Some(n) => n.to_string(),
                None => {
                    let prefix = current.application_type.approval_prefix();
                    let existing = store.approval_numbers_with_prefix(prefix).await?;
                    next_number(prefix, existing)
                }
            };
            StatusPatch::approve(number, reviewer, now)
        }
        ReviewAction::Reject { reason } => StatusPatch::reject(reason.as_deref(), reviewer, now),
        ReviewAction::Reset => StatusPatch::reset(),
    };

    let Some(item) = store.apply_status_patch(id, &patch).await? else {
        return Ok(None);
    };
    tracing::info!(
        id,
        status = item.status.as_str(),
        approval_number = ?item.approval_number,
        reviewer,
        "application reviewed"
    );

    let mut sync_error = None;
    if item.application_type.is_gate() && action.affects_roster() {
        if let Some(sync) = sync {
            if let Err(e) = roster::sync_roster(store, sync.sheets, sync.fallback_url).await {
                tracing::warn!(id, "roster sync after review failed: {:#}", e);
                sync_error = Some(e.to_string());
            }
        }
    }

    Ok(Some(ReviewOutcome { item, sync_error }))
}
