use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::approval_number::ApprovalPrefix;

/// Placeholder stored when an administrator rejects without typing a reason.
pub const REJECTION_PLACEHOLDER: &str = "사유 미입력";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Application {
    pub id: i64,
    pub student_id: String,
    pub application_type: ApplicationKind,
    pub reason: String,
    pub extra_info: Option<String>,
    pub status: ApplicationStatus,
    pub approval_number: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_source: Option<ApprovalSource>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    /// Written by older auto-approval runs; treated exactly like `Approved`.
    AutoApproved,
}

impl ApplicationStatus {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::AutoApproved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AutoApproved => "auto_approved",
        }
    }
}

impl std::str::FromStr for ApplicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "auto_approved" => Ok(Self::AutoApproved),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

/// Closed set of application categories. Free-text values from older data
/// are folded into this set once by migration; see [`ApplicationKind::classify`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApplicationKind {
    Phone,
    Tablet,
    Gate,
    Other,
}

impl ApplicationKind {
    /// Kinds a student may submit.
    pub const SUBMITTABLE: [ApplicationKind; 3] = [Self::Phone, Self::Tablet, Self::Gate];

    /// Classify a legacy free-text type string (English or Korean).
    /// Shares its keyword rules with [`ApprovalPrefix::for_type`].
    pub fn classify(raw: &str) -> Self {
        match ApprovalPrefix::for_type(raw) {
            ApprovalPrefix::Phone => Self::Phone,
            ApprovalPrefix::Tablet => Self::Tablet,
            ApprovalPrefix::Pass => Self::Gate,
            ApprovalPrefix::Doc => Self::Other,
        }
    }

    pub fn approval_prefix(&self) -> ApprovalPrefix {
        match self {
            Self::Phone => ApprovalPrefix::Phone,
            Self::Tablet => ApprovalPrefix::Tablet,
            Self::Gate => ApprovalPrefix::Pass,
            Self::Other => ApprovalPrefix::Doc,
        }
    }

    /// Gate applications feed the external roster spreadsheet.
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::Gate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Gate => "gate",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for ApplicationKind {
    type Err = String;

    /// Strict parse used at the submission boundary.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "phone" => Ok(Self::Phone),
            "tablet" => Ok(Self::Tablet),
            "gate" => Ok(Self::Gate),
            other => Err(format!("unsupported application type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ApprovalSource {
    Admin,
    Auto,
}

/// An administrator decision on a single application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Approve { approval_number: Option<String> },
    Reject { reason: Option<String> },
    Reset,
}

impl ReviewAction {
    /// Build an action from the PATCH body fields.
    pub fn parse(
        action: Option<&str>,
        rejection_reason: Option<String>,
        approval_number: Option<String>,
    ) -> Result<Self, String> {
        match action.map(str::trim) {
            Some("approve") => Ok(Self::Approve { approval_number }),
            Some("reject") => Ok(Self::Reject {
                reason: rejection_reason,
            }),
            Some("reset") => Ok(Self::Reset),
            _ => Err("action must be one of approve, reject, reset".to_string()),
        }
    }

    /// Approve and reject touch the gate roster; reset does not.
    pub fn affects_roster(&self) -> bool {
        !matches!(self, Self::Reset)
    }

    /// The explicitly supplied approval number, if it is non-blank.
    pub fn requested_number(&self) -> Option<&str> {
        match self {
            Self::Approve {
                approval_number: Some(n),
            } if !n.trim().is_empty() => Some(n.trim()),
            _ => None,
        }
    }
}

/// Full column set written by a status transition. Every field is written,
/// so cleared columns are `None` rather than skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: ApplicationStatus,
    pub approval_number: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_source: Option<ApprovalSource>,
    pub rejection_reason: Option<String>,
}

impl StatusPatch {
    pub fn approve(approval_number: String, reviewer: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: ApplicationStatus::Approved,
            approval_number: Some(approval_number),
            approved_at: Some(now),
            approved_by: Some(reviewer.to_string()),
            approved_source: Some(ApprovalSource::Admin),
            rejection_reason: None,
        }
    }

    pub fn reject(reason: Option<&str>, reviewer: &str, now: DateTime<Utc>) -> Self {
        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(REJECTION_PLACEHOLDER);
        Self {
            status: ApplicationStatus::Rejected,
            approval_number: None,
            approved_at: Some(now),
            approved_by: Some(reviewer.to_string()),
            approved_source: Some(ApprovalSource::Admin),
            rejection_reason: Some(reason.to_string()),
        }
    }

    pub fn reset() -> Self {
        Self {
            status: ApplicationStatus::Pending,
            approval_number: None,
            approved_at: None,
            approved_by: None,
            approved_source: None,
            rejection_reason: None,
        }
    }
}
