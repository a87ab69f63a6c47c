use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::models::application::ApplicationKind;

pub const MAX_DELAY_MINUTES: i32 = 1440;
pub const DEFAULT_DELAY_MINUTES: i32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PolicyKey {
    Phone,
    Tablet,
    Pass,
}

impl PolicyKey {
    pub const ALL: [PolicyKey; 3] = [Self::Phone, Self::Tablet, Self::Pass];

    /// The policy governing an application kind. `Other` has none and is
    /// never auto-approved.
    pub fn for_kind(kind: ApplicationKind) -> Option<Self> {
        match kind {
            ApplicationKind::Phone => Some(Self::Phone),
            ApplicationKind::Tablet => Some(Self::Tablet),
            ApplicationKind::Gate => Some(Self::Pass),
            ApplicationKind::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Pass => "pass",
        }
    }
}

impl std::str::FromStr for PolicyKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "phone" => Ok(Self::Phone),
            "tablet" => Ok(Self::Tablet),
            "pass" => Ok(Self::Pass),
            _ => Err("policy_key must be one of phone, tablet, pass".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum PolicyMode {
    Manual,
    Immediate,
    Delayed,
}

impl PolicyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
        }
    }
}

impl std::str::FromStr for PolicyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "manual" => Ok(Self::Manual),
            "immediate" => Ok(Self::Immediate),
            "delayed" => Ok(Self::Delayed),
            _ => Err("mode must be one of manual, immediate, delayed".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApprovalPolicy {
    pub policy_key: PolicyKey,
    pub mode: PolicyMode,
    pub delay_minutes: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApprovalPolicy {
    /// Policy assumed for a category that has no stored row.
    pub fn default_for(policy_key: PolicyKey) -> Self {
        Self {
            policy_key,
            mode: PolicyMode::Manual,
            delay_minutes: DEFAULT_DELAY_MINUTES,
            updated_at: None,
        }
    }

    /// The moment a pending application submitted at `submitted_at` becomes
    /// eligible for the auto-approval run, or `None` under `manual`.
    ///
    /// Mirrors the store-side `run_auto_approval()` predicate.
    pub fn eligible_at(&self, submitted_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.mode {
            PolicyMode::Manual => None,
            PolicyMode::Immediate => Some(submitted_at),
            PolicyMode::Delayed => {
                Some(submitted_at + Duration::minutes(i64::from(self.delay_minutes)))
            }
        }
    }

    pub fn is_eligible(&self, submitted_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.eligible_at(submitted_at).is_some_and(|at| now >= at)
    }
}

/// Validate a requested delay. Fractional minutes are floored.
pub fn validate_delay(raw: Option<f64>) -> Result<i32, String> {
    let value = raw.unwrap_or(f64::from(DEFAULT_DELAY_MINUTES));
    if !value.is_finite() || value < 0.0 || value > f64::from(MAX_DELAY_MINUTES) {
        return Err(format!(
            "delay_minutes must be between 0 and {}",
            MAX_DELAY_MINUTES
        ));
    }
    Ok(value.floor() as i32)
}

/// A validated policy upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyUpdate {
    pub policy_key: PolicyKey,
    pub mode: PolicyMode,
    pub delay_minutes: i32,
}

impl PolicyUpdate {
    pub fn parse(
        policy_key: Option<&str>,
        mode: Option<&str>,
        delay_minutes: Option<f64>,
    ) -> Result<Self, String> {
        let policy_key = policy_key
            .ok_or_else(|| "policy_key must be one of phone, tablet, pass".to_string())?
            .parse()?;
        let mode = mode
            .ok_or_else(|| "mode must be one of manual, immediate, delayed".to_string())?
            .parse()?;
        let delay_minutes = validate_delay(delay_minutes)?;
        Ok(Self {
            policy_key,
            mode,
            delay_minutes,
        })
    }
}

/// Fill in defaults for any category the store has no row for, in key order.
pub fn complete_policies(mut stored: Vec<ApprovalPolicy>) -> Vec<ApprovalPolicy> {
    for key in PolicyKey::ALL {
        if !stored.iter().any(|p| p.policy_key == key) {
            stored.push(ApprovalPolicy::default_for(key));
        }
    }
    stored.sort_by_key(|p| p.policy_key);
    stored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn policy(mode: PolicyMode, delay: i32) -> ApprovalPolicy {
        ApprovalPolicy {
            policy_key: PolicyKey::Pass,
            mode,
            delay_minutes: delay,
            updated_at: None,
        }
    }

    #[test]
    fn test_delayed_policy_eligible_exactly_after_delay() {
        let p = policy(PolicyMode::Delayed, 10);
        let submitted = t("2026-03-04T08:00:00Z");

        assert!(!p.is_eligible(submitted, t("2026-03-04T08:00:00Z")));
        assert!(!p.is_eligible(submitted, t("2026-03-04T08:09:59Z")));
        assert!(p.is_eligible(submitted, t("2026-03-04T08:10:00Z")));
        assert!(p.is_eligible(submitted, t("2026-03-04T09:00:00Z")));
    }

    #[test]
    fn test_immediate_and_manual() {
        let submitted = t("2026-03-04T08:00:00Z");
        assert!(policy(PolicyMode::Immediate, 10).is_eligible(submitted, submitted));
        assert!(!policy(PolicyMode::Manual, 0).is_eligible(submitted, t("2030-01-01T00:00:00Z")));
        assert_eq!(policy(PolicyMode::Manual, 0).eligible_at(submitted), None);
    }

    #[test]
    fn test_validate_delay_bounds() {
        assert_eq!(validate_delay(None), Ok(DEFAULT_DELAY_MINUTES));
        assert_eq!(validate_delay(Some(0.0)), Ok(0));
        assert_eq!(validate_delay(Some(1440.0)), Ok(1440));
        assert_eq!(validate_delay(Some(12.9)), Ok(12));
        assert!(validate_delay(Some(-1.0)).is_err());
        assert!(validate_delay(Some(1441.0)).is_err());
        assert!(validate_delay(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_policy_update_rejects_unknown_mode() {
        assert!(PolicyUpdate::parse(Some("pass"), Some("weekly"), None).is_err());
        assert!(PolicyUpdate::parse(Some("gate"), Some("manual"), None).is_err());
        assert!(PolicyUpdate::parse(None, Some("manual"), None).is_err());

        let ok = PolicyUpdate::parse(Some("pass"), Some("delayed"), Some(10.0)).unwrap();
        assert_eq!(ok.policy_key, PolicyKey::Pass);
        assert_eq!(ok.mode, PolicyMode::Delayed);
        assert_eq!(ok.delay_minutes, 10);
    }

    #[test]
    fn test_complete_policies_fills_missing() {
        let stored = vec![policy(PolicyMode::Immediate, 0)];
        let all = complete_policies(stored);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].policy_key, PolicyKey::Phone);
        assert_eq!(all[0].mode, PolicyMode::Manual);
        assert_eq!(all[2].policy_key, PolicyKey::Pass);
        assert_eq!(all[2].mode, PolicyMode::Immediate);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PolicyKey::for_kind(ApplicationKind::Gate), Some(PolicyKey::Pass));
        assert_eq!(PolicyKey::for_kind(ApplicationKind::Other), None);
    }
}
