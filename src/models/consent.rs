use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConsentDocument {
    pub id: i64,
    pub consent_type: String,
    pub title: String,
    pub content: String,
    pub version: i32,
    pub is_required: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentStatus {
    pub required: bool,
    pub agreed: bool,
    pub agreed_at: Option<DateTime<Utc>>,
    pub document: Option<ConsentDocument>,
}

impl ConsentStatus {
    /// `latest` is the newest active required document; `agreed_at` is the
    /// user's acknowledgement of exactly that document.
    pub fn evaluate(latest: Option<ConsentDocument>, agreed_at: Option<DateTime<Utc>>) -> Self {
        match latest {
            None => Self {
                required: false,
                agreed: true,
                agreed_at: None,
                document: None,
            },
            Some(doc) => Self {
                required: true,
                agreed: agreed_at.is_some(),
                agreed_at,
                document: Some(doc),
            },
        }
    }

    /// Whether the user may submit applications.
    pub fn is_satisfied(&self) -> bool {
        !self.required || self.agreed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> ConsentDocument {
        ConsentDocument {
            id: 3,
            consent_type: "privacy".into(),
            title: "개인정보 수집·이용 동의".into(),
            content: "...".into(),
            version: 2,
            is_required: true,
            is_active: true,
        }
    }

    #[test]
    fn test_no_document_means_nothing_required() {
        let s = ConsentStatus::evaluate(None, None);
        assert!(!s.required);
        assert!(s.is_satisfied());
    }

    #[test]
    fn test_outstanding_document_blocks() {
        let s = ConsentStatus::evaluate(Some(doc()), None);
        assert!(s.required);
        assert!(!s.agreed);
        assert!(!s.is_satisfied());

        let agreed = ConsentStatus::evaluate(Some(doc()), Some(Utc::now()));
        assert!(agreed.is_satisfied());
    }
}
