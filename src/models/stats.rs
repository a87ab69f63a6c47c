use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::models::application::ApplicationKind;

/// One application reduced to what the statistics need.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApplicationFact {
    pub student_id: String,
    pub application_type: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total_students: usize,
    pub total_applications: usize,
    pub unique_applicants: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentStats {
    /// Keys `"1"`..`"6"` and `"other"`.
    pub grades: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStats {
    pub by_type: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub unique_applicants_by_type: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub summary: Summary,
    pub students: StudentStats,
    pub applications: ApplicationStats,
}

const TYPE_BUCKETS: [&str; 4] = ["phone", "tablet", "gate", "other"];
const STATUS_BUCKETS: [&str; 4] = ["pending", "approved", "rejected", "other"];

fn zeroed(keys: &[&str]) -> BTreeMap<String, usize> {
    keys.iter().map(|k| (k.to_string(), 0)).collect()
}

fn type_bucket(raw: &str) -> &'static str {
    ApplicationKind::classify(raw).as_str()
}

fn status_bucket(raw: &str) -> &'static str {
    match raw.trim() {
        "pending" => "pending",
        "approved" | "auto_approved" => "approved",
        "rejected" => "rejected",
        _ => "other",
    }
}

impl Statistics {
    pub fn compute(grades: &[i32], facts: &[ApplicationFact]) -> Self {
        let grade_keys: Vec<String> = (1..=6).map(|g| g.to_string()).collect();
        let mut grade_counts: BTreeMap<String, usize> =
            grade_keys.iter().map(|k| (k.clone(), 0)).collect();
        grade_counts.insert("other".into(), 0);
        for grade in grades {
            let key = if (1..=6).contains(grade) {
                grade.to_string()
            } else {
                "other".to_string()
            };
            *grade_counts.entry(key).or_default() += 1;
        }

        let mut by_type = zeroed(&TYPE_BUCKETS);
        let mut by_status = zeroed(&STATUS_BUCKETS);
        let mut applicants: HashSet<&str> = HashSet::new();
        let mut applicants_by_type: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();

        for fact in facts {
            let kind = type_bucket(&fact.application_type);
            *by_type.entry(kind.to_string()).or_default() += 1;
            *by_status
                .entry(status_bucket(&fact.status).to_string())
                .or_default() += 1;
            applicants.insert(&fact.student_id);
            applicants_by_type
                .entry(kind)
                .or_default()
                .insert(&fact.student_id);
        }

        let mut unique_applicants_by_type = zeroed(&TYPE_BUCKETS);
        for (kind, ids) in applicants_by_type {
            unique_applicants_by_type.insert(kind.to_string(), ids.len());
        }

        Self {
            summary: Summary {
                total_students: grades.len(),
                total_applications: facts.len(),
                unique_applicants: applicants.len(),
            },
            students: StudentStats {
                grades: grade_counts,
            },
            applications: ApplicationStats {
                by_type,
                by_status,
                unique_applicants_by_type,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(student: &str, kind: &str, status: &str) -> ApplicationFact {
        ApplicationFact {
            student_id: student.into(),
            application_type: kind.into(),
            status: status.into(),
        }
    }

    #[test]
    fn test_empty_store_has_all_buckets() {
        let s = Statistics::compute(&[], &[]);
        assert_eq!(s.summary, Summary::default());
        assert_eq!(s.students.grades.len(), 7);
        assert_eq!(s.applications.by_type["gate"], 0);
        assert_eq!(s.applications.by_status["other"], 0);
    }

    #[test]
    fn test_buckets_and_unique_applicants() {
        let facts = vec![
            fact("a", "phone", "approved"),
            fact("a", "gate", "auto_approved"),
            fact("b", "phone", "pending"),
            fact("c", "tablet", "rejected"),
            fact("c", "other", "weird"),
        ];
        let s = Statistics::compute(&[1, 1, 6, 9], &facts);

        assert_eq!(s.summary.total_students, 4);
        assert_eq!(s.summary.total_applications, 5);
        assert_eq!(s.summary.unique_applicants, 3);

        assert_eq!(s.students.grades["1"], 2);
        assert_eq!(s.students.grades["6"], 1);
        assert_eq!(s.students.grades["other"], 1);

        assert_eq!(s.applications.by_type["phone"], 2);
        assert_eq!(s.applications.by_type["other"], 1);
        assert_eq!(s.applications.by_status["approved"], 2);
        assert_eq!(s.applications.by_status["pending"], 1);
        assert_eq!(s.applications.by_status["rejected"], 1);
        assert_eq!(s.applications.by_status["other"], 1);

        assert_eq!(s.applications.unique_applicants_by_type["phone"], 2);
        assert_eq!(s.applications.unique_applicants_by_type["gate"], 1);
    }
}
