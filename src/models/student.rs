use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_GRADE: i32 = 1;
pub const MAX_GRADE: i32 = 6;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub student_id: String,
    pub name: String,
    pub grade: i32,
    pub class_num: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Student upsert payload. `student_id` is the login email and the
/// natural key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudent {
    pub student_id: String,
    pub name: String,
    pub grade: i32,
    pub class_num: i32,
}

impl NewStudent {
    /// Trim text fields and check ranges.
    pub fn normalized(self) -> Result<Self, String> {
        let student = Self {
            student_id: self.student_id.trim().to_string(),
            name: self.name.trim().to_string(),
            grade: self.grade,
            class_num: self.class_num,
        };
        if student.student_id.is_empty() || student.name.is_empty() {
            return Err("student_id and name are required".to_string());
        }
        if !(MIN_GRADE..=MAX_GRADE).contains(&student.grade) {
            return Err(format!(
                "grade must be between {} and {} (student {})",
                MIN_GRADE, MAX_GRADE, student.student_id
            ));
        }
        if student.class_num < 1 {
            return Err(format!(
                "class_num must be at least 1 (student {})",
                student.student_id
            ));
        }
        Ok(student)
    }
}

/// Normalize a whole batch; the first invalid record fails it.
pub fn normalize_batch(students: Vec<NewStudent>) -> Result<Vec<NewStudent>, String> {
    if students.is_empty() {
        return Err("no students to upload".to_string());
    }
    students.into_iter().map(NewStudent::normalized).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: &str, name: &str, grade: i32, class_num: i32) -> NewStudent {
        NewStudent {
            student_id: id.into(),
            name: name.into(),
            grade,
            class_num,
        }
    }

    #[test]
    fn test_normalized_trims() {
        let n = s(" 10101@ds.es.kr ", " 홍길동 ", 6, 1).normalized().unwrap();
        assert_eq!(n.student_id, "10101@ds.es.kr");
        assert_eq!(n.name, "홍길동");
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(s("a", "b", 0, 1).normalized().is_err());
        assert!(s("a", "b", 7, 1).normalized().is_err());
        assert!(s("a", "b", 3, 0).normalized().is_err());
        assert!(s("  ", "b", 3, 1).normalized().is_err());
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(normalize_batch(vec![]).is_err());
        assert!(normalize_batch(vec![s("a", "b", 1, 1), s("c", "", 1, 1)]).is_err());
    }
}
