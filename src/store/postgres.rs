use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::models::application::{Application, ApplicationKind, ApplicationStatus, StatusPatch};
use crate::models::approval_number::ApprovalPrefix;
use crate::models::consent::{ConsentDocument, ConsentStatus};
use crate::models::policy::{ApprovalPolicy, PolicyUpdate};
use crate::models::settings::{Settings, SettingsKey};
use crate::models::stats::ApplicationFact;
use crate::models::student::{NewStudent, Student};

const APPLICATION_COLUMNS: &str = "id, student_id, application_type, reason, extra_info, status, \
     approval_number, submitted_at, approved_at, approved_by, approved_source, rejection_reason";

const STUDENT_COLUMNS: &str = "id, student_id, name, grade, class_num, created_at, updated_at";

/// Admin listing is capped; the office never pages past the newest rows.
pub const APPLICATION_LIST_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Build a store whose pool connects on first use.
    pub fn connect_lazy(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Application Operations --

    pub async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> anyhow::Result<Vec<Application>> {
        let rows = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications
             WHERE ($1::VARCHAR IS NULL OR status = $1)
             ORDER BY submitted_at DESC, id DESC
             LIMIT $2"
        ))
        .bind(status)
        .bind(APPLICATION_LIST_LIMIT)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_application(&self, id: i64) -> anyhow::Result<Option<Application>> {
        let row = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn list_applications_for_student(
        &self,
        student_id: &str,
    ) -> anyhow::Result<Vec<Application>> {
        let rows = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications
             WHERE student_id = $1
             ORDER BY submitted_at DESC, id DESC"
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Fetch an application only if it belongs to `student_id`.
    pub async fn get_student_application(
        &self,
        id: i64,
        student_id: &str,
    ) -> anyhow::Result<Option<Application>> {
        let row = sqlx::query_as::<_, Application>(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = $1 AND student_id = $2"
        ))
        .bind(id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert a pending application. Returns `None` when the student already
    /// has one of this kind.
    pub async fn insert_application(
        &self,
        student_id: &str,
        kind: ApplicationKind,
        reason: &str,
        extra_info: Option<&str>,
    ) -> anyhow::Result<Option<Application>> {
        let row = sqlx::query_as::<_, Application>(&format!(
            "INSERT INTO applications (student_id, application_type, reason, extra_info)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (student_id, application_type) DO NOTHING
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(student_id)
        .bind(kind)
        .bind(reason)
        .bind(extra_info)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Withdraw an own application that is still pending or approved.
    pub async fn cancel_application(&self, id: i64, student_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM applications
             WHERE id = $1 AND student_id = $2
               AND status IN ('pending', 'approved', 'auto_approved')",
        )
        .bind(id)
        .bind(student_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Every approval number that starts with `prefix`.
    pub async fn approval_numbers_with_prefix(
        &self,
        prefix: ApprovalPrefix,
    ) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT approval_number FROM applications
             WHERE approval_number IS NOT NULL AND approval_number ILIKE $1",
        )
        .bind(prefix.like_pattern())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Write a status transition. Returns the updated row, or `None` when the
    /// id does not exist.
    pub async fn apply_status_patch(
        &self,
        id: i64,
        patch: &StatusPatch,
    ) -> anyhow::Result<Option<Application>> {
        let row = sqlx::query_as::<_, Application>(&format!(
            "UPDATE applications
             SET status = $2,
                 approval_number = $3,
                 approved_at = $4,
                 approved_by = $5,
                 approved_source = $6,
                 rejection_reason = $7
             WHERE id = $1
             RETURNING {APPLICATION_COLUMNS}"
        ))
        .bind(id)
        .bind(patch.status)
        .bind(&patch.approval_number)
        .bind(patch.approved_at)
        .bind(&patch.approved_by)
        .bind(patch.approved_source)
        .bind(&patch.rejection_reason)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Approval Policy Operations --

    pub async fn list_policies(&self) -> anyhow::Result<Vec<ApprovalPolicy>> {
        let rows = sqlx::query_as::<_, ApprovalPolicy>(
            "SELECT policy_key, mode, delay_minutes, updated_at
             FROM approval_policies ORDER BY policy_key",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_policy(&self, update: &PolicyUpdate) -> anyhow::Result<ApprovalPolicy> {
        let row = sqlx::query_as::<_, ApprovalPolicy>(
            r#"
            INSERT INTO approval_policies (policy_key, mode, delay_minutes, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (policy_key) DO UPDATE
            SET mode = EXCLUDED.mode,
                delay_minutes = EXCLUDED.delay_minutes,
                updated_at = NOW()
            RETURNING policy_key, mode, delay_minutes, updated_at
            "#,
        )
        .bind(update.policy_key)
        .bind(update.mode)
        .bind(update.delay_minutes)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Invoke the store-side auto-approval procedure. Returns the number of
    /// applications promoted.
    pub async fn run_auto_approval(&self) -> anyhow::Result<i64> {
        let count = sqlx::query_scalar::<_, Option<i32>>("SELECT run_auto_approval()")
            .fetch_one(&self.pool)
            .await?;
        Ok(i64::from(count.unwrap_or(0)))
    }

    // -- Student Operations --

    pub async fn list_students(&self) -> anyhow::Result<Vec<Student>> {
        let rows = sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students ORDER BY grade, class_num, name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_student(&self, student_id: &str) -> anyhow::Result<Option<Student>> {
        let row = sqlx::query_as::<_, Student>(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students WHERE student_id = $1"
        ))
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_student(&self, student: &NewStudent) -> anyhow::Result<Student> {
        let row = sqlx::query_as::<_, Student>(&format!(
            "INSERT INTO students (student_id, name, grade, class_num)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (student_id) DO UPDATE
             SET name = EXCLUDED.name,
                 grade = EXCLUDED.grade,
                 class_num = EXCLUDED.class_num,
                 updated_at = NOW()
             RETURNING {STUDENT_COLUMNS}"
        ))
        .bind(&student.student_id)
        .bind(&student.name)
        .bind(student.grade)
        .bind(student.class_num)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Upsert a batch atomically; one bad row rolls back the whole batch.
    pub async fn upsert_students(&self, students: &[NewStudent]) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await?;
        for student in students {
            sqlx::query(
                "INSERT INTO students (student_id, name, grade, class_num)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (student_id) DO UPDATE
                 SET name = EXCLUDED.name,
                     grade = EXCLUDED.grade,
                     class_num = EXCLUDED.class_num,
                     updated_at = NOW()",
            )
            .bind(&student.student_id)
            .bind(&student.name)
            .bind(student.grade)
            .bind(student.class_num)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(students.len())
    }

    /// Remove a student together with their applications and consent records.
    pub async fn delete_student(&self, student_id: &str) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_consents WHERE user_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM applications WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM students WHERE student_id = $1")
            .bind(student_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Empty the roster. Returns the number of students removed.
    pub async fn delete_all_students(&self) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_consents WHERE user_id IN (SELECT student_id FROM students)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM applications")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM students")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    // -- Gate Roster --

    /// Approved gate applications joined with their students, in student-id order.
    pub async fn gate_roster_records(&self) -> anyhow::Result<Vec<GateRosterRecord>> {
        let rows = sqlx::query_as::<_, GateRosterRecord>(
            "SELECT s.student_id, s.name, s.grade, s.class_num, a.reason, a.extra_info
             FROM applications a
             JOIN students s ON s.student_id = a.student_id
             WHERE a.application_type = 'gate'
               AND a.status IN ('approved', 'auto_approved')
             ORDER BY s.student_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- Settings Operations --

    pub async fn load_settings(&self) -> anyhow::Result<Settings> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>("SELECT key, value FROM settings")
            .fetch_all(&self.pool)
            .await?;
        Ok(Settings::from_rows(rows))
    }

    /// A single setting; the default when no row is stored.
    pub async fn get_setting(&self, key: SettingsKey) -> anyhow::Result<String> {
        let value = sqlx::query_scalar::<_, Option<String>>("SELECT value FROM settings WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?
            .flatten();
        Ok(value.unwrap_or_else(|| key.default_value().to_string()))
    }

    pub async fn set_setting(&self, key: SettingsKey, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value,
                updated_at = NOW()
            "#,
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Consent Operations --

    pub async fn latest_required_consent(&self) -> anyhow::Result<Option<ConsentDocument>> {
        let row = sqlx::query_as::<_, ConsentDocument>(
            "SELECT id, consent_type, title, content, version, is_required, is_active
             FROM consent_documents
             WHERE is_active AND is_required
             ORDER BY version DESC, created_at DESC
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn consent_agreed_at(
        &self,
        user_id: &str,
        document_id: i64,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT agreed_at FROM user_consents WHERE user_id = $1 AND document_id = $2",
        )
        .bind(user_id)
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(at)
    }

    /// Whether `user_id` has acknowledged the current required document.
    pub async fn consent_status(&self, user_id: &str) -> anyhow::Result<ConsentStatus> {
        let latest = self.latest_required_consent().await?;
        let agreed_at = match &latest {
            Some(doc) => self.consent_agreed_at(user_id, doc.id).await?,
            None => None,
        };
        Ok(ConsentStatus::evaluate(latest, agreed_at))
    }

    /// Record an acknowledgement. Repeat calls keep the first timestamp.
    pub async fn record_consent(
        &self,
        user_id: &str,
        document_id: i64,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> anyhow::Result<DateTime<Utc>> {
        let at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            INSERT INTO user_consents (user_id, document_id, ip_address, user_agent)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, document_id) DO UPDATE
            SET agreed_at = user_consents.agreed_at
            RETURNING agreed_at
            "#,
        )
        .bind(user_id)
        .bind(document_id)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(&self.pool)
        .await?;
        Ok(at)
    }

    /// Publish a new active, required consent document with the next version
    /// number for its type.
    pub async fn publish_consent(
        &self,
        consent_type: &str,
        title: &str,
        content: &str,
    ) -> anyhow::Result<ConsentDocument> {
        let row = sqlx::query_as::<_, ConsentDocument>(
            r#"
            INSERT INTO consent_documents (consent_type, title, content, version, is_required, is_active)
            SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, TRUE, TRUE
            FROM consent_documents WHERE consent_type = $1
            RETURNING id, consent_type, title, content, version, is_required, is_active
            "#,
        )
        .bind(consent_type)
        .bind(title)
        .bind(content)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Statistics --

    pub async fn student_grades(&self) -> anyhow::Result<Vec<i32>> {
        let rows = sqlx::query_scalar::<_, i32>("SELECT grade FROM students")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn application_facts(&self) -> anyhow::Result<Vec<ApplicationFact>> {
        let rows = sqlx::query_as::<_, ApplicationFact>(
            "SELECT student_id, application_type, status FROM applications",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// One approved gate application with its student's roster data.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct GateRosterRecord {
    pub student_id: String,
    pub name: String,
    pub grade: i32,
    pub class_num: i32,
    pub reason: String,
    pub extra_info: Option<String>,
}
