//! Gate roster: the list of students with an approved gate application,
//! shown to the office and mirrored into an external spreadsheet.

pub mod sheet;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::models::gate_schedule::{
    student_number, to_display_grid, to_spreadsheet_row, ScheduleGrid, Weekday,
};
use crate::models::settings::SettingsKey;
use crate::store::postgres::{GateRosterRecord, PgStore};

use self::sheet::{SheetClient, SheetWriteRequest};

#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    /// Digits of the login id's local part, leading zeros kept; the raw
    /// local part when it has no digits.
    pub student_id: String,
    pub name: String,
    pub grade: i32,
    pub class_num: i32,
    pub reason: String,
    pub morning: BTreeMap<Weekday, String>,
    pub dismissal: BTreeMap<Weekday, String>,
}

impl RosterEntry {
    pub fn from_record(record: &GateRosterRecord) -> Self {
        let ScheduleGrid { morning, dismissal } = to_display_grid(record.extra_info.as_deref());
        Self {
            student_id: student_number(&record.student_id),
            name: record.name.clone(),
            grade: record.grade,
            class_num: record.class_num,
            reason: record.reason.clone(),
            morning,
            dismissal,
        }
    }
}

pub fn roster_entries(records: &[GateRosterRecord]) -> Vec<RosterEntry> {
    records.iter().map(RosterEntry::from_record).collect()
}

pub fn spreadsheet_rows(records: &[GateRosterRecord]) -> Vec<Vec<Value>> {
    records
        .iter()
        .map(|r| to_spreadsheet_row(&r.student_id, &r.name, r.extra_info.as_deref(), &r.reason))
        .collect()
}

/// Settings value first, then the process-level fallback.
pub fn resolve_sync_url(setting: &str, fallback: Option<&str>) -> Option<String> {
    let setting = setting.trim();
    if !setting.is_empty() {
        return Some(setting.to_string());
    }
    fallback
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(String::from)
}

/// Rewrite the spreadsheet with the current approved gate roster.
/// Returns the row count reported by the sheet.
pub async fn sync_roster(
    store: &PgStore,
    sheets: &SheetClient,
    fallback_url: Option<&str>,
) -> anyhow::Result<u64> {
    let setting = store.get_setting(SettingsKey::GoogleSheetWebappUrl).await?;
    let url = resolve_sync_url(&setting, fallback_url)
        .ok_or_else(|| anyhow::anyhow!("spreadsheet web app URL is not configured"))?;

    let records = store.gate_roster_records().await?;
    tracing::info!(rows = records.len(), "syncing gate roster");
    sheets
        .write_rows(&url, &SheetWriteRequest::replace(spreadsheet_rows(&records)))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, extra: Option<&str>) -> GateRosterRecord {
        GateRosterRecord {
            student_id: id.into(),
            name: "홍길동".into(),
            grade: 6,
            class_num: 1,
            reason: "학원".into(),
            extra_info: extra.map(String::from),
        }
    }

    #[test]
    fn test_entry_uses_student_number() {
        let entry = RosterEntry::from_record(&record(
            "10101@ds.es.kr",
            Some(r#"{"morningDays":["월"],"dismissalByDay":{"화":"2"}}"#),
        ));
        assert_eq!(entry.student_id, "10101");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["student_id"], "10101");
        assert_eq!(json["morning"]["월"], "등교");
        assert_eq!(json["dismissal"]["화"], "2하교(14:50)");
    }

    #[test]
    fn test_entry_keeps_non_numeric_id() {
        let entry = RosterEntry::from_record(&record("office@ds.es.kr", None));
        assert_eq!(entry.student_id, "office");
    }

    #[test]
    fn test_entry_keeps_leading_zeros() {
        let entry = RosterEntry::from_record(&record("00123@ds.es.kr", None));
        assert_eq!(entry.student_id, "00123");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["student_id"], "00123");
    }

    #[test]
    fn test_rows_have_fixed_width() {
        let rows = spreadsheet_rows(&[record("10101@ds.es.kr", None), record("10102@ds.es.kr", None)]);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.len() == 13));
        assert_eq!(rows[0][0], Value::from("10101"));
        assert_eq!(rows[0][12], Value::from("학원"));
    }

    #[test]
    fn test_sync_url_resolution() {
        assert_eq!(
            resolve_sync_url(" https://a ", Some("https://b")),
            Some("https://a".into())
        );
        assert_eq!(resolve_sync_url("", Some("https://b")), Some("https://b".into()));
        assert_eq!(resolve_sync_url("", Some("  ")), None);
        assert_eq!(resolve_sync_url("", None), None);
    }
}
