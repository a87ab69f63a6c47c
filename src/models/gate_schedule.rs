//! Gate schedule codec.
//!
//! Gate applications carry their weekly schedule in `extra_info` as JSON:
//!
//! ```json
//! {"morningDays": ["월", "수"], "dismissalByDay": {"화": "2"}}
//! ```
//!
//! Older rows use `morning_days` / `dismissal_by_day`. Decoding never fails:
//! anything unreadable yields an empty schedule.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const MORNING_MARK: &str = "등교";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    #[serde(rename = "월")]
    Mon,
    #[serde(rename = "화")]
    Tue,
    #[serde(rename = "수")]
    Wed,
    #[serde(rename = "목")]
    Thu,
    #[serde(rename = "금")]
    Fri,
}

impl Weekday {
    pub const ALL: [Weekday; 5] = [Self::Mon, Self::Tue, Self::Wed, Self::Thu, Self::Fri];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Mon => "월",
            Self::Tue => "화",
            Self::Wed => "수",
            Self::Thu => "목",
            Self::Fri => "금",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.label() == label.trim())
    }
}

/// Dismissal slot codes 1-3, each a fixed clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DismissalSlot {
    First,
    Second,
    Third,
}

impl DismissalSlot {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::First),
            "2" => Some(Self::Second),
            "3" => Some(Self::Third),
            _ => None,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::First => "1",
            Self::Second => "2",
            Self::Third => "3",
        }
    }

    /// Short label used on the spreadsheet, e.g. `2하교`.
    pub fn label(&self) -> &'static str {
        match self {
            Self::First => "1하교",
            Self::Second => "2하교",
            Self::Third => "3하교",
        }
    }

    pub fn time(&self) -> &'static str {
        match self {
            Self::First => "14:00",
            Self::Second => "14:50",
            Self::Third => "15:40",
        }
    }

    /// Label with clock time, e.g. `2하교(14:50)`.
    pub fn display(&self) -> String {
        format!("{}({})", self.label(), self.time())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GateSchedule {
    pub morning_days: BTreeSet<Weekday>,
    pub dismissal_by_day: BTreeMap<Weekday, DismissalSlot>,
}

impl GateSchedule {
    pub fn is_empty(&self) -> bool {
        self.morning_days.is_empty() && self.dismissal_by_day.is_empty()
    }

    /// Encode in the current camelCase shape, weekdays in calendar order.
    pub fn encode(&self) -> String {
        let morning: Vec<&str> = self.morning_days.iter().map(|d| d.label()).collect();
        let dismissal: serde_json::Map<String, Value> = self
            .dismissal_by_day
            .iter()
            .map(|(d, s)| (d.label().to_string(), Value::String(s.code().to_string())))
            .collect();
        json!({ "morningDays": morning, "dismissalByDay": dismissal }).to_string()
    }

    /// Decode `extra_info`. Unknown weekdays and slot codes are dropped.
    pub fn decode(extra_info: Option<&str>) -> Self {
        parse_object(extra_info)
            .map(|obj| Self::from_object(&obj))
            .unwrap_or_default()
    }

    fn from_object(obj: &serde_json::Map<String, Value>) -> Self {
        let mut schedule = Self::default();

        let morning = obj.get("morningDays").or_else(|| obj.get("morning_days"));
        if let Some(Value::Array(days)) = morning {
            schedule.morning_days = days
                .iter()
                .filter_map(Value::as_str)
                .filter_map(Weekday::from_label)
                .collect();
        }

        let dismissal = obj
            .get("dismissalByDay")
            .or_else(|| obj.get("dismissal_by_day"));
        if let Some(Value::Object(map)) = dismissal {
            for day in Weekday::ALL {
                let code = match map.get(day.label()) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => continue,
                };
                if let Some(slot) = DismissalSlot::from_code(&code) {
                    schedule.dismissal_by_day.insert(day, slot);
                }
            }
        }

        schedule
    }

    /// One column per weekday per direction, empty strings for blank cells.
    pub fn to_grid(&self) -> ScheduleGrid {
        let morning = Weekday::ALL
            .into_iter()
            .map(|d| {
                let cell = if self.morning_days.contains(&d) {
                    MORNING_MARK.to_string()
                } else {
                    String::new()
                };
                (d, cell)
            })
            .collect();
        let dismissal = Weekday::ALL
            .into_iter()
            .map(|d| {
                let cell = self
                    .dismissal_by_day
                    .get(&d)
                    .map(DismissalSlot::display)
                    .unwrap_or_default();
                (d, cell)
            })
            .collect();
        ScheduleGrid { morning, dismissal }
    }

    /// The twelve schedule cells of a spreadsheet row: five morning
    /// checkboxes (`true` or `""`) then five dismissal labels.
    pub fn sheet_cells(&self) -> Vec<Value> {
        let morning = Weekday::ALL.into_iter().map(|d| {
            if self.morning_days.contains(&d) {
                Value::Bool(true)
            } else {
                Value::String(String::new())
            }
        });
        let dismissal = Weekday::ALL.into_iter().map(|d| {
            Value::String(
                self.dismissal_by_day
                    .get(&d)
                    .map(|s| s.label().to_string())
                    .unwrap_or_default(),
            )
        });
        morning.chain(dismissal).collect()
    }

    /// `등교: 월,수 / 하교: 화2하교, 목1하교`
    pub fn summary(&self) -> String {
        let mornings: Vec<&str> = self.morning_days.iter().map(|d| d.label()).collect();
        let dismissals: Vec<String> = self
            .dismissal_by_day
            .iter()
            .map(|(d, s)| format!("{}{}", d.label(), s.label()))
            .collect();

        let morning_text = if mornings.is_empty() {
            "등교 없음".to_string()
        } else {
            format!("등교: {}", mornings.join(","))
        };
        let dismissal_text = if dismissals.is_empty() {
            "하교 없음".to_string()
        } else {
            format!("하교: {}", dismissals.join(", "))
        };
        format!("{} / {}", morning_text, dismissal_text)
    }
}

fn parse_object(extra_info: Option<&str>) -> Option<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(extra_info?.trim()).ok()? {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

/// Weekday → cell text for both directions. Serialises with Korean weekday keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleGrid {
    pub morning: BTreeMap<Weekday, String>,
    pub dismissal: BTreeMap<Weekday, String>,
}

pub fn to_display_grid(extra_info: Option<&str>) -> ScheduleGrid {
    GateSchedule::decode(extra_info).to_grid()
}

/// Numeric student number from a login id: digits of the local part,
/// or the local part itself when it has none.
pub fn student_number(login_id: &str) -> String {
    let local = login_id.split('@').next().unwrap_or_default();
    let digits: String = local.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        local.to_string()
    } else {
        digits
    }
}

/// A full roster spreadsheet row. Column order is fixed by the receiving
/// sheet: number, name, 월-금 morning, 월-금 dismissal, reason.
pub fn to_spreadsheet_row(
    login_id: &str,
    name: &str,
    extra_info: Option<&str>,
    reason: &str,
) -> Vec<Value> {
    let mut row = Vec::with_capacity(13);
    row.push(Value::String(student_number(login_id)));
    row.push(Value::String(name.to_string()));
    row.extend(GateSchedule::decode(extra_info).sheet_cells());
    row.push(Value::String(reason.to_string()));
    row
}

/// One-line summary for the printed permit. A non-JSON legacy value is
/// returned as-is so free-text schedules still print.
pub fn to_human_summary(extra_info: Option<&str>) -> String {
    let raw = extra_info.map(str::trim).unwrap_or_default();
    if !raw.is_empty() && parse_object(Some(raw)).is_none() {
        return raw.to_string();
    }
    GateSchedule::decode(extra_info).summary()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> GateSchedule {
        let mut s = GateSchedule::default();
        s.morning_days.insert(Weekday::Mon);
        s.morning_days.insert(Weekday::Wed);
        s.dismissal_by_day.insert(Weekday::Tue, DismissalSlot::Second);
        s
    }

    #[test]
    fn test_roundtrip_grid() {
        let encoded = sample().encode();
        let grid = to_display_grid(Some(&encoded));

        assert_eq!(grid.morning[&Weekday::Mon], "등교");
        assert_eq!(grid.morning[&Weekday::Wed], "등교");
        assert_eq!(grid.morning[&Weekday::Tue], "");
        assert_eq!(grid.morning[&Weekday::Thu], "");
        assert_eq!(grid.morning[&Weekday::Fri], "");
        assert_eq!(grid.dismissal[&Weekday::Tue], "2하교(14:50)");
        for day in [Weekday::Mon, Weekday::Wed, Weekday::Thu, Weekday::Fri] {
            assert_eq!(grid.dismissal[&day], "");
        }
        assert_eq!(GateSchedule::decode(Some(&encoded)), sample());
    }

    #[test]
    fn test_decode_accepts_legacy_snake_case() {
        let legacy = r#"{"morning_days":["금"],"dismissal_by_day":{"월":"3","수":1}}"#;
        let s = GateSchedule::decode(Some(legacy));
        assert!(s.morning_days.contains(&Weekday::Fri));
        assert_eq!(s.dismissal_by_day[&Weekday::Mon], DismissalSlot::Third);
        assert_eq!(s.dismissal_by_day[&Weekday::Wed], DismissalSlot::First);
    }

    #[test]
    fn test_decode_is_total() {
        for input in [
            None,
            Some(""),
            Some("not json"),
            Some("[1,2,3]"),
            Some("null"),
            Some(r#"{"morningDays":"월"}"#),
            Some(r#"{"morningDays":["토", 3]}"#),
            Some(r#"{"dismissalByDay":{"화":"9"}}"#),
        ] {
            let s = GateSchedule::decode(input);
            assert!(s.is_empty(), "expected empty schedule for {:?}", input);
            let grid = s.to_grid();
            assert_eq!(grid.morning.len(), 5);
            assert!(grid.morning.values().all(String::is_empty));
        }
    }

    #[test]
    fn test_spreadsheet_row_layout() {
        let row = to_spreadsheet_row(
            "10101@ds.es.kr",
            "홍길동",
            Some(r#"{"morningDays":["월"],"dismissalByDay":{"금":"1"}}"#),
            "맞벌이",
        );
        assert_eq!(row.len(), 13);
        assert_eq!(row[0], json!("10101"));
        assert_eq!(row[1], json!("홍길동"));
        assert_eq!(row[2], json!(true));
        assert_eq!(row[3], json!(""));
        assert_eq!(row[6], json!(""));
        assert_eq!(row[7], json!(""));
        assert_eq!(row[11], json!("1하교"));
        assert_eq!(row[12], json!("맞벌이"));
    }

    #[test]
    fn test_student_number() {
        assert_eq!(student_number("s10101@ds.es.kr"), "10101");
        assert_eq!(student_number("office@ds.es.kr"), "office");
        assert_eq!(student_number("20315"), "20315");
    }

    #[test]
    fn test_human_summary() {
        let encoded = r#"{"morningDays":["수","월"],"dismissalByDay":{"목":"1","화":"2"}}"#;
        assert_eq!(
            to_human_summary(Some(encoded)),
            "등교: 월,수 / 하교: 화2하교, 목1하교"
        );
        assert_eq!(to_human_summary(None), "등교 없음 / 하교 없음");
        assert_eq!(to_human_summary(Some("{}")), "등교 없음 / 하교 없음");
        assert_eq!(to_human_summary(Some("월요일만 등교")), "월요일만 등교");
    }

    #[test]
    fn test_grid_serializes_with_korean_keys() {
        let grid = sample().to_grid();
        let v = serde_json::to_value(&grid).unwrap();
        assert_eq!(v["morning"]["월"], "등교");
        assert_eq!(v["dismissal"]["화"], "2하교(14:50)");
    }
}
