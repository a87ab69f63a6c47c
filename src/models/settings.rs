use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}$").expect("valid regex"));

pub const DEFAULT_ACADEMIC_YEAR: i32 = 2026;

/// The fixed set of store-resident settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingsKey {
    AcademicYear,
    AcademicYearStart,
    PrincipalStampPath,
    GoogleSheetWebappUrl,
    GateSheetUrl,
}

impl SettingsKey {
    pub const ALL: [SettingsKey; 5] = [
        Self::AcademicYear,
        Self::AcademicYearStart,
        Self::PrincipalStampPath,
        Self::GoogleSheetWebappUrl,
        Self::GateSheetUrl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcademicYear => "academic_year",
            Self::AcademicYearStart => "academic_year_start",
            Self::PrincipalStampPath => "principal_stamp_path",
            Self::GoogleSheetWebappUrl => "google_sheet_webapp_url",
            Self::GateSheetUrl => "gate_sheet_url",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Self::AcademicYear => "2026",
            Self::AcademicYearStart => "2026-03-01",
            Self::PrincipalStampPath | Self::GoogleSheetWebappUrl | Self::GateSheetUrl => "",
        }
    }

    /// Trim and validate a value for this key.
    pub fn validate(&self, value: &str) -> Result<String, String> {
        let value = value.trim();
        match self {
            Self::AcademicYear if !YEAR_RE.is_match(value) => {
                Err("academic_year must be a 4-digit year".to_string())
            }
            Self::AcademicYearStart
                if NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err() =>
            {
                Err("academic_year_start must be formatted YYYY-MM-DD".to_string())
            }
            _ => Ok(value.to_string()),
        }
    }
}

impl std::str::FromStr for SettingsKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| format!("unknown settings key: {}", s))
    }
}

/// Every setting resolved, with defaults for absent rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub academic_year: String,
    pub academic_year_start: String,
    pub principal_stamp_path: String,
    pub google_sheet_webapp_url: String,
    pub gate_sheet_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            academic_year: SettingsKey::AcademicYear.default_value().to_string(),
            academic_year_start: SettingsKey::AcademicYearStart.default_value().to_string(),
            principal_stamp_path: String::new(),
            google_sheet_webapp_url: String::new(),
            gate_sheet_url: String::new(),
        }
    }
}

impl Settings {
    /// Build from `(key, value)` rows; unknown keys are ignored.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        let mut settings = Self::default();
        for (key, value) in rows {
            if let Ok(key) = key.parse::<SettingsKey>() {
                *settings.slot_mut(key) = value.unwrap_or_default();
            }
        }
        settings
    }

    pub fn get(&self, key: SettingsKey) -> &str {
        match key {
            SettingsKey::AcademicYear => &self.academic_year,
            SettingsKey::AcademicYearStart => &self.academic_year_start,
            SettingsKey::PrincipalStampPath => &self.principal_stamp_path,
            SettingsKey::GoogleSheetWebappUrl => &self.google_sheet_webapp_url,
            SettingsKey::GateSheetUrl => &self.gate_sheet_url,
        }
    }

    fn slot_mut(&mut self, key: SettingsKey) -> &mut String {
        match key {
            SettingsKey::AcademicYear => &mut self.academic_year,
            SettingsKey::AcademicYearStart => &mut self.academic_year_start,
            SettingsKey::PrincipalStampPath => &mut self.principal_stamp_path,
            SettingsKey::GoogleSheetWebappUrl => &mut self.google_sheet_webapp_url,
            SettingsKey::GateSheetUrl => &mut self.gate_sheet_url,
        }
    }

    pub fn academic_year(&self) -> i32 {
        self.academic_year
            .trim()
            .parse()
            .unwrap_or(DEFAULT_ACADEMIC_YEAR)
    }

    /// Validity period printed on gate permits: `2026.3.1 ~ 2027.2.28`.
    /// The period always ends on February 28 of the following year.
    pub fn academic_period_text(&self) -> String {
        let start = parse_start_date(&self.academic_year_start)
            .or_else(|| NaiveDate::from_ymd_opt(self.academic_year(), 3, 1));
        match start {
            Some(d) => format!(
                "{}.{}.{} ~ {}.2.28",
                d.year(),
                d.month(),
                d.day(),
                d.year() + 1
            ),
            None => format!(
                "{}.3.1 ~ {}.2.28",
                DEFAULT_ACADEMIC_YEAR,
                DEFAULT_ACADEMIC_YEAR + 1
            ),
        }
    }
}

fn parse_start_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%Y.%m.%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}
