//! Printable permits. A school-issued AcroForm template is filled with the
//! student's data, flattened, and optionally stamped with the principal's
//! seal.

pub mod acroform;
pub mod font;
pub mod stamp;
pub mod template;

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Duration, Utc};

use crate::config::Config;
use crate::models::application::Application;
use crate::models::gate_schedule::to_human_summary;
use crate::models::settings::Settings;
use crate::models::student::Student;

use self::acroform::FieldValue;
use self::template::{PermitForm, GATE_CLASS_FIELD, GATE_GRADE_FIELD, GATE_NAME_FIELD};

/// Korea Standard Time is UTC+9 with no daylight saving.
const KST_OFFSET_HOURS: i64 = 9;

/// Names this long or longer are printed smaller to fit the box.
const LONG_NAME_CHARS: usize = 9;

/// Where templates, fonts and uploaded stamps are looked up.
#[derive(Debug, Clone, Default)]
pub struct PermitAssets {
    pub form_dirs: Vec<PathBuf>,
    pub font_dirs: Vec<PathBuf>,
    pub upload_dir: PathBuf,
}

impl PermitAssets {
    pub fn from_config(config: &Config) -> Self {
        Self {
            form_dirs: config.form_dirs.clone(),
            font_dirs: config.font_dirs.clone(),
            upload_dir: config.upload_dir.clone(),
        }
    }
}

pub struct RenderedPermit {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Student name as printed: leading spaces and dashes removed.
pub fn display_name(name: &str) -> String {
    name.trim_start_matches(|c: char| c.is_whitespace() || c == '-')
        .trim()
        .to_string()
}

pub fn name_font_size(name: &str) -> f32 {
    if name.chars().count() >= LONG_NAME_CHARS {
        10.0
    } else {
        12.0
    }
}

/// `(year, month, day)` in KST, month and day zero-padded.
pub fn permit_date(at: DateTime<Utc>) -> (String, String, String) {
    let local = (at + Duration::hours(KST_OFFSET_HOURS)).naive_utc();
    (
        local.year().to_string(),
        format!("{:02}", local.month()),
        format!("{:02}", local.day()),
    )
}

/// Field values for the given application. `student` is `None` when the
/// roster entry was removed after approval; those fields print blank.
pub fn field_values(
    form: PermitForm,
    app: &Application,
    student: Option<&Student>,
    settings: &Settings,
) -> Vec<FieldValue> {
    let grade = student.map(|s| s.grade.to_string()).unwrap_or_default();
    let class_num = student.map(|s| s.class_num.to_string()).unwrap_or_default();
    let name = display_name(student.map(|s| s.name.as_str()).unwrap_or_default());
    let name_size = name_font_size(&name);

    match form {
        PermitForm::Phone | PermitForm::Tablet => {
            let (year, month, day) = permit_date(app.approved_at.unwrap_or(app.submitted_at));
            vec![
                FieldValue::new("grade", grade),
                FieldValue::new("class", class_num),
                FieldValue::new("name", name).with_font_size(name_size),
                FieldValue::new("year", year),
                FieldValue::new("month", month),
                FieldValue::new("date", day),
            ]
        }
        PermitForm::Gate => vec![
            FieldValue::new(GATE_GRADE_FIELD, grade),
            FieldValue::new(GATE_CLASS_FIELD, class_num),
            FieldValue::new(GATE_NAME_FIELD, name).with_font_size(name_size),
            FieldValue::new("fill_1", app.reason.clone()),
            FieldValue::new("fill_2", to_human_summary(app.extra_info.as_deref())),
            FieldValue::new("fill_3", settings.academic_period_text()),
        ],
    }
}

pub fn permit_filename(form: PermitForm, student_id: &str) -> String {
    format!("permit-{}-{}.pdf", form.as_str(), student_id)
}

/// Korean font from `dirs`, embedded for `text`; Helvetica when none is
/// usable.
fn field_font(doc: &mut lopdf::Document, dirs: &[PathBuf], text: &str) -> font::FieldFont {
    let Some(korean) = template::resolve_font(dirs) else {
        tracing::warn!("no Korean font found; non-Latin text prints as '?'");
        return font::helvetica(doc);
    };
    match korean.embed(doc, text) {
        Ok(f) => {
            tracing::debug!(path = %korean.path.display(), "embedded permit font");
            f
        }
        Err(e) => {
            tracing::warn!(path = %korean.path.display(), "font embedding failed: {}", e);
            font::helvetica(doc)
        }
    }
}

/// Render the permit PDF. Blocking; run it off the async executor.
pub fn render_permit(
    assets: &PermitAssets,
    app: &Application,
    student: Option<&Student>,
    settings: &Settings,
) -> anyhow::Result<RenderedPermit> {
    let form = PermitForm::for_kind(app.application_type);
    let template = template::resolve_template(&assets.form_dirs, form)
        .ok_or_else(|| anyhow::anyhow!("no usable {} permit template found", form.as_str()))?;
    tracing::debug!(path = %template.path.display(), "using permit template");

    let mut doc = template.document;
    let values = field_values(form, app, student, settings);
    let text: String = values.iter().map(|v| v.value.as_str()).collect();
    let font = field_font(&mut doc, &assets.font_dirs, &text);

    let missing = acroform::fill_text_fields(&mut doc, &values, &font)?;
    if !missing.is_empty() {
        tracing::warn!(?missing, "permit template fields not found");
    }
    if let Err(e) = acroform::flatten(&mut doc) {
        tracing::warn!("form left interactive, flattening failed: {}", e);
    }

    if let Some(image) = stamp::load_stamp(
        &settings.principal_stamp_path,
        &assets.upload_dir,
        &assets.form_dirs,
    ) {
        if let Err(e) = stamp::draw_stamp(&mut doc, &image, form.stamp_rect()) {
            tracing::warn!("principal stamp skipped: {}", e);
        }
    }

    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(RenderedPermit {
        filename: permit_filename(form, &app.student_id),
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::application::{ApplicationKind, ApplicationStatus};

    fn app(kind: ApplicationKind, approved_at: Option<&str>) -> Application {
        Application {
            id: 1,
            student_id: "10101@ds.es.kr".into(),
            application_type: kind,
            reason: "학원 수업".into(),
            extra_info: Some(r#"{"morningDays":["월","수"],"dismissalByDay":{"화":"2"}}"#.into()),
            status: ApplicationStatus::Approved,
            approval_number: Some("ds-pass-001".into()),
            submitted_at: "2026-03-01T10:00:00Z".parse().unwrap(),
            approved_at: approved_at.map(|s| s.parse().unwrap()),
            approved_by: Some("office@ds.es.kr".into()),
            approved_source: None,
            rejection_reason: None,
        }
    }

    fn student(name: &str) -> Student {
        Student {
            id: 1,
            student_id: "10101@ds.es.kr".into(),
            name: name.into(),
            grade: 6,
            class_num: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn value<'a>(values: &'a [FieldValue], name: &str) -> &'a FieldValue {
        values.iter().find(|v| v.name == name).unwrap()
    }

    #[test]
    fn test_date_uses_kst_approval_time() {
        // 16:30 UTC on March 4 is already March 5 in Korea.
        let a = app(ApplicationKind::Phone, Some("2026-03-04T16:30:00Z"));
        let values = field_values(PermitForm::Phone, &a, Some(&student("홍길동")), &Settings::default());
        assert_eq!(value(&values, "year").value, "2026");
        assert_eq!(value(&values, "month").value, "03");
        assert_eq!(value(&values, "date").value, "05");
    }

    #[test]
    fn test_date_falls_back_to_submission() {
        let a = app(ApplicationKind::Tablet, None);
        let values = field_values(PermitForm::Tablet, &a, Some(&student("홍길동")), &Settings::default());
        assert_eq!(value(&values, "date").value, "01");
    }

    #[test]
    fn test_name_font_size_threshold() {
        assert_eq!(name_font_size("홍길동"), 12.0);
        assert_eq!(name_font_size("12345678"), 12.0);
        assert_eq!(name_font_size("123456789"), 10.0);
        assert_eq!(display_name(" - 홍길동 "), "홍길동");
    }

    #[test]
    fn test_gate_fields() {
        let a = app(ApplicationKind::Gate, Some("2026-03-04T01:00:00Z"));
        let values = field_values(PermitForm::Gate, &a, Some(&student("Alexander Kim")), &Settings::default());
        assert_eq!(value(&values, GATE_GRADE_FIELD).value, "6");
        assert_eq!(value(&values, GATE_CLASS_FIELD).value, "1");
        assert_eq!(value(&values, GATE_NAME_FIELD).font_size, Some(10.0));
        assert_eq!(value(&values, "fill_1").value, "학원 수업");
        assert_eq!(value(&values, "fill_2").value, "등교: 월,수 / 하교: 화2하교");
        assert_eq!(value(&values, "fill_3").value, "2026.3.1 ~ 2027.2.28");
    }

    #[test]
    fn test_missing_student_prints_blank() {
        let a = app(ApplicationKind::Phone, None);
        let values = field_values(PermitForm::Phone, &a, None, &Settings::default());
        assert_eq!(value(&values, "name").value, "");
        assert_eq!(value(&values, "grade").value, "");
    }

    #[test]
    fn test_render_fills_and_flattens_template_from_disk() {
        let dir = std::env::temp_dir().join(format!("permit-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut doc = acroform::tests::form_document(PermitForm::Phone.required_fields());
        doc.save(dir.join("phone_form_template.pdf")).unwrap();

        let assets = PermitAssets {
            form_dirs: vec![dir.clone()],
            font_dirs: vec![dir.clone()],
            upload_dir: dir.clone(),
        };
        let a = app(ApplicationKind::Phone, Some("2026-03-04T01:00:00Z"));
        let rendered = render_permit(&assets, &a, Some(&student("홍길동")), &Settings::default())
            .unwrap();
        assert_eq!(rendered.filename, "permit-phone-10101@ds.es.kr.pdf");

        let out = lopdf::Document::load_mem(&rendered.bytes).unwrap();
        assert!(acroform::field_names(&out).unwrap().is_empty());
        let page = *out.get_pages().values().next().unwrap();
        let draws = out
            .get_and_decode_page_content(page)
            .unwrap()
            .operations
            .into_iter()
            .filter(|op| op.operator == "Do")
            .count();
        assert_eq!(draws, PermitForm::Phone.required_fields().len());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_font_falls_back_to_helvetica() {
        let mut doc = acroform::tests::form_document(&["name"]);
        let font = field_font(&mut doc, &[PathBuf::from("/definitely/not/here")], "홍길동");
        assert_eq!(font.name(), font::FALLBACK_FONT_NAME);
        assert_eq!(font.printable("홍길동 A"), "??? A");
    }

    #[test]
    fn test_render_without_template_fails() {
        let a = app(ApplicationKind::Gate, None);
        let assets = PermitAssets {
            form_dirs: vec![PathBuf::from("/definitely/not/here")],
            upload_dir: PathBuf::from("/tmp"),
            ..Default::default()
        };
        let err = render_permit(&assets, &a, None, &Settings::default());
        assert!(err.is_err());
    }
}
