use std::path::{Path, PathBuf};

use lopdf::Document;

use crate::models::application::ApplicationKind;

use super::acroform;
use super::font::PermitFont;
use super::stamp::StampRect;

pub const GATE_GRADE_FIELD: &str = "텍스트2";
pub const GATE_NAME_FIELD: &str = "텍스트3";
pub const GATE_CLASS_FIELD: &str = "텍스트4";

/// Korean-capable font files, most preferred first.
pub const FONT_FILES: &[&str] = &[
    "NotoSansCJKkr-Regular.otf",
    "NotoSansKR-Regular.otf",
    "NotoSansKR-Regular.ttf",
    "NotoSansKR-Variable.ttf",
    "malgun.ttf",
    "NanumGothic.ttf",
    "NotoSansCJK-Regular.ttc",
];

/// Printed permit layout. `Other` applications use the phone form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitForm {
    Phone,
    Tablet,
    Gate,
}

impl PermitForm {
    pub fn for_kind(kind: ApplicationKind) -> Self {
        match kind {
            ApplicationKind::Tablet => Self::Tablet,
            ApplicationKind::Gate => Self::Gate,
            ApplicationKind::Phone | ApplicationKind::Other => Self::Phone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Gate => "gate",
        }
    }

    /// Preferred school-issued file name.
    fn school_file(&self) -> &'static str {
        match self {
            Self::Phone => "휴대전화_허가서양식.pdf",
            Self::Tablet => "수업용 태블릿PC_허가서양식.pdf",
            Self::Gate => "정문 출입 허가서.pdf",
        }
    }

    fn fallback_file(&self) -> &'static str {
        match self {
            Self::Phone | Self::Tablet => "phone_form_template.pdf",
            Self::Gate => "gate_form_template.pdf",
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Phone | Self::Tablet => &["grade", "class", "name", "year", "month", "date"],
            Self::Gate => &[
                GATE_GRADE_FIELD,
                GATE_NAME_FIELD,
                GATE_CLASS_FIELD,
                "fill_1",
                "fill_2",
                "fill_3",
            ],
        }
    }

    pub fn stamp_rect(&self) -> StampRect {
        match self {
            Self::Phone | Self::Tablet => [199.855, 196.855, 271.855, 241.946],
            Self::Gate => [498.185, 54.2279, 533.97, 94.5085],
        }
    }

    /// Candidate paths in search order: school files in every root first,
    /// then the generic templates.
    pub fn candidates(&self, roots: &[PathBuf]) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |p: PathBuf| {
            if !out.contains(&p) {
                out.push(p);
            }
        };
        for root in roots {
            push(root.join(self.school_file()));
        }
        for root in roots {
            push(root.join(self.fallback_file()));
            push(root.join("assets").join("forms").join(self.fallback_file()));
        }
        out
    }
}

/// A loaded template that carries every field its form needs.
pub struct Template {
    pub path: PathBuf,
    pub document: Document,
}

fn load_if_complete(path: &Path, form: PermitForm) -> Option<Document> {
    let doc = Document::load(path)
        .map_err(|e| tracing::debug!(path = %path.display(), "template unreadable: {}", e))
        .ok()?;
    let names = acroform::field_names(&doc).ok()?;
    let complete = form.required_fields().iter().all(|f| names.contains(*f));
    if !complete {
        tracing::debug!(path = %path.display(), "template lacks required fields");
    }
    complete.then_some(doc)
}

/// First candidate that loads and has all required fields.
pub fn resolve_template(roots: &[PathBuf], form: PermitForm) -> Option<Template> {
    form.candidates(roots)
        .into_iter()
        .filter(|p| p.is_file())
        .find_map(|path| {
            load_if_complete(&path, form).map(|document| Template { path, document })
        })
}

/// Font candidate paths: every directory for the preferred file, then the
/// next file.
pub fn font_candidates(dirs: &[PathBuf]) -> Vec<PathBuf> {
    FONT_FILES
        .iter()
        .flat_map(|file| dirs.iter().map(move |dir| dir.join(file)))
        .collect()
}

/// First candidate that reads and covers Hangul.
pub fn resolve_font(dirs: &[PathBuf]) -> Option<PermitFont> {
    font_candidates(dirs)
        .into_iter()
        .filter(|p| p.is_file())
        .find_map(|path| {
            let data = std::fs::read(&path)
                .map_err(|e| tracing::debug!(path = %path.display(), "font unreadable: {}", e))
                .ok()?;
            PermitFont::from_bytes(path.clone(), data)
                .map_err(|e| tracing::debug!(path = %path.display(), "font skipped: {}", e))
                .ok()
        })
}
