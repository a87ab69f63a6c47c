//! Bulk student import from CSV.
//!
//! The header must name `student_id`, `name`, `grade` and `class_num`
//! (any order, any case). Files exported from Korean spreadsheet tools are
//! often EUC-KR, so the bytes are decoded as UTF-8 first and as EUC-KR only
//! when UTF-8 decoding fails.

use std::collections::HashSet;

use encoding_rs::EUC_KR;
use thiserror::Error;

use crate::models::student::NewStudent;

pub const REQUIRED_COLUMNS: [&str; 4] = ["student_id", "name", "grade", "class_num"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CsvImportError {
    #[error("CSV has no data rows")]
    Empty,

    #[error("CSV header must contain student_id,name,grade,class_num (missing {0})")]
    MissingColumn(&'static str),

    #[error("row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("malformed CSV: {0}")]
    Malformed(String),
}

/// Detected text encoding of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    EucKr,
}

/// Decode bytes, preferring UTF-8. A leading BOM is stripped.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), TextEncoding::Utf8);
    }
    if let Some(text) = EUC_KR.decode_without_bom_handling_and_without_replacement(bytes) {
        return (text.into_owned(), TextEncoding::EucKr);
    }
    (
        String::from_utf8_lossy(bytes).into_owned(),
        TextEncoding::Utf8,
    )
}

/// Parse an uploaded CSV file into validated student records.
pub fn parse_student_csv(bytes: &[u8]) -> Result<Vec<NewStudent>, CsvImportError> {
    let (text, encoding) = decode_text(bytes);
    tracing::debug!(?encoding, bytes = bytes.len(), "decoding student CSV");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CsvImportError::Malformed(e.to_string()))?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
        .collect();

    let mut index = [0usize; 4];
    for (slot, column) in index.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = headers
            .iter()
            .position(|h| h == column)
            .ok_or(CsvImportError::MissingColumn(column))?;
    }
    let [id_col, name_col, grade_col, class_col] = index;

    let mut students = Vec::new();
    let mut seen = HashSet::new();

    for (i, record) in reader.records().enumerate() {
        // header is line 1
        let row = i + 2;
        let record = record.map_err(|e| CsvImportError::Malformed(e.to_string()))?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }

        let cell = |col: usize| record.get(col).unwrap_or_default().to_string();
        let number = |col: usize, label: &str| {
            cell(col)
                .parse::<i32>()
                .map_err(|_| CsvImportError::InvalidRow {
                    row,
                    message: format!("{} is not a number", label),
                })
        };

        let student = NewStudent {
            student_id: cell(id_col),
            name: cell(name_col),
            grade: number(grade_col, "grade")?,
            class_num: number(class_col, "class_num")?,
        }
        .normalized()
        .map_err(|message| CsvImportError::InvalidRow { row, message })?;

        if !seen.insert(student.student_id.clone()) {
            return Err(CsvImportError::InvalidRow {
                row,
                message: format!("duplicate student_id {}", student.student_id),
            });
        }
        students.push(student);
    }

    if students.is_empty() {
        return Err(CsvImportError::Empty);
    }
    Ok(students)
}
