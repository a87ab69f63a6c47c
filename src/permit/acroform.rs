//! Minimal AcroForm access on top of `lopdf`: list field names, set text
//! values with generated appearance streams, and flatten the form into the
//! page content.

use std::collections::{BTreeSet, HashMap};

use lopdf::content::Operation;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use once_cell::sync::Lazy;
use regex::Regex;

use super::font::FieldFont;

/// Field flag bit 1: the field is read-only.
const FF_READ_ONLY: i64 = 1;
/// Annotation flag bit 2: the annotation is hidden.
const F_HIDDEN: i64 = 2;

static DA_FONT_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(-?\d+(?:\.\d+)?)\s+Tf").expect("valid regex"));

const DEFAULT_DA: &str = "/Helv 0 Tf 0 g";

/// Auto-sized (`0 Tf`) fields never print larger than this.
const MAX_AUTO_FONT_SIZE: f32 = 12.0;
/// Horizontal padding inside the widget box.
const TEXT_PADDING: f32 = 2.0;

/// Encode a PDF text string as UTF-16BE with a byte-order mark.
pub fn text_string(value: &str) -> Object {
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

/// Decode a PDF text string (UTF-16BE with BOM, else byte-per-char).
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes.strip_prefix(&[0xFE, 0xFF]) {
        Some(rest) => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
        },
    }
}

fn root_id(doc: &Document) -> anyhow::Result<ObjectId> {
    Ok(doc.trailer.get(b"Root")?.as_reference()?)
}

fn acroform_dict(doc: &Document) -> anyhow::Result<Option<&Dictionary>> {
    let catalog = doc.get_dictionary(root_id(doc)?)?;
    let Ok(form) = catalog.get(b"AcroForm") else {
        return Ok(None);
    };
    let (_, form) = doc.dereference(form)?;
    Ok(Some(form.as_dict()?))
}

fn reference_list(doc: &Document, obj: &Object) -> anyhow::Result<Vec<ObjectId>> {
    let (_, obj) = doc.dereference(obj)?;
    Ok(obj
        .as_array()?
        .iter()
        .filter_map(|o| o.as_reference().ok())
        .collect())
}

/// Every named field, keyed by fully-qualified name.
pub fn fields(doc: &Document) -> anyhow::Result<HashMap<String, ObjectId>> {
    let mut out = HashMap::new();
    let Some(form) = acroform_dict(doc)? else {
        return Ok(out);
    };
    let Ok(roots) = form.get(b"Fields") else {
        return Ok(out);
    };

    let mut stack: Vec<(ObjectId, Option<String>)> = reference_list(doc, roots)?
        .into_iter()
        .map(|id| (id, None))
        .collect();
    let mut visited = BTreeSet::new();

    while let Some((id, parent)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(dict) = doc.get_dictionary(id) else {
            continue;
        };
        let partial = dict
            .get(b"T")
            .and_then(Object::as_str)
            .map(decode_text_string)
            .ok();
        let name = match (&parent, partial) {
            (Some(p), Some(t)) => Some(format!("{}.{}", p, t)),
            (None, Some(t)) => Some(t),
            (p, None) => p.clone(),
        };
        if let (Some(n), Ok(_)) = (&name, dict.get(b"T")) {
            out.insert(n.clone(), id);
        }
        if let Ok(kids) = dict.get(b"Kids") {
            for kid in reference_list(doc, kids)? {
                stack.push((kid, name.clone()));
            }
        }
    }
    Ok(out)
}

pub fn field_names(doc: &Document) -> anyhow::Result<BTreeSet<String>> {
    Ok(fields(doc)?.into_keys().collect())
}

/// A value to write into a text field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: String,
    pub font_size: Option<f32>,
}

impl FieldValue {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            font_size: None,
        }
    }

    pub fn with_font_size(mut self, size: f32) -> Self {
        self.font_size = Some(size);
        self
    }
}

/// Font size from a default appearance string; `0` means auto.
fn da_font_size(da: &str) -> Option<f32> {
    DA_FONT_SIZE
        .captures(da)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn auto_font_size(height: f32) -> f32 {
    ((height - TEXT_PADDING) * 0.7).clamp(4.0, MAX_AUTO_FONT_SIZE)
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// `[llx, lly, urx, ury]`, normalized so the first corner is lower-left.
fn rect_of(obj: &Object) -> Option<[f32; 4]> {
    let coords = obj
        .as_array()
        .ok()?
        .iter()
        .map(number)
        .collect::<Option<Vec<f32>>>()?;
    let [x1, y1, x2, y2] = coords.as_slice() else {
        return None;
    };
    Some([x1.min(*x2), y1.min(*y2), x1.max(*x2), y1.max(*y2)])
}

fn string_value(dict: &Dictionary, key: &[u8]) -> Option<String> {
    dict.get(key)
        .and_then(Object::as_str)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok()
}

/// Single-line text appearance: `/Tx` marked content, vertically centered,
/// aligned per the field's quadding (0 left, 1 center, 2 right).
fn appearance_content(
    font: &FieldFont,
    text: &str,
    size: f32,
    [width, height]: [f32; 2],
    quadding: i64,
) -> Vec<u8> {
    let text_width = font.text_width(text, size);
    let x = match quadding {
        1 => (width - text_width) / 2.0,
        2 => width - TEXT_PADDING - text_width,
        _ => TEXT_PADDING,
    }
    .max(0.0);
    let y = ((height - size) / 2.0 + size * 0.22).max(0.0);
    let hex: String = font
        .encode(text)
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect();
    format!(
        "/Tx BMC\nq\nBT\n/{} {} Tf\n0 g\n{:.2} {:.2} Td\n<{}> Tj\nET\nQ\nEMC\n",
        font.name(),
        size,
        x,
        y,
        hex
    )
    .into_bytes()
}

fn acroform_mut(doc: &mut Document) -> anyhow::Result<&mut Dictionary> {
    let root = root_id(doc)?;
    let form_ref = doc
        .get_dictionary(root)?
        .get(b"AcroForm")
        .ok()
        .and_then(|o| o.as_reference().ok());

    Ok(match form_ref {
        Some(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        None => doc
            .get_object_mut(root)?
            .as_dict_mut()?
            .get_mut(b"AcroForm")?
            .as_dict_mut()?,
    })
}

/// Add the font to the form's default resources under its resource name.
fn register_font(doc: &mut Document, font: &FieldFont) -> anyhow::Result<()> {
    let mut resources = Dictionary::new();
    let mut fonts = Dictionary::new();
    if let Some(dr) = acroform_dict(doc)?.and_then(|f| f.get(b"DR").ok()) {
        if let Ok(dr) = doc.dereference(dr).and_then(|(_, o)| o.as_dict()) {
            resources = dr.clone();
        }
    }
    if let Ok(existing) = resources
        .get(b"Font")
        .and_then(|f| doc.dereference(f))
        .and_then(|(_, o)| o.as_dict())
    {
        fonts = existing.clone();
    }
    fonts.set(font.name(), font.id());
    resources.set("Font", fonts);

    let form = acroform_mut(doc)?;
    form.set("DR", resources);
    form.remove(b"NeedAppearances");
    Ok(())
}

/// Fill text fields, draw their appearances with `font` and lock them.
/// Names absent from the form are skipped and returned.
pub fn fill_text_fields(
    doc: &mut Document,
    values: &[FieldValue],
    font: &FieldFont,
) -> anyhow::Result<Vec<String>> {
    register_font(doc, font)?;

    let by_name = fields(doc)?;
    let (default_da, default_q) = match acroform_dict(doc)? {
        Some(form) => (
            string_value(form, b"DA").unwrap_or_else(|| DEFAULT_DA.to_string()),
            form.get(b"Q").and_then(Object::as_i64).unwrap_or(0),
        ),
        None => (DEFAULT_DA.to_string(), 0),
    };

    let mut missing = Vec::new();
    for field in values {
        let Some(&id) = by_name.get(&field.name) else {
            missing.push(field.name.clone());
            continue;
        };

        let dict = doc.get_dictionary(id)?;
        let widget_ids = match dict.get(b"Kids") {
            Ok(kids) => reference_list(doc, kids)?,
            Err(_) => vec![id],
        };
        let da = string_value(dict, b"DA").unwrap_or_else(|| default_da.clone());
        let quadding = dict.get(b"Q").and_then(Object::as_i64).unwrap_or(default_q);
        let size = field
            .font_size
            .or_else(|| da_font_size(&da))
            .unwrap_or(0.0);

        let text = font.printable(&field.value);
        let da = Object::string_literal(format!("/{} {} Tf 0 g", font.name(), size));
        let dict = doc.get_object_mut(id)?.as_dict_mut()?;
        dict.set("V", text_string(&text));
        dict.set("DA", da.clone());
        let flags = dict.get(b"Ff").and_then(Object::as_i64).unwrap_or(0);
        dict.set("Ff", flags | FF_READ_ONLY);

        for widget in widget_ids {
            let Some(rect) = doc
                .get_dictionary(widget)
                .ok()
                .and_then(|w| w.get(b"Rect").ok())
                .and_then(rect_of)
            else {
                continue;
            };
            let width = rect[2] - rect[0];
            let height = rect[3] - rect[1];
            let size = if size > 0.0 { size } else { auto_font_size(height) };

            let appearance = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), width.into(), height.into()],
                    "Resources" => dictionary! {
                        "Font" => dictionary! { font.name() => font.id() },
                    },
                },
                appearance_content(font, &text, size, [width, height], quadding),
            ));
            let w = doc.get_object_mut(widget)?.as_dict_mut()?;
            w.set("AP", dictionary! { "N" => appearance });
            w.set("DA", da.clone());
        }
    }
    Ok(missing)
}

/// What flattening does with one page annotation.
enum Placement {
    Keep,
    Drop,
    Draw { xobject: ObjectId, at: (f32, f32) },
}

/// The normal appearance stream, honoring `/AS` for state dictionaries.
fn normal_appearance(doc: &Document, widget: &Dictionary) -> Option<ObjectId> {
    let (_, ap) = doc.dereference(widget.get(b"AP").ok()?).ok()?;
    let id = match ap.as_dict().ok()?.get(b"N").ok()? {
        Object::Reference(id) => *id,
        Object::Dictionary(states) => {
            let state = widget.get(b"AS").and_then(Object::as_name).ok()?;
            states.get(state).ok()?.as_reference().ok()?
        }
        _ => return None,
    };
    doc.get_object(id).and_then(Object::as_stream).is_ok().then_some(id)
}

fn placement(doc: &Document, annot: ObjectId) -> Placement {
    let Ok(dict) = doc.get_dictionary(annot) else {
        return Placement::Keep;
    };
    let is_widget = dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .is_ok_and(|n| n == b"Widget");
    if !is_widget {
        return Placement::Keep;
    }
    let hidden = dict.get(b"F").and_then(Object::as_i64).unwrap_or(0) & F_HIDDEN != 0;
    let rect = dict.get(b"Rect").ok().and_then(rect_of);
    let (Some(rect), Some(xobject), false) = (rect, normal_appearance(doc, dict), hidden) else {
        return Placement::Drop;
    };
    let origin = doc
        .get_object(xobject)
        .and_then(Object::as_stream)
        .ok()
        .and_then(|s| s.dict.get(b"BBox").ok())
        .and_then(rect_of)
        .map_or((0.0, 0.0), |b| (b[0], b[1]));
    Placement::Draw {
        xobject,
        at: (rect[0] - origin.0, rect[1] - origin.1),
    }
}

/// Draw every widget's appearance into its page content and remove the
/// interactive form. Returns the number of widgets drawn.
pub fn flatten(doc: &mut Document) -> anyhow::Result<usize> {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let mut drawn = 0;

    for page_id in pages {
        let annots = match doc.get_dictionary(page_id)?.get(b"Annots") {
            Ok(annots) => reference_list(doc, annots)?,
            Err(_) => continue,
        };

        let mut keep = Vec::new();
        let mut draws = Vec::new();
        for annot in annots {
            match placement(doc, annot) {
                Placement::Keep => keep.push(Object::Reference(annot)),
                Placement::Drop => {}
                Placement::Draw { xobject, at } => draws.push((xobject, at)),
            }
        }

        if !draws.is_empty() {
            let mut content = doc.get_and_decode_page_content(page_id)?;
            content.operations.insert(0, Operation::new("q", vec![]));
            content.operations.push(Operation::new("Q", vec![]));
            for (xobject, (x, y)) in draws {
                let name = format!("PermitField{}", drawn);
                doc.add_xobject(page_id, name.as_bytes(), xobject)?;
                content.operations.extend([
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![1.into(), 0.into(), 0.into(), 1.into(), x.into(), y.into()],
                    ),
                    Operation::new("Do", vec![Object::Name(name.into_bytes())]),
                    Operation::new("Q", vec![]),
                ]);
                drawn += 1;
            }
            doc.change_page_content(page_id, content.encode()?)?;
        }

        doc.get_object_mut(page_id)?
            .as_dict_mut()?
            .set("Annots", keep);
    }

    let root = root_id(doc)?;
    doc.get_object_mut(root)?.as_dict_mut()?.remove(b"AcroForm");
    Ok(drawn)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::permit::font::{helvetica, Glyph};

    /// A one-page document with the given top-level text fields.
    pub(crate) fn form_document(names: &[&str]) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Contents" => content_id,
        });

        let mut field_refs = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let y = 700 - (i as i64) * 30;
            let field_id = doc.add_object(dictionary! {
                "FT" => "Tx",
                "T" => text_string(name),
                "Type" => "Annot",
                "Subtype" => "Widget",
                "Rect" => vec![50.into(), y.into(), 250.into(), (y + 20).into()],
                "P" => page_id,
                "DA" => Object::string_literal("/Helv 11 Tf 0 g"),
                "AP" => dictionary! {},
            });
            field_refs.push(Object::Reference(field_id));
        }
        doc.get_object_mut(page_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Annots", field_refs.clone());

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let form_id = doc.add_object(dictionary! {
            "Fields" => field_refs,
            "DA" => Object::string_literal("/Helv 0 Tf 0 g"),
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
            "AcroForm" => form_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_text_string_roundtrip_korean() {
        let obj = text_string("텍스트2");
        let bytes = obj.as_str().unwrap();
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(decode_text_string(bytes), "텍스트2");
        assert_eq!(decode_text_string(b"grade"), "grade");
    }

    #[test]
    fn test_field_names() {
        let doc = form_document(&["grade", "텍스트3"]);
        let names = field_names(&doc).unwrap();
        assert!(names.contains("grade"));
        assert!(names.contains("텍스트3"));
        assert_eq!(names.len(), 2);
    }

    fn korean_font(doc: &mut Document) -> FieldFont {
        let id = doc.add_object(dictionary! { "Type" => "Font", "Subtype" => "Type0" });
        let glyphs = [('홍', 10), ('길', 11), ('동', 12)]
            .into_iter()
            .map(|(c, id)| (c, Glyph { id, width: 900 }))
            .collect();
        FieldFont::Embedded { id, glyphs }
    }

    fn normal_stream<'a>(doc: &'a Document, field: &Dictionary) -> &'a Stream {
        let ap = field.get(b"AP").unwrap().as_dict().unwrap();
        let id = ap.get(b"N").unwrap().as_reference().unwrap();
        doc.get_object(id).unwrap().as_stream().unwrap()
    }

    #[test]
    fn test_fill_with_embedded_font() {
        let mut doc = form_document(&["name", "year"]);
        let font = korean_font(&mut doc);
        let missing = fill_text_fields(
            &mut doc,
            &[
                FieldValue::new("name", "홍길동").with_font_size(12.0),
                FieldValue::new("year", "2026"),
                FieldValue::new("absent", "x"),
            ],
            &font,
        )
        .unwrap();
        assert_eq!(missing, vec!["absent".to_string()]);

        let ids = fields(&doc).unwrap();
        let name = doc.get_dictionary(ids["name"]).unwrap();
        assert_eq!(decode_text_string(name.get(b"V").unwrap().as_str().unwrap()), "홍길동");
        assert_eq!(name.get(b"Ff").unwrap().as_i64().unwrap() & FF_READ_ONLY, 1);
        assert_eq!(name.get(b"DA").unwrap().as_str().unwrap(), b"/KoSans 12 Tf 0 g");
        let content = String::from_utf8_lossy(&normal_stream(&doc, name).content).into_owned();
        assert!(content.contains("/KoSans 12 Tf"), "{}", content);
        assert!(content.contains("<000A000B000C> Tj"), "{}", content);

        // the template size survives when none is requested
        let year = doc.get_dictionary(ids["year"]).unwrap();
        assert_eq!(year.get(b"DA").unwrap().as_str().unwrap(), b"/KoSans 11 Tf 0 g");

        let form = acroform_dict(&doc).unwrap().unwrap();
        let dr = form.get(b"DR").unwrap().as_dict().unwrap();
        let fonts = dr.get(b"Font").unwrap().as_dict().unwrap();
        assert_eq!(fonts.get(b"KoSans").unwrap().as_reference().unwrap(), font.id());
        assert!(form.get(b"NeedAppearances").is_err());
    }

    #[test]
    fn test_fallback_font_substitutes_question_marks() {
        let mut doc = form_document(&["name"]);
        let font = helvetica(&mut doc);
        fill_text_fields(&mut doc, &[FieldValue::new("name", "홍길동 A")], &font).unwrap();

        let ids = fields(&doc).unwrap();
        let name = doc.get_dictionary(ids["name"]).unwrap();
        assert_eq!(decode_text_string(name.get(b"V").unwrap().as_str().unwrap()), "??? A");
        assert_eq!(name.get(b"DA").unwrap().as_str().unwrap(), b"/Helv 11 Tf 0 g");
        let content = String::from_utf8_lossy(&normal_stream(&doc, name).content).into_owned();
        assert!(content.contains("<3F3F3F2041> Tj"), "{}", content);
    }

    #[test]
    fn test_flatten_draws_widgets_into_page() {
        let mut doc = form_document(&["grade", "class"]);
        let font = helvetica(&mut doc);
        fill_text_fields(&mut doc, &[FieldValue::new("grade", "6")], &font).unwrap();

        // the unfilled field still carries the empty template appearance
        // dictionary, so only the filled one is drawn
        assert_eq!(flatten(&mut doc).unwrap(), 1);
        assert!(acroform_dict(&doc).unwrap().is_none());
        assert!(field_names(&doc).unwrap().is_empty());

        let page = *doc.get_pages().values().next().unwrap();
        let annots = doc.get_dictionary(page).unwrap().get(b"Annots").unwrap();
        assert!(annots.as_array().unwrap().is_empty());
        let ops = doc.get_and_decode_page_content(page).unwrap().operations;
        assert!(ops.iter().any(|op| op.operator == "Do"));
    }

    #[test]
    fn test_font_size_parsing() {
        assert_eq!(da_font_size("/Helv 0 Tf 0 g"), Some(0.0));
        assert_eq!(da_font_size("/F1 10.5 Tf 0 g"), Some(10.5));
        assert_eq!(da_font_size("0 g"), None);
        assert_eq!(auto_font_size(20.0), MAX_AUTO_FONT_SIZE);
        assert_eq!(auto_font_size(10.0), 5.6);
    }

    #[test]
    fn test_centered_appearance() {
        let mut doc = Document::with_version("1.5");
        let font = korean_font(&mut doc);
        let content = appearance_content(&font, "홍길동", 10.0, [47.0, 20.0], 1);
        let content = String::from_utf8(content).unwrap();
        // three glyphs of 900 units at 10pt are 27pt wide
        assert!(content.contains("10.00 7.20 Td"), "{}", content);
        assert!(content.starts_with("/Tx BMC"));
    }
}
