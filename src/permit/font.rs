//! Fonts for permit text. A Korean-capable TrueType or OpenType font is
//! embedded as a Type0 composite font with Identity-H encoding. Without one
//! the standard Helvetica font is used and anything outside WinAnsi prints
//! as `?`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use ttf_parser::{name_id, Face};

/// Resource name of the embedded font in `/DR` and appearance streams.
pub const EMBEDDED_FONT_NAME: &str = "KoSans";
/// Resource name of the Helvetica fallback.
pub const FALLBACK_FONT_NAME: &str = "Helv";

/// Default advance width in glyph space for glyphs absent from `/W`.
const DEFAULT_WIDTH: u16 = 1000;
/// Mean Helvetica advance, used only to position centered text.
const HELVETICA_AVG_WIDTH: f32 = 556.0;

/// Keep printable ASCII and Latin-1, replace everything else with `?`.
pub fn to_win_ansi_safe(text: &str) -> String {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c,
            _ => '?',
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Glyph {
    pub id: u16,
    /// Advance in 1/1000 text space units.
    pub width: u16,
}

/// The font field values are drawn with.
#[derive(Debug, Clone)]
pub enum FieldFont {
    Embedded {
        id: ObjectId,
        glyphs: BTreeMap<char, Glyph>,
    },
    Helvetica {
        id: ObjectId,
    },
}

impl FieldFont {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Embedded { .. } => EMBEDDED_FONT_NAME,
            Self::Helvetica { .. } => FALLBACK_FONT_NAME,
        }
    }

    pub fn id(&self) -> ObjectId {
        match self {
            Self::Embedded { id, .. } | Self::Helvetica { id } => *id,
        }
    }

    /// The text as it will be printed.
    pub fn printable(&self, value: &str) -> String {
        match self {
            Self::Embedded { .. } => value.to_string(),
            Self::Helvetica { .. } => to_win_ansi_safe(value),
        }
    }

    /// Show-string bytes: two-byte glyph ids for the embedded font,
    /// WinAnsi bytes for Helvetica. `text` must come from `printable`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Embedded { glyphs, .. } => text
                .chars()
                .flat_map(|c| glyphs.get(&c).map_or(0, |g| g.id).to_be_bytes())
                .collect(),
            Self::Helvetica { .. } => text.chars().map(|c| c as u32 as u8).collect(),
        }
    }

    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: f32 = match self {
            Self::Embedded { glyphs, .. } => text
                .chars()
                .map(|c| f32::from(glyphs.get(&c).map_or(DEFAULT_WIDTH, |g| g.width)))
                .sum(),
            Self::Helvetica { .. } => text.chars().count() as f32 * HELVETICA_AVG_WIDTH,
        };
        units * size / 1000.0
    }
}

/// Add a standard Helvetica font object for the fallback path.
pub fn helvetica(doc: &mut Document) -> FieldFont {
    let id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    FieldFont::Helvetica { id }
}

/// A single-face font program that covers Hangul.
pub struct PermitFont {
    pub path: PathBuf,
    program: Vec<u8>,
}

impl std::fmt::Debug for PermitFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitFont")
            .field("path", &self.path)
            .field("bytes", &self.program.len())
            .finish()
    }
}

fn parse(data: &[u8], index: u32) -> anyhow::Result<Face<'_>> {
    Face::parse(data, index).map_err(|e| anyhow::anyhow!("unreadable font: {}", e))
}

impl PermitFont {
    /// Accepts a single font or a collection. From a collection the Korean
    /// face is taken when one is named, else the first face.
    pub fn from_bytes(path: PathBuf, data: Vec<u8>) -> anyhow::Result<Self> {
        let program = match ttf_parser::fonts_in_collection(&data) {
            Some(count) => {
                let index = korean_face_index(&data, count);
                extract_face(&data, index)
                    .ok_or_else(|| anyhow::anyhow!("malformed font collection"))?
            }
            None => data,
        };
        let face = parse(&program, 0)?;
        if face.glyph_index('가').is_none() {
            anyhow::bail!("font has no Hangul glyphs");
        }
        Ok(Self { path, program })
    }

    /// Embed the font program and return the font to draw `text` with.
    /// Only glyphs used by `text` get explicit widths.
    pub fn embed(&self, doc: &mut Document, text: &str) -> anyhow::Result<FieldFont> {
        let face = parse(&self.program, 0)?;
        let upem = f32::from(face.units_per_em().max(1));
        let scale = |v: f32| (v * 1000.0 / upem).round() as i64;

        let mut glyphs = BTreeMap::new();
        for c in text.chars() {
            if let Some(gid) = face.glyph_index(c) {
                let advance = face.glyph_hor_advance(gid).unwrap_or(0);
                glyphs.insert(
                    c,
                    Glyph {
                        id: gid.0,
                        width: scale(f32::from(advance)).clamp(0, i64::from(u16::MAX)) as u16,
                    },
                );
            }
        }

        // CID-keyed CFF fonts in the candidate list use Adobe-Identity-0,
        // so their CIDs equal glyph ids just like CIDToGIDMap /Identity.
        let cff = face.tables().cff.is_some();
        let base_font = Object::Name(postscript_name(&face).into_bytes());
        let bbox = face.global_bounding_box();

        let file = if cff {
            Stream::new(dictionary! { "Subtype" => "OpenType" }, self.program.clone())
        } else {
            Stream::new(
                dictionary! { "Length1" => self.program.len() as i64 },
                self.program.clone(),
            )
        };
        let file_id = doc.add_object(file);

        let mut descriptor = dictionary! {
            "Type" => "FontDescriptor",
            "FontName" => base_font.clone(),
            "Flags" => 4,
            "FontBBox" => vec![
                scale(f32::from(bbox.x_min)).into(),
                scale(f32::from(bbox.y_min)).into(),
                scale(f32::from(bbox.x_max)).into(),
                scale(f32::from(bbox.y_max)).into(),
            ],
            "ItalicAngle" => 0,
            "Ascent" => scale(f32::from(face.ascender())),
            "Descent" => scale(f32::from(face.descender())),
            "CapHeight" => scale(f32::from(face.ascender())),
            "StemV" => 80,
        };
        descriptor.set(if cff { "FontFile3" } else { "FontFile2" }, file_id);
        let descriptor_id = doc.add_object(descriptor);

        let mut cid_font = dictionary! {
            "Type" => "Font",
            "Subtype" => if cff { "CIDFontType0" } else { "CIDFontType2" },
            "BaseFont" => base_font.clone(),
            "CIDSystemInfo" => dictionary! {
                "Registry" => Object::string_literal("Adobe"),
                "Ordering" => Object::string_literal("Identity"),
                "Supplement" => 0,
            },
            "FontDescriptor" => descriptor_id,
            "DW" => i64::from(DEFAULT_WIDTH),
            "W" => widths(&glyphs),
        };
        if !cff {
            cid_font.set("CIDToGIDMap", "Identity");
        }
        let cid_font_id = doc.add_object(cid_font);

        let to_unicode_id = doc.add_object(Stream::new(
            dictionary! {},
            to_unicode_cmap(&glyphs).into_bytes(),
        ));

        let id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type0",
            "BaseFont" => base_font,
            "Encoding" => "Identity-H",
            "DescendantFonts" => vec![cid_font_id.into()],
            "ToUnicode" => to_unicode_id,
        });
        Ok(FieldFont::Embedded { id, glyphs })
    }
}

/// `/W` array: `[gid [width] gid [width] ...]` in glyph id order.
fn widths(glyphs: &BTreeMap<char, Glyph>) -> Vec<Object> {
    let by_id: BTreeMap<u16, u16> = glyphs.values().map(|g| (g.id, g.width)).collect();
    by_id
        .into_iter()
        .flat_map(|(id, width)| {
            [
                Object::Integer(i64::from(id)),
                Object::Array(vec![Object::Integer(i64::from(width))]),
            ]
        })
        .collect()
}

fn to_unicode_cmap(glyphs: &BTreeMap<char, Glyph>) -> String {
    let mut cmap = String::from(
        "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    let pairs: Vec<(&char, &Glyph)> = glyphs.iter().collect();
    for chunk in pairs.chunks(100) {
        cmap.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (c, g) in chunk {
            let mut units = [0u16; 2];
            let utf16: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{:04X}", u))
                .collect();
            cmap.push_str(&format!("<{:04X}> <{}>\n", g.id, utf16));
        }
        cmap.push_str("endbfchar\n");
    }
    cmap.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    cmap
}

fn postscript_name(face: &Face<'_>) -> String {
    let name = face
        .names()
        .into_iter()
        .filter(|n| n.name_id == name_id::POST_SCRIPT_NAME)
        .find_map(|n| n.to_string())
        .unwrap_or_default();
    let name: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if name.is_empty() {
        "KoreanSans".to_string()
    } else {
        name
    }
}

fn korean_face_index(data: &[u8], count: u32) -> u32 {
    (0..count)
        .find(|&i| {
            Face::parse(data, i).is_ok_and(|face| {
                face.names()
                    .into_iter()
                    .filter(|n| n.name_id == name_id::FAMILY)
                    .filter_map(|n| n.to_string())
                    .any(|family| family.contains("KR"))
            })
        })
        .unwrap_or(0)
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes(data.get(at..at + 2)?.try_into().ok()?))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

/// Copy one face of a TrueType collection into a standalone font file.
fn extract_face(data: &[u8], index: u32) -> Option<Vec<u8>> {
    let header = be_u32(data, 12 + 4 * index as usize)? as usize;
    let num_tables = usize::from(be_u16(data, header + 4)?);
    let records = data.get(header + 12..header + 12 + 16 * num_tables)?;
    let body_start = 12 + 16 * num_tables;

    let mut out = data.get(header..header + 12)?.to_vec();
    let mut body = Vec::new();
    for record in records.chunks_exact(16) {
        let offset = be_u32(record, 8)? as usize;
        let length = be_u32(record, 12)? as usize;
        let table = data.get(offset..offset + length)?;
        out.extend_from_slice(&record[..8]);
        out.extend_from_slice(&u32::try_from(body_start + body.len()).ok()?.to_be_bytes());
        out.extend_from_slice(&record[12..16]);
        body.extend_from_slice(table);
        body.resize(body.len().next_multiple_of(4), 0);
    }
    out.extend(body);
    Some(out)
}
