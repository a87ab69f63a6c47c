//! Principal stamp lookup and placement.

use std::path::{Path, PathBuf};

use base64::Engine;
use lopdf::Document;

/// Stamp rectangle `[x1, y1, x2, y2]` in page points.
pub type StampRect = [f32; 4];

/// Load stamp image bytes from a stored setting value: a `data:image/...`
/// URL, an absolute URL or path, or a `/uploads/...` public path.
pub fn load_stamp(value: &str, upload_dir: &Path, roots: &[PathBuf]) -> Option<Vec<u8>> {
    let value = value.trim().replace('\\', "/");
    if value.is_empty() {
        return None;
    }
    if let Some(rest) = value.strip_prefix("data:image/") {
        let (_, data) = rest.split_once(',')?;
        return base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .ok();
    }
    stamp_candidates(&value, upload_dir, roots)
        .into_iter()
        .find(|p| p.is_file())
        .and_then(|p| std::fs::read(p).ok())
}

fn stamp_candidates(value: &str, upload_dir: &Path, roots: &[PathBuf]) -> Vec<PathBuf> {
    let path = strip_origin(value);
    let relative = path.trim_start_matches('/');
    let mut candidates = Vec::new();

    if let Some(name) = path.strip_prefix("/uploads/") {
        candidates.push(upload_dir.join(name));
    }
    if Path::new(path).is_absolute() {
        candidates.push(PathBuf::from(path));
    }
    candidates.push(PathBuf::from(relative));
    for root in roots {
        candidates.push(root.join(relative));
        candidates.push(root.join("public").join(relative));
    }
    candidates
}

/// `https://host/uploads/x.png` → `/uploads/x.png`.
fn strip_origin(value: &str) -> &str {
    let lowered = value.get(..8).unwrap_or(value).to_ascii_lowercase();
    if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
        return value;
    }
    let after_scheme = &value[value.find("//").map_or(0, |i| i + 2)..];
    after_scheme.find('/').map_or("/", |i| &after_scheme[i..])
}

/// Draw the stamp onto the first page.
pub fn draw_stamp(doc: &mut Document, image: &[u8], rect: StampRect) -> anyhow::Result<()> {
    let page_id = *doc
        .get_pages()
        .values()
        .next()
        .ok_or_else(|| anyhow::anyhow!("document has no pages"))?;
    let stream = lopdf::xobject::image_from(image.to_vec())?;
    let [x1, y1, x2, y2] = rect;
    doc.insert_image(page_id, stream, (x1, y1), (x2 - x1, y2 - y1))?;
    Ok(())
}
