//! Shared helpers for the integration tests: a tiny PDF assembler that
//! writes classic-xref files from raw object bodies, and pixel probes.

/// Assemble a one-page PDF. `extra_objects` are (body, is_stream_payload)
/// appended after the standard catalog/pages/page triple; the page's
/// /Contents points at object 4 and its /Resources carries /F1 Helvetica
/// plus whatever `resources` adds.
pub fn one_page_pdf(media: (f64, f64), content: &[u8], resources: &str) -> Vec<u8> {
    one_page_pdf_with(media, content, resources, &[], "")
}

/// Same, with extra numbered objects starting at 5 and extra page keys
/// (e.g. `/Rotate 90`).
pub fn one_page_pdf_with(
    media: (f64, f64),
    content: &[u8],
    resources: &str,
    extra_objects: &[Vec<u8>],
    page_keys: &str,
) -> Vec<u8> {
    let mut bodies: Vec<Vec<u8>> = Vec::new();
    bodies.push(b"<< /Type /Catalog /Pages 2 0 R >>".to_vec());
    bodies.push(b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec());
    bodies.push(
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Contents 4 0 R \
             /Resources << /Font << /F1 << /Type /Font /Subtype /Type1 \
             /BaseFont /Helvetica >> >> {} >> {} >>",
            media.0, media.1, resources, page_keys
        )
        .into_bytes(),
    );
    let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
    stream.extend_from_slice(content);
    stream.extend_from_slice(b"\nendstream");
    bodies.push(stream);
    for extra in extra_objects {
        bodies.push(extra.clone());
    }
    assemble(&bodies)
}

/// Lay out numbered objects (1-based), write the xref table and trailer.
pub fn assemble(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut out: Vec<u8> = b"%PDF-1.7\n%\x93\x8C\x8B\x9E\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    }
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", bodies.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!("trailer\n<< /Size {} /Root 1 0 R >>\n", bodies.len() + 1).as_bytes(),
    );
    out.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());
    out
}

/// BGRA pixel at (x, y) of a `width`-wide buffer.
pub fn pixel(buf: &[u8], width: usize, x: usize, y: usize) -> [u8; 4] {
    let i = (y * width + x) * 4;
    [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
}

pub fn is_white(px: [u8; 4]) -> bool {
    px == [255, 255, 255, 255]
}

/// A TrueType face from the usual Linux/macOS font directories, for tests
/// that exercise real glyph rendering. Tests skip when none is installed.
pub fn system_font() -> Option<Vec<u8>> {
    const CANDIDATES: &[&str] = &[
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/Library/Fonts/Arial.ttf",
        "/System/Library/Fonts/Supplemental/Arial.ttf",
    ];
    for path in CANDIDATES {
        if let Ok(bytes) = std::fs::read(path) {
            return Some(bytes);
        }
    }
    // last resort: scan the font tree for any .ttf
    for root in ["/usr/share/fonts", "/usr/local/share/fonts"] {
        if let Some(found) = find_ttf(std::path::Path::new(root), 0) {
            return Some(found);
        }
    }
    None
}

fn find_ttf(dir: &std::path::Path, depth: usize) -> Option<Vec<u8>> {
    if depth > 4 {
        return None;
    }
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_ttf(&path, depth + 1) {
                return Some(found);
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some("ttf") {
            if let Ok(bytes) = std::fs::read(&path) {
                return Some(bytes);
            }
        }
    }
    None
}
