use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use ttf_parser::Face;

use crate::core::document::Document;
use crate::core::encoding;
use crate::core::lexer::Lexer;
use crate::core::object::{Dict, Object};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontSubtype {
    #[default]
    Type1,
    TrueType,
    Type0,
    Type3,
    MMType1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontProgramKind {
    #[default]
    None,
    Type1,
    TrueType,
    Cff,
    OpenType,
}

/// Everything the renderer needs to turn raw show-text bytes into positioned
/// glyphs. Built once per font dictionary and shared per (document, page).
///
/// The rasterized face handle is deliberately not stored here; the painter
/// looks it up in the process-wide font cache by `font_hash`, so a dropped
/// cache entry can never leave a dangling face behind an info struct.
pub struct FontInfo {
    pub resource_name: String,
    pub subtype: FontSubtype,
    pub base_font: String,
    pub encoding: String,

    // simple-font tables (one-byte codes)
    pub code_to_unicode: [u32; 256],
    pub code_to_gid: [u16; 256],
    pub code_to_glyph_name: Vec<Option<String>>,
    pub widths: Vec<f64>,
    pub first_char: i32,
    pub missing_width: f64,
    pub has_widths: bool,

    // composite-font tables (Type0, two-byte CIDs)
    pub cid_to_unicode: HashMap<u32, u32>,
    pub cid_to_gid: Vec<u16>,
    pub cid_identity: bool,
    pub cid_widths: HashMap<u32, f64>,
    pub cid_default_width: f64,

    pub font_program: Arc<Vec<u8>>,
    pub font_program_kind: FontProgramKind,
    /// Stable content hash of `font_program`; the sharing key for the
    /// font-face and glyph caches.
    pub font_hash: u64,
}

impl Default for FontInfo {
    fn default() -> Self {
        FontInfo {
            resource_name: String::new(),
            subtype: FontSubtype::default(),
            base_font: String::new(),
            encoding: String::new(),
            code_to_unicode: [0; 256],
            code_to_gid: [0; 256],
            code_to_glyph_name: vec![None; 256],
            widths: Vec::new(),
            first_char: 0,
            missing_width: 0.0,
            has_widths: false,
            cid_to_unicode: HashMap::new(),
            cid_to_gid: Vec::new(),
            cid_identity: true,
            cid_widths: HashMap::new(),
            cid_default_width: 1000.0,
            font_program: Arc::new(Vec::new()),
            font_program_kind: FontProgramKind::default(),
            font_hash: 0,
        }
    }
}

impl FontInfo {
    pub fn is_cid(&self) -> bool {
        self.subtype == FontSubtype::Type0
    }

    /// Advance width in 1000-units for a one-byte code.
    pub fn width_for_code(&self, code: u8) -> f64 {
        let idx = code as i32 - self.first_char;
        if idx >= 0 {
            if let Some(&w) = self.widths.get(idx as usize) {
                if w > 0.0 {
                    return w;
                }
            }
        }
        if self.missing_width > 0.0 { self.missing_width } else { 500.0 }
    }

    /// Advance width in 1000-units for a CID.
    pub fn width_for_cid(&self, cid: u32) -> f64 {
        self.cid_widths.get(&cid).copied().unwrap_or(self.cid_default_width)
    }

    /// Glyph id for a one-byte code.
    pub fn gid_for_code(&self, code: u8) -> u16 {
        self.code_to_gid[code as usize]
    }

    /// Glyph id for a CID, through /CIDToGIDMap when present.
    pub fn gid_for_cid(&self, cid: u32) -> u16 {
        if self.cid_identity || self.cid_to_gid.is_empty() {
            cid as u16
        } else {
            self.cid_to_gid.get(cid as usize).copied().unwrap_or(0)
        }
    }
}

/// FNV-1a; stable across runs, so cache keys survive document reloads.
pub fn hash_bytes(data: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in data {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Build the `/F1`-style name to font-info map for a resource dictionary.
pub fn build_page_fonts(doc: &Document, resources: &Dict) -> HashMap<String, Arc<FontInfo>> {
    let mut out = HashMap::new();
    let Some(font_dict) = doc.get(resources, "Font").as_dict() else {
        return out;
    };
    for (name, entry) in font_dict.iter() {
        let Some(fdict) = doc.resolve(entry).as_dict() else { continue };
        let info = build_font_info(doc, name, fdict);
        out.insert(name.to_string(), Arc::new(info));
    }
    out
}

pub fn build_font_info(doc: &Document, resource_name: &str, fdict: &Dict) -> FontInfo {
    let mut info = FontInfo {
        resource_name: resource_name.to_string(),
        ..Default::default()
    };

    info.subtype = match doc.get(fdict, "Subtype").as_name() {
        Some("Type0") => FontSubtype::Type0,
        Some("TrueType") => FontSubtype::TrueType,
        Some("Type3") => FontSubtype::Type3,
        Some("MMType1") => FontSubtype::MMType1,
        _ => FontSubtype::Type1,
    };
    if let Some(b) = doc.get(fdict, "BaseFont").as_name() {
        info.base_font = b.to_string();
    }

    read_encoding(doc, fdict, &mut info);

    // prefill unicode from the byte encoding, then let /Differences and
    // /ToUnicode refine it
    let table = encoding::table_for(&info.encoding);
    for code in 0..256 {
        if info.code_to_unicode[code] == 0 {
            info.code_to_unicode[code] = table[code] as u32;
        }
    }

    if let Some(tu) = doc.get(fdict, "ToUnicode").as_stream() {
        let decoded = doc.decode_stream(tu);
        parse_to_unicode_cmap(&decoded, &mut info);
    }

    // descend into the CIDFont for Type0
    let descendant: Option<Dict> = if info.subtype == FontSubtype::Type0 {
        doc.get(fdict, "DescendantFonts")
            .as_array()
            .and_then(|a| a.first())
            .and_then(|o| doc.resolve(o).as_dict())
            .cloned()
    } else {
        None
    };

    // embedded font program: descriptor on the font itself, or on the
    // descendant for composite fonts
    let descriptor = doc
        .get(fdict, "FontDescriptor")
        .as_dict()
        .cloned()
        .or_else(|| {
            descendant
                .as_ref()
                .and_then(|d| doc.get(d, "FontDescriptor").as_dict().cloned())
        });
    if let Some(fd) = &descriptor {
        load_font_program(doc, fd, &mut info);
    }

    if let Some(cid_dict) = &descendant {
        read_cid_tables(doc, cid_dict, &mut info);
    } else {
        read_simple_widths(doc, fdict, &mut info);
    }

    // no embedded program: ask the host resolver with the subset prefix
    // (ABCDEF+) stripped off the base name
    if info.font_program.is_empty() {
        let clean = strip_subset_prefix(&info.base_font);
        if let Some(resolver) = &doc.options.font_resolver {
            if let Some(bytes) = resolver(clean) {
                debug!("font {}: host resolver supplied {} bytes for '{clean}'",
                    info.resource_name, bytes.len());
                info.font_program = Arc::new(bytes);
                info.font_program_kind = FontProgramKind::TrueType;
            }
        }
    }

    info.font_hash = hash_bytes(&info.font_program);

    // backfill the encoding's own glyph names so CFF programs without a
    // usable cmap can still be indexed by name
    if let Some(names) = encoding::glyph_names_for(&info.encoding) {
        for code in 0..256 {
            if info.code_to_glyph_name[code].is_none() {
                if let Some(n) = names[code] {
                    info.code_to_glyph_name[code] = Some(n.to_string());
                }
            }
        }
    }

    if !info.font_program.is_empty() && info.subtype != FontSubtype::Type0 {
        build_code_to_gid(&mut info);
    }
    info
}

fn strip_subset_prefix(base: &str) -> &str {
    // subset names look like "ABCDEF+Real-Name"
    match base.split_once('+') {
        Some((prefix, rest)) if prefix.len() == 6 && prefix.chars().all(|c| c.is_ascii_uppercase()) => {
            rest
        }
        _ => base,
    }
}

fn read_encoding(doc: &Document, fdict: &Dict, info: &mut FontInfo) {
    match doc.get(fdict, "Encoding") {
        Object::Name(_) => {
            info.encoding = doc.get(fdict, "Encoding").as_name().unwrap_or("").to_string();
        }
        Object::Dictionary(enc) => {
            let enc = enc.clone();
            if let Some(be) = doc.get(&enc, "BaseEncoding").as_name() {
                info.encoding = be.to_string();
            }
            // /Differences: a number resets the code, names occupy
            // consecutive codes after it
            if let Some(diff) = doc.get(&enc, "Differences").as_array() {
                let mut code: i64 = 0;
                for item in diff {
                    match doc.resolve(item) {
                        Object::Integer(n) => code = *n,
                        Object::Real(r) => code = *r as i64,
                        Object::Name(n) => {
                            let name = n.strip_prefix('/').unwrap_or(n);
                            if (0..256).contains(&code) {
                                info.code_to_glyph_name[code as usize] = Some(name.to_string());
                                let uni = encoding::glyph_name_to_unicode(name);
                                if uni != 0 {
                                    info.code_to_unicode[code as usize] = uni;
                                }
                            }
                            code += 1;
                        }
                        _ => {}
                    }
                }
            }
        }
        _ => {}
    }
}

fn load_font_program(doc: &Document, fd: &Dict, info: &mut FontInfo) {
    let candidates = [
        ("FontFile", FontProgramKind::Type1),
        ("FontFile2", FontProgramKind::TrueType),
        ("FontFile3", FontProgramKind::Cff),
    ];
    for (key, kind) in candidates {
        if let Some(ff) = doc.get(fd, key).as_stream() {
            let mut kind = kind;
            if key == "FontFile3" {
                kind = match ff.dict.get("Subtype").and_then(|s| s.as_name()) {
                    Some("OpenType") => FontProgramKind::OpenType,
                    _ => FontProgramKind::Cff,
                };
            }
            let decoded = doc.decode_stream(ff);
            debug!(
                "font {}: embedded {:?} program, {} bytes",
                info.resource_name,
                kind,
                decoded.len()
            );
            info.font_program = Arc::new(decoded);
            info.font_program_kind = kind;
            return;
        }
    }
}

fn read_simple_widths(doc: &Document, fdict: &Dict, info: &mut FontInfo) {
    if let Some(fc) = doc.get(fdict, "FirstChar").as_i64() {
        info.first_char = fc as i32;
    }
    if let Some(mw) = doc.get(fdict, "MissingWidth").as_f64() {
        info.missing_width = mw;
    }
    if let Some(w) = doc.get(fdict, "Widths").as_array() {
        info.widths = w
            .iter()
            .map(|o| doc.resolve(o).as_f64().unwrap_or(info.missing_width))
            .collect();
        info.has_widths = !info.widths.is_empty();
    }
}

/// /W ("cid [w…]" or "cid1 cid2 w"), /DW and /CIDToGIDMap of the
/// descendant CIDFont.
fn read_cid_tables(doc: &Document, cid_dict: &Dict, info: &mut FontInfo) {
    if let Some(dw) = doc.get(cid_dict, "DW").as_f64() {
        info.cid_default_width = dw;
    }
    if let Some(w) = doc.get(cid_dict, "W").as_array() {
        let mut i = 0usize;
        while i < w.len() {
            let Some(first) = doc.resolve(&w[i]).as_i64() else { break };
            i += 1;
            match w.get(i).map(|o| doc.resolve(o)) {
                Some(Object::Array(ws)) => {
                    for (k, item) in ws.clone().iter().enumerate() {
                        if let Some(width) = doc.resolve(item).as_f64() {
                            info.cid_widths.insert(first as u32 + k as u32, width);
                        }
                    }
                    i += 1;
                }
                Some(_) => {
                    let Some(last) = doc.resolve(&w[i]).as_i64() else { break };
                    let Some(width) = w.get(i + 1).and_then(|o| doc.resolve(o).as_f64()) else {
                        break;
                    };
                    for cid in first..=last {
                        info.cid_widths.insert(cid as u32, width);
                    }
                    i += 2;
                }
                None => break,
            }
        }
    }
    match doc.get(cid_dict, "CIDToGIDMap") {
        Object::Stream(s) => {
            let bytes = doc.decode_stream(s);
            info.cid_to_gid = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            info.cid_identity = false;
        }
        _ => {
            info.cid_identity = true;
        }
    }
}

/// Map every byte code to a glyph id, in priority order: embedded glyph
/// names, the Unicode charmap, the raw code, then the 0xF000 symbolic page.
fn build_code_to_gid(info: &mut FontInfo) {
    let Ok(face) = Face::parse(&info.font_program, 0) else {
        debug!("font {}: face parse failed, glyphs will use fallbacks", info.resource_name);
        return;
    };
    for code in 0..256usize {
        if let Some(name) = &info.code_to_glyph_name[code] {
            if let Some(gid) = face.glyph_index_by_name(name) {
                info.code_to_gid[code] = gid.0;
                continue;
            }
        }
        let uni = info.code_to_unicode[code];
        if uni != 0 {
            if let Some(gid) = char::from_u32(uni).and_then(|c| face.glyph_index(c)) {
                info.code_to_gid[code] = gid.0;
                continue;
            }
        }
        if let Some(gid) = char::from_u32(code as u32).and_then(|c| face.glyph_index(c)) {
            info.code_to_gid[code] = gid.0;
            continue;
        }
        if let Some(gid) = char::from_u32(0xF000 + code as u32).and_then(|c| face.glyph_index(c)) {
            info.code_to_gid[code] = gid.0;
        }
    }

    // width table from horizontal advances when /Widths is absent
    if !info.has_widths {
        let upem = face.units_per_em().max(1) as f64;
        info.first_char = 0;
        info.widths = vec![info.missing_width; 256];
        for code in 0..256usize {
            let gid = info.code_to_gid[code];
            if gid != 0 {
                if let Some(adv) = face.glyph_hor_advance(ttf_parser::GlyphId(gid)) {
                    info.widths[code] = adv as f64 * 1000.0 / upem;
                }
            }
        }
        info.has_widths = true;
    }
}

/// Parse a /ToUnicode CMap: `beginbfchar` pairs and `beginbfrange` runs,
/// including the array form. Multi-byte sources populate the CID map, and
/// one-byte sources the simple table, so either access path works.
pub fn parse_to_unicode_cmap(data: &[u8], info: &mut FontInfo) {
    let mut lex = Lexer::new(data);
    loop {
        lex.skip_space();
        if lex.eof() {
            break;
        }
        // operands (numbers, names, dicts) before keywords are irrelevant here
        if lex.read_object().is_some() {
            continue;
        }
        match read_word(&mut lex).as_str() {
            "beginbfchar" => parse_bfchar(&mut lex, info),
            "beginbfrange" => parse_bfrange(&mut lex, info),
            _ => {}
        }
    }
}

fn read_word(lex: &mut Lexer) -> String {
    let mut out = String::new();
    while !lex.eof() {
        let b = lex.peek();
        if b.is_ascii_alphabetic() {
            out.push(b as char);
            lex.seek(lex.pos() + 1);
        } else {
            if out.is_empty() {
                lex.seek(lex.pos() + 1);
            }
            break;
        }
    }
    out
}

fn be_value(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| acc << 8 | b as u32)
}

/// First scalar value of a UTF-16BE destination string.
fn utf16_first(bytes: &[u8]) -> u32 {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    match units.as_slice() {
        [hi, lo, ..] if (0xD800..0xDC00).contains(hi) && (0xDC00..0xE000).contains(lo) => {
            0x10000 + ((*hi as u32 - 0xD800) << 10) + (*lo as u32 - 0xDC00)
        }
        [one, ..] => *one as u32,
        [] => {
            if bytes.len() == 1 {
                bytes[0] as u32
            } else {
                0
            }
        }
    }
}

fn record_mapping(info: &mut FontInfo, src: &[u8], uni: u32) {
    if uni == 0 {
        return;
    }
    let code = be_value(src);
    info.cid_to_unicode.insert(code, uni);
    if src.len() == 1 {
        info.code_to_unicode[src[0] as usize] = uni;
    } else if code < 256 {
        // two-byte CMaps for simple fonts still address byte codes
        info.code_to_unicode[code as usize] = uni;
    }
}

fn parse_bfchar(lex: &mut Lexer, info: &mut FontInfo) {
    loop {
        lex.skip_space();
        if lex.starts_with_keyword(b"endbfchar") || lex.eof() {
            lex.consume_keyword(b"endbfchar");
            return;
        }
        let Some(Object::String(src)) = lex.read_object() else { return };
        let Some(Object::String(dst)) = lex.read_object() else { return };
        record_mapping(info, &src, utf16_first(&dst));
    }
}

fn parse_bfrange(lex: &mut Lexer, info: &mut FontInfo) {
    loop {
        lex.skip_space();
        if lex.starts_with_keyword(b"endbfrange") || lex.eof() {
            lex.consume_keyword(b"endbfrange");
            return;
        }
        let Some(Object::String(lo)) = lex.read_object() else { return };
        let Some(Object::String(hi)) = lex.read_object() else { return };
        let lo_v = be_value(&lo);
        let hi_v = be_value(&hi);
        if hi_v < lo_v || hi_v - lo_v > 0xFFFF {
            return;
        }
        match lex.read_object() {
            Some(Object::String(start)) => {
                let base = utf16_first(&start);
                for (k, code) in (lo_v..=hi_v).enumerate() {
                    let src = to_src_bytes(code, lo.len());
                    record_mapping(info, &src, base.wrapping_add(k as u32));
                }
            }
            Some(Object::Array(items)) => {
                for (k, item) in items.iter().enumerate() {
                    if let Some(dst) = item.as_string() {
                        let src = to_src_bytes(lo_v + k as u32, lo.len());
                        record_mapping(info, &src, utf16_first(dst));
                    }
                }
            }
            _ => return,
        }
    }
}

fn to_src_bytes(code: u32, width: usize) -> Vec<u8> {
    let all = code.to_be_bytes();
    all[4 - width.clamp(1, 4)..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_prefix_strip() {
        assert_eq!(strip_subset_prefix("ABCDEF+Times-Roman"), "Times-Roman");
        assert_eq!(strip_subset_prefix("Times-Roman"), "Times-Roman");
        assert_eq!(strip_subset_prefix("Ab+Times"), "Ab+Times");
    }

    #[test]
    fn bfchar_mapping() {
        let cmap = b"/CIDInit /ProcSet findresource begin\n\
            begincmap\n\
            2 beginbfchar\n<41> <0041>\n<42> <0042>\nendbfchar\n\
            endcmap end end";
        let mut info = FontInfo::default();
        parse_to_unicode_cmap(cmap, &mut info);
        assert_eq!(info.code_to_unicode[0x41], 0x41);
        assert_eq!(info.cid_to_unicode[&0x42], 0x42);
    }

    #[test]
    fn bfrange_with_array_and_span() {
        let cmap = b"2 beginbfrange\n\
            <20> <22> <0041>\n\
            <30> <31> [<263A> <D83DDE00>]\n\
            endbfrange";
        let mut info = FontInfo::default();
        parse_to_unicode_cmap(cmap, &mut info);
        assert_eq!(info.code_to_unicode[0x20], 0x41);
        assert_eq!(info.code_to_unicode[0x21], 0x42);
        assert_eq!(info.code_to_unicode[0x22], 0x43);
        assert_eq!(info.code_to_unicode[0x30], 0x263A);
        // surrogate pair combines
        assert_eq!(info.code_to_unicode[0x31], 0x1F600);
    }

    #[test]
    fn two_byte_cmap_populates_cid_map() {
        let cmap = b"1 beginbfrange\n<0000> <00FF> <0020>\nendbfrange";
        let mut info = FontInfo::default();
        parse_to_unicode_cmap(cmap, &mut info);
        assert_eq!(info.cid_to_unicode[&0x10], 0x30);
    }

    #[test]
    fn cid_width_accessors() {
        let mut info = FontInfo::default();
        info.cid_default_width = 1000.0;
        info.cid_widths.insert(5, 620.0);
        assert_eq!(info.width_for_cid(5), 620.0);
        assert_eq!(info.width_for_cid(6), 1000.0);
    }

    #[test]
    fn simple_width_accessor_uses_first_char() {
        let mut info = FontInfo::default();
        info.first_char = 32;
        info.widths = vec![250.0, 333.0];
        info.has_widths = true;
        assert_eq!(info.width_for_code(32), 250.0);
        assert_eq!(info.width_for_code(33), 333.0);
        // out of table: falls back to the 500 default
        assert_eq!(info.width_for_code(64), 500.0);
    }
}
