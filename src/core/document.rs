use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, warn};

use crate::core::crypt::{CertificateDecrypt, Decryptor};
use crate::core::error::{PdfError, Result};
use crate::core::filters;
use crate::core::font::{self, FontInfo};
use crate::core::object::{Dict, NULL, ObjRef, Object, Stream};
use crate::core::parser::{self, XrefEntry};

/// Stable per-load identifier, used as the page-raster cache key instead of
/// a raw document pointer.
pub type DocumentId = u64;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Host font lookup: base font name (subset prefix already stripped) to a
/// font program byte stream.
pub type FontResolver = dyn Fn(&str) -> Option<Vec<u8>> + Send + Sync;

/// Host hooks and load configuration.
#[derive(Default)]
pub struct LoadOptions {
    pub password: Vec<u8>,
    pub font_resolver: Option<Box<FontResolver>>,
    pub certificate_decrypt: Option<Box<CertificateDecrypt>>,
    /// Face used when a glyph is missing from the selected font.
    pub fallback_font: Option<Vec<u8>>,
}

/// Parsed document: object graph owner and reference resolver.
///
/// The object map is append-only during `load` and immutable afterwards
/// (decryption rewrites payloads once, before `load` returns), which is what
/// makes sharing a document across render threads sound.
pub struct Document {
    id: DocumentId,
    data: Vec<u8>,
    objects: HashMap<u32, Object>,
    trailer: Dict,
    root: Option<Dict>,
    pages_root: Option<Dict>,
    encrypted: bool,
    pub(crate) options: LoadOptions,
    page_list: OnceLock<Vec<Dict>>,
    font_maps: Mutex<HashMap<usize, Arc<HashMap<String, Arc<FontInfo>>>>>,
}

impl Document {
    pub fn load(data: Vec<u8>, options: LoadOptions) -> Result<Document> {
        if data.len() < 4 {
            return Err(PdfError::Parse("not a PDF: too short".into()));
        }

        // 1. xref chain first, so incremental updates resolve correctly
        let xref = parser::load_xref(&data);

        // 2. linear scan as both baseline and damage recovery
        let mut objects = parser::scan_objects(&data);

        // 3. xref-referenced objects the scan missed
        for (&num, entry) in &xref.entries {
            if let XrefEntry::InUse { offset, generation } = *entry {
                if !objects.contains_key(&num) {
                    if let Some((n, g, obj)) = parser::parse_indirect_at(&data, offset) {
                        if n == num {
                            objects.insert(n, (g, obj));
                        }
                    } else {
                        debug!("xref: no object at offset {offset} for {num} {generation}");
                    }
                }
            }
        }

        let trailer = xref.trailer;
        if trailer.is_empty() {
            if objects.is_empty() {
                return Err(PdfError::Parse("no objects recovered".into()));
            }
            warn!("no trailer found, continuing with recovered objects only");
        }

        // 4. encryption: compute the file key and rewrite payloads in place,
        //    exactly once, before anything downstream reads them
        let mut encrypted = false;
        if let Some(enc_obj) = trailer.get("Encrypt") {
            encrypted = true;
            let enc_ref = enc_obj.as_reference();
            let enc_dict = match enc_obj {
                Object::Reference(r) => {
                    objects.get(&r.num).and_then(|(_, o)| o.as_dict()).cloned()
                }
                Object::Dictionary(d) => Some(d.clone()),
                _ => None,
            };
            let Some(enc_dict) = enc_dict else {
                return Err(PdfError::Encryption("missing /Encrypt dictionary".into()));
            };
            let file_id = trailer
                .get("ID")
                .and_then(|o| o.as_array())
                .and_then(|a| a.first())
                .and_then(|o| o.as_string())
                .unwrap_or(&[])
                .to_vec();
            let decryptor = Decryptor::new(
                &enc_dict,
                &file_id,
                &options.password,
                options.certificate_decrypt.as_deref(),
            )?;
            let mut count = 0usize;
            for (&num, (generation, obj)) in objects.iter_mut() {
                if enc_ref.is_some_and(|r| r.num == num) {
                    continue;
                }
                decrypt_object(obj, num, *generation, &decryptor);
                count += 1;
            }
            debug!("decrypted payloads of {count} objects");
        }

        let mut doc = Document {
            id: NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed),
            data,
            objects: objects.into_iter().map(|(n, (_, o))| (n, o)).collect(),
            trailer,
            root: None,
            pages_root: None,
            encrypted,
            options,
            page_list: OnceLock::new(),
            font_maps: Mutex::new(HashMap::new()),
        };

        // 5. expand object streams (their payloads are now plaintext)
        let mut from_obj_stm = Vec::new();
        for (&num, entry) in &xref.entries {
            if let XrefEntry::Compressed { obj_stm, index } = *entry {
                if doc.objects.contains_key(&num) {
                    continue;
                }
                if let Some(obj) = doc.load_from_obj_stm(obj_stm, index as usize) {
                    from_obj_stm.push((num, obj));
                }
            }
        }
        debug!("loaded {} objects from object streams", from_obj_stm.len());
        for (num, obj) in from_obj_stm {
            doc.objects.entry(num).or_insert(obj);
        }

        // 6. locate /Root and /Pages, with flat scans as damage fallbacks
        doc.root = doc
            .trailer
            .get("Root")
            .map(|r| doc.resolve(r))
            .and_then(|o| o.as_dict().cloned())
            .or_else(|| doc.find_by_type("Catalog"));
        doc.pages_root = doc
            .root
            .as_ref()
            .and_then(|r| r.get("Pages").map(|p| doc.resolve(p)))
            .and_then(|o| o.as_dict().cloned())
            .or_else(|| doc.find_by_type("Pages"));

        if doc.objects.is_empty() {
            return Err(PdfError::Parse("empty object map".into()));
        }
        Ok(doc)
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Follow indirect references to the definition. A visited set plus a
    /// hop cap guarantee termination on cyclic or adversarial chains;
    /// anything unresolvable reads as Null.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        let mut cur = obj;
        let mut visited: HashSet<u32> = HashSet::new();
        while let Object::Reference(r) = cur {
            if visited.len() > 100 || !visited.insert(r.num) {
                return &NULL;
            }
            match self.objects.get(&r.num) {
                Some(next) => cur = next,
                None => return &NULL,
            }
        }
        cur
    }

    pub fn resolve_ref(&self, r: ObjRef) -> &Object {
        self.objects.get(&r.num).map(|o| self.resolve(o)).unwrap_or(&NULL)
    }

    /// Dictionary lookup with reference resolution.
    pub fn get<'a>(&'a self, dict: &'a Dict, key: &str) -> &'a Object {
        dict.get(key).map(|o| self.resolve(o)).unwrap_or(&NULL)
    }

    fn find_by_type(&self, ty: &str) -> Option<Dict> {
        self.objects.values().find_map(|o| {
            let d = o.as_dict()?;
            (self.get(d, "Type").as_name() == Some(ty)).then(|| d.clone())
        })
    }

    fn load_from_obj_stm(&self, obj_stm: u32, index: usize) -> Option<Object> {
        let stream = self.objects.get(&obj_stm)?.as_stream()?;
        let n = self.get(&stream.dict, "N").as_i64()? as usize;
        let first = self.get(&stream.dict, "First").as_i64()? as usize;
        let decoded = self.decode_stream(stream);
        let (_, obj) = parser::parse_obj_stm_entry(&decoded, n, first, index)?;
        Some(obj)
    }

    // ----- page tree -----

    /// All leaf pages in tree order. Damaged trees fall back to a flat scan
    /// of every dictionary typed /Page.
    fn pages(&self) -> &[Dict] {
        self.page_list.get_or_init(|| {
            let mut out = Vec::new();
            if let Some(root) = &self.pages_root {
                let mut visited = HashSet::new();
                self.walk_pages(root, None, &mut visited, &mut out, 0);
            }
            if out.is_empty() {
                for obj in self.objects.values() {
                    if let Some(d) = obj.as_dict() {
                        if self.get(d, "Type").as_name() == Some("Page") && self.is_real_page(d) {
                            out.push(d.clone());
                        }
                    }
                }
            }
            out
        })
    }

    fn walk_pages(
        &self,
        node: &Dict,
        node_ref: Option<u32>,
        visited: &mut HashSet<u32>,
        out: &mut Vec<Dict>,
        depth: usize,
    ) {
        if depth > 64 {
            return;
        }
        if let Some(num) = node_ref {
            if !visited.insert(num) {
                return;
            }
        }
        let ty = self.get(node, "Type").as_name();
        if ty == Some("Page") {
            if self.is_real_page(node) {
                out.push(node.clone());
            }
            return;
        }
        if let Some(kids) = self.get(node, "Kids").as_array() {
            for kid in kids {
                let num = kid.as_reference().map(|r| r.num);
                if let Some(d) = self.resolve(kid).as_dict() {
                    self.walk_pages(d, num, visited, out, depth + 1);
                }
            }
        } else if ty.is_none() && node.contains_key("MediaBox") && self.is_real_page(node) {
            out.push(node.clone());
        }
    }

    /// Ghost-page filter: leaf dictionaries with an absurdly narrow MediaBox
    /// (width below 5 pt) are layout artifacts, not pages.
    fn is_real_page(&self, dict: &Dict) -> bool {
        if let Some(mb) = self.get(dict, "MediaBox").as_array() {
            if mb.len() >= 4 {
                let x1 = self.resolve(&mb[0]).as_f64().unwrap_or(0.0);
                let x2 = self.resolve(&mb[2]).as_f64().unwrap_or(0.0);
                let w = (x2 - x1).abs();
                if w > 0.0 && w < 5.0 {
                    return false;
                }
            }
        }
        true
    }

    pub fn page_count(&self) -> usize {
        self.pages().len()
    }

    pub fn page_dict(&self, index: usize) -> Option<&Dict> {
        self.pages().get(index)
    }

    /// Inheritable page attribute: look on the page, then walk /Parent
    /// toward the root.
    pub fn page_attr<'a>(&'a self, page: &'a Dict, key: &str) -> &'a Object {
        let mut node = page;
        for _ in 0..64 {
            let v = self.get(node, key);
            if !v.is_null() {
                return v;
            }
            match self.get(node, "Parent").as_dict() {
                Some(parent) => node = parent,
                None => break,
            }
        }
        &NULL
    }

    fn box_of(&self, obj: &Object) -> Option<[f64; 4]> {
        let arr = obj.as_array()?;
        if arr.len() < 4 {
            return None;
        }
        let mut out = [0.0; 4];
        for (i, v) in arr.iter().take(4).enumerate() {
            out[i] = self.resolve(v).as_f64()?;
        }
        Some(out)
    }

    /// Unrotated page size in points; CropBox preferred over MediaBox.
    pub fn page_size_raw(&self, index: usize) -> Option<(f64, f64)> {
        let page = self.page_dict(index)?;
        let b = self
            .box_of(self.page_attr(page, "CropBox"))
            .or_else(|| self.box_of(self.page_attr(page, "MediaBox")))
            .unwrap_or([0.0, 0.0, 612.0, 792.0]);
        Some(((b[2] - b[0]).abs(), (b[3] - b[1]).abs()))
    }

    /// Display size: width/height swapped for 90 and 270 degree rotation.
    pub fn page_size(&self, index: usize) -> Option<(f64, f64)> {
        let (w, h) = self.page_size_raw(index)?;
        match self.page_rotation(index) {
            90 | 270 => Some((h, w)),
            _ => Some((w, h)),
        }
    }

    /// Page origin offset (CropBox/MediaBox lower-left), needed when boxes
    /// do not start at 0,0.
    pub fn page_origin(&self, index: usize) -> (f64, f64) {
        let Some(page) = self.page_dict(index) else { return (0.0, 0.0) };
        let b = self
            .box_of(self.page_attr(page, "CropBox"))
            .or_else(|| self.box_of(self.page_attr(page, "MediaBox")))
            .unwrap_or([0.0; 4]);
        (b[0].min(b[2]), b[1].min(b[3]))
    }

    /// Normalised /Rotate: one of 0, 90, 180, 270.
    pub fn page_rotation(&self, index: usize) -> i32 {
        let Some(page) = self.page_dict(index) else { return 0 };
        let r = self.page_attr(page, "Rotate").as_i64().unwrap_or(0) as i32;
        ((r % 360) + 360) % 360 / 90 * 90
    }

    /// Concatenated, decoded content streams of a page. Streams are joined
    /// with a newline so operators never glue across boundaries.
    pub fn page_contents(&self, index: usize) -> Vec<u8> {
        let Some(page) = self.page_dict(index) else { return Vec::new() };
        let mut out = Vec::new();
        match self.get(page, "Contents") {
            Object::Stream(s) => out = self.decode_stream(s),
            Object::Array(items) => {
                for item in items.clone() {
                    if let Some(s) = self.resolve(&item).as_stream() {
                        if !out.is_empty() {
                            out.push(b'\n');
                        }
                        out.extend_from_slice(&self.decode_stream(s));
                    }
                }
            }
            _ => {}
        }
        out
    }

    /// Page resources, inherited through the tree if absent on the leaf.
    pub fn page_resources(&self, index: usize) -> Dict {
        let Some(page) = self.page_dict(index) else { return Dict::new() };
        self.page_attr(page, "Resources").as_dict().cloned().unwrap_or_default()
    }

    // ----- streams -----

    /// Decode a stream through its declared filter chain, retrying with a
    /// direct inflate (zlib then raw window) and finally the raw payload.
    /// Content must keep flowing on broken filters; the error is only logged.
    pub fn decode_stream(&self, stream: &Stream) -> Vec<u8> {
        let chain = self.resolved_filter_chain(&stream.dict);
        match filters::decode_chain(&stream.data, &chain) {
            Ok(data) => data,
            Err(e) => {
                debug!("stream decode failed ({e}), trying direct inflate");
                match filters::inflate_any(&stream.data) {
                    Ok(data) if !data.is_empty() => data,
                    _ => stream.data.as_ref().clone(),
                }
            }
        }
    }

    /// Like [`filters::filter_chain`] but with indirect names and parameter
    /// dictionaries resolved first.
    pub fn resolved_filter_chain(&self, dict: &Dict) -> Vec<(String, Option<Dict>)> {
        let mut resolved = Dict::new();
        if let Some(f) = dict.get("Filter").or_else(|| dict.get("F")) {
            resolved.set("Filter", self.deep_resolve(f, 0));
        }
        if let Some(p) = dict.get("DecodeParms").or_else(|| dict.get("DP")) {
            resolved.set("DecodeParms", self.deep_resolve(p, 0));
        }
        filters::filter_chain(&resolved)
    }

    /// Resolve references inside a bounded object tree (filter params and
    /// similar small metadata).
    pub fn deep_resolve(&self, obj: &Object, depth: usize) -> Object {
        if depth > 16 {
            return Object::Null;
        }
        match self.resolve(obj) {
            Object::Array(items) => {
                Object::Array(items.iter().map(|o| self.deep_resolve(o, depth + 1)).collect())
            }
            Object::Dictionary(d) => {
                let mut out = Dict::new();
                for (k, v) in d.iter() {
                    out.set(k, self.deep_resolve(v, depth + 1));
                }
                Object::Dictionary(out)
            }
            other => other.clone(),
        }
    }

    // ----- fonts -----

    /// Font map for a page, `/F1`-style resource name to built font info.
    /// Built once per (document, page); later callers share the Arc.
    pub fn page_fonts(&self, index: usize) -> Arc<HashMap<String, Arc<FontInfo>>> {
        if let Some(cached) = self.font_maps.lock().unwrap().get(&index) {
            return cached.clone();
        }
        // build outside the lock; first build wins on a race
        let resources = self.page_resources(index);
        let built = Arc::new(font::build_page_fonts(self, &resources));
        self.font_maps.lock().unwrap().entry(index).or_insert(built).clone()
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        // a closed document keeps no page rasters alive
        crate::core::cache::page_clear_document(self.id);
    }
}

/// Rewrite encrypted strings and stream payloads in place. Cross-reference
/// streams are never encrypted and are skipped.
fn decrypt_object(obj: &mut Object, num: u32, generation: u16, dec: &Decryptor) {
    match obj {
        Object::String(s) => {
            *s = dec.decrypt_string(num, generation, s);
        }
        Object::Array(items) => {
            for item in items {
                decrypt_object(item, num, generation, dec);
            }
        }
        Object::Dictionary(d) => {
            let mut replacement = Dict::new();
            for (k, v) in d.iter() {
                let mut v = v.clone();
                decrypt_object(&mut v, num, generation, dec);
                replacement.set(k, v);
            }
            *d = replacement;
        }
        Object::Stream(s) => {
            if s.dict.get("Type").and_then(|t| t.as_name()) == Some("XRef") {
                return;
            }
            let mut replacement = Dict::new();
            for (k, v) in s.dict.iter() {
                let mut v = v.clone();
                decrypt_object(&mut v, num, generation, dec);
                replacement.set(k, v);
            }
            s.dict = replacement;
            s.data = Arc::new(dec.decrypt_stream(num, generation, &s.data));
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil;

    #[test]
    fn single_page_document() {
        let pdf = testutil::minimal_pdf(b"BT /F1 12 Tf 100 700 Td (Hi) Tj ET");
        let doc = Document::load(pdf, LoadOptions::default()).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_size(0), Some((612.0, 792.0)));
        let content = doc.page_contents(0);
        assert!(content.starts_with(b"BT /F1"));
    }

    #[test]
    fn rotation_swaps_size() {
        let mut pdf = testutil::PdfBuilder::new();
        let content = pdf.stream(Dict::new(), b"0 0 m 10 10 l S".to_vec());
        pdf.page_with(612.0, 792.0, content, |d| {
            d.set("Rotate", Object::Integer(90));
        });
        let doc = Document::load(pdf.build(), LoadOptions::default()).unwrap();
        assert_eq!(doc.page_rotation(0), 90);
        assert_eq!(doc.page_size_raw(0), Some((612.0, 792.0)));
        assert_eq!(doc.page_size(0), Some((792.0, 612.0)));
    }

    #[test]
    fn resolve_terminates_on_cycle() {
        // 1 -> 2 -> 1 reference cycle
        let mut full = b"1 0 obj\n2 0 R\nendobj\n2 0 obj\n1 0 R\nendobj\n".to_vec();
        full.extend_from_slice(b"trailer\n<< /Size 3 >>\nstartxref\n0\n%%EOF\n");
        let doc = Document::load(full, LoadOptions::default()).unwrap();
        let r = Object::Reference(ObjRef { num: 1, generation: 0 });
        assert!(doc.resolve(&r).is_null());
    }

    #[test]
    fn incremental_update_wins_at_resolve() {
        let pdf = testutil::minimal_pdf(b"BT ET");
        let mut doc_bytes = pdf.clone();
        // append an update replacing the content stream (object 3)
        let new_obj = b"3 0 obj\n<< /Length 7 >>\nstream\n0 0 m S\nendstream\nendobj\n";
        let offset = doc_bytes.len();
        doc_bytes.extend_from_slice(new_obj);
        let xref = doc_bytes.len();
        doc_bytes.extend_from_slice(b"xref\n3 1\n");
        doc_bytes.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
        doc_bytes.extend_from_slice(b"trailer\n<< /Size 6 /Root 1 0 R >>\n");
        doc_bytes.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());

        let doc = Document::load(doc_bytes, LoadOptions::default()).unwrap();
        let content = doc.page_contents(0);
        assert!(content.starts_with(b"0 0 m S"), "{:?}", String::from_utf8_lossy(&content));
    }

    #[test]
    fn object_stream_documents_load() {
        let pdf = testutil::obj_stm_pdf();
        let doc = Document::load(pdf, LoadOptions::default()).unwrap();
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.page_size(0), Some((612.0, 792.0)));
    }

    #[test]
    fn ghost_pages_are_filtered() {
        let mut pdf = testutil::PdfBuilder::new();
        let content = pdf.stream(Dict::new(), b"BT ET".to_vec());
        pdf.page(612.0, 792.0, content);
        let content2 = pdf.stream(Dict::new(), b"BT ET".to_vec());
        pdf.page(2.0, 792.0, content2); // ghost: 2pt wide
        let doc = Document::load(pdf.build(), LoadOptions::default()).unwrap();
        assert_eq!(doc.page_count(), 1);
    }

    #[test]
    fn encrypted_rc4_document_opens_with_empty_password() {
        let pdf = testutil::encrypted_rc4_pdf(b"BT /F1 24 Tf (locked) Tj ET");
        let doc = Document::load(pdf, LoadOptions::default()).unwrap();
        assert!(doc.is_encrypted());
        let content = doc.page_contents(0);
        assert!(content.starts_with(b"BT /F1"), "{:?}", String::from_utf8_lossy(&content));
    }
}
