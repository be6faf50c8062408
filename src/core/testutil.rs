//! In-memory builders for tiny synthetic PDFs used by the unit tests.

use crate::core::crypt;
use crate::core::object::{Dict, Object};
use md5::{Digest, Md5};

/// Serialize an object in PDF syntax. Strings are written in hex form so
/// binary payloads never need escaping.
pub fn write_object(obj: &Object, out: &mut Vec<u8>) {
    match obj {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Object::Real(r) => out.extend_from_slice(format!("{r}").as_bytes()),
        Object::Name(n) => {
            out.push(b'/');
            out.extend_from_slice(n.strip_prefix('/').unwrap_or(n).as_bytes());
        }
        Object::String(s) => {
            out.push(b'<');
            for b in s {
                out.extend_from_slice(format!("{b:02X}").as_bytes());
            }
            out.push(b'>');
        }
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(item, out);
            }
            out.push(b']');
        }
        Object::Dictionary(d) => {
            out.extend_from_slice(b"<<");
            for (k, v) in d.iter() {
                out.push(b' ');
                out.push(b'/');
                out.extend_from_slice(k.as_bytes());
                out.push(b' ');
                write_object(v, out);
            }
            out.extend_from_slice(b" >>");
        }
        Object::Stream(s) => {
            let mut dict = s.dict.clone();
            dict.set("Length", Object::Integer(s.data.len() as i64));
            write_object(&Object::Dictionary(dict), out);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&s.data);
            out.extend_from_slice(b"\nendstream");
        }
        Object::Reference(r) => {
            out.extend_from_slice(format!("{} {} R", r.num, r.generation).as_bytes());
        }
    }
}

pub fn dict(pairs: &[(&str, Object)]) -> Dict {
    let mut d = Dict::new();
    for (k, v) in pairs {
        d.set(*k, v.clone());
    }
    d
}

pub fn name(n: &str) -> Object {
    Object::Name(n.to_string())
}

pub fn int(i: i64) -> Object {
    Object::Integer(i)
}

pub fn real(r: f64) -> Object {
    Object::Real(r)
}

pub fn array(items: Vec<Object>) -> Object {
    Object::Array(items)
}

pub fn reference(num: u32) -> Object {
    Object::Reference(crate::core::object::ObjRef { num, generation: 0 })
}

/// Assembles a classic-xref PDF. Object 1 is the catalog, 2 the page tree;
/// callers add content streams and pages.
pub struct PdfBuilder {
    bodies: Vec<(u32, Vec<u8>)>,
    next: u32,
    pages: Vec<u32>,
    pub trailer_extra: Dict,
}

impl PdfBuilder {
    pub fn new() -> Self {
        PdfBuilder { bodies: Vec::new(), next: 3, pages: Vec::new(), trailer_extra: Dict::new() }
    }

    pub fn add_object(&mut self, obj: Object) -> u32 {
        let num = self.next;
        self.next += 1;
        let mut body = Vec::new();
        write_object(&obj, &mut body);
        self.bodies.push((num, body));
        num
    }

    pub fn stream(&mut self, dict: Dict, data: Vec<u8>) -> u32 {
        self.add_object(Object::Stream(crate::core::object::Stream::new(dict, data)))
    }

    pub fn page(&mut self, w: f64, h: f64, content: u32) -> u32 {
        self.page_with(w, h, content, |_| {})
    }

    pub fn page_with(&mut self, w: f64, h: f64, content: u32, tweak: impl FnOnce(&mut Dict)) -> u32 {
        let mut d = dict(&[
            ("Type", name("Page")),
            ("Parent", reference(2)),
            ("MediaBox", array(vec![int(0), int(0), real(w), real(h)])),
            ("Contents", reference(content)),
            (
                "Resources",
                Object::Dictionary(dict(&[(
                    "Font",
                    Object::Dictionary(dict(&[(
                        "F1",
                        Object::Dictionary(dict(&[
                            ("Type", name("Font")),
                            ("Subtype", name("Type1")),
                            ("BaseFont", name("Helvetica")),
                        ])),
                    )])),
                )])),
            ),
        ]);
        tweak(&mut d);
        let num = self.add_object(Object::Dictionary(d));
        self.pages.push(num);
        num
    }

    pub fn build(self) -> Vec<u8> {
        let mut out: Vec<u8> = b"%PDF-1.7\n%\x93\x8C\x8B\x9E\n".to_vec();

        let catalog = dict(&[("Type", name("Catalog")), ("Pages", reference(2))]);
        let pages = dict(&[
            ("Type", name("Pages")),
            ("Kids", array(self.pages.iter().map(|&p| reference(p)).collect())),
            ("Count", int(self.pages.len() as i64)),
        ]);

        let mut all: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut body = Vec::new();
        write_object(&Object::Dictionary(catalog), &mut body);
        all.push((1, body));
        let mut body = Vec::new();
        write_object(&Object::Dictionary(pages), &mut body);
        all.push((2, body));
        all.extend(self.bodies);

        let mut offsets: Vec<(u32, usize)> = Vec::new();
        for (num, body) in &all {
            offsets.push((*num, out.len()));
            out.extend_from_slice(format!("{num} 0 obj\n").as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }
        offsets.sort_by_key(|&(n, _)| n);

        let xref_pos = out.len();
        let size = self.next;
        out.extend_from_slice(format!("xref\n0 {size}\n").as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        let mut by_num = std::collections::HashMap::new();
        for (n, off) in &offsets {
            by_num.insert(*n, *off);
        }
        for num in 1..size {
            let off = by_num.get(&num).copied().unwrap_or(0);
            out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }

        let mut trailer = dict(&[("Size", int(size as i64)), ("Root", reference(1))]);
        for (k, v) in self.trailer_extra.iter() {
            trailer.set(k, v.clone());
        }
        out.extend_from_slice(b"trailer\n");
        write_object(&Object::Dictionary(trailer), &mut out);
        out.extend_from_slice(format!("\nstartxref\n{xref_pos}\n%%EOF\n").as_bytes());
        out
    }
}

/// One-page 612x792 document with the given content stream and a
/// non-embedded Helvetica as /F1.
pub fn minimal_pdf(content: &[u8]) -> Vec<u8> {
    let mut b = PdfBuilder::new();
    let c = b.stream(Dict::new(), content.to_vec());
    b.page(612.0, 792.0, c);
    b.build()
}

/// Document whose catalog, page tree and page live in an object stream
/// addressed through an xref stream (PDF 1.5 layout).
pub fn obj_stm_pdf() -> Vec<u8> {
    let mut out: Vec<u8> = b"%PDF-1.7\n%\x93\x8C\x8B\x9E\n".to_vec();

    // object 4: content stream, plain
    let content = b"BT ET";
    let off4 = out.len();
    out.extend_from_slice(
        format!("4 0 obj\n<< /Length {} >>\nstream\n", content.len()).as_bytes(),
    );
    out.extend_from_slice(content);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    // object 5: ObjStm holding objects 1 (catalog), 2 (pages), 3 (page)
    let mut payloads: Vec<Vec<u8>> = Vec::new();
    let catalog = dict(&[("Type", name("Catalog")), ("Pages", reference(2))]);
    let pages = dict(&[
        ("Type", name("Pages")),
        ("Kids", array(vec![reference(3)])),
        ("Count", int(1)),
    ]);
    let page = dict(&[
        ("Type", name("Page")),
        ("Parent", reference(2)),
        ("MediaBox", array(vec![int(0), int(0), int(612), int(792)])),
        ("Contents", reference(4)),
    ]);
    for d in [catalog, pages, page] {
        let mut body = Vec::new();
        write_object(&Object::Dictionary(d), &mut body);
        payloads.push(body);
    }
    let mut header = String::new();
    let mut data = Vec::new();
    for (i, p) in payloads.iter().enumerate() {
        header.push_str(&format!("{} {} ", i + 1, data.len()));
        data.extend_from_slice(p);
        data.push(b' ');
    }
    let first = header.len();
    let mut stm_payload = header.into_bytes();
    stm_payload.extend_from_slice(&data);
    let off5 = out.len();
    out.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 3 /First {} /Length {} >>\nstream\n",
            first,
            stm_payload.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&stm_payload);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    // object 6: xref stream, W [1 2 1], uncompressed
    let off6 = out.len();
    let mut entries: Vec<u8> = Vec::new();
    let mut push = |ty: u8, f2: u16, f3: u8| {
        entries.push(ty);
        entries.extend_from_slice(&f2.to_be_bytes());
        entries.push(f3);
    };
    push(0, 0, 0);
    push(2, 5, 0); // obj 1 in ObjStm 5 index 0
    push(2, 5, 1);
    push(2, 5, 2);
    push(1, off4 as u16, 0);
    push(1, off5 as u16, 0);
    push(1, off6 as u16, 0);
    out.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [1 2 1] /Root 1 0 R /Length {} >>\nstream\n",
            entries.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&entries);
    out.extend_from_slice(b"\nendstream\nendobj\n");
    out.extend_from_slice(format!("startxref\n{off6}\n%%EOF\n").as_bytes());
    out
}

/// RC4 40-bit (V1/R2) encrypted single-page document, empty user and owner
/// passwords, with the encrypt dictionary written directly in the trailer.
pub fn encrypted_rc4_pdf(content: &[u8]) -> Vec<u8> {
    const PAD: [u8; 32] = [
        0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
        0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
        0x69, 0x7A,
    ];
    let file_id = b"sixteen-byte-id!".to_vec();
    let p: i32 = -4;

    // /O for empty owner password
    let owner_key = Md5::digest(PAD);
    let o = crypt::rc4(&owner_key[..5], &PAD);

    // file key (revision 2, 40-bit)
    let mut h = Md5::new();
    h.update(PAD);
    h.update(&o);
    h.update((p as u32).to_le_bytes());
    h.update(&file_id);
    let key = h.finalize()[..5].to_vec();
    let u = crypt::rc4(&key, &PAD);

    // per-object key for the content stream (object 3 below)
    let mut oh = Md5::new();
    oh.update(&key);
    oh.update(&3u32.to_le_bytes()[..3]);
    oh.update(&0u16.to_le_bytes()[..2]);
    let obj_key = oh.finalize()[..10].to_vec();
    let encrypted = crypt::rc4(&obj_key, content);

    let mut b = PdfBuilder::new();
    let c = b.stream(Dict::new(), encrypted);
    debug_assert_eq!(c, 3);
    b.page(612.0, 792.0, c);
    b.trailer_extra.set(
        "Encrypt",
        Object::Dictionary(dict(&[
            ("Filter", name("Standard")),
            ("V", int(1)),
            ("R", int(2)),
            ("Length", int(40)),
            ("O", Object::String(o)),
            ("U", Object::String(u)),
            ("P", int(p as i64)),
        ])),
    );
    b.trailer_extra.set(
        "ID",
        array(vec![Object::String(file_id.clone()), Object::String(file_id)]),
    );
    b.build()
}
