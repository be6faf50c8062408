use crate::core::object::{Dict, ObjRef, Object, Stream};

/// Byte-level reader for PDF object syntax.
///
/// Keeps an explicit cursor into the raw document bytes; the document-level
/// parser positions it at xref offsets, object offsets and object-stream
/// payloads. All `read_*` methods leave the cursor after the consumed token.
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
}

pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\0' | b'\t' | b'\n' | 0x0c | b'\r' | b' ')
}

pub fn is_delimiter(b: u8) -> bool {
    matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Lexer { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Lexer { data, pos: pos.min(data.len()) }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// The underlying buffer (for interpreters that slice raw regions,
    /// e.g. inline-image payloads).
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    pub fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek(&self) -> u8 {
        if self.pos < self.data.len() { self.data[self.pos] } else { 0 }
    }

    fn peek_at(&self, ahead: usize) -> u8 {
        let i = self.pos + ahead;
        if i < self.data.len() { self.data[i] } else { 0 }
    }

    fn bump(&mut self) -> u8 {
        let b = self.peek();
        if self.pos < self.data.len() {
            self.pos += 1;
        }
        b
    }

    /// Skip whitespace and `%` comments (which run to end of line).
    pub fn skip_space(&mut self) {
        loop {
            while !self.eof() && is_whitespace(self.peek()) {
                self.pos += 1;
            }
            if self.peek() == b'%' {
                while !self.eof() && self.peek() != b'\n' && self.peek() != b'\r' {
                    self.pos += 1;
                }
            } else {
                return;
            }
        }
    }

    /// True if the bytes at the cursor match `kw` followed by a non-regular
    /// byte (so `trailer` does not match `trailerx`).
    pub fn starts_with_keyword(&self, kw: &[u8]) -> bool {
        if self.data.len() < self.pos + kw.len() {
            return false;
        }
        if &self.data[self.pos..self.pos + kw.len()] != kw {
            return false;
        }
        match self.data.get(self.pos + kw.len()) {
            Some(&b) => !is_regular(b),
            None => true,
        }
    }

    pub fn consume_keyword(&mut self, kw: &[u8]) -> bool {
        if self.starts_with_keyword(kw) {
            self.pos += kw.len();
            true
        } else {
            false
        }
    }

    /// Read a bare (signed, possibly fractional) number token.
    pub fn read_number(&mut self) -> Option<Object> {
        let start = self.pos;
        let mut saw_digit = false;
        let mut saw_dot = false;
        if matches!(self.peek(), b'+' | b'-') {
            self.pos += 1;
        }
        while !self.eof() {
            match self.peek() {
                b'0'..=b'9' => {
                    saw_digit = true;
                    self.pos += 1;
                }
                b'.' if !saw_dot => {
                    saw_dot = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if !saw_digit && !saw_dot {
            self.pos = start;
            return None;
        }
        let text = std::str::from_utf8(&self.data[start..self.pos]).ok()?;
        if saw_dot {
            // ".5" and "4." are legal PDF reals
            let fixed = if text.starts_with('.') {
                format!("0{text}")
            } else if text.ends_with('.') {
                format!("{text}0")
            } else {
                text.to_string()
            };
            fixed.parse::<f64>().ok().map(Object::Real)
        } else {
            match text.parse::<i64>() {
                Ok(v) => Some(Object::Integer(v)),
                // Overflowing integers degrade to reals
                Err(_) => text.parse::<f64>().ok().map(Object::Real),
            }
        }
    }

    /// Read a `/Name`, decoding `#xx` escapes. The cursor must be at `/`.
    pub fn read_name(&mut self) -> Option<String> {
        if self.peek() != b'/' {
            return None;
        }
        self.pos += 1;
        let mut out = Vec::new();
        while !self.eof() && is_regular(self.peek()) {
            let b = self.bump();
            if b == b'#' {
                let hi = hex_val(self.peek());
                let lo = hex_val(self.peek_at(1));
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push(hi << 4 | lo);
                    self.pos += 2;
                    continue;
                }
            }
            out.push(b);
        }
        Some(String::from_utf8_lossy(&out).into_owned())
    }

    /// Literal string `(...)` with nested parens and backslash escapes.
    pub fn read_literal_string(&mut self) -> Option<Vec<u8>> {
        if self.peek() != b'(' {
            return None;
        }
        self.pos += 1;
        let mut out = Vec::new();
        let mut depth = 1usize;
        while !self.eof() {
            let b = self.bump();
            match b {
                b'(' => {
                    depth += 1;
                    out.push(b);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(out);
                    }
                    out.push(b);
                }
                b'\\' => {
                    let e = self.bump();
                    match e {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'(' | b')' | b'\\' => out.push(e),
                        b'0'..=b'7' => {
                            let mut v = (e - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    d @ b'0'..=b'7' => {
                                        v = v * 8 + (d - b'0') as u32;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((v & 0xff) as u8);
                        }
                        // Line continuation: backslash before EOL drops both
                        b'\r' => {
                            if self.peek() == b'\n' {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        other => out.push(other),
                    }
                }
                _ => out.push(b),
            }
        }
        Some(out)
    }

    /// Hex string `<...>`; an odd trailing nibble is right-padded with 0.
    pub fn read_hex_string(&mut self) -> Option<Vec<u8>> {
        if self.peek() != b'<' {
            return None;
        }
        self.pos += 1;
        let mut out = Vec::new();
        let mut nibble: Option<u8> = None;
        while !self.eof() {
            let b = self.bump();
            if b == b'>' {
                if let Some(hi) = nibble {
                    out.push(hi << 4);
                }
                return Some(out);
            }
            if let Some(v) = hex_val(b) {
                match nibble.take() {
                    Some(hi) => out.push(hi << 4 | v),
                    None => nibble = Some(v),
                }
            }
        }
        Some(out)
    }

    /// Parse one object at the cursor: null/bool/number/name/string/array/
    /// dict/stream/indirect reference. Returns None on malformed syntax.
    pub fn read_object(&mut self) -> Option<Object> {
        self.skip_space();
        if self.eof() {
            return None;
        }
        match self.peek() {
            b'/' => self.read_name().map(Object::Name),
            b'(' => self.read_literal_string().map(Object::String),
            b'[' => {
                self.pos += 1;
                let mut items = Vec::new();
                loop {
                    self.skip_space();
                    if self.peek() == b']' {
                        self.pos += 1;
                        return Some(Object::Array(items));
                    }
                    items.push(self.read_object()?);
                }
            }
            b'<' => {
                if self.peek_at(1) == b'<' {
                    self.read_dict_or_stream()
                } else {
                    self.read_hex_string().map(Object::String)
                }
            }
            b't' => self.consume_keyword(b"true").then_some(Object::Boolean(true)),
            b'f' => self.consume_keyword(b"false").then_some(Object::Boolean(false)),
            b'n' => self.consume_keyword(b"null").then_some(Object::Null),
            b'+' | b'-' | b'.' | b'0'..=b'9' => {
                let first = self.read_number()?;
                // "N G R" is an indirect reference; try the lookahead and
                // rewind if it does not pan out.
                if let Object::Integer(num) = first {
                    if num >= 0 {
                        let save = self.pos;
                        self.skip_space();
                        if let Some(Object::Integer(generation)) = self.read_number() {
                            if (0..=65535).contains(&generation) {
                                self.skip_space();
                                if self.consume_keyword(b"R") {
                                    return Some(Object::Reference(ObjRef {
                                        num: num as u32,
                                        generation: generation as u16,
                                    }));
                                }
                            }
                        }
                        self.pos = save;
                    }
                }
                Some(first)
            }
            _ => None,
        }
    }

    fn read_dict_or_stream(&mut self) -> Option<Object> {
        // cursor at "<<"
        self.pos += 2;
        let mut dict = Dict::new();
        loop {
            self.skip_space();
            if self.peek() == b'>' && self.peek_at(1) == b'>' {
                self.pos += 2;
                break;
            }
            let key = self.read_name()?;
            let value = self.read_object()?;
            dict.set(key, value);
        }
        self.skip_space();
        if !self.consume_keyword(b"stream") {
            return Some(Object::Dictionary(dict));
        }
        // Payload starts after CRLF or LF
        if self.peek() == b'\r' {
            self.pos += 1;
        }
        if self.peek() == b'\n' {
            self.pos += 1;
        }
        let start = self.pos;
        let declared = dict.get("Length").and_then(|o| o.as_i64());
        let mut end = None;
        if let Some(len) = declared {
            let candidate = start.checked_add(len.max(0) as usize)?;
            if candidate <= self.data.len() && self.endstream_follows(candidate) {
                end = Some(candidate);
            }
        }
        // /Length missing, indirect or wrong: scan for the endstream keyword
        let end = match end {
            Some(e) => e,
            None => self.find_endstream(start)?,
        };
        let data = self.data[start..end].to_vec();
        self.seek(end);
        self.skip_space();
        self.consume_keyword(b"endstream");
        Some(Object::Stream(Stream::new(dict, data)))
    }

    fn endstream_follows(&self, mut pos: usize) -> bool {
        // allow one EOL between payload and keyword
        if pos < self.data.len() && self.data[pos] == b'\r' {
            pos += 1;
        }
        if pos < self.data.len() && self.data[pos] == b'\n' {
            pos += 1;
        }
        self.data[pos..].starts_with(b"endstream")
    }

    fn find_endstream(&self, start: usize) -> Option<usize> {
        let needle = b"endstream";
        let hay = &self.data[start..];
        let mut i = 0;
        while i + needle.len() <= hay.len() {
            if &hay[i..i + needle.len()] == needle {
                let mut end = start + i;
                // strip the EOL that belongs to the keyword, not the payload
                if end > start && self.data[end - 1] == b'\n' {
                    end -= 1;
                }
                if end > start && self.data[end - 1] == b'\r' {
                    end -= 1;
                }
                return Some(end);
            }
            i += 1;
        }
        None
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &[u8]) -> Object {
        Lexer::new(src).read_object().expect("object")
    }

    #[test]
    fn numbers() {
        assert!(matches!(parse(b"42"), Object::Integer(42)));
        assert!(matches!(parse(b"-17"), Object::Integer(-17)));
        match parse(b"3.14") {
            Object::Real(r) => assert!((r - 3.14).abs() < 1e-12),
            other => panic!("{other:?}"),
        }
        assert!(matches!(parse(b".5"), Object::Real(_)));
        assert!(matches!(parse(b"4."), Object::Real(_)));
    }

    #[test]
    fn names_with_hex_escape() {
        match parse(b"/Name#20With#20Spaces") {
            Object::Name(n) => assert_eq!(n, "Name With Spaces"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn literal_string_escapes() {
        match parse(br"(a\(b\)c\\d\101)") {
            Object::String(s) => assert_eq!(s, b"a(b)c\\dA"),
            other => panic!("{other:?}"),
        }
        match parse(b"(nested (parens) ok)") {
            Object::String(s) => assert_eq!(s, b"nested (parens) ok"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn hex_string_odd_nibble() {
        match parse(b"<48656C6C6F2>") {
            Object::String(s) => assert_eq!(s, b"Hello "),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn array_and_dict() {
        let obj = parse(b"[1 2 /Three (four) << /K 0 >>]");
        let arr = obj.as_array().unwrap();
        assert_eq!(arr.len(), 5);
        let obj = parse(b"<< /Type /Page /MediaBox [0 0 612 792] >>");
        let d = obj.as_dict().unwrap();
        assert_eq!(d.get("Type").unwrap().as_name(), Some("Page"));
        assert_eq!(d.get("MediaBox").unwrap().as_array().unwrap().len(), 4);
    }

    #[test]
    fn indirect_reference_vs_plain_ints() {
        assert!(matches!(parse(b"7 0 R"), Object::Reference(ObjRef { num: 7, generation: 0 })));
        // "7 0 RG" must not lex as a reference
        let mut lex = Lexer::new(b"7 0 RG");
        assert!(matches!(lex.read_object(), Some(Object::Integer(7))));
    }

    #[test]
    fn stream_with_declared_length() {
        let src = b"<< /Length 5 >>\nstream\nabcde\nendstream";
        match parse(src) {
            Object::Stream(s) => assert_eq!(&**s.data, b"abcde"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn stream_with_wrong_length_recovers() {
        let src = b"<< /Length 999 >>\nstream\nabcde\nendstream";
        match parse(src) {
            Object::Stream(s) => assert_eq!(&**s.data, b"abcde"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn comments_are_skipped() {
        assert!(matches!(parse(b"% header comment\n  123"), Object::Integer(123)));
    }
}
