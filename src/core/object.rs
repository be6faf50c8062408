use std::fmt;
use std::sync::Arc;

/// Core PDF objects based on PDF Reference 1.7
#[derive(Debug, Clone, Default)]
pub enum Object {
    #[default]
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    Name(String),
    String(Vec<u8>),
    Array(Vec<Object>),
    Dictionary(Dict),
    Stream(Stream),
    Reference(ObjRef),
}

/// Shared immutable Null, for lookups that must hand back a reference.
pub static NULL: Object = Object::Null;

/// Indirect object reference (object number, generation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef {
    pub num: u32,
    pub generation: u16,
}

/// Dictionary with insertion-ordered entries.
///
/// Order matters for /Differences-style interleaved reads, so a plain
/// HashMap would lose information. Keys are stored without the leading
/// slash; lookups tolerate both forms.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(String, Object)>,
}

impl Dict {
    pub fn new() -> Self {
        Dict { entries: Vec::new() }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Object) {
        let key = normalize_key(key.into());
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Object> {
        let key = key.strip_prefix('/').unwrap_or(key);
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_key(key: String) -> String {
    match key.strip_prefix('/') {
        Some(bare) => bare.to_string(),
        None => key,
    }
}

/// Stream object: dictionary plus payload.
///
/// The payload is refcounted so that object-stream children, caches and the
/// renderer can share bytes without copying.
#[derive(Debug, Clone)]
pub struct Stream {
    pub dict: Dict,
    pub data: Arc<Vec<u8>>,
}

impl Stream {
    pub fn new(dict: Dict, data: Vec<u8>) -> Self {
        Stream { dict, data: Arc::new(data) }
    }
}

impl Object {
    /// Integer or real value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            Object::Real(r) => Some(*r as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Name without the leading slash.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(n) => Some(n.strip_prefix('/').unwrap_or(n)),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Dictionary of a plain dictionary or of a stream.
    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            Object::Stream(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.num, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_keeps_insertion_order() {
        let mut d = Dict::new();
        d.set("Zebra", Object::Integer(1));
        d.set("Alpha", Object::Integer(2));
        d.set("Mid", Object::Integer(3));
        let keys: Vec<&str> = d.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Zebra", "Alpha", "Mid"]);
    }

    #[test]
    fn dict_lookup_tolerates_slash() {
        let mut d = Dict::new();
        d.set("/Type", Object::Name("Page".into()));
        assert!(d.get("Type").is_some());
        assert!(d.get("/Type").is_some());
        assert!(d.get("Missing").is_none());
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut d = Dict::new();
        d.set("Length", Object::Integer(10));
        d.set("Length", Object::Integer(20));
        assert_eq!(d.len(), 1);
        assert_eq!(d.get("Length").unwrap().as_i64(), Some(20));
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(Object::Integer(7).as_f64(), Some(7.0));
        assert_eq!(Object::Real(1.5).as_f64(), Some(1.5));
        assert_eq!(Object::Name("/F1".into()).as_name(), Some("F1"));
        assert!(Object::Null.as_f64().is_none());
    }
}
