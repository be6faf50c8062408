//! Process-wide caches: font faces keyed by font-program hash, glyph
//! coverage masks, and whole-page rasters. All three are mutex-guarded
//! singletons with hit/miss/size counters; expensive work (face creation,
//! glyph rendering) happens outside the lock and the result is published
//! under a second lock, so a race costs duplicate work, never correctness.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use owned_ttf_parser::OwnedFace;

use crate::core::document::DocumentId;

/// Diagnostic counters exposed by each cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

// ----- font-face cache -----

const FONT_FACE_CAP: usize = 100;

struct FontFaceCache {
    map: HashMap<u64, Arc<OwnedFace>>,
    hits: u64,
    misses: u64,
}

fn font_faces() -> &'static Mutex<FontFaceCache> {
    static CACHE: OnceLock<Mutex<FontFaceCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(FontFaceCache { map: HashMap::new(), hits: 0, misses: 0 }))
}

/// Get or create the parsed face for a font program. The face owns a copy
/// of the bytes, so callers may drop theirs.
pub fn font_face(hash: u64, bytes: &[u8]) -> Option<Arc<OwnedFace>> {
    {
        let mut cache = font_faces().lock().unwrap();
        if let Some(face) = cache.map.get(&hash).cloned() {
            cache.hits += 1;
            return Some(face);
        }
        cache.misses += 1;
    }
    // parse outside the lock
    let face = Arc::new(OwnedFace::from_vec(bytes.to_vec(), 0).ok()?);
    let mut cache = font_faces().lock().unwrap();
    if cache.map.len() >= FONT_FACE_CAP {
        // at cap: evict one arbitrary entry before insert
        if let Some(&victim) = cache.map.keys().next() {
            cache.map.remove(&victim);
        }
    }
    Some(cache.map.entry(hash).or_insert(face).clone())
}

pub fn font_face_stats() -> CacheStats {
    let cache = font_faces().lock().unwrap();
    CacheStats {
        hits: cache.hits,
        misses: cache.misses,
        entries: cache.map.len(),
        bytes: 0,
    }
}

pub fn clear_font_faces() {
    let mut cache = font_faces().lock().unwrap();
    cache.map.clear();
    cache.hits = 0;
    cache.misses = 0;
}

// ----- glyph-bitmap cache -----

/// A rendered grayscale coverage mask with its metrics in pixels.
#[derive(Debug, Clone)]
pub struct CachedGlyph {
    pub bitmap: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub bearing_x: i32,
    pub bearing_y: i32,
    pub advance_x: f32,
}

const GLYPH_CAP_ENTRIES: usize = 20_000;
const GLYPH_CAP_BYTES: usize = 128 * 1024 * 1024;

struct GlyphCache {
    map: HashMap<(u64, u16, u16), Arc<CachedGlyph>>,
    bytes: usize,
    hits: u64,
    misses: u64,
}

fn glyphs() -> &'static Mutex<GlyphCache> {
    static CACHE: OnceLock<Mutex<GlyphCache>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(GlyphCache { map: HashMap::new(), bytes: 0, hits: 0, misses: 0 })
    })
}

/// Get a glyph mask, rendering it with `render` on a miss. The pixel size
/// key is expected to be pre-clamped to the painter's 4..=512 range.
pub fn glyph_mask(
    font_hash: u64,
    glyph_id: u16,
    pixel_size: u16,
    render: impl FnOnce() -> Option<CachedGlyph>,
) -> Option<Arc<CachedGlyph>> {
    let key = (font_hash, glyph_id, pixel_size);
    {
        let mut cache = glyphs().lock().unwrap();
        if let Some(glyph) = cache.map.get(&key).cloned() {
            cache.hits += 1;
            return Some(glyph);
        }
        cache.misses += 1;
    }
    let glyph = Arc::new(render()?);
    let mut cache = glyphs().lock().unwrap();
    if !cache.map.contains_key(&key) {
        if cache.map.len() >= GLYPH_CAP_ENTRIES || cache.bytes >= GLYPH_CAP_BYTES {
            // coarse eviction: drop the first quartile in iteration order;
            // glyph counts per page are bounded, strict LRU is not worth it
            let drop_count = cache.map.len() / 4 + 1;
            let victims: Vec<_> = cache.map.keys().take(drop_count).copied().collect();
            for key in victims {
                if let Some(old) = cache.map.remove(&key) {
                    cache.bytes = cache.bytes.saturating_sub(old.bitmap.len());
                }
            }
        }
        cache.bytes += glyph.bitmap.len();
        cache.map.insert(key, glyph);
    }
    Some(cache.map[&key].clone())
}

pub fn glyph_cache_stats() -> CacheStats {
    let cache = glyphs().lock().unwrap();
    CacheStats {
        hits: cache.hits,
        misses: cache.misses,
        entries: cache.map.len(),
        bytes: cache.bytes,
    }
}

pub fn clear_glyphs() {
    let mut cache = glyphs().lock().unwrap();
    cache.map.clear();
    cache.bytes = 0;
    cache.hits = 0;
    cache.misses = 0;
}

// ----- page-raster cache -----

const PAGE_CAP_BYTES: usize = 500 * 1024 * 1024;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PageKey {
    pub document: DocumentId,
    pub page: usize,
    pub width: usize,
    pub height: usize,
}

struct CachedPage {
    bgra: Arc<Vec<u8>>,
    zoom: f64,
    last_access: Instant,
}

struct PageCache {
    map: HashMap<PageKey, CachedPage>,
    bytes: usize,
    hits: u64,
    misses: u64,
}

fn pages() -> &'static Mutex<PageCache> {
    static CACHE: OnceLock<Mutex<PageCache>> = OnceLock::new();
    CACHE.get_or_init(|| {
        Mutex::new(PageCache { map: HashMap::new(), bytes: 0, hits: 0, misses: 0 })
    })
}

/// Cached raster plus the zoom it was rendered at.
pub fn page_get(key: PageKey) -> Option<(Arc<Vec<u8>>, f64)> {
    let mut cache = pages().lock().unwrap();
    let found = match cache.map.get_mut(&key) {
        Some(entry) => {
            entry.last_access = Instant::now();
            Some((entry.bgra.clone(), entry.zoom))
        }
        None => None,
    };
    match found {
        Some(result) => {
            cache.hits += 1;
            Some(result)
        }
        None => {
            cache.misses += 1;
            None
        }
    }
}

/// Zero-copy variant: copy straight into caller-owned memory on a hit.
pub fn page_get_direct(key: PageKey, out: &mut [u8]) -> bool {
    let mut cache = pages().lock().unwrap();
    match cache.map.get_mut(&key) {
        Some(entry) if entry.bgra.len() <= out.len() => {
            entry.last_access = Instant::now();
            out[..entry.bgra.len()].copy_from_slice(&entry.bgra);
            cache.hits += 1;
            true
        }
        _ => {
            cache.misses += 1;
            false
        }
    }
}

pub fn page_store(key: PageKey, zoom: f64, bgra: Arc<Vec<u8>>) {
    if bgra.is_empty() {
        return;
    }
    let mut cache = pages().lock().unwrap();
    let new_size = bgra.len();
    // LRU by last access until the new entry fits
    while cache.bytes + new_size > PAGE_CAP_BYTES && !cache.map.is_empty() {
        if let Some((&victim, _)) = cache
            .map
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
        {
            if let Some(old) = cache.map.remove(&victim) {
                cache.bytes = cache.bytes.saturating_sub(old.bgra.len());
            }
        }
    }
    if let Some(old) = cache.map.remove(&key) {
        cache.bytes = cache.bytes.saturating_sub(old.bgra.len());
    }
    cache.bytes += new_size;
    cache.map.insert(key, CachedPage { bgra, zoom, last_access: Instant::now() });
}

/// Sweep every cached raster belonging to a document (called at close).
pub fn page_clear_document(document: DocumentId) {
    let mut cache = pages().lock().unwrap();
    let victims: Vec<PageKey> = cache
        .map
        .keys()
        .filter(|k| k.document == document)
        .copied()
        .collect();
    for key in victims {
        if let Some(old) = cache.map.remove(&key) {
            cache.bytes = cache.bytes.saturating_sub(old.bgra.len());
        }
    }
}

pub fn page_cache_stats() -> CacheStats {
    let cache = pages().lock().unwrap();
    CacheStats {
        hits: cache.hits,
        misses: cache.misses,
        entries: cache.map.len(),
        bytes: cache.bytes,
    }
}

pub fn clear_pages() {
    let mut cache = pages().lock().unwrap();
    cache.map.clear();
    cache.bytes = 0;
    cache.hits = 0;
    cache.misses = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyph_cache_renders_once() {
        clear_glyphs();
        let make = || {
            Some(CachedGlyph {
                bitmap: vec![255; 16],
                width: 4,
                height: 4,
                bearing_x: 0,
                bearing_y: 4,
                advance_x: 4.0,
            })
        };
        let a = glyph_mask(0xABCD, 7, 12, make).unwrap();
        let mut called = false;
        let b = glyph_mask(0xABCD, 7, 12, || {
            called = true;
            make()
        })
        .unwrap();
        assert!(!called, "second lookup must hit the cache");
        assert!(Arc::ptr_eq(&a, &b));
        let stats = glyph_cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn page_cache_roundtrip_and_clear() {
        clear_pages();
        let key = PageKey { document: 999_001, page: 0, width: 4, height: 4 };
        assert!(page_get(key).is_none());
        page_store(key, 1.0, Arc::new(vec![7u8; 64]));
        let (bgra, zoom) = page_get(key).unwrap();
        assert_eq!(bgra.len(), 64);
        assert_eq!(zoom, 1.0);

        let mut out = vec![0u8; 64];
        assert!(page_get_direct(key, &mut out));
        assert!(out.iter().all(|&b| b == 7));

        // too-small caller buffer is a miss, not a panic
        let mut tiny = vec![0u8; 8];
        assert!(!page_get_direct(key, &mut tiny));

        page_clear_document(999_001);
        assert!(page_get(key).is_none());
    }

    #[test]
    fn page_cache_tracks_bytes() {
        clear_pages();
        let key = PageKey { document: 999_002, page: 1, width: 2, height: 2 };
        page_store(key, 1.0, Arc::new(vec![0u8; 16]));
        let stats = page_cache_stats();
        assert!(stats.bytes >= 16);
        page_clear_document(999_002);
        assert_eq!(page_cache_stats().entries, 0);
    }
}
