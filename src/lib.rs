//! Software rasterizer for PDF 1.x documents.
//!
//! Feed [`PdfEngine::load`] the complete bytes of a document, then render
//! any page into a [`Painter`] at a caller-chosen resolution. Output is a
//! premultiplied BGRA buffer (4 bytes per pixel, row-major, stride =
//! width * 4).
//!
//! ```no_run
//! use pdf_raster::{LoadOptions, Painter, PdfEngine};
//!
//! let bytes = std::fs::read("document.pdf").unwrap();
//! let engine = PdfEngine::load(bytes, LoadOptions::default()).unwrap();
//! let (w, h) = engine.page_size(0).unwrap();
//! let mut painter = Painter::new(w as usize, h as usize, 2);
//! engine.render_page(0, &mut painter).unwrap();
//! let bgra = painter.buffer();
//! ```
//!
//! Documents are immutable after load, so one document may be rendered from
//! several threads as long as each thread uses its own painter. Font faces,
//! glyph masks and finished page rasters are shared through process-wide
//! caches.

mod core;

pub use crate::core::cache::{
    CacheStats, clear_font_faces, clear_glyphs, clear_pages, font_face_stats,
    glyph_cache_stats, page_cache_stats,
};
pub use crate::core::document::{Document, DocumentId, FontResolver, LoadOptions};
pub use crate::core::engine::PdfEngine;
pub use crate::core::error::{PdfError, Result};
pub use crate::core::gstate::Matrix;
pub use crate::core::object::{Dict, ObjRef, Object, Stream};
pub use crate::core::painter::{Painter, Path, PathSeg};
