use std::sync::Arc;

use log::debug;

use crate::core::cache::{self, PageKey};
use crate::core::content::{Interpreter, PageSetup};
use crate::core::document::{Document, LoadOptions};
use crate::core::error::{PdfError, Result};
use crate::core::gstate::GraphicsState;
use crate::core::painter::Painter;

/// Engine façade: one loaded document plus render orchestration. Multiple
/// engines may coexist in a process; the only shared state between them is
/// the three global caches.
pub struct PdfEngine {
    doc: Document,
}

impl PdfEngine {
    pub fn load(data: Vec<u8>, options: LoadOptions) -> Result<PdfEngine> {
        Ok(PdfEngine { doc: Document::load(data, options)? })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn page_count(&self) -> usize {
        self.doc.page_count()
    }

    /// Display size in points (rotation-aware).
    pub fn page_size(&self, index: usize) -> Option<(f64, f64)> {
        self.doc.page_size(index)
    }

    pub fn page_rotation(&self, index: usize) -> i32 {
        self.doc.page_rotation(index)
    }

    /// Render a page into a caller-owned painter: clear to white, apply the
    /// page rotation mapping, build the root graphics state, and walk the
    /// content. A damaged page renders partially rather than failing.
    pub fn render_page(&self, index: usize, painter: &mut Painter) -> Result<()> {
        let (w_pt, h_pt) = self
            .doc
            .page_size_raw(index)
            .ok_or_else(|| PdfError::Render(format!("no page {index}")))?;
        let rotation = self.doc.page_rotation(index);
        let origin = self.doc.page_origin(index);

        painter.clear(0xFFFF_FFFF);
        painter.set_page(w_pt, h_pt, rotation, origin);

        let content = self.doc.page_contents(index);
        if content.is_empty() {
            debug!("page {index}: empty content stream");
            return Ok(());
        }
        let fonts = self.doc.page_fonts(index);
        let resources = self.doc.page_resources(index);
        let page = PageSetup { width_pt: w_pt, height_pt: h_pt, rotation, origin };

        let mut interp = Interpreter::new(
            &self.doc,
            painter,
            fonts,
            resources,
            page,
            GraphicsState::default(),
        );
        interp.run(&content);
        Ok(())
    }

    /// Render through the process-wide page cache. Two sequential calls with
    /// the same inputs return byte-identical buffers.
    pub fn render_page_cached(
        &self,
        index: usize,
        width: usize,
        height: usize,
        ssaa: usize,
    ) -> Result<Arc<Vec<u8>>> {
        let key = PageKey { document: self.doc.id(), page: index, width, height };
        if let Some((bgra, _zoom)) = cache::page_get(key) {
            return Ok(bgra);
        }
        let mut painter = Painter::new(width, height, ssaa);
        self.render_page(index, &mut painter)?;
        let bgra = Arc::new(painter.buffer());
        let zoom = self
            .doc
            .page_size(index)
            .map(|(w, _)| width as f64 / w.max(1.0))
            .unwrap_or(1.0);
        cache::page_store(key, zoom, bgra.clone());
        Ok(bgra)
    }

    /// Zero-copy cached read into caller-owned memory; false on miss.
    pub fn cached_page_into(&self, index: usize, width: usize, height: usize, out: &mut [u8]) -> bool {
        let key = PageKey { document: self.doc.id(), page: index, width, height };
        cache::page_get_direct(key, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testutil;

    #[test]
    fn render_produces_full_buffer() {
        let pdf = testutil::minimal_pdf(b"0 0 1 rg 100 100 200 300 re f");
        let engine = PdfEngine::load(pdf, LoadOptions::default()).unwrap();
        assert_eq!(engine.page_count(), 1);
        let mut painter = Painter::new(153, 198, 1);
        engine.render_page(0, &mut painter).unwrap();
        let buf = painter.buffer();
        assert_eq!(buf.len(), 153 * 198 * 4);
        // premultiplication invariant: every channel <= alpha
        for px in buf.chunks_exact(4) {
            assert!(px[0] <= px[3] && px[1] <= px[3] && px[2] <= px[3]);
        }
    }

    #[test]
    fn cached_render_is_deterministic() {
        let pdf = testutil::minimal_pdf(b"1 0 0 rg 10 10 50 50 re f");
        let engine = PdfEngine::load(pdf, LoadOptions::default()).unwrap();
        let a = engine.render_page_cached(0, 61, 79, 1).unwrap();
        let b = engine.render_page_cached(0, 61, 79, 1).unwrap();
        assert_eq!(a, b);

        let mut direct = vec![0u8; 61 * 79 * 4];
        assert!(engine.cached_page_into(0, 61, 79, &mut direct));
        assert_eq!(&direct[..], &a[..]);
    }

    #[test]
    fn page_cache_swept_on_drop() {
        let pdf = testutil::minimal_pdf(b"0 g 10 10 50 50 re f");
        let engine = PdfEngine::load(pdf, LoadOptions::default()).unwrap();
        let doc_id = engine.document().id();
        engine.render_page_cached(0, 40, 40, 1).unwrap();
        let key = PageKey { document: doc_id, page: 0, width: 40, height: 40 };
        assert!(cache::page_get(key).is_some());
        drop(engine);
        assert!(cache::page_get(key).is_none());
    }
}
