use std::sync::OnceLock;

use owned_ttf_parser::AsFaceRef;
use ttf_parser::{Face, GlyphId, OutlineBuilder};

use crate::core::cache;
use crate::core::font::FontInfo;
use crate::core::gstate::Matrix;
use crate::core::image::DecodedImage;
use crate::core::shading::Shading;

/// Path segments in user space, as produced by the content interpreter.
#[derive(Debug, Clone, Copy)]
pub enum PathSeg {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

pub type Path = Vec<PathSeg>;

/// Squared flatness tolerance for bezier subdivision, in device px².
/// 0.0025 px² keeps the boundary within ~0.05 px of the true curve.
const FLATTEN_TOL_SQ: f64 = 0.0025;
const FLATTEN_MAX_DEPTH: u32 = 24;

/// A flattened subpath in device space.
#[derive(Debug, Clone, Default)]
pub struct Polygon {
    pub pts: Vec<(f64, f64)>,
    pub closed: bool,
}

#[derive(Debug, Clone)]
struct ClipLayer {
    polys: Vec<Polygon>,
    even_odd: bool,
}

/// Stroke parameters already projected to device px.
#[derive(Debug, Clone)]
pub struct StrokeStyle {
    pub width: f64,
    pub cap: i32,
    pub join: i32,
    pub miter_limit: f64,
    pub dash_array: Vec<f64>,
    pub dash_phase: f64,
}

/// A pre-rendered tiling-pattern cell plus its pattern-space geometry.
pub struct RenderedTile {
    pub bgra: Vec<u8>,
    pub w: usize,
    pub h: usize,
    pub xstep: f64,
    pub ystep: f64,
    /// PaintType 2 patterns are uncoloured: the tile only contributes alpha
    pub uncolored: bool,
    /// pattern space to device
    pub matrix: Matrix,
}

/// What a fill is painted with.
pub enum Paint<'a> {
    Solid { rgb: [f64; 3], alpha: f64 },
    Shading { shading: &'a Shading, to_device: Matrix, alpha: f64 },
    Tile { tile: &'a RenderedTile, rgb: [f64; 3], alpha: f64 },
}

/// Text drawing request; the painter decodes raw bytes itself using the
/// font tables (simple or CID path).
pub struct TextRun<'a> {
    pub bytes: &'a [u8],
    pub font: &'a FontInfo,
    pub font_size: f64,
    pub char_spacing: f64,
    pub word_spacing: f64,
    /// percent, 100 = no scaling
    pub horizontal_scale: f64,
    pub rise: f64,
    pub rgb: [f64; 3],
    pub alpha: f64,
    pub render_mode: i32,
    pub fallback_font: Option<&'a [u8]>,
}

/// CPU raster painter. Owns a premultiplied BGRA buffer at SSAA resolution;
/// `buffer()` downsamples to the requested output size.
pub struct Painter {
    w: usize,
    h: usize,
    final_w: usize,
    final_h: usize,
    ssaa: usize,
    base: Matrix,
    buffer: Vec<u8>,
    clip_stack: Vec<ClipLayer>,
    mask_stack: Vec<Vec<u8>>,
}

impl Painter {
    /// `width`/`height` are the output size in device pixels; the internal
    /// buffer is `ssaa` times larger in each direction.
    pub fn new(width: usize, height: usize, ssaa: usize) -> Painter {
        let ssaa = match ssaa {
            2 => 2,
            4 => 4,
            _ => 1,
        };
        let w = width.max(1) * ssaa;
        let h = height.max(1) * ssaa;
        Painter {
            w,
            h,
            final_w: width.max(1),
            final_h: height.max(1),
            ssaa,
            base: Matrix::IDENTITY,
            buffer: vec![0; w * h * 4],
            clip_stack: Vec::new(),
            mask_stack: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.final_w
    }

    pub fn height(&self) -> usize {
        self.final_h
    }

    /// Supersampled buffer dimensions.
    pub fn raw_size(&self) -> (usize, usize) {
        (self.w, self.h)
    }

    /// Configure the page-to-device mapping: origin shift, zoom, Y-flip and
    /// the page /Rotate quarter turn fitted into the positive quadrant.
    pub fn set_page(&mut self, w_pt: f64, h_pt: f64, rotation: i32, origin: (f64, f64)) {
        let (scale_x, scale_y) = match rotation {
            90 | 270 => (self.w as f64 / h_pt.max(1.0), self.h as f64 / w_pt.max(1.0)),
            _ => (self.w as f64 / w_pt.max(1.0), self.h as f64 / h_pt.max(1.0)),
        };
        // after rotation the unrotated page spans (wu, hu) device px
        let (sx, sy) = match rotation {
            90 | 270 => (scale_y, scale_x),
            _ => (scale_x, scale_y),
        };
        let wu = w_pt * sx;
        let hu = h_pt * sy;
        let flip = Matrix::new(sx, 0.0, 0.0, -sy, 0.0, hu);
        let rot = match rotation {
            90 => Matrix::new(0.0, 1.0, -1.0, 0.0, hu, 0.0),
            180 => Matrix::new(-1.0, 0.0, 0.0, -1.0, wu, hu),
            270 => Matrix::new(0.0, -1.0, 1.0, 0.0, 0.0, wu),
            _ => Matrix::IDENTITY,
        };
        self.base = Matrix::translate(-origin.0, -origin.1).mul(&flip).mul(&rot);
    }

    /// User-space-to-device matrix for the given CTM.
    pub fn device_matrix(&self, ctm: &Matrix) -> Matrix {
        ctm.mul(&self.base)
    }

    pub fn clear(&mut self, bgra: u32) {
        let px = bgra.to_le_bytes();
        for chunk in self.buffer.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    /// Final premultiplied BGRA output, Gaussian-downsampled from the
    /// supersampled buffer.
    pub fn buffer(&self) -> Vec<u8> {
        if self.ssaa <= 1 {
            return self.buffer.clone();
        }
        let mut out = vec![0u8; self.final_w * self.final_h * 4];
        let sigma = self.ssaa as f64 * 0.5;
        let denom = 2.0 * sigma * sigma;
        for y in 0..self.final_h {
            for x in 0..self.final_w {
                let cx = (x as f64 + 0.5) * self.ssaa as f64;
                let cy = (y as f64 + 0.5) * self.ssaa as f64;
                let mut acc = [0.0f64; 4];
                let mut weight_sum = 0.0;
                for dy in 0..self.ssaa {
                    for dx in 0..self.ssaa {
                        let sx = x * self.ssaa + dx;
                        let sy = y * self.ssaa + dy;
                        if sx >= self.w || sy >= self.h {
                            continue;
                        }
                        let ex = sx as f64 + 0.5 - cx;
                        let ey = sy as f64 + 0.5 - cy;
                        let wgt = (-(ex * ex + ey * ey) / denom).exp();
                        let si = (sy * self.w + sx) * 4;
                        for c in 0..4 {
                            acc[c] += self.buffer[si + c] as f64 * wgt;
                        }
                        weight_sum += wgt;
                    }
                }
                let di = (y * self.final_w + x) * 4;
                if weight_sum > 0.0 {
                    for c in 0..4 {
                        out[di + c] = (acc[c] / weight_sum + 0.5).clamp(0.0, 255.0) as u8;
                    }
                }
            }
        }
        out
    }

    // ----- clip & soft-mask layers -----

    pub fn push_clip(&mut self, path: &Path, ctm: &Matrix, even_odd: bool) {
        let m = self.device_matrix(ctm);
        let polys = flatten_path(path, &m);
        self.clip_stack.push(ClipLayer { polys, even_odd });
    }

    /// Push an already-flattened device-space clip (used for form BBoxes).
    pub fn push_clip_polys(&mut self, polys: Vec<Polygon>, even_odd: bool) {
        self.clip_stack.push(ClipLayer { polys, even_odd });
    }

    pub fn pop_clips(&mut self, n: usize) {
        for _ in 0..n {
            self.clip_stack.pop();
        }
    }

    pub fn clip_depth(&self) -> usize {
        self.clip_stack.len()
    }

    /// Push a luminosity soft mask (one byte per supersampled pixel).
    pub fn push_soft_mask(&mut self, mask: Vec<u8>) {
        self.mask_stack.push(mask);
    }

    pub fn pop_soft_masks(&mut self, n: usize) {
        for _ in 0..n {
            self.mask_stack.pop();
        }
    }

    pub fn soft_mask_depth(&self) -> usize {
        self.mask_stack.len()
    }

    /// Luminosity of the current buffer, for use as a soft mask:
    /// 0.2126 R + 0.7152 G + 0.0722 B on premultiplied values.
    pub fn luminosity_mask(&self) -> Vec<u8> {
        self.buffer
            .chunks_exact(4)
            .map(|px| {
                (0.0722 * px[0] as f64 + 0.7152 * px[1] as f64 + 0.2126 * px[2] as f64 + 0.5)
                    .min(255.0) as u8
            })
            .collect()
    }

    fn mask_factor(&self, x: usize, y: usize) -> f64 {
        let mut f = 1.0;
        for mask in &self.mask_stack {
            f *= mask.get(y * self.w + x).copied().unwrap_or(255) as f64 / 255.0;
        }
        f
    }

    fn clip_spans_at(&self, y: f64) -> Option<Vec<(f64, f64)>> {
        if self.clip_stack.is_empty() {
            return None;
        }
        let mut spans = vec![(0.0, self.w as f64)];
        for layer in &self.clip_stack {
            let layer_spans = spans_at(&layer.polys, layer.even_odd, y);
            spans = intersect_spans(&spans, &layer_spans);
            if spans.is_empty() {
                break;
            }
        }
        Some(spans)
    }

    // ----- pixel writes -----

    fn blend_pixel(&mut self, x: usize, y: usize, rgb: [f64; 3], alpha: f64) {
        if x >= self.w || y >= self.h {
            return;
        }
        let a = (alpha * self.mask_factor(x, y)).clamp(0.0, 1.0);
        if a <= 0.0 {
            return;
        }
        let i = (y * self.w + x) * 4;
        let src = [
            rgb[2].clamp(0.0, 1.0) * a * 255.0, // b channel carries rgb[2]
            rgb[1].clamp(0.0, 1.0) * a * 255.0,
            rgb[0].clamp(0.0, 1.0) * a * 255.0,
            a * 255.0,
        ];
        // premultiplied source-over, BGRA order
        let inv = 1.0 - a;
        self.buffer[i] = (src[0] + self.buffer[i] as f64 * inv + 0.5).min(255.0) as u8;
        self.buffer[i + 1] = (src[1] + self.buffer[i + 1] as f64 * inv + 0.5).min(255.0) as u8;
        self.buffer[i + 2] = (src[2] + self.buffer[i + 2] as f64 * inv + 0.5).min(255.0) as u8;
        self.buffer[i + 3] = (src[3] + self.buffer[i + 3] as f64 * inv + 0.5).min(255.0) as u8;
    }

    /// Source-over with an already-premultiplied BGRA source pixel.
    fn blend_premul(&mut self, x: usize, y: usize, bgra: [f64; 4], extra_alpha: f64) {
        if x >= self.w || y >= self.h {
            return;
        }
        let f = (extra_alpha * self.mask_factor(x, y)).clamp(0.0, 1.0);
        if f <= 0.0 {
            return;
        }
        let i = (y * self.w + x) * 4;
        let a = (bgra[3] / 255.0 * f).clamp(0.0, 1.0);
        let inv = 1.0 - a;
        for c in 0..4 {
            let src = bgra[c] * f;
            self.buffer[i + c] =
                (src + self.buffer[i + c] as f64 * inv + 0.5).min(255.0) as u8;
        }
    }

    fn paint_span(&mut self, y: usize, x0: f64, x1: f64, paint: &Paint) {
        let xs = x0.floor().max(0.0) as usize;
        let xe = (x1.ceil() as usize).min(self.w);
        let scan_y = y as f64 + 0.5;
        let in_span = |x: usize| {
            let cx = x as f64 + 0.5;
            cx >= x0 && cx < x1
        };
        match paint {
            Paint::Solid { rgb, alpha } => {
                for x in xs..xe {
                    if in_span(x) {
                        self.blend_pixel(x, y, *rgb, *alpha);
                    }
                }
            }
            Paint::Shading { shading, to_device, alpha } => {
                let Some(inv) = to_device.invert() else { return };
                for x in xs..xe {
                    if !in_span(x) {
                        continue;
                    }
                    let (sx, sy) = inv.apply(x as f64 + 0.5, scan_y);
                    if let Some(rgb) = shading.color_at(sx, sy) {
                        self.blend_pixel(x, y, rgb, *alpha);
                    }
                }
            }
            Paint::Tile { tile, rgb, alpha } => {
                let Some(inv) = tile.matrix.invert() else { return };
                for x in xs..xe {
                    if !in_span(x) {
                        continue;
                    }
                    if let Some((b, g, r, a)) = sample_tile(tile, &inv, x as f64 + 0.5, scan_y) {
                        if tile.uncolored {
                            self.blend_pixel(x, y, *rgb, alpha * a);
                        } else {
                            self.blend_premul(x, y, [b, g, r, a * 255.0], *alpha);
                        }
                    }
                }
            }
        }
    }

    // ----- fills & strokes -----

    pub fn fill_path(&mut self, path: &Path, ctm: &Matrix, even_odd: bool, paint: &Paint) {
        let m = self.device_matrix(ctm);
        let polys = flatten_path(path, &m);
        self.fill_polys(&polys, even_odd, paint);
    }

    fn fill_polys(&mut self, polys: &[Polygon], even_odd: bool, paint: &Paint) {
        let Some((_, y_min, _, y_max)) = polys_bbox(polys) else { return };
        let y_start = y_min.floor().max(0.0) as usize;
        let y_end = (y_max.ceil() as usize).min(self.h);
        for y in y_start..y_end {
            let scan_y = y as f64 + 0.5;
            let mut spans = spans_at(polys, even_odd, scan_y);
            if spans.is_empty() {
                continue;
            }
            if let Some(clip) = self.clip_spans_at(scan_y) {
                spans = intersect_spans(&spans, &clip);
            }
            for (x0, x1) in spans {
                self.paint_span(y, x0, x1, paint);
            }
        }
    }

    pub fn stroke_path(&mut self, path: &Path, ctm: &Matrix, style: &StrokeStyle, paint: &Paint) {
        let m = self.device_matrix(ctm);
        // effective width: user width through the dominant axis scale,
        // floored so hairlines stay visible
        let (ex, ey) = m.axis_scales();
        let scale = ex.max(ey);
        let width = (style.width * scale).max(0.25);
        let polys = flatten_path(path, &m);

        let mut outline: Vec<Polygon> = Vec::new();
        for poly in &polys {
            let mut pieces: Vec<(Vec<(f64, f64)>, bool)> = Vec::new();
            if style.dash_array.iter().any(|&d| d > 0.0) {
                for piece in apply_dash(
                    &poly.pts,
                    poly.closed,
                    &style.dash_array,
                    style.dash_phase,
                    scale,
                ) {
                    pieces.push((piece, false));
                }
            } else {
                pieces.push((poly.pts.clone(), poly.closed));
            }
            for (pts, closed) in pieces {
                stroke_polyline(&pts, closed, width, style, &mut outline);
            }
        }
        self.fill_polys(&outline, false, paint);
    }

    /// `sh`: paint the whole clip region with a shading.
    pub fn fill_shading(&mut self, shading: &Shading, ctm: &Matrix, alpha: f64) {
        let to_device = self.device_matrix(ctm);
        let paint = Paint::Shading { shading, to_device, alpha };
        for y in 0..self.h {
            let scan_y = y as f64 + 0.5;
            let spans = match self.clip_spans_at(scan_y) {
                Some(spans) => spans,
                None => vec![(0.0, self.w as f64)],
            };
            for (x0, x1) in spans {
                self.paint_span(y, x0, x1, &paint);
            }
        }
    }

    // ----- images -----

    /// Draw a decoded image into the unit square mapped by the CTM.
    /// Catmull-Rom in linear light for colour, nearest for alpha; an
    /// area-average fast path handles ≥2x minification.
    pub fn draw_image(&mut self, img: &DecodedImage, ctm: &Matrix, alpha: f64) {
        let m = self.device_matrix(ctm);
        let Some(inv) = m.invert() else { return };
        let (iw, ih) = (img.width as usize, img.height as usize);
        if iw == 0 || ih == 0 {
            return;
        }

        // device bbox of the mapped unit square
        let corners = [
            m.apply(0.0, 0.0),
            m.apply(1.0, 0.0),
            m.apply(0.0, 1.0),
            m.apply(1.0, 1.0),
        ];
        let x_min = corners.iter().map(|c| c.0).fold(f64::MAX, f64::min).floor().max(0.0);
        let y_min = corners.iter().map(|c| c.1).fold(f64::MAX, f64::min).floor().max(0.0);
        let x_max = corners.iter().map(|c| c.0).fold(f64::MIN, f64::max).ceil();
        let y_max = corners.iter().map(|c| c.1).fold(f64::MIN, f64::max).ceil();

        // source pixels per device pixel decides the sampling strategy
        let (ax, ay) = m.axis_scales();
        let minify_x = iw as f64 / ax.max(1e-6);
        let minify_y = ih as f64 / ay.max(1e-6);
        let area_average = minify_x >= 2.0 || minify_y >= 2.0;

        let y_end = (y_max as usize).min(self.h);
        for y in (y_min as usize)..y_end {
            let scan_y = y as f64 + 0.5;
            let clip = self.clip_spans_at(scan_y);
            let row = match &clip {
                Some(spans) => spans.clone(),
                None => vec![(x_min, x_max.min(self.w as f64))],
            };
            for (sx0, sx1) in row {
                let xs = sx0.max(x_min).floor().max(0.0) as usize;
                let xe = (sx1.min(x_max).ceil() as usize).min(self.w);
                for x in xs..xe {
                    let cx = x as f64 + 0.5;
                    if cx < sx0 || cx >= sx1 {
                        continue;
                    }
                    let (u, v) = inv.apply(cx, scan_y);
                    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
                        continue;
                    }
                    // image rows run top-down while the unit square is y-up
                    let fx = u * iw as f64 - 0.5;
                    let fy = (1.0 - v) * ih as f64 - 0.5;
                    let bgra = if area_average {
                        sample_box(img, inv, cx, scan_y, iw, ih)
                    } else {
                        sample_bicubic(img, fx, fy, iw, ih)
                    };
                    self.blend_premul(x, y, bgra, alpha);
                }
            }
        }
    }

    // ----- text -----

    /// Draw one show-text run. `text_to_device` maps unscaled text space
    /// (the coordinate system of the current text matrix) to device pixels.
    /// Returns the advance in unscaled text-space units.
    pub fn draw_text(&mut self, run: &TextRun, text_to_device: &Matrix) -> f64 {
        let hs = run.horizontal_scale / 100.0;
        let mut tx = 0.0f64;

        let codes: Vec<(u32, Option<u8>)> = if run.font.is_cid() {
            run.bytes
                .chunks(2)
                .map(|c| {
                    let cid = if c.len() == 2 {
                        (c[0] as u32) << 8 | c[1] as u32
                    } else {
                        c[0] as u32
                    };
                    (cid, None)
                })
                .collect()
        } else {
            run.bytes.iter().map(|&b| (b as u32, Some(b))).collect()
        };

        let invisible = matches!(run.render_mode, 3 | 7);

        for (code, byte) in codes {
            let (gid, width1000, unicode) = match byte {
                Some(b) => (
                    run.font.gid_for_code(b),
                    run.font.width_for_code(b),
                    run.font.code_to_unicode[b as usize],
                ),
                None => (
                    run.font.gid_for_cid(code),
                    run.font.width_for_cid(code),
                    run.font.cid_to_unicode.get(&code).copied().unwrap_or(0),
                ),
            };

            if !invisible {
                // glyph space: scaled by size and horizontal scale, shifted
                // by the pen position and rise
                let glyph_to_device = Matrix::scale(run.font_size * hs, run.font_size)
                    .mul(&Matrix::translate(tx, run.rise))
                    .mul(text_to_device);
                self.draw_glyph(run, gid, unicode, &glyph_to_device);
            }

            let mut adv = width1000 / 1000.0 * run.font_size + run.char_spacing;
            if byte == Some(32) {
                adv += run.word_spacing;
            }
            tx += adv * hs;
        }
        tx
    }

    fn draw_glyph(&mut self, run: &TextRun, gid: u16, unicode: u32, glyph_to_device: &Matrix) {
        let mut hash = run.font.font_hash;
        let mut program = run.font.font_program.clone();
        let mut gid = gid;

        let missing = gid == 0 || run.font.font_program.is_empty();
        if missing {
            // one fallback attempt through the configured face
            let Some(fb) = run.fallback_font else { return };
            let Some(face) = cache::font_face(crate::core::font::hash_bytes(fb), fb) else {
                return;
            };
            let Some(fb_gid) = char::from_u32(unicode)
                .and_then(|c| face.as_face_ref().glyph_index(c))
            else {
                return;
            };
            hash = crate::core::font::hash_bytes(fb);
            program = std::sync::Arc::new(fb.to_vec());
            gid = fb_gid.0;
        }

        let Some(face) = cache::font_face(hash, &program) else { return };
        let face_ref = face.as_face_ref();

        // pixel size from the Y axis of the glyph transform
        let (_, ys) = glyph_to_device.axis_scales();
        let px = ys.clamp(4.0, 512.0);

        // upright text in y-down device space has a > 0 and d < 0 (the page
        // Y-flip); that is the cacheable case
        let axis_aligned = glyph_to_device.b.abs() < 1e-6
            && glyph_to_device.c.abs() < 1e-6
            && glyph_to_device.a > 0.0
            && glyph_to_device.d < 0.0;

        if axis_aligned {
            let px_i = px.round().max(1.0) as u16;
            let Some(glyph) = cache::glyph_mask(hash, gid, px_i, || {
                render_glyph_mask(face_ref, GlyphId(gid), px_i as f64)
            }) else {
                return;
            };
            // pen position: glyph origin on the baseline
            let (ox, oy) = glyph_to_device.apply(0.0, 0.0);
            // the mask was rendered at px size; x may be scaled differently
            let x_ratio = glyph_to_device.a / -glyph_to_device.d;
            self.composite_mask(&glyph, ox, oy, x_ratio, run.rgb, run.alpha);
        } else {
            // rotated or sheared text: fill the outline directly
            let upem = face_ref.units_per_em().max(1) as f64;
            let em = Matrix::scale(1.0 / upem, 1.0 / upem).mul(glyph_to_device);
            let mut builder = OutlineCollector::new(&em);
            if face_ref.outline_glyph(GlyphId(gid), &mut builder).is_some() {
                let polys = builder.finish();
                self.fill_polys(&polys, false, &Paint::Solid { rgb: run.rgb, alpha: run.alpha });
            }
        }
    }

    fn composite_mask(
        &mut self,
        glyph: &cache::CachedGlyph,
        ox: f64,
        oy: f64,
        x_ratio: f64,
        rgb: [f64; 3],
        alpha: f64,
    ) {
        let left = ox + glyph.bearing_x as f64 * x_ratio;
        let top = oy - glyph.bearing_y as f64;
        for row in 0..glyph.height {
            let y = top + row as f64;
            if y < 0.0 {
                continue;
            }
            let y = y as usize;
            if y >= self.h {
                break;
            }
            let scan_y = y as f64 + 0.5;
            let clip = self.clip_spans_at(scan_y);
            for col in 0..glyph.width {
                let coverage = glyph.bitmap[row * glyph.width + col] as f64 / 255.0;
                if coverage <= 0.0 {
                    continue;
                }
                let x = left + col as f64 * x_ratio;
                if x < 0.0 {
                    continue;
                }
                let x = x as usize;
                if let Some(spans) = &clip {
                    let cx = x as f64 + 0.5;
                    if !spans.iter().any(|&(a, b)| cx >= a && cx < b) {
                        continue;
                    }
                }
                self.blend_pixel(x, y, rgb, alpha * coverage);
            }
        }
    }
}

// ----- geometry helpers -----

fn polys_bbox(polys: &[Polygon]) -> Option<(f64, f64, f64, f64)> {
    let mut bbox: Option<(f64, f64, f64, f64)> = None;
    for poly in polys {
        for &(x, y) in &poly.pts {
            bbox = Some(match bbox {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
    }
    bbox
}

/// Flatten a user-space path through `m` into device-space polygons.
/// Stray segments before any MoveTo are dropped.
pub fn flatten_path(path: &Path, m: &Matrix) -> Vec<Polygon> {
    let mut polys: Vec<Polygon> = Vec::new();
    let mut current: Option<Polygon> = None;
    for seg in path {
        match *seg {
            PathSeg::MoveTo(x, y) => {
                if let Some(p) = current.take() {
                    if p.pts.len() > 1 {
                        polys.push(p);
                    }
                }
                let mut p = Polygon::default();
                push_pt(&mut p.pts, m.apply(x, y));
                current = Some(p);
            }
            PathSeg::LineTo(x, y) => {
                if let Some(p) = &mut current {
                    push_pt(&mut p.pts, m.apply(x, y));
                }
            }
            PathSeg::CurveTo(x1, y1, x2, y2, x3, y3) => {
                if let Some(p) = &mut current {
                    let start = *p.pts.last().unwrap();
                    let c1 = m.apply(x1, y1);
                    let c2 = m.apply(x2, y2);
                    let end = m.apply(x3, y3);
                    flatten_cubic(start, c1, c2, end, &mut p.pts, 0);
                }
            }
            PathSeg::Close => {
                if let Some(p) = &mut current {
                    p.closed = true;
                    let first = p.pts.first().copied();
                    if let Some(f) = first {
                        push_pt(&mut p.pts, f);
                    }
                }
            }
        }
    }
    if let Some(p) = current {
        if p.pts.len() > 1 {
            polys.push(p);
        }
    }
    polys
}

fn push_pt(pts: &mut Vec<(f64, f64)>, p: (f64, f64)) {
    if let Some(&last) = pts.last() {
        let dx = last.0 - p.0;
        let dy = last.1 - p.1;
        if dx * dx + dy * dy < 1e-9 {
            return;
        }
    }
    pts.push(p);
}

/// Squared distance from a point to the infinite line through a-b (the
/// segment formula misjudges control points beyond the baseline).
fn dist_point_line_sq(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let vx = b.0 - a.0;
    let vy = b.1 - a.1;
    let len_sq = vx * vx + vy * vy;
    if len_sq < 1e-12 {
        let dx = p.0 - a.0;
        let dy = p.1 - a.1;
        return dx * dx + dy * dy;
    }
    let cross = (p.0 - a.0) * vy - (p.1 - a.1) * vx;
    cross * cross / len_sq
}

/// De Casteljau subdivision with a device-space flatness test.
fn flatten_cubic(
    p0: (f64, f64),
    p1: (f64, f64),
    p2: (f64, f64),
    p3: (f64, f64),
    out: &mut Vec<(f64, f64)>,
    depth: u32,
) {
    let flatness = dist_point_line_sq(p1, p0, p3).max(dist_point_line_sq(p2, p0, p3));
    if depth >= FLATTEN_MAX_DEPTH || flatness <= FLATTEN_TOL_SQ {
        push_pt(out, p3);
        return;
    }
    let mid = |a: (f64, f64), b: (f64, f64)| ((a.0 + b.0) * 0.5, (a.1 + b.1) * 0.5);
    let p01 = mid(p0, p1);
    let p12 = mid(p1, p2);
    let p23 = mid(p2, p3);
    let p012 = mid(p01, p12);
    let p123 = mid(p12, p23);
    let p0123 = mid(p012, p123);
    flatten_cubic(p0, p01, p012, p0123, out, depth + 1);
    flatten_cubic(p0123, p123, p23, p3, out, depth + 1);
}

/// Scanline crossings of all polygons at `y`, resolved to paint spans by
/// the winding rule.
fn spans_at(polys: &[Polygon], even_odd: bool, y: f64) -> Vec<(f64, f64)> {
    // (x, winding direction) per crossing; subpaths close implicitly
    let mut crossings: Vec<(f64, i32)> = Vec::new();
    for poly in polys {
        let n = poly.pts.len();
        if n < 2 {
            continue;
        }
        for i in 0..n {
            let (x0, y0) = poly.pts[i];
            let (x1, y1) = poly.pts[(i + 1) % n];
            if (y0 <= y && y1 > y) || (y1 <= y && y0 > y) {
                let t = (y - y0) / (y1 - y0);
                let x = x0 + t * (x1 - x0);
                crossings.push((x, if y1 > y0 { 1 } else { -1 }));
            }
        }
    }
    crossings.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut spans = Vec::new();
    if even_odd {
        for pair in crossings.chunks_exact(2) {
            if pair[1].0 > pair[0].0 {
                spans.push((pair[0].0, pair[1].0));
            }
        }
    } else {
        let mut winding = 0;
        let mut start = 0.0;
        for &(x, dir) in &crossings {
            let was_inside = winding != 0;
            winding += dir;
            let is_inside = winding != 0;
            if !was_inside && is_inside {
                start = x;
            } else if was_inside && !is_inside && x > start {
                spans.push((start, x));
            }
        }
    }
    spans
}

fn intersect_spans(a: &[(f64, f64)], b: &[(f64, f64)]) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        let lo = a[i].0.max(b[j].0);
        let hi = a[i].1.min(b[j].1);
        if hi > lo {
            out.push((lo, hi));
        }
        if a[i].1 < b[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

// ----- stroking -----

/// Expand one polyline into outline polygons: a quad per segment, cap and
/// join geometry at the ends and corners. Everything is filled non-zero, so
/// overlaps are harmless.
fn stroke_polyline(
    pts: &[(f64, f64)],
    closed: bool,
    width: f64,
    style: &StrokeStyle,
    out: &mut Vec<Polygon>,
) {
    let r = width / 2.0;
    if pts.len() < 2 {
        // degenerate subpath: a round or square cap still paints a dot
        if let Some(&p) = pts.first() {
            match style.cap {
                1 => out.push(circle_poly(p, r)),
                2 => out.push(rect_poly(p.0 - r, p.1 - r, width, width)),
                _ => {}
            }
        }
        return;
    }

    let n = pts.len();
    let seg_count = if closed { n } else { n - 1 };
    for i in 0..seg_count {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let len = dx.hypot(dy);
        if len < 1e-9 {
            continue;
        }
        let (ux, uy) = (dx / len, dy / len);
        let (nx, ny) = (uy, -ux);
        // square caps extend open-end segments by r
        let (a, b) = if !closed && style.cap == 2 {
            let ea = if i == 0 { (a.0 - ux * r, a.1 - uy * r) } else { a };
            let eb = if i == seg_count - 1 { (b.0 + ux * r, b.1 + uy * r) } else { b };
            (ea, eb)
        } else {
            (a, b)
        };
        out.push(Polygon {
            pts: vec![
                (a.0 + nx * r, a.1 + ny * r),
                (b.0 + nx * r, b.1 + ny * r),
                (b.0 - nx * r, b.1 - ny * r),
                (a.0 - nx * r, a.1 - ny * r),
            ],
            closed: true,
        });
    }

    // joins at interior vertices (and the seam vertex when closed)
    let join_count = if closed { n } else { n - 2 };
    for k in 0..join_count {
        let prev = pts[k];
        let joint = pts[(k + 1) % n];
        let next = pts[(k + 2) % n];
        add_join(prev, joint, next, r, style, out);
    }

    if !closed && style.cap == 1 {
        out.push(circle_poly(pts[0], r));
        out.push(circle_poly(pts[n - 1], r));
    }
}

fn add_join(
    prev: (f64, f64),
    joint: (f64, f64),
    next: (f64, f64),
    r: f64,
    style: &StrokeStyle,
    out: &mut Vec<Polygon>,
) {
    let d0 = (joint.0 - prev.0, joint.1 - prev.1);
    let d1 = (next.0 - joint.0, next.1 - joint.1);
    let l0 = d0.0.hypot(d0.1);
    let l1 = d1.0.hypot(d1.1);
    if l0 < 1e-9 || l1 < 1e-9 {
        return;
    }
    let u0 = (d0.0 / l0, d0.1 / l0);
    let u1 = (d1.0 / l1, d1.1 / l1);
    let cross = u0.0 * u1.1 - u0.1 * u1.0;
    if cross.abs() < 1e-9 {
        return; // collinear, quads already touch
    }
    // the outer side of the turn is where the gap opens
    let sign = if cross > 0.0 { -1.0 } else { 1.0 };
    let n0 = (u0.1 * sign, -u0.0 * sign);
    let n1 = (u1.1 * sign, -u1.0 * sign);
    let c0 = (joint.0 + n0.0 * r, joint.1 + n0.1 * r);
    let c1 = (joint.0 + n1.0 * r, joint.1 + n1.1 * r);

    match style.join {
        1 => out.push(circle_poly(joint, r)),
        0 => {
            // miter tip from the intersection of the two offset edges,
            // clamped to bevel past the miter limit
            let dot = u0.0 * u1.0 + u0.1 * u1.1;
            let half_angle_cos = ((1.0 + dot) / 2.0).max(0.0).sqrt();
            let miter_ratio = if half_angle_cos > 1e-6 { 1.0 / half_angle_cos } else { f64::MAX };
            if miter_ratio <= style.miter_limit {
                let tip = (
                    joint.0 + (n0.0 + n1.0) / (1.0 + dot).max(1e-9) * r,
                    joint.1 + (n0.1 + n1.1) / (1.0 + dot).max(1e-9) * r,
                );
                out.push(Polygon { pts: vec![joint, c0, tip, c1], closed: true });
            } else {
                out.push(Polygon { pts: vec![joint, c0, c1], closed: true });
            }
        }
        _ => out.push(Polygon { pts: vec![joint, c0, c1], closed: true }),
    }
}

/// Arc-sampled circle, roughly 11 degrees per step.
fn circle_poly(center: (f64, f64), r: f64) -> Polygon {
    let steps = 32;
    let pts = (0..steps)
        .map(|i| {
            let a = i as f64 / steps as f64 * std::f64::consts::TAU;
            (center.0 + a.cos() * r, center.1 + a.sin() * r)
        })
        .collect();
    Polygon { pts, closed: true }
}

fn rect_poly(x: f64, y: f64, w: f64, h: f64) -> Polygon {
    Polygon {
        pts: vec![(x, y), (x + w, y), (x + w, y + h), (x, y + h)],
        closed: true,
    }
}

/// Split a device-space polyline into dash segments. Dash lengths are in
/// user space and scale with the stroke.
fn apply_dash(
    pts: &[(f64, f64)],
    closed: bool,
    dashes: &[f64],
    phase: f64,
    scale: f64,
) -> Vec<Vec<(f64, f64)>> {
    let pattern: Vec<f64> = dashes.iter().map(|d| (d * scale).max(0.01)).collect();
    if pattern.is_empty() {
        return vec![pts.to_vec()];
    }
    let total: f64 = pattern.iter().sum();
    if total <= 0.0 {
        return vec![pts.to_vec()];
    }
    let mut idx = 0usize;
    let mut remaining = pattern[0];
    let mut on = true;
    // consume the phase
    let mut phase = (phase * scale).rem_euclid(total);
    while phase > 0.0 {
        let step = phase.min(remaining);
        remaining -= step;
        phase -= step;
        if remaining <= 1e-9 {
            idx = (idx + 1) % pattern.len();
            remaining = pattern[idx];
            on = !on;
        }
    }

    let mut out = Vec::new();
    let mut current: Vec<(f64, f64)> = Vec::new();
    let n = if closed { pts.len() } else { pts.len() - 1 };
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % pts.len()];
        let mut seg_len = (b.0 - a.0).hypot(b.1 - a.1);
        let mut pos = a;
        while seg_len > 1e-9 {
            let step = seg_len.min(remaining);
            let t = step / seg_len;
            let nxt = (pos.0 + (b.0 - pos.0) * t, pos.1 + (b.1 - pos.1) * t);
            if on {
                if current.is_empty() {
                    current.push(pos);
                }
                current.push(nxt);
            }
            pos = nxt;
            seg_len -= step;
            remaining -= step;
            if remaining <= 1e-9 {
                if on && current.len() > 1 {
                    out.push(std::mem::take(&mut current));
                }
                current.clear();
                idx = (idx + 1) % pattern.len();
                remaining = pattern[idx];
                on = !on;
            }
        }
    }
    if on && current.len() > 1 {
        out.push(current);
    }
    out
}

// ----- tile & image sampling -----

fn sample_tile(tile: &RenderedTile, inv: &Matrix, x: f64, y: f64) -> Option<(f64, f64, f64, f64)> {
    let (u, v) = inv.apply(x, y);
    let u = u.rem_euclid(tile.xstep.max(1e-9));
    let v = v.rem_euclid(tile.ystep.max(1e-9));
    let tx = (u / tile.xstep * tile.w as f64) as usize;
    // tile bitmaps store the cell top-down
    let ty = ((1.0 - v / tile.ystep) * tile.h as f64) as usize;
    if tx >= tile.w || ty >= tile.h {
        return None;
    }
    let i = (ty * tile.w + tx) * 4;
    Some((
        tile.bgra[i] as f64,
        tile.bgra[i + 1] as f64,
        tile.bgra[i + 2] as f64,
        tile.bgra[i + 3] as f64 / 255.0,
    ))
}

fn srgb_to_linear(v: u8) -> f64 {
    static TABLE: OnceLock<[f64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        std::array::from_fn(|i| {
            let s = i as f64 / 255.0;
            if s <= 0.04045 { s / 12.92 } else { ((s + 0.055) / 1.055).powf(2.4) }
        })
    })[v as usize]
}

fn linear_to_srgb(v: f64) -> f64 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.0031308 { v * 12.92 } else { 1.055 * v.powf(1.0 / 2.4) - 0.055 }
}

fn catmull_rom(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let t2 = t * t;
    let t3 = t2 * t;
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * t
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * t2
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * t3)
}

fn px_at(img: &DecodedImage, x: i64, y: i64, iw: usize, ih: usize) -> [u8; 4] {
    let x = x.clamp(0, iw as i64 - 1) as usize;
    let y = y.clamp(0, ih as i64 - 1) as usize;
    let i = (y * iw + x) * 4;
    [img.bgra[i], img.bgra[i + 1], img.bgra[i + 2], img.bgra[i + 3]]
}

/// Catmull-Rom on linear-light colour channels, nearest-neighbour alpha.
fn sample_bicubic(img: &DecodedImage, fx: f64, fy: f64, iw: usize, ih: usize) -> [f64; 4] {
    let x0 = fx.floor() as i64;
    let y0 = fy.floor() as i64;
    let tx = fx - x0 as f64;
    let ty = fy - y0 as f64;

    // alpha stays nearest to avoid halos at hard mask edges
    let near = px_at(img, fx.round() as i64, fy.round() as i64, iw, ih);
    let alpha = near[3] as f64;
    if alpha <= 0.0 {
        return [0.0, 0.0, 0.0, 0.0];
    }

    let mut out = [0.0f64; 4];
    for c in 0..3 {
        let mut rows = [0.0f64; 4];
        for (j, row) in rows.iter_mut().enumerate() {
            let y = y0 - 1 + j as i64;
            let mut cols = [0.0f64; 4];
            for (i, col) in cols.iter_mut().enumerate() {
                let px = px_at(img, x0 - 1 + i as i64, y, iw, ih);
                // un-premultiply before filtering so colour is not biased
                // toward black at soft edges
                let a = px[3] as f64;
                let v = if a > 0.0 { px[c] as f64 / a } else { 0.0 };
                *col = srgb_to_linear((v * 255.0).clamp(0.0, 255.0) as u8);
            }
            *row = catmull_rom(cols[0], cols[1], cols[2], cols[3], tx);
        }
        let v = catmull_rom(rows[0], rows[1], rows[2], rows[3], ty);
        out[c] = linear_to_srgb(v) * alpha; // re-premultiply
    }
    out[3] = alpha;
    out
}

/// Average the source footprint of a device pixel (axis-aligned estimate).
fn sample_box(
    img: &DecodedImage,
    inv: Matrix,
    cx: f64,
    cy: f64,
    iw: usize,
    ih: usize,
) -> [f64; 4] {
    let corners = [
        inv.apply(cx - 0.5, cy - 0.5),
        inv.apply(cx + 0.5, cy - 0.5),
        inv.apply(cx - 0.5, cy + 0.5),
        inv.apply(cx + 0.5, cy + 0.5),
    ];
    let to_px = |(u, v): (f64, f64)| (u * iw as f64, (1.0 - v) * ih as f64);
    let px: Vec<(f64, f64)> = corners.iter().map(|&c| to_px(c)).collect();
    let x_min = px.iter().map(|p| p.0).fold(f64::MAX, f64::min).floor().max(0.0) as usize;
    let x_max = (px.iter().map(|p| p.0).fold(f64::MIN, f64::max).ceil() as usize).min(iw);
    let y_min = px.iter().map(|p| p.1).fold(f64::MAX, f64::min).floor().max(0.0) as usize;
    let y_max = (px.iter().map(|p| p.1).fold(f64::MIN, f64::max).ceil() as usize).min(ih);
    if x_min >= x_max || y_min >= y_max {
        return [0.0; 4];
    }
    let mut acc = [0.0f64; 4];
    let mut count = 0.0;
    for y in y_min..y_max {
        for x in x_min..x_max {
            let i = (y * iw + x) * 4;
            for c in 0..4 {
                acc[c] += img.bgra[i + c] as f64;
            }
            count += 1.0;
        }
    }
    [acc[0] / count, acc[1] / count, acc[2] / count, acc[3] / count]
}

// ----- glyph rasterization -----

/// Collects a glyph outline, transformed into device space.
struct OutlineCollector {
    m: Matrix,
    polys: Vec<Polygon>,
    current: Vec<(f64, f64)>,
    last: (f64, f64),
}

impl OutlineCollector {
    fn new(m: &Matrix) -> Self {
        OutlineCollector { m: *m, polys: Vec::new(), current: Vec::new(), last: (0.0, 0.0) }
    }

    fn finish(mut self) -> Vec<Polygon> {
        self.flush();
        self.polys
    }

    fn flush(&mut self) {
        if self.current.len() > 2 {
            self.polys.push(Polygon { pts: std::mem::take(&mut self.current), closed: true });
        } else {
            self.current.clear();
        }
    }
}

impl OutlineBuilder for OutlineCollector {
    fn move_to(&mut self, x: f32, y: f32) {
        self.flush();
        self.last = self.m.apply(x as f64, y as f64);
        self.current.push(self.last);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.last = self.m.apply(x as f64, y as f64);
        push_pt(&mut self.current, self.last);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        // elevate the quadratic to a cubic and reuse the flattener
        let p0 = self.last;
        let c = self.m.apply(x1 as f64, y1 as f64);
        let p3 = self.m.apply(x as f64, y as f64);
        let c1 = (p0.0 + 2.0 / 3.0 * (c.0 - p0.0), p0.1 + 2.0 / 3.0 * (c.1 - p0.1));
        let c2 = (p3.0 + 2.0 / 3.0 * (c.0 - p3.0), p3.1 + 2.0 / 3.0 * (c.1 - p3.1));
        flatten_cubic(p0, c1, c2, p3, &mut self.current, 0);
        self.last = p3;
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let p0 = self.last;
        let c1 = self.m.apply(x1 as f64, y1 as f64);
        let c2 = self.m.apply(x2 as f64, y2 as f64);
        let p3 = self.m.apply(x as f64, y as f64);
        flatten_cubic(p0, c1, c2, p3, &mut self.current, 0);
        self.last = p3;
    }

    fn close(&mut self) {
        self.flush();
    }
}

/// Rasterize one glyph into a grayscale coverage mask at `px` pixel size.
/// Sizes below the quality floor render at the floor and are area-averaged
/// down to the requested size.
pub fn render_glyph_mask(face: &Face, gid: GlyphId, px: f64) -> Option<cache::CachedGlyph> {
    const QUALITY_FLOOR: f64 = 20.0;
    const SS: usize = 3;

    let render_px = px.max(QUALITY_FLOOR);
    let upem = face.units_per_em().max(1) as f64;
    let scale = render_px / upem;

    // outline in y-up glyph pixels at the render size
    let m = Matrix::scale(scale, scale);
    let mut collector = OutlineCollector::new(&m);
    face.outline_glyph(gid, &mut collector)?;
    let polys = collector.finish();
    let (x0, y0, x1, y1) = polys_bbox(&polys)?;

    let bearing_x = x0.floor() as i32;
    let bearing_y = y1.ceil() as i32;
    let w = ((x1.ceil() - x0.floor()) as usize).max(1);
    let h = ((y1.ceil() - y0.floor()) as usize).max(1);
    if w > 2048 || h > 2048 {
        return None;
    }

    // supersampled hard coverage, then box down to 8-bit
    let sw = w * SS;
    let sh = h * SS;
    let mut bits = vec![0u8; sw * sh];
    // glyph space -> supersample space: translate to origin, flip y
    let shifted: Vec<Polygon> = polys
        .iter()
        .map(|p| Polygon {
            pts: p
                .pts
                .iter()
                .map(|&(x, y)| ((x - bearing_x as f64) * SS as f64, (bearing_y as f64 - y) * SS as f64))
                .collect(),
            closed: p.closed,
        })
        .collect();
    for row in 0..sh {
        let y = row as f64 + 0.5;
        for (sx0, sx1) in spans_at(&shifted, false, y) {
            let a = sx0.floor().max(0.0) as usize;
            let b = (sx1.ceil() as usize).min(sw);
            for x in a..b {
                if (x as f64 + 0.5) >= sx0 && (x as f64 + 0.5) < sx1 {
                    bits[row * sw + x] = 1;
                }
            }
        }
    }
    let mut mask = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0u32;
            for dy in 0..SS {
                for dx in 0..SS {
                    sum += bits[(y * SS + dy) * sw + x * SS + dx] as u32;
                }
            }
            mask[y * w + x] = (sum * 255 / (SS * SS) as u32) as u8;
        }
    }

    let advance = face
        .glyph_hor_advance(gid)
        .map(|a| a as f64 * scale)
        .unwrap_or(render_px * 0.5);

    let glyph = cache::CachedGlyph {
        bitmap: mask,
        width: w,
        height: h,
        bearing_x,
        bearing_y,
        advance_x: advance as f32,
    };

    if px < QUALITY_FLOOR {
        Some(downscale_glyph(&glyph, px / render_px))
    } else {
        Some(glyph)
    }
}

/// Area-average a coverage mask down by `factor` (< 1).
fn downscale_glyph(glyph: &cache::CachedGlyph, factor: f64) -> cache::CachedGlyph {
    let w = ((glyph.width as f64 * factor).ceil() as usize).max(1);
    let h = ((glyph.height as f64 * factor).ceil() as usize).max(1);
    let mut mask = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let sx0 = (x as f64 / factor) as usize;
            let sx1 = (((x + 1) as f64 / factor) as usize).min(glyph.width).max(sx0 + 1);
            let sy0 = (y as f64 / factor) as usize;
            let sy1 = (((y + 1) as f64 / factor) as usize).min(glyph.height).max(sy0 + 1);
            let mut sum = 0u32;
            let mut count = 0u32;
            for sy in sy0..sy1.min(glyph.height) {
                for sx in sx0..sx1.min(glyph.width) {
                    sum += glyph.bitmap[sy * glyph.width + sx] as u32;
                    count += 1;
                }
            }
            mask[y * w + x] = if count > 0 { (sum / count) as u8 } else { 0 };
        }
    }
    cache::CachedGlyph {
        bitmap: mask,
        width: w,
        height: h,
        bearing_x: (glyph.bearing_x as f64 * factor).round() as i32,
        bearing_y: (glyph.bearing_y as f64 * factor).round() as i32,
        advance_x: glyph.advance_x * factor as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_black() -> Paint<'static> {
        Paint::Solid { rgb: [0.0, 0.0, 0.0], alpha: 1.0 }
    }

    fn px(p: &Painter, buf: &[u8], x: usize, y: usize) -> [u8; 4] {
        let i = (y * p.width() + x) * 4;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    fn rect_path(x: f64, y: f64, w: f64, h: f64) -> Path {
        vec![
            PathSeg::MoveTo(x, y),
            PathSeg::LineTo(x + w, y),
            PathSeg::LineTo(x + w, y + h),
            PathSeg::LineTo(x, y + h),
            PathSeg::Close,
        ]
    }

    #[test]
    fn buffer_size_and_clear() {
        let mut p = Painter::new(10, 5, 1);
        p.clear(0xFFFFFFFF);
        let buf = p.buffer();
        assert_eq!(buf.len(), 10 * 5 * 4);
        assert!(buf.iter().all(|&b| b == 255));
    }

    #[test]
    fn fill_rect_covers_expected_pixels() {
        let mut p = Painter::new(20, 20, 1);
        p.set_page(20.0, 20.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        // user-space rect (5,5)-(15,15); y-flip makes it symmetric here
        p.fill_path(&rect_path(5.0, 5.0, 10.0, 10.0), &Matrix::IDENTITY, false, &solid_black());
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 10, 10), [0, 0, 0, 255]);
        assert_eq!(px(&p, &buf, 2, 2), [255, 255, 255, 255]);
        assert_eq!(px(&p, &buf, 17, 17), [255, 255, 255, 255]);
    }

    #[test]
    fn even_odd_leaves_donut_hole() {
        let mut p = Painter::new(50, 50, 1);
        p.set_page(50.0, 50.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        let mut path = rect_path(10.0, 10.0, 30.0, 30.0);
        path.extend(rect_path(20.0, 20.0, 10.0, 10.0));
        p.fill_path(&path, &Matrix::IDENTITY, true, &solid_black());
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 12, 25), [0, 0, 0, 255]); // ring
        assert_eq!(px(&p, &buf, 25, 25), [255, 255, 255, 255]); // hole
        assert_eq!(px(&p, &buf, 45, 25), [255, 255, 255, 255]); // outside
    }

    #[test]
    fn nonzero_fills_donut_hole() {
        let mut p = Painter::new(50, 50, 1);
        p.set_page(50.0, 50.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        // same-direction rectangles: non-zero rule fills the inner one too
        let mut path = rect_path(10.0, 10.0, 30.0, 30.0);
        path.extend(rect_path(20.0, 20.0, 10.0, 10.0));
        p.fill_path(&path, &Matrix::IDENTITY, false, &solid_black());
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 25, 25), [0, 0, 0, 255]);
    }

    #[test]
    fn y_flip_moves_origin_to_bottom() {
        let mut p = Painter::new(10, 10, 1);
        p.set_page(10.0, 10.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        // a rect at user-space bottom-left lands at device bottom-left
        p.fill_path(&rect_path(0.0, 0.0, 2.0, 2.0), &Matrix::IDENTITY, false, &solid_black());
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 1, 9), [0, 0, 0, 255]);
        assert_eq!(px(&p, &buf, 1, 1), [255, 255, 255, 255]);
    }

    #[test]
    fn clip_restricts_fill() {
        let mut p = Painter::new(20, 20, 1);
        p.set_page(20.0, 20.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        p.push_clip(&rect_path(0.0, 0.0, 10.0, 20.0), &Matrix::IDENTITY, false);
        p.fill_path(&rect_path(0.0, 0.0, 20.0, 20.0), &Matrix::IDENTITY, false, &solid_black());
        p.pop_clips(1);
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 5, 10), [0, 0, 0, 255]);
        assert_eq!(px(&p, &buf, 15, 10), [255, 255, 255, 255]);
    }

    #[test]
    fn bezier_curves_away_from_chord() {
        // flatten "100,100 C 200,0 300,200 400,100" and check a midpoint
        // departs from the straight chord y=100
        let path = vec![
            PathSeg::MoveTo(100.0, 100.0),
            PathSeg::CurveTo(200.0, 0.0, 300.0, 200.0, 400.0, 100.0),
        ];
        let polys = flatten_path(&path, &Matrix::IDENTITY);
        assert_eq!(polys.len(), 1);
        let pts = &polys[0].pts;
        assert!(pts.len() > 8, "flattening produced only {} points", pts.len());
        let quarter = pts[pts.len() / 4];
        assert!((quarter.1 - 100.0).abs() > 5.0, "curve stayed on the chord");
    }

    #[test]
    fn page_rotation_maps_corners() {
        let mut p = Painter::new(100, 200, 1);
        p.set_page(200.0, 100.0, 90, (0.0, 0.0));
        // rotation 90: page is 200x100pt, buffer 100x200px
        let m = p.device_matrix(&Matrix::IDENTITY);
        // user origin (0,0) must stay inside the buffer
        let (x, y) = m.apply(0.0, 0.0);
        assert!(x >= -0.5 && x <= 100.5, "x={x}");
        assert!(y >= -0.5 && y <= 200.5, "y={y}");
        // and the far corner too
        let (x, y) = m.apply(200.0, 100.0);
        assert!(x >= -0.5 && x <= 100.5, "x={x}");
        assert!(y >= -0.5 && y <= 200.5, "y={y}");
    }

    #[test]
    fn stroke_produces_visible_line() {
        let mut p = Painter::new(20, 20, 1);
        p.set_page(20.0, 20.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        let path = vec![PathSeg::MoveTo(2.0, 10.0), PathSeg::LineTo(18.0, 10.0)];
        let style = StrokeStyle {
            width: 2.0,
            cap: 0,
            join: 0,
            miter_limit: 10.0,
            dash_array: Vec::new(),
            dash_phase: 0.0,
        };
        p.stroke_path(&path, &Matrix::IDENTITY, &style, &solid_black());
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 10, 10), [0, 0, 0, 255]);
        assert_eq!(px(&p, &buf, 10, 5), [255, 255, 255, 255]);
    }

    #[test]
    fn dashed_stroke_has_gaps() {
        let mut p = Painter::new(40, 10, 1);
        p.set_page(40.0, 10.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        let path = vec![PathSeg::MoveTo(0.0, 5.0), PathSeg::LineTo(40.0, 5.0)];
        let style = StrokeStyle {
            width: 2.0,
            cap: 0,
            join: 0,
            miter_limit: 10.0,
            dash_array: vec![4.0, 4.0],
            dash_phase: 0.0,
        };
        p.stroke_path(&path, &Matrix::IDENTITY, &style, &solid_black());
        let buf = p.buffer();
        let dark = (0..40).filter(|&x| px(&p, &buf, x, 5)[0] == 0).count();
        let light = (0..40).filter(|&x| px(&p, &buf, x, 5)[0] == 255).count();
        assert!(dark >= 10, "dark={dark}");
        assert!(light >= 10, "light={light}");
    }

    #[test]
    fn soft_mask_scales_alpha() {
        let mut p = Painter::new(4, 1, 1);
        p.set_page(4.0, 1.0, 0, (0.0, 0.0));
        p.clear(0x00000000);
        p.push_soft_mask(vec![255, 128, 0, 255]);
        p.fill_path(&rect_path(0.0, 0.0, 4.0, 1.0), &Matrix::IDENTITY, false, &Paint::Solid {
            rgb: [1.0, 1.0, 1.0],
            alpha: 1.0,
        });
        p.pop_soft_masks(1);
        let buf = p.buffer();
        assert_eq!(buf[3], 255);
        assert!((buf[7] as i32 - 128).abs() <= 2);
        assert_eq!(buf[11], 0);
    }

    #[test]
    fn span_intersection() {
        let a = vec![(0.0, 10.0), (20.0, 30.0)];
        let b = vec![(5.0, 25.0)];
        assert_eq!(intersect_spans(&a, &b), vec![(5.0, 10.0), (20.0, 25.0)]);
    }

    #[test]
    fn image_draw_maps_unit_square() {
        let mut p = Painter::new(10, 10, 1);
        p.set_page(10.0, 10.0, 0, (0.0, 0.0));
        p.clear(0xFFFFFFFF);
        // 1x1 solid red image scaled to the 4x4 user square at (3,3)
        let img = DecodedImage { width: 1, height: 1, bgra: vec![0, 0, 255, 255] };
        let ctm = Matrix::scale(4.0, 4.0).mul(&Matrix::translate(3.0, 3.0));
        p.draw_image(&img, &ctm, 1.0);
        let buf = p.buffer();
        assert_eq!(px(&p, &buf, 5, 5), [0, 0, 255, 255]);
        assert_eq!(px(&p, &buf, 1, 1), [255, 255, 255, 255]);
    }
}
