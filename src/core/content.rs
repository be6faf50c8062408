//! Content-stream interpreter: tokenises operators, maintains the graphics
//! state, and drives the painter. Form XObjects recurse with layered
//! resources; clip and soft-mask layers are tracked per q-level so Q pops
//! exactly what was pushed.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::core::document::Document;
use crate::core::font::FontInfo;
use crate::core::gstate::{GraphicsState, Matrix};
use crate::core::image;
use crate::core::lexer::{Lexer, is_delimiter, is_whitespace};
use crate::core::object::{Dict, Object};
use crate::core::painter::{Paint, Painter, Path, PathSeg, RenderedTile, StrokeStyle, TextRun};
use crate::core::shading::Shading;

const MAX_FORM_DEPTH: usize = 32;

/// Page geometry needed to build scratch painters (soft-mask groups and
/// pattern tiles render through their own painter instances).
#[derive(Clone, Copy)]
pub struct PageSetup {
    pub width_pt: f64,
    pub height_pt: f64,
    pub rotation: i32,
    pub origin: (f64, f64),
}

pub struct Interpreter<'a> {
    doc: &'a Document,
    painter: &'a mut Painter,
    fonts: Arc<HashMap<String, Arc<FontInfo>>>,
    resources: Vec<Dict>,
    page: PageSetup,

    gs: GraphicsState,
    gs_stack: Vec<GraphicsState>,
    // (clip depth, soft-mask depth) captured at each q
    layer_stack: Vec<(usize, usize)>,

    operands: Vec<Object>,
    path: Path,
    current_point: (f64, f64),
    subpath_start: (f64, f64),
    pending_clip: Option<bool>,
    form_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        doc: &'a Document,
        painter: &'a mut Painter,
        fonts: Arc<HashMap<String, Arc<FontInfo>>>,
        resources: Dict,
        page: PageSetup,
        initial: GraphicsState,
    ) -> Self {
        Interpreter {
            doc,
            painter,
            fonts,
            resources: vec![resources],
            page,
            gs: initial,
            gs_stack: Vec::new(),
            layer_stack: Vec::new(),
            operands: Vec::new(),
            path: Vec::new(),
            current_point: (0.0, 0.0),
            subpath_start: (0.0, 0.0),
            pending_clip: None,
            form_depth: 0,
        }
    }

    /// Interpret a full content stream. Individual operator failures are
    /// logged and skipped; the q/Q stack is rebalanced at the end.
    pub fn run(&mut self, content: &[u8]) {
        let mut lex = Lexer::new(content);
        loop {
            lex.skip_space();
            if lex.eof() {
                break;
            }
            if let Some(obj) = lex.read_object() {
                self.operands.push(obj);
                continue;
            }
            let op = read_operator(&mut lex);
            if op.is_empty() {
                continue;
            }
            self.dispatch(&op, &mut lex);
            self.operands.clear();
        }
        // forcibly rebalance unbalanced q/Q at stream end
        if !self.gs_stack.is_empty() {
            debug!("rebalancing {} unmatched q operators", self.gs_stack.len());
            while !self.gs_stack.is_empty() {
                self.op_restore();
            }
        }
    }

    // ----- operand helpers -----

    fn pop_f64(&mut self) -> f64 {
        self.operands.pop().and_then(|o| o.as_f64()).unwrap_or(0.0)
    }

    fn pop_i32(&mut self) -> i32 {
        self.operands.pop().and_then(|o| o.as_i64()).unwrap_or(0) as i32
    }

    fn pop_name(&mut self) -> String {
        self.operands
            .pop()
            .and_then(|o| o.as_name().map(str::to_string))
            .unwrap_or_default()
    }

    fn pop_string(&mut self) -> Vec<u8> {
        self.operands
            .pop()
            .and_then(|o| o.as_string().map(<[u8]>::to_vec))
            .unwrap_or_default()
    }

    fn pop_n(&mut self, n: usize) -> Vec<f64> {
        let mut out = vec![0.0; n];
        for slot in out.iter_mut().rev() {
            *slot = self.pop_f64();
        }
        out
    }

    fn lookup_resource(&self, category: &str, name: &str) -> Object {
        for res in self.resources.iter().rev() {
            let cat = self.doc.get(res, category);
            if let Some(dict) = cat.as_dict() {
                let hit = self.doc.get(dict, name);
                if !hit.is_null() {
                    return hit.clone();
                }
            }
        }
        Object::Null
    }

    // ----- dispatch -----

    fn dispatch(&mut self, op: &str, lex: &mut Lexer) {
        match op {
            // graphics state
            "q" => self.op_save(),
            "Q" => self.op_restore(),
            "cm" => {
                let v = self.pop_n(6);
                self.gs.concat(&Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]));
            }
            "w" => self.gs.line_width = self.pop_f64(),
            "J" => self.gs.line_cap = self.pop_i32(),
            "j" => self.gs.line_join = self.pop_i32(),
            "M" => self.gs.miter_limit = self.pop_f64(),
            "d" => {
                let phase = self.pop_f64();
                let arr = self.operands.pop().unwrap_or(Object::Null);
                self.gs.dash_array = arr
                    .as_array()
                    .map(|a| a.iter().filter_map(|o| o.as_f64()).collect())
                    .unwrap_or_default();
                self.gs.dash_phase = phase;
            }
            "i" | "ri" => {
                self.operands.pop();
            }
            "gs" => {
                let name = self.pop_name();
                self.apply_ext_gstate(&name);
            }

            // path construction
            "m" => {
                let v = self.pop_n(2);
                self.path.push(PathSeg::MoveTo(v[0], v[1]));
                self.current_point = (v[0], v[1]);
                self.subpath_start = (v[0], v[1]);
            }
            "l" => {
                let v = self.pop_n(2);
                self.path.push(PathSeg::LineTo(v[0], v[1]));
                self.current_point = (v[0], v[1]);
            }
            "c" => {
                let v = self.pop_n(6);
                self.path.push(PathSeg::CurveTo(v[0], v[1], v[2], v[3], v[4], v[5]));
                self.current_point = (v[4], v[5]);
            }
            "v" => {
                let v = self.pop_n(4);
                let (cx, cy) = self.current_point;
                self.path.push(PathSeg::CurveTo(cx, cy, v[0], v[1], v[2], v[3]));
                self.current_point = (v[2], v[3]);
            }
            "y" => {
                let v = self.pop_n(4);
                self.path.push(PathSeg::CurveTo(v[0], v[1], v[2], v[3], v[2], v[3]));
                self.current_point = (v[2], v[3]);
            }
            "re" => {
                let v = self.pop_n(4);
                let (x, y, w, h) = (v[0], v[1], v[2], v[3]);
                self.path.push(PathSeg::MoveTo(x, y));
                self.path.push(PathSeg::LineTo(x + w, y));
                self.path.push(PathSeg::LineTo(x + w, y + h));
                self.path.push(PathSeg::LineTo(x, y + h));
                self.path.push(PathSeg::Close);
                self.current_point = (x, y);
                self.subpath_start = (x, y);
            }
            "h" => {
                self.path.push(PathSeg::Close);
                self.current_point = self.subpath_start;
            }

            // painting
            "f" | "F" => self.paint(true, false, false),
            "f*" => self.paint(true, false, true),
            "S" => self.paint(false, true, false),
            "s" => {
                self.path.push(PathSeg::Close);
                self.paint(false, true, false);
            }
            "B" => self.paint(true, true, false),
            "B*" => self.paint(true, true, true),
            "b" => {
                self.path.push(PathSeg::Close);
                self.paint(true, true, false);
            }
            "b*" => {
                self.path.push(PathSeg::Close);
                self.paint(true, true, true);
            }
            "n" => self.paint(false, false, false),

            // clipping: applied at the next painting operator's end stage
            "W" => self.pending_clip = Some(false),
            "W*" => self.pending_clip = Some(true),

            // text objects & state
            "BT" => {
                self.gs.text_matrix = Matrix::IDENTITY;
                self.gs.text_line_matrix = Matrix::IDENTITY;
            }
            "ET" => {}
            "Tc" => self.gs.char_spacing = self.pop_f64(),
            "Tw" => self.gs.word_spacing = self.pop_f64(),
            "Tz" => self.gs.horizontal_scale = self.pop_f64(),
            "TL" => self.gs.leading = self.pop_f64(),
            "Ts" => self.gs.text_rise = self.pop_f64(),
            "Tr" => self.gs.render_mode = self.pop_i32(),
            "Tf" => {
                let size = self.pop_f64();
                let name = self.pop_name();
                self.gs.font_name = name;
                self.gs.font_size = size;
            }

            // text positioning
            "Td" => {
                let v = self.pop_n(2);
                self.text_translate(v[0], v[1]);
            }
            "TD" => {
                let v = self.pop_n(2);
                self.gs.leading = -v[1];
                self.text_translate(v[0], v[1]);
            }
            "Tm" => {
                let v = self.pop_n(6);
                let m = Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]);
                self.gs.text_matrix = m;
                self.gs.text_line_matrix = m;
            }
            "T*" => {
                let leading = self.gs.leading;
                self.text_translate(0.0, -leading);
            }

            // text showing
            "Tj" => {
                let bytes = self.pop_string();
                self.show_text(&bytes);
            }
            "'" => {
                let bytes = self.pop_string();
                let leading = self.gs.leading;
                self.text_translate(0.0, -leading);
                self.show_text(&bytes);
            }
            "\"" => {
                let bytes = self.pop_string();
                self.gs.char_spacing = self.pop_f64();
                self.gs.word_spacing = self.pop_f64();
                let leading = self.gs.leading;
                self.text_translate(0.0, -leading);
                self.show_text(&bytes);
            }
            "TJ" => {
                let arr = self.operands.pop().unwrap_or(Object::Null);
                if let Some(items) = arr.as_array() {
                    for item in items.to_vec() {
                        match item {
                            Object::String(bytes) => self.show_text(&bytes),
                            other => {
                                if let Some(n) = other.as_f64() {
                                    // displacement in thousandths of the
                                    // font size, subtracted from tx
                                    let dx = -n / 1000.0
                                        * self.gs.font_size
                                        * (self.gs.horizontal_scale / 100.0);
                                    self.gs.text_matrix =
                                        Matrix::translate(dx, 0.0).mul(&self.gs.text_matrix);
                                }
                            }
                        }
                    }
                }
            }

            // colour
            "G" => {
                let v = self.pop_f64();
                self.gs.stroke.rgb = [v, v, v];
                self.gs.stroke.pattern = None;
            }
            "g" => {
                let v = self.pop_f64();
                self.gs.fill.rgb = [v, v, v];
                self.gs.fill.pattern = None;
            }
            "RG" => {
                let v = self.pop_n(3);
                self.gs.stroke.rgb = [v[0], v[1], v[2]];
                self.gs.stroke.pattern = None;
            }
            "rg" => {
                let v = self.pop_n(3);
                self.gs.fill.rgb = [v[0], v[1], v[2]];
                self.gs.fill.pattern = None;
            }
            "K" => {
                let v = self.pop_n(4);
                self.gs.stroke.rgb = cmyk(v[0], v[1], v[2], v[3]);
                self.gs.stroke.pattern = None;
            }
            "k" => {
                let v = self.pop_n(4);
                self.gs.fill.rgb = cmyk(v[0], v[1], v[2], v[3]);
                self.gs.fill.pattern = None;
            }
            "CS" => {
                self.gs.stroke.space = self.pop_name();
                self.gs.stroke.rgb = [0.0; 3];
                self.gs.stroke.pattern = None;
            }
            "cs" => {
                self.gs.fill.space = self.pop_name();
                self.gs.fill.rgb = [0.0; 3];
                self.gs.fill.pattern = None;
            }
            "SC" | "SCN" => {
                let (rgb, pattern) = self.read_color_operands();
                if let Some(rgb) = rgb {
                    self.gs.stroke.rgb = rgb;
                }
                self.gs.stroke.pattern = pattern;
            }
            "sc" | "scn" => {
                let (rgb, pattern) = self.read_color_operands();
                if let Some(rgb) = rgb {
                    self.gs.fill.rgb = rgb;
                }
                self.gs.fill.pattern = pattern;
            }
            "sh" => {
                let name = self.pop_name();
                self.op_shading(&name);
            }

            // XObjects & inline images
            "Do" => {
                let name = self.pop_name();
                self.op_do(&name);
            }
            "BI" => self.op_inline_image(lex),

            // marked content: tracked but not rendered
            "BMC" | "EMC" | "MP" | "BX" | "EX" => {}
            "BDC" | "DP" => {}

            // Type3 glyph metrics
            "d0" | "d1" => {}

            other => {
                debug!("unknown operator '{other}'");
            }
        }
    }

    // ----- state ops -----

    fn op_save(&mut self) {
        self.gs_stack.push(self.gs.clone());
        self.layer_stack
            .push((self.painter.clip_depth(), self.painter.soft_mask_depth()));
    }

    fn op_restore(&mut self) {
        if let Some(prev) = self.gs_stack.pop() {
            self.gs = prev;
        }
        if let Some((clips, masks)) = self.layer_stack.pop() {
            let current = self.painter.clip_depth();
            if current > clips {
                self.painter.pop_clips(current - clips);
            }
            let current = self.painter.soft_mask_depth();
            if current > masks {
                self.painter.pop_soft_masks(current - masks);
            }
        }
    }

    fn text_translate(&mut self, tx: f64, ty: f64) {
        self.gs.text_line_matrix = Matrix::translate(tx, ty).mul(&self.gs.text_line_matrix);
        self.gs.text_matrix = self.gs.text_line_matrix;
    }

    fn read_color_operands(&mut self) -> (Option<[f64; 3]>, Option<String>) {
        let mut pattern = None;
        if matches!(self.operands.last(), Some(Object::Name(_))) {
            pattern = Some(self.pop_name());
        }
        let nums: Vec<f64> = self.operands.iter().filter_map(|o| o.as_f64()).collect();
        self.operands.clear();
        let rgb = match nums.len() {
            1 => Some([nums[0], nums[0], nums[0]]),
            3 => Some([nums[0], nums[1], nums[2]]),
            4 => Some(cmyk(nums[0], nums[1], nums[2], nums[3])),
            _ => None,
        };
        (rgb, pattern)
    }

    fn apply_ext_gstate(&mut self, name: &str) {
        let obj = self.lookup_resource("ExtGState", name);
        let Some(dict) = obj.as_dict() else { return };
        let dict = dict.clone();
        if let Some(lw) = self.doc.get(&dict, "LW").as_f64() {
            self.gs.line_width = lw;
        }
        if let Some(lc) = self.doc.get(&dict, "LC").as_i64() {
            self.gs.line_cap = lc as i32;
        }
        if let Some(lj) = self.doc.get(&dict, "LJ").as_i64() {
            self.gs.line_join = lj as i32;
        }
        if let Some(ml) = self.doc.get(&dict, "ML").as_f64() {
            self.gs.miter_limit = ml;
        }
        if let Some(d) = self.doc.get(&dict, "D").as_array() {
            if let (Some(arr), Some(phase)) = (d.first(), d.get(1)) {
                self.gs.dash_array = arr
                    .as_array()
                    .map(|a| a.iter().filter_map(|o| o.as_f64()).collect())
                    .unwrap_or_default();
                self.gs.dash_phase = phase.as_f64().unwrap_or(0.0);
            }
        }
        if let Some(ca) = self.doc.get(&dict, "CA").as_f64() {
            self.gs.stroke_alpha = ca.clamp(0.0, 1.0);
        }
        if let Some(ca) = self.doc.get(&dict, "ca").as_f64() {
            self.gs.fill_alpha = ca.clamp(0.0, 1.0);
        }
        if let Some(bm) = self.doc.get(&dict, "BM").as_name() {
            self.gs.blend_mode = bm.to_string();
        }
        match self.doc.get(&dict, "SMask") {
            Object::Null => {}
            Object::Name(n) if n == "None" => {
                self.gs.soft_mask = None;
            }
            smask => {
                let smask = smask.clone();
                self.apply_soft_mask(&smask);
            }
        }
    }

    /// Render the soft-mask group to an offscreen painter of the same size
    /// and push its luminosity as an alpha layer.
    fn apply_soft_mask(&mut self, smask: &Object) {
        let Some(dict) = self.doc.resolve(smask).as_dict() else { return };
        let group = self.doc.get(dict, "G");
        let Some(form) = group.as_stream() else { return };
        let subtype = self.doc.get(dict, "S").as_name().unwrap_or("Luminosity");
        if subtype != "Luminosity" {
            debug!("soft mask type /{subtype} approximated as luminosity");
        }
        if self.form_depth >= MAX_FORM_DEPTH {
            return;
        }

        // match the supersampled size so mask pixels line up one-to-one
        let (rw, rh) = self.painter.raw_size();
        let mut scratch = Painter::new(rw, rh, 1);
        scratch.set_page(
            self.page.width_pt,
            self.page.height_pt,
            self.page.rotation,
            self.page.origin,
        );
        scratch.clear(0x0000_0000);

        let form = form.clone();
        let content = self.doc.decode_stream(&form);
        let mut resources = self.resources.clone();
        if let Some(r) = self.doc.get(&form.dict, "Resources").as_dict() {
            resources.push(r.clone());
        }
        let mut gs = GraphicsState { ctm: self.gs.ctm, ..Default::default() };
        if let Some(m) = matrix_from(self.doc, self.doc.get(&form.dict, "Matrix")) {
            gs.ctm = m.mul(&gs.ctm);
        }
        let mut sub = Interpreter {
            doc: self.doc,
            painter: &mut scratch,
            fonts: self.fonts.clone(),
            resources,
            page: self.page,
            gs,
            gs_stack: Vec::new(),
            layer_stack: Vec::new(),
            operands: Vec::new(),
            path: Vec::new(),
            current_point: (0.0, 0.0),
            subpath_start: (0.0, 0.0),
            pending_clip: None,
            form_depth: self.form_depth + 1,
        };
        sub.run(&content);
        let mask = scratch.luminosity_mask();
        self.painter.push_soft_mask(mask);
        self.gs.soft_mask = Some("Luminosity".into());
    }

    // ----- painting -----

    fn paint(&mut self, fill: bool, stroke: bool, even_odd: bool) {
        let path = std::mem::take(&mut self.path);
        if fill && !path.is_empty() {
            let ctm = self.gs.ctm;
            if let Some(paint) = self.fill_paint() {
                fill_with(self.painter, &path, &ctm, even_odd, &paint);
            }
        }
        if stroke && !path.is_empty() {
            let style = StrokeStyle {
                width: self.gs.line_width,
                cap: self.gs.line_cap,
                join: self.gs.line_join,
                miter_limit: self.gs.miter_limit,
                dash_array: self.gs.dash_array.clone(),
                dash_phase: self.gs.dash_phase,
            };
            let paint = Paint::Solid { rgb: self.gs.stroke.rgb, alpha: self.gs.stroke_alpha };
            let ctm = self.gs.ctm;
            self.painter.stroke_path(&path, &ctm, &style, &paint);
        }
        // end-path stage: a pending W/W* clip applies now, n included
        if let Some(even_odd_clip) = self.pending_clip.take() {
            let ctm = self.gs.ctm;
            self.painter.push_clip(&path, &ctm, even_odd_clip);
        }
        self.current_point = (0.0, 0.0);
        self.subpath_start = (0.0, 0.0);
    }

    /// Resolve the fill paint, rendering pattern tiles on demand. None means
    /// the pattern could not be resolved and the fill is skipped.
    fn fill_paint(&mut self) -> Option<OwnedPaint> {
        if let Some(pattern_name) = self.gs.fill.pattern.clone() {
            return match self.resolve_pattern(&pattern_name) {
                Some(ResolvedPattern::Tile(tile)) => Some(OwnedPaint::Tile {
                    tile,
                    rgb: self.gs.fill.rgb,
                    alpha: self.gs.fill_alpha,
                }),
                Some(ResolvedPattern::Shading(shading, matrix)) => {
                    let to_device = self.painter.device_matrix(&matrix);
                    Some(OwnedPaint::Shading { shading, to_device, alpha: self.gs.fill_alpha })
                }
                None => None,
            };
        }
        Some(OwnedPaint::Solid { rgb: self.gs.fill.rgb, alpha: self.gs.fill_alpha })
    }

    fn resolve_pattern(&mut self, name: &str) -> Option<ResolvedPattern> {
        let obj = self.lookup_resource("Pattern", name);
        let resolved = self.doc.resolve(&obj).clone();
        let dict = resolved.as_dict()?.clone();
        let ptype = self.doc.get(&dict, "PatternType").as_i64().unwrap_or(1);
        let matrix =
            matrix_from(self.doc, self.doc.get(&dict, "Matrix")).unwrap_or(Matrix::IDENTITY);
        if ptype == 2 {
            let shading_dict = self.doc.get(&dict, "Shading").as_dict()?.clone();
            let shading = Shading::parse(self.doc, &shading_dict)?;
            return Some(ResolvedPattern::Shading(Box::new(shading), matrix));
        }
        let stream = resolved.as_stream()?.clone();
        self.render_tile(stream.dict.clone(), stream, matrix).map(ResolvedPattern::Tile)
    }

    /// Pre-render one pattern cell at a resolution matched to the pattern's
    /// device-space step size.
    fn render_tile(
        &mut self,
        dict: Dict,
        stream: crate::core::object::Stream,
        matrix: Matrix,
    ) -> Option<Box<RenderedTile>> {
        if self.form_depth >= MAX_FORM_DEPTH {
            return None;
        }
        let bbox: Vec<f64> = self
            .doc
            .get(&dict, "BBox")
            .as_array()?
            .iter()
            .filter_map(|o| self.doc.resolve(o).as_f64())
            .collect();
        if bbox.len() < 4 {
            return None;
        }
        let bw = (bbox[2] - bbox[0]).abs();
        let bh = (bbox[3] - bbox[1]).abs();
        let xstep = self.doc.get(&dict, "XStep").as_f64().unwrap_or(bw).abs().max(0.01);
        let ystep = self.doc.get(&dict, "YStep").as_f64().unwrap_or(bh).abs().max(0.01);
        let uncolored = self.doc.get(&dict, "PaintType").as_i64().unwrap_or(1) == 2;

        let to_device = self.painter.device_matrix(&matrix);
        let (sx, sy) = to_device.axis_scales();
        let tw = ((xstep * sx).ceil() as usize).clamp(1, 2048);
        let th = ((ystep * sy).ceil() as usize).clamp(1, 2048);

        let mut scratch = Painter::new(tw, th, 1);
        scratch.set_page(xstep, ystep, 0, (bbox[0].min(bbox[2]), bbox[1].min(bbox[3])));
        scratch.clear(0x0000_0000);

        let content = self.doc.decode_stream(&stream);
        let mut resources = self.resources.clone();
        if let Some(r) = self.doc.get(&dict, "Resources").as_dict() {
            resources.push(r.clone());
        }
        let gs = if uncolored {
            // uncoloured patterns only contribute coverage, paint white
            GraphicsState {
                fill: crate::core::gstate::ColorState {
                    rgb: [1.0; 3],
                    space: "DeviceGray".into(),
                    pattern: None,
                },
                ..Default::default()
            }
        } else {
            GraphicsState::default()
        };
        let mut sub = Interpreter {
            doc: self.doc,
            painter: &mut scratch,
            fonts: self.fonts.clone(),
            resources,
            page: PageSetup {
                width_pt: xstep,
                height_pt: ystep,
                rotation: 0,
                origin: (bbox[0], bbox[1]),
            },
            gs,
            gs_stack: Vec::new(),
            layer_stack: Vec::new(),
            operands: Vec::new(),
            path: Vec::new(),
            current_point: (0.0, 0.0),
            subpath_start: (0.0, 0.0),
            pending_clip: None,
            form_depth: self.form_depth + 1,
        };
        sub.run(&content);

        Some(Box::new(RenderedTile {
            bgra: scratch.buffer(),
            w: tw,
            h: th,
            xstep,
            ystep,
            uncolored,
            matrix: to_device,
        }))
    }

    fn op_shading(&mut self, name: &str) {
        let obj = self.lookup_resource("Shading", name);
        let Some(dict) = self.doc.resolve(&obj).as_dict() else {
            debug!("sh: unknown shading /{name}");
            return;
        };
        let dict = dict.clone();
        let Some(shading) = Shading::parse(self.doc, &dict) else { return };
        let ctm = self.gs.ctm;
        self.painter.fill_shading(&shading, &ctm, self.gs.fill_alpha);
    }

    // ----- text -----

    fn show_text(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let Some(font) = self.fonts.get(&self.gs.font_name).cloned() else {
            debug!("show text with unknown font /{}", self.gs.font_name);
            return;
        };
        let fallback = self.doc.options.fallback_font.as_deref();
        let run = TextRun {
            bytes,
            font: &font,
            font_size: self.gs.font_size,
            char_spacing: self.gs.char_spacing,
            word_spacing: self.gs.word_spacing,
            horizontal_scale: self.gs.horizontal_scale,
            rise: self.gs.text_rise,
            rgb: self.gs.fill.rgb,
            alpha: self.gs.fill_alpha,
            render_mode: self.gs.render_mode,
            fallback_font: fallback,
        };
        let text_to_device = self
            .painter
            .device_matrix(&self.gs.text_matrix.mul(&self.gs.ctm));
        let advance = self.painter.draw_text(&run, &text_to_device);
        self.gs.text_matrix = Matrix::translate(advance, 0.0).mul(&self.gs.text_matrix);
    }

    // ----- XObjects -----

    fn op_do(&mut self, name: &str) {
        let obj = self.lookup_resource("XObject", name);
        let resolved = self.doc.resolve(&obj);
        let Some(stream) = resolved.as_stream() else {
            debug!("Do: /{name} is not a stream");
            return;
        };
        let stream = stream.clone();
        match self.doc.get(&stream.dict, "Subtype").as_name() {
            Some("Image") => self.draw_image_xobject(&stream),
            Some("Form") => self.run_form(&stream),
            other => debug!("Do: unsupported XObject subtype {other:?}"),
        }
    }

    fn draw_image_xobject(&mut self, stream: &crate::core::object::Stream) {
        match image::decode_image(self.doc, stream, self.gs.fill.rgb) {
            Ok(img) => {
                let ctm = self.gs.ctm;
                self.painter.draw_image(&img, &ctm, self.gs.fill_alpha);
            }
            Err(e) => debug!("image decode failed: {e}"),
        }
    }

    fn run_form(&mut self, form: &crate::core::object::Stream) {
        if self.form_depth >= MAX_FORM_DEPTH {
            debug!("form recursion depth exceeded");
            return;
        }
        let content = self.doc.decode_stream(form);

        // the form body runs in a saved state with /Matrix prepended and
        // /BBox clipped; parent clipping stays active underneath
        self.op_save();
        if let Some(m) = matrix_from(self.doc, self.doc.get(&form.dict, "Matrix")) {
            self.gs.concat(&m);
        }
        if let Some(bbox) = self.doc.get(&form.dict, "BBox").as_array() {
            let vals: Vec<f64> =
                bbox.iter().filter_map(|o| self.doc.resolve(o).as_f64()).collect();
            if vals.len() >= 4 {
                let rect: Path = vec![
                    PathSeg::MoveTo(vals[0], vals[1]),
                    PathSeg::LineTo(vals[2], vals[1]),
                    PathSeg::LineTo(vals[2], vals[3]),
                    PathSeg::LineTo(vals[0], vals[3]),
                    PathSeg::Close,
                ];
                let ctm = self.gs.ctm;
                self.painter.push_clip(&rect, &ctm, false);
            }
        }
        let pushed_resources = match self.doc.get(&form.dict, "Resources").as_dict() {
            Some(r) => {
                self.resources.push(r.clone());
                true
            }
            None => false,
        };

        // form fonts live in the form's resources, not the page map
        let form_fonts = match self.doc.get(&form.dict, "Resources").as_dict() {
            Some(r) => Arc::new(crate::core::font::build_page_fonts(self.doc, r)),
            None => self.fonts.clone(),
        };
        let merged_fonts = merge_fonts(&self.fonts, form_fonts);
        let saved_fonts = std::mem::replace(&mut self.fonts, merged_fonts);

        self.form_depth += 1;
        let saved_path = std::mem::take(&mut self.path);
        let saved_pending = self.pending_clip.take();
        self.run_nested(&content);
        self.path = saved_path;
        self.pending_clip = saved_pending;
        self.form_depth -= 1;

        self.fonts = saved_fonts;
        if pushed_resources {
            self.resources.pop();
        }
        self.op_restore();
    }

    /// Run a nested stream without the final q/Q rebalancing reaching the
    /// caller's stack: the nested stream gets its own balance point.
    fn run_nested(&mut self, content: &[u8]) {
        let depth_before = self.gs_stack.len();
        let mut lex = Lexer::new(content);
        loop {
            lex.skip_space();
            if lex.eof() {
                break;
            }
            if let Some(obj) = lex.read_object() {
                self.operands.push(obj);
                continue;
            }
            let op = read_operator(&mut lex);
            if op.is_empty() {
                continue;
            }
            // a stray Q inside the form must not pop the caller's state
            if op == "Q" && self.gs_stack.len() <= depth_before {
                continue;
            }
            self.dispatch(&op, &mut lex);
            self.operands.clear();
        }
        while self.gs_stack.len() > depth_before {
            self.op_restore();
        }
    }

    // ----- inline images -----

    fn op_inline_image(&mut self, lex: &mut Lexer) {
        let mut dict = Dict::new();
        loop {
            lex.skip_space();
            if lex.eof() {
                return;
            }
            if lex.consume_keyword(b"ID") {
                break;
            }
            let Some(Object::Name(key)) = lex.read_object() else {
                // malformed dict: skip to EI
                skip_to_ei(lex);
                return;
            };
            let Some(value) = lex.read_object() else {
                skip_to_ei(lex);
                return;
            };
            dict.set(key, value);
        }
        // one whitespace byte after ID, then raw data until EI
        if !lex.eof() && is_whitespace(lex.peek()) {
            lex.seek(lex.pos() + 1);
        }
        let start = lex.pos();
        let Some(end) = find_ei(lex) else { return };
        let data = lexer_slice(lex, start, end);
        let stream = image::inline_image_stream(dict, data);
        match image::decode_image(self.doc, &stream, self.gs.fill.rgb) {
            Ok(img) => {
                let ctm = self.gs.ctm;
                self.painter.draw_image(&img, &ctm, self.gs.fill_alpha);
            }
            Err(e) => debug!("inline image failed: {e}"),
        }
    }
}

/// Paints that may own pattern data resolved during the operator.
enum OwnedPaint {
    Solid { rgb: [f64; 3], alpha: f64 },
    Shading { shading: Box<Shading>, to_device: Matrix, alpha: f64 },
    Tile { tile: Box<RenderedTile>, rgb: [f64; 3], alpha: f64 },
}

enum ResolvedPattern {
    Tile(Box<RenderedTile>),
    Shading(Box<Shading>, Matrix),
}

fn fill_with(painter: &mut Painter, path: &Path, ctm: &Matrix, even_odd: bool, paint: &OwnedPaint) {
    match paint {
        OwnedPaint::Solid { rgb, alpha } => {
            painter.fill_path(path, ctm, even_odd, &Paint::Solid { rgb: *rgb, alpha: *alpha })
        }
        OwnedPaint::Shading { shading, to_device, alpha } => painter.fill_path(
            path,
            ctm,
            even_odd,
            &Paint::Shading { shading: shading.as_ref(), to_device: *to_device, alpha: *alpha },
        ),
        OwnedPaint::Tile { tile, rgb, alpha } => painter.fill_path(
            path,
            ctm,
            even_odd,
            &Paint::Tile { tile: tile.as_ref(), rgb: *rgb, alpha: *alpha },
        ),
    }
}

fn cmyk(c: f64, m: f64, y: f64, k: f64) -> [f64; 3] {
    [
        ((1.0 - c) * (1.0 - k)).clamp(0.0, 1.0),
        ((1.0 - m) * (1.0 - k)).clamp(0.0, 1.0),
        ((1.0 - y) * (1.0 - k)).clamp(0.0, 1.0),
    ]
}

fn matrix_from(doc: &Document, obj: &Object) -> Option<Matrix> {
    let arr = obj.as_array()?;
    if arr.len() < 6 {
        return None;
    }
    let v: Vec<f64> = arr.iter().filter_map(|o| doc.resolve(o).as_f64()).collect();
    if v.len() < 6 {
        return None;
    }
    Some(Matrix::new(v[0], v[1], v[2], v[3], v[4], v[5]))
}

fn merge_fonts(
    base: &Arc<HashMap<String, Arc<FontInfo>>>,
    extra: Arc<HashMap<String, Arc<FontInfo>>>,
) -> Arc<HashMap<String, Arc<FontInfo>>> {
    if extra.is_empty() {
        return base.clone();
    }
    let mut merged: HashMap<String, Arc<FontInfo>> = (**base).clone();
    for (k, v) in extra.iter() {
        merged.insert(k.clone(), v.clone());
    }
    Arc::new(merged)
}

fn read_operator(lex: &mut Lexer) -> String {
    let mut out = String::new();
    while !lex.eof() {
        let b = lex.peek();
        if !is_whitespace(b) && !is_delimiter(b) {
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

/// Advance past the end of an inline image without returning the data bounds.
fn skip_to_ei(lex: &mut Lexer) {
    find_ei(lex);
}

/// Advance past the end of an inline image: whitespace + `EI` + delimiter.
fn find_ei(lex: &mut Lexer) -> Option<usize> {
    let start = lex.pos();
    let mut pos = start;
    loop {
        lex.seek(pos);
        if lex.eof() {
            return None;
        }
        if lex.peek() == b'E' {
            let mut probe = Lexer::at(lexer_data(lex), pos);
            if probe.consume_keyword(b"EI") {
                // data ends before the whitespace that precedes EI
                let mut end = pos;
                let data = lexer_data(lex);
                if end > start && is_whitespace(data[end - 1]) {
                    end -= 1;
                }
                lex.seek(probe.pos());
                return Some(end);
            }
        }
        pos += 1;
    }
}

// small helpers to reach into the lexer's buffer
fn lexer_data<'b>(lex: &Lexer<'b>) -> &'b [u8] {
    lex.data()
}

fn lexer_slice(lex: &Lexer, start: usize, end: usize) -> Vec<u8> {
    lex.data()[start..end.max(start)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_reading() {
        let mut lex = Lexer::new(b"f* Tj W* ' \" BDC");
        let mut ops = Vec::new();
        loop {
            lex.skip_space();
            if lex.eof() {
                break;
            }
            if lex.read_object().is_some() {
                continue;
            }
            let op = read_operator(&mut lex);
            if !op.is_empty() {
                ops.push(op);
            }
        }
        // the quote operators lex as operators, not strings (no parens)
        assert_eq!(ops, vec!["f*", "Tj", "W*", "'", "\"", "BDC"]);
    }

    #[test]
    fn find_ei_stops_at_marker() {
        let data = b"\xAA\xBB\xCC EI Q";
        let mut lex = Lexer::new(data);
        let end = find_ei(&mut lex).unwrap();
        assert_eq!(end, 3);
        // lexer now past EI
        lex.skip_space();
        assert_eq!(lex.peek(), b'Q');
    }
}
