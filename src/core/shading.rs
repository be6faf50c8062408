//! PDF functions (sampled, exponential, stitching) and the axial/radial
//! shading types built on them.

use log::debug;

use crate::core::document::Document;
use crate::core::object::{Dict, Object};

/// A one-input PDF function, evaluated per colour lookup.
pub enum PdfFunction {
    /// Type 0: sampled values with linear interpolation
    Sampled {
        domain: (f64, f64),
        size: usize,
        bps: u32,
        n_out: usize,
        samples: Vec<u8>,
        encode: (f64, f64),
        decode: Vec<(f64, f64)>,
    },
    /// Type 2: exponential interpolation between C0 and C1
    Exponential { domain: (f64, f64), c0: Vec<f64>, c1: Vec<f64>, n: f64 },
    /// Type 3: stitching of subfunctions over /Bounds
    Stitching {
        domain: (f64, f64),
        functions: Vec<PdfFunction>,
        bounds: Vec<f64>,
        encode: Vec<(f64, f64)>,
    },
}

fn floats(doc: &Document, obj: &Object) -> Vec<f64> {
    obj.as_array()
        .map(|a| a.iter().filter_map(|o| doc.resolve(o).as_f64()).collect())
        .unwrap_or_default()
}

impl PdfFunction {
    pub fn parse(doc: &Document, obj: &Object) -> Option<PdfFunction> {
        let obj = doc.resolve(obj);
        let dict = obj.as_dict()?;
        let ty = doc.get(dict, "FunctionType").as_i64()?;
        let domain = floats(doc, doc.get(dict, "Domain"));
        let domain = (
            domain.first().copied().unwrap_or(0.0),
            domain.get(1).copied().unwrap_or(1.0),
        );
        match ty {
            0 => {
                let stream = obj.as_stream()?;
                let samples = doc.decode_stream(stream);
                let size = floats(doc, doc.get(dict, "Size"))
                    .first()
                    .copied()
                    .unwrap_or(2.0) as usize;
                let bps = doc.get(dict, "BitsPerSample").as_i64().unwrap_or(8) as u32;
                let range = floats(doc, doc.get(dict, "Range"));
                let n_out = (range.len() / 2).max(1);
                let encode = floats(doc, doc.get(dict, "Encode"));
                let encode = (
                    encode.first().copied().unwrap_or(0.0),
                    encode.get(1).copied().unwrap_or(size.saturating_sub(1) as f64),
                );
                let decode_vals = floats(doc, doc.get(dict, "Decode"));
                let decode: Vec<(f64, f64)> = if decode_vals.len() >= n_out * 2 {
                    (0..n_out).map(|i| (decode_vals[i * 2], decode_vals[i * 2 + 1])).collect()
                } else {
                    (0..n_out)
                        .map(|i| {
                            (
                                range.get(i * 2).copied().unwrap_or(0.0),
                                range.get(i * 2 + 1).copied().unwrap_or(1.0),
                            )
                        })
                        .collect()
                };
                Some(PdfFunction::Sampled { domain, size, bps, n_out, samples, encode, decode })
            }
            2 => {
                let c0 = floats(doc, doc.get(dict, "C0"));
                let c1 = floats(doc, doc.get(dict, "C1"));
                let n = doc.get(dict, "N").as_f64().unwrap_or(1.0);
                let c0 = if c0.is_empty() { vec![0.0] } else { c0 };
                let c1 = if c1.is_empty() { vec![1.0] } else { c1 };
                Some(PdfFunction::Exponential { domain, c0, c1, n })
            }
            3 => {
                let funcs = doc.get(dict, "Functions").as_array()?.to_vec();
                let functions: Vec<PdfFunction> =
                    funcs.iter().filter_map(|f| PdfFunction::parse(doc, f)).collect();
                if functions.is_empty() {
                    return None;
                }
                let bounds = floats(doc, doc.get(dict, "Bounds"));
                let encode_vals = floats(doc, doc.get(dict, "Encode"));
                let encode: Vec<(f64, f64)> = (0..functions.len())
                    .map(|i| {
                        (
                            encode_vals.get(i * 2).copied().unwrap_or(0.0),
                            encode_vals.get(i * 2 + 1).copied().unwrap_or(1.0),
                        )
                    })
                    .collect();
                Some(PdfFunction::Stitching { domain, functions, bounds, encode })
            }
            other => {
                debug!("unsupported function type {other}");
                None
            }
        }
    }

    /// Evaluate at `t`, clamped to the function domain.
    pub fn eval(&self, t: f64) -> Vec<f64> {
        match self {
            PdfFunction::Sampled { domain, size, bps, n_out, samples, encode, decode } => {
                let t = t.clamp(domain.0.min(domain.1), domain.0.max(domain.1));
                let span = domain.1 - domain.0;
                let u = if span.abs() < 1e-12 { 0.0 } else { (t - domain.0) / span };
                let e = encode.0 + u * (encode.1 - encode.0);
                let e = e.clamp(0.0, size.saturating_sub(1) as f64);
                let i0 = e.floor() as usize;
                let i1 = (i0 + 1).min(size.saturating_sub(1));
                let frac = e - i0 as f64;
                let max = ((1u64 << bps) - 1) as f64;
                let read = |sample: usize, comp: usize| -> f64 {
                    let idx = sample * n_out + comp;
                    let bit = idx * *bps as usize;
                    match bps {
                        8 => samples.get(idx).copied().unwrap_or(0) as f64 / max,
                        16 => {
                            let hi = samples.get(idx * 2).copied().unwrap_or(0) as u32;
                            let lo = samples.get(idx * 2 + 1).copied().unwrap_or(0) as u32;
                            (hi << 8 | lo) as f64 / max
                        }
                        _ => {
                            let byte = samples.get(bit / 8).copied().unwrap_or(0);
                            let shift = 8usize.saturating_sub(*bps as usize + bit % 8);
                            (byte >> shift & ((1u16 << bps) - 1) as u8) as f64 / max
                        }
                    }
                };
                (0..*n_out)
                    .map(|c| {
                        let v = read(i0, c) * (1.0 - frac) + read(i1, c) * frac;
                        let (dmin, dmax) = decode.get(c).copied().unwrap_or((0.0, 1.0));
                        dmin + v * (dmax - dmin)
                    })
                    .collect()
            }
            PdfFunction::Exponential { domain, c0, c1, n } => {
                let t = t.clamp(domain.0.min(domain.1), domain.0.max(domain.1));
                let span = domain.1 - domain.0;
                let u = if span.abs() < 1e-12 { 0.0 } else { (t - domain.0) / span };
                let p = u.powf(*n);
                c0.iter()
                    .zip(c1.iter().chain(std::iter::repeat(&0.0)))
                    .map(|(a, b)| a + p * (b - a))
                    .collect()
            }
            PdfFunction::Stitching { domain, functions, bounds, encode } => {
                let t = t.clamp(domain.0.min(domain.1), domain.0.max(domain.1));
                let mut k = 0usize;
                while k < bounds.len() && t >= bounds[k] {
                    k += 1;
                }
                let k = k.min(functions.len() - 1);
                let lo = if k == 0 { domain.0 } else { bounds[k - 1] };
                let hi = if k < bounds.len() { bounds[k] } else { domain.1 };
                let span = hi - lo;
                let u = if span.abs() < 1e-12 { 0.0 } else { (t - lo) / span };
                let (e0, e1) = encode.get(k).copied().unwrap_or((0.0, 1.0));
                functions[k].eval(e0 + u * (e1 - e0))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ShadingKind {
    /// Type 2: colour varies along the axis (x0,y0)-(x1,y1)
    Axial { x0: f64, y0: f64, x1: f64, y1: f64 },
    /// Type 3: interpolation between two circles
    Radial { x0: f64, y0: f64, r0: f64, x1: f64, y1: f64, r1: f64 },
}

/// An axial or radial shading plus its colour function.
pub struct Shading {
    pub kind: ShadingKind,
    functions: Vec<PdfFunction>,
    pub domain: (f64, f64),
    pub extend: (bool, bool),
    ncomp: usize,
}

impl Shading {
    pub fn parse(doc: &Document, dict: &Dict) -> Option<Shading> {
        let ty = doc.get(dict, "ShadingType").as_i64()?;
        let coords = floats(doc, doc.get(dict, "Coords"));
        let kind = match ty {
            2 if coords.len() >= 4 => ShadingKind::Axial {
                x0: coords[0],
                y0: coords[1],
                x1: coords[2],
                y1: coords[3],
            },
            3 if coords.len() >= 6 => ShadingKind::Radial {
                x0: coords[0],
                y0: coords[1],
                r0: coords[2],
                x1: coords[3],
                y1: coords[4],
                r1: coords[5],
            },
            other => {
                debug!("unsupported shading type {other}");
                return None;
            }
        };
        let domain = floats(doc, doc.get(dict, "Domain"));
        let domain = (
            domain.first().copied().unwrap_or(0.0),
            domain.get(1).copied().unwrap_or(1.0),
        );
        let extend = doc
            .get(dict, "Extend")
            .as_array()
            .map(|a| {
                (
                    a.first().and_then(|o| o.as_bool()).unwrap_or(false),
                    a.get(1).and_then(|o| o.as_bool()).unwrap_or(false),
                )
            })
            .unwrap_or((false, false));

        let ncomp = match doc.get(dict, "ColorSpace") {
            Object::Name(_) => match doc.get(dict, "ColorSpace").as_name() {
                Some("DeviceGray") | Some("CalGray") => 1,
                Some("DeviceCMYK") => 4,
                _ => 3,
            },
            Object::Array(a) => match a.first().and_then(|o| doc.resolve(o).as_name()) {
                Some("ICCBased") => a
                    .get(1)
                    .and_then(|o| doc.resolve(o).as_stream())
                    .and_then(|s| doc.get(&s.dict, "N").as_i64())
                    .unwrap_or(3) as usize,
                Some("CalGray") => 1,
                _ => 3,
            },
            _ => 3,
        };

        // /Function: single function or one per component
        let functions = match doc.get(dict, "Function") {
            Object::Array(items)
                if items
                    .iter()
                    .all(|o| doc.resolve(o).as_dict().is_some_and(|d| d.contains_key("FunctionType"))) =>
            {
                items.iter().filter_map(|f| PdfFunction::parse(doc, f)).collect()
            }
            f => PdfFunction::parse(doc, f).map(|f| vec![f]).unwrap_or_default(),
        };
        if functions.is_empty() {
            return None;
        }
        Some(Shading { kind, functions, domain, extend, ncomp })
    }

    /// Colour for a point in shading space; None when the point is outside
    /// the (non-extended) gradient.
    pub fn color_at(&self, x: f64, y: f64) -> Option<[f64; 3]> {
        let s = match self.kind {
            ShadingKind::Axial { x0, y0, x1, y1 } => {
                let dx = x1 - x0;
                let dy = y1 - y0;
                let len2 = dx * dx + dy * dy;
                if len2 < 1e-12 {
                    return None;
                }
                ((x - x0) * dx + (y - y0) * dy) / len2
            }
            ShadingKind::Radial { x0, y0, r0, x1, y1, r1 } => {
                self.radial_param(x, y, x0, y0, r0, x1, y1, r1)?
            }
        };
        let s = match (s < 0.0, s > 1.0) {
            (true, _) if !self.extend.0 => return None,
            (_, true) if !self.extend.1 => return None,
            _ => s.clamp(0.0, 1.0),
        };
        let t = self.domain.0 + s * (self.domain.1 - self.domain.0);
        Some(self.color_at_t(t))
    }

    /// Evaluate the colour function(s) at a domain value.
    pub fn color_at_t(&self, t: f64) -> [f64; 3] {
        let comps: Vec<f64> = if self.functions.len() > 1 {
            self.functions.iter().map(|f| f.eval(t).first().copied().unwrap_or(0.0)).collect()
        } else {
            self.functions[0].eval(t)
        };
        components_to_rgb(&comps, self.ncomp)
    }

    /// Largest s with |p - c(s)| = r(s), honouring r(s) >= 0.
    #[allow(clippy::too_many_arguments)]
    fn radial_param(
        &self,
        px: f64,
        py: f64,
        x0: f64,
        y0: f64,
        r0: f64,
        x1: f64,
        y1: f64,
        r1: f64,
    ) -> Option<f64> {
        // solve |p - (c0 + s*dc)|^2 = (r0 + s*dr)^2 for s, prefer the
        // larger root (outermost circle), matching PDF's painting order
        let dcx = x1 - x0;
        let dcy = y1 - y0;
        let dr = r1 - r0;
        let fx = px - x0;
        let fy = py - y0;
        let a = dcx * dcx + dcy * dcy - dr * dr;
        let b = fx * dcx + fy * dcy + r0 * dr;
        let c = fx * fx + fy * fy - r0 * r0;
        if a.abs() < 1e-9 {
            if b.abs() < 1e-12 {
                return None;
            }
            let s = c / (2.0 * b);
            return (r0 + s * dr >= 0.0).then_some(s);
        }
        let disc = b * b - a * c;
        if disc < 0.0 {
            return None;
        }
        let sq = disc.sqrt();
        let s1 = (b + sq) / a;
        let s2 = (b - sq) / a;
        for s in [s1.max(s2), s1.min(s2)] {
            if r0 + s * dr >= 0.0 {
                return Some(s);
            }
        }
        None
    }
}

fn components_to_rgb(comps: &[f64], ncomp: usize) -> [f64; 3] {
    match ncomp {
        1 => {
            let v = comps.first().copied().unwrap_or(0.0).clamp(0.0, 1.0);
            [v, v, v]
        }
        4 => {
            let c = comps.first().copied().unwrap_or(0.0);
            let m = comps.get(1).copied().unwrap_or(0.0);
            let y = comps.get(2).copied().unwrap_or(0.0);
            let k = comps.get(3).copied().unwrap_or(0.0);
            [
                ((1.0 - c) * (1.0 - k)).clamp(0.0, 1.0),
                ((1.0 - m) * (1.0 - k)).clamp(0.0, 1.0),
                ((1.0 - y) * (1.0 - k)).clamp(0.0, 1.0),
            ]
        }
        _ => [
            comps.first().copied().unwrap_or(0.0).clamp(0.0, 1.0),
            comps.get(1).copied().unwrap_or(0.0).clamp(0.0, 1.0),
            comps.get(2).copied().unwrap_or(0.0).clamp(0.0, 1.0),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_midpoint() {
        let f = PdfFunction::Exponential {
            domain: (0.0, 1.0),
            c0: vec![0.0, 0.0, 0.0],
            c1: vec![1.0, 0.5, 0.0],
            n: 1.0,
        };
        let v = f.eval(0.5);
        assert!((v[0] - 0.5).abs() < 1e-9);
        assert!((v[1] - 0.25).abs() < 1e-9);
        assert!(v[2].abs() < 1e-9);
    }

    #[test]
    fn stitching_selects_subfunction() {
        let f = PdfFunction::Stitching {
            domain: (0.0, 1.0),
            functions: vec![
                PdfFunction::Exponential {
                    domain: (0.0, 1.0),
                    c0: vec![0.0],
                    c1: vec![0.5],
                    n: 1.0,
                },
                PdfFunction::Exponential {
                    domain: (0.0, 1.0),
                    c0: vec![0.5],
                    c1: vec![1.0],
                    n: 1.0,
                },
            ],
            bounds: vec![0.5],
            encode: vec![(0.0, 1.0), (0.0, 1.0)],
        };
        assert!((f.eval(0.25)[0] - 0.25).abs() < 1e-9);
        assert!((f.eval(0.75)[0] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn sampled_interpolates() {
        let f = PdfFunction::Sampled {
            domain: (0.0, 1.0),
            size: 2,
            bps: 8,
            n_out: 1,
            samples: vec![0, 255],
            encode: (0.0, 1.0),
            decode: vec![(0.0, 1.0)],
        };
        assert!((f.eval(0.5)[0] - 0.5).abs() < 0.01);
        assert!(f.eval(0.0)[0].abs() < 1e-9);
        assert!((f.eval(1.0)[0] - 1.0).abs() < 1e-9);
    }
}
