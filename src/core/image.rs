use std::sync::Arc;

use log::{debug, warn};

use crate::core::ccitt;
use crate::core::document::Document;
use crate::core::error::{PdfError, Result};
use crate::core::filters;
use crate::core::object::{Dict, Object, Stream};

/// A decoded Image XObject: premultiplied BGRA, row-major, no padding.
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub bgra: Vec<u8>,
}

#[derive(Debug, Clone)]
enum ColorSpace {
    Gray,
    Rgb,
    Cmyk,
    Lab,
    Indexed { base: Box<ColorSpace>, hival: u32, palette: Vec<u8> },
}

impl ColorSpace {
    fn components(&self) -> usize {
        match self {
            ColorSpace::Gray => 1,
            ColorSpace::Rgb | ColorSpace::Lab => 3,
            ColorSpace::Cmyk => 4,
            ColorSpace::Indexed { .. } => 1,
        }
    }
}

fn get<'a>(doc: &'a Document, dict: &'a Dict, keys: &[&str]) -> &'a Object {
    for k in keys {
        let v = doc.get(dict, k);
        if !v.is_null() {
            return v;
        }
    }
    &crate::core::object::NULL
}

/// Turn an Image XObject (or inline-image record) into premultiplied BGRA.
/// `stencil_rgb` is the current non-stroking colour, used when the stream is
/// an /ImageMask stencil.
pub fn decode_image(doc: &Document, stream: &Stream, stencil_rgb: [f64; 3]) -> Result<DecodedImage> {
    let dict = &stream.dict;
    let width = get(doc, dict, &["Width", "W"]).as_i64().unwrap_or(0) as usize;
    let height = get(doc, dict, &["Height", "H"]).as_i64().unwrap_or(0) as usize;
    if width == 0 || height == 0 || width > 1 << 15 || height > 1 << 15 {
        return Err(PdfError::Render(format!("bad image dimensions {width}x{height}")));
    }
    let bpc = get(doc, dict, &["BitsPerComponent", "BPC"]).as_i64().unwrap_or(8) as u32;
    let is_mask = get(doc, dict, &["ImageMask", "IM"]).as_bool().unwrap_or(false);

    let chain = doc.resolved_filter_chain(dict);
    let is_jpx = chain.iter().any(|(n, _)| n == "JPXDecode");
    let dct_at = chain.iter().position(|(n, _)| matches!(n.as_str(), "DCTDecode" | "DCT"));
    let ccitt_at = chain
        .iter()
        .position(|(n, _)| matches!(n.as_str(), "CCITTFaxDecode" | "CCF"));

    if is_jpx {
        // no in-process JPEG2000 codec; the image fails and renders blank
        return Err(PdfError::filter("JPXDecode", "no JPEG2000 codec available"));
    }

    // run every filter before the pixel codec
    let codec_at = dct_at.or(ccitt_at).unwrap_or(chain.len());
    let raw = filters::decode_chain(&stream.data, &chain[..codec_at])?;

    let mut alpha: Vec<u8> = Vec::new();

    // colour pipeline: either the JPEG codec hands us RGB8 directly, or we
    // unpack raw samples through the declared colour space
    let rgb: Vec<u8>;
    if dct_at.is_some() {
        let decoded = image::load_from_memory_with_format(&raw, image::ImageFormat::Jpeg)
            .map_err(|e| PdfError::filter("DCTDecode", e.to_string()))?;
        let (w, h) = (decoded.width() as usize, decoded.height() as usize);
        if w != width || h != height {
            debug!("jpeg dimensions {w}x{h} differ from dict {width}x{height}");
        }
        rgb = resample_rgb(&decoded.to_rgb8().into_raw(), w, h, width, height);
    } else {
        let samples = if let Some(i) = ccitt_at {
            let parms = chain[i].1.as_ref();
            let columns = parms
                .and_then(|p| p.get("Columns"))
                .and_then(|o| o.as_i64())
                .unwrap_or(1728) as usize;
            let k = parms
                .and_then(|p| p.get("K"))
                .and_then(|o| o.as_i64())
                .unwrap_or(0) as i32;
            let eol = filters::parm_bool(parms, "EndOfLine", false);
            let align = filters::parm_bool(parms, "EncodedByteAlign", false);
            let black_is_1 = filters::parm_bool(parms, "BlackIs1", false);
            let mut rows = ccitt::decode(&raw, columns, height, k, eol, align)
                .ok_or_else(|| PdfError::filter("CCITTFaxDecode", "decode failed"))?;
            if black_is_1 {
                for b in &mut rows {
                    *b = !*b;
                }
            }
            rows.resize(columns.div_ceil(8) * height, 0xFF);
            rows
        } else {
            raw
        };

        if is_mask {
            return Ok(stencil_to_bgra(doc, dict, &samples, width, height, stencil_rgb));
        }

        let cs = resolve_color_space(doc, get(doc, dict, &["ColorSpace", "CS"]))?;
        let ncomp = cs.components();
        let decode = decode_ranges(doc, dict, &cs, bpc, ncomp);
        rgb = unpack_to_rgb(&samples, width, height, bpc, &cs, &decode)?;

        // colour-key masking thresholds raw sample values
        if let Some(mask) = get(doc, dict, &["Mask"]).as_array() {
            if get(doc, dict, &["SMask"]).is_null() {
                alpha = color_key_alpha(&samples, width, height, bpc, ncomp, doc, mask);
            } else {
                warn!("image has both /Mask and /SMask, honouring /SMask");
            }
        }
    }

    // /SMask: grayscale alpha image, blended into any existing alpha
    if let Some(smask) = get(doc, dict, &["SMask"]).as_stream() {
        match decode_smask(doc, smask, width, height) {
            Ok(mask) => {
                if alpha.is_empty() {
                    alpha = mask;
                } else {
                    for (a, m) in alpha.iter_mut().zip(mask) {
                        *a = (*a as u16 * m as u16 / 255) as u8;
                    }
                }
            }
            Err(e) => debug!("smask decode failed: {e}"),
        }
    }

    // premultiply exactly once on the way out
    let mut bgra = Vec::with_capacity(width * height * 4);
    for i in 0..width * height {
        let a = alpha.get(i).copied().unwrap_or(255) as u16;
        let r = rgb.get(i * 3).copied().unwrap_or(0) as u16;
        let g = rgb.get(i * 3 + 1).copied().unwrap_or(0) as u16;
        let b = rgb.get(i * 3 + 2).copied().unwrap_or(0) as u16;
        bgra.push((b * a / 255) as u8);
        bgra.push((g * a / 255) as u8);
        bgra.push((r * a / 255) as u8);
        bgra.push(a as u8);
    }
    Ok(DecodedImage { width: width as u32, height: height as u32, bgra })
}

/// 1-bit stencil: painted bits take the current fill colour, the rest stay
/// fully transparent. /Decode [1 0] flips which bit paints.
fn stencil_to_bgra(
    doc: &Document,
    dict: &Dict,
    samples: &[u8],
    width: usize,
    height: usize,
    rgb: [f64; 3],
) -> DecodedImage {
    let invert = get(doc, dict, &["Decode", "D"])
        .as_array()
        .and_then(|a| a.first().map(|o| doc.resolve(o).as_f64().unwrap_or(0.0)))
        .map(|d0| d0 >= 0.5)
        .unwrap_or(false);
    let row_bytes = width.div_ceil(8);
    let (r, g, b) = (
        (rgb[0].clamp(0.0, 1.0) * 255.0) as u8,
        (rgb[1].clamp(0.0, 1.0) * 255.0) as u8,
        (rgb[2].clamp(0.0, 1.0) * 255.0) as u8,
    );
    let mut bgra = vec![0u8; width * height * 4];
    for y in 0..height {
        for x in 0..width {
            let byte = samples.get(y * row_bytes + x / 8).copied().unwrap_or(0xFF);
            let bit = byte >> (7 - x % 8) & 1;
            let paint = (bit == 0) != invert;
            if paint {
                let i = (y * width + x) * 4;
                bgra[i] = b;
                bgra[i + 1] = g;
                bgra[i + 2] = r;
                bgra[i + 3] = 255;
            }
        }
    }
    DecodedImage { width: width as u32, height: height as u32, bgra }
}

fn resolve_color_space(doc: &Document, obj: &Object) -> Result<ColorSpace> {
    match obj {
        Object::Name(_) => Ok(match obj.as_name().unwrap() {
            "DeviceGray" | "G" | "CalGray" => ColorSpace::Gray,
            "DeviceRGB" | "RGB" | "CalRGB" => ColorSpace::Rgb,
            "DeviceCMYK" | "CMYK" => ColorSpace::Cmyk,
            "Lab" => ColorSpace::Lab,
            other => {
                debug!("unknown colour space name /{other}, assuming DeviceRGB");
                ColorSpace::Rgb
            }
        }),
        Object::Array(items) => resolve_color_space_array(doc, items),
        Object::Null => Ok(ColorSpace::Gray),
        _ => Ok(ColorSpace::Rgb),
    }
}

fn resolve_color_space_array(doc: &Document, items: &[Object]) -> Result<ColorSpace> {
    let family = doc.resolve(items.first().unwrap_or(&Object::Null)).as_name().unwrap_or("");
    match family {
        "ICCBased" => {
            let n = items
                .get(1)
                .and_then(|o| doc.resolve(o).as_stream())
                .and_then(|s| doc.get(&s.dict, "N").as_i64());
            match n {
                Some(1) => Ok(ColorSpace::Gray),
                Some(4) => Ok(ColorSpace::Cmyk),
                Some(_) => Ok(ColorSpace::Rgb),
                None => {
                    // fall back through /Alternate
                    let alt = items
                        .get(1)
                        .and_then(|o| doc.resolve(o).as_stream())
                        .map(|s| doc.get(&s.dict, "Alternate").clone())
                        .unwrap_or(Object::Null);
                    resolve_color_space(doc, &alt)
                }
            }
        }
        "Indexed" | "I" => {
            let base =
                resolve_color_space(doc, doc.resolve(items.get(1).unwrap_or(&Object::Null)))?;
            let hival = items
                .get(2)
                .and_then(|o| doc.resolve(o).as_i64())
                .unwrap_or(0)
                .clamp(0, 255) as u32;
            let palette = match doc.resolve(items.get(3).unwrap_or(&Object::Null)) {
                Object::String(s) => s.clone(),
                Object::Stream(s) => doc.decode_stream(s),
                _ => Vec::new(),
            };
            Ok(ColorSpace::Indexed { base: Box::new(base), hival, palette })
        }
        "CalGray" => Ok(ColorSpace::Gray),
        "CalRGB" => Ok(ColorSpace::Rgb),
        "Lab" => Ok(ColorSpace::Lab),
        "DeviceN" | "Separation" => Ok(ColorSpace::Gray),
        other => {
            debug!("unsupported colour space family /{other}");
            Ok(ColorSpace::Rgb)
        }
    }
}

/// Per-component [min, max] ranges from /Decode, with standard defaults.
/// Indexed defaults to [0 2^bpc - 1] so raw samples pass through as
/// palette indices unchanged.
fn decode_ranges(
    doc: &Document,
    dict: &Dict,
    cs: &ColorSpace,
    bpc: u32,
    ncomp: usize,
) -> Vec<(f64, f64)> {
    let default: Vec<(f64, f64)> = match cs {
        ColorSpace::Indexed { .. } => vec![(0.0, ((1u64 << bpc) - 1) as f64)],
        _ => vec![(0.0, 1.0); ncomp],
    };
    let Some(arr) = get(doc, dict, &["Decode", "D"]).as_array() else {
        return default;
    };
    let vals: Vec<f64> = arr.iter().filter_map(|o| doc.resolve(o).as_f64()).collect();
    if vals.len() < ncomp * 2 {
        return default;
    }
    (0..ncomp).map(|i| (vals[i * 2], vals[i * 2 + 1])).collect()
}

/// Unpack `bpc`-bit samples row by row and convert to 8-bit RGB.
fn unpack_to_rgb(
    samples: &[u8],
    width: usize,
    height: usize,
    bpc: u32,
    cs: &ColorSpace,
    decode: &[(f64, f64)],
) -> Result<Vec<u8>> {
    if !matches!(bpc, 1 | 2 | 4 | 8 | 16) {
        return Err(PdfError::Render(format!("unsupported BitsPerComponent {bpc}")));
    }
    let ncomp = cs.components();
    let max = ((1u64 << bpc) - 1) as f64;
    let row_bits = width * ncomp * bpc as usize;
    let row_bytes = row_bits.div_ceil(8);

    // raw sample value in 0..=max
    let raw_of = |row: &[u8], i: usize| -> f64 {
        match bpc {
            8 => row.get(i).copied().unwrap_or(0) as f64,
            16 => {
                let hi = row.get(i * 2).copied().unwrap_or(0) as u32;
                let lo = row.get(i * 2 + 1).copied().unwrap_or(0) as u32;
                (hi << 8 | lo) as f64
            }
            _ => {
                let bit = i * bpc as usize;
                let byte = row.get(bit / 8).copied().unwrap_or(0);
                let shift = 8 - bpc as usize - bit % 8;
                (byte >> shift & ((1u16 << bpc) - 1) as u8) as f64
            }
        }
    };

    let mut rgb = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = samples.get(y * row_bytes..).unwrap_or(&[]);
        for x in 0..width {
            let mut comps = [0.0f64; 4];
            for (c, slot) in comps.iter_mut().take(ncomp).enumerate() {
                let raw = raw_of(row, x * ncomp + c);
                let (dmin, dmax) = decode.get(c).copied().unwrap_or((0.0, 1.0));
                *slot = dmin + raw * (dmax - dmin) / max;
            }
            let (r, g, b) = match cs {
                ColorSpace::Gray => {
                    let v = comps[0].clamp(0.0, 1.0);
                    (v, v, v)
                }
                ColorSpace::Rgb => (
                    comps[0].clamp(0.0, 1.0),
                    comps[1].clamp(0.0, 1.0),
                    comps[2].clamp(0.0, 1.0),
                ),
                ColorSpace::Cmyk => cmyk_to_rgb(comps[0], comps[1], comps[2], comps[3]),
                // approximation: luminance only, no chroma reconstruction
                ColorSpace::Lab => {
                    let scale = if decode.first().is_some_and(|d| d.1 > 1.0) { 100.0 } else { 1.0 };
                    let v = (comps[0] / scale).clamp(0.0, 1.0);
                    (v, v, v)
                }
                ColorSpace::Indexed { base, hival, palette } => {
                    let idx = comps[0].round().clamp(0.0, *hival as f64) as usize;
                    palette_rgb(base, palette, idx)
                }
            };
            rgb.push((r * 255.0 + 0.5) as u8);
            rgb.push((g * 255.0 + 0.5) as u8);
            rgb.push((b * 255.0 + 0.5) as u8);
        }
    }
    Ok(rgb)
}

fn cmyk_to_rgb(c: f64, m: f64, y: f64, k: f64) -> (f64, f64, f64) {
    (
        ((1.0 - c) * (1.0 - k)).clamp(0.0, 1.0),
        ((1.0 - m) * (1.0 - k)).clamp(0.0, 1.0),
        ((1.0 - y) * (1.0 - k)).clamp(0.0, 1.0),
    )
}

fn palette_rgb(base: &ColorSpace, palette: &[u8], index: usize) -> (f64, f64, f64) {
    let n = base.components();
    let at = |i: usize| palette.get(index * n + i).copied().unwrap_or(0) as f64 / 255.0;
    match base {
        ColorSpace::Gray => {
            let v = at(0);
            (v, v, v)
        }
        ColorSpace::Cmyk => cmyk_to_rgb(at(0), at(1), at(2), at(3)),
        _ => (at(0), at(1), at(2)),
    }
}

/// Colour-key masking: a pixel is transparent when every raw component
/// falls inside its [min max] range.
fn color_key_alpha(
    samples: &[u8],
    width: usize,
    height: usize,
    bpc: u32,
    ncomp: usize,
    doc: &Document,
    mask: &[Object],
) -> Vec<u8> {
    let ranges: Vec<i64> = mask.iter().filter_map(|o| doc.resolve(o).as_i64()).collect();
    if ranges.len() < ncomp * 2 {
        return Vec::new();
    }
    let row_bits = width * ncomp * bpc as usize;
    let row_bytes = row_bits.div_ceil(8);
    let mut alpha = vec![255u8; width * height];
    for y in 0..height {
        let row = samples.get(y * row_bytes..).unwrap_or(&[]);
        for x in 0..width {
            let mut masked = true;
            for c in 0..ncomp {
                let i = x * ncomp + c;
                let raw = match bpc {
                    8 => row.get(i).copied().unwrap_or(0) as i64,
                    16 => {
                        let hi = row.get(i * 2).copied().unwrap_or(0) as i64;
                        let lo = row.get(i * 2 + 1).copied().unwrap_or(0) as i64;
                        hi << 8 | lo
                    }
                    _ => {
                        let bit = i * bpc as usize;
                        let byte = row.get(bit / 8).copied().unwrap_or(0);
                        let shift = 8 - bpc as usize - bit % 8;
                        (byte >> shift & ((1u16 << bpc) - 1) as u8) as i64
                    }
                };
                if raw < ranges[c * 2] || raw > ranges[c * 2 + 1] {
                    masked = false;
                    break;
                }
            }
            if masked {
                alpha[y * width + x] = 0;
            }
        }
    }
    alpha
}

/// Decode an /SMask stream as grayscale alpha at the base image's size.
fn decode_smask(doc: &Document, smask: &Stream, width: usize, height: usize) -> Result<Vec<u8>> {
    let img = decode_image(doc, smask, [0.0, 0.0, 0.0])?;
    let (sw, sh) = (img.width as usize, img.height as usize);
    let mut out = vec![255u8; width * height];
    for y in 0..height {
        for x in 0..width {
            let sx = (x * sw / width.max(1)).min(sw.saturating_sub(1));
            let sy = (y * sh / height.max(1)).min(sh.saturating_sub(1));
            let i = (sy * sw + sx) * 4;
            // the smask decoded to gray with alpha 255, any channel works
            out[y * width + x] = img.bgra.get(i).copied().unwrap_or(255);
        }
    }
    Ok(out)
}

/// Nearest-neighbour resample used when a JPEG's intrinsic size differs
/// from the dictionary's.
fn resample_rgb(rgb: &[u8], sw: usize, sh: usize, dw: usize, dh: usize) -> Vec<u8> {
    if sw == dw && sh == dh {
        return rgb.to_vec();
    }
    if sw == 0 || sh == 0 {
        return vec![0; dw * dh * 3];
    }
    let mut out = vec![0u8; dw * dh * 3];
    for y in 0..dh {
        for x in 0..dw {
            let sx = (x * sw / dw.max(1)).min(sw - 1);
            let sy = (y * sh / dh.max(1)).min(sh - 1);
            let s = (sy * sw + sx) * 3;
            let d = (y * dw + x) * 3;
            out[d..d + 3].copy_from_slice(&rgb[s..s + 3]);
        }
    }
    out
}

/// Wrap a `BI … ID` inline-image record so the decoder above can run
/// unchanged on its abbreviated keys.
pub fn inline_image_stream(dict: Dict, data: Vec<u8>) -> Stream {
    Stream { dict, data: Arc::new(data) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::{Document, LoadOptions};
    use crate::core::testutil;

    fn dummy_doc() -> Document {
        Document::load(testutil::minimal_pdf(b"BT ET"), LoadOptions::default()).unwrap()
    }

    fn stream_of(pairs: &[(&str, Object)], data: Vec<u8>) -> Stream {
        Stream::new(testutil::dict(pairs), data)
    }

    #[test]
    fn gray8_image() {
        let doc = dummy_doc();
        let s = stream_of(
            &[
                ("Width", testutil::int(2)),
                ("Height", testutil::int(1)),
                ("BitsPerComponent", testutil::int(8)),
                ("ColorSpace", testutil::name("DeviceGray")),
            ],
            vec![0, 255],
        );
        let img = decode_image(&doc, &s, [0.0; 3]).unwrap();
        assert_eq!(img.width, 2);
        assert_eq!(&img.bgra[..4], &[0, 0, 0, 255]);
        assert_eq!(&img.bgra[4..8], &[255, 255, 255, 255]);
    }

    #[test]
    fn decode_array_inverts() {
        let doc = dummy_doc();
        let s = stream_of(
            &[
                ("Width", testutil::int(1)),
                ("Height", testutil::int(1)),
                ("BitsPerComponent", testutil::int(8)),
                ("ColorSpace", testutil::name("DeviceGray")),
                ("Decode", testutil::array(vec![testutil::int(1), testutil::int(0)])),
            ],
            vec![0],
        );
        let img = decode_image(&doc, &s, [0.0; 3]).unwrap();
        assert_eq!(&img.bgra[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn cmyk_conversion() {
        let doc = dummy_doc();
        // pure cyan: r=0 g=255 b=255
        let s = stream_of(
            &[
                ("Width", testutil::int(1)),
                ("Height", testutil::int(1)),
                ("BitsPerComponent", testutil::int(8)),
                ("ColorSpace", testutil::name("DeviceCMYK")),
            ],
            vec![255, 0, 0, 0],
        );
        let img = decode_image(&doc, &s, [0.0; 3]).unwrap();
        assert_eq!(&img.bgra[..4], &[255, 255, 0, 255]);
    }

    #[test]
    fn indexed_palette() {
        let doc = dummy_doc();
        let cs = testutil::array(vec![
            testutil::name("Indexed"),
            testutil::name("DeviceRGB"),
            testutil::int(1),
            Object::String(vec![255, 0, 0, 0, 0, 255]), // red, blue
        ]);
        let s = stream_of(
            &[
                ("Width", testutil::int(2)),
                ("Height", testutil::int(1)),
                ("BitsPerComponent", testutil::int(8)),
                ("ColorSpace", cs),
            ],
            vec![0, 1],
        );
        let img = decode_image(&doc, &s, [0.0; 3]).unwrap();
        // BGRA: red then blue
        assert_eq!(&img.bgra[..4], &[0, 0, 255, 255]);
        assert_eq!(&img.bgra[4..8], &[255, 0, 0, 255]);
    }

    #[test]
    fn one_bit_stencil_paints_fill_colour() {
        let doc = dummy_doc();
        let s = stream_of(
            &[
                ("Width", testutil::int(8)),
                ("Height", testutil::int(1)),
                ("ImageMask", Object::Boolean(true)),
                ("BitsPerComponent", testutil::int(1)),
            ],
            vec![0b0101_0101],
        );
        let img = decode_image(&doc, &s, [1.0, 0.0, 0.0]).unwrap();
        // bit 0 paints red, bit 1 transparent
        assert_eq!(&img.bgra[..4], &[0, 0, 255, 255]);
        assert_eq!(img.bgra[7], 0);
    }

    #[test]
    fn smask_becomes_alpha() {
        let mut b = testutil::PdfBuilder::new();
        let smask = b.stream(
            testutil::dict(&[
                ("Type", testutil::name("XObject")),
                ("Subtype", testutil::name("Image")),
                ("Width", testutil::int(1)),
                ("Height", testutil::int(1)),
                ("BitsPerComponent", testutil::int(8)),
                ("ColorSpace", testutil::name("DeviceGray")),
            ]),
            vec![128],
        );
        let image = b.stream(
            testutil::dict(&[
                ("Width", testutil::int(1)),
                ("Height", testutil::int(1)),
                ("BitsPerComponent", testutil::int(8)),
                ("ColorSpace", testutil::name("DeviceRGB")),
                ("SMask", testutil::reference(smask)),
            ]),
            vec![255, 255, 255],
        );
        let c = b.stream(Dict::new(), b"BT ET".to_vec());
        b.page(612.0, 792.0, c);
        let doc = Document::load(b.build(), LoadOptions::default()).unwrap();
        let s = doc.resolve_ref(crate::core::object::ObjRef { num: image, generation: 0 });
        let img = decode_image(&doc, s.as_stream().unwrap(), [0.0; 3]).unwrap();
        // premultiplied white at ~50% alpha
        assert_eq!(img.bgra[3], 128);
        assert!((img.bgra[0] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn jpx_fails_cleanly() {
        let doc = dummy_doc();
        let s = stream_of(
            &[
                ("Width", testutil::int(4)),
                ("Height", testutil::int(4)),
                ("Filter", testutil::name("JPXDecode")),
            ],
            vec![0; 16],
        );
        assert!(decode_image(&doc, &s, [0.0; 3]).is_err());
    }
}
