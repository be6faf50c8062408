use std::io::Read;

use flate2::read::ZlibDecoder;
use log::debug;

use crate::core::error::{PdfError, Result};
use crate::core::object::{Dict, Object};

/// Decode a stream payload through the chain declared by its dictionary.
///
/// Handles `/Filter` as a single name or an array, with `/DecodeParms`
/// (or the `/DP` abbreviation) aligned positionally. Only direct values are
/// read here; the document layer resolves indirect filter entries before
/// calling in.
pub fn decode_stream(dict: &Dict, data: &[u8]) -> Result<Vec<u8>> {
    decode_chain(data, &filter_chain(dict))
}

/// Extract the (filter name, params) chain from a stream dictionary.
pub fn filter_chain(dict: &Dict) -> Vec<(String, Option<Dict>)> {
    let filter = dict.get("Filter").or_else(|| dict.get("F"));
    let parms = dict.get("DecodeParms").or_else(|| dict.get("DP"));
    let mut out = Vec::new();
    match filter {
        Some(Object::Name(_)) => {
            let name = filter.unwrap().as_name().unwrap().to_string();
            let p = match parms {
                Some(Object::Dictionary(d)) => Some(d.clone()),
                _ => None,
            };
            out.push((name, p));
        }
        Some(Object::Array(names)) => {
            for (i, n) in names.iter().enumerate() {
                let Some(name) = n.as_name() else { continue };
                let p = match parms {
                    Some(Object::Array(ps)) => ps.get(i).and_then(|o| match o {
                        Object::Dictionary(d) => Some(d.clone()),
                        _ => None,
                    }),
                    Some(Object::Dictionary(d)) if names.len() == 1 => Some(d.clone()),
                    _ => None,
                };
                out.push((name.to_string(), p));
            }
        }
        _ => {}
    }
    out
}

/// Run `input` through a named filter chain.
pub fn decode_chain(input: &[u8], chain: &[(String, Option<Dict>)]) -> Result<Vec<u8>> {
    let mut data = input.to_vec();
    for (name, parms) in chain {
        data = decode_one(&data, name, parms.as_ref())?;
    }
    Ok(data)
}

/// Apply a single named filter. Pixel-producing filters (DCT, JPX, CCITT)
/// are identity here; the image decoder routes them to their codecs.
pub fn decode_one(input: &[u8], name: &str, parms: Option<&Dict>) -> Result<Vec<u8>> {
    let name = name.strip_prefix('/').unwrap_or(name);
    match name {
        "FlateDecode" | "Fl" => {
            let inflated = inflate(input).map_err(|e| PdfError::filter("FlateDecode", e))?;
            Ok(apply_predictor(inflated, parms))
        }
        "LZWDecode" | "LZW" => {
            let expanded = lzw_decode(input, parms)?;
            Ok(apply_predictor(expanded, parms))
        }
        "ASCII85Decode" | "A85" => Ok(ascii85_decode(input)),
        "ASCIIHexDecode" | "AHx" => Ok(ascii_hex_decode(input)),
        "RunLengthDecode" | "RL" => Ok(run_length_decode(input)),
        "DCTDecode" | "DCT" | "JPXDecode" | "CCITTFaxDecode" | "CCF" | "Crypt" => {
            Ok(input.to_vec())
        }
        other => {
            debug!("unknown filter {other}, passing through");
            Ok(input.to_vec())
        }
    }
}

/// zlib inflate.
pub fn inflate(input: &[u8]) -> std::result::Result<Vec<u8>, String> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(input.len() * 3);
    ZlibDecoder::new(input).read_to_end(&mut out).map_err(|e| e.to_string())?;
    Ok(out)
}

/// Inflate with window auto-detection: zlib-wrapped first, then raw deflate.
/// Some producers write streams without the zlib header.
pub fn inflate_any(input: &[u8]) -> std::result::Result<Vec<u8>, String> {
    match inflate(input) {
        Ok(out) if !out.is_empty() || input.is_empty() => Ok(out),
        _ => {
            let mut out = Vec::with_capacity(input.len() * 3);
            flate2::read::DeflateDecoder::new(input)
                .read_to_end(&mut out)
                .map_err(|e| e.to_string())?;
            Ok(out)
        }
    }
}

fn parm_i64(parms: Option<&Dict>, key: &str, default: i64) -> i64 {
    parms
        .and_then(|p| p.get(key))
        .and_then(|o| o.as_i64())
        .unwrap_or(default)
}

pub(crate) fn parm_bool(parms: Option<&Dict>, key: &str, default: bool) -> bool {
    parms
        .and_then(|p| p.get(key))
        .and_then(|o| o.as_bool())
        .unwrap_or(default)
}

/// Undo a PNG (10–15) or TIFF (2) predictor pass after Flate/LZW expansion.
fn apply_predictor(mut data: Vec<u8>, parms: Option<&Dict>) -> Vec<u8> {
    let predictor = parm_i64(parms, "Predictor", 1);
    if predictor <= 1 {
        return data;
    }
    let colors = parm_i64(parms, "Colors", 1).max(1) as usize;
    let bpc = parm_i64(parms, "BitsPerComponent", 8).max(1) as usize;
    let columns = parm_i64(parms, "Columns", 1).max(1) as usize;

    let bpp = (colors * bpc).div_ceil(8).max(1);
    let row_len = (colors * bpc * columns).div_ceil(8);
    if row_len == 0 {
        return data;
    }

    if predictor == 2 {
        // TIFF horizontal differencing (byte-aligned components only)
        if bpc >= 8 {
            let rows = data.len() / row_len;
            for r in 0..rows {
                let row = &mut data[r * row_len..(r + 1) * row_len];
                for x in bpp..row_len {
                    row[x] = row[x].wrapping_add(row[x - bpp]);
                }
            }
        }
        return data;
    }

    // PNG predictors: 1 filter-type byte per row
    let mut out = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; row_len];
    let mut i = 0usize;
    while i < data.len() {
        let ft = data[i];
        i += 1;
        if i + row_len > data.len() {
            out.extend_from_slice(&data[i..]);
            break;
        }
        let raw = &data[i..i + row_len];
        i += row_len;
        let mut row = vec![0u8; row_len];
        match ft {
            0 => row.copy_from_slice(raw),
            1 => {
                for x in 0..row_len {
                    let left = if x >= bpp { row[x - bpp] } else { 0 };
                    row[x] = raw[x].wrapping_add(left);
                }
            }
            2 => {
                for x in 0..row_len {
                    row[x] = raw[x].wrapping_add(prev[x]);
                }
            }
            3 => {
                for x in 0..row_len {
                    let left = if x >= bpp { row[x - bpp] as u16 } else { 0 };
                    row[x] = raw[x].wrapping_add(((left + prev[x] as u16) / 2) as u8);
                }
            }
            4 => {
                for x in 0..row_len {
                    let left = if x >= bpp { row[x - bpp] } else { 0 };
                    let up = prev[x];
                    let up_left = if x >= bpp { prev[x - bpp] } else { 0 };
                    row[x] = raw[x].wrapping_add(paeth(left, up, up_left));
                }
            }
            _ => row.copy_from_slice(raw),
        }
        out.extend_from_slice(&row);
        prev = row;
    }
    out
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i32 + b as i32 - c as i32;
    let pa = (p - a as i32).abs();
    let pb = (p - b as i32).abs();
    let pc = (p - c as i32).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Variable-width LZW (9 to 12 bits, clear=256, eod=257). PDF streams use
/// the TIFF "early change" convention unless /EarlyChange 0 says otherwise.
fn lzw_decode(input: &[u8], parms: Option<&Dict>) -> Result<Vec<u8>> {
    let early = parm_i64(parms, "EarlyChange", 1);
    let mut decoder = if early != 0 {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    };
    decoder
        .decode(input)
        .map_err(|e| PdfError::filter("LZWDecode", e.to_string()))
}

fn ascii85_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut tuple: u32 = 0;
    let mut count = 0usize;
    // optional <~ prefix
    let data = input.strip_prefix(b"<~").unwrap_or(input);
    let mut i = 0;
    while i < data.len() {
        let ch = data[i];
        i += 1;
        if ch == b'~' {
            break;
        }
        if ch == b'z' && count == 0 {
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }
        if !(b'!'..=b'u').contains(&ch) {
            continue;
        }
        tuple = tuple.wrapping_mul(85).wrapping_add((ch - b'!') as u32);
        count += 1;
        if count == 5 {
            out.extend_from_slice(&tuple.to_be_bytes());
            tuple = 0;
            count = 0;
        }
    }
    if count > 1 {
        for _ in count..5 {
            tuple = tuple.wrapping_mul(85).wrapping_add(84);
        }
        let bytes = tuple.to_be_bytes();
        out.extend_from_slice(&bytes[..count - 1]);
    }
    out
}

fn ascii_hex_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut nibble: Option<u8> = None;
    for &b in input {
        if b == b'>' {
            break;
        }
        let v = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            _ => continue,
        };
        match nibble.take() {
            Some(hi) => out.push(hi << 4 | v),
            None => nibble = Some(v),
        }
    }
    if let Some(hi) = nibble {
        out.push(hi << 4);
    }
    out
}

fn run_length_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < input.len() {
        let len = input[i];
        i += 1;
        if len == 128 {
            break;
        }
        if len < 128 {
            let count = len as usize + 1;
            if i + count > input.len() {
                break;
            }
            out.extend_from_slice(&input[i..i + count]);
            i += count;
        } else {
            if i >= input.len() {
                break;
            }
            let count = 257 - len as usize;
            out.extend(std::iter::repeat_n(input[i], count));
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut enc =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn flate_roundtrip() {
        let payload = b"BT /F1 12 Tf (Hello) Tj ET".repeat(20);
        let packed = deflate(&payload);
        let out = decode_one(&packed, "FlateDecode", None).unwrap();
        assert_eq!(out, payload);
        // slash-prefixed names work too
        let out = decode_one(&packed, "/FlateDecode", None).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn flate_failure_is_reported() {
        let err = decode_one(b"not zlib at all", "FlateDecode", None).unwrap_err();
        match err {
            PdfError::Filter { filter, .. } => assert_eq!(filter, "FlateDecode"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn png_up_predictor() {
        // two rows of 3 bytes, Up filter on second row
        let rows = vec![
            1u8, 10, 20, 30, // filter 1 (Sub): 10, 30, 60
            2, 5, 5, 5, // filter 2 (Up): +prev row
        ];
        let packed = deflate(&rows);
        let mut parms = Dict::new();
        parms.set("Predictor", Object::Integer(12));
        parms.set("Colors", Object::Integer(1));
        parms.set("BitsPerComponent", Object::Integer(8));
        parms.set("Columns", Object::Integer(3));
        let out = decode_one(&packed, "FlateDecode", Some(&parms)).unwrap();
        assert_eq!(out, vec![10, 30, 60, 15, 35, 65]);
    }

    #[test]
    fn tiff_predictor() {
        let rows = vec![10u8, 5, 5, 7, 1, 1];
        let packed = deflate(&rows);
        let mut parms = Dict::new();
        parms.set("Predictor", Object::Integer(2));
        parms.set("Columns", Object::Integer(3));
        let out = decode_one(&packed, "FlateDecode", Some(&parms)).unwrap();
        assert_eq!(out, vec![10, 15, 20, 7, 8, 9]);
    }

    #[test]
    fn ascii85_known_vector() {
        assert_eq!(ascii85_decode(b"<~87cUR~>"), b"easy");
        assert_eq!(ascii85_decode(b"87cUR~>"), b"easy");
        assert_eq!(ascii85_decode(b"z~>"), vec![0, 0, 0, 0]);
    }

    #[test]
    fn ascii_hex() {
        assert_eq!(ascii_hex_decode(b"48 65 6C 6C 6F>"), b"Hello");
        // odd nibble right-padded with zero
        assert_eq!(ascii_hex_decode(b"7>"), vec![0x70]);
    }

    #[test]
    fn run_length() {
        // literal run of 3, then 4x 0xAB, then EOD
        let src = [2u8, 1, 2, 3, 253, 0xAB, 128];
        assert_eq!(run_length_decode(&src), vec![1, 2, 3, 0xAB, 0xAB, 0xAB, 0xAB]);
    }

    #[test]
    fn chain_from_dict() {
        let mut dict = Dict::new();
        dict.set("Filter", Object::Array(vec![
            Object::Name("ASCIIHexDecode".into()),
            Object::Name("FlateDecode".into()),
        ]));
        let payload = b"stream payload bytes".to_vec();
        let packed = deflate(&payload);
        let hex: String = packed.iter().map(|b| format!("{b:02X}")).collect();
        let out = decode_stream(&dict, format!("{hex}>").as_bytes()).unwrap();
        assert_eq!(out, payload);
    }
}
