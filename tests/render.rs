//! End-to-end render scenarios against synthetic documents.

mod common;

use common::{is_white, one_page_pdf, one_page_pdf_with, pixel, system_font};
use pdf_raster::{LoadOptions, Painter, PdfEngine};

fn render(pdf: Vec<u8>, w: usize, h: usize) -> Vec<u8> {
    render_with(pdf, w, h, LoadOptions::default())
}

fn render_with(pdf: Vec<u8>, w: usize, h: usize, options: LoadOptions) -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = PdfEngine::load(pdf, options).expect("load");
    let mut painter = Painter::new(w, h, 1);
    engine.render_page(0, &mut painter).expect("render");
    painter.buffer()
}

#[test]
fn buffer_shape_and_premultiplication() {
    let pdf = one_page_pdf((612.0, 792.0), b"0.2 0.4 0.6 rg 50 50 300 400 re f", "");
    let buf = render(pdf, 612, 792);
    assert_eq!(buf.len(), 612 * 792 * 4);
    for px in buf.chunks_exact(4) {
        assert!(px[0] <= px[3] && px[1] <= px[3] && px[2] <= px[3], "premultiplication violated");
    }
}

/// A short text run lands inside its expected box and the
/// rest of the page stays white. Needs a host-resolved face; skipped when
/// the machine has none.
#[test]
fn hello_world_text_lands_in_box() {
    let Some(font_bytes) = system_font() else {
        eprintln!("no system font found, skipping");
        return;
    };
    let pdf = one_page_pdf((612.0, 792.0), b"BT /F1 12 Tf 100 700 Td (Hi) Tj ET", "");
    let options = LoadOptions {
        font_resolver: Some(Box::new(move |_name| Some(font_bytes.clone()))),
        ..Default::default()
    };
    let buf = render_with(pdf, 612, 792, options);

    let mut min = (usize::MAX, usize::MAX);
    let mut max = (0usize, 0usize);
    let mut dark = 0usize;
    for y in 0..792 {
        for x in 0..612 {
            if !is_white(pixel(&buf, 612, x, y)) {
                min = (min.0.min(x), min.1.min(y));
                max = (max.0.max(x), max.1.max(y));
                dark += 1;
            }
        }
    }
    assert!(dark > 0, "no glyph pixels rendered");
    // generous bounds around the expected (100,83)..(124,99) device box,
    // font metrics vary between substitute faces
    assert!(min.0 >= 95 && max.0 <= 140, "x span {min:?}..{max:?}");
    assert!(min.1 >= 70 && max.1 <= 110, "y span {min:?}..{max:?}");
}

/// Even-odd fill leaves the inner rectangle unpainted.
#[test]
fn even_odd_donut() {
    let pdf = one_page_pdf(
        (612.0, 792.0),
        b"0 0 1 rg 100 100 400 400 re 150 150 300 300 re f*",
        "",
    );
    let buf = render(pdf, 612, 792);
    // device y = 792 - user y
    let ring = pixel(&buf, 612, 120, 792 - 120);
    let hole = pixel(&buf, 612, 300, 792 - 300);
    let outside = pixel(&buf, 612, 50, 792 - 50);
    assert_eq!(ring, [255, 0, 0, 255], "ring should be blue (BGRA)");
    assert!(is_white(hole), "inner square must stay white, got {hole:?}");
    assert!(is_white(outside));
}

/// An image under a circular clip; inside is red, the
/// rectangle corner outside the circle stays white.
#[test]
fn clipped_image() {
    // 2x2 solid red RGB image placed in a 60x60 square at (100,100),
    // clipped by a circle of radius 30 around (130,130)
    const K: f64 = 0.5523; // kappa for bezier circle approximation
    let r = 30.0;
    let (cx, cy) = (130.0, 130.0);
    let circle = format!(
        "{} {} m \
         {} {} {} {} {} {} c \
         {} {} {} {} {} {} c \
         {} {} {} {} {} {} c \
         {} {} {} {} {} {} c W n ",
        cx + r, cy,
        cx + r, cy + r * K, cx + r * K, cy + r, cx, cy + r,
        cx - r * K, cy + r, cx - r, cy + r * K, cx - r, cy,
        cx - r, cy - r * K, cx - r * K, cy - r, cx, cy - r,
        cx + r * K, cy - r, cx + r, cy - r * K, cx + r, cy,
    );
    let content = format!("q {circle} q 60 0 0 60 100 100 cm /Im0 Do Q Q");
    let image_obj = b"<< /Type /XObject /Subtype /Image /Width 2 /Height 2 \
        /BitsPerComponent 8 /ColorSpace /DeviceRGB /Length 12 >>\nstream\n\
        \xFF\x00\x00\xFF\x00\x00\xFF\x00\x00\xFF\x00\x00\nendstream"
        .to_vec();
    let pdf = one_page_pdf_with(
        (300.0, 300.0),
        content.as_bytes(),
        "/XObject << /Im0 5 0 R >>",
        &[image_obj],
        "",
    );
    let buf = render(pdf, 300, 300);
    let dev_y = |user: f64| 300 - user as usize;
    // centre of the circle: red
    assert_eq!(pixel(&buf, 300, 130, dev_y(130.0)), [0, 0, 255, 255]);
    // image corner (100,100) lies outside the circle: still white
    assert!(is_white(pixel(&buf, 300, 102, dev_y(102.0))));
    // outside the image entirely
    assert!(is_white(pixel(&buf, 300, 250, dev_y(250.0))));
}

/// An appended incremental update redefines the content
/// stream; the newer definition must win.
#[test]
fn incremental_update_override() {
    let mut pdf = one_page_pdf((200.0, 200.0), b"1 0 0 rg 20 20 100 100 re f", "");
    // replace object 4 with a green fill via an appended update
    let new_content = b"0 1 0 rg 20 20 100 100 re f";
    let mut body = format!("4 0 obj\n<< /Length {} >>\nstream\n", new_content.len()).into_bytes();
    body.extend_from_slice(new_content);
    body.extend_from_slice(b"\nendstream\nendobj\n");
    let offset = pdf.len();
    pdf.extend_from_slice(&body);
    let xref = pdf.len();
    pdf.extend_from_slice(b"xref\n4 1\n");
    pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    pdf.extend_from_slice(b"trailer\n<< /Size 5 /Root 1 0 R >>\n");
    pdf.extend_from_slice(format!("startxref\n{xref}\n%%EOF\n").as_bytes());

    let buf = render(pdf, 200, 200);
    // green in BGRA
    assert_eq!(pixel(&buf, 200, 60, 200 - 60), [0, 255, 0, 255]);
}

/// A stroked cubic must visibly depart from the straight
/// chord between its endpoints.
#[test]
fn bezier_fidelity() {
    let curve = one_page_pdf(
        (500.0, 300.0),
        b"2 w 0 0 0 RG 100 100 m 200 0 300 200 400 100 c S",
        "",
    );
    let line = one_page_pdf((500.0, 300.0), b"2 w 0 0 0 RG 100 100 m 400 100 l S", "");
    let buf_curve = render(curve, 500, 300);
    let buf_line = render(line, 500, 300);

    let dark = |buf: &[u8]| -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for y in 0..300 {
            for x in 0..500 {
                if !is_white(pixel(buf, 500, x, y)) {
                    out.push((x, y));
                }
            }
        }
        out
    };
    let curve_px = dark(&buf_curve);
    let line_px = dark(&buf_line);
    assert!(!curve_px.is_empty() && !line_px.is_empty());

    // pixels covered by one raster but not the other
    let curve_set: std::collections::HashSet<_> = curve_px.iter().copied().collect();
    let line_set: std::collections::HashSet<_> = line_px.iter().copied().collect();
    let differing = curve_set.symmetric_difference(&line_set).count();
    let affected = curve_set.union(&line_set).count();
    assert!(
        differing * 100 >= affected * 15,
        "curve and chord differ on only {differing}/{affected} pixels"
    );
    // and the curve must reach well away from y=100 (device 200)
    let max_dev = curve_px
        .iter()
        .map(|&(_, y)| (y as i64 - (300 - 100)).unsigned_abs())
        .max()
        .unwrap();
    assert!(max_dev > 20, "curve never left the chord (max deviation {max_dev})");
}

/// Rendering at /Rotate 90 equals rendering at 0 and rotating
/// the raster, within a 1-pixel tolerance along each scanline.
#[test]
fn rotate_consistency() {
    let content: &[u8] = b"0 0 1 rg 10 20 60 30 re f 1 0 0 rg 50 90 40 20 re f";
    let flat = one_page_pdf((100.0, 150.0), content, "");
    let rotated = one_page_pdf_with((100.0, 150.0), content, "", &[], "/Rotate 90");

    let buf0 = render(flat, 100, 150);
    let buf90 = render(rotated, 150, 100);

    // rotate buf0 by 90 degrees clockwise: (x, y) -> (h - 1 - y, x)
    let mut mismatches = 0usize;
    for y in 0..150usize {
        for x in 0..100usize {
            let src = pixel(&buf0, 100, x, y);
            let (rx, ry) = (150 - 1 - y, x);
            let dst = pixel(&buf90, 150, rx, ry);
            if src != dst {
                // tolerate 1px misalignment: accept a match in the
                // 3x3 neighbourhood
                let near = (-1i64..=1).any(|dy| {
                    (-1i64..=1).any(|dx| {
                        let nx = rx as i64 + dx;
                        let ny = ry as i64 + dy;
                        nx >= 0
                            && ny >= 0
                            && (nx as usize) < 150
                            && (ny as usize) < 100
                            && pixel(&buf90, 150, nx as usize, ny as usize) == src
                    })
                });
                if !near {
                    mismatches += 1;
                }
            }
        }
    }
    assert!(mismatches == 0, "{mismatches} pixels disagree after rotation");
}

/// Shading: an axial black-to-white gradient gets darker left to right.
#[test]
fn axial_shading_paints_gradient() {
    let shading_obj = b"<< /ShadingType 2 /ColorSpace /DeviceRGB \
        /Coords [0 0 200 0] /Extend [true true] \
        /Function << /FunctionType 2 /Domain [0 1] \
        /C0 [0 0 0] /C1 [1 1 1] /N 1 >> >>"
        .to_vec();
    let pdf = one_page_pdf_with(
        (200.0, 100.0),
        b"q 0 0 200 100 re W n /Sh0 sh Q",
        "/Shading << /Sh0 5 0 R >>",
        &[shading_obj],
        "",
    );
    let buf = render(pdf, 200, 100);
    let left = pixel(&buf, 200, 10, 50);
    let mid = pixel(&buf, 200, 100, 50);
    let right = pixel(&buf, 200, 190, 50);
    assert!(left[0] < 40, "left should be near black, got {left:?}");
    assert!(right[0] > 215, "right should be near white, got {right:?}");
    assert!(left[0] < mid[0] && mid[0] < right[0]);
}

/// Form XObjects translate their content by /Matrix and clip to /BBox.
#[test]
fn form_xobject_matrix_and_bbox() {
    let form = b"<< /Type /XObject /Subtype /Form /BBox [0 0 50 50] \
        /Matrix [1 0 0 1 100 100] /Length 24 >>\nstream\n\
        1 0 0 rg 0 0 80 80 re f \nendstream"
        .to_vec();
    let pdf = one_page_pdf_with(
        (300.0, 300.0),
        b"/Fm0 Do",
        "/XObject << /Fm0 5 0 R >>",
        &[form],
        "",
    );
    let buf = render(pdf, 300, 300);
    let dev_y = |user: usize| 300 - user;
    // inside the bbox after translation: red
    assert_eq!(pixel(&buf, 300, 120, dev_y(120)), [0, 0, 255, 255]);
    // the 80x80 fill is clipped at the 50x50 bbox
    assert!(is_white(pixel(&buf, 300, 170, dev_y(120))));
    // outside the form entirely
    assert!(is_white(pixel(&buf, 300, 50, dev_y(50))));
}

/// Unbalanced q operators must not corrupt later rendering.
#[test]
fn unbalanced_q_is_rebalanced() {
    let pdf = one_page_pdf((100.0, 100.0), b"q q q 1 0 0 rg 10 10 50 50 re f", "");
    let buf = render(pdf, 100, 100);
    assert_eq!(pixel(&buf, 100, 30, 100 - 30), [0, 0, 255, 255]);
}

/// Inline images draw through the same pipeline as Image XObjects.
#[test]
fn inline_image_draws() {
    let content =
        b"q 50 0 0 50 20 20 cm BI /W 1 /H 1 /CS /RGB /BPC 8 ID \x00\xFF\x00 EI Q".to_vec();
    let pdf = one_page_pdf((100.0, 100.0), &content, "");
    let buf = render(pdf, 100, 100);
    // green square (BGRA)
    assert_eq!(pixel(&buf, 100, 45, 100 - 45), [0, 255, 0, 255]);
    assert!(is_white(pixel(&buf, 100, 90, 100 - 90)));
}

/// Two renders of the same document must agree byte for byte.
#[test]
fn renders_are_reproducible() {
    let pdf = one_page_pdf(
        (200.0, 200.0),
        b"0.5 0.1 0.9 rg 30 30 100 120 re f 0 0 0 RG 3 w 20 20 m 180 180 l S",
        "",
    );
    let a = render(pdf.clone(), 200, 200);
    let b = render(pdf, 200, 200);
    assert_eq!(a, b);
}
