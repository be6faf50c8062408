//! Simple-font encoding tables: code to Unicode for the standard byte
//! encodings and glyph-name lookup for /Differences processing.

/// WinAnsiEncoding (cp1252) to Unicode.
pub const WIN_ANSI: [u16; 256] = {
    let mut t = [0u16; 256];
    let mut i = 32;
    while i < 128 {
        t[i] = i as u16;
        i += 1;
    }
    let high: [u16; 32] = [
        0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
        0x0152, 0, 0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014, 0x02DC,
        0x2122, 0x0161, 0x203A, 0x0153, 0, 0x017E, 0x0178,
    ];
    let mut i = 0;
    while i < 32 {
        t[128 + i] = high[i];
        i += 1;
    }
    let mut i = 160;
    while i < 256 {
        t[i] = i as u16;
        i += 1;
    }
    t
};

/// MacRomanEncoding to Unicode.
pub const MAC_ROMAN: [u16; 256] = {
    let mut t = [0u16; 256];
    let mut i = 32;
    while i < 128 {
        t[i] = i as u16;
        i += 1;
    }
    let high: [u16; 128] = [
        0x00C4, 0x00C5, 0x00C7, 0x00C9, 0x00D1, 0x00D6, 0x00DC, 0x00E1, 0x00E0, 0x00E2, 0x00E4,
        0x00E3, 0x00E5, 0x00E7, 0x00E9, 0x00E8, 0x00EA, 0x00EB, 0x00ED, 0x00EC, 0x00EE, 0x00EF,
        0x00F1, 0x00F3, 0x00F2, 0x00F4, 0x00F6, 0x00F5, 0x00FA, 0x00F9, 0x00FB, 0x00FC, 0x2020,
        0x00B0, 0x00A2, 0x00A3, 0x00A7, 0x2022, 0x00B6, 0x00DF, 0x00AE, 0x00A9, 0x2122, 0x00B4,
        0x00A8, 0x2260, 0x00C6, 0x00D8, 0x221E, 0x00B1, 0x2264, 0x2265, 0x00A5, 0x00B5, 0x2202,
        0x2211, 0x220F, 0x03C0, 0x222B, 0x00AA, 0x00BA, 0x03A9, 0x00E6, 0x00F8, 0x00BF, 0x00A1,
        0x00AC, 0x221A, 0x0192, 0x2248, 0x2206, 0x00AB, 0x00BB, 0x2026, 0x00A0, 0x00C0, 0x00C3,
        0x00D5, 0x0152, 0x0153, 0x2013, 0x2014, 0x201C, 0x201D, 0x2018, 0x2019, 0x00F7, 0x25CA,
        0x00FF, 0x0178, 0x2044, 0x20AC, 0x2039, 0x203A, 0xFB01, 0xFB02, 0x2021, 0x00B7, 0x201A,
        0x201E, 0x2030, 0x00C2, 0x00CA, 0x00C1, 0x00CB, 0x00C8, 0x00CD, 0x00CE, 0x00CF, 0x00CC,
        0x00D3, 0x00D4, 0xF8FF, 0x00D2, 0x00DA, 0x00DB, 0x00D9, 0x0131, 0x02C6, 0x02DC, 0x00AF,
        0x02D8, 0x02D9, 0x02DA, 0x00B8, 0x02DD, 0x02DB, 0x02C7,
    ];
    let mut i = 0;
    while i < 128 {
        t[128 + i] = high[i];
        i += 1;
    }
    t
};

/// Adobe StandardEncoding to Unicode. Unlike WinAnsi, 0x27 and 0x60 are the
/// typographic quotes, and the high half is the sparse Adobe set (ligatures,
/// accents, dashes) rather than Latin-1.
pub const STANDARD: [u16; 256] = {
    let mut t = [0u16; 256];
    let mut i = 32;
    while i < 127 {
        t[i] = i as u16;
        i += 1;
    }
    t[0x27] = 0x2019; // quoteright
    t[0x60] = 0x2018; // quoteleft
    let high: [(u8, u16); 54] = [
        (0xA1, 0x00A1), (0xA2, 0x00A2), (0xA3, 0x00A3), (0xA4, 0x2044), (0xA5, 0x00A5),
        (0xA6, 0x0192), (0xA7, 0x00A7), (0xA8, 0x00A4), (0xA9, 0x0027), (0xAA, 0x201C),
        (0xAB, 0x00AB), (0xAC, 0x2039), (0xAD, 0x203A), (0xAE, 0xFB01), (0xAF, 0xFB02),
        (0xB1, 0x2013), (0xB2, 0x2020), (0xB3, 0x2021), (0xB4, 0x00B7), (0xB6, 0x00B6),
        (0xB7, 0x2022), (0xB8, 0x201A), (0xB9, 0x201E), (0xBA, 0x201D), (0xBB, 0x00BB),
        (0xBC, 0x2026), (0xBD, 0x2030), (0xBF, 0x00BF), (0xC1, 0x0060), (0xC2, 0x00B4),
        (0xC3, 0x02C6), (0xC4, 0x02DC), (0xC5, 0x00AF), (0xC6, 0x02D8), (0xC7, 0x02D9),
        (0xC8, 0x00A8), (0xCA, 0x02DA), (0xCB, 0x00B8), (0xCD, 0x02DD), (0xCE, 0x02DB),
        (0xCF, 0x02C7), (0xD0, 0x2014), (0xE1, 0x00C6), (0xE3, 0x00AA), (0xE8, 0x0141),
        (0xE9, 0x00D8), (0xEA, 0x0152), (0xEB, 0x00BA), (0xF1, 0x00E6), (0xF5, 0x0131),
        (0xF8, 0x0142), (0xF9, 0x00F8), (0xFA, 0x0153), (0xFB, 0x00DF),
    ];
    let mut i = 0;
    while i < 54 {
        t[high[i].0 as usize] = high[i].1;
        i += 1;
    }
    t
};

/// ASCII-range glyph names shared by the byte encodings.
const ASCII_GLYPH_NAMES: [&str; 95] = [
    "space", "exclam", "quotedbl", "numbersign", "dollar", "percent", "ampersand",
    "quotesingle", "parenleft", "parenright", "asterisk", "plus", "comma", "hyphen", "period",
    "slash", "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
    "colon", "semicolon", "less", "equal", "greater", "question", "at", "A", "B", "C", "D",
    "E", "F", "G", "H", "I", "J", "K", "L", "M", "N", "O", "P", "Q", "R", "S", "T", "U", "V",
    "W", "X", "Y", "Z", "bracketleft", "backslash", "bracketright", "asciicircum",
    "underscore", "grave", "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m",
    "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x", "y", "z", "braceleft", "bar",
    "braceright", "asciitilde",
];

/// Glyph names of the WinAnsi byte positions. Needed to map codes through
/// CFF charsets where no usable cmap exists.
pub const WIN_ANSI_GLYPH_NAMES: [Option<&str>; 256] = {
    let mut t: [Option<&str>; 256] = [None; 256];
    let mut i = 0;
    while i < 95 {
        t[32 + i] = Some(ASCII_GLYPH_NAMES[i]);
        i += 1;
    }
    let high: [Option<&str>; 128] = [
        Some("Euro"), None, Some("quotesinglbase"), Some("florin"), Some("quotedblbase"),
        Some("ellipsis"), Some("dagger"), Some("daggerdbl"), Some("circumflex"),
        Some("perthousand"), Some("Scaron"), Some("guilsinglleft"), Some("OE"), None,
        Some("Zcaron"), None, None, Some("quoteleft"), Some("quoteright"), Some("quotedblleft"),
        Some("quotedblright"), Some("bullet"), Some("endash"), Some("emdash"), Some("tilde"),
        Some("trademark"), Some("scaron"), Some("guilsinglright"), Some("oe"), None,
        Some("zcaron"), Some("Ydieresis"), Some("space"), Some("exclamdown"), Some("cent"),
        Some("sterling"), Some("currency"), Some("yen"), Some("brokenbar"), Some("section"),
        Some("dieresis"), Some("copyright"), Some("ordfeminine"), Some("guillemotleft"),
        Some("logicalnot"), Some("hyphen"), Some("registered"), Some("macron"), Some("degree"),
        Some("plusminus"), Some("twosuperior"), Some("threesuperior"), Some("acute"), Some("mu"),
        Some("paragraph"), Some("periodcentered"), Some("cedilla"), Some("onesuperior"),
        Some("ordmasculine"), Some("guillemotright"), Some("onequarter"), Some("onehalf"),
        Some("threequarters"), Some("questiondown"), Some("Agrave"), Some("Aacute"),
        Some("Acircumflex"), Some("Atilde"), Some("Adieresis"), Some("Aring"), Some("AE"),
        Some("Ccedilla"), Some("Egrave"), Some("Eacute"), Some("Ecircumflex"), Some("Edieresis"),
        Some("Igrave"), Some("Iacute"), Some("Icircumflex"), Some("Idieresis"), Some("Eth"),
        Some("Ntilde"), Some("Ograve"), Some("Oacute"), Some("Ocircumflex"), Some("Otilde"),
        Some("Odieresis"), Some("multiply"), Some("Oslash"), Some("Ugrave"), Some("Uacute"),
        Some("Ucircumflex"), Some("Udieresis"), Some("Yacute"), Some("Thorn"),
        Some("germandbls"), Some("agrave"), Some("aacute"), Some("acircumflex"), Some("atilde"),
        Some("adieresis"), Some("aring"), Some("ae"), Some("ccedilla"), Some("egrave"),
        Some("eacute"), Some("ecircumflex"), Some("edieresis"), Some("igrave"), Some("iacute"),
        Some("icircumflex"), Some("idieresis"), Some("eth"), Some("ntilde"), Some("ograve"),
        Some("oacute"), Some("ocircumflex"), Some("otilde"), Some("odieresis"), Some("divide"),
        Some("oslash"), Some("ugrave"), Some("uacute"), Some("ucircumflex"), Some("udieresis"),
        Some("yacute"), Some("thorn"), Some("ydieresis"),
    ];
    let mut i = 0;
    while i < 128 {
        t[128 + i] = high[i];
        i += 1;
    }
    t
};

/// Glyph names of the Adobe StandardEncoding positions, for fonts that
/// declare /StandardEncoding with no /Differences.
pub const STANDARD_GLYPH_NAMES: [Option<&str>; 256] = {
    let mut t: [Option<&str>; 256] = [None; 256];
    let mut i = 0;
    while i < 95 {
        t[32 + i] = Some(ASCII_GLYPH_NAMES[i]);
        i += 1;
    }
    t[0x27] = Some("quoteright");
    t[0x60] = Some("quoteleft");
    let high: [(u8, &str); 54] = [
        (0xA1, "exclamdown"), (0xA2, "cent"), (0xA3, "sterling"), (0xA4, "fraction"),
        (0xA5, "yen"), (0xA6, "florin"), (0xA7, "section"), (0xA8, "currency"),
        (0xA9, "quotesingle"), (0xAA, "quotedblleft"), (0xAB, "guillemotleft"),
        (0xAC, "guilsinglleft"), (0xAD, "guilsinglright"), (0xAE, "fi"), (0xAF, "fl"),
        (0xB1, "endash"), (0xB2, "dagger"), (0xB3, "daggerdbl"), (0xB4, "periodcentered"),
        (0xB6, "paragraph"), (0xB7, "bullet"), (0xB8, "quotesinglbase"), (0xB9, "quotedblbase"),
        (0xBA, "quotedblright"), (0xBB, "guillemotright"), (0xBC, "ellipsis"),
        (0xBD, "perthousand"), (0xBF, "questiondown"), (0xC1, "grave"), (0xC2, "acute"),
        (0xC3, "circumflex"), (0xC4, "tilde"), (0xC5, "macron"), (0xC6, "breve"),
        (0xC7, "dotaccent"), (0xC8, "dieresis"), (0xCA, "ring"), (0xCB, "cedilla"),
        (0xCD, "hungarumlaut"), (0xCE, "ogonek"), (0xCF, "caron"), (0xD0, "emdash"),
        (0xE1, "AE"), (0xE3, "ordfeminine"), (0xE8, "Lslash"), (0xE9, "Oslash"),
        (0xEA, "OE"), (0xEB, "ordmasculine"), (0xF1, "ae"), (0xF5, "dotlessi"),
        (0xF8, "lslash"), (0xF9, "oslash"), (0xFA, "oe"), (0xFB, "germandbls"),
    ];
    let mut i = 0;
    while i < 54 {
        t[high[i].0 as usize] = Some(high[i].1);
        i += 1;
    }
    t
};

/// Adobe Glyph List lookup, reduced to the names that occur in the tables
/// above plus the `uniXXXX`/`uXXXX[XX]` conventions.
pub fn glyph_name_to_unicode(name: &str) -> u32 {
    let name = name.strip_prefix('/').unwrap_or(name);
    if let Some(hex) = name.strip_prefix("uni") {
        if hex.len() >= 4 {
            if let Ok(v) = u32::from_str_radix(&hex[..4], 16) {
                return v;
            }
        }
    }
    if let Some(hex) = name.strip_prefix('u') {
        if (4..=6).contains(&hex.len()) {
            if let Ok(v) = u32::from_str_radix(hex, 16) {
                return v;
            }
        }
    }
    // single-letter names are the character itself
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphanumeric() {
            return c as u32;
        }
    }
    // invert the name tables: WinAnsi first, then the Standard-only names
    // (ligatures, accents, Lslash and friends)
    for (code, entry) in WIN_ANSI_GLYPH_NAMES.iter().enumerate() {
        if *entry == Some(name) {
            return WIN_ANSI[code] as u32;
        }
    }
    for (code, entry) in STANDARD_GLYPH_NAMES.iter().enumerate() {
        if *entry == Some(name) {
            return STANDARD[code] as u32;
        }
    }
    match name {
        "nbspace" => 0x00A0,
        "softhyphen" => 0x00AD,
        "minus" => 0x2212,
        _ => 0,
    }
}

/// Resolve an encoding name to its byte table.
pub fn table_for(encoding: &str) -> &'static [u16; 256] {
    match encoding.strip_prefix('/').unwrap_or(encoding) {
        "MacRomanEncoding" => &MAC_ROMAN,
        "StandardEncoding" => &STANDARD,
        _ => &WIN_ANSI,
    }
}

/// Glyph-name table matching an encoding name, used to backfill fonts that
/// carry no /Differences. MacRoman names are not modelled; such fonts rely
/// on their cmap instead.
pub fn glyph_names_for(encoding: &str) -> Option<&'static [Option<&'static str>; 256]> {
    match encoding.strip_prefix('/').unwrap_or(encoding) {
        "StandardEncoding" => Some(&STANDARD_GLYPH_NAMES),
        "" | "WinAnsiEncoding" => Some(&WIN_ANSI_GLYPH_NAMES),
        "MacRomanEncoding" => None,
        s if s.contains("WinAnsi") => Some(&WIN_ANSI_GLYPH_NAMES),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_range_is_identity() {
        for c in 32..127 {
            assert_eq!(WIN_ANSI[c] as usize, c);
            assert_eq!(MAC_ROMAN[c] as usize, c);
        }
    }

    #[test]
    fn winansi_high_range() {
        assert_eq!(WIN_ANSI[0x80], 0x20AC); // Euro
        assert_eq!(WIN_ANSI[0x93], 0x201C); // left double quote
        assert_eq!(WIN_ANSI[0xE9], 0x00E9); // e acute
    }

    #[test]
    fn standard_encoding_differs_from_winansi() {
        // typographic quotes at the ASCII positions
        assert_eq!(STANDARD[0x27], 0x2019);
        assert_eq!(STANDARD[0x60], 0x2018);
        // Adobe high set: fraction, fi ligature, emdash
        assert_eq!(STANDARD[0xA4], 0x2044);
        assert_eq!(STANDARD[0xAE], 0xFB01);
        assert_eq!(STANDARD[0xD0], 0x2014);
        assert_eq!(STANDARD[0xE1], 0x00C6); // AE
        // no Euro or registered sign in StandardEncoding
        assert_eq!(STANDARD[0x80], 0);
        assert_ne!(STANDARD[0x91], WIN_ANSI[0x91]);
    }

    #[test]
    fn table_selection() {
        assert_eq!(table_for("StandardEncoding")[0x27], 0x2019);
        assert_eq!(table_for("/StandardEncoding")[0x60], 0x2018);
        assert_eq!(table_for("MacRomanEncoding")[0x80], 0x00C4);
        assert_eq!(table_for("WinAnsiEncoding")[0x80], 0x20AC);
        assert_eq!(table_for("")[0x80], 0x20AC);
    }

    #[test]
    fn glyph_name_table_selection() {
        let std_names = glyph_names_for("StandardEncoding").unwrap();
        assert_eq!(std_names[0x27], Some("quoteright"));
        assert_eq!(std_names[0xAE], Some("fi"));
        assert_eq!(std_names[0xE8], Some("Lslash"));
        let win_names = glyph_names_for("WinAnsiEncoding").unwrap();
        assert_eq!(win_names[0x27], Some("quotesingle"));
        assert_eq!(win_names[0x91], Some("quoteleft"));
        assert_eq!(glyph_names_for("").unwrap()[0x41], Some("A"));
        assert!(glyph_names_for("MacRomanEncoding").is_none());
    }

    #[test]
    fn glyph_names() {
        assert_eq!(glyph_name_to_unicode("A"), 'A' as u32);
        assert_eq!(glyph_name_to_unicode("space"), 32);
        assert_eq!(glyph_name_to_unicode("Euro"), 0x20AC);
        assert_eq!(glyph_name_to_unicode("uni0041"), 0x41);
        assert_eq!(glyph_name_to_unicode("u1F600"), 0x1F600);
        // names only present in the Standard set
        assert_eq!(glyph_name_to_unicode("fi"), 0xFB01);
        assert_eq!(glyph_name_to_unicode("fraction"), 0x2044);
        assert_eq!(glyph_name_to_unicode("Lslash"), 0x0141);
        assert_eq!(glyph_name_to_unicode("caron"), 0x02C7);
        assert_eq!(glyph_name_to_unicode("nosuchglyph"), 0);
    }
}
