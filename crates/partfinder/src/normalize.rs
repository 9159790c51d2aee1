//! Search-key normalization for folder names and user-typed terms.
//!
//! Keys are built by a fixed pipeline:
//! 1. NFKD compatibility decomposition
//! 2. combining marks (diacritics) dropped
//! 3. NFKC recomposition, which also expands ligatures
//! 4. table-driven transliteration of technical symbols and Greek letters
//! 5. anything that is neither alphanumeric nor whitespace becomes a space
//! 6. whitespace runs collapsed to one space, ends trimmed
//! 7. full Unicode case folding (`ß` -> `ss`)
//!
//! The resulting key is restricted to ASCII letters, digits and single
//! spaces; non-ASCII alphanumerics left over after folding act as separators.

use std::panic;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Symbol replacements applied after recomposition.
///
/// Units and marks are padded with spaces so `100Ω` splits into `100 ohm`
/// instead of fusing into one token.
const TRANSLITERATIONS: &[(char, &str)] = &[
    // Ligatures and letter variants that do not decompose
    ('æ', "ae"),
    ('Æ', "AE"),
    ('œ', "oe"),
    ('Œ', "OE"),
    ('ø', "o"),
    ('Ø', "O"),
    ('ð', "d"),
    ('Ð', "D"),
    ('þ', "th"),
    ('Þ', "TH"),
    ('ß', "ss"),
    ('ẞ', "SS"),
    ('ł', "l"),
    ('Ł', "L"),
    ('đ', "d"),
    ('Đ', "D"),
    ('ħ', "h"),
    ('Ħ', "H"),
    ('ı', "i"),
    // Technical units
    ('\u{2103}', " C "),
    ('\u{2109}', " F "),
    ('\u{2126}', " ohm "),
    ('\u{03A9}', " ohm "),
    ('\u{00B5}', "u"),
    ('\u{03BC}', "u"),
    ('\u{212B}', "A"),
    // Greek letters
    ('α', "alpha"),
    ('β', "beta"),
    ('γ', "gamma"),
    ('δ', "delta"),
    ('ε', "epsilon"),
    ('ζ', "zeta"),
    ('η', "eta"),
    ('θ', "theta"),
    ('ι', "iota"),
    ('κ', "kappa"),
    ('λ', "lambda"),
    ('ν', "nu"),
    ('ξ', "xi"),
    ('ο', "omicron"),
    ('π', "pi"),
    ('ρ', "rho"),
    ('σ', "sigma"),
    ('ς', "sigma"),
    ('τ', "tau"),
    ('υ', "upsilon"),
    ('φ', "phi"),
    ('χ', "chi"),
    ('ψ', "psi"),
    ('ω', "omega"),
    // Marks
    ('№', " No "),
    ('℮', "e"),
    ('™', " TM "),
    ('©', " C "),
    ('®', " R "),
    ('°', " "),
    ('′', " "),
    ('″', " "),
    ('‰', " "),
    ('‱', " "),
    ('±', " "),
    ('×', " x "),
    ('÷', " "),
    ('≈', " "),
    ('≠', " "),
];

/// Returns the canonical search key for `text`.
///
/// Never fails: if the Unicode pipeline panics the key is rebuilt with a
/// plain ASCII filter instead.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    match panic::catch_unwind(|| normalize_unicode(text)) {
        Ok(key) => key,
        Err(_) => {
            log::warn!("normalization fell back to ascii filter len={}", text.len());
            normalize_basic(text)
        }
    }
}

fn normalize_unicode(text: &str) -> String {
    let stripped: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let mut transliterated = String::with_capacity(stripped.len());
    for c in stripped.nfkc() {
        match transliterate(c) {
            Some(replacement) => transliterated.push_str(replacement),
            None => transliterated.push(c),
        }
    }

    let separated: String = transliterated
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let folded = caseless::default_case_fold_str(&collapse_whitespace(&separated));
    ascii_key(&folded)
}

/// Minimal path: ASCII alphanumerics survive, everything else separates.
fn normalize_basic(text: &str) -> String {
    let filtered: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&filtered)
}

fn transliterate(c: char) -> Option<&'static str> {
    if c.is_ascii() {
        return None;
    }
    lookup(c).or_else(|| {
        // Capital Greek letters share the lowercase spelling.
        if ('\u{0391}'..='\u{03A8}').contains(&c) {
            c.to_lowercase().next().and_then(lookup)
        } else {
            None
        }
    })
}

fn lookup(c: char) -> Option<&'static str> {
    TRANSLITERATIONS
        .iter()
        .find(|(symbol, _)| *symbol == c)
        .map(|(_, replacement)| *replacement)
}

fn ascii_key(folded: &str) -> String {
    let restricted: String = folded
        .chars()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&restricted)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
