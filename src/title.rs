//! Display titles derived from catalog file names.
//!
//! File names follow `artist-slug_title-slug-year` or `artist-slug_title-slug_hash`.
//! The title slug is cleaned by a fixed, ordered list of suffix rules and then
//! title-cased. Parsing never fails: input the rules cannot make sense of falls
//! back to the title-cased file name.

use tracing::warn;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// One suffix clean-up step. Returns the input without the suffix, or `None`
/// when the suffix is not present.
pub struct StripRule {
    pub name: &'static str,
    pub apply: fn(&str) -> Option<&str>,
}

/// Applied in this order, each at most once.
pub const STRIP_RULES: &[StripRule] = &[
    StripRule {
        name: "year",
        apply: strip_year,
    },
    StripRule {
        name: "hash",
        apply: strip_hash,
    },
    StripRule {
        name: "numeric",
        apply: strip_numeric_suffix,
    },
];

/// Turn a catalog file name into a human readable title.
///
/// ```
/// use image_finder::title::parse_title;
///
/// assert_eq!(
///     parse_title("jan-steen_return-of-the-prodigal-son-1670.jpg"),
///     "Return Of The Prodigal Son"
/// );
/// ```
#[must_use]
pub fn parse_title(filename: &str) -> String {
    let base = strip_extension(filename);
    let Some((_, slug)) = base.split_once('_') else {
        return humanize(base);
    };

    let slug = STRIP_RULES
        .iter()
        .fold(slug, |slug, rule| (rule.apply)(slug).unwrap_or(slug));

    let title = humanize(slug);
    if title.trim().is_empty() {
        warn!("Failed to parse artwork title from {filename}: empty title slug");
        return humanize(base);
    }
    title
}

/// Remove a case-insensitive `.jpg`, `.jpeg` or `.png` suffix.
#[must_use]
pub fn strip_extension(filename: &str) -> &str {
    if let Some((stem, ext)) = filename.rsplit_once('.') {
        if IMAGE_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
        {
            return stem;
        }
    }
    filename
}

/// `-YYYY` at the very end.
#[must_use]
pub fn strip_year(slug: &str) -> Option<&str> {
    let bytes = slug.as_bytes();
    let n = bytes.len();
    (n >= 5 && bytes[n - 5] == b'-' && bytes[n - 4..].iter().all(u8::is_ascii_digit))
        .then(|| &slug[..n - 5])
}

/// `_` followed by eight lowercase hex digits at the very end.
#[must_use]
pub fn strip_hash(slug: &str) -> Option<&str> {
    let bytes = slug.as_bytes();
    let n = bytes.len();
    let is_hash_digit = |b: &u8| b.is_ascii_digit() || (b'a'..=b'f').contains(b);
    (n >= 9 && bytes[n - 9] == b'_' && bytes[n - 8..].iter().all(is_hash_digit))
        .then(|| &slug[..n - 9])
}

/// `-N` at the very end, for any run of digits.
#[must_use]
pub fn strip_numeric_suffix(slug: &str) -> Option<&str> {
    let (head, digits) = slug.rsplit_once('-')?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(head)
}

fn humanize(slug: &str) -> String {
    title_case(&slug.replace('-', " "))
}

/// Upper-case the first letter of every run of letters and lower-case the rest.
#[must_use]
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// File name component of a stored path, accepting either separator.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
