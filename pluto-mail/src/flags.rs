//! Maildir flag letters and the `:2,` filename suffix.
//!
//! The filename is the single source of truth for a message's flags. Letters
//! are kept in stable alphabetical order so equal flag sets yield equal
//! filenames on every replica.

/// System flags and their Maildir letters, in the order SELECT reports them.
pub const SUPPORTED: [(&str, char); 5] = [
    ("\\Answered", 'R'),
    ("\\Flagged", 'F'),
    ("\\Deleted", 'T'),
    ("\\Seen", 'S'),
    ("\\Draft", 'D'),
];

pub fn letter_for(flag: &str) -> Option<char> {
    SUPPORTED
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(flag))
        .map(|(_, letter)| *letter)
}

pub fn flag_for(letter: char) -> Option<&'static str> {
    SUPPORTED
        .iter()
        .find(|(_, l)| *l == letter)
        .map(|(name, _)| *name)
}

/// The `FLAGS (...)` list advertised by SELECT.
pub fn supported_list() -> String {
    SUPPORTED
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses a parenthesized flag list like `(\Seen \Deleted)` into normalized
/// letters. Unknown flags reject the whole list.
pub fn parse_flag_list(payload: &str) -> Option<String> {
    let inner = payload
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))?;
    let mut letters = String::new();
    for flag in inner.split_whitespace() {
        letters.push(letter_for(flag)?);
    }
    Some(normalize(&letters))
}

/// Sorted, deduplicated letters.
pub fn normalize(letters: &str) -> String {
    let mut chars: Vec<char> = letters.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    chars.into_iter().collect()
}

pub fn union(current: &str, added: &str) -> String {
    let mut combined = String::with_capacity(current.len() + added.len());
    combined.push_str(current);
    combined.push_str(added);
    normalize(&combined)
}

pub fn difference(current: &str, removed: &str) -> String {
    normalize(&current.chars().filter(|c| !removed.contains(*c)).collect::<String>())
}

/// Splits a Maildir filename into `(id, letters)`. A name without the
/// `:2,` marker has no flags.
pub fn split_filename(name: &str) -> (&str, &str) {
    match name.rfind(":2,") {
        Some(pos) => (&name[..pos], &name[pos + 3..]),
        None => (name, ""),
    }
}

pub fn filename(id: &str, letters: &str) -> String {
    format!("{}:2,{}", id, letters)
}

/// Renders letters as the IMAP flag list body, e.g. `\Deleted \Seen`.
pub fn imap_flags(letters: &str) -> String {
    letters
        .chars()
        .filter_map(flag_for)
        .collect::<Vec<_>>()
        .join(" ")
}
