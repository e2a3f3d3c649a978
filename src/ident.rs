//! Storage-layer identifier rules.
//!
//! Every column and table name that leaves the pipeline passes through this
//! module. The output grammar is `[a-z][a-z0-9_]*`, bounded to the Postgres
//! identifier limit. Uniqueness inside a schema is handled by
//! [`IdentifierAllocator`], which appends `_1`, `_2`, ... in order of first
//! appearance.

use std::collections::HashSet;

pub const IDENTIFIER_MAX_LEN: usize = 63;

/// Room kept free at the end of a truncated identifier for a `_N` suffix.
const SUFFIX_RESERVE: usize = 4;

const COLUMN_PREFIX: &str = "col";
const TABLE_PREFIX: &str = "t";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    Column,
    Table,
}

impl IdentKind {
    fn prefix(self) -> &'static str {
        match self {
            IdentKind::Column => COLUMN_PREFIX,
            IdentKind::Table => TABLE_PREFIX,
        }
    }
}

/// Sanitize a raw header into a column identifier.
pub fn sanitize_identifier(name: &str) -> String {
    sanitize_with(name, IdentKind::Column, IDENTIFIER_MAX_LEN)
}

/// Sanitize a file stem or logical name into a table identifier.
pub fn sanitize_table_name(name: &str) -> String {
    sanitize_with(name, IdentKind::Table, IDENTIFIER_MAX_LEN)
}

pub fn sanitize_with(name: &str, kind: IdentKind, max_len: usize) -> String {
    let mut lowered = name.to_lowercase();
    match kind {
        IdentKind::Column => lowered = lowered.replace('%', " pct"),
        IdentKind::Table => lowered = lowered.replace('-', "_"),
    }

    let mut collapsed = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                collapsed.push('_');
            }
            in_whitespace = true;
        } else {
            collapsed.push(ch);
            in_whitespace = false;
        }
    }

    let mut ident: String = collapsed
        .chars()
        .filter(|ch| matches!(ch, 'a'..='z' | '0'..='9' | '_'))
        .collect();

    if ident.is_empty() {
        ident = kind.prefix().to_string();
    } else if !ident.starts_with(|ch: char| ch.is_ascii_lowercase()) {
        ident = format!("{}_{ident}", kind.prefix());
    }

    if ident.len() > max_len {
        let keep = match kind {
            IdentKind::Column => max_len.saturating_sub(SUFFIX_RESERVE).max(1),
            IdentKind::Table => max_len,
        };
        ident.truncate(keep);
    }
    ident
}

/// Append `_{ordinal}` to `base`, shortening `base` so the result stays within
/// `max_len`.
pub fn with_suffix(base: &str, ordinal: usize, max_len: usize) -> String {
    let suffix = format!("_{ordinal}");
    let room = max_len.saturating_sub(suffix.len()).max(1);
    let mut stem = base.to_string();
    if stem.len() > room {
        stem.truncate(room);
    }
    stem.push_str(&suffix);
    stem
}

/// Hands out unique identifiers within one schema.
#[derive(Debug, Clone)]
pub struct IdentifierAllocator {
    taken: HashSet<String>,
    max_len: usize,
}

impl Default for IdentifierAllocator {
    fn default() -> Self {
        Self::new(IDENTIFIER_MAX_LEN)
    }
}

impl IdentifierAllocator {
    pub fn new(max_len: usize) -> Self {
        Self {
            taken: HashSet::new(),
            max_len,
        }
    }

    pub fn with_taken<I, S>(max_len: usize, taken: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: taken.into_iter().map(Into::into).collect(),
            max_len,
        }
    }

    pub fn is_taken(&self, ident: &str) -> bool {
        self.taken.contains(ident)
    }

    /// Returns `base` when free, otherwise the first free `base_N` for N >= 1.
    pub fn allocate(&mut self, base: &str) -> String {
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        let mut ordinal = 1usize;
        loop {
            let candidate = with_suffix(base, ordinal, self.max_len);
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
            ordinal += 1;
        }
    }
}

/// Display normalisation for scraped header text: drops BOM, turns NBSP into a
/// plain space, trims and collapses whitespace runs. Case is preserved.
pub fn normalize_header(raw: &str) -> String {
    raw.replace('\u{feff}', "")
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lookup key for glossary tables: header normalisation plus lowercase, with
/// underscores treated as spaces.
pub fn header_key(raw: &str) -> String {
    normalize_header(&raw.replace('_', " ")).to_lowercase()
}

/// Alphanumeric-only lowercase form used for fuzzy comparisons.
pub fn normalize_name(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
