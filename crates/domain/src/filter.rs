//! Sensitive-data filter: scrubs PII from outgoing content.
//!
//! Detects Chinese mobile numbers, 18-digit ID cards, emails, bank cards
//! (12–19 digits), and IPv4 addresses. Masking keeps a short prefix/suffix
//! (default 3 + 4 characters); emails keep the `@` and the TLD; IPv4 keeps
//! only the first octet.
//!
//! The `regex` crate has no lookaround, so numeric patterns are matched
//! bare and their digit boundaries are verified manually — a phone number
//! embedded in a longer digit run is not a phone number.

use regex::Regex;
use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kinds and patterns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveKind {
    IdCard,
    ChineseMobile,
    BankCard,
    Email,
    Ipv4,
}

impl SensitiveKind {
    /// Priority order for overlap resolution: longer/more specific first.
    fn all() -> [SensitiveKind; 5] {
        [
            SensitiveKind::IdCard,
            SensitiveKind::ChineseMobile,
            SensitiveKind::BankCard,
            SensitiveKind::Email,
            SensitiveKind::Ipv4,
        ]
    }

    fn pattern(&self) -> &'static str {
        match self {
            SensitiveKind::IdCard => r"\d{17}[0-9Xx]",
            SensitiveKind::ChineseMobile => r"1[3-9]\d{9}",
            SensitiveKind::BankCard => r"\d{12,19}",
            SensitiveKind::Email => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+",
            SensitiveKind::Ipv4 => {
                r"(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)(?:\.(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)){3}"
            }
        }
    }

    /// Characters that must not be adjacent for a match of this kind to
    /// stand on its own.
    fn boundary_breaks(&self, c: char) -> bool {
        match self {
            SensitiveKind::IdCard | SensitiveKind::ChineseMobile | SensitiveKind::BankCard => {
                c.is_ascii_digit()
            }
            SensitiveKind::Ipv4 => c.is_ascii_digit() || c == '.',
            // Email boundaries are handled by the pattern itself.
            SensitiveKind::Email => false,
        }
    }
}

/// A single sensitive span found in a text.
#[derive(Debug, Clone, Serialize)]
pub struct SensitiveMatch {
    pub kind: SensitiveKind,
    /// Byte offsets into the scanned text.
    pub start: usize,
    pub end: usize,
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SensitiveFilter {
    patterns: Vec<(SensitiveKind, Regex)>,
    scanner: FastScanner,
    keep_prefix: usize,
    keep_suffix: usize,
}

impl Default for SensitiveFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl SensitiveFilter {
    pub fn new() -> Self {
        Self::with_keep(3, 4)
    }

    /// Build a filter preserving `keep_prefix` leading and `keep_suffix`
    /// trailing characters of each numeric match.
    pub fn with_keep(keep_prefix: usize, keep_suffix: usize) -> Self {
        let patterns = SensitiveKind::all()
            .iter()
            .map(|kind| {
                let re = Regex::new(kind.pattern())
                    .unwrap_or_else(|e| panic!("invalid builtin pattern for {kind:?}: {e}"));
                (*kind, re)
            })
            .collect();
        Self {
            patterns,
            scanner: FastScanner::new(),
            keep_prefix,
            keep_suffix,
        }
    }

    /// Find all sensitive spans, non-overlapping, in document order.
    /// Higher-priority kinds claim their ranges first.
    pub fn find_matches(&self, text: &str) -> Vec<SensitiveMatch> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut out = Vec::new();

        for (kind, re) in &self.patterns {
            for m in re.find_iter(text) {
                if !has_clean_boundaries(text, m.start(), m.end(), *kind) {
                    continue;
                }
                if claimed
                    .iter()
                    .any(|&(s, e)| m.start() < e && s < m.end())
                {
                    continue;
                }
                claimed.push((m.start(), m.end()));
                out.push(SensitiveMatch {
                    kind: *kind,
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str().to_owned(),
                });
            }
        }

        out.sort_by_key(|m| m.start);
        out
    }

    /// Replace every sensitive span with its masked form.
    pub fn filter_text(&self, text: &str) -> String {
        // One-pass pre-scan: the common case is clean text.
        if !self.scanner.contains_sensitive(text) {
            return text.to_owned();
        }

        let matches = self.find_matches(text);
        if matches.is_empty() {
            return text.to_owned();
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in &matches {
            out.push_str(&text[cursor..m.start]);
            out.push_str(&self.mask(m.kind, &m.text));
            cursor = m.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// True when the text contains no sensitive spans.
    pub fn validate(&self, text: &str) -> bool {
        self.find_matches(text).is_empty()
    }

    fn mask(&self, kind: SensitiveKind, text: &str) -> String {
        match kind {
            SensitiveKind::Email => mask_email(text),
            SensitiveKind::Ipv4 => mask_ipv4(text),
            _ => mask_keep_ends(text, self.keep_prefix, self.keep_suffix),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Masking rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keep the first `prefix` and last `suffix` characters, star the middle.
/// A value too short to keep both ends is fully starred.
fn mask_keep_ends(text: &str, prefix: usize, suffix: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= prefix + suffix {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..prefix].iter().collect();
    let tail: String = chars[chars.len() - suffix..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - prefix - suffix))
}

/// `foo@bar.com` → `f**@b**.com`: first character of the local part and of
/// every domain label survives; the TLD label is kept verbatim.
/// Single-character labels become `*` so the result no longer parses as an
/// address (keeps filtering idempotent).
fn mask_email(text: &str) -> String {
    let Some((local, domain)) = text.split_once('@') else {
        return "*".repeat(text.chars().count());
    };

    let labels: Vec<&str> = domain.split('.').collect();
    let mut masked_domain = Vec::with_capacity(labels.len());
    for (i, label) in labels.iter().enumerate() {
        if i == labels.len() - 1 {
            masked_domain.push((*label).to_owned());
        } else {
            masked_domain.push(mask_label(label));
        }
    }

    format!("{}@{}", mask_label(local), masked_domain.join("."))
}

fn mask_label(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let rest = chars.count();
            if rest == 0 {
                "*".to_owned()
            } else {
                format!("{first}{}", "*".repeat(rest))
            }
        }
    }
}

/// `192.168.1.100` → `192.*.*.*`: every octet after the first is dropped.
fn mask_ipv4(text: &str) -> String {
    match text.split('.').next() {
        Some(first) => format!("{first}.*.*.*"),
        None => "*".to_owned(),
    }
}

/// Verify a numeric match is not part of a longer digit (or dotted) run.
fn has_clean_boundaries(text: &str, start: usize, end: usize, kind: SensitiveKind) -> bool {
    if let Some(prev) = text[..start].chars().next_back() {
        if kind.boundary_breaks(prev) {
            return false;
        }
    }
    if let Some(next) = text[end..].chars().next() {
        if kind.boundary_breaks(next) {
            return false;
        }
    }
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-type validators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn full_match(kind: SensitiveKind, text: &str) -> bool {
    Regex::new(&format!("^(?:{})$", kind.pattern()))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

pub fn is_chinese_mobile(text: &str) -> bool {
    full_match(SensitiveKind::ChineseMobile, text)
}

pub fn is_id_card(text: &str) -> bool {
    full_match(SensitiveKind::IdCard, text)
}

pub fn is_email(text: &str) -> bool {
    full_match(SensitiveKind::Email, text)
}

pub fn is_bank_card(text: &str) -> bool {
    full_match(SensitiveKind::BankCard, text)
}

pub fn is_ipv4(text: &str) -> bool {
    full_match(SensitiveKind::Ipv4, text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FastScanner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All active patterns composed into a single alternation for one-pass
/// scanning. Used as a cheap pre-check before the per-kind pass.
pub struct FastScanner {
    combined: Regex,
}

impl Default for FastScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl FastScanner {
    pub fn new() -> Self {
        let alternation = SensitiveKind::all()
            .iter()
            .map(|k| format!("(?:{})", k.pattern()))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            combined: Regex::new(&alternation).expect("combined sensitive pattern"),
        }
    }

    /// Whether the text contains anything that could be sensitive.
    /// May report false positives at digit-run boundaries; the per-kind
    /// pass makes the final call.
    pub fn contains_sensitive(&self, text: &str) -> bool {
        self.combined.is_match(text)
    }
}
