//! Parser and builder for the decentralized platform's addressing scheme.
//!
//! A locator names one or two claims: a bare stream (`name`), a bare
//! channel (`@name`), or a stream nested in a channel (`@name/name`).
//! Each claim name may carry a modifier pinning it to a single
//! registration: an exact claim id, a positional sequence, or an
//! amount-ordered rank.
//!
//! Two grammars are recognized. The current grammar writes `name:claimid`,
//! `name*sequence`, `name$amountorder`; the legacy grammar wrote
//! `name#claimid` and `name:sequence`. Parsing tries the current grammar
//! first and falls back to the legacy one, so old links keep resolving.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Scheme prefix of a canonical locator.
pub const SCHEME: &str = "lbry://";

/// Characters kept verbatim when percent-encoding a path segment.
/// Mirrors the unreserved set of JavaScript's `encodeURIComponent`, which
/// the platform's desktop frontends expect.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// How a claim is pinned to a single registration.
///
/// At most one modifier applies to a segment, which this enum encodes by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modifier {
    /// Exact claim id: 1 to 40 lowercase hex digits.
    ClaimId(String),
    /// Positional sequence within the claim name.
    Sequence(u64),
    /// Rank by amount order.
    AmountOrder(u64),
}

/// Whether a segment names a channel or a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Channel,
    Stream,
}

/// One path segment of a locator: a claim name plus an optional modifier.
///
/// The `@` sigil of channel names is carried by [`SegmentKind`], not the
/// name itself; `Display` re-attaches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    pub kind: SegmentKind,
    pub name: String,
    pub modifier: Option<Modifier>,
}

impl PathSegment {
    pub fn stream(name: impl Into<String>, modifier: Option<Modifier>) -> Self {
        Self {
            kind: SegmentKind::Stream,
            name: name.into(),
            modifier,
        }
    }

    pub fn channel(name: impl Into<String>, modifier: Option<Modifier>) -> Self {
        Self {
            kind: SegmentKind::Channel,
            name: name.into(),
            modifier,
        }
    }
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.kind == SegmentKind::Channel {
            f.write_str("@")?;
        }
        f.write_str(&self.name)?;
        match &self.modifier {
            Some(Modifier::ClaimId(id)) => write!(f, ":{id}"),
            Some(Modifier::Sequence(seq)) => write!(f, "*{seq}"),
            Some(Modifier::AmountOrder(order)) => write!(f, "${order}"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Grammar {
    Current,
    Legacy,
}

/// Parses a locator into its path segments.
///
/// Accepts the `lbry://` scheme prefix or a bare body, and tries the
/// current grammar before the legacy one. Returns an empty vec when
/// neither grammar matches; callers must treat that as "not a locator",
/// not as an error.
pub fn parse(input: &str) -> Vec<PathSegment> {
    let body = input.strip_prefix(SCHEME).unwrap_or(input);
    for grammar in [Grammar::Current, Grammar::Legacy] {
        if let Some(segments) = parse_body(body, grammar) {
            return segments;
        }
    }
    Vec::new()
}

/// Parses a frontend-site pathname (`/@name:id/name:id`) into segments.
///
/// Web frontends only emit the current grammar, so no legacy fallback is
/// attempted here.
pub fn from_web_path(pathname: &str) -> Vec<PathSegment> {
    let Some(body) = pathname.strip_prefix('/') else {
        return Vec::new();
    };
    parse_body(body, Grammar::Current).unwrap_or_default()
}

/// Converts a full frontend URL into the canonical locator, if its path
/// names a claim. Query strings and fragments are ignored.
pub fn web_redirect_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segments = from_web_path(parsed.path());
    if segments.is_empty() {
        return None;
    }
    Some(build(&segments))
}

/// Serializes segments into the canonical `lbry://` form.
///
/// Left inverse of [`parse`] for canonical-form input: for any locator the
/// current grammar accepts, `build(&parse(locator)) == locator`.
pub fn build(segments: &[PathSegment]) -> String {
    format!("{SCHEME}{}", join_segments(segments, false))
}

/// Joins segments into a path, optionally percent-encoding each segment
/// independently. Per-segment encoding is what hosting environments that
/// mis-parse reserved characters inside a whole path expect.
pub fn join_segments(segments: &[PathSegment], encode: bool) -> String {
    segments
        .iter()
        .map(|segment| {
            let text = segment.to_string();
            if encode {
                utf8_percent_encode(&text, SEGMENT_ENCODE_SET).to_string()
            } else {
                text
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn parse_body(body: &str, grammar: Grammar) -> Option<Vec<PathSegment>> {
    let mut parts = body.splitn(2, '/');
    let first = parts.next()?;
    match parts.next() {
        // Channel-qualified stream: the first segment must be a channel.
        Some(stream_part) => {
            let channel = parse_segment(first, SegmentKind::Channel, grammar)?;
            let stream = parse_segment(stream_part, SegmentKind::Stream, grammar)?;
            Some(vec![channel, stream])
        }
        None => {
            let kind = if first.starts_with('@') {
                SegmentKind::Channel
            } else {
                SegmentKind::Stream
            };
            Some(vec![parse_segment(first, kind, grammar)?])
        }
    }
}

fn parse_segment(text: &str, kind: SegmentKind, grammar: Grammar) -> Option<PathSegment> {
    let text = match kind {
        SegmentKind::Channel => text.strip_prefix('@')?,
        SegmentKind::Stream => text,
    };

    let name_end = text
        .char_indices()
        .find(|(_, c)| !is_name_char(*c))
        .map_or(text.len(), |(i, _)| i);
    if name_end == 0 {
        return None;
    }
    let name = &text[..name_end];
    let rest = &text[name_end..];

    let modifier = if rest.is_empty() {
        None
    } else {
        let marker = rest.chars().next()?;
        Some(parse_modifier(marker, &rest[marker.len_utf8()..], grammar)?)
    };

    Some(PathSegment {
        kind,
        name: name.to_owned(),
        modifier,
    })
}

fn parse_modifier(marker: char, value: &str, grammar: Grammar) -> Option<Modifier> {
    match (grammar, marker) {
        (Grammar::Current, ':') => parse_claim_id(value),
        (Grammar::Current, '*') => parse_ordinal(value).map(Modifier::Sequence),
        // The legacy grammar wrote `#` for claim ids and `:` for sequences,
        // but locators in the wild mix `#` on the channel with `:` plus a
        // hex id on the stream, so a non-decimal `:` value falls back to a
        // claim id.
        (Grammar::Legacy, '#') => parse_claim_id(value),
        (Grammar::Legacy, ':') => parse_ordinal(value)
            .map(Modifier::Sequence)
            .or_else(|| parse_claim_id(value)),
        (_, '$') => parse_ordinal(value).map(Modifier::AmountOrder),
        _ => None,
    }
}

fn parse_claim_id(value: &str) -> Option<Modifier> {
    let valid = (1..=40).contains(&value.len())
        && value
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    valid.then(|| Modifier::ClaimId(value.to_owned()))
}

/// Positive decimal with no leading zero, per the grammar's `[1-9][0-9]*`.
fn parse_ordinal(value: &str) -> Option<u64> {
    if value.is_empty() || value.starts_with('0') || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Claim names exclude the grammar's reserved and control characters.
fn is_name_char(c: char) -> bool {
    !matches!(
        c,
        '=' | '&'
            | '#'
            | ':'
            | '$'
            | '@'
            | '%'
            | '*'
            | '?'
            | ';'
            | '"'
            | '/'
            | '\\'
            | '<'
            | '>'
            | '{'
            | '}'
            | '|'
            | '^'
            | '~'
            | '`'
            | '['
            | ']'
            | '\u{fffe}'
            | '\u{ffff}'
    ) && c > '\u{0020}'
}
