//! Tolerant parsing of inbound negotiation text.
//!
//! Accepted shapes, verbs and the `DCC` word matched case-insensitively:
//!
//! ```text
//! \x01DCC SSEND report.txt 10.0.0.5 4001 2048\x01
//! DCC RESUME "my report.txt" 4001 1024
//! SSEND report.txt 10.0.0.5 4001
//! ```

use crate::message::{Negotiation, Offer, Resume};
use crate::{CTCP_DELIM, DCC_PREFIX};

/// Parse an inbound negotiation message.
///
/// Returns `None` for anything that is not a well-formed `SSEND` or `RESUME`.
/// `ACCEPT` is only ever produced locally and is not recognised here.
pub fn parse(text: &str) -> Option<Negotiation> {
    let tokens = tokenize(unwrap(text)?)?;
    let mut args = tokens.as_slice();
    if args.first().is_some_and(|t| t.eq_ignore_ascii_case(DCC_PREFIX)) {
        args = &args[1..];
    }
    let (verb, args) = args.split_first()?;

    let parsed = if verb.eq_ignore_ascii_case("SSEND") {
        offer_from(args).map(Negotiation::Offer)
    } else if verb.eq_ignore_ascii_case("RESUME") {
        resume_from(args).map(Negotiation::Resume)
    } else {
        None
    };
    if parsed.is_none() {
        tracing::trace!("ignoring negotiation text {:?}", text);
    }
    parsed
}

/// Parse text that must be an `SSEND` offer
pub fn parse_offer(text: &str) -> Option<Offer> {
    match parse(text)? {
        Negotiation::Offer(offer) => Some(offer),
        _ => None,
    }
}

/// Parse text that must be a `RESUME` request
pub fn parse_resume(text: &str) -> Option<Resume> {
    match parse(text)? {
        Negotiation::Resume(resume) => Some(resume),
        _ => None,
    }
}

fn offer_from(args: &[String]) -> Option<Offer> {
    let [filename, host, port, rest @ ..] = args else {
        return None;
    };
    if filename.is_empty() || host.is_empty() {
        return None;
    }
    let port = port.parse::<u16>().ok().filter(|&p| p != 0)?;
    // a size that is not a non-negative integer is dropped, not fatal
    let size = rest.first().and_then(|s| s.parse::<u64>().ok());

    Some(Offer {
        filename: filename.clone(),
        host: host.clone(),
        port,
        size,
    })
}

fn resume_from(args: &[String]) -> Option<Resume> {
    let [filename, port, position, ..] = args else {
        return None;
    };
    if filename.is_empty() {
        return None;
    }
    Some(Resume {
        filename: filename.clone(),
        port: port.parse().ok()?,
        position: position.parse().ok()?,
    })
}

/// Strip a surrounding control-byte pair. Stray control bytes make the
/// message malformed.
fn unwrap(text: &str) -> Option<&str> {
    let text = text.trim_end_matches(['\r', '\n']);
    let inner = match text.strip_prefix(CTCP_DELIM) {
        Some(rest) => rest.strip_suffix(CTCP_DELIM)?,
        None => text,
    };
    if inner.contains(CTCP_DELIM) {
        return None;
    }
    Some(inner)
}

/// Split on runs of spaces. A token opening with `"` runs to the closing
/// `"` and may contain spaces; an unterminated quote is malformed.
fn tokenize(text: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut rest = text.trim_start_matches(' ');

    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('"') {
            let (token, after) = quoted_token(quoted)?;
            tokens.push(token);
            rest = after;
            if !rest.is_empty() && !rest.starts_with(' ') {
                return None;
            }
        } else {
            let end = rest.find(' ').unwrap_or(rest.len());
            tokens.push(rest[..end].to_string());
            rest = &rest[end..];
        }
        rest = rest.trim_start_matches(' ');
    }
    Some(tokens)
}

/// Body of a quoted token, up to its closing `"`. Inside quotes `\"` and
/// `\\` stand for `"` and `\`; any other backslash is literal.
fn quoted_token(text: &str) -> Option<(String, &str)> {
    let mut token = String::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((token, &text[i + 1..])),
            '\\' => match chars.peek() {
                Some(&(_, next @ ('"' | '\\'))) => {
                    token.push(next);
                    chars.next();
                }
                _ => token.push('\\'),
            },
            _ => token.push(c),
        }
    }
    None
}
