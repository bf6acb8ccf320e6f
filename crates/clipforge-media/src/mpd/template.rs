//! Segment file-name templates and manifest duration strings.

use std::fmt::Write;

use crate::error::ParseError;

/// Expand `$...$` identifiers in a segment file-name template.
///
/// `$RepresentationID$`, `$Number$` and `$Time$` are substituted, the latter
/// two honoring a `%0Nd` width specifier. `$$` is a literal dollar sign.
/// Unknown identifiers are kept verbatim; [`validate_template`] rejects them
/// at parse time so expansion stays total.
pub fn expand_template(
    template: &str,
    rep_id: &str,
    number: Option<u64>,
    time: Option<u64>,
) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('$') {
            Some(end) => {
                expand_identifier(&mut out, &after[..end], rep_id, number, time);
                rest = &after[end + 1..];
            }
            None => {
                out.push('$');
                rest = after;
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_identifier(
    out: &mut String,
    ident: &str,
    rep_id: &str,
    number: Option<u64>,
    time: Option<u64>,
) {
    if ident.is_empty() {
        out.push('$');
        return;
    }
    let (name, width) = match ident.find('%') {
        Some(at) => (&ident[..at], parse_width(&ident[at..])),
        None => (ident, None),
    };
    let value = match name {
        "RepresentationID" => {
            out.push_str(rep_id);
            return;
        }
        "Number" => number,
        "Time" => time,
        _ => None,
    };
    match value {
        Some(v) => {
            let _ = match width {
                Some(w) => write!(out, "{v:0w$}"),
                None => write!(out, "{v}"),
            };
        }
        None => {
            out.push('$');
            out.push_str(ident);
            out.push('$');
        }
    }
}

/// Check that a template only uses identifiers expansion understands.
pub fn validate_template(template: &str) -> Result<(), ParseError> {
    let mut rest = template;
    while let Some(start) = rest.find('$') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            return Err(ParseError::Malformed(format!(
                "unbalanced '$' in template {template:?}"
            )));
        };
        let ident = &after[..end];
        if !ident.is_empty() {
            let (name, spec) = match ident.find('%') {
                Some(at) => (&ident[..at], Some(&ident[at..])),
                None => (ident, None),
            };
            if !matches!(name, "RepresentationID" | "Number" | "Time") {
                return Err(ParseError::Malformed(format!(
                    "unsupported template identifier ${ident}$"
                )));
            }
            if let Some(spec) = spec {
                if parse_width(spec).is_none() {
                    return Err(ParseError::Malformed(format!(
                        "bad width specifier in ${ident}$"
                    )));
                }
            }
        }
        rest = &after[end + 1..];
    }
    Ok(())
}

fn parse_width(spec: &str) -> Option<usize> {
    spec.strip_prefix("%0")?.strip_suffix('d')?.parse().ok()
}

/// Parse an ISO-8601 duration such as `PT1M51.267S` into seconds.
pub fn parse_duration(s: &str) -> Result<f64, ParseError> {
    duration_secs(s).ok_or_else(|| ParseError::Malformed(format!("invalid duration {s:?}")))
}

fn duration_secs(s: &str) -> Option<f64> {
    let rest = s.strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut secs = 0.0;
    let mut rest = date;
    while !rest.is_empty() {
        let (value, unit, tail) = take_component(rest)?;
        match unit {
            // Years and months have no fixed length; recordings never use them.
            'D' => secs += value * 86_400.0,
            _ => return None,
        }
        rest = tail;
    }

    if let Some(time) = time {
        if time.is_empty() {
            return None;
        }
        let mut rest = time;
        while !rest.is_empty() {
            let (value, unit, tail) = take_component(rest)?;
            match unit {
                'H' => secs += value * 3_600.0,
                'M' => secs += value * 60.0,
                'S' => secs += value,
                _ => return None,
            }
            rest = tail;
        }
    }

    Some(secs)
}

fn take_component(s: &str) -> Option<(f64, char, &str)> {
    let end = s.find(|c: char| c.is_ascii_alphabetic())?;
    if end == 0 {
        return None;
    }
    let value: f64 = s[..end].parse().ok()?;
    let unit = s[end..].chars().next()?;
    Some((value, unit, &s[end + 1..]))
}
