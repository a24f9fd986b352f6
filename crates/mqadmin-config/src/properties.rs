// ── Properties file codec ──
//
// The broker list is kept in Java `.properties` syntax so existing
// console installations keep working. Files are read as ISO-8859-1 and
// written as pure ASCII with `\uXXXX` escapes.

use std::path::Path;

use tracing::{debug, info};

use mqadmin_core::{PropertyMap, SessionConfig, load_broker_list, save_broker_list};

use crate::{ConfigError, Defaults};

const BROKER_LIST_HEADER: &str = "MQ admin console broker list";

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\x0c')
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Parse `.properties` text. Later duplicates win.
pub fn parse_properties(input: &str) -> Result<PropertyMap, ConfigError> {
    let mut props = PropertyMap::new();
    let mut lines = input.lines().enumerate();

    while let Some((index, raw)) = lines.next() {
        let line = raw.trim_start_matches(is_blank);
        if line.is_empty() || line.starts_with(['#', '!']) {
            continue;
        }

        let mut logical = line.to_owned();
        while continues(&logical) {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next.trim_start_matches(is_blank)),
                None => break,
            }
        }

        let (key, value) = split_entry(&logical);
        let line_no = index + 1;
        props.insert(unescape(key, line_no)?, unescape(value, line_no)?);
    }
    Ok(props)
}

/// An odd run of trailing backslashes joins the next line.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut end = line.len();
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '=' || c == ':' || is_blank(c) {
            end = i;
            break;
        }
    }

    let key = &line[..end];
    let mut rest = line[end..].trim_start_matches(is_blank);
    if let Some(stripped) = rest.strip_prefix(['=', ':']) {
        rest = stripped.trim_start_matches(is_blank);
    }
    (key, rest)
}

fn unescape(raw: &str, line: usize) -> Result<String, ConfigError> {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut buf = [0u16; 2];
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            units.extend_from_slice(c.encode_utf16(&mut buf));
            continue;
        }
        let decoded = match chars.next() {
            Some('t') => '\t',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('f') => '\x0c',
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if hex.len() != 4 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(ConfigError::Validation {
                        field: format!("properties line {line}"),
                        reason: format!("malformed \\u escape: \\u{hex}"),
                    });
                }
                let unit = u16::from_str_radix(&hex, 16).map_err(|e| ConfigError::Validation {
                    field: format!("properties line {line}"),
                    reason: e.to_string(),
                })?;
                units.push(unit);
                continue;
            }
            Some(other) => other,
            None => break,
        };
        units.extend_from_slice(decoded.encode_utf16(&mut buf));
    }
    Ok(String::from_utf16_lossy(&units))
}

// ── Rendering ───────────────────────────────────────────────────────

/// Render `props` one entry per line, sorted by key, with an optional
/// comment header.
pub fn render_properties(props: &PropertyMap, header: Option<&str>) -> String {
    let mut out = String::new();
    if let Some(header) = header {
        for line in header.lines() {
            out.push('#');
            out.push_str(&escape(line, false));
            out.push('\n');
        }
    }
    for (key, value) in props {
        out.push_str(&escape(key, true));
        out.push('=');
        out.push_str(&escape(value, false));
        out.push('\n');
    }
    out
}

fn escape(raw: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut buf = [0u16; 2];
    for (i, c) in raw.chars().enumerate() {
        match c {
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            '=' | ':' | '#' | '!' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => {
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04X}"));
                }
            }
        }
    }
    out
}

// ── Files ───────────────────────────────────────────────────────────

/// `None` when the file does not exist.
fn read_properties(path: &Path) -> Result<Option<PropertyMap>, ConfigError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let text: String = bytes.iter().copied().map(char::from).collect();
    parse_properties(&text).map(Some)
}

/// Broker entries stored at `path`, with retry and reconnect policies
/// taken from `defaults`. A missing file is an empty list.
pub fn load_broker_list_file(
    path: &Path,
    defaults: &Defaults,
) -> Result<Vec<SessionConfig>, ConfigError> {
    let Some(props) = read_properties(path)? else {
        debug!(path = %path.display(), "no broker list file");
        return Ok(Vec::new());
    };

    let mut brokers = load_broker_list(&props).map_err(|source| ConfigError::BrokerList {
        path: path.to_path_buf(),
        source,
    })?;
    for broker in &mut brokers {
        defaults.apply_policies(broker);
    }
    info!(path = %path.display(), count = brokers.len(), "loaded broker list");
    Ok(brokers)
}

/// Rewrite the broker entries at `path`, keeping any other keys the file
/// already holds.
pub fn save_broker_list_file(path: &Path, brokers: &[SessionConfig]) -> Result<(), ConfigError> {
    let mut props = read_properties(path)?.unwrap_or_default();
    save_broker_list(brokers, &mut props);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_properties(&props, Some(BROKER_LIST_HEADER)))?;
    info!(path = %path.display(), count = brokers.len(), "saved broker list");
    Ok(())
}
