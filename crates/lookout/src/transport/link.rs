//! Relay discovery from `Link` response headers.
//!
//! ```text
//! Link: <stun:stun.example.net>; rel="ice-server",
//!       <turn:turn.example.net?transport=udp>; rel="ice-server";
//!       username="user"; credential="secret"; credential-type="password"
//! ```
//!
//! Parsing is permissive: entries that don't parse are dropped and entries
//! with any other `rel` are ignored.

use serde::Serialize;

/// One relay server the media peer may use to traverse NAT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayDescriptor {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Parse every `rel="ice-server"` entry out of one or more joined header values.
pub fn parse_link_header(value: &str) -> Vec<RelayDescriptor> {
    split_outside(value, ',')
        .into_iter()
        .filter_map(|entry| parse_entry(entry.trim()))
        .collect()
}

fn parse_entry(entry: &str) -> Option<RelayDescriptor> {
    let rest = entry.strip_prefix('<')?;
    let end = rest.find('>')?;
    let url = rest[..end].trim();
    if url.is_empty() {
        return None;
    }

    let mut is_ice_server = false;
    let mut username = None;
    let mut credential = None;

    for param in split_outside(&rest[end + 1..], ';') {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let value = unquote(raw.trim());
        match key.trim().to_ascii_lowercase().as_str() {
            "rel" => {
                is_ice_server = value
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("ice-server"));
            }
            "username" => username = Some(value.to_string()),
            "credential" => credential = Some(value.to_string()),
            _ => {}
        }
    }

    is_ice_server.then(|| RelayDescriptor {
        url: url.to_string(),
        username,
        credential,
    })
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Split on `sep`, ignoring separators inside `<...>` or double quotes.
fn split_outside(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_angle = false;
    let mut in_quote = false;

    for (i, c) in input.char_indices() {
        match c {
            '"' if !in_angle => in_quote = !in_quote,
            '<' if !in_quote => in_angle = true,
            '>' if !in_quote => in_angle = false,
            c if c == sep && !in_angle && !in_quote => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}
