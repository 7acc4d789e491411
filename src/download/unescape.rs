//! Entity decoding for document payloads.
//!
//! The document-fetch endpoint returns the XML entity-encoded inside a JSON
//! string (`&lt;nfeProc&gt;...`). This module decodes the named entities the
//! transport produces plus numeric character references; anything it does
//! not recognize is passed through untouched.

/// Decodes entity-encoded document text.
#[must_use]
pub fn unescape_document(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        // Entities are short; an unterminated '&' is literal text.
        match rest[1..].find(';').map(|i| i + 1) {
            Some(end) if end <= 10 => {
                if let Some(decoded) = decode_entity(&rest[1..end]) {
                    out.push(decoded);
                    rest = &rest[end + 1..];
                } else {
                    out.push('&');
                    rest = &rest[1..];
                }
            }
            _ => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Decodes one entity body (without `&` and `;`).
fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let num = entity.strip_prefix('#')?;
            let code = if let Some(hex) = num.strip_prefix(['x', 'X']) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                num.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}
