//! Percent escaping for DSON references.
//!
//! The document format escapes spaces and reserved separator characters in
//! reference components (`%20` and friends). Only the rules the format
//! actually relies on are implemented here; this is not a general URL codec.

/// Characters that never need escaping inside a reference component.
fn is_unreserved(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~' | b'/' | b'+')
}

/// Percent-escape a component. Separators (`:`, `#`, `?`, `%`) and spaces are
/// always escaped so the result can be embedded in a raw reference string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push_str(&format!("{:02X}", b));
        }
    }
    out
}

/// Decode percent escapes. Malformed escapes are passed through verbatim,
/// matching the permissive behavior of the documents in the wild.
pub fn unquote(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(hex) = bytes.get(i + 1..i + 3) {
                if let Ok(v) =
                    std::str::from_utf8(hex).map_err(|_| ()).and_then(|h| {
                        u8::from_str_radix(h, 16).map_err(|_| ())
                    })
                {
                    out.push(v);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
