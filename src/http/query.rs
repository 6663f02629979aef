//! Query string decoding.
//!
//! Besides the plain `=` and `&` separators, clients of this server are known
//! to send them percent-encoded (`%3D`, `%26`) or HTML-escaped (`&amp;`), so
//! all three spellings are accepted.

use percent_encoding::percent_decode_str;

/// Decoded query parameters in the order they appeared.
///
/// Duplicate keys are kept; [`get`](Self::get) returns the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn push(&mut self, key: &str, value: &str) {
        self.pairs.push((url_decode(key), url_decode(value)));
    }
}

/// Parses a raw (still encoded) query string, without the leading `?`.
///
/// A query with no separator at all, like `?debug`, yields a single key
/// with an empty value.
pub fn parse_query_string(query: &str) -> QueryParams {
    let mut params = QueryParams::new();
    if query.is_empty() {
        return params;
    }

    let bytes = query.as_bytes();
    let mut start = 0;
    let mut name: Option<&str> = None;
    let mut i = 0;

    while i < bytes.len() {
        match name {
            None => {
                if let Some(len) = key_separator_at(bytes, i) {
                    name = Some(&query[start..i]);
                    i += len;
                    start = i;
                    continue;
                }
            }
            Some(key) => {
                if let Some(len) = pair_separator_at(bytes, i) {
                    params.push(key, &query[start..i]);
                    name = None;
                    i += len;
                    start = i;
                    continue;
                }
            }
        }
        i += 1;
    }

    match name {
        Some(name) => params.push(name, &query[start..]),
        None if params.is_empty() => params.push(query, ""),
        None => {}
    }

    params
}

fn key_separator_at(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        b'=' => Some(1),
        b'%' if matches_ignore_case(&bytes[i..], b"%3d") => Some(3),
        _ => None,
    }
}

fn pair_separator_at(bytes: &[u8], i: usize) -> Option<usize> {
    match bytes[i] {
        b'&' if matches_ignore_case(&bytes[i..], b"&amp;") => Some(5),
        b'&' => Some(1),
        b'%' if matches_ignore_case(&bytes[i..], b"%26") => Some(3),
        _ => None,
    }
}

fn matches_ignore_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.len() >= needle.len() && haystack[..needle.len()].eq_ignore_ascii_case(needle)
}

/// Decodes `+` as space and percent escapes; invalid UTF-8 is replaced.
pub fn url_decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
