use std::convert::TryFrom;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use httparse::Header;

use crate::constants;

pub(crate) fn convert_raw_headers_to_header_map(raw_headers: &[Header<'_>]) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw_headers.len());

    for raw_header in raw_headers {
        let name = HeaderName::try_from(raw_header.name).map_err(|err| crate::Error::DecodeHeaderName {
            name: raw_header.name.to_owned(),
            cause: err.into(),
        })?;

        let value = HeaderValue::try_from(raw_header.value).map_err(|err| crate::Error::DecodeHeaderValue {
            value: raw_header.value.to_owned(),
            cause: err.into(),
        })?;

        headers.append(name, value);
    }

    Ok(headers)
}

pub(crate) fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(haystack, needle)
}

/// Returns the index of the earliest suffix of `buf` that is a proper prefix
/// of `needle`, or `buf.len()` when no such suffix exists.
///
/// Everything before the returned index can never be part of a `needle`
/// occurrence, no matter what bytes arrive next.
pub(crate) fn partial_match_start(buf: &[u8], needle: &[u8]) -> usize {
    let Some(&first) = needle.first() else {
        return buf.len();
    };

    let from = buf.len().saturating_sub(needle.len() - 1);

    memchr::memchr_iter(first, &buf[from..])
        .map(|rel_idx| from + rel_idx)
        .find(|&idx| needle.starts_with(&buf[idx..]))
        .unwrap_or(buf.len())
}

/// Extracts the `charset=` parameter of a `Content-Type` value.
///
/// The parameter name matches case-insensitively; the value runs until
/// whitespace or one of the MIME `tspecials`.
pub(crate) fn charset_from_content_type(content_type: &str) -> Option<&str> {
    let lowered = content_type.to_ascii_lowercase();
    let start = find_bytes(lowered.as_bytes(), constants::CHARSET_PARAM.as_bytes())? + constants::CHARSET_PARAM.len();

    let rest = &content_type[start..];
    let end = rest
        .bytes()
        .position(|b| b.is_ascii_whitespace() || constants::CHARSET_DELIMITERS.contains(&b))
        .unwrap_or(rest.len());

    Some(&rest[..end]).filter(|charset| !charset.is_empty())
}
