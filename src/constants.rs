pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_PER_FIELD_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_FORK_BUFFER_LIMIT: u64 = u64::MAX;

pub(crate) const MAX_HEADERS: usize = 32;
pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";

pub(crate) const DEFAULT_CHARSET: &str = "utf-8";
pub(crate) const CHARSET_PARAM: &str = "charset=";

/// Characters that end a `charset=` value in a `Content-Type` header, besides whitespace.
pub(crate) const CHARSET_DELIMITERS: &[u8] = b"()<>@,;:\"/[]?.=";

/// The `--boundary` and `\r\n--boundary` byte sequences cached for one parse.
#[derive(Debug, Clone)]
pub(crate) struct BoundaryMarkers {
    pub(crate) start: Vec<u8>,
    pub(crate) delimiter: Vec<u8>,
}

impl BoundaryMarkers {
    pub(crate) fn new(boundary: &str) -> BoundaryMarkers {
        let start = format!("{}{}", BOUNDARY_EXT, boundary).into_bytes();
        let delimiter = format!("{}{}{}", CRLF, BOUNDARY_EXT, boundary).into_bytes();

        BoundaryMarkers { start, delimiter }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_markers() {
        let markers = BoundaryMarkers::new("xYz");
        assert_eq!(markers.start, b"--xYz");
        assert_eq!(markers.delimiter, b"\r\n--xYz");
    }
}
