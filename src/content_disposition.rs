use http::header::{self, HeaderMap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ContentDisposition {
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    pub fn parse(headers: &HeaderMap) -> ContentDisposition {
        let Some(content_disposition) = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|val| val.to_str().ok())
        else {
            return ContentDisposition::default();
        };

        let mut disposition = ContentDisposition::default();

        for (key, value) in params(content_disposition) {
            if key.eq_ignore_ascii_case("name") {
                disposition.field_name.get_or_insert(value);
            } else if key.eq_ignore_ascii_case("filename") {
                disposition.file_name.get_or_insert(value);
            }
        }

        disposition
    }
}

/// Iterates over the `key=value` parameters following the disposition type,
/// unquoting quoted values. A `;` inside quotes doesn't split.
fn params(value: &str) -> impl Iterator<Item = (&str, String)> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in value.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);

    segments.into_iter().skip(1).filter_map(|segment| {
        let (key, raw) = segment.split_once('=')?;
        Some((key.trim(), unquote(raw.trim())))
    })
}

fn unquote(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(quoted) => {
            let mut out = String::with_capacity(quoted.len());
            let mut chars = quoted.chars();

            while let Some(ch) = chars.next() {
                match ch {
                    '\\' => out.extend(chars.next()),
                    _ => out.push(ch),
                }
            }

            out
        }
        None => raw.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn parse(val: &'static str) -> ContentDisposition {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_DISPOSITION, HeaderValue::from_static(val));
        ContentDisposition::parse(&headers)
    }

    #[test]
    fn test_field_name() {
        assert_eq!(parse(r#"form-data; name="my_field""#).field_name.as_deref(), Some("my_field"));
        assert_eq!(parse(r#"form-data; name="my field""#).field_name.as_deref(), Some("my field"));
        assert_eq!(parse(r#"form-data; name=plain"#).field_name.as_deref(), Some("plain"));
        assert_eq!(parse(r#"form-data; name="a;b""#).field_name.as_deref(), Some("a;b"));
        assert_eq!(parse(r#"form-data; name="say \"hi\"""#).field_name.as_deref(), Some("say \"hi\""));
    }

    #[test]
    fn test_file_name() {
        let disposition = parse(r#"form-data; name="my_field"; filename="file abc.txt""#);
        assert_eq!(disposition.field_name.as_deref(), Some("my_field"));
        assert_eq!(disposition.file_name.as_deref(), Some("file abc.txt"));

        let disposition = parse(r#"form-data; filename="file-name.txt""#);
        assert_eq!(disposition.field_name, None);
        assert_eq!(disposition.file_name.as_deref(), Some("file-name.txt"));
    }

    #[test]
    fn test_missing_header() {
        assert_eq!(ContentDisposition::parse(&HeaderMap::new()), ContentDisposition::default());
    }
}
