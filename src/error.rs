use std::fmt::{self, Debug, Display, Formatter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while parsing a multipart stream or reading
/// a field's body.
#[non_exhaustive]
pub enum Error {
    /// An unknown field is detected when multipart
    /// [`constraints`](crate::Constraints::allowed_fields) are added.
    UnknownField { field_name: Option<String> },

    /// The stream ended before the field data was terminated by a boundary.
    IncompleteFieldData { field_name: Option<String> },

    /// Couldn't read the field headers completely.
    IncompleteHeaders,

    /// Failed to read headers.
    ReadHeaderFailed(httparse::Error),

    /// Failed to decode the field's raw header name to
    /// [`HeaderName`](http::header::HeaderName) type.
    DecodeHeaderName { name: String, cause: BoxError },

    /// Failed to decode the field's raw header value to
    /// [`HeaderValue`](http::header::HeaderValue) type.
    DecodeHeaderValue { value: Vec<u8>, cause: BoxError },

    /// Multipart stream is incomplete.
    IncompleteStream,

    /// A boundary marker was followed by something other than `CRLF` or `--`.
    MalformedDelimiter,

    /// The incoming field size exceeded the maximum limit.
    FieldSizeExceeded { limit: u64, field_name: Option<String> },

    /// The incoming stream size exceeded the maximum limit.
    StreamSizeExceeded { limit: u64 },

    /// One side of a cloned field ran further ahead of the other than the
    /// fork buffer allows.
    ForkBufferExceeded { limit: u64 },

    /// Stream read failed.
    StreamReadFailed(BoxError),

    /// The field body has already been read.
    AlreadyConsumed,

    /// No `Content-Type` header was found.
    MissingContentType,

    /// The `Content-Type` header is not `multipart/*`.
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    DecodeContentType(mime::FromStrError),

    /// No boundary found in `Content-Type` header.
    NoBoundary,

    /// Failed to decode the field data as `JSON` in
    /// [`field.json()`](crate::Field::json) method.
    #[cfg(feature = "json")]
    DecodeJson(serde_json::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownField { field_name } => {
                let name = field_name.as_deref().unwrap_or("<unknown>");
                write!(f, "unknown field received: {:?}", name)
            }
            Error::IncompleteFieldData { field_name } => {
                let name = field_name.as_deref().unwrap_or("<unknown>");
                write!(f, "field {:?} received with incomplete data", name)
            }
            Error::IncompleteHeaders => write!(f, "failed to read field complete headers"),
            Error::ReadHeaderFailed(e) => write!(f, "failed to read headers: {}", e),
            Error::DecodeHeaderName { name, cause } => {
                write!(f, "failed to decode field's raw header name: {:?} {}", name, cause)
            }
            Error::DecodeHeaderValue { cause, .. } => {
                write!(f, "failed to decode field's raw header value: {}", cause)
            }
            Error::IncompleteStream => write!(f, "incomplete multipart stream"),
            Error::MalformedDelimiter => write!(f, "multipart boundary is not followed by CRLF or `--`"),
            Error::FieldSizeExceeded { limit, field_name } => {
                let name = field_name.as_deref().unwrap_or("<unknown>");
                write!(f, "field {:?} exceeded the size limit: {} bytes", name, limit)
            }
            Error::StreamSizeExceeded { limit } => {
                write!(f, "stream size exceeded limit: {} bytes", limit)
            }
            Error::ForkBufferExceeded { limit } => {
                write!(f, "cloned field readers drifted apart by more than {} bytes", limit)
            }
            Error::StreamReadFailed(e) => write!(f, "failed to read stream: {}", e),
            Error::AlreadyConsumed => write!(f, "field body has already been read"),
            Error::MissingContentType => write!(f, "no Content-Type header found"),
            Error::NoMultipart => write!(f, "Content-Type is not multipart"),
            Error::DecodeContentType(e) => write!(f, "unable to decode Content-Type: {}", e),
            Error::NoBoundary => write!(f, "multipart boundary not found in Content-Type"),
            #[cfg(feature = "json")]
            Error::DecodeJson(e) => write!(f, "failed to decode field data as JSON: {}", e),
        }
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ReadHeaderFailed(e) => Some(e),
            Error::DecodeHeaderName { cause, .. } => Some(&**cause),
            Error::DecodeHeaderValue { cause, .. } => Some(&**cause),
            Error::StreamReadFailed(e) => Some(&**e),
            Error::DecodeContentType(e) => Some(e),
            #[cfg(feature = "json")]
            Error::DecodeJson(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Builds an equal error of the same variant, for handing one failure to
    /// several readers. Boxed causes are carried over by message.
    pub(crate) fn replay(&self) -> Error {
        match self {
            Error::UnknownField { field_name } => Error::UnknownField {
                field_name: field_name.clone(),
            },
            Error::IncompleteFieldData { field_name } => Error::IncompleteFieldData {
                field_name: field_name.clone(),
            },
            Error::IncompleteHeaders => Error::IncompleteHeaders,
            Error::ReadHeaderFailed(e) => Error::ReadHeaderFailed(*e),
            Error::DecodeHeaderName { name, cause } => Error::DecodeHeaderName {
                name: name.clone(),
                cause: cause.to_string().into(),
            },
            Error::DecodeHeaderValue { value, cause } => Error::DecodeHeaderValue {
                value: value.clone(),
                cause: cause.to_string().into(),
            },
            Error::IncompleteStream => Error::IncompleteStream,
            Error::MalformedDelimiter => Error::MalformedDelimiter,
            Error::FieldSizeExceeded { limit, field_name } => Error::FieldSizeExceeded {
                limit: *limit,
                field_name: field_name.clone(),
            },
            Error::StreamSizeExceeded { limit } => Error::StreamSizeExceeded { limit: *limit },
            Error::ForkBufferExceeded { limit } => Error::ForkBufferExceeded { limit: *limit },
            Error::StreamReadFailed(e) => Error::StreamReadFailed(e.to_string().into()),
            Error::AlreadyConsumed => Error::AlreadyConsumed,
            Error::MissingContentType => Error::MissingContentType,
            Error::NoMultipart => Error::NoMultipart,
            // `mime::FromStrError` can't be rebuilt without its input.
            Error::DecodeContentType(e) => Error::StreamReadFailed(e.to_string().into()),
            Error::NoBoundary => Error::NoBoundary,
            #[cfg(feature = "json")]
            Error::DecodeJson(e) => Error::DecodeJson(<serde_json::Error as serde::de::Error>::custom(e.to_string())),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_keeps_variant() {
        let err = Error::IncompleteFieldData {
            field_name: Some("a".to_owned()),
        };
        assert!(matches!(err.replay(), Error::IncompleteFieldData { field_name: Some(ref name) } if name == "a"));

        let err = Error::FieldSizeExceeded {
            limit: 2,
            field_name: None,
        };
        assert!(matches!(err.replay(), Error::FieldSizeExceeded { limit: 2, field_name: None }));

        assert!(matches!(Error::MalformedDelimiter.replay(), Error::MalformedDelimiter));
        assert!(matches!(
            Error::ReadHeaderFailed(httparse::Error::HeaderName).replay(),
            Error::ReadHeaderFailed(httparse::Error::HeaderName)
        ));

        let err = Error::StreamReadFailed("connection reset".into());
        assert_eq!(err.replay(), err);
        assert!(matches!(err.replay(), Error::StreamReadFailed(_)));
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_replay_json_error() {
        let err = Error::DecodeJson(serde_json::from_str::<serde_json::Value>("{oops").unwrap_err());

        let replayed = err.replay();
        assert!(matches!(replayed, Error::DecodeJson(_)));
        assert_eq!(replayed, err);
    }
}
