use bytes::Bytes;

/// A field body read in full, together with the field's declared
/// `Content-Type`.
///
/// Returned by [`Field::blob`](crate::Field::blob).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    bytes: Bytes,
    content_type: Option<String>,
}

impl Blob {
    /// Creates a blob from raw bytes and an optional content type.
    pub fn new<B: Into<Bytes>>(bytes: B, content_type: Option<String>) -> Blob {
        Blob {
            bytes: bytes.into(),
            content_type,
        }
    }

    /// The raw `Content-Type` value the field declared, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// The declared content type parsed as [`mime::Mime`], if it parses.
    pub fn mime(&self) -> Option<mime::Mime> {
        self.content_type.as_deref().and_then(|val| val.parse().ok())
    }

    /// The body bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Consumes the blob, returning the body bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// The body length in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
