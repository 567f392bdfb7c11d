use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{self, Stream, TryStreamExt};
use http::header::{self, HeaderMap};
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use spin::mutex::spin::SpinMutex as Mutex;

use crate::buffer::BoxStream;
use crate::constants;
use crate::content_disposition::ContentDisposition;
use crate::helpers;
use crate::state::MultipartState;
use crate::tee;
use crate::Blob;

/// A single field of a multipart stream, or any standalone body with headers.
///
/// The body follows the fetch `Body` contract: it can be read exactly once,
/// as [`bytes`](Field::bytes), [`text`](Field::text), [`json`](Field::json),
/// [`blob`](Field::blob) or chunk by chunk. A second read fails with
/// [`Error::AlreadyConsumed`](crate::Error::AlreadyConsumed). Use
/// [`try_clone`](Field::try_clone) before reading to get a second, independent
/// reader.
///
/// # Warning About Leaks
///
/// To make progress, a [`Multipart`](crate::Multipart) waits until the field
/// it yielded last has been read to completion or dropped, together with all
/// of its clones. Holding on to an unread field while awaiting
/// [`Multipart::next_field`](crate::Multipart::next_field) never resolves.
pub struct Field {
    headers: HeaderMap,
    body: Body,
    meta: FieldMeta,
}

#[derive(Clone)]
struct FieldMeta {
    name: Option<String>,
    file_name: Option<String>,
    content_type: Option<mime::Mime>,
    idx: usize,
    fork_buffer_limit: u64,
}

/// Read state of a field body.
enum Body {
    /// No body at all; every read yields empty data.
    Empty,
    Unread(BoxStream),
    /// Chunks have been pulled with [`Field::chunk`].
    Streaming(BoxStream),
    /// Streamed to the end; further chunk reads yield nothing.
    Drained,
    /// Read as a whole.
    Consumed,
}

impl Field {
    pub(crate) fn from_multipart(
        state: Arc<Mutex<MultipartState>>,
        headers: HeaderMap,
        idx: usize,
        content_disposition: ContentDisposition,
        fork_buffer_limit: u64,
    ) -> Self {
        let body = Body::Unread(Box::pin(FieldData { state, done: false }));
        let content_type = Self::parse_content_type(&headers);

        Field {
            headers,
            body,
            meta: FieldMeta {
                name: content_disposition.field_name,
                file_name: content_disposition.file_name,
                content_type,
                idx,
                fork_buffer_limit,
            },
        }
    }

    /// Creates a standalone field whose body is the given bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use multiform::Field;
    /// use http::HeaderMap;
    ///
    /// # async fn run() {
    /// let mut field = Field::new("hello", HeaderMap::new());
    /// assert_eq!(field.text().await.unwrap(), "hello");
    /// assert!(field.text().await.is_err());
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    pub fn new<B: Into<Bytes>>(body: B, headers: HeaderMap) -> Field {
        let chunk: crate::Result<Bytes> = Ok(body.into());
        Self::with_body(Body::Unread(Box::pin(stream::iter(Some(chunk)))), headers)
    }

    /// Creates a standalone field whose body is read from `stream`.
    pub fn from_stream<S, O, E>(stream: S, headers: HeaderMap) -> Field
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        Self::with_body(Body::Unread(Box::pin(stream)), headers)
    }

    /// Creates a standalone field without a body.
    pub fn empty(headers: HeaderMap) -> Field {
        Self::with_body(Body::Empty, headers)
    }

    fn with_body(body: Body, headers: HeaderMap) -> Field {
        let content_disposition = ContentDisposition::parse(&headers);
        let content_type = Self::parse_content_type(&headers);

        Field {
            headers,
            body,
            meta: FieldMeta {
                name: content_disposition.field_name,
                file_name: content_disposition.file_name,
                content_type,
                idx: 0,
                fork_buffer_limit: constants::DEFAULT_FORK_BUFFER_LIMIT,
            },
        }
    }

    fn parse_content_type(headers: &HeaderMap) -> Option<mime::Mime> {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok())
    }

    /// The field name found in the `Content-Disposition` header.
    pub fn name(&self) -> Option<&str> {
        self.meta.name.as_deref()
    }

    /// The file name found in the `Content-Disposition` header.
    pub fn file_name(&self) -> Option<&str> {
        self.meta.file_name.as_deref()
    }

    /// The parsed `Content-Type` header of the field.
    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.meta.content_type.as_ref()
    }

    /// The full header set of the field. Lookups are case-insensitive.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The position of the field in its multipart stream, starting at `0`.
    pub fn index(&self) -> usize {
        self.meta.idx
    }

    /// Whether the body has been read, fully or partially.
    pub fn is_consumed(&self) -> bool {
        matches!(self.body, Body::Streaming(_) | Body::Drained | Body::Consumed)
    }

    /// Reads the whole body into a single buffer.
    ///
    /// A field without a body yields an empty buffer every time.
    pub async fn bytes(&mut self) -> crate::Result<Bytes> {
        let mut stream = match mem::replace(&mut self.body, Body::Consumed) {
            Body::Empty => {
                self.body = Body::Empty;
                return Ok(Bytes::new());
            }
            Body::Unread(stream) => stream,
            body => {
                self.body = body;
                return Err(crate::Error::AlreadyConsumed);
            }
        };

        let mut buf = BytesMut::new();

        while let Some(bytes) = stream.try_next().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Streams the next chunk of the body.
    ///
    /// Returns `None` once the body is exhausted. Afterwards every other read
    /// method fails with [`Error::AlreadyConsumed`](crate::Error::AlreadyConsumed),
    /// as does this one if the body was read as a whole.
    ///
    /// # Examples
    ///
    /// ```
    /// use multiform::Multipart;
    /// use bytes::Bytes;
    /// use std::convert::Infallible;
    /// use futures_util::stream::once;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
    /// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
    ///
    /// while let Some(mut field) = multipart.next_field().await.unwrap() {
    ///     while let Some(chunk) = field.chunk().await.unwrap() {
    ///         println!("Chunk: {:?}", chunk);
    ///     }
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        if let Body::Consumed = self.body {
            return Err(crate::Error::AlreadyConsumed);
        }

        self.try_next().await
    }

    /// Reads the whole body as text.
    ///
    /// The charset comes from the `charset` parameter of the field's
    /// `Content-Type` header and defaults to `utf-8`.
    pub async fn text(&mut self) -> crate::Result<String> {
        self.text_with_charset(constants::DEFAULT_CHARSET).await
    }

    /// Reads the whole body as text, using `default_encoding` when the
    /// field's `Content-Type` names no charset.
    ///
    /// Unknown charset labels fall back to `utf-8`. A byte order mark, if
    /// present, wins over the label.
    pub async fn text_with_charset(&mut self, default_encoding: &str) -> crate::Result<String> {
        let encoding_name = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(helpers::charset_from_content_type)
            .unwrap_or(default_encoding);

        let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);

        let bytes = self.bytes().await?;

        let (text, _, _) = encoding.decode(&bytes);

        Ok(text.into_owned())
    }

    /// Reads the whole body as text and deserializes it from JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    pub async fn json<T: DeserializeOwned>(&mut self) -> crate::Result<T> {
        let text = self.text().await?;
        serde_json::from_str(&text).map_err(crate::Error::DecodeJson)
    }

    /// Reads the whole body together with the declared `Content-Type`.
    pub async fn blob(&mut self) -> crate::Result<Blob> {
        let content_type = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .map(|val| val.to_owned());

        let bytes = self.bytes().await?;

        Ok(Blob::new(bytes, content_type))
    }

    /// Duplicates the field.
    ///
    /// An unread body is forked: this field and the returned one can each be
    /// read once, independently, and observe the same bytes. How far one
    /// reader may run ahead of the other is bounded by
    /// [`SizeLimit::fork_buffer`](crate::SizeLimit::fork_buffer).
    ///
    /// Fails with [`Error::AlreadyConsumed`](crate::Error::AlreadyConsumed)
    /// once the body has been read.
    pub fn try_clone(&mut self) -> crate::Result<Field> {
        let body = match mem::replace(&mut self.body, Body::Consumed) {
            Body::Empty => {
                self.body = Body::Empty;
                Body::Empty
            }
            Body::Unread(stream) => {
                #[cfg(feature = "log")]
                log::trace!("forking body of field {:?}", self.meta.name);

                let (original, cloned) = tee::tee(stream, self.meta.fork_buffer_limit);
                self.body = Body::Unread(Box::pin(original));
                Body::Unread(Box::pin(cloned))
            }
            body => {
                self.body = body;
                return Err(crate::Error::AlreadyConsumed);
            }
        };

        Ok(Field {
            headers: self.headers.clone(),
            body,
            meta: self.meta.clone(),
        })
    }
}

impl Stream for Field {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Body::Unread(_) = this.body {
            if let Body::Unread(stream) = mem::replace(&mut this.body, Body::Consumed) {
                this.body = Body::Streaming(stream);
            }
        }

        if let Body::Consumed = this.body {
            // Reported once, then the stream ends.
            this.body = Body::Drained;
            return Poll::Ready(Some(Err(crate::Error::AlreadyConsumed)));
        }

        let Body::Streaming(stream) = &mut this.body else {
            return Poll::Ready(None);
        };

        match stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(Err(err))) => {
                this.body = Body::Drained;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.body = Body::Drained;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.meta.name)
            .field("file_name", &self.meta.file_name)
            .field("index", &self.meta.idx)
            .field("headers", &self.headers)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// The body of the field currently open in a multipart stream, read straight
/// off the shared scanner state.
struct FieldData {
    state: Arc<Mutex<MultipartState>>,
    done: bool,
}

impl Stream for FieldData {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        let mut state = this.state.lock();

        loop {
            let err = match state.read_field_data() {
                Ok(Some((done, bytes))) => {
                    if done {
                        this.done = true;
                        state.release_field();

                        if bytes.is_empty() {
                            return Poll::Ready(None);
                        }
                    }

                    return Poll::Ready(Some(Ok(bytes)));
                }
                Ok(None) => match state.buffer.poll_chunk(cx) {
                    Poll::Ready(Ok(())) => continue,
                    Poll::Ready(Err(err)) => err,
                    Poll::Pending => return Poll::Pending,
                },
                Err(err) => err,
            };

            let err = state.halt(err);
            this.done = true;
            state.release_field();

            return Poll::Ready(Some(Err(err)));
        }
    }
}

impl Drop for FieldData {
    fn drop(&mut self) {
        if !self.done {
            // The scanner skips the unread rest on the next `next_field` call.
            self.state.lock().release_field();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use http::HeaderValue;

    fn headers_with_content_type(content_type: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers
    }

    #[tokio::test]
    async fn test_second_read_fails() {
        let mut field = Field::new("hello", HeaderMap::new());

        assert_eq!(field.bytes().await, Ok(Bytes::from_static(b"hello")));
        assert!(field.is_consumed());
        assert_eq!(field.bytes().await, Err(crate::Error::AlreadyConsumed));
        assert_eq!(field.text().await, Err(crate::Error::AlreadyConsumed));
        assert!(field.blob().await.is_err());
        assert!(field.try_clone().is_err());
    }

    #[tokio::test]
    async fn test_empty_body_reads_repeatedly() {
        let mut field = Field::empty(HeaderMap::new());

        assert_eq!(field.bytes().await, Ok(Bytes::new()));
        assert_eq!(field.text().await, Ok(String::new()));
        assert!(!field.is_consumed());

        let mut cloned = field.try_clone().unwrap();
        assert_eq!(cloned.bytes().await, Ok(Bytes::new()));
        assert_eq!(field.chunk().await, Ok(None));
    }

    #[tokio::test]
    async fn test_clone_before_read() {
        let mut field = Field::new("same bytes", headers_with_content_type("text/plain"));
        let mut cloned = field.try_clone().unwrap();

        assert_eq!(cloned.text().await, Ok("same bytes".to_owned()));
        assert_eq!(field.text().await, Ok("same bytes".to_owned()));
        assert_eq!(cloned.content_type(), Some(&mime::TEXT_PLAIN));
        assert!(cloned.try_clone().is_err());
    }

    #[tokio::test]
    async fn test_clone_of_clone() {
        let mut field = Field::new("abc", HeaderMap::new());
        let mut first = field.try_clone().unwrap();
        let mut second = first.try_clone().unwrap();

        assert_eq!(second.bytes().await.unwrap(), "abc");
        assert_eq!(field.bytes().await.unwrap(), "abc");
        assert_eq!(first.bytes().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_text_uses_declared_charset() {
        let utf16: Vec<u8> = "hé".encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect();
        let mut field = Field::new(utf16, headers_with_content_type("text/plain; charset=utf-16"));
        assert_eq!(field.text().await, Ok("hé".to_owned()));

        let mut field = Field::new(
            vec![0x63, 0x61, 0x66, 0xE9],
            headers_with_content_type("text/plain; charset=ISO-8859-1"),
        );
        assert_eq!(field.text().await, Ok("café".to_owned()));

        let mut field = Field::new("café", headers_with_content_type("text/plain"));
        assert_eq!(field.text().await, Ok("café".to_owned()));
    }

    #[tokio::test]
    async fn test_text_with_charset_default() {
        let mut field = Field::new(vec![0xE9], HeaderMap::new());
        assert_eq!(field.text_with_charset("windows-1252").await, Ok("é".to_owned()));
    }

    #[cfg(feature = "json")]
    #[tokio::test]
    async fn test_json() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Point {
            x: i32,
            y: i32,
        }

        let mut field = Field::new(r#"{"x": 1, "y": -2}"#, HeaderMap::new());
        assert_eq!(field.json::<Point>().await, Ok(Point { x: 1, y: -2 }));

        let mut field = Field::new("{not json", HeaderMap::new());
        assert!(matches!(field.json::<serde_json::Value>().await, Err(crate::Error::DecodeJson(_))));
        assert_eq!(field.json::<serde_json::Value>().await.unwrap_err(), crate::Error::AlreadyConsumed);
    }

    #[tokio::test]
    async fn test_blob() {
        let mut field = Field::new("<p>hi</p>", headers_with_content_type("text/html; charset=utf-8"));
        let blob = field.blob().await.unwrap();

        assert_eq!(blob.bytes(), "<p>hi</p>");
        assert_eq!(blob.content_type(), Some("text/html; charset=utf-8"));
        assert_eq!(blob.mime().map(|m| m.essence_str().to_owned()), Some("text/html".to_owned()));

        let mut field = Field::new("raw", HeaderMap::new());
        assert_eq!(field.blob().await.unwrap().content_type(), None);
    }

    #[tokio::test]
    async fn test_chunk_after_whole_read_fails() {
        let mut field = Field::new("whole", HeaderMap::new());

        assert_eq!(field.text().await, Ok("whole".to_owned()));
        assert_eq!(field.chunk().await, Err(crate::Error::AlreadyConsumed));
        assert_eq!(field.chunk().await, Err(crate::Error::AlreadyConsumed));

        let mut field = Field::new("whole", HeaderMap::new());
        assert_eq!(field.bytes().await, Ok(Bytes::from_static(b"whole")));

        let items: Vec<crate::Result<Bytes>> = field.by_ref().collect().await;
        assert_eq!(items, vec![Err(crate::Error::AlreadyConsumed)]);
    }

    #[tokio::test]
    async fn test_chunks_then_bytes() {
        let chunks = vec![Ok::<_, std::convert::Infallible>("ab"), Ok("cd")];
        let mut field = Field::from_stream(stream::iter(chunks), HeaderMap::new());

        assert_eq!(field.chunk().await, Ok(Some(Bytes::from_static(b"ab"))));
        assert!(field.is_consumed());
        assert_eq!(field.bytes().await, Err(crate::Error::AlreadyConsumed));
        assert_eq!(field.chunk().await, Ok(Some(Bytes::from_static(b"cd"))));
        assert_eq!(field.chunk().await, Ok(None));
        assert_eq!(field.chunk().await, Ok(None));
    }

    #[tokio::test]
    async fn test_metadata_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_static(r#"form-data; name="upload"; filename="a.txt""#),
        );

        let field = Field::empty(headers);
        assert_eq!(field.name(), Some("upload"));
        assert_eq!(field.file_name(), Some("a.txt"));
        assert_eq!(field.index(), 0);
        assert_eq!(
            field.headers().get("Content-Disposition").unwrap(),
            r#"form-data; name="upload"; filename="a.txt""#
        );
    }
}
