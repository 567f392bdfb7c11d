use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
use spin::mutex::spin::SpinMutex as Mutex;
#[cfg(feature = "tokio-io")]
use {tokio::io::AsyncRead, tokio_util::io::ReaderStream};

use crate::buffer::StreamBuffer;
use crate::constraints::Constraints;
use crate::content_disposition::ContentDisposition;
use crate::state::{MultipartState, StreamingStage};
use crate::Field;

/// Represents the implementation of `multipart/form-data` formatted data.
///
/// This will parse the source stream into [`Field`] instances via its
/// [`Stream`] implementation.
///
/// To maintain consistency in the underlying stream, this will not yield more
/// than one [`Field`] at a time, and it won't read past the body of the
/// current field until that body has been read or the field dropped. Do avoid
/// leaking the [`Field`] type or anything which contains it.
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
///     println!("Field: {:?}", field.text().await)
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Multipart {
    state: Arc<Mutex<MultipartState>>,
    constraints: Constraints,
}

impl Multipart {
    /// Construct a new `Multipart` instance with the given [`Bytes`] stream
    /// and the boundary.
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> Multipart
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        Multipart::with_constraints(stream, boundary, Constraints::default())
    }

    /// Construct a new `Multipart` instance with the given [`Bytes`] stream,
    /// the boundary and some [`Constraints`].
    pub fn with_constraints<S, O, E, B>(stream: S, boundary: B, constraints: Constraints) -> Multipart
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
        B: Into<String>,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        let buffer = StreamBuffer::new(Box::pin(stream), constraints.size_limit.whole_stream);
        let state = MultipartState::new(buffer, &boundary.into());

        Multipart {
            state: Arc::new(Mutex::new(state)),
            constraints,
        }
    }

    /// Construct a new `Multipart` instance from a request's headers and body
    /// stream. The boundary is taken from the `Content-Type` header.
    ///
    /// # Examples
    ///
    /// ```
    /// use multiform::Multipart;
    /// use bytes::Bytes;
    /// use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue};
    /// use std::convert::Infallible;
    /// use futures_util::stream::once;
    ///
    /// # async fn run() {
    /// let mut headers = HeaderMap::new();
    /// headers.insert(CONTENT_TYPE, HeaderValue::from_static("multipart/form-data; boundary=X-BOUNDARY"));
    ///
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
    /// let mut multipart = Multipart::from_headers(&headers, stream).unwrap();
    ///
    /// let mut field = multipart.next_field().await.unwrap().unwrap();
    /// assert_eq!(field.text().await.unwrap(), "abcd");
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    pub fn from_headers<S, O, E>(headers: &HeaderMap, stream: S) -> crate::Result<Multipart>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        Multipart::from_headers_with_constraints(headers, stream, Constraints::default())
    }

    /// Same as [`from_headers`](Multipart::from_headers), applying some
    /// [`Constraints`].
    pub fn from_headers_with_constraints<S, O, E>(
        headers: &HeaderMap,
        stream: S,
        constraints: Constraints,
    ) -> crate::Result<Multipart>
    where
        S: Stream<Item = Result<O, E>> + Send + 'static,
        O: Into<Bytes> + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
    {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .ok_or(crate::Error::MissingContentType)?
            .to_str()
            .map_err(|_| crate::Error::NoMultipart)?;

        let boundary = crate::parse_boundary(content_type)?;

        Ok(Multipart::with_constraints(stream, boundary, constraints))
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader and the boundary.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use multiform::Multipart;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let reader = data.as_bytes();
    /// let mut multipart = Multipart::with_reader(reader, "X-BOUNDARY");
    ///
    /// while let Some(mut field) = multipart.next_field().await.unwrap() {
    ///     while let Some(chunk) = field.chunk().await.unwrap() {
    ///         println!("Chunk: {:?}", chunk);
    ///     }
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    #[cfg(feature = "tokio-io")]
    pub fn with_reader<R, B>(reader: R, boundary: B) -> Multipart
    where
        R: AsyncRead + Send + 'static,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::new(stream, boundary)
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader, the boundary and some [`Constraints`].
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    pub fn with_reader_with_constraints<R, B>(reader: R, boundary: B, constraints: Constraints) -> Multipart
    where
        R: AsyncRead + Send + 'static,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::with_constraints(stream, boundary, constraints)
    }

    /// Yields the next [`Field`] if available.
    ///
    /// Any error is fatal: the source is released and subsequent calls yield
    /// `Ok(None)`.
    ///
    /// For more info, go to [`Field`](Field#warning-about-leaks).
    pub async fn next_field(&mut self) -> crate::Result<Option<Field>> {
        self.try_next().await
    }

    /// Yields the next [`Field`] with their positioning index as a tuple
    /// `(usize, Field)`.
    ///
    /// For more info, go to [`Field`](Field#warning-about-leaks).
    pub async fn next_field_with_idx(&mut self) -> crate::Result<Option<(usize, Field)>> {
        self.try_next().await.map(|f| f.map(|field| (field.index(), field)))
    }
}

impl Stream for Multipart {
    type Item = crate::Result<Field>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut state = this.state.lock();

        if state.stage == StreamingStage::Eof {
            return Poll::Ready(None);
        }

        if !state.is_prev_field_consumed {
            state.next_field_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let headers = match state.poll_next_headers(cx) {
            Poll::Ready(Ok(Some(headers))) => headers,
            Poll::Ready(Ok(None)) => return Poll::Ready(None),
            Poll::Ready(Err(err)) => return Poll::Ready(Some(Err(err))),
            Poll::Pending => return Poll::Pending,
        };

        let content_disposition = ContentDisposition::parse(&headers);
        let field_name = content_disposition.field_name.as_deref();

        if !this.constraints.is_it_allowed(field_name) {
            let err = crate::Error::UnknownField {
                field_name: field_name.map(|name| name.to_owned()),
            };
            return Poll::Ready(Some(Err(state.halt(err))));
        }

        let field_idx = state.next_field_idx;
        state.next_field_idx += 1;
        state.is_prev_field_consumed = false;
        state.curr_field_size_limit = this.constraints.size_limit.extract_size_limit_for(field_name);
        state.curr_field_size_counter = 0;
        state.curr_field_name = content_disposition.field_name.clone();

        #[cfg(feature = "log")]
        log::debug!("yielding field #{} {:?}", field_idx, state.curr_field_name);

        drop(state);

        Poll::Ready(Some(Ok(Field::from_multipart(
            Arc::clone(&this.state),
            headers,
            field_idx,
            content_disposition,
            this.constraints.size_limit.fork_buffer,
        ))))
    }
}
