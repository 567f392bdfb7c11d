use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::Stream;

use crate::helpers;

pub(crate) type BoxStream = Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send + 'static>>;

pub(crate) struct StreamBuffer {
    pub(crate) eof: bool,
    pub(crate) buf: BytesMut,
    pub(crate) stream: Option<BoxStream>,
    pub(crate) whole_stream_size_limit: u64,
    pub(crate) stream_size_counter: u64,
}

impl StreamBuffer {
    pub fn new(stream: BoxStream, whole_stream_size_limit: u64) -> Self {
        StreamBuffer {
            eof: false,
            buf: BytesMut::new(),
            stream: Some(stream),
            whole_stream_size_limit,
            stream_size_counter: 0,
        }
    }

    /// Pulls exactly one chunk from the source into the buffer.
    ///
    /// Resolves once a chunk was appended or the source ended; the caller
    /// re-runs its scan afterwards.
    pub fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<()>> {
        let Some(stream) = self.stream.as_mut() else {
            self.eof = true;
            return Poll::Ready(Ok(()));
        };

        match stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(data))) => {
                #[cfg(feature = "log")]
                log::trace!("pulled chunk of {} bytes", data.len());

                self.stream_size_counter += data.len() as u64;

                if self.stream_size_counter > self.whole_stream_size_limit {
                    return Poll::Ready(Err(crate::Error::StreamSizeExceeded {
                        limit: self.whole_stream_size_limit,
                    }));
                }

                self.buf.extend_from_slice(&data);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Err(err)),
            Poll::Ready(None) => {
                self.eof = true;
                self.release();
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Drops the source stream. Already buffered bytes stay readable.
    pub fn release(&mut self) {
        self.stream = None;
    }

    pub fn read_until(&mut self, pattern: &[u8]) -> Option<Bytes> {
        helpers::find_bytes(&self.buf, pattern).map(|idx| self.buf.split_to(idx + pattern.len()).freeze())
    }

    /// Drops everything up to and including `marker`.
    ///
    /// Returns `false` if the marker isn't buffered yet, in which case only
    /// a tail that may still begin the marker is kept.
    pub fn skip_through(&mut self, marker: &[u8]) -> bool {
        match helpers::find_bytes(&self.buf, marker) {
            Some(idx) => {
                self.buf.advance(idx + marker.len());
                true
            }
            None => {
                let keep_from = helpers::partial_match_start(&self.buf, marker);
                self.buf.advance(keep_from);
                false
            }
        }
    }

    /// Splits off the field bytes that are certain to precede `delimiter`.
    ///
    /// `Ok(Some((true, bytes)))` means the delimiter was found and consumed,
    /// `Ok(Some((false, bytes)))` releases a partial chunk and `Ok(None)`
    /// asks for more input.
    pub fn read_field_data(
        &mut self,
        delimiter: &[u8],
        field_name: Option<&str>,
    ) -> crate::Result<Option<(bool, Bytes)>> {
        if let Some(idx) = helpers::find_bytes(&self.buf, delimiter) {
            let bytes = self.buf.split_to(idx).freeze();
            self.buf.advance(delimiter.len());
            return Ok(Some((true, bytes)));
        }

        if self.eof {
            return Err(crate::Error::IncompleteFieldData {
                field_name: field_name.map(|s| s.to_owned()),
            });
        }

        match helpers::partial_match_start(&self.buf, delimiter) {
            0 => Ok(None),
            idx => Ok(Some((false, self.buf.split_to(idx).freeze()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn buffer_with(data: &'static [u8]) -> StreamBuffer {
        let mut buffer = StreamBuffer::new(Box::pin(stream::empty::<crate::Result<Bytes>>()), u64::MAX);
        buffer.buf.extend_from_slice(data);
        buffer
    }

    #[test]
    fn test_read_field_data_keeps_partial_delimiter() {
        let mut buffer = buffer_with(b"hello world\r\n--X");

        let (done, bytes) = buffer.read_field_data(b"\r\n--XYZ", None).unwrap().unwrap();
        assert!(!done);
        assert_eq!(bytes, &b"hello world"[..]);
        assert_eq!(&buffer.buf[..], b"\r\n--X");

        assert_eq!(buffer.read_field_data(b"\r\n--XYZ", None), Ok(None));

        buffer.buf.extend_from_slice(b"YZ--\r\n");
        let (done, bytes) = buffer.read_field_data(b"\r\n--XYZ", None).unwrap().unwrap();
        assert!(done);
        assert!(bytes.is_empty());
        assert_eq!(&buffer.buf[..], b"--\r\n");
    }

    #[test]
    fn test_read_field_data_at_eof() {
        let mut buffer = buffer_with(b"trailing");
        buffer.eof = true;

        assert_eq!(
            buffer.read_field_data(b"\r\n--XYZ", Some("a")),
            Err(crate::Error::IncompleteFieldData {
                field_name: Some("a".to_owned())
            })
        );
    }

    #[test]
    fn test_skip_through() {
        let mut buffer = buffer_with(b"preamble text --XY");
        assert!(!buffer.skip_through(b"--XYZ"));
        assert_eq!(&buffer.buf[..], b"--XY");

        buffer.buf.extend_from_slice(b"Z\r\nrest");
        assert!(buffer.skip_through(b"--XYZ"));
        assert_eq!(&buffer.buf[..], b"\r\nrest");
    }

    #[test]
    fn test_read_until() {
        let mut buffer = buffer_with(b"\r\nA: b\r\n\r\nbody");
        assert_eq!(buffer.read_until(b"\r\n\r\n"), Some(Bytes::from_static(b"\r\nA: b\r\n\r\n")));
        assert_eq!(&buffer.buf[..], b"body");
        assert_eq!(buffer.read_until(b"\r\n\r\n"), None);
    }
}
