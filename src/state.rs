use std::task::{Context, Poll, Waker};

use http::header::HeaderMap;

use crate::buffer::StreamBuffer;
use crate::constants::{self, BoundaryMarkers};
use crate::helpers;

pub(crate) struct MultipartState {
    pub(crate) buffer: StreamBuffer,
    pub(crate) markers: BoundaryMarkers,
    pub(crate) stage: StreamingStage,
    pub(crate) is_prev_field_consumed: bool,
    pub(crate) next_field_waker: Option<Waker>,
    pub(crate) next_field_idx: usize,
    pub(crate) curr_field_name: Option<String>,
    pub(crate) curr_field_size_limit: u64,
    pub(crate) curr_field_size_counter: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamingStage {
    ConsumingPreamble,
    ReadingHeaderBlock,
    ReadingPartBody,
    Eof,
}

/// What a single scan over the buffered bytes achieved.
enum Transition {
    NeedMore,
    Advanced,
    Headers(HeaderMap),
    End,
}

impl MultipartState {
    pub(crate) fn new(buffer: StreamBuffer, boundary: &str) -> MultipartState {
        MultipartState {
            buffer,
            markers: BoundaryMarkers::new(boundary),
            stage: StreamingStage::ConsumingPreamble,
            is_prev_field_consumed: true,
            next_field_waker: None,
            next_field_idx: 0,
            curr_field_name: None,
            curr_field_size_limit: constants::DEFAULT_PER_FIELD_SIZE_LIMIT,
            curr_field_size_counter: 0,
        }
    }

    /// Drives the scanner until the next header block is parsed.
    ///
    /// Any error halts the parse for good.
    pub(crate) fn poll_next_headers(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<Option<HeaderMap>>> {
        loop {
            let transition = match self.stage {
                StreamingStage::ConsumingPreamble => self.consume_preamble(),
                StreamingStage::ReadingHeaderBlock => self.read_header_block(),
                StreamingStage::ReadingPartBody => self.discard_field_data(),
                StreamingStage::Eof => return Poll::Ready(Ok(None)),
            };

            match transition {
                Ok(Transition::Headers(headers)) => return Poll::Ready(Ok(Some(headers))),
                Ok(Transition::End) => {
                    #[cfg(feature = "log")]
                    log::debug!("reached the multipart end marker");
                    self.finish();
                    return Poll::Ready(Ok(None));
                }
                Ok(Transition::Advanced) => continue,
                Ok(Transition::NeedMore) => {}
                Err(err) => return Poll::Ready(Err(self.halt(err))),
            }

            match self.buffer.poll_chunk(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => return Poll::Ready(Err(self.halt(err))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn consume_preamble(&mut self) -> crate::Result<Transition> {
        if self.buffer.skip_through(&self.markers.start) {
            self.stage = StreamingStage::ReadingHeaderBlock;
            return Ok(Transition::Advanced);
        }

        if self.buffer.eof {
            return Err(crate::Error::IncompleteStream);
        }

        Ok(Transition::NeedMore)
    }

    fn read_header_block(&mut self) -> crate::Result<Transition> {
        if self.buffer.buf.len() < constants::BOUNDARY_EXT.len() {
            return if self.buffer.eof {
                Err(crate::Error::IncompleteStream)
            } else {
                Ok(Transition::NeedMore)
            };
        }

        if self.buffer.buf.starts_with(constants::BOUNDARY_EXT.as_bytes()) {
            return Ok(Transition::End);
        }

        if !self.buffer.buf.starts_with(constants::CRLF.as_bytes()) {
            return Err(crate::Error::MalformedDelimiter);
        }

        let header_bytes = match self.buffer.read_until(constants::CRLF_CRLF.as_bytes()) {
            Some(bytes) => bytes,
            None => {
                return if self.buffer.eof {
                    Err(crate::Error::IncompleteHeaders)
                } else {
                    Ok(Transition::NeedMore)
                };
            }
        };

        // The block starts with the CRLF that ended the boundary line.
        let header_bytes = &header_bytes[constants::CRLF.len()..];

        let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

        let headers = match httparse::parse_headers(header_bytes, &mut headers) {
            Ok(httparse::Status::Complete((_, raw_headers))) => {
                helpers::convert_raw_headers_to_header_map(raw_headers)?
            }
            Ok(httparse::Status::Partial) => return Err(crate::Error::IncompleteHeaders),
            Err(err) => return Err(crate::Error::ReadHeaderFailed(err)),
        };

        self.stage = StreamingStage::ReadingPartBody;
        Ok(Transition::Headers(headers))
    }

    /// Skips whatever is left of a field that was dropped before being read.
    fn discard_field_data(&mut self) -> crate::Result<Transition> {
        match self.read_field_data()? {
            Some(_) => Ok(Transition::Advanced),
            None => Ok(Transition::NeedMore),
        }
    }

    /// Reads the next slice of the current field's body, enforcing its size
    /// limit. Finding the delimiter moves the scanner back to
    /// `ReadingHeaderBlock`.
    pub(crate) fn read_field_data(&mut self) -> crate::Result<Option<(bool, bytes::Bytes)>> {
        let data = self
            .buffer
            .read_field_data(&self.markers.delimiter, self.curr_field_name.as_deref())?;

        if let Some((done, ref bytes)) = data {
            self.curr_field_size_counter += bytes.len() as u64;

            if self.curr_field_size_counter > self.curr_field_size_limit {
                return Err(crate::Error::FieldSizeExceeded {
                    limit: self.curr_field_size_limit,
                    field_name: self.curr_field_name.clone(),
                });
            }

            if done {
                self.stage = StreamingStage::ReadingHeaderBlock;
            }
        }

        Ok(data)
    }

    /// Marks the open field as finished and wakes a pending `next_field`.
    pub(crate) fn release_field(&mut self) {
        self.is_prev_field_consumed = true;

        if let Some(waker) = self.next_field_waker.take() {
            waker.wake();
        }
    }

    /// Stops parsing after an error, releasing the source.
    pub(crate) fn halt(&mut self, err: crate::Error) -> crate::Error {
        #[cfg(feature = "log")]
        log::debug!("multipart parsing halted: {}", err);
        self.finish();
        err
    }

    fn finish(&mut self) {
        self.stage = StreamingStage::Eof;
        self.buffer.release();
        self.buffer.buf.clear();
    }
}
