//! A streaming parser for `multipart/form-data` (and other `multipart/*`)
//! bodies, yielding each part as a [`Field`] whose body can be read once, the
//! way the fetch `Body` interface is.
//!
//! The parser never reads ahead of the field it handed out last: the next
//! field is only discovered once the current one has been read or dropped.
//! That keeps memory bounded by the boundary length plus one source chunk,
//! whatever the size of the payload.
//!
//! # Examples
//!
//! ```
//! use multiform::Multipart;
//! use bytes::Bytes;
//! use std::convert::Infallible;
//! use futures_util::stream::once;
//!
//! # async fn run() {
//! // Create a byte stream from the request body, e.g. a hyper body.
//! let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
//! let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//!
//! // Extract the boundary from the Content-Type header.
//! let boundary = multiform::parse_boundary("multipart/form-data; boundary=X-BOUNDARY").unwrap();
//!
//! let mut multipart = Multipart::new(stream, boundary);
//!
//! while let Some(mut field) = multipart.next_field().await.unwrap() {
//!     // A clone can be read independently of the original.
//!     let mut copy = field.try_clone().unwrap();
//!
//!     assert_eq!(field.text().await.unwrap(), "abcd");
//!     assert_eq!(copy.bytes().await.unwrap(), "abcd");
//!
//!     // The body can't be read twice.
//!     assert!(field.text().await.is_err());
//! }
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! # Features
//!
//! - `json` (default): [`Field::json`] via `serde_json`.
//! - `tokio-io`: [`Multipart::with_reader`] for any `tokio::io::AsyncRead`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub use bytes;

pub use blob::Blob;
pub use constraints::Constraints;
pub use error::Error;
pub use field::Field;
pub use multipart::Multipart;
pub use size_limit::SizeLimit;

mod blob;
mod buffer;
mod constants;
mod constraints;
mod content_disposition;
mod error;
mod field;
mod helpers;
mod multipart;
mod size_limit;
mod state;
mod tee;

/// A Result type often returned from methods that can have `multiform` errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// Any `multipart/*` type is accepted. A quoted boundary is unquoted.
///
/// # Examples
///
/// ```
/// let content_type = "multipart/form-data; boundary=ABCDEFG";
///
/// assert_eq!(multiform::parse_boundary(content_type), Ok("ABCDEFG".to_owned()));
/// ```
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(Error::DecodeContentType)?;

    if m.type_() != mime::MULTIPART {
        return Err(Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().trim_matches('"').to_owned())
        .filter(|boundary| !boundary.is_empty())
        .ok_or(Error::NoBoundary)
}
