//! Server-pushed event stream.
//!
//! Opens `GET /api/v1/events/stream?locationId=...` and exposes the body
//! as a [`FrameStream`] of undecoded [`RawFrame`]s. This module owns a
//! single connection attempt: reconnection, backoff, and JSON decoding
//! belong to the live-stream client in `vigil-core`.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures_util::StreamExt;
//!
//! let mut frames = client.open_event_stream("loc-1").await?;
//! while let Some(frame) = frames.next().await {
//!     let frame = frame?;
//!     println!("{:?}: {:?}", frame.event, frame.data);
//! }
//! ```

use std::fmt::Display;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tracing::{debug, info};

use crate::client::{ApiClient, check_status};
use crate::error::Error;
use crate::sse::{FrameDecoder, RawFrame};

pub const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Boxed stream of frames. Ends after the first `Err` item.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<RawFrame, Error>> + Send>>;

impl ApiClient {
    /// Open the event stream for `location_id`.
    ///
    /// Resolves once response headers arrive. Non-2xx statuses and a wrong
    /// content type fail here; body read errors surface as a final `Err`
    /// item on the returned stream.
    pub async fn open_event_stream(&self, location_id: &str) -> Result<FrameStream, Error> {
        let mut url = self.endpoint(&["events", "stream"])?;
        url.query_pairs_mut().append_pair("locationId", location_id);

        info!(url = %url, "opening event stream");
        let resp = self
            .stream_http
            .get(url)
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(Error::Transport)?;
        let resp = check_status(resp).await?;

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.starts_with(EVENT_STREAM_MIME) {
            return Err(Error::Stream(format!(
                "unexpected content type {content_type:?}"
            )));
        }

        debug!("event stream open");
        Ok(decode_frames(resp.bytes_stream()))
    }
}

/// Decode a raw byte stream into frames.
///
/// Exposed so callers can drive the decoder from any byte source (tests,
/// proxies) without an HTTP connection.
pub fn decode_frames<S, E>(body: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = std::pin::pin!(body);
        let mut decoder = FrameDecoder::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => match decoder.push(&bytes) {
                    Ok(frames) => {
                        for frame in frames {
                            yield Ok(frame);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                },
                Err(e) => {
                    yield Err(Error::Stream(e.to_string()));
                    return;
                }
            }
        }

        if let Some(frame) = decoder.finish() {
            yield Ok(frame);
        }
        debug!("event stream body ended");
    })
}
