// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Splits a request body into raw log lines.
//!
//! Log sources push lines separated by `\n` but are free to omit the terminator on the last
//! line of a batch. The framer yields every line with its terminator still attached and records
//! whether it had one, so the caller strips a byte only when there is one to strip.

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::BodyStream;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;

const LINE_FEED: u8 = b'\n';

/// One framed line as read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// The line bytes, including the trailing `\n` when `terminated` is set.
    pub bytes: Vec<u8>,
    /// False only for a final line cut short by end-of-stream.
    pub terminated: bool,
}

/// Sequential, non-restartable reader of [`RawLine`]s.
pub struct LineFramer<R> {
    reader: R,
    finished: bool,
}

impl<R> LineFramer<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    /// Returns the next line, or `None` once the stream is exhausted.
    ///
    /// A read failure other than end-of-stream is returned as-is; lines handed out before it
    /// are not affected.
    pub async fn next_line(&mut self) -> io::Result<Option<RawLine>> {
        if self.finished {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        self.reader.read_until(LINE_FEED, &mut bytes).await?;

        if bytes.last() == Some(&LINE_FEED) {
            return Ok(Some(RawLine {
                bytes,
                terminated: true,
            }));
        }

        // end-of-stream, with or without a partial line pending
        self.finished = true;
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(RawLine {
                bytes,
                terminated: false,
            }))
        }
    }
}

/// Adapts an HTTP body into a buffered reader suitable for [`LineFramer`].
pub fn body_reader<B>(body: B) -> impl AsyncBufRead + Unpin + Send
where
    B: hyper::body::Body<Data = Bytes> + Send + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let frames = BodyStream::new(body)
        .map_ok(|frame| frame.into_data().unwrap_or_default())
        .map_err(io::Error::other);
    StreamReader::new(frames)
}
