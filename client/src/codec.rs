//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Newline framing for the device text protocol

use crate::{ClientError, LineEnding};
use bytes::{BufMut, BytesMut};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Read side of a connection
pub(crate) type LineReader = FramedRead<OwnedReadHalf, LineCodec>;

/// Write side of a connection
pub(crate) type LineWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

/// Splits inbound bytes on `\n` and terminates outbound lines.
///
/// Decoded lines have their `\n` and any trailing `\r` removed. Bytes that are
/// not valid UTF-8 are replaced rather than rejected, since devices in the
/// field are not always careful about encodings. Outbound text is written
/// unchanged followed by the configured [`LineEnding`].
#[derive(Debug, Clone)]
pub struct LineCodec {
    line_ending: LineEnding,
    max_length: usize,
    /// Offset already scanned for a newline, so partial reads are not rescanned
    next_index: usize,
}

impl LineCodec {
    /// Create a codec with the given terminator and maximum line length
    pub fn new(line_ending: LineEnding, max_length: usize) -> Self {
        Self {
            line_ending,
            max_length,
            next_index: 0,
        }
    }

    fn finish_line(&self, mut raw: BytesMut) -> Result<String, ClientError> {
        if raw.last() == Some(&b'\n') {
            raw.truncate(raw.len() - 1);
        }
        if raw.last() == Some(&b'\r') {
            raw.truncate(raw.len() - 1);
        }
        if raw.len() > self.max_length {
            return Err(ClientError::LineTooLong(self.max_length));
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(LineEnding::default(), 64 * 1024)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = ClientError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, ClientError> {
        let newline = src[self.next_index..]
            .iter()
            .position(|byte| *byte == b'\n')
            .map(|offset| self.next_index + offset);

        match newline {
            Some(index) => {
                self.next_index = 0;
                let raw = src.split_to(index + 1);
                self.finish_line(raw).map(Some)
            }
            None if src.len() > self.max_length + 1 => {
                // A `\r` may still be pending, hence the extra byte of slack.
                Err(ClientError::LineTooLong(self.max_length))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, ClientError> {
        match self.decode(src)? {
            Some(line) => Ok(Some(line)),
            None if src.is_empty() => Ok(None),
            None => {
                // Peer closed without a final newline
                self.next_index = 0;
                let raw = src.split_to(src.len());
                self.finish_line(raw).map(Some)
            }
        }
    }
}

impl Encoder<&str> for LineCodec {
    type Error = ClientError;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), ClientError> {
        let ending = self.line_ending.as_bytes();
        dst.reserve(item.len() + ending.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(ending);
        Ok(())
    }
}

impl Encoder<String> for LineCodec {
    type Error = ClientError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), ClientError> {
        self.encode(item.as_str(), dst)
    }
}
