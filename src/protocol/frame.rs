use std::mem;

use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::ProtocolError;

/// Serialized length of a [`SizeHeader`].
pub const HEADER_SIZE: usize = 50;

/// Both sizes are written as exactly this many zero-padded digits.
const SIZE_DIGITS: usize = 10;
const MAX_SIZE_FIELD: u64 = 9_999_999_999;

/// Announces the byte lengths of the control document and the columnar
/// payload that follow it.
///
/// Always serialized as `{"jsonSize":"NNNNNNNNNN","arrowSize":"NNNNNNNNNN"}`,
/// which is [`HEADER_SIZE`] bytes long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeHeader {
    pub json_size: u64,
    pub arrow_size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawHeader {
    json_size: String,
    arrow_size: String,
}

impl SizeHeader {
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE], ProtocolError> {
        for size in [self.json_size, self.arrow_size] {
            if size > MAX_SIZE_FIELD {
                return Err(ProtocolError::FrameTooLarge {
                    size,
                    limit: MAX_SIZE_FIELD,
                });
            }
        }

        let text = format!(
            r#"{{"jsonSize":"{:010}","arrowSize":"{:010}"}}"#,
            self.json_size, self.arrow_size
        );
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(text.as_bytes());
        Ok(out)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() != HEADER_SIZE {
            return Err(ProtocolError::FrameSize(format!(
                "size header is {} bytes, expected {HEADER_SIZE}",
                bytes.len()
            )));
        }
        let raw: RawHeader = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::FrameSize(format!("unreadable size header: {e}")))?;

        Ok(Self {
            json_size: parse_size("jsonSize", &raw.json_size)?,
            arrow_size: parse_size("arrowSize", &raw.arrow_size)?,
        })
    }

    /// Length of the whole frame, header included.
    pub fn frame_len(&self) -> u64 {
        HEADER_SIZE as u64 + self.json_size + self.arrow_size
    }
}

fn parse_size(field: &str, digits: &str) -> Result<u64, ProtocolError> {
    if digits.len() != SIZE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::FrameSize(format!(
            "{field} must be {SIZE_DIGITS} decimal digits, found '{digits}'"
        )));
    }
    digits
        .parse()
        .map_err(|e| ProtocolError::FrameSize(format!("{field}: {e}")))
}

/// A size-framed message: header, JSON control document, columnar payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: SizeHeader,
    pub control: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(control: Vec<u8>, payload: Vec<u8>) -> Self {
        Self {
            header: SizeHeader {
                json_size: control.len() as u64,
                arrow_size: payload.len() as u64,
            },
            control,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let header = self.header.encode()?;
        let mut out = Vec::with_capacity(HEADER_SIZE + self.control.len() + self.payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.control);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

/// One complete message cut from a byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A bare JSON document.
    Plain(Vec<u8>),
    Framed(Frame),
}

/// Cuts messages out of a byte stream that arrives in arbitrary chunks.
///
/// The first complete JSON document in the buffer decides what comes next:
/// a size header means a frame follows and the decoder waits for all of its
/// bytes, anything else is a plain message on its own. Bytes past the end of
/// a message stay buffered for the next call.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pending: Option<SizeHeader>,
    max_frame_size: u64,
}

impl FrameDecoder {
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            buf: Vec::new(),
            pending: None,
            max_frame_size,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing but whitespace is buffered.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.buf.iter().all(u8::is_ascii_whitespace)
    }

    /// Return the next complete message, or `None` if more bytes are needed.
    ///
    /// On error the buffer is discarded, since the stream position of the
    /// next message can no longer be known.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        let result = self.try_next();
        if result.is_err() {
            self.buf.clear();
            self.pending = None;
        }
        result
    }

    fn try_next(&mut self) -> Result<Option<Message>, ProtocolError> {
        if let Some(header) = self.pending {
            return Ok(self.take_frame(header));
        }

        match self.buf.iter().position(|b| !b.is_ascii_whitespace()) {
            Some(0) => {}
            Some(start) => {
                self.buf.drain(..start);
            }
            None => {
                self.buf.clear();
                return Ok(None);
            }
        }

        let (parsed, end) = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<JsonValue>();
            let parsed = stream.next();
            (parsed, stream.byte_offset())
        };

        let value = match parsed {
            None => return Ok(None),
            Some(Err(e)) if e.is_eof() => {
                if self.buf.len() as u64 > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge {
                        size: self.buf.len() as u64,
                        limit: self.max_frame_size,
                    });
                }
                return Ok(None);
            }
            Some(Err(e)) => return Err(ProtocolError::Malformed(e.to_string())),
            Some(Ok(value)) => value,
        };

        if !is_size_header(&value) {
            let rest = self.buf.split_off(end);
            let message = mem::replace(&mut self.buf, rest);
            return Ok(Some(Message::Plain(message)));
        }

        if end != HEADER_SIZE {
            return Err(ProtocolError::FrameSize(format!(
                "size header is {end} bytes, expected {HEADER_SIZE}"
            )));
        }
        let header = SizeHeader::parse(&self.buf[..HEADER_SIZE])?;
        let total = header.frame_len();
        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                limit: self.max_frame_size,
            });
        }

        let total = total as usize;
        if total > self.buf.len() {
            self.buf.reserve(total - self.buf.len());
        }
        self.pending = Some(header);
        Ok(self.take_frame(header))
    }

    fn take_frame(&mut self, header: SizeHeader) -> Option<Message> {
        let total = header.frame_len() as usize;
        if self.buf.len() < total {
            return None;
        }
        self.pending = None;

        let rest = self.buf.split_off(total);
        let mut control = mem::replace(&mut self.buf, rest);
        let payload = control.split_off(HEADER_SIZE + header.json_size as usize);
        control.drain(..HEADER_SIZE);

        Some(Message::Framed(Frame {
            header,
            control,
            payload,
        }))
    }
}

fn is_size_header(value: &JsonValue) -> bool {
    value
        .as_object()
        .is_some_and(|o| o.contains_key("jsonSize") && !o.contains_key("op"))
}
