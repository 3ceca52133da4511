use std::io::{self, Read, Write};

use thiserror::Error;

use super::frame::{FrameDecoder, Message};
use super::{Command, ProtocolError, Response};

/// Default upper bound on a single message, header included.
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 256 * 1024 * 1024;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("connection closed with {0} bytes of an incomplete message buffered")]
    Truncated(usize),
}

impl TransportError {
    /// Protocol errors spoil one message; the stream itself is still usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::Protocol(_))
    }
}

/// Reads and writes protocol messages over any byte stream.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    decoder: FrameDecoder,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: T, max_frame_size: u64) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(max_frame_size),
        }
    }

    pub fn write_command(&mut self, command: &Command) -> Result<(), TransportError> {
        let bytes = command.encode()?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn write_response(&mut self, response: &Response) -> Result<(), TransportError> {
        let bytes = response.encode()?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Next request from the peer, `None` once it has closed the stream
    /// cleanly between messages.
    pub fn read_command(&mut self) -> Result<Option<Command>, TransportError> {
        match self.read_message()? {
            None => Ok(None),
            Some(Message::Plain(bytes)) => Ok(Some(Command::decode(&bytes)?)),
            Some(Message::Framed(_)) => Err(ProtocolError::UnexpectedFrame.into()),
        }
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        let message = self
            .read_message()?
            .ok_or(TransportError::ConnectionClosed)?;
        Ok(Response::from_message(message)?)
    }

    fn read_message(&mut self) -> Result<Option<Message>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(message) = self.decoder.next_message()? {
                return Ok(Some(message));
            }

            let n = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return if self.decoder.is_idle() {
                    Ok(None)
                } else {
                    Err(TransportError::Truncated(self.decoder.buffered()))
                };
            }
            self.decoder.extend(&chunk[..n]);
        }
    }
}
