//! Adapters between child process pipes and in-process code.

use crate::encoding::Encoding;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::ChildStdin;
use std::thread::{self, JoinHandle};

/// Lazy, line-oriented view of a child's output pipe.
///
/// Lines keep their terminating `\n`; a trailing partial line is yielded as the
/// last item. Each line is decoded with the command's encoding, so a decoding
/// failure shows up on the line where it happens.
pub struct LineReader<R> {
    inner: BufReader<R>,
    encoding: Encoding,
}

impl<R: Read> LineReader<R> {
    pub(crate) fn new(reader: R, encoding: Encoding) -> Self {
        Self {
            inner: BufReader::new(reader),
            encoding,
        }
    }

    /// Read the next raw line, `None` at end of stream.
    pub fn read_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        match self.inner.read_until(b'\n', &mut buf)? {
            0 => Ok(None),
            _ => Ok(Some(buf)),
        }
    }

    /// Read and decode the next line, `None` at end of stream.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.read_bytes()? {
            Some(bytes) => Ok(Some(self.encoding.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read everything left in the stream.
    pub fn read_rest(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl<R: Read> Iterator for LineReader<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}

/// Write end of a child's input pipe.
///
/// Text written through [`InputWriter::send`] is encoded with the command's
/// encoding and flushed immediately. Closing signals end-of-input to the child.
pub struct InputWriter {
    inner: Option<ChildStdin>,
    encoding: Encoding,
}

impl InputWriter {
    pub(crate) fn new(stdin: ChildStdin, encoding: Encoding) -> Self {
        Self {
            inner: Some(stdin),
            encoding,
        }
    }

    /// Encode `text`, write it and flush.
    pub fn send(&mut self, text: &str) -> io::Result<()> {
        let bytes = self.encoding.encode(text)?;
        self.write_all(&bytes)?;
        self.flush()
    }

    /// Close the pipe. Further writes fail with `BrokenPipe`.
    pub fn close(&mut self) {
        self.inner.take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn pipe(&mut self) -> io::Result<&mut ChildStdin> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "input already closed"))
    }
}

impl Write for InputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipe()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(stdin) => stdin.flush(),
            None => Ok(()),
        }
    }
}

/// A piece of input for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Encoded with the receiving command's encoding before it is written.
    Text(String),
    /// Written as-is.
    Bytes(Vec<u8>),
}

impl Chunk {
    pub(crate) fn into_bytes(self, encoding: Encoding) -> io::Result<Vec<u8>> {
        match self {
            Chunk::Text(text) => Ok(encoding.encode(&text)?),
            Chunk::Bytes(bytes) => Ok(bytes),
        }
    }
}

/// Values that can be fed to a command, one write per value.
///
/// Results are accepted so that fallible producers (such as a [`LineReader`])
/// can be fed directly; the first error stops the feed.
pub trait IntoChunk {
    fn into_chunk(self) -> io::Result<Chunk>;
}

impl IntoChunk for Chunk {
    fn into_chunk(self) -> io::Result<Chunk> {
        Ok(self)
    }
}

impl IntoChunk for String {
    fn into_chunk(self) -> io::Result<Chunk> {
        Ok(Chunk::Text(self))
    }
}

impl IntoChunk for &str {
    fn into_chunk(self) -> io::Result<Chunk> {
        Ok(Chunk::Text(self.to_owned()))
    }
}

impl IntoChunk for Vec<u8> {
    fn into_chunk(self) -> io::Result<Chunk> {
        Ok(Chunk::Bytes(self))
    }
}

impl IntoChunk for &[u8] {
    fn into_chunk(self) -> io::Result<Chunk> {
        Ok(Chunk::Bytes(self.to_vec()))
    }
}

impl<T: IntoChunk, E: Into<io::Error>> IntoChunk for Result<T, E> {
    fn into_chunk(self) -> io::Result<Chunk> {
        self.map_err(Into::into)?.into_chunk()
    }
}

/// Read `reader` to the end on a separate thread.
pub(crate) fn capture<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

pub(crate) fn join_capture(handle: JoinHandle<io::Result<Vec<u8>>>) -> io::Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| io::Error::other("output reader thread panicked"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn lines_keep_terminators_and_partial_tail() {
        let reader = LineReader::new(Cursor::new(b"a\nb\nc".to_vec()), Encoding::Utf8);
        let lines: Vec<String> = reader.collect::<io::Result<_>>().unwrap();
        assert_eq!(lines, vec!["a\n", "b\n", "c"]);
    }

    #[test]
    fn undecodable_line_is_an_error() {
        let mut reader = LineReader::new(Cursor::new(b"ok\n\xff\n".to_vec()), Encoding::Utf8);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("ok\n"));
        let err = reader.read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn chunks_from_results() {
        let ok: io::Result<&str> = Ok("x");
        assert_eq!(ok.into_chunk().unwrap(), Chunk::Text("x".into()));
        let failed: io::Result<String> = Err(io::Error::other("boom"));
        assert!(failed.into_chunk().is_err());
    }

    #[test]
    fn text_chunks_use_the_receiver_encoding() {
        let chunk = Chunk::Text("é".into());
        assert_eq!(chunk.into_bytes(Encoding::Latin1).unwrap(), vec![0xe9]);
    }
}
