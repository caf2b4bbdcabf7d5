use std::io::{self, ErrorKind, Write};

use crate::stdio::{encode_header, StdStream};

/// Adds stdio headers to everything written through it.
///
/// Every `write` becomes exactly one chunk and is flushed before returning,
/// so interactive output reaches the client without buffering delays.
pub struct StdioWriter<T> {
    inner: T,
    stream: StdStream,
    tty: bool,
}

impl<T: Write> StdioWriter<T> {
    /// Writer tagging every chunk with `stream`.
    pub fn new(inner: T, stream: StdStream) -> Self {
        Self {
            inner,
            stream,
            tty: false,
        }
    }

    /// Passthrough writer for a TTY stream.
    pub fn raw(inner: T) -> Self {
        Self {
            inner,
            stream: StdStream::Stdout,
            tty: true,
        }
    }

    /// Write one chunk on an explicit stream, ignoring the default one.
    pub fn write_chunk(&mut self, stream: StdStream, data: &[u8]) -> io::Result<()> {
        if self.tty {
            write_all(&mut self.inner, data)?;
            return flush(&mut self.inner);
        }

        let len = u32::try_from(data.len())
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "stdio chunk exceeds 4 GiB"))?;
        write_all(&mut self.inner, &encode_header(stream, len))?;
        write_all(&mut self.inner, data)?;
        flush(&mut self.inner)
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Write> Write for StdioWriter<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len().min(u32::MAX as usize);
        self.write_chunk(self.stream, &buf[..len])?;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        flush(&mut self.inner)
    }
}

fn write_all<T: Write>(inner: &mut T, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match inner.write(buf) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

fn flush<T: Write>(inner: &mut T) -> io::Result<()> {
    loop {
        match inner.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::reader::StdioReader;

    #[test]
    fn write_prefixes_header() {
        let mut writer = StdioWriter::new(Vec::new(), StdStream::Stderr);
        writer.write_all(b"boom").unwrap();

        assert_eq!(
            writer.into_inner(),
            vec![2, 0, 0, 0, 0, 0, 0, 4, b'b', b'o', b'o', b'm']
        );
    }

    #[test]
    fn raw_writer_adds_nothing() {
        let mut writer = StdioWriter::raw(Vec::new());
        writer.write_all(b"\r\n$ ").unwrap();
        assert_eq!(writer.into_inner(), b"\r\n$ ");
    }

    #[test]
    fn every_write_is_flushed() {
        let flushes = Arc::new(AtomicUsize::new(0));
        let mut writer = StdioWriter::new(
            FlushCounter {
                flushes: Arc::clone(&flushes),
                data: Vec::new(),
            },
            StdStream::Stdout,
        );

        writer.write_all(b"a").unwrap();
        writer.write_chunk(StdStream::Stderr, b"b").unwrap();

        assert_eq!(flushes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn interleaved_streams_read_back_in_order() {
        let mut writer = StdioWriter::new(Vec::new(), StdStream::Stdout);
        writer.write_all(b"out-1").unwrap();
        writer.write_chunk(StdStream::Stderr, b"err-1").unwrap();
        writer.write_all(b"out-2").unwrap();

        let mut reader = StdioReader::new(Cursor::new(writer.into_inner()));
        let mut seen = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            seen.push((reader.stream().unwrap(), buf[..n].to_vec()));
        }

        assert_eq!(
            seen,
            vec![
                (StdStream::Stdout, b"out-1".to_vec()),
                (StdStream::Stderr, b"err-1".to_vec()),
                (StdStream::Stdout, b"out-2".to_vec()),
            ]
        );
    }

    #[test]
    fn zero_write_is_an_error() {
        let mut writer = StdioWriter::new(ZeroWriter, StdStream::Stdout);
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteZero);
    }

    struct FlushCounter {
        flushes: Arc<AtomicUsize>,
        data: Vec<u8>,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
