use std::io::{self, Read, Write};

use guestlink_frame::{StdStream, StdioReader, StdioWriter};

use crate::cmd::{FrameArgs, UnframeArgs};
use crate::exit::{io_error, CliResult, SUCCESS};

const BUF_SIZE: usize = 32 * 1024;

pub fn frame(args: FrameArgs) -> CliResult<i32> {
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    frame_into(stdin, stdout, args.stream.into()).map_err(|err| io_error("frame failed", err))?;
    Ok(SUCCESS)
}

pub fn unframe(args: UnframeArgs) -> CliResult<i32> {
    let stdin = io::stdin().lock();
    let reader = if args.tty {
        StdioReader::raw(stdin)
    } else {
        StdioReader::new(stdin)
    };
    unframe_into(reader, io::stdout().lock(), io::stderr().lock())
        .map_err(|err| io_error("unframe failed", err))?;
    Ok(SUCCESS)
}

fn frame_into(mut input: impl Read, output: impl Write, stream: StdStream) -> io::Result<()> {
    let mut writer = StdioWriter::new(output, stream);
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_chunk(stream, &buf[..n])?;
    }
}

fn unframe_into<R: Read>(
    mut reader: StdioReader<R>,
    mut stdout: impl Write,
    mut stderr: impl Write,
) -> io::Result<()> {
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        match reader.stream() {
            Some(StdStream::Stderr) => stderr.write_all(&buf[..n])?,
            _ => stdout.write_all(&buf[..n])?,
        }
    }
    stdout.flush()?;
    stderr.flush()
}
