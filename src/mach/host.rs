use crate::lang::ast::OpenMode;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

/// One open channel. Text modes normalize line endings on output by
/// writing host-native newlines.
pub trait ChannelIo {
    fn read_line(&mut self) -> io::Result<Option<String>>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn seek(&mut self, pos: u64) -> io::Result<()>;
    fn at_eof(&mut self) -> io::Result<bool>;
}

/// The minimal host surface the VM runs against. Graphics and sound are
/// optional; a host that lacks them turns the corresponding statements
/// into `FeatureUnavailable`.
pub trait Host {
    fn read_line(&mut self) -> io::Result<Option<String>>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Seconds since local midnight, for TIMER and the default RND seed.
    fn ticks(&mut self) -> f64;
    fn open(&mut self, path: &str, mode: OpenMode) -> io::Result<Box<dyn ChannelIo>>;
    /// Optional screen hook; `false` means the feature is unavailable.
    fn clear_screen(&mut self) -> bool {
        false
    }
}

/// Host backed by the process's stdin/stdout and the real file system.
#[derive(Default)]
pub struct StdHost;

impl Host for StdHost {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = io::stdin().lock().read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()
    }

    fn ticks(&mut self) -> f64 {
        use chrono::Timelike;
        let now = chrono::Local::now();
        now.num_seconds_from_midnight() as f64 + now.nanosecond() as f64 / 1e9
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> io::Result<Box<dyn ChannelIo>> {
        Ok(match mode {
            OpenMode::Input => Box::new(ReadChannel {
                reader: BufReader::new(fs::File::open(path)?),
            }),
            OpenMode::Output => Box::new(WriteChannel {
                writer: BufWriter::new(fs::File::create(path)?),
            }),
            OpenMode::Append => Box::new(WriteChannel {
                writer: BufWriter::new(
                    fs::OpenOptions::new().create(true).append(true).open(path)?,
                ),
            }),
            OpenMode::Binary | OpenMode::Random => Box::new(ByteChannel {
                file: fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?,
            }),
        })
    }

    fn clear_screen(&mut self) -> bool {
        // ANSI clear plus home.
        io::stdout().write_all(b"\x1b[2J\x1b[1;1H").is_ok()
    }
}

struct ReadChannel {
    reader: BufReader<fs::File>,
}

impl ChannelIo for ReadChannel {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn write(&mut self, _bytes: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "channel is read-only"))
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }
}

struct WriteChannel {
    writer: BufWriter<fs::File>,
}

impl ChannelIo for WriteChannel {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        Err(io::Error::new(io::ErrorKind::Other, "channel is write-only"))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.writer.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(true)
    }
}

struct ByteChannel {
    file: fs::File,
}

impl ChannelIo for ByteChannel {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.file.read(&mut byte)? {
                0 => break,
                _ => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    if byte[0] != b'\r' {
                        line.push(byte[0]);
                    }
                }
            }
        }
        if line.is_empty() {
            let here = self.file.stream_position()?;
            if here >= self.file.metadata()?.len() {
                return Ok(None);
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(pos)).map(|_| ())
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        Ok(self.file.stream_position()? >= self.file.metadata()?.len())
    }
}
