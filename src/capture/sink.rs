use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use super::line_writer::LineWriter;
use super::rotate::{RotatingFile, RotationConfig};
use super::timestamp::TimestampFormat;
use crate::util::spawn_named_thread;

const CAPTURE_CHUNK: usize = 8 * 1024;

/// Where one output stream of a child goes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SinkConfig {
    /// The child inherits the daemon's own stream.
    #[default]
    Passthrough,
    /// Line-buffered, timestamped, rotated file.
    File {
        path: PathBuf,
        timestamps: TimestampFormat,
        rotation: RotationConfig,
    },
}

impl SinkConfig {
    /// Stdio setting used when spawning the child: passthrough streams are
    /// inherited, file sinks need a pipe to capture.
    pub fn stdio(&self) -> Stdio {
        match self {
            Self::Passthrough => Stdio::inherit(),
            Self::File { .. } => Stdio::piped(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough)
    }

    /// Opens the file sink described by this config. Passthrough needs no
    /// writer; `None` is returned.
    pub fn open(&self) -> io::Result<Option<LineWriter<RotatingFile>>> {
        match self {
            Self::Passthrough => Ok(None),
            Self::File {
                path,
                timestamps,
                rotation,
            } => {
                let file = RotatingFile::open(path, rotation.clone())?;
                Ok(Some(LineWriter::new(file, timestamps.clone())))
            }
        }
    }
}

/// Pumps one child pipe into its sink until EOF, then closes the sink.
///
/// The thread ends when the child closes its end of the pipe (normally by
/// exiting); the final partial line is flushed by the close.
pub fn spawn_capture<R>(
    stream_name: &str,
    mut stream: R,
    mut sink: LineWriter<RotatingFile>,
) -> JoinHandle<io::Result<()>>
where
    R: Read + Send + 'static,
{
    let name = format!("capture {stream_name}");
    spawn_named_thread(name.clone(), move || {
        let mut buf = [0u8; CAPTURE_CHUNK];
        let pump = loop {
            match stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(err) = sink.write_all(&buf[..n]) {
                        break Err(err);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };
        debug!(stream = name, "capture stream finished");
        let closed = sink.close();
        let result = pump.and(closed);
        if let Err(err) = &result {
            warn!(stream = name, error = %err, "capture stream failed");
        }
        result
    })
}

/// Joins the capture threads of one launch and reports the first error from
/// either stream.
pub fn join_captures(handles: Vec<JoinHandle<io::Result<()>>>) -> io::Result<()> {
    let mut first_err = Ok(());
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                if first_err.is_ok() {
                    first_err = Err(err);
                }
            }
            Err(_) => {
                if first_err.is_ok() {
                    first_err = Err(io::Error::other("capture thread panicked"));
                }
            }
        }
    }
    first_err
}
