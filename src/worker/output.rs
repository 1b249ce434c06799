use std::collections::BTreeSet;
use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;

use crate::error::{Result, WorkerError};
use crate::job::LogPaths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// What was seen while draining the process output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub stdout_lines: usize,
    pub stderr_lines: usize,
    /// Configured markers found in at least one stderr line
    pub error_markers: BTreeSet<String>,
}

/// Append-only writers for the task's two logs.
pub struct LogSinks {
    output: BufWriter<File>,
    errors: BufWriter<File>,
}

impl LogSinks {
    pub async fn open(paths: &LogPaths) -> Result<Self> {
        Ok(Self {
            output: BufWriter::new(open_append(&paths.output).await?),
            errors: BufWriter::new(open_append(&paths.errors).await?),
        })
    }

    async fn write_line(&mut self, stream: Stream, line: &[u8]) -> std::io::Result<()> {
        write_terminated(&mut self.output, line).await?;
        if stream == Stream::Stderr {
            write_terminated(&mut self.errors, line).await?;
        }
        Ok(())
    }

    /// Append a line to the combined log only.
    pub async fn write_status(&mut self, line: &str) -> std::io::Result<()> {
        write_terminated(&mut self.output, line.as_bytes()).await
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.output.flush().await?;
        self.errors.flush().await
    }
}

async fn open_append(path: &Path) -> Result<File> {
    let log_err = |source| WorkerError::Log {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(log_err)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(log_err)
}

async fn write_terminated(out: &mut BufWriter<File>, line: &[u8]) -> std::io::Result<()> {
    out.write_all(line).await?;
    if !line.ends_with(b"\n") {
        out.write_all(b"\n").await?;
    }
    Ok(())
}

/// Read `reader` line by line until EOF, forwarding each line. A trailing
/// line without a terminator is forwarded too.
async fn pump<R>(
    reader: Option<R>,
    stream: Stream,
    tx: mpsc::Sender<(Stream, Vec<u8>)>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        if tx.send((stream, line)).await.is_err() {
            // Writer failed; its error is reported by the join
            return Ok(());
        }
    }
}

/// Drain both output streams into `sinks` until each reaches EOF.
///
/// The two streams are pumped independently, so one closing early never
/// stalls the other. Stderr lines are scanned for `markers`.
pub async fn capture_output<O, E>(
    sinks: &mut LogSinks,
    stdout: Option<O>,
    stderr: Option<E>,
    markers: &[String],
) -> std::io::Result<CaptureReport>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (tx, mut rx) = mpsc::channel(256);
    let stdout_pump = pump(stdout, Stream::Stdout, tx.clone());
    let stderr_pump = pump(stderr, Stream::Stderr, tx);

    let writer = async {
        let mut report = CaptureReport::default();
        while let Some((stream, line)) = rx.recv().await {
            sinks.write_line(stream, &line).await?;
            match stream {
                Stream::Stdout => report.stdout_lines += 1,
                Stream::Stderr => {
                    report.stderr_lines += 1;
                    let text = String::from_utf8_lossy(&line);
                    for marker in markers {
                        if text.contains(marker.as_str()) {
                            report.error_markers.insert(marker.clone());
                        }
                    }
                }
            }
        }
        sinks.flush().await?;
        Ok::<_, std::io::Error>(report)
    };

    let (_, _, report) = tokio::try_join!(stdout_pump, stderr_pump, writer)?;
    Ok(report)
}
