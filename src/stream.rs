use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, StdoutLock, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::payload::OutputFormat;
use crate::summary::{ResultRecord, SummaryAggregator};

const CHUNK_SIZE: usize = 64 * 1024;

/// Where the primary data goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `-` means standard output; anything else is a file path.
    pub fn parse(s: &str) -> Self {
        if s == "-" {
            OutputTarget::Stdout
        } else {
            OutputTarget::File(PathBuf::from(s))
        }
    }

    pub fn is_stdout(&self) -> bool {
        matches!(self, OutputTarget::Stdout)
    }
}

/// An open output. Files are owned and closed by [`OutputSink::finish`]; stdout is only flushed.
pub enum OutputSink {
    Stdout(BufWriter<StdoutLock<'static>>),
    File { path: PathBuf, out: BufWriter<File> },
}

impl OutputSink {
    pub fn open(target: &OutputTarget) -> Result<Self> {
        match target {
            OutputTarget::Stdout => Ok(OutputSink::Stdout(BufWriter::with_capacity(
                CHUNK_SIZE,
                io::stdout().lock(),
            ))),
            OutputTarget::File(path) => Self::create_file(path),
        }
    }

    fn create_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = File::create(path)?;
        Ok(OutputSink::File {
            path: path.to_path_buf(),
            out: BufWriter::with_capacity(CHUNK_SIZE, file),
        })
    }

    /// Flushes buffered output and closes the file, if any.
    pub fn finish(self) -> Result<()> {
        match self {
            OutputSink::Stdout(mut out) => out.flush()?,
            OutputSink::File { path, out } => {
                let file = out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
                file.sync_all()?;
                debug!("closed {}", path.display());
            }
        }
        Ok(())
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputSink::Stdout(out) => out.write(buf),
            OutputSink::File { out, .. } => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputSink::Stdout(out) => out.flush(),
            OutputSink::File { out, .. } => out.flush(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Lines written. For TSV this includes the header line.
    pub lines: u64,
    /// Data records: TSV rows after the header, or objects in the top-level JSON array.
    pub records: u64,
    pub bytes: u64,
}

/// Copies a response body to a sink without holding the whole body in memory.
pub struct StreamWriter<'a> {
    format: OutputFormat,
    progress: Option<ProgressBar>,
    summary: Option<&'a mut SummaryAggregator>,
}

impl<'a> StreamWriter<'a> {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            progress: None,
            summary: None,
        }
    }

    /// Shows a spinner with the running count on stderr.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} {pos} {prefix} ({msg}) {elapsed}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_prefix(match self.format {
                OutputFormat::Tsv => "lines",
                OutputFormat::Json => "records",
            });
            pb
        });
        self
    }

    /// Feeds every parsed record to `summary` as it streams past.
    pub fn with_summary(mut self, summary: &'a mut SummaryAggregator) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Streams `source` into `sink` and flushes the sink.
    ///
    /// Source failures become [`Error::Stream`] and sink failures [`Error::Io`]. Whatever
    /// was written before a failure stays in the sink.
    pub fn write<R: Read, W: Write>(mut self, source: R, sink: &mut W) -> Result<StreamStats> {
        let result = match self.format {
            OutputFormat::Tsv => self.copy_lines(source, sink),
            OutputFormat::Json => self.copy_json(source, sink),
        };

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }
        let stats = result?;
        sink.flush()?;
        Ok(stats)
    }

    fn copy_lines<R: Read, W: Write>(&mut self, source: R, sink: &mut W) -> Result<StreamStats> {
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, source);
        let mut stats = StreamStats::default();
        let mut line = Vec::new();

        loop {
            line.clear();
            let n = reader.read_until(b'\n', &mut line).map_err(Error::Stream)?;
            if n == 0 {
                break;
            }
            if line.last() != Some(&b'\n') {
                line.push(b'\n');
            }

            sink.write_all(&line)?;
            stats.lines += 1;
            stats.bytes += line.len() as u64;

            let is_header = stats.lines == 1;
            if !is_header && line.iter().any(|b| !b.is_ascii_whitespace()) {
                stats.records += 1;
            }

            if let Some(summary) = self.summary.as_deref_mut() {
                summary.observe_tsv_line(&String::from_utf8_lossy(&line));
            }
            if let Some(pb) = &self.progress {
                pb.set_position(stats.lines);
                pb.set_message(HumanBytes(stats.bytes).to_string());
            }
        }

        Ok(stats)
    }

    fn copy_json<R: Read, W: Write>(&mut self, mut source: R, sink: &mut W) -> Result<StreamStats> {
        let mut scanner = JsonRecordScanner::new(self.summary.is_some());
        let mut stats = StreamStats::default();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut last_byte = None;

        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Stream(e)),
            };
            let chunk = &buf[..n];

            sink.write_all(chunk)?;
            stats.bytes += n as u64;
            stats.lines += chunk.iter().filter(|&&b| b == b'\n').count() as u64;
            last_byte = chunk.last().copied();

            let summary = &mut self.summary;
            scanner.feed(chunk, |raw| {
                if let Some(summary) = summary.as_deref_mut() {
                    match serde_json::from_slice::<ResultRecord>(raw) {
                        Ok(record) => summary.observe(&record),
                        Err(e) => warn!("skipping unparseable JSON record in summary: {}", e),
                    }
                }
            });

            if let Some(pb) = &self.progress {
                pb.set_position(scanner.records);
                pb.set_message(HumanBytes(stats.bytes).to_string());
            }
        }

        if last_byte.is_some_and(|b| b != b'\n') {
            stats.lines += 1;
        }
        stats.records = scanner.records;
        Ok(stats)
    }
}

/// Copies `source` to `sink` with no progress display and no summary.
pub fn write_response<R: Read, W: Write>(
    source: R,
    sink: &mut W,
    format: OutputFormat,
) -> Result<StreamStats> {
    StreamWriter::new(format).write(source, sink)
}

/// Counts objects directly inside the top-level JSON array, one byte at a time.
///
/// With `capture` set, the bytes of each record are collected so they can be parsed;
/// memory then grows with the largest single record, never with the whole document.
struct JsonRecordScanner {
    depth: u32,
    in_string: bool,
    escaped: bool,
    capture: bool,
    current: Option<Vec<u8>>,
    records: u64,
}

impl JsonRecordScanner {
    fn new(capture: bool) -> Self {
        Self {
            depth: 0,
            in_string: false,
            escaped: false,
            capture,
            current: None,
            records: 0,
        }
    }

    fn feed(&mut self, chunk: &[u8], mut on_record: impl FnMut(&[u8])) {
        for &b in chunk {
            if let Some(cur) = self.current.as_mut() {
                cur.push(b);
            }

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => {
                    if self.depth == 1 && b == b'{' {
                        self.records += 1;
                        if self.capture {
                            self.current = Some(vec![b'{']);
                        }
                    }
                    self.depth += 1;
                }
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 1 && b == b'}' {
                        if let Some(raw) = self.current.take() {
                            on_record(&raw);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
