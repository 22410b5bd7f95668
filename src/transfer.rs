use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, HeaderMap, HeaderValue, RANGE, USER_AGENT};
use tracing::{debug, info};

use crate::config::Settings;
use crate::domain::DownloadTask;
use crate::error::DepotError;
use crate::progress::{CancelToken, DownloadEvent, PROGRESS_INTERVAL, ProgressSink, Session};

/// Files at or below this size always use a single connection.
pub const MULTI_SEGMENT_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Inclusive byte range, sent as `bytes=<start>-<end>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Zero when the server does not report a length.
    pub total_size: u64,
    pub accepts_ranges: bool,
}

pub struct TransferBody {
    pub reader: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
}

pub trait RangeTransport: Send + Sync {
    fn probe(&self, url: &str) -> Result<Probe, DepotError>;
    fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<TransferBody, DepotError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, DepotError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("depot/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| DepotError::TransferHttp(err.to_string()))?,
        );
        // Bodies of several gigabytes must not hit a whole-request deadline.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Option::<Duration>::None)
            .build()
            .map_err(|err| DepotError::TransferHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl RangeTransport for HttpTransport {
    fn probe(&self, url: &str) -> Result<Probe, DepotError> {
        let response = self
            .client
            .head(url)
            .timeout(Duration::from_secs(10))
            .send()
            .map_err(|err| DepotError::TransferHttp(err.to_string()))?;
        if !response.status().is_success() {
            return Err(DepotError::TransferStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }
        let headers = response.headers();
        let total_size = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        let accepts_ranges = headers
            .get(ACCEPT_RANGES)
            .and_then(|value| value.to_str().ok())
            .map(|value| !value.trim().eq_ignore_ascii_case("none"))
            .unwrap_or(false);
        Ok(Probe {
            total_size,
            accepts_ranges,
        })
    }

    fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<TransferBody, DepotError> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }
        let response = request
            .send()
            .map_err(|err| DepotError::TransferHttp(err.to_string()))?;
        let status = response.status();
        let expected = if range.is_some() {
            status == StatusCode::PARTIAL_CONTENT
        } else {
            status.is_success()
        };
        if !expected {
            return Err(DepotError::TransferStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let content_length = response.content_length();
        Ok(TransferBody {
            reader: Box::new(response),
            content_length,
        })
    }
}

/// One contiguous slice of a file fetched on its own connection.
#[derive(Debug)]
pub struct Segment {
    pub index: usize,
    pub start_byte: u64,
    pub end_byte: u64,
    pub temp_path: Utf8PathBuf,
    downloaded_bytes: AtomicU64,
}

impl Segment {
    pub fn range(&self) -> ByteRange {
        ByteRange {
            start: self.start_byte,
            end: self.end_byte,
        }
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded_bytes.load(Ordering::Relaxed)
    }

    fn add(&self, bytes: u64) {
        self.downloaded_bytes.fetch_add(bytes, Ordering::Relaxed);
    }
}

pub fn segment_temp_path(destination: &Utf8Path, index: usize) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{destination}.part{index}"))
}

/// Splits `[0, total_size)` into `count` equal contiguous ranges; the last one
/// takes the remainder. The count is clamped so no range is empty.
pub fn plan_segments(total_size: u64, count: usize, destination: &Utf8Path) -> Vec<Segment> {
    if total_size == 0 {
        return Vec::new();
    }
    let count = (count.max(1) as u64).min(total_size);
    let width = total_size / count;
    (0..count)
        .map(|index| {
            let start_byte = index * width;
            let end_byte = if index + 1 == count {
                total_size - 1
            } else {
                start_byte + width - 1
            };
            Segment {
                index: index as usize,
                start_byte,
                end_byte,
                temp_path: segment_temp_path(destination, index as usize),
                downloaded_bytes: AtomicU64::new(0),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub connections: usize,
    pub chunk_size: usize,
    pub multi_segment_threshold: u64,
    pub poll_interval: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl TransferSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connections: settings.download_connections.max(1),
            chunk_size: settings.download_chunk_size.max(1),
            multi_segment_threshold: MULTI_SEGMENT_THRESHOLD,
            poll_interval: PROGRESS_INTERVAL,
        }
    }
}

/// Per-task view of the run: shared counters, the event sink and cancellation.
pub struct TransferContext<'a> {
    pub session: &'a Session,
    pub sink: &'a dyn ProgressSink,
    pub cancel: &'a CancelToken,
}

impl TransferContext<'_> {
    fn emit_progress(&self, filename: &str, downloaded_bytes: u64, total_bytes: Option<u64>) {
        if !self.session.should_emit() {
            return;
        }
        self.sink.event(DownloadEvent::Progress {
            filename: filename.to_string(),
            completed_tasks: self.session.completed(),
            total_tasks: self.session.total_tasks(),
            downloaded_bytes,
            total_bytes,
        });
    }
}

pub struct SegmentedDownloader<T: RangeTransport> {
    transport: T,
    settings: TransferSettings,
}

impl<T: RangeTransport> SegmentedDownloader<T> {
    pub fn new(transport: T, settings: TransferSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn is_multi_segment(&self, probe: &Probe) -> bool {
        probe.accepts_ranges
            && probe.total_size > self.settings.multi_segment_threshold
            && self.settings.connections > 1
    }

    /// Downloads one task to `destination` and returns the bytes written. On
    /// failure neither the destination nor any segment file is left behind.
    pub fn download(
        &self,
        task: &DownloadTask,
        destination: &Utf8Path,
        ctx: &TransferContext<'_>,
    ) -> Result<u64, DepotError> {
        ctx.cancel.check()?;
        let result = self.transport.probe(&task.url).and_then(|probe| {
            if self.is_multi_segment(&probe) {
                info!(
                    file = %task.filename,
                    connections = self.settings.connections,
                    "using parallel connections"
                );
                self.download_segmented(task, probe.total_size, destination, ctx)
            } else {
                if probe.total_size > self.settings.multi_segment_threshold {
                    info!(file = %task.filename, "range requests unavailable, using single connection");
                }
                self.download_single(task, probe.total_size, destination, ctx)
            }
        });
        if result.is_err() {
            self.remove_partial(destination);
        }
        result
    }

    fn download_single(
        &self,
        task: &DownloadTask,
        probed_size: u64,
        destination: &Utf8Path,
        ctx: &TransferContext<'_>,
    ) -> Result<u64, DepotError> {
        let body = self.transport.fetch(&task.url, None)?;
        let total_size = match probed_size {
            0 => body.content_length.filter(|length| *length > 0),
            size => Some(size),
        };
        let mut reader = body.reader;
        let mut file = File::create(destination.as_std_path())
            .map_err(|err| DepotError::Filesystem(format!("create {destination}: {err}")))?;
        let mut downloaded = 0u64;
        stream_chunks(
            &mut reader,
            &mut file,
            self.settings.chunk_size,
            ctx.cancel,
            None,
            |bytes| {
                downloaded += bytes;
                ctx.emit_progress(&task.filename, downloaded, total_size);
            },
        )
        .map_err(|err| match err {
            ChunkError::Cancelled => DepotError::Cancelled,
            ChunkError::Read(err) => DepotError::TransferHttp(err.to_string()),
            ChunkError::Write(err) => DepotError::Filesystem(err.to_string()),
        })?;
        file.flush()
            .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        Ok(downloaded)
    }

    fn download_segmented(
        &self,
        task: &DownloadTask,
        total_size: u64,
        destination: &Utf8Path,
        ctx: &TransferContext<'_>,
    ) -> Result<u64, DepotError> {
        let segments = plan_segments(total_size, self.settings.connections, destination);
        let abort = AtomicBool::new(false);

        let results = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(segments.len());
            for segment in &segments {
                if ctx.cancel.is_cancelled() || abort.load(Ordering::SeqCst) {
                    break;
                }
                let abort = &abort;
                let cancel = ctx.cancel;
                let url = task.url.as_str();
                handles.push(scope.spawn(move || {
                    let result = self.fetch_segment(url, segment, cancel, abort);
                    if result.is_err() {
                        abort.store(true, Ordering::SeqCst);
                    }
                    result
                }));
            }
            let launched = handles.len();

            while handles.iter().any(|handle| !handle.is_finished()) {
                thread::sleep(self.settings.poll_interval);
                let downloaded = segments.iter().map(Segment::downloaded).sum();
                ctx.emit_progress(&task.filename, downloaded, Some(total_size));
            }

            let mut results = handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(DepotError::Segment {
                            index,
                            message: "segment worker panicked".to_string(),
                        })
                    })
                })
                .collect::<Vec<_>>();
            if launched < segments.len() {
                results.push(Err(DepotError::Cancelled));
            }
            results
        });

        if let Some(err) = first_failure(results) {
            return Err(err);
        }

        debug!(file = %task.filename, segments = segments.len(), "combining segments");
        let mut output = File::create(destination.as_std_path())
            .map_err(|err| DepotError::Filesystem(format!("create {destination}: {err}")))?;
        let mut written = 0u64;
        for segment in &segments {
            let mut part = File::open(segment.temp_path.as_std_path())
                .map_err(|err| DepotError::Filesystem(format!("open {}: {err}", segment.temp_path)))?;
            written += io::copy(&mut part, &mut output)
                .map_err(|err| DepotError::Filesystem(err.to_string()))?;
            drop(part);
            fs::remove_file(segment.temp_path.as_std_path())
                .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        }
        output
            .flush()
            .map_err(|err| DepotError::Filesystem(err.to_string()))?;
        Ok(written)
    }

    fn fetch_segment(
        &self,
        url: &str,
        segment: &Segment,
        cancel: &CancelToken,
        abort: &AtomicBool,
    ) -> Result<(), DepotError> {
        let segment_error = |message: String| DepotError::Segment {
            index: segment.index,
            message,
        };
        let body = self
            .transport
            .fetch(url, Some(segment.range()))
            .map_err(|err| segment_error(err.to_string()))?;
        let mut reader = body.reader;
        let mut file = File::create(segment.temp_path.as_std_path())
            .map_err(|err| segment_error(err.to_string()))?;
        stream_chunks(
            &mut reader,
            &mut file,
            self.settings.chunk_size,
            cancel,
            Some(abort),
            |bytes| segment.add(bytes),
        )
        .map_err(|err| match err {
            ChunkError::Cancelled => DepotError::Cancelled,
            ChunkError::Read(err) | ChunkError::Write(err) => segment_error(err.to_string()),
        })?;
        file.flush().map_err(|err| segment_error(err.to_string()))
    }

    fn remove_partial(&self, destination: &Utf8Path) {
        let _ = fs::remove_file(destination.as_std_path());
        for index in 0..self.settings.connections {
            let _ = fs::remove_file(segment_temp_path(destination, index).as_std_path());
        }
    }
}

enum ChunkError {
    Cancelled,
    Read(io::Error),
    Write(io::Error),
}

/// Copies `reader` into `writer` one chunk at a time, checking for
/// cancellation before every read.
fn stream_chunks<R: Read + ?Sized, W: Write>(
    reader: &mut R,
    writer: &mut W,
    chunk_size: usize,
    cancel: &CancelToken,
    abort: Option<&AtomicBool>,
    mut on_chunk: impl FnMut(u64),
) -> Result<(), ChunkError> {
    let mut buffer = vec![0u8; chunk_size];
    loop {
        let aborted = abort.map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false);
        if cancel.is_cancelled() || aborted {
            return Err(ChunkError::Cancelled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(ChunkError::Read(err)),
        };
        writer
            .write_all(&buffer[..read])
            .map_err(ChunkError::Write)?;
        on_chunk(read as u64);
    }
}

/// The first real error; `Cancelled` only when nothing else went wrong.
fn first_failure(results: Vec<Result<(), DepotError>>) -> Option<DepotError> {
    let mut cancelled = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(DepotError::Cancelled) => cancelled = Some(DepotError::Cancelled),
            Err(err) => return Some(err),
        }
    }
    cancelled
}
