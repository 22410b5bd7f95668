#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use regex::Regex;

use switchroot_depot::config::StaticSource;
use switchroot_depot::error::DepotError;
use switchroot_depot::progress::{CancelToken, DownloadEvent, ProgressSink};
use switchroot_depot::sources::{RawBuild, ReleaseAsset, SourceClient};
use switchroot_depot::transfer::{ByteRange, Probe, RangeTransport, TransferBody};

pub fn utf8_tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|index| (index * 31 % 251) as u8).collect()
}

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub body: Vec<u8>,
    pub accepts_ranges: bool,
    /// Range requests starting at this offset break after a few bytes.
    pub broken_range_start: Option<u64>,
    /// Cancelled as soon as any response body for this file yields its first chunk.
    pub cancel_on_first_read: Option<CancelToken>,
}

impl FakeFile {
    pub fn new(body: Vec<u8>, accepts_ranges: bool) -> Self {
        Self {
            body,
            accepts_ranges,
            broken_range_start: None,
            cancel_on_first_read: None,
        }
    }

    pub fn cancelling(mut self, token: &CancelToken) -> Self {
        self.cancel_on_first_read = Some(token.clone());
        self
    }
}

/// In-memory server. Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct FakeTransport {
    files: Arc<Mutex<HashMap<String, FakeFile>>>,
    requests: Arc<Mutex<Vec<(String, Option<ByteRange>)>>>,
}

impl FakeTransport {
    pub fn with_file(self, url: &str, file: FakeFile) -> Self {
        self.files.lock().unwrap().insert(url.to_string(), file);
        self
    }

    pub fn requests(&self) -> Vec<(String, Option<ByteRange>)> {
        self.requests.lock().unwrap().clone()
    }

    fn file(&self, url: &str) -> Result<FakeFile, DepotError> {
        self.files
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| DepotError::TransferStatus {
                status: 404,
                url: url.to_string(),
            })
    }
}

impl RangeTransport for FakeTransport {
    fn probe(&self, url: &str) -> Result<Probe, DepotError> {
        let file = self.file(url)?;
        Ok(Probe {
            total_size: file.body.len() as u64,
            accepts_ranges: file.accepts_ranges,
        })
    }

    fn fetch(&self, url: &str, range: Option<ByteRange>) -> Result<TransferBody, DepotError> {
        self.requests.lock().unwrap().push((url.to_string(), range));
        let file = self.file(url)?;
        let Some(range) = range else {
            let length = file.body.len() as u64;
            return Ok(TransferBody {
                reader: cancelling_reader(Cursor::new(file.body), file.cancel_on_first_read),
                content_length: Some(length),
            });
        };
        let slice = file.body[range.start as usize..=range.end as usize].to_vec();
        if file.broken_range_start == Some(range.start) {
            return Ok(TransferBody {
                reader: Box::new(BrokenReader { sent: false }),
                content_length: Some(range.len()),
            });
        }
        Ok(TransferBody {
            reader: cancelling_reader(Cursor::new(slice), file.cancel_on_first_read),
            content_length: Some(range.len()),
        })
    }
}

fn cancelling_reader<R: Read + Send + 'static>(
    inner: R,
    token: Option<CancelToken>,
) -> Box<dyn Read + Send> {
    match token {
        Some(token) => Box::new(CancellingReader { inner, token }),
        None => Box::new(inner),
    }
}

/// Hands out the first chunk, then trips the token.
struct CancellingReader<R> {
    inner: R,
    token: CancelToken,
}

impl<R: Read> Read for CancellingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.token.cancel();
        Ok(read)
    }
}

/// Yields one byte, then a connection reset.
struct BrokenReader {
    sent: bool,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.sent {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        }
        self.sent = true;
        buf[0] = 0;
        Ok(1)
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DownloadEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: DownloadEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Canned discovery answers keyed by URL, profile id and repository name.
#[derive(Default)]
pub struct FakeSource {
    pub listings: HashMap<String, Vec<String>>,
    pub sizes: HashMap<String, u64>,
    pub builds: HashMap<String, Vec<RawBuild>>,
    pub repos: Option<Vec<String>>,
    pub releases: HashMap<String, Vec<ReleaseAsset>>,
    pub release_lookups: Mutex<Vec<String>>,
}

impl SourceClient for FakeSource {
    fn list_static_files(
        &self,
        source: &StaticSource,
        _pattern: &Regex,
    ) -> Result<Vec<String>, DepotError> {
        self.listings
            .get(&source.url)
            .cloned()
            .ok_or_else(|| DepotError::SourceHttp(format!("connection refused: {}", source.url)))
    }

    fn probe_size(&self, url: &str) -> Result<u64, DepotError> {
        self.sizes.get(url).copied().ok_or(DepotError::SourceStatus {
            status: 404,
            message: "not found".to_string(),
        })
    }

    fn fetch_builds(&self, profile_id: &str) -> Result<Vec<RawBuild>, DepotError> {
        Ok(self.builds.get(profile_id).cloned().unwrap_or_default())
    }

    fn list_companion_repos(&self) -> Result<Vec<String>, DepotError> {
        self.repos.clone().ok_or(DepotError::SourceStatus {
            status: 403,
            message: "rate limited".to_string(),
        })
    }

    fn latest_release_assets(&self, repo: &str) -> Result<Vec<ReleaseAsset>, DepotError> {
        self.release_lookups.lock().unwrap().push(repo.to_string());
        Ok(self.releases.get(repo).cloned().unwrap_or_default())
    }
}
