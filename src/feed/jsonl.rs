//! JSON-lines event feed
//!
//! Reads provider events from a file holding one JSON object per line, as
//! produced by provider exports or a log shipper appending webhook bodies.
//! Listing pages through the file; polling tails it.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use super::{EventFeed, EventPage, FeedError, FeedResult};
use crate::types::Event;
use crate::utils::CancelToken;

/// Default number of lines per listed page
pub const DEFAULT_PAGE_SIZE: usize = 300;

/// Lines read from one position in the file
struct Chunk {
    events: Vec<Event>,
    /// Byte offset just past the last consumed line
    end: u64,
    /// True if the end of the file was reached
    eof: bool,
}

/// Feed reading provider events from a JSON-lines file
#[derive(Debug)]
pub struct JsonlFeed {
    path: PathBuf,
    page_size: usize,
    /// Offset up to which polled lines are acknowledged
    offset: u64,
    /// End offset of the last polled, not yet acknowledged batch
    pending: Option<u64>,
}

impl JsonlFeed {
    /// Create a feed over `path`; polling starts at the beginning of the file
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
            offset: 0,
            pending: None,
        }
    }

    /// Set the number of lines per listed page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// File this feed reads from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset up to which polled lines have been acknowledged
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn io_error(&self, source: io::Error) -> FeedError {
        FeedError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read events starting at `start`
    ///
    /// With `whole_lines` set, a trailing line without a newline is left
    /// unread since a writer may still be appending to it.
    fn read_chunk(&self, start: u64, max_lines: Option<usize>, whole_lines: bool) -> FeedResult<Chunk> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Chunk {
                    events: Vec::new(),
                    end: start,
                    eof: true,
                });
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| self.io_error(e))?;

        let mut events = Vec::new();
        let mut end = start;
        let mut lines = 0;
        let mut line = Vec::new();

        loop {
            if max_lines.is_some_and(|max| lines >= max) {
                let eof = reader.fill_buf().map_err(|e| self.io_error(e))?.is_empty();
                return Ok(Chunk { events, end, eof });
            }

            line.clear();
            let read = reader
                .read_until(b'\n', &mut line)
                .map_err(|e| self.io_error(e))?;
            if read == 0 {
                break;
            }
            if whole_lines && line.last() != Some(&b'\n') {
                break;
            }

            let line_start = end;
            end += read as u64;
            lines += 1;

            // Bytes are decoded per line so one bad line cannot fail the file
            let trimmed = trim_ascii(&line);
            if trimmed.is_empty() {
                continue;
            }
            match Event::decode(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        offset = line_start,
                        error = %e,
                        "skipping malformed event line"
                    );
                }
            }
        }

        Ok(Chunk {
            events,
            end,
            eof: true,
        })
    }

    fn file_len(&self) -> FeedResult<u64> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end]
}

impl EventFeed for JsonlFeed {
    fn list_page(&mut self, _scope: &str, cursor: Option<&str>) -> FeedResult<EventPage> {
        let start = match cursor {
            None => 0,
            Some(cursor) => cursor
                .parse::<u64>()
                .map_err(|_| FeedError::InvalidCursor(cursor.to_string()))?,
        };

        let chunk = self.read_chunk(start, Some(self.page_size), false)?;
        let next = (!chunk.eof).then(|| chunk.end.to_string());

        debug!(
            path = %self.path.display(),
            start,
            events = chunk.events.len(),
            "listed page"
        );

        Ok(EventPage {
            events: chunk.events,
            next,
        })
    }

    fn poll(
        &mut self,
        _scope: &str,
        interval: Duration,
        cancel: &CancelToken,
    ) -> FeedResult<Option<Vec<Event>>> {
        loop {
            if cancel.wait_timeout(interval) {
                return Ok(None);
            }

            if self.file_len()? < self.offset {
                warn!(path = %self.path.display(), "event file shrank, rereading from start");
                self.offset = 0;
                self.pending = None;
            }

            let chunk = self.read_chunk(self.offset, None, true)?;
            if chunk.end == self.offset {
                continue;
            }
            if chunk.events.is_empty() {
                // Only blank or malformed lines were appended
                self.offset = chunk.end;
                continue;
            }

            self.pending = Some(chunk.end);
            return Ok(Some(chunk.events));
        }
    }

    fn acknowledge(&mut self) -> FeedResult<()> {
        if let Some(end) = self.pending.take() {
            self.offset = end;
        }
        Ok(())
    }
}
