//! Byte-range arithmetic for partial-content file responses.
//!
//! Supported forms are single ranges only: `bytes=S-`, `bytes=S-E` and the
//! suffix form `bytes=-N`. Multi-range requests are answered with their first
//! range. The last byte of a window is at most [`MAX_CHUNK_BYTES`] past its
//! start, so a capped window streams `MAX_CHUNK_BYTES + 1` bytes: exactly the
//! inclusive span named in `Content-Range`.
//!
//! A range spec must be `start-`, `start-end` or `-suffix` with plain decimal
//! numbers. Anything else (`bytes=500`, `bytes=x100-`) is malformed.

/// Upper bound on how far past `start` a single range response reaches.
pub const MAX_CHUNK_BYTES: u64 = 10 * 1024 * 1024;

/// The slice of a file served by one 206 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    /// First byte served.
    pub start: u64,
    /// Last byte served (inclusive), as reported in `Content-Range`.
    pub end: u64,
    /// Exclusive end of the streamed window, always `end + 1`.
    pub chunk_end: u64,
}

impl RangeWindow {
    /// Window for an open-ended `bytes=start-` request.
    ///
    /// Returns `None` when `start` lies at or past the end of the file.
    pub fn from_start(start: u64, file_size: u64) -> Option<Self> {
        Self::bounded(start, None, file_size)
    }

    fn bounded(start: u64, requested_end: Option<u64>, file_size: u64) -> Option<Self> {
        if start >= file_size {
            return None;
        }
        let mut end = start.saturating_add(MAX_CHUNK_BYTES).min(file_size - 1);
        if let Some(requested_end) = requested_end {
            end = end.min(requested_end);
        }
        Some(Self {
            start,
            end,
            chunk_end: end + 1,
        })
    }

    pub fn content_length(&self) -> u64 {
        self.chunk_end - self.start
    }

    /// `Content-Range` header value for this window.
    pub fn content_range(&self, file_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, file_size)
    }
}

/// What a `Range` header asks for, evaluated against a concrete file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Serve this window with 206.
    Window(RangeWindow),
    /// Syntactically fine but outside the file; answer 416.
    Unsatisfiable,
    /// No usable numbers in the header; answer 400.
    Malformed,
    /// A unit other than `bytes`; serve the whole file.
    Ignored,
}

/// Evaluate a `Range` header value against a file of `file_size` bytes.
pub fn evaluate(header: &str, file_size: u64) -> RangeRequest {
    let Some((unit, ranges)) = header.trim().split_once('=') else {
        return RangeRequest::Malformed;
    };
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return RangeRequest::Ignored;
    }

    let first = ranges.split(',').next().unwrap_or_default().trim();
    let Some((start, end)) = first.split_once('-') else {
        return RangeRequest::Malformed;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        let Ok(suffix) = end.parse::<u64>() else {
            return RangeRequest::Malformed;
        };
        if suffix == 0 || file_size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        let start = file_size - suffix.min(file_size);
        return to_request(RangeWindow::bounded(start, None, file_size));
    }

    let Ok(start) = start.parse::<u64>() else {
        return RangeRequest::Malformed;
    };
    if end.is_empty() {
        return to_request(RangeWindow::from_start(start, file_size));
    }

    let Ok(end) = end.parse::<u64>() else {
        return RangeRequest::Malformed;
    };
    if end < start {
        return RangeRequest::Unsatisfiable;
    }
    to_request(RangeWindow::bounded(start, Some(end), file_size))
}

fn to_request(window: Option<RangeWindow>) -> RangeRequest {
    window.map_or(RangeRequest::Unsatisfiable, RangeRequest::Window)
}
