use crate::HeaderPairs;

/// Accumulates what the application sent back while its body streams out.
///
/// Status and headers are taken from the first response head only. The byte
/// count only grows. Elapsed time is fixed once, when the body is drained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseObservation {
    status: Option<u16>,
    headers: HeaderPairs,
    bytes_out: u64,
    millis: Option<u64>,
}

impl ResponseObservation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the response head. Returns `false` if a head was already
    /// recorded, in which case nothing changes.
    pub fn record_head(&mut self, status: u16, headers: HeaderPairs) -> bool {
        if self.status.is_some() {
            return false;
        }
        self.status = Some(status);
        self.headers = headers;
        true
    }

    /// Adds the length of one emitted body chunk.
    pub fn add_bytes(&mut self, len: u64) {
        self.bytes_out = self.bytes_out.saturating_add(len);
    }

    /// Fixes the elapsed time. Later calls return the first value.
    pub fn finalize(&mut self, start_millis: i64, now_millis: i64) -> u64 {
        *self
            .millis
            .get_or_insert_with(|| elapsed_millis(start_millis, now_millis))
    }

    /// HTTP status, `0` until a head is recorded.
    pub fn status(&self) -> u16 {
        self.status.unwrap_or(0)
    }

    pub fn headers(&self) -> &HeaderPairs {
        &self.headers
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Elapsed milliseconds, `0` until finalized.
    pub fn millis(&self) -> u64 {
        self.millis.unwrap_or(0)
    }

    pub fn is_finalized(&self) -> bool {
        self.millis.is_some()
    }
}

/// Milliseconds between two wall-clock readings. A clock that stepped
/// backwards yields `0`.
pub fn elapsed_millis(start_millis: i64, now_millis: i64) -> u64 {
    u64::try_from(now_millis.saturating_sub(start_millis)).unwrap_or(0)
}
