pub mod codec;

use std::ops::Deref;

/// Identifier of a content key. Ids are expected to be positive and, for the
/// closed-form Zipf model, assigned in popularity order (id 1 is the most popular).
pub type KeyId = u64;
/// Timestamp in trace units (whatever unit the trace file uses).
pub type Timestamp = f64;

/// Traces longer than this are truncated on construction.
pub const MAX_TRACE_LEN: usize = 2_000_000;

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Request {
    pub timestamp: Timestamp,
    pub key: KeyId,
    pub size: u64,
}

crate::impl_codec!(Request, timestamp, Timestamp, key, KeyId, size, u64);

impl From<(Timestamp, KeyId, u64)> for Request {
    fn from((timestamp, key, size): (Timestamp, KeyId, u64)) -> Self {
        Self {
            timestamp,
            key,
            size,
        }
    }
}

/// An immutable, ordered sequence of requests.
///
/// Only the first [`MAX_TRACE_LEN`] requests are kept; everything after is dropped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trace {
    requests: Vec<Request>,
}

impl Trace {
    pub fn new<I: IntoIterator<Item = Request>>(requests: I) -> Self {
        Self {
            requests: requests.into_iter().take(MAX_TRACE_LEN).collect(),
        }
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }
}

impl FromIterator<Request> for Trace {
    fn from_iter<I: IntoIterator<Item = Request>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl Deref for Trace {
    type Target = [Request];

    fn deref(&self) -> &Self::Target {
        &self.requests
    }
}
