use authgate_core::AuthError;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// The writable side of an HTTP exchange as seen by the handler.
pub trait ResponseSink: Send {
    /// Set the response status.
    fn set_status(&mut self, status: StatusCode);

    /// Set a header, replacing earlier values.
    fn insert_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Commit status and headers.
    fn flush(&mut self) -> Result<(), AuthError>;
}

/// A [`ResponseSink`] that records what was written.
///
/// Web glue converts it into a framework response once the handler returns.
#[derive(Debug, Clone, Default)]
pub struct BufferedResponse {
    status: Option<StatusCode>,
    headers: HeaderMap,
    flush_count: usize,
}

impl BufferedResponse {
    /// An empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// The status written so far, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Headers written so far.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The `Location` header as a string.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
    }

    /// How often [`ResponseSink::flush`] was called.
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// Whether anything was committed.
    pub fn is_committed(&self) -> bool {
        self.flush_count > 0
    }

    /// Status and headers.
    pub fn into_parts(self) -> (Option<StatusCode>, HeaderMap) {
        (self.status, self.headers)
    }
}

impl ResponseSink for BufferedResponse {
    fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    fn flush(&mut self) -> Result<(), AuthError> {
        self.flush_count += 1;
        Ok(())
    }
}

/// Point the response at `location`.
pub(crate) fn write_location(
    response: &mut dyn ResponseSink,
    status: StatusCode,
    location: &str,
) -> Result<(), AuthError> {
    let value = HeaderValue::from_str(location)
        .map_err(|e| AuthError::Provider(format!("invalid redirect location: {e}")))?;
    response.set_status(status);
    response.insert_header(http::header::LOCATION, value);
    Ok(())
}
