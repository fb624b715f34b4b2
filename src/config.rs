use std::time::Duration;

/// Default speculative margin fetched around each network read (64 KiB).
pub const DEFAULT_BUFFER_SIZE: u64 = 64 << 10;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for [`HttpRangeFile`](crate::io::HttpRangeFile).
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Look-ahead / look-behind margin in bytes.
    ///
    /// Larger values mean fewer range requests and more wasted bandwidth.
    pub buffer_size: u64,
    /// Applied to every request. `None` leaves it to the network stack.
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: Some(DEFAULT_TIMEOUT),
            user_agent: format!("vmpack/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn with_buffer_size(mut self, buffer_size: u64) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
