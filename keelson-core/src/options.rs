//! Endpoint, pool and pump configuration
//!
//! Builder-style option structs. Every field has a documented default; there
//! is no file or environment based configuration.

use std::time::Duration;

/// Minimum grace window added to every delayed close.
pub const DELAY_CLOSE_GRACE: Duration = Duration::from_millis(50);

/// How a receive that stalled on a full receive buffer is resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeMode {
    /// Re-check the buffer every `msg_resuming_interval` (default)
    #[default]
    Batch,
    /// Dispatch resumes receiving inline after each accepted message
    AfterHandling,
}

/// Per-endpoint options.
///
/// # Examples
///
/// ```
/// use keelson_core::options::EndpointOptions;
/// use std::time::Duration;
///
/// let opts = EndpointOptions::default()
///     .with_max_msg_num(256)
///     .with_heartbeat(Duration::from_secs(5), 3);
/// assert_eq!(opts.max_msg_num, 256);
/// ```
#[derive(Debug, Clone)]
pub struct EndpointOptions {
    /// Capacity of both the send buffer and the receive buffer (messages)
    ///
    /// - Default: 1024
    /// - Sends beyond this are rejected unless `can_overflow` is set
    /// - Receiving pauses ("recv idle") while the receive buffer is full
    pub max_msg_num: usize,

    /// Delay before re-checking a full receive buffer
    ///
    /// - Default: 50ms
    pub msg_resuming_interval: Duration,

    /// Delay before re-dispatching a message the handler declined
    ///
    /// - Default: 50ms
    pub msg_handling_interval: Duration,

    /// Resumption strategy for receiving after the receive buffer was full
    pub resume_mode: ResumeMode,

    /// Heartbeat interval; `None` disables automatic heartbeat
    ///
    /// - Default: None
    pub heartbeat_interval: Option<Duration>,

    /// Missed intervals tolerated before a heartbeat timeout
    ///
    /// - Default: 3
    pub heartbeat_max_absence: u32,

    /// Extra wait before finalizing a closed endpoint
    ///
    /// - Default: 0 (only the fixed grace window of 50ms applies)
    pub delay_close: Duration,

    /// Size of each raw read (bytes)
    ///
    /// - Default: 4096
    pub read_buffer_size: usize,

    /// Upper bound on bytes coalesced into one stream write
    ///
    /// - Default: 64KB
    pub max_send_batch: usize,

    /// Retry interval used by `safe_send` while the send buffer is full
    ///
    /// - Default: 50ms
    pub send_retry_interval: Duration,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            max_msg_num: 1024,
            msg_resuming_interval: Duration::from_millis(50),
            msg_handling_interval: Duration::from_millis(50),
            resume_mode: ResumeMode::Batch,
            heartbeat_interval: None,
            heartbeat_max_absence: 3,
            delay_close: Duration::ZERO,
            read_buffer_size: 4096,
            max_send_batch: 64 * 1024,
            send_retry_interval: Duration::from_millis(50),
        }
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set send/receive buffer capacity.
    pub fn with_max_msg_num(mut self, max: usize) -> Self {
        self.max_msg_num = max;
        self
    }

    pub fn with_msg_resuming_interval(mut self, interval: Duration) -> Self {
        self.msg_resuming_interval = interval;
        self
    }

    pub fn with_msg_handling_interval(mut self, interval: Duration) -> Self {
        self.msg_handling_interval = interval;
        self
    }

    pub fn with_resume_mode(mut self, mode: ResumeMode) -> Self {
        self.resume_mode = mode;
        self
    }

    /// Arm heartbeat automatically on start.
    pub fn with_heartbeat(mut self, interval: Duration, max_absence: u32) -> Self {
        self.heartbeat_interval = Some(interval);
        self.heartbeat_max_absence = max_absence;
        self
    }

    pub fn with_delay_close(mut self, delay: Duration) -> Self {
        self.delay_close = delay;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_max_send_batch(mut self, bytes: usize) -> Self {
        self.max_send_batch = bytes;
        self
    }

    pub fn with_send_retry_interval(mut self, interval: Duration) -> Self {
        self.send_retry_interval = interval;
        self
    }

    /// Total wait applied by the delayed-close timer.
    #[inline]
    pub fn delay_close_interval(&self) -> Duration {
        self.delay_close + DELAY_CLOSE_GRACE
    }
}

/// Object pool options.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of live endpoints
    ///
    /// - Default: 4096
    pub max_size: usize,

    /// Recycle quiesced retired endpoints in `create`
    ///
    /// - Default: false (always allocate)
    pub reuse: bool,

    /// Period of the sweep moving closed, quiesced endpoints out of the live map
    ///
    /// - Default: Some(60s)
    pub clear_interval: Option<Duration>,

    /// Period of the sweep dropping quiesced retired endpoints
    ///
    /// - Default: Some(60s)
    pub free_interval: Option<Duration>,

    /// Retired endpoints kept around for reuse by the free sweep
    ///
    /// - Default: 64
    pub retired_keep: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 4096,
            reuse: false,
            clear_interval: Some(Duration::from_secs(60)),
            free_interval: Some(Duration::from_secs(60)),
            retired_keep: 64,
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }

    pub fn with_reuse(mut self, reuse: bool) -> Self {
        self.reuse = reuse;
        self
    }

    pub fn with_clear_interval(mut self, interval: Option<Duration>) -> Self {
        self.clear_interval = interval;
        self
    }

    pub fn with_free_interval(mut self, interval: Option<Duration>) -> Self {
        self.free_interval = interval;
        self
    }

    pub fn with_retired_keep(mut self, keep: usize) -> Self {
        self.retired_keep = keep;
        self
    }
}

/// Service pump options.
#[derive(Debug, Clone)]
pub struct PumpOptions {
    /// Reactor worker threads
    ///
    /// - Default: number of logical CPUs
    pub worker_threads: usize,

    /// Worker thread name
    ///
    /// - Default: "keelson-worker"
    pub thread_name: String,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            thread_name: "keelson-worker".to_string(),
        }
    }
}

impl PumpOptions {
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

/// Client reconnection policy.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Delay before the first reconnection attempt
    ///
    /// - Default: 500ms
    pub interval: Duration,

    /// Ceiling for the exponential backoff
    ///
    /// - Default: 10s
    pub max_interval: Duration,

    /// Attempts before giving up; `None` retries forever
    ///
    /// - Default: None
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl ReconnectOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }
}
