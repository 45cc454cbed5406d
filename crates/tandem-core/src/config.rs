//! Connection configuration.

const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Shut down the write half of the stream when the writer exits, so the
    /// peer sees end-of-stream. Disable when the stream is shared with
    /// something that outlives the connection.
    pub shutdown_stream_on_exit: bool,

    /// Buffer size of the event broadcast. Subscribers that fall further
    /// behind than this miss events (they observe a lag).
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            shutdown_stream_on_exit: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    /// Defaults, with `TANDEM_EVENT_CAPACITY` applied when it holds a
    /// positive integer.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(capacity) = parse_capacity(std::env::var("TANDEM_EVENT_CAPACITY").ok()) {
            config.event_capacity = capacity;
        }
        config
    }

    pub fn shutdown_stream_on_exit(mut self, enabled: bool) -> Self {
        self.shutdown_stream_on_exit = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

fn parse_capacity(value: Option<String>) -> Option<usize> {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
}
