use std::time::Duration;

/// The default number of completions dequeued per wait.
pub const DEFAULT_BATCH: usize = 64;

/// Tunables of a [Poller][crate::Poller] and of the background worker
/// driving it.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Options {
    /// The maximum number of completions dequeued per wait.
    pub batch: usize,
    /// How long the worker blocks per drain, `None` to block until a
    /// completion or wake arrives.
    pub tick: Option<Duration>,
    /// How long the worker keeps draining outstanding operations after the
    /// terminating broadcast.
    pub shutdown_timeout: Duration,
    /// The name given to the worker thread.
    pub name: String,
}

impl Options {
    /// Construct default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of completions dequeued per wait.
    pub fn batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Set how long the worker blocks per drain.
    pub fn tick(mut self, tick: Option<Duration>) -> Self {
        self.tick = tick;
        self
    }

    /// Set how long outstanding operations are drained at shutdown.
    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Set the name of the worker thread.
    pub fn name<S>(mut self, name: S) -> Self
    where
        S: Into<String>,
    {
        self.name = name.into();
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            batch: DEFAULT_BATCH,
            tick: None,
            shutdown_timeout: Duration::from_secs(5),
            name: String::from("proactor"),
        }
    }
}
