use crate::channel::{Channel, Waker};
use crate::errors;
use crate::multiplexer::Multiplexer;
use crate::options::Options;
use crate::poller::Poller;
use futures::channel::oneshot;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A handle to a worker thread driving a [Poller].
#[derive(Debug)]
pub struct Worker {
    thread: thread::JoinHandle<io::Result<()>>,
    waker: Waker,
    stop: Arc<AtomicBool>,
}

impl Worker {
    /// Spawn a worker thread which drives a poller over the given channel.
    ///
    /// The poller is constructed on the worker thread, where `init` is called
    /// to watch the initial sockets and submit their first operations. This
    /// returns once `init` has completed, with its error if it failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use proactor::background::Worker;
    /// use proactor::loopback::LoopbackPort;
    /// use proactor::Options;
    ///
    /// # fn main() -> std::io::Result<()> {
    /// let port = LoopbackPort::new();
    ///
    /// let worker = Worker::spawn(port, Options::new(), |poller| {
    ///     let _context = poller.begin_watching(7)?;
    ///     Ok(())
    /// })?;
    ///
    /// worker.stop()?;
    /// worker.join()?;
    /// # Ok(()) }
    /// ```
    pub fn spawn<C, F>(channel: C, options: Options, init: F) -> io::Result<Self>
    where
        C: Channel,
        F: 'static + Send + FnOnce(&Poller<C>) -> io::Result<()>,
    {
        let waker = Waker::new(channel.clone());
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();
        let (tx, rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name(options.name.clone())
            .spawn(move || {
                let tick = options.tick;
                let shutdown_timeout = options.shutdown_timeout;
                let poller = Poller::with_options(channel, options);

                if let Err(e) = init(&poller) {
                    let _ = tx.send(Err(e));
                    return Ok(());
                }

                let _ = tx.send(Ok(()));
                run(&poller, &stop2, tick, shutdown_timeout)
            })?;

        match futures::executor::block_on(rx) {
            Ok(Ok(())) => Ok(Self {
                thread,
                waker,
                stop,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(oneshot::Canceled) => match thread.join() {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(errors::worker_gone()),
                Err(..) => Err(errors::worker_panicked()),
            },
        }
    }

    /// A waker which interrupts the current drain of the worker.
    pub fn waker(&self) -> &Waker {
        &self.waker
    }

    /// Ask the worker to stop.
    ///
    /// The worker notices promptly, even when it blocks without a timeout.
    /// It then broadcasts termination to every watched socket and drains the
    /// operations still outstanding before exiting.
    pub fn stop(&self) -> io::Result<()> {
        self.stop.store(true, Ordering::Release);
        self.waker.wake()
    }

    /// Join the worker thread.
    pub fn join(self) -> io::Result<()> {
        match self.thread.join() {
            Ok(result) => result,
            Err(..) => Err(errors::worker_panicked()),
        }
    }
}

/// The run loop of a worker.
fn run<M>(
    poller: &M,
    stop: &AtomicBool,
    tick: Option<Duration>,
    shutdown_timeout: Duration,
) -> io::Result<()>
where
    M: Multiplexer,
{
    while !stop.load(Ordering::Acquire) {
        poller.drain(tick, stop)?;
    }

    debug!("worker stopping");
    poller.broadcast_terminating();

    // A flag which is never raised, so that draining blocks.
    let draining = AtomicBool::new(false);
    let started = Instant::now();

    while poller.pending() > 0 {
        let elapsed = started.elapsed();

        if elapsed >= shutdown_timeout {
            warn!(
                pending = poller.pending(),
                "giving up on outstanding operations"
            );
            break;
        }

        let remaining = shutdown_timeout - elapsed;
        poller.drain(Some(remaining.max(Duration::from_millis(1))), &draining)?;
    }

    trace!("worker stopped");
    Ok(())
}
