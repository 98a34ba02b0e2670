//! The reactor loop.
//!
//! A [`Reactor`] owns one ring (through its [`Backend`]), a table of pending
//! requests and a [`Dispatcher`]. It is driven by a single thread:
//!
//! ```text
//!   submit(op) ──► slot filled, not yet visible to the kernel
//!   flush()    ──► published with one io_uring_enter
//!   poll(n, t) ──► flush, wait, drain, dispatch by token
//! ```
//!
//! The reactor is `Idle` while no user request is outstanding and `Active`
//! otherwise. [`shutdown`](Reactor::shutdown) cancels everything still
//! pending, waits for every completion, and moves to `Shutdown`.
//!
//! # Example
//!
//! ```rust,no_run
//! use uring_reactor::{Collector, Op, Reactor, ReactorConfig};
//!
//! # fn main() -> uring_reactor::Result<()> {
//! let collector = Collector::new();
//! let mut reactor = Reactor::new(ReactorConfig::default(), collector.clone())?;
//!
//! reactor.submit(Op::nop(), 1)?;
//! reactor.poll(1, None)?;
//!
//! for completion in collector.take() {
//!     assert_eq!(completion.tag(), 1);
//!     completion.result()?;
//! }
//! reactor.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::io;
use std::mem;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::abi::Cqe;
use crate::backend::{self, Backend, BackendKind};
use crate::config::ReactorConfig;
use crate::error::{ReactorError, Result};
use crate::logging::{self, OperationMetrics, ReactorStats};
use crate::operation::{InFlight, Op, OperationKind};

mod completion;
mod pending;
mod wakeup;


pub use completion::{Collector, Completion, Dispatcher};
pub use pending::{PendingTable, Token};
pub use wakeup::WakeHandle;

use wakeup::WakeChannel;

/// Lifecycle state of a reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorState {
    /// No user request outstanding.
    Idle,
    /// At least one user request submitted and not yet dispatched.
    Active,
    /// Shut down; no further submissions are accepted.
    Shutdown,
}

/// Who a pending entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Submitted through [`Reactor::submit`]; dispatched on completion.
    User,
    /// Bounds a timed [`Reactor::poll`].
    Timer,
    /// Armed readiness poll on the wake eventfd.
    Wake,
    /// Cancellation issued by [`Reactor::cancel_all`].
    Cancel,
}

#[derive(Debug)]
struct Pending {
    in_flight: Box<InFlight>,
    tag: u64,
    origin: Origin,
    submitted_at: Option<Instant>,
}

/// Outcome of one drain pass.
#[derive(Debug, Default, Clone, Copy)]
struct Reaped {
    processed: usize,
    dispatched: usize,
}

/// Single-threaded io_uring reactor.
pub struct Reactor<D: Dispatcher> {
    backend: Box<dyn Backend>,
    pending: PendingTable<Pending>,
    dispatcher: D,
    state: ReactorState,
    config: ReactorConfig,
    stats: ReactorStats,
    metrics: Option<OperationMetrics>,
    user_pending: usize,
    cqes: Vec<Cqe>,
    wake: Option<WakeChannel>,
    wake_armed: bool,
    woken: bool,
    cancelling: bool,
}

impl<D: Dispatcher> fmt::Debug for Reactor<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("user_pending", &self.user_pending)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<D: Dispatcher> Reactor<D> {
    /// Validate `config`, bind a backend, create the ring and start `Idle`.
    ///
    /// When `config.logging.enabled` is set a `tracing` subscriber is
    /// installed first (a no-op if one already exists).
    ///
    /// # Errors
    ///
    /// Configuration errors and every fatal initialization error of
    /// [`backend::resolve`].
    pub fn new(config: ReactorConfig, dispatcher: D) -> Result<Self> {
        config.validate()?;
        if config.logging.enabled {
            logging::init(&config.logging);
        }

        let backend = backend::resolve(&config.backend, &config.ring)?;
        Ok(Self::with_backend(config, backend, dispatcher))
    }

    /// Start `Idle` on an already bound backend.
    pub(crate) fn with_backend(config: ReactorConfig, backend: Box<dyn Backend>, dispatcher: D) -> Self {
        debug!(
            backend = backend.name(),
            sq_entries = backend.sq_entries(),
            cq_entries = backend.cq_entries(),
            "reactor started"
        );

        let metrics = config.logging.metrics.then(OperationMetrics::new);
        let batch = config.ring.completion_batch;
        Self {
            pending: PendingTable::with_capacity(backend.sq_entries() as usize),
            backend,
            dispatcher,
            state: ReactorState::Idle,
            config,
            stats: ReactorStats::default(),
            metrics,
            user_pending: 0,
            cqes: Vec::with_capacity(batch),
            wake: None,
            wake_armed: false,
            woken: false,
            cancelling: false,
        }
    }

    /// Build `op` into the next submission slot.
    ///
    /// The slot stays invisible to the kernel until the next
    /// [`flush`](Self::flush) or [`poll`](Self::poll). `tag` is returned
    /// untouched in the [`Completion`].
    ///
    /// # Errors
    ///
    /// - [`ReactorError::Full`] when every slot is taken; flush or poll, then
    ///   retry. Nothing was consumed.
    /// - [`ReactorError::TooManyBuffers`] / [`ReactorError::InvalidOperation`]
    ///   for requests that cannot be encoded.
    /// - [`ReactorError::StaleToken`] when a cancel/remove/update names a
    ///   request that is no longer pending.
    /// - [`ReactorError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn submit(&mut self, op: Op, tag: u64) -> Result<Token> {
        if self.state == ReactorState::Shutdown {
            return Err(ReactorError::ShutDown);
        }
        self.submit_as(op, tag, Origin::User)
    }

    fn submit_as(&mut self, op: Op, tag: u64, origin: Origin) -> Result<Token> {
        op.validate(self.backend.max_iovecs())?;
        if let Some(target) = op.target() {
            self.check_target(op.kind(), target)?;
        }

        let mut slot = match self.backend.acquire_slot() {
            Ok(slot) => slot,
            Err(e) => {
                if e.is_backpressure() {
                    self.stats.backpressure += 1;
                    warn!(op = %op.kind(), "submission ring full");
                }
                return Err(e);
            }
        };

        let kind = op.kind();
        let fd = op.fd();
        let mut in_flight = InFlight::new(op);
        // SAFETY: the slot was just acquired from the live backend and is not
        // published until the next enter.
        let sqe = unsafe { slot.sqe_mut() };
        in_flight.prepare(self.backend.as_ref(), sqe);

        let token = self.pending.insert(Pending {
            in_flight,
            tag,
            origin,
            submitted_at: self.metrics.as_ref().map(|_| Instant::now()),
        });
        sqe.set_user_data(token.to_user_data());

        self.stats.submitted += 1;
        if origin == Origin::User {
            self.user_pending += 1;
            self.state = ReactorState::Active;
        }
        trace!(%token, op = %kind, fd, ?origin, "submitted");
        Ok(token)
    }

    fn check_target(&self, kind: OperationKind, target: Token) -> Result<()> {
        let pending = self.pending.get(target).ok_or(ReactorError::StaleToken(target))?;
        let target_kind = pending.in_flight.kind();
        let compatible = match kind {
            OperationKind::PollRemove => target_kind == OperationKind::PollAdd,
            OperationKind::TimeoutRemove | OperationKind::TimeoutUpdate => {
                target_kind == OperationKind::Timeout
            }
            _ => true,
        };
        if compatible {
            Ok(())
        } else {
            Err(ReactorError::InvalidOperation(format!(
                "{} cannot target a pending {}",
                kind, target_kind
            )))
        }
    }

    /// Publish every built slot to the kernel without waiting.
    ///
    /// Returns the number of entries the kernel accepted.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Submit`] when `io_uring_enter` fails. Interrupted calls
    /// are retried; when the kernel is busy because the completion ring is
    /// full, completions are drained and dispatched first.
    pub fn flush(&mut self) -> Result<u32> {
        self.enter(0)
    }

    fn enter(&mut self, wait_nr: u32) -> Result<u32> {
        loop {
            match self.backend.submit(wait_nr) {
                Ok(submitted) => {
                    self.stats.flushed += u64::from(submitted);
                    if submitted > 0 {
                        debug!(submitted, wait_nr, "flushed submissions");
                    }
                    return Ok(submitted);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.raw_os_error(), Some(libc::EAGAIN | libc::EBUSY)) => {
                    let reaped = self.reap();
                    if reaped.processed == 0 {
                        return Err(ReactorError::Submit(e));
                    }
                    debug!(drained = reaped.processed, "kernel busy, drained completions");
                }
                Err(e) => return Err(ReactorError::Submit(e)),
            }
        }
    }

    /// Drain up to one batch of ready completions and route them.
    fn reap(&mut self) -> Reaped {
        let mut cqes = mem::take(&mut self.cqes);
        cqes.clear();
        let mut reaped = Reaped::default();
        self.backend.drain(self.config.ring.completion_batch, &mut cqes);
        for cqe in cqes.drain(..) {
            reaped.processed += 1;
            if self.complete(cqe) {
                reaped.dispatched += 1;
            }
        }
        self.cqes = cqes;
        reaped
    }

    /// Drain batches until a pass finds nothing, including completions the
    /// backend pulls in from the kernel's overflow list.
    fn reap_all(&mut self) -> usize {
        let mut dispatched = 0;
        loop {
            let reaped = self.reap();
            dispatched += reaped.dispatched;
            if reaped.processed == 0 {
                return dispatched;
            }
        }
    }

    /// User completions dispatched since `start` was read from the stats.
    fn dispatched_since(&self, start: u64) -> usize {
        (self.stats.dispatched - start) as usize
    }

    /// A blocking wait may stop: enough progress, a wake-up, or no user
    /// request left that could complete.
    fn wait_satisfied(&self, start: u64, min: usize) -> bool {
        self.dispatched_since(start) >= min || self.woken || self.user_pending == 0
    }

    /// Route one completion. Returns true if it was dispatched.
    fn complete(&mut self, cqe: Cqe) -> bool {
        let token = Token::from_user_data(cqe.user_data());
        let Some(pending) = self.pending.remove(token) else {
            self.stats.stale += 1;
            warn!(user_data = cqe.user_data(), res = cqe.res(), "completion for unknown token");
            return false;
        };
        self.stats.completed += 1;
        trace!(%token, op = %pending.in_flight.kind(), res = cqe.res(), origin = ?pending.origin, "completed");

        match pending.origin {
            Origin::User => {
                self.user_pending -= 1;
                if self.user_pending == 0 && self.state == ReactorState::Active {
                    self.state = ReactorState::Idle;
                }
                if let (Some(metrics), Some(at)) = (self.metrics.as_mut(), pending.submitted_at) {
                    metrics.record(pending.in_flight.kind(), at.elapsed());
                }
                let peer = pending.in_flight.peer_addr();
                self.dispatcher.dispatch(Completion {
                    token,
                    tag: pending.tag,
                    result: cqe.res(),
                    flags: cqe.flags(),
                    op: pending.in_flight.into_op(),
                    peer,
                    fd_taken: false,
                });
                self.stats.dispatched += 1;
                true
            }
            Origin::Wake => {
                self.wake_armed = false;
                if cqe.res() >= 0 {
                    self.stats.wakeups += 1;
                    self.woken = true;
                    if let Some(wake) = &self.wake {
                        wake.reset();
                    }
                }
                self.arm_wake();
                false
            }
            Origin::Timer | Origin::Cancel => false,
        }
    }

    /// Keep the readiness poll on the wake eventfd armed, if there is one.
    fn arm_wake(&mut self) {
        if self.wake_armed || self.cancelling || self.state == ReactorState::Shutdown {
            return;
        }
        let Some(fd) = self.wake.as_ref().map(WakeChannel::raw_fd) else {
            return;
        };
        match self.submit_as(Op::poll_add(fd, libc::POLLIN as u32), 0, Origin::Wake) {
            Ok(_) => self.wake_armed = true,
            // Retried at the start of the next poll.
            Err(e) => debug!(error = %e, "could not re-arm wake poll"),
        }
    }

    /// Wait for completions and dispatch them.
    ///
    /// Flushes first, then drains whatever is ready. With `min_complete == 0`
    /// (or a zero timeout) that is all: the call never blocks. Otherwise it
    /// blocks until at least `min_complete` user completions have been
    /// dispatched, `timeout` elapses, or a [`WakeHandle`] fires.
    /// `min_complete` is clamped to the number of outstanding user requests.
    ///
    /// Returns the number of completions dispatched.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Submit`] when entering the kernel fails and
    /// [`ReactorError::ShutDown`] after shutdown.
    pub fn poll(&mut self, min_complete: usize, timeout: Option<Duration>) -> Result<usize> {
        if self.state == ReactorState::Shutdown {
            return Err(ReactorError::ShutDown);
        }
        let min = min_complete.min(self.user_pending);
        // Completions dispatched anywhere below, including by a drain inside
        // a busy enter, count toward `min`.
        let start = self.stats.dispatched;
        self.woken = false;
        self.arm_wake();

        self.enter(0)?;
        self.reap_all();
        if min == 0 || self.wait_satisfied(start, min) {
            return Ok(self.dispatched_since(start));
        }

        match timeout {
            Some(t) if t.is_zero() => {}
            Some(t) => self.wait_until(min, start, Instant::now() + t)?,
            None => {
                while !self.wait_satisfied(start, min) {
                    self.enter(1)?;
                    self.reap_all();
                }
            }
        }
        Ok(self.dispatched_since(start))
    }

    /// Blocking wait bounded by an internal timeout entry.
    fn wait_until(&mut self, min: usize, start: u64, deadline: Instant) -> Result<()> {
        let mut timer: Option<Token> = None;
        loop {
            if self.wait_satisfied(start, min) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let armed = timer.is_some_and(|t| self.pending.contains(t));
            if !armed {
                let remaining = (min - self.dispatched_since(start)) as u32;
                let op = Op::timeout(deadline - now, remaining, 0);
                timer = Some(match self.submit_as(op, 0, Origin::Timer) {
                    Ok(token) => token,
                    Err(ReactorError::Full) => {
                        self.enter(0)?;
                        self.submit_as(Op::timeout(deadline - now, remaining, 0), 0, Origin::Timer)?
                    }
                    Err(e) => return Err(e),
                });
            }
            self.enter(1)?;
            self.reap_all();
        }

        // The timer is still armed when we stopped for another reason.
        if let Some(timer) = timer.filter(|t| self.pending.contains(*t)) {
            if let Err(e) = self.submit_as(Op::timeout_remove(timer, 0), 0, Origin::Cancel) {
                debug!(error = %e, "timer left to expire on its own");
            }
        }
        Ok(())
    }

    /// Cancel every pending request and wait until all of them, and all of
    /// the cancellations, have completed.
    ///
    /// Cancelled user requests are dispatched (usually with `ECANCELED`).
    /// Requests that are themselves cancellations or removals are not
    /// cancelled; they are waited for.
    ///
    /// # Errors
    ///
    /// [`ReactorError::Submit`] when entering the kernel fails.
    pub fn cancel_all(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.cancelling = true;
        let result = self.cancel_pending();
        self.cancelling = false;
        result
    }

    fn cancel_pending(&mut self) -> Result<()> {
        self.enter(0)?;
        self.reap_all();

        let targets: Vec<Token> = self
            .pending
            .iter()
            .filter(|(_, p)| p.origin != Origin::Cancel && !p.in_flight.kind().targets_operation())
            .map(|(token, _)| token)
            .collect();
        debug!(count = targets.len(), "cancelling pending requests");

        for target in targets {
            loop {
                if !self.pending.contains(target) {
                    break;
                }
                match self.submit_as(Op::cancel(target, 0), 0, Origin::Cancel) {
                    Ok(_) => {
                        self.stats.cancels += 1;
                        break;
                    }
                    Err(ReactorError::Full) => {
                        self.enter(0)?;
                        self.reap_all();
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        while !self.pending.is_empty() {
            self.enter(1)?;
            self.reap_all();
        }
        self.wake_armed = false;
        Ok(())
    }

    /// Cancel everything, wait for it, and refuse further work.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// See [`cancel_all`](Self::cancel_all). The reactor stays usable if
    /// cancellation fails.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == ReactorState::Shutdown {
            return Ok(());
        }
        self.cancel_all()?;
        self.state = ReactorState::Shutdown;
        debug!(stats = ?self.stats, "reactor shut down");
        if let Some(metrics) = &self.metrics {
            debug!(report = %metrics.report(), "operation metrics");
        }
        Ok(())
    }

    /// Handle for waking a blocked [`poll`](Self::poll) from another thread.
    ///
    /// Creates the eventfd and arms its poll on first use.
    ///
    /// # Errors
    ///
    /// The OS error from `eventfd(2)`, or [`ReactorError::ShutDown`].
    pub fn wake_handle(&mut self) -> Result<WakeHandle> {
        if self.state == ReactorState::Shutdown {
            return Err(ReactorError::ShutDown);
        }
        let handle = match &self.wake {
            Some(wake) => wake.handle(),
            None => {
                let wake = WakeChannel::new()?;
                let handle = wake.handle();
                self.wake = Some(wake);
                handle
            }
        };
        self.arm_wake();
        Ok(handle)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReactorState {
        self.state
    }

    /// Outstanding user requests.
    pub fn pending(&self) -> usize {
        self.user_pending
    }

    /// Counters since construction.
    pub fn stats(&self) -> ReactorStats {
        self.stats
    }

    /// Per-kind latency metrics, when enabled in the configuration.
    pub fn metrics(&self) -> Option<&OperationMetrics> {
        self.metrics.as_ref()
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Which backend implementation is active.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Configuration the reactor was built with.
    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Mutable access to the dispatcher.
    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }
}

impl<D: Dispatcher> Drop for Reactor<D> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Err(e) = self.cancel_all() {
            // The kernel may still write into these buffers.
            error!(
                error = %e,
                pending = self.pending.len(),
                "dropping reactor with requests in flight, leaking their memory"
            );
            mem::forget(mem::take(&mut self.pending));
        }
    }
}
