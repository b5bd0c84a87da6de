//! Admission control and execution of input commands.
//!
//! Every request (HTTP or realtime channel) reaches the driver through the
//! [`Dispatcher`].  A request goes through three stages:
//!
//! ```text
//!  Job ──plan──▶ Plan ──admit──▶ permit ──execute (spawned)──▶ Completion
//!       │               │
//!       │ invalid       │ Busy / BatchTooLarge / ShuttingDown
//!       ▼               ▼
//!   record_invalid   record_rejected
//! ```
//!
//! 1. **Plan** validates the whole job before anything runs: every key of a
//!    batch must be supported, text must expand to at least one key, pointer
//!    jobs need a pointer-capable driver.  A batch with one bad key is
//!    rejected as a whole and never touches the device.
//! 2. **Admit** takes permits from a semaphore sized by the
//!    [`AdmissionPolicy`].  Exclusive drivers get one permit and a short
//!    acquire timeout; shared drivers get `max_in_flight` permits, and a batch
//!    takes all of its permits at once or none.
//! 3. **Execute** runs on a spawned task that owns the permits.  Callers get a
//!    [`Ticket`] and may return immediately ("queued") or wait for completion
//!    with a timeout.  Timing out a wait does not cancel the action.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pikey_core::{
    KeyTable, PointerAction, PointerCommand, PressCommand, TextCommand, DEFAULT_HOLD,
};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::domain::{BatchOrder, DispatchConfig};

use super::driver::{ConcurrencyClass, DriverError, DriverKind, InputDriver};
use super::telemetry::{PhaseLatency, Telemetry};

/// Errors returned to callers of the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("device busy, retry later")]
    Busy,

    #[error("batch of {requested} actions exceeds capacity of {capacity}")]
    BatchTooLarge { requested: usize, capacity: usize },

    #[error("device error: {0}")]
    Device(String),

    #[error("capability not available: {0}")]
    CapabilityUnavailable(&'static str),

    #[error("no completion within {0:?}; the action may still finish")]
    Timeout(Duration),

    #[error("service is shutting down")]
    ShuttingDown,
}

impl DispatchError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnsupportedKey(_) | Self::Invalid(_) => 400,
            Self::Busy | Self::BatchTooLarge { .. } => 429,
            Self::Device(_) => 500,
            Self::CapabilityUnavailable(_) => 501,
            Self::ShuttingDown => 503,
            Self::Timeout(_) => 504,
        }
    }

    /// `true` for admission-control refusals.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Busy | Self::BatchTooLarge { .. })
    }
}

impl From<DriverError> for DispatchError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::UnsupportedKey(key) => Self::UnsupportedKey(key),
            DriverError::CapabilityUnavailable(what) => Self::CapabilityUnavailable(what),
            DriverError::Device(msg) => Self::Device(msg),
            io @ DriverError::Io { .. } => Self::Device(io.to_string()),
        }
    }
}

/// How concurrent requests are admitted to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// At most one action in flight.  A request that cannot get the device
    /// within `acquire_timeout` is refused with [`DispatchError::Busy`].
    Serialized { acquire_timeout: Duration },
    /// Up to `max_in_flight` actions at once, admitted without waiting.
    Concurrent { max_in_flight: usize },
}

impl AdmissionPolicy {
    /// Exclusive drivers are serialized; shared drivers run concurrently.
    pub fn for_driver(class: ConcurrencyClass, config: &DispatchConfig) -> Self {
        match class {
            ConcurrencyClass::Exclusive => Self::Serialized {
                acquire_timeout: config.acquire_timeout,
            },
            ConcurrencyClass::Shared => Self::Concurrent {
                max_in_flight: config.max_in_flight.max(1),
            },
        }
    }

    /// Number of permits backing this policy.
    pub fn capacity(&self) -> usize {
        match self {
            Self::Serialized { .. } => 1,
            Self::Concurrent { max_in_flight } => *max_in_flight,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Serialized { .. } => "serialized",
            Self::Concurrent { .. } => "concurrent",
        }
    }
}

/// A unit of work submitted to the dispatcher.
#[derive(Debug, Clone)]
pub enum Job {
    Press(PressCommand),
    /// All-or-nothing sequence of presses.
    Batch(Vec<PressCommand>),
    Type(TextCommand),
    Pointer(PointerCommand),
}

/// A validated job.
#[derive(Debug)]
enum Plan {
    Keys {
        presses: Vec<PressCommand>,
        gap: Duration,
    },
    Text(TextCommand),
    Pointer(PointerCommand),
}

impl Plan {
    fn len(&self) -> usize {
        match self {
            Self::Keys { presses, .. } => presses.len(),
            Self::Text(_) | Self::Pointer(_) => 1,
        }
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Driver actions performed.
    pub actions: usize,
    /// Time from the start of execution to the end of the last action.
    pub elapsed: Duration,
}

/// Handle to an admitted job.  Dropping it detaches the job; it still runs
/// to completion.
#[derive(Debug)]
pub struct Ticket {
    actions: usize,
    handle: JoinHandle<Result<Completion, DispatchError>>,
}

impl Ticket {
    /// Actions admitted for this job.
    pub fn actions(&self) -> usize {
        self.actions
    }

    /// Waits up to `limit` for the job to finish.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Timeout`] if the job is still running after `limit`
    /// (it keeps running), otherwise the job's own error.
    pub async fn wait(self, limit: Duration) -> Result<Completion, DispatchError> {
        match tokio::time::timeout(limit, self.handle).await {
            Err(_) => Err(DispatchError::Timeout(limit)),
            Ok(Err(join_err)) => Err(DispatchError::Device(format!(
                "dispatch task ended abnormally: {join_err}"
            ))),
            Ok(Ok(result)) => result,
        }
    }
}

/// Shared entry point to the input driver.  Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    driver: Arc<dyn InputDriver>,
    keys: Arc<KeyTable>,
    telemetry: Arc<Telemetry>,
    permits: Arc<Semaphore>,
    policy: AdmissionPolicy,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        driver: Arc<dyn InputDriver>,
        keys: Arc<KeyTable>,
        telemetry: Arc<Telemetry>,
        config: DispatchConfig,
    ) -> Self {
        let policy = AdmissionPolicy::for_driver(driver.capabilities().concurrency, &config);
        info!(
            "dispatcher ready: driver={}, policy={}, capacity={}, batch_order={}",
            driver.kind().as_str(),
            policy.name(),
            policy.capacity(),
            config.batch_order
        );
        Self {
            permits: Arc::new(Semaphore::new(policy.capacity())),
            driver,
            keys,
            telemetry,
            policy,
            config,
        }
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn driver_kind(&self) -> DriverKind {
        self.driver.kind()
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Counts a request that failed validation at the boundary (for example
    /// an unparseable body) and returns the matching error.
    pub fn reject_invalid(&self, reason: impl Into<String>) -> DispatchError {
        self.telemetry.record_invalid();
        DispatchError::Invalid(reason.into())
    }

    /// Validates and admits `job`, then starts it in the background.
    ///
    /// # Errors
    ///
    /// Validation errors ([`DispatchError::UnsupportedKey`],
    /// [`DispatchError::Invalid`], [`DispatchError::CapabilityUnavailable`])
    /// and admission refusals ([`DispatchError::Busy`],
    /// [`DispatchError::BatchTooLarge`]).  Nothing has run when an error is
    /// returned.
    pub async fn submit(&self, job: Job) -> Result<Ticket, DispatchError> {
        let plan = self.plan(job).map_err(|e| {
            debug!("rejected invalid job: {e}");
            self.telemetry.record_invalid();
            e
        })?;
        let actions = plan.len();
        let permit = self.admit(actions).await.map_err(|e| {
            warn!("admission refused for {actions} action(s): {e}");
            self.telemetry.record_rejected();
            e
        })?;

        let this = self.clone();
        let handle = tokio::spawn(async move {
            let result = this.execute(plan).await;
            drop(permit);
            result
        });
        Ok(Ticket { actions, handle })
    }

    /// Submits `job` and waits for it, up to the configured sync timeout.
    pub async fn run(&self, job: Job) -> Result<Completion, DispatchError> {
        self.submit(job).await?.wait(self.config.sync_timeout).await
    }

    /// Stops admitting new work, waits up to the sync timeout for admitted
    /// work to finish, then releases the driver.
    ///
    /// Callers submitting after this starts get [`DispatchError::Busy`]
    /// while the drain is in progress and [`DispatchError::ShuttingDown`]
    /// once it is over.
    pub async fn close(&self) -> Result<(), DispatchError> {
        let capacity = u32::try_from(self.policy.capacity()).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(
            self.config.sync_timeout,
            self.permits.acquire_many(capacity),
        )
        .await;
        match &drained {
            Ok(Ok(_)) => debug!("dispatcher drained, closing driver"),
            Ok(Err(_)) => debug!("dispatcher already closed"),
            Err(_) => warn!(
                "work still running after {:?}; closing driver anyway",
                self.config.sync_timeout
            ),
        }
        self.permits.close();
        // Held permits keep late submitters out until the driver is closed.
        let result = self.driver.close().await.map_err(DispatchError::from);
        drop(drained);
        result
    }

    // ── Planning ──────────────────────────────────────────────────────────────

    fn plan(&self, job: Job) -> Result<Plan, DispatchError> {
        match job {
            Job::Press(cmd) => {
                self.check_key(cmd.key())?;
                Ok(Plan::Keys {
                    presses: vec![cmd],
                    gap: Duration::ZERO,
                })
            }
            Job::Batch(presses) => {
                if presses.is_empty() {
                    return Err(DispatchError::Invalid("no actions given".into()));
                }
                for cmd in &presses {
                    self.check_key(cmd.key())?;
                }
                Ok(Plan::Keys {
                    presses,
                    gap: Duration::ZERO,
                })
            }
            Job::Type(cmd) => {
                if cmd.text().is_empty() {
                    return Err(DispatchError::Invalid("text is empty".into()));
                }
                if self.driver.capabilities().native_text {
                    return Ok(Plan::Text(cmd));
                }
                let presses: Vec<PressCommand> = self
                    .keys
                    .expand_text(cmd.text())
                    .into_iter()
                    .filter(|key| self.driver.is_key_supported(key))
                    .map(|key| {
                        PressCommand::new(key, DEFAULT_HOLD, cmd.origin())
                            .with_submitted_at(cmd.submitted_at())
                    })
                    .collect();
                if presses.is_empty() {
                    return Err(DispatchError::Invalid(
                        "text contains no typeable characters".into(),
                    ));
                }
                Ok(Plan::Keys {
                    presses,
                    gap: self.config.type_char_delay,
                })
            }
            Job::Pointer(cmd) => {
                if !self.driver.capabilities().pointer {
                    return Err(DispatchError::CapabilityUnavailable("pointer"));
                }
                Ok(Plan::Pointer(cmd))
            }
        }
    }

    fn check_key(&self, key: &str) -> Result<(), DispatchError> {
        if self.driver.is_key_supported(key) {
            Ok(())
        } else {
            Err(DispatchError::UnsupportedKey(key.to_string()))
        }
    }

    // ── Admission ─────────────────────────────────────────────────────────────

    async fn admit(&self, actions: usize) -> Result<OwnedSemaphorePermit, DispatchError> {
        if actions > self.config.max_batch {
            return Err(DispatchError::BatchTooLarge {
                requested: actions,
                capacity: self.config.max_batch,
            });
        }
        match self.policy {
            AdmissionPolicy::Serialized { acquire_timeout } => {
                // One permit covers the whole batch; it runs back to back.
                match tokio::time::timeout(acquire_timeout, self.permits.clone().acquire_owned())
                    .await
                {
                    Ok(Ok(permit)) => Ok(permit),
                    Ok(Err(_)) => Err(DispatchError::ShuttingDown),
                    Err(_) => Err(DispatchError::Busy),
                }
            }
            AdmissionPolicy::Concurrent { max_in_flight } => {
                if actions > max_in_flight {
                    return Err(DispatchError::BatchTooLarge {
                        requested: actions,
                        capacity: max_in_flight,
                    });
                }
                let wanted = u32::try_from(actions).map_err(|_| DispatchError::BatchTooLarge {
                    requested: actions,
                    capacity: max_in_flight,
                })?;
                self.permits
                    .clone()
                    .try_acquire_many_owned(wanted)
                    .map_err(|e| match e {
                        TryAcquireError::Closed => DispatchError::ShuttingDown,
                        TryAcquireError::NoPermits => DispatchError::Busy,
                    })
            }
        }
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    async fn execute(&self, plan: Plan) -> Result<Completion, DispatchError> {
        let started = Instant::now();
        let actions = plan.len();
        match plan {
            Plan::Keys { presses, gap } => {
                let unordered = matches!(self.policy, AdmissionPolicy::Concurrent { .. })
                    && self.config.batch_order == BatchOrder::Unordered;
                if unordered && presses.len() > 1 {
                    self.press_unordered(presses).await?;
                } else {
                    self.press_in_order(&presses, gap).await?;
                }
            }
            Plan::Text(cmd) => {
                self.timed(cmd.submitted_at(), "type", self.driver.type_text(cmd.text()))
                    .await?;
            }
            Plan::Pointer(cmd) => {
                let action = cmd.action();
                self.timed(cmd.submitted_at(), action.name(), self.pointer(action))
                    .await?;
            }
        }
        Ok(Completion {
            actions,
            elapsed: started.elapsed(),
        })
    }

    /// Presses in submission order.  Stops at the first failure; later
    /// presses are not attempted.
    async fn press_in_order(&self, presses: &[PressCommand], gap: Duration) -> Result<(), DispatchError> {
        for (i, cmd) in presses.iter().enumerate() {
            if i > 0 && !gap.is_zero() {
                tokio::time::sleep(gap).await;
            }
            self.timed(
                cmd.submitted_at(),
                cmd.key(),
                self.driver.press(cmd.key(), cmd.hold()),
            )
            .await?;
        }
        Ok(())
    }

    /// Presses all at once.  Every press runs; the first error is returned.
    async fn press_unordered(&self, presses: Vec<PressCommand>) -> Result<(), DispatchError> {
        let mut set = JoinSet::new();
        for cmd in presses {
            let this = self.clone();
            set.spawn(async move {
                this.timed(
                    cmd.submitted_at(),
                    cmd.key(),
                    this.driver.press(cmd.key(), cmd.hold()),
                )
                .await
                .map(|_| ())
            });
        }
        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let outcome = joined
                .map_err(|e| DispatchError::Device(format!("press task ended abnormally: {e}")))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn pointer(&self, action: PointerAction) -> Result<(), DriverError> {
        match action {
            PointerAction::Move { dx, dy } => self.driver.move_pointer(dx, dy).await,
            PointerAction::Click { button, kind } => self.driver.click(button, kind).await,
            PointerAction::Scroll { dx, dy } => self.driver.scroll(dx, dy).await,
        }
    }

    /// Runs one driver action and records its outcome and phase latency.
    async fn timed<F>(&self, submitted: Instant, label: &str, action: F) -> Result<PhaseLatency, DispatchError>
    where
        F: Future<Output = Result<(), DriverError>>,
    {
        let _processing = self.telemetry.begin_processing();
        let started = Instant::now();
        let result = action.await;
        let driver_done = Instant::now();
        let phases = PhaseLatency::from_instants(submitted, started, driver_done, Instant::now());
        self.telemetry.record_outcome(result.is_ok(), phases);
        match &result {
            Ok(()) => debug!(
                "{label}: done in {:?} (queue {:?}, process {:?})",
                phases.total, phases.queue, phases.process
            ),
            Err(e) => warn!("{label}: failed after {:?}: {e}", phases.total),
        }
        result.map(|()| phases).map_err(DispatchError::from)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
