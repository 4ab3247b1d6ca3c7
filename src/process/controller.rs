//! Supervisor controller - one actor task per managed app
//!
//! The actor owns the app's lifecycle state and is the only place it is
//! mutated. Commands from handles, child exits, terminate results, restart
//! timers, cron matches and file changes all arrive on a single queue and are
//! handled one at a time.

use crate::config::{AppDefinition, SupervisorSettings};
use crate::error::{Result, VigilError};
use crate::process::monitor::MemorySampler;
use crate::process::restart::{RestartCause, RestartDecision, RestartPolicy, LAUNCH_FAILURE_EXIT_CODE};
use crate::process::spawner::{self, ProcessHandle};
use crate::process::types::{AppSpec, AppStatus, LifecycleState, StateChange};
use crate::schedule::{self, ScheduleTrigger};
use crate::watch;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Capacity of a controller's message queue
const QUEUE_CAPACITY: usize = 64;

/// Capacity of the state change broadcast
const STATE_CHANGE_CAPACITY: usize = 64;

type Responder<T> = oneshot::Sender<T>;

/// Everything a controller reacts to
pub(crate) enum ControllerMessage {
    // Commands
    Start(Responder<Result<()>>),
    Stop(Responder<Result<()>>),
    Restart(Responder<Result<()>>),
    Reset(Responder<Result<()>>),
    Status(Responder<AppStatus>),
    Shutdown(Responder<()>),

    // Events
    /// The child of launch `generation` exited
    Exited { generation: u64, exit_code: i32 },
    /// A terminate issued for launch `generation` finished
    Terminated { generation: u64, result: Result<i32> },
    /// The restart delay armed as `generation` ran out
    RestartDelayElapsed { generation: u64 },
    /// Schedule, file-change or operator restart request
    ForcedRestart(RestartCause),
}

/// What to do once the current child has been torn down
#[derive(Debug, Clone, PartialEq)]
enum AfterStop {
    Stay,
    Start(RestartCause),
    Permanent,
}

/// Cloneable handle used to talk to a controller
#[derive(Clone)]
pub struct ControllerHandle {
    name: String,
    tx: mpsc::Sender<ControllerMessage>,
    changes: broadcast::Sender<StateChange>,
}

impl ControllerHandle {
    /// Launch the app; only valid while stopped
    pub async fn start(&self) -> Result<()> {
        self.request(ControllerMessage::Start).await?
    }

    /// Stop the app and wait for the child to be gone
    pub async fn stop(&self) -> Result<()> {
        self.request(ControllerMessage::Stop).await?
    }

    /// Restart the app now, clearing its restart count
    pub async fn restart(&self) -> Result<()> {
        self.request(ControllerMessage::Restart).await?
    }

    /// Leave the permanently stopped state
    pub async fn reset(&self) -> Result<()> {
        self.request(ControllerMessage::Reset).await?
    }

    pub async fn status(&self) -> Result<AppStatus> {
        self.request(ControllerMessage::Status).await
    }

    /// Receive every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Terminate the child, release watcher and scheduler, end the actor
    pub async fn shutdown(&self) {
        if self.request(ControllerMessage::Shutdown).await.is_err() {
            debug!("Controller for '{}' already stopped", self.name);
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Responder<T>) -> ControllerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(make(tx)).await.map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    fn gone(&self) -> VigilError {
        VigilError::Internal(format!("controller for '{}' is no longer running", self.name))
    }
}

/// Spawn the controller for one app together with its trigger and watcher
pub fn spawn_controller(definition: AppDefinition, settings: &SupervisorSettings) -> ControllerHandle {
    let AppDefinition { spec, policy } = definition;
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let (changes, _) = broadcast::channel(STATE_CHANGE_CAPACITY);
    let cancel = CancellationToken::new();
    let mut last_error = None;

    if let Some(ref cron) = policy.cron_restart {
        schedule::spawn_trigger(
            spec.name.clone(),
            ScheduleTrigger::new(cron.clone()),
            settings.schedule_tick,
            tx.clone(),
            cancel.child_token(),
        );
    }

    if let Some(ref options) = spec.watch {
        if let Err(e) = watch::spawn_watcher(&spec, options, tx.clone(), cancel.child_token()) {
            error!("{}; restart on change disabled for '{}'", e, spec.name);
            last_error = Some(e.to_string());
        }
    }

    let handle = ControllerHandle {
        name: spec.name.clone(),
        tx: tx.clone(),
        changes: changes.clone(),
    };

    let controller = Controller {
        spec,
        policy,
        memory_check_interval: settings.memory_check_interval,
        state: LifecycleState::Stopped,
        restart_count: 0,
        child: None,
        generation: 0,
        last_exit_code: None,
        last_error,
        memory_bytes: None,
        sampler: MemorySampler::new(),
        after_stop: AfterStop::Stay,
        stop_waiters: Vec::new(),
        shutdown_waiter: None,
        delay_timer: None,
        events: tx,
        changes,
        cancel,
    };

    tokio::spawn(controller.run(rx));
    handle
}

/// The actor itself
struct Controller {
    spec: AppSpec,
    policy: RestartPolicy,
    memory_check_interval: Duration,
    state: LifecycleState,
    restart_count: u32,
    /// Live child, present in Running and Stopping only
    child: Option<ProcessHandle>,
    /// Bumped on every launch and every armed delay; stale events are dropped
    generation: u64,
    last_exit_code: Option<i32>,
    last_error: Option<String>,
    memory_bytes: Option<u64>,
    sampler: MemorySampler,
    after_stop: AfterStop,
    stop_waiters: Vec<Responder<Result<()>>>,
    shutdown_waiter: Option<Responder<()>>,
    delay_timer: Option<JoinHandle<()>>,
    /// Sender handed to the exit waiter, terminate worker and delay timer
    events: mpsc::Sender<ControllerMessage>,
    changes: broadcast::Sender<StateChange>,
    /// Parent of the trigger and watcher tokens
    cancel: CancellationToken,
}

impl Controller {
    async fn run(mut self, mut rx: mpsc::Receiver<ControllerMessage>) {
        let mut memory_tick = tokio::time::interval(self.memory_check_interval);
        memory_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                maybe_msg = rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    self.handle_message(msg).await;
                    if self.is_finished() {
                        break;
                    }
                }

                _ = memory_tick.tick() => self.check_memory(),
            }
        }

        info!("Controller for '{}' terminated", self.spec.name);
    }

    fn is_finished(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn handle_message(&mut self, msg: ControllerMessage) {
        if self.shutdown_waiter.is_some() {
            self.handle_while_shutting_down(msg);
            return;
        }

        match msg {
            ControllerMessage::Start(resp) => {
                let result = self.handle_start().await;
                let _ = resp.send(result);
            }
            ControllerMessage::Stop(resp) => self.handle_stop(resp),
            ControllerMessage::Restart(resp) => self.handle_restart(resp).await,
            ControllerMessage::Reset(resp) => {
                let _ = resp.send(self.handle_reset());
            }
            ControllerMessage::Status(resp) => {
                let _ = resp.send(self.status());
            }
            ControllerMessage::Shutdown(resp) => self.handle_shutdown(resp),
            ControllerMessage::Exited {
                generation,
                exit_code,
            } => self.handle_exited(generation, exit_code),
            ControllerMessage::Terminated { generation, result } => {
                self.handle_terminated(generation, result).await
            }
            ControllerMessage::RestartDelayElapsed { generation } => {
                self.handle_delay_elapsed(generation).await
            }
            ControllerMessage::ForcedRestart(cause) => self.handle_forced_restart(cause).await,
        }
    }

    /// During shutdown only status is served and the terminate result awaited
    fn handle_while_shutting_down(&mut self, msg: ControllerMessage) {
        match msg {
            ControllerMessage::Start(resp)
            | ControllerMessage::Stop(resp)
            | ControllerMessage::Restart(resp)
            | ControllerMessage::Reset(resp) => {
                let _ = resp.send(Err(self.invalid("accept commands")));
            }
            ControllerMessage::Status(resp) => {
                let _ = resp.send(self.status());
            }
            ControllerMessage::Shutdown(resp) => {
                let _ = resp.send(());
            }
            ControllerMessage::Terminated { generation, result } => {
                if generation == self.generation && self.state == LifecycleState::Stopping {
                    self.record_termination(result);
                    self.transition(LifecycleState::Stopped);
                    self.resolve_stop_waiters();
                    self.finish_shutdown();
                }
            }
            _ => {}
        }
    }

    async fn handle_start(&mut self) -> Result<()> {
        if self.state != LifecycleState::Stopped {
            return Err(self.invalid("start"));
        }

        self.transition(LifecycleState::Starting);
        self.launch().await
    }

    fn handle_stop(&mut self, resp: Responder<Result<()>>) {
        match self.state {
            LifecycleState::Running => {
                self.after_stop = AfterStop::Stay;
                self.stop_waiters.push(resp);
                self.begin_stop();
            }
            LifecycleState::Stopping => {
                // A manual stop overrides any restart queued behind the teardown
                self.after_stop = AfterStop::Stay;
                self.stop_waiters.push(resp);
            }
            LifecycleState::RestartPending => {
                self.cancel_delay();
                self.transition(LifecycleState::Stopped);
                let _ = resp.send(Ok(()));
            }
            _ => {
                let _ = resp.send(Err(self.invalid("stop")));
            }
        }
    }

    async fn handle_restart(&mut self, resp: Responder<Result<()>>) {
        match self.state {
            LifecycleState::PermanentlyStopped | LifecycleState::Starting => {
                let _ = resp.send(Err(self.invalid("restart")));
            }
            LifecycleState::Running => {
                self.restart_count = 0;
                self.after_stop = AfterStop::Start(RestartCause::Manual);
                self.stop_waiters.push(resp);
                self.begin_stop();
            }
            LifecycleState::Stopping => {
                self.restart_count = 0;
                self.after_stop = AfterStop::Start(RestartCause::Manual);
                self.stop_waiters.push(resp);
            }
            LifecycleState::RestartPending | LifecycleState::Stopped => {
                self.cancel_delay();
                self.restart_count = 0;
                info!("Restarting '{}' ({})", self.spec.name, RestartCause::Manual);
                self.transition(LifecycleState::Starting);
                let _ = resp.send(self.launch().await);
            }
        }
    }

    fn handle_reset(&mut self) -> Result<()> {
        if self.state != LifecycleState::PermanentlyStopped {
            return Err(self.invalid("reset"));
        }

        self.restart_count = 0;
        self.last_error = None;
        self.transition(LifecycleState::Stopped);
        Ok(())
    }

    fn handle_shutdown(&mut self, resp: Responder<()>) {
        self.shutdown_waiter = Some(resp);
        self.cancel_delay();

        match self.state {
            LifecycleState::Running => {
                self.after_stop = AfterStop::Stay;
                self.begin_stop();
            }
            LifecycleState::Stopping => {
                self.after_stop = AfterStop::Stay;
            }
            LifecycleState::RestartPending => {
                self.transition(LifecycleState::Stopped);
                self.finish_shutdown();
            }
            _ => self.finish_shutdown(),
        }
    }

    /// Child gone: release trigger and watcher, then answer the shutdown
    fn finish_shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(resp) = self.shutdown_waiter.take() {
            let _ = resp.send(());
        }
    }

    fn handle_exited(&mut self, generation: u64, exit_code: i32) {
        // Exits of children being stopped are reported through Terminated
        if generation != self.generation || self.state != LifecycleState::Running {
            return;
        }

        self.child = None;
        self.memory_bytes = None;
        warn!("'{}' exited with code {}", self.spec.name, exit_code);

        self.apply_exit_decision(RestartCause::Crash { exit_code });
    }

    async fn handle_terminated(&mut self, generation: u64, result: Result<i32>) {
        if generation != self.generation || self.state != LifecycleState::Stopping {
            return;
        }

        self.record_termination(result);

        match std::mem::replace(&mut self.after_stop, AfterStop::Stay) {
            AfterStop::Stay => {
                self.transition(LifecycleState::Stopped);
                self.resolve_stop_waiters();
            }
            AfterStop::Permanent => {
                self.transition(LifecycleState::PermanentlyStopped);
                self.resolve_stop_waiters();
            }
            AfterStop::Start(cause) => {
                info!("Restarting '{}' ({})", self.spec.name, cause);
                self.transition(LifecycleState::Starting);
                let result = self.launch().await;
                let outcome = result.as_ref().map(|_| ()).map_err(|e| e.to_string());
                for waiter in self.stop_waiters.drain(..) {
                    let _ = waiter.send(
                        outcome
                            .clone()
                            .map_err(VigilError::LaunchError),
                    );
                }
            }
        }
    }

    async fn handle_delay_elapsed(&mut self, generation: u64) {
        if generation != self.generation || self.state != LifecycleState::RestartPending {
            return;
        }

        self.delay_timer = None;
        self.transition(LifecycleState::Starting);
        // Failures are recorded and handed to the policy inside launch
        let _ = self.launch().await;
    }

    async fn handle_forced_restart(&mut self, cause: RestartCause) {
        match self.state {
            LifecycleState::Running => {
                info!("Restart of '{}' requested ({})", self.spec.name, cause);
                self.apply_forced_decision(cause);
            }
            LifecycleState::Stopping => {
                debug!(
                    "Restart of '{}' ({}) coalesced with the teardown in progress",
                    self.spec.name, cause
                );
            }
            LifecycleState::RestartPending => {
                info!("Restart of '{}' requested ({}), skipping delay", self.spec.name, cause);
                self.cancel_delay();
                self.transition(LifecycleState::Starting);
                let _ = self.launch().await;
            }
            _ => {
                debug!(
                    "Ignoring restart request ({}) for '{}' in state {}",
                    cause, self.spec.name, self.state
                );
            }
        }
    }

    /// Consult the policy for a cause that tears down a running child
    fn apply_forced_decision(&mut self, cause: RestartCause) {
        let decision = self.policy.decide(&cause, self.restart_count);

        self.after_stop = match decision {
            RestartDecision::RestartNow | RestartDecision::RestartAfterDelay(_) => {
                if decision.counts_against_budget(&cause) {
                    self.restart_count += 1;
                }
                AfterStop::Start(cause)
            }
            RestartDecision::DoNotRestart => AfterStop::Stay,
            RestartDecision::PermanentlyStopped => {
                warn!(
                    "'{}' reached max restarts ({}), stopping permanently",
                    self.spec.name, self.policy.max_restarts
                );
                AfterStop::Permanent
            }
        };

        self.begin_stop();
    }

    /// Consult the policy after the child is already gone
    fn apply_exit_decision(&mut self, cause: RestartCause) {
        if let Some(code) = cause.exit_code() {
            self.last_exit_code = Some(code);
        }
        let decision = self.policy.decide(&cause, self.restart_count);

        match decision {
            RestartDecision::RestartNow | RestartDecision::RestartAfterDelay(_) => {
                if decision.counts_against_budget(&cause) {
                    self.restart_count += 1;
                }
                let delay = match decision {
                    RestartDecision::RestartAfterDelay(delay) => delay,
                    _ => Duration::ZERO,
                };
                info!(
                    "Restarting '{}' in {:?} ({}, restart {}/{})",
                    self.spec.name, delay, cause, self.restart_count, self.policy.max_restarts
                );
                self.transition(LifecycleState::RestartPending);
                self.arm_delay(delay);
            }
            RestartDecision::DoNotRestart => {
                info!("'{}' will not be restarted ({})", self.spec.name, cause);
                self.transition(LifecycleState::Stopped);
            }
            RestartDecision::PermanentlyStopped => {
                warn!(
                    "'{}' reached max restarts ({}), stopping permanently",
                    self.spec.name, self.policy.max_restarts
                );
                self.transition(LifecycleState::PermanentlyStopped);
            }
        }
    }

    /// Launch from Starting; a failure is treated as an exit with code -1
    async fn launch(&mut self) -> Result<()> {
        match spawner::launch(&self.spec).await {
            Ok(handle) => {
                self.generation += 1;
                self.spawn_exit_waiter(handle.clone());
                self.child = Some(handle);
                self.memory_bytes = None;
                self.transition(LifecycleState::Running);
                Ok(())
            }
            Err(e) => {
                error!("Failed to launch '{}': {}", self.spec.name, e);
                self.last_error = Some(e.to_string());
                self.apply_exit_decision(RestartCause::LaunchFailure);
                Err(e)
            }
        }
    }

    fn spawn_exit_waiter(&self, mut handle: ProcessHandle) {
        let generation = self.generation;
        let events = self.events.clone();

        tokio::spawn(async move {
            let exit_code = handle.wait().await;
            let _ = events
                .send(ControllerMessage::Exited {
                    generation,
                    exit_code,
                })
                .await;
        });
    }

    /// Enter Stopping and terminate the child off the actor loop
    fn begin_stop(&mut self) {
        self.transition(LifecycleState::Stopping);

        let generation = self.generation;
        let events = self.events.clone();
        let child = self.child.clone();
        let stop_signal = self.spec.stop_signal.clone();
        let grace = self.spec.kill_timeout;

        tokio::spawn(async move {
            let result = match child {
                Some(mut child) => spawner::terminate(&mut child, &stop_signal, grace).await,
                None => Ok(LAUNCH_FAILURE_EXIT_CODE),
            };
            let _ = events
                .send(ControllerMessage::Terminated { generation, result })
                .await;
        });
    }

    fn record_termination(&mut self, result: Result<i32>) {
        let child = self.child.take();
        self.memory_bytes = None;

        match result {
            Ok(code) => self.last_exit_code = Some(code),
            Err(e) => {
                // The child was killed; never fatal
                warn!("'{}': {}", self.spec.name, e);
                self.last_exit_code = child.and_then(|c| c.exit_code());
                self.last_error = Some(e.to_string());
            }
        }
    }

    fn resolve_stop_waiters(&mut self) {
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn arm_delay(&mut self, delay: Duration) {
        self.cancel_delay();
        self.generation += 1;

        let generation = self.generation;
        let events = self.events.clone();

        self.delay_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events
                .send(ControllerMessage::RestartDelayElapsed { generation })
                .await;
        }));
    }

    fn cancel_delay(&mut self) {
        if let Some(timer) = self.delay_timer.take() {
            timer.abort();
        }
    }

    fn check_memory(&mut self) {
        if self.state != LifecycleState::Running {
            return;
        }
        let Some(pid) = self.child.as_ref().map(|c| c.pid()) else {
            return;
        };

        self.memory_bytes = self.sampler.sample(pid);

        if let Some(bytes) = self.memory_bytes {
            if self.policy.exceeds_memory(bytes) {
                warn!(
                    "'{}' uses {} bytes, above max_memory_restart",
                    self.spec.name, bytes
                );
                self.apply_forced_decision(RestartCause::MemoryLimit { bytes });
            }
        }
    }

    fn status(&self) -> AppStatus {
        let live = matches!(
            self.state,
            LifecycleState::Running | LifecycleState::Stopping
        );
        let child = self.child.as_ref().filter(|_| live);

        AppStatus {
            name: self.spec.name.clone(),
            state: self.state,
            restart_count: self.restart_count,
            pid: child.map(|c| c.pid()),
            uptime: child
                .filter(|_| self.state == LifecycleState::Running)
                .map(|c| c.uptime()),
            last_exit_code: self.last_exit_code,
            memory_bytes: self.memory_bytes,
            last_error: self.last_error.clone(),
        }
    }

    fn transition(&mut self, to: LifecycleState) {
        let from = self.state;
        if from == to {
            return;
        }

        self.state = to;
        info!("'{}': {} -> {}", self.spec.name, from, to);
        let _ = self.changes.send(StateChange { from, to });
    }

    fn invalid(&self, operation: &str) -> VigilError {
        VigilError::InvalidState(
            self.spec.name.clone(),
            format!("cannot {} while {}", operation, self.state),
        )
    }
}
