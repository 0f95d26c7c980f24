//! The discovery state machine.
//!
//! [`DiscoveryState`] owns everything mutable about locator discovery: the
//! active probe round, the trusted locator, the cooldown window, and the
//! callers parked on the outcome. It runs as a single Tokio task; callers,
//! the reply correlator, timers and probe sends talk to it only through
//! [`Command`] messages, so exactly one transition runs at a time.
//!
//! # States
//!
//! ```text
//!            resolve (no locator, no cooldown)
//!   ┌──────┐ ─────────────────────────────────▶ ┌─────────┐ ──┐ timeout,
//!   │ Idle │                                    │ Probing │   │ retries left:
//!   └──────┘ ◀───────────────────────────────── └─────────┘ ◀─┘ resend
//!       first accepted reply  /  retries exhausted  /  every channel failed
//! ```
//!
//! Each round carries a generation number. Timer and send-failure callbacks
//! are tagged with the generation they were issued for and are ignored when
//! it no longer matches the active round.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::ProbeChannels;
use crate::config::DiscoveryConfig;
use crate::error::DiscoveryError;
use crate::time::{Scheduler, TimeProvider, TimerHandle};
use crate::types::ObjectRef;

/// Outcome of resolving the locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Forward to this locator.
    Locator(ObjectRef),
    /// Discovery failed or is cooling down; answer "not found".
    Fallback,
}

/// Point-in-time view of the discovery state, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySnapshot {
    /// Whether a probe round is active.
    pub probing: bool,
    /// Resends left in the active round.
    pub retries_remaining: u32,
    /// The trusted locator.
    pub locator: Option<ObjectRef>,
    /// The instance name replies must match, configured or learned.
    pub instance_name: Option<String>,
    /// Time left before a new round may start.
    pub cooldown_remaining: Option<Duration>,
    /// Callers parked on the active round.
    pub parked: usize,
    /// Rounds started since creation.
    pub rounds_started: u64,
    /// Probes sent since creation, one per channel per send.
    pub probes_sent: u64,
}

/// Messages processed by the discovery task.
#[derive(Debug)]
pub(crate) enum Command {
    Resolve {
        failed: Option<ObjectRef>,
        reply: oneshot::Sender<Resolution>,
    },
    Reply(ObjectRef),
    ChannelFailure {
        generation: u64,
        send: u32,
        channel: usize,
        error: String,
    },
    Timeout {
        generation: u64,
    },
    FindLocators {
        instance_name: String,
        notify: Option<oneshot::Sender<()>>,
    },
    KnownLocators {
        reply: oneshot::Sender<Vec<ObjectRef>>,
    },
    Snapshot {
        reply: oneshot::Sender<DiscoverySnapshot>,
    },
}

struct Round {
    generation: u64,
    /// Sends so far in this round; failures only count against the latest.
    send: u32,
    retries_remaining: u32,
    failed_channels: usize,
    started_at: Duration,
    timer: Option<TimerHandle>,
}

struct Watcher {
    instance_name: String,
    notify: oneshot::Sender<()>,
}

/// Locator discovery state, owned by the discovery task.
pub struct DiscoveryState<T: TimeProvider> {
    config: DiscoveryConfig,
    channels: ProbeChannels,
    scheduler: Arc<dyn Scheduler>,
    time: T,
    commands: mpsc::WeakUnboundedSender<Command>,

    instance_name: Option<String>,
    instance_configured: bool,
    locator: Option<ObjectRef>,
    known: Vec<ObjectRef>,
    round: Option<Round>,
    next_generation: u64,
    parked: Vec<oneshot::Sender<Resolution>>,
    watchers: Vec<Watcher>,
    cooldown_until: Option<Duration>,

    warned_mismatch: bool,
    warned_failure: bool,
    rounds_started: u64,
    probes_sent: u64,
}

impl<T: TimeProvider> DiscoveryState<T> {
    /// Spawn the discovery task and return a handle to it.
    ///
    /// The task stops when every [`DiscoveryHandle`] is dropped or when the
    /// returned join handle is aborted. Parked callers then observe
    /// [`DiscoveryError::Shutdown`].
    pub fn spawn(
        config: DiscoveryConfig,
        channels: ProbeChannels,
        scheduler: Arc<dyn Scheduler>,
        time: T,
    ) -> (DiscoveryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Self::new(config, channels, scheduler, time, tx.downgrade());
        let task = tokio::spawn(state.run(rx));
        (DiscoveryHandle { commands: tx }, task)
    }

    fn new(
        config: DiscoveryConfig,
        channels: ProbeChannels,
        scheduler: Arc<dyn Scheduler>,
        time: T,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            instance_name: config.instance_name().map(str::to_string),
            instance_configured: config.instance_name().is_some(),
            config,
            channels,
            scheduler,
            time,
            commands,
            locator: None,
            known: Vec::new(),
            round: None,
            next_generation: 1,
            parked: Vec::new(),
            watchers: Vec::new(),
            cooldown_until: None,
            warned_mismatch: false,
            warned_failure: false,
            rounds_started: 0,
            probes_sent: 0,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        self.cancel_timer();
        tracing::debug!("locator discovery stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Resolve { failed, reply } => self.resolve(failed, reply),
            Command::Reply(candidate) => self.on_reply(candidate),
            Command::ChannelFailure {
                generation,
                send,
                channel,
                error,
            } => self.on_channel_failure(generation, send, channel, &error),
            Command::Timeout { generation } => self.on_timeout(generation),
            Command::FindLocators {
                instance_name,
                notify,
            } => self.find_locators(instance_name, notify),
            Command::KnownLocators { reply } => {
                let _ = reply.send(self.known.clone());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Answer immediately from the trusted locator or the cooldown, or park
    /// the caller on the active round, starting one if needed.
    ///
    /// `failed` is the locator the caller just failed to reach. When it is the
    /// trusted one, the trusted locator is dropped and a new round is needed.
    fn resolve(&mut self, failed: Option<ObjectRef>, reply: oneshot::Sender<Resolution>) {
        if let Some(locator) = &self.locator {
            if failed.as_ref() != Some(locator) {
                let _ = reply.send(Resolution::Locator(locator.clone()));
                return;
            }
            tracing::debug!(locator = %locator, "trusted locator failed, discarding it");
            self.locator = None;
        }

        if let Some(remaining) = self.cooldown_remaining() {
            tracing::debug!(?remaining, "locator lookup cooling down, using fallback");
            let _ = reply.send(Resolution::Fallback);
            return;
        }

        self.parked.push(reply);
        if self.round.is_none() {
            self.start_round();
        }
    }

    fn start_round(&mut self) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.round = Some(Round {
            generation,
            send: 0,
            retries_remaining: self.config.retry_count(),
            failed_channels: 0,
            started_at: self.time.now(),
            timer: None,
        });
        self.rounds_started += 1;

        if self.config.trace_level() > 1 {
            tracing::debug!(
                generation,
                channels = self.channels.len(),
                instance_name = self.instance_name.as_deref().unwrap_or(""),
                "looking up locator"
            );
        }

        self.send_probes(generation, 0);
        self.schedule_timeout(generation);
    }

    fn send_probes(&mut self, generation: u64, send: u32) {
        let commands = self.commands.clone();
        self.probes_sent += self.channels.len() as u64;
        self.channels.broadcast(
            self.instance_name.as_deref().unwrap_or(""),
            Arc::new(move |channel, err| {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::ChannelFailure {
                        generation,
                        send,
                        channel,
                        error: err.to_string(),
                    });
                }
            }),
        );
    }

    fn schedule_timeout(&mut self, generation: u64) {
        let commands = self.commands.clone();
        let handle = self.scheduler.schedule(
            self.config.timeout(),
            Box::new(move || {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::Timeout { generation });
                }
            }),
        );
        if let Some(round) = self.round.as_mut() {
            round.timer = Some(handle);
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.round.as_mut().and_then(|round| round.timer.take()) {
            self.scheduler.cancel(handle);
        }
    }

    fn on_reply(&mut self, candidate: ObjectRef) {
        if let Some(expected) = &self.instance_name {
            if candidate.instance_name() != expected {
                if self.config.trace_level() > 2 {
                    tracing::debug!(
                        expected = %expected,
                        received = %candidate.instance_name(),
                        "ignoring locator reply: instance name doesn't match"
                    );
                }
                // A configured name filters on purpose; only a name learned
                // from the first reply hides other instances.
                if !self.instance_configured && !self.warned_mismatch {
                    self.warned_mismatch = true;
                    tracing::warn!(
                        using = %expected,
                        received = %candidate.instance_name(),
                        "received locator with different instance name; this is typically the \
                         case if multiple locators with different instance names are deployed \
                         and no instance name is configured"
                    );
                }
                return;
            }
        }

        self.record_known(&candidate);

        if self.round.is_none() {
            self.merge_late_reply(candidate);
        } else if self.parked.is_empty() {
            self.end_lookup(candidate);
        } else {
            self.settle(candidate);
        }
    }

    /// A reply ending a round nobody is parked on, started by
    /// [`DiscoveryHandle::find_locators`]. The reply is only collected; the
    /// trusted locator and the instance name are left alone.
    fn end_lookup(&mut self, candidate: ObjectRef) {
        self.cancel_timer();
        self.round = None;
        if self.config.trace_level() > 0 {
            tracing::info!(locator = %candidate, "locator lookup succeeded");
        }
        self.notify_all_watchers();
    }

    /// The first accepted reply of a round: trust it and release every
    /// parked caller.
    fn settle(&mut self, locator: ObjectRef) {
        self.cancel_timer();
        let started_at = self.round.take().map(|round| round.started_at);

        if self.config.trace_level() > 0 {
            tracing::info!(
                locator = %locator,
                elapsed = ?started_at.map(|t| self.time.now().saturating_sub(t)),
                "locator lookup succeeded"
            );
        }

        if self.instance_name.is_none() {
            self.instance_name = Some(locator.instance_name().to_string());
        }
        self.cooldown_until = None;
        self.locator = Some(locator.clone());

        for caller in self.parked.drain(..) {
            let _ = caller.send(Resolution::Locator(locator.clone()));
        }
        self.notify_all_watchers();
    }

    /// A reply arriving with no active round: another replica of the trusted
    /// locator answering late, merged into the trusted reference.
    fn merge_late_reply(&mut self, candidate: ObjectRef) {
        match &self.locator {
            Some(current) if current.instance_name() == candidate.instance_name() => {
                let merged = current.merged_with(&candidate);
                if &merged != current {
                    tracing::debug!(locator = %merged, "merged late locator replica endpoints");
                    self.locator = Some(merged);
                }
            }
            Some(current) => {
                tracing::debug!(
                    using = %current.instance_name(),
                    received = %candidate.instance_name(),
                    "ignoring late locator reply for another instance"
                );
            }
            None => {
                tracing::debug!(locator = %candidate, "ignoring unsolicited locator reply");
            }
        }
    }

    fn on_channel_failure(&mut self, generation: u64, send: u32, channel: usize, error: &str) {
        let channel_count = self.channels.len();
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.generation != generation || round.send != send {
            return;
        }
        round.failed_channels += 1;
        tracing::debug!(
            generation,
            channel,
            failed = round.failed_channels,
            error,
            "locator lookup channel failed"
        );
        if round.failed_channels < channel_count {
            return;
        }

        if !self.warned_failure {
            self.warned_failure = true;
            tracing::warn!(error, "failed to lookup locator on every lookup channel");
        }
        if self.config.trace_level() > 0 {
            tracing::info!(error, "locator lookup failed");
        }
        self.exhaust();
    }

    fn on_timeout(&mut self, generation: u64) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.generation != generation {
            return;
        }
        round.timer = None;

        if round.retries_remaining > 0 {
            round.retries_remaining -= 1;
            round.send += 1;
            round.failed_channels = 0;
            let send = round.send;
            if self.config.trace_level() > 1 {
                tracing::debug!(
                    generation,
                    retry_count = self.config.retry_count(),
                    "retrying locator lookup"
                );
            }
            self.send_probes(generation, send);
            self.schedule_timeout(generation);
            return;
        }

        if self.config.trace_level() > 0 {
            tracing::info!(generation, "locator lookup timed out");
        }
        self.exhaust();
    }

    /// End the active round without a locator: start the cooldown and release
    /// every parked caller against the fallback.
    fn exhaust(&mut self) {
        self.cancel_timer();
        self.round = None;
        self.cooldown_until = Some(self.time.now() + self.config.cooldown());

        for caller in self.parked.drain(..) {
            let _ = caller.send(Resolution::Fallback);
        }
        self.notify_all_watchers();
    }

    fn find_locators(&mut self, instance_name: String, notify: Option<oneshot::Sender<()>>) {
        self.known.clear();
        if let Some(notify) = notify {
            self.watchers.push(Watcher {
                instance_name,
                notify,
            });
        }
        if self.round.is_none() {
            self.start_round();
        }
    }

    fn record_known(&mut self, candidate: &ObjectRef) {
        let existing = self
            .known
            .iter()
            .position(|known| known.instance_name() == candidate.instance_name());
        match existing {
            Some(index) => self.known[index] = self.known[index].merged_with(candidate),
            None => self.known.push(candidate.clone()),
        }

        let instance = candidate.instance_name();
        let (found, waiting): (Vec<_>, Vec<_>) = self
            .watchers
            .drain(..)
            .partition(|watcher| watcher.instance_name == instance);
        self.watchers = waiting;
        for watcher in found {
            let _ = watcher.notify.send(());
        }
    }

    fn notify_all_watchers(&mut self) {
        for watcher in self.watchers.drain(..) {
            let _ = watcher.notify.send(());
        }
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let until = self.cooldown_until?;
        let now = self.time.now();
        (now < until).then(|| until - now)
    }

    fn snapshot(&self) -> DiscoverySnapshot {
        DiscoverySnapshot {
            probing: self.round.is_some(),
            retries_remaining: self
                .round
                .as_ref()
                .map(|round| round.retries_remaining)
                .unwrap_or(0),
            locator: self.locator.clone(),
            instance_name: self.instance_name.clone(),
            cooldown_remaining: self.cooldown_remaining(),
            parked: self.parked.len(),
            rounds_started: self.rounds_started,
            probes_sent: self.probes_sent,
        }
    }
}

/// Cloneable handle to the discovery task.
#[derive(Debug, Clone)]
pub struct DiscoveryHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl DiscoveryHandle {
    /// Resolve the locator, parking until the active round ends if needed.
    ///
    /// Pass the locator that just failed as `failed` to have it discarded.
    pub async fn resolve(&self, failed: Option<ObjectRef>) -> Result<Resolution, DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Resolve { failed, reply })?;
        rx.await.map_err(|_| DiscoveryError::Shutdown)
    }

    /// Feed a probe reply into the state machine.
    pub fn found_locator(&self, locator: ObjectRef) {
        if self.send(Command::Reply(locator)).is_err() {
            tracing::debug!("dropping locator reply: discovery stopped");
        }
    }

    /// Forget previously collected instances and start a lookup.
    ///
    /// With a non-empty `instance_name`, the returned receiver fires when that
    /// instance replies or the round ends.
    pub fn find_locators(
        &self,
        instance_name: &str,
    ) -> Result<Option<oneshot::Receiver<()>>, DiscoveryError> {
        let (notify, rx) = if instance_name.is_empty() {
            (None, None)
        } else {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        };
        self.send(Command::FindLocators {
            instance_name: instance_name.to_string(),
            notify,
        })?;
        Ok(rx)
    }

    /// Every instance collected since the last [`find_locators`](Self::find_locators).
    pub async fn known_locators(&self) -> Result<Vec<ObjectRef>, DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::KnownLocators { reply })?;
        rx.await.map_err(|_| DiscoveryError::Shutdown)
    }

    /// Current state, for diagnostics.
    pub async fn snapshot(&self) -> Result<DiscoverySnapshot, DiscoveryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| DiscoveryError::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), DiscoveryError> {
        self.commands
            .send(command)
            .map_err(|_| DiscoveryError::Shutdown)
    }
}
