#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Fixed-interval scheduler that owns the world.
//!
//! Every mutation happens on the thread running the [`Heartbeat`]. Host
//! callbacks on other threads post [`Command`]s through an [`Inbox`]; the
//! heartbeat drains them between ticks, so the registries keep a single
//! writer.

mod clock;

use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};
use exfil_core::{Command, Event, Timestamp};
use exfil_world::{self as world, World};
use thiserror::Error;
use tracing::{error, info};

pub use clock::{Clock, ManualClock, SystemClock};

/// Errors reported to host callbacks.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// The heartbeat stopped and no longer accepts commands.
    #[error("heartbeat inbox is closed")]
    InboxClosed,
}

/// Cloneable handle for posting commands from any thread.
#[derive(Clone, Debug)]
pub struct Inbox {
    sender: Sender<Command>,
}

impl Inbox {
    /// Queues a command for the next pulse.
    pub fn send(&self, command: Command) -> Result<(), HeartbeatError> {
        self.sender
            .send(command)
            .map_err(|_| HeartbeatError::InboxClosed)
    }
}

/// Single-threaded driver advancing the world once per interval.
pub struct Heartbeat {
    world: World,
    interval: Duration,
    sender: Sender<Command>,
    receiver: Receiver<Command>,
}

impl Heartbeat {
    /// Wraps `world`, ticking it every `interval`.
    #[must_use]
    pub fn new(world: World, interval: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            world,
            interval,
            sender,
            receiver,
        }
    }

    /// Handle for posting commands.
    #[must_use]
    pub fn inbox(&self) -> Inbox {
        Inbox {
            sender: self.sender.clone(),
        }
    }

    /// World driven by the heartbeat.
    #[must_use]
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Interval between ticks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Releases the world.
    #[must_use]
    pub fn into_world(self) -> World {
        self.world
    }

    /// Applies every queued command in arrival order, then one tick at `now`.
    pub fn pulse(&mut self, now: Timestamp) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(command) = self.receiver.try_recv() {
            self.apply_isolated(command, &mut events);
        }
        self.apply_isolated(Command::Tick { now }, &mut events);
        events
    }

    /// Pulses every interval until `shutdown` fires or disconnects, then
    /// applies [`Command::Shutdown`] and returns the world.
    ///
    /// `sink` receives the events of every pulse.
    pub fn run<C, F>(mut self, clock: &C, shutdown: &Receiver<()>, mut sink: F) -> World
    where
        C: Clock + ?Sized,
        F: FnMut(&World, Vec<Event>),
    {
        let ticker = tick(self.interval);
        info!(
            target: "exfil::heartbeat",
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "heartbeat started"
        );
        loop {
            select! {
                recv(ticker) -> _ => {
                    let events = self.pulse(clock.now());
                    sink(&self.world, events);
                }
                recv(shutdown) -> _ => break,
            }
        }

        let mut events = Vec::new();
        while let Ok(command) = self.receiver.try_recv() {
            self.apply_isolated(command, &mut events);
        }
        self.apply_isolated(Command::Shutdown, &mut events);
        sink(&self.world, events);
        info!(target: "exfil::heartbeat", "heartbeat stopped");
        self.world
    }

    fn apply_isolated(&mut self, command: Command, out_events: &mut Vec<Event>) {
        let mut staged = Vec::new();
        let label = command_label(&command);
        let target = &mut self.world;
        let applied = panic::catch_unwind(AssertUnwindSafe(|| {
            world::apply(target, command, &mut staged);
        }));
        match applied {
            Ok(()) => out_events.append(&mut staged),
            Err(_) => error!(target: "exfil::heartbeat", command = label, "command panicked"),
        }
    }
}

fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Tick { .. } => "tick",
        Command::Connect { .. } => "connect",
        Command::Disconnect { .. } => "disconnect",
        Command::ReportPosition { .. } => "report_position",
        Command::Died { .. } => "died",
        Command::Respawned { .. } => "respawned",
        Command::JoinQueue { .. } => "join_queue",
        Command::JoinQuickQueue { .. } => "join_quick_queue",
        Command::LeaveQueue { .. } => "leave_queue",
        Command::EnterExitPortal { .. } => "enter_exit_portal",
        Command::BossDefeated { .. } => "boss_defeated",
        Command::ForceStart { .. } => "force_start",
        Command::ForceEnd { .. } => "force_end",
        Command::ForceExtract { .. } => "force_extract",
        Command::Unlock { .. } => "unlock",
        Command::PruneStale => "prune_stale",
        Command::ReloadTemplates { .. } => "reload_templates",
        Command::Shutdown => "shutdown",
    }
}
