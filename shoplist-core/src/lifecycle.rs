//! Host lifecycle events and their delivery to services.
//!
//! The services never install timers or signal handlers themselves. The host
//! owns a [`LifecycleEventSource`], and [`Lifecycle::run`] pulls events from it
//! and hands each one to every registered [`LifecycleListener`].
//!
//! Sources:
//! - [`ScriptedEvents`]: a fixed sequence, for tests
//! - [`ChannelEvents`]: whatever another task sends
//! - [`HostEvents`]: interval ticks, durable-store writes from other tabs and
//!   processes, and Ctrl-C as unload

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::storage::{LocalStore, StorageEvent, PRIMARY_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app became visible or focused.
    Foreground,
    /// The app was hidden or lost focus.
    Background,
    /// Another tab or process wrote this physical key.
    ExternalChange(String),
    /// Periodic timer.
    IntervalTick,
    /// The app is about to exit.
    Unload,
}

/// Reactions to lifecycle events. Every method defaults to doing nothing.
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    async fn on_foreground(&self) {}
    async fn on_background(&self) {}
    async fn on_external_change(&self, _physical_key: &str) {}
    async fn on_interval_tick(&self) {}
    async fn on_unload(&self) {}
}

/// Anything that yields lifecycle events. `None` ends the stream.
#[async_trait]
pub trait LifecycleEventSource: Send {
    async fn next_event(&mut self) -> Option<LifecycleEvent>;
}

/// Dispatches events to registered listeners in registration order.
#[derive(Default)]
pub struct Lifecycle {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.push(listener);
    }

    pub async fn dispatch(&self, event: &LifecycleEvent) {
        tracing::debug!("Lifecycle event: {:?}", event);
        for listener in &self.listeners {
            match event {
                LifecycleEvent::Foreground => listener.on_foreground().await,
                LifecycleEvent::Background => listener.on_background().await,
                LifecycleEvent::ExternalChange(key) => listener.on_external_change(key).await,
                LifecycleEvent::IntervalTick => listener.on_interval_tick().await,
                LifecycleEvent::Unload => listener.on_unload().await,
            }
        }
    }

    /// Dispatches events until the source ends or an `Unload` is handled.
    ///
    /// Returns the number of events dispatched.
    pub async fn run<S: LifecycleEventSource + ?Sized>(&self, source: &mut S) -> usize {
        let mut count = 0;
        while let Some(event) = source.next_event().await {
            self.dispatch(&event).await;
            count += 1;
            if event == LifecycleEvent::Unload {
                break;
            }
        }
        count
    }
}

/// Yields a fixed sequence of events, then ends.
#[derive(Debug, Default)]
pub struct ScriptedEvents {
    events: VecDeque<LifecycleEvent>,
}

impl ScriptedEvents {
    pub fn new(events: impl IntoIterator<Item = LifecycleEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn push(&mut self, event: LifecycleEvent) {
        self.events.push_back(event);
    }
}

#[async_trait]
impl LifecycleEventSource for ScriptedEvents {
    async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.events.pop_front()
    }
}

/// Yields events sent through an mpsc channel.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl ChannelEvents {
    pub fn new() -> (mpsc::UnboundedSender<LifecycleEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }
}

#[async_trait]
impl LifecycleEventSource for ChannelEvents {
    async fn next_event(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }
}

/// Real host events for a running process.
pub struct HostEvents {
    interval: Interval,
    store: Option<Arc<LocalStore>>,
    events: Option<broadcast::Receiver<StorageEvent>>,
    tab_id: Uuid,
    pending: VecDeque<LifecycleEvent>,
    handle_ctrl_c: bool,
}

impl HostEvents {
    /// Ticks every `period`. With a durable store, also reports writes made by
    /// other tabs (`tab_id` identifies this one) and by other processes.
    pub fn new(period: Duration, store: Option<Arc<LocalStore>>, tab_id: Uuid) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let events = store.as_ref().map(|s| s.subscribe());

        Self {
            interval,
            store,
            events,
            tab_id,
            pending: VecDeque::new(),
            handle_ctrl_c: true,
        }
    }

    /// Leaves Ctrl-C to the caller.
    pub fn without_ctrl_c(mut self) -> Self {
        self.handle_ctrl_c = false;
        self
    }

    fn on_tick(&mut self) {
        if let Some(store) = &self.store {
            match store.refresh_from_disk() {
                Ok(changed) => {
                    // refresh_from_disk also broadcasts these; the receiver
                    // skips nil-source events to avoid reporting them twice.
                    self.pending
                        .extend(changed.into_iter().map(LifecycleEvent::ExternalChange));
                }
                Err(e) => tracing::warn!("Failed to refresh durable store: {}", e),
            }
        }
    }
}

#[async_trait]
impl LifecycleEventSource for HostEvents {
    async fn next_event(&mut self) -> Option<LifecycleEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            let handle_ctrl_c = self.handle_ctrl_c;
            let interval = &mut self.interval;
            let events = &mut self.events;
            let storage_event = async {
                match events.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            };
            let ctrl_c = async {
                if handle_ctrl_c {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                } else {
                    std::future::pending::<()>().await;
                }
            };

            let wake = tokio::select! {
                _ = interval.tick() => Wake::Tick,
                received = storage_event => Wake::Storage(received),
                _ = ctrl_c => Wake::CtrlC,
            };

            match wake {
                Wake::Tick => {
                    self.on_tick();
                    self.pending.push_back(LifecycleEvent::IntervalTick);
                }
                Wake::Storage(Ok(event)) => {
                    if event.source != self.tab_id
                        && !event.source.is_nil()
                        && event.key.starts_with(PRIMARY_PREFIX)
                    {
                        return Some(LifecycleEvent::ExternalChange(event.key));
                    }
                }
                Wake::Storage(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!("Missed {} storage events", n);
                }
                Wake::Storage(Err(broadcast::error::RecvError::Closed)) => {
                    self.events = None;
                }
                Wake::CtrlC => return Some(LifecycleEvent::Unload),
            }
        }
    }
}

enum Wake {
    Tick,
    Storage(Result<StorageEvent, broadcast::error::RecvError>),
    CtrlC,
}
