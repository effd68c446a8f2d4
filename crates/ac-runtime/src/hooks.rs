//! The hook bus and its three built-in subscribers: canonical run log,
//! memory projection, and external streaming.
//!
//! Grounded on the teacher's [`RunStore`] broadcast-channel pattern
//! (`crates/gateway/src/runtime/runs.rs`) for the canonical log, and on
//! `CancelMap`'s single-RwLock-per-concern style for the subscriber list.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use ac_types::{Event, Result, RunID, SessionID, ToolCallID};

/// A hook subscriber. Invoked synchronously, in registration order, for
/// every event published on a run.
pub trait HookSubscriber: Send + Sync {
    fn handle(&self, event: &Event) -> Result<()>;
}

/// Whether a session is still accepting events. Checked by the stream
/// subscriber to decide whether a send failure is fatal.
pub trait SessionStore: Send + Sync {
    fn create(&self, session_id: &SessionID);
    /// Whether `session_id` has ever been created, regardless of whether
    /// it has since ended. Distinguishes "never existed" from "existed and
    /// ended" for the session guard's two distinct error cases.
    fn exists(&self, session_id: &SessionID) -> bool;
    fn is_active(&self, session_id: &SessionID) -> bool;
    fn end(&self, session_id: &SessionID);
}

/// Minimal in-process session store. A production embedder supplies its
/// own durable implementation.
#[derive(Default)]
pub struct InMemorySessionStore {
    ended: RwLock<HashSet<SessionID>>,
    known: RwLock<HashSet<SessionID>>,
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, session_id: &SessionID) {
        self.known.write().insert(session_id.clone());
    }

    fn exists(&self, session_id: &SessionID) -> bool {
        self.known.read().contains(session_id)
    }

    fn is_active(&self, session_id: &SessionID) -> bool {
        self.known.read().contains(session_id) && !self.ended.read().contains(session_id)
    }

    fn end(&self, session_id: &SessionID) {
        self.ended.write().insert(session_id.clone());
    }
}

/// External sink a [`StreamSubscriber`] forwards events to.
pub trait StreamSink: Send + Sync {
    fn send(&self, event: &Event) -> Result<()>;
}

/// Backing store for arbitrary memory events, fed by [`MemorySubscriber`].
pub trait MemorySink: Send + Sync {
    fn record(&self, event: &Event);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RunLog subscriber — canonical append-only log, always runs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const MAX_EVENTS_PER_RUN: usize = 10_000;

/// Canonical, append-only per-run event log. Never suppressed, never
/// fails — the runtime's source of truth for `ListRunEvents`.
#[derive(Default)]
pub struct RunLog {
    by_run: RwLock<HashMap<RunID, VecDeque<Event>>>,
}

impl RunLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A page of events starting after `cursor` (an index into the log),
    /// up to `limit` entries, plus the cursor to resume from.
    pub fn page(&self, run_id: &RunID, cursor: usize, limit: usize) -> (Vec<Event>, usize) {
        let by_run = self.by_run.read();
        let Some(events) = by_run.get(run_id) else {
            return (Vec::new(), cursor);
        };
        let page: Vec<Event> = events.iter().skip(cursor).take(limit).cloned().collect();
        let next_cursor = cursor + page.len();
        (page, next_cursor)
    }
}

impl HookSubscriber for RunLog {
    fn handle(&self, event: &Event) -> Result<()> {
        let mut by_run = self.by_run.write();
        let entries = by_run.entry(event.meta().run_id.clone()).or_default();
        entries.push_back(event.clone());
        if entries.len() > MAX_EVENTS_PER_RUN {
            entries.pop_front();
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory subscriber — projects events, honouring the suppression set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-run set of parent `ToolCallID`s whose children are hidden from
/// transcript memory (but whose own events are still recorded).
#[derive(Default)]
pub struct SuppressionRegistry {
    by_run: RwLock<HashMap<RunID, HashSet<ToolCallID>>>,
}

impl SuppressionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn suppress(&self, run_id: RunID, parent_tool_call_id: ToolCallID) {
        self.by_run
            .write()
            .entry(run_id)
            .or_default()
            .insert(parent_tool_call_id);
    }

    fn is_suppressed(&self, run_id: &RunID, parent: &ToolCallID) -> bool {
        self.by_run
            .read()
            .get(run_id)
            .map(|set| set.contains(parent))
            .unwrap_or(false)
    }
}

pub struct MemorySubscriber {
    sink: Arc<dyn MemorySink>,
    suppression: Arc<SuppressionRegistry>,
}

impl MemorySubscriber {
    pub fn new(sink: Arc<dyn MemorySink>, suppression: Arc<SuppressionRegistry>) -> Self {
        Self { sink, suppression }
    }
}

impl HookSubscriber for MemorySubscriber {
    fn handle(&self, event: &Event) -> Result<()> {
        if let Some(parent) = event.parent_tool_call_id() {
            if self.suppression.is_suppressed(&event.meta().run_id, parent) {
                return Ok(());
            }
        }
        self.sink.record(event);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream subscriber — fatal while active, no-op once the session ended
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StreamSubscriber {
    sink: Arc<dyn StreamSink>,
    sessions: Arc<dyn SessionStore>,
}

impl StreamSubscriber {
    pub fn new(sink: Arc<dyn StreamSink>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { sink, sessions }
    }
}

impl HookSubscriber for StreamSubscriber {
    fn handle(&self, event: &Event) -> Result<()> {
        match self.sink.send(event) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.sessions.is_active(&event.meta().session_id) {
                    Err(e)
                } else {
                    tracing::debug!(
                        run_id = %event.meta().run_id,
                        "stream sink error after session ended, ignoring"
                    );
                    Ok(())
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HookBus — fan-out to N subscribers in registration order
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct HookBus {
    subscribers: RwLock<Vec<Arc<dyn HookSubscriber>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn HookSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    /// Publish to every subscriber in order. The first subscriber error
    /// is returned after all subscribers have run (a best-effort canonical
    /// log append is never skipped by a later subscriber's failure).
    pub fn publish(&self, event: &Event) -> Result<()> {
        let subscribers = self.subscribers.read();
        let mut first_err = None;
        for subscriber in subscribers.iter() {
            if let Err(e) = subscriber.handle(event) {
                tracing::warn!(error = %e, "hook subscriber failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::{AgentID, EventMeta};

    fn meta(run_id: &str) -> EventMeta {
        EventMeta {
            run_id: RunID::new(run_id),
            agent_id: AgentID::new("svc.writer"),
            session_id: SessionID::new("sess-1"),
            ts_ms: 0,
        }
    }

    #[test]
    fn run_log_appends_in_publish_order() {
        let log = RunLog::new();
        log.handle(&Event::RunStarted { meta: meta("r1") }).unwrap();
        log.handle(&Event::RunPaused { meta: meta("r1") }).unwrap();
        let (page, cursor) = log.page(&RunID::new("r1"), 0, 10);
        assert_eq!(page.len(), 2);
        assert_eq!(cursor, 2);
        assert!(matches!(page[0], Event::RunStarted { .. }));
        assert!(matches!(page[1], Event::RunPaused { .. }));
    }

    #[test]
    fn run_log_pages_respect_cursor_and_limit() {
        let log = RunLog::new();
        for _ in 0..5 {
            log.handle(&Event::RunPaused { meta: meta("r1") }).unwrap();
        }
        let (page, cursor) = log.page(&RunID::new("r1"), 2, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(cursor, 4);
    }

    #[test]
    fn memory_subscriber_skips_suppressed_children() {
        struct Collector(RwLock<Vec<Event>>);
        impl MemorySink for Collector {
            fn record(&self, event: &Event) {
                self.0.write().push(event.clone());
            }
        }

        let sink = Arc::new(Collector(RwLock::new(Vec::new())));
        let suppression = SuppressionRegistry::new();
        suppression.suppress(RunID::new("r1"), ToolCallID::new("parent-1"));

        let subscriber = MemorySubscriber::new(sink.clone(), suppression);
        let suppressed_event = Event::ToolCallScheduled {
            meta: meta("r1"),
            tool_call_id: ToolCallID::new("child-1"),
            parent_tool_call_id: Some(ToolCallID::new("parent-1")),
            tool_name: "svc.echo".into(),
            payload: serde_json::json!({}),
            queue: None,
            expected_children: 0,
        };
        let kept_event = Event::RunStarted { meta: meta("r1") };

        subscriber.handle(&suppressed_event).unwrap();
        subscriber.handle(&kept_event).unwrap();

        let recorded = sink.0.read();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(recorded[0], Event::RunStarted { .. }));
    }

    #[test]
    fn stream_subscriber_propagates_error_while_session_active() {
        struct FailingSink;
        impl StreamSink for FailingSink {
            fn send(&self, _event: &Event) -> Result<()> {
                Err(ac_types::Error::Other("sink down".into()))
            }
        }

        let sessions = Arc::new(InMemorySessionStore::default());
        sessions.create(&SessionID::new("sess-1"));
        let subscriber = StreamSubscriber::new(Arc::new(FailingSink), sessions);
        assert!(subscriber.handle(&Event::RunStarted { meta: meta("r1") }).is_err());
    }

    #[test]
    fn stream_subscriber_ignores_error_after_session_ended() {
        struct FailingSink;
        impl StreamSink for FailingSink {
            fn send(&self, _event: &Event) -> Result<()> {
                Err(ac_types::Error::Other("sink down".into()))
            }
        }

        let sessions = Arc::new(InMemorySessionStore::default());
        sessions.create(&SessionID::new("sess-1"));
        sessions.end(&SessionID::new("sess-1"));
        let subscriber = StreamSubscriber::new(Arc::new(FailingSink), sessions);
        assert!(subscriber.handle(&Event::RunStarted { meta: meta("r1") }).is_ok());
    }

    #[test]
    fn hook_bus_runs_all_subscribers_even_after_an_error() {
        struct Failing;
        impl HookSubscriber for Failing {
            fn handle(&self, _event: &Event) -> Result<()> {
                Err(ac_types::Error::Other("boom".into()))
            }
        }

        let bus = HookBus::new();
        let log = RunLog::new();
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(log.clone());

        let result = bus.publish(&Event::RunStarted { meta: meta("r1") });
        assert!(result.is_err());
        let (page, _) = log.page(&RunID::new("r1"), 0, 10);
        assert_eq!(page.len(), 1, "later subscribers still run after an earlier failure");
    }
}
