//! Output demultiplexing
//!
//! Each complete line from the debugger is parsed and fully dispatched
//! before the next one is read: either it resolves a pending command, or
//! its out-of-band entries become [`BackendEvent`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot};

use crate::mi::{parse_record, AsyncKind, OutOfBand, Record, ResultClass, StreamKind};

use super::events::{BackendEvent, OutputCategory, RunningNotice, ThreadNotice};
use super::logpoint::LogPointTracker;

/// Commands waiting for their result record, by token
#[derive(Clone, Default)]
pub struct PendingTable(Arc<Mutex<HashMap<u64, oneshot::Sender<Record>>>>);

impl PendingTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Record>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, token: u64, tx: oneshot::Sender<Record>) {
        self.lock().insert(token, tx);
    }

    pub fn remove(&self, token: u64) -> Option<oneshot::Sender<Record>> {
        self.lock().remove(&token)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every waiter; their receivers see the channel closed
    pub fn fail_all(&self) {
        self.lock().clear();
    }
}

pub struct Dispatcher {
    pending: PendingTable,
    events: mpsc::UnboundedSender<BackendEvent>,
    logpoints: Arc<Mutex<LogPointTracker>>,
}

impl Dispatcher {
    pub fn new(
        pending: PendingTable,
        events: mpsc::UnboundedSender<BackendEvent>,
        logpoints: Arc<Mutex<LogPointTracker>>,
    ) -> Self {
        Self {
            pending,
            events,
            logpoints,
        }
    }

    fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    fn logpoints(&self) -> MutexGuard<'_, LogPointTracker> {
        self.logpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn dispatch_line(&self, line: &str) {
        tracing::trace!(line, "MI <<<");

        let Some(record) = parse_record(line) else {
            tracing::warn!(line, "Unhandled MI output");
            self.emit(BackendEvent::output(
                OutputCategory::Stderr,
                format!("Unhandled: {line}\n"),
            ));
            return;
        };
        if record.is_empty() {
            return;
        }
        self.dispatch(record);
    }

    pub fn dispatch(&self, record: Record) {
        if let Some(token) = record.token {
            if record.result_class.is_some() {
                if let Some(tx) = self.pending.remove(token) {
                    let _ = tx.send(record);
                    return;
                }
            }
        }

        if let Some(class) = record.result_class {
            if class == ResultClass::Error {
                let msg = record.result_str("msg").unwrap_or("unknown error");
                tracing::warn!(token = ?record.token, msg, "Unclaimed error result");
                self.emit(BackendEvent::output(OutputCategory::Stderr, format!("{msg}\n")));
            } else {
                tracing::debug!(token = ?record.token, %class, "Unclaimed result record");
            }
        }

        for oob in &record.out_of_band {
            match oob {
                OutOfBand::Stream(stream) => {
                    let category = match stream.kind {
                        StreamKind::Console => OutputCategory::Console,
                        StreamKind::Target => OutputCategory::Stdout,
                        StreamKind::Log => OutputCategory::Log,
                    };
                    self.emit(BackendEvent::output(category, stream.content.clone()));
                    if stream.kind == StreamKind::Console {
                        if let Some(message) = self.logpoints().on_console(&stream.content) {
                            self.emit(BackendEvent::output(OutputCategory::Console, format!("{message}\n")));
                        }
                    }
                }
                OutOfBand::Async(async_record) => match (async_record.kind, async_record.async_class.as_str()) {
                    (AsyncKind::Exec, "running") => {
                        self.emit(BackendEvent::Running(RunningNotice::from_record(&record)));
                    }
                    (AsyncKind::Exec, "stopped") => {
                        let event = BackendEvent::from_stop(record.clone());
                        if let BackendEvent::BreakpointHit(stop) = &event {
                            if let Some(message) = self.logpoints().on_breakpoint_hit(stop) {
                                self.emit(BackendEvent::output(OutputCategory::Console, format!("{message}\n")));
                            }
                        }
                        self.emit(event);
                    }
                    (AsyncKind::Notify, "thread-created") => {
                        if let Some(notice) = ThreadNotice::from_record(&record) {
                            self.emit(BackendEvent::ThreadCreated(notice));
                        }
                    }
                    (AsyncKind::Notify, "thread-exited") => {
                        if let Some(notice) = ThreadNotice::from_record(&record) {
                            self.emit(BackendEvent::ThreadExited(notice));
                        }
                    }
                    (kind, class) => {
                        tracing::trace!(?kind, class, "Ignoring async record");
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> (Dispatcher, PendingTable, mpsc::UnboundedReceiver<BackendEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = PendingTable::default();
        let logpoints = Arc::new(Mutex::new(LogPointTracker::default()));
        logpoints.lock().unwrap().register(1, 2, "n={n}");
        (Dispatcher::new(pending.clone(), tx, logpoints), pending, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<BackendEvent>) -> Vec<BackendEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    #[test]
    fn test_result_resolves_pending_token() {
        let (d, pending, mut rx) = dispatcher();
        let (tx, mut waiter) = oneshot::channel();
        pending.insert(7, tx);

        d.dispatch_line(r#"7^done,value="3""#);
        let record = waiter.try_recv().unwrap();
        assert_eq!(record.result_str("value"), Some("3"));
        assert!(pending.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_out_of_order_replies() {
        let (d, pending, _rx) = dispatcher();
        let (tx1, mut w1) = oneshot::channel();
        let (tx2, mut w2) = oneshot::channel();
        pending.insert(1, tx1);
        pending.insert(2, tx2);

        d.dispatch_line("2^running");
        d.dispatch_line("1^done");
        assert_eq!(w2.try_recv().unwrap().result_class, Some(ResultClass::Running));
        assert_eq!(w1.try_recv().unwrap().result_class, Some(ResultClass::Done));
    }

    #[test]
    fn test_events_from_out_of_band() {
        let (d, _pending, mut rx) = dispatcher();
        d.dispatch_line(r#"*running,thread-id="all""#);
        d.dispatch_line(r#"=thread-created,id="4",group-id="i1",session-id="1""#);
        d.dispatch_line(r#"*stopped,reason="end-stepping-range",thread-id="4""#);
        d.dispatch_line(r#"=thread-exited,id="4",group-id="i1""#);
        d.dispatch_line("(gdb)");

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], BackendEvent::Running(RunningNotice { thread_id: None, .. })));
        assert!(matches!(&events[1], BackendEvent::ThreadCreated(n) if n.thread_id == 4));
        assert!(matches!(events[2], BackendEvent::StepEnd(_)));
        assert!(matches!(events[3], BackendEvent::ThreadExited(_)));
    }

    #[test]
    fn test_unhandled_line_is_forwarded() {
        let (d, _pending, mut rx) = dispatcher();
        d.dispatch_line("garbage that is not MI");
        match drain(&mut rx).as_slice() {
            [BackendEvent::Output { category: OutputCategory::Stderr, text }] => {
                assert_eq!(text, "Unhandled: garbage that is not MI\n")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unclaimed_error_is_reported() {
        let (d, _pending, mut rx) = dispatcher();
        d.dispatch_line(r#"99^error,msg="Cannot access memory""#);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [BackendEvent::Output { text, .. }] if text.contains("Cannot access memory")
        ));
    }

    #[test]
    fn test_logpoint_substitution_through_console_stream() {
        let (d, _pending, mut rx) = dispatcher();
        d.dispatch_line(r#"*stopped,reason="breakpoint-hit",bkptno="2",thread-id="1",session-id="1""#);
        d.dispatch_line(r#"~"$1 = 41\n""#);

        let events = drain(&mut rx);
        assert!(matches!(events[0], BackendEvent::BreakpointHit(_)));
        let messages: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Output { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(messages, vec!["$1 = 41\n", "Log Message: n=41\n"]);
    }
}
