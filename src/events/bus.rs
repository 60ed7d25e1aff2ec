//! # Event bus for distributing runtime events.
//!
//! [`Bus`] decouples publishers (exit watchers, log readers, discovery tasks, the
//! supervisor itself) from consumers (UI, tests, [`Subscribe`] implementations).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                         Handlers (ordered):
//!   exit watcher ──┐                           ┌──► handler #0
//!   log reader   ──┼──► [bounded queue] ──► Dispatcher ──► handler #1
//!   discovery    ──┤     (try_send)           └──► handler #N
//!   Supervisor   ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` uses `try_send`; a full queue drops the
//!   **newest** event, counts it and logs its kind and backend.
//! - **Single dispatcher**: one task drains the queue and calls every handler in
//!   subscription order, against a snapshot of the handler list taken per event.
//! - **Stable slots**: `subscribe()` appends; unsubscribing clears the slot but never
//!   compacts the list, so other handlers keep their position.
//! - **Panic isolation**: a panicking handler is logged and skipped; dispatch goes on.
//! - **Close**: `close()` stops the dispatcher; later publishes are silently ignored.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::event::Event;
use crate::subscribers::Subscribe;

/// Default queue capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 100;

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Slot {
    name: &'static str,
    handler: Handler,
}

struct Shared {
    handlers: Mutex<Vec<Option<Slot>>>,
    dropped: AtomicU64,
    closed: CancellationToken,
    capacity: usize,
}

impl Shared {
    fn snapshot(&self) -> Vec<Slot> {
        let slots = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        slots.iter().flatten().cloned().collect()
    }
}

/// Bounded publish/subscribe bus for runtime events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately, publishers never see back-pressure.
/// - **Ordered**: events from one publisher reach every handler in publish order.
/// - **Cloneable**: cheap to clone (sender + `Arc` to shared state).
#[derive(Clone)]
pub struct Bus {
    tx: mpsc::Sender<Event>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("capacity", &self.shared.capacity)
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Bus {
    /// Creates a bus with the given queue capacity and spawns its dispatcher.
    ///
    /// Must be called from within a Tokio runtime. The minimum capacity is 1 (clamped).
    pub fn new(capacity: usize) -> Self {
        let (bus, dispatcher) = Self::detached(capacity);
        tokio::spawn(dispatcher.run());
        bus
    }

    /// Creates a bus without starting dispatch.
    ///
    /// The returned [`Dispatcher`] must be driven (e.g. `tokio::spawn(d.run())`) for
    /// handlers to see anything; until then the queue only fills up.
    pub fn detached(capacity: usize) -> (Self, Dispatcher) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<Event>(capacity);
        let shared = Arc::new(Shared {
            handlers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
            closed: CancellationToken::new(),
            capacity,
        });
        let dispatcher = Dispatcher {
            rx,
            shared: Arc::clone(&shared),
        };
        (Self { tx, shared }, dispatcher)
    }

    /// Enqueues an event for delivery without waiting.
    ///
    /// - On a full queue the event is dropped and a warning naming its kind and backend is logged.
    /// - After [`close`](Self::close) this is a no-op.
    pub fn publish(&self, ev: Event) {
        if self.shared.closed.is_cancelled() {
            return;
        }
        match self.tx.try_send(ev) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    kind = %ev.kind(),
                    server = %ev.server,
                    seq = ev.seq,
                    "event bus full; dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Registers a handler closure; returns its [`Unsubscribe`] token.
    ///
    /// Handlers run on the dispatcher task and should return quickly.
    pub fn subscribe<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Slot {
            name: "handler",
            handler: Arc::new(handler),
        })
    }

    /// Registers a [`Subscribe`] implementation.
    pub fn attach(&self, sub: Arc<dyn Subscribe>) -> Unsubscribe {
        let name = sub.name();
        self.register(Slot {
            name,
            handler: Arc::new(move |ev: &Event| sub.on_event(ev)),
        })
    }

    /// Stops the dispatcher. Idempotent.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    /// Returns true once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Queue capacity (after clamping).
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn register(&self, slot: Slot) -> Unsubscribe {
        let mut slots = self
            .shared
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        slots.push(Some(slot));
        Unsubscribe {
            shared: Arc::downgrade(&self.shared),
            index: slots.len() - 1,
        }
    }
}

/// Token returned by [`Bus::subscribe`]; removes exactly one handler.
///
/// Dropping the token does **not** unsubscribe.
#[derive(Debug, Clone)]
pub struct Unsubscribe {
    shared: Weak<Shared>,
    index: usize,
}

impl Unsubscribe {
    /// Clears this handler's slot. Calling it again has no effect.
    pub fn unsubscribe(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut slots = shared.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get_mut(self.index) {
            *slot = None;
        }
    }
}

/// Drains the bus queue and invokes handlers.
pub struct Dispatcher {
    rx: mpsc::Receiver<Event>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Runs until the bus is closed.
    pub async fn run(mut self) {
        let closed = self.shared.closed.clone();
        loop {
            tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                msg = self.rx.recv() => match msg {
                    Some(ev) => self.dispatch(&ev),
                    None => break,
                },
            }
        }
        trace!("event bus dispatcher stopped");
    }

    fn dispatch(&self, ev: &Event) {
        for slot in self.shared.snapshot() {
            let handler = &slot.handler;
            if let Err(panic_err) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(ev))) {
                let info = if let Some(msg) = panic_err.downcast_ref::<&'static str>() {
                    (*msg).to_string()
                } else if let Some(msg) = panic_err.downcast_ref::<String>() {
                    msg.clone()
                } else {
                    "unknown panic".to_string()
                };
                warn!(
                    subscriber = slot.name,
                    kind = %ev.kind(),
                    server = %ev.server,
                    %info,
                    "event handler panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn collect(rx: &mut mpsc::UnboundedReceiver<u64>, n: usize) -> Vec<u64> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("channel closed");
            out.push(next);
        }
        out
    }

    fn recorder(bus: &Bus) -> (Unsubscribe, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let unsub = bus.subscribe(move |ev| {
            let _ = tx.send(ev.seq);
        });
        (unsub, rx)
    }

    #[tokio::test]
    async fn every_handler_sees_every_event_in_order() {
        let bus = Bus::new(DEFAULT_BUS_CAPACITY);
        let (_a, mut rx_a) = recorder(&bus);
        let (_b, mut rx_b) = recorder(&bus);

        let mut published = Vec::new();
        for i in 0..50 {
            let ev = Event::log("svc", format!("line {i}"));
            published.push(ev.seq);
            bus.publish(ev);
        }

        assert_eq!(collect(&mut rx_a, 50).await, published);
        assert_eq!(collect(&mut rx_b, 50).await, published);
        assert_eq!(bus.dropped(), 0);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn overflow_drops_newest_and_counts() {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let (bus, _dispatcher) = Bus::detached(4);
        tracing::subscriber::with_default(subscriber, || {
            for i in 0..10 {
                bus.publish(Event::log("overflow-svc", format!("{i}")));
            }
        });
        assert_eq!(bus.dropped(), 6);

        let drops: Vec<String> = out
            .lines()
            .into_iter()
            .filter(|l| l.contains("event bus full"))
            .collect();
        assert_eq!(drops.len(), 6, "{drops:#?}");
        for line in &drops {
            assert!(line.contains("WARN"), "{line}");
            assert!(line.contains("kind=log_received"), "{line}");
            assert!(line.contains("server=overflow-svc"), "{line}");
        }
    }

    #[tokio::test]
    async fn overflowed_queue_delivers_oldest_events() {
        let (bus, dispatcher) = Bus::detached(3);
        let (_u, mut rx) = recorder(&bus);
        let mut seqs = Vec::new();
        for i in 0..5 {
            let ev = Event::log("svc", format!("{i}"));
            seqs.push(ev.seq);
            bus.publish(ev);
        }
        tokio::spawn(dispatcher.run());
        assert_eq!(collect(&mut rx, 3).await, seqs[..3].to_vec());
        assert_eq!(bus.dropped(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_isolated() {
        let bus = Bus::new(16);
        let (first, mut rx_first) = recorder(&bus);
        let (_second, mut rx_second) = recorder(&bus);

        let e1 = Event::log("svc", "one");
        let s1 = e1.seq;
        bus.publish(e1);
        assert_eq!(collect(&mut rx_first, 1).await, vec![s1]);

        first.unsubscribe();
        first.unsubscribe();

        let e2 = Event::log("svc", "two");
        let s2 = e2.seq;
        bus.publish(e2);
        assert_eq!(collect(&mut rx_second, 2).await, vec![s1, s2]);

        // the late subscriber must land in a fresh slot, not reuse the cleared one
        let (_third, mut rx_third) = recorder(&bus);
        let e3 = Event::log("svc", "three");
        let s3 = e3.seq;
        bus.publish(e3);
        assert_eq!(collect(&mut rx_third, 1).await, vec![s3]);
        assert_eq!(collect(&mut rx_second, 1).await, vec![s3]);
        assert!(rx_first.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_dispatch() {
        let bus = Bus::new(8);
        bus.subscribe(|_| panic!("boom"));
        let (_u, mut rx) = recorder(&bus);

        let ev = Event::log("svc", "x");
        let seq = ev.seq;
        bus.publish(ev);
        assert_eq!(collect(&mut rx, 1).await, vec![seq]);
    }

    #[tokio::test]
    async fn publish_after_close_is_harmless() {
        let bus = Bus::new(2);
        let (_u, mut rx) = recorder(&bus);
        bus.close();
        assert!(bus.is_closed());
        for _ in 0..10 {
            bus.publish(Event::log("svc", "late"));
        }
        assert_eq!(bus.dropped(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
