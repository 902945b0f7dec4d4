//! Test doubles shared by unit tests.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    clock::Clock,
    context::VisitorContext,
    hit::HitId,
    transport::{HitBatch, HitTransport},
    visitor::Identity,
    Error, Result,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            now: Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// What the fake transport answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Status(u16),
    ConnectionRefused,
}

/// A delivery observed by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub identity: Identity,
    pub hit_ids: Vec<HitId>,
}

/// Transport that records deliveries and answers from a script. Once the script is exhausted,
/// the default reply is used.
pub struct FakeTransport {
    script: Mutex<Vec<Reply>>,
    default: Mutex<Reply>,
    deliveries: Mutex<Vec<Delivery>>,
    contexts: Mutex<Vec<(String, VisitorContext)>>,
    /// Called before answering; lets tests block a delivery in flight.
    on_deliver: Mutex<Option<Box<dyn Fn() + Send>>>,
    pub attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn replying(default: Reply) -> Arc<FakeTransport> {
        Arc::new(FakeTransport {
            script: Mutex::new(Vec::new()),
            default: Mutex::new(default),
            deliveries: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            on_deliver: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn ok() -> Arc<FakeTransport> {
        FakeTransport::replying(Reply::Status(200))
    }

    /// Replies used, in order, before falling back to the default.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        let mut script = self.script.lock().unwrap();
        script.extend(replies);
    }

    pub fn set_default(&self, reply: Reply) {
        *self.default.lock().unwrap() = reply;
    }

    pub fn on_deliver(&self, hook: impl Fn() + Send + 'static) {
        *self.on_deliver.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<(String, VisitorContext)> {
        self.contexts.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Reply {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            self.default.lock().unwrap().clone()
        } else {
            script.remove(0)
        }
    }

    fn answer(reply: Reply) -> Result<u16> {
        match reply {
            Reply::Status(status) => Ok(status),
            Reply::ConnectionRefused => Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}

impl HitTransport for FakeTransport {
    fn deliver_batch(&self, batch: &HitBatch<'_>) -> Result<u16> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.on_deliver.lock().unwrap().as_ref() {
            hook();
        }

        let reply = self.next_reply();
        if matches!(reply, Reply::Status(200..=299)) {
            self.deliveries.lock().unwrap().push(Delivery {
                identity: batch.identity.clone(),
                hit_ids: batch.hits.iter().map(|hit| hit.id).collect(),
            });
        }
        FakeTransport::answer(reply)
    }

    fn send_context(&self, visitor_id: &str, context: &VisitorContext) -> Result<u16> {
        let reply = self.next_reply();
        if matches!(reply, Reply::Status(200..=299)) {
            self.contexts
                .lock()
                .unwrap()
                .push((visitor_id.to_owned(), context.clone()));
        }
        FakeTransport::answer(reply)
    }
}
