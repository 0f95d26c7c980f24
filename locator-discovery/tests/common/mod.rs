//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use locator_discovery::{
    DiscoveryConfig, Endpoint, Identity, InvokeError, JsonCodec, LocatorDiscovery,
    LocatorTransport, MessageCodec, ObjectRef, ProbeRequest, ProbeTransport, Request,
    TokioScheduler, TokioTimeProvider,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Counts probes; optionally fails every send.
#[derive(Default)]
pub struct MockProbe {
    sent: AtomicUsize,
    failing: AtomicBool,
    requests: Mutex<Vec<(Endpoint, ProbeRequest)>>,
}

impl MockProbe {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<(Endpoint, ProbeRequest)> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ProbeTransport for MockProbe {
    async fn send_probe(&self, lookup: &Endpoint, request: &ProbeRequest) -> io::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("lock")
            .push((lookup.clone(), request.clone()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "no route"));
        }
        Ok(())
    }
}

/// A remote locator: pops scripted errors first, then answers every lookup
/// with `answer`.
pub struct MockLocator {
    answer: Option<ObjectRef>,
    errors: Mutex<VecDeque<InvokeError>>,
    calls: Mutex<Vec<(ObjectRef, Request)>>,
}

impl MockLocator {
    pub fn answering(answer: Option<ObjectRef>) -> Self {
        Self {
            answer,
            errors: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next(&self, err: InvokeError) {
        self.errors.lock().expect("lock").push_back(err);
    }

    pub fn calls(&self) -> Vec<(ObjectRef, Request)> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn targets(&self) -> Vec<ObjectRef> {
        self.calls().into_iter().map(|(target, _)| target).collect()
    }
}

#[async_trait]
impl LocatorTransport for MockLocator {
    async fn invoke(&self, target: &ObjectRef, request: &Request) -> Result<Vec<u8>, InvokeError> {
        self.calls
            .lock()
            .expect("lock")
            .push((target.clone(), request.clone()));
        if let Some(err) = self.errors.lock().expect("lock").pop_front() {
            return Err(err);
        }
        JsonCodec
            .encode(&self.answer)
            .map_err(|e| InvokeError::Unknown(e.to_string()))
    }
}

pub struct Harness {
    pub discovery: LocatorDiscovery<MockLocator>,
    pub probe: Arc<MockProbe>,
    pub rpc: Arc<MockLocator>,
}

impl Harness {
    pub fn start(config: DiscoveryConfig, rpc: MockLocator) -> Self {
        let probe = Arc::new(MockProbe::default());
        let rpc = Arc::new(rpc);
        let reply = config.reply().to_vec();
        let discovery = LocatorDiscovery::with_parts(
            config,
            Arc::clone(&rpc),
            probe.clone(),
            reply,
            Arc::new(TokioScheduler::new()),
            TokioTimeProvider::new(),
        );
        Self {
            discovery,
            probe,
            rpc,
        }
    }

    /// Deliver a probe reply.
    pub fn reply(&self, locator: &ObjectRef) {
        self.discovery
            .reply_listener()
            .found_locator(Some(locator.clone()));
    }
}

/// `channels` lookup channels, one per interface 10.0.<i>.1.
pub fn config(channels: usize, timeout_ms: u64, retries: u32, cooldown_ms: u64) -> DiscoveryConfig {
    DiscoveryConfig::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .retry_count(retries)
        .cooldown(Duration::from_millis(cooldown_ms))
        .trace_level(3)
        .interfaces((0..channels).map(|i| format!("10.0.{}.1", i)).collect())
        .build()
        .expect("valid config")
}

pub fn locator(instance: &str, hosts: &[&str]) -> ObjectRef {
    ObjectRef::new(
        Identity::new("Locator", instance),
        hosts.iter().map(|host| Endpoint::tcp(*host, 4061)).collect(),
    )
}

pub fn hello() -> ObjectRef {
    ObjectRef::new(Identity::new("hello", ""), vec![Endpoint::tcp("10.0.0.20", 10000)])
}

/// Let spawned tasks run without advancing the paused clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
