#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use folio::{FolioConfig, FolioContext, MemoryDocumentBackend, RetryConfig};
use folio_core::SessionIdentity;

pub struct Harness {
    pub backend: MemoryDocumentBackend,
    pub identity: Arc<SessionIdentity>,
    pub ctx: FolioContext,
}

/// Context over a fresh in-memory backend with `user` signed in.
pub fn harness(user: &str) -> Harness {
    folio::logging::init_logging("warn");
    let backend = MemoryDocumentBackend::new();
    let identity = Arc::new(SessionIdentity::signed_in(user));
    let config = FolioConfig {
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
        },
        ..FolioConfig::default()
    };
    let ctx = FolioContext::init(Arc::new(backend.clone()), identity.clone(), config)
        .expect("default config is valid");
    Harness {
        backend,
        identity,
        ctx,
    }
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Callback sink that records every delivery.
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> impl Fn(T) + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |value| seen.lock().unwrap().push(value)
    }

    pub fn all(&self) -> Vec<T> {
        self.seen.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn last(&self) -> Option<T> {
        self.seen.lock().unwrap().last().cloned()
    }
}
