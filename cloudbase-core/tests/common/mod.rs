//! Shared fakes for integration tests.
//!
//! - [`RecordingChannel`] answers backend actions from a script and logs calls
//! - [`RecordingStorage`] wraps [`MemoryStorage`] and logs every access
//! - [`Harness`] wires both into a provider context whose event bus logs into
//!   the same journal, so writes and notifications can be ordered

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cloudbase_core::{
    CacheSlot, CredentialCache, EventBus, EventKind, MemoryLocation, MemoryStorage, Persistence,
    ProviderContext, RequestChannel, Runtime, Secret, SdkError, SdkResult, StorageBackend,
    StoreError, WeixinAuthProvider,
};

pub const ENV: &str = "test-env";
pub const APPID: &str = "wx-test-appid";

/// One entry of the shared journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Get(String),
    Set(String, String),
    Remove(String),
    Event(EventKind),
}

pub type Journal = Arc<Mutex<Vec<Op>>>;

enum Scripted {
    Respond(Value),
    Fail(String),
}

/// Request channel answering from per-action scripts.
///
/// Unscripted actions answer `{}`.
#[derive(Default)]
pub struct RecordingChannel {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, action: &str, response: Value) {
        self.scripts
            .lock()
            .entry(action.to_string())
            .or_default()
            .push_back(Scripted::Respond(response));
    }

    pub fn fail(&self, action: &str, message: &str) {
        self.scripts
            .lock()
            .entry(action.to_string())
            .or_default()
            .push_back(Scripted::Fail(message.to_string()));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(a, _)| a.clone()).collect()
    }

    pub fn payload_of(&self, action: &str) -> Option<Value> {
        self.calls
            .lock()
            .iter()
            .find(|(a, _)| a == action)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl RequestChannel for RecordingChannel {
    async fn send(&self, action: &str, payload: Value) -> SdkResult<Value> {
        self.calls.lock().push((action.to_string(), payload));
        let next = self
            .scripts
            .lock()
            .get_mut(action)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Scripted::Respond(value)) => Ok(value),
            Some(Scripted::Fail(message)) => Err(SdkError::Network { message }),
            None => Ok(json!({})),
        }
    }
}

/// Memory storage that journals every access.
pub struct RecordingStorage {
    inner: MemoryStorage,
    journal: Journal,
}

impl RecordingStorage {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: MemoryStorage::new(),
            journal,
        }
    }
}

#[async_trait]
impl StorageBackend for RecordingStorage {
    fn get_item(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.journal.lock().push(Op::Get(key.to_string()));
        self.inner.get_item(key)
    }

    async fn set_item(&self, key: &str, value: &Secret) -> Result<(), StoreError> {
        self.journal
            .lock()
            .push(Op::Set(key.to_string(), value.expose().to_string()));
        self.inner.set_item(key, value).await
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.journal.lock().push(Op::Remove(key.to_string()));
        self.inner.remove_item(key)
    }
}

/// A provider context over recording fakes.
pub struct Harness {
    pub channel: Arc<RecordingChannel>,
    pub cache: Arc<CredentialCache>,
    pub events: Arc<EventBus>,
    pub location: Arc<MemoryLocation>,
    pub journal: Journal,
    pub runtime: Runtime,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runtime(Runtime::Web)
    }

    pub fn with_runtime(runtime: Runtime) -> Self {
        Self::with_channel(runtime, Arc::new(RecordingChannel::new()))
    }

    pub fn with_channel(runtime: Runtime, channel: Arc<RecordingChannel>) -> Self {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let storage = Arc::new(RecordingStorage::new(journal.clone()));
        let cache = Arc::new(CredentialCache::new(ENV, Persistence::Session, storage));
        let events = Arc::new(EventBus::new());

        for kind in [
            EventKind::LoginStateChanged,
            EventKind::LoginTypeChanged,
            EventKind::LoginStateExpired,
            EventKind::AccessTokenRefreshed,
        ] {
            let journal = journal.clone();
            events.subscribe(kind, move |event| {
                journal.lock().push(Op::Event(event.kind()));
                Ok(())
            });
        }

        Self {
            channel,
            cache,
            events,
            location: Arc::new(MemoryLocation::new("https://app.example.com/login")),
            journal,
            runtime,
        }
    }

    pub fn context(&self) -> ProviderContext {
        self.context_with(self.channel.clone())
    }

    pub fn context_with(&self, request: Arc<dyn RequestChannel>) -> ProviderContext {
        ProviderContext {
            env: ENV.to_string(),
            persistence: Persistence::Session,
            cache: self.cache.clone(),
            request,
            runtime: self.runtime,
            events: self.events.clone(),
            location: self.location.clone(),
        }
    }

    pub fn provider(&self, scope: &str) -> WeixinAuthProvider {
        WeixinAuthProvider::new(self.context(), APPID, scope, None)
    }

    /// Pre-populate a slot, then forget the write.
    pub async fn seed(&self, slot: CacheSlot, value: &str) {
        self.cache.set_store_async(slot, value).await.unwrap();
        self.journal.lock().clear();
    }

    pub fn ops(&self) -> Vec<Op> {
        self.journal.lock().clone()
    }

    /// Every slot written before the first event, in order.
    pub fn writes_before_first_event(&self) -> Vec<CacheSlot> {
        let slots = [
            CacheSlot::RefreshToken,
            CacheSlot::AccessToken,
            CacheSlot::AccessTokenExpire,
            CacheSlot::LoginType,
            CacheSlot::UserInfo,
        ];
        self.ops()
            .into_iter()
            .take_while(|op| !matches!(op, Op::Event(_)))
            .filter_map(|op| match op {
                Op::Set(key, _) | Op::Remove(key) => Some(key),
                _ => None,
            })
            .map(|key| {
                *slots
                    .iter()
                    .find(|slot| self.cache.key(**slot) == key)
                    .unwrap_or_else(|| panic!("write to unknown key {key}"))
            })
            .collect()
    }

    pub fn writes(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, Op::Set(..) | Op::Remove(_)))
            .count()
    }

    pub fn events_fired(&self) -> Vec<EventKind> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Event(kind) => Some(kind),
                _ => None,
            })
            .collect()
    }

    pub fn slot(&self, slot: CacheSlot) -> Option<String> {
        self.cache
            .get_store(slot)
            .unwrap()
            .map(|s| s.expose().to_string())
    }
}
