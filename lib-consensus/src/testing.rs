//! Test doubles for the network boundary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::network::{NetworkChannel, NetworkError, NetworkResult};

type ProcedureHandler = Box<dyn Fn(Value) -> NetworkResult<Value> + Send + Sync>;

/// In-memory [`NetworkChannel`]: procedure handlers are closures, emitted
/// events are recorded, and tests inject inbound gossip directly.
#[derive(Default)]
pub struct LoopbackChannel {
    handlers: Mutex<HashMap<String, ProcedureHandler>>,
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<Value>>>>,
    emitted: Mutex<Vec<(String, Value)>>,
    module_state: Mutex<Value>,
}

impl LoopbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `procedure` with the supplied closure.
    pub fn handle<F>(&self, procedure: &str, handler: F)
    where
        F: Fn(Value) -> NetworkResult<Value> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("loopback poisoned")
            .insert(procedure.to_string(), Box::new(handler));
    }

    /// Deliver an inbound gossip event to every subscriber.
    pub async fn inject(&self, event: &str, payload: Value) {
        let senders = {
            let subscribers = self.subscribers.lock().expect("loopback poisoned");
            subscribers.get(event).cloned().unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(payload.clone()).await;
        }
    }

    /// Everything emitted so far, in order.
    pub fn emitted(&self) -> Vec<(String, Value)> {
        self.emitted.lock().expect("loopback poisoned").clone()
    }

    /// Count of emissions for one event name.
    pub fn emitted_count(&self, event: &str) -> usize {
        self.emitted
            .lock()
            .expect("loopback poisoned")
            .iter()
            .filter(|(name, _)| name == event)
            .count()
    }

    pub fn module_state(&self) -> Value {
        self.module_state.lock().expect("loopback poisoned").clone()
    }
}

#[async_trait]
impl NetworkChannel for LoopbackChannel {
    async fn request(
        &self,
        procedure: &str,
        data: Value,
        _capability: Option<&str>,
    ) -> NetworkResult<Value> {
        let handlers = self.handlers.lock().expect("loopback poisoned");
        match handlers.get(procedure) {
            Some(handler) => handler(data),
            None => Err(NetworkError::NoPeer {
                procedure: procedure.to_string(),
            }),
        }
    }

    async fn emit(&self, event: &str, data: Value, _peer_limit: Option<usize>) -> NetworkResult<()> {
        self.emitted
            .lock()
            .expect("loopback poisoned")
            .push((event.to_string(), data));
        Ok(())
    }

    async fn subscribe(&self, event: &str) -> mpsc::Receiver<Value> {
        let (sender, receiver) = mpsc::channel(64);
        self.subscribers
            .lock()
            .expect("loopback poisoned")
            .entry(event.to_string())
            .or_default()
            .push(sender);
        receiver
    }

    async fn update_module_state(&self, state: Value) -> NetworkResult<()> {
        *self.module_state.lock().expect("loopback poisoned") = state;
        Ok(())
    }
}
