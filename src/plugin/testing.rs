use crate::core::Request;
use crate::plugin::{Capabilities, ExportContext, Plugin, PluginError, WatchContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Fake plugin for testing
///
/// Exports the key name as its value unless a response was configured.
pub struct FakePlugin {
    name: String,
    capabilities: Capabilities,
    capacity: usize,
    period: u32,
    responses: Mutex<HashMap<String, Result<Option<String>, String>>>,
    delay: Mutex<Duration>,
    gate: Option<Arc<Semaphore>>,
    hang: AtomicBool,
    panic_on_export: AtomicBool,
    running: AtomicUsize,
    max_running: AtomicUsize,
    exports: AtomicUsize,
    collects: AtomicUsize,
    starts: AtomicUsize,
    stops: AtomicUsize,
    watches: Mutex<Vec<Vec<Request>>>,
    configured: Mutex<Vec<serde_json::Value>>,
    reject_options: AtomicBool,
}

impl FakePlugin {
    pub fn new(name: &str, capabilities: Capabilities) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            capacity: crate::plugin::DEFAULT_CAPACITY,
            period: 1,
            responses: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            gate: None,
            hang: AtomicBool::new(false),
            panic_on_export: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            exports: AtomicUsize::new(0),
            collects: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            watches: Mutex::new(Vec::new()),
            configured: Mutex::new(Vec::new()),
            reject_options: AtomicBool::new(false),
        }
    }

    /// A plain exporter.
    pub fn exporter(name: &str) -> Self {
        Self::new(name, Capabilities::EXPORTER)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_period(mut self, period: u32) -> Self {
        self.period = period;
        self
    }

    /// Exports block until [`FakePlugin::release`] hands out permits.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn set_value(&self, key: &str, value: Option<&str>) {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), Ok(value.map(str::to_string)));
    }

    pub fn set_error(&self, key: &str, error: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(key.to_string(), Err(error.to_string()));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Makes every following export never complete.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_export(&self) {
        self.panic_on_export.store(true, Ordering::SeqCst);
    }

    pub fn reject_options(&self) {
        self.reject_options.store(true, Ordering::SeqCst);
    }

    /// Lets `n` gated exports complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn collects(&self) -> usize {
        self.collects.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn watches(&self) -> Vec<Vec<Request>> {
        self.watches.lock().unwrap().clone()
    }

    pub fn configured(&self) -> Vec<serde_json::Value> {
        self.configured.lock().unwrap().clone()
    }
}

#[async_trait]
impl Plugin for FakePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn period(&self) -> u32 {
        self.period
    }

    async fn export(
        &self,
        key: &str,
        _params: &[String],
        _ctx: &ExportContext,
    ) -> Result<Option<String>, PluginError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if self.panic_on_export.load(Ordering::SeqCst) {
            self.running.fetch_sub(1, Ordering::SeqCst);
            panic!("fake plugin {} panicked on {}", self.name, key);
        }
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        match self.responses.lock().unwrap().get(key) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(e)) => Err(PluginError::Failed(e.clone())),
            None => Ok(Some(key.to_string())),
        }
    }

    async fn collect(&self) -> Result<(), PluginError> {
        self.collects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn watch(&self, requests: Vec<Request>, _ctx: WatchContext) {
        self.watches.lock().unwrap().push(requests);
    }

    fn configure(&self, options: &serde_json::Value) {
        self.configured.lock().unwrap().push(options.clone());
    }

    fn validate(&self, _options: &serde_json::Value) -> Result<(), PluginError> {
        if self.reject_options.load(Ordering::SeqCst) {
            return Err(PluginError::InvalidParameters("rejected by test".to_string()));
        }
        Ok(())
    }
}
