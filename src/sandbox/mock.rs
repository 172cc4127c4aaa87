//! Recording sandbox for tests.
//!
//! Claims real entries from a shared [`PortAllocator`], records every
//! start/stop with a timestamp, and can inject start or health failures,
//! letting tests pin resource-uniqueness and teardown-exactly-once
//! properties without a container engine.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::error::SandboxError;
use super::ports::{unique_container_name, PortAllocator};
use super::{ExecOutput, Sandbox, SandboxFactory, SandboxSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    /// Start succeeds and reports healthy.
    Healthy,
    /// Container creation itself fails.
    FailStart,
    /// Start claims resources, then the health check times out; the
    /// container must already be stopped when the error returns.
    FailHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEventKind {
    Started,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MockEvent {
    pub kind: MockEventKind,
    pub name: String,
    pub port: u16,
    pub at: Instant,
}

/// Shared event log across all sandboxes built by one engine.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<MockEvent>>>);

impl Recorder {
    fn record(&self, kind: MockEventKind, name: &str, port: u16) {
        self.0.lock().unwrap().push(MockEvent {
            kind,
            name: name.to_string(),
            port,
            at: Instant::now(),
        });
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.0.lock().unwrap().clone()
    }
}

/// Replays an event log and reports whether any port or container name
/// was ever held by two simultaneously-live sandboxes.
pub fn has_live_conflict(events: &[MockEvent]) -> bool {
    let mut live_ports = std::collections::HashSet::new();
    let mut live_names = std::collections::HashSet::new();
    for event in events {
        match event.kind {
            MockEventKind::Started => {
                if !live_ports.insert(event.port) || !live_names.insert(event.name.clone()) {
                    return true;
                }
            }
            MockEventKind::Stopped => {
                live_ports.remove(&event.port);
                live_names.remove(&event.name);
            }
        }
    }
    false
}

/// Builds [`MockSandbox`] instances sharing ports, recorder, and counters.
pub struct MockEngine {
    pub ports: Arc<PortAllocator>,
    pub recorder: Recorder,
    pub behavior: MockBehavior,
    /// Simulated container boot time.
    pub start_delay: Duration,
    start_count: Arc<AtomicUsize>,
    stop_count: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            ports: Arc::new(PortAllocator::new()),
            recorder: Recorder::default(),
            behavior,
            start_delay: Duration::ZERO,
            start_count: Arc::new(AtomicUsize::new(0)),
            stop_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Successful starts across all sandboxes.
    pub fn start_count(&self) -> usize {
        self.start_count.load(Ordering::SeqCst)
    }

    /// Stops of a live sandbox (idempotent re-stops are not counted).
    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

impl SandboxFactory for MockEngine {
    fn create(&self, spec: SandboxSpec) -> Box<dyn Sandbox> {
        Box::new(MockSandbox {
            spec,
            ports: Arc::clone(&self.ports),
            recorder: self.recorder.clone(),
            behavior: self.behavior,
            start_delay: self.start_delay,
            start_count: Arc::clone(&self.start_count),
            stop_count: Arc::clone(&self.stop_count),
            running: None,
        })
    }
}

pub struct MockSandbox {
    spec: SandboxSpec,
    ports: Arc<PortAllocator>,
    recorder: Recorder,
    behavior: MockBehavior,
    start_delay: Duration,
    start_count: Arc<AtomicUsize>,
    stop_count: Arc<AtomicUsize>,
    running: Option<(String, u16)>,
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&mut self) -> Result<(), SandboxError> {
        if self.running.is_some() {
            return Ok(());
        }
        if self.behavior == MockBehavior::FailStart {
            return Err(SandboxError::container_start("injected start failure"));
        }

        let port = self.ports.claim(self.spec.host_port, 0)?;
        let name = unique_container_name("proctor-sandbox");
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        self.recorder.record(MockEventKind::Started, &name, port);

        if self.behavior == MockBehavior::FailHealth {
            // Mirrors the docker backend: the container is removed
            // before the health error propagates.
            self.recorder.record(MockEventKind::Stopped, &name, port);
            self.ports.release(port, 0);
            self.stop_count.fetch_add(1, Ordering::SeqCst);
            return Err(SandboxError::health_timeout(Duration::from_secs(1)));
        }

        self.start_count.fetch_add(1, Ordering::SeqCst);
        self.running = Some((name, port));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        let Some((name, port)) = self.running.take() else {
            return Ok(());
        };
        self.recorder.record(MockEventKind::Stopped, &name, port);
        self.ports.release(port, 0);
        self.stop_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, command: &[String]) -> Result<ExecOutput, SandboxError> {
        if self.running.is_none() {
            return Err(SandboxError::NotStarted);
        }
        Ok(ExecOutput {
            exit_code: 0,
            stdout: format!("mock exec: {}", command.join(" ")),
            stderr: String::new(),
        })
    }

    async fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        tokio::fs::read_to_string(self.spec.mount_dir.join(path))
            .await
            .map_err(|e| SandboxError::file_io(e.to_string()))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError> {
        tokio::fs::write(self.spec.mount_dir.join(path), contents)
            .await
            .map_err(|e| SandboxError::file_io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_stop_records_events_once() {
        let engine = MockEngine::new(MockBehavior::Healthy);
        let mut sandbox = engine.create(SandboxSpec::new("img", "/tmp"));

        sandbox.start().await.unwrap();
        sandbox.stop().await.unwrap();
        sandbox.stop().await.unwrap(); // idempotent

        assert_eq!(engine.start_count(), 1);
        assert_eq!(engine.stop_count(), 1);
        let events = engine.recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, MockEventKind::Started);
        assert_eq!(events[1].kind, MockEventKind::Stopped);
        assert_eq!(engine.ports.claimed_count(), 0);
    }

    #[tokio::test]
    async fn fail_health_stops_before_error() {
        let engine = MockEngine::new(MockBehavior::FailHealth);
        let mut sandbox = engine.create(SandboxSpec::new("img", "/tmp"));

        let err = sandbox.start().await.unwrap_err();
        assert!(err.is_health_timeout());
        assert_eq!(engine.stop_count(), 1);
        assert_eq!(engine.ports.claimed_count(), 0);
    }

    #[test]
    fn replay_detects_concurrent_port_reuse() {
        let now = Instant::now();
        let event = |kind, name: &str, port| MockEvent {
            kind,
            name: name.to_string(),
            port,
            at: now,
        };

        let clean = vec![
            event(MockEventKind::Started, "a", 1),
            event(MockEventKind::Stopped, "a", 1),
            event(MockEventKind::Started, "b", 1),
            event(MockEventKind::Stopped, "b", 1),
        ];
        assert!(!has_live_conflict(&clean));

        let conflict = vec![
            event(MockEventKind::Started, "a", 1),
            event(MockEventKind::Started, "b", 1),
        ];
        assert!(has_live_conflict(&conflict));
    }
}
