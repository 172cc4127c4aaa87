//! Docker-backed sandbox using the bollard client.
//!
//! The container runs the agent server image with the workspace
//! bind-mounted at `/workspace` and the service port mapped to a claimed
//! host port. Readiness is gated on an HTTP health check; teardown is
//! idempotent and treats an already-removed container as success.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::service::{DeviceRequest, HostConfig, PortBinding};
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use super::error::SandboxError;
use super::ports::{unique_container_name, PortAllocator};
use super::{ExecOutput, Sandbox, SandboxFactory, SandboxSpec};

/// Container-side service port; mapped to the claimed host port.
const SERVICE_PORT: u16 = 8000;
/// Mount point of the workspace inside the container.
const WORKSPACE_MOUNT: &str = "/workspace";
/// Interval between health probes.
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Creates [`DockerSandbox`] instances sharing one port allocator.
pub struct DockerEngine {
    ports: Arc<PortAllocator>,
    health_timeout: Duration,
}

impl DockerEngine {
    pub fn new(ports: Arc<PortAllocator>, health_timeout: Duration) -> Self {
        Self {
            ports,
            health_timeout,
        }
    }
}

impl SandboxFactory for DockerEngine {
    fn create(&self, spec: SandboxSpec) -> Box<dyn Sandbox> {
        Box::new(DockerSandbox::new(
            spec,
            Arc::clone(&self.ports),
            self.health_timeout,
        ))
    }
}

/// A single containerized execution environment.
pub struct DockerSandbox {
    spec: SandboxSpec,
    ports: Arc<PortAllocator>,
    health_timeout: Duration,
    running: Option<RunningContainer>,
}

struct RunningContainer {
    docker: Docker,
    name: String,
    host_port: u16,
    extra_ports: u16,
    logs_task: Option<tokio::task::JoinHandle<()>>,
}

impl DockerSandbox {
    pub fn new(spec: SandboxSpec, ports: Arc<PortAllocator>, health_timeout: Duration) -> Self {
        Self {
            spec,
            ports,
            health_timeout,
            running: None,
        }
    }

    async fn start_inner(
        &self,
        host_port: u16,
        extra_ports: u16,
    ) -> Result<RunningContainer, SandboxError> {
        // Engine reachability is checked before any container work so a
        // stopped daemon reads differently from a port conflict.
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::engine_unavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::engine_unavailable(e.to_string()))?;

        let name = unique_container_name("proctor-sandbox");
        let config = build_container_config(&self.spec, host_port, extra_ports)?;

        debug!(container = %name, image = %self.spec.image, host_port, "creating container");
        docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: Some(self.spec.platform.as_engine_str().to_string()),
                }),
                config,
            )
            .await
            .map_err(|e| SandboxError::container_start(e.to_string()))?;

        if let Err(e) = docker.start_container::<String>(&name, None).await {
            let _ = remove_container(&docker, &name).await;
            return Err(SandboxError::container_start(e.to_string()));
        }
        info!(container = %name, host_port, "container started");

        // Best-effort log streaming; failures here never abort the sandbox.
        let logs_task = Some(spawn_log_stream(docker.clone(), name.clone()));

        if let Err(e) = wait_for_health(host_port, self.health_timeout).await {
            // No dangling container on a failed health check.
            if let Err(remove_err) = remove_container(&docker, &name).await {
                warn!(container = %name, error = %remove_err, "failed to remove unhealthy container");
            }
            if let Some(task) = logs_task {
                task.abort();
            }
            return Err(e);
        }
        info!(container = %name, "sandbox healthy at http://127.0.0.1:{host_port}");

        Ok(RunningContainer {
            docker,
            name,
            host_port,
            extra_ports,
            logs_task,
        })
    }

    fn require_running(&self) -> Result<&RunningContainer, SandboxError> {
        self.running.as_ref().ok_or(SandboxError::NotStarted)
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn start(&mut self) -> Result<(), SandboxError> {
        if self.running.is_some() {
            return Ok(());
        }

        let extra_ports = if self.spec.expose_aux_ports { 2 } else { 0 };
        let host_port = self.ports.claim(self.spec.host_port, extra_ports)?;

        match self.start_inner(host_port, extra_ports).await {
            Ok(running) => {
                self.running = Some(running);
                Ok(())
            }
            Err(e) => {
                self.ports.release(host_port, extra_ports);
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<(), SandboxError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };
        if let Some(task) = running.logs_task.take() {
            task.abort();
        }

        debug!(container = %running.name, "removing container");
        if let Err(e) = remove_container(&running.docker, &running.name).await {
            // Best-effort in the failure path: log, release resources,
            // and let the encompassing teardown proceed.
            warn!(container = %running.name, error = %e, "container removal failed");
        }
        self.ports.release(running.host_port, running.extra_ports);
        Ok(())
    }

    async fn execute(&self, command: &[String]) -> Result<ExecOutput, SandboxError> {
        let running = self.require_running()?;

        let exec = running
            .docker
            .create_exec(
                &running.name,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    working_dir: Some(WORKSPACE_MOUNT.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SandboxError::exec(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let StartExecResults::Attached {
            output: mut stream, ..
        } = running
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| SandboxError::exec(e.to_string()))?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => warn!("error reading exec output: {e}"),
                    _ => {}
                }
            }
        }

        let inspect = running
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::exec(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn read_file(&self, path: &Path) -> Result<String, SandboxError> {
        self.require_running()?;
        // The workspace is bind-mounted, so host-side io is equivalent.
        tokio::fs::read_to_string(self.spec.mount_dir.join(path))
            .await
            .map_err(|e| SandboxError::file_io(e.to_string()))
    }

    async fn write_file(&self, path: &Path, contents: &str) -> Result<(), SandboxError> {
        self.require_running()?;
        let target = self.spec.mount_dir.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SandboxError::file_io(e.to_string()))?;
        }
        tokio::fs::write(target, contents)
            .await
            .map_err(|e| SandboxError::file_io(e.to_string()))
    }
}

async fn remove_container(docker: &Docker, name: &str) -> Result<(), SandboxError> {
    match docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        Ok(()) => Ok(()),
        // Already gone counts as success; auto_remove races with us.
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(SandboxError::exec(e.to_string())),
    }
}

fn spawn_log_stream(docker: Docker, name: String) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = docker.logs(
            &name,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        while let Some(entry) = stream.next().await {
            match entry {
                Ok(line) => debug!(container = %name, "{}", line.to_string().trim_end()),
                Err(e) => {
                    debug!(container = %name, "log stream ended: {e}");
                    break;
                }
            }
        }
    })
}

/// Polls the service endpoint until it reports healthy or the timeout
/// elapses.
async fn wait_for_health(host_port: u16, timeout: Duration) -> Result<(), SandboxError> {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{host_port}/health");
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => return Ok(()),
            Ok(response) => debug!(%url, status = %response.status(), "health probe not ready"),
            Err(e) => debug!(%url, "health probe failed: {e}"),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(SandboxError::health_timeout(timeout));
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
}

fn build_container_config(
    spec: &SandboxSpec,
    host_port: u16,
    extra_ports: u16,
) -> Result<ContainerConfig<String>, SandboxError> {
    let mount_dir = spec.mount_dir.to_str().ok_or_else(|| {
        SandboxError::container_start(format!(
            "workspace path is not valid utf-8: {}",
            spec.mount_dir.display()
        ))
    })?;

    let mut binds = vec![format!("{mount_dir}:{WORKSPACE_MOUNT}:rw")];
    for (host, container) in &spec.extra_mounts {
        binds.push(format!("{host}:{container}"));
    }

    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for offset in 0..=extra_ports {
        let container_port = format!("{}/tcp", SERVICE_PORT + offset);
        exposed_ports.insert(container_port.clone(), HashMap::new());
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some((host_port + offset).to_string()),
            }]),
        );
    }

    let device_requests = spec.enable_gpu.then(|| {
        vec![DeviceRequest {
            driver: Some(String::new()),
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    let extra_hosts = spec
        .enable_host_gateway
        .then(|| vec!["host.docker.internal:host-gateway".to_string()]);

    Ok(ContainerConfig {
        image: Some(spec.image.clone()),
        cmd: Some(vec![
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            SERVICE_PORT.to_string(),
        ]),
        env: Some(collect_env(&spec.forward_env, &spec.extra_env)),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            auto_remove: Some(true),
            device_requests,
            extra_hosts,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Builds the container environment: allow-listed keys actually present
/// in the process environment (absent keys are skipped, not errored),
/// plus unconditional extras.
fn collect_env(
    forward: &[String],
    extra: &std::collections::BTreeMap<String, String>,
) -> Vec<String> {
    let mut env: Vec<String> = forward
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|value| format!("{key}={value}")))
        .collect();
    for (key, value) in extra {
        env.push(format!("{key}={value}"));
    }
    env
}
