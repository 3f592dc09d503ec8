// ABOUTME: Docker implementation of the container engine contract
// ABOUTME: Uses bollard to manage dev, relay and VPN containers plus their volumes, networks and images

use super::{
    ContainerEngine, ContainerState, ContainerSummary, CreateSpec, EngineError, EngineResult,
    ExecSession, LabelSelector, LineStream, LogOptions, LogStream,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
        RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, PortBinding as DockerPortBinding},
    network::{CreateNetworkOptions, ListNetworksOptions},
    volume::{CreateVolumeOptions, ListVolumesOptions},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Connect to the local daemon and verify it answers
    pub async fn connect() -> EngineResult<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| EngineError::Connection(e.to_string()))?;

        client.ping().await.map_err(|e| {
            EngineError::Connection(format!("docker daemon is not reachable: {}", e))
        })?;

        Ok(Self { client })
    }

    fn to_bollard_config(spec: &CreateSpec) -> Config<String> {
        let mut exposed_ports = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = HashMap::new();

        for binding in &spec.host.port_bindings {
            let key = binding.key();
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(DockerPortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(binding.host_port.to_string()),
                });
        }

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            binds: non_empty(spec.host.binds.clone()),
            cap_add: non_empty(spec.host.cap_add.clone()),
            network_mode: spec.host.network_mode.clone(),
            port_bindings: if port_bindings.is_empty() {
                None
            } else {
                Some(port_bindings)
            },
            privileged: Some(spec.host.privileged),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            entrypoint: spec.entrypoint.clone(),
            cmd: spec.command.clone(),
            env: non_empty(env),
            labels: Some(spec.labels.clone()),
            hostname: spec.hostname.clone(),
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    fn label_filters(selectors: &[LabelSelector]) -> HashMap<String, Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            selectors.iter().map(LabelSelector::to_filter).collect(),
        );
        filters
    }

    fn convert_summary(summary: bollard::models::ContainerSummary) -> ContainerSummary {
        let networks = summary
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.ip_address.unwrap_or_default()))
            .collect();

        ContainerSummary {
            id: summary.id.unwrap_or_default(),
            names: summary.names.unwrap_or_default(),
            state: ContainerState::from_engine(summary.state.as_deref().unwrap_or("unknown")),
            labels: summary.labels.unwrap_or_default(),
            networks,
        }
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(err, BollardError::DockerResponseServerError { status_code, .. } if *status_code == code)
}

fn output_bytes(output: LogOutput) -> Option<Vec<u8>> {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => Some(message.to_vec()),
        LogOutput::StdIn { .. } => None,
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list(
        &self,
        selectors: &[LabelSelector],
        include_stopped: bool,
    ) -> EngineResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions {
            all: include_stopped,
            filters: Self::label_filters(selectors),
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| EngineError::Container(e.to_string()))?;

        Ok(containers.into_iter().map(Self::convert_summary).collect())
    }

    async fn create(&self, spec: &CreateSpec) -> EngineResult<String> {
        info!("Creating container from image {}", spec.image);

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let container = self
            .client
            .create_container(options, Self::to_bollard_config(spec))
            .await
            .map_err(|e| EngineError::Container(e.to_string()))?;

        debug!("Created container: {}", container.id);
        Ok(container.id)
    }

    async fn start(&self, container_id: &str) -> EngineResult<()> {
        info!("Starting container: {}", container_id);

        match self
            .client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already started
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(container_id.to_string())),
            Err(e) => Err(EngineError::Container(e.to_string())),
        }
    }

    async fn stop(&self, container_id: &str, timeout_secs: i64) -> EngineResult<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions { t: timeout_secs };

        match self.client.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(EngineError::NotFound(container_id.to_string())),
            Err(e) => Err(EngineError::Container(e.to_string())),
        }
    }

    async fn remove(&self, container_id: &str, force: bool) -> EngineResult<()> {
        info!("Removing container: {} (force: {})", container_id, force);

        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };

        match self.client.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => {
                debug!("Container {} already removed", container_id);
                Ok(())
            }
            Err(e) => Err(EngineError::Container(e.to_string())),
        }
    }

    async fn exec(
        &self,
        container_id: &str,
        command: Vec<String>,
        tty: bool,
    ) -> EngineResult<ExecSession> {
        info!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(tty),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| EngineError::Exec(e.to_string()))?;

        let started = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| EngineError::Exec(e.to_string()))?;

        match started {
            StartExecResults::Attached { output, input } => {
                let output = output
                    .filter_map(|chunk| async move {
                        match chunk {
                            Ok(out) => output_bytes(out).map(Ok),
                            Err(e) => Some(Err(EngineError::Exec(e.to_string()))),
                        }
                    })
                    .boxed();

                Ok(ExecSession {
                    exec_id: exec.id,
                    output,
                    input,
                })
            }
            StartExecResults::Detached => Err(EngineError::Exec(
                "Exec was detached unexpectedly".to_string(),
            )),
        }
    }

    async fn exec_exit_code(&self, exec_id: &str) -> EngineResult<i64> {
        loop {
            let inspect = self
                .client
                .inspect_exec(exec_id)
                .await
                .map_err(|e| EngineError::Exec(e.to_string()))?;

            if !inspect.running.unwrap_or(false) {
                return Ok(inspect.exit_code.unwrap_or(0));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn log_lines(&self, container_id: &str, options: LogOptions) -> LineStream {
        let logs_options = LogsOptions::<String> {
            follow: options.follow,
            stdout: options.stream == LogStream::Stdout,
            stderr: options.stream == LogStream::Stderr,
            since: options.since.unwrap_or(0),
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut logs = self.client.logs(container_id, Some(logs_options));
        let container_id = container_id.to_string();

        Box::pin(async_stream::stream! {
            let mut pending: Vec<u8> = Vec::new();

            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(output) => {
                        let Some(bytes) = output_bytes(output) else {
                            continue;
                        };
                        pending.extend_from_slice(&bytes);

                        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                            let line: Vec<u8> = pending.drain(..=pos).collect();
                            yield Ok(String::from_utf8_lossy(&line)
                                .trim_end_matches(['\r', '\n'])
                                .to_string());
                        }
                    }
                    Err(e) => {
                        yield Err(EngineError::Logs(format!("{}: {}", container_id, e)));
                        break;
                    }
                }
            }

            if !pending.is_empty() {
                yield Ok(String::from_utf8_lossy(&pending).trim_end().to_string());
            }
        })
    }

    async fn ensure_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let existing = self
            .client
            .list_volumes(Some(ListVolumesOptions { filters }))
            .await
            .map_err(|e| EngineError::Volume(e.to_string()))?;

        let found = existing
            .volumes
            .unwrap_or_default()
            .iter()
            .any(|v| v.name == name);
        if found {
            return Ok(());
        }

        info!("Creating volume: {}", name);
        self.client
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                labels,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::Volume(e.to_string()))?;

        Ok(())
    }

    async fn ensure_network(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let existing = self
            .client
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        if existing
            .iter()
            .any(|n| n.name.as_deref() == Some(name))
        {
            return Ok(());
        }

        info!("Creating network: {}", name);
        self.client
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                labels,
                ..Default::default()
            })
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(())
    }

    async fn ensure_image(&self, image: &str) -> EngineResult<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(EngineError::Image(e.to_string())),
        }

        info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        let mut last_status = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = &info.status {
                        if status != &last_status {
                            debug!("Pull status: {}", status);
                            last_status = status.clone();
                        }
                    }
                    if let Some(error) = info.error {
                        return Err(EngineError::Image(format!(
                            "Failed to pull image {}: {}",
                            image, error
                        )));
                    }
                }
                Err(e) => {
                    return Err(EngineError::Image(format!(
                        "Failed to pull image {}: {}",
                        image, e
                    )));
                }
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{HostSpec, PortBinding, Protocol};
    use std::collections::BTreeMap;

    #[test]
    fn test_create_spec_conversion() {
        let spec = CreateSpec {
            name: Some("kl-0badf00d".to_string()),
            image: "ghcr.io/kloudlite/hub/socat:latest".to_string(),
            entrypoint: Some(vec!["sh".to_string(), "-c".to_string(), "true".to_string()]),
            env: BTreeMap::from([("SSH_PORT".to_string(), "2222".to_string())]),
            labels: HashMap::from([("kloudlite".to_string(), "true".to_string())]),
            host: HostSpec {
                port_bindings: vec![
                    PortBinding::same(8080, Protocol::Tcp),
                    PortBinding::same(8080, Protocol::Udp),
                ],
                network_mode: Some("kloudlite".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = DockerEngine::to_bollard_config(&spec);
        assert_eq!(config.env, Some(vec!["SSH_PORT=2222".to_string()]));

        let exposed = config.exposed_ports.expect("exposed ports");
        assert!(exposed.contains_key("8080/tcp"));
        assert!(exposed.contains_key("8080/udp"));

        let host = config.host_config.expect("host config");
        assert_eq!(host.network_mode.as_deref(), Some("kloudlite"));
        assert!(host.binds.is_none());
        let bindings = host.port_bindings.expect("port bindings");
        let tcp = bindings["8080/tcp"].as_ref().expect("tcp binding");
        assert_eq!(tcp[0].host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn test_label_filters() {
        let filters = DockerEngine::label_filters(&[
            LabelSelector::flag("kloudlite"),
            LabelSelector::flag("proxy"),
        ]);
        assert_eq!(
            filters["label"],
            vec!["kloudlite=true".to_string(), "proxy=true".to_string()]
        );
    }

    #[tokio::test]
    #[ignore] // Requires Docker to be running
    async fn test_connect_docker() {
        let engine = DockerEngine::connect().await;
        assert!(engine.is_ok());
    }
}
