// ABOUTME: Singleton port relay forwarding host ports to the active dev container
// ABOUTME: Forwarding rules are baked into the relay's startup command, so every change is a rebuild

use crate::containers::{
    ContainerSummary, CreateSpec, EngineError, HostSpec, PortBinding, Protocol,
};
use crate::error::{DevboxError, Result};
use crate::repository::{
    ContainerRepository, SingletonKind, LABEL_PROXY_PORTS, LABEL_PROXY_TARGET,
};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// No ports wanted and no relay existed
    Absent,
    /// No ports wanted; existing relays were removed
    Removed,
    Unchanged,
    Created(String),
    Replaced(String),
}

/// Sorted, deduplicated port set
pub fn normalize_ports(ports: &[u16]) -> Vec<u16> {
    let mut ports: Vec<u16> = ports.iter().copied().filter(|p| *p != 0).collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

pub fn ports_label(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Shell command running one TCP and one UDP forwarder per port
pub fn relay_command(ports: &[u16], target: &str) -> String {
    let mut rules = Vec::with_capacity(ports.len() * 2);
    for port in ports {
        rules.push(format!(
            "socat TCP-LISTEN:{port},fork,reuseaddr TCP:{target}:{port} &"
        ));
        rules.push(format!(
            "socat UDP-RECVFROM:{port},fork,reuseaddr UDP-SENDTO:{target}:{port} &"
        ));
    }
    rules.push("tail -f /dev/null".to_string());
    rules.join(" ")
}

pub struct RelayManager {
    repo: ContainerRepository,
    image: String,
    network: String,
}

impl RelayManager {
    pub fn new(repo: ContainerRepository, image: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            repo,
            image: image.into(),
            network: network.into(),
        }
    }

    fn matches(container: &ContainerSummary, ports: &str, target: &str) -> bool {
        container.state.is_running()
            && container.label(LABEL_PROXY_PORTS) == Some(ports)
            && container.label(LABEL_PROXY_TARGET) == Some(target)
    }

    async fn remove(&self, container: &ContainerSummary) -> Result<()> {
        let engine = self.repo.engine();
        engine
            .stop(&container.id, 0)
            .await
            .or_else(|e| match e {
                EngineError::NotFound(_) => Ok(()),
                other => Err(other),
            })
            .map_err(|e| DevboxError::Relay(format!("stop relay {}: {}", container.id, e)))?;
        engine
            .remove(&container.id, true)
            .await
            .map_err(|e| DevboxError::Relay(format!("remove relay {}: {}", container.id, e)))?;
        debug!("Removed relay {}", container.id);
        Ok(())
    }

    /// Make the relay forward exactly `desired` to `target`
    pub async fn sync(&self, desired: &[u16], target: Option<&str>) -> Result<RelayAction> {
        let desired = normalize_ports(desired);
        let existing = self
            .repo
            .find_singletons(SingletonKind::Relay)
            .await
            .map_err(|e| DevboxError::Relay(format!("list relays: {}", e)))?;

        if desired.is_empty() {
            if existing.is_empty() {
                return Ok(RelayAction::Absent);
            }
            for container in &existing {
                self.remove(container).await?;
            }
            info!("Removed port relay, no ports exposed");
            return Ok(RelayAction::Removed);
        }

        let target = target.ok_or_else(|| {
            DevboxError::Relay("dev container has no address on the relay network".into())
        })?;
        let label = ports_label(&desired);

        let keep = existing
            .iter()
            .position(|c| Self::matches(c, &label, target));

        for (i, container) in existing.iter().enumerate() {
            if Some(i) != keep {
                self.remove(container).await?;
            }
        }

        if keep.is_some() {
            debug!("Relay already forwards [{}] to {}", label, target);
            return Ok(RelayAction::Unchanged);
        }

        let engine = self.repo.engine();
        engine
            .ensure_image(&self.image)
            .await
            .map_err(|e| DevboxError::Relay(format!("pull relay image: {}", e)))?;

        let mut labels = ContainerRepository::singleton_labels(SingletonKind::Relay);
        labels.insert(LABEL_PROXY_PORTS.to_string(), label.clone());
        labels.insert(LABEL_PROXY_TARGET.to_string(), target.to_string());

        let port_bindings = desired
            .iter()
            .flat_map(|p| {
                [
                    PortBinding::same(*p, Protocol::Tcp),
                    PortBinding::same(*p, Protocol::Udp),
                ]
            })
            .collect();

        let spec = CreateSpec {
            image: self.image.clone(),
            entrypoint: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                relay_command(&desired, target),
            ]),
            labels,
            host: HostSpec {
                network_mode: Some(self.network.clone()),
                port_bindings,
                ..Default::default()
            },
            ..Default::default()
        };

        let id = engine
            .create(&spec)
            .await
            .map_err(|e| DevboxError::Relay(format!("create relay: {}", e)))?;
        engine
            .start(&id)
            .await
            .map_err(|e| DevboxError::Relay(format!("start relay: {}", e)))?;

        info!("Port relay forwarding [{}] to {}", label, target);
        if existing.is_empty() {
            Ok(RelayAction::Created(id))
        } else {
            Ok(RelayAction::Replaced(id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_ports() {
        assert_eq!(normalize_ports(&[8080, 3000, 8080, 0]), vec![3000, 8080]);
        assert!(normalize_ports(&[]).is_empty());
        assert_eq!(ports_label(&[3000, 8080]), "3000,8080");
    }

    #[test]
    fn test_relay_command_has_tcp_and_udp_rule_per_port() {
        let cmd = relay_command(&[3000, 8080], "172.18.0.2");
        assert_eq!(cmd.matches("socat ").count(), 4);
        assert!(cmd.contains("TCP-LISTEN:3000,fork,reuseaddr TCP:172.18.0.2:3000"));
        assert!(cmd.contains("UDP-RECVFROM:8080,fork,reuseaddr UDP-SENDTO:172.18.0.2:8080"));
        assert!(cmd.ends_with("tail -f /dev/null"));
    }
}
