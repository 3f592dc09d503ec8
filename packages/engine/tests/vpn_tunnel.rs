// ABOUTME: Integration tests for the singleton WireGuard tunnel and the account VPN cache
// ABOUTME: Exercises digest-based replacement and the device creation flow against fakes

mod common;

use common::{wireguard_b64, FakeEngine, FakeService};
use klbox_engine::containers::ContainerState;
use klbox_engine::repository::{LABEL_VPN, LABEL_VPN_SUM};
use klbox_engine::vpn::config_digest;
use klbox_engine::{ContainerRepository, VpnAction, VpnConfigStore, VpnManager};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn vpn_manager(engine: &Arc<FakeEngine>) -> VpnManager {
    VpnManager::new(
        ContainerRepository::new(engine.clone()),
        "ghcr.io/kloudlite/hub/wireguard:latest",
    )
}

/// First sync creates a privileged host-network tunnel labeled with the config digest
#[tokio::test]
async fn test_creates_tunnel() {
    let engine = FakeEngine::new();
    let config = wireguard_b64("[Interface]\nPrivateKey = abc\n");

    let action = vpn_manager(&engine).sync(&config).await.unwrap();
    assert!(matches!(action, VpnAction::Created(_)));

    let tunnels = engine.with_label(LABEL_VPN);
    assert_eq!(tunnels.len(), 1);
    let tunnel = &tunnels[0];
    assert_eq!(tunnel.state, ContainerState::Running);
    assert_eq!(
        tunnel.label(LABEL_VPN_SUM),
        Some(config_digest(&config).as_str())
    );
    assert_eq!(tunnel.spec.host.network_mode.as_deref(), Some("host"));
    assert_eq!(tunnel.spec.host.cap_add, vec!["NET_ADMIN".to_string()]);
    assert!(tunnel.script().contains("wg-quick up wg0"));
}

/// Unchanged config leaves the running tunnel alone
#[tokio::test]
async fn test_same_config_is_unchanged() {
    let engine = FakeEngine::new();
    let vpn = vpn_manager(&engine);
    let config = wireguard_b64("[Interface]\n");

    vpn.sync(&config).await.unwrap();
    assert_eq!(vpn.sync(&config).await.unwrap(), VpnAction::Unchanged);
    assert_eq!(engine.counters.created.load(Ordering::SeqCst), 1);
}

/// A stopped tunnel with the right config is started, not rebuilt
#[tokio::test]
async fn test_stopped_tunnel_is_started() {
    let engine = FakeEngine::new();
    let vpn = vpn_manager(&engine);
    let config = wireguard_b64("[Interface]\n");

    let VpnAction::Created(id) = vpn.sync(&config).await.unwrap() else {
        panic!("expected a new tunnel");
    };
    engine.set_state(&id, ContainerState::Exited);

    assert_eq!(vpn.sync(&config).await.unwrap(), VpnAction::Started(id));
    assert_eq!(engine.counters.created.load(Ordering::SeqCst), 1);
}

/// A new config replaces the tunnel
#[tokio::test]
async fn test_changed_config_replaces_tunnel() {
    let engine = FakeEngine::new();
    let vpn = vpn_manager(&engine);

    vpn.sync(&wireguard_b64("[Interface]\nAddress = 10.0.0.1\n"))
        .await
        .unwrap();
    let next = wireguard_b64("[Interface]\nAddress = 10.0.0.2\n");
    let action = vpn.sync(&next).await.unwrap();

    assert!(matches!(action, VpnAction::Replaced(_)));
    let tunnels = engine.with_label(LABEL_VPN);
    assert_eq!(tunnels.len(), 1);
    assert_eq!(
        tunnels[0].label(LABEL_VPN_SUM),
        Some(config_digest(&next).as_str())
    );
}

/// Configs that are not base64 never reach a container
#[tokio::test]
async fn test_rejects_invalid_config() {
    let engine = FakeEngine::new();
    let err = vpn_manager(&engine).sync("not base64 $(reboot)").await.unwrap_err();
    assert_eq!(err.stage(), "tunnel");
    assert!(engine.containers().is_empty());
}

/// The device is created once and then served from the cache
#[tokio::test]
async fn test_config_store_creates_device_once() {
    let dir = TempDir::new().unwrap();
    let store = VpnConfigStore::new(dir.path());
    let service = FakeService::new();

    let first = store.get_or_fetch("acme", service.as_ref()).await.unwrap();
    let second = store.get_or_fetch("acme", service.as_ref()).await.unwrap();

    assert_eq!(first, second);
    assert!(!first.device_name.is_empty());
    assert_eq!(service.devices_created.load(Ordering::SeqCst), 1);
    assert!(store.path_for("acme").exists());
}

/// A cached device without a config is fetched, not recreated
#[tokio::test]
async fn test_config_store_refetches_known_device() {
    let dir = TempDir::new().unwrap();
    let store = VpnConfigStore::new(dir.path());
    std::fs::write(store.path_for("acme"), r#"{"wg":"","device":"laptop"}"#).unwrap();
    let service = FakeService::new();

    let config = store.get_or_fetch("acme", service.as_ref()).await.unwrap();

    assert_eq!(config.device_name, "laptop");
    assert!(!config.wireguard_config.is_empty());
    assert_eq!(service.devices_created.load(Ordering::SeqCst), 0);
}
