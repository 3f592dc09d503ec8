// ABOUTME: SSH key material mounted into dev containers
// ABOUTME: Generates the user's RSA key when missing and assembles the authorized_keys file

use crate::error::{DevboxError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::info;

async fn ensure_key_pair(ssh_dir: &Path) -> Result<PathBuf> {
    let private_key = ssh_dir.join("id_rsa");
    let public_key = ssh_dir.join("id_rsa.pub");
    if fs::try_exists(&public_key).await? {
        return Ok(public_key);
    }

    fs::create_dir_all(ssh_dir).await?;
    info!("Generating ssh key pair in {}", ssh_dir.display());

    let status = Command::new("ssh-keygen")
        .arg("-t")
        .arg("rsa")
        .arg("-b")
        .arg("4096")
        .arg("-N")
        .arg("")
        .arg("-f")
        .arg(&private_key)
        .status()
        .await
        .map_err(|e| DevboxError::Config(format!("failed to run ssh-keygen: {}", e)))?;

    if !status.success() {
        return Err(DevboxError::Config(format!(
            "ssh-keygen exited with {}",
            status
        )));
    }
    Ok(public_key)
}

/// Write `<out_dir>/authorized_keys` from the user's public key and existing authorized keys
pub async fn prepare_authorized_keys(ssh_dir: &Path, out_dir: &Path) -> Result<PathBuf> {
    let public_key = ensure_key_pair(ssh_dir).await?;

    let mut content = fs::read_to_string(&public_key).await?;
    if !content.ends_with('\n') {
        content.push('\n');
    }

    let existing = ssh_dir.join("authorized_keys");
    if fs::try_exists(&existing).await? {
        let extra = fs::read_to_string(&existing).await?;
        for line in extra.lines() {
            let line = line.trim();
            if !line.is_empty() && !content.contains(line) {
                content.push_str(line);
                content.push('\n');
            }
        }
    }

    fs::create_dir_all(out_dir).await?;
    let target = out_dir.join("authorized_keys");
    fs::write(&target, content).await?;
    Ok(target)
}

/// Command line a user runs to reach the dev container
pub fn ssh_command(domain: &str, port: u16) -> String {
    format!("ssh kl@{} -p {} -oStrictHostKeyChecking=no", domain, port)
}
