// ABOUTME: Human readable rendering of start reports, box listings and engine errors
// ABOUTME: Pure functions returning strings and tables so they can be tested without a terminal

use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use klbox_engine::{
    BoxInfo, ContainerAction, DevboxError, RecordSync, RelayAction, StartReport, StopOutcome,
    VpnAction,
};

pub fn start_summary(report: &StartReport) -> Vec<String> {
    let mut lines = Vec::new();

    for id in &report.stopped_others {
        lines.push(format!("stopped devbox {}", short_id(id)));
    }

    lines.push(match report.action {
        ContainerAction::AlreadyRunning => "devbox already running".to_string(),
        ContainerAction::Started => "devbox started".to_string(),
        ContainerAction::Created => "devbox created and started".to_string(),
    });

    match report.record {
        RecordSync::DeclarationChanged | RecordSync::ValuesChanged
            if report.action == ContainerAction::AlreadyRunning =>
        {
            lines.push("environment changed, run `kl box restart` to apply it".to_string())
        }
        _ => {}
    }

    match &report.relay {
        RelayAction::Created(_) | RelayAction::Replaced(_) => {
            lines.push("port relay updated".to_string())
        }
        RelayAction::Removed => lines.push("port relay removed".to_string()),
        RelayAction::Absent | RelayAction::Unchanged => {}
    }

    match &report.vpn {
        Some(VpnAction::Created(_)) | Some(VpnAction::Replaced(_)) => {
            lines.push("vpn tunnel connected".to_string())
        }
        Some(VpnAction::Started(_)) => lines.push("vpn tunnel restarted".to_string()),
        Some(VpnAction::Unchanged) | None => {}
    }

    lines.push(format!("connect with: {}", report.ssh_command));
    lines
}

pub fn stop_summary(outcome: &StopOutcome) -> String {
    match outcome {
        StopOutcome::Absent => "no devbox for this workspace".to_string(),
        StopOutcome::Stopped(id) => format!("devbox {} stopped", short_id(id)),
        StopOutcome::Removed(id) => format!("devbox {} removed", short_id(id)),
    }
}

pub fn reload_summary(outcome: RecordSync) -> &'static str {
    match outcome {
        RecordSync::Created => "environment recorded",
        RecordSync::DeclarationChanged => "kl.yml changed, environment updated",
        RecordSync::ValuesChanged => "environment values changed, record updated",
        RecordSync::Unchanged => "environment is up to date",
    }
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

pub fn box_table(boxes: &[BoxInfo]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["Name", "State", "Workspace", "SSH Port"]);

    for info in boxes {
        table.add_row(vec![
            info.name.clone(),
            info.state.to_string(),
            info.path.clone(),
            info.ssh_port.map(|p| p.to_string()).unwrap_or_default(),
        ]);
    }

    table
}

pub fn box_details(info: &BoxInfo) -> Vec<String> {
    let mut lines = vec![
        format!("{:<12} {}", "Name:".cyan(), info.name),
        format!("{:<12} {}", "State:".cyan(), info.state),
        format!("{:<12} {}", "Workspace:".cyan(), info.path),
    ];
    if let Some(port) = info.ssh_port {
        lines.push(format!("{:<12} {}", "SSH Port:".cyan(), port));
    }
    if let Some(command) = &info.ssh_command {
        lines.push(format!("{:<12} {}", "Connect:".cyan(), command));
    }
    lines
}

/// Error message plus the boot output tail for readiness failures
pub fn describe_error(err: &DevboxError) -> Vec<String> {
    let mut lines = vec![format!("[{}] {}", err.stage(), err)];
    if let DevboxError::Readiness { diagnostics, .. } = err {
        if !diagnostics.is_empty() {
            lines.push("last output from the dev container:".to_string());
            lines.extend(diagnostics.iter().map(|l| format!("  {}", l)));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use klbox_engine::ReadinessOutcome;
    use klbox_engine::ContainerState;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn report(action: ContainerAction, record: RecordSync) -> StartReport {
        StartReport {
            container_id: "0123456789abcdef".to_string(),
            action,
            record,
            record_path: PathBuf::from("/tmp/box-hash/hash-x"),
            relay: RelayAction::Absent,
            vpn: None,
            ssh_port: 2222,
            ssh_command: "ssh kl@app.local.khost.dev -p 2222 -oStrictHostKeyChecking=no"
                .to_string(),
            stopped_others: vec![],
        }
    }

    #[test]
    fn test_start_summary_for_new_box() {
        let lines = start_summary(&report(ContainerAction::Created, RecordSync::Created));
        assert_eq!(
            lines,
            vec![
                "devbox created and started".to_string(),
                "connect with: ssh kl@app.local.khost.dev -p 2222 -oStrictHostKeyChecking=no"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn test_start_summary_hints_restart_on_drift() {
        let lines = start_summary(&report(
            ContainerAction::AlreadyRunning,
            RecordSync::ValuesChanged,
        ));
        assert!(lines.iter().any(|l| l.contains("kl box restart")));
    }

    #[test]
    fn test_stop_summary_shortens_ids() {
        assert_eq!(
            stop_summary(&StopOutcome::Stopped("0123456789abcdef".into())),
            "devbox 0123456789ab stopped"
        );
        assert_eq!(stop_summary(&StopOutcome::Absent), "no devbox for this workspace");
    }

    #[test]
    fn test_box_table_has_row_per_box() {
        let boxes = vec![BoxInfo {
            id: "c1".to_string(),
            name: "kl-1a2b3c4d".to_string(),
            state: ContainerState::Running,
            path: "/home/dev/app".to_string(),
            ssh_port: Some(2222),
            ssh_command: None,
        }];
        let rendered = box_table(&boxes).to_string();
        assert!(rendered.contains("kl-1a2b3c4d"));
        assert!(rendered.contains("/home/dev/app"));
        assert!(rendered.contains("2222"));
    }

    #[test]
    fn test_readiness_error_includes_diagnostics() {
        let err = DevboxError::Readiness {
            outcome: ReadinessOutcome::Crashed,
            diagnostics: vec!["[stderr] nix: package not found".to_string()],
        };
        let lines = describe_error(&err);
        assert!(lines[0].starts_with("[readiness]"));
        assert_eq!(lines[2], "  [stderr] nix: package not found");
    }
}
