//! Replay command handler.
//!
//! Drives an in-memory loop controller with recorded decisions, one JSON
//! object per line, and prints the controller's answer to each.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;

use agentgate::agent::{AgentLoopController, Decision, LoopAction, LoopServices};
use agentgate::security::PermissionAuthority;

use super::common::{load_config, read_text};

pub(crate) async fn cmd_replay(
    decisions: PathBuf,
    approve_all: bool,
    prompt: Option<String>,
) -> Result<()> {
    let config = load_config()?;
    let content = read_text(&decisions)?;

    let session_id = format!("replay-{}", uuid::Uuid::new_v4());
    let authority = Arc::new(PermissionAuthority::new(&config.permissions));
    let controller =
        AgentLoopController::new(&session_id, &config, authority, LoopServices::in_memory())
            .context("Failed to build loop controller")?;

    let prompt = prompt.unwrap_or_else(|| format!("replay of {}", decisions.display()));
    let info = controller.start_loop(&prompt, None).await?;
    println!("{}", serde_json::to_string(&json!({ "run": info }))?);

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = index + 1;

        let decision: Decision = match serde_json::from_str(line) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("line {}: invalid decision: {}", line_no, e);
                continue;
            }
        };

        let action = match controller.process_decision(decision).await {
            Ok(action) => action,
            Err(e) => {
                eprintln!("line {}: {}", line_no, e);
                continue;
            }
        };
        println!("{}", serde_json::to_string(&action)?);

        follow_up(&controller, &action, approve_all, line_no).await;
    }

    let stats = controller.stats().await;
    println!("{}", serde_json::to_string(&json!({ "stats": stats }))?);
    controller.cleanup().await;
    Ok(())
}

/// Act on the controller's answer the way a driver would: approve when asked
/// to, and report every tool it was told to execute as successful.
async fn follow_up(
    controller: &AgentLoopController,
    action: &LoopAction,
    approve_all: bool,
    line_no: usize,
) {
    match action {
        LoopAction::WaitApproval { decision_id, .. } if approve_all => {
            match controller.approve_tool(decision_id, Some("replay")).await {
                Ok(true) => {
                    println!(
                        "{}",
                        json!({ "approved": decision_id, "status": controller.status().await })
                    );
                    report_success(controller, decision_id, line_no).await;
                }
                Ok(false) => eprintln!("line {}: approval of {} had no effect", line_no, decision_id),
                Err(e) => eprintln!("line {}: {}", line_no, e),
            }
        }
        LoopAction::Execute { decision_id, .. } => {
            report_success(controller, decision_id, line_no).await;
        }
        _ => {}
    }
}

async fn report_success(controller: &AgentLoopController, decision_id: &str, line_no: usize) {
    if let Err(e) = controller.tool_result(decision_id, true).await {
        eprintln!("line {}: {}", line_no, e);
    }
}
