//! Validate command handler.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use agentgate::security::{ApprovalEvent, ChannelNotifier, PermissionAuthority, PermissionLevel};
use agentgate::validation::{ValidationContext, ValidationPipeline, ValidationRequest};

use super::common::{load_config, read_json};

/// Run one request through the pipeline and print every gate.
pub(crate) async fn cmd_validate(
    request: PathBuf,
    level: Option<String>,
    approve: bool,
    json: bool,
) -> Result<()> {
    let config = load_config()?;
    let request: ValidationRequest = read_json(&request)?;

    let authority = if approve {
        let (notifier, mut rx) = ChannelNotifier::new();
        let authority = Arc::new(PermissionAuthority::with_notifier(
            &config.permissions,
            Arc::new(notifier),
        ));
        let approver = Arc::downgrade(&authority);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let ApprovalEvent::Requested(pending) = event else {
                    continue;
                };
                let Some(authority) = approver.upgrade() else {
                    break;
                };
                authority.approve_request(&pending.id, true);
            }
        });
        authority
    } else {
        Arc::new(PermissionAuthority::new(&config.permissions))
    };

    if let Some(level) = level {
        let level: PermissionLevel = level.parse()?;
        authority.set_level(level);
    }

    let pipeline = ValidationPipeline::new(authority, &config.validation)
        .context("Failed to build validation pipeline")?;
    let outcome = pipeline.validate(&request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_gates(&outcome);
    }

    if let Some(failed) = outcome.failure() {
        bail!("Validation failed at {}", failed.phase);
    }
    Ok(())
}

fn print_gates(outcome: &ValidationContext) {
    for result in &outcome.results {
        let mark = if result.passed { "PASS" } else { "FAIL" };
        match &result.reason {
            Some(reason) => println!(
                "[{}] {} ({}ms): {}",
                mark, result.phase, result.duration_ms, reason
            ),
            None => println!("[{}] {} ({}ms)", mark, result.phase, result.duration_ms),
        }
    }
    println!("Total: {}ms", outcome.total_duration_ms);
}
