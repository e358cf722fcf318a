//! Permissions command handler.

use anyhow::Result;

use agentgate::security::{PermissionAuthority, PermissionLevel};

use super::common::load_config;

/// Print scopes, effective methods and approval window per tier.
pub(crate) async fn cmd_permissions(level: Option<String>) -> Result<()> {
    let config = load_config()?;
    let authority = PermissionAuthority::new(&config.permissions);

    let levels: Vec<PermissionLevel> = match level {
        Some(level) => vec![level.parse()?],
        None => PermissionLevel::ALL.to_vec(),
    };

    println!("Session starts at: {}", authority.level());
    for level in levels {
        let policy = authority.policy(level);
        let scopes: Vec<&str> = PermissionLevel::ALL
            .iter()
            .filter(|l| **l <= level)
            .flat_map(|l| authority.policy(*l).allowed_scopes.iter())
            .map(|s| s.as_str())
            .fold(Vec::new(), |mut acc, s| {
                if !acc.contains(&s) {
                    acc.push(s);
                }
                acc
            });

        println!();
        println!("[{}]", level);
        println!("  Scopes:   {}", scopes.join(", "));
        println!("  Methods:  {}", authority.effective_methods(level).join(", "));
        match policy.approval_timeout() {
            Some(timeout) => println!("  Approval: required ({}s)", timeout.as_secs()),
            None => println!("  Approval: not required"),
        }
    }
    Ok(())
}
