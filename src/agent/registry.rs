//! One loop controller per session.
//!
//! Each session gets its own [`PermissionAuthority`] and controller; nothing
//! mutable is shared between sessions. Services are shared since they are
//! keyed by session id on the far side.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::info;

use super::r#loop::{AgentLoopController, LoopServices};
use crate::config::Config;
use crate::error::Result;
use crate::security::{ApprovalNotifier, LogNotifier, PermissionAuthority};

/// Session id -> loop controller.
///
/// ```
/// use agentgate::agent::{LoopRegistry, LoopServices, RunStatus};
/// use agentgate::config::Config;
///
/// # tokio_test::block_on(async {
/// let registry = LoopRegistry::new(Config::default(), LoopServices::in_memory());
/// let controller = registry.get_or_create("session-1").await.unwrap();
/// controller.start_loop("build a todo app", None).await.unwrap();
/// assert_eq!(controller.status().await, RunStatus::Planning);
/// # })
/// ```
pub struct LoopRegistry {
    config: Config,
    services: LoopServices,
    notifier: Arc<dyn ApprovalNotifier>,
    loops: RwLock<HashMap<String, AgentLoopController>>,
}

impl LoopRegistry {
    pub fn new(config: Config, services: LoopServices) -> Self {
        Self {
            config,
            services,
            notifier: Arc::new(LogNotifier),
            loops: RwLock::new(HashMap::new()),
        }
    }

    /// Publish approval requests of every session to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Controller for `session_id`, created on first use.
    pub async fn get_or_create(&self, session_id: &str) -> Result<AgentLoopController> {
        if let Some(controller) = self.loops.read().await.get(session_id) {
            return Ok(controller.clone());
        }

        let mut loops = self.loops.write().await;
        if let Some(controller) = loops.get(session_id) {
            return Ok(controller.clone());
        }

        let authority = Arc::new(PermissionAuthority::with_notifier(
            &self.config.permissions,
            self.notifier.clone(),
        ));
        let controller =
            AgentLoopController::new(session_id, &self.config, authority, self.services.clone())?;
        loops.insert(session_id.to_string(), controller.clone());
        info!(session = session_id, "Loop controller created");
        Ok(controller)
    }

    pub async fn get(&self, session_id: &str) -> Option<AgentLoopController> {
        self.loops.read().await.get(session_id).cloned()
    }

    /// Clean up and forget a session's controller.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.loops.write().await.remove(session_id);
        match removed {
            Some(controller) => {
                controller.cleanup().await;
                true
            }
            None => false,
        }
    }

    pub async fn sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loops.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Clean up every controller concurrently and empty the registry.
    pub async fn cleanup_all(&self) -> usize {
        let controllers: Vec<AgentLoopController> =
            self.loops.write().await.drain().map(|(_, c)| c).collect();
        let count = controllers.len();
        join_all(controllers.iter().map(|c| c.cleanup())).await;
        count
    }
}
