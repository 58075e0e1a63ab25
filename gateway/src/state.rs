//! Shared application state for the HTTP and WebSocket hosts.
//!
//! [`AppState`] holds the server configuration, the transport connector used
//! to open Nova Sonic streams, the tool registry and the explicit
//! [`SessionRegistry`] of live WebSocket sessions.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::core::sonic::{BedrockConnector, StreamManager, TransportConnector};
use crate::core::tools::ToolRegistry;

/// Errors raised when registering a session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session '{0}' already exists")]
    Duplicate(String),
    #[error("Maximum concurrent sessions reached ({0})")]
    Full(usize),
}

/// A registered session.
#[derive(Clone)]
pub struct SessionEntry {
    pub manager: Arc<StreamManager>,
    pub created_at: Instant,
}

/// Summary of a registered session, as returned by `GET /sessions`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionInfo {
    pub client_id: String,
    pub voice: String,
    pub active: bool,
    pub age_secs: u64,
}

/// Live sessions keyed by client id.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    /// Registered sessions plus inserts in flight; the limit is checked here
    reserved: AtomicUsize,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Register a session, rejecting duplicates and enforcing the session limit.
    pub fn insert(
        &self,
        client_id: &str,
        manager: Arc<StreamManager>,
    ) -> Result<(), RegistryError> {
        let max = self.max_sessions.unwrap_or(usize::MAX);
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .map_err(|_| RegistryError::Full(max))?;

        match self.sessions.entry(client_id.to_string()) {
            Entry::Occupied(_) => {
                self.reserved.fetch_sub(1, Ordering::SeqCst);
                return Err(RegistryError::Duplicate(client_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(SessionEntry {
                    manager,
                    created_at: Instant::now(),
                });
            }
        }
        info!(client_id = %client_id, total = self.sessions.len(), "Session registered");
        Ok(())
    }

    /// Unregister a session. Returns the entry if it was present.
    pub fn remove(&self, client_id: &str) -> Option<SessionEntry> {
        let removed = self.sessions.remove(client_id).map(|(_, entry)| entry);
        if removed.is_some() {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
            debug!(client_id = %client_id, "Session unregistered");
        }
        removed
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<StreamManager>> {
        self.sessions
            .get(client_id)
            .map(|entry| entry.manager.clone())
    }

    /// Snapshot of all sessions, sorted by client id.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                client_id: entry.key().clone(),
                voice: entry.manager.voice().to_string(),
                active: entry.manager.is_active(),
                age_secs: entry.created_at.elapsed().as_secs(),
            })
            .collect();
        sessions.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Application state shared by all handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub connector: Arc<dyn TransportConnector>,
    pub tools: Arc<ToolRegistry>,
    pub sessions: SessionRegistry,
}

impl AppState {
    /// Build the state for a server talking to Bedrock.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, Box<dyn std::error::Error>> {
        let connector: Arc<dyn TransportConnector> =
            Arc::new(BedrockConnector::new(config.aws_credentials()));
        let tools = Arc::new(ToolRegistry::from_settings(&config.tools)?);
        Ok(Self::with_parts(config, connector, tools))
    }

    /// Build the state from explicit parts.
    pub fn with_parts(
        config: ServerConfig,
        connector: Arc<dyn TransportConnector>,
        tools: Arc<ToolRegistry>,
    ) -> Arc<Self> {
        let sessions = SessionRegistry::new(config.max_sessions);
        Arc::new(Self {
            config,
            connector,
            tools,
            sessions,
        })
    }

    /// Create a manager for a new session using the server's defaults.
    pub fn new_session(&self) -> Arc<StreamManager> {
        Arc::new(StreamManager::new(
            self.config.sonic.clone(),
            self.connector.clone(),
            self.tools.clone(),
        ))
    }
}
