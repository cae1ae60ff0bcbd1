#[cfg(feature = "database")]
use super::batch::{BatchConfig, BatchWriter};
#[cfg(feature = "metrics")]
use super::metrics::SessionMetrics;
#[cfg(feature = "database")]
use super::store::SessionStore;
use super::types::{
    AclDecisionStats, ConnectionInfo, DestinationStat, Session, SessionStats,
    SessionStatus, UserSessionStat,
};
use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory session tracker built on top of DashMap.
#[derive(Debug)]
pub struct SessionManager {
    active_sessions: DashMap<Uuid, Arc<RwLock<Session>>>,
    closed_sessions: Mutex<Vec<Session>>,
    rejected_sessions: Mutex<Vec<Session>>,
    #[cfg(feature = "database")]
    store: Option<Arc<SessionStore>>,
    #[cfg(feature = "database")]
    batch_writer: Option<Arc<BatchWriter>>,
}

impl SessionManager {
    /// Create a new empty manager.
    pub fn new() -> Self {
        Self {
            active_sessions: DashMap::new(),
            closed_sessions: Mutex::new(Vec::new()),
            rejected_sessions: Mutex::new(Vec::new()),
            #[cfg(feature = "database")]
            store: None,
            #[cfg(feature = "database")]
            batch_writer: None,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_store(store: Arc<SessionStore>, batch_config: BatchConfig) -> Self {
        let mut manager = Self::new();
        manager.set_store(store, batch_config);
        manager
    }

    #[cfg(feature = "database")]
    pub fn set_store(&mut self, store: Arc<SessionStore>, batch_config: BatchConfig) {
        let writer = BatchWriter::new(store.clone(), batch_config);
        writer.start();

        self.store = Some(store);
        self.batch_writer = Some(writer);
    }

    /// Start tracking a freshly accepted session.
    pub async fn new_session(
        &self,
        user: &str,
        connection: ConnectionInfo,
        acl_decision: impl Into<String>,
        acl_rule_matched: Option<String>,
    ) -> Uuid {
        let mut session =
            Session::new(user.to_string(), connection, acl_decision, acl_rule_matched);
        session.status = SessionStatus::Active;

        let session_id = session.session_id;

        #[cfg(feature = "metrics")]
        SessionMetrics::record_session_start(&session.user);

        #[cfg(feature = "database")]
        if let Some(writer) = &self.batch_writer {
            writer.enqueue(session.clone()).await;
        }

        self.active_sessions
            .insert(session_id, Arc::new(RwLock::new(session)));

        session_id
    }

    #[cfg(feature = "database")]
    pub async fn shutdown(&self) {
        if let Some(writer) = &self.batch_writer {
            writer.shutdown().await;
        }
    }

    /// Retrieve the active session handle if it exists.
    pub fn get_session(&self, session_id: &Uuid) -> Option<Arc<RwLock<Session>>> {
        self.active_sessions
            .get(session_id)
            .map(|guard| guard.value().clone())
    }

    /// Count currently active sessions.
    pub fn active_session_count(&self) -> usize {
        self.active_sessions.len()
    }

    /// Aggregate high-level statistics for sessions that started within the provided lookback window.
    pub async fn get_stats(&self, lookback: Duration) -> SessionStats {
        let now = Utc::now();
        let lookback_chrono =
            ChronoDuration::from_std(lookback).unwrap_or_else(|_| ChronoDuration::hours(24));
        let cutoff = now - lookback_chrono;

        let active_count = self.active_sessions.len();

        // Snapshot active sessions to avoid holding locks across await.
        let active_handles: Vec<_> = self
            .active_sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut window_sessions: Vec<Session> = Vec::new();

        for handle in active_handles {
            let session = handle.read().await.clone();
            if session.start_time >= cutoff {
                window_sessions.push(session);
            }
        }

        let closed_sessions = self.closed_sessions.lock().unwrap().clone();
        window_sessions.extend(
            closed_sessions
                .into_iter()
                .filter(|session| session.start_time >= cutoff),
        );

        let rejected_sessions = self.rejected_sessions.lock().unwrap().clone();
        window_sessions.extend(
            rejected_sessions
                .into_iter()
                .filter(|session| session.start_time >= cutoff),
        );

        let total_sessions = window_sessions.len();
        let total_bytes = window_sessions.iter().fold(0u64, |acc, session| {
            acc.saturating_add(session.bytes_sent.saturating_add(session.bytes_received))
        });

        let mut user_counts: HashMap<String, u64> = HashMap::new();
        let mut destination_counts: HashMap<String, u64> = HashMap::new();
        let mut acl_allowed = 0u64;
        let mut acl_blocked = 0u64;

        for session in &window_sessions {
            *user_counts.entry(session.user.clone()).or_insert(0) += 1;
            *destination_counts
                .entry(session.dest_ip.clone())
                .or_insert(0) += 1;

            if session.acl_decision.eq_ignore_ascii_case("allow") {
                acl_allowed += 1;
            } else if session.acl_decision.eq_ignore_ascii_case("block") {
                acl_blocked += 1;
            }
        }

        const TOP_LIMIT: usize = 10;

        let mut top_users: Vec<UserSessionStat> = user_counts
            .into_iter()
            .map(|(user, sessions)| UserSessionStat { user, sessions })
            .collect();
        top_users.sort_by(|a, b| {
            b.sessions
                .cmp(&a.sessions)
                .then_with(|| a.user.cmp(&b.user))
        });
        top_users.truncate(TOP_LIMIT);

        let mut top_destinations: Vec<DestinationStat> = destination_counts
            .into_iter()
            .map(|(dest_ip, connections)| DestinationStat {
                dest_ip,
                connections,
            })
            .collect();
        top_destinations.sort_by(|a, b| {
            b.connections
                .cmp(&a.connections)
                .then_with(|| a.dest_ip.cmp(&b.dest_ip))
        });
        top_destinations.truncate(TOP_LIMIT);

        SessionStats {
            generated_at: now,
            active_sessions: active_count,
            total_sessions,
            total_bytes,
            top_users,
            top_destinations,
            acl: AclDecisionStats {
                allowed: acl_allowed,
                blocked: acl_blocked,
            },
        }
    }

    /// Update traffic counters for an active session.
    pub async fn update_traffic(
        &self,
        session_id: &Uuid,
        bytes_sent: u64,
        bytes_received: u64,
        packets_sent: u64,
        packets_received: u64,
    ) {
        if let Some(entry) = self.active_sessions.get(session_id) {
            let session = entry.value().clone();
            drop(entry);

            let mut session_guard = session.write().await;
            #[cfg(feature = "metrics")]
            let user_label = session_guard.user.clone();
            session_guard.bytes_sent = session_guard.bytes_sent.saturating_add(bytes_sent);
            session_guard.bytes_received =
                session_guard.bytes_received.saturating_add(bytes_received);
            session_guard.packets_sent = session_guard.packets_sent.saturating_add(packets_sent);
            session_guard.packets_received = session_guard
                .packets_received
                .saturating_add(packets_received);

            #[cfg(feature = "metrics")]
            SessionMetrics::record_traffic(&user_label, bytes_sent, bytes_received);

            #[cfg(feature = "database")]
            if let Some(writer) = &self.batch_writer {
                let snapshot = session_guard.clone();
                drop(session_guard);
                writer.enqueue(snapshot).await;
            }

            #[cfg(not(feature = "database"))]
            drop(session_guard);
        }
    }

    /// Close an active session and record it in the closed list.
    pub async fn close_session(
        &self,
        session_id: &Uuid,
        reason: Option<String>,
        status: SessionStatus,
    ) {
        if let Some((_, session_arc)) = self.active_sessions.remove(session_id) {
            let mut session = session_arc.write().await;
            session.close(reason, status);
            #[cfg(feature = "metrics")]
            SessionMetrics::record_session_close(session.duration_secs);
            let snapshot = session.clone();
            drop(session);

            self.closed_sessions.lock().unwrap().push(snapshot.clone());

            #[cfg(feature = "database")]
            if let Some(writer) = &self.batch_writer {
                writer.enqueue(snapshot).await;
            }
        }
    }

    /// Record a connection rejected before session creation (e.g., ACL block).
    pub async fn track_rejected_session(
        &self,
        user: &str,
        conn: ConnectionInfo,
        acl_rule: Option<String>,
    ) -> Uuid {
        let mut session = Session::new(
            user.to_string(),
            conn,
            "block",
            acl_rule,
        );

        session.close(
            Some("Rejected by ACL".to_string()),
            SessionStatus::RejectedByAcl,
        );

        #[cfg(feature = "metrics")]
        SessionMetrics::record_rejected_session(user);

        let session_id = session.session_id;

        #[cfg(feature = "database")]
        if let Some(writer) = &self.batch_writer {
            writer.enqueue(session.clone()).await;
        }

        self.rejected_sessions.lock().unwrap().push(session);

        session_id
    }

    /// Snapshot of all rejected sessions (testing/diagnostics).
    pub fn rejected_snapshot(&self) -> Vec<Session> {
        self.rejected_sessions.lock().unwrap().clone()
    }

    /// Snapshot of closed sessions (testing/diagnostics).
    pub fn closed_snapshot(&self) -> Vec<Session> {
        self.closed_sessions.lock().unwrap().clone()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
