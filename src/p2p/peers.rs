//! Peer directory: known endpoints, reputation, bans and request rate limits.
//!
//! Reputation only moves through [`PeerDirectory::report_misbehavior`] and
//! [`PeerDirectory::reward_peer`]. Falling to the ban threshold blocks the
//! peer until [`PeerDirectory::unblock_peer`] is called, and every change of
//! blocked state is recorded in the audit log.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::config::NetworkConfig;
use crate::error::PeerError;

#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub reputation: i64,
    pub blocked: bool,
    /// Added through `add_peer` and eligible for gossip. Records created by
    /// inbound traffic alone only track reputation and rate.
    pub listed: bool,
    requests: VecDeque<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub peer: String,
    pub blocked: bool,
    pub reputation: i64,
    pub reason: String,
    pub at: DateTime<Utc>,
}

pub struct PeerDirectory {
    self_addr: String,
    peers: DashMap<String, PeerRecord>,
    audit: Mutex<Vec<AuditEntry>>,
    ban_threshold: i64,
    rate_limit_max: usize,
    rate_window: Duration,
}

impl PeerDirectory {
    pub fn new(self_addr: impl Into<String>, config: &NetworkConfig) -> Self {
        Self {
            self_addr: self_addr.into(),
            peers: DashMap::new(),
            audit: Mutex::new(Vec::new()),
            ban_threshold: config.ban_threshold,
            rate_limit_max: config.rate_limit_max,
            rate_window: Duration::from_secs(config.rate_limit_window_secs),
        }
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    /// Adds `endpoint` as an active peer. Returns `Ok(false)` if it was
    /// already known.
    pub fn add_peer(&self, endpoint: &str) -> Result<bool, PeerError> {
        if !is_endpoint(endpoint) {
            return Err(PeerError::InvalidEndpoint(endpoint.to_string()));
        }
        if endpoint == self.self_addr {
            return Err(PeerError::SelfAddress(endpoint.to_string()));
        }
        if self.is_blocked(endpoint) {
            return Err(PeerError::Blocked(endpoint.to_string()));
        }
        let mut record = self.peers.entry(endpoint.to_string()).or_default();
        if record.listed {
            return Ok(false);
        }
        record.listed = true;
        drop(record);
        tracing::info!(peer = %endpoint, "peer added");
        Ok(true)
    }

    pub fn is_blocked(&self, endpoint: &str) -> bool {
        self.peers.get(endpoint).is_some_and(|p| p.blocked)
    }

    pub fn reputation(&self, endpoint: &str) -> Option<i64> {
        self.peers.get(endpoint).map(|p| p.reputation)
    }

    /// Lowers the peer's reputation by one, blocking it at the threshold.
    /// Returns the new reputation.
    pub fn report_misbehavior(&self, endpoint: &str, reason: &str) -> i64 {
        let mut record = self.peers.entry(endpoint.to_string()).or_default();
        record.reputation = record.reputation.saturating_sub(1);
        let reputation = record.reputation;
        tracing::warn!(peer = %endpoint, reputation, reason, "peer misbehaved");

        if !record.blocked && reputation <= self.ban_threshold {
            record.blocked = true;
            drop(record);
            tracing::warn!(peer = %endpoint, reputation, "peer blocked");
            self.record_audit(endpoint, true, reputation, reason);
        }
        reputation
    }

    /// Raises an active peer's reputation by one.
    pub fn reward_peer(&self, endpoint: &str) {
        if let Some(mut record) = self.peers.get_mut(endpoint) {
            if !record.blocked {
                record.reputation = record.reputation.saturating_add(1);
            }
        }
    }

    /// Lifts a ban and resets reputation. Returns whether the peer was blocked.
    pub fn unblock_peer(&self, endpoint: &str) -> bool {
        let Some(mut record) = self.peers.get_mut(endpoint) else {
            return false;
        };
        if !record.blocked {
            return false;
        }
        record.blocked = false;
        record.reputation = 0;
        record.requests.clear();
        drop(record);
        tracing::info!(peer = %endpoint, "peer unblocked");
        self.record_audit(endpoint, false, 0, "manual unblock");
        true
    }

    /// Rolling-window request limit for inbound messages from `endpoint`.
    pub fn check_rate(&self, endpoint: &str) -> Result<(), PeerError> {
        let now = Instant::now();
        let mut record = self.peers.entry(endpoint.to_string()).or_default();
        while record
            .requests
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.rate_window)
        {
            record.requests.pop_front();
        }
        if record.requests.len() >= self.rate_limit_max {
            return Err(PeerError::RateLimited(endpoint.to_string()));
        }
        record.requests.push_back(now);
        Ok(())
    }

    /// Active (unblocked) peers, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .peers
            .iter()
            .filter(|entry| entry.listed && !entry.blocked)
            .map(|entry| entry.key().clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().clone()
    }

    fn record_audit(&self, peer: &str, blocked: bool, reputation: i64, reason: &str) {
        self.audit.lock().push(AuditEntry {
            peer: peer.to_string(),
            blocked,
            reputation,
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }
}

/// `host:port` with a non-empty host and a numeric port.
fn is_endpoint(endpoint: &str) -> bool {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
