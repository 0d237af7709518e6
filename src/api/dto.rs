//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::broker::{HubStats, MessageKind};

// ============================================
// PUSH DTOs
// ============================================

/// Push request
#[derive(Debug, Deserialize)]
pub struct PushRequest {
    /// Target application
    pub app_id: String,
    /// Target users; empty means every user of the application
    #[serde(default)]
    pub user_ids: Vec<String>,
    /// Message body
    pub message: String,
    /// Frame type: text (default) or binary
    #[serde(default)]
    pub kind: MessageKind,
    /// Only deliver to sessions whose connect parameters match all of these
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// Push response
#[derive(Debug, Serialize)]
pub struct PushResponse {
    /// Status: "accepted"
    pub status: String,
    /// ID of the queued envelope
    pub envelope_id: Uuid,
    pub app_id: String,
}

// ============================================
// HUB DTOs
// ============================================

/// Hub listing
#[derive(Debug, Serialize)]
pub struct HubsResponse {
    pub hubs: Vec<HubStats>,
    /// Sessions across all hubs
    pub total_sessions: usize,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, shutting_down
    pub status: String,
    /// Number of hubs
    pub hubs: usize,
    /// Live sessions across all hubs
    pub sessions: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}
