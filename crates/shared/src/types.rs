//! Domain vocabulary shared by the API server and the worker

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::HelpdeskError;

/// Role of a participant in a ticket conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Customer,
    Agent,
    Bot,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::Bot => "bot",
        }
    }

    /// Staff roles may author internal notes and see them
    pub fn is_staff(&self) -> bool {
        !matches!(self, Self::Customer)
    }
}

impl FromStr for ParticipantRole {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "agent" => Ok(Self::Agent),
            "bot" => Ok(Self::Bot),
            other => Err(HelpdeskError::UnknownValue {
                field: "participant_role",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    AwaitingResponse,
    Scheduled,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::AwaitingResponse => "awaiting_response",
            Self::Scheduled => "scheduled",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    /// Statuses the auto-close sweep never touches
    pub fn is_sweep_exempt(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Resolved | Self::Closed)
    }
}

impl FromStr for TicketStatus {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "awaiting_response" => Ok(Self::AwaitingResponse),
            "scheduled" => Ok(Self::Scheduled),
            "resolved" => Ok(Self::Resolved),
            "closed" => Ok(Self::Closed),
            other => Err(HelpdeskError::UnknownValue {
                field: "ticket_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Processing status of a sync record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Processing,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(HelpdeskError::UnknownValue {
                field: "sync_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Outbound channel used to deliver a handoff notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Chat-bot webhook (e.g. a team chat incoming webhook)
    Webhook,
    Email,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }
}

impl FromStr for NotificationChannel {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "email" => Ok(Self::Email),
            "sms" => Ok(Self::Sms),
            other => Err(HelpdeskError::UnknownValue {
                field: "notification_channel",
                value: other.to_string(),
            }),
        }
    }
}
