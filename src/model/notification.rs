// =============================================================================
// Notification — persisted message pushed over the notification bus
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyType {
    System,
    Trade,
    Risk,
    Fund,
    Announce,
}

impl NotifyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Trade => "trade",
            Self::Risk => "risk",
            Self::Fund => "fund",
            Self::Announce => "announce",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "trade" => Some(Self::Trade),
            "risk" => Some(Self::Risk),
            "fund" => Some(Self::Fund),
            "announce" => Some(Self::Announce),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Info,
    Warning,
    Critical,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Pending,
    Sent,
    Read,
    Failed,
}

impl NotifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A persisted notification. `user_id` 0 is a platform announcement
/// delivered to every connected viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub notify_type: NotifyType,
    pub level: NotifyLevel,
    pub title: String,
    pub content: String,
    pub related_id: i64,
    pub related_type: String,
    pub status: NotifyStatus,
    pub read_at: Option<i64>,
    pub created_at: i64,
}

impl Notification {
    pub fn is_unread(&self) -> bool {
        self.status != NotifyStatus::Read
    }

    pub fn mark_as_read(&mut self) {
        self.status = NotifyStatus::Read;
        self.read_at = Some(Utc::now().timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_roundtrips() {
        for s in ["system", "trade", "risk", "fund", "announce"] {
            assert_eq!(NotifyType::parse(s).unwrap().as_str(), s);
        }
        for s in ["info", "warning", "critical"] {
            assert_eq!(NotifyLevel::parse(s).unwrap().as_str(), s);
        }
        for s in ["pending", "sent", "read", "failed"] {
            assert_eq!(NotifyStatus::parse(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn mark_as_read_sets_timestamp() {
        let mut n = Notification {
            id: 1,
            user_id: 2,
            notify_type: NotifyType::Fund,
            level: NotifyLevel::Info,
            title: "t".into(),
            content: "c".into(),
            related_id: 0,
            related_type: String::new(),
            status: NotifyStatus::Sent,
            read_at: None,
            created_at: 0,
        };
        assert!(n.is_unread());
        n.mark_as_read();
        assert!(!n.is_unread());
        assert!(n.read_at.is_some());
    }
}
