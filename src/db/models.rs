//! Row types for the ledger tables

use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Which achievement family a requirement or progress row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Title,
    Mission,
}

impl RequirementKind {
    /// Requirement definition table
    pub(crate) fn requirements_table(&self) -> &'static str {
        match self {
            RequirementKind::Title => "title_requirements",
            RequirementKind::Mission => "mission_requirements",
        }
    }

    /// Per-user progress table
    pub(crate) fn progress_table(&self) -> &'static str {
        match self {
            RequirementKind::Title => "title_progress",
            RequirementKind::Mission => "mission_progress",
        }
    }

    /// Column holding the owning title or mission id
    pub(crate) fn owner_column(&self) -> &'static str {
        match self {
            RequirementKind::Title => "title_id",
            RequirementKind::Mission => "mission_id",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Title => "title",
            RequirementKind::Mission => "mission",
        }
    }
}

/// Requirement definition (title or mission variant)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementRow {
    pub id: i64,
    pub kind: RequirementKind,
    pub action_key: String,
    pub goal: i64,
    /// Title id or mission id, depending on `kind`
    pub owner_id: i64,
}

impl RequirementRow {
    pub(crate) fn from_row(kind: RequirementKind, row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind,
            action_key: row.get("action_key")?,
            goal: row.get("goal")?,
            owner_id: row.get(kind.owner_column())?,
        })
    }
}

/// Per-user progress toward one requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub id: i64,
    pub kind: RequirementKind,
    pub user_id: i64,
    pub requirement_id: i64,
    pub progress: i64,
    pub completed: bool,
}

impl ProgressRow {
    pub(crate) fn from_row(kind: RequirementKind, row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind,
            user_id: row.get("user_id")?,
            requirement_id: row.get("requirement_id")?,
            progress: row.get("progress")?,
            completed: row.get("completed")?,
        })
    }
}

/// Title definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Purchase price in coins; `None` means the title cannot be bought
    pub cost: Option<i64>,
}

impl TitleRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            cost: row.get("cost")?,
        })
    }
}

/// Mission lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    Active,
    Scheduled,
    Withdrawn,
    Canceled,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Active => "active",
            MissionStatus::Scheduled => "scheduled",
            MissionStatus::Withdrawn => "withdrawn",
            MissionStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(MissionStatus::Active),
            "scheduled" => Some(MissionStatus::Scheduled),
            "withdrawn" => Some(MissionStatus::Withdrawn),
            "canceled" | "cancelled" => Some(MissionStatus::Canceled),
            _ => None,
        }
    }

    /// Withdrawn and canceled missions cannot be completed
    pub fn is_available(&self) -> bool {
        !matches!(self, MissionStatus::Withdrawn | MissionStatus::Canceled)
    }
}

/// Mission definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionRow {
    pub id: i64,
    pub name: String,
    pub for_all: bool,
    pub status: MissionStatus,
    pub coins: i64,
    pub experience: i64,
}

impl MissionRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            for_all: row.get("for_all")?,
            // Unknown statuses are treated as withdrawn so they can never be completed
            status: MissionStatus::parse(&status).unwrap_or(MissionStatus::Withdrawn),
            coins: row.get("coins")?,
            experience: row.get("experience")?,
        })
    }
}

/// Mission completion record for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMissionRow {
    pub id: i64,
    pub user_id: i64,
    pub mission_id: i64,
    pub completed: bool,
    pub last_completed_at: Option<String>,
}

impl UserMissionRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            mission_id: row.get("mission_id")?,
            completed: row.get("completed")?,
            last_completed_at: row.get("last_completed_at")?,
        })
    }
}

/// The slice of a user the reward pipeline reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub email: Option<String>,
    pub experience: i64,
    pub level: i64,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            experience: row.get("experience")?,
            level: row.get("level")?,
        })
    }
}

/// Business reason recorded on a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    MissionReward,
    TitlePurchase,
    LevelBonus,
}

impl TransactionKind {
    /// Row id in the seeded `transaction_types` table
    pub fn type_id(&self) -> i64 {
        match self {
            TransactionKind::MissionReward => 1,
            TransactionKind::TitlePurchase => 2,
            TransactionKind::LevelBonus => 3,
        }
    }

    pub fn from_type_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(TransactionKind::MissionReward),
            2 => Some(TransactionKind::TitlePurchase),
            3 => Some(TransactionKind::LevelBonus),
            _ => None,
        }
    }
}

/// Append-only ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: i64,
    /// Signed: credits are positive, debits negative
    pub amount: i64,
    pub description: String,
    pub user_id: i64,
    pub transaction_type_id: i64,
    pub reference: Option<String>,
    pub created_at: String,
}

impl TransactionRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            amount: row.get("amount")?,
            description: row.get("description")?,
            user_id: row.get("user_id")?,
            transaction_type_id: row.get("transaction_type_id")?,
            reference: row.get("reference")?,
            created_at: row.get("created_at")?,
        })
    }

    pub fn kind(&self) -> Option<TransactionKind> {
        TransactionKind::from_type_id(self.transaction_type_id)
    }
}

/// User-facing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub read_at: Option<String>,
    pub user_id: i64,
    pub created_at: String,
}

impl NotificationRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("type")?,
            data: row.get("data")?,
            read_at: row.get("read_at")?,
            user_id: row.get("user_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Envelope that exhausted its retries or failed permanently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRow {
    pub id: i64,
    pub idempotency_key: Option<String>,
    pub event_type: Option<String>,
    pub payload: String,
    pub reason: String,
    pub attempts: i64,
    pub dead_at: String,
}

impl DeadLetterRow {
    pub(crate) fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            idempotency_key: row.get("idempotency_key")?,
            event_type: row.get("event_type")?,
            payload: row.get("payload")?,
            reason: row.get("reason")?,
            attempts: row.get("attempts")?,
            dead_at: row.get("dead_at")?,
        })
    }
}
