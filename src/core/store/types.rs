use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    WaitingForResponse,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::WaitingForResponse => "waiting_for_response",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "waiting_for_response" => Some(TaskStatus::WaitingForResponse),
            _ => None,
        }
    }

    /// Terminal states never leave the queue again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ScheduleAppointment,
    CreateContact,
    SendFollowUpEmail,
    ProcessNewEmail,
    AiProcessing,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::ScheduleAppointment => "schedule_appointment",
            TaskType::CreateContact => "create_contact",
            TaskType::SendFollowUpEmail => "send_follow_up_email",
            TaskType::ProcessNewEmail => "process_new_email",
            TaskType::AiProcessing => "ai_processing",
        }
    }

    pub fn from_kind(value: &str) -> Option<Self> {
        match value {
            "schedule_appointment" => Some(TaskType::ScheduleAppointment),
            "create_contact" => Some(TaskType::CreateContact),
            "send_follow_up_email" => Some(TaskType::SendFollowUpEmail),
            "process_new_email" => Some(TaskType::ProcessNewEmail),
            "ai_processing" => Some(TaskType::AiProcessing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Opaque payload. Must carry enough context (contact id, thread id,
    /// proposed slots) to resume without re-querying the source system.
    pub data: serde_json::Value,
    pub result: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    EmailReceived,
    ContactCreated,
    CalendarEvent,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::EmailReceived => "email_received",
            TriggerType::ContactCreated => "contact_created",
            TriggerType::CalendarEvent => "calendar_event",
            TriggerType::Manual => "manual",
        }
    }

    pub fn from_trigger(value: &str) -> Option<Self> {
        match value {
            "email_received" => Some(TriggerType::EmailReceived),
            "contact_created" => Some(TriggerType::ContactCreated),
            "calendar_event" => Some(TriggerType::CalendarEvent),
            "manual" => Some(TriggerType::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Instruction {
    pub id: String,
    pub user_id: String,
    pub instruction: String,
    pub trigger_type: TriggerType,
    pub is_active: bool,
    pub priority: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerEntry {
    pub user_id: String,
    pub contact_id: String,
    pub email_address: String,
    pub sent_at: DateTime<Utc>,
}
