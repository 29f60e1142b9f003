use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::Tool;
use crate::core::connectors::{
    CalendarConnector, CrmConnector, CrmContact, EmailConnector, OutgoingEmail, TimeSlot,
};
use crate::core::store::Storage;
use crate::core::store::types::{TaskStatus, TaskType};

const MAX_PROPOSED_SLOTS: usize = 3;

/// Everything the parked task needs to resume once the contact replies,
/// without re-querying the CRM or calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentData {
    pub contact_id: String,
    pub contact_name: String,
    pub contact_email: String,
    pub thread_id: String,
    pub proposed_slots: Vec<TimeSlot>,
    pub duration_minutes: i64,
    pub topic: Option<String>,
    pub proposed_at: DateTime<Utc>,
}

/// Pick the best CRM match for a free-text name: exact full-name match
/// first, then substring either way, then the first search result.
pub fn best_contact_match<'a>(name: &str, contacts: &'a [CrmContact]) -> Option<&'a CrmContact> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() || contacts.is_empty() {
        return None;
    }

    if let Some(exact) = contacts
        .iter()
        .find(|c| c.display_name().to_lowercase() == needle)
    {
        return Some(exact);
    }

    if let Some(partial) = contacts.iter().find(|c| {
        let candidate = c.display_name().to_lowercase();
        candidate.contains(&needle) || needle.contains(&candidate)
    }) {
        return Some(partial);
    }

    contacts.first()
}

fn proposal_email(contact: &CrmContact, slots: &[TimeSlot], topic: Option<&str>) -> OutgoingEmail {
    let slot_lines: String = slots
        .iter()
        .map(|s| format!("  - {}\n", s.display()))
        .collect();
    let subject = match topic {
        Some(topic) => format!("Scheduling: {}", topic),
        None => "Scheduling a time to meet".to_string(),
    };
    let body = format!(
        "Hi {},\n\nI'd like to find a time for us to meet. Here are a few options:\n\n{}\nWould any of these work for you? Just reply to this email and I'll get it on the calendar.\n\nBest regards",
        contact.first_name.as_deref().unwrap_or("there"),
        slot_lines
    );

    OutgoingEmail {
        to: contact.email.clone().unwrap_or_default(),
        subject,
        body,
        thread_id: None,
    }
}

/// Compound tool: resolve the contact, compute open slots, email a proposal,
/// and park a task until the contact replies. The appointment is never
/// booked here; commitment waits for the human response.
pub struct ScheduleAppointmentTool {
    crm: Arc<dyn CrmConnector>,
    calendar: Arc<dyn CalendarConnector>,
    email: Arc<dyn EmailConnector>,
    storage: Arc<Storage>,
}

impl ScheduleAppointmentTool {
    pub fn new(
        crm: Arc<dyn CrmConnector>,
        calendar: Arc<dyn CalendarConnector>,
        email: Arc<dyn EmailConnector>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            crm,
            calendar,
            email,
            storage,
        }
    }
}

fn default_duration() -> i64 {
    30
}

#[derive(Deserialize)]
struct ScheduleParams {
    contact_name: String,
    /// ISO date to propose times on.
    date: NaiveDate,
    #[serde(default = "default_duration")]
    duration_minutes: i64,
    topic: Option<String>,
}

#[async_trait]
impl Tool for ScheduleAppointmentTool {
    fn name(&self) -> &'static str {
        "schedule_appointment"
    }

    fn description(&self) -> &'static str {
        "Propose meeting times to a contact by email and track the appointment until they reply. \
         Does not book anything until the contact confirms."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "contact_name": { "type": "string", "description": "Name of the CRM contact to meet" },
                "date": { "type": "string", "description": "ISO date (YYYY-MM-DD) to propose times on" },
                "duration_minutes": { "type": "integer", "description": "Meeting length, default 30" },
                "topic": { "type": "string", "description": "Optional meeting topic" }
            },
            "required": ["contact_name", "date"]
        })
    }

    async fn execute(
        &self,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: ScheduleParams =
            serde_json::from_value(params).context("invalid schedule_appointment params")?;

        let candidates = self
            .crm
            .search_contacts(user_id, &params.contact_name)
            .await?;
        let contact = best_contact_match(&params.contact_name, &candidates)
            .ok_or_else(|| anyhow!("No CRM contact matches '{}'", params.contact_name))?
            .clone();
        let contact_email = contact
            .email
            .clone()
            .ok_or_else(|| anyhow!("Contact '{}' has no email address", contact.display_name()))?;

        let slots = self
            .calendar
            .available_times(user_id, params.date, params.duration_minutes)
            .await?;
        if slots.is_empty() {
            return Err(anyhow!("No open slots on {}", params.date));
        }
        let proposed: Vec<TimeSlot> = slots.into_iter().take(MAX_PROPOSED_SLOTS).collect();

        let message_id = self
            .email
            .send_email(
                user_id,
                &proposal_email(&contact, &proposed, params.topic.as_deref()),
            )
            .await?;

        let data = AppointmentData {
            contact_id: contact.id.clone(),
            contact_name: contact.display_name(),
            contact_email: contact_email.clone(),
            thread_id: message_id.clone(),
            proposed_slots: proposed.clone(),
            duration_minutes: params.duration_minutes,
            topic: params.topic,
            proposed_at: Utc::now(),
        };
        let task = self
            .storage
            .insert_task(
                user_id,
                TaskType::ScheduleAppointment,
                &serde_json::to_value(&data)?,
                TaskStatus::WaitingForResponse,
            )
            .await?;

        info!(
            "Proposed {} slot(s) to {} ({}), parked task {}",
            proposed.len(),
            data.contact_name,
            contact_email,
            task.id
        );

        Ok(serde_json::json!({
            "task_id": task.id,
            "contact_id": contact.id,
            "contact_email": contact_email,
            "proposed_slots": proposed,
            "message_id": message_id,
            "status": "awaiting_reply",
        }))
    }
}
