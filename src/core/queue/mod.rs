use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::connectors::{
    CalendarConnector, CrmConnector, EmailConnector, NewCalendarEvent, NewContact, OutgoingEmail,
    TimeSlot,
};
use crate::core::llm::{ChatMessage, LlmClient};
use crate::core::proactive::ProactiveProcessor;
use crate::core::store::Storage;
use crate::core::store::types::{Task, TaskStatus, TaskType};
use crate::core::tools::appointments::AppointmentData;

/// Claim size per processing cycle.
const CLAIM_BATCH: usize = 10;

enum HandlerOutcome {
    Completed(String),
    /// Put the task back into `waiting_for_response` (e.g. the contact's
    /// reply did not pick a slot yet).
    Parked,
}

/// Durable unit-of-work ledger with a fixed handler table. The queue is the
/// failure boundary for task execution: handler errors mark the task
/// `failed` and never propagate past `process_pending_tasks`. There is no
/// automatic retry; a failed task needs a new task.
pub struct TaskQueue {
    storage: Arc<Storage>,
    processor: Arc<ProactiveProcessor>,
    email: Arc<dyn EmailConnector>,
    crm: Arc<dyn CrmConnector>,
    calendar: Arc<dyn CalendarConnector>,
    llm: Arc<dyn LlmClient>,
}

impl TaskQueue {
    pub fn new(
        storage: Arc<Storage>,
        processor: Arc<ProactiveProcessor>,
        email: Arc<dyn EmailConnector>,
        crm: Arc<dyn CrmConnector>,
        calendar: Arc<dyn CalendarConnector>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            storage,
            processor,
            email,
            crm,
            calendar,
            llm,
        }
    }

    pub async fn create_task(
        &self,
        user_id: &str,
        task_type: TaskType,
        data: &serde_json::Value,
    ) -> Result<Task> {
        let task = self
            .storage
            .insert_task(user_id, task_type, data, TaskStatus::Pending)
            .await?;
        info!("Created task {} ({})", task.id, task_type.as_str());
        Ok(task)
    }

    /// Claim up to ten oldest pending tasks and run each through its handler.
    /// Returns how many tasks were claimed this cycle.
    pub async fn process_pending_tasks(&self) -> Result<usize> {
        let claimed = self.storage.claim_pending_tasks(CLAIM_BATCH).await?;
        let count = claimed.len();

        for task in claimed {
            match self.dispatch(&task).await {
                Ok(HandlerOutcome::Completed(result)) => {
                    info!("Task {} completed", task.id);
                    self.storage.complete_task(&task.id, &result).await?;
                }
                Ok(HandlerOutcome::Parked) => {
                    info!("Task {} parked awaiting external response", task.id);
                    self.storage
                        .set_task_status(&task.id, TaskStatus::WaitingForResponse)
                        .await?;
                }
                Err(e) => {
                    warn!("Task {} failed: {}", task.id, e);
                    self.storage.fail_task(&task.id, &e.to_string()).await?;
                }
            }
        }
        Ok(count)
    }

    /// Re-check parked tasks on their own timer. A task whose type-specific
    /// condition holds goes back to `pending`; the rest stay parked
    /// indefinitely.
    pub async fn continue_waiting_tasks(&self) -> Result<usize> {
        let waiting = self
            .storage
            .list_tasks_by_status(TaskStatus::WaitingForResponse)
            .await?;

        let mut resumed = 0;
        for task in waiting {
            let ready = match self.continuation_ready(&task).await {
                Ok(ready) => ready,
                Err(e) => {
                    warn!("Continuation check for task {} failed: {}", task.id, e);
                    false
                }
            };
            if ready {
                info!("Task {} has its response; resuming", task.id);
                self.storage
                    .set_task_status(&task.id, TaskStatus::Pending)
                    .await?;
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    async fn continuation_ready(&self, task: &Task) -> Result<bool> {
        match task.task_type {
            TaskType::ScheduleAppointment => {
                let data: AppointmentData = serde_json::from_value(task.data.clone())
                    .context("appointment task payload is malformed")?;
                let replies = self
                    .email
                    .search_messages(&task.user_id, &format!("from:{}", data.contact_email), 5)
                    .await?;
                Ok(replies.iter().any(|m| m.received_at > data.proposed_at))
            }
            // No other task type parks itself today.
            _ => Ok(false),
        }
    }

    async fn dispatch(&self, task: &Task) -> Result<HandlerOutcome> {
        match task.task_type {
            TaskType::ScheduleAppointment => self.handle_schedule_appointment(task).await,
            TaskType::CreateContact => self.handle_create_contact(task).await,
            TaskType::SendFollowUpEmail => self.handle_send_follow_up(task).await,
            TaskType::ProcessNewEmail => self.handle_process_new_email(task).await,
            TaskType::AiProcessing => self.handle_ai_processing(task).await,
        }
    }

    async fn handle_create_contact(&self, task: &Task) -> Result<HandlerOutcome> {
        #[derive(Deserialize)]
        struct CreateContactData {
            email: String,
            first_name: Option<String>,
            last_name: Option<String>,
        }

        let data: CreateContactData = serde_json::from_value(task.data.clone())
            .context("create_contact task payload is malformed")?;
        let created = self
            .crm
            .create_contact(
                &task.user_id,
                &NewContact {
                    email: data.email,
                    first_name: data.first_name,
                    last_name: data.last_name,
                },
            )
            .await?;
        Ok(HandlerOutcome::Completed(format!(
            "created contact {}",
            created.id
        )))
    }

    async fn handle_send_follow_up(&self, task: &Task) -> Result<HandlerOutcome> {
        #[derive(Deserialize)]
        struct FollowUpData {
            to: String,
            subject: String,
            body: String,
            thread_id: Option<String>,
        }

        let data: FollowUpData = serde_json::from_value(task.data.clone())
            .context("send_follow_up_email task payload is malformed")?;
        let message_id = self
            .email
            .send_email(
                &task.user_id,
                &OutgoingEmail {
                    to: data.to,
                    subject: data.subject,
                    body: data.body,
                    thread_id: data.thread_id,
                },
            )
            .await?;
        Ok(HandlerOutcome::Completed(format!("sent {}", message_id)))
    }

    async fn handle_process_new_email(&self, task: &Task) -> Result<HandlerOutcome> {
        let outcome = self
            .processor
            .process_proactive_event(&task.user_id, "email_received", &task.data, None)
            .await;
        match outcome.text {
            Some(text) => Ok(HandlerOutcome::Completed(text)),
            None => Err(anyhow!("proactive processor produced no result")),
        }
    }

    async fn handle_ai_processing(&self, task: &Task) -> Result<HandlerOutcome> {
        #[derive(Deserialize)]
        struct AiProcessingData {
            trigger_type: String,
            event: serde_json::Value,
            #[serde(default)]
            instructions: Vec<String>,
        }

        let data: AiProcessingData = serde_json::from_value(task.data.clone())
            .context("ai_processing task payload is malformed")?;
        let outcome = self
            .processor
            .process_proactive_event(
                &task.user_id,
                &data.trigger_type,
                &data.event,
                Some(data.instructions),
            )
            .await;
        match outcome.text {
            Some(text) => Ok(HandlerOutcome::Completed(text)),
            None => Err(anyhow!("proactive processor produced no result")),
        }
    }

    /// Resumption of a parked appointment: the contact has replied. Ask the
    /// model which proposed slot (if any) the reply confirms, then book it
    /// and confirm by email. A reply that confirms nothing re-parks the task
    /// with a refreshed watermark so only a newer reply wakes it again.
    async fn handle_schedule_appointment(&self, task: &Task) -> Result<HandlerOutcome> {
        let mut data: AppointmentData = serde_json::from_value(task.data.clone())
            .context("appointment task payload is malformed")?;

        let replies = self
            .email
            .search_messages(&task.user_id, &format!("from:{}", data.contact_email), 5)
            .await?;
        let Some(reply) = replies
            .iter()
            .filter(|m| m.received_at > data.proposed_at)
            .max_by_key(|m| m.received_at)
        else {
            return Ok(HandlerOutcome::Parked);
        };

        let chosen = self.pick_confirmed_slot(&data, &reply.snippet).await?;
        let Some(slot) = chosen else {
            data.proposed_at = Utc::now();
            self.storage
                .update_task_data(&task.id, &serde_json::to_value(&data)?)
                .await?;
            return Ok(HandlerOutcome::Parked);
        };

        let title = match &data.topic {
            Some(topic) => format!("{}: {}", topic, data.contact_name),
            None => format!("Meeting with {}", data.contact_name),
        };
        let event = self
            .calendar
            .create_event(
                &task.user_id,
                &NewCalendarEvent {
                    title,
                    start: slot.start,
                    end: slot.end,
                    attendees: vec![data.contact_email.clone()],
                    description: None,
                },
            )
            .await?;

        self.email
            .send_email(
                &task.user_id,
                &OutgoingEmail {
                    to: data.contact_email.clone(),
                    subject: "Confirmed: our meeting".to_string(),
                    body: format!(
                        "You're booked for {}. Looking forward to it!",
                        slot.display()
                    ),
                    thread_id: Some(data.thread_id.clone()),
                },
            )
            .await?;

        Ok(HandlerOutcome::Completed(format!(
            "booked event {} at {}",
            event.id,
            slot.start.to_rfc3339()
        )))
    }

    /// One plain LLM call (no tools): which numbered slot does the reply
    /// confirm? Answers are a bare number or the word "none".
    async fn pick_confirmed_slot(
        &self,
        data: &AppointmentData,
        reply_text: &str,
    ) -> Result<Option<TimeSlot>> {
        let mut prompt = String::from(
            "A contact was offered these meeting slots and has replied. \
             Answer with ONLY the number of the slot their reply confirms, \
             or the word none if it confirms no slot.\n\n",
        );
        for (i, slot) in data.proposed_slots.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, slot.display()));
        }

        let messages = vec![
            ChatMessage::system(prompt),
            ChatMessage::user(format!("Reply from {}:\n{}", data.contact_name, reply_text)),
        ];
        let outcome = self.llm.chat(&messages, &[]).await?;
        let answer = outcome.text.unwrap_or_default();

        let answer = answer.trim().trim_end_matches('.');
        if answer.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        let index: usize = match answer.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return Ok(None),
        };
        Ok(index
            .checked_sub(1)
            .and_then(|i| data.proposed_slots.get(i))
            .copied())
    }
}
