//! In-process test doubles for the external collaborators: a scripted LLM
//! and mock connectors with inspectable call records. Used by unit and
//! integration tests; never constructed on production paths.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::core::connectors::{
    CalendarConnector, CalendarEvent, ConnectorError, ConnectorResult, CrmConnector, CrmContact,
    EmailConnector, EmailMessage, ErrorKind, NewCalendarEvent, NewContact, OutgoingEmail,
    TimeSlot, parse_mailbox,
};
use crate::core::llm::{ChatMessage, ChatOutcome, LlmClient, ToolCallRequest, ToolDefinition};

/// Replays a fixed sequence of chat outcomes and records every message list
/// it was called with.
pub struct ScriptedLlm {
    outcomes: Mutex<VecDeque<Result<ChatOutcome>>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedLlm {
    pub fn new(outcomes: Vec<Result<ChatOutcome>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn text(text: &str) -> ChatOutcome {
        ChatOutcome {
            text: Some(text.to_string()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<(&str, &str, &str)>) -> ChatOutcome {
        ChatOutcome {
            text: None,
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                })
                .collect(),
        }
    }

    pub async fn seen(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().await.clone()
    }

    pub async fn calls_made(&self) -> usize {
        self.seen.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<ChatOutcome> {
        self.seen.lock().await.push(messages.to_vec());
        self.outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(anyhow!("scripted llm exhausted")))
    }
}

pub fn message(id: &str, from: &str, received_at: DateTime<Utc>) -> EmailMessage {
    EmailMessage {
        id: id.to_string(),
        thread_id: format!("thread-{}", id),
        from: from.to_string(),
        subject: "test".to_string(),
        snippet: String::new(),
        received_at,
    }
}

pub fn contact(
    id: &str,
    email: Option<&str>,
    first_name: Option<&str>,
    created_at: DateTime<Utc>,
) -> CrmContact {
    CrmContact {
        id: id.to_string(),
        email: email.map(String::from),
        first_name: first_name.map(String::from),
        last_name: None,
        created_at,
    }
}

fn unavailable(user_id: &str) -> ConnectorError {
    ConnectorError::new(ErrorKind::Api, format!("mock failure for user {}", user_id))
}

fn auth_expired(user_id: &str) -> ConnectorError {
    ConnectorError::new(
        ErrorKind::AuthExpired,
        format!("mock expired token for user {}", user_id),
    )
}

#[derive(Default)]
pub struct MockEmailConnector {
    /// Per-user inbox, newest first.
    pub inbox: Mutex<HashMap<String, Vec<EmailMessage>>>,
    pub sent: Mutex<Vec<(String, OutgoingEmail)>>,
    pub failing_users: Mutex<HashSet<String>>,
    pub auth_expired_users: Mutex<HashSet<String>>,
    send_counter: AtomicU64,
}

impl MockEmailConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_inbox(&self, user_id: &str, messages: Vec<EmailMessage>) {
        self.inbox
            .lock()
            .await
            .insert(user_id.to_string(), messages);
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    async fn check_user(&self, user_id: &str) -> ConnectorResult<()> {
        if self.auth_expired_users.lock().await.contains(user_id) {
            return Err(auth_expired(user_id));
        }
        if self.failing_users.lock().await.contains(user_id) {
            return Err(unavailable(user_id));
        }
        Ok(())
    }
}

#[async_trait]
impl EmailConnector for MockEmailConnector {
    async fn list_recent_messages(
        &self,
        user_id: &str,
        count: usize,
    ) -> ConnectorResult<Vec<EmailMessage>> {
        self.check_user(user_id).await?;
        let inbox = self.inbox.lock().await;
        Ok(inbox
            .get(user_id)
            .map(|m| m.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn search_messages(
        &self,
        user_id: &str,
        query: &str,
        count: usize,
    ) -> ConnectorResult<Vec<EmailMessage>> {
        self.check_user(user_id).await?;
        let sender = query.strip_prefix("from:").unwrap_or(query).trim();
        let inbox = self.inbox.lock().await;
        Ok(inbox
            .get(user_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| parse_mailbox(&m.from).eq_ignore_ascii_case(sender))
                    .take(count)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn send_email(&self, user_id: &str, email: &OutgoingEmail) -> ConnectorResult<String> {
        self.check_user(user_id).await?;
        let id = self.send_counter.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .await
            .push((user_id.to_string(), email.clone()));
        Ok(format!("sent-{}", id))
    }
}

#[derive(Default)]
pub struct MockCrmConnector {
    pub contacts: Mutex<HashMap<String, Vec<CrmContact>>>,
    pub created: Mutex<Vec<(String, NewContact)>>,
    pub failing_users: Mutex<HashSet<String>>,
    create_counter: AtomicU64,
}

impl MockCrmConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_contacts(&self, user_id: &str, contacts: Vec<CrmContact>) {
        self.contacts
            .lock()
            .await
            .insert(user_id.to_string(), contacts);
    }

    async fn check_user(&self, user_id: &str) -> ConnectorResult<()> {
        if self.failing_users.lock().await.contains(user_id) {
            return Err(unavailable(user_id));
        }
        Ok(())
    }
}

#[async_trait]
impl CrmConnector for MockCrmConnector {
    async fn list_contacts(&self, user_id: &str) -> ConnectorResult<Vec<CrmContact>> {
        self.check_user(user_id).await?;
        let contacts = self.contacts.lock().await;
        Ok(contacts.get(user_id).cloned().unwrap_or_default())
    }

    async fn search_contacts(
        &self,
        user_id: &str,
        query: &str,
    ) -> ConnectorResult<Vec<CrmContact>> {
        self.check_user(user_id).await?;
        let needle = query.trim().to_lowercase();
        let contacts = self.contacts.lock().await;
        Ok(contacts
            .get(user_id)
            .map(|list| {
                list.iter()
                    .filter(|c| {
                        needle.is_empty()
                            || c.display_name().to_lowercase().contains(&needle)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_contact_by_email(
        &self,
        user_id: &str,
        email: &str,
    ) -> ConnectorResult<Option<CrmContact>> {
        self.check_user(user_id).await?;
        let contacts = self.contacts.lock().await;
        Ok(contacts.get(user_id).and_then(|list| {
            list.iter()
                .find(|c| {
                    c.email
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(email))
                })
                .cloned()
        }))
    }

    async fn create_contact(
        &self,
        user_id: &str,
        contact: &NewContact,
    ) -> ConnectorResult<CrmContact> {
        self.check_user(user_id).await?;
        let id = self.create_counter.fetch_add(1, Ordering::SeqCst);
        let created = CrmContact {
            id: format!("created-{}", id),
            email: Some(contact.email.clone()),
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
            created_at: Utc::now(),
        };
        self.created
            .lock()
            .await
            .push((user_id.to_string(), contact.clone()));
        self.contacts
            .lock()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(created.clone());
        Ok(created)
    }
}

#[derive(Default)]
pub struct MockCalendarConnector {
    /// When empty, three morning slots are generated on the requested date.
    pub fixed_slots: Mutex<Vec<TimeSlot>>,
    pub events: Mutex<Vec<(String, NewCalendarEvent)>>,
    event_counter: AtomicU64,
}

impl MockCalendarConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarConnector for MockCalendarConnector {
    async fn available_times(
        &self,
        _user_id: &str,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> ConnectorResult<Vec<TimeSlot>> {
        let fixed = self.fixed_slots.lock().await;
        if !fixed.is_empty() {
            return Ok(fixed.clone());
        }

        let mut slots = Vec::new();
        let mut start = Utc.from_utc_datetime(
            &date.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap()),
        );
        for _ in 0..3 {
            let end = start + chrono::Duration::minutes(duration_minutes);
            slots.push(TimeSlot { start, end });
            start = end;
        }
        Ok(slots)
    }

    async fn create_event(
        &self,
        user_id: &str,
        event: &NewCalendarEvent,
    ) -> ConnectorResult<CalendarEvent> {
        let id = self.event_counter.fetch_add(1, Ordering::SeqCst);
        self.events
            .lock()
            .await
            .push((user_id.to_string(), event.clone()));
        Ok(CalendarEvent {
            id: format!("event-{}", id),
            title: event.title.clone(),
            start: event.start,
            end: event.end,
        })
    }
}
