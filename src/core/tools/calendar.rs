use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::Tool;
use crate::core::connectors::{CalendarConnector, NewCalendarEvent};

fn default_duration() -> i64 {
    30
}

pub struct GetAvailableTimesTool {
    calendar: Arc<dyn CalendarConnector>,
}

impl GetAvailableTimesTool {
    pub fn new(calendar: Arc<dyn CalendarConnector>) -> Self {
        Self { calendar }
    }
}

#[derive(Deserialize)]
struct AvailableTimesParams {
    /// ISO date, e.g. 2026-06-02.
    date: NaiveDate,
    #[serde(default = "default_duration")]
    duration_minutes: i64,
}

#[async_trait]
impl Tool for GetAvailableTimesTool {
    fn name(&self) -> &'static str {
        "get_available_times"
    }

    fn description(&self) -> &'static str {
        "List the advisor's open calendar slots on a given date."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "date": { "type": "string", "description": "ISO date (YYYY-MM-DD)" },
                "duration_minutes": { "type": "integer", "description": "Slot length, default 30" }
            },
            "required": ["date"]
        })
    }

    async fn execute(
        &self,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: AvailableTimesParams =
            serde_json::from_value(params).context("invalid get_available_times params")?;
        let slots = self
            .calendar
            .available_times(user_id, params.date, params.duration_minutes)
            .await?;
        Ok(serde_json::json!({
            "date": params.date,
            "slots": slots,
        }))
    }
}

pub struct CreateCalendarEventTool {
    calendar: Arc<dyn CalendarConnector>,
}

impl CreateCalendarEventTool {
    pub fn new(calendar: Arc<dyn CalendarConnector>) -> Self {
        Self { calendar }
    }
}

#[derive(Deserialize)]
struct CreateEventParams {
    title: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    #[serde(default)]
    attendees: Vec<String>,
    description: Option<String>,
}

#[async_trait]
impl Tool for CreateCalendarEventTool {
    fn name(&self) -> &'static str {
        "create_calendar_event"
    }

    fn description(&self) -> &'static str {
        "Create a calendar event with the given attendees."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string" },
                "start": { "type": "string", "description": "RFC 3339 start time" },
                "end": { "type": "string", "description": "RFC 3339 end time" },
                "attendees": { "type": "array", "items": { "type": "string" } },
                "description": { "type": "string" }
            },
            "required": ["title", "start", "end"]
        })
    }

    async fn execute(
        &self,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: CreateEventParams =
            serde_json::from_value(params).context("invalid create_calendar_event params")?;
        let event = self
            .calendar
            .create_event(
                user_id,
                &NewCalendarEvent {
                    title: params.title,
                    start: params.start,
                    end: params.end,
                    attendees: params.attendees,
                    description: params.description,
                },
            )
            .await?;
        Ok(serde_json::json!({ "event": event }))
    }
}
