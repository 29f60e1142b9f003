use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use super::{
    CalendarConnector, CalendarEvent, ConnectorError, ConnectorResult, ErrorKind, NewCalendarEvent,
    TimeSlot,
};
use crate::core::credentials::{CredentialStore, Service};

const CALENDAR_BASE_URL: &str = "https://www.googleapis.com/calendar/v3";

/// Proposals are confined to business hours, UTC.
const WORK_DAY_START_HOUR: u32 = 9;
const WORK_DAY_END_HOUR: u32 = 17;

// ── Calendar wire DTOs ──

#[derive(Deserialize)]
struct FreeBusyResponse {
    calendars: std::collections::HashMap<String, FreeBusyCalendar>,
}

#[derive(Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<BusyInterval>,
}

#[derive(Deserialize)]
struct BusyInterval {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct EventResponse {
    id: String,
    summary: Option<String>,
    start: EventTime,
    end: EventTime,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    date_time: DateTime<Utc>,
}

/// Walk the working day in `duration`-sized steps and keep every step that
/// does not overlap a busy interval.
pub fn free_slots(
    busy: &[(DateTime<Utc>, DateTime<Utc>)],
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
    duration_minutes: i64,
) -> Vec<TimeSlot> {
    let duration = Duration::minutes(duration_minutes);
    let mut slots = Vec::new();
    let mut cursor = day_start;

    while cursor + duration <= day_end {
        let candidate_end = cursor + duration;
        let clash = busy
            .iter()
            .find(|(b_start, b_end)| cursor < *b_end && candidate_end > *b_start);

        match clash {
            Some((_, b_end)) => cursor = *b_end,
            None => {
                slots.push(TimeSlot {
                    start: cursor,
                    end: candidate_end,
                });
                cursor = candidate_end;
            }
        }
    }
    slots
}

pub struct GoogleCalendarConnector {
    credentials: Arc<CredentialStore>,
    client: Client,
    base_url: String,
}

impl GoogleCalendarConnector {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            client: Client::new(),
            base_url: CALENDAR_BASE_URL.to_string(),
        }
    }

    async fn bearer(&self, user_id: &str) -> ConnectorResult<String> {
        let credential = self
            .credentials
            .get(user_id, Service::Google)
            .await
            .map_err(|e| ConnectorError::new(ErrorKind::Api, e.to_string()))?;

        match credential {
            Some(c) if !c.is_expired(Utc::now()) => Ok(c.access_token),
            Some(_) => Err(ConnectorError::new(
                ErrorKind::AuthExpired,
                format!("google token expired for user {}", user_id),
            )),
            None => Err(ConnectorError::new(
                ErrorKind::AuthExpired,
                format!("no google credentials for user {}", user_id),
            )),
        }
    }
}

#[async_trait::async_trait]
impl CalendarConnector for GoogleCalendarConnector {
    async fn available_times(
        &self,
        user_id: &str,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> ConnectorResult<Vec<TimeSlot>> {
        let token = self.bearer(user_id).await?;

        let day_start = Utc.from_utc_datetime(
            &date.and_time(NaiveTime::from_hms_opt(WORK_DAY_START_HOUR, 0, 0).unwrap()),
        );
        let day_end = Utc.from_utc_datetime(
            &date.and_time(NaiveTime::from_hms_opt(WORK_DAY_END_HOUR, 0, 0).unwrap()),
        );

        let body = serde_json::json!({
            "timeMin": day_start.to_rfc3339(),
            "timeMax": day_end.to_rfc3339(),
            "items": [{ "id": "primary" }],
        });

        let res = self
            .client
            .post(format!("{}/freeBusy", self.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            return Err(ConnectorError::from_status(
                status,
                res.text().await.unwrap_or_default(),
            ));
        }
        let parsed: FreeBusyResponse = res.json().await?;
        let busy: Vec<(DateTime<Utc>, DateTime<Utc>)> = parsed
            .calendars
            .get("primary")
            .map(|c| c.busy.iter().map(|b| (b.start, b.end)).collect())
            .unwrap_or_default();

        Ok(free_slots(&busy, day_start, day_end, duration_minutes))
    }

    async fn create_event(
        &self,
        user_id: &str,
        event: &NewCalendarEvent,
    ) -> ConnectorResult<CalendarEvent> {
        let token = self.bearer(user_id).await?;

        let body = serde_json::json!({
            "summary": event.title,
            "description": event.description,
            "start": { "dateTime": event.start.to_rfc3339() },
            "end": { "dateTime": event.end.to_rfc3339() },
            "attendees": event.attendees.iter()
                .map(|email| serde_json::json!({ "email": email }))
                .collect::<Vec<_>>(),
        });

        let res = self
            .client
            .post(format!("{}/calendars/primary/events", self.base_url))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            return Err(ConnectorError::from_status(
                status,
                res.text().await.unwrap_or_default(),
            ));
        }
        let created: EventResponse = res.json().await?;
        Ok(CalendarEvent {
            id: created.id,
            title: created.summary.unwrap_or_else(|| event.title.clone()),
            start: created.start.date_time,
            end: created.end.date_time,
        })
    }
}
