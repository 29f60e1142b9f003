pub mod calendar;
pub mod gmail;
pub mod hubspot;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

/// Failure classification at the connector boundary. Pollers branch on the
/// kind structurally instead of sniffing error-message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthExpired,
    RateLimited,
    Network,
    Api,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("connector error ({kind}): {message}")]
pub struct ConnectorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ConnectorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map an HTTP status to a kind. 401/403 mean the stored token no longer
    /// works; 429 is backpressure; everything else non-2xx is an API fault.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::AuthExpired,
            429 => ErrorKind::RateLimited,
            _ => ErrorKind::Api,
        };
        Self::new(kind, message)
    }
}

impl From<reqwest::Error> for ConnectorError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(ErrorKind::Network, err.to_string())
    }
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrmContact {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CrmContact {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.email.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewContact {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn display(&self) -> String {
        format!(
            "{} - {} UTC",
            self.start.format("%a %b %-d, %H:%M"),
            self.end.format("%H:%M")
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NewCalendarEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Inbox access, newest-first listing plus search and send.
#[async_trait]
pub trait EmailConnector: Send + Sync {
    async fn list_recent_messages(
        &self,
        user_id: &str,
        count: usize,
    ) -> ConnectorResult<Vec<EmailMessage>>;

    async fn search_messages(
        &self,
        user_id: &str,
        query: &str,
        count: usize,
    ) -> ConnectorResult<Vec<EmailMessage>>;

    /// Returns the sent message id.
    async fn send_email(&self, user_id: &str, email: &OutgoingEmail) -> ConnectorResult<String>;
}

/// CRM contact lookup and creation. `list_contacts` makes no ordering
/// guarantee; callers sort.
#[async_trait]
pub trait CrmConnector: Send + Sync {
    async fn list_contacts(&self, user_id: &str) -> ConnectorResult<Vec<CrmContact>>;

    async fn search_contacts(&self, user_id: &str, query: &str)
    -> ConnectorResult<Vec<CrmContact>>;

    async fn find_contact_by_email(
        &self,
        user_id: &str,
        email: &str,
    ) -> ConnectorResult<Option<CrmContact>>;

    async fn create_contact(
        &self,
        user_id: &str,
        contact: &NewContact,
    ) -> ConnectorResult<CrmContact>;
}

#[async_trait]
pub trait CalendarConnector: Send + Sync {
    async fn available_times(
        &self,
        user_id: &str,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> ConnectorResult<Vec<TimeSlot>>;

    async fn create_event(
        &self,
        user_id: &str,
        event: &NewCalendarEvent,
    ) -> ConnectorResult<CalendarEvent>;
}

/// Extract the bare address from an RFC 5322 mailbox like
/// `"Jane Doe" <jane@example.com>`. Falls back to the trimmed raw string
/// when there are no angle brackets.
pub fn parse_mailbox(raw: &str) -> String {
    if let (Some(open), Some(close)) = (raw.rfind('<'), raw.rfind('>'))
        && open < close
    {
        return raw[open + 1..close].trim().to_string();
    }
    raw.trim().to_string()
}

/// Loose shape check to discard senders that are not addresses at all
/// (bounce pseudo-headers, empty From lines) before querying the CRM.
pub fn looks_like_email(addr: &str) -> bool {
    let re = regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    re.is_match(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mailbox_extracts_bracketed_address() {
        assert_eq!(
            parse_mailbox("Jane Doe <jane@example.com>"),
            "jane@example.com"
        );
        assert_eq!(
            parse_mailbox("\"Doe, Jane\" <jane@example.com>"),
            "jane@example.com"
        );
    }

    #[test]
    fn parse_mailbox_falls_back_to_raw_string() {
        assert_eq!(parse_mailbox("jane@example.com"), "jane@example.com");
        assert_eq!(parse_mailbox("  jane@example.com  "), "jane@example.com");
    }

    #[test]
    fn parse_mailbox_handles_malformed_brackets() {
        assert_eq!(parse_mailbox("jane> <example"), "jane> <example");
        assert_eq!(parse_mailbox("< spaced@addr.com >"), "spaced@addr.com");
    }

    #[test]
    fn email_shape_check_rejects_non_addresses() {
        assert!(looks_like_email("jane@example.com"));
        assert!(looks_like_email("j.doe+tag@mail.example.co.uk"));
        assert!(!looks_like_email("MAILER-DAEMON"));
        assert!(!looks_like_email("jane@localhost"));
        assert!(!looks_like_email("two words@example.com"));
        assert!(!looks_like_email(""));
    }

    #[test]
    fn status_mapping_classifies_auth_and_rate_limits() {
        assert_eq!(ConnectorError::from_status(401, "").kind, ErrorKind::AuthExpired);
        assert_eq!(ConnectorError::from_status(403, "").kind, ErrorKind::AuthExpired);
        assert_eq!(ConnectorError::from_status(429, "").kind, ErrorKind::RateLimited);
        assert_eq!(ConnectorError::from_status(500, "").kind, ErrorKind::Api);
    }

    #[test]
    fn display_name_prefers_full_name_then_email() {
        let mut contact = CrmContact {
            id: "c".into(),
            email: Some("a@b.com".into()),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            created_at: Utc::now(),
        };
        assert_eq!(contact.display_name(), "Ada Lovelace");

        contact.last_name = None;
        assert_eq!(contact.display_name(), "Ada");

        contact.first_name = None;
        assert_eq!(contact.display_name(), "a@b.com");
    }

    #[test]
    fn time_slot_display_is_compact() {
        let start = DateTime::parse_from_rfc3339("2026-06-02T14:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let end = start + chrono::Duration::minutes(30);
        let slot = TimeSlot { start, end };
        assert_eq!(slot.display(), "Tue Jun 2, 14:00 - 14:30 UTC");
    }
}
