use base64::Engine;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use super::{ConnectorError, ConnectorResult, EmailConnector, EmailMessage, ErrorKind, OutgoingEmail};
use crate::core::credentials::{CredentialStore, Service};

const GMAIL_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ── Gmail wire DTOs ──

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<ListEntry>,
}

#[derive(Deserialize)]
struct ListEntry {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    id: String,
    thread_id: String,
    #[serde(default)]
    snippet: String,
    internal_date: Option<String>,
    payload: Option<MessagePayload>,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<MessageHeader>,
}

#[derive(Deserialize)]
struct MessageHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    id: String,
}

impl MessageResponse {
    fn header(&self, name: &str) -> String {
        self.payload
            .as_ref()
            .and_then(|p| {
                p.headers
                    .iter()
                    .find(|h| h.name.eq_ignore_ascii_case(name))
                    .map(|h| h.value.clone())
            })
            .unwrap_or_default()
    }

    fn into_message(self) -> EmailMessage {
        let from = self.header("From");
        let subject = self.header("Subject");
        let received_at = self
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        EmailMessage {
            id: self.id,
            thread_id: self.thread_id,
            from,
            subject,
            snippet: self.snippet,
            received_at,
        }
    }
}

/// Thin Gmail wire client. The hard problem lives in the pollers and the
/// orchestrator; this only moves bytes.
pub struct GmailConnector {
    credentials: Arc<CredentialStore>,
    client: Client,
    base_url: String,
}

impl GmailConnector {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            client: Client::new(),
            base_url: GMAIL_BASE_URL.to_string(),
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

    async fn fetch_message(&self, token: &str, id: &str) -> ConnectorResult<EmailMessage> {
        let res = self
            .client
            .get(format!("{}/messages/{}", self.base_url, id))
            .query(&[("format", "metadata")])
            .bearer_auth(token)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            return Err(ConnectorError::from_status(
                status,
                res.text().await.unwrap_or_default(),
            ));
        }
        let parsed: MessageResponse = res.json().await?;
        Ok(parsed.into_message())
    }

    async fn list_ids(
        &self,
        token: &str,
        query: Option<&str>,
        count: usize,
    ) -> ConnectorResult<Vec<String>> {
        let mut url = format!("{}/messages?maxResults={}", self.base_url, count);
        if let Some(q) = query {
            url.push_str(&format!("&q={}", urlencoding::encode(q)));
        }

        let res = self.client.get(url).bearer_auth(token).send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            return Err(ConnectorError::from_status(
                status,
                res.text().await.unwrap_or_default(),
            ));
        }
        let parsed: ListResponse = res.json().await?;
        Ok(parsed.messages.into_iter().map(|m| m.id).collect())
    }
}

/// RFC 2822 message assembled for Gmail's raw-send endpoint.
fn build_raw_message(email: &OutgoingEmail) -> String {
    let rfc2822 = format!(
        "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
        email.to, email.subject, email.body
    );
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(rfc2822)
}

#[async_trait::async_trait]
impl EmailConnector for GmailConnector {
    async fn list_recent_messages(
        &self,
        user_id: &str,
        count: usize,
    ) -> ConnectorResult<Vec<EmailMessage>> {
        let token = self.bearer(user_id).await?;
        let ids = self.list_ids(&token, None, count).await?;

        // The list endpoint returns ids newest-first; preserve that order.
        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            messages.push(self.fetch_message(&token, &id).await?);
        }
        Ok(messages)
    }

    async fn search_messages(
        &self,
        user_id: &str,
        query: &str,
        count: usize,
    ) -> ConnectorResult<Vec<EmailMessage>> {
        let token = self.bearer(user_id).await?;
        let ids = self.list_ids(&token, Some(query), count).await?;

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            messages.push(self.fetch_message(&token, &id).await?);
        }
        Ok(messages)
    }

    async fn send_email(&self, user_id: &str, email: &OutgoingEmail) -> ConnectorResult<String> {
        let token = self.bearer(user_id).await?;

        let mut body = serde_json::json!({ "raw": build_raw_message(email) });
        if let Some(thread_id) = &email.thread_id {
            body["threadId"] = serde_json::json!(thread_id);
        }

        let res = self
            .client
            .post(format!("{}/messages/send", self.base_url))
            .bearer_auth(token)
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
        let parsed: SendResponse = res.json().await?;
        Ok(parsed.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_encodes_headers_and_body() {
        let email = OutgoingEmail {
            to: "client@example.com".into(),
            subject: "Proposed times".into(),
            body: "Hi there".into(),
            thread_id: None,
        };
        let raw = build_raw_message(&email);
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(raw)
            .unwrap();
        let text = String::from_utf8(decoded).unwrap();
        assert!(text.starts_with("To: client@example.com\r\n"));
        assert!(text.contains("Subject: Proposed times\r\n"));
        assert!(text.ends_with("\r\n\r\nHi there"));
    }

    #[test]
    fn message_response_reads_headers_case_insensitively() {
        let parsed: MessageResponse = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "snippet": "hello",
            "internalDate": "1767225600000",
            "payload": { "headers": [
                { "name": "from", "value": "Jane <jane@example.com>" },
                { "name": "SUBJECT", "value": "Intro" }
            ]}
        }))
        .unwrap();

        let message = parsed.into_message();
        assert_eq!(message.from, "Jane <jane@example.com>");
        assert_eq!(message.subject, "Intro");
        assert_eq!(message.received_at.timestamp(), 1_767_225_600);
    }
}
