use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::Tool;
use crate::core::connectors::{EmailConnector, OutgoingEmail};

pub struct SendEmailTool {
    email: Arc<dyn EmailConnector>,
}

impl SendEmailTool {
    pub fn new(email: Arc<dyn EmailConnector>) -> Self {
        Self { email }
    }
}

#[derive(Deserialize)]
struct SendParams {
    to: String,
    subject: String,
    body: String,
    thread_id: Option<String>,
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &'static str {
        "send_email"
    }

    fn description(&self) -> &'static str {
        "Send an email on the advisor's behalf. Pass thread_id to reply within an existing thread."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "to": { "type": "string", "description": "Recipient email address" },
                "subject": { "type": "string" },
                "body": { "type": "string" },
                "thread_id": { "type": "string", "description": "Existing thread to reply to" }
            },
            "required": ["to", "subject", "body"]
        })
    }

    async fn execute(
        &self,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: SendParams =
            serde_json::from_value(params).context("invalid send_email params")?;
        let message_id = self
            .email
            .send_email(
                user_id,
                &OutgoingEmail {
                    to: params.to.clone(),
                    subject: params.subject,
                    body: params.body,
                    thread_id: params.thread_id,
                },
            )
            .await?;
        Ok(serde_json::json!({ "message_id": message_id, "to": params.to }))
    }
}
