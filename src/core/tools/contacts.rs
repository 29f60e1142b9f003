use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::Tool;
use crate::core::connectors::{CrmConnector, NewContact};

pub struct SearchContactsTool {
    crm: Arc<dyn CrmConnector>,
}

impl SearchContactsTool {
    pub fn new(crm: Arc<dyn CrmConnector>) -> Self {
        Self { crm }
    }
}

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
}

#[async_trait]
impl Tool for SearchContactsTool {
    fn name(&self) -> &'static str {
        "search_contacts"
    }

    fn description(&self) -> &'static str {
        "Search CRM contacts by name. An empty query returns every contact."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Name or partial name to search for"
                }
            }
        })
    }

    async fn execute(
        &self,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: SearchParams =
            serde_json::from_value(params).context("invalid search_contacts params")?;
        let contacts = self.crm.search_contacts(user_id, &params.query).await?;
        Ok(serde_json::json!({
            "count": contacts.len(),
            "contacts": contacts,
        }))
    }
}

pub struct CreateContactTool {
    crm: Arc<dyn CrmConnector>,
}

impl CreateContactTool {
    pub fn new(crm: Arc<dyn CrmConnector>) -> Self {
        Self { crm }
    }
}

#[derive(Deserialize)]
struct CreateParams {
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[async_trait]
impl Tool for CreateContactTool {
    fn name(&self) -> &'static str {
        "create_contact"
    }

    fn description(&self) -> &'static str {
        "Create a new CRM contact from an email address and optional name."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "description": "Contact email address" },
                "first_name": { "type": "string" },
                "last_name": { "type": "string" }
            },
            "required": ["email"]
        })
    }

    async fn execute(
        &self,
        user_id: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let params: CreateParams =
            serde_json::from_value(params).context("invalid create_contact params")?;
        let created = self
            .crm
            .create_contact(
                user_id,
                &NewContact {
                    email: params.email,
                    first_name: params.first_name,
                    last_name: params.last_name,
                },
            )
            .await?;
        Ok(serde_json::json!({ "contact": created }))
    }
}
