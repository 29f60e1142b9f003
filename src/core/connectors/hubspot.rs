use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;

use super::{ConnectorError, ConnectorResult, CrmConnector, CrmContact, ErrorKind, NewContact};
use crate::core::credentials::{CredentialStore, Service};

const HUBSPOT_BASE_URL: &str = "https://api.hubapi.com/crm/v3/objects/contacts";
const CONTACT_PROPERTIES: &str = "email,firstname,lastname,createdate";

// ── HubSpot wire DTOs ──

#[derive(Deserialize)]
struct ContactsPage {
    #[serde(default)]
    results: Vec<ContactObject>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactObject {
    id: String,
    properties: ContactProperties,
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ContactProperties {
    email: Option<String>,
    firstname: Option<String>,
    lastname: Option<String>,
    createdate: Option<DateTime<Utc>>,
}

impl ContactObject {
    fn into_contact(self) -> CrmContact {
        let created_at = self
            .properties
            .createdate
            .or(self.created_at)
            .unwrap_or_else(Utc::now);
        CrmContact {
            id: self.id,
            email: self.properties.email,
            first_name: self.properties.firstname,
            last_name: self.properties.lastname,
            created_at,
        }
    }
}

pub struct HubspotConnector {
    credentials: Arc<CredentialStore>,
    client: Client,
    base_url: String,
}

impl HubspotConnector {
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            client: Client::new(),
            base_url: HUBSPOT_BASE_URL.to_string(),
        }
    }

    async fn bearer(&self, user_id: &str) -> ConnectorResult<String> {
        let credential = self
            .credentials
            .get(user_id, Service::Hubspot)
            .await
            .map_err(|e| ConnectorError::new(ErrorKind::Api, e.to_string()))?;

        match credential {
            Some(c) if !c.is_expired(Utc::now()) => Ok(c.access_token),
            Some(_) => Err(ConnectorError::new(
                ErrorKind::AuthExpired,
                format!("hubspot token expired for user {}", user_id),
            )),
            None => Err(ConnectorError::new(
                ErrorKind::AuthExpired,
                format!("no hubspot credentials for user {}", user_id),
            )),
        }
    }

    async fn search(
        &self,
        token: &str,
        filter: serde_json::Value,
    ) -> ConnectorResult<Vec<CrmContact>> {
        let body = serde_json::json!({
            "filterGroups": [{ "filters": [filter] }],
            "properties": ["email", "firstname", "lastname", "createdate"],
            "limit": 100,
        });

        let res = self
            .client
            .post(format!("{}/search", self.base_url))
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
        let page: ContactsPage = res.json().await?;
        Ok(page.results.into_iter().map(|c| c.into_contact()).collect())
    }
}

#[async_trait::async_trait]
impl CrmConnector for HubspotConnector {
    async fn list_contacts(&self, user_id: &str) -> ConnectorResult<Vec<CrmContact>> {
        let token = self.bearer(user_id).await?;

        let res = self
            .client
            .get(format!(
                "{}?limit=100&properties={}",
                self.base_url, CONTACT_PROPERTIES
            ))
            .bearer_auth(&token)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            return Err(ConnectorError::from_status(
                status,
                res.text().await.unwrap_or_default(),
            ));
        }
        let page: ContactsPage = res.json().await?;
        Ok(page.results.into_iter().map(|c| c.into_contact()).collect())
    }

    async fn search_contacts(
        &self,
        user_id: &str,
        query: &str,
    ) -> ConnectorResult<Vec<CrmContact>> {
        // An empty query degrades to the unordered full listing.
        if query.trim().is_empty() {
            return self.list_contacts(user_id).await;
        }

        let token = self.bearer(user_id).await?;
        let filter = serde_json::json!({
            "propertyName": "firstname",
            "operator": "CONTAINS_TOKEN",
            "value": query,
        });
        self.search(&token, filter).await
    }

    async fn find_contact_by_email(
        &self,
        user_id: &str,
        email: &str,
    ) -> ConnectorResult<Option<CrmContact>> {
        let token = self.bearer(user_id).await?;
        let filter = serde_json::json!({
            "propertyName": "email",
            "operator": "EQ",
            "value": email,
        });
        Ok(self.search(&token, filter).await?.into_iter().next())
    }

    async fn create_contact(
        &self,
        user_id: &str,
        contact: &NewContact,
    ) -> ConnectorResult<CrmContact> {
        let token = self.bearer(user_id).await?;
        let body = serde_json::json!({
            "properties": {
                "email": contact.email,
                "firstname": contact.first_name,
                "lastname": contact.last_name,
            }
        });

        let res = self
            .client
            .post(&self.base_url)
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
        let created: ContactObject = res.json().await?;
        Ok(created.into_contact())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_object_prefers_createdate_property() {
        let parsed: ContactObject = serde_json::from_value(serde_json::json!({
            "id": "101",
            "properties": {
                "email": "a@b.com",
                "firstname": "Ada",
                "lastname": null,
                "createdate": "2026-01-05T10:00:00Z"
            },
            "createdAt": "2026-01-06T10:00:00Z"
        }))
        .unwrap();

        let contact = parsed.into_contact();
        assert_eq!(contact.id, "101");
        assert_eq!(contact.email.as_deref(), Some("a@b.com"));
        assert_eq!(contact.created_at.to_rfc3339(), "2026-01-05T10:00:00+00:00");
    }

    #[test]
    fn contact_object_falls_back_to_envelope_created_at() {
        let parsed: ContactObject = serde_json::from_value(serde_json::json!({
            "id": "102",
            "properties": { "email": null, "firstname": null, "lastname": null, "createdate": null },
            "createdAt": "2026-01-06T10:00:00Z"
        }))
        .unwrap();

        let contact = parsed.into_contact();
        assert_eq!(contact.created_at.to_rfc3339(), "2026-01-06T10:00:00+00:00");
    }
}
