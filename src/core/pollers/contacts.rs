use anyhow::Result;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use super::{CONTACT_CURSOR, PollerSettings, fan_out};
use crate::core::connectors::{CrmConnector, CrmContact};
use crate::core::credentials::{CredentialStore, Service};
use crate::core::proactive::ProactiveProcessor;
use crate::core::store::{CursorStore, Storage};

/// Contacts created longer ago than this are not actionable, even on the
/// first poll after a start.
const LOOK_BACK_HOURS: i64 = 1;

/// Watches each user's CRM for a freshly created contact and greets it once.
/// Dedup is layered: the cursor and the session sets are cheap filters; the
/// durable ledger is the only authoritative at-most-once guard and is always
/// consulted before acting, because the in-memory layers neither survive a
/// restart nor span processes.
pub struct ContactPoller {
    credentials: Arc<CredentialStore>,
    crm: Arc<dyn CrmConnector>,
    processor: Arc<ProactiveProcessor>,
    storage: Arc<Storage>,
    cursors: Arc<dyn CursorStore>,
    settings: PollerSettings,
    /// (user_id, contact_id) pairs already acted on this process lifetime.
    seen_contacts: Mutex<HashSet<(String, String)>>,
    /// (user_id, email) pairs already acted on this process lifetime.
    seen_addresses: Mutex<HashSet<(String, String)>>,
}

impl ContactPoller {
    pub fn new(
        credentials: Arc<CredentialStore>,
        crm: Arc<dyn CrmConnector>,
        processor: Arc<ProactiveProcessor>,
        storage: Arc<Storage>,
        cursors: Arc<dyn CursorStore>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            credentials,
            crm,
            processor,
            storage,
            cursors,
            settings,
            seen_contacts: Mutex::new(HashSet::new()),
            seen_addresses: Mutex::new(HashSet::new()),
        }
    }

    pub async fn poll(self: Arc<Self>) {
        let users = match self.credentials.users_with_valid(Service::Hubspot).await {
            Ok(users) => users,
            Err(e) => {
                error!("[contact-poller] could not enumerate users: {}", e);
                return;
            }
        };

        let poller = self.clone();
        fan_out("contact-poller", users, &self.settings, move |user| {
            let poller = poller.clone();
            async move { poller.poll_user(&user).await }
        })
        .await;
    }

    pub async fn poll_user(&self, user_id: &str) -> Result<()> {
        let mut contacts = self.crm.list_contacts(user_id).await?;
        if contacts.is_empty() {
            return Ok(());
        }

        // The connector makes no ordering promise; only the most recently
        // created contact is inspected each cycle.
        contacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let newest = contacts.remove(0);

        let last_seen = self.cursors.last_seen(CONTACT_CURSOR, user_id).await?;
        if last_seen.as_deref() == Some(newest.id.as_str()) {
            return Ok(());
        }
        if self.in_session_sets(user_id, &newest).await {
            self.cursors.advance(CONTACT_CURSOR, user_id, &newest.id).await?;
            return Ok(());
        }

        let cutoff = Utc::now() - Duration::hours(LOOK_BACK_HOURS);
        if newest.created_at < cutoff {
            // Stale contact: remember it, never act on it.
            self.cursors.advance(CONTACT_CURSOR, user_id, &newest.id).await?;
            return Ok(());
        }

        self.act_on_new_contact(user_id, &newest).await?;
        self.cursors.advance(CONTACT_CURSOR, user_id, &newest.id).await?;
        Ok(())
    }

    async fn in_session_sets(&self, user_id: &str, contact: &CrmContact) -> bool {
        let contact_key = (user_id.to_string(), contact.id.clone());
        if self.seen_contacts.lock().await.contains(&contact_key) {
            return true;
        }
        if let Some(email) = &contact.email {
            let address_key = (user_id.to_string(), email.to_lowercase());
            if self.seen_addresses.lock().await.contains(&address_key) {
                return true;
            }
        }
        false
    }

    async fn remember(&self, user_id: &str, contact: &CrmContact) {
        self.seen_contacts
            .lock()
            .await
            .insert((user_id.to_string(), contact.id.clone()));
        if let Some(email) = &contact.email {
            self.seen_addresses
                .lock()
                .await
                .insert((user_id.to_string(), email.to_lowercase()));
        }
    }

    async fn act_on_new_contact(&self, user_id: &str, contact: &CrmContact) -> Result<()> {
        let Some(email) = contact.email.clone() else {
            info!(
                "[contact-poller] contact {} for user {} has no email; nothing to send",
                contact.id, user_id
            );
            self.remember(user_id, contact).await;
            return Ok(());
        };

        // The ledger is checked synchronously before any side effect. Losing
        // the claim means another cycle, process, or pre-restart run already
        // acted for this pair.
        if !self
            .storage
            .ledger_try_claim(user_id, &contact.id, &email)
            .await?
        {
            info!(
                "[contact-poller] contact {} for user {} already in ledger; skipping",
                contact.id, user_id
            );
            self.remember(user_id, contact).await;
            return Ok(());
        }

        info!(
            "[contact-poller] new contact {} ({}) for user {}",
            contact.id, email, user_id
        );

        let event = serde_json::json!({
            "contact_id": contact.id,
            "email": email,
            "name": contact.display_name(),
            "created_at": contact.created_at,
        });
        let outcome = self
            .processor
            .process_proactive_event(user_id, "new_crm_contact", &event, None)
            .await;
        if let Some(text) = outcome.text {
            info!("[contact-poller] assistant: {}", text);
        }

        self.remember(user_id, contact).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::InMemoryCursorStore;
    use crate::core::tools::ToolRegistry;
    use crate::testkit::{MockCrmConnector, ScriptedLlm, contact};

    struct Fixture {
        poller: Arc<ContactPoller>,
        crm: Arc<MockCrmConnector>,
        llm: Arc<ScriptedLlm>,
        storage: Arc<Storage>,
        cursors: Arc<InMemoryCursorStore>,
        credentials: Arc<CredentialStore>,
    }

    async fn fixture(llm_outcomes: Vec<Result<crate::core::llm::ChatOutcome>>) -> Fixture {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let credentials = Arc::new(CredentialStore::new(&storage));
        credentials
            .upsert("u", Service::Hubspot, "token", None, None)
            .await
            .unwrap();

        let crm = Arc::new(MockCrmConnector::new());
        let llm = Arc::new(ScriptedLlm::new(llm_outcomes));
        let processor = Arc::new(ProactiveProcessor::new(
            storage.clone(),
            llm.clone(),
            Arc::new(ToolRegistry::new()),
        ));
        let cursors = Arc::new(InMemoryCursorStore::new());

        let poller = Arc::new(ContactPoller::new(
            credentials.clone(),
            crm.clone(),
            processor,
            storage.clone(),
            cursors.clone(),
            PollerSettings::default(),
        ));
        Fixture {
            poller,
            crm,
            llm,
            storage,
            cursors,
            credentials,
        }
    }

    #[tokio::test]
    async fn fresh_contact_is_acted_on_exactly_once() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("thanked them"))]).await;
        let recent = contact("c1", Some("a@b.com"), Some("Ada"), Utc::now() - Duration::minutes(2));
        fx.crm.set_contacts("u", vec![recent.clone()]).await;

        fx.poller.clone().poll().await;
        assert_eq!(fx.llm.calls_made().await, 1);
        assert!(fx.storage.ledger_contains("u", "c1").await.unwrap());

        // Second cycle with the same newest contact: the cursor short-circuits.
        fx.poller.clone().poll().await;
        assert_eq!(fx.llm.calls_made().await, 1);
    }

    #[tokio::test]
    async fn contact_older_than_the_window_is_skipped_but_remembered() {
        let fx = fixture(vec![]).await;
        let stale = contact(
            "c1",
            Some("a@b.com"),
            None,
            Utc::now() - Duration::hours(1) - Duration::milliseconds(1),
        );
        fx.crm.set_contacts("u", vec![stale]).await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.llm.calls_made().await, 0);
        assert!(!fx.storage.ledger_contains("u", "c1").await.unwrap());
        // The mark still advanced so the next cycle is cheap.
        assert_eq!(
            fx.cursors.last_seen(CONTACT_CURSOR, "u").await.unwrap(),
            Some("c1".to_string())
        );
    }

    #[tokio::test]
    async fn contact_just_inside_the_window_is_actionable() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("on it"))]).await;
        let fresh = contact(
            "c1",
            Some("a@b.com"),
            None,
            Utc::now() - Duration::hours(1) + Duration::milliseconds(1),
        );
        fx.crm.set_contacts("u", vec![fresh]).await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.llm.calls_made().await, 1);
        assert!(fx.storage.ledger_contains("u", "c1").await.unwrap());
    }

    #[tokio::test]
    async fn only_the_most_recent_contact_is_inspected() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("ok"))]).await;
        // Deliberately out of creation order.
        fx.crm
            .set_contacts(
                "u",
                vec![
                    contact("older", Some("old@b.com"), None, Utc::now() - Duration::minutes(30)),
                    contact("newest", Some("new@b.com"), None, Utc::now() - Duration::minutes(1)),
                ],
            )
            .await;

        fx.poller.clone().poll().await;

        assert!(fx.storage.ledger_contains("u", "newest").await.unwrap());
        assert!(!fx.storage.ledger_contains("u", "older").await.unwrap());
    }

    #[tokio::test]
    async fn ledger_blocks_a_second_run_even_without_session_state() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("thanked"))]).await;
        let recent = contact("c1", Some("a@b.com"), None, Utc::now() - Duration::minutes(2));
        fx.crm.set_contacts("u", vec![recent.clone()]).await;
        fx.poller.clone().poll().await;
        assert_eq!(fx.llm.calls_made().await, 1);

        // A second poller instance: fresh cursor store, fresh session sets,
        // same database. Simulates a restart (or a second process).
        let llm2 = Arc::new(ScriptedLlm::new(vec![Ok(ScriptedLlm::text("again?"))]));
        let processor2 = Arc::new(ProactiveProcessor::new(
            fx.storage.clone(),
            llm2.clone(),
            Arc::new(ToolRegistry::new()),
        ));
        let poller2 = Arc::new(ContactPoller::new(
            fx.credentials.clone(),
            fx.crm.clone(),
            processor2,
            fx.storage.clone(),
            Arc::new(InMemoryCursorStore::new()),
            PollerSettings::default(),
        ));

        poller2.clone().poll().await;

        // Detection fired again, but the ledger made the action a no-op.
        assert_eq!(llm2.calls_made().await, 0);
        let entries = fx.storage.ledger_entries("u").await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn contact_without_email_is_remembered_without_acting() {
        let fx = fixture(vec![]).await;
        fx.crm
            .set_contacts("u", vec![contact("c1", None, Some("Nameless"), Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.llm.calls_made().await, 0);
        assert!(!fx.storage.ledger_contains("u", "c1").await.unwrap());
        assert_eq!(
            fx.cursors.last_seen(CONTACT_CURSOR, "u").await.unwrap(),
            Some("c1".to_string())
        );
    }

    #[tokio::test]
    async fn failing_crm_for_one_user_leaves_others_polled() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("ok"))]).await;
        fx.credentials
            .upsert("broken", Service::Hubspot, "token", None, None)
            .await
            .unwrap();
        fx.crm.failing_users.lock().await.insert("broken".to_string());
        fx.crm
            .set_contacts("u", vec![contact("c1", Some("a@b.com"), None, Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        assert!(fx.storage.ledger_contains("u", "c1").await.unwrap());
    }
}
