use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use super::{EMAIL_CURSOR, PollerSettings, fan_out};
use crate::core::connectors::{
    CrmConnector, EmailConnector, EmailMessage, looks_like_email, parse_mailbox,
};
use crate::core::credentials::{CredentialStore, Service};
use crate::core::proactive::ProactiveProcessor;
use crate::core::store::CursorStore;

/// Messages fetched per user per cycle, newest first.
const FETCH_COUNT: usize = 10;

/// Watches every inbox we hold Google credentials for and reacts when a
/// message arrives from an address the CRM does not know. The low-water mark
/// is the id of the newest message already evaluated; anything at or before
/// it is never re-examined, so an older unprocessed message skipped past is
/// not revisited.
pub struct EmailPoller {
    credentials: Arc<CredentialStore>,
    email: Arc<dyn EmailConnector>,
    crm: Arc<dyn CrmConnector>,
    processor: Arc<ProactiveProcessor>,
    cursors: Arc<dyn CursorStore>,
    settings: PollerSettings,
}

impl EmailPoller {
    pub fn new(
        credentials: Arc<CredentialStore>,
        email: Arc<dyn EmailConnector>,
        crm: Arc<dyn CrmConnector>,
        processor: Arc<ProactiveProcessor>,
        cursors: Arc<dyn CursorStore>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            credentials,
            email,
            crm,
            processor,
            cursors,
            settings,
        }
    }

    pub async fn poll(self: Arc<Self>) {
        let users = match self.credentials.users_with_valid(Service::Google).await {
            Ok(users) => users,
            Err(e) => {
                error!("[email-poller] could not enumerate users: {}", e);
                return;
            }
        };

        let poller = self.clone();
        fan_out("email-poller", users, &self.settings, move |user| {
            let poller = poller.clone();
            async move { poller.poll_user(&user).await }
        })
        .await;
    }

    pub async fn poll_user(&self, user_id: &str) -> Result<()> {
        let messages = self.email.list_recent_messages(user_id, FETCH_COUNT).await?;
        let Some(newest) = messages.first() else {
            return Ok(());
        };
        let newest_id = newest.id.clone();

        let last_seen = self.cursors.last_seen(EMAIL_CURSOR, user_id).await?;
        let candidates: Vec<&EmailMessage> = messages
            .iter()
            .take_while(|m| last_seen.as_deref() != Some(m.id.as_str()))
            .collect();

        // Oldest candidate first, so reactions land in arrival order.
        for message in candidates.into_iter().rev() {
            self.process_message(user_id, message).await?;
        }

        // Advance to the newest id after the batch whether or not any event
        // fired; the next cycle starts above it.
        self.cursors.advance(EMAIL_CURSOR, user_id, &newest_id).await?;
        Ok(())
    }

    async fn process_message(&self, user_id: &str, message: &EmailMessage) -> Result<()> {
        let sender = parse_mailbox(&message.from);
        if !looks_like_email(&sender) {
            return Ok(());
        }

        let known = self.crm.find_contact_by_email(user_id, &sender).await?;
        if known.is_some() {
            return Ok(());
        }

        info!(
            "[email-poller] message {} for user {} is from unknown sender {}",
            message.id, user_id, sender
        );

        let event = serde_json::json!({
            "message_id": message.id,
            "thread_id": message.thread_id,
            "from": message.from,
            "sender_email": sender,
            "subject": message.subject,
            "snippet": message.snippet,
            "received_at": message.received_at,
        });
        let outcome = self
            .processor
            .process_proactive_event(user_id, "email_from_unknown_sender", &event, None)
            .await;
        if let Some(text) = outcome.text {
            info!("[email-poller] assistant: {}", text);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::{InMemoryCursorStore, Storage};
    use crate::core::tools::ToolRegistry;
    use crate::testkit::{MockCrmConnector, MockEmailConnector, ScriptedLlm, contact, message};
    use chrono::{Duration, Utc};

    struct Fixture {
        poller: Arc<EmailPoller>,
        email: Arc<MockEmailConnector>,
        crm: Arc<MockCrmConnector>,
        llm: Arc<ScriptedLlm>,
        cursors: Arc<InMemoryCursorStore>,
        credentials: Arc<CredentialStore>,
    }

    async fn fixture(llm_outcomes: Vec<Result<crate::core::llm::ChatOutcome>>) -> Fixture {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let credentials = Arc::new(CredentialStore::new(&storage));
        credentials
            .upsert("u", Service::Google, "token", None, None)
            .await
            .unwrap();

        let email = Arc::new(MockEmailConnector::new());
        let crm = Arc::new(MockCrmConnector::new());
        let llm = Arc::new(ScriptedLlm::new(llm_outcomes));
        let processor = Arc::new(ProactiveProcessor::new(
            storage,
            llm.clone(),
            Arc::new(ToolRegistry::new()),
        ));
        let cursors = Arc::new(InMemoryCursorStore::new());

        let poller = Arc::new(EmailPoller::new(
            credentials.clone(),
            email.clone(),
            crm.clone(),
            processor,
            cursors.clone(),
            PollerSettings::default(),
        ));
        Fixture {
            poller,
            email,
            crm,
            llm,
            cursors,
            credentials,
        }
    }

    #[tokio::test]
    async fn unknown_sender_fires_event_and_advances_mark() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("noted"))]).await;
        fx.email
            .set_inbox("u", vec![message("m1", "Stranger <new@x.com>", Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.llm.calls_made().await, 1);
        assert_eq!(
            fx.cursors.last_seen(EMAIL_CURSOR, "u").await.unwrap(),
            Some("m1".to_string())
        );
    }

    #[tokio::test]
    async fn known_sender_fires_nothing_but_still_advances() {
        let fx = fixture(vec![]).await;
        fx.crm
            .set_contacts("u", vec![contact("c1", Some("client@x.com"), None, Utc::now())])
            .await;
        fx.email
            .set_inbox("u", vec![message("m1", "A Client <client@x.com>", Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.llm.calls_made().await, 0);
        assert_eq!(
            fx.cursors.last_seen(EMAIL_CURSOR, "u").await.unwrap(),
            Some("m1".to_string())
        );
    }

    #[tokio::test]
    async fn repolling_the_same_batch_detects_nothing_new() {
        let fx = fixture(vec![
            Ok(ScriptedLlm::text("noted")),
            Ok(ScriptedLlm::text("noted")),
        ])
        .await;
        let inbox = vec![
            message("m2", "two@x.com", Utc::now()),
            message("m1", "one@x.com", Utc::now() - Duration::minutes(5)),
        ];
        fx.email.set_inbox("u", inbox.clone()).await;

        fx.poller.clone().poll().await;
        assert_eq!(fx.llm.calls_made().await, 2);

        // Same batch again: m2 is the low-water mark, so zero detections.
        fx.email.set_inbox("u", inbox).await;
        fx.poller.clone().poll().await;
        assert_eq!(fx.llm.calls_made().await, 2);
    }

    #[tokio::test]
    async fn walk_stops_at_the_low_water_mark() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("noted"))]).await;
        fx.cursors.advance(EMAIL_CURSOR, "u", "m2").await.unwrap();
        fx.email
            .set_inbox(
                "u",
                vec![
                    message("m3", "three@x.com", Utc::now()),
                    message("m2", "two@x.com", Utc::now() - Duration::minutes(5)),
                    message("m1", "one@x.com", Utc::now() - Duration::minutes(10)),
                ],
            )
            .await;

        fx.poller.clone().poll().await;

        // Only m3 is above the mark.
        assert_eq!(fx.llm.calls_made().await, 1);
        let seen = fx.llm.seen().await;
        assert!(seen[0][1].content.as_ref().unwrap().contains("m3"));
    }

    #[tokio::test]
    async fn candidates_are_processed_oldest_first() {
        let fx = fixture(vec![
            Ok(ScriptedLlm::text("noted")),
            Ok(ScriptedLlm::text("noted")),
        ])
        .await;
        fx.email
            .set_inbox(
                "u",
                vec![
                    message("m2", "two@x.com", Utc::now()),
                    message("m1", "one@x.com", Utc::now() - Duration::minutes(5)),
                ],
            )
            .await;

        fx.poller.clone().poll().await;

        let seen = fx.llm.seen().await;
        assert!(seen[0][1].content.as_ref().unwrap().contains("m1"));
        assert!(seen[1][1].content.as_ref().unwrap().contains("m2"));
    }

    #[tokio::test]
    async fn non_address_sender_is_ignored_but_mark_advances() {
        let fx = fixture(vec![]).await;
        fx.email
            .set_inbox("u", vec![message("m1", "MAILER-DAEMON", Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.llm.calls_made().await, 0);
        assert_eq!(
            fx.cursors.last_seen(EMAIL_CURSOR, "u").await.unwrap(),
            Some("m1".to_string())
        );
    }

    #[tokio::test]
    async fn empty_inbox_leaves_the_mark_unset() {
        let fx = fixture(vec![]).await;
        fx.poller.clone().poll().await;
        assert_eq!(fx.cursors.last_seen(EMAIL_CURSOR, "u").await.unwrap(), None);
    }

    #[tokio::test]
    async fn one_users_expired_token_does_not_block_the_rest() {
        let fx = fixture(vec![Ok(ScriptedLlm::text("noted"))]).await;
        fx.credentials
            .upsert("expired", Service::Google, "token", None, None)
            .await
            .unwrap();
        fx.email
            .auth_expired_users
            .lock()
            .await
            .insert("expired".to_string());
        fx.email
            .set_inbox("u", vec![message("m1", "new@x.com", Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        // The healthy user was still processed.
        assert_eq!(fx.llm.calls_made().await, 1);
        assert_eq!(
            fx.cursors.last_seen(EMAIL_CURSOR, "u").await.unwrap(),
            Some("m1".to_string())
        );
        assert_eq!(
            fx.cursors.last_seen(EMAIL_CURSOR, "expired").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn mark_is_not_advanced_when_the_iteration_errors() {
        // CRM down: processing the candidate fails before the advance.
        let fx = fixture(vec![]).await;
        fx.crm.failing_users.lock().await.insert("u".to_string());
        fx.email
            .set_inbox("u", vec![message("m1", "new@x.com", Utc::now())])
            .await;

        fx.poller.clone().poll().await;

        assert_eq!(fx.cursors.last_seen(EMAIL_CURSOR, "u").await.unwrap(), None);
    }
}
