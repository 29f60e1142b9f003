use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::Config;
use crate::core::connectors::{CalendarConnector, CrmConnector, EmailConnector};
use crate::core::connectors::calendar::GoogleCalendarConnector;
use crate::core::connectors::gmail::GmailConnector;
use crate::core::connectors::hubspot::HubspotConnector;
use crate::core::credentials::CredentialStore;
use crate::core::lifecycle::LifecycleManager;
use crate::core::llm::LlmClient;
use crate::core::llm::openai::OpenAiClient;
use crate::core::pollers::contacts::ContactPoller;
use crate::core::pollers::email::EmailPoller;
use crate::core::pollers::PollerSettings;
use crate::core::proactive::ProactiveProcessor;
use crate::core::queue::TaskQueue;
use crate::core::store::{CursorStore, InMemoryCursorStore, SqliteCursorStore, Storage};
use crate::core::tools::ToolRegistry;
use crate::core::tools::appointments::ScheduleAppointmentTool;
use crate::core::tools::calendar::{CreateCalendarEventTool, GetAvailableTimesTool};
use crate::core::tools::contacts::{CreateContactTool, SearchContactsTool};
use crate::core::tools::email::SendEmailTool;
use crate::interfaces::web::{ApiServer, AppState};

/// Both pollers run on 30-second cadences, staggered by half a cycle so
/// their cycles do not start together.
const EMAIL_POLL_SCHEDULE: &str = "0/30 * * * * *";
const CONTACT_POLL_SCHEDULE: &str = "15/30 * * * * *";
const TASK_PROCESS_SCHEDULE: &str = "5/20 * * * * *";
const TASK_CONTINUE_SCHEDULE: &str = "10 * * * * *";
const TASK_RETENTION_SCHEDULE: &str = "40 10 3 * * *";

/// Wires storage, connectors, the tool catalog, the processor, the queue,
/// and the pollers, then registers the background jobs.
pub struct Assistant {
    config: Config,
    lifecycle: LifecycleManager,
}

impl Assistant {
    pub async fn boot(
        config: Config,
        log_tx: tokio::sync::broadcast::Sender<String>,
    ) -> Result<Self> {
        info!("Booting steward (data dir: {:?})", config.data_dir);

        let storage = Arc::new(Storage::open(&config.data_dir).await?);
        let credentials = Arc::new(CredentialStore::new(&storage));

        let email: Arc<dyn EmailConnector> = Arc::new(GmailConnector::new(credentials.clone()));
        let crm: Arc<dyn CrmConnector> = Arc::new(HubspotConnector::new(credentials.clone()));
        let calendar: Arc<dyn CalendarConnector> =
            Arc::new(GoogleCalendarConnector::new(credentials.clone()));
        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(
            config.openai_api_key.clone(),
            config.openai_model.clone(),
        ));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SearchContactsTool::new(crm.clone())));
        registry.register(Arc::new(CreateContactTool::new(crm.clone())));
        registry.register(Arc::new(SendEmailTool::new(email.clone())));
        registry.register(Arc::new(GetAvailableTimesTool::new(calendar.clone())));
        registry.register(Arc::new(CreateCalendarEventTool::new(calendar.clone())));
        registry.register(Arc::new(ScheduleAppointmentTool::new(
            crm.clone(),
            calendar.clone(),
            email.clone(),
            storage.clone(),
        )));
        let tools = Arc::new(registry);

        let processor = Arc::new(ProactiveProcessor::new(
            storage.clone(),
            llm.clone(),
            tools.clone(),
        ));
        let queue = Arc::new(TaskQueue::new(
            storage.clone(),
            processor.clone(),
            email.clone(),
            crm.clone(),
            calendar.clone(),
            llm.clone(),
        ));

        let cursors: Arc<dyn CursorStore> = if config.durable_cursors {
            Arc::new(SqliteCursorStore::new(&storage))
        } else {
            Arc::new(InMemoryCursorStore::new())
        };
        let settings = PollerSettings {
            concurrency: config.poller_concurrency,
            per_user_timeout: config.per_user_timeout,
        };
        let email_poller = Arc::new(EmailPoller::new(
            credentials.clone(),
            email.clone(),
            crm.clone(),
            processor.clone(),
            cursors.clone(),
            settings.clone(),
        ));
        let contact_poller = Arc::new(ContactPoller::new(
            credentials.clone(),
            crm.clone(),
            processor.clone(),
            storage.clone(),
            cursors,
            settings,
        ));

        let mut lifecycle = LifecycleManager::new().await?;

        {
            let poller = email_poller.clone();
            lifecycle
                .schedule("email-poller", EMAIL_POLL_SCHEDULE, move || {
                    let poller = poller.clone();
                    async move {
                        poller.poll().await;
                        Ok(())
                    }
                })
                .await?;
        }

        {
            let poller = contact_poller.clone();
            lifecycle
                .schedule("contact-poller", CONTACT_POLL_SCHEDULE, move || {
                    let poller = poller.clone();
                    async move {
                        poller.poll().await;
                        Ok(())
                    }
                })
                .await?;
        }

        {
            let queue = queue.clone();
            lifecycle
                .schedule("task-processor", TASK_PROCESS_SCHEDULE, move || {
                    let queue = queue.clone();
                    async move { queue.process_pending_tasks().await.map(|_| ()) }
                })
                .await?;
        }

        {
            let queue = queue.clone();
            lifecycle
                .schedule("task-continuation", TASK_CONTINUE_SCHEDULE, move || {
                    let queue = queue.clone();
                    async move { queue.continue_waiting_tasks().await.map(|_| ()) }
                })
                .await?;
        }

        {
            let storage = storage.clone();
            let retention_days = config.task_retention_days;
            lifecycle
                .schedule("task-retention", TASK_RETENTION_SCHEDULE, move || {
                    let storage = storage.clone();
                    async move {
                        let purged = storage.purge_terminal_tasks(retention_days).await?;
                        if purged > 0 {
                            info!("Retention purged {} task(s)", purged);
                        }
                        Ok(())
                    }
                })
                .await?;
        }

        lifecycle.attach(Arc::new(Mutex::new(ApiServer::new(
            AppState {
                storage,
                queue,
                processor,
                credentials,
                log_tx,
            },
            config.api_host.clone(),
            config.api_port,
        ))));

        Ok(Self { config, lifecycle })
    }

    pub async fn run(mut self) -> Result<()> {
        self.lifecycle.start().await?;
        info!(
            "steward ready on {}:{}",
            self.config.api_host, self.config.api_port
        );

        tokio::signal::ctrl_c().await?;
        info!("steward shutting down");
        self.lifecycle.shutdown().await?;
        Ok(())
    }
}
