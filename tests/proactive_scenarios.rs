//! End-to-end scenarios: real storage, registry, processor, queue, and
//! pollers, with scripted LLM and mock connectors standing in for the
//! outside world.

use std::sync::Arc;

use chrono::{Duration, Utc};
use steward::core::credentials::{CredentialStore, Service};
use steward::core::pollers::PollerSettings;
use steward::core::pollers::contacts::ContactPoller;
use steward::core::pollers::email::EmailPoller;
use steward::core::proactive::ProactiveProcessor;
use steward::core::queue::TaskQueue;
use steward::core::store::types::{TaskStatus, TaskType, TriggerType};
use steward::core::store::{InMemoryCursorStore, Storage};
use steward::core::tools::ToolRegistry;
use steward::core::tools::appointments::ScheduleAppointmentTool;
use steward::core::tools::contacts::CreateContactTool;
use steward::core::tools::email::SendEmailTool;
use steward::testkit::{
    MockCalendarConnector, MockCrmConnector, MockEmailConnector, ScriptedLlm, contact, message,
};

struct World {
    storage: Arc<Storage>,
    credentials: Arc<CredentialStore>,
    email: Arc<MockEmailConnector>,
    crm: Arc<MockCrmConnector>,
    calendar: Arc<MockCalendarConnector>,
    llm: Arc<ScriptedLlm>,
    processor: Arc<ProactiveProcessor>,
    tools: Arc<ToolRegistry>,
}

async fn world(llm_outcomes: Vec<anyhow::Result<steward::core::llm::ChatOutcome>>) -> World {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let credentials = Arc::new(CredentialStore::new(&storage));
    let email = Arc::new(MockEmailConnector::new());
    let crm = Arc::new(MockCrmConnector::new());
    let calendar = Arc::new(MockCalendarConnector::new());
    let llm = Arc::new(ScriptedLlm::new(llm_outcomes));

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SendEmailTool::new(email.clone())));
    registry.register(Arc::new(CreateContactTool::new(crm.clone())));
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

    World {
        storage,
        credentials,
        email,
        crm,
        calendar,
        llm,
        processor,
        tools,
    }
}

fn queue(world: &World) -> TaskQueue {
    TaskQueue::new(
        world.storage.clone(),
        world.processor.clone(),
        world.email.clone(),
        world.crm.clone(),
        world.calendar.clone(),
        world.llm.clone(),
    )
}

#[tokio::test]
async fn new_contact_is_thanked_exactly_once_across_cycles() {
    // First pass: the model sends the thank-you. The script has no further
    // outcomes, so any second invocation would be visible as an extra call.
    let world = world(vec![
        Ok(ScriptedLlm::tool_calls(vec![(
            "call-1",
            "send_email",
            "{\"to\":\"a@b.com\",\"subject\":\"Welcome!\",\"body\":\"Thanks for joining.\"}",
        )])),
        Ok(ScriptedLlm::text("Sent a thank-you note to the new contact.")),
    ])
    .await;

    world
        .credentials
        .upsert("advisor-1", Service::Hubspot, "token", None, None)
        .await
        .unwrap();
    world
        .storage
        .add_instruction(
            "advisor-1",
            "When a new contact appears in the CRM, send them a thank-you email.",
            TriggerType::ContactCreated,
            0,
        )
        .await
        .unwrap();
    world
        .crm
        .set_contacts(
            "advisor-1",
            vec![contact(
                "contact-c",
                Some("a@b.com"),
                Some("Alex"),
                Utc::now() - Duration::minutes(2),
            )],
        )
        .await;

    let poller = Arc::new(ContactPoller::new(
        world.credentials.clone(),
        world.crm.clone(),
        world.processor.clone(),
        world.storage.clone(),
        Arc::new(InMemoryCursorStore::new()),
        PollerSettings::default(),
    ));

    poller.clone().poll().await;

    // Exactly one send, to the contact's address, and one ledger row.
    let sent = world.email.sent.lock().await.clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1.to, "a@b.com");
    let entries = world.storage.ledger_entries("advisor-1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].contact_id, "contact-c");
    assert_eq!(entries[0].email_address, "a@b.com");

    // Second immediate cycle with the same contact as newest: nothing new.
    poller.clone().poll().await;
    assert_eq!(world.email.sent_count().await, 1);
    assert_eq!(world.llm.calls_made().await, 2);
}

#[tokio::test]
async fn unknown_sender_leads_to_a_created_contact() {
    let world = world(vec![
        Ok(ScriptedLlm::tool_calls(vec![(
            "call-1",
            "create_contact",
            "{\"email\":\"stranger@x.com\",\"first_name\":\"Sam\"}",
        )])),
        Ok(ScriptedLlm::text("Added the new sender to the CRM.")),
    ])
    .await;

    world
        .credentials
        .upsert("advisor-1", Service::Google, "token", None, None)
        .await
        .unwrap();
    world
        .storage
        .add_instruction(
            "advisor-1",
            "If someone not in the CRM emails me, create a contact for them.",
            TriggerType::EmailReceived,
            0,
        )
        .await
        .unwrap();
    world
        .email
        .set_inbox(
            "advisor-1",
            vec![message("m-1", "Sam Stranger <stranger@x.com>", Utc::now())],
        )
        .await;

    let poller = Arc::new(EmailPoller::new(
        world.credentials.clone(),
        world.email.clone(),
        world.crm.clone(),
        world.processor.clone(),
        Arc::new(InMemoryCursorStore::new()),
        PollerSettings::default(),
    ));

    poller.clone().poll().await;

    let created = world.crm.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].1.email, "stranger@x.com");
}

#[tokio::test]
async fn appointment_flow_proposes_waits_and_books_on_confirmation() {
    // Script: pick slot 2 when the reply arrives.
    let world = world(vec![Ok(ScriptedLlm::text("2"))]).await;
    world
        .crm
        .set_contacts(
            "advisor-1",
            vec![contact(
                "c-jane",
                Some("jane@x.com"),
                Some("Jane"),
                Utc::now() - Duration::days(30),
            )],
        )
        .await;

    // Propose: the compound tool emails slots and parks a task.
    let result = world
        .tools
        .execute_tool(
            "schedule_appointment",
            "advisor-1",
            serde_json::json!({
                "contact_name": "Jane",
                "date": "2026-09-01",
                "duration_minutes": 30,
            }),
        )
        .await
        .unwrap();
    assert_eq!(result["status"], "awaiting_reply");
    assert_eq!(world.email.sent_count().await, 1);

    let task_id = result["task_id"].as_str().unwrap().to_string();
    let parked = world.storage.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(parked.status, TaskStatus::WaitingForResponse);
    assert_eq!(parked.task_type, TaskType::ScheduleAppointment);

    let queue = queue(&world);

    // No reply yet: the continuation check leaves the task parked forever.
    assert_eq!(queue.continue_waiting_tasks().await.unwrap(), 0);
    assert!(world.calendar.events.lock().await.is_empty());

    // Jane replies; the checker revives the task and the processor books.
    world
        .email
        .set_inbox(
            "advisor-1",
            vec![message("reply-1", "Jane <jane@x.com>", Utc::now())],
        )
        .await;
    assert_eq!(queue.continue_waiting_tasks().await.unwrap(), 1);
    assert_eq!(
        world
            .storage
            .get_task(&task_id)
            .await
            .unwrap()
            .unwrap()
            .status,
        TaskStatus::Pending
    );

    queue.process_pending_tasks().await.unwrap();

    let done = world.storage.get_task(&task_id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let events = world.calendar.events.lock().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.attendees, vec!["jane@x.com"]);
    // Proposal + confirmation.
    assert_eq!(world.email.sent_count().await, 2);
}

#[tokio::test]
async fn trigger_path_runs_through_the_queue() {
    let world = world(vec![Ok(ScriptedLlm::text("no action needed"))]).await;
    world
        .storage
        .add_instruction("advisor-1", "contact rule", TriggerType::ContactCreated, 0)
        .await
        .unwrap();
    world
        .storage
        .add_instruction("advisor-1", "email rule", TriggerType::EmailReceived, 0)
        .await
        .unwrap();

    let task = world
        .processor
        .trigger_proactive_agent(
            "advisor-1",
            TriggerType::ContactCreated,
            &serde_json::json!({ "contact_id": "c-1" }),
        )
        .await
        .unwrap();

    let queue = queue(&world);
    queue.process_pending_tasks().await.unwrap();

    let done = world.storage.get_task(&task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("no action needed"));

    // Only the trigger-matched instruction reached the model.
    let seen = world.llm.seen().await;
    let system = seen[0][0].content.clone().unwrap();
    assert!(system.contains("contact rule"));
    assert!(!system.contains("email rule"));
}
