use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::core::llm::{ChatMessage, LlmClient};
use crate::core::store::Storage;
use crate::core::store::types::{Task, TaskStatus, TaskType, TriggerType};
use crate::core::tools::ToolRegistry;

/// One tool call requested by the model and executed (or failed) by the
/// registry during a proactive event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
    pub success: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProactiveOutcome {
    /// None means total failure, distinct from "nothing to say".
    pub text: Option<String>,
    pub action_required: bool,
    pub tool_calls: Vec<ExecutedToolCall>,
}

impl ProactiveOutcome {
    fn empty() -> Self {
        Self {
            text: None,
            action_required: false,
            tool_calls: Vec::new(),
        }
    }
}

fn build_event_prompt(event_type: &str, instructions: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a proactive assistant for a financial advisor. An external event was \
         just detected; nobody asked you anything. Decide whether the advisor's standing \
         instructions call for action.\n\n\
         RULES:\n\
         1. Act only when a standing instruction below applies to this event.\n\
         2. To act, call the available tools. Never describe an action instead of taking it.\n\
         3. Never book a meeting outright: propose times and wait for the contact's reply \
            (the schedule_appointment tool does this).\n\
         4. If no instruction applies, reply with a one-line note saying no action was taken.\n\
         5. Be concise. The advisor reads your summary in an activity feed.\n\n",
    );

    prompt.push_str(&format!("EVENT TYPE: {}\n\n", event_type));

    prompt.push_str("--- STANDING INSTRUCTIONS ---\n");
    if instructions.is_empty() {
        prompt.push_str("(none on file)\n");
    } else {
        for (i, instruction) in instructions.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, instruction));
        }
    }
    prompt.push_str("--- END INSTRUCTIONS ---\n");
    prompt
}

/// Turns a detected event plus matching instructions into an LLM decision
/// and, when the model asks for it, tool executions. The tool-call pass and
/// the synthesis pass are separate LLM calls.
pub struct ProactiveProcessor {
    storage: Arc<Storage>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
}

impl ProactiveProcessor {
    pub fn new(storage: Arc<Storage>, llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            storage,
            llm,
            tools,
        }
    }

    /// The direct path. With `instructions` omitted, every active
    /// instruction for the user participates; trigger-type filtering only
    /// happens on the task-based path (`trigger_proactive_agent`).
    ///
    /// Total failure is swallowed here and surfaces as `text: None`;
    /// background callers have no one to re-throw to.
    pub async fn process_proactive_event(
        &self,
        user_id: &str,
        event_type: &str,
        event_data: &serde_json::Value,
        instructions: Option<Vec<String>>,
    ) -> ProactiveOutcome {
        match self
            .run_event(user_id, event_type, event_data, instructions)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Proactive event '{}' failed for user {}: {}",
                    event_type, user_id, e
                );
                ProactiveOutcome::empty()
            }
        }
    }

    async fn run_event(
        &self,
        user_id: &str,
        event_type: &str,
        event_data: &serde_json::Value,
        instructions: Option<Vec<String>>,
    ) -> Result<ProactiveOutcome> {
        let instructions = match instructions {
            Some(list) => list,
            None => self
                .storage
                .get_active_instructions(user_id, None)
                .await?
                .into_iter()
                .map(|i| i.instruction)
                .collect(),
        };

        let mut messages = vec![
            ChatMessage::system(build_event_prompt(event_type, &instructions)),
            ChatMessage::user(format!(
                "Event payload:\n{}",
                serde_json::to_string_pretty(event_data)?
            )),
        ];
        let definitions = self.tools.definitions();

        let first = self.llm.chat(&messages, &definitions).await?;
        if !first.wants_tools() {
            return Ok(ProactiveOutcome {
                text: first.text,
                action_required: false,
                tool_calls: Vec::new(),
            });
        }

        info!(
            "Proactive event '{}' for user {}: model requested {} tool call(s)",
            event_type,
            user_id,
            first.tool_calls.len()
        );

        // Execute sequentially. A failing tool becomes an error payload the
        // model can report on; it never aborts the remaining calls.
        let mut executed = Vec::new();
        messages.push(ChatMessage::assistant_tool_calls(first.tool_calls.clone()));
        for call in &first.tool_calls {
            let arguments: serde_json::Value =
                serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);

            let (result, success) = match self
                .tools
                .execute_tool(&call.name, user_id, arguments.clone())
                .await
            {
                Ok(value) => (value, true),
                Err(e) => {
                    warn!("Tool '{}' failed for user {}: {}", call.name, user_id, e);
                    (serde_json::json!({ "error": e.to_string() }), false)
                }
            };

            messages.push(ChatMessage::tool_result(
                call.id.clone(),
                serde_json::to_string(&result)?,
            ));
            executed.push(ExecutedToolCall {
                name: call.name.clone(),
                arguments,
                result,
                success,
            });
        }

        let second = self.llm.chat(&messages, &definitions).await?;
        Ok(ProactiveOutcome {
            text: second.text.or(first.text),
            action_required: true,
            tool_calls: executed,
        })
    }

    /// The task-based path: match instructions by trigger type and park the
    /// work as an `ai_processing` task for the queue to pick up.
    pub async fn trigger_proactive_agent(
        &self,
        user_id: &str,
        trigger_type: TriggerType,
        data: &serde_json::Value,
    ) -> Result<Task> {
        let instructions: Vec<String> = self
            .storage
            .get_active_instructions(user_id, Some(trigger_type))
            .await?
            .into_iter()
            .map(|i| i.instruction)
            .collect();

        if instructions.is_empty() {
            info!(
                "No active '{}' instructions for user {}; queuing event anyway for the record",
                trigger_type.as_str(),
                user_id
            );
        }

        let payload = serde_json::json!({
            "trigger_type": trigger_type.as_str(),
            "event": data,
            "instructions": instructions,
        });
        self.storage
            .insert_task(user_id, TaskType::AiProcessing, &payload, TaskStatus::Pending)
            .await
    }
}
