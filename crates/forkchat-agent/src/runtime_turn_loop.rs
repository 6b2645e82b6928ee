//! The tool-calling turn loop behind [`AgentGenerationEngine`].

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use forkchat_ai::{ChatRequest, LlmClient, Message, MessageRole, ToolCall};
use forkchat_checkpoint::{CheckpointStore, ThreadId, ThreadLocks};

use crate::{
    extract_reply, runtime_tool_bridge::execute_tool_call, AgentConfig, AgentTool,
    GenerationEngine, GenerationError, RunInput, RunOutput,
};

enum TurnState {
    AwaitingModel,
    AwaitingTools(Vec<ToolCall>),
    Done,
}

/// Generation engine that talks to an [`LlmClient`] and keeps thread state in a
/// [`CheckpointStore`].
///
/// Runs on the same thread id are serialized by [`ThreadLocks`]; the lock is
/// held from the checkpoint read until the updated history is written.
pub struct AgentGenerationEngine {
    client: Arc<dyn LlmClient>,
    store: Arc<dyn CheckpointStore>,
    locks: ThreadLocks,
    config: AgentConfig,
    tools: BTreeMap<String, Arc<dyn AgentTool>>,
}

impl AgentGenerationEngine {
    pub fn new(
        client: Arc<dyn LlmClient>,
        store: Arc<dyn CheckpointStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            store,
            locks: ThreadLocks::new(),
            config,
            tools: BTreeMap::new(),
        }
    }

    pub fn register_tool<T>(&mut self, tool: T)
    where
        T: AgentTool + 'static,
    {
        let tool: Arc<dyn AgentTool> = Arc::new(tool);
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn registered_tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn starting_history(
        &self,
        thread_id: &ThreadId,
        input: RunInput,
    ) -> Result<Vec<Message>, GenerationError> {
        let existing = match self.store.get(thread_id) {
            Ok(history) => Some(history),
            Err(error) if error.is_not_found() => None,
            Err(error) => return Err(error.into()),
        };
        match input {
            RunInput::Append(message) => {
                let mut history = existing.unwrap_or_default();
                history.push(message);
                Ok(history)
            }
            RunInput::Seed(seed) => {
                if seed.is_empty() {
                    return Err(GenerationError::EmptyHistory);
                }
                if existing.is_some_and(|history| !history.is_empty()) {
                    return Err(GenerationError::ThreadOccupied {
                        thread_id: thread_id.clone(),
                    });
                }
                Ok(seed)
            }
        }
    }

    fn build_request(&self, history: &[Message]) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !self.config.system_prompt.trim().is_empty() {
            messages.push(Message::system(self.config.system_prompt.clone()));
        }
        messages.extend(history.iter().cloned());
        ChatRequest {
            model: self.config.model.clone(),
            messages,
            tools: self.tools.values().map(|tool| tool.definition()).collect(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    async fn run_turns(
        &self,
        thread_id: &ThreadId,
        history: &mut Vec<Message>,
    ) -> Result<usize, GenerationError> {
        let tool_timeout = self.config.tool_timeout_ms.map(Duration::from_millis);
        let mut turns = 0usize;
        let mut state = TurnState::AwaitingModel;
        loop {
            state = match state {
                TurnState::AwaitingModel => {
                    if turns >= self.config.max_turns {
                        return Err(GenerationError::MaxTurnsExceeded(self.config.max_turns));
                    }
                    turns += 1;
                    let response = self.client.complete(self.build_request(history)).await?;
                    let mut assistant = response.message;
                    assistant.role = MessageRole::Assistant;
                    let calls = assistant.tool_calls();
                    tracing::debug!(
                        thread_id = %thread_id,
                        turn = turns,
                        tool_calls = calls.len(),
                        finish_reason = ?response.finish_reason,
                        "model turn completed"
                    );
                    history.push(assistant);
                    if calls.is_empty() {
                        TurnState::Done
                    } else {
                        TurnState::AwaitingTools(calls)
                    }
                }
                TurnState::AwaitingTools(calls) => {
                    for call in calls {
                        let call_id = call.id.clone();
                        let tool_name = call.name.clone();
                        let registered = self.tools.get(&tool_name).cloned();
                        let result = execute_tool_call(call, registered, tool_timeout).await;
                        if result.is_error {
                            tracing::warn!(
                                thread_id = %thread_id,
                                tool = %tool_name,
                                "tool call returned an error result"
                            );
                        }
                        history.push(Message::tool_result(
                            call_id,
                            tool_name,
                            result.as_text(),
                            result.is_error,
                        ));
                    }
                    TurnState::AwaitingModel
                }
                TurnState::Done => return Ok(turns),
            };
        }
    }
}

#[async_trait]
impl GenerationEngine for AgentGenerationEngine {
    async fn run(
        &self,
        thread_id: &ThreadId,
        input: RunInput,
    ) -> Result<RunOutput, GenerationError> {
        let _guard = self.locks.lock(thread_id).await;
        let mut history = self.starting_history(thread_id, input)?;
        let base_len = history.len();

        let timeout_ms = self.config.turn_timeout_ms;
        let turns = if timeout_ms == 0 {
            self.run_turns(thread_id, &mut history).await?
        } else {
            tokio::time::timeout(
                Duration::from_millis(timeout_ms),
                self.run_turns(thread_id, &mut history),
            )
            .await
            .map_err(|_| GenerationError::Timeout { timeout_ms })??
        };

        self.store.put(thread_id, history.clone())?;
        let new_messages = history[base_len..].to_vec();
        tracing::info!(
            thread_id = %thread_id,
            turns,
            new_messages = new_messages.len(),
            history_len = history.len(),
            "generation run persisted"
        );
        Ok(RunOutput {
            reply: extract_reply(&history),
            history,
            new_messages,
        })
    }
}
