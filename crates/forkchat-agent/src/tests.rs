//! Generation engine tests: turn loop, tool bridge, persistence and failure paths.
use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use forkchat_ai::{
    ChatRequest, ChatResponse, ChatUsage, ContentBlock, LlmClient, LlmError, Message, MessageRole,
    ToolDefinition,
};
use forkchat_checkpoint::{CheckpointStore, InMemoryCheckpointStore, ThreadId};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use super::{
    extract_reply, AgentConfig, AgentGenerationEngine, AgentTool, GenerationEngine,
    GenerationError, RunInput, ToolExecutionResult, EMPTY_REPLY_FALLBACK,
};

struct MockClient {
    responses: AsyncMutex<VecDeque<ChatResponse>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl MockClient {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            responses: AsyncMutex::new(messages.into_iter().map(response).collect()),
            requests: AsyncMutex::new(Vec::new()),
            delay: None,
        }
    }

    fn slow(messages: Vec<Message>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(messages)
        }
    }
}

#[async_trait]
impl LlmClient for MockClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LlmError> {
        self.requests.lock().await.push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut responses = self.responses.lock().await;
        responses
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("mock response queue is empty".to_string()))
    }
}

fn response(message: Message) -> ChatResponse {
    ChatResponse {
        message,
        finish_reason: Some("stop".to_string()),
        usage: ChatUsage::default(),
    }
}

fn tool_call_message(id: &str, name: &str, arguments: Value) -> Message {
    Message::assistant_blocks(vec![ContentBlock::ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }])
}

struct EchoTool;

#[async_trait]
impl AgentTool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes a query".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> ToolExecutionResult {
        let query = arguments["query"].as_str().unwrap_or_default();
        ToolExecutionResult::ok(json!(format!("echo:{query}")))
    }
}

struct SlowTool;

#[async_trait]
impl AgentTool for SlowTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "slow".to_string(),
            description: "Never answers in time".to_string(),
            parameters: json!({ "type": "object" }),
        }
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        tokio::time::sleep(Duration::from_secs(5)).await;
        ToolExecutionResult::ok(json!("late"))
    }
}

fn thread(raw: &str) -> ThreadId {
    ThreadId::new(raw).expect("thread id")
}

fn engine_with(
    client: Arc<MockClient>,
    store: Arc<InMemoryCheckpointStore>,
    config: AgentConfig,
) -> AgentGenerationEngine {
    AgentGenerationEngine::new(client, store, config)
}

fn texts(history: &[Message]) -> Vec<String> {
    history.iter().map(Message::text_content).collect()
}

#[test]
fn unit_tool_execution_result_renders_text() {
    assert_eq!(ToolExecutionResult::ok(json!("plain")).as_text(), "plain");
    let rendered = ToolExecutionResult::error(json!({ "error": "boom" })).as_text();
    assert!(rendered.contains("\"error\": \"boom\""));
}

#[test]
fn unit_extract_reply_uses_last_assistant_or_fallback() {
    let history = vec![
        Message::user("hi"),
        Message::assistant_text("first"),
        Message::user("again"),
        Message::assistant_text("second"),
    ];
    assert_eq!(extract_reply(&history), "second");
    assert_eq!(extract_reply(&[Message::user("hi")]), EMPTY_REPLY_FALLBACK);
    assert_eq!(
        extract_reply(&[Message::assistant_text("   ")]),
        EMPTY_REPLY_FALLBACK
    );
}

#[tokio::test]
async fn functional_append_creates_thread_and_persists_turn() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("Paris")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = engine_with(client.clone(), store.clone(), AgentConfig::default());
    let a = thread("A");

    let output = engine
        .run(&a, RunInput::Append(Message::user("capital of France?")))
        .await
        .expect("run");

    assert_eq!(output.reply, "Paris");
    assert_eq!(output.new_messages.len(), 1);
    assert_eq!(
        texts(&store.get(&a).expect("checkpoint")),
        vec!["capital of France?", "Paris"]
    );

    let requests = client.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages[0].role, MessageRole::System);
    assert_eq!(requests[0].model, engine.config().model);
    assert_eq!(requests[0].temperature, Some(0.0));
}

#[tokio::test]
async fn functional_append_extends_existing_history() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("Berlin")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let a = thread("A");
    store
        .put(
            &a,
            vec![Message::user("capital of France?"), Message::assistant_text("Paris")],
        )
        .expect("seed");
    let engine = engine_with(client, store.clone(), AgentConfig::default());

    let output = engine
        .run(&a, RunInput::Append(Message::user("and Germany?")))
        .await
        .expect("run");

    assert_eq!(output.history.len(), 4);
    assert_eq!(store.get(&a).expect("checkpoint"), output.history);
}

#[tokio::test]
async fn functional_system_prompt_is_sent_but_never_stored() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("ok")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = AgentConfig {
        system_prompt: "Be brief.".to_string(),
        ..AgentConfig::default()
    };
    let engine = engine_with(client.clone(), store.clone(), config);
    let a = thread("A");

    engine
        .run(&a, RunInput::Append(Message::user("hello")))
        .await
        .expect("run");

    let requests = client.requests.lock().await;
    assert_eq!(requests[0].messages[0].text_content(), "Be brief.");
    assert!(store
        .get(&a)
        .expect("checkpoint")
        .iter()
        .all(|message| message.role != MessageRole::System));
}

#[tokio::test]
async fn functional_seed_populates_fresh_thread() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("Berlin")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = engine_with(client.clone(), store.clone(), AgentConfig::default());
    let b = thread("B");

    let output = engine
        .run(
            &b,
            RunInput::Seed(vec![
                Message::user("capital of Germany?"),
                Message::assistant_text("Paris"),
            ]),
        )
        .await
        .expect("run");

    assert_eq!(output.reply, "Berlin");
    assert_eq!(
        texts(&store.get(&b).expect("checkpoint")),
        vec!["capital of Germany?", "Paris", "Berlin"]
    );
    let requests = client.requests.lock().await;
    assert_eq!(requests[0].messages.len(), 3);
}

#[tokio::test]
async fn regression_seed_rejects_occupied_thread_without_calling_model() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("unused")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let b = thread("B");
    store.put(&b, vec![Message::user("existing")]).expect("put");
    let engine = engine_with(client.clone(), store.clone(), AgentConfig::default());

    let error = engine
        .run(&b, RunInput::Seed(vec![Message::user("copy")]))
        .await
        .expect_err("occupied");

    assert!(matches!(error, GenerationError::ThreadOccupied { .. }));
    assert!(client.requests.lock().await.is_empty());
    assert_eq!(texts(&store.get(&b).expect("checkpoint")), vec!["existing"]);
}

#[tokio::test]
async fn regression_seed_accepts_thread_with_empty_checkpoint() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("hi")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let b = thread("B");
    store.put(&b, Vec::new()).expect("put");
    let engine = engine_with(client, store, AgentConfig::default());

    engine
        .run(&b, RunInput::Seed(vec![Message::user("hello")]))
        .await
        .expect("seed empty thread");
}

#[tokio::test]
async fn regression_seed_rejects_empty_history() {
    let client = Arc::new(MockClient::new(Vec::new()));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = engine_with(client, store.clone(), AgentConfig::default());

    let error = engine
        .run(&thread("B"), RunInput::Seed(Vec::new()))
        .await
        .expect_err("empty seed");

    assert!(matches!(error, GenerationError::EmptyHistory));
    assert!(store.thread_ids().expect("ids").is_empty());
}

#[tokio::test]
async fn functional_tool_calls_are_executed_and_fed_back() {
    let client = Arc::new(MockClient::new(vec![
        tool_call_message("call_1", "echo", json!({ "query": "weather" })),
        Message::assistant_text("It is sunny"),
    ]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut engine = engine_with(client.clone(), store.clone(), AgentConfig::default());
    engine.register_tool(EchoTool);
    assert_eq!(engine.registered_tool_names(), vec!["echo".to_string()]);

    let output = engine
        .run(&thread("A"), RunInput::Append(Message::user("weather?")))
        .await
        .expect("run");

    assert_eq!(output.reply, "It is sunny");
    let roles = output
        .history
        .iter()
        .map(|message| message.role)
        .collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant
        ]
    );
    assert_eq!(output.history[2].text_content(), "echo:weather");
    assert_eq!(output.history[2].tool_call_id.as_deref(), Some("call_1"));

    let requests = client.requests.lock().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(
        requests[1].messages.last().map(|message| message.role),
        Some(MessageRole::Tool)
    );
}

#[tokio::test]
async fn functional_unknown_tool_yields_error_result_and_loop_continues() {
    let client = Arc::new(MockClient::new(vec![
        tool_call_message("call_1", "missing", json!({})),
        Message::assistant_text("sorry"),
    ]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = engine_with(client, store, AgentConfig::default());

    let output = engine
        .run(&thread("A"), RunInput::Append(Message::user("go")))
        .await
        .expect("run");

    let tool_message = &output.history[2];
    assert!(tool_message.is_error);
    assert!(tool_message.text_content().contains("not registered"));
    assert_eq!(output.reply, "sorry");
}

#[tokio::test]
async fn regression_invalid_tool_arguments_are_rejected_by_schema() {
    let client = Arc::new(MockClient::new(vec![
        tool_call_message("call_1", "echo", json!({ "query": 42 })),
        Message::assistant_text("done"),
    ]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut engine = engine_with(client, store, AgentConfig::default());
    engine.register_tool(EchoTool);

    let output = engine
        .run(&thread("A"), RunInput::Append(Message::user("go")))
        .await
        .expect("run");

    assert!(output.history[2].is_error);
    assert!(output.history[2]
        .text_content()
        .contains("invalid arguments for 'echo'"));
}

#[tokio::test]
async fn regression_tool_timeout_becomes_error_result() {
    let client = Arc::new(MockClient::new(vec![
        tool_call_message("call_1", "slow", json!({})),
        Message::assistant_text("gave up"),
    ]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = AgentConfig {
        tool_timeout_ms: Some(20),
        ..AgentConfig::default()
    };
    let mut engine = engine_with(client, store, config);
    engine.register_tool(SlowTool);

    let output = engine
        .run(&thread("A"), RunInput::Append(Message::user("go")))
        .await
        .expect("run");

    assert!(output.history[2].is_error);
    assert!(output.history[2].text_content().contains("timed out"));
}

#[tokio::test]
async fn regression_max_turns_exceeded_leaves_checkpoint_untouched() {
    let looping = (0..3)
        .map(|index| tool_call_message(&format!("call_{index}"), "echo", json!({ "query": "x" })))
        .collect::<Vec<_>>();
    let client = Arc::new(MockClient::new(looping));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let a = thread("A");
    store.put(&a, vec![Message::user("before")]).expect("put");
    let config = AgentConfig {
        max_turns: 2,
        ..AgentConfig::default()
    };
    let mut engine = engine_with(client, store.clone(), config);
    engine.register_tool(EchoTool);

    let error = engine
        .run(&a, RunInput::Append(Message::user("loop")))
        .await
        .expect_err("max turns");

    assert!(matches!(error, GenerationError::MaxTurnsExceeded(2)));
    assert_eq!(texts(&store.get(&a).expect("checkpoint")), vec!["before"]);
}

#[tokio::test]
async fn regression_run_timeout_leaves_checkpoint_untouched() {
    let client = Arc::new(MockClient::slow(
        vec![Message::assistant_text("too late")],
        Duration::from_millis(500),
    ));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let config = AgentConfig {
        turn_timeout_ms: 20,
        ..AgentConfig::default()
    };
    let engine = engine_with(client, store.clone(), config);
    let a = thread("A");

    let error = engine
        .run(&a, RunInput::Append(Message::user("hello")))
        .await
        .expect_err("timeout");

    assert!(matches!(error, GenerationError::Timeout { timeout_ms: 20 }));
    assert!(!store.contains(&a).expect("contains"));
}

#[tokio::test]
async fn regression_model_error_propagates_without_write() {
    let client = Arc::new(MockClient::new(Vec::new()));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = engine_with(client, store.clone(), AgentConfig::default());

    let error = engine
        .run(&thread("A"), RunInput::Append(Message::user("hello")))
        .await
        .expect_err("model error");

    assert!(matches!(error, GenerationError::Ai(_)));
    assert!(store.thread_ids().expect("ids").is_empty());
}

#[tokio::test]
async fn functional_empty_assistant_text_uses_fallback_reply() {
    let client = Arc::new(MockClient::new(vec![Message::assistant_text("")]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = engine_with(client, store, AgentConfig::default());

    let output = engine
        .run(&thread("A"), RunInput::Append(Message::user("hello")))
        .await
        .expect("run");

    assert_eq!(output.reply, EMPTY_REPLY_FALLBACK);
}

#[tokio::test]
async fn integration_concurrent_appends_on_one_thread_are_serialized() {
    let client = Arc::new(MockClient::slow(
        vec![
            Message::assistant_text("first"),
            Message::assistant_text("second"),
        ],
        Duration::from_millis(20),
    ));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = Arc::new(engine_with(client, store.clone(), AgentConfig::default()));
    let a = thread("A");

    let left = {
        let engine = Arc::clone(&engine);
        let a = a.clone();
        tokio::spawn(async move { engine.run(&a, RunInput::Append(Message::user("one"))).await })
    };
    let right = {
        let engine = Arc::clone(&engine);
        let a = a.clone();
        tokio::spawn(async move { engine.run(&a, RunInput::Append(Message::user("two"))).await })
    };
    left.await.expect("join").expect("left run");
    right.await.expect("join").expect("right run");

    let history = store.get(&a).expect("checkpoint");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[2].role, MessageRole::User);
    assert_eq!(history[3].role, MessageRole::Assistant);
}
