//! Builds the long-lived components from parsed flags and starts the server.
use std::sync::Arc;

use anyhow::{Context, Result};
use forkchat_agent::{AgentConfig, AgentGenerationEngine};
use forkchat_ai::{OpenAiCompatClient, OpenAiCompatConfig};
use forkchat_checkpoint::{open_checkpoint_store, CheckpointBackend, CheckpointStore};
use forkchat_gateway::{run_forkchat_server, ForkchatServerConfig, InMemoryConversationStore};

use crate::cli_args::Cli;

pub(crate) fn agent_config_from_cli(cli: &Cli) -> AgentConfig {
    AgentConfig {
        model: cli.model.clone(),
        system_prompt: cli.system_prompt.clone(),
        max_turns: cli.max_turns,
        temperature: Some(cli.temperature),
        max_tokens: cli.max_tokens,
        turn_timeout_ms: cli.turn_timeout_ms,
        tool_timeout_ms: Some(cli.tool_timeout_ms),
    }
}

pub(crate) fn client_config_from_cli(cli: &Cli) -> OpenAiCompatConfig {
    OpenAiCompatConfig {
        api_base: cli.api_base.clone(),
        api_key: cli
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string),
        request_timeout_ms: cli.request_timeout_ms,
        max_retries: cli.max_retries,
        retry_jitter: true,
    }
}

/// First numeric thread id above every persisted checkpoint, so fresh relational
/// threads never land on an existing checkpoint.
pub(crate) fn first_free_thread_id(store: &dyn CheckpointStore) -> Result<u64> {
    let highest = store
        .thread_ids()
        .context("failed to list checkpoint threads")?
        .iter()
        .filter_map(|thread_id| thread_id.as_str().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    Ok(highest.saturating_add(1))
}

pub(crate) fn build_server_config(cli: &Cli) -> Result<ForkchatServerConfig> {
    let client = OpenAiCompatClient::new(client_config_from_cli(cli))
        .context("failed to build model client")?;
    let backend = CheckpointBackend::from(cli.checkpoint_backend);
    let checkpoints = open_checkpoint_store(backend, &cli.checkpoint_path).with_context(|| {
        format!(
            "failed to open {backend} checkpoint store at {}",
            cli.checkpoint_path.display()
        )
    })?;
    let first_thread_id = first_free_thread_id(checkpoints.as_ref())?;
    let engine = AgentGenerationEngine::new(
        Arc::new(client),
        Arc::clone(&checkpoints),
        agent_config_from_cli(cli),
    );
    tracing::info!(
        model = %cli.model,
        api_base = %cli.api_base,
        checkpoint_backend = %backend,
        first_thread_id,
        "forkchat components ready"
    );

    Ok(ForkchatServerConfig {
        bind: cli.bind.clone(),
        max_input_chars: cli.max_input_chars,
        conversations: Arc::new(InMemoryConversationStore::with_first_thread_id(first_thread_id)),
        checkpoints,
        engine: Arc::new(engine),
    })
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let config = build_server_config(&cli)?;
    run_forkchat_server(config).await
}
