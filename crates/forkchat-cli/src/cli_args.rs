use std::path::PathBuf;

use clap::Parser;

use crate::cli_types::CliCheckpointBackend;

pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.\n- Use web search tools ONLY when the user asks about recent, factual, or web-based information.\n";

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &str) -> Result<u32, String> {
    let parsed = value
        .parse::<u32>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_temperature(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || !(0.0..=2.0).contains(&parsed) {
        return Err("value must be in range 0.0..=2.0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "forkchat",
    about = "Branching chat service backed by an OpenAI-compatible model endpoint",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "FORKCHAT_BIND",
        default_value = "127.0.0.1:5000",
        help = "Socket address for the HTTP server"
    )]
    pub bind: String,

    #[arg(
        long,
        env = "FORKCHAT_MODEL",
        default_value = "llama3.1:8b",
        help = "Model name sent to the completion endpoint"
    )]
    pub model: String,

    #[arg(
        long = "api-base",
        env = "FORKCHAT_API_BASE",
        default_value = forkchat_ai::DEFAULT_API_BASE,
        help = "Base URL of the OpenAI-compatible API (Ollama by default)"
    )]
    pub api_base: String,

    #[arg(
        long = "api-key",
        env = "FORKCHAT_API_KEY",
        hide_env_values = true,
        help = "Optional bearer token for the completion endpoint"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "system-prompt",
        env = "FORKCHAT_SYSTEM_PROMPT",
        default_value = DEFAULT_SYSTEM_PROMPT,
        help = "System prompt prepended to every model request"
    )]
    pub system_prompt: String,

    #[arg(
        long = "max-turns",
        env = "FORKCHAT_MAX_TURNS",
        default_value_t = 8,
        value_parser = parse_positive_usize,
        help = "Maximum model round-trips per chat turn"
    )]
    pub max_turns: usize,

    #[arg(
        long,
        env = "FORKCHAT_TEMPERATURE",
        default_value_t = 0.0,
        value_parser = parse_temperature,
        help = "Sampling temperature"
    )]
    pub temperature: f32,

    #[arg(
        long = "max-tokens",
        env = "FORKCHAT_MAX_TOKENS",
        value_parser = parse_positive_u32,
        help = "Optional cap on generated tokens per model request"
    )]
    pub max_tokens: Option<u32>,

    #[arg(
        long = "turn-timeout-ms",
        env = "FORKCHAT_TURN_TIMEOUT_MS",
        default_value_t = 120_000,
        help = "Upper bound for one chat turn including tool calls (0 disables)"
    )]
    pub turn_timeout_ms: u64,

    #[arg(
        long = "tool-timeout-ms",
        env = "FORKCHAT_TOOL_TIMEOUT_MS",
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Upper bound for a single tool execution"
    )]
    pub tool_timeout_ms: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "FORKCHAT_REQUEST_TIMEOUT_MS",
        default_value_t = 120_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for a single completion request"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "max-retries",
        env = "FORKCHAT_MAX_RETRIES",
        default_value_t = 2,
        help = "Retries for retryable completion failures"
    )]
    pub max_retries: usize,

    #[arg(
        long = "checkpoint-backend",
        env = "FORKCHAT_CHECKPOINT_BACKEND",
        value_enum,
        default_value_t = CliCheckpointBackend::Memory,
        help = "Where thread checkpoints are kept"
    )]
    pub checkpoint_backend: CliCheckpointBackend,

    #[arg(
        long = "checkpoint-path",
        env = "FORKCHAT_CHECKPOINT_PATH",
        default_value = ".forkchat/checkpoints.sqlite",
        help = "SQLite file used by --checkpoint-backend sqlite"
    )]
    pub checkpoint_path: PathBuf,

    #[arg(
        long = "max-input-chars",
        env = "FORKCHAT_MAX_INPUT_CHARS",
        default_value_t = 32_000,
        value_parser = parse_positive_usize,
        help = "Longest accepted chat message, in characters"
    )]
    pub max_input_chars: usize,
}
