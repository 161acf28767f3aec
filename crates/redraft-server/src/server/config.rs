use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use redraft::{JobConfig, LengthMode, SkeletonMode};

/// Runtime configuration for the `redraft-server` binary.
///
/// These settings control chunk sizing, the length contract, retry policy,
/// dispatch concurrency and the generation backend. All values are parsed
/// from CLI arguments or environment variables (a `.env` file is honored),
/// with defaults suitable for a single-tenant deployment.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "redraft-server",
    version,
    about = "A WebSocket service for chunked, length-controlled document rewrites"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// Capacity of the event buffer between a job and its WebSocket session.
    ///
    /// Lower values apply backpressure to the coordinator sooner when a
    /// client reads slowly.
    ///
    /// Environment variable: `EVENT_BUFFER_SIZE`
    #[arg(long, env = "EVENT_BUFFER_SIZE", default_value_t = 32)]
    pub event_buffer_size: usize,

    /// Seconds to wait for sessions to close after a shutdown signal.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Desired source words per chunk.
    ///
    /// Environment variable: `CHUNK_TARGET_WORDS`
    #[arg(long, env = "CHUNK_TARGET_WORDS", default_value_t = 1000)]
    pub chunk_target_words: usize,

    /// Accepted deviation from a chunk's target, as a fraction.
    ///
    /// Environment variable: `TOLERANCE`
    #[arg(long, env = "TOLERANCE", default_value_t = 0.10)]
    pub tolerance: f64,

    /// Wider deviation accepted for the best attempt once retries run out.
    ///
    /// Environment variable: `SECONDARY_TOLERANCE`
    #[arg(long, env = "SECONDARY_TOLERANCE", default_value_t = 0.20)]
    pub secondary_tolerance: f64,

    /// Retries after the first attempt of each chunk.
    ///
    /// Environment variable: `MAX_RETRIES`
    #[arg(long, env = "MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    /// Base backoff after a failed generation call, in milliseconds. Doubles
    /// per consecutive failure.
    ///
    /// Environment variable: `RETRY_BACKOFF_MS`
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value_t = 500)]
    pub retry_backoff_ms: u64,

    /// Upper bound for the doubled backoff, in milliseconds.
    ///
    /// Environment variable: `MAX_RETRY_BACKOFF_MS`
    #[arg(long, env = "MAX_RETRY_BACKOFF_MS", default_value_t = 8000)]
    pub max_retry_backoff_ms: u64,

    /// Timeout for each generation call, in seconds.
    ///
    /// Environment variable: `ATTEMPT_TIMEOUT`
    #[arg(long, env = "ATTEMPT_TIMEOUT", default_value_t = 120)]
    pub attempt_timeout: u64,

    /// Chunks processed concurrently per job.
    ///
    /// Environment variable: `CONCURRENCY`
    #[arg(long, env = "CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,

    /// Smallest accepted document, in words.
    ///
    /// Environment variable: `MIN_DOCUMENT_WORDS`
    #[arg(long, env = "MIN_DOCUMENT_WORDS", default_value_t = 500)]
    pub min_document_words: usize,

    /// Largest accepted document, in words.
    ///
    /// Environment variable: `MAX_DOCUMENT_WORDS`
    #[arg(long, env = "MAX_DOCUMENT_WORDS", default_value_t = 20_000)]
    pub max_document_words: usize,

    /// Whether to extract a document outline first: `off`, `optional` or
    /// `required`.
    ///
    /// Environment variable: `SKELETON_MODE`
    #[arg(long, env = "SKELETON_MODE", default_value = "optional", value_parser = parse_skeleton_mode)]
    pub skeleton_mode: SkeletonMode,

    /// Length mode for requests that do not name one: `preserve`, `expand`
    /// or `condense`.
    ///
    /// Environment variable: `DEFAULT_LENGTH_MODE`
    #[arg(long, env = "DEFAULT_LENGTH_MODE", default_value = "preserve", value_parser = parse_length_mode)]
    pub default_length_mode: LengthMode,

    /// Output/input ratio for `expand`.
    ///
    /// Environment variable: `EXPAND_RATIO`
    #[arg(long, env = "EXPAND_RATIO", default_value_t = 1.3)]
    pub expand_ratio: f64,

    /// Output/input ratio for `condense`.
    ///
    /// Environment variable: `CONDENSE_RATIO`
    #[arg(long, env = "CONDENSE_RATIO", default_value_t = 0.7)]
    pub condense_ratio: f64,

    /// Base URL of an OpenAI-compatible API (without `/v1`).
    ///
    /// Environment variable: `LLM_BASE_URL`
    #[arg(long, env = "LLM_BASE_URL", default_value_t = String::from("https://api.openai.com"))]
    pub llm_base_url: String,

    /// Model name sent with every request.
    ///
    /// Environment variable: `LLM_MODEL`
    #[arg(long, env = "LLM_MODEL", default_value_t = String::from("gpt-4o-mini"))]
    pub llm_model: String,

    /// Bearer token for the backend.
    ///
    /// Environment variable: `LLM_API_KEY`
    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: String,

    /// Sampling temperature.
    ///
    /// Environment variable: `LLM_TEMPERATURE`
    #[arg(long, env = "LLM_TEMPERATURE", default_value_t = 0.4)]
    pub llm_temperature: f32,
}

fn parse_skeleton_mode(raw: &str) -> Result<SkeletonMode, String> {
    match raw.to_ascii_lowercase().as_str() {
        "off" => Ok(SkeletonMode::Off),
        "optional" => Ok(SkeletonMode::Optional),
        "required" => Ok(SkeletonMode::Required),
        other => Err(format!("unknown skeleton mode `{other}`")),
    }
}

fn parse_length_mode(raw: &str) -> Result<LengthMode, String> {
    match raw.to_ascii_lowercase().as_str() {
        "preserve" => Ok(LengthMode::Preserve),
        "expand" => Ok(LengthMode::Expand),
        "condense" => Ok(LengthMode::Condense),
        other => Err(format!("unknown length mode `{other}`")),
    }
}

/// Connection settings for the OpenAI-compatible backend.
#[derive(Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

impl core::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("temperature", &self.temperature)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub shutdown_timeout: Duration,
    pub job: JobConfig,
    pub backend: BackendConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.llm_api_key.trim().is_empty() {
            bail!("LLM_API_KEY must not be empty");
        }
        if !(0.0..=2.0).contains(&args.llm_temperature) {
            bail!(
                "LLM_TEMPERATURE ({}) must be within [0, 2]",
                args.llm_temperature
            );
        }
        if args.retry_backoff_ms > args.max_retry_backoff_ms {
            bail!(
                "RETRY_BACKOFF_MS ({}) exceeds MAX_RETRY_BACKOFF_MS ({})",
                args.retry_backoff_ms,
                args.max_retry_backoff_ms
            );
        }

        let attempt_timeout = Duration::from_secs(args.attempt_timeout);
        let job = JobConfig {
            chunk_target_words: args.chunk_target_words,
            tolerance: args.tolerance,
            secondary_tolerance: args.secondary_tolerance,
            max_retries: args.max_retries,
            retry_backoff: Duration::from_millis(args.retry_backoff_ms),
            max_retry_backoff: Duration::from_millis(args.max_retry_backoff_ms),
            attempt_timeout,
            concurrency: args.concurrency,
            min_document_words: args.min_document_words,
            max_document_words: args.max_document_words,
            skeleton_mode: args.skeleton_mode,
            default_length_mode: args.default_length_mode,
            expand_ratio: args.expand_ratio,
            condense_ratio: args.condense_ratio,
            event_buffer_size: args.event_buffer_size,
        };
        if let Err(e) = job.validate() {
            bail!("{e}");
        }

        Ok(Self {
            server_addr: args.server_addr,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            job,
            backend: BackendConfig {
                base_url: args.llm_base_url.trim_end_matches('/').to_string(),
                model: args.llm_model,
                api_key: args.llm_api_key,
                temperature: args.llm_temperature,
                // backstop behind the per-attempt timeout
                request_timeout: attempt_timeout + Duration::from_secs(5),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["redraft-server", "--llm-api-key", "sk-test"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_build_a_valid_config() {
        let config = ServerConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.job.chunk_target_words, 1000);
        assert_eq!(config.job.max_retries, 2);
        assert_eq!(config.job.skeleton_mode, SkeletonMode::Optional);
        assert_eq!(config.backend.base_url, "https://api.openai.com");
        assert!(!format!("{:?}", config.backend).contains("sk-test"));
    }

    #[test]
    fn parses_modes_and_trims_base_url() {
        let config = ServerConfig::try_from(args(&[
            "--skeleton-mode",
            "required",
            "--default-length-mode",
            "condense",
            "--llm-base-url",
            "http://localhost:11434/",
            "--concurrency",
            "3",
        ]))
        .unwrap();
        assert_eq!(config.job.skeleton_mode, SkeletonMode::Required);
        assert_eq!(config.job.default_length_mode, LengthMode::Condense);
        assert_eq!(config.job.concurrency, 3);
        assert_eq!(config.backend.base_url, "http://localhost:11434");
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(ServerConfig::try_from(args(&["--concurrency", "0"])).is_err());
        assert!(ServerConfig::try_from(args(&["--tolerance", "0.3"])).is_err());
        assert!(ServerConfig::try_from(args(&["--max-retries", "4294967295"])).is_err());
        assert!(
            ServerConfig::try_from(args(&["--retry-backoff-ms", "9000"])).is_err()
        );
        assert!(CliArgs::try_parse_from(["redraft-server", "--llm-api-key", "k", "--skeleton-mode", "maybe"]).is_err());
    }
}
