//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Retry policy defaults
pub mod retry {
    /// Maximum invocations of one agent task, first attempt included
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Deadline for a single agent invocation (seconds)
    pub const DEFAULT_PER_ATTEMPT_TIMEOUT_SECS: u64 = 120;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 30_000;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f64 = 2.0;

    /// Upper bound of the random jitter added to a delay (fraction of the delay)
    pub const JITTER_RATIO: f64 = 0.25;
}

/// Concurrency limits for a single run
pub mod concurrency {
    /// Maximum agent invocations in flight for one run
    pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

    /// Maximum sections generated concurrently by the content stage
    pub const DEFAULT_SECTION_CONCURRENCY: usize = 4;
}

/// Submission validation limits
pub mod validation {
    /// Minimum topic length in characters (not bytes)
    pub const MIN_TOPIC_CHARS: usize = 5;

    /// Maximum topic length in characters
    pub const MAX_TOPIC_CHARS: usize = 200;

    /// Smallest accepted per-section target length
    pub const MIN_TARGET_LENGTH: usize = 100;

    /// Largest accepted per-section target length
    pub const MAX_TARGET_LENGTH: usize = 5000;
}

/// Agent tuning
pub mod agents {
    /// Outline: fewer parsed sections than this falls back to the default outline
    pub const MIN_SECTIONS: usize = 3;

    /// Outline: parsed sections are capped at this count
    pub const MAX_SECTIONS: usize = 10;

    /// Outline: parsed lines at or below this many characters are discarded
    pub const MIN_TITLE_CHARS: usize = 3;

    /// Content: default per-section target length in characters
    pub const DEFAULT_TARGET_LENGTH: usize = 500;

    /// Content: bodies shorter than this fraction of the target are logged
    pub const SHORT_BODY_RATIO: f64 = 0.5;

    /// Content: bodies longer than this multiple of the target are logged
    pub const LONG_BODY_RATIO: f64 = 2.0;

    /// Polish: number of previously polished sections passed as style reference
    pub const STYLE_CONTEXT_SECTIONS: usize = 2;

    /// Polish: characters taken from each style reference section
    pub const STYLE_CONTEXT_CHARS: usize = 300;

    /// Polish: paragraphs longer than this are re-split
    pub const MAX_PARAGRAPH_CHARS: usize = 500;

    /// Polish: preferred length of a re-split paragraph
    pub const SPLIT_PARAGRAPH_CHARS: usize = 300;

    /// Chart: keyword fallback extracts at most this many charts per section
    pub const MAX_KEYWORD_CHARTS: usize = 3;

    /// Chart: default cap on charts per report
    pub const MAX_CHARTS_PER_REPORT: usize = 5;
}

/// LLM request defaults
pub mod llm {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Default sampling temperature
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    /// Default completion budget (tokens)
    pub const DEFAULT_MAX_TOKENS: u32 = 2000;

    /// Default OpenAI-compatible endpoint
    pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

    /// Default vLLM endpoint
    pub const DEFAULT_VLLM_BASE: &str = "http://localhost:8000/v1";
}

/// Storage defaults
pub mod storage {
    /// Run database file name inside the project directory
    pub const RUNS_DB_FILE: &str = "runs.db";

    /// Maximum pooled SQLite connections
    pub const MAX_POOL_SIZE: u32 = 4;

    /// Busy timeout for SQLite connections (milliseconds)
    pub const BUSY_TIMEOUT_MS: u64 = 5000;

    /// Update gaps (in attempt + backoff windows) before an active run
    /// record counts as abandoned
    pub const STALE_RUN_FACTOR: u32 = 3;
}
