//! Token accounting for streamed generations.
//!
//! Every streamed fragment counts as one token. The rate is measured over a sliding
//! window so a slow start does not drag the figure down for the whole call, and the
//! completion estimate uses a per-model expected length.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Window over which the token rate is computed.
pub const TOKEN_RATE_WINDOW: Duration = Duration::from_secs(5);

/// Expected generation length when the model is not listed in [`expected_tokens`].
pub const DEFAULT_EXPECTED_TOKENS: u64 = 300;

/// Rough expected generation length per model, used only for percent-complete.
pub fn expected_tokens(model: &str) -> u64 {
    match model {
        "llava:13b" => 300,
        "llava:34b" => 500,
        "llama3:8b" | "llama3:instruct" => 200,
        _ => DEFAULT_EXPECTED_TOKENS,
    }
}

/// Snapshot handed to progress callbacks.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenProgress {
    pub model: String,
    pub tokens: u64,
    pub characters: u64,
    /// Tokens per second over the recent window.
    pub tokens_per_second: f64,
    /// Estimated completion, 0 to 100.
    pub percent: u8,
    pub elapsed: Duration,
}

/// Receives a snapshot after every fragment.
pub type ProgressCallback = Arc<dyn Fn(&TokenProgress) + Send + Sync>;

#[derive(Debug)]
pub struct TokenTracker {
    model: String,
    expected: u64,
    started: Instant,
    tokens: u64,
    characters: u64,
    history: VecDeque<(Instant, u64)>,
}

impl TokenTracker {
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let expected = expected_tokens(&model);
        Self::with_expected(model, expected)
    }

    pub fn with_expected(model: impl Into<String>, expected: u64) -> Self {
        Self {
            model: model.into(),
            expected: expected.max(1),
            started: Instant::now(),
            tokens: 0,
            characters: 0,
            history: VecDeque::new(),
        }
    }

    /// Record one fragment now.
    pub fn record(&mut self, fragment: &str) -> TokenProgress {
        self.record_at(fragment, Instant::now())
    }

    /// Record one fragment at a given instant.
    pub fn record_at(&mut self, fragment: &str, now: Instant) -> TokenProgress {
        self.tokens += 1;
        self.characters += fragment.chars().count() as u64;
        self.history.push_back((now, 1));

        while let Some(&(at, _)) = self.history.front() {
            if now.saturating_duration_since(at) > TOKEN_RATE_WINDOW {
                self.history.pop_front();
            } else {
                break;
            }
        }

        self.snapshot_at(now)
    }

    /// Tokens per second across the window; 0 until the window spans at least 100 ms.
    pub fn rate(&self) -> f64 {
        let (Some(&(oldest, _)), Some(&(newest, _))) = (self.history.front(), self.history.back()) else {
            return 0.0;
        };
        let span = newest.saturating_duration_since(oldest).as_secs_f64();
        if span < 0.1 {
            return 0.0;
        }
        let total: u64 = self.history.iter().map(|(_, n)| n).sum();
        total as f64 / span
    }

    pub fn percent(&self) -> u8 {
        (100 * self.tokens / self.expected).min(100) as u8
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    fn snapshot_at(&self, now: Instant) -> TokenProgress {
        TokenProgress {
            model: self.model.clone(),
            tokens: self.tokens,
            characters: self.characters,
            tokens_per_second: self.rate(),
            percent: self.percent(),
            elapsed: now.saturating_duration_since(self.started),
        }
    }
}
