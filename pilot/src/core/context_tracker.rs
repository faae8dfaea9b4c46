//! Heuristic context-window accounting for agent sessions.

/// Rough characters-per-token ratio used for all estimates.
pub const CHARS_PER_TOKEN: u64 = 4;

/// Estimated token usage of the current agent session.
///
/// Every agent invocation starts a fresh window, so the engine resets the
/// tracker before each invocation and feeds it the streamed character count
/// afterwards. `should_handoff` is consulted before the next step starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextTracker {
    window_tokens: u64,
    warn_pct: u32,
    handoff_pct: u32,
    char_count: u64,
}

impl ContextTracker {
    pub fn new(window_tokens: u64, warn_pct: u32, handoff_pct: u32) -> Self {
        Self {
            window_tokens,
            warn_pct,
            handoff_pct,
            char_count: 0,
        }
    }

    pub fn estimated_tokens(&self) -> u64 {
        self.char_count / CHARS_PER_TOKEN
    }

    /// Percentage of the window consumed. A zero-sized window is always full.
    pub fn usage_pct(&self) -> f64 {
        if self.window_tokens == 0 {
            return 100.0;
        }
        self.estimated_tokens() as f64 / self.window_tokens as f64 * 100.0
    }

    pub fn should_warn(&self) -> bool {
        self.usage_pct() >= f64::from(self.warn_pct)
    }

    pub fn should_handoff(&self) -> bool {
        self.usage_pct() >= f64::from(self.handoff_pct)
    }

    pub fn add_chars(&mut self, n: u64) {
        self.char_count = self.char_count.saturating_add(n);
    }

    pub fn add_text(&mut self, text: &str) {
        self.add_chars(text.chars().count() as u64);
    }

    pub fn reset(&mut self) {
        self.char_count = 0;
    }
}

impl Default for ContextTracker {
    fn default() -> Self {
        Self::new(192_000, 80, 90)
    }
}
