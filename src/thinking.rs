use crate::family::Family;
use crate::wire::Effort;

/// Effort-to-budget table and budget-to-effort thresholds, loaded from the
/// environment once at startup. Defaults keep low ≤ medium ≤ high so mapped
/// budgets are monotone in effort.
#[derive(Debug, Clone)]
pub struct ThinkingConfig {
    pub openai_low_to_anthropic_tokens: u64,
    pub openai_medium_to_anthropic_tokens: u64,
    pub openai_high_to_anthropic_tokens: u64,
    pub openai_low_to_gemini_tokens: u64,
    pub openai_medium_to_gemini_tokens: u64,
    pub openai_high_to_gemini_tokens: u64,
    pub anthropic_to_openai_low_threshold: u64,
    pub anthropic_to_openai_high_threshold: u64,
    pub gemini_to_openai_low_threshold: u64,
    pub gemini_to_openai_high_threshold: u64,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self {
            openai_low_to_anthropic_tokens: 2048,
            openai_medium_to_anthropic_tokens: 8192,
            openai_high_to_anthropic_tokens: 16384,
            openai_low_to_gemini_tokens: 2048,
            openai_medium_to_gemini_tokens: 8192,
            openai_high_to_gemini_tokens: 16384,
            anthropic_to_openai_low_threshold: 2048,
            anthropic_to_openai_high_threshold: 16384,
            gemini_to_openai_low_threshold: 2048,
            gemini_to_openai_high_threshold: 16384,
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

impl ThinkingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_low_to_anthropic_tokens: env_u64(
                "OPENAI_LOW_TO_ANTHROPIC_TOKENS",
                defaults.openai_low_to_anthropic_tokens,
            ),
            openai_medium_to_anthropic_tokens: env_u64(
                "OPENAI_MEDIUM_TO_ANTHROPIC_TOKENS",
                defaults.openai_medium_to_anthropic_tokens,
            ),
            openai_high_to_anthropic_tokens: env_u64(
                "OPENAI_HIGH_TO_ANTHROPIC_TOKENS",
                defaults.openai_high_to_anthropic_tokens,
            ),
            openai_low_to_gemini_tokens: env_u64(
                "OPENAI_LOW_TO_GEMINI_TOKENS",
                defaults.openai_low_to_gemini_tokens,
            ),
            openai_medium_to_gemini_tokens: env_u64(
                "OPENAI_MEDIUM_TO_GEMINI_TOKENS",
                defaults.openai_medium_to_gemini_tokens,
            ),
            openai_high_to_gemini_tokens: env_u64(
                "OPENAI_HIGH_TO_GEMINI_TOKENS",
                defaults.openai_high_to_gemini_tokens,
            ),
            anthropic_to_openai_low_threshold: env_u64(
                "ANTHROPIC_TO_OPENAI_LOW_REASONING_THRESHOLD",
                defaults.anthropic_to_openai_low_threshold,
            ),
            anthropic_to_openai_high_threshold: env_u64(
                "ANTHROPIC_TO_OPENAI_HIGH_REASONING_THRESHOLD",
                defaults.anthropic_to_openai_high_threshold,
            ),
            gemini_to_openai_low_threshold: env_u64(
                "GEMINI_TO_OPENAI_LOW_REASONING_THRESHOLD",
                defaults.gemini_to_openai_low_threshold,
            ),
            gemini_to_openai_high_threshold: env_u64(
                "GEMINI_TO_OPENAI_HIGH_REASONING_THRESHOLD",
                defaults.gemini_to_openai_high_threshold,
            ),
        }
    }

    /// Token budget for a tri-level effort when egressing to a
    /// budget-denominated family. `target` must be Anthropic or Gemini.
    pub fn effort_to_budget(&self, effort: Effort, target: Family) -> u64 {
        match (target, effort) {
            (Family::Anthropic, Effort::Low) => self.openai_low_to_anthropic_tokens,
            (Family::Anthropic, Effort::Medium) => self.openai_medium_to_anthropic_tokens,
            (Family::Anthropic, Effort::High) => self.openai_high_to_anthropic_tokens,
            (_, Effort::Low) => self.openai_low_to_gemini_tokens,
            (_, Effort::Medium) => self.openai_medium_to_gemini_tokens,
            (_, Effort::High) => self.openai_high_to_gemini_tokens,
        }
    }

    /// Effort level for a token budget when egressing to the effort family.
    /// The threshold pair is chosen by the family the budget came from.
    pub fn budget_to_effort(&self, tokens: u64, source: Family) -> Effort {
        let (low, high) = match source {
            Family::Gemini => (
                self.gemini_to_openai_low_threshold,
                self.gemini_to_openai_high_threshold,
            ),
            _ => (
                self.anthropic_to_openai_low_threshold,
                self.anthropic_to_openai_high_threshold,
            ),
        };
        if tokens < low {
            Effort::Low
        } else if tokens >= high {
            Effort::High
        } else {
            Effort::Medium
        }
    }
}
