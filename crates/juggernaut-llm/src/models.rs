/// Capabilities and per-million-token pricing for a routed model.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub context_window: usize,
    pub supports_tools: bool,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
}

impl ModelInfo {
    pub fn calculate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let input = prompt_tokens as f64 / 1_000_000.0 * self.input_cost_per_mtok;
        let output = completion_tokens as f64 / 1_000_000.0 * self.output_cost_per_mtok;
        input + output
    }
}

pub const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

pub static GPT_4O_MINI: ModelInfo = ModelInfo {
    id: "openai/gpt-4o-mini",
    display_name: "GPT-4o mini",
    context_window: 128_000,
    supports_tools: true,
    input_cost_per_mtok: 0.15,
    output_cost_per_mtok: 0.60,
};

pub static GPT_4O: ModelInfo = ModelInfo {
    id: "openai/gpt-4o",
    display_name: "GPT-4o",
    context_window: 128_000,
    supports_tools: true,
    input_cost_per_mtok: 2.5,
    output_cost_per_mtok: 10.0,
};

pub static CLAUDE_3_5_HAIKU: ModelInfo = ModelInfo {
    id: "anthropic/claude-3.5-haiku",
    display_name: "Claude 3.5 Haiku",
    context_window: 200_000,
    supports_tools: true,
    input_cost_per_mtok: 0.80,
    output_cost_per_mtok: 4.0,
};

pub static CLAUDE_3_5_SONNET: ModelInfo = ModelInfo {
    id: "anthropic/claude-3.5-sonnet",
    display_name: "Claude 3.5 Sonnet",
    context_window: 200_000,
    supports_tools: true,
    input_cost_per_mtok: 3.0,
    output_cost_per_mtok: 15.0,
};

pub static LLAMA_3_1_70B: ModelInfo = ModelInfo {
    id: "meta-llama/llama-3.1-70b-instruct",
    display_name: "Llama 3.1 70B Instruct",
    context_window: 131_072,
    supports_tools: true,
    input_cost_per_mtok: 0.40,
    output_cost_per_mtok: 0.40,
};

static ALL_MODELS: &[&ModelInfo] = &[
    &GPT_4O_MINI,
    &GPT_4O,
    &CLAUDE_3_5_HAIKU,
    &CLAUDE_3_5_SONNET,
    &LLAMA_3_1_70B,
];

pub fn find_model(id: &str) -> Option<&'static ModelInfo> {
    ALL_MODELS.iter().find(|m| m.id == id).copied()
}

pub fn all_models() -> &'static [&'static ModelInfo] {
    ALL_MODELS
}

/// Cost in USD for one call. Models outside the catalog are priced at zero.
pub fn calculate_cost(model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
    find_model(model)
        .map(|m| m.calculate_cost(prompt_tokens, completion_tokens))
        .unwrap_or(0.0)
}
