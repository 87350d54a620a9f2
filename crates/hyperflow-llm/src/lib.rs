pub mod providers;
pub mod registry;

pub use providers::anthropic::AnthropicClient;
pub use providers::gemini::GeminiClient;
pub use providers::ollama::OllamaClient;
pub use providers::openai::OpenAiClient;
pub use registry::ProviderRegistry;
