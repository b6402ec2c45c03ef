pub mod converter;
pub mod models;
pub mod openrouter;
pub mod sse;

pub mod mock;

pub use mock::{MockProvider, MockResponse};
pub use openrouter::{OpenRouterConfig, OpenRouterProvider};
