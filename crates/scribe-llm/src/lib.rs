pub mod collect;
pub mod converter;
pub mod openai;
pub mod reliable;
pub mod sse;

pub mod mock;

pub use collect::collect_reply;
pub use mock::{MockProvider, MockResponse};
pub use openai::{api_key_from_env, OpenAiProvider};
pub use reliable::{ReliableConfig, ReliableProvider};
