pub mod chat;
pub mod embedding;

pub use chat::ChatCompletionsClient;
pub use embedding::HttpEmbedder;
