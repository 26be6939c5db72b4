//! LLM 客户端抽象
//!
//! 对状态机而言 LLM 是不透明的 invoke(messages) -> text；
//! 瞬时失败的重试是客户端自己的事，循环只看到最终的 Ok/Err。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;
}
