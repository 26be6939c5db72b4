//! Mock LLM 客户端（用于测试与无 API Key 场景）
//!
//! 取最后一条 User 消息，按分隔文本编码回显为 final_answer，便于本地跑通 ReAct 流程。

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::memory::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!(
            "思考: 本地 Mock，无需真实模型\n行动: final_answer\n行动输入: {{\"answer\": \"Echo from Mock: {}\"}}",
            last_user.replace('"', "'")
        ))
    }
}
