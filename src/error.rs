//! Agent 错误类型
//!
//! 只有获取模型回复失败会中止当前查询；解析失败降级为原文回退，
//! 沙箱超时/启动失败转为 Observation 文本喂回下一轮，均不产生 Err。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM 调用失败（重试已在客户端内部做完），对当前查询致命
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}
