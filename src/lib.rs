//! IDA - 智能数据分析 Agent
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **error**: Agent 错误类型
//! - **files**: 文件类型识别、有界预览与预览缓存
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 角色标注的对话消息
//! - **observability**: tracing 日志初始化
//! - **react**: 行动解析器、状态机、事件流、报告合成与主循环
//! - **sandbox**: 隔离子进程代码执行

pub mod config;
pub mod error;
pub mod files;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod sandbox;

pub use config::{load_config, AppConfig};
pub use error::AgentError;
pub use react::{Agent, AgentEvent, QueryRequest, QueryResult};
