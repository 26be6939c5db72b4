//! ReAct 过程事件：用于流式/SSE 展示思考、行动、代码执行与答案
//!
//! 同一轮内事件顺序固定：step_start -> thought -> action -> code_execution_start ->
//! code_execution_result -> observation；流在 final_answer / error 后终止，
//! 末尾追加 done 哨兵标记流结束。消费方只应追加，不应回放。

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 新一轮开始
    StepStart { step: usize, message: String },
    /// 本轮思考内容
    Thought { step: usize, content: String },
    /// 解析出的行动与输入
    Action {
        step: usize,
        action: String,
        action_input: serde_json::Value,
    },
    /// 代码开始执行
    CodeExecutionStart { step: usize, code: String },
    /// 代码执行结果
    CodeExecutionResult { step: usize, result: String },
    /// 喂回模型的观察文本
    Observation { step: usize, content: String },
    /// 最终答案（终止事件）
    FinalAnswer { step: usize, content: String },
    /// 错误（终止事件）
    Error { message: String },
    /// 流结束哨兵
    Done,
}
