//! 单次查询的状态与请求
//!
//! AgentState 由一次编排调用独占：对话是只追加的线性日志，步骤记录与迭代计数
//! 严格同步推进，done 只允许 false -> true，final_answer 至多设置一次。

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::files::FileType;
use crate::memory::{Message, Role};
use crate::react::parser::{ActionInput, ParsedAction};

/// 输入文件引用；preview 懒加载，至多填充一次
#[derive(Debug, Clone)]
pub struct FileRef {
    pub path: PathBuf,
    pub file_type: FileType,
    pub preview: Option<String>,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>, file_type: FileType) -> Self {
        Self {
            path: path.into(),
            file_type,
            preview: None,
        }
    }
}

/// 单步记录：observation 在行动解决后写入，不会提前
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub thought: String,
    pub action: String,
    pub action_input: Value,
    pub observation: String,
}

impl StepRecord {
    pub fn from_parsed(parsed: &ParsedAction) -> Self {
        let action_input = match &parsed.input {
            ActionInput::Code(code) => serde_json::json!({ "code": code }),
            ActionInput::Answer(answer) => serde_json::json!({ "answer": answer }),
            ActionInput::Raw(raw) => serde_json::json!({ "raw_text": raw }),
        };
        Self {
            thought: parsed.thought.clone(),
            action: parsed.action.clone(),
            action_input,
            observation: String::new(),
        }
    }
}

/// 外部传入的历史消息；助手消息可携带其返回过的本地文件路径
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    pub file_path: Option<String>,
}

/// 一次查询请求
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub instruction: String,
    pub file_path: Option<PathBuf>,
    pub history: Vec<HistoryMessage>,
}

impl QueryRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            file_path: None,
            history: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }

    /// 未显式指定文件时，从历史消息回收本地文件路径；
    /// 过滤 blob:/http(s): 等非本地路径，且要求绝对路径存在。
    pub fn recycled_file_path(&self) -> Option<PathBuf> {
        for msg in &self.history {
            let Some(ref candidate) = msg.file_path else {
                continue;
            };
            if candidate.starts_with("blob:")
                || candidate.starts_with("http://")
                || candidate.starts_with("https://")
            {
                continue;
            }
            let path = Path::new(candidate);
            if path.is_absolute() && path.exists() {
                tracing::info!("从历史消息回收本地文件路径: {}", candidate);
                return Some(path.to_path_buf());
            }
        }
        None
    }
}

/// ReAct 循环的单请求状态
#[derive(Debug)]
pub struct AgentState {
    /// 只追加的对话历史（系统提示词在每轮请求时临时插到头部，不进此日志）
    pub conversation: Vec<Message>,
    pub file_ref: Option<FileRef>,
    /// 每轮恰好自增一次；不变量：完成一轮后 steps.len() == iteration
    pub iteration: usize,
    pub max_iterations: usize,
    /// 排队待执行的代码；执行后清除
    pub pending_code: Option<String>,
    /// 最近一次沙箱输出
    pub last_execution_result: Option<String>,
    pub steps: Vec<StepRecord>,
    /// 单向 false -> true
    pub done: bool,
    /// 至多设置一次，且只由终止转移设置
    pub final_answer: Option<String>,
}

impl AgentState {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            conversation: Vec::new(),
            file_ref: None,
            iteration: 0,
            max_iterations,
            pending_code: None,
            last_execution_result: None,
            steps: Vec::new(),
            done: false,
            final_answer: None,
        }
    }

    pub fn push_message(&mut self, msg: Message) {
        self.conversation.push(msg);
    }

    pub fn record_step(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    /// 写入当前步骤的 observation
    pub fn set_observation(&mut self, observation: impl Into<String>) {
        if let Some(step) = self.steps.last_mut() {
            step.observation = observation.into();
        }
    }

    pub fn mark_done(&mut self) {
        self.done = true;
    }

    /// 设置最终答案；已设置过则忽略后续写入
    pub fn set_final_answer(&mut self, answer: impl Into<String>) {
        if self.final_answer.is_none() {
            self.final_answer = Some(answer.into());
        }
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.conversation
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::Assistant))
            .map(|m| m.content.as_str())
    }

    /// 已写入 observation 的步骤输出，按循环顺序
    pub fn observations(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| !s.observation.is_empty())
            .map(|s| s.observation.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_answer_set_at_most_once() {
        let mut state = AgentState::new(5);
        state.set_final_answer("first");
        state.set_final_answer("second");
        assert_eq!(state.final_answer.as_deref(), Some("first"));
    }

    #[test]
    fn test_recycle_skips_remote_paths() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("data.csv");
        std::fs::write(&local, "a,b\n").unwrap();

        let request = QueryRequest::new("分析一下").with_history(vec![
            HistoryMessage {
                role: "assistant".to_string(),
                content: "已上传".to_string(),
                file_path: Some("blob:https://example/xyz".to_string()),
            },
            HistoryMessage {
                role: "assistant".to_string(),
                content: "结果".to_string(),
                file_path: Some("https://example.com/remote.csv".to_string()),
            },
            HistoryMessage {
                role: "assistant".to_string(),
                content: "结果".to_string(),
                file_path: Some(local.to_string_lossy().to_string()),
            },
        ]);

        assert_eq!(request.recycled_file_path(), Some(local));
    }

    #[test]
    fn test_recycle_ignores_missing_local_path() {
        let request = QueryRequest::new("q").with_history(vec![HistoryMessage {
            role: "assistant".to_string(),
            content: String::new(),
            file_path: Some("/no/such/file.csv".to_string()),
        }]);
        assert_eq!(request.recycled_file_path(), None);
    }

    #[test]
    fn test_observations_in_loop_order() {
        let mut state = AgentState::new(5);
        for obs in ["first", "", "third"] {
            state.record_step(StepRecord {
                thought: String::new(),
                action: "execute_code".to_string(),
                action_input: serde_json::json!({}),
                observation: obs.to_string(),
            });
        }
        assert_eq!(state.observations(), vec!["first", "third"]);
    }
}
