//! ReAct 主循环
//!
//! Thinking -> (Acting | Done)，Acting -> (Executing | Done | Thinking)，
//! Executing -> Thinking，终态 Done；迭代上限是循环唯一的自我取消机制。
//! 阻塞与流式共用同一套转移：可选 event_tx 推送 step_start / thought / action /
//! code_execution_start / code_execution_result / observation / final_answer / error，
//! 流在终止事件后以 done 哨兵收尾。
//! 单轮内除「取下一条模型回复失败」外的一切失败都折叠为 Observation 文本喂回下一轮。

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::AppConfig;
use crate::error::AgentError;
use crate::files::{detect_file_type, FilePreviewer};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::react::events::AgentEvent;
use crate::react::parser::{
    ActionInput, ActionParser, ACTION_EXECUTE_CODE, ACTION_FINAL_ANSWER,
};
use crate::react::prompt::{file_system_message, PromptBuilder};
use crate::react::report::ReportComposer;
use crate::react::state::{AgentState, FileRef, QueryRequest, StepRecord};
use crate::sandbox::{ensure_printed_output, CodeSandbox, ExecutionContext};

/// LLM 响应日志预览最大字符数
const RESPONSE_PREVIEW_CHARS: usize = 500;

/// 查询执行结果：最终回复与过程记录
#[derive(Debug)]
pub struct QueryResult {
    pub response: String,
    pub final_answer: Option<String>,
    pub steps: Vec<StepRecord>,
    pub execution_result: Option<String>,
    pub file_path: Option<PathBuf>,
}

fn send_event(tx: &Option<&UnboundedSender<AgentEvent>>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// Agent：持有 LLM、沙箱、解析器、提示词模板与报告合成器，驱动单次查询
pub struct Agent {
    llm: Arc<dyn LlmClient>,
    sandbox: CodeSandbox,
    parser: ActionParser,
    prompts: PromptBuilder,
    previewer: FilePreviewer,
    composer: ReportComposer,
    config: AppConfig,
}

impl Agent {
    /// 按配置组装全部组件
    pub fn from_config(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            sandbox: CodeSandbox::new(config.sandbox.clone()),
            parser: ActionParser::new(),
            prompts: PromptBuilder::from_default_file(),
            previewer: FilePreviewer::new(
                config.files.preview_lines,
                config.files.max_preview_mb,
                config.files.cache_capacity,
            ),
            composer: ReportComposer::new(llm.clone()),
            llm,
            config,
        }
    }

    /// 覆盖解析器（标记需与提示词模板一致）
    pub fn with_parser(mut self, parser: ActionParser) -> Self {
        self.parser = parser;
        self
    }

    /// 覆盖提示词模板
    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// 阻塞式执行：驱动循环到终态后返回结果
    pub async fn run(&self, request: QueryRequest) -> Result<QueryResult, AgentError> {
        self.run_impl(request, None).await
    }

    /// 流式执行：同一状态机，另将每次转移推送给消费方
    pub async fn run_streaming(
        &self,
        request: QueryRequest,
        event_tx: &UnboundedSender<AgentEvent>,
    ) -> Result<QueryResult, AgentError> {
        self.run_impl(request, Some(event_tx)).await
    }

    async fn run_impl(
        &self,
        request: QueryRequest,
        event_tx: Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<QueryResult, AgentError> {
        let query_id = uuid::Uuid::new_v4();
        tracing::info!(query_id = %query_id, "开始处理查询: {}", request.instruction);

        let mut state = AgentState::new(self.config.agent.max_iterations);

        // 文件：显式传入优先，否则从历史消息回收本地路径
        let file_path = request
            .file_path
            .clone()
            .filter(|p| p.exists())
            .or_else(|| request.recycled_file_path());

        for msg in &request.history {
            match msg.role.as_str() {
                "user" => state.push_message(Message::user(&msg.content)),
                "assistant" => state.push_message(Message::assistant(&msg.content)),
                "system" => state.push_message(Message::system(&msg.content)),
                _ => {}
            }
        }

        // 文件上下文注入为系统消息：只给名字、类型与路径
        if let Some(ref path) = file_path {
            let file_type = detect_file_type(path);
            state.push_message(Message::system(file_system_message(
                path,
                file_type.as_str(),
            )));
            state.file_ref = Some(FileRef::new(path.clone(), file_type));
        }

        state.push_message(Message::user(&request.instruction));

        match self.drive(&mut state, &file_path, &event_tx).await {
            Ok(()) => {
                let result = self.finish(&mut state, file_path, &event_tx).await;
                send_event(&event_tx, AgentEvent::Done);
                Ok(result)
            }
            Err(e) => {
                tracing::error!(query_id = %query_id, "处理查询失败: {}", e);
                send_event(
                    &event_tx,
                    AgentEvent::Error {
                        message: e.to_string(),
                    },
                );
                send_event(&event_tx, AgentEvent::Done);
                Err(e)
            }
        }
    }

    /// 状态机主体；只在取模型回复失败时返回 Err
    async fn drive(
        &self,
        state: &mut AgentState,
        file_path: &Option<PathBuf>,
        event_tx: &Option<&UnboundedSender<AgentEvent>>,
    ) -> Result<(), AgentError> {
        loop {
            if state.done {
                return Ok(());
            }
            // 迭代上限：不再调用模型，强制收尾
            if state.iteration >= state.max_iterations {
                tracing::warn!("达到最大迭代次数 {}，强制结束", state.max_iterations);
                state.mark_done();
                return Ok(());
            }

            let step_no = state.iteration + 1;
            send_event(
                event_tx,
                AgentEvent::StepStart {
                    step: step_no,
                    message: format!("开始第 {} 步思考...", step_no),
                },
            );

            // THINKING：系统指令 + 文件摘要 + 步骤历史 + 对话
            let file_info = self.render_file_info(state);
            let steps_history = PromptBuilder::render_steps(&state.steps);
            let system = self.prompts.build_system(&file_info, &steps_history);
            let mut messages = vec![Message::system(system)];
            messages.extend(state.conversation.iter().cloned());

            let output = self
                .llm
                .complete(&messages)
                .await
                .map_err(AgentError::LlmError)?;
            let preview: String = output.chars().take(RESPONSE_PREVIEW_CHARS).collect();
            tracing::info!("LLM响应原文: {}", preview);

            let parsed = self.parser.parse(&output);
            state.record_step(StepRecord::from_parsed(&parsed));
            state.iteration += 1;

            if !parsed.thought.is_empty() {
                send_event(
                    event_tx,
                    AgentEvent::Thought {
                        step: step_no,
                        content: parsed.thought.clone(),
                    },
                );
            }
            if !parsed.action.is_empty() {
                send_event(
                    event_tx,
                    AgentEvent::Action {
                        step: step_no,
                        action: parsed.action.clone(),
                        action_input: state
                            .steps
                            .last()
                            .map(|s| s.action_input.clone())
                            .unwrap_or(serde_json::Value::Null),
                    },
                );
            }

            // ACTING
            if parsed.action.is_empty() {
                // 无行动：整段原文即最终答案；原文也为空则空转下一轮
                let text = match &parsed.input {
                    ActionInput::Raw(t) => t.trim().to_string(),
                    _ => String::new(),
                };
                if text.is_empty() {
                    continue;
                }
                state.push_message(Message::assistant(text.clone()));
                state.set_final_answer(text.clone());
                state.mark_done();
                send_event(
                    event_tx,
                    AgentEvent::FinalAnswer {
                        step: step_no,
                        content: text,
                    },
                );
                continue;
            }

            match parsed.action.as_str() {
                ACTION_FINAL_ANSWER => {
                    let answer = match &parsed.input {
                        ActionInput::Answer(a) => a.trim().to_string(),
                        _ => String::new(),
                    };
                    // 没给出 answer 时退回用最近一次执行结果收尾
                    let content = if answer.is_empty() {
                        state
                            .last_execution_result
                            .as_ref()
                            .map(|r| format!("代码执行完成，结果如下：\n\n{}", r))
                            .unwrap_or_default()
                    } else {
                        answer
                    };
                    if !content.is_empty() {
                        state.push_message(Message::assistant(content.clone()));
                        state.set_final_answer(content.clone());
                        send_event(
                            event_tx,
                            AgentEvent::FinalAnswer {
                                step: step_no,
                                content,
                            },
                        );
                    }
                    state.mark_done();
                }
                ACTION_EXECUTE_CODE => {
                    let code = match &parsed.input {
                        ActionInput::Code(c) => c.trim().to_string(),
                        _ => String::new(),
                    };
                    if code.is_empty() {
                        state.set_observation("错误：未提供代码");
                        continue;
                    }

                    // EXECUTING
                    state.pending_code = Some(code.clone());
                    send_event(
                        event_tx,
                        AgentEvent::CodeExecutionStart {
                            step: step_no,
                            code: code.clone(),
                        },
                    );

                    let prepared = if self.config.sandbox.ensure_print {
                        ensure_printed_output(&code)
                    } else {
                        code.clone()
                    };
                    let ctx = ExecutionContext {
                        file_path: file_path.clone(),
                    };
                    let outcome = self.sandbox.execute(&prepared, &ctx).await;
                    state.pending_code = None;

                    let observation = if outcome.output.trim().is_empty() {
                        "(无输出)".to_string()
                    } else {
                        outcome.output.clone()
                    };
                    state.last_execution_result = Some(observation.clone());
                    state.set_observation(observation.clone());

                    send_event(
                        event_tx,
                        AgentEvent::CodeExecutionResult {
                            step: step_no,
                            result: observation.clone(),
                        },
                    );
                    send_event(
                        event_tx,
                        AgentEvent::Observation {
                            step: step_no,
                            content: observation.clone(),
                        },
                    );

                    // 执行结果作为观察反馈，回到 THINKING
                    state.push_message(Message::user(format!(
                        "观察:\n{}\n\n请根据观察更新你的计划或给出最终答案。",
                        observation
                    )));

                    // 可选短路策略：首次非错误执行后直接收尾
                    if self.config.agent.answer_after_first_execution
                        && !outcome.timed_out
                        && !observation.contains("代码执行错误")
                    {
                        state.mark_done();
                    }
                }
                other => {
                    // 未识别行动：不追加消息，空转下一轮，由迭代上限兜底
                    tracing::warn!("未识别的行动: {}", other);
                }
            }
        }
    }

    /// 终态收尾：显式答案直接用；否则拼接最后回复与执行结果（或按配置合成报告）
    async fn finish(
        &self,
        state: &mut AgentState,
        file_path: Option<PathBuf>,
        event_tx: &Option<&UnboundedSender<AgentEvent>>,
    ) -> QueryResult {
        let response = match &state.final_answer {
            Some(answer) => answer.clone(),
            None => {
                let observations = state.observations();
                let synthesized = if self.config.agent.report_on_cutoff && !observations.is_empty()
                {
                    let thought = state
                        .steps
                        .last()
                        .map(|s| s.thought.clone())
                        .unwrap_or_default();
                    self.composer.compose(&thought, &observations).await
                } else {
                    let mut text = state
                        .last_assistant_message()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| {
                            format!(
                                "已达到最大迭代次数 {}，无法继续处理。请检查您的请求或尝试简化任务。",
                                state.max_iterations
                            )
                        });
                    if let Some(ref exec) = state.last_execution_result {
                        if !text.ends_with('\n') {
                            text.push_str("\n\n");
                        }
                        text.push_str(&format!("代码执行结果：\n\n{}", exec));
                    }
                    text
                };
                send_event(
                    event_tx,
                    AgentEvent::FinalAnswer {
                        step: state.iteration,
                        content: synthesized.clone(),
                    },
                );
                synthesized
            }
        };

        QueryResult {
            response,
            final_answer: state.final_answer.clone(),
            steps: state.steps.clone(),
            execution_result: state.last_execution_result.clone(),
            file_path,
        }
    }

    /// 文件摘要；preview 懒加载，至多填充一次
    fn render_file_info(&self, state: &mut AgentState) -> String {
        let Some(ref mut file_ref) = state.file_ref else {
            return String::new();
        };
        if file_ref.preview.is_none() {
            file_ref.preview = Some(self.previewer.preview(&file_ref.path));
        }
        PromptBuilder::render_file_info(file_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// 依次返回脚本化回复；耗尽后重复最后一条
    struct ScriptedLlm {
        responses: Mutex<Vec<String>>,
        cursor: Mutex<usize>,
    }

    impl ScriptedLlm {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
                cursor: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            let responses = self.responses.lock().unwrap();
            let mut cursor = self.cursor.lock().unwrap();
            let idx = (*cursor).min(responses.len() - 1);
            *cursor += 1;
            Ok(responses[idx].clone())
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            Err("connection refused".to_string())
        }
    }

    fn test_config(root: &std::path::Path, max_iterations: usize, timeout_secs: u64) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.agent.max_iterations = max_iterations;
        cfg.sandbox.interpreter = "sh".to_string();
        cfg.sandbox.timeout_secs = timeout_secs;
        cfg.sandbox.large_input_timeout_secs = timeout_secs;
        cfg.sandbox.ensure_print = false;
        cfg.sandbox.scratch_root = Some(root.join("scratch"));
        cfg.sandbox.charts_dir = root.join("charts");
        cfg
    }

    fn agent_with(cfg: AppConfig, llm: Arc<dyn LlmClient>) -> Agent {
        Agent::from_config(cfg, llm).with_prompts(PromptBuilder::new())
    }

    #[tokio::test]
    async fn test_final_answer_json_no_execution() {
        let root = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            r#"{"thought": "可以直接回答", "action": {"name": "final_answer", "input": "done"}}"#,
        ]);
        let agent = agent_with(test_config(root.path(), 5, 10), llm);

        let result = agent.run(QueryRequest::new("问题")).await.unwrap();
        assert_eq!(result.final_answer.as_deref(), Some("done"));
        assert_eq!(result.response, "done");
        assert_eq!(result.steps.len(), 1);
        assert!(result.execution_result.is_none());
    }

    #[tokio::test]
    async fn test_capped_run_includes_execution_result() {
        let root = tempfile::tempdir().unwrap();
        // 模型永远只执行代码；max_iterations=1 后强制收尾
        let llm = ScriptedLlm::new(&[
            "思考: 算一下\n行动: execute_code\n行动输入: {\"code\": \"echo 2\"}",
        ]);
        let agent = agent_with(test_config(root.path(), 1, 10), llm);

        let result = agent.run(QueryRequest::new("1+1 等于几")).await.unwrap();
        assert!(result.final_answer.is_none());
        assert!(result.response.contains("2"));
        assert_eq!(result.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout_feeds_observation_and_continues() {
        let root = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            "思考: 跑个慢任务\n行动: execute_code\n行动输入: {\"code\": \"sleep 30\"}",
            "思考: 超时了，直接回答\n行动: final_answer\n行动输入: {\"answer\": \"finished\"}",
        ]);
        let agent = agent_with(test_config(root.path(), 5, 1), llm);

        let result = agent.run(QueryRequest::new("测试")).await.unwrap();
        assert_eq!(result.final_answer.as_deref(), Some("finished"));
        assert!(result.steps[0].observation.contains("超时"));
        assert_eq!(result.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_terminates_within_max_iterations() {
        let root = tempfile::tempdir().unwrap();
        // 未识别行动：空转，由迭代上限兜底
        let llm = ScriptedLlm::new(&["思考: 迷路了\n行动: browse_web\n行动输入: {}"]);
        let agent = agent_with(test_config(root.path(), 3, 10), llm);

        let result = agent.run(QueryRequest::new("测试")).await.unwrap();
        assert_eq!(result.steps.len(), 3);
        assert!(result.final_answer.is_none());
        assert!(result.response.contains("最大迭代次数"));
    }

    #[tokio::test]
    async fn test_empty_action_uses_raw_text_as_answer() {
        let root = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&["这是一段没有任何标记的普通回复。"]);
        let agent = agent_with(test_config(root.path(), 5, 10), llm);

        let result = agent.run(QueryRequest::new("测试")).await.unwrap();
        assert_eq!(
            result.final_answer.as_deref(),
            Some("这是一段没有任何标记的普通回复。")
        );
    }

    #[tokio::test]
    async fn test_llm_failure_aborts_with_error_event() {
        let root = tempfile::tempdir().unwrap();
        let agent = agent_with(test_config(root.path(), 5, 10), Arc::new(FailingLlm));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = agent.run_streaming(QueryRequest::new("测试"), &tx).await;
        assert!(matches!(result, Err(AgentError::LlmError(_))));

        let mut types = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            types.push(event_type(&ev));
        }
        assert_eq!(types, vec!["step_start", "error", "done"]);
    }

    #[tokio::test]
    async fn test_event_order_within_iteration() {
        let root = tempfile::tempdir().unwrap();
        let llm = ScriptedLlm::new(&[
            "思考: 先执行\n行动: execute_code\n行动输入: {\"code\": \"echo hi\"}",
            "思考: 好了\n行动: final_answer\n行动输入: {\"answer\": \"hi\"}",
        ]);
        let agent = agent_with(test_config(root.path(), 5, 10), llm);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        agent
            .run_streaming(QueryRequest::new("测试"), &tx)
            .await
            .unwrap();

        let mut types = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            types.push(event_type(&ev));
        }
        assert_eq!(
            types,
            vec![
                "step_start",
                "thought",
                "action",
                "code_execution_start",
                "code_execution_result",
                "observation",
                "step_start",
                "thought",
                "action",
                "final_answer",
                "done",
            ]
        );
    }

    #[tokio::test]
    async fn test_answer_after_first_execution_short_circuits() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = test_config(root.path(), 5, 10);
        cfg.agent.answer_after_first_execution = true;
        let llm = ScriptedLlm::new(&[
            "思考: 执行\n行动: execute_code\n行动输入: {\"code\": \"echo 42\"}",
        ]);
        let agent = agent_with(cfg, llm);

        let result = agent.run(QueryRequest::new("测试")).await.unwrap();
        // 只跑了一步就收尾，响应里带执行结果
        assert_eq!(result.steps.len(), 1);
        assert!(result.response.contains("42"));
    }

    #[tokio::test]
    async fn test_report_on_cutoff_composes_summary() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = test_config(root.path(), 1, 10);
        cfg.agent.report_on_cutoff = true;
        // 同一个 LLM 既当规划器又当报告合成器：第二次调用返回报告
        let llm = ScriptedLlm::new(&[
            "思考: 看看数据\n行动: execute_code\n行动输入: {\"code\": \"echo data\"}",
            "# 分析报告\n\n数据如上。",
        ]);
        let agent = agent_with(cfg, llm);

        let result = agent.run(QueryRequest::new("测试")).await.unwrap();
        assert!(result.response.starts_with("# 分析报告"));
    }

    fn event_type(ev: &AgentEvent) -> &'static str {
        match ev {
            AgentEvent::StepStart { .. } => "step_start",
            AgentEvent::Thought { .. } => "thought",
            AgentEvent::Action { .. } => "action",
            AgentEvent::CodeExecutionStart { .. } => "code_execution_start",
            AgentEvent::CodeExecutionResult { .. } => "code_execution_result",
            AgentEvent::Observation { .. } => "observation",
            AgentEvent::FinalAnswer { .. } => "final_answer",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done => "done",
        }
    }
}
