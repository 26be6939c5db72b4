//! 报告合成器：降级重试
//!
//! 每级用更少的执行结果各调用一次 LLM：全量 -> 后一半 -> 最近一条 -> 「无结果」占位。
//! 每级都是 (thought, 子集) 的纯函数，失败不残留上一级的中间状态；
//! 最后一级失败则返回内嵌错误信息的固定 Markdown 文档，该级不可能再失败。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::Message;

/// 「无结果」占位文本（最末降级层）
const NO_RESULTS_PLACEHOLDER: &str = "（无结果）";

/// 报告合成器：持有 LLM，compose 永不返回 Err
pub struct ReportComposer {
    llm: Arc<dyn LlmClient>,
}

impl ReportComposer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 依据思考与执行结果合成 Markdown 报告
    pub async fn compose(&self, thought: &str, observations: &[String]) -> String {
        let half = &observations[observations.len() / 2..];
        let last = &observations[observations.len().saturating_sub(1)..];
        let attempts: [Option<&[String]>; 4] =
            [Some(observations), Some(half), Some(last), None];

        let mut last_err = String::new();
        for (level, subset) in attempts.into_iter().enumerate() {
            match self.attempt(thought, subset).await {
                Ok(report) => return report,
                Err(e) => {
                    tracing::warn!("报告生成失败（第 {} 级降级）: {}", level + 1, e);
                    last_err = e;
                }
            }
        }

        // 固定错误文档，内嵌最后一次错误
        format!(
            "# 分析报告\n\n报告生成失败，请稍后重试。\n\n错误详情: {}\n",
            last_err
        )
    }

    /// 单级尝试：渲染子集、调用一次 LLM；空白回复视为失败
    async fn attempt(&self, thought: &str, subset: Option<&[String]>) -> Result<String, String> {
        let rendered = match subset {
            Some(obs) if !obs.is_empty() => obs
                .iter()
                .enumerate()
                .map(|(i, o)| format!("{}.\n```\n{}\n```", i + 1, o))
                .collect::<Vec<_>>()
                .join("\n\n"),
            _ => NO_RESULTS_PLACEHOLDER.to_string(),
        };

        let prompt = format!(
            "请根据以下分析思路与代码执行结果，撰写一份 Markdown 格式的数据分析报告。\n\
             报告应包含：概述、关键发现、结论。围绕洞见（趋势、异常、对比）组织内容。\n\n\
             分析思路:\n{}\n\n执行结果:\n{}\n\n报告:",
            thought, rendered
        );

        let response = self.llm.complete(&[Message::user(prompt)]).await?;
        let trimmed = response.trim();
        if trimmed.is_empty() {
            return Err("模型返回了空报告".to_string());
        }
        Ok(trimmed.to_string())
    }
}
