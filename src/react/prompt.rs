//! 提示词构建：系统指令 + 文件摘要 + 步骤历史
//!
//! 模板优先从 config/prompts/system.md 加载，找不到时退回内置模板；
//! {file_info} / {steps_history} 两个占位符由每轮状态填充。

use crate::react::state::{FileRef, StepRecord};

/// 内置 ReAct 系统提示词模板
const DEFAULT_SYSTEM_TEMPLATE: &str = r#"你是一个数据分析助手，使用ReAct（思考-行动）方法解决问题。
你可以使用以下工具:
1. execute_code: 生成并执行Python代码来分析或处理数据
2. final_answer: 提供最终答案，结束对话

{file_info}

{steps_history}

按照以下格式回应:
思考: 分析问题并思考解决方案
行动: [工具名称]
行动输入: {
  "code": "要执行的Python代码" // 如果使用execute_code
  "answer": "最终答案" // 如果使用final_answer
}

当你有足够信息回答用户问题时，使用final_answer工具。

代码生成要求:
- 使用 pandas/numpy 等库处理数据时，务必使用 print 打印关键结果。
- 打印表格/序列前，设置完整显示选项:
  pandas: display.max_rows=None, display.max_columns=None, display.max_colwidth=None, display.width=None。
- DataFrame/Series 请优先使用 to_string() 打印完整内容。
- 如果读取了文件，请使用提示中提供的路径，避免硬编码其它路径。
- 生成图表请保存到环境变量 IDA_CHARTS_DIR 指向的目录，并 print 保存后的完整路径。
- 确保代码可独立运行，不依赖交互输入。

分析准则（务必遵守）：
1) 先用 df.head(2)、df.columns、df.dtypes 检查列名与类型，再决定分析方案。
2) 默认不对"年份/时间/编号类"字段做均值/标准差统计；对这类列只给出唯一值个数、最小/最大值或时间范围。
3) 仅对与"面积/数量/金额/比率/变化"等度量相关的数值列做统计；必要时 pd.to_numeric(errors='coerce') 转数值。
4) 猜列名前先打印候选列并说明选择依据，再进行计算。
5) 输出围绕洞见（趋势、异常、对比）；表格过长时先展示示例并在总结中归纳结论。
"#;

/// 提示词构建器：持有模板并按轮填充占位符
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            template: DEFAULT_SYSTEM_TEMPLATE.to_string(),
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// 从默认路径加载模板文件，找不到时退回内置模板
    pub fn from_default_file() -> Self {
        let template = [
            "config/prompts/system.md",
            "../config/prompts/system.md",
        ]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_SYSTEM_TEMPLATE.to_string());
        Self { template }
    }

    /// 填充文件摘要与步骤历史，得到本轮的系统提示词
    pub fn build_system(&self, file_info: &str, steps_history: &str) -> String {
        self.template
            .replace("{file_info}", file_info)
            .replace("{steps_history}", steps_history)
    }

    /// 文件摘要块：路径、类型与有界预览
    pub fn render_file_info(file_ref: &FileRef) -> String {
        let preview = file_ref.preview.as_deref().unwrap_or("");
        format!(
            "文件路径: {}\n文件类型: {}\n文件内容:\n{}\n",
            file_ref.path.display(),
            file_ref.file_type.as_str(),
            preview
        )
    }

    /// 步骤历史块：思考/行动/行动输入/观察，按循环顺序编号
    pub fn render_steps(steps: &[StepRecord]) -> String {
        let mut out = String::new();
        for (i, step) in steps.iter().enumerate() {
            out.push_str(&format!(
                "步骤 {}:\n思考: {}\n行动: {}\n行动输入: {}\n观察: {}\n\n",
                i + 1,
                step.thought,
                step.action,
                step.action_input,
                step.observation
            ));
        }
        out
    }
}

/// 文件上下文的系统消息：只给名字、类型与路径，不注入原始内容
pub fn file_system_message(path: &std::path::Path, file_type: &str) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    format!(
        "你有一个文件需要处理:\n文件名: {}\n文件类型: {}\n文件路径: {}",
        file_name,
        file_type,
        path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::FileType;

    #[test]
    fn test_build_system_fills_placeholders() {
        let builder = PromptBuilder::from_template("头\n{file_info}\n中\n{steps_history}\n尾");
        let system = builder.build_system("FILE", "STEPS");
        assert_eq!(system, "头\nFILE\n中\nSTEPS\n尾");
    }

    #[test]
    fn test_render_steps_numbered() {
        let steps = vec![
            StepRecord {
                thought: "先看列".to_string(),
                action: "execute_code".to_string(),
                action_input: serde_json::json!({"code": "print(df.columns)"}),
                observation: "Index([...])".to_string(),
            },
            StepRecord {
                thought: "汇总".to_string(),
                action: "final_answer".to_string(),
                action_input: serde_json::json!({"answer": "共 3 列"}),
                observation: String::new(),
            },
        ];
        let rendered = PromptBuilder::render_steps(&steps);
        assert!(rendered.contains("步骤 1:"));
        assert!(rendered.contains("步骤 2:"));
        assert!(rendered.contains("观察: Index([...])"));
    }

    #[test]
    fn test_render_file_info_includes_preview() {
        let mut file_ref = FileRef::new("/tmp/data.csv", FileType::Data);
        file_ref.preview = Some("a,b\n1,2".to_string());
        let info = PromptBuilder::render_file_info(&file_ref);
        assert!(info.contains("/tmp/data.csv"));
        assert!(info.contains("data"));
        assert!(info.contains("a,b"));
    }
}
