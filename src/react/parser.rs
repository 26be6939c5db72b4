//! 行动解析器：从 LLM 自由文本中提取 (思考, 行动, 行动输入)
//!
//! 两种编码按序尝试：整段结构化 JSON {thought, action: {name, input}}；
//! 失败则按「思考/行动/行动输入」三个标记从左到右切分。
//! 任何输入都给出尽力而为的结果，解析本身永不失败——
//! 完全无结构时退回空行动 + 原文，由循环当作最终答案处理。

use regex::Regex;
use serde_json::Value;

/// 规范行动名：执行代码
pub const ACTION_EXECUTE_CODE: &str = "execute_code";
/// 规范行动名：最终答案
pub const ACTION_FINAL_ANSWER: &str = "final_answer";

/// 行动输入的带标签变体（而非鸭子类型访问）
#[derive(Debug, Clone, PartialEq)]
pub enum ActionInput {
    Code(String),
    Answer(String),
    /// 无法归类时的原文回退
    Raw(String),
}

/// 一次解析的结果
#[derive(Debug, Clone)]
pub struct ParsedAction {
    pub thought: String,
    /// 规范化后的行动名；未匹配到规范集合时保留原词（循环按空转处理）
    pub action: String,
    pub input: ActionInput,
}

/// 分隔文本编码的解析器；标记可配置，默认用提示词模板里的中文标记
#[derive(Debug, Clone)]
pub struct ActionParser {
    thought_marker: String,
    action_marker: String,
    input_marker: String,
}

impl Default for ActionParser {
    fn default() -> Self {
        Self {
            thought_marker: "思考:".to_string(),
            action_marker: "行动:".to_string(),
            input_marker: "行动输入:".to_string(),
        }
    }
}

impl ActionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 自定义三个分段标记（与提示词模板保持一致）
    pub fn with_markers(
        thought_marker: impl Into<String>,
        action_marker: impl Into<String>,
        input_marker: impl Into<String>,
    ) -> Self {
        Self {
            thought_marker: thought_marker.into(),
            action_marker: action_marker.into(),
            input_marker: input_marker.into(),
        }
    }

    /// 解析一条模型回复；永不失败
    pub fn parse(&self, raw: &str) -> ParsedAction {
        if let Some(parsed) = self.try_parse_json(raw) {
            return parsed;
        }
        self.parse_delimited(raw)
    }

    /// 结构化 JSON 编码：整段（或 ```json 栅栏内）是 {thought, action: {name, input}}
    fn try_parse_json(&self, raw: &str) -> Option<ParsedAction> {
        let trimmed = raw.trim();
        let candidate = if let Some(rest) = trimmed.strip_prefix("```json") {
            rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
        } else {
            trimmed
        };

        let value: Value = serde_json::from_str(candidate).ok()?;
        let obj = value.as_object()?;
        let action_obj = obj.get("action")?.as_object()?;
        let name = action_obj.get("name")?.as_str()?;

        let thought = obj
            .get("thought")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let action = normalize_action(name);
        let input = input_from_value(&action, action_obj.get("input").unwrap_or(&Value::Null));

        Some(ParsedAction {
            thought,
            action,
            input,
        })
    }

    /// 分隔文本编码：按三个标记从左到右切分，缺失的标记逐级降级
    fn parse_delimited(&self, raw: &str) -> ParsedAction {
        let thought = segment(raw, &self.thought_marker, &self.action_marker).unwrap_or_default();
        let action_raw = segment(raw, &self.action_marker, &self.input_marker).unwrap_or_default();
        let input_text = raw
            .split_once(self.input_marker.as_str())
            .map(|(_, rest)| rest.trim().to_string());

        let action = normalize_action(&action_raw);

        let input = match input_text {
            Some(text) => match action.as_str() {
                ACTION_EXECUTE_CODE => ActionInput::Code(extract_code(&text)),
                ACTION_FINAL_ANSWER => ActionInput::Answer(extract_answer(&text)),
                _ => ActionInput::Raw(text),
            },
            None => match action.as_str() {
                ACTION_EXECUTE_CODE => ActionInput::Code(String::new()),
                ACTION_FINAL_ANSWER => ActionInput::Answer(String::new()),
                // 没有任何可识别结构：整段原文回退，空行动由循环当作最终答案
                _ => ActionInput::Raw(raw.trim().to_string()),
            },
        };

        ParsedAction {
            thought,
            action,
            input,
        }
    }
}

/// 取 start 标记之后、end 标记（或文本末尾）之前的片段
fn segment(raw: &str, start: &str, end: &str) -> Option<String> {
    let (_, after) = raw.split_once(start)?;
    let text = match after.find(end) {
        Some(idx) => &after[..idx],
        None => after,
    };
    Some(text.trim().to_string())
}

/// 规范化行动名：只留小写字母与下划线，再按双向子串包含匹配规范集合；
/// 支持双语同义词（「执行代码」/「最终答案」）；未匹配的非空词保留原样。
pub fn normalize_action(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if raw.contains("执行代码") {
        return ACTION_EXECUTE_CODE.to_string();
    }
    if raw.contains("最终答案") || raw.contains("最终回答") {
        return ACTION_FINAL_ANSWER.to_string();
    }

    let lower = raw.to_lowercase();
    let norm: String = lower
        .chars()
        .filter(|c| c.is_ascii_lowercase() || *c == '_')
        .collect();
    if norm.is_empty() {
        return raw.to_string();
    }
    // generate_code 是 execute_code 的历史别名
    if norm.contains("generate_code") || "generate_code".contains(norm.as_str()) {
        return ACTION_EXECUTE_CODE.to_string();
    }
    for canonical in [ACTION_EXECUTE_CODE, ACTION_FINAL_ANSWER] {
        if norm.contains(canonical) || canonical.contains(norm.as_str()) {
            return canonical.to_string();
        }
    }
    raw.to_string()
}

/// JSON 编码的 input 字段：裸字符串或带 code/answer 字段的对象，归一到同一内部形态
fn input_from_value(action: &str, value: &Value) -> ActionInput {
    match value {
        Value::String(s) => wrap_input(action, s.clone()),
        Value::Object(map) => {
            if let Some(code) = map.get("code").and_then(|v| v.as_str()) {
                return ActionInput::Code(code.to_string());
            }
            if let Some(answer) = map.get("answer") {
                return ActionInput::Answer(stringify_answer(answer));
            }
            wrap_input(action, serde_json::to_string(value).unwrap_or_default())
        }
        Value::Null => wrap_input(action, String::new()),
        other => wrap_input(action, other.to_string()),
    }
}

fn wrap_input(action: &str, text: String) -> ActionInput {
    match action {
        ACTION_EXECUTE_CODE => ActionInput::Code(text),
        ACTION_FINAL_ANSWER => ActionInput::Answer(text),
        _ => ActionInput::Raw(text),
    }
}

/// answer 字段：字符串直接用，对象转 JSON，其它标量转字符串
fn stringify_answer(answer: &Value) -> String {
    match answer {
        Value::String(s) => s.clone(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(answer).unwrap_or_default()
        }
        other => other.to_string(),
    }
}

/// 代码提取的有序回退：```python 栅栏 -> 通用 ``` 栅栏 -> "code": "..." 宽松正则 -> 整段原文
fn extract_code(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```python") {
        let rest = &trimmed[start + "```python".len()..];
        if let Some(end) = rest.find("```") {
            if end > 0 {
                return rest[..end].trim().to_string();
            }
        }
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        // 跳过语言标签行
        let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &rest[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
        return trimmed.to_string();
    }

    // 宽松提取 "code": "..."，支持跨行
    let re = Regex::new(r#""code"\s*:\s*"([\s\S]*?)"\s*\}?\s*$"#).unwrap();
    if let Some(caps) = re.captures(trimmed) {
        let raw = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or("")
            .replace("\\n", "\n")
            .replace("\\t", "\t")
            .replace("\\r", "\r")
            .replace("\\\"", "\"");
        return raw;
    }

    trimmed.to_string()
}

/// 答案提取：JSON 对象的 answer 字段、裸字符串，或整段原文
fn extract_answer(text: &str) -> String {
    let trimmed = text.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            // 清掉 JSON 里的裸控制符再解析
            let cleaned: String = trimmed[start..=end]
                .chars()
                .filter(|c| *c >= ' ' || matches!(c, '\n' | '\r' | '\t'))
                .collect();
            if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
                if let Some(answer) = value.get("answer") {
                    return stringify_answer(answer);
                }
            }
        }
    }

    if let Ok(Value::String(s)) = serde_json::from_str::<Value>(trimmed) {
        return s;
    }

    trimmed.to_string()
}
