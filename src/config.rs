//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `IDA__*` 覆盖（双下划线表示嵌套，
//! 如 `IDA__SANDBOX__TIMEOUT_SECS=60`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub sandbox: SandboxSection,
    pub files: FilesSection,
}

/// [agent] 段：循环上限与终止策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// 单次查询内最大 ReAct 迭代数，防止死循环
    pub max_iterations: usize,
    /// 首次代码执行成功后是否直接收尾（默认 false：一直循环到显式 final_answer）
    pub answer_after_first_execution: bool,
    /// 达到迭代上限且无最终答案时，是否用报告合成器生成收尾文本
    pub report_on_cutoff: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            answer_after_first_execution: false,
            report_on_cutoff: false,
        }
    }
}

/// [llm] 段：后端选择、模型与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / mock；无 API Key 时自动退到 mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 瞬时失败时客户端内部的最大重试次数（对状态机不可见）
    pub max_retries: u32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            max_retries: 3,
            request_timeout_secs: 60,
        }
    }
}

/// [sandbox] 段：解释器、超时与产物目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// 执行代码用的解释器（测试中可换成 sh 等）
    pub interpreter: String,
    /// 单次执行超时（秒）
    pub timeout_secs: u64,
    /// 输入文件超过复制阈值时放宽到的超时（秒）
    pub large_input_timeout_secs: u64,
    /// 超过此大小（MB）的输入文件不再复制进沙箱，改为注入原路径变量
    pub copy_threshold_mb: u64,
    /// 代码未显式 print 时自动补一行打印（仅对 Python 解释器有意义）
    pub ensure_print: bool,
    /// 图表等产物的输出目录，经 IDA_CHARTS_DIR 暴露给子进程
    pub charts_dir: PathBuf,
    /// 临时目录的父目录；未设置时用系统临时目录
    pub scratch_root: Option<PathBuf>,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 30,
            large_input_timeout_secs: 120,
            copy_threshold_mb: 10,
            ensure_print: true,
            charts_dir: PathBuf::from("charts"),
            scratch_root: None,
        }
    }
}

/// [files] 段：文件预览边界与缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilesSection {
    /// 大文本文件只预览前 N 行
    pub preview_lines: usize,
    /// 超过此大小（MB）的文本文件按大文件处理
    pub max_preview_mb: u64,
    /// 预览缓存容量（条目数）
    pub cache_capacity: usize,
}

impl Default for FilesSection {
    fn default() -> Self {
        Self {
            preview_lines: 100,
            max_preview_mb: 10,
            cache_capacity: 32,
        }
    }
}

/// 从 config 目录加载配置，环境变量 IDA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 IDA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("IDA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert!(!cfg.agent.answer_after_first_execution);
        assert_eq!(cfg.sandbox.timeout_secs, 30);
        assert_eq!(cfg.sandbox.interpreter, "python3");
        assert_eq!(cfg.files.preview_lines, 100);
    }

    #[test]
    fn test_toml_overrides() {
        let toml = r#"
            [agent]
            max_iterations = 3
            answer_after_first_execution = true

            [sandbox]
            timeout_secs = 5
        "#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.max_iterations, 3);
        assert!(cfg.agent.answer_after_first_execution);
        assert_eq!(cfg.sandbox.timeout_secs, 5);
        // 未覆盖的键保留默认值
        assert_eq!(cfg.sandbox.large_input_timeout_secs, 120);
    }
}
