//! 代码沙箱：隔离子进程执行
//!
//! 每次执行获取一个唯一临时目录（作用域获取，成功/出错/超时都无条件清理），
//! 将代码落盘后以该目录为工作目录启动子进程，带墙钟超时与强制终止；
//! stdout/stderr 按替换策略解码，stderr 非空时以「错误输出」块附加。
//! 子进程里创建的变量对调用方不可见，结果只通过捕获的文本回传。

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;

use crate::config::SandboxSection;

/// 落盘的代码文件名
const CODE_FILE_NAME: &str = "code_to_execute.py";

/// 代码未显式打印时尝试补打印的候选结果变量
const PRINT_CANDIDATES: &[&str] = &["summary", "result", "results", "output"];

/// 单次执行的输入上下文
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// 需要带入沙箱的输入文件（小文件复制进去，大文件注入原路径变量）
    pub file_path: Option<PathBuf>,
}

/// 单次执行的结果：捕获的输出文本与是否超时
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub output: String,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    fn text(output: String) -> Self {
        Self {
            output,
            timed_out: false,
        }
    }
}

/// 代码沙箱：持有解释器与超时配置
pub struct CodeSandbox {
    config: SandboxSection,
}

impl CodeSandbox {
    pub fn new(config: SandboxSection) -> Self {
        Self { config }
    }

    /// 执行一段代码并返回捕获的输出；本函数不返回 Err —
    /// 启动失败、超时等都折叠为 outcome 文本，由调用方作为 Observation 喂回模型。
    pub async fn execute(&self, code: &str, ctx: &ExecutionContext) -> ExecutionOutcome {
        let scratch = match self.acquire_scratch() {
            Ok(dir) => dir,
            Err(e) => {
                return ExecutionOutcome::text(format!("代码执行错误: {}", e));
            }
        };
        tracing::info!("创建临时目录: {}", scratch.path().display());

        let outcome = self.run_in(scratch.path(), code, ctx).await;

        // 无条件清理；失败只记日志，不影响已得到的结果
        let scratch_path = scratch.path().to_path_buf();
        match scratch.close() {
            Ok(()) => tracing::info!("清理临时目录: {}", scratch_path.display()),
            Err(e) => tracing::error!("清理临时目录失败 {}: {}", scratch_path.display(), e),
        }

        outcome
    }

    fn acquire_scratch(&self) -> std::io::Result<TempDir> {
        let builder_prefix = "ida-sandbox-";
        match &self.config.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                tempfile::Builder::new().prefix(builder_prefix).tempdir_in(root)
            }
            None => tempfile::Builder::new().prefix(builder_prefix).tempdir(),
        }
    }

    async fn run_in(&self, scratch: &Path, code: &str, ctx: &ExecutionContext) -> ExecutionOutcome {
        let mut code = code.to_string();
        let mut timeout_secs = self.config.timeout_secs;
        let copy_threshold = self.config.copy_threshold_mb * 1024 * 1024;

        if let Some(ref file_path) = ctx.file_path {
            if file_path.exists() {
                let size = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);
                if size > copy_threshold {
                    // 大文件不复制，注入原始绝对路径变量，并放宽超时
                    let abs = file_path
                        .canonicalize()
                        .unwrap_or_else(|_| file_path.clone());
                    code = format!("file_path = r\"{}\"\n{}", abs.display(), code);
                    timeout_secs = self.config.large_input_timeout_secs;
                    tracing::info!(
                        "大文件 {} ({} 字节) 不复制，注入路径变量",
                        file_path.display(),
                        size
                    );
                } else if let Some(name) = file_path.file_name() {
                    let dest = scratch.join(name);
                    if let Err(e) = std::fs::copy(file_path, &dest) {
                        tracing::warn!("复制文件到沙箱失败: {}", e);
                    } else {
                        tracing::info!("复制文件 {} 到 {}", file_path.display(), dest.display());
                    }
                }
            }
        }

        let code_file = scratch.join(CODE_FILE_NAME);
        if let Err(e) = std::fs::write(&code_file, &code) {
            return ExecutionOutcome::text(format!("代码执行错误: {}", e));
        }

        let charts_dir = self.charts_dir_abs();

        let mut cmd = Command::new(&self.config.interpreter);
        cmd.arg(&code_file)
            .current_dir(scratch)
            .env("PYTHONIOENCODING", "utf-8")
            .env("IDA_CHARTS_DIR", &charts_dir)
            .kill_on_drop(true);

        let waited = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output()).await;

        match waited {
            // 超时：kill_on_drop 保证子进程被强制终止
            Err(_) => {
                tracing::warn!("代码执行超时（{}秒），已终止子进程", timeout_secs);
                ExecutionOutcome {
                    output: format!("错误: 代码执行超时（{}秒）", timeout_secs),
                    timed_out: true,
                }
            }
            Ok(Err(e)) => ExecutionOutcome::text(format!("代码执行错误: {}", e)),
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let mut result = stdout;
                if !stderr.is_empty() {
                    result.push_str(&format!("\n错误输出:\n{}", stderr));
                }
                ExecutionOutcome::text(result)
            }
        }
    }

    /// 产物目录的绝对路径；目录不存在时先创建
    fn charts_dir_abs(&self) -> PathBuf {
        let dir = &self.config.charts_dir;
        std::fs::create_dir_all(dir).ok();
        dir.canonicalize().unwrap_or_else(|_| dir.clone())
    }
}

/// 代码未显式 print 时补一行打印：优先打印出现过的候选结果变量，否则打印固定提示。
/// 仅对 Python 代码有意义，由调用方按解释器决定是否启用。
pub fn ensure_printed_output(code: &str) -> String {
    if code.contains("print(") {
        return code.to_string();
    }
    for var in PRINT_CANDIDATES {
        let pattern = regex::Regex::new(&format!(r"\b{}\b", var)).unwrap();
        if pattern.is_match(code) {
            return format!("{}\nprint({})\n", code, var);
        }
    }
    format!(
        "{}\nprint(\"代码已执行，无输出（未检测到可打印变量）\")\n",
        code
    )
}
