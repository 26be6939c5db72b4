//! IDA - 智能数据分析 Agent
//!
//! 无头入口：初始化日志与配置，驱动单次查询并把过程事件打印为 JSON 行。
//! 用法：`ida "<指令>" [文件路径]`；无 OPENAI_API_KEY 时自动退到 Mock 客户端。

use anyhow::Context;
use ida_agent::llm::create_llm_from_config;
use ida_agent::react::QueryRequest;
use ida_agent::{load_config, observability, Agent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut args = std::env::args().skip(1);
    let instruction = args
        .next()
        .context("用法: ida \"<指令>\" [文件路径]")?;
    let file_path = args.next();

    let config = load_config(None).context("加载配置失败")?;
    let llm = create_llm_from_config(&config);
    let agent = Agent::from_config(config, llm);

    let mut request = QueryRequest::new(instruction);
    if let Some(path) = file_path {
        request = request.with_file(path);
    }

    // 过程事件打印为 JSON 行，与最终回复分开
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        }
    });

    let result = agent.run_streaming(request, &tx).await;
    drop(tx);
    printer.await.context("事件打印任务失败")?;

    let result = result.context("查询执行失败")?;
    println!("\n{}", result.response);

    Ok(())
}
