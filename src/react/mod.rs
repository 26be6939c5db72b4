//! ReAct 核心：行动解析、状态、事件、提示词、报告合成与主循环

pub mod events;
pub mod loop_;
pub mod parser;
pub mod prompt;
pub mod report;
pub mod state;

pub use events::AgentEvent;
pub use loop_::{Agent, QueryResult};
pub use parser::{ActionInput, ActionParser, ParsedAction};
pub use prompt::PromptBuilder;
pub use report::ReportComposer;
pub use state::{AgentState, HistoryMessage, QueryRequest, StepRecord};
