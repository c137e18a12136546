mod discord;
mod execution;
mod item;
mod task;

pub use discord::{
    DiscordBot, DiscordChannelBinding, Embed, EmbedField, EmbedFooter, SetTaskDiscordConfigRequest,
    TaskDiscordConfig, WebhookMessage,
};
pub use execution::{Execution, ExecutionStatus, StepResult, StepStatus};
pub use item::{FeedItem, ScrapedItem, StepData, StepOutput};
pub use task::{CreateTaskRequest, PipelineStep, Task, TaskStatus, UpdateTaskRequest};
