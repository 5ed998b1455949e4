pub mod gateway;
pub mod glossary;
pub mod idml;
pub mod notify;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod table;
pub mod utils;
pub mod worker;

pub use gateway::{OllamaGateway, TextTranslator};
pub use notify::{Notifier, TaskFeed, TaskView};
pub use service::{Download, EnqueueRequest, TranslatorService};
pub use store::{FileKind, Task, TaskStatus, TaskStore};
pub use utils::{AppConfig, Result, TranslatorError};
pub use worker::{ollama_gateway_factory, GatewayFactory, Scheduler};
