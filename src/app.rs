//! Shared application state handed to every request handler.

use std::sync::Arc;

use crate::config::{Config, Environment};
use crate::executor::Executor;
use crate::mailer::Mailer;
use crate::scheduler::Scheduler;
use crate::store::JobStore;

#[derive(Clone)]
pub struct App {
    pub config: Config,
    pub environment: Environment,
    pub store: JobStore,
    pub scheduler: Scheduler,
    pub executor: Arc<Executor>,
    pub mailer: Mailer,
}
