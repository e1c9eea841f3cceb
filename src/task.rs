use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use serde::Serialize;

use crate::error::SyncError;
use crate::logging::TaskLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Succeeded,
    Partial,
    Failed,
    Cancelled,
}

#[derive(Debug)]
pub enum Outcome<T> {
    Succeeded(T),
    Partial { value: T, failures: Vec<String> },
    Failed(SyncError),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn status(&self) -> TaskStatus {
        match self {
            Outcome::Succeeded(_) => TaskStatus::Succeeded,
            Outcome::Partial { .. } => TaskStatus::Partial,
            Outcome::Failed(_) => TaskStatus::Failed,
            Outcome::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Succeeded(value) | Outcome::Partial { value, .. } => Some(value),
            Outcome::Failed(_) | Outcome::Cancelled => None,
        }
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub trait BackgroundJob: Send + 'static {
    type Output: Send + 'static;

    fn name(&self) -> &str;

    fn log(&self) -> &TaskLog;

    fn run(&self, cancel: &CancelToken) -> Outcome<Self::Output>;
}

pub struct TaskHandle<T> {
    name: String,
    cancel: CancelToken,
    handle: JoinHandle<Outcome<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn join(self) -> Outcome<T> {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Failed(SyncError::TaskPanicked(self.name)),
        }
    }
}

pub fn spawn<J: BackgroundJob>(job: J) -> Result<TaskHandle<J::Output>, SyncError> {
    let name = job.name().to_string();
    let cancel = CancelToken::new();
    let token = cancel.clone();
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || run_guarded(&job, &token))
        .map_err(|err| SyncError::TaskSpawn(format!("{name}: {err}")))?;
    Ok(TaskHandle {
        name,
        cancel,
        handle,
    })
}

fn run_guarded<J: BackgroundJob>(job: &J, cancel: &CancelToken) -> Outcome<J::Output> {
    match panic::catch_unwind(AssertUnwindSafe(|| job.run(cancel))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let err = SyncError::TaskPanicked(job.name().to_string());
            job.log()
                .in_scope(|| tracing::error!("{err}: {}", panic_message(payload.as_ref())));
            Outcome::Failed(err)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
