//! Task-management collaborator.
//!
//! `TaskService` owns its store explicitly. In rollback mode the store is a
//! transient in-memory map and the persistence core is never touched;
//! otherwise it is the durable [`TaskVault`].

use crate::core::config::VaultConfig;
use crate::core::error::VaultError;
use crate::core::filesystem::ReadOutcome;
use crate::core::model::{Subtask, Task, TaskPriority, TaskStatus};
use crate::core::store;
use crate::core::time;
use crate::plugins::vault::TaskVault;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub trait TaskStore {
    fn save(&self, task: &Task) -> Result<(), VaultError>;
    fn load(&self, initiative_id: &str, task_id: &str) -> Result<Option<Task>, VaultError>;
    fn list(&self, initiative_id: &str) -> Result<Vec<Task>, VaultError>;
}

impl<T: TaskStore + ?Sized> TaskStore for Box<T> {
    fn save(&self, task: &Task) -> Result<(), VaultError> {
        (**self).save(task)
    }

    fn load(&self, initiative_id: &str, task_id: &str) -> Result<Option<Task>, VaultError> {
        (**self).load(initiative_id, task_id)
    }

    fn list(&self, initiative_id: &str) -> Result<Vec<Task>, VaultError> {
        (**self).list(initiative_id)
    }
}

/// Rollback-mode storage. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct TransientTaskStore {
    tasks: Mutex<BTreeMap<(String, String), Task>>,
}

impl TransientTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskStore for TransientTaskStore {
    fn save(&self, task: &Task) -> Result<(), VaultError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.insert((task.initiative_id.clone(), task.id.clone()), task.clone());
        Ok(())
    }

    fn load(&self, initiative_id: &str, task_id: &str) -> Result<Option<Task>, VaultError> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks
            .get(&(initiative_id.to_string(), task_id.to_string()))
            .cloned())
    }

    fn list(&self, initiative_id: &str) -> Result<Vec<Task>, VaultError> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(tasks
            .iter()
            .filter(|((initiative, _), _)| initiative == initiative_id)
            .map(|(_, task)| task.clone())
            .collect())
    }
}

impl TaskStore for TaskVault {
    fn save(&self, task: &Task) -> Result<(), VaultError> {
        self.save_task(task, None).map(|_| ())
    }

    /// A tampered task file surfaces as an error here, not as "missing".
    fn load(&self, initiative_id: &str, task_id: &str) -> Result<Option<Task>, VaultError> {
        match self.load_task(initiative_id, task_id) {
            ReadOutcome::Found(task) => Ok(Some(task)),
            ReadOutcome::NotFound => Ok(None),
            ReadOutcome::IntegrityViolation(failure) => Err(VaultError::IntegrityViolation(
                format!("task {}/{}: {}", initiative_id, task_id, failure),
            )),
        }
    }

    fn list(&self, initiative_id: &str) -> Result<Vec<Task>, VaultError> {
        self.load_tasks(initiative_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStoreKind {
    /// Rollback mode: in-memory only.
    Transient,
    Durable,
}

impl TaskStoreKind {
    pub fn from_rollback_flag(rollback: bool) -> Self {
        if rollback {
            TaskStoreKind::Transient
        } else {
            TaskStoreKind::Durable
        }
    }
}

pub fn open_task_store(
    kind: TaskStoreKind,
    config: &VaultConfig,
) -> Result<Box<dyn TaskStore + Send + Sync>, VaultError> {
    match kind {
        TaskStoreKind::Transient => Ok(Box::new(TransientTaskStore::new())),
        TaskStoreKind::Durable => Ok(Box::new(TaskVault::open(config)?)),
    }
}

/// Fields a caller supplies when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub initiative_id: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub parent_task_id: Option<String>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(initiative_id: &str, title: &str) -> Self {
        Self {
            initiative_id: initiative_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            priority: TaskPriority::Medium,
            parent_task_id: None,
            assignee: None,
            due_date: None,
        }
    }
}

pub struct TaskService<S: TaskStore> {
    store: S,
}

impl<S: TaskStore> TaskService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn create_task(&self, input: NewTask) -> Result<Task, VaultError> {
        store::validate_id(&input.initiative_id)?;
        if input.title.trim().is_empty() {
            return Err(VaultError::ValidationError("task title is required".into()));
        }
        if let Some(parent) = &input.parent_task_id {
            if self.store.load(&input.initiative_id, parent)?.is_none() {
                return Err(VaultError::NotFound(format!("parent task {}", parent)));
            }
        }
        let id = format!("task-{}", time::new_event_id());
        let mut task = Task::new(&id, &input.initiative_id, input.title.trim());
        task.description = input.description;
        task.priority = input.priority;
        task.parent_task_id = input.parent_task_id;
        task.assignee = input.assignee;
        task.due_date = input.due_date;
        self.store.save(&task)?;
        Ok(task)
    }

    pub fn get_task(&self, initiative_id: &str, task_id: &str) -> Result<Task, VaultError> {
        self.store
            .load(initiative_id, task_id)?
            .ok_or_else(|| VaultError::NotFound(format!("task {}/{}", initiative_id, task_id)))
    }

    pub fn list_tasks(
        &self,
        initiative_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, VaultError> {
        let mut tasks = self.store.list(initiative_id)?;
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(tasks)
    }

    pub fn update_status(
        &self,
        initiative_id: &str,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<Task, VaultError> {
        self.revise(initiative_id, task_id, |task| {
            task.status = status;
            Ok(())
        })
    }

    pub fn add_subtask(
        &self,
        initiative_id: &str,
        task_id: &str,
        title: &str,
    ) -> Result<Task, VaultError> {
        if title.trim().is_empty() {
            return Err(VaultError::ValidationError("subtask title is required".into()));
        }
        self.revise(initiative_id, task_id, |task| {
            task.subtasks.push(Subtask {
                id: format!("sub-{}", time::new_event_id()),
                title: title.trim().to_string(),
                completed: false,
                created_at: time::now(),
            });
            Ok(())
        })
    }

    pub fn complete_subtask(
        &self,
        initiative_id: &str,
        task_id: &str,
        subtask_id: &str,
    ) -> Result<Task, VaultError> {
        self.revise(initiative_id, task_id, |task| {
            let subtask = task
                .subtasks
                .iter_mut()
                .find(|s| s.id == subtask_id)
                .ok_or_else(|| VaultError::NotFound(format!("subtask {}", subtask_id)))?;
            subtask.completed = true;
            Ok(())
        })
    }

    /// Loads the current version, applies `change` to a copy and stores the
    /// copy as the next version.
    fn revise<F>(&self, initiative_id: &str, task_id: &str, change: F) -> Result<Task, VaultError>
    where
        F: FnOnce(&mut Task) -> Result<(), VaultError>,
    {
        let current = self.get_task(initiative_id, task_id)?;
        let mut next = current.clone();
        change(&mut next)?;
        next.updated_at = time::now().max(current.updated_at);
        self.store.save(&next)?;
        Ok(next)
    }
}
