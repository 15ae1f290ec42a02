//! Task registry
//!
//! Maps task identifiers to live [`Task`] handles. The map is only mutated by
//! `create` (insert) and `remove` (delete); lookups hold a read lock, so a
//! concurrent removal is either fully visible or not at all.
//!
//! The management operations (`search`, `query`, `remove`, `clear`) consult
//! the agent's [`Authorizer`] first. `show` and `touch` only reach tasks the
//! caller owns and need no grant.

use crate::agent::Task;
use crate::auth::{Authorizer, Caller};
use crate::error::{Error, Result};
use crate::types::{Filter, TaskId, TaskInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

struct RegistryInner {
    tasks: RwLock<HashMap<TaskId, Task>>,
    next_id: AtomicU64,
    authorizer: Arc<dyn Authorizer>,
}

/// Shared id → task map (cloneable, all clones see the same tasks)
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

/// Non-owning handle tasks use to unregister themselves
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    /// Drop `id` from the map, if the registry still exists
    pub(crate) async fn detach(&self, id: TaskId) {
        if let Some(inner) = self.0.upgrade() {
            inner.tasks.write().await.remove(&id);
        }
    }
}

impl TaskRegistry {
    pub(crate) fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                authorizer,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    /// Hand out an id that was never used before
    pub(crate) fn allocate_id(&self) -> TaskId {
        TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) async fn insert(&self, task: Task) {
        self.inner.tasks.write().await.insert(task.id(), task);
    }

    /// Snapshot of every registered task
    pub(crate) async fn all(&self) -> Vec<Task> {
        self.inner.tasks.read().await.values().cloned().collect()
    }

    /// Number of registered tasks
    pub async fn len(&self) -> usize {
        self.inner.tasks.read().await.len()
    }

    /// Whether no task is registered
    pub async fn is_empty(&self) -> bool {
        self.inner.tasks.read().await.is_empty()
    }

    async fn lookup(&self, id: TaskId) -> Result<Task> {
        self.inner
            .tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))
    }

    /// Look up a task owned by the caller's bundle
    pub(crate) async fn owned(&self, caller: &Caller, id: TaskId) -> Result<Task> {
        let task = self.lookup(id).await?;
        if task.bundle() != caller.bundle {
            tracing::debug!(task_id = %id, bundle = %caller.bundle, "Task belongs to another bundle");
            return Err(Error::TaskNotFound(id));
        }
        Ok(task)
    }

    async fn authorize(&self, caller: &Caller, operation: &str) -> Result<()> {
        self.inner
            .authorizer
            .authorize(caller, operation)
            .await
            .into_result(operation)
    }

    /// Ids of tasks matching `filter`, ordered by priority then id
    ///
    /// Callers that are not system applications only ever see their own
    /// bundle's tasks, whatever `filter.bundle` says.
    pub async fn search(&self, caller: &Caller, filter: &Filter) -> Result<Vec<TaskId>> {
        self.authorize(caller, "search").await?;

        let bundle = if self.inner.authorizer.is_system(caller).await {
            filter.bundle.clone()
        } else {
            Some(caller.bundle.clone())
        };

        let mut hits = Vec::new();
        for task in self.all().await {
            if bundle.as_deref().is_some_and(|b| b != task.bundle()) {
                continue;
            }
            let ctime = task.ctime();
            if filter.before.is_some_and(|before| ctime > before)
                || filter.after.is_some_and(|after| ctime < after)
            {
                continue;
            }
            let config = task.config();
            if filter.action.is_some_and(|a| a != config.action)
                || filter.mode.is_some_and(|m| m != config.mode)
            {
                continue;
            }
            if let Some(state) = filter.state
                && task.state().await != state
            {
                continue;
            }
            hits.push((config.priority, task.id()));
        }

        hits.sort_unstable();
        tracing::debug!(bundle = %caller.bundle, matches = hits.len(), "Task search");
        Ok(hits.into_iter().map(|(_, id)| id).collect())
    }

    /// Metadata of any task
    pub async fn query(&self, caller: &Caller, id: TaskId) -> Result<TaskInfo> {
        self.authorize(caller, "query").await?;
        self.lookup(id).await?.query().await
    }

    /// Remove any task; idempotent for tasks that are already gone
    pub async fn remove(&self, caller: &Caller, id: TaskId) -> Result<bool> {
        self.authorize(caller, "remove").await?;
        match self.lookup(id).await {
            Ok(task) => task.remove().await,
            Err(Error::TaskNotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Remove several tasks, returning the ids that were registered
    pub async fn clear(&self, caller: &Caller, ids: &[TaskId]) -> Result<Vec<TaskId>> {
        self.authorize(caller, "clear").await?;
        let mut removed = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Ok(task) = self.lookup(id).await {
                task.remove().await?;
                removed.push(id);
            }
        }
        tracing::info!(requested = ids.len(), removed = removed.len(), "Cleared tasks");
        Ok(removed)
    }

    /// Metadata of a task owned by the caller
    pub async fn show(&self, caller: &Caller, id: TaskId) -> Result<TaskInfo> {
        self.owned(caller, id).await?.query().await
    }

    /// Metadata of a task owned by the caller and protected by `token`
    ///
    /// A wrong token, or a task created without one, reads as a missing task.
    pub async fn touch(&self, caller: &Caller, id: TaskId, token: &str) -> Result<TaskInfo> {
        let task = self.owned(caller, id).await?;
        if task.config().token.as_deref() != Some(token) {
            tracing::warn!(task_id = %id, "Token mismatch on touch");
            return Err(Error::TaskNotFound(id));
        }
        task.query().await
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
