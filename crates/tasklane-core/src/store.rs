use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::storage::{KeyValueStore, TASKS_BACKUP_KEY, TASKS_KEY};
use crate::task::{NewTask, Task, TaskPatch};
use crate::view::{SortKey, StatusFilter, ViewParams, derive_view};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
}

/// Owns the task collection and the transient view parameters.
///
/// Every mutation rewrites the whole collection under [`TASKS_KEY`], so a
/// read after any completed mutation reflects it.
#[derive(Debug)]
pub struct TaskStore<S: KeyValueStore> {
    storage: S,
    tasks: Vec<Task>,
    params: ViewParams,
}

impl<S: KeyValueStore> TaskStore<S> {
    /// Loads the persisted collection. Records that fail to deserialize are
    /// skipped; text that is not a JSON array is copied to [`TASKS_BACKUP_KEY`]
    /// before the store starts empty.
    #[instrument(skip(storage))]
    pub fn load(storage: S) -> Self {
        let tasks = match storage.get(TASKS_KEY) {
            Ok(Some(raw)) if !raw.trim().is_empty() => parse_tasks(&storage, &raw),
            Ok(_) => vec![],
            Err(error) => {
                warn!(error = %format!("{error:#}"), "failed reading stored tasks; starting empty");
                vec![]
            }
        };

        info!(count = tasks.len(), "loaded task collection");
        Self {
            storage,
            tasks,
            params: ViewParams::default(),
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn params(&self) -> &ViewParams {
        &self.params
    }

    pub fn view(&self) -> Vec<&Task> {
        derive_view(&self.tasks, &self.params)
    }

    pub fn set_filter(&mut self, filter: StatusFilter) {
        debug!(%filter, "set filter");
        self.params.filter = filter;
    }

    pub fn set_sort(&mut self, sort: SortKey) {
        debug!(%sort, "set sort");
        self.params.sort = sort;
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.params.search = search.into();
        debug!(search = %self.params.search, "set search");
    }

    pub fn find(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Resolves a unique id prefix to the full identifier.
    pub fn resolve(&self, prefix: &str) -> anyhow::Result<&Task> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(anyhow!("task id cannot be empty"));
        }
        if let Some(exact) = self.find(prefix) {
            return Ok(exact);
        }

        let mut matches = self.tasks.iter().filter(|task| task.id.starts_with(prefix));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no task matches id {prefix}"))?;
        if matches.next().is_some() {
            return Err(anyhow!("task id {prefix} is ambiguous; use more characters"));
        }
        Ok(first)
    }

    pub fn counts(&self) -> TaskCounts {
        let completed = self.tasks.iter().filter(|task| task.completed).count();
        TaskCounts {
            total: self.tasks.len(),
            active: self.tasks.len() - completed,
            completed,
        }
    }

    #[instrument(skip(self, new_task), fields(title = %new_task.title))]
    pub fn create(&mut self, new_task: NewTask, now: DateTime<Utc>) -> anyhow::Result<Task> {
        let task = Task::new(new_task, now);
        let mut next = Vec::with_capacity(self.tasks.len() + 1);
        next.push(task.clone());
        next.extend(self.tasks.iter().cloned());
        self.commit(next)?;

        info!(id = %task.id, count = self.tasks.len(), "created task");
        Ok(task)
    }

    /// Merges `patch` into the matching record. `None` when nothing matched.
    #[instrument(skip(self, patch))]
    pub fn update(&mut self, id: &str, patch: TaskPatch) -> anyhow::Result<Option<Task>> {
        let mut next = self.tasks.clone();
        let updated = next.iter_mut().find(|task| task.id == id).map(|task| {
            task.apply_patch(patch);
            task.clone()
        });
        self.commit(next)?;

        if updated.is_some() {
            info!(id, "updated task");
        } else {
            debug!(id, "update matched no task");
        }
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub fn delete(&mut self, id: &str) -> anyhow::Result<Option<Task>> {
        let mut next = self.tasks.clone();
        let removed = next
            .iter()
            .position(|task| task.id == id)
            .map(|idx| next.remove(idx));
        self.commit(next)?;

        if removed.is_some() {
            info!(id, count = self.tasks.len(), "deleted task");
        } else {
            debug!(id, "delete matched no task");
        }
        Ok(removed)
    }

    /// Flips the completion flag; returns the new value.
    #[instrument(skip(self))]
    pub fn toggle_completion(&mut self, id: &str) -> anyhow::Result<Option<bool>> {
        let mut next = self.tasks.clone();
        let flipped = next.iter_mut().find(|task| task.id == id).map(|task| {
            task.completed = !task.completed;
            task.completed
        });
        self.commit(next)?;

        match flipped {
            Some(completed) => info!(id, completed, "toggled task"),
            None => debug!(id, "toggle matched no task"),
        }
        Ok(flipped)
    }

    /// Persists `next` and only then replaces the in-memory collection.
    fn commit(&mut self, next: Vec<Task>) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(&next).context("failed to serialize tasks")?;
        self.storage
            .set(TASKS_KEY, &serialized)
            .context("failed to persist tasks")?;
        self.tasks = next;
        Ok(())
    }
}

fn parse_tasks<S: KeyValueStore>(storage: &S, raw: &str) -> Vec<Task> {
    let records = match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(records) => records,
        Err(error) => {
            warn!(%error, "stored tasks are not a JSON array; backing up and starting empty");
            if let Err(backup_error) = storage.set(TASKS_BACKUP_KEY, raw) {
                warn!(error = %format!("{backup_error:#}"), "failed backing up stored tasks");
            }
            return vec![];
        }
    };

    records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, record)| match serde_json::from_value::<Task>(record) {
            Ok(task) => Some(task),
            Err(error) => {
                warn!(index = idx, %error, "skipping unreadable stored task");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone};

    use super::*;
    use crate::storage::MemoryStore;
    use crate::task::Priority;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    fn stored(mem: &MemoryStore) -> Vec<Task> {
        let raw = mem.get(TASKS_KEY).unwrap().expect("tasks persisted");
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn create_prepends_and_persists() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);

        let first = store.create(new_task("first"), now()).unwrap();
        let second = store
            .create(new_task("second"), now() + Duration::seconds(1))
            .unwrap();

        assert_eq!(store.tasks().len(), 2);
        assert_eq!(store.tasks()[0].id, second.id);
        assert_eq!(store.tasks()[1].id, first.id);
        assert_ne!(first.id, second.id);
        assert!(!first.completed);
        assert_eq!(stored(&mem), store.tasks());
    }

    #[test]
    fn many_creates_have_unique_ids() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        for i in 0..50 {
            store.create(new_task(&format!("task {i}")), now()).unwrap();
        }

        let mut ids: Vec<&str> = store.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), 50);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn update_merges_and_keeps_identity() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        let task = store
            .create(
                NewTask {
                    title: "draft".to_string(),
                    description: "outline".to_string(),
                    priority: Priority::Low,
                    due_date: NaiveDate::from_ymd_opt(2024, 2, 1),
                },
                now(),
            )
            .unwrap();

        let updated = store
            .update(
                &task.id,
                TaskPatch {
                    priority: Some(Priority::High),
                    ..TaskPatch::default()
                },
            )
            .unwrap()
            .expect("task matched");

        assert_eq!(updated.id, task.id);
        assert_eq!(updated.created_at, task.created_at);
        assert_eq!(updated.title, "draft");
        assert_eq!(updated.description, "outline");
        assert_eq!(updated.due_date, task.due_date);
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(stored(&mem)[0].priority, Priority::High);
    }

    #[test]
    fn missing_ids_are_silent_noops() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        store.create(new_task("keep"), now()).unwrap();
        let before = store.tasks().to_vec();

        let patch = TaskPatch {
            title: Some("changed".to_string()),
            ..TaskPatch::default()
        };
        assert_eq!(store.update("missing", patch).unwrap(), None);
        assert_eq!(store.delete("missing").unwrap(), None);
        assert_eq!(store.toggle_completion("missing").unwrap(), None);
        assert_eq!(store.tasks(), before.as_slice());
        assert_eq!(stored(&mem), before);
    }

    #[test]
    fn delete_twice_is_idempotent() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        let gone = store.create(new_task("gone"), now()).unwrap();
        store.create(new_task("stays"), now()).unwrap();

        assert!(store.delete(&gone.id).unwrap().is_some());
        let after_first = store.tasks().to_vec();
        assert!(store.delete(&gone.id).unwrap().is_none());
        assert_eq!(store.tasks(), after_first.as_slice());
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn toggle_twice_restores_flag() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        let task = store.create(new_task("flip"), now()).unwrap();

        assert_eq!(store.toggle_completion(&task.id).unwrap(), Some(true));
        assert!(stored(&mem)[0].completed);
        assert_eq!(store.toggle_completion(&task.id).unwrap(), Some(false));
        assert!(!store.find(&task.id).unwrap().completed);
    }

    #[test]
    fn corrupt_or_missing_entry_starts_empty() {
        let corrupt = MemoryStore::new().with_entry(TASKS_KEY, "{not json");
        assert!(TaskStore::load(&corrupt).tasks().is_empty());
        assert_eq!(
            corrupt.get(TASKS_BACKUP_KEY).unwrap().as_deref(),
            Some("{not json")
        );

        let blank = MemoryStore::new().with_entry(TASKS_KEY, "");
        assert!(TaskStore::load(&blank).tasks().is_empty());

        let missing = MemoryStore::new();
        assert!(TaskStore::load(&missing).tasks().is_empty());
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, key: &str, _value: &str) -> anyhow::Result<()> {
            Err(anyhow!("read-only storage: {key}"))
        }
    }

    #[test]
    fn failed_write_leaves_collection_untouched() {
        let mem = MemoryStore::new();
        let mut seeded = TaskStore::load(&mem);
        let task = seeded.create(new_task("seed"), now()).unwrap();

        let mut store = TaskStore {
            storage: ReadOnlyStore,
            tasks: seeded.tasks().to_vec(),
            params: ViewParams::default(),
        };
        let before = store.tasks().to_vec();

        assert!(store.create(new_task("lost"), now()).is_err());
        assert!(store.toggle_completion(&task.id).is_err());
        assert!(store.delete(&task.id).is_err());
        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            ..TaskPatch::default()
        };
        assert!(store.update(&task.id, patch).is_err());
        assert_eq!(store.tasks(), before.as_slice());
    }

    #[test]
    fn reload_yields_equal_collection() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        store
            .create(
                NewTask {
                    title: "dated".to_string(),
                    description: "with a due date".to_string(),
                    priority: Priority::High,
                    due_date: NaiveDate::from_ymd_opt(2024, 3, 3),
                },
                Utc::now(),
            )
            .unwrap();
        store.create(new_task("plain"), Utc::now()).unwrap();
        let id = store.tasks()[1].id.clone();
        store.toggle_completion(&id).unwrap();

        let reloaded = TaskStore::load(&mem);
        assert_eq!(reloaded.tasks(), store.tasks());
    }

    #[test]
    fn view_params_are_not_persisted() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        store.create(new_task("Groceries"), now()).unwrap();
        store.create(new_task("Taxes"), now()).unwrap();

        store.set_search("tax");
        store.set_filter(StatusFilter::Active);
        store.set_sort(SortKey::Priority);
        assert_eq!(store.view().len(), 1);
        assert_eq!(store.view()[0].title, "Taxes");

        let reloaded = TaskStore::load(&mem);
        assert_eq!(reloaded.params(), &ViewParams::default());
        assert_eq!(reloaded.view().len(), 2);
    }

    #[test]
    fn resolve_accepts_unique_prefix() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        let task = store.create(new_task("prefix"), now()).unwrap();

        assert_eq!(store.resolve(&task.id[..8]).unwrap().id, task.id);
        assert_eq!(store.resolve(&task.id).unwrap().id, task.id);
        assert!(store.resolve("zzzz").is_err());
        assert!(store.resolve("").is_err());
    }

    #[test]
    fn counts_split_by_completion() {
        let mem = MemoryStore::new();
        let mut store = TaskStore::load(&mem);
        let a = store.create(new_task("a"), now()).unwrap();
        store.create(new_task("b"), now()).unwrap();
        store.create(new_task("c"), now()).unwrap();
        store.toggle_completion(&a.id).unwrap();

        assert_eq!(
            store.counts(),
            TaskCounts {
                total: 3,
                active: 2,
                completed: 1,
            }
        );
    }
}
