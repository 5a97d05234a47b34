use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::Task;

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Completed
}

impl StatusFilter {
  pub fn as_str(self) -> &'static str {
    match self {
      | Self::All => "all",
      | Self::Active => "active",
      | Self::Completed => "completed"
    }
  }

  pub fn keeps(
    self,
    task: &Task
  ) -> bool {
    match self {
      | Self::All => true,
      | Self::Active => !task.completed,
      | Self::Completed => task.completed
    }
  }

  /// Headline and hint shown when the
  /// derived view is empty.
  pub fn empty_message(
    self
  ) -> (&'static str, &'static str) {
    match self {
      | Self::All => (
        "No tasks yet",
        "Add your first task using the \
         add command"
      ),
      | Self::Active => (
        "No active tasks",
        "All your tasks are completed!"
      ),
      | Self::Completed => (
        "No completed tasks",
        "Complete some tasks to see them \
         here"
      )
    }
  }
}

impl fmt::Display for StatusFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(Self::All),
      | "active" | "pending" => {
        Ok(Self::Active)
      }
      | "completed" | "done" => {
        Ok(Self::Completed)
      }
      | other => Err(anyhow!(
        "invalid filter: {other} \
         (expected all, active or \
         completed)"
      ))
    }
  }
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq,
)]
pub enum SortKey {
  #[default]
  Newest,
  Oldest,
  DueDate,
  Priority
}

impl SortKey {
  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Newest => "newest",
      | Self::Oldest => "oldest",
      | Self::DueDate => "dueDate",
      | Self::Priority => "priority"
    }
  }

  pub fn compare(
    self,
    a: &Task,
    b: &Task
  ) -> Ordering {
    match self {
      | Self::Newest => {
        b.created_at.cmp(&a.created_at)
      }
      | Self::Oldest => {
        a.created_at.cmp(&b.created_at)
      }
      | Self::DueDate => {
        match (a.due_date, b.due_date) {
          | (Some(x), Some(y)) => x.cmp(&y),
          | (Some(_), None) => {
            Ordering::Less
          }
          | (None, Some(_)) => {
            Ordering::Greater
          }
          | (None, None) => Ordering::Equal
        }
      }
      | Self::Priority => b
        .priority
        .rank()
        .cmp(&a.priority.rank())
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SortKey {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "newest" => Ok(Self::Newest),
      | "oldest" => Ok(Self::Oldest),
      | "duedate" | "due-date"
      | "due_date" | "due" => {
        Ok(Self::DueDate)
      }
      | "priority" => Ok(Self::Priority),
      | other => Err(anyhow!(
        "invalid sort: {other} \
         (expected newest, oldest, \
         dueDate or priority)"
      ))
    }
  }
}

/// Transient parameters of the
/// derived view; never persisted.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct ViewParams {
  pub filter: StatusFilter,
  pub sort:   SortKey,
  pub search: String
}

/// Status filter, then search, then a
/// stable sort. Recomputed on every
/// call.
#[tracing::instrument(skip(
  tasks, params
), fields(total = tasks.len()))]
pub fn derive_view<'a>(
  tasks: &'a [Task],
  params: &ViewParams
) -> Vec<&'a Task> {
  let needle =
    params.search.to_lowercase();

  let mut view: Vec<&Task> = tasks
    .iter()
    .filter(|task| {
      params.filter.keeps(task)
    })
    .filter(|task| {
      needle.is_empty()
        || task.matches_search(&needle)
    })
    .collect();

  view.sort_by(|a, b| {
    params.sort.compare(a, b)
  });

  trace!(
    shown = view.len(),
    filter = %params.filter,
    sort = %params.sort,
    "derived view"
  );
  view
}
