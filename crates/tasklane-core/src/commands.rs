use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument};

use crate::cli::{AddArgs, Command, EditArgs, ListArgs};
use crate::config::Config;
use crate::datetime::parse_due_date;
use crate::render::{Renderer, short_id};
use crate::storage::KeyValueStore;
use crate::store::TaskStore;
use crate::task::{NewTask, TaskPatch};
use crate::theme::{AmbientSignal, PreferenceStore, ThemeMode};

/// Everything one command invocation reads or mutates.
pub struct Session<'a, S: KeyValueStore> {
    pub tasks: TaskStore<S>,
    pub prefs: PreferenceStore<S>,
    pub ambient: &'a dyn AmbientSignal,
    pub cfg: &'a Config,
    pub tz: Tz,
    pub now: DateTime<Utc>,
}

impl<S: KeyValueStore> Session<'_, S> {
    pub fn today(&self) -> NaiveDate {
        crate::datetime::today_in(&self.tz, self.now)
    }

    fn renderer(&self) -> anyhow::Result<Renderer> {
        Renderer::new(self.cfg, self.prefs.is_dark(), self.tz)
    }
}

#[instrument(skip(session, out, command))]
pub fn dispatch<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let command = command.unwrap_or_else(|| Command::List(ListArgs::default()));
    debug!(?command, "dispatching command");

    match command {
        Command::Add(args) => cmd_add(session, out, args),
        Command::Edit(args) => cmd_edit(session, out, args),
        Command::Toggle { id } => cmd_toggle(session, out, &id),
        Command::Delete { id } => cmd_delete(session, out, &id),
        Command::List(args) => cmd_list(session, out, args),
        Command::Info { id } => cmd_info(session, out, &id),
        Command::Theme { mode } => cmd_theme(session, out, mode),
    }
}

fn require_title(raw: &str) -> anyhow::Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(anyhow!("task title cannot be empty"));
    }
    Ok(title.to_string())
}

#[instrument(skip(session, out, args))]
fn cmd_add<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    args: AddArgs,
) -> anyhow::Result<()> {
    info!("command add");

    let title = require_title(&args.title.join(" "))?;
    let due_date = match args.due.as_deref() {
        Some(expr) => parse_due_date(expr, session.today())?,
        None => None,
    };

    let task = session.tasks.create(
        NewTask {
            title,
            description: args.description.trim().to_string(),
            priority: args.priority.unwrap_or_default(),
            due_date,
        },
        session.now,
    )?;

    writeln!(out, "Created task {}.", short_id(&task.id))?;
    Ok(())
}

#[instrument(skip(session, out, args))]
fn cmd_edit<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    args: EditArgs,
) -> anyhow::Result<()> {
    info!("command edit");

    let id = session.tasks.resolve(&args.id)?.id.clone();
    let due_date = if args.no_due {
        Some(None)
    } else {
        match args.due.as_deref() {
            Some(expr) => Some(parse_due_date(expr, session.today())?),
            None => None,
        }
    };

    let patch = TaskPatch {
        title: args.title.as_deref().map(require_title).transpose()?,
        description: args.description.map(|d| d.trim().to_string()),
        completed: None,
        priority: args.priority,
        due_date,
    };
    if patch.is_empty() {
        return Err(anyhow!(
            "edit requires at least one of --title, --description, --priority, --due or --no-due"
        ));
    }

    session
        .tasks
        .update(&id, patch)?
        .ok_or_else(|| anyhow!("no task matches id {id}"))?;

    writeln!(out, "Updated task {}.", short_id(&id))?;
    Ok(())
}

#[instrument(skip(session, out))]
fn cmd_toggle<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    prefix: &str,
) -> anyhow::Result<()> {
    info!("command toggle");

    let id = session.tasks.resolve(prefix)?.id.clone();
    let completed = session
        .tasks
        .toggle_completion(&id)?
        .ok_or_else(|| anyhow!("no task matches id {id}"))?;

    let verb = if completed { "Completed" } else { "Reopened" };
    writeln!(out, "{verb} task {}.", short_id(&id))?;
    Ok(())
}

#[instrument(skip(session, out))]
fn cmd_delete<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    prefix: &str,
) -> anyhow::Result<()> {
    info!("command delete");

    let id = session.tasks.resolve(prefix)?.id.clone();
    let removed = session
        .tasks
        .delete(&id)?
        .ok_or_else(|| anyhow!("no task matches id {id}"))?;

    writeln!(out, "Deleted task {} '{}'.", short_id(&removed.id), removed.title)?;
    Ok(())
}

#[instrument(skip(session, out, args))]
fn cmd_list<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    args: ListArgs,
) -> anyhow::Result<()> {
    info!("command list");

    let filter = match args.filter {
        Some(filter) => filter,
        None => config_default(session.cfg, "default.filter")?,
    };
    let sort = match args.sort {
        Some(sort) => sort,
        None => config_default(session.cfg, "default.sort")?,
    };
    session.tasks.set_filter(filter);
    session.tasks.set_sort(sort);
    session.tasks.set_search(args.search.unwrap_or_default());

    let renderer = session.renderer()?;
    let today = session.today();
    let view = session.tasks.view();

    if view.is_empty() {
        renderer.print_empty(out, filter)?;
    } else {
        renderer.print_task_table(out, &view, today)?;
    }
    renderer.print_summary(out, view.len(), session.tasks.counts())?;
    Ok(())
}

fn config_default<T>(cfg: &Config, key: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error> + Default,
{
    match cfg.get(key) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for config key {key}")),
        None => Ok(T::default()),
    }
}

#[instrument(skip(session, out))]
fn cmd_info<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    prefix: &str,
) -> anyhow::Result<()> {
    info!("command info");

    let renderer = session.renderer()?;
    let today = session.today();
    let task = session.tasks.resolve(prefix)?;
    renderer.print_task_info(out, task, today)
}

#[instrument(skip(session, out))]
fn cmd_theme<S: KeyValueStore>(
    session: &mut Session<'_, S>,
    out: &mut dyn Write,
    mode: Option<ThemeMode>,
) -> anyhow::Result<()> {
    info!("command theme");

    if let Some(mode) = mode {
        session.prefs.set_mode(mode, session.ambient)?;
    }

    let renderer = session.renderer()?;
    renderer.print_theme(out, session.prefs.mode(), session.prefs.is_dark())
}
