//! Core models for the focuskeeper library
//!
//! This module contains the task tree, the engine context that owns it, and the shared
//! `Core` handle front ends talk to.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::buckets;
use crate::config::EngineConfig;
use crate::focus::{FocusOutcome, FocusSession};
use crate::leaves;

/// Errors returned by engine operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FocusError {
    #[error("Project {0} not found")]
    ProjectNotFound(usize),

    #[error("Task at {0} not found")]
    TaskNotFound(TaskPath),

    #[error("Path {0} names a project root, not a task")]
    RootPath(TaskPath),

    #[error("Task at {0} is completed")]
    TaskCompleted(TaskPath),

    #[error("Task at {0} is already completed")]
    AlreadyCompleted(TaskPath),

    #[error("Task at {0} is not completed")]
    NotCompleted(TaskPath),

    #[error("No focus session is active")]
    NoSession,

    #[error("Nothing is currently focused")]
    NothingFocused,

    #[error("Invalid priority value {0}; expected 1, 0 or -1")]
    InvalidPriority(i8),

    #[error("Invalid path '{0}'")]
    InvalidPath(String),
}

/// Priority tier of a task among its siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Priority {
    Preferred,
    #[default]
    Normal,
    Deferred,
}

impl Priority {
    /// Tiers in the order they are displayed and searched
    pub const VISUAL_ORDER: [Priority; 3] =
        [Priority::Preferred, Priority::Normal, Priority::Deferred];

    /// The stored integer value (+1, 0, -1)
    pub fn value(self) -> i8 {
        match self {
            Priority::Preferred => 1,
            Priority::Normal => 0,
            Priority::Deferred => -1,
        }
    }

    /// Index of this tier within `VISUAL_ORDER`
    pub fn rank(self) -> usize {
        match self {
            Priority::Preferred => 0,
            Priority::Normal => 1,
            Priority::Deferred => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Preferred => "preferred",
            Priority::Normal => "normal",
            Priority::Deferred => "deferred",
        }
    }
}

impl TryFrom<i8> for Priority {
    type Error = FocusError;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Preferred),
            0 => Ok(Priority::Normal),
            -1 => Ok(Priority::Deferred),
            other => Err(FocusError::InvalidPriority(other)),
        }
    }
}

impl From<Priority> for i8 {
    fn from(priority: Priority) -> Self {
        priority.value()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A node in a project's task tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: String,
    name: String,
    #[serde(default)]
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    position: usize,
    #[serde(default)]
    subtasks: Vec<Task>,
    last_modified: DateTime<Utc>,
}

impl Task {
    /// Creates a new incomplete Normal task at position 0
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::with_placement(id, name, Priority::Normal, 0)
    }

    /// Creates a new incomplete task with an explicit tier and position
    pub fn with_placement(
        id: impl Into<String>,
        name: impl Into<String>,
        priority: Priority,
        position: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            completed: false,
            completion_date: None,
            priority,
            position,
            subtasks: Vec::new(),
            last_modified: Utc::now(),
        }
    }

    /// Appends a subtask, builder style
    pub fn with_subtask(mut self, subtask: Task) -> Self {
        self.subtasks.push(subtask);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn completion_date(&self) -> Option<DateTime<Utc>> {
        self.completion_date
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn subtasks(&self) -> &[Task] {
        &self.subtasks
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    /// A leaf has no subtasks, or only completed ones
    pub fn is_leaf(&self) -> bool {
        self.subtasks.iter().all(|t| t.completed)
    }

    pub(crate) fn subtasks_mut(&mut self) -> &mut Vec<Task> {
        &mut self.subtasks
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
        self.last_modified = Utc::now();
    }

    /// Sets tier and position, returning whether anything changed
    pub(crate) fn set_placement(&mut self, priority: Priority, position: usize) -> bool {
        if self.priority == priority && self.position == position {
            return false;
        }
        self.priority = priority;
        self.position = position;
        self.last_modified = Utc::now();
        true
    }

    /// Marks this task and every descendant completed.
    ///
    /// Tasks that were already completed keep their original completion date.
    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        if !self.completed {
            self.completed = true;
            self.completion_date = Some(now);
            self.last_modified = now;
        }

        for subtask in &mut self.subtasks {
            subtask.complete(now);
        }
    }

    /// Reopens this task only; descendants keep their state
    pub(crate) fn uncomplete(&mut self, now: DateTime<Utc>) {
        self.completed = false;
        self.completion_date = None;
        self.last_modified = now;
    }
}

/// A named top-level task list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    id: String,
    name: String,
    #[serde(default)]
    tasks: Vec<Task>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Appends a top-level task, builder style
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }
}

/// All projects the engine operates on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    projects: Vec<Project>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a project, builder style
    pub fn with_project(mut self, project: Project) -> Self {
        self.projects.push(project);
        self
    }

    /// Appends a project and returns its index
    pub fn push_project(&mut self, project: Project) -> usize {
        self.projects.push(project);
        self.projects.len() - 1
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project(&self, index: usize) -> Option<&Project> {
        self.projects.get(index)
    }

    /// Gets the task at the given path; project roots are not tasks
    pub fn task(&self, path: &TaskPath) -> Option<&Task> {
        let project = self.projects.get(path.project)?;
        task_at(&project.tasks, &path.index)
    }

    pub(crate) fn task_mut(&mut self, path: &TaskPath) -> Option<&mut Task> {
        let project = self.projects.get_mut(path.project)?;
        task_at_mut(&mut project.tasks, &path.index)
    }

    /// Gets the task at the given path or explains why it cannot
    pub fn require_task(&self, path: &TaskPath) -> Result<&Task, FocusError> {
        if path.is_root() {
            return Err(FocusError::RootPath(path.clone()));
        }
        if self.project(path.project).is_none() {
            return Err(FocusError::ProjectNotFound(path.project));
        }
        self.task(path)
            .ok_or_else(|| FocusError::TaskNotFound(path.clone()))
    }

    /// Returns the children of a project root or task
    pub fn children(&self, path: &TaskPath) -> Option<&[Task]> {
        if path.is_root() {
            self.project(path.project).map(|p| p.tasks.as_slice())
        } else {
            self.task(path).map(|t| t.subtasks())
        }
    }

    pub(crate) fn children_mut(&mut self, path: &TaskPath) -> Option<&mut Vec<Task>> {
        if path.is_root() {
            self.projects.get_mut(path.project).map(|p| &mut p.tasks)
        } else {
            self.task_mut(path).map(|t| t.subtasks_mut())
        }
    }

    /// True when the project has at least one incomplete task at any depth
    pub fn has_incomplete_tasks(&self, project: usize) -> bool {
        fn any_incomplete(tasks: &[Task]) -> bool {
            tasks
                .iter()
                .any(|t| !t.is_completed() || any_incomplete(t.subtasks()))
        }

        self.project(project)
            .map(|p| any_incomplete(&p.tasks))
            .unwrap_or(false)
    }
}

fn task_at<'a>(tasks: &'a [Task], index: &[usize]) -> Option<&'a Task> {
    let (&first, rest) = index.split_first()?;
    let task = tasks.get(first)?;
    if rest.is_empty() {
        Some(task)
    } else {
        task_at(&task.subtasks, rest)
    }
}

fn task_at_mut<'a>(tasks: &'a mut [Task], index: &[usize]) -> Option<&'a mut Task> {
    let (&first, rest) = index.split_first()?;
    let task = tasks.get_mut(first)?;
    if rest.is_empty() {
        Some(task)
    } else {
        task_at_mut(&mut task.subtasks, rest)
    }
}

// shorthand for the index of a task within a project tree
pub type Index = Vec<usize>;

/// Parses a string representation of an index (e.g., "0,1,2") into an Index
pub fn parse_index(index_str: &str) -> Result<Index, FocusError> {
    index_str
        .split(',')
        .map(|s| s.trim().parse::<usize>())
        .collect::<Result<Index, _>>()
        .map_err(|_| FocusError::InvalidPath(index_str.to_string()))
}

/// Location of a project root or task: a project index plus a child index path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskPath {
    pub project: usize,
    pub index: Index,
}

impl TaskPath {
    pub fn new(project: usize, index: Index) -> Self {
        Self { project, index }
    }

    /// The root of a project
    pub fn root(project: usize) -> Self {
        Self {
            project,
            index: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.index.is_empty()
    }

    pub fn child(&self, i: usize) -> Self {
        let mut index = self.index.clone();
        index.push(i);
        Self {
            project: self.project,
            index,
        }
    }

    /// The parent path; `None` for a project root
    pub fn parent(&self) -> Option<Self> {
        self.split().map(|(parent, _)| parent)
    }

    /// Splits into parent path and child index
    pub fn split(&self) -> Option<(Self, usize)> {
        let (&last, rest) = self.index.split_last()?;
        Some((Self::new(self.project, rest.to_vec()), last))
    }

    /// True if `self` is `other` or lies inside its subtree
    pub fn starts_with(&self, other: &TaskPath) -> bool {
        self.project == other.project && self.index.starts_with(&other.index)
    }

    /// Where this path points after `removed` was taken out of its sibling list.
    ///
    /// Returns `None` when this path was inside the removed subtree.
    pub fn rebase_after_removal(&self, removed: &TaskPath) -> Option<TaskPath> {
        if self.starts_with(removed) {
            return None;
        }
        let Some((parent, removed_idx)) = removed.split() else {
            return Some(self.clone());
        };
        let depth = parent.index.len();
        let mut rebased = self.clone();
        if self.starts_with(&parent) && self.index.len() > depth && self.index[depth] > removed_idx
        {
            rebased.index[depth] -= 1;
        }
        Some(rebased)
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index.is_empty() {
            return write!(f, "{}", self.project);
        }
        let index = self
            .index
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{}:{}", self.project, index)
    }
}

impl FromStr for TaskPath {
    type Err = FocusError;

    /// Parses `P` (project root) or `P:i,j,k`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FocusError::InvalidPath(s.to_string());
        match s.split_once(':') {
            None => {
                let project = s.trim().parse().map_err(|_| invalid())?;
                Ok(TaskPath::root(project))
            }
            Some((project, index)) => {
                let project = project.trim().parse().map_err(|_| invalid())?;
                let index = parse_index(index).map_err(|_| invalid())?;
                Ok(TaskPath::new(project, index))
            }
        }
    }
}

/// Paths whose persisted fields changed during one mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    changed: Vec<TaskPath>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a path once; later duplicates are ignored
    pub fn record(&mut self, path: TaskPath) {
        if !self.changed.contains(&path) {
            self.changed.push(path);
        }
    }

    pub fn extend(&mut self, other: ChangeSet) {
        for path in other.changed {
            self.record(path);
        }
    }

    pub fn contains(&self, path: &TaskPath) -> bool {
        self.changed.contains(path)
    }

    pub fn paths(&self) -> &[TaskPath] {
        &self.changed
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Represents a single state transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: Option<String>,
}

impl TransitionLogEntry {
    pub fn new(action: String, details: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details,
        }
    }
}

/// Owns the workspace, the focus session and the tie-break RNG
pub struct Context {
    workspace: Workspace,
    session: FocusSession,
    history: VecDeque<TransitionLogEntry>,
    max_history: usize,
    rng: StdRng,
}

impl Context {
    /// Creates a new context with the default configuration
    pub fn new(workspace: Workspace) -> Self {
        Self::with_config(workspace, EngineConfig::default())
    }

    pub fn with_config(workspace: Workspace, config: EngineConfig) -> Self {
        Self {
            workspace,
            session: FocusSession::new(),
            history: VecDeque::with_capacity(config.max_history),
            max_history: config.max_history,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Logs a state transition, maintaining the history buffer size.
    fn log_transition(&mut self, action: &str, details: Option<String>) {
        debug!(action, details = details.as_deref().unwrap_or(""), "transition");
        if self.max_history == 0 {
            return;
        }
        if self.history.len() == self.max_history {
            self.history.pop_front();
        }
        self.history
            .push_back(TransitionLogEntry::new(action.to_string(), details));
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn into_workspace(self) -> Workspace {
        self.workspace
    }

    pub fn session(&self) -> &FocusSession {
        &self.session
    }

    pub fn history(&self) -> impl Iterator<Item = &TransitionLogEntry> {
        self.history.iter()
    }

    fn next_id(&mut self) -> String {
        format!("{:016x}", self.rng.gen::<u64>())
    }

    /// Adds an empty project and returns its index
    pub fn add_project(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        let id = self.next_id();
        self.log_transition("add_project", Some(format!("Adding project '{}'", name)));
        self.workspace.push_project(Project::new(id, name))
    }

    /// Appends a new task to the end of the parent's Normal tier.
    ///
    /// Completed ancestors are reopened so the new task stays reachable.
    pub fn add_task(
        &mut self,
        parent: &TaskPath,
        name: impl Into<String>,
    ) -> Result<(TaskPath, ChangeSet), FocusError> {
        let name = name.into();
        if !parent.is_root() {
            self.workspace.require_task(parent)?;
        } else if self.workspace.project(parent.project).is_none() {
            return Err(FocusError::ProjectNotFound(parent.project));
        }

        self.log_transition(
            "add_task",
            Some(format!("Adding task '{}' under {}", name, parent)),
        );

        let now = Utc::now();
        let mut changes = ChangeSet::new();
        self.reopen_ancestors(parent, now, &mut changes);

        let id = self.next_id();
        let siblings = self
            .workspace
            .children_mut(parent)
            .ok_or_else(|| FocusError::TaskNotFound(parent.clone()))?;
        let position = buckets::tier_size(siblings, Priority::Normal);
        siblings.push(Task::with_placement(id, name, Priority::Normal, position));
        let path = parent.child(siblings.len() - 1);
        changes.record(path.clone());

        Ok((path, changes))
    }

    pub fn rename_task(
        &mut self,
        path: &TaskPath,
        name: impl Into<String>,
    ) -> Result<ChangeSet, FocusError> {
        self.workspace.require_task(path)?;
        let name = name.into();
        self.log_transition(
            "rename_task",
            Some(format!("Renaming task at {} to '{}'", path, name)),
        );

        let task = self
            .workspace
            .task_mut(path)
            .ok_or_else(|| FocusError::TaskNotFound(path.clone()))?;
        task.set_name(name);

        let mut changes = ChangeSet::new();
        changes.record(path.clone());
        Ok(changes)
    }

    /// Completes the task and its whole subtree, closing the gap it leaves in its tier.
    ///
    /// The focus session is not advanced; call `next_focus` for that.
    pub fn complete_task(&mut self, path: &TaskPath) -> Result<ChangeSet, FocusError> {
        let task = self.workspace.require_task(path)?;
        if task.is_completed() {
            return Err(FocusError::AlreadyCompleted(path.clone()));
        }

        let mut changes = ChangeSet::new();
        changes.record(path.clone());
        collect_incomplete_descendants(task, path, &mut changes);

        self.log_transition("complete_task", Some(format!("Completing task at {}", path)));

        let (parent, child) = path
            .split()
            .ok_or_else(|| FocusError::RootPath(path.clone()))?;
        let siblings = self
            .workspace
            .children_mut(&parent)
            .ok_or_else(|| FocusError::TaskNotFound(path.clone()))?;
        let (tier, position) = (siblings[child].priority(), siblings[child].position());
        siblings[child].complete(Utc::now());
        for shifted in buckets::close_gap(siblings, tier, position, Some(child)) {
            changes.record(parent.child(shifted));
        }

        Ok(changes)
    }

    /// Reopens a completed task at the end of its tier, along with any completed ancestors
    pub fn uncomplete_task(&mut self, path: &TaskPath) -> Result<ChangeSet, FocusError> {
        if !self.workspace.require_task(path)?.is_completed() {
            return Err(FocusError::NotCompleted(path.clone()));
        }

        self.log_transition(
            "uncomplete_task",
            Some(format!("Uncompleting task at {}", path)),
        );

        let now = Utc::now();
        let mut changes = ChangeSet::new();
        self.reopen(path, now, &mut changes);
        if let Some(parent) = path.parent() {
            self.reopen_ancestors(&parent, now, &mut changes);
        }
        Ok(changes)
    }

    /// Removes a task and its subtree, closing the gap in its tier
    pub fn remove_task(&mut self, path: &TaskPath) -> Result<(Task, ChangeSet), FocusError> {
        self.workspace.require_task(path)?;
        self.log_transition("remove_task", Some(format!("Removing task at {}", path)));

        let (parent, child) = path
            .split()
            .ok_or_else(|| FocusError::RootPath(path.clone()))?;
        let siblings = self
            .workspace
            .children_mut(&parent)
            .ok_or_else(|| FocusError::TaskNotFound(path.clone()))?;
        let removed = siblings.remove(child);

        let mut changes = ChangeSet::new();
        if !removed.is_completed() {
            for shifted in
                buckets::close_gap(siblings, removed.priority(), removed.position(), None)
            {
                changes.record(parent.child(shifted));
            }
        }

        self.session.on_removed(path);
        Ok((removed, changes))
    }

    fn reopen_ancestors(&mut self, from: &TaskPath, now: DateTime<Utc>, changes: &mut ChangeSet) {
        let mut ancestor = Some(from.clone());
        while let Some(path) = ancestor {
            if path.is_root() {
                break;
            }
            if self
                .workspace
                .task(&path)
                .map(|t| t.is_completed())
                .unwrap_or(false)
            {
                self.reopen(&path, now, changes);
                self.log_transition(
                    "uncomplete_parent",
                    Some(format!("Uncompleted ancestor task at {}", path)),
                );
            }
            ancestor = path.parent();
        }
    }

    fn reopen(&mut self, path: &TaskPath, now: DateTime<Utc>, changes: &mut ChangeSet) {
        let Some((parent, child)) = path.split() else {
            return;
        };
        let Some(siblings) = self.workspace.children_mut(&parent) else {
            warn!(%path, "cannot reopen task: parent not found");
            return;
        };
        siblings[child].uncomplete(now);
        let tier = siblings[child].priority();
        buckets::append_to_tier(siblings, child, tier);
        changes.record(path.clone());
    }

    // Priority bucket operations
    pub fn move_with_priority_change(
        &mut self,
        path: &TaskPath,
        old_visual_index: usize,
        new_visual_index: usize,
        new_priority: Priority,
    ) -> Result<ChangeSet, FocusError> {
        let changes = buckets::move_with_priority_change(
            &mut self.workspace,
            path,
            old_visual_index,
            new_visual_index,
            new_priority,
        )?;
        self.log_transition(
            "move_task",
            Some(format!(
                "Moved task at {} from visual index {} to {} ({}), {} tasks changed",
                path,
                old_visual_index,
                new_visual_index,
                new_priority,
                changes.len()
            )),
        );
        Ok(changes)
    }

    pub fn toggle_prefer(&mut self, path: &TaskPath) -> Result<ChangeSet, FocusError> {
        let changes = buckets::toggle_prefer(&mut self.workspace, path)?;
        self.log_transition("toggle_prefer", Some(format!("Toggled prefer on {}", path)));
        Ok(changes)
    }

    pub fn toggle_defer(&mut self, path: &TaskPath) -> Result<ChangeSet, FocusError> {
        let changes = buckets::toggle_defer(&mut self.workspace, path)?;
        self.log_transition("toggle_defer", Some(format!("Toggled defer on {}", path)));
        Ok(changes)
    }

    // Focus mode
    pub fn leaves_under(&self, path: &TaskPath) -> Vec<TaskPath> {
        leaves::leaves_under(&self.workspace, path)
    }

    pub fn start_focus(&mut self, path: TaskPath) -> Result<FocusOutcome, FocusError> {
        let details = format!("Starting focus at {}", path);
        let outcome = self.session.start(&self.workspace, path, &mut self.rng)?;
        self.log_transition("start_focus", Some(details));
        Ok(outcome)
    }

    pub fn next_focus(&mut self) -> Result<FocusOutcome, FocusError> {
        let outcome = self.session.get_next(&self.workspace, &mut self.rng)?;
        self.log_transition("next_focus", Some(format!("{:?}", outcome)));
        Ok(outcome)
    }

    /// Completes the currently focused task without moving focus
    pub fn complete_current(&mut self) -> Result<ChangeSet, FocusError> {
        if self.session.start_path().is_none() {
            return Err(FocusError::NoSession);
        }
        let current = self
            .session
            .current()
            .cloned()
            .ok_or(FocusError::NothingFocused)?;
        self.complete_task(&current)
    }

    pub fn keep_going(&mut self) -> Result<FocusOutcome, FocusError> {
        let outcome = self.session.keep_going(&self.workspace, &mut self.rng)?;
        self.log_transition("keep_going", Some(format!("{:?}", outcome)));
        Ok(outcome)
    }

    pub fn end_focus(&mut self) {
        self.log_transition("end_focus", None);
        self.session.end();
    }

    /// The focused task, if any
    pub fn current_task(&self) -> Option<(&TaskPath, &Task)> {
        let path = self.session.current()?;
        self.workspace.task(path).map(|task| (path, task))
    }
}

fn collect_incomplete_descendants(task: &Task, path: &TaskPath, changes: &mut ChangeSet) {
    for (i, subtask) in task.subtasks().iter().enumerate() {
        let sub_path = path.child(i);
        if !subtask.is_completed() {
            changes.record(sub_path.clone());
        }
        collect_incomplete_descendants(subtask, &sub_path, changes);
    }
}

/// Thread-safe handle that broadcasts every non-empty change set to subscribers
#[derive(Clone)]
pub struct Core {
    inner: Arc<Mutex<Context>>,
    update_tx: Arc<tokio::sync::broadcast::Sender<ChangeSet>>,
}

impl Core {
    pub fn new(context: Context) -> Self {
        // lagging subscribers lose the oldest change sets past this bound
        let (tx, _rx) = tokio::sync::broadcast::channel(100);

        Self {
            inner: Arc::new(Mutex::new(context)),
            update_tx: Arc::new(tx),
        }
    }

    // recovers the guard from a poisoned lock
    fn with_context<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Context) -> R,
    {
        let mut context = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut context)
    }

    // Applies a mutation and notifies observers about the tasks it touched
    fn mutate<F>(&self, f: F) -> Result<ChangeSet, FocusError>
    where
        F: FnOnce(&mut Context) -> Result<ChangeSet, FocusError>,
    {
        let changes = self.with_context(f)?;
        if !changes.is_empty() {
            let _ = self.update_tx.send(changes.clone());
        }
        Ok(changes)
    }

    /// Subscribe to change sets produced by mutations
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeSet> {
        self.update_tx.subscribe()
    }

    /// Snapshot of the workspace
    pub fn workspace(&self) -> Workspace {
        self.with_context(|context| context.workspace().clone())
    }

    pub fn add_task(&self, parent: TaskPath, name: String) -> Result<TaskPath, FocusError> {
        let mut added = None;
        self.mutate(|context| {
            let (path, changes) = context.add_task(&parent, name)?;
            added = Some(path);
            Ok(changes)
        })?;
        added.ok_or(FocusError::TaskNotFound(parent))
    }

    pub fn rename_task(&self, path: TaskPath, name: String) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.rename_task(&path, name))
    }

    pub fn complete_task(&self, path: TaskPath) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.complete_task(&path))
    }

    pub fn uncomplete_task(&self, path: TaskPath) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.uncomplete_task(&path))
    }

    pub fn remove_task(&self, path: TaskPath) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.remove_task(&path).map(|(_, changes)| changes))
    }

    pub fn toggle_prefer(&self, path: TaskPath) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.toggle_prefer(&path))
    }

    pub fn toggle_defer(&self, path: TaskPath) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.toggle_defer(&path))
    }

    pub fn move_with_priority_change(
        &self,
        path: TaskPath,
        old_visual_index: usize,
        new_visual_index: usize,
        new_priority: Priority,
    ) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| {
            context.move_with_priority_change(&path, old_visual_index, new_visual_index, new_priority)
        })
    }

    pub fn leaves_under(&self, path: TaskPath) -> Vec<TaskPath> {
        self.with_context(|context| context.leaves_under(&path))
    }

    pub fn start_focus(&self, path: TaskPath) -> Result<FocusOutcome, FocusError> {
        self.with_context(|context| context.start_focus(path))
    }

    pub fn next_focus(&self) -> Result<FocusOutcome, FocusError> {
        self.with_context(|context| context.next_focus())
    }

    pub fn complete_current(&self) -> Result<ChangeSet, FocusError> {
        self.mutate(|context| context.complete_current())
    }

    pub fn keep_going(&self) -> Result<FocusOutcome, FocusError> {
        self.with_context(|context| context.keep_going())
    }

    pub fn end_focus(&self) {
        self.with_context(|context| context.end_focus())
    }

    /// The focused task and its path, if any
    pub fn current(&self) -> Option<(TaskPath, Task)> {
        self.with_context(|context| {
            context
                .current_task()
                .map(|(path, task)| (path.clone(), task.clone()))
        })
    }
}
