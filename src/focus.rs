//! Focus Mode scheduling
//!
//! A focus session is rooted at a project or task and presents one leaf at a time. The
//! next leaf is chosen by a priority descent: tiers are tried Preferred, Normal, Deferred
//! at every level of the tree, so a parent's tier always outranks its children's.
//! Ties within a tier are broken at random using the caller's RNG.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::leaves::leaves_under;
use crate::models::{FocusError, Priority, Task, TaskPath, Workspace};

/// Picks the next leaf below `siblings`, skipping the leaf whose id is `exclude`.
///
/// Non-leaf candidates are descended into; when a branch has nothing eligible the search
/// backtracks to the next candidate and then the next tier. Returns `None` when nothing
/// below `parent` qualifies. The tree is never modified.
pub fn pick_next<R: Rng + ?Sized>(
    siblings: &[Task],
    parent: &TaskPath,
    exclude: Option<&str>,
    rng: &mut R,
) -> Option<TaskPath> {
    for tier in Priority::VISUAL_ORDER {
        let mut candidates: Vec<usize> = siblings
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_completed() && t.priority() == tier)
            .map(|(i, _)| i)
            .collect();
        if candidates.len() > 1 {
            candidates.shuffle(rng);
        }

        for i in candidates {
            let task = &siblings[i];
            let path = parent.child(i);
            if task.is_leaf() {
                if exclude != Some(task.id()) {
                    return Some(path);
                }
            } else if let Some(found) = pick_next(task.subtasks(), &path, exclude, rng) {
                return Some(found);
            }
        }
    }
    None
}

/// Where a focus session stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FocusState {
    /// No session has been started, or it was ended
    #[default]
    Idle,
    /// A task is being presented
    Active,
    /// Nothing is left under the session root, but its project still has work
    SubtreeDone,
    /// The session's project has no incomplete task
    AllComplete,
    /// No project has any incomplete task
    Exhausted,
}

/// Result of a focus transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusOutcome {
    Focused(TaskPath),
    SubtreeDone,
    AllComplete,
    Exhausted,
}

impl FocusOutcome {
    pub fn focused(&self) -> Option<&TaskPath> {
        match self {
            FocusOutcome::Focused(path) => Some(path),
            _ => None,
        }
    }
}

/// State of one focus session
#[derive(Debug, Clone, Default)]
pub struct FocusSession {
    start: Option<TaskPath>,
    candidates: Vec<TaskPath>,
    current: Option<TaskPath>,
    state: FocusState,
}

impl FocusSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The subtree root the session draws from
    pub fn start_path(&self) -> Option<&TaskPath> {
        self.start.as_ref()
    }

    /// Leaves found at the last transition
    pub fn candidates(&self) -> &[TaskPath] {
        &self.candidates
    }

    pub fn current(&self) -> Option<&TaskPath> {
        self.current.as_ref()
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    /// Starts a session at `path` and picks the first task with nothing excluded
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        ws: &Workspace,
        path: TaskPath,
        rng: &mut R,
    ) -> Result<FocusOutcome, FocusError> {
        if path.is_root() {
            ws.project(path.project)
                .ok_or(FocusError::ProjectNotFound(path.project))?;
        } else {
            ws.require_task(&path)?;
        }

        debug!(start = %path, "starting focus session");
        self.start = Some(path);
        self.current = None;
        Ok(self.advance(ws, None, rng))
    }

    /// Picks a task other than the current one, falling back to the current one when it
    /// is the only choice left
    pub fn get_next<R: Rng + ?Sized>(
        &mut self,
        ws: &Workspace,
        rng: &mut R,
    ) -> Result<FocusOutcome, FocusError> {
        if self.start.is_none() {
            return Err(FocusError::NoSession);
        }
        let exclude = self
            .current
            .as_ref()
            .and_then(|path| ws.task(path))
            .map(|task| task.id().to_string());
        Ok(self.advance(ws, exclude.as_deref(), rng))
    }

    /// Moves on once the session root has nothing left.
    ///
    /// Climbs to the nearest ancestor that still has work and focuses there. From an
    /// exhausted project root it hops to a random other project with work, or reports
    /// `Exhausted` when there is none. If the root still has leaves this behaves like
    /// `get_next`.
    pub fn keep_going<R: Rng + ?Sized>(
        &mut self,
        ws: &Workspace,
        rng: &mut R,
    ) -> Result<FocusOutcome, FocusError> {
        let start = self.start.clone().ok_or(FocusError::NoSession)?;
        if !leaves_under(ws, &start).is_empty() {
            return self.get_next(ws, rng);
        }

        let mut ancestor = start.parent();
        while let Some(path) = ancestor {
            if !leaves_under(ws, &path).is_empty() {
                debug!(from = %start, to = %path, "climbing focus root");
                self.start = Some(path);
                self.current = None;
                return Ok(self.advance(ws, None, rng));
            }
            ancestor = path.parent();
        }

        let others: Vec<usize> = (0..ws.projects().len())
            .filter(|&p| p != start.project && ws.has_incomplete_tasks(p))
            .collect();
        match others.choose(rng) {
            Some(&project) => {
                debug!(from = start.project, to = project, "switching focus project");
                self.start = Some(TaskPath::root(project));
                self.current = None;
                Ok(self.advance(ws, None, rng))
            }
            None => {
                debug!("no project has work left");
                self.candidates.clear();
                self.current = None;
                self.state = FocusState::Exhausted;
                Ok(FocusOutcome::Exhausted)
            }
        }
    }

    /// Ends the session
    pub fn end(&mut self) {
        *self = Self::default();
    }

    /// Keeps stored paths valid after `removed` left its sibling list
    pub fn on_removed(&mut self, removed: &TaskPath) {
        if let Some(start) = &self.start {
            self.start = start
                .rebase_after_removal(removed)
                .or_else(|| removed.parent());
        }
        self.current = self
            .current
            .as_ref()
            .and_then(|path| path.rebase_after_removal(removed));
        self.candidates = self
            .candidates
            .iter()
            .filter_map(|path| path.rebase_after_removal(removed))
            .collect();
    }

    fn advance<R: Rng + ?Sized>(
        &mut self,
        ws: &Workspace,
        exclude: Option<&str>,
        rng: &mut R,
    ) -> FocusOutcome {
        let Some(start) = self.start.clone() else {
            return FocusOutcome::AllComplete;
        };

        self.candidates = leaves_under(ws, &start);
        let picked = if self.candidates.is_empty() {
            None
        } else {
            select(ws, &start, exclude, rng).or_else(|| select(ws, &start, None, rng))
        };

        match picked {
            Some(path) => {
                self.current = Some(path.clone());
                self.state = FocusState::Active;
                FocusOutcome::Focused(path)
            }
            None => {
                self.current = None;
                if ws.has_incomplete_tasks(start.project) {
                    self.state = FocusState::SubtreeDone;
                    FocusOutcome::SubtreeDone
                } else {
                    self.state = FocusState::AllComplete;
                    FocusOutcome::AllComplete
                }
            }
        }
    }
}

// Descends from the session root; a root task with an exhausted subtree is its own pick
fn select<R: Rng + ?Sized>(
    ws: &Workspace,
    start: &TaskPath,
    exclude: Option<&str>,
    rng: &mut R,
) -> Option<TaskPath> {
    let children = ws.children(start)?;
    pick_next(children, start, exclude, rng).or_else(|| {
        let task = ws.task(start)?;
        (!task.is_completed() && task.is_leaf() && exclude != Some(task.id()))
            .then(|| start.clone())
    })
}
