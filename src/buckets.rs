//! Priority bucket bookkeeping
//!
//! Every sibling group (a project's task list or a task's subtasks) is split into three
//! tiers. Within a tier, incomplete tasks carry dense positions `0..n`; completed tasks
//! are ignored entirely. The functions here keep that true across moves and toggles and
//! report which siblings they touched.

use tracing::warn;

use crate::models::{ChangeSet, FocusError, Priority, Task, TaskPath, Workspace};

/// A tier whose positions are not exactly `0..n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityViolation {
    pub tier: Priority,
    /// The sorted positions actually found
    pub positions: Vec<usize>,
}

/// Number of incomplete siblings in `tier`
pub fn tier_size(siblings: &[Task], tier: Priority) -> usize {
    siblings
        .iter()
        .filter(|t| !t.is_completed() && t.priority() == tier)
        .count()
}

/// Indices of the incomplete siblings in visual order (Preferred, Normal, Deferred)
pub fn visual_order(siblings: &[Task]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..siblings.len())
        .filter(|&i| !siblings[i].is_completed())
        .collect();
    order.sort_by_key(|&i| (siblings[i].priority().rank(), siblings[i].position()));
    order
}

/// Visual index of the sibling stored at `child`
pub fn visual_index_of(siblings: &[Task], child: usize) -> Option<usize> {
    visual_order(siblings).iter().position(|&i| i == child)
}

/// Verifies that every tier of the group is dense
pub fn check_density(siblings: &[Task]) -> Result<(), DensityViolation> {
    for tier in Priority::VISUAL_ORDER {
        let mut positions: Vec<usize> = siblings
            .iter()
            .filter(|t| !t.is_completed() && t.priority() == tier)
            .map(|t| t.position())
            .collect();
        positions.sort_unstable();
        if positions.iter().enumerate().any(|(i, &p)| i != p) {
            return Err(DensityViolation { tier, positions });
        }
    }
    Ok(())
}

/// Verifies density for every sibling group in the workspace
pub fn check_tree_density(ws: &Workspace) -> Result<(), (TaskPath, DensityViolation)> {
    fn walk(tasks: &[Task], parent: TaskPath) -> Result<(), (TaskPath, DensityViolation)> {
        check_density(tasks).map_err(|v| (parent.clone(), v))?;
        for (i, task) in tasks.iter().enumerate() {
            if !task.is_completed() {
                walk(task.subtasks(), parent.child(i))?;
            }
        }
        Ok(())
    }

    for (p, project) in ws.projects().iter().enumerate() {
        walk(project.tasks(), TaskPath::root(p))?;
    }
    Ok(())
}

fn placements(siblings: &[Task]) -> Vec<(Priority, usize)> {
    siblings.iter().map(|t| (t.priority(), t.position())).collect()
}

// indices whose placement differs from the snapshot; `moved` is always included
fn changed_since(before: &[(Priority, usize)], siblings: &[Task], moved: usize) -> Vec<usize> {
    let mut changed: Vec<usize> = siblings
        .iter()
        .zip(before)
        .enumerate()
        .filter(|(_, (t, &(priority, position)))| {
            t.priority() != priority || t.position() != position
        })
        .map(|(i, _)| i)
        .collect();
    if !changed.contains(&moved) {
        changed.push(moved);
    }
    changed
}

fn shift_tier<F>(siblings: &mut [Task], skip: Option<usize>, tier: Priority, select: F, up: bool)
where
    F: Fn(usize) -> bool,
{
    for (i, task) in siblings.iter_mut().enumerate() {
        if Some(i) == skip || task.is_completed() || task.priority() != tier {
            continue;
        }
        let position = task.position();
        if select(position) {
            let shifted = if up {
                position + 1
            } else {
                position.saturating_sub(1)
            };
            task.set_placement(tier, shifted);
        }
    }
}

/// Closes the hole left at `position` in `tier`, returning the shifted indices
pub fn close_gap(
    siblings: &mut [Task],
    tier: Priority,
    position: usize,
    skip: Option<usize>,
) -> Vec<usize> {
    let before = placements(siblings);
    shift_tier(siblings, skip, tier, |p| p > position, false);
    siblings
        .iter()
        .zip(&before)
        .enumerate()
        .filter(|(_, (t, &(_, old)))| t.position() != old)
        .map(|(i, _)| i)
        .collect()
}

/// Places `child` at the end of `tier`; returns whether its placement changed
pub fn append_to_tier(siblings: &mut [Task], child: usize, tier: Priority) -> bool {
    let position = siblings
        .iter()
        .enumerate()
        .filter(|(i, t)| *i != child && !t.is_completed() && t.priority() == tier)
        .count();
    siblings[child].set_placement(tier, position)
}

fn next_position(siblings: &[Task], child: usize, tier: Priority) -> usize {
    siblings
        .iter()
        .enumerate()
        .filter(|(i, t)| *i != child && !t.is_completed() && t.priority() == tier)
        .map(|(_, t)| t.position())
        .max()
        .map_or(0, |max| max + 1)
}

/// Moves `child` into `new_priority` at the slot implied by `new_visual_index`.
///
/// `new_visual_index` is measured against the group's current visual order. The slot
/// within the destination tier is `new_visual_index` minus the size of the tiers shown
/// before it, clamped to the destination tier. Returns the indices whose placement
/// changed, the moved task included.
///
/// The moving task still counts in its original tier, so repeating a move into a later
/// tier with the same index lands one slot further on.
pub fn move_within(
    siblings: &mut [Task],
    child: usize,
    new_visual_index: usize,
    new_priority: Priority,
) -> Vec<usize> {
    let before = placements(siblings);
    let old_tier = siblings[child].priority();
    let old_pos = siblings[child].position();

    // the moving task still counts in its original tier here
    let preceding_size: usize = Priority::VISUAL_ORDER[..new_priority.rank()]
        .iter()
        .map(|&tier| tier_size(siblings, tier))
        .sum();
    let mut destination_size = tier_size(siblings, new_priority);
    if old_tier == new_priority {
        destination_size = destination_size.saturating_sub(1);
    }
    let local = new_visual_index
        .saturating_sub(preceding_size)
        .min(destination_size);

    shift_tier(siblings, Some(child), old_tier, |p| p > old_pos, false);
    shift_tier(siblings, Some(child), new_priority, |p| p >= local, true);
    siblings[child].set_placement(new_priority, local);

    changed_since(&before, siblings, child)
}

/// Preferred ⇄ non-Preferred; see `toggle_tier`
pub fn toggle_prefer_within(siblings: &mut [Task], child: usize) -> Vec<usize> {
    toggle_tier(siblings, child, Priority::Preferred)
}

/// Deferred ⇄ non-Deferred; see `toggle_tier`
pub fn toggle_defer_within(siblings: &mut [Task], child: usize) -> Vec<usize> {
    toggle_tier(siblings, child, Priority::Deferred)
}

// Entering `tier` appends to its end. Leaving it inserts at the front of Normal and
// pushes every Normal sibling down by one. The origin tier's gap is closed either way.
fn toggle_tier(siblings: &mut [Task], child: usize, tier: Priority) -> Vec<usize> {
    let before = placements(siblings);
    let old_tier = siblings[child].priority();
    let old_pos = siblings[child].position();

    shift_tier(siblings, Some(child), old_tier, |p| p > old_pos, false);
    if old_tier == tier {
        shift_tier(siblings, Some(child), Priority::Normal, |_| true, true);
        siblings[child].set_placement(Priority::Normal, 0);
    } else {
        let position = next_position(siblings, child, tier);
        siblings[child].set_placement(tier, position);
    }

    changed_since(&before, siblings, child)
}

// Splits a path into its parent and child index after checking the task can be moved
fn locate(ws: &Workspace, path: &TaskPath) -> Result<(TaskPath, usize), FocusError> {
    if ws.require_task(path)?.is_completed() {
        return Err(FocusError::TaskCompleted(path.clone()));
    }
    path.split()
        .ok_or_else(|| FocusError::RootPath(path.clone()))
}

fn apply<F>(ws: &mut Workspace, path: &TaskPath, f: F) -> Result<ChangeSet, FocusError>
where
    F: FnOnce(&mut [Task], usize) -> Vec<usize>,
{
    let (parent, child) = locate(ws, path)?;
    let siblings = ws
        .children_mut(&parent)
        .ok_or_else(|| FocusError::TaskNotFound(path.clone()))?;

    let mut changes = ChangeSet::new();
    for i in f(siblings.as_mut_slice(), child) {
        changes.record(parent.child(i));
    }
    Ok(changes)
}

/// Moves the task at `path` to `new_visual_index` within its sibling group, possibly
/// changing tier.
///
/// `old_visual_index` is the caller's view of where the task currently sits. The tree is
/// authoritative; a mismatch only means the caller rendered a stale order.
pub fn move_with_priority_change(
    ws: &mut Workspace,
    path: &TaskPath,
    old_visual_index: usize,
    new_visual_index: usize,
    new_priority: Priority,
) -> Result<ChangeSet, FocusError> {
    apply(ws, path, |siblings, child| {
        let actual = visual_index_of(siblings, child);
        if actual != Some(old_visual_index) {
            warn!(
                %path,
                expected = old_visual_index,
                actual = ?actual,
                "stale visual index for move"
            );
        }
        move_within(siblings, child, new_visual_index, new_priority)
    })
}

/// Prefers a task (appending it to the Preferred tier) or un-prefers it (front of Normal)
pub fn toggle_prefer(ws: &mut Workspace, path: &TaskPath) -> Result<ChangeSet, FocusError> {
    apply(ws, path, toggle_prefer_within)
}

/// Defers a task (appending it to the Deferred tier) or un-defers it (front of Normal)
pub fn toggle_defer(ws: &mut Workspace, path: &TaskPath) -> Result<ChangeSet, FocusError> {
    apply(ws, path, toggle_defer_within)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(name: &str, priority: Priority, position: usize) -> Task {
        Task::with_placement(name, name, priority, position)
    }

    fn names_in_visual_order(siblings: &[Task]) -> Vec<&str> {
        visual_order(siblings)
            .into_iter()
            .map(|i| siblings[i].name())
            .collect()
    }

    fn placement_of(siblings: &[Task], name: &str) -> (Priority, usize) {
        let t = siblings.iter().find(|t| t.name() == name).unwrap();
        (t.priority(), t.position())
    }

    #[test]
    fn test_visual_order_ignores_storage_order() {
        let siblings = vec![
            task("d0", Priority::Deferred, 0),
            task("n1", Priority::Normal, 1),
            task("p0", Priority::Preferred, 0),
            task("n0", Priority::Normal, 0),
        ];

        assert_eq!(names_in_visual_order(&siblings), vec!["p0", "n0", "n1", "d0"]);
        assert_eq!(visual_index_of(&siblings, 0), Some(3));
    }

    #[test]
    fn test_move_normal_into_deferred() {
        let mut siblings = vec![
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
            task("n2", Priority::Normal, 2),
            task("d0", Priority::Deferred, 0),
            task("d1", Priority::Deferred, 1),
        ];

        let mut changed = move_within(&mut siblings, 1, 3, Priority::Deferred);
        changed.sort_unstable();

        assert_eq!(placement_of(&siblings, "n0"), (Priority::Normal, 0));
        assert_eq!(placement_of(&siblings, "n2"), (Priority::Normal, 1));
        assert_eq!(placement_of(&siblings, "n1"), (Priority::Deferred, 0));
        assert_eq!(placement_of(&siblings, "d0"), (Priority::Deferred, 1));
        assert_eq!(placement_of(&siblings, "d1"), (Priority::Deferred, 2));
        assert_eq!(
            names_in_visual_order(&siblings),
            vec!["n0", "n2", "n1", "d0", "d1"]
        );
        assert_eq!(changed, vec![1, 2, 3, 4]);
        assert!(check_density(&siblings).is_ok());
    }

    #[test]
    fn test_move_two_by_two_lands_at_front_of_deferred() {
        let mut siblings = vec![
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
            task("d0", Priority::Deferred, 0),
            task("d1", Priority::Deferred, 1),
        ];

        move_within(&mut siblings, 1, 2, Priority::Deferred);

        assert_eq!(placement_of(&siblings, "n1"), (Priority::Deferred, 0));
        assert_eq!(placement_of(&siblings, "d0"), (Priority::Deferred, 1));
        assert_eq!(
            names_in_visual_order(&siblings),
            vec!["n0", "n1", "d0", "d1"]
        );
    }

    #[test]
    fn test_reorder_within_tier() {
        let mut siblings = vec![
            task("a", Priority::Normal, 0),
            task("b", Priority::Normal, 1),
            task("c", Priority::Normal, 2),
        ];

        // drag "a" to the end
        move_within(&mut siblings, 0, 2, Priority::Normal);
        assert_eq!(names_in_visual_order(&siblings), vec!["b", "c", "a"]);

        // and back to the middle
        let changed = move_within(&mut siblings, 0, 1, Priority::Normal);
        assert_eq!(names_in_visual_order(&siblings), vec!["b", "a", "c"]);
        assert!(changed.contains(&0));
        assert!(changed.contains(&2));
        assert!(!changed.contains(&1));
    }

    #[test]
    fn test_move_clamps_out_of_range_index() {
        let mut siblings = vec![
            task("p0", Priority::Preferred, 0),
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
        ];

        move_within(&mut siblings, 0, 99, Priority::Normal);
        assert_eq!(placement_of(&siblings, "p0"), (Priority::Normal, 2));

        // an index before the destination tier clamps to its front
        move_within(&mut siblings, 2, 0, Priority::Deferred);
        assert_eq!(placement_of(&siblings, "n1"), (Priority::Deferred, 0));
        assert!(check_density(&siblings).is_ok());
    }

    #[test]
    fn test_reapplying_current_placement_changes_nothing() {
        let mut siblings = vec![
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
            task("d0", Priority::Deferred, 0),
        ];

        move_within(&mut siblings, 0, 2, Priority::Deferred);
        let once = placements(&siblings);
        let index = visual_index_of(&siblings, 0).unwrap();
        let changed = move_within(&mut siblings, 0, index, Priority::Deferred);

        assert_eq!(placements(&siblings), once);
        assert_eq!(changed, vec![0]);
    }

    #[test]
    fn test_identical_retry_of_reorder_and_upward_move_is_stable() {
        let mut siblings = vec![
            task("a", Priority::Normal, 0),
            task("b", Priority::Normal, 1),
            task("c", Priority::Normal, 2),
        ];
        move_within(&mut siblings, 0, 2, Priority::Normal);
        let once = placements(&siblings);
        move_within(&mut siblings, 0, 2, Priority::Normal);
        assert_eq!(placements(&siblings), once);

        let mut siblings = vec![
            task("p0", Priority::Preferred, 0),
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
        ];
        move_within(&mut siblings, 2, 0, Priority::Preferred);
        let once = placements(&siblings);
        move_within(&mut siblings, 2, 0, Priority::Preferred);
        assert_eq!(placements(&siblings), once);
        assert_eq!(placement_of(&siblings, "n1"), (Priority::Preferred, 0));
        assert_eq!(placement_of(&siblings, "p0"), (Priority::Preferred, 1));
    }

    #[test]
    fn test_identical_retry_of_downward_move_shifts_again() {
        let mut siblings = vec![
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
            task("d0", Priority::Deferred, 0),
        ];

        // the first call still counts n0 in Normal, the retry does not
        move_within(&mut siblings, 0, 2, Priority::Deferred);
        assert_eq!(names_in_visual_order(&siblings), vec!["n1", "n0", "d0"]);

        move_within(&mut siblings, 0, 2, Priority::Deferred);
        assert_eq!(placement_of(&siblings, "n0"), (Priority::Deferred, 1));
        assert_eq!(placement_of(&siblings, "d0"), (Priority::Deferred, 0));
        assert_eq!(names_in_visual_order(&siblings), vec!["n1", "d0", "n0"]);
        assert!(check_density(&siblings).is_ok());
    }

    #[test]
    fn test_completed_siblings_are_ignored() {
        let mut done = task("done", Priority::Normal, 7);
        done.complete(chrono::Utc::now());
        let mut siblings = vec![
            done,
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
        ];

        assert_eq!(tier_size(&siblings, Priority::Normal), 2);
        let changed = move_within(&mut siblings, 2, 0, Priority::Normal);

        assert_eq!(placement_of(&siblings, "done"), (Priority::Normal, 7));
        assert!(!changed.contains(&0));
        assert_eq!(names_in_visual_order(&siblings), vec!["n1", "n0"]);
    }

    #[test]
    fn test_prefer_appends_and_closes_gap() {
        let mut siblings = vec![
            task("p0", Priority::Preferred, 0),
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
            task("n2", Priority::Normal, 2),
        ];

        let mut changed = toggle_prefer_within(&mut siblings, 1);
        changed.sort_unstable();

        assert_eq!(placement_of(&siblings, "n0"), (Priority::Preferred, 1));
        assert_eq!(placement_of(&siblings, "n1"), (Priority::Normal, 0));
        assert_eq!(placement_of(&siblings, "n2"), (Priority::Normal, 1));
        assert_eq!(changed, vec![1, 2, 3]);
    }

    #[test]
    fn test_prefer_last_in_tier_touches_no_sibling() {
        let mut siblings = vec![
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
        ];

        let changed = toggle_prefer_within(&mut siblings, 1);

        assert_eq!(changed, vec![1]);
        assert_eq!(placement_of(&siblings, "n1"), (Priority::Preferred, 0));
    }

    #[test]
    fn test_unprefer_goes_to_front_of_normal() {
        let mut siblings = vec![
            task("p0", Priority::Preferred, 0),
            task("p1", Priority::Preferred, 1),
            task("n0", Priority::Normal, 0),
            task("n1", Priority::Normal, 1),
        ];

        let mut changed = toggle_prefer_within(&mut siblings, 0);
        changed.sort_unstable();

        assert_eq!(placement_of(&siblings, "p0"), (Priority::Normal, 0));
        assert_eq!(placement_of(&siblings, "p1"), (Priority::Preferred, 0));
        assert_eq!(placement_of(&siblings, "n0"), (Priority::Normal, 1));
        assert_eq!(placement_of(&siblings, "n1"), (Priority::Normal, 2));
        assert_eq!(changed, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_toggle_twice_returns_to_front_of_normal() {
        for toggle in [toggle_prefer_within, toggle_defer_within] {
            let mut siblings = vec![
                task("n0", Priority::Normal, 0),
                task("n1", Priority::Normal, 1),
                task("n2", Priority::Normal, 2),
            ];

            toggle(&mut siblings, 2);
            toggle(&mut siblings, 2);

            assert_eq!(placement_of(&siblings, "n2"), (Priority::Normal, 0));
            assert_eq!(placement_of(&siblings, "n0"), (Priority::Normal, 1));
            assert_eq!(placement_of(&siblings, "n1"), (Priority::Normal, 2));
        }
    }

    #[test]
    fn test_defer_from_preferred() {
        let mut siblings = vec![
            task("p0", Priority::Preferred, 0),
            task("p1", Priority::Preferred, 1),
            task("d0", Priority::Deferred, 0),
        ];

        toggle_defer_within(&mut siblings, 0);

        assert_eq!(placement_of(&siblings, "p0"), (Priority::Deferred, 1));
        assert_eq!(placement_of(&siblings, "p1"), (Priority::Preferred, 0));
        assert!(check_density(&siblings).is_ok());
    }

    #[test]
    fn test_check_density_reports_gap() {
        let siblings = vec![
            task("n0", Priority::Normal, 0),
            task("n2", Priority::Normal, 2),
        ];

        assert_eq!(
            check_density(&siblings),
            Err(DensityViolation {
                tier: Priority::Normal,
                positions: vec![0, 2],
            })
        );
    }

    #[test]
    fn test_workspace_operations_validate_path() {
        let mut ws = Workspace::new().with_project(
            crate::models::Project::new("p", "p")
                .with_task(task("a", Priority::Normal, 0))
                .with_task(task("b", Priority::Normal, 1)),
        );

        assert_eq!(
            toggle_prefer(&mut ws, &TaskPath::root(0)).unwrap_err(),
            FocusError::RootPath(TaskPath::root(0))
        );
        assert_eq!(
            toggle_defer(&mut ws, &TaskPath::new(2, vec![0])).unwrap_err(),
            FocusError::ProjectNotFound(2)
        );
        let missing = TaskPath::new(0, vec![5]);
        assert_eq!(
            move_with_priority_change(&mut ws, &missing, 0, 1, Priority::Normal).unwrap_err(),
            FocusError::TaskNotFound(missing)
        );

        let changes =
            move_with_priority_change(&mut ws, &TaskPath::new(0, vec![1]), 1, 0, Priority::Normal)
                .unwrap();
        assert_eq!(changes.len(), 2);
        assert!(check_tree_density(&ws).is_ok());
    }

    #[test]
    fn test_stale_old_visual_index_is_tolerated() {
        let mut ws = Workspace::new().with_project(
            crate::models::Project::new("p", "p")
                .with_task(task("a", Priority::Normal, 0))
                .with_task(task("b", Priority::Normal, 1)),
        );

        let path = TaskPath::new(0, vec![0]);
        move_with_priority_change(&mut ws, &path, 5, 1, Priority::Normal).unwrap();

        assert_eq!(ws.task(&path).unwrap().position(), 1);
    }
}
