//! Focusable leaf discovery
//!
//! A leaf is an incomplete task with no incomplete subtasks. Leaves are reported in
//! visual order so callers listing them get the same order a user sees.

use crate::buckets::visual_order;
use crate::models::{Task, TaskPath, Workspace};

/// Returns the focusable leaves under `root`.
///
/// An incomplete task whose subtree has nothing left is its own sole leaf. A project
/// root with nothing left, a completed task and a stale path all yield an empty list;
/// use `Workspace::has_incomplete_tasks` to tell "this subtree is done" from "this
/// project is done".
pub fn leaves_under(ws: &Workspace, root: &TaskPath) -> Vec<TaskPath> {
    let mut leaves = Vec::new();

    if root.is_root() {
        if let Some(project) = ws.project(root.project) {
            collect_leaves(project.tasks(), root, &mut leaves);
        }
        return leaves;
    }

    match ws.task(root) {
        Some(task) if !task.is_completed() => {
            collect_leaves(task.subtasks(), root, &mut leaves);
            if leaves.is_empty() {
                leaves.push(root.clone());
            }
            leaves
        }
        _ => leaves,
    }
}

fn collect_leaves(siblings: &[Task], parent: &TaskPath, leaves: &mut Vec<TaskPath>) {
    for i in visual_order(siblings) {
        let task = &siblings[i];
        let path = parent.child(i);
        if task.is_leaf() {
            leaves.push(path);
        } else {
            collect_leaves(task.subtasks(), &path, leaves);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Context, Priority, Project};
    use pretty_assertions::assert_eq;

    fn path(index: &[usize]) -> TaskPath {
        TaskPath::new(0, index.to_vec())
    }

    // 0: a (b0, b1 (c0)), 1: d
    fn sample() -> Context {
        let mut context = Context::new(Workspace::new());
        let root = TaskPath::root(context.add_project("p"));
        let (a, _) = context.add_task(&root, "a").unwrap();
        context.add_task(&root, "d").unwrap();
        context.add_task(&a, "b0").unwrap();
        let (b1, _) = context.add_task(&a, "b1").unwrap();
        context.add_task(&b1, "c0").unwrap();
        context
    }

    #[test]
    fn test_leaves_of_project() {
        let context = sample();

        assert_eq!(
            leaves_under(context.workspace(), &TaskPath::root(0)),
            vec![path(&[0, 0]), path(&[0, 1, 0]), path(&[1])]
        );
    }

    #[test]
    fn test_leaves_follow_visual_order() {
        let mut context = sample();
        context.toggle_prefer(&path(&[1])).unwrap();
        context.toggle_defer(&path(&[0, 0])).unwrap();

        assert_eq!(
            leaves_under(context.workspace(), &TaskPath::root(0)),
            vec![path(&[1]), path(&[0, 1, 0]), path(&[0, 0])]
        );
    }

    #[test]
    fn test_completed_subtree_climbs_to_task() {
        let mut context = sample();
        context.complete_task(&path(&[0, 1, 0])).unwrap();

        // b1 has no incomplete subtasks left, so it is a leaf itself
        assert_eq!(
            leaves_under(context.workspace(), &path(&[0])),
            vec![path(&[0, 0]), path(&[0, 1])]
        );
        assert_eq!(
            leaves_under(context.workspace(), &path(&[0, 1])),
            vec![path(&[0, 1])]
        );
    }

    #[test]
    fn test_completed_or_missing_root_is_empty() {
        let mut context = sample();
        context.complete_task(&path(&[1])).unwrap();

        assert!(leaves_under(context.workspace(), &path(&[1])).is_empty());
        assert!(leaves_under(context.workspace(), &path(&[7])).is_empty());
        assert!(leaves_under(context.workspace(), &TaskPath::root(3)).is_empty());
    }

    #[test]
    fn test_finished_project_is_empty() {
        let ws = Workspace::new().with_project(Project::new("p", "p"));
        assert!(leaves_under(&ws, &TaskPath::root(0)).is_empty());
        assert!(!ws.has_incomplete_tasks(0));

        let mut context = sample();
        context.complete_task(&path(&[0])).unwrap();
        context.complete_task(&path(&[1])).unwrap();
        assert!(leaves_under(context.workspace(), &TaskPath::root(0)).is_empty());
        assert!(!context.workspace().has_incomplete_tasks(0));
    }

    #[test]
    fn test_leaves_are_read_only() {
        let context = sample();
        let before = serde_json::to_string(context.workspace()).unwrap();

        leaves_under(context.workspace(), &TaskPath::root(0));

        assert_eq!(serde_json::to_string(context.workspace()).unwrap(), before);
        assert_eq!(
            context.workspace().task(&path(&[0])).unwrap().priority(),
            Priority::Normal
        );
    }
}
