//! Guide text for the `focus guide` command

/// Generate the guide shown by the CLI
pub fn get_guide_string() -> String {
    format!(
        r#"=== FOCUS GUIDE ===

{overview}

{priorities}

{workflow}

{command_reference}"#,
        overview = get_overview_section(),
        priorities = get_priorities_section(),
        workflow = get_workflow_section(),
        command_reference = get_command_reference_section(),
    )
}

fn get_overview_section() -> &'static str {
    r#"== OVERVIEW ==

Work is organized as projects holding tasks, and tasks holding subtasks to any depth.
Focus Mode hides the list and shows one actionable task at a time: a task with no
unfinished subtasks. When you finish or skip it, the next one is chosen for you."#
}

fn get_priorities_section() -> &'static str {
    r#"== PRIORITIES ==

Every task sits in one of three tiers among its siblings:

  preferred   shown first
  normal      where new tasks start
  deferred    shown last

Tiers are compared level by level, top down. A deferred subtask of a preferred task
comes before anything under a normal task, whatever their own tiers. Tasks tied in
the same tier are picked in random order so Focus Mode does not feel repetitive.

Preferring a task appends it to the preferred tier; preferring it again returns it to
the front of the normal tier. Deferring works the same way with the deferred tier."#
}

fn get_workflow_section() -> &'static str {
    r#"== WORKFLOW ==

1. Create a workspace:
     $ focus init --example
2. Review it:
     $ focus show
3. Focus on a project (0) or a task inside it (0:1,2):
     $ focus focus 0 -n 5
4. Finish what you were shown:
     $ focus task complete 0:1,2"#
}

fn get_command_reference_section() -> &'static str {
    r#"== COMMAND REFERENCE ==

  $ focus init [--example]                      Create the workspace file
  $ focus project add <NAME>                    Add a project
  $ focus show                                  Print every project and task
  $ focus leaves <PATH>                         List focusable tasks under PATH
  $ focus focus <PATH> [-n COUNT]               Present COUNT tasks in focus order
  $ focus task add <PARENT> <NAME>              Add a task (PARENT may be a project)
  $ focus task rename <PATH> <NAME>             Rename a task
  $ focus task complete <PATH>                  Complete a task and its subtasks
  $ focus task uncomplete <PATH>                Reopen a task
  $ focus task remove <PATH>                    Delete a task and its subtasks
  $ focus task prefer <PATH>                    Toggle the preferred tier
  $ focus task defer <PATH>                     Toggle the deferred tier
  $ focus task move <PATH> <TO> [--priority P]  Drag a task to visual index TO
  $ focus completions <SHELL>                   Generate shell completions

Paths are written P for a project root or P:i,j,k for a task.
Use --file (or FOCUS_FILE) to pick the workspace and --seed (or FOCUS_SEED) to
replay the same random choices."#
}
