//! CLI module
//!
//! This module provides the command-line interface for the focus tool. Commands load the
//! workspace file, run engine operations on it and write it back when something changed.

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use colored::Colorize;
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::buckets::{check_tree_density, visual_index_of, visual_order};
use crate::config::EngineConfig;
use crate::focus::FocusOutcome;
use crate::guide::get_guide_string;
use crate::models::{ChangeSet, Context, FocusError, Priority, Task, TaskPath, Workspace};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace file
    #[arg(short, long, env = "FOCUS_FILE", default_value = "focus.json")]
    file: PathBuf,

    /// Seed for random tie-breaks between equally ranked tasks
    #[arg(long, env = "FOCUS_SEED", default_value_t = 0)]
    seed: u64,

    /// Log engine transitions to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new workspace file
    Init {
        /// Populate with an example task tree
        #[arg(long)]
        example: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Project management commands
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Task management commands
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Print every project and task
    Show,

    /// List the focusable tasks under a path
    Leaves {
        /// Project (e.g. 0) or task (e.g. 0:1,2)
        path: TaskPath,
    },

    /// Run a focus session and print the tasks it presents
    Focus {
        /// Project (e.g. 0) or task (e.g. 0:1,2) to focus on
        path: TaskPath,

        /// Number of tasks to present
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,

        /// Complete each task after presenting it
        #[arg(long)]
        complete: bool,
    },

    /// Explain how Focus Mode works
    Guide,

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Add a new project
    Add {
        /// Project name
        name: String,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// Add a task at the end of the parent's normal tier
    Add {
        /// Parent project (e.g. 0) or task (e.g. 0:1)
        parent: TaskPath,

        /// Task name
        name: String,
    },

    /// Rename a task
    Rename { path: TaskPath, name: String },

    /// Complete a task and all of its subtasks
    Complete { path: TaskPath },

    /// Reopen a completed task
    Uncomplete { path: TaskPath },

    /// Delete a task and all of its subtasks
    Remove { path: TaskPath },

    /// Toggle the preferred tier
    Prefer { path: TaskPath },

    /// Toggle the deferred tier
    Defer { path: TaskPath },

    /// Move a task to a visual index among its siblings
    Move {
        path: TaskPath,

        /// Target visual index (preferred, then normal, then deferred)
        to: usize,

        /// Destination tier; defaults to the task's current tier
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Preferred,
    Normal,
    Deferred,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Preferred => Priority::Preferred,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Deferred => Priority::Deferred,
        }
    }
}

/// Run the CLI application
pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = EngineConfig::default().with_seed(cli.seed);

    match &cli.command {
        Commands::Init { example, force } => {
            if cli.file.exists() && !force {
                return Err(format!(
                    "{} already exists; pass --force to overwrite it",
                    cli.file.display()
                )
                .into());
            }

            let mut context = Context::with_config(Workspace::new(), config);
            if *example {
                create_example_workspace(&mut context)?;
            }
            save_workspace(&cli.file, context.workspace())?;
            println!("Created workspace at {}", cli.file.display());
            Ok(())
        }

        Commands::Guide => {
            println!("{}", get_guide_string());
            Ok(())
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }

        command => {
            let mut context = Context::with_config(load_workspace(&cli.file)?, config);
            if execute(command, &mut context)? {
                save_workspace(&cli.file, context.workspace())?;
            }
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "focuskeeper=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_workspace(path: &Path) -> Result<Workspace, Box<dyn Error>> {
    let raw = fs::read_to_string(path).map_err(|e| {
        format!(
            "cannot read {}: {} (run 'focus init' to create it)",
            path.display(),
            e
        )
    })?;
    let workspace: Workspace = serde_json::from_str(&raw)?;

    // moves and toggles assume dense tiers, so a hand-edited file is rejected up front
    if let Err((parent, violation)) = check_tree_density(&workspace) {
        warn!(file = %path.display(), %parent, ?violation, "workspace positions are not dense");
        return Err(format!(
            "{}: {} positions under {} are {:?}, expected 0..{}",
            path.display(),
            violation.tier,
            parent,
            violation.positions,
            violation.positions.len()
        )
        .into());
    }
    Ok(workspace)
}

fn save_workspace(path: &Path, workspace: &Workspace) -> Result<(), Box<dyn Error>> {
    fs::write(path, serde_json::to_string_pretty(workspace)?)?;
    Ok(())
}

/// Runs a workspace command; returns whether the workspace needs saving
fn execute(command: &Commands, context: &mut Context) -> Result<bool, Box<dyn Error>> {
    match command {
        Commands::Project {
            command: ProjectCommands::Add { name },
        } => {
            let index = context.add_project(name.clone());
            println!("Added project \"{}\" at index {}", name, index);
            Ok(true)
        }

        Commands::Task { command } => {
            execute_task(command, context)?;
            Ok(true)
        }

        Commands::Show => {
            print_workspace(context.workspace());
            Ok(false)
        }

        Commands::Leaves { path } => {
            let leaves = context.leaves_under(path);
            if leaves.is_empty() {
                println!("Nothing to focus on under {}", path);
            }
            for leaf in leaves {
                if let Some(task) = context.workspace().task(&leaf) {
                    println!("{} ({})", task.name(), leaf.to_string().dimmed());
                }
            }
            Ok(false)
        }

        Commands::Focus {
            path,
            count,
            complete,
        } => run_focus(context, path.clone(), *count, *complete),

        Commands::Init { .. } | Commands::Guide | Commands::Completions { .. } => Ok(false),
    }
}

fn execute_task(command: &TaskCommands, context: &mut Context) -> Result<(), FocusError> {
    match command {
        TaskCommands::Add { parent, name } => {
            let (path, changes) = context.add_task(parent, name.clone())?;
            println!("Added task \"{}\" at {}", name, path);
            print_changes(&changes);
        }
        TaskCommands::Rename { path, name } => {
            context.rename_task(path, name.clone())?;
            println!("Renamed {} to \"{}\"", path, name);
        }
        TaskCommands::Complete { path } => {
            let changes = context.complete_task(path)?;
            println!("Completed {}", path);
            print_changes(&changes);
        }
        TaskCommands::Uncomplete { path } => {
            let changes = context.uncomplete_task(path)?;
            println!("Reopened {}", path);
            print_changes(&changes);
        }
        TaskCommands::Remove { path } => {
            let (removed, changes) = context.remove_task(path)?;
            println!("Removed \"{}\"", removed.name());
            print_changes(&changes);
        }
        TaskCommands::Prefer { path } => {
            let changes = context.toggle_prefer(path)?;
            print_placement(context, path);
            print_changes(&changes);
        }
        TaskCommands::Defer { path } => {
            let changes = context.toggle_defer(path)?;
            print_placement(context, path);
            print_changes(&changes);
        }
        TaskCommands::Move { path, to, priority } => {
            let (parent, child) = path
                .split()
                .ok_or_else(|| FocusError::RootPath(path.clone()))?;
            let task = context.workspace().require_task(path)?;
            let new_priority = priority.map(Priority::from).unwrap_or(task.priority());
            let old_visual_index = context
                .workspace()
                .children(&parent)
                .and_then(|siblings| visual_index_of(siblings, child))
                .ok_or_else(|| FocusError::TaskCompleted(path.clone()))?;

            let changes =
                context.move_with_priority_change(path, old_visual_index, *to, new_priority)?;
            print_placement(context, path);
            print_changes(&changes);
        }
    }
    Ok(())
}

fn run_focus(
    context: &mut Context,
    path: TaskPath,
    count: usize,
    complete: bool,
) -> Result<bool, Box<dyn Error>> {
    let mut dirty = false;
    let mut outcome = context.start_focus(path)?;

    for step in 0..count {
        if step > 0 {
            outcome = context.next_focus()?;
        }
        if matches!(
            outcome,
            FocusOutcome::SubtreeDone | FocusOutcome::AllComplete
        ) {
            println!("{}", "Nothing left here, moving on.".dimmed());
            outcome = context.keep_going()?;
        }

        let FocusOutcome::Focused(current) = &outcome else {
            println!("Nothing left to focus on. Everything is done!");
            break;
        };
        print_focused(context.workspace(), step + 1, current);

        if complete {
            context.complete_task(current)?;
            println!("  {}", "completed".green());
            dirty = true;
        }
    }

    context.end_focus();
    Ok(dirty)
}

fn print_focused(workspace: &Workspace, step: usize, path: &TaskPath) {
    let Some(task) = workspace.task(path) else {
        return;
    };

    let mut trail = Vec::new();
    if let Some(project) = workspace.project(path.project) {
        trail.push(project.name().to_string());
    }
    for depth in 1..path.index.len() {
        let ancestor = TaskPath::new(path.project, path.index[..depth].to_vec());
        if let Some(t) = workspace.task(&ancestor) {
            trail.push(t.name().to_string());
        }
    }

    println!(
        "{}. {} ({})",
        step,
        task.name().bold(),
        path.to_string().dimmed()
    );
    println!("   {}", trail.join(" › ").dimmed());
}

fn print_placement(context: &Context, path: &TaskPath) {
    if let Some(task) = context.workspace().task(path) {
        println!(
            "\"{}\" is now {} at position {}",
            task.name(),
            task.priority(),
            task.position()
        );
    }
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        return;
    }
    let paths = changes
        .paths()
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", format!("changed: {}", paths).dimmed());
}

// incomplete tasks in visual order, then completed ones in storage order
fn display_order(siblings: &[Task]) -> Vec<usize> {
    let mut order = visual_order(siblings);
    order.extend((0..siblings.len()).filter(|&i| siblings[i].is_completed()));
    order
}

fn print_workspace(workspace: &Workspace) {
    if workspace.projects().is_empty() {
        println!("No projects yet. Add one with 'focus project add <NAME>'");
        return;
    }

    for (p, project) in workspace.projects().iter().enumerate() {
        println!("{} {}", format!("[{}]", p).dimmed(), project.name().bold());
        let root = TaskPath::root(p);
        for i in display_order(project.tasks()) {
            print_task(&project.tasks()[i], &root.child(i));
        }
    }
}

/// Recursively prints a task and its subtasks with proper indentation
fn print_task(task: &Task, path: &TaskPath) {
    let indent = "  ".repeat(path.index.len());
    let status = if task.is_completed() {
        "[✓]".green()
    } else {
        "[ ]".normal()
    };
    let tier = match task.priority() {
        Priority::Preferred => "↑".yellow(),
        Priority::Normal => " ".normal(),
        Priority::Deferred => "↓".blue(),
    };

    println!(
        "{}{} {} {} ({})",
        indent,
        status,
        tier,
        task.name(),
        path.to_string().dimmed()
    );

    for i in display_order(task.subtasks()) {
        print_task(&task.subtasks()[i], &path.child(i));
    }
}

/// Builds the example workspace written by `focus init --example`
fn create_example_workspace(context: &mut Context) -> Result<(), FocusError> {
    let home = TaskPath::root(context.add_project("Home"));

    let (garden, _) = context.add_task(&home, "Tidy the garden")?;
    context.add_task(&garden, "Mow the lawn")?;
    let (beds, _) = context.add_task(&garden, "Weed the flower beds")?;
    context.toggle_defer(&beds)?;

    let (taxes, _) = context.add_task(&home, "File taxes")?;
    context.toggle_prefer(&taxes)?;
    context.add_task(&taxes, "Collect receipts")?;
    context.add_task(&taxes, "Fill in the return")?;

    context.add_task(&home, "Fix the dripping tap")?;

    let work = TaskPath::root(context.add_project("Work"));

    let (release, _) = context.add_task(&work, "Ship the release")?;
    let (notes, _) = context.add_task(&release, "Write release notes")?;
    context.add_task(&release, "Tag the build")?;
    context.toggle_prefer(&notes)?;

    let (review, _) = context.add_task(&work, "Review open pull requests")?;
    context.toggle_defer(&review)?;

    Ok(())
}
