//! trl - command-line front end for the Trellis task graph.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use trellis::{Config, Direction, ExportOptions, Filter, NewTask, Status, Store, Task, TaskPatch};

mod cli;

use cli::{Cli, Command, DepCommand};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trellis")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("trellis.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn format_status(status: &Status) -> ColoredString {
    match status {
        Status::Open => "open".green(),
        Status::InProgress => "in_progress".yellow(),
        Status::Closed => "closed".blue(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialize output")?);
    Ok(())
}

fn print_task_line(task: &Task) {
    let labels = if task.labels.is_empty() {
        String::new()
    } else {
        format!(" [{}]", task.labels.iter().cloned().collect::<Vec<_>>().join(", "))
    };
    let assignee = task
        .assignee
        .as_ref()
        .map(|a| format!(" @{}", a))
        .unwrap_or_default();
    println!(
        "{} {} P{} {} {}{}{}",
        format_status(&task.status),
        task.id.cyan(),
        task.priority,
        task.task_type,
        task.title,
        labels.dimmed(),
        assignee.yellow()
    );
}

fn print_task(task: &Task) {
    println!("{}: {}", "ID".bold(), task.id.cyan());
    println!("{}: {}", "Title".bold(), task.title);
    println!("{}: {}", "Status".bold(), format_status(&task.status));
    println!("{}: {}", "Type".bold(), task.task_type);
    println!("{}: P{}", "Priority".bold(), task.priority);
    if let Some(assignee) = &task.assignee {
        println!("{}: {}", "Assignee".bold(), assignee);
    }
    if let Some(parent) = &task.parent_id {
        println!("{}: {}", "Parent".bold(), parent.cyan());
    }
    if !task.labels.is_empty() {
        println!(
            "{}: {}",
            "Labels".bold(),
            task.labels.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    if let Some(external_ref) = &task.external_ref {
        println!("{}: {}", "External".bold(), external_ref);
    }
    if let Some(desc) = &task.description {
        println!("{}: {}", "Description".bold(), desc);
    }
    for dep in &task.dependencies {
        println!("{}: {} {}", "Depends on".bold(), dep.to_id.cyan(), dep.dep_type);
    }
    println!("{}: {}", "Created".bold(), task.created_at);
    println!("{}: {}", "Updated".bold(), task.updated_at);
    if let Some(closed_at) = &task.closed_at {
        println!("{}: {}", "Closed".bold(), closed_at);
    }
    if let Some(reason) = &task.close_reason {
        println!("{}: {}", "Close Reason".bold(), reason);
    }
}

fn print_tasks(tasks: &[Task], empty: &str) {
    if tasks.is_empty() {
        println!("{}", empty.dimmed());
    }
    for task in tasks {
        print_task_line(task);
    }
}

fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);
    let json = cli.json;

    match cli.command {
        Command::Init { prefix } => {
            let mut config = Config::default();
            if let Some(prefix) = prefix {
                config = config.prefix(prefix);
            }
            let store = Store::init_with(&store_dir, config).context("Failed to initialize trellis store")?;
            if json {
                print_json(store.config())?;
            } else {
                println!(
                    "{} Initialized trellis store in {} (prefix '{}')",
                    "✓".green(),
                    store_dir.display(),
                    store.config().prefix
                );
            }
        }

        Command::Create {
            title,
            priority,
            task_type,
            labels,
            description,
            parent,
            external_ref,
        } => {
            let mut store = Store::open(&store_dir)?;
            let mut new = NewTask::new(title);
            new.priority = priority;
            new.task_type = task_type;
            new.labels = labels.unwrap_or_default().into_iter().collect();
            new.description = description;
            new.parent_id = parent;
            new.external_ref = external_ref;

            let task = store.create(new)?;
            if json {
                print_json(&task)?;
            } else {
                println!("{} Created: {} {}", "✓".green(), task.id.cyan(), task.title);
            }
        }

        Command::Show { id } => {
            let store = Store::open(&store_dir)?;
            match store.get(&id)? {
                Some(task) if json => print_json(&task)?,
                Some(task) => print_task(&task),
                None => {
                    eprintln!("{} Task not found: {}", "✗".red(), id);
                    std::process::exit(1);
                }
            }
        }

        Command::List {
            status,
            task_type,
            labels,
            assignee,
            parent,
            limit,
        } => {
            let store = Store::open(&store_dir)?;
            let mut filter = Filter::new();
            filter.status = status;
            filter.task_type = task_type;
            filter.labels = labels;
            filter.assignee = assignee;
            filter.parent_id = parent;
            filter.limit = limit;

            let tasks = store.list(&filter)?;
            if json {
                print_json(&tasks)?;
            } else {
                print_tasks(&tasks, "No tasks found");
            }
        }

        Command::Update {
            id,
            title,
            description,
            priority,
            task_type,
            labels,
            parent,
            external_ref,
        } => {
            let mut store = Store::open(&store_dir)?;
            let patch = TaskPatch {
                title,
                description: description.map(Some),
                priority,
                task_type,
                parent_id: parent.map(Some),
                external_ref: external_ref.map(Some),
                labels: labels.map(|l| l.into_iter().collect()),
                ..TaskPatch::default()
            };

            let task = store.update(&id, patch)?;
            if json {
                print_json(&task)?;
            } else {
                println!("{} Updated: {} {}", "✓".green(), task.id.cyan(), task.title);
            }
        }

        Command::Claim { id, agent } => {
            let mut store = Store::open(&store_dir)?;
            let claimed = store.claim(&id, &agent)?;
            if json {
                print_json(&serde_json::json!({ "id": id, "claimed": claimed }))?;
            } else if claimed {
                println!("{} {} claimed by {}", "→".blue(), id.cyan(), agent);
            } else {
                eprintln!("{} {} is not claimable", "✗".red(), id.cyan());
                std::process::exit(2);
            }
        }

        Command::Release { id } => {
            let mut store = Store::open(&store_dir)?;
            let task = store.release(&id)?;
            if json {
                print_json(&task)?;
            } else {
                println!("{} Released: {} {}", "✓".green(), task.id.cyan(), task.title);
            }
        }

        Command::Close { id, reason } => {
            let mut store = Store::open(&store_dir)?;
            let task = store.close(&id, &reason)?;
            if json {
                print_json(&task)?;
            } else {
                println!("{} Closed: {} {}", "✓".green(), task.id.cyan(), task.title);
            }
        }

        Command::Delete { id } => {
            let mut store = Store::open(&store_dir)?;
            let task = store.delete(&id)?;
            if json {
                print_json(&task)?;
            } else {
                println!("{} Deleted: {} {}", "✓".green(), task.id.cyan(), task.title);
            }
        }

        Command::Ready {
            labels,
            task_type,
            limit,
        } => {
            let store = Store::open(&store_dir)?;
            let mut filter = Filter::new();
            filter.labels = labels;
            filter.task_type = task_type;
            filter.limit = limit;

            let tasks = store.ready(&filter)?;
            if json {
                print_json(&tasks)?;
            } else if tasks.is_empty() {
                println!("{}", "No ready tasks".dimmed());
            } else {
                println!("{} {} task(s) ready to work on:", "→".blue(), tasks.len());
                for task in tasks {
                    println!("  {} P{} {}", task.id.cyan(), task.priority, task.title);
                }
            }
        }

        Command::Blocked => {
            let store = Store::open(&store_dir)?;
            let blocked = store.blocked()?;
            if json {
                print_json(&blocked)?;
            } else if blocked.is_empty() {
                println!("{}", "No blocked tasks".dimmed());
            } else {
                println!("{} {} task(s) blocked:", "⊘".red(), blocked.len());
                for entry in blocked {
                    println!(
                        "  {} P{} {} {}",
                        entry.task.id.cyan(),
                        entry.task.priority,
                        entry.task.title,
                        format!("(waiting on {})", entry.blocked_by.join(", ")).dimmed()
                    );
                }
            }
        }

        Command::Dep(DepCommand::Add { from, to, dep_type }) => {
            let mut store = Store::open(&store_dir)?;
            let edge = store.add_dependency(&from, &to, dep_type)?;
            if json {
                print_json(&edge)?;
            } else {
                println!("{} {} {} {}", "✓".green(), from.cyan(), dep_type, to.cyan());
            }
        }

        Command::Dep(DepCommand::Remove { from, to, dep_type }) => {
            let mut store = Store::open(&store_dir)?;
            let removed = store.remove_dependency(&from, &to, dep_type)?;
            if json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else if removed {
                println!("{} Removed {} {} {}", "✓".green(), from.cyan(), dep_type, to.cyan());
            } else {
                println!("{}", "No such dependency".dimmed());
            }
        }

        Command::Dep(DepCommand::Tree { id, up, max_depth }) => {
            let store = Store::open(&store_dir)?;
            let direction = if up { Direction::Up } else { Direction::Down };
            let nodes = store.dep_tree(&id, direction, max_depth)?;
            if json {
                print_json(&nodes)?;
            } else {
                for node in nodes {
                    let indent = "  ".repeat(node.depth);
                    match &node.task {
                        Some(task) => println!(
                            "{}{} {} {}",
                            indent,
                            node.id.cyan(),
                            format_status(&task.status),
                            task.title
                        ),
                        None => println!("{}{} {}", indent, node.id.cyan(), "(not present locally)".dimmed()),
                    }
                }
            }
        }

        Command::Export { gc } => {
            let mut store = Store::open(&store_dir)?;
            let report = store.export(ExportOptions::new().gc(gc))?;
            if json {
                print_json(&report)?;
            } else {
                let how = if report.rewritten { "rewrote" } else { "appended" };
                println!("{} Export {} {} snapshot(s)", "✓".green(), how, report.written);
            }
        }

        Command::Import => {
            let mut store = Store::open(&store_dir)?;
            let report = store.import()?;
            if json {
                print_json(&report)?;
            } else {
                println!(
                    "{} Imported {} line(s): {} new, {} updated, {} unchanged, {} malformed",
                    "✓".green(),
                    report.lines,
                    report.inserted,
                    report.updated,
                    report.unchanged,
                    report.malformed
                );
            }
        }

        Command::Compact => {
            let mut store = Store::open(&store_dir)?;
            let result = store.compact()?;
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "{} Compacted {} -> {} line(s), {} bytes saved",
                    "✓".green(),
                    result.lines_before,
                    result.lines_after,
                    result.bytes_saved()
                );
            }
        }

        Command::Rebuild => {
            let mut store = Store::open(&store_dir)?;
            let report = store.rebuild()?;
            if json {
                print_json(&report)?;
            } else {
                println!("{} Rebuilt index from {} line(s)", "✓".green(), report.lines);
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        if trellis::store_error(&e).is_some_and(|err| err.is_retryable()) {
            eprintln!("{}", "The store is busy; try again.".dimmed());
        }
        std::process::exit(1);
    }

    Ok(())
}
