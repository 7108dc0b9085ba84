use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    BroadcastNotifier, ControllerConfig, CourseListController, HttpCourseApi, LoadMoreOutcome,
    LoadingState, MutationOutcome, Notification, RefreshOutcome,
};
use futures::StreamExt;
use shared::domain::{
    CourseFields, CourseId, CourseRegistration, RegistrationDecision, RegistrationId,
    RegistrationSummary, Role,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
    task::JoinHandle,
};
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Manage a tutor's courses from the terminal")]
struct Cli {
    #[arg(long, env = "TUTOR_SERVER_URL", default_value = "http://127.0.0.1:8080")]
    server_url: String,
    #[arg(long)]
    username: String,
    #[arg(long, default_value_t = client_core::DEFAULT_PAGE_SIZE)]
    page_size: usize,
    /// Delay before each extra page is revealed, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    load_delay_ms: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the first page, then `pages - 1` more.
    List {
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
    /// Interactive infinite scroll: Enter loads more, `refresh` reloads, `quit` exits.
    Browse,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        subject: String,
    },
    /// Update a course; omitted fields keep their current value.
    Update {
        #[arg(long)]
        course_id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    Delete {
        #[arg(long)]
        course_id: i64,
    },
    /// List registration requests for your courses.
    Registrations,
    /// Approve or reject a pending registration request.
    Decide {
        #[arg(long)]
        registration_id: i64,
        #[arg(long, value_enum)]
        decision: DecisionArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DecisionArg {
    Approve,
    Reject,
}

impl From<DecisionArg> for RegistrationDecision {
    fn from(value: DecisionArg) -> Self {
        match value {
            DecisionArg::Approve => RegistrationDecision::Approved,
            DecisionArg::Reject => RegistrationDecision::Rejected,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let api = HttpCourseApi::login(&cli.server_url, &cli.username, Role::Tutor).await?;
    info!(user_id = api.user_id().0, "logged in");

    let api = Arc::new(api);
    let notifier = Arc::new(BroadcastNotifier::default());
    let printer = spawn_notification_printer(&notifier);
    let controller = CourseListController::new(
        api.clone(),
        notifier.clone(),
        LoadingState::new(),
        ControllerConfig {
            page_size: cli.page_size,
            load_more_delay: Duration::from_millis(cli.load_delay_ms),
        },
    );

    let result = run(&controller, &api, cli.command).await;

    controller.shutdown();
    drop(controller);
    drop(notifier);
    if let Err(error) = printer.await {
        warn!(%error, "notification printer stopped abnormally");
    }
    result
}

async fn run(
    controller: &CourseListController,
    api: &HttpCourseApi,
    command: Command,
) -> Result<()> {
    match command {
        Command::List { pages } => list(controller, pages).await,
        Command::Browse => browse(controller).await,
        Command::Add {
            name,
            description,
            subject,
        } => {
            let outcome = controller
                .create_course(CourseFields::new(name, description, subject))
                .await;
            finish_mutation(controller, outcome)
        }
        Command::Update {
            course_id,
            name,
            description,
            subject,
        } => {
            let course_id = CourseId(course_id);
            if controller.refresh_all().await == RefreshOutcome::Failed {
                bail!("could not load courses from the server");
            }
            let Some(current) = controller.find_course(course_id) else {
                bail!("course {course_id} not found");
            };
            let mut fields = CourseFields::from_course(&current);
            if let Some(name) = name {
                fields.name = name;
            }
            if let Some(description) = description {
                fields.description = description;
            }
            if let Some(subject) = subject {
                fields.subject = subject;
            }
            let outcome = controller.update_course(course_id, fields).await;
            finish_mutation(controller, outcome)
        }
        Command::Delete { course_id } => {
            let outcome = controller.delete_course(CourseId(course_id)).await;
            finish_mutation(controller, outcome)
        }
        Command::Registrations => {
            let registrations = api.list_registrations().await?;
            if registrations.is_empty() {
                println!("no registration requests");
            }
            for registration in &registrations {
                println!("{}", format_registration(registration));
            }
            Ok(())
        }
        Command::Decide {
            registration_id,
            decision,
        } => {
            let status = api
                .decide_registration(RegistrationId(registration_id), decision.into())
                .await?;
            println!("registration {registration_id} is now {}", status.as_str());
            Ok(())
        }
    }
}

async fn list(controller: &CourseListController, pages: usize) -> Result<()> {
    if controller.refresh_all().await == RefreshOutcome::Failed {
        bail!("could not load courses from the server");
    }
    let mut printed = print_rows(&[], &controller.window());

    for _ in 1..pages.max(1) {
        match controller.load_more().await {
            LoadMoreOutcome::Appended(_) => {
                let window = controller.window();
                print_rows(&printed, &window);
                printed = window;
            }
            LoadMoreOutcome::Exhausted => break,
            LoadMoreOutcome::AlreadyLoading => {}
        }
    }

    let snapshot = controller.snapshot();
    println!("showing {} of {} courses", snapshot.window.len(), snapshot.total);
    Ok(())
}

async fn browse(controller: &CourseListController) -> Result<()> {
    let mut snapshots = WatchStream::new(controller.subscribe());
    let renderer = tokio::spawn(async move {
        let mut printed: Vec<CourseRegistration> = Vec::new();
        let mut was_loading = false;
        while let Some(snapshot) = snapshots.next().await {
            printed = print_rows(&printed, &snapshot.window);
            if snapshot.is_loading && !was_loading {
                println!("loading more...");
            }
            was_loading = snapshot.is_loading;
        }
    });

    controller.refresh_all().await;
    println!("[Enter] more  [r]efresh  [q]uit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" | "m" | "more" => {
                if controller.load_more().await == LoadMoreOutcome::Exhausted {
                    println!("-- no more courses --");
                }
            }
            "r" | "refresh" => {
                controller.refresh_all().await;
            }
            "q" | "quit" => break,
            other => println!("unknown command '{other}'"),
        }
    }

    renderer.abort();
    Ok(())
}

fn finish_mutation(controller: &CourseListController, outcome: MutationOutcome) -> Result<()> {
    if outcome == MutationOutcome::Failed {
        bail!("course change was rejected");
    }
    let snapshot = controller.snapshot();
    for course in &snapshot.window {
        println!("{}", format_course(course));
    }
    println!("showing {} of {} courses", snapshot.window.len(), snapshot.total);
    Ok(())
}

fn spawn_notification_printer(notifier: &BroadcastNotifier) -> JoinHandle<()> {
    let mut notifications = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(notification) => eprintln!("{}", format_notification(&notification)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notifications dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Prints the rows of `current` not already shown and returns what is now on screen.
/// When `current` no longer extends `previous` the whole list is reprinted.
fn print_rows(
    previous: &[CourseRegistration],
    current: &[CourseRegistration],
) -> Vec<CourseRegistration> {
    let start = rows_to_print(previous, current);
    if start == 0 && !previous.is_empty() {
        println!("-- list refreshed --");
    }
    for course in &current[start..] {
        println!("{}", format_course(course));
    }
    current.to_vec()
}

fn rows_to_print(previous: &[CourseRegistration], current: &[CourseRegistration]) -> usize {
    if current.starts_with(previous) {
        previous.len()
    } else {
        0
    }
}

fn format_course(course: &CourseRegistration) -> String {
    if course.description.is_empty() {
        format!(
            "#{:<5} {} [{}]",
            course.course_id.0, course.course_name, course.subject
        )
    } else {
        format!(
            "#{:<5} {} [{}] - {}",
            course.course_id.0, course.course_name, course.subject, course.description
        )
    }
}

fn format_registration(registration: &RegistrationSummary) -> String {
    format!(
        "#{:<5} {} -> {} ({})",
        registration.registration_id.0,
        registration.student_name,
        registration.course_name,
        registration.status.as_str()
    )
}

fn format_notification(notification: &Notification) -> String {
    match notification {
        Notification::Success(message) => format!("ok: {message}"),
        Notification::Error(message) => format!("error: {message}"),
    }
}
