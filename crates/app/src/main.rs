//! Command-line front end for the course progress services.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use course_core::model::{ChapterId, CourseId, CourseProgress, EventFilter, Resource, UserId};
use course_core::scoring::{AnswerMap, AnswerValue, TestScope};
use course_core::time::{format_datetime, format_last_accessed};
use services::{AppServices, Clock, FetchOptions, ProgressError, SubscriptionStatus, SyncConfig};
use storage::repository::Storage;
use tracing::{info, warn};

mod db;
mod logging;
mod seed;

/// Command-line arguments for learn-sync
#[derive(Parser, Debug)]
#[command(name = "learn-sync")]
#[command(about = "Course catalog, progress and test tools")]
#[command(version)]
struct Args {
    /// Database URL or file path
    #[arg(long, global = true, env = "LEARN_DB_URL")]
    db: Option<String>,

    /// Acting user; defaults to the last user given
    #[arg(long, global = true, env = "LEARN_USER")]
    user: Option<UserId>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every course
    Courses,
    /// List the courses the user is enrolled in
    MyCourses,
    /// Show enrollment progress for one course
    Progress {
        #[arg(long)]
        course: CourseId,
        /// Bypass the cache
        #[arg(long)]
        force: bool,
    },
    /// Enroll the user in a course
    Enroll {
        #[arg(long)]
        course: CourseId,
    },
    /// Grade and record a test attempt
    Submit {
        #[arg(long)]
        course: CourseId,
        /// Chapter test to take; the final course test when omitted
        #[arg(long)]
        chapter: Option<ChapterId>,
        /// One answer as `<question>=<option>`, repeatable
        #[arg(long = "answer", value_parser = parse_answer)]
        answers: Vec<(u32, AnswerValue)>,
    },
    /// List recorded test attempts
    Results {
        #[arg(long)]
        course: Option<CourseId>,
    },
    /// List earned certificates
    Certificates,
    /// Write the demo catalog and answer keys
    Seed,
    /// Print change events for a resource until Ctrl-C
    Watch {
        #[arg(long, default_value = Resource::ENROLLMENTS)]
        resource: String,
        #[arg(long, default_value = "any")]
        events: EventFilter,
        /// Enroll the user in every course after subscribing
        #[arg(long)]
        simulate: bool,
    },
}

fn parse_answer(raw: &str) -> Result<(u32, AnswerValue), String> {
    let (question, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <question>=<answer>, got {raw}"))?;
    let question = question
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid question index: {question}"))?;
    let value = value.trim();
    let answer = value
        .parse::<i64>()
        .map_or_else(|_| AnswerValue::from(value), AnswerValue::Index);
    Ok((question, answer))
}

fn print_progress(course: CourseId, progress: &CourseProgress) {
    if progress.enrolled() {
        println!(
            "course {course}: enrolled, {}% complete, last accessed {}",
            progress.progress(),
            format_last_accessed(progress.last_accessed())
        );
    } else {
        println!("course {course}: not enrolled");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SyncConfig::from_env();
    if let Some(db) = &args.db {
        config = config.with_db_url(db.clone());
    }
    config.db_url = db::normalize_sqlite_url(&config.db_url);
    logging::init_tracing(&config.log_level);

    db::prepare_sqlite_file(&config.db_url)?;
    info!(db = %config.db_url, "opening database");

    if matches!(args.command, Command::Seed) {
        let storage = Storage::sqlite(&config.db_url)
            .await
            .context("Failed to open database")?;
        seed::seed_demo_data(&storage).await?;
        println!("seeded demo catalog into {}", config.db_url);
        return Ok(());
    }

    let services = AppServices::new_sqlite(&config, Clock::default_clock())
        .await
        .context("Failed to initialize services")?;
    let user = services
        .session_user(args.user)
        .await
        .context("Failed to resolve user")?;

    run(&services, user, args.command).await
}

async fn run(services: &AppServices, user: Option<UserId>, command: Command) -> Result<()> {
    match command {
        Command::Courses => {
            for course in services.catalog().list_courses().await? {
                println!(
                    "{}\t{}\tpass {}%\t{} chapters",
                    course.id(),
                    course.title(),
                    course.passing_score(),
                    course.chapter_count()
                );
            }
        }
        Command::MyCourses => {
            for entry in services.catalog().my_courses(user).await? {
                println!(
                    "{}\t{}\t{}%",
                    entry.course.id(),
                    entry.course.title(),
                    entry.progress.progress()
                );
            }
        }
        Command::Progress { course, force } => {
            let progress = services.progress();
            let options = FetchOptions {
                force_refresh: force,
            };
            match progress.get_progress(user, course, options).await {
                Ok(value) => print_progress(course, &value),
                Err(ProgressError::Transport(err)) => {
                    let stale = match user {
                        Some(user) => progress.last_known(user, course).await,
                        None => None,
                    };
                    let Some(value) = stale else {
                        return Err(err).context("Failed to fetch progress");
                    };
                    warn!(error = %err, "showing last known progress");
                    print_progress(course, &value);
                }
                Err(other) => return Err(other.into()),
            }
        }
        Command::Enroll { course } => {
            if !services.progress().enroll(user, Some(course)).await? {
                bail!("no user given; pass --user");
            }
            println!("enrolled in course {course}");
        }
        Command::Submit {
            course,
            chapter,
            answers,
        } => {
            let scope = chapter.map_or(TestScope::Course, TestScope::Chapter);
            let answers: AnswerMap = answers.into_iter().collect();
            let submission = services
                .tests()
                .submit(user, course, scope, answers)
                .await?;
            let outcome = &submission.outcome;
            println!(
                "score {}% ({}/{} correct), {}: {}",
                outcome.score,
                outcome.correct,
                outcome.total,
                if outcome.passed { "passed" } else { "not passed" },
                outcome.feedback.message
            );
            if !submission.progress_synced {
                warn!(%course, "passed, but the course could not be marked complete yet");
            }
        }
        Command::Results { course } => {
            for result in services.tests().results(user, course).await? {
                let scope = result
                    .chapter_id
                    .map_or_else(|| "final".to_owned(), |c| format!("chapter {c}"));
                println!(
                    "{}\tcourse {}\t{scope}\t{}%\t{}",
                    format_datetime(result.taken_at),
                    result.course_id,
                    result.score,
                    if result.passed { "passed" } else { "failed" }
                );
            }
        }
        Command::Certificates => {
            for cert in services.tests().certificates(user).await? {
                println!(
                    "{}\t{}\t{}%\tissued {}",
                    cert.serial(),
                    cert.course_title,
                    cert.score,
                    format_datetime(cert.issued_at)
                );
            }
        }
        Command::Seed => bail!("seed runs before services are built"),
        Command::Watch {
            resource,
            events,
            simulate,
        } => watch(services, user, Resource::new(resource), events, simulate).await?,
    }
    Ok(())
}

async fn watch(
    services: &AppServices,
    user: Option<UserId>,
    resource: Resource,
    events: EventFilter,
    simulate: bool,
) -> Result<()> {
    let subscription = services
        .realtime()
        .subscribe(resource, events, user, |event| {
            println!("{}\t{}\t{}", event.kind, event.resource, event.record);
        })
        .await?;
    let mut status = subscription.status_changes();

    if simulate {
        for course in services.catalog().list_courses().await? {
            services.progress().enroll(user, Some(course.id())).await?;
        }
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to install Ctrl+C handler")?;
            info!("Received Ctrl+C, stopping");
        }
        _ = status.wait_for(|s| *s != SubscriptionStatus::Active) => {
            warn!(status = %subscription.status(), "subscription ended");
        }
    }
    subscription.unsubscribe();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_index_and_text_answers() {
        assert_eq!(parse_answer("0=2").unwrap(), (0, AnswerValue::Index(2)));
        assert_eq!(
            parse_answer(" 3 = borrow ").unwrap(),
            (3, AnswerValue::Text("borrow".into()))
        );
        assert!(parse_answer("x=1").is_err());
        assert!(parse_answer("12").is_err());
    }

    #[test]
    fn cli_accepts_submit_with_answers() {
        let args = Args::try_parse_from([
            "learn-sync",
            "submit",
            "--course",
            "1",
            "--answer",
            "0=1",
            "--answer",
            "1=0",
        ])
        .unwrap();
        let Command::Submit {
            course, answers, ..
        } = args.command
        else {
            panic!("expected submit");
        };
        assert_eq!(course, CourseId::new(1));
        assert_eq!(answers.len(), 2);
    }
}
