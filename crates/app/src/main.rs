use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use quiz_core::model::{AreaKey, SessionMode, SubjectKey, Tier, UserId};
use services::{Clock, QuizConfig, QuizServices, QuizSettings, StaticIdentity};
use storage::question_bank::InMemoryQuestionBank;
use storage::sqlite::SqliteRepository;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt as log_fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod play;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidMode { raw: String },
    InvalidUser { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidMode { raw } => {
                write!(f, "invalid --mode value: {raw} (expected area, subject, mixed or smart)")
            }
            ArgsError::InvalidUser { raw } => write!(f, "invalid --user value: {raw:?}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz import --bank <file.json>                [--db <sqlite_url>]");
    eprintln!("  quiz play   --area <area> [--subject <s>]");
    eprintln!("              [--mode area|subject|mixed|smart] [--premium] [--no-shuffle]");
    eprintln!("              [--db <sqlite_url>] [--user <id>]");
    eprintln!("  quiz stats  [--area <area>]                   [--db <sqlite_url>] [--user <id>]");
    eprintln!();
    eprintln!("While playing: type a letter to answer, p to pause/resume, q to save and quit.");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:quiz.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_USER, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeArg {
    Area,
    Subject,
    Mixed,
    Smart,
}

impl ModeArg {
    fn parse(raw: &str) -> Result<Self, ArgsError> {
        match raw {
            "area" => Ok(Self::Area),
            "subject" => Ok(Self::Subject),
            "mixed" => Ok(Self::Mixed),
            "smart" => Ok(Self::Smart),
            _ => Err(ArgsError::InvalidMode { raw: raw.into() }),
        }
    }
}

#[derive(Debug)]
struct PlayArgs {
    area: Option<AreaKey>,
    subject: Option<SubjectKey>,
    mode: Option<ModeArg>,
    premium: bool,
    shuffle: bool,
}

impl PlayArgs {
    fn session_mode(&self) -> Result<SessionMode, ArgsError> {
        let mode = self.mode.unwrap_or(if self.subject.is_some() {
            ModeArg::Subject
        } else {
            ModeArg::Area
        });
        let area = || self.area.clone().ok_or(ArgsError::MissingFlag { flag: "--area" });

        match mode {
            ModeArg::Area => Ok(SessionMode::ByArea { area: area()? }),
            ModeArg::Subject => Ok(SessionMode::BySubject {
                area: area()?,
                subject: self
                    .subject
                    .clone()
                    .ok_or(ArgsError::MissingFlag { flag: "--subject" })?,
            }),
            ModeArg::Mixed => Ok(SessionMode::Mixed {
                areas: self.area.iter().cloned().collect(),
            }),
            ModeArg::Smart => Ok(SessionMode::Smart { area: area()? }),
        }
    }

    fn tier(&self) -> Tier {
        if self.premium { Tier::Premium } else { Tier::Free }
    }
}

#[derive(Debug)]
enum Command {
    Import { bank: PathBuf },
    Play(PlayArgs),
    Stats { area: Option<AreaKey> },
}

struct Args {
    db_url: String,
    user: Option<UserId>,
    command: Command,
}

impl Args {
    fn parse(mut argv: impl Iterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let Some(name) = argv.next() else {
            return Ok(None);
        };
        if matches!(name.as_str(), "--help" | "-h" | "help") {
            return Ok(None);
        }

        let mut db_url = std::env::var("QUIZ_DB_URL")
            .ok()
            .map_or_else(|| normalize_sqlite_url("sqlite:quiz.sqlite3".into()), normalize_sqlite_url);
        let mut user = std::env::var("QUIZ_USER")
            .ok()
            .and_then(|raw| raw.parse::<UserId>().ok());

        let mut bank: Option<PathBuf> = None;
        let mut play = PlayArgs {
            area: None,
            subject: None,
            mode: None,
            premium: false,
            shuffle: true,
        };

        while let Some(arg) = argv.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut argv, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(&mut argv, "--user")?;
                    user = Some(
                        value
                            .parse()
                            .map_err(|_| ArgsError::InvalidUser { raw: value.clone() })?,
                    );
                }
                "--bank" if name == "import" => {
                    bank = Some(PathBuf::from(require_value(&mut argv, "--bank")?));
                }
                "--area" if name != "import" => {
                    play.area = Some(AreaKey::new(require_value(&mut argv, "--area")?));
                }
                "--subject" if name == "play" => {
                    play.subject = Some(SubjectKey::new(require_value(&mut argv, "--subject")?));
                }
                "--mode" if name == "play" => {
                    play.mode = Some(ModeArg::parse(&require_value(&mut argv, "--mode")?)?);
                }
                "--premium" if name == "play" => play.premium = true,
                "--no-shuffle" if name == "play" => play.shuffle = false,
                "--help" | "-h" => return Ok(None),
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        let command = match name.as_str() {
            "import" => Command::Import {
                bank: bank.ok_or(ArgsError::MissingFlag { flag: "--bank" })?,
            },
            "play" => {
                play.session_mode()?;
                Command::Play(play)
            }
            "stats" => Command::Stats { area: play.area },
            _ => return Err(ArgsError::UnknownArg(name)),
        };

        Ok(Some(Self {
            db_url,
            user,
            command,
        }))
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = log_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

async fn import_bank(db_url: &str, bank: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(bank)?;
    let questions = InMemoryQuestionBank::from_json_str(&raw)?.all()?;

    let repo = SqliteRepository::connect(db_url).await?;
    repo.migrate().await?;
    let stored = repo.upsert_questions(&questions).await?;
    info!(file = %bank.display(), stored, "question bank imported");
    println!("Imported {stored} questions from {}.", bank.display());
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let Some(args) = parsed else {
        print_usage();
        return Ok(());
    };

    // Open + migrate SQLite here so core/services stay storage-agnostic.
    prepare_sqlite_file(&args.db_url)?;

    if let Command::Import { bank } = &args.command {
        return import_bank(&args.db_url, bank).await;
    }

    let shuffle = match &args.command {
        Command::Play(play) => play.shuffle,
        _ => true,
    };
    let settings = QuizSettings::default()
        .with_utc_offset(*Local::now().offset())
        .with_shuffle(shuffle);
    let services = QuizServices::new_sqlite(
        &args.db_url,
        Clock::default_clock(),
        settings,
        Arc::new(StaticIdentity::new(args.user)),
    )
    .await?;

    match args.command {
        Command::Play(play) => {
            let config = QuizConfig::new(play.session_mode()?, play.tier());
            play::run_session(&services, config).await
        }
        Command::Stats { area } => play::print_stats(&services, area.as_ref()).await,
        Command::Import { .. } => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, ArgsError> {
        Args::parse(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn play_defaults_to_area_mode() {
        let args = parse(&["play", "--area", "matematica", "--db", "sqlite::memory:"])
            .unwrap()
            .unwrap();
        let Command::Play(play) = args.command else {
            panic!("expected play");
        };
        assert_eq!(
            play.session_mode().unwrap(),
            SessionMode::ByArea {
                area: AreaKey::new("matematica")
            }
        );
        assert_eq!(play.tier(), Tier::Free);
        assert!(play.shuffle);
    }

    #[test]
    fn subject_implies_subject_mode() {
        let args = parse(&[
            "play", "--area", "matematica", "--subject", "algebra", "--premium", "--no-shuffle",
        ])
        .unwrap()
        .unwrap();
        let Command::Play(play) = args.command else {
            panic!("expected play");
        };
        assert!(matches!(
            play.session_mode().unwrap(),
            SessionMode::BySubject { .. }
        ));
        assert_eq!(play.tier(), Tier::Premium);
        assert!(!play.shuffle);
    }

    #[test]
    fn area_mode_without_area_is_rejected() {
        assert!(matches!(
            parse(&["play"]),
            Err(ArgsError::MissingFlag { flag: "--area" })
        ));
        assert!(parse(&["play", "--mode", "mixed"]).is_ok());
    }

    #[test]
    fn import_requires_bank() {
        assert!(matches!(
            parse(&["import"]),
            Err(ArgsError::MissingFlag { flag: "--bank" })
        ));
        assert!(matches!(
            parse(&["import", "--area", "x"]),
            Err(ArgsError::UnknownArg(_))
        ));
    }

    #[test]
    fn sample_bank_is_valid() {
        let bank = InMemoryQuestionBank::from_json_str(include_str!("../assets/sample_bank.json"))
            .unwrap();
        assert_eq!(bank.all().unwrap().len(), 16);
    }

    #[test]
    fn sqlite_urls_are_absolute() {
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
        assert!(normalize_sqlite_url("sqlite:quiz.sqlite3".into()).starts_with("sqlite:///"));
    }
}
