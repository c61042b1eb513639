//! cuotiben - 错题图片复习命令行
//!
//! 数据目录由 `CUOTIBEN_DATA_DIR` 指定，可放在 `.env` 中。

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use cuotiben_algo::read_config;
use cuotiben_store::{
    logging, AppConfig, DeleteMode, DueFilter, ItemType, Session, StoreError, StoreResult,
    TrackedItem,
};

#[derive(Parser)]
#[command(name = "cuotiben")]
#[command(about = "Spaced-repetition review for photographed mistakes")]
#[command(version)]
struct Cli {
    /// Data directory (overrides CUOTIBEN_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage members
    #[command(subcommand)]
    Member(MemberCommand),
    /// Copy an image into the current member's storage
    Add { path: PathBuf },
    /// List all items of the current member
    List,
    /// Show items due for review
    Due {
        /// Include frozen items and answers
        #[arg(long)]
        all: bool,
    },
    /// Record a review
    Review(ReviewArgs),
    /// Pair a mistake with its answer
    Pair { a: String, b: String },
    /// Remove a pairing
    Unpair { a: String, b: String },
    /// Freeze an item so it leaves the review queue
    Freeze {
        id: String,
        /// Unfreeze instead
        #[arg(long)]
        off: bool,
    },
    /// Mark an item as mistake or answer
    SetType { id: String, item_type: ItemType },
    /// Delete an item and its image
    Delete {
        id: String,
        /// Also delete every item sharing its pair id
        #[arg(long)]
        cascade: bool,
    },
    /// Move the current member's storage to another directory
    Migrate { dir: PathBuf },
    /// Print collection statistics
    Stats,
    /// Inspect training configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Timed practice sessions
    #[command(subcommand)]
    Exam(ExamCommand),
}

#[derive(Subcommand)]
enum ExamCommand {
    /// Start an exam from the items currently due
    Start {
        /// Maximum number of items
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    List,
    Complete { id: String },
    Delete { id: String },
}

#[derive(Subcommand)]
enum MemberCommand {
    List,
    Create {
        name: String,
        /// Protect the member with a password
        #[arg(long, env = "CUOTIBEN_PASSWORD")]
        password: Option<String>,
    },
    Switch { name: String },
    /// Switch to a member, checking its password
    Login {
        name: String,
        #[arg(long, env = "CUOTIBEN_PASSWORD")]
        password: Option<String>,
    },
    /// Return to the default member
    Logout,
    Delete { name: String },
}

#[derive(Args)]
struct ReviewArgs {
    id: String,
    #[arg(long, conflicts_with = "fail", required_unless_present = "fail")]
    success: bool,
    #[arg(long)]
    fail: bool,
    /// Review date (RFC 3339 or YYYY-MM-DD), defaults to now
    #[arg(long)]
    date: Option<String>,
    /// Seconds spent answering
    #[arg(long)]
    answer_time: Option<u64>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the active training configuration
    Show,
    /// Validate a training configuration file
    Validate { file: PathBuf },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(dir) = cli.data_dir.clone() {
        config = AppConfig {
            training_config_path: dir.join("training-config.json"),
            data_dir: dir,
            ..config
        };
    }
    let _log_guard = logging::init_tracing(&config);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command, config: &AppConfig) -> StoreResult<()> {
    // 校验配置文件不需要打开数据目录
    if let Command::Config(ConfigCommand::Validate { file }) = &command {
        let parsed = read_config(file)?;
        println!("{} is valid (policy: {})", file.display(), parsed.policy.as_str());
        return Ok(());
    }

    let mut session = Session::open(config)?;
    match command {
        Command::Member(cmd) => run_member(cmd, &mut session)?,
        Command::Add { path } => {
            let id = session.members_mut().store_mut().import_file(&path)?;
            println!("{id}");
        }
        Command::List => {
            let store = session.members_mut().store_mut();
            store.validate_metadata()?;
            let mut items: Vec<&TrackedItem> = store.items().collect();
            items.sort_by(|a, b| a.upload_date.cmp(&b.upload_date));
            for item in items {
                print_item(item);
            }
        }
        Command::Due { all } => {
            let filter = if all {
                DueFilter {
                    include_frozen: true,
                    item_type: None,
                }
            } else {
                DueFilter::default()
            };
            for item in session.due_items(filter) {
                print_item(item);
            }
        }
        Command::Review(args) => {
            let answer_time = answer_time_ms(args.answer_time)?;
            let item = session.process_training(&args.id, args.success, args.date.as_deref(), answer_time)?;
            println!(
                "{} proficiency {} next {} (every {} days)",
                item.id,
                item.proficiency,
                item.next_training_date.format("%Y-%m-%d"),
                item.training_interval
            );
        }
        Command::Pair { a, b } => {
            let pair_id = session.members_mut().store_mut().pair(&a, &b)?;
            println!("{pair_id}");
        }
        Command::Unpair { a, b } => session.members_mut().store_mut().unpair(&a, &b)?,
        Command::Freeze { id, off } => {
            session.members_mut().store_mut().set_frozen(&id, !off)?;
        }
        Command::SetType { id, item_type } => {
            session.members_mut().store_mut().set_type(&id, item_type)?;
        }
        Command::Delete { id, cascade } => {
            let mode = if cascade { DeleteMode::Cascade } else { DeleteMode::Single };
            for deleted in session.members_mut().store_mut().delete_file(&id, mode)? {
                println!("deleted {deleted}");
            }
        }
        Command::Migrate { dir } => {
            let report = session.members_mut().migrate_current(dir)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                return Err(StoreError::Migration(format!(
                    "{} file(s) failed",
                    report.errors.len()
                )));
            }
        }
        Command::Stats => {
            let stats = session.members().store().stats(session.now());
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Config(ConfigCommand::Show) => {
            println!("{}", serde_json::to_string_pretty(session.engine().config())?);
        }
        Command::Config(ConfigCommand::Validate { .. }) => {}
        Command::Exam(cmd) => run_exam(cmd, &session)?,
    }
    Ok(())
}

fn run_exam(command: ExamCommand, session: &Session) -> StoreResult<()> {
    let exams = session.members().exam_manager()?;
    match command {
        ExamCommand::Start { limit } => {
            let due = session.due_items(DueFilter::default());
            let items: Vec<&TrackedItem> = due.into_iter().take(limit).collect();
            let exam = exams.create_exam(&items, session.members().store().base_dir())?;
            println!("{} ({} items, {}s)", exam.id, exam.items.len(), exam.total_time);
        }
        ExamCommand::List => {
            for exam in exams.list_exams()? {
                println!(
                    "{}\t{:?}\t{}\t{} items",
                    exam.id,
                    exam.status,
                    exam.start_time.format("%Y-%m-%d %H:%M"),
                    exam.items.len()
                );
            }
        }
        ExamCommand::Complete { id } => {
            exams.complete_exam(&id)?;
        }
        ExamCommand::Delete { id } => exams.delete_exam(&id)?,
    }
    Ok(())
}

fn run_member(command: MemberCommand, session: &mut Session) -> StoreResult<()> {
    let members = session.members_mut();
    match command {
        MemberCommand::List => {
            let current = members.current().to_string();
            for info in members.list() {
                let marker = if info.name == current { "*" } else { " " };
                let lock = if info.is_protected() { " [locked]" } else { "" };
                println!("{marker} {}\t{}{lock}", info.name, info.base_dir.display());
            }
        }
        MemberCommand::Create { name, password } => {
            let info = match password {
                Some(password) => members.create_with_password(&name, &password)?,
                None => members.create(&name)?,
            };
            println!("created {} at {}", info.name, info.base_dir.display());
        }
        MemberCommand::Switch { name } => members.switch(&name)?,
        MemberCommand::Login { name, password } => members.login(&name, password.as_deref())?,
        MemberCommand::Logout => members.logout()?,
        MemberCommand::Delete { name } => members.delete(&name)?,
    }
    Ok(())
}

/// 命令行按秒输入，训练记录按毫秒保存
fn answer_time_ms(seconds: Option<u64>) -> StoreResult<Option<u64>> {
    seconds
        .map(|s| {
            s.checked_mul(1000)
                .ok_or_else(|| StoreError::Validation(format!("answer time {s}s is too large")))
        })
        .transpose()
}

fn print_item(item: &TrackedItem) {
    let frozen = if item.is_frozen { " [frozen]" } else { "" };
    println!(
        "{}\t{}\t{}\tp={}\tnext={}{}",
        item.id,
        item.item_type.as_str(),
        item.relative_path,
        item.proficiency,
        item.next_training_date.format("%Y-%m-%d"),
        frozen
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_time_converted_to_millis() {
        assert_eq!(answer_time_ms(None).unwrap(), None);
        assert_eq!(answer_time_ms(Some(42)).unwrap(), Some(42_000));
        assert!(matches!(answer_time_ms(Some(u64::MAX)), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_review_args_parse_seconds() {
        let cli = Cli::try_parse_from(["cuotiben", "review", "abc", "--success", "--answer-time", "90"]).unwrap();
        let Command::Review(args) = cli.command else {
            panic!("expected review command");
        };
        assert_eq!(answer_time_ms(args.answer_time).unwrap(), Some(90_000));
    }
}
