//! `pilot`: drive a coding agent through a spec until its exit conditions pass.

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use pilot::authoring::{DraftOptions, PlanOptions, SpecAuthor};
use pilot::core::plan::DEFAULT_PLAN_STEP_COUNT;
use pilot::core::spec::Spec;
use pilot::core::types::Disposition;
use pilot::engine::{Engine, EngineOptions, RunReport};
use pilot::exit_codes;
use pilot::io::agent::CodexAgent;
use pilot::io::config::{DEFAULT_CONFIG_PATH, PilotConfig, load_config, write_config};
use pilot::io::git::Git;
use pilot::io::persistence::SessionStore;
use pilot::io::spec_file::load_spec;
use pilot::logging;
use pilot::operator::{ConsoleOperator, render_spec_summary};
use pilot::tools::default_registry;

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Autonomous spec-driven task execution controller"
)]
struct Cli {
    /// Controller config (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a spec from the start in a new session.
    Run {
        /// Spec file (YAML).
        spec: PathBuf,
        /// Skip the interactive plan approval.
        #[arg(long)]
        approve: bool,
        /// Work in a fresh git worktree branched off origin/main.
        #[arg(long)]
        worktree: bool,
    },
    /// Continue the active session.
    Resume,
    /// Show the active session and every stored session.
    Status,
    /// Check a spec file and print a summary.
    Validate {
        /// Spec file (YAML).
        spec: PathBuf,
    },
    /// List the registered recovery tools.
    Tools,
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(long)]
        force: bool,
    },
    /// Draft a spec with the agent and write it.
    CreateSpec {
        #[command(flatten)]
        draft: DraftArgs,
    },
    /// Explore the codebase, plan in detail and write a spec.
    Spec {
        #[command(flatten)]
        draft: DraftArgs,
        /// Number of steps to ask for.
        #[arg(long, default_value_t = DEFAULT_PLAN_STEP_COUNT)]
        steps: usize,
        /// Skip codebase exploration.
        #[arg(long)]
        no_explore: bool,
        /// Do not write a markdown plan under docs/plans.
        #[arg(long)]
        no_plan_file: bool,
        /// Run the new spec right away, skipping approval.
        #[arg(long)]
        run: bool,
    },
}

#[derive(Args)]
struct DraftArgs {
    /// Goal for the spec. Asked for when absent.
    prompt: Option<String>,
    /// Spec file to write (default: specs/<goal-slug>.yaml).
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Verification command (default: pytest -q).
    #[arg(short, long)]
    exit_condition: Option<String>,
    /// Verify with a Playwright check against this URL instead.
    #[arg(long, conflicts_with = "exit_condition")]
    playwright_url: Option<String>,
    /// Playwright assertions, separated by `;`.
    #[arg(long, requires = "playwright_url")]
    assertions: Option<String>,
    /// Working directories, separated by `,`.
    #[arg(long)]
    working_directory: Option<String>,
    /// Agent model.
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    max_retries: Option<u32>,
}

impl From<DraftArgs> for DraftOptions {
    fn from(args: DraftArgs) -> Self {
        Self {
            prompt: args.prompt,
            exit_condition: args.exit_condition,
            playwright_url: args.playwright_url,
            assertions: args.assertions,
            working_directory: args.working_directory,
            model: args.model,
            max_retries: args.max_retries,
            output: args.output,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            spec,
            approve,
            worktree,
        } => cmd_run(&cli.config, &spec, approve, worktree),
        Command::Resume => cmd_resume(&cli.config),
        Command::Status => cmd_status(&cli.config),
        Command::Validate { spec } => Ok(cmd_validate(&spec)),
        Command::Tools => cmd_tools(&cli.config),
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::CreateSpec { draft } => cmd_create_spec(&cli.config, &draft.into()),
        Command::Spec {
            draft,
            steps,
            no_explore,
            no_plan_file,
            run,
        } => {
            let plan = PlanOptions {
                step_count: steps,
                explore: !no_explore,
                plan_file: !no_plan_file,
                run,
                ..PlanOptions::default()
            };
            cmd_spec(&cli.config, &draft.into(), &plan)
        }
    }
}

fn cmd_run(config_path: &Path, spec_path: &Path, approve: bool, worktree: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let mut spec = load_spec(spec_path)?;
    if worktree {
        let git = Git::new(spec.context.working_directory());
        if !git.is_repo() {
            bail!(
                "--worktree requires a git repository at {}",
                git.workdir().display()
            );
        }
        let created = git.setup_worktree(&spec.goal)?;
        println!("Worktree: {}", created.path.display());
        println!("Branch:   {}", created.branch);
        spec.context.set_working_directory(created.path);
    }
    if approve {
        print!("{}", render_spec_summary(&spec));
    }

    let spec_path = spec_path
        .canonicalize()
        .with_context(|| format!("resolve {}", spec_path.display()))?;
    let options = EngineOptions {
        auto_approve: approve,
        spec_path: Some(spec_path),
        session_id: None,
    };
    let mut engine = build_engine(spec, config, options)?;
    let report = engine.run()?;
    Ok(print_report(&report))
}

fn cmd_resume(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let store = SessionStore::new(&config.sessions_dir);
    let Some(persisted) = store.load_active()? else {
        println!("No active session. Nothing to resume.");
        return Ok(exit_codes::INVALID);
    };
    if persisted.spec_path.is_empty() {
        bail!(
            "cannot resume {}: no spec path recorded",
            persisted.session_id
        );
    }
    let mut spec = load_spec(Path::new(&persisted.spec_path))?;
    if let Some(dir) = &persisted.working_directory {
        spec.context.set_working_directory(dir.clone());
    }
    info!(session_id = %persisted.session_id, state = %persisted.state, "resuming");

    let options = EngineOptions {
        auto_approve: false,
        spec_path: Some(PathBuf::from(&persisted.spec_path)),
        session_id: Some(persisted.session_id.clone()),
    };
    let mut engine = build_engine(spec, config, options)?;
    let report = engine.resume(&persisted)?;
    Ok(print_report(&report))
}

fn build_engine(
    spec: Spec,
    config: PilotConfig,
    options: EngineOptions,
) -> Result<Engine<CodexAgent, ConsoleOperator<std::io::StdinLock<'static>, std::io::Stdout>>> {
    let registry = default_registry(&config.agent_command);
    let agent = CodexAgent::new(config.agent_command.clone(), config.output_limit_bytes);
    Engine::new(
        spec,
        config,
        registry,
        agent,
        ConsoleOperator::stdio(),
        options,
    )
}

fn print_report(report: &RunReport) -> i32 {
    match report.disposition {
        Disposition::Finished => println!("\nAll done."),
        Disposition::Rejected => println!("\nSpec not approved. Exiting."),
        Disposition::Aborted => println!("\nAborted."),
        Disposition::Blocked => {
            println!("\nBlocked: resume with `pilot resume`.");
            if !report.last_error.is_empty() {
                println!("Last error: {}", report.last_error);
            }
        }
    }
    println!(
        "Final state: {} (session {}, step {}, retries {}, agent sessions {})",
        report.state,
        report.session_id,
        report.step_index,
        report.retry_count,
        report.sessions_run
    );
    exit_codes::for_disposition(report.disposition)
}

fn cmd_status(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let store = SessionStore::new(&config.sessions_dir);
    let sessions = store.list()?;
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(exit_codes::OK);
    }

    let active = store.active_session_id()?;
    match active.as_deref().and_then(|id| sessions.iter().find(|s| s.session_id == id)) {
        Some(state) => println!("Active session: {} ({})", state.session_id, state.state),
        None => println!("No active session."),
    }
    println!("Stored sessions: {}", sessions.len());
    for session in &sessions {
        let label = if active.as_deref() == Some(session.session_id.as_str()) {
            "active"
        } else if session.completed {
            "completed"
        } else {
            "in-progress"
        };
        println!(
            "- {} [{label}] state={} step={} retries={}",
            session.session_id,
            session.state,
            session.step_index + 1,
            session.retry_count
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(spec_path: &Path) -> i32 {
    match load_spec(spec_path) {
        Ok(spec) => {
            println!("Valid spec: {}", spec.goal);
            println!("  Version:     {}", spec.version);
            println!("  Steps:       {}", spec.steps.len());
            for step in &spec.steps {
                println!("    - [{}] {}", step.id, step.description);
            }
            println!("  Exit conds:  {}", spec.exit_conditions.len());
            println!("  Max retries: {}", spec.max_retries);
            exit_codes::OK
        }
        Err(err) => {
            eprintln!("Invalid spec: {err:#}");
            exit_codes::INVALID
        }
    }
}

fn cmd_tools(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let registry = default_registry(&config.agent_command);
    println!("Registered tools ({}):", registry.len());
    for tool in registry.tools() {
        println!("  - {}: {}", tool.name(), tool.description());
    }
    Ok(exit_codes::OK)
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
        return Ok(exit_codes::INVALID);
    }
    write_config(config_path, &PilotConfig::default())?;
    println!("Wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_create_spec(config_path: &Path, options: &DraftOptions) -> Result<i32> {
    let config = load_config(config_path)?;
    let agent = CodexAgent::new(config.agent_command.clone(), config.output_limit_bytes);
    let author = SpecAuthor::new(&agent, ConsoleOperator::stdio(), &config);
    Ok(match author.create_spec(options)? {
        Some(_) => exit_codes::OK,
        None => exit_codes::INVALID,
    })
}

fn cmd_spec(config_path: &Path, options: &DraftOptions, plan: &PlanOptions) -> Result<i32> {
    let config = load_config(config_path)?;
    let agent = CodexAgent::new(config.agent_command.clone(), config.output_limit_bytes);
    // The author holds the stdin lock until it returns.
    let authored =
        SpecAuthor::new(&agent, ConsoleOperator::stdio(), &config).plan_spec(options, plan)?;
    let Some(authored) = authored else {
        return Ok(exit_codes::INVALID);
    };
    if !authored.run_now {
        return Ok(exit_codes::OK);
    }
    println!("\nRunning: pilot run {} --approve\n", authored.spec_path.display());
    cmd_run(config_path, &authored.spec_path, true, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_flags() {
        let cli = Cli::parse_from(["pilot", "run", "spec.yaml", "--approve", "--worktree"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match cli.command {
            Command::Run {
                spec,
                approve,
                worktree,
            } => {
                assert_eq!(spec, PathBuf::from("spec.yaml"));
                assert!(approve);
                assert!(worktree);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_global_config_after_subcommand() {
        let cli = Cli::parse_from(["pilot", "status", "--config", "/etc/pilot.toml"]);
        assert_eq!(cli.config, PathBuf::from("/etc/pilot.toml"));
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn parse_rejects_run_without_spec() {
        assert!(Cli::try_parse_from(["pilot", "run"]).is_err());
    }

    #[test]
    fn parse_spec_command_flags() {
        let cli = Cli::parse_from([
            "pilot",
            "spec",
            "Add health endpoint",
            "-o",
            "specs/health.yaml",
            "--working-directory",
            "~/a,~/b",
            "--steps",
            "3",
            "--no-explore",
            "--run",
        ]);
        let Command::Spec {
            draft,
            steps,
            no_explore,
            no_plan_file,
            run,
        } = cli.command
        else {
            panic!("expected spec");
        };
        assert_eq!(steps, 3);
        assert!(no_explore && run && !no_plan_file);
        let options = DraftOptions::from(draft);
        assert_eq!(options.prompt.as_deref(), Some("Add health endpoint"));
        assert_eq!(options.output, Some(PathBuf::from("specs/health.yaml")));
        assert_eq!(options.working_directory.as_deref(), Some("~/a,~/b"));
        assert_eq!(options.max_retries, None);
    }

    #[test]
    fn parse_create_spec_rejects_assertions_without_url() {
        assert!(Cli::try_parse_from(["pilot", "create-spec", "--assertions", "loads"]).is_err());
        let cli = Cli::parse_from([
            "pilot",
            "create-spec",
            "--playwright-url",
            "http://localhost:3000",
            "--assertions",
            "Page loads;Has title",
            "--max-retries",
            "2",
        ]);
        let Command::CreateSpec { draft } = cli.command else {
            panic!("expected create-spec");
        };
        let options = DraftOptions::from(draft);
        assert_eq!(options.prompt, None);
        assert_eq!(options.max_retries, Some(2));
        assert_eq!(options.assertions.as_deref(), Some("Page loads;Has title"));
    }

    #[test]
    fn validate_reports_invalid_spec_exit_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("spec.yaml");
        std::fs::write(&path, "version: 2\ngoal: x\nsteps: []\nexit_conditions: []\n")
            .expect("write");
        assert_eq!(cmd_validate(&path), exit_codes::INVALID);
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".pilot/config.toml");
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::OK);
        assert_eq!(load_config(&path).expect("load"), PilotConfig::default());
        assert_eq!(cmd_init(&path, false).expect("init"), exit_codes::INVALID);
        assert_eq!(cmd_init(&path, true).expect("init"), exit_codes::OK);
    }
}
