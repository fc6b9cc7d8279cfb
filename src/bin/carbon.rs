// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use carbon::{
    config::AppConfig,
    cron::{CronHost, CronTask, MinuteDisplay, MinutePreselection},
    path::default_config_file,
    runner::{Abort, ConsoleObserver, RunOptions, RunOutcome, Runner},
    session::{ExcludePattern, ScheduleKind, SessionSettings},
    store::{Session, SessionStore, StoreError},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use inquire::Confirm;
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::exit,
};
use tokio::{signal, sync::watch};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "carbon [options] <carbon-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file to use instead of the default.
    #[arg(long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let ctx = App::open(self.config)?;
        match self.command {
            Command::List(opts) => run_list(&ctx, opts),
            Command::New(opts) => run_new(&ctx, opts),
            Command::Edit(opts) => run_edit(&ctx, opts),
            Command::Show(opts) => run_show(&ctx, opts),
            Command::Rename(opts) => run_rename(&ctx, opts),
            Command::Remove(opts) => run_remove(&ctx, opts),
            Command::Exclude(opts) => run_exclude(&ctx, opts),
            Command::Schedule(opts) => run_schedule(&ctx, opts),
            Command::Describe(opts) => run_describe(opts),
            Command::Run(opts) => run_sessions(&ctx, opts).await,
            Command::Log(opts) => run_log(&ctx, opts),
            Command::Defaults(opts) => run_defaults(&ctx, opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List sessions in session store.
    #[command(override_usage = "carbon list [options]")]
    List(ListOptions),

    /// Create new session from defaults.
    #[command(override_usage = "carbon new [options] <session_name>")]
    New(NewOptions),

    /// Change settings of session.
    #[command(override_usage = "carbon edit [options] <session_name>")]
    Edit(EditOptions),

    /// Show settings of session.
    #[command(override_usage = "carbon show <session_name>")]
    Show(ShowOptions),

    /// Rename session.
    #[command(override_usage = "carbon rename <session_name> <new_name>")]
    Rename(RenameOptions),

    /// Remove session from session store.
    #[command(override_usage = "carbon remove [options] <session_name>...")]
    Remove(RemoveOptions),

    /// Manage exclude patterns of session.
    #[command(subcommand)]
    Exclude(ExcludeCommand),

    /// Set schedule of session.
    #[command(override_usage = "carbon schedule [options] <session_name> <kind> [<cron_schedule>]")]
    Schedule(ScheduleOptions),

    /// Explain cron schedule expression.
    #[command(override_usage = "carbon describe <cron_schedule>")]
    Describe(DescribeOptions),

    /// Run sessions through rsync wrapper.
    #[command(override_usage = "carbon run [options] <session_name>...")]
    Run(RunSessionOptions),

    /// Show output of last run of session.
    #[command(override_usage = "carbon log <session_name>")]
    Log(LogOptions),

    /// Show or change settings new sessions start from.
    #[command(override_usage = "carbon defaults [options]")]
    Defaults(DefaultsOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    /// List session names only.
    #[arg(short, long)]
    pub names: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct NewOptions {
    /// Name of session to create.
    #[arg(required = true, value_name = "session_name")]
    pub session_name: String,

    /// Source folder to synchronize from.
    #[arg(long, value_name = "path")]
    pub src: Option<String>,

    /// Destination folder to synchronize to.
    #[arg(long, value_name = "path")]
    pub dest: Option<String>,

    /// Set session setting by key, e.g., `checksum=true`.
    #[arg(short, long = "set", value_name = "key=value")]
    pub settings: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct EditOptions {
    /// Name of session to change.
    #[arg(required = true, value_name = "session_name")]
    pub session_name: String,

    /// Source folder to synchronize from.
    #[arg(long, value_name = "path")]
    pub src: Option<String>,

    /// Destination folder to synchronize to.
    #[arg(long, value_name = "path")]
    pub dest: Option<String>,

    /// Set session setting by key, e.g., `checksum=true`.
    #[arg(short, long = "set", value_name = "key=value")]
    pub settings: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ShowOptions {
    /// Name of session to show.
    #[arg(required = true, value_name = "session_name")]
    pub session_name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RenameOptions {
    #[arg(required = true, value_name = "session_name")]
    pub session_name: String,

    #[arg(required = true, value_name = "new_name")]
    pub new_name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// Names of sessions to remove from session store.
    #[arg(required = true, value_name = "session_name")]
    pub session_names: Vec<String>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum ExcludeCommand {
    /// List exclude patterns of session.
    #[command(override_usage = "carbon exclude list <session_name>")]
    List {
        #[arg(required = true, value_name = "session_name")]
        session_name: String,
    },

    /// Add exclude pattern to session.
    #[command(override_usage = "carbon exclude add [options] <session_name> <pattern>")]
    Add {
        #[arg(required = true, value_name = "session_name")]
        session_name: String,

        #[arg(required = true, value_name = "pattern")]
        pattern: String,

        /// Comment describing pattern.
        #[arg(short, long, value_name = "text", default_value = "")]
        comment: String,
    },

    /// Remove exclude pattern from session.
    #[command(override_usage = "carbon exclude remove <session_name> <pattern>")]
    Remove {
        #[arg(required = true, value_name = "session_name")]
        session_name: String,

        #[arg(required = true, value_name = "pattern")]
        pattern: String,
    },

    /// Show which paths under session source would be excluded.
    #[command(override_usage = "carbon exclude check <session_name> [<path>]...")]
    Check {
        #[arg(required = true, value_name = "session_name")]
        session_name: String,

        /// Paths to check, relative to session source.
        #[arg(value_name = "path")]
        paths: Vec<PathBuf>,
    },
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ScheduleOptions {
    /// Name of session to schedule.
    #[arg(required = true, value_name = "session_name")]
    pub session_name: String,

    /// Kind of schedule: none, daily, weekly, monthly, or cron.
    #[arg(required = true, value_name = "kind")]
    pub kind: ScheduleKind,

    /// Cron schedule expression used with the cron kind.
    #[arg(value_name = "cron_schedule")]
    pub expression: Option<String>,

    /// Replace minutes of cron schedule with preselection.
    #[arg(short, long, value_enum, value_name = "preselection")]
    pub minutes: Option<MinutesArg>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DescribeOptions {
    /// Cron schedule expression, e.g., `*/15 9-17 * * mon-fri`.
    #[arg(required = true, value_name = "cron_schedule")]
    pub expression: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunSessionOptions {
    /// Names of sessions to run in order.
    #[arg(group = "target", value_name = "session_name")]
    pub session_names: Vec<String>,

    /// Run every session in session store.
    #[arg(short, long, group = "target")]
    pub all: bool,

    /// Only show what would be transferred.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Echo all wrapper output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Continue with next session after failure without asking.
    #[arg(long, group = "failure")]
    pub keep_going: bool,

    /// Stop at first failure without asking.
    #[arg(long, group = "failure")]
    pub stop_on_failure: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct LogOptions {
    #[arg(required = true, value_name = "session_name")]
    pub session_name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DefaultsOptions {
    /// Set default setting by key, e.g., `checksum=true`.
    #[arg(short, long = "set", value_name = "key=value")]
    pub settings: Vec<String>,

    /// Add default exclude pattern.
    #[arg(short, long, value_name = "pattern")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MinutesArg {
    Clear,
    OnTheHour,
    Every15,
    Every30,
}

impl From<MinutesArg> for MinutePreselection {
    fn from(arg: MinutesArg) -> Self {
        match arg {
            MinutesArg::Clear => Self::Clear,
            MinutesArg::OnTheHour => Self::OnTheHour,
            MinutesArg::Every15 => Self::Every15,
            MinutesArg::Every30 => Self::Every30,
        }
    }
}

struct App {
    config: AppConfig,
    store: SessionStore,
}

impl App {
    fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path,
            None => default_config_file()?,
        };

        let config = match read_to_string(&path) {
            Ok(data) => data
                .parse::<AppConfig>()
                .with_context(|| format!("failed to parse {:?}", path.display()))?,
            Err(error) if error.kind() == ErrorKind::NotFound => AppConfig::default(),
            Err(error) => {
                return Err(error).with_context(|| format!("failed to read {:?}", path.display()))
            }
        };

        let store = SessionStore::open(config.session_dir()?, config.defaults_file()?)?;
        Ok(Self { config, store })
    }

    fn runner(&self) -> &Path {
        &self.config.binaries.runner
    }

    fn cron_host(&self) -> Result<CronHost> {
        Ok(CronHost::open_default(&self.config.binaries.crontab)?)
    }

    /// Bring crontab in line with session schedule.
    ///
    /// Unavailable crontab only disables scheduling, but an invalid schedule
    /// is still an error.
    fn sync_schedule(&self, session: &Session) -> Result<()> {
        session.scheduled_task(self.runner())?;
        match self.cron_host() {
            Ok(mut host) => self.store.apply_schedule(session, &mut host, self.runner())?,
            Err(error) if session.settings.schedule_expression().is_some() => {
                warn!("scheduling unavailable: {error:?}");
            }
            Err(_) => {}
        }

        Ok(())
    }

    fn unschedule(&self, name: &str) {
        let result = self
            .cron_host()
            .and_then(|mut host| Ok(self.store.remove_schedule(name, &mut host)?));
        if let Err(error) = result {
            warn!("failed to remove schedule of {name:?}: {error:?}");
        }
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}

fn apply_settings(settings: &mut SessionSettings, pairs: &[String]) -> Result<()> {
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got {pair:?}"))?;
        settings.set(key.trim(), value.trim())?;
    }
    settings.normalize();

    Ok(())
}

fn run_list(ctx: &App, opts: ListOptions) -> Result<()> {
    let sessions = ctx.store.sessions()?;
    if sessions.is_empty() {
        info!("no sessions in {:?}", ctx.store.dir().display());
        return Ok(());
    }

    for session in sessions {
        if opts.names {
            println!("{}", session.name());
            continue;
        }

        let last_run = match session.last_run() {
            Some(time) => time.format("%Y-%m-%d %H:%M").to_string(),
            None => "never".into(),
        };
        let running = if session.is_running() { "  (running)" } else { "" };
        println!(
            "{:<24} {:<16} {:<16} {}{running}",
            session.name(),
            session.kind_label(),
            last_run,
            session.schedule_description(),
        );
    }

    Ok(())
}

fn run_new(ctx: &App, opts: NewOptions) -> Result<()> {
    let mut session = ctx.store.new_session(&opts.session_name)?;
    if let Some(src) = opts.src {
        session.settings.src = src;
    }
    if let Some(dest) = opts.dest {
        session.settings.dest = dest;
    }
    apply_settings(&mut session.settings, &opts.settings)?;

    if !session.source_exists() {
        warn!("source {:?} does not exist", session.settings.src);
    }

    session.scheduled_task(ctx.runner())?;
    ctx.store.save(&mut session)?;
    ctx.sync_schedule(&session)?;

    Ok(())
}

fn run_edit(ctx: &App, opts: EditOptions) -> Result<()> {
    let mut session = ctx.store.open_session(&opts.session_name)?;
    let old_schedule = session.settings.schedule_expression();
    if let Some(src) = opts.src {
        session.settings.src = src;
    }
    if let Some(dest) = opts.dest {
        session.settings.dest = dest;
    }
    apply_settings(&mut session.settings, &opts.settings)?;

    session.scheduled_task(ctx.runner())?;
    ctx.store.save(&mut session)?;
    if session.settings.schedule_expression() != old_schedule {
        ctx.sync_schedule(&session)?;
    }

    Ok(())
}

fn run_show(ctx: &App, opts: ShowOptions) -> Result<()> {
    let session = ctx.store.open_session(&opts.session_name)?;
    print!("{}", session.settings);

    Ok(())
}

fn run_rename(ctx: &App, opts: RenameOptions) -> Result<()> {
    let mut session = ctx.store.open_session(&opts.session_name)?;
    let scheduled = session.settings.schedule_expression().is_some();
    ctx.store.rename(&mut session, &opts.new_name)?;

    if scheduled {
        ctx.unschedule(&opts.session_name);
        ctx.sync_schedule(&session)?;
    }

    Ok(())
}

fn run_remove(ctx: &App, opts: RemoveOptions) -> Result<()> {
    for name in opts.session_names {
        let session = ctx.store.open_session(&name)?;
        if session.is_running() {
            return Err(StoreError::Running { name }.into());
        }

        if !opts.yes {
            let confirmed = Confirm::new(&format!("Remove session {name:?}?"))
                .with_default(false)
                .prompt()?;
            if !confirmed {
                info!("keeping session {name:?}");
                continue;
            }
        }

        if session.settings.schedule_expression().is_some() {
            ctx.unschedule(&name);
        }
        ctx.store.erase(session)?;
    }

    Ok(())
}

fn run_exclude(ctx: &App, command: ExcludeCommand) -> Result<()> {
    match command {
        ExcludeCommand::List { session_name } => {
            let session = ctx.store.open_session(&session_name)?;
            for pattern in session.exclude.patterns() {
                println!("{pattern}");
            }
        }
        ExcludeCommand::Add {
            session_name,
            pattern,
            comment,
        } => {
            let mut session = ctx.store.open_session(&session_name)?;
            if !session.exclude.add(ExcludePattern::new(pattern.as_str(), comment)) {
                info!("pattern {pattern:?} already excluded");
                return Ok(());
            }
            session.exclude.save()?;
        }
        ExcludeCommand::Remove {
            session_name,
            pattern,
        } => {
            let mut session = ctx.store.open_session(&session_name)?;
            if !session.exclude.remove(&pattern) {
                bail!("session {session_name:?} does not exclude {pattern:?}");
            }
            session.exclude.save()?;
        }
        ExcludeCommand::Check {
            session_name,
            paths,
        } => {
            let session = ctx.store.open_session(&session_name)?;
            let root = session.settings.source_path();
            if paths.is_empty() {
                for path in session.exclude.preview(&root)? {
                    println!("{}", path.display());
                }
                return Ok(());
            }

            for path in paths {
                let full = root.join(&path);
                let state = if session.exclude.is_excluded(&root, &full)? {
                    "excluded"
                } else {
                    "included"
                };
                println!("{state}  {}", path.display());
            }
        }
    }

    Ok(())
}

fn run_schedule(ctx: &App, opts: ScheduleOptions) -> Result<()> {
    let mut session = ctx.store.open_session(&opts.session_name)?;
    session.settings.schedule = opts.kind;

    if opts.kind == ScheduleKind::Cron {
        let expression = match opts.expression {
            Some(expression) => expression,
            None if !session.settings.cron_schedule.is_empty() => {
                session.settings.cron_schedule.clone()
            }
            None => bail!("cron schedule requires a schedule expression"),
        };

        let mut task = CronTask::default();
        task.set_schedule(&expression)?;
        if let Some(minutes) = opts.minutes {
            MinutePreselection::from(minutes).apply(&mut task.minute);
        }
        task.validate()?;
        session.settings.cron_schedule = task.schedule();
    } else if opts.expression.is_some() || opts.minutes.is_some() {
        bail!("only cron schedules take an expression");
    }

    session.scheduled_task(ctx.runner())?;
    ctx.store.save(&mut session)?;
    let mut host = ctx.cron_host()?;
    ctx.store.apply_schedule(&session, &mut host, ctx.runner())?;
    info!(
        "session {:?}: {}",
        session.name(),
        session.schedule_description()
    );

    Ok(())
}

fn run_describe(opts: DescribeOptions) -> Result<()> {
    let mut task = CronTask::default();
    task.set_schedule(&opts.expression)?;

    println!("{}", task.describe());
    if task.reboot {
        return Ok(());
    }

    let display = match MinuteDisplay::for_minutes(&task.minute) {
        MinuteDisplay::Reduced => "reduced",
        MinuteDisplay::Expanded => "expanded",
    };
    println!(
        "schedule: {}  minutes: {} ({display})",
        task.schedule(),
        MinutePreselection::for_minutes(&task.minute)
    );

    if let Err(error) = task.validate() {
        warn!("{error}");
    }

    Ok(())
}

async fn run_sessions(ctx: &App, opts: RunSessionOptions) -> Result<()> {
    let sessions = if opts.all {
        ctx.store.sessions()?
    } else if opts.session_names.is_empty() {
        bail!("no sessions to run, name some or pass --all");
    } else {
        opts.session_names
            .iter()
            .map(|name| ctx.store.open_session(name))
            .collect::<Result<Vec<_>, _>>()?
    };

    for session in &sessions {
        if session.is_running() {
            warn!("session {:?} appears to be running already", session.name());
        }
    }

    let failure_answer = match (opts.keep_going, opts.stop_on_failure) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let mut observer = ConsoleObserver::new(sessions.len())?
        .with_verbose(opts.verbose)
        .with_failure_answer(failure_answer);

    let (abort_tx, abort_rx) = watch::channel(None);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("stopping after current session, interrupt again to abort now");
        let _ = abort_tx.send(Some(Abort::AfterCurrent));

        if signal::ctrl_c().await.is_err() {
            return;
        }
        let _ = abort_tx.send(Some(Abort::Now));
    });

    let runner = Runner::new(RunOptions {
        runner: ctx.runner().into(),
        dry_run: opts.dry_run,
    });
    let outcome = runner.run(&sessions, &mut observer, abort_rx).await;
    observer.finish();

    match outcome? {
        RunOutcome::Finished { failures } if failures.is_empty() => {
            info!("finished {} session(s)", sessions.len());
            Ok(())
        }
        RunOutcome::Finished { failures } => {
            bail!("{} session(s) failed", failures.len())
        }
        RunOutcome::Stopped {
            failures,
            remaining,
        } => {
            warn!("skipped session(s): {}", remaining.join(", "));
            if failures.is_empty() {
                return Ok(());
            }
            bail!("{} session(s) failed", failures.len())
        }
        RunOutcome::Cancelled { session, .. } => bail!("session {session:?} cancelled"),
    }
}

fn run_log(ctx: &App, opts: LogOptions) -> Result<()> {
    let session = ctx.store.open_session(&opts.session_name)?;
    match session.read_log()? {
        Some(log) => print!("{log}"),
        None => info!("session {:?} has not run yet", session.name()),
    }

    Ok(())
}

fn run_defaults(ctx: &App, opts: DefaultsOptions) -> Result<()> {
    let (mut settings, mut exclude) = ctx.store.load_defaults()?;
    if !opts.settings.is_empty() || !opts.exclude.is_empty() {
        apply_settings(&mut settings, &opts.settings)?;
        for pattern in opts.exclude {
            exclude.add(ExcludePattern::new(pattern, ""));
        }
        ctx.store.save_defaults(&settings, &exclude)?;
    }

    print!("{settings}");
    for pattern in exclude.patterns() {
        println!("# exclude: {pattern}");
    }

    Ok(())
}
