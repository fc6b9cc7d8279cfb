// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use carbon::{
    cron::{AccessFiles, CronHost, FileBackend},
    runner::{
        Abort, ExitCode, Failure, Progress, RunObserver, RunOptions, RunOutcome, Runner,
        RunnerState,
    },
    session::ScheduleKind,
    store::{Session, SessionStore},
};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    env::current_dir,
    fs::{read_to_string, set_permissions, write, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::{runtime::Runtime, sync::watch, time::sleep};

pub(crate) struct StoreFixture {
    root: PathBuf,
    store: SessionStore,
}

impl StoreFixture {
    pub(crate) fn new() -> Result<Self> {
        let root = current_dir()?;
        let store = SessionStore::open(root.join("sessions"), root.join("default.carbon"))?;
        Ok(Self { root, store })
    }

    pub(crate) fn session(&self, name: &str) -> Result<Session> {
        let mut session = self.store.new_session(name)?;
        session.settings.src = self.root.join("source").to_string_lossy().into_owned();
        session.settings.dest = self.root.join("dest").to_string_lossy().into_owned();
        self.store.save(&mut session)?;
        Ok(session)
    }

    /// Write shell script standing in for the rsync wrapper.
    pub(crate) fn wrapper(&self, script: &str) -> Result<PathBuf> {
        let path = self.root.join("wrapper.sh");
        write(&path, script)?;
        set_permissions(&path, Permissions::from_mode(0o755))?;
        Ok(path)
    }

    pub(crate) fn runner(&self, wrapper: &Path, dry_run: bool) -> Runner {
        Runner::new(RunOptions {
            runner: wrapper.into(),
            dry_run,
        })
    }
}

#[derive(Default)]
struct Recorder {
    started: Vec<String>,
    updates: Vec<Progress>,
    finished: Vec<(String, ExitCode)>,
    stderr: Vec<String>,
    questions: usize,
    answer: bool,
    abort: Option<(watch::Sender<Option<Abort>>, Abort)>,
}

impl Recorder {
    fn answering(answer: bool) -> Self {
        Self {
            answer,
            ..Default::default()
        }
    }

    fn aborting(sender: watch::Sender<Option<Abort>>, abort: Abort) -> Self {
        Self {
            abort: Some((sender, abort)),
            ..Default::default()
        }
    }

    fn fire_abort(&mut self) {
        if let Some((sender, abort)) = self.abort.take() {
            let _ = sender.send(Some(abort));
            // Keep the channel open after sending.
            self.abort = Some((sender, abort));
        }
    }
}

impl RunObserver for Recorder {
    fn session_started(&mut self, session: &Session, _index: usize, _state: &RunnerState) {
        self.started.push(session.name().into());
        if matches!(self.abort, Some((_, Abort::AfterCurrent))) {
            self.fire_abort();
        }
    }

    fn progress(&mut self, update: &Progress, _state: &RunnerState) {
        self.updates.push(update.clone());
        if matches!(self.abort, Some((_, Abort::Now))) && matches!(update, Progress::Status(_)) {
            self.fire_abort();
        }
    }

    fn output(&mut self, stream: carbon::runner::OutputStream, line: &str) {
        if stream == carbon::runner::OutputStream::Stderr {
            self.stderr.push(line.into());
        }
    }

    fn session_finished(&mut self, session: &Session, exit: ExitCode, _state: &RunnerState) {
        self.finished.push((session.name().into(), exit));
    }

    fn continue_after_failure(
        &mut self,
        _session: &Session,
        _exit: ExitCode,
        _state: &RunnerState,
    ) -> bool {
        self.questions += 1;
        self.answer
    }
}

fn no_abort() -> watch::Receiver<Option<Abort>> {
    let (_, receiver) = watch::channel(None);
    receiver
}

#[sealed_test]
fn run_session_reports_progress_and_writes_log() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let session = fixture.session("alpha")?;
    let wrapper = fixture.wrapper(indoc! {r#"
        #!/bin/sh
        echo "42 files..."
        echo "CARBON: Synchronising"
        printf '  512  42%%  1.00kB/s  0:00:01 (xfr#1, to-check=3/10)\r'
        printf '  1024 100%%  1.00kB/s  0:00:01 (xfr#2, to-check=0/10)\n'
        echo "parent=$CARBON_GUI_PARENT flag=$2"
        echo "rsync: vanished file" >&2
        exit 24
    "#})?;

    let mut recorder = Recorder::answering(true);
    let outcome = Runtime::new()?.block_on(fixture.runner(&wrapper, true).run(
        std::slice::from_ref(&session),
        &mut recorder,
        no_abort(),
    ))?;

    assert_eq!(
        outcome,
        RunOutcome::Finished {
            failures: vec![Failure {
                session: "alpha".into(),
                exit: ExitCode::Vanished,
            }],
        }
    );
    assert_eq!(recorder.started, vec!["alpha".to_string()]);
    assert_eq!(recorder.finished, vec![("alpha".to_string(), ExitCode::Vanished)]);
    assert_eq!(recorder.questions, 0);
    assert_eq!(recorder.stderr, vec!["rsync: vanished file".to_string()]);

    assert!(recorder.updates.contains(&Progress::FilesFound(42)));
    assert!(recorder.updates.contains(&Progress::Status("Synchronising".into())));
    assert!(recorder.updates.contains(&Progress::File(42)));
    assert!(recorder.updates.contains(&Progress::Session {
        session: 700,
        overall: 700
    }));
    assert_eq!(
        recorder.updates.last(),
        Some(&Progress::Session {
            session: 1000,
            overall: 1000
        })
    );

    let log = session.read_log()?.unwrap_or_default();
    assert!(log.contains("Synchronising\n"));
    assert!(!log.contains("CARBON"));
    assert!(log.contains("parent=true flag=-d\n"));
    assert!(log.contains("rsync: vanished file\n"));
    assert!(session.last_run().is_some());

    Ok(())
}

#[sealed_test]
fn failed_session_stops_run_when_declined() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let sessions = vec![fixture.session("alpha")?, fixture.session("beta")?];
    let wrapper = fixture.wrapper(indoc! {r#"
        #!/bin/sh
        case "$1" in
            *alpha.carbon) echo "CARBON_ERROR: Source does not exist."; exit 112 ;;
        esac
        exit 0
    "#})?;

    let mut recorder = Recorder::answering(false);
    let outcome = Runtime::new()?.block_on(fixture.runner(&wrapper, false).run(
        &sessions,
        &mut recorder,
        no_abort(),
    ))?;

    assert_eq!(
        outcome,
        RunOutcome::Stopped {
            failures: vec![Failure {
                session: "alpha".into(),
                exit: ExitCode::SourceMissing,
            }],
            remaining: vec!["beta".into()],
        }
    );
    assert_eq!(recorder.questions, 1);
    assert_eq!(recorder.started, vec!["alpha".to_string()]);
    assert!(recorder
        .updates
        .contains(&Progress::ErrorStatus("Source does not exist.".into())));

    Ok(())
}

#[sealed_test]
fn failed_session_continues_when_accepted() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let sessions = vec![fixture.session("alpha")?, fixture.session("beta")?];
    let wrapper = fixture.wrapper(indoc! {r#"
        #!/bin/sh
        case "$1" in
            *alpha.carbon) exit 23 ;;
        esac
        exit 0
    "#})?;

    let mut recorder = Recorder::answering(true);
    let outcome = Runtime::new()?.block_on(fixture.runner(&wrapper, false).run(
        &sessions,
        &mut recorder,
        no_abort(),
    ))?;

    assert_eq!(
        outcome,
        RunOutcome::Finished {
            failures: vec![Failure {
                session: "alpha".into(),
                exit: ExitCode::PartialTransfer,
            }],
        }
    );
    assert_eq!(
        recorder.finished,
        vec![
            ("alpha".to_string(), ExitCode::PartialTransfer),
            ("beta".to_string(), ExitCode::Success),
        ]
    );
    assert_eq!(
        recorder.updates.last(),
        Some(&Progress::Session {
            session: 1000,
            overall: 2000
        })
    );

    Ok(())
}

#[sealed_test]
fn abort_now_terminates_wrapper_and_removes_lock() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let sessions = vec![fixture.session("alpha")?, fixture.session("beta")?];
    write(sessions[0].files().lock(), "")?;
    let wrapper = fixture.wrapper(indoc! {r#"
        #!/bin/sh
        echo "CARBON: Waiting"
        sleep 30
        exit 0
    "#})?;

    let (sender, receiver) = watch::channel(None);
    let mut recorder = Recorder::aborting(sender, Abort::Now);
    let outcome = Runtime::new()?.block_on(fixture.runner(&wrapper, false).run(
        &sessions,
        &mut recorder,
        receiver,
    ))?;

    assert_eq!(
        outcome,
        RunOutcome::Cancelled {
            session: "alpha".into(),
            failures: Vec::new(),
            remaining: vec!["beta".into()],
        }
    );
    assert!(!sessions[0].is_running());
    assert!(recorder.finished.is_empty());

    Ok(())
}

#[sealed_test]
fn abort_now_reaches_wrapper_after_output_closes() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let sessions = vec![fixture.session("alpha")?];
    let wrapper = fixture.wrapper(indoc! {r#"
        #!/bin/sh
        echo "CARBON: Closing output"
        exec >/dev/null 2>&1
        sleep 30
        exit 0
    "#})?;

    let (sender, receiver) = watch::channel(None);
    let mut recorder = Recorder::answering(false);
    let started = Instant::now();
    let outcome = Runtime::new()?.block_on(async {
        let runner = fixture.runner(&wrapper, false);
        let run = runner.run(&sessions, &mut recorder, receiver);
        let trigger = async {
            sleep(Duration::from_millis(300)).await;
            let _ = sender.send(Some(Abort::Now));
        };
        let (outcome, ()) = tokio::join!(run, trigger);
        outcome
    })?;

    assert_eq!(
        outcome,
        RunOutcome::Cancelled {
            session: "alpha".into(),
            failures: Vec::new(),
            remaining: Vec::new(),
        }
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(recorder.finished.is_empty());

    Ok(())
}

#[sealed_test]
fn abort_after_current_finishes_running_session() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let sessions = vec![fixture.session("alpha")?, fixture.session("beta")?];
    let wrapper = fixture.wrapper(indoc! {r#"
        #!/bin/sh
        echo "CARBON: Working"
        exit 0
    "#})?;

    let (sender, receiver) = watch::channel(None);
    let mut recorder = Recorder::aborting(sender, Abort::AfterCurrent);
    let outcome = Runtime::new()?.block_on(fixture.runner(&wrapper, false).run(
        &sessions,
        &mut recorder,
        receiver,
    ))?;

    assert_eq!(
        outcome,
        RunOutcome::Stopped {
            failures: Vec::new(),
            remaining: vec!["beta".into()],
        }
    );
    assert_eq!(recorder.finished, vec![("alpha".to_string(), ExitCode::Success)]);

    Ok(())
}

#[sealed_test]
fn missing_wrapper_is_spawn_error() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let session = fixture.session("alpha")?;
    let runner = fixture.runner(Path::new("./does-not-exist"), false);

    let mut recorder = Recorder::default();
    let result = Runtime::new()?.block_on(runner.run(
        std::slice::from_ref(&session),
        &mut recorder,
        no_abort(),
    ));

    assert!(matches!(
        result,
        Err(carbon::runner::RunnerError::Spawn { .. })
    ));

    Ok(())
}

#[sealed_test]
fn schedule_round_trip_through_crontab_file() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let crontab = fixture.root.join("crontab");
    let passwd = fixture.root.join("passwd");
    write(&passwd, "alice:x:1000:1000::/home/alice:/bin/sh\n")?;
    write(
        &crontab,
        indoc! {"
            #nightly
            30 2 * * *\tbackup.sh
        "},
    )?;
    let access = AccessFiles {
        passwd,
        allow: fixture.root.join("cron.allow"),
        deny: fixture.root.join("cron.deny"),
    };
    let runner = Path::new("/usr/bin/carbon_runner");

    let mut session = fixture.session("alpha")?;
    session.settings.schedule = ScheduleKind::Daily;
    fixture.store.save(&mut session)?;

    let mut host = CronHost::open_as(FileBackend::new(&crontab), &access, 1000)?;
    assert_eq!(host.current_user(), "alice");
    fixture.store.apply_schedule(&session, &mut host, runner)?;
    fixture.store.apply_schedule(&session, &mut host, runner)?;

    let text = read_to_string(&crontab)?;
    let command = format!(
        "0 0 * * *\t'/usr/bin/carbon_runner' '{}'",
        session.files().settings().display()
    );
    assert!(text.contains("#carbon session alpha\n"));
    assert!(text.contains(&command));
    assert_eq!(text.matches("carbon session alpha").count(), 1);
    assert!(text.contains("30 2 * * *\tbackup.sh\n"));

    let mut host = CronHost::open_as(FileBackend::new(&crontab), &access, 1000)?;
    fixture.store.remove_schedule(session.name(), &mut host)?;
    let text = read_to_string(&crontab)?;
    assert!(!text.contains("carbon session alpha"));
    assert!(text.contains("#nightly\n30 2 * * *\tbackup.sh\n"));

    Ok(())
}

#[sealed_test]
fn blocked_user_cannot_schedule() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let passwd = fixture.root.join("passwd");
    let deny = fixture.root.join("cron.deny");
    write(&passwd, "alice:x:1000:1000::/home/alice:/bin/sh\n")?;
    write(&deny, "alice\n")?;
    let access = AccessFiles {
        passwd,
        allow: fixture.root.join("cron.allow"),
        deny,
    };

    let result = CronHost::open_as(FileBackend::new(fixture.root.join("crontab")), &access, 1000);
    assert!(matches!(
        result,
        Err(carbon::cron::CronError::Blocked { user }) if user == "alice"
    ));

    Ok(())
}

#[sealed_test]
fn clamped_settings_survive_reload() -> Result<()> {
    let fixture = StoreFixture::new()?;
    let session = fixture.session("alpha")?;
    let path = session.files().settings();
    let content = read_to_string(&path)?.replace("maxBackupAge=7", "maxBackupAge=999");
    write(&path, content)?;

    let mut session = fixture.store.open_session("alpha")?;
    assert_eq!(session.settings.max_backup_age, 365);
    fixture.store.save(&mut session)?;

    let session = fixture.store.open_session("alpha")?;
    assert_eq!(session.settings.max_backup_age, 365);
    assert!(read_to_string(&path)?.contains("maxBackupAge=365\n"));

    Ok(())
}

fn carbon_cli(root: &Path, args: &[&str]) -> Result<std::process::Output> {
    let config = root.join("carbon.toml");
    write(
        &config,
        format!(
            indoc! {r#"
                [binaries]
                runner = "{root}/wrapper.sh"
                crontab = "{root}/no-crontab"

                [paths]
                sessions = "{root}/sessions"
                defaults = "{root}/default.carbon"
            "#},
            root = root.display()
        ),
    )?;

    let output = std::process::Command::new(env!("CARGO_BIN_EXE_carbon"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .output()?;
    Ok(output)
}

#[sealed_test]
fn rejected_schedule_edit_leaves_session_file_alone() -> Result<()> {
    let root = current_dir()?;
    let output = carbon_cli(&root, &["new", "docs", "--src", "/tmp"])?;
    assert!(output.status.success());

    let settings = root.join("sessions/docs.carbon");
    let before = read_to_string(&settings)?;

    let output = carbon_cli(
        &root,
        &["edit", "docs", "-s", "scheduleType=4", "-s", "cronStr=garbage"],
    )?;
    assert!(!output.status.success());
    assert_eq!(read_to_string(&settings)?, before);

    let output = carbon_cli(
        &root,
        &["new", "music", "-s", "scheduleType=4", "-s", "cronStr=61 * * * *"],
    )?;
    assert!(!output.status.success());
    assert!(!root.join("sessions/music.carbon").exists());

    Ok(())
}
