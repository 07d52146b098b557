//! Runs one target's command list on a worker thread: the pool-member half
//! of the scheduler.  Unaware of the dependency graph; just execution,
//! output handling, and the `set` builtin.

use crate::makefile::{Command, TargetId};
use crate::work::Event;
use anyhow::Context;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// The process environment commands run under.  Mutated by the `set`
/// builtin and fanned out across the pool by the scheduler.
pub type Environment = HashMap<String, String>;

/// A command line ready to hand to the shell: automatic macros substituted
/// and inline-file markers replaced with temp paths.
struct PreparedCommand {
    cmdline: String,
    silent: bool,
    ignore_errors: bool,
}

struct TempFile {
    path: PathBuf,
    keep: bool,
}

/// One worker slot.  At most one executor in the pool streams its child
/// output straight to the console; the others buffer per command and flush
/// atomically so parallel output stays grouped.
pub struct CommandExecutor {
    slot: usize,
    environment: Environment,
    buffered: Arc<AtomicBool>,
    active: Option<TargetId>,
    temp_files: Vec<TempFile>,
}

impl CommandExecutor {
    pub fn new(slot: usize, environment: Environment) -> Self {
        CommandExecutor {
            slot,
            environment,
            buffered: Arc::new(AtomicBool::new(true)),
            active: None,
            temp_files: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn target(&self) -> Option<TargetId> {
        self.active
    }

    pub fn is_buffered(&self) -> bool {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Streaming election; a worker mid-target picks the change up at its
    /// next command boundary.
    pub fn set_buffered(&self, buffered: bool) {
        self.buffered.store(buffered, Ordering::Relaxed);
    }

    pub fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
    }

    /// Run a target's commands on a fresh worker thread.  Inline files are
    /// written out here so a failure surfaces before anything executes;
    /// completion arrives as an Event on the scheduler channel.
    pub fn start(
        &mut self,
        target: TargetId,
        commands: Vec<Command>,
        jobserver: &jobserver::Client,
        dry_run: bool,
        events: Sender<Event>,
    ) -> anyhow::Result<()> {
        assert!(self.active.is_none(), "executor already running a target");

        let mut prepared = Vec::with_capacity(commands.len());
        for command in commands {
            let mut cmdline = command.cmdline;
            for inline in command.inline_files {
                let path = temp_file_path();
                std::fs::write(&path, &inline.content)
                    .with_context(|| format!("cannot write inline file {}", path.display()))?;
                cmdline = cmdline.replacen("<<", &path.to_string_lossy(), 1);
                self.temp_files.push(TempFile {
                    path,
                    keep: inline.keep,
                });
            }
            prepared.push(PreparedCommand {
                cmdline,
                silent: command.silent,
                ignore_errors: command.ignore_errors,
            });
        }

        let slot = self.slot;
        let environment = self.environment.clone();
        let buffered = self.buffered.clone();
        let jobserver = jobserver.clone();
        std::thread::spawn(move || {
            run_target(slot, prepared, environment, buffered, jobserver, dry_run, events)
        });
        self.active = Some(target);
        Ok(())
    }

    /// Bookkeeping for a ChildFinished event: the slot is idle again.
    pub fn on_finished(&mut self) -> Option<TargetId> {
        self.active.take()
    }

    /// Remove the inline response files this slot created.  Failures are
    /// reported but don't fail the build.
    pub fn cleanup_temp_files(&mut self) {
        for temp_file in self.temp_files.drain(..) {
            if temp_file.keep {
                continue;
            }
            if let Err(err) = std::fs::remove_file(&temp_file.path) {
                eprintln!(
                    "nmk: cannot remove temporary file {}: {}",
                    temp_file.path.display(),
                    err
                );
            }
        }
    }
}

static TEMP_FILE_COUNT: AtomicUsize = AtomicUsize::new(0);

fn temp_file_path() -> PathBuf {
    let n = TEMP_FILE_COUNT.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("nmk{}_{}.tmp", std::process::id(), n))
}

/// Worker thread body: run the commands in order, stopping at the first
/// failure that isn't marked ignorable.
fn run_target(
    slot: usize,
    commands: Vec<PreparedCommand>,
    mut environment: Environment,
    buffered: Arc<AtomicBool>,
    jobserver: jobserver::Client,
    dry_run: bool,
    events: Sender<Event>,
) {
    for command in &commands {
        if let Some((name, value)) = parse_set_builtin(&command.cmdline) {
            if !command.silent {
                println!("{}", command.cmdline);
            }
            environment.insert(name, value);
            let _ = events.send(Event::EnvironmentChanged {
                slot,
                environment: environment.clone(),
            });
            continue;
        }

        if dry_run {
            println!("{}", command.cmdline);
            continue;
        }

        let failed = match run_command(command, &environment, buffered.load(Ordering::Relaxed), &jobserver) {
            Ok(success) => !success,
            Err(err) => {
                eprintln!("Error: {}", err);
                true
            }
        };
        if failed && !command.ignore_errors {
            let _ = events.send(Event::ChildFinished {
                slot,
                command_failed: true,
            });
            return;
        }
    }
    let _ = events.send(Event::ChildFinished {
        slot,
        command_failed: false,
    });
}

/// `set NAME=value` is interpreted by the executor, not the shell, so the
/// assignment survives into subsequent commands.
fn parse_set_builtin(cmdline: &str) -> Option<(String, String)> {
    let trimmed = cmdline.trim();
    if trimmed.len() < 4 || !trimmed.as_bytes()[..3].eq_ignore_ascii_case(b"set") {
        return None;
    }
    if !trimmed.as_bytes()[3].is_ascii_whitespace() {
        return None;
    }
    let assignment = trimmed[4..].trim_start();
    let eq = assignment.find('=')?;
    let name = assignment[..eq].trim_end();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name.to_string(), assignment[eq + 1..].to_string()))
}

fn pipe() -> anyhow::Result<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        anyhow::bail!("pipe: {}", std::io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Run one command in the shell.  Ok(success) reflects the exit status; an
/// Err means the command could not even be started.
fn run_command(
    command: &PreparedCommand,
    environment: &Environment,
    buffered: bool,
    jobserver: &jobserver::Client,
) -> anyhow::Result<bool> {
    let mut child_command = std::process::Command::new("/bin/sh");
    child_command.arg("-c").arg(&command.cmdline);
    child_command.env_clear();
    child_command.envs(environment);
    // Keep the job-server pipe open in the child so nested builds can
    // attach to it.
    jobserver.configure(&mut child_command);

    if !buffered {
        if !command.silent {
            println!("{}", command.cmdline);
            // The child writes to the fd directly; get the echo out first.
            let _ = std::io::stdout().flush();
        }
        let mut child = child_command
            .spawn()
            .with_context(|| format!("cannot start command: {}", command.cmdline))?;
        let status = child.wait()?;
        if let Some(signal) = status.signal() {
            eprintln!("signal {}", signal);
        }
        return Ok(status.success());
    }

    // Feed stdout and stderr of the child into one pipe so its output
    // flushes as a single block, keeping parallel workers' lines grouped.
    let mut output = Vec::new();
    if !command.silent {
        output.extend_from_slice(command.cmdline.as_bytes());
        output.push(b'\n');
    }
    let (read_fd, write_fd) = pipe()?;
    let write_copy = unsafe { libc::dup(write_fd) };
    if write_copy < 0 {
        let err = std::io::Error::last_os_error();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        anyhow::bail!("dup: {}", err);
    }
    let mut reader = unsafe { std::fs::File::from_raw_fd(read_fd) };
    child_command.stdout(unsafe { Stdio::from_raw_fd(write_fd) });
    child_command.stderr(unsafe { Stdio::from_raw_fd(write_copy) });

    let spawned = child_command.spawn();
    // Dropping the Command closes the parent's copies of the write end;
    // without that the reader below would never see EOF.
    drop(child_command);
    let mut child = spawned.with_context(|| format!("cannot start command: {}", command.cmdline))?;

    reader.read_to_end(&mut output)?;
    let status = child.wait()?;
    if let Some(signal) = status.signal() {
        let _ = writeln!(output, "signal {}", signal);
    }

    let stdout = std::io::stdout();
    let mut locked = stdout.lock();
    let _ = locked.write_all(&output);
    let _ = locked.flush();

    Ok(status.success())
}
