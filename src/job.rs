//! Job-server client: one pool of concurrency tokens shared across every
//! cooperating build process, speaking the GNU make protocol over pipe
//! file descriptors.
//!
//! The first worker slot is free: it represents the token the process
//! itself owns.  Every further concurrent command must hold one acquired
//! token for the duration of its child process.

use crate::task::Environment;
use crate::work::Event;
use anyhow::{anyhow, bail};
use jobserver::{Acquired, Client, HelperThread};
use std::sync::mpsc::Sender;

pub struct JobClient {
    /// Held tokens.  Declared first: dropping an Acquired returns its
    /// token, and that must happen before the helper and client shut the
    /// endpoint down.
    tokens: Vec<Acquired>,
    acquiring: bool,
    helper: HelperThread,
    client: Client,
}

impl JobClient {
    /// Connect to the fleet-wide job server.  A nested build (an ancestor
    /// process runs our executable) must attach to the endpoint it
    /// inherited; a top-level build creates one sized max_jobs - 1 and
    /// publishes it to children through MAKEFLAGS.
    pub fn start(
        environment: &mut Environment,
        max_jobs: usize,
        events: Sender<Event>,
    ) -> anyhow::Result<JobClient> {
        let client = if is_sub_invocation() {
            // Safety: the fds named in MAKEFLAGS were inherited from the
            // parent build and are used for nothing else in this process.
            match unsafe { Client::from_env() } {
                Some(client) => client,
                None => bail!("MAKEFLAGS carries no job server endpoint"),
            }
        } else {
            create_endpoint(environment, max_jobs)?
        };

        let helper = client
            .clone()
            .into_helper_thread(move |token| {
                let _ = events.send(Event::TokenAcquired(token));
            })
            .map_err(|err| anyhow!("cannot start token helper thread: {}", err))?;

        Ok(JobClient {
            tokens: Vec::new(),
            acquiring: false,
            helper,
            client,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Non-blocking token request; a TokenAcquired event arrives when one
    /// is available.
    pub fn async_acquire(&mut self) {
        debug_assert!(!self.acquiring, "acquire already in flight");
        self.acquiring = true;
        self.helper.request_token();
    }

    /// True between async_acquire and the TokenAcquired event.
    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    pub fn on_acquired(&mut self, token: Acquired) {
        self.acquiring = false;
        self.tokens.push(token);
    }

    pub fn on_acquire_failed(&mut self) {
        self.acquiring = false;
    }

    /// Return one token to the pool.
    pub fn release(&mut self) {
        // Dropping the Acquired writes the token byte back.
        self.tokens.pop();
    }
}

/// Create the job-server pipe with max_jobs - 1 token bytes and put the
/// endpoint into both our own environment (so Client::from_env can wrap
/// the fds) and the environment every child will inherit.
fn create_endpoint(environment: &mut Environment, max_jobs: usize) -> anyhow::Result<Client> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        bail!("pipe: {}", std::io::Error::last_os_error());
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let tokens = vec![b'+'; max_jobs.saturating_sub(1)];
    let mut written = 0;
    while written < tokens.len() {
        let n = unsafe {
            libc::write(
                write_fd,
                tokens[written..].as_ptr() as *const libc::c_void,
                tokens.len() - written,
            )
        };
        if n < 0 {
            bail!("cannot seed job tokens: {}", std::io::Error::last_os_error());
        }
        written += n as usize;
    }

    let makeflags = format!(
        "-j{} --jobserver-auth={},{}",
        max_jobs, read_fd, write_fd
    );
    std::env::set_var("MAKEFLAGS", &makeflags);
    environment.insert("MAKEFLAGS".to_string(), makeflags);

    // Safety: the fds were created above and stay open for the process
    // lifetime.
    match unsafe { Client::from_env() } {
        Some(client) => Ok(client),
        None => bail!("job server endpoint rejected"),
    }
}

/// A build process is a sub-invocation when some ancestor process runs the
/// same executable; such a build must share its parent's token pool
/// instead of hosting a second one.
pub fn is_sub_invocation() -> bool {
    let Some(own_name) = own_process_name() else {
        return false;
    };
    let mut pid = std::process::id() as i32;
    // The walk is bounded in case /proc reports a ppid cycle.
    for _ in 0..64 {
        let Some((name, ppid)) = process_stat(pid) else {
            return false;
        };
        if pid != std::process::id() as i32 && name == own_name {
            return true;
        }
        if ppid <= 1 {
            return false;
        }
        pid = ppid;
    }
    false
}

/// Our executable name, truncated the way the kernel truncates comm.
fn own_process_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let name = exe.file_name()?.to_str()?;
    Some(name.chars().take(15).collect())
}

/// comm and ppid from /proc/<pid>/stat.  comm may contain spaces, so it is
/// delimited by the parens, and the ppid is the second field after them.
fn process_stat(pid: i32) -> Option<(String, i32)> {
    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat[open + 1..close].to_string();
    let ppid = stat[close + 1..].split_whitespace().nth(1)?.parse().ok()?;
    Some((name, ppid))
}

#[cfg(test)]
pub(crate) fn test_env_lock() -> std::sync::MutexGuard<'static, ()> {
    // Tests that start a JobClient mutate MAKEFLAGS in the process
    // environment; serialize them.
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
