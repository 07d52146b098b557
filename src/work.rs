//! The target executor: drives the dependency graph, dispatching ready
//! targets onto the worker pool under the job-server concurrency budget.
//!
//! Scheduling is single-threaded and cooperative: worker threads and the
//! token helper only send events into one channel, and all scheduler state
//! is touched from the loop that drains it.  The scheduler tick is posted
//! as a flag and drained between events, never entered re-entrantly.

use crate::fs::FileCache;
use crate::graph::DependencyGraph;
use crate::job::JobClient;
use crate::makefile::{Makefile, TargetId};
use crate::task::{CommandExecutor, Environment};
use anyhow::{anyhow, bail};
use jobserver::Acquired;
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender};

/// Everything the scheduler can be woken by.
pub enum Event {
    ChildFinished { slot: usize, command_failed: bool },
    EnvironmentChanged { slot: usize, environment: Environment },
    TokenAcquired(std::io::Result<Acquired>),
}

pub struct TargetExecutor {
    environment: Environment,
    events: Receiver<Event>,
    events_tx: Sender<Event>,
    processes: Vec<CommandExecutor>,
    /// Idle slots, in the order they became idle.
    available_processes: VecDeque<usize>,
    job_client: Option<JobClient>,
    depgraph: DependencyGraph,
    file_cache: FileCache,
    /// Single-slot handoff between the graph search and dispatch.
    next_target: Option<TargetId>,
    /// Goal targets still to be built after the current graph empties.
    pending_targets: VecDeque<TargetId>,
    /// Tokens currently held beyond the implicit first one.
    job_acquisition_count: usize,
    /// Sticky: once set, nothing new is dispatched.
    aborted: bool,
    /// Sticky-false: any command failure clears it for good.
    all_commands_successful: bool,
    start_posted: bool,
    exit_code: Option<i32>,
}

impl TargetExecutor {
    pub fn new(environment: Environment, max_jobs: usize) -> Self {
        let (events_tx, events) = std::sync::mpsc::channel();
        let processes: Vec<CommandExecutor> = (0..max_jobs)
            .map(|slot| CommandExecutor::new(slot, environment.clone()))
            .collect();
        // The first worker to be dispatched streams its output directly.
        processes[0].set_buffered(false);
        TargetExecutor {
            environment,
            events,
            events_tx,
            available_processes: (0..processes.len()).collect(),
            processes,
            job_client: None,
            depgraph: DependencyGraph::new(),
            file_cache: FileCache::new(),
            next_target: None,
            pending_targets: VecDeque::new(),
            job_acquisition_count: 0,
            aborted: false,
            all_commands_successful: true,
            start_posted: false,
            exit_code: None,
        }
    }

    /// Run the build: resolve the goals, build the graph, and drive the
    /// event loop until the build finishes.  The returned code is 0 for
    /// success, 1 when keep-going saw failures, 2 on a fail-fast abort.
    /// Configuration problems (unknown goal, unreachable job server)
    /// surface as Err before anything runs.
    pub fn apply(&mut self, makefile: &mut Makefile, goals: &[String]) -> anyhow::Result<i32> {
        self.aborted = false;
        self.all_commands_successful = true;
        self.job_acquisition_count = 0;
        self.next_target = None;

        if self.job_client.is_none() {
            // The token budget and the worker pool must agree: every slot
            // beyond the first needs a token to be dispatchable.
            let client = JobClient::start(
                &mut self.environment,
                self.processes.len(),
                self.events_tx.clone(),
            )
            .map_err(|err| anyhow!("Can't connect to job server: {}", err))?;
            // The endpoint lives in MAKEFLAGS; every child must see it.
            for process in &mut self.processes {
                process.set_environment(self.environment.clone());
            }
            self.job_client = Some(client);
        }

        let first_goal;
        if goals.is_empty() {
            if makefile.is_empty() {
                bail!("no targets in makefile");
            }
            first_goal = makefile
                .first_target()
                .ok_or_else(|| anyhow!("no targets in makefile"))?;
        } else {
            let mut ids = Vec::with_capacity(goals.len());
            for name in goals {
                ids.push(makefile.target_id(name).ok_or_else(|| {
                    anyhow!("Target {} does not exist in {}.", name, makefile.file_name())
                })?);
            }
            first_goal = ids[0];
            self.pending_targets.extend(ids[1..].iter().copied());
        }

        self.depgraph.build(makefile, first_goal);
        if makefile.options().dump_dependency_graph {
            if makefile.options().dump_dependency_graph_dot {
                self.depgraph.dump_dot(makefile);
            } else {
                self.depgraph.dump(makefile);
            }
            return Ok(0);
        }

        self.post_start();
        self.run_loop(makefile)
    }

    fn run_loop(&mut self, makefile: &mut Makefile) -> anyhow::Result<i32> {
        loop {
            while self.start_posted {
                self.start_posted = false;
                self.start_processes(makefile);
            }
            if let Some(code) = self.exit_code.take() {
                return Ok(code);
            }
            // We hold a sender ourselves, so recv cannot see a closed
            // channel.
            let Ok(event) = self.events.recv() else {
                bail!("scheduler event channel closed");
            };
            self.handle_event(makefile, event);
        }
    }

    fn handle_event(&mut self, makefile: &mut Makefile, event: Event) {
        match event {
            Event::ChildFinished {
                slot,
                command_failed,
            } => self.on_child_finished(makefile, slot, command_failed),
            Event::EnvironmentChanged { environment, .. } => {
                self.set_environment(environment);
            }
            Event::TokenAcquired(Ok(token)) => {
                if let Some(job_client) = &mut self.job_client {
                    job_client.on_acquired(token);
                }
                if self.aborted {
                    // Too late to be useful; hand it straight back.
                    self.release_job_token();
                } else {
                    self.build_next_target(makefile);
                }
            }
            Event::TokenAcquired(Err(err)) => {
                if let Some(job_client) = &mut self.job_client {
                    job_client.on_acquire_failed();
                }
                if self.job_acquisition_count > 0 {
                    self.job_acquisition_count -= 1;
                }
                self.fail_build(makefile, anyhow!("job token acquisition failed: {}", err));
            }
        }
    }

    /// A `set` builtin ran somewhere in the pool; every executor (and any
    /// target dispatched later) observes the new environment.
    fn set_environment(&mut self, environment: Environment) {
        self.environment = environment.clone();
        for process in &mut self.processes {
            process.set_environment(environment.clone());
        }
    }

    fn post_start(&mut self) {
        self.start_posted = true;
    }

    /// The scheduler tick: find work and claim a slot for it, or wind the
    /// build down when the graph is exhausted.
    fn start_processes(&mut self, makefile: &mut Makefile) {
        if self.aborted
            || self
                .job_client
                .as_ref()
                .is_some_and(|job_client| job_client.is_acquiring())
            || self.available_processes.is_empty()
        {
            return;
        }

        if self.next_target.is_none() {
            self.find_next_target(makefile);
        }

        if self.next_target.is_some() {
            if self.number_of_running_processes() == 0 {
                // Use up the process's own implicit job token.
                self.build_next_target(makefile);
            } else {
                // Acquire a token from the server; the TokenAcquired event
                // dispatches the target.
                self.job_acquisition_count += 1;
                if let Some(job_client) = &mut self.job_client {
                    job_client.async_acquire();
                }
            }
        } else if self.number_of_running_processes() == 0 {
            match self.pending_targets.pop_front() {
                None => self.finish_build(makefile, 0),
                Some(goal) => {
                    // An earlier goal may have produced files this one
                    // depends on; every timestamp must be probed afresh.
                    self.depgraph.clear();
                    makefile.invalidate_time_stamps(&mut self.file_cache);
                    self.depgraph.build(makefile, goal);
                    self.post_start();
                }
            }
        }
    }

    /// Pull targets from the graph until one actually needs running.
    /// Targets with nothing to run are dropped here; in keep-going mode so
    /// are targets whose dependencies already failed.
    fn find_next_target(&mut self, makefile: &mut Makefile) {
        loop {
            match self
                .depgraph
                .find_available_target(makefile, &mut self.file_cache)
            {
                Some(target) => {
                    if makefile.target(target).commands.is_empty() {
                        self.depgraph.remove_leaf(target);
                        continue;
                    }
                    if makefile.options().keep_going && self.depgraph.is_unbuildable(target) {
                        eprintln!(
                            "nmk: Target '{}' cannot be built due to failed dependencies.",
                            makefile.target(target).name
                        );
                        self.depgraph.remove_leaf(target);
                        continue;
                    }
                    self.next_target = Some(target);
                }
                None => self.next_target = None,
            }
            return;
        }
    }

    /// Hand the chosen target to the first idle worker.
    fn build_next_target(&mut self, makefile: &mut Makefile) {
        if self.aborted {
            return;
        }
        let Some(target) = self.next_target.take() else {
            return;
        };

        let result = (|| -> anyhow::Result<()> {
            let slot = self
                .available_processes
                .pop_front()
                .expect("a worker is idle whenever a target is dispatched");
            let commands = makefile.expanded_commands(target);
            let job_client = self
                .job_client
                .as_ref()
                .expect("job client started before dispatch");
            self.processes[slot].start(
                target,
                commands,
                job_client.client(),
                makefile.options().dry_run,
                self.events_tx.clone(),
            )
        })();

        match result {
            Ok(()) => self.post_start(),
            Err(err) => self.fail_build(makefile, err),
        }
    }

    fn on_child_finished(&mut self, makefile: &mut Makefile, slot: usize, command_failed: bool) {
        let Some(target) = self.processes[slot].on_finished() else {
            return;
        };

        if command_failed {
            self.all_commands_successful = false;
            if makefile.options().keep_going {
                // Parents must be poisoned while the failed leaf's edges
                // still exist.
                self.depgraph.mark_parents_recursively_unbuildable(target);
                eprintln!("nmk: Option -k specified. Continuing.");
            }
        }

        // Probe the target's path again later: its command just rewrote it.
        self.file_cache.invalidate(&makefile.target(target).name);
        self.depgraph.remove_leaf(target);

        if self.job_acquisition_count > 0 {
            self.release_job_token();
        }
        self.available_processes.push_back(slot);

        if !self.processes[slot].is_buffered() {
            self.processes[slot].set_buffered(true);
            self.elect_streaming_process();
        }

        if command_failed && !makefile.options().keep_going {
            self.aborted = true;
            self.depgraph.clear();
            self.pending_targets.clear();
            self.wait_for_processes();
            self.wait_for_job_client();
            while self.job_acquisition_count > 0 {
                self.release_job_token();
            }
            self.finish_build(makefile, 2);
        }

        self.post_start();
    }

    /// Keep exactly one worker streaming: prefer one that's still running,
    /// otherwise the next worker in line for dispatch.
    fn elect_streaming_process(&mut self) {
        for process in &self.processes {
            if process.is_active() {
                process.set_buffered(false);
                return;
            }
        }
        if let Some(&slot) = self.available_processes.front() {
            self.processes[slot].set_buffered(false);
        }
    }

    fn release_job_token(&mut self) {
        if let Some(job_client) = &mut self.job_client {
            job_client.release();
        }
        if self.job_acquisition_count > 0 {
            self.job_acquisition_count -= 1;
        }
    }

    /// Drain finished events until every worker is idle.  Scheduling is
    /// over by this point; only the bookkeeping runs.
    fn wait_for_processes(&mut self) {
        while self.number_of_running_processes() > 0 {
            let Ok(event) = self.events.recv() else {
                return;
            };
            match event {
                Event::ChildFinished { slot, .. } => {
                    self.processes[slot].on_finished();
                    self.available_processes.push_back(slot);
                }
                Event::EnvironmentChanged { environment, .. } => self.set_environment(environment),
                Event::TokenAcquired(result) => self.settle_token(result),
            }
        }
    }

    /// If a token request is still in flight, wait for it to settle and
    /// hand the token back.
    fn wait_for_job_client(&mut self) {
        while self
            .job_client
            .as_ref()
            .is_some_and(|job_client| job_client.is_acquiring())
        {
            let Ok(event) = self.events.recv() else {
                return;
            };
            match event {
                Event::TokenAcquired(result) => self.settle_token(result),
                Event::ChildFinished { slot, .. } => {
                    self.processes[slot].on_finished();
                    self.available_processes.push_back(slot);
                }
                Event::EnvironmentChanged { environment, .. } => self.set_environment(environment),
            }
        }
    }

    fn settle_token(&mut self, result: std::io::Result<Acquired>) {
        let Some(job_client) = &mut self.job_client else {
            return;
        };
        match result {
            Ok(token) => {
                job_client.on_acquired(token);
                self.release_job_token();
            }
            Err(_) => {
                job_client.on_acquire_failed();
                if self.job_acquisition_count > 0 {
                    self.job_acquisition_count -= 1;
                }
            }
        }
    }

    /// An internal error (a command that cannot start, a dead job server):
    /// report once, stop dispatching, and fail the build.
    fn fail_build(&mut self, makefile: &Makefile, err: anyhow::Error) {
        self.aborted = true;
        eprintln!("Error: {}", err);
        self.finish_build(makefile, 1);
    }

    fn finish_build(&mut self, makefile: &Makefile, mut exit_code: i32) {
        if exit_code == 0 && !self.all_commands_successful && makefile.options().keep_going {
            // Keep-going rode over at least one failure.
            exit_code = 1;
        }
        self.exit_code = Some(exit_code);
    }

    fn number_of_running_processes(&self) -> usize {
        self.processes.len() - self.available_processes.len()
    }

    /// Post-build cleanup of the inline response files the pool created.
    pub fn remove_temp_files(&mut self) {
        for process in &mut self.processes {
            process.cleanup_temp_files();
        }
    }
}
