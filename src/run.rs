//! Command-line entry point: flag parsing and wiring the parsed makefile
//! into the target executor.

use crate::makefile::Options;
use crate::parse;
use crate::task::Environment;
use crate::work::TargetExecutor;
use anyhow::anyhow;

#[derive(argh::FromArgs)]
/// nmk, an nmake-compatible parallel build driver
struct Opts {
    /// makefile to read [default=Makefile]
    #[argh(option, short = 'f', default = "(\"Makefile\".into())")]
    file: String,

    /// parallel jobs [default uses system thread count]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// keep going: build unrelated targets after an error
    #[argh(switch, short = 'k')]
    keep_going: bool,

    /// build all targets even if up to date
    #[argh(switch, short = 'a')]
    build_all: bool,

    /// display build info for each target
    #[argh(switch, short = 'd')]
    display_build_info: bool,

    /// dry run: print commands without executing them
    #[argh(switch, short = 'n')]
    dry_run: bool,

    /// print the dependency graph and exit
    #[argh(switch)]
    dump_graph: bool,

    /// print the dependency graph in dot format and exit
    #[argh(switch)]
    dump_graph_dot: bool,

    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

fn default_parallelism() -> anyhow::Result<usize> {
    let par = std::thread::available_parallelism()?;
    Ok(usize::from(par))
}

pub fn run() -> anyhow::Result<i32> {
    let opts: Opts = argh::from_env();

    let max_jobs = match opts.jobs {
        Some(0) => anyhow::bail!("number of jobs must be at least 1"),
        Some(jobs) => jobs,
        None => default_parallelism()?,
    };
    let options = Options {
        max_jobs,
        build_all_targets: opts.build_all,
        keep_going: opts.keep_going,
        display_build_info: opts.display_build_info,
        dump_dependency_graph: opts.dump_graph || opts.dump_graph_dot,
        dump_dependency_graph_dot: opts.dump_graph_dot,
        dry_run: opts.dry_run,
    };

    let environment: Environment = std::env::vars().collect();
    let source = std::fs::read(&opts.file)
        .map_err(|err| anyhow!("cannot read {}: {}", opts.file, err))?;
    let mut makefile = parse::parse(&source, &opts.file, &environment, options)?;

    let mut executor = TargetExecutor::new(environment, max_jobs);
    let exit_code = executor.apply(&mut makefile, &opts.targets)?;
    executor.remove_temp_files();
    Ok(exit_code)
}
