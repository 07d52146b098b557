//! Integration tests.  Runs the nmk binary against a temp directory.

mod basic;
mod build_info;
mod dump;
mod inference;
mod keep_going;
mod macros;
mod parallel;

use std::path::PathBuf;

pub fn nmk_binary() -> PathBuf {
    std::env::current_exe()
        .expect("test binary path")
        .parent()
        .expect("test binary directory")
        .parent()
        .expect("binary directory")
        .join("nmk")
}

pub fn nmk_command(args: Vec<&str>) -> std::process::Command {
    let mut cmd = std::process::Command::new(nmk_binary());
    cmd.args(args);
    cmd
}

pub fn print_output(out: &std::process::Output) {
    // Gross: use print! instead of writing to stdout so the Rust test
    // framework can capture it.
    print!("{}", String::from_utf8_lossy(&out.stdout));
    print!("{}", String::from_utf8_lossy(&out.stderr));
}

pub fn assert_output_contains(out: &std::process::Output, text: &str) {
    let stdout = String::from_utf8_lossy(&out.stdout);
    if !stdout.contains(text) {
        print_output(out);
        panic!("assertion failed; expected stdout to contain {:?}", text);
    }
}

pub fn assert_stderr_contains(out: &std::process::Output, text: &str) {
    let stderr = String::from_utf8_lossy(&out.stderr);
    if !stderr.contains(text) {
        print_output(out);
        panic!("assertion failed; expected stderr to contain {:?}", text);
    }
}

/// Manages a temporary directory for invoking nmk.
pub struct TestSpace {
    dir: tempfile::TempDir,
}

impl TestSpace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Ok(TestSpace { dir })
    }

    /// Write a file into the working space.
    pub fn write(&self, path: &str, content: &str) -> std::io::Result<()> {
        std::fs::write(self.dir.path().join(path), content)
    }

    /// Read a file from the working space.
    pub fn read(&self, path: &str) -> std::io::Result<String> {
        let bytes = std::fs::read(self.dir.path().join(path))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.dir.path().join(path).exists()
    }

    /// Invoke nmk, returning process output.
    pub fn run(&self, cmd: &mut std::process::Command) -> std::io::Result<std::process::Output> {
        cmd.current_dir(self.dir.path()).output()
    }

    /// Like run, but print output and fail the test if the build failed.
    pub fn run_expect(&self, cmd: &mut std::process::Command) -> std::process::Output {
        let out = self.run(cmd).expect("spawn nmk");
        if !out.status.success() {
            print_output(&out);
            panic!("build failed unexpectedly");
        }
        out
    }
}
