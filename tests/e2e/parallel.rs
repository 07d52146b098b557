use crate::*;

/// The diamond: D must build exactly once and first, A last.
#[test]
fn diamond_dependency() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "A: B C
\t@echo A >> log
\t@touch A
B: D
\t@echo B >> log
\t@touch B
C: D
\t@echo C >> log
\t@touch C
D:
\t@echo D >> log
\t@touch D
",
    )?;
    space.run_expect(&mut nmk_command(vec!["-j", "4"]));

    let log = space.read("log")?;
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines.iter().filter(|l| **l == "D").count(), 1);
    assert_eq!(lines[0], "D");
    assert_eq!(lines[3], "A");

    // Everything is up to date now; nothing may run again.
    space.run_expect(&mut nmk_command(vec!["-j", "4"]));
    assert_eq!(space.read("log")?.lines().count(), 4);
    Ok(())
}

/// Two targets that can only complete if they run at the same time: each
/// waits for the other's start marker before finishing.
#[test]
fn independent_targets_run_concurrently() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let wait_for = |other: &str, own: &str| {
        format!(
            "\t@touch {own}.started
\t@i=0; while [ ! -f {other}.started ]; do i=$$((i+1)); if [ $$i -gt 100 ]; then exit 1; fi; sleep 0.05; done
\t@touch {own}
"
        )
    };
    space.write(
        "Makefile",
        &format!(
            "all: ping pong\nping:\n{}pong:\n{}",
            wait_for("pong", "ping"),
            wait_for("ping", "pong")
        ),
    )?;
    space.run_expect(&mut nmk_command(vec!["-j", "2"]));
    assert!(space.exists("ping"));
    assert!(space.exists("pong"));
    Ok(())
}

/// A build that invokes nmk recursively: the child is a sub-invocation and
/// must attach to the job-server endpoint it inherited from the parent.
#[test]
fn nested_build_shares_the_job_server() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("sub.mk", "inner:\n\ttouch inner-done\n")?;
    space.write(
        "Makefile",
        &format!("outer:\n\t{} -f sub.mk inner\n", nmk_binary().display()),
    )?;
    space.run_expect(&mut nmk_command(vec!["-j", "3"]));
    assert!(space.exists("inner-done"));
    Ok(())
}
