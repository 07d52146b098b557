use crate::*;

#[test]
fn keep_going_builds_unrelated_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "all: broken healthy\n\ttouch all\nbroken:\n\tfalse\nhealthy:\n\ttouch healthy\n",
    )?;
    let out = space.run(&mut nmk_command(vec!["-k"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert!(space.exists("healthy"));
    // The root is skipped, not silently succeeded.
    assert!(!space.exists("all"));
    assert_stderr_contains(&out, "Option -k specified. Continuing.");
    assert_stderr_contains(&out, "Target 'all' cannot be built due to failed dependencies.");
    Ok(())
}

#[test]
fn fail_fast_aborts_with_exit_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "all: broken healthy\n\ttouch all\nbroken:\n\tfalse\nhealthy:\n\ttouch healthy\n",
    )?;
    let out = space.run(&mut nmk_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    assert!(!space.exists("all"));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!stderr.contains("Continuing"));
    Ok(())
}

#[test]
fn keep_going_still_exits_0_without_failures() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\ttouch all\n")?;
    let out = space.run_expect(&mut nmk_command(vec!["-k"]));
    assert_eq!(out.status.code(), Some(0));
    Ok(())
}
