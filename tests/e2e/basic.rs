use crate::*;

#[test]
fn missing_makefile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    let out = space.run(&mut nmk_command(vec![]))?;
    assert!(!out.status.success());
    assert_stderr_contains(&out, "cannot read Makefile");
    Ok(())
}

#[test]
fn empty_makefile() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "")?;
    let out = space.run(&mut nmk_command(vec![]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "no targets in makefile");
    Ok(())
}

#[test]
fn basic_build() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\ttouch out\n")?;
    space.write("in", "")?;
    space.run_expect(&mut nmk_command(vec![]));
    assert!(space.exists("out"));
    Ok(())
}

#[test]
fn rerun_is_a_no_op() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\ttouch out\n\t@echo ran >> log\n")?;
    space.write("in", "")?;
    space.run_expect(&mut nmk_command(vec![]));
    space.run_expect(&mut nmk_command(vec![]));
    assert_eq!(space.read("log")?, "ran\n");
    Ok(())
}

#[test]
fn commands_echo_unless_silent() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\techo visible\n")?;
    let out = space.run_expect(&mut nmk_command(vec![]));
    assert_output_contains(&out, "echo visible");
    assert_output_contains(&out, "visible");

    space.write("Makefile", "all:\n\t@echo quiet\n")?;
    let out = space.run_expect(&mut nmk_command(vec![]));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("quiet"));
    assert!(!stdout.contains("echo quiet"));
    Ok(())
}

#[test]
fn failing_command_exits_2() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\tfalse\n")?;
    let out = space.run(&mut nmk_command(vec![]))?;
    assert_eq!(out.status.code(), Some(2));
    Ok(())
}

#[test]
fn dash_modifier_ignores_failure() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\t-false\n\ttouch survived\n")?;
    space.run_expect(&mut nmk_command(vec![]));
    assert!(space.exists("survived"));
    Ok(())
}

#[test]
fn unknown_goal_target() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\ttouch all\n")?;
    let out = space.run(&mut nmk_command(vec!["nonesuch"]))?;
    assert_eq!(out.status.code(), Some(1));
    assert_stderr_contains(&out, "Target nonesuch does not exist");
    Ok(())
}

#[test]
fn dry_run_prints_without_executing() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\ttouch out\n")?;
    let out = space.run_expect(&mut nmk_command(vec!["-n"]));
    assert_output_contains(&out, "touch out");
    assert!(!space.exists("out"));
    Ok(())
}

#[test]
fn multiple_goals_build_in_order() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "t1:\n\ttouch t1\nt2:\n\ttouch t2\nt3:\n\ttouch t3\n",
    )?;
    space.run_expect(&mut nmk_command(vec!["t3", "t1"]));
    assert!(space.exists("t3"));
    assert!(space.exists("t1"));
    assert!(!space.exists("t2"));
    Ok(())
}

#[test]
fn inline_file() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "all:\n\tcp << out\nresponse body\n<<\n")?;
    space.run_expect(&mut nmk_command(vec![]));
    assert_eq!(space.read("out")?, "response body\n");
    Ok(())
}
