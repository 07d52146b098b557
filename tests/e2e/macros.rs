use crate::*;

#[test]
fn macros_expand_in_dependents_and_commands() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "SRC = in
COPY = cp
out: $(SRC)
\t$(COPY) $(SRC) out
",
    )?;
    space.write("in", "payload\n")?;
    space.run_expect(&mut nmk_command(vec![]));
    assert_eq!(space.read("out")?, "payload\n");
    Ok(())
}

#[test]
fn environment_variables_seed_macros() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: $(SRCFILE)\n\tcp $(SRCFILE) out\n")?;
    space.write("in", "from env\n")?;
    let mut cmd = nmk_command(vec![]);
    cmd.env("SRCFILE", "in");
    space.run_expect(&mut cmd);
    assert_eq!(space.read("out")?, "from env\n");
    Ok(())
}

#[test]
fn makefile_definition_overrides_environment() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "WHO = makefile\nall:\n\t@echo $(WHO) > who\n")?;
    let mut cmd = nmk_command(vec![]);
    cmd.env("WHO", "environment");
    space.run_expect(&mut cmd);
    assert_eq!(space.read("who")?, "makefile\n");
    Ok(())
}

/// `set` is interpreted by the executor and fans out to later targets.
#[test]
fn set_builtin_updates_later_commands() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        "all: one two
one:
\t@set COLOR=green
two:
\t@echo $COLOR > color
",
    )?;
    space.run_expect(&mut nmk_command(vec!["-j", "1"]));
    assert_eq!(space.read("color")?, "green\n");
    Ok(())
}
