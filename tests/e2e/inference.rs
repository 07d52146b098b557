use crate::*;

#[test]
fn rule_supplies_commands_and_source() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        ".c.obj:
\tcp $< $@
all: foo.obj
\t@echo linked > linked
foo.obj:
",
    )?;
    space.write("foo.c", "int main;\n")?;
    space.run_expect(&mut nmk_command(vec![]));
    assert_eq!(space.read("foo.obj")?, "int main;\n");
    assert!(space.exists("linked"));
    Ok(())
}

#[test]
fn inference_target_named_as_goal() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write(
        "Makefile",
        ".c.obj:
\tcp $< $@
foo.obj:
",
    )?;
    space.write("foo.c", "one\n")?;
    space.run_expect(&mut nmk_command(vec!["foo.obj"]));
    assert_eq!(space.read("foo.obj")?, "one\n");
    Ok(())
}

#[test]
fn automatic_macros_expand_at_dispatch() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: a b\n\t@echo $@ $** > result\n\t@touch out\n")?;
    space.write("a", "")?;
    space.write("b", "")?;
    space.run_expect(&mut nmk_command(vec![]));
    assert_eq!(space.read("result")?, "out a b\n");
    Ok(())
}
