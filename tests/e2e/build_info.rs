use crate::*;

#[test]
fn build_info_marks_out_of_date_targets() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\t@touch out\n")?;
    space.write("in", "")?;
    let out = space.run_expect(&mut nmk_command(vec!["-d"]));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        stdout.lines().any(|l| l.starts_with('*') && l.ends_with("out")),
        "missing '*' line in {:?}",
        stdout
    );
    Ok(())
}

#[test]
fn build_info_marks_up_to_date_targets_with_a_space() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", "out: in\n\t@touch out\n")?;
    space.write("in", "")?;
    space.run_expect(&mut nmk_command(vec![]));
    let out = space.run_expect(&mut nmk_command(vec!["-d"]));
    let stdout = String::from_utf8_lossy(&out.stdout);
    // " yy/MM/dd hh:mm:ss out" with the timestamp of the file.
    assert!(
        stdout
            .lines()
            .any(|l| l.starts_with(' ') && l.contains('/') && l.ends_with("out")),
        "missing up-to-date line in {:?}",
        stdout
    );
    Ok(())
}
