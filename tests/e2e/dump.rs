use crate::*;

const DIAMOND: &str = "A: B C
\ttouch A
B: D
\ttouch B
C: D
\ttouch C
D:
\ttouch D
";

#[test]
fn dot_dump_prints_each_edge_once() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", DIAMOND)?;
    let out = space.run_expect(&mut nmk_command(vec!["--dump-graph-dot"]));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(
        stdout,
        "digraph G {
  \"A\" -> \"B\";
  \"B\" -> \"D\";
  \"A\" -> \"C\";
  \"C\" -> \"D\";
}
"
    );
    // Dumping must not execute anything.
    assert!(!space.exists("A"));
    assert!(!space.exists("D"));
    Ok(())
}

#[test]
fn plain_dump_prints_an_indented_tree() -> anyhow::Result<()> {
    let space = TestSpace::new()?;
    space.write("Makefile", DIAMOND)?;
    let out = space.run_expect(&mut nmk_command(vec!["--dump-graph"]));
    assert_eq!(
        String::from_utf8_lossy(&out.stdout),
        "A\n B\n  D\n C\n  D\n"
    );
    assert!(!space.exists("D"));
    Ok(())
}
