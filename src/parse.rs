//! Parses the nmake makefile dialect into the Makefile model.
//!
//! Covered: `#` comments, backslash line continuation, macro definitions
//! with `$(NAME)` expansion, description blocks with command lists, the
//! `@`/`-` command modifiers, `<<` inline files, and `.from.to` inference
//! rules.  The preprocessor (`!include`, conditionals) is handled upstream
//! of this program and not supported here.

use crate::makefile::{Command, InlineFile, Makefile, Options};
use crate::scanner::{ParseResult, Scanner};
use crate::task::Environment;
use anyhow::anyhow;
use std::collections::HashMap;
use std::path::Path;

pub fn parse(
    bytes: &[u8],
    file_name: &str,
    environment: &Environment,
    options: Options,
) -> anyhow::Result<Makefile> {
    if std::str::from_utf8(bytes).is_err() {
        anyhow::bail!("{}: makefile is not valid UTF-8", file_name);
    }
    let mut buf = bytes.to_vec();
    buf.push(0);
    let mut parser = Parser::new(&buf, environment);
    let mut makefile = Makefile::new(file_name.to_string(), options);
    parser
        .parse_into(&mut makefile)
        .map_err(|err| anyhow!(parser.scanner.format_parse_error(Path::new(file_name), err)))?;
    makefile.finish();
    Ok(makefile)
}

/// A description block or inference rule whose command lines are still
/// being collected.
enum Pending {
    Block {
        targets: Vec<String>,
        dependents: Vec<String>,
        commands: Vec<Command>,
    },
    Rule {
        from_suffix: String,
        to_suffix: String,
        commands: Vec<Command>,
    },
}

struct Parser<'a> {
    scanner: Scanner<'a>,
    /// Macro table; environment variables seed it, definitions in the
    /// makefile override them.
    macros: HashMap<String, String>,
    current: Option<Pending>,
    /// Offset of the logical line being processed, for error reporting.
    line_start: usize,
}

impl<'a> Parser<'a> {
    fn new(buf: &'a [u8], environment: &Environment) -> Self {
        Parser {
            scanner: Scanner::new(buf),
            macros: environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            current: None,
            line_start: 0,
        }
    }

    fn parse_into(&mut self, makefile: &mut Makefile) -> ParseResult<()> {
        while !self.scanner.at_end() {
            self.line_start = self.scanner.ofs;
            let indented = matches!(self.scanner.peek(), ' ' | '\t');
            let line = self.read_logical_line();

            if line.trim().is_empty() {
                self.flush(makefile);
                continue;
            }

            if indented {
                let expanded = self.expand(line.trim())?;
                let command = self.parse_command(&expanded)?;
                match &mut self.current {
                    Some(Pending::Block { commands, .. })
                    | Some(Pending::Rule { commands, .. }) => commands.push(command),
                    None => {
                        return self.scanner.parse_error_at(
                            self.line_start,
                            "command line outside of a description block",
                        )
                    }
                }
                continue;
            }

            self.flush(makefile);
            let line = strip_comment(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((name, value)) = split_macro_definition(line) {
                self.macros.insert(name.to_string(), value.to_string());
                continue;
            }

            let Some(colon) = line.find(':') else {
                return self.scanner.parse_error_at(
                    self.line_start,
                    "expected a macro definition or description block",
                );
            };
            let targets = self.expand(&line[..colon])?;
            let dependents = self.expand(&line[colon + 1..])?;
            let targets: Vec<String> = targets.split_whitespace().map(str::to_string).collect();
            let dependents: Vec<String> =
                dependents.split_whitespace().map(str::to_string).collect();
            if targets.is_empty() {
                return self
                    .scanner
                    .parse_error_at(self.line_start, "description block without a target name");
            }

            if targets.len() == 1 && dependents.is_empty() {
                if let Some((from_suffix, to_suffix)) = split_inference_rule(&targets[0]) {
                    self.current = Some(Pending::Rule {
                        from_suffix,
                        to_suffix,
                        commands: Vec::new(),
                    });
                    continue;
                }
            }
            self.current = Some(Pending::Block {
                targets,
                dependents,
                commands: Vec::new(),
            });
        }
        self.flush(makefile);
        Ok(())
    }

    /// Hand the statement under construction to the makefile.
    fn flush(&mut self, makefile: &mut Makefile) {
        match self.current.take() {
            Some(Pending::Block {
                targets,
                dependents,
                commands,
            }) => makefile.add_block(&targets, dependents, commands),
            Some(Pending::Rule {
                from_suffix,
                to_suffix,
                commands,
            }) => makefile.add_rule(from_suffix, to_suffix, commands),
            None => {}
        }
    }

    /// One source line, not counting continuations; strips \r\n endings.
    fn read_physical_line(&mut self) -> String {
        let start = self.scanner.ofs;
        while !self.scanner.at_end() && self.scanner.peek() != '\n' {
            self.scanner.next();
        }
        let mut line = self.scanner.slice(start, self.scanner.ofs).to_string();
        if !self.scanner.at_end() {
            self.scanner.next();
        }
        if line.ends_with('\r') {
            line.pop();
        }
        line
    }

    /// One logical line: trailing backslashes join the following lines,
    /// with the continuation's indentation collapsed to a single space.
    fn read_logical_line(&mut self) -> String {
        let mut line = self.read_physical_line();
        while line.ends_with('\\') && !self.scanner.at_end() {
            line.pop();
            let continuation = self.read_physical_line();
            line.push(' ');
            line.push_str(continuation.trim_start());
        }
        line
    }

    /// Parse one command line: leading modifiers, then inline file bodies
    /// for each `<<` in the command text.
    fn parse_command(&mut self, text: &str) -> ParseResult<Command> {
        let mut silent = false;
        let mut ignore_errors = false;
        let mut rest = text;
        loop {
            if let Some(r) = rest.strip_prefix('@') {
                silent = true;
                rest = r.trim_start();
            } else if let Some(r) = rest.strip_prefix('-') {
                ignore_errors = true;
                // An optional exit-code bound may follow the dash; the
                // bound itself is not honored, anything nonzero below it
                // would be ignored anyway.
                rest = r.trim_start_matches(|c: char| c.is_ascii_digit()).trim_start();
            } else {
                break;
            }
        }

        let mut inline_files = Vec::new();
        for _ in 0..rest.matches("<<").count() {
            let mut content = String::new();
            let keep;
            loop {
                if self.scanner.at_end() {
                    return self.scanner.parse_error("unterminated inline file");
                }
                let line = self.read_physical_line();
                let terminator = line.trim_end();
                if terminator == "<<" || terminator.eq_ignore_ascii_case("<<NOKEEP") {
                    keep = false;
                    break;
                }
                if terminator.eq_ignore_ascii_case("<<KEEP") {
                    keep = true;
                    break;
                }
                content.push_str(&line);
                content.push('\n');
            }
            inline_files.push(InlineFile { content, keep });
        }

        Ok(Command {
            cmdline: rest.to_string(),
            silent,
            ignore_errors,
            inline_files,
        })
    }

    fn expand(&self, text: &str) -> ParseResult<String> {
        self.expand_depth(text, 0)
    }

    /// Expand $(NAME) references; undefined macros expand to nothing.
    /// $$ is preserved for the automatic-macro pass at dispatch time,
    /// as are $@ and friends.
    fn expand_depth(&self, text: &str, depth: usize) -> ParseResult<String> {
        if depth > 16 {
            return self
                .scanner
                .parse_error_at(self.line_start, "macro expansion too deep");
        }
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            if let Some(inner) = after.strip_prefix('(') {
                let Some(close) = inner.find(')') else {
                    return self
                        .scanner
                        .parse_error_at(self.line_start, "unterminated macro reference");
                };
                let value = self
                    .macros
                    .get(&inner[..close])
                    .cloned()
                    .unwrap_or_default();
                out.push_str(&self.expand_depth(&value, depth + 1)?);
                rest = &inner[close + 1..];
            } else if let Some(r) = after.strip_prefix('$') {
                out.push_str("$$");
                rest = r;
            } else {
                out.push('$');
                rest = after;
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// `NAME = value` with an identifier on the left.
fn split_macro_definition(line: &str) -> Option<(&str, &str)> {
    let bytes = line.as_bytes();
    if !(bytes[0].is_ascii_alphabetic() || bytes[0] == b'_') {
        return None;
    }
    let mut i = 0;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    let name = &line[..i];
    let value = line[i..].trim_start().strip_prefix('=')?;
    Some((name, value.trim()))
}

/// `.from.to` with exactly two suffixes and no path component.
fn split_inference_rule(name: &str) -> Option<(String, String)> {
    let rest = name.strip_prefix('.')?;
    let dot = rest.find('.')?;
    let from_suffix = &name[..dot + 1];
    let to_suffix = &rest[dot..];
    if from_suffix.len() < 2 || to_suffix.len() < 2 {
        return None;
    }
    if to_suffix[1..].contains('.') || name.contains('/') {
        return None;
    }
    Some((from_suffix.to_string(), to_suffix.to_string()))
}
