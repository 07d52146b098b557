//! The makefile model: targets, commands, inference rules, and the build
//! options attached to a parsed makefile.

use crate::densemap::{declare_id, DenseMap};
use crate::fs::FileCache;
use std::collections::HashMap;

declare_id!(TargetId);

/// One command line of a description block or inference rule.
#[derive(Debug, Clone)]
pub struct Command {
    pub cmdline: String,
    /// `@`: don't echo the command before running it.
    pub silent: bool,
    /// `-`: a failing exit status does not stop the target.
    pub ignore_errors: bool,
    /// Bodies for each `<<` in the command, written to temp files at
    /// dispatch time.
    pub inline_files: Vec<InlineFile>,
}

#[derive(Debug, Clone)]
pub struct InlineFile {
    pub content: String,
    /// `<<KEEP`: the temp file survives the build.
    pub keep: bool,
}

/// A pattern rule `.from.to` supplying commands to targets that lack them.
#[derive(Debug)]
pub struct InferenceRule {
    pub from_suffix: String,
    pub to_suffix: String,
    pub commands: Vec<Command>,
}

/// A named build product: the unit the dependency graph schedules.
#[derive(Debug)]
pub struct Target {
    pub name: String,
    pub dependents: Vec<String>,
    pub commands: Vec<Command>,
    /// Indices into the makefile's rule list that could supply commands,
    /// in declaration order.  Filled in by finish().
    pub inference_rules: Vec<usize>,
    /// The source file a bound inference rule derived this target from.
    pub inferred_source: Option<String>,
}

/// Build configuration, mostly mapped straight from command-line flags.
#[derive(Debug, Clone)]
pub struct Options {
    pub max_jobs: usize,
    /// Treat every target as out of date.
    pub build_all_targets: bool,
    /// Keep building unrelated targets after a command fails.
    pub keep_going: bool,
    /// Print a build-info line per visited target.
    pub display_build_info: bool,
    pub dump_dependency_graph: bool,
    pub dump_dependency_graph_dot: bool,
    /// Echo commands without executing them.
    pub dry_run: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            max_jobs: 1,
            build_all_targets: false,
            keep_going: false,
            display_build_info: false,
            dump_dependency_graph: false,
            dump_dependency_graph_dot: false,
            dry_run: false,
        }
    }
}

#[derive(Debug)]
pub struct Makefile {
    file_name: String,
    targets: DenseMap<TargetId, Target>,
    by_name: HashMap<String, TargetId>,
    inference_rules: Vec<InferenceRule>,
    first_target: Option<TargetId>,
    options: Options,
}

impl Makefile {
    pub fn new(file_name: String, options: Options) -> Self {
        Makefile {
            file_name,
            targets: DenseMap::new(),
            by_name: HashMap::new(),
            inference_rules: Vec::new(),
            first_target: None,
            options,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn target_id(&self, name: &str) -> Option<TargetId> {
        self.by_name.get(name).copied()
    }

    pub fn target(&self, id: TargetId) -> &Target {
        self.targets.get(id)
    }

    /// The makefile's default goal: the first target that isn't a
    /// dot-prefixed special name.
    pub fn first_target(&self) -> Option<TargetId> {
        self.first_target
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn add_rule(&mut self, from_suffix: String, to_suffix: String, commands: Vec<Command>) {
        self.inference_rules.push(InferenceRule {
            from_suffix,
            to_suffix,
            commands,
        });
    }

    /// Record a description block.  A name seen before merges: dependents
    /// accumulate, and the first non-empty command list wins.
    pub fn add_block(&mut self, names: &[String], dependents: Vec<String>, commands: Vec<Command>) {
        for name in names {
            match self.by_name.get(name) {
                Some(&id) => {
                    let target = self.targets.get_mut(id);
                    for dep in &dependents {
                        if !target.dependents.contains(dep) {
                            target.dependents.push(dep.clone());
                        }
                    }
                    if target.commands.is_empty() {
                        target.commands = commands.clone();
                    }
                }
                None => {
                    let id = self.targets.push(Target {
                        name: name.clone(),
                        dependents: dependents.clone(),
                        commands: commands.clone(),
                        inference_rules: Vec::new(),
                        inferred_source: None,
                    });
                    self.by_name.insert(name.clone(), id);
                    if self.first_target.is_none() && !name.starts_with('.') {
                        self.first_target = Some(id);
                    }
                }
            }
        }
    }

    /// Attach candidate inference rules to every target, in rule
    /// declaration order.  Called once after parsing.
    pub fn finish(&mut self) {
        let rules: Vec<(usize, String)> = self
            .inference_rules
            .iter()
            .enumerate()
            .map(|(i, r)| (i, r.to_suffix.clone()))
            .collect();
        for id in self.target_ids() {
            let target = self.targets.get_mut(id);
            for (rule, to_suffix) in &rules {
                if target.name.len() > to_suffix.len() && target.name.ends_with(to_suffix.as_str())
                {
                    target.inference_rules.push(*rule);
                }
            }
        }
    }

    fn target_ids(&self) -> Vec<TargetId> {
        self.targets.iter().map(|(id, _)| id).collect()
    }

    /// Late-bind commands for a batch of targets that have none, using the
    /// first candidate rule whose derived source exists on disk or is
    /// itself a target.  The derived source also becomes a dependent so
    /// later up-to-date checks compare against it.
    pub fn apply_inference_rules(&mut self, batch: &[TargetId], cache: &mut FileCache) {
        for &id in batch {
            let target = self.targets.get(id);
            if !target.commands.is_empty() || target.inference_rules.is_empty() {
                continue;
            }

            let mut binding = None;
            for &rule in &target.inference_rules {
                let rule = &self.inference_rules[rule];
                let stem = &target.name[..target.name.len() - rule.to_suffix.len()];
                let source = format!("{}{}", stem, rule.from_suffix);
                if cache.probe(&source).exists() || self.by_name.contains_key(&source) {
                    binding = Some((rule.commands.clone(), source));
                    break;
                }
            }

            if let Some((commands, source)) = binding {
                let target = self.targets.get_mut(id);
                target.commands = commands;
                if !target.dependents.contains(&source) {
                    target.dependents.push(source.clone());
                }
                target.inferred_source = Some(source);
            }
        }
    }

    /// The commands to actually run for a target, with the automatic
    /// macros substituted.
    pub fn expanded_commands(&self, id: TargetId) -> Vec<Command> {
        let target = self.targets.get(id);
        let dependents = target.dependents.join(" ");
        let stem = match target.name.rfind('.') {
            Some(dot) => &target.name[..dot],
            None => &target.name,
        };
        target
            .commands
            .iter()
            .map(|command| Command {
                cmdline: substitute_automatic(
                    &command.cmdline,
                    &target.name,
                    stem,
                    target.inferred_source.as_deref(),
                    &dependents,
                ),
                ..command.clone()
            })
            .collect()
    }

    /// Between goal targets all cached timestamps are stale: earlier goals
    /// may have produced files.  Drops the probe cache wholesale.
    pub fn invalidate_time_stamps(&self, cache: &mut FileCache) {
        cache.clear();
    }
}

/// Substitute the automatic macros: $@ (target), $* (target without
/// extension), $** (all dependents), $< (inferred source), $$ (literal $).
fn substitute_automatic(
    text: &str,
    name: &str,
    stem: &str,
    source: Option<&str>,
    dependents: &str,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(r) = after.strip_prefix('$') {
            out.push('$');
            rest = r;
        } else if let Some(r) = after.strip_prefix('@') {
            out.push_str(name);
            rest = r;
        } else if let Some(r) = after.strip_prefix("**") {
            out.push_str(dependents);
            rest = r;
        } else if let Some(r) = after.strip_prefix('*') {
            out.push_str(stem);
            rest = r;
        } else if let Some(r) = after.strip_prefix('<') {
            out.push_str(source.unwrap_or(""));
            rest = r;
        } else {
            out.push('$');
            rest = after;
        }
    }
    out.push_str(rest);
    out
}
