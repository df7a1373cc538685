use std::fmt;

use indexmap::IndexMap;
use serde_yaml::Value;

use crate::error::{Result, RunJenkinsError};

/// Build parameters in the order they appear in the plan file.
pub type Parameters = IndexMap<String, String>;

/// One buildable unit and the parameters it is invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub parameters: Parameters,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

/// A step of the execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// One job, awaited before the next stage starts.
    Single(JobSpec),
    /// Jobs submitted together; the stage ends when every one of them has finished.
    Parallel {
        label: Option<String>,
        jobs: Vec<JobSpec>,
    },
}

impl Stage {
    pub fn jobs(&self) -> &[JobSpec] {
        match self {
            Self::Single(job) => std::slice::from_ref(job),
            Self::Parallel { jobs, .. } => jobs,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }
}

/// Ordered stages for a single run. Read-only once parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    stages: Vec<Stage>,
}

impl ExecutionPlan {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn job_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.jobs().len()).sum()
    }
}

/// Identifies a job by its position in the plan, for progress output and logs.
///
/// Stages and jobs are numbered from 1. Jobs of a parallel stage render as
/// `stage.index`, a single stage renders as just its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobMarker {
    pub stage: usize,
    pub index: Option<usize>,
}

impl JobMarker {
    pub fn single(stage: usize) -> Self {
        Self { stage, index: None }
    }

    pub fn parallel(stage: usize, index: usize) -> Self {
        Self {
            stage,
            index: Some(index),
        }
    }
}

impl fmt::Display for JobMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "#{}.{}", self.stage, index),
            None => write!(f, "#{}", self.stage),
        }
    }
}

/// Builds an execution plan from the raw plan document.
///
/// The document is a list. Each entry is either a single-key mapping or a
/// bare list:
///
/// ```yaml
/// - build-image:
///     tag: latest
/// - tests:
///     - unit: {}
///     - integration:
///         suite: smoke
/// - - lint: {}
///   - docs: {}
/// ```
///
/// A mapping value makes a single stage whose parameters are that mapping.
/// A list value (or a bare list entry) makes a parallel stage whose items are
/// single-key mappings of job name to parameters; the key of the enclosing
/// entry becomes the stage label.
///
/// # Errors
///
/// Returns [`RunJenkinsError::Config`] for any other shape.
pub fn parse(raw: &Value) -> Result<ExecutionPlan> {
    let Value::Sequence(entries) = raw else {
        return Err(config_error(format!(
            "plan must be a list of jobs, found {}",
            describe(raw)
        )));
    };

    let stages = entries
        .iter()
        .enumerate()
        .map(|(position, entry)| parse_stage(position + 1, entry))
        .collect::<Result<Vec<_>>>()?;

    Ok(ExecutionPlan::new(stages))
}

fn parse_stage(position: usize, entry: &Value) -> Result<Stage> {
    if let Value::Sequence(items) = entry {
        return parse_parallel(position, None, items);
    }

    let (name, value) = single_entry(entry, &format!("entry {position}"))?;

    match value {
        Value::Mapping(_) | Value::Null => Ok(Stage::Single(parse_job(name, value)?)),
        Value::Sequence(items) => parse_parallel(position, Some(name), items),
        other => Err(config_error(format!(
            "entry {position} ({name}): expected parameters or a list of parallel jobs, found {}",
            describe(other)
        ))),
    }
}

fn parse_parallel(position: usize, label: Option<String>, items: &[Value]) -> Result<Stage> {
    if items.is_empty() {
        return Err(config_error(format!(
            "entry {position}: parallel stage has no jobs"
        )));
    }

    let jobs = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let context = format!("entry {position}, parallel job {}", index + 1);
            let (name, value) = single_entry(item, &context)?;
            match value {
                Value::Mapping(_) | Value::Null => parse_job(name, value),
                other => Err(config_error(format!(
                    "{context} ({name}): expected parameters, found {}",
                    describe(other)
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    // Jenkins folds identical queued builds into one.
    for (index, job) in jobs.iter().enumerate() {
        if jobs[..index].contains(job) {
            return Err(config_error(format!(
                "entry {position}: job {} is listed twice with the same parameters",
                job.name
            )));
        }
    }

    Ok(Stage::Parallel { label, jobs })
}

fn single_entry<'a>(entry: &'a Value, context: &str) -> Result<(String, &'a Value)> {
    let Value::Mapping(mapping) = entry else {
        return Err(config_error(format!(
            "{context}: expected a single-key mapping, found {}",
            describe(entry)
        )));
    };

    let mut iter = mapping.iter();
    match (iter.next(), iter.next()) {
        (Some((key, value)), None) => {
            let name = key.as_str().ok_or_else(|| {
                config_error(format!("{context}: job name must be a string"))
            })?;
            Ok((name.to_string(), value))
        }
        _ => Err(config_error(format!(
            "{context}: expected exactly one job name, found {} keys",
            mapping.len()
        ))),
    }
}

fn parse_job(name: String, value: &Value) -> Result<JobSpec> {
    let mut parameters = Parameters::new();

    if let Value::Mapping(mapping) = value {
        for (key, value) in mapping {
            let key = key.as_str().ok_or_else(|| {
                config_error(format!("job {name}: parameter names must be strings"))
            })?;
            let value = scalar_text(value).ok_or_else(|| {
                config_error(format!(
                    "job {name}: parameter {key} must be a scalar, found {}",
                    describe(value)
                ))
            })?;
            parameters.insert(key.to_string(), value);
        }
    }

    Ok(JobSpec::new(name, parameters))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn config_error(message: String) -> RunJenkinsError {
    RunJenkinsError::Config(message)
}
