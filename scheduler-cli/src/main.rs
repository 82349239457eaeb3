//! Driver binary: loads a DAG description from YAML, runs one pass through
//! `activity_scheduler::Scheduler`, and dumps a YAML result log (and, with
//! `-g`/`--debug`, a GraphViz DOT file).
//!
//! Plays the role the teacher's algorithm binaries (`2021_RTCSA_dynfed`,
//! `2013_ECRTS_basic_global_edf`, ...) play: parse args with `clap`, build
//! the in-memory model, run it, dump results with `serde_yaml`.
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde_derive::{Deserialize, Serialize};

use activity_scheduler::{Action, Outcome, Scheduler, SchedulerConfig, TaskHandle};

#[derive(Parser)]
#[clap(
    name = "activity-scheduler",
    version = "0.1.0",
    about = "Loads a DAG of demo activities from YAML and runs one execution pass."
)]
struct ArgParser {
    /// Path to the DAG description YAML file.
    #[clap(short = 'f', long = "dag_file", required = true)]
    dag_file: String,
    /// Run the pass in parallel mode instead of sequential.
    #[clap(short = 'p', long = "parallel")]
    parallel: bool,
    /// Path to output directory for the result log and DOT dump.
    #[clap(short = 'o', long = "output_dir_path", default_value = "./output")]
    output_dir_path: String,
}

#[derive(Deserialize)]
struct TaskSpec {
    name: String,
    #[serde(default)]
    outcome: OutcomeSpec,
    #[serde(default)]
    can_retry: bool,
    #[serde(default)]
    before: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum OutcomeSpec {
    #[default]
    Success,
    Failure,
    Disable,
    DisableOnce,
}

impl From<OutcomeSpec> for Outcome {
    fn from(spec: OutcomeSpec) -> Self {
        match spec {
            OutcomeSpec::Success => Outcome::Success,
            OutcomeSpec::Failure => Outcome::Failure,
            OutcomeSpec::Disable => Outcome::Disable,
            OutcomeSpec::DisableOnce => Outcome::DisableOnce,
        }
    }
}

#[derive(Deserialize)]
struct DagSpec {
    tasks: Vec<TaskSpec>,
}

/// A fixed-outcome action driving the demo: performs once, reporting the
/// outcome configured in the DAG description.
struct DemoAction {
    name: String,
    outcome: Outcome,
    can_retry: bool,
}

impl Action for DemoAction {
    fn perform(&self) -> Outcome {
        log::info!("performing {}", self.name);
        self.outcome
    }

    fn can_retry(&self) -> bool {
        self.can_retry
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Serialize)]
struct TaskResult {
    name: String,
    enabled: bool,
}

#[derive(Serialize)]
struct PassResult {
    parallel: bool,
    tasks: Vec<TaskResult>,
}

fn build_scheduler(spec: DagSpec, scheduler: &Scheduler) -> HashMap<String, Arc<TaskHandle>> {
    let mut by_name = HashMap::with_capacity(spec.tasks.len());
    for task_spec in &spec.tasks {
        let action = DemoAction {
            name: task_spec.name.clone(),
            outcome: task_spec.outcome.into(),
            can_retry: task_spec.can_retry,
        };
        let handle = scheduler
            .create(Box::new(action))
            .expect("DAG description produced an invalid action");
        if !task_spec.tags.is_empty() {
            let tags = task_spec.tags.iter().map(|t| scheduler.create_tag(t)).collect::<Vec<_>>();
            scheduler.tag(&handle, tags);
        }
        by_name.insert(task_spec.name.clone(), handle);
    }
    for task_spec in &spec.tasks {
        if task_spec.before.is_empty() {
            continue;
        }
        let t = by_name[&task_spec.name].clone();
        let successors = task_spec
            .before
            .iter()
            .map(|name| by_name[name].clone())
            .collect::<Vec<_>>();
        scheduler.before(&t, successors);
    }
    by_name
}

fn main() {
    env_logger::init();
    let args = ArgParser::parse();
    let config = SchedulerConfig::from_env();

    let raw = fs::read_to_string(&args.dag_file).expect("failed to read DAG description file");
    let spec: DagSpec = serde_yaml::from_str(&raw).expect("failed to parse DAG description");

    let scheduler = Scheduler::new(config);
    build_scheduler(spec, &scheduler);

    fs::create_dir_all(&args.output_dir_path).expect("failed to create output directory");

    if config.debug_operations_enabled {
        let dot_path = Path::new(&args.output_dir_path).join("graph.dot");
        fs::write(&dot_path, scheduler.dump_dot()).expect("failed to write DOT dump");
    }

    match scheduler.execute_all(args.parallel) {
        Ok(()) => log::info!("pass completed"),
        Err(err) => log::error!("pass failed: {err}"),
    }

    let tasks = scheduler
        .get_activities(false, &[])
        .into_iter()
        .map(|t| TaskResult {
            name: t.name().to_string(),
            enabled: t.is_enabled(),
        })
        .collect();
    let result = PassResult {
        parallel: args.parallel,
        tasks,
    };
    let yaml = serde_yaml::to_string(&result).expect("failed to serialize result");
    let result_path = Path::new(&args.output_dir_path).join("result.yaml");
    fs::write(result_path, yaml).expect("failed to write result log");
}
