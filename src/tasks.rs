//! Task definitions agents compete on, and the catalog resolving task ids.

use std::{collections::HashMap, fmt, str::FromStr, time::Duration};

use anyhow::bail;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// How a task result is turned into points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoringMethod {
    /// 100 points for finishing, plus a speed bonus.
    Time,
    /// All or nothing.
    Accuracy,
    /// 60% for finishing, 40% speed bonus.
    Composite,
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScoringMethod::Time => "time",
            ScoringMethod::Accuracy => "accuracy",
            ScoringMethod::Composite => "composite",
        })
    }
}

impl FromStr for ScoringMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "time" => Ok(ScoringMethod::Time),
            "accuracy" => Ok(ScoringMethod::Accuracy),
            "composite" => Ok(ScoringMethod::Composite),
            other => bail!("unknown scoring method '{other}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub time_limit: Duration,
    pub max_score: f64,
    pub scoring: ScoringMethod,
    /// Task-specific parameters handed to the executor untouched.
    pub config: Value,
}

impl TaskDefinition {
    pub fn new(
        id: impl Into<String>,
        scoring: ScoringMethod,
        max_score: f64,
        time_limit: Duration,
    ) -> TaskDefinition {
        let id = id.into();
        TaskDefinition {
            name: id.clone(),
            id,
            description: String::new(),
            category: "general".to_string(),
            time_limit,
            max_score,
            scoring,
            config: Value::Null,
        }
    }

    pub fn time_limit_ms(&self) -> u64 {
        self.time_limit.as_millis() as u64
    }
}

/// Resolves configured task ids into task definitions.
pub trait TaskCatalog: Send + Sync {
    /// Definitions for the known ids, in the order given. Unknown ids are skipped.
    fn resolve(&self, ids: &[String]) -> Vec<TaskDefinition>;

    /// Tasks used when a tournament names none that resolve.
    fn default_pool(&self) -> Vec<TaskDefinition>;
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tasks: HashMap<String, TaskDefinition>,
    default_pool: Vec<String>,
}

impl StaticCatalog {
    /// Empty catalog with an empty default pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the built-in puzzle tasks, all of them in the default pool.
    pub fn with_builtin_tasks() -> Self {
        let mut catalog = Self::new();
        for task in builtin_tasks() {
            catalog = catalog.with_default_task(task);
        }
        catalog
    }

    pub fn with_task(mut self, task: TaskDefinition) -> Self {
        self.tasks.insert(task.id.clone(), task);
        self
    }

    pub fn with_default_task(mut self, task: TaskDefinition) -> Self {
        self.default_pool.push(task.id.clone());
        self.with_task(task)
    }
}

impl TaskCatalog for StaticCatalog {
    fn resolve(&self, ids: &[String]) -> Vec<TaskDefinition> {
        ids.iter().filter_map(|id| self.tasks.get(id).cloned()).collect()
    }

    fn default_pool(&self) -> Vec<TaskDefinition> {
        self.resolve(&self.default_pool)
    }
}

fn builtin_tasks() -> Vec<TaskDefinition> {
    let puzzle = |id: &str, name: &str, description: &str, scoring| TaskDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        category: "puzzle".to_string(),
        time_limit: Duration::from_secs(120),
        max_score: 1000.0,
        scoring,
        config: json!({ "game": id, "questions": 10 }),
    };
    vec![
        puzzle(
            "trivia",
            "Trivia Blitz",
            "Answer general knowledge questions",
            ScoringMethod::Composite,
        ),
        puzzle(
            "math",
            "Mental Math",
            "Evaluate arithmetic expressions",
            ScoringMethod::Time,
        ),
        puzzle(
            "word",
            "Word Unscramble",
            "Recover the word from its shuffled letters",
            ScoringMethod::Composite,
        ),
        puzzle(
            "logic",
            "Logic Grid",
            "Deduce the unique solution of a logic puzzle",
            ScoringMethod::Accuracy,
        ),
    ]
}
