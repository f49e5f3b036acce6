use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{GraphState, Stage};

/// Configuration for graph execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of stages running at once
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_concurrency: 5 }
    }
}

/// Structural problems found while building a graph
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("stage `{0}` is registered twice")]
    DuplicateStage(String),
    #[error("edge references unknown stage `{0}`")]
    UnknownStage(String),
    #[error("no terminal stage was set")]
    MissingTerminal,
    #[error("terminal `{0}` is not a registered stage")]
    UnknownTerminal(String),
    #[error("cycle detected among stages: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("field {field} is written by both `{first}` and `{second}`")]
    DuplicateOutput {
        field: String,
        first: String,
        second: String,
    },
    #[error("stage `{stage}` reads {field}, which is neither seeded nor produced upstream")]
    UnresolvedInput { stage: String, field: String },
}

/// Fatal errors while running a graph; no partial state is returned
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("stage `{stage}` failed: {cause:#}")]
    StageFailed { stage: String, cause: anyhow::Error },
    #[error("stage `{stage}` wrote undeclared field {field}")]
    UndeclaredWrite { stage: String, field: String },
    #[error("stage task aborted: {0}")]
    TaskAborted(String),
    #[error("graph stalled after {completed} of {total} stages")]
    Stalled { completed: usize, total: usize },
}

/// Collects stages and edges, then validates them into a [`Graph`]
pub struct GraphBuilder<S: GraphState> {
    stages: Vec<Arc<dyn Stage<S>>>,
    edges: Vec<(String, String)>,
    seeds: HashSet<S::Field>,
    terminal: Option<String>,
    config: ExecutorConfig,
}

impl<S: GraphState> Default for GraphBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> GraphBuilder<S> {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            edges: Vec::new(),
            seeds: HashSet::new(),
            terminal: None,
            config: ExecutorConfig::default(),
        }
    }

    /// Fields present in the initial state
    pub fn seed_fields(mut self, fields: impl IntoIterator<Item = S::Field>) -> Self {
        self.seeds.extend(fields);
        self
    }

    pub fn stage(mut self, stage: impl Stage<S> + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// `to` starts only after `from` completes
    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push((from.to_string(), to.to_string()));
        self
    }

    pub fn terminal(mut self, name: &str) -> Self {
        self.terminal = Some(name.to_string());
        self
    }

    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Graph<S>, GraphError> {
        let n = self.stages.len();
        let name = |i: usize| self.stages[i].name().to_string();

        let mut index: HashMap<&'static str, usize> = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if index.insert(stage.name(), i).is_some() {
                return Err(GraphError::DuplicateStage(stage.name().to_string()));
            }
        }

        let lookup = |stage: &str| {
            index
                .get(stage)
                .copied()
                .ok_or_else(|| GraphError::UnknownStage(stage.to_string()))
        };

        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut succs: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, to) in &self.edges {
            let (f, t) = (lookup(from)?, lookup(to)?);
            if !succs[f].contains(&t) {
                succs[f].push(t);
                preds[t].push(f);
            }
        }

        // Output fields are partitioned between stages
        let mut producers: HashMap<S::Field, usize> = HashMap::new();
        for (i, stage) in self.stages.iter().enumerate() {
            for &field in stage.outputs() {
                if let Some(&first) = producers.get(&field) {
                    return Err(GraphError::DuplicateOutput {
                        field: format!("{field:?}"),
                        first: name(first),
                        second: name(i),
                    });
                }
                producers.insert(field, i);
            }
        }

        let terminal_name = self.terminal.clone().ok_or(GraphError::MissingTerminal)?;
        let terminal = index
            .get(terminal_name.as_str())
            .copied()
            .ok_or(GraphError::UnknownTerminal(terminal_name))?;

        // Kahn's algorithm, ties broken by registration order
        let mut indegree: Vec<usize> = preds.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &s in &succs[i] {
                indegree[s] -= 1;
                if indegree[s] == 0 {
                    queue.push_back(s);
                }
            }
        }
        if order.len() < n {
            let stuck = (0..n).filter(|&i| indegree[i] > 0).map(name).collect();
            return Err(GraphError::Cycle(stuck));
        }

        let mut ancestors: Vec<HashSet<usize>> = vec![HashSet::new(); n];
        for &i in &order {
            let mut acc = HashSet::new();
            for &p in &preds[i] {
                acc.insert(p);
                acc.extend(ancestors[p].iter().copied());
            }
            ancestors[i] = acc;
        }

        let mut reachable = vec![false; n];
        reachable[terminal] = true;
        for &a in &ancestors[terminal] {
            reachable[a] = true;
        }

        for &i in order.iter().filter(|&&i| reachable[i]) {
            for field in self.stages[i].inputs() {
                if self.seeds.contains(field) {
                    continue;
                }
                match producers.get(field) {
                    Some(p) if ancestors[i].contains(p) => {}
                    _ => {
                        return Err(GraphError::UnresolvedInput {
                            stage: name(i),
                            field: format!("{field:?}"),
                        });
                    }
                }
            }
        }

        let order: Vec<usize> = order.into_iter().filter(|&i| reachable[i]).collect();
        let indegree = preds.iter().map(Vec::len).collect();

        Ok(Graph {
            stages: self.stages,
            succs,
            indegree,
            reachable,
            order,
            terminal,
            config: self.config,
        })
    }
}

/// A validated stage graph, reusable across runs
pub struct Graph<S: GraphState> {
    stages: Vec<Arc<dyn Stage<S>>>,
    succs: Vec<Vec<usize>>,
    indegree: Vec<usize>,
    /// Stages in the terminal's ancestor closure
    reachable: Vec<bool>,
    /// Reachable stages in topological order
    order: Vec<usize>,
    terminal: usize,
    config: ExecutorConfig,
}

impl<S: GraphState> Graph<S> {
    /// Names of the stages a run executes, in topological order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.order.iter().map(|&i| self.stages[i].name()).collect()
    }

    pub fn terminal_name(&self) -> &'static str {
        self.stages[self.terminal].name()
    }

    /// Execute every stage the terminal depends on, exactly once.
    ///
    /// A stage starts once all of its predecessors have merged their
    /// updates. Any stage error aborts the run and cancels stages still in
    /// flight.
    pub async fn run(&self, initial: S) -> Result<S, PipelineError> {
        let total = self.order.len();
        let limit = self.config.max_concurrency.max(1);

        let mut remaining = self.indegree.clone();
        let mut ready: VecDeque<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&i| remaining[i] == 0)
            .collect();

        let mut state = Arc::new(initial);
        let mut in_flight: JoinSet<(usize, anyhow::Result<S::Update>)> = JoinSet::new();
        let mut completed = 0usize;

        loop {
            while in_flight.len() < limit {
                let Some(idx) = ready.pop_front() else {
                    break;
                };
                let stage = Arc::clone(&self.stages[idx]);
                let snapshot = Arc::clone(&state);
                debug!(stage = stage.name(), "Starting stage");
                in_flight.spawn(async move {
                    let result = stage.run(snapshot.as_ref()).await;
                    (idx, result)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            let (idx, result) = joined.map_err(|e| PipelineError::TaskAborted(e.to_string()))?;
            let stage = &self.stages[idx];

            let update = match result {
                Ok(update) => update,
                Err(cause) => {
                    warn!(stage = stage.name(), "Stage failed: {:#}", cause);
                    return Err(PipelineError::StageFailed {
                        stage: stage.name().to_string(),
                        cause,
                    });
                }
            };

            let declared = stage.outputs();
            if let Some(field) = S::written_fields(&update)
                .into_iter()
                .find(|f| !declared.contains(f))
            {
                return Err(PipelineError::UndeclaredWrite {
                    stage: stage.name().to_string(),
                    field: format!("{field:?}"),
                });
            }

            Arc::make_mut(&mut state).merge(update);
            completed += 1;
            debug!(stage = stage.name(), completed, total, "Stage merged");

            for &next in &self.succs[idx] {
                if !self.reachable[next] {
                    continue;
                }
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        if completed < total {
            return Err(PipelineError::Stalled { completed, total });
        }

        Ok(Arc::try_unwrap(state).unwrap_or_else(|shared| (*shared).clone()))
    }
}
