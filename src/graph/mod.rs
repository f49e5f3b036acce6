//! Stage graph: shared-state DAG execution.
//!
//! Stages read an immutable snapshot of the run state and return a partial
//! update naming only the fields they own. The executor starts every stage
//! whose predecessors have all completed and merges updates one at a time,
//! so stages never contend for the state.

pub mod executor;

pub use executor::*;

use std::fmt::Debug;
use std::hash::Hash;

use async_trait::async_trait;

/// State threaded through a graph run
pub trait GraphState: Clone + Send + Sync + 'static {
    /// Key identifying one field of the state
    type Field: Copy + Eq + Hash + Debug + Send + Sync + 'static;
    /// Partial update returned by a stage
    type Update: Send + 'static;

    /// Fields an update would write
    fn written_fields(update: &Self::Update) -> Vec<Self::Field>;

    /// Apply an update; later writes to a field replace earlier ones
    fn merge(&mut self, update: Self::Update);
}

/// One node of the graph
#[async_trait]
pub trait Stage<S: GraphState>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fields read from the snapshot
    fn inputs(&self) -> &'static [S::Field];

    /// Fields this stage owns; no other stage may write them
    fn outputs(&self) -> &'static [S::Field];

    async fn run(&self, state: &S) -> anyhow::Result<S::Update>;
}
