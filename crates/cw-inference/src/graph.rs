//! Causal graph construction and export.
//!
//! The graph is always the textbook backdoor DAG: `treatment → outcome`, plus
//! `confounder → treatment` and `confounder → outcome` for every declared
//! confounder. It is built once per analysis and read-only afterwards.

use cw_core::{Dataset, Error, Result};
use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

/// Correlation magnitude above which two columns count as the same variable.
const DUPLICATE_CORRELATION: f64 = 1.0 - 1e-9;

/// Directed acyclic graph over declared variable names.
#[derive(Debug, Clone)]
pub struct CausalGraph {
    graph: DiGraph<String, ()>,
    treatment: NodeIndex,
    outcome: NodeIndex,
    confounders: Vec<NodeIndex>,
}

/// One directed edge in a [`GraphExport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Parent node.
    pub from: String,
    /// Child node.
    pub to: String,
}

/// Serializable node/edge listing for external rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphExport {
    /// Node names, in insertion order (treatment, outcome, confounders).
    pub nodes: Vec<String>,
    /// Directed edges.
    pub edges: Vec<GraphEdge>,
    /// Treatment node.
    pub treatment: String,
    /// Outcome node.
    pub outcome: String,
}

fn check_name(role: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid_model(
            format!("<{role}>"),
            format!("{role} name must be non-empty"),
            "declare every variable by its column name",
        ));
    }
    Ok(())
}

/// Build the backdoor DAG for one treatment/outcome pair.
///
/// Fails with [`Error::InvalidModel`] when a name is empty, the treatment equals
/// the outcome, a confounder repeats or coincides with the treatment or outcome,
/// or the resulting graph is cyclic.
pub fn build_graph<S: AsRef<str>>(
    treatment: &str,
    outcome: &str,
    confounders: &[S],
) -> Result<CausalGraph> {
    check_name("treatment", treatment)?;
    check_name("outcome", outcome)?;
    if treatment == outcome {
        return Err(Error::invalid_model(
            treatment,
            "treatment and outcome are the same variable",
            "choose a different outcome column",
        ));
    }

    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let t = graph.add_node(treatment.to_string());
    let y = graph.add_node(outcome.to_string());
    graph.add_edge(t, y, ());

    let mut conf_nodes = Vec::with_capacity(confounders.len());
    for c in confounders {
        let c = c.as_ref();
        check_name("confounder", c)?;
        if c == treatment || c == outcome {
            let role = if c == treatment { "treatment" } else { "outcome" };
            return Err(Error::invalid_model(
                c,
                format!("confounder is also the {role}"),
                format!("remove '{c}' from the confounder list"),
            ));
        }
        if graph.node_weights().any(|n| n == c) {
            return Err(Error::invalid_model(
                c,
                "confounder declared more than once",
                "list each confounder once",
            ));
        }
        let node = graph.add_node(c.to_string());
        graph.add_edge(node, t, ());
        graph.add_edge(node, y, ());
        conf_nodes.push(node);
    }

    if is_cyclic_directed(&graph) {
        return Err(Error::invalid_model(
            treatment,
            "declared variables induce a cycle",
            "check that no variable is both a cause and an effect of the treatment",
        ));
    }

    tracing::debug!(
        treatment,
        outcome,
        n_confounders = conf_nodes.len(),
        "built causal graph"
    );
    Ok(CausalGraph { graph, treatment: t, outcome: y, confounders: conf_nodes })
}

impl CausalGraph {
    /// Treatment variable.
    pub fn treatment(&self) -> &str {
        &self.graph[self.treatment]
    }

    /// Outcome variable.
    pub fn outcome(&self) -> &str {
        &self.graph[self.outcome]
    }

    /// Confounders in declaration order.
    pub fn confounders(&self) -> Vec<&str> {
        self.confounders.iter().map(|&n| self.graph[n].as_str()).collect()
    }

    /// All node names in insertion order.
    pub fn nodes(&self) -> Vec<&str> {
        self.graph.node_indices().map(|n| self.graph[n].as_str()).collect()
    }

    /// Number of nodes.
    pub fn n_nodes(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn n_edges(&self) -> usize {
        self.graph.edge_count()
    }

    fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.graph.node_indices().find(|&n| self.graph[n] == name)
    }

    /// Whether the edge `from → to` exists.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        match (self.index_of(from), self.index_of(to)) {
            (Some(a), Some(b)) => self.graph.find_edge(a, b).is_some(),
            _ => false,
        }
    }

    /// Direct parents of `name`, in insertion order.
    pub fn parents(&self, name: &str) -> Vec<&str> {
        let Some(node) = self.index_of(name) else {
            return Vec::new();
        };
        let mut parents: Vec<NodeIndex> =
            self.graph.neighbors_directed(node, Direction::Incoming).collect();
        parents.sort();
        parents.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    /// Node/edge listing for rendering.
    pub fn export(&self) -> GraphExport {
        GraphExport {
            nodes: self.nodes().into_iter().map(str::to_string).collect(),
            edges: self
                .graph
                .edge_references()
                .map(|e| GraphEdge {
                    from: self.graph[e.source()].clone(),
                    to: self.graph[e.target()].clone(),
                })
                .collect(),
            treatment: self.treatment().to_string(),
            outcome: self.outcome().to_string(),
        }
    }

    /// Graphviz DOT rendering.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph causal {\n");
        for e in self.export().edges {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", e.from, e.to));
        }
        out.push('}');
        out
    }
}

fn abs_correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let n = a.len() as f64;
    if a.len() < 2 {
        return None;
    }
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return None;
    }
    Some((sab / (saa * sbb).sqrt()).abs())
}

/// Reject confounders whose data duplicates the treatment or the outcome.
///
/// A renamed copy of the outcome passes the name checks in [`build_graph`] but
/// would make every estimator adjust away the effect. Columns that are equal,
/// or perfectly correlated, with the treatment or outcome fail with
/// [`Error::InvalidModel`]. The dataset must already contain every graph node.
pub fn check_against_dataset(graph: &CausalGraph, dataset: &Dataset) -> Result<()> {
    let roles = [("treatment", graph.treatment()), ("outcome", graph.outcome())];
    for conf in graph.confounders() {
        let c = dataset.column(conf)?;
        for (role, name) in roles {
            let other = dataset.column(name)?;
            let identical = c == other;
            let collinear = abs_correlation(c, other).is_some_and(|r| r > DUPLICATE_CORRELATION);
            if identical || collinear {
                return Err(Error::invalid_model(
                    conf,
                    format!("confounder duplicates the {role} '{name}'"),
                    format!("'{conf}' looks like a renamed copy of '{name}'; remove it from the confounders"),
                ));
            }
        }
    }
    Ok(())
}
