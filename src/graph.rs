//! Graph compiler: turns worker declarations into a validated directed graph.
//!
//! Validation checks run in a fixed order and *all* violations are reported
//! together: unique names, resolvable `to` targets, no self-loops, and no
//! directed cycles. Edges are stored as resolved index lists into the spec
//! arena so the runtime never chases names or cross-referencing pointers.

use crate::config::{ParamMap, ResolvedParams, WorkerDecl};
use crate::error::{GraphIssue, Result, VoxflowError};
use std::collections::HashMap;

/// One validated worker node.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub kind: String,
    pub params: ParamMap,
    pub to: Vec<String>,
}

/// The validated, immutable worker graph.
///
/// Built once at startup from the configuration; read-only afterwards and
/// safe to share across threads.
#[derive(Debug, Clone)]
pub struct WorkerGraph {
    globals: ParamMap,
    specs: Vec<WorkerSpec>,
    /// Resolved downstream indices, parallel to `specs`.
    edges: Vec<Vec<usize>>,
}

impl WorkerGraph {
    /// Compiles declarations into a graph, reporting every violation found.
    pub fn compile(globals: ParamMap, decls: &[WorkerDecl]) -> Result<Self> {
        let mut issues = Vec::new();

        // (1) unique names; index maps each name to its first occurrence
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, decl) in decls.iter().enumerate() {
            if index.insert(decl.name(), i).is_some() {
                issues.push(GraphIssue::DuplicateName {
                    name: decl.name().to_string(),
                });
            }
        }

        // (2) every target declared, (3) no self-loops
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); decls.len()];
        for (i, decl) in decls.iter().enumerate() {
            for target in &decl.to {
                match index.get(target.as_str()) {
                    None => issues.push(GraphIssue::UnknownTarget {
                        worker: decl.name().to_string(),
                        target: target.clone(),
                    }),
                    Some(&j) if j == i => issues.push(GraphIssue::SelfLoop {
                        worker: decl.name().to_string(),
                    }),
                    Some(&j) => edges[i].push(j),
                }
            }
        }

        // (4) acyclicity over the resolvable edges
        find_cycles(decls, &edges, &mut issues);

        if !issues.is_empty() {
            return Err(VoxflowError::InvalidGraph { issues });
        }

        let specs = decls
            .iter()
            .map(|d| WorkerSpec {
                name: d.name().to_string(),
                kind: d.kind.clone(),
                params: d.params.clone(),
                to: d.to.clone(),
            })
            .collect();

        Ok(Self {
            globals,
            specs,
            edges,
        })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[WorkerSpec] {
        &self.specs
    }

    pub fn spec(&self, idx: usize) -> &WorkerSpec {
        &self.specs[idx]
    }

    /// Resolved downstream indices of a worker.
    pub fn downstream(&self, idx: usize) -> &[usize] {
        &self.edges[idx]
    }

    /// A worker with no downstream targets is a sink.
    pub fn is_sink(&self, idx: usize) -> bool {
        self.edges[idx].is_empty()
    }

    /// Global parameter snapshot shared by all workers.
    pub fn globals(&self) -> &ParamMap {
        &self.globals
    }

    /// Merged parameter view for one worker.
    pub fn params(&self, idx: usize) -> ResolvedParams<'_> {
        let spec = &self.specs[idx];
        ResolvedParams::new(&spec.name, &spec.params, &self.globals)
    }
}

/// Depth-first cycle detection; appends one issue per back edge found,
/// naming the workers on the cycle.
fn find_cycles(decls: &[WorkerDecl], edges: &[Vec<usize>], issues: &mut Vec<GraphIssue>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Gray,
        Black,
    }

    fn visit(
        node: usize,
        decls: &[WorkerDecl],
        edges: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        issues: &mut Vec<GraphIssue>,
    ) {
        marks[node] = Mark::Gray;
        stack.push(node);
        for &next in &edges[node] {
            match marks[next] {
                Mark::White => visit(next, decls, edges, marks, stack, issues),
                Mark::Gray => {
                    // Back edge: the cycle is the stack slice from `next` on,
                    // closed with `next` again.
                    let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut workers: Vec<String> = stack[start..]
                        .iter()
                        .map(|&n| decls[n].name().to_string())
                        .collect();
                    workers.push(decls[next].name().to_string());
                    issues.push(GraphIssue::Cycle { workers });
                }
                Mark::Black => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Black;
    }

    let mut marks = vec![Mark::White; decls.len()];
    let mut stack = Vec::new();
    for node in 0..decls.len() {
        if marks[node] == Mark::White {
            visit(node, decls, edges, &mut marks, &mut stack, issues);
        }
    }
}
