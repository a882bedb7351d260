use std::fmt;
use std::sync::Arc;

use crate::tensor::Tensor;

/// Maximum number of source tensors a node may reference.
pub const MAX_SRC: usize = 10;

/// Operation tags a graph node can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Leaf tensor; nothing to compute.
    None,
    Dup,
    Add,
    Mul,
    Scale,
    MulMat,
    RmsNorm,
    SoftMax,
    Rope,
    Silu,
    GetRows,
    Cpy,
    Reshape,
    View,
    Permute,
    Transpose,
}

impl Op {
    /// True for metadata-only reinterpretations of already materialized data.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Op::None | Op::Reshape | Op::View | Op::Permute | Op::Transpose
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::None => "NONE",
            Op::Dup => "DUP",
            Op::Add => "ADD",
            Op::Mul => "MUL",
            Op::Scale => "SCALE",
            Op::MulMat => "MUL_MAT",
            Op::RmsNorm => "RMS_NORM",
            Op::SoftMax => "SOFT_MAX",
            Op::Rope => "ROPE",
            Op::Silu => "SILU",
            Op::GetRows => "GET_ROWS",
            Op::Cpy => "CPY",
            Op::Reshape => "RESHAPE",
            Op::View => "VIEW",
            Op::Permute => "PERMUTE",
            Op::Transpose => "TRANSPOSE",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One operation in a computation graph: its tag, its sources and the
/// tensor it produces. Immutable once built.
#[derive(Debug, Clone)]
pub struct GraphNode {
    op: Op,
    src: Vec<Arc<Tensor>>,
    output: Arc<Tensor>,
}

impl GraphNode {
    /// # Panics
    /// Panics if more than `MAX_SRC` sources are given.
    pub fn new(op: Op, src: Vec<Arc<Tensor>>, output: Arc<Tensor>) -> Self {
        assert!(
            src.len() <= MAX_SRC,
            "node '{}' has {} sources (max {})",
            output.name(),
            src.len(),
            MAX_SRC
        );
        GraphNode { op, src, output }
    }

    /// A node with no computation attached.
    pub fn leaf(tensor: Arc<Tensor>) -> Self {
        GraphNode::new(Op::None, Vec::new(), tensor)
    }

    /// `output = weight x activation`, with the weight as source 0.
    pub fn mul_mat(weight: Arc<Tensor>, activation: Arc<Tensor>, output: Arc<Tensor>) -> Self {
        GraphNode::new(Op::MulMat, vec![weight, activation], output)
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn src(&self, i: usize) -> Option<&Tensor> {
        self.src.get(i).map(|t| t.as_ref())
    }

    pub fn sources(&self) -> &[Arc<Tensor>] {
        &self.src
    }

    pub fn output(&self) -> &Tensor {
        &self.output
    }
}

/// An ordered node list. The order already respects data dependencies.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<GraphNode>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Returns self for builder-style usage.
    pub fn with(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn push(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<GraphNode> for Graph {
    fn from_iter<I: IntoIterator<Item = GraphNode>>(iter: I) -> Self {
        Graph {
            nodes: iter.into_iter().collect(),
        }
    }
}

/// Outcome of a graph execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    /// At least one node could not be computed.
    Failed,
}
