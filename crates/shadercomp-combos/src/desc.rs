use serde::Deserialize;

/// One preprocessor axis: a named inclusive integer range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ComboAxis {
    pub name: String,
    pub min: i32,
    pub max: i32,
}

impl ComboAxis {
    /// Number of distinct values on this axis.
    pub fn len(&self) -> u64 {
        debug_assert!(self.min <= self.max);
        (i64::from(self.max) - i64::from(self.min) + 1) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }
}

/// Comparison operator inside a skip expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn eval(self, lhs: i32, rhs: i32) -> bool {
        match self {
            CmpOp::Eq => lhs == rhs,
            CmpOp::Ne => lhs != rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Gt => lhs > rhs,
            CmpOp::Ge => lhs >= rhs,
        }
    }
}

/// A boolean predicate over axis values marking a combo as not worth
/// compiling.
///
/// The text parser that produces these trees is an external collaborator;
/// this is its pre-parsed wire format.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum SkipExpr {
    Not(Box<SkipExpr>),
    And(Box<SkipExpr>, Box<SkipExpr>),
    Or(Box<SkipExpr>, Box<SkipExpr>),
    Cmp {
        axis: String,
        op: CmpOp,
        value: i32,
    },
}

impl SkipExpr {
    /// Every axis name referenced by this expression, depth-first.
    pub fn referenced_axes(&self, out: &mut Vec<String>) {
        match self {
            SkipExpr::Not(inner) => inner.referenced_axes(out),
            SkipExpr::And(a, b) | SkipExpr::Or(a, b) => {
                a.referenced_axes(out);
                b.referenced_axes(out);
            }
            SkipExpr::Cmp { axis, .. } => out.push(axis.clone()),
        }
    }
}

/// Everything the external parser extracts from one shader source entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ShaderDescription {
    /// Archive-facing shader name, e.g. `example_ps30`.
    pub name: String,
    /// Source file handed to the compile tool.
    pub source_file: String,
    /// Shader model tag, e.g. `ps_3_0`.
    pub shader_version: String,
    #[serde(default)]
    pub static_axes: Vec<ComboAxis>,
    #[serde(default)]
    pub dynamic_axes: Vec<ComboAxis>,
    #[serde(default)]
    pub skips: Vec<SkipExpr>,
    #[serde(default)]
    pub centroid_mask: u32,
}
