// Abstract Syntax Tree definitions
// Produced by the parser, consumed by the compiler

use serde::{Deserialize, Serialize};

use crate::value::JValue;

/// AST Node types
///
/// Every node is a pure expression: the current input and variable bindings
/// flow in at evaluation time, nothing is stored on the node itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstNode {
    /// `.`
    Identity,

    /// `..` (same as `recurse`)
    RecurseDefault,

    /// Number, string (without interpolation), `true`, `false`, `null`
    Literal(JValue),

    /// `$name`
    Variable(String),

    /// `$__loc__`
    Location { line: usize },

    /// `.foo`, `."foo"`, `.[expr]`, `base[expr]`
    Index {
        base: Box<AstNode>,
        index: Box<AstNode>,
    },

    /// `.[from:to]` with either bound optional
    Slice {
        base: Box<AstNode>,
        from: Option<Box<AstNode>>,
        to: Option<Box<AstNode>>,
    },

    /// `.[]`
    Iterate { base: Box<AstNode> },

    /// `expr?`
    Optional(Box<AstNode>),

    /// `lhs | rhs`
    Pipe { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// `lhs, rhs`
    Comma { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// `lhs // rhs`
    Alternative { lhs: Box<AstNode>, rhs: Box<AstNode> },

    /// Arithmetic, comparison and boolean operators
    Binary {
        op: BinaryOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// `=`, `|=`, `+=`, ... `//=`
    Assign {
        op: AssignOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },

    /// Unary minus
    Negate(Box<AstNode>),

    /// `[expr]` or `[]`
    Array(Option<Box<AstNode>>),

    /// `{k: v, ...}` with shorthand forms already expanded
    Object(Vec<(AstNode, AstNode)>),

    /// Builtin or user function call
    Function { name: String, args: Vec<AstNode> },

    /// `if c then t (elif c then t)* (else e)? end`
    If {
        branches: Vec<(AstNode, AstNode)>,
        otherwise: Option<Box<AstNode>>,
    },

    /// `try body (catch handler)?`
    Try {
        body: Box<AstNode>,
        handler: Option<Box<AstNode>>,
    },

    /// `reduce source as pattern (init; update)`
    Reduce {
        source: Box<AstNode>,
        pattern: Pattern,
        init: Box<AstNode>,
        update: Box<AstNode>,
    },

    /// `foreach source as pattern (init; update; extract?)`
    Foreach {
        source: Box<AstNode>,
        pattern: Pattern,
        init: Box<AstNode>,
        update: Box<AstNode>,
        extract: Option<Box<AstNode>>,
    },

    /// `source as pattern | body`
    Bind {
        source: Box<AstNode>,
        pattern: Pattern,
        body: Box<AstNode>,
    },

    /// `def name(params): body; rest`
    FuncDef { def: FuncDef, rest: Box<AstNode> },

    /// `label $name | body`
    Label { name: String, body: Box<AstNode> },

    /// `break $name`
    Break(String),

    /// Standalone `@name`
    Format(String),

    /// `"...\(expr)..."`, optionally prefixed by `@name`
    FormatString {
        format: Option<String>,
        parts: Vec<StringPart>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StringPart {
    Literal(String),
    Expr(AstNode),
}

/// Destructuring target of `as`, `reduce` and `foreach`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    /// `$name`
    Variable(String),
    /// `[p1, p2, ...]`
    Array(Vec<Pattern>),
    /// `{key: p, $name, ...}`
    Object(Vec<ObjectPatternEntry>),
}

/// One entry of an object pattern.
///
/// `$name` gives `key = "name"` and `bind = Some("name")`; `$name: p` binds
/// both; `key: p`, `"key": p` and `(expr): p` only destructure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatternEntry {
    pub key: AstNode,
    pub bind: Option<String>,
    pub value: Option<Pattern>,
}

impl Pattern {
    /// Variable names bound by this pattern, in binding order.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Pattern::Variable(name) => out.push(name),
            Pattern::Array(items) => items.iter().for_each(|p| p.collect_variables(out)),
            Pattern::Object(entries) => {
                for entry in entries {
                    if let Some(name) = &entry.bind {
                        out.push(name);
                    }
                    if let Some(p) = &entry.value {
                        p.collect_variables(out);
                    }
                }
            }
        }
    }
}

/// `def name(params): body;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Box<AstNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Param {
    /// `f`: a filter argument, evaluated lazily in the caller's scope
    Filter(String),
    /// `$x`: a value argument, bound once per output of the argument
    Value(String),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

/// Update-assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    /// `lhs = rhs`
    Set,
    /// `lhs |= f`
    Update,
    /// `lhs += rhs` and friends
    Arithmetic(BinaryOp),
    /// `lhs //= rhs`
    Alternative,
}

impl AstNode {
    pub fn literal(v: impl Into<JValue>) -> Self {
        AstNode::Literal(v.into())
    }

    pub fn variable(name: impl Into<String>) -> Self {
        AstNode::Variable(name.into())
    }

    /// `.name` applied to `base`
    pub fn field(base: AstNode, name: impl Into<String>) -> Self {
        AstNode::Index {
            base: Box::new(base),
            index: Box::new(AstNode::Literal(JValue::string(name.into()))),
        }
    }

    pub fn pipe(lhs: AstNode, rhs: AstNode) -> Self {
        AstNode::Pipe {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn call(name: impl Into<String>, args: Vec<AstNode>) -> Self {
        AstNode::Function {
            name: name.into(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ast_node_creation() {
        assert_eq!(AstNode::literal(1.0), AstNode::Literal(JValue::Number(1.0)));
        match AstNode::field(AstNode::Identity, "a") {
            AstNode::Index { base, index } => {
                assert_eq!(*base, AstNode::Identity);
                assert_eq!(*index, AstNode::literal("a"));
            }
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn test_pattern_variables() {
        let pattern = Pattern::Array(vec![
            Pattern::Variable("a".into()),
            Pattern::Object(vec![ObjectPatternEntry {
                key: AstNode::literal("b"),
                bind: Some("b".into()),
                value: Some(Pattern::Variable("c".into())),
            }]),
        ]);
        assert_eq!(pattern.variables(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ast_serializes() {
        let ast = AstNode::pipe(AstNode::Identity, AstNode::call("length", vec![]));
        let json = serde_json::to_string(&ast).unwrap();
        assert!(json.contains("length"));
    }
}
