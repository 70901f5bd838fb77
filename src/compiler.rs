//! Compiler: lowers an `AstNode` tree into a resolved `CompiledExpr` tree.
//!
//! The compiler does a single recursive traversal of the AST. Every name is
//! resolved here: variables, labels and user functions become de Bruijn
//! slots into the runtime environment, builtins become `Builtin` enum
//! values, and literals are interned into the program's constant pool.
//! Nothing in this module runs user code.

use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::{AssignOp, AstNode, BinaryOp, FuncDef, ObjectPatternEntry, Param, Pattern, StringPart};
use crate::format::Format;
use crate::functions::{self, Builtin};
use crate::parser::{self, SyntaxError};
use crate::value::JValue;
use crate::vm::Program;

/// Compile errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("{name}/{arity} is not defined")]
    UndefinedFunction { name: String, arity: usize },

    #[error("${0} is not defined")]
    UndefinedVariable(String),

    #[error("label ${0} is not defined")]
    UndefinedLabel(String),

    #[error("@{0} is not a valid format")]
    UnknownFormat(String),
}

// ---------------------------------------------------------------------------
// Compiled representation
// ---------------------------------------------------------------------------

/// Resolved expression tree executed by the evaluator.
///
/// Slot numbers count bindings from the innermost one outwards.
#[derive(Debug, Clone)]
pub(crate) enum CompiledExpr {
    Identity,
    RecurseDefault,
    /// Index into `Program::const_pool`.
    Const(u32),
    Var(usize),
    Index {
        base: Box<CompiledExpr>,
        index: Box<CompiledExpr>,
    },
    Slice {
        base: Box<CompiledExpr>,
        from: Option<Box<CompiledExpr>>,
        to: Option<Box<CompiledExpr>>,
    },
    Iterate(Box<CompiledExpr>),
    Pipe(Box<CompiledExpr>, Box<CompiledExpr>),
    Comma(Box<CompiledExpr>, Box<CompiledExpr>),
    Alternative(Box<CompiledExpr>, Box<CompiledExpr>),
    Binary {
        op: BinaryOp,
        lhs: Box<CompiledExpr>,
        rhs: Box<CompiledExpr>,
    },
    Negate(Box<CompiledExpr>),
    Array(Option<Box<CompiledExpr>>),
    Object(Vec<(CompiledExpr, CompiledExpr)>),
    If {
        branches: Vec<(CompiledExpr, CompiledExpr)>,
        otherwise: Box<CompiledExpr>,
    },
    /// `try body catch handler`; `body?` has no handler.
    Try {
        body: Box<CompiledExpr>,
        handler: Option<Box<CompiledExpr>>,
    },
    Reduce {
        source: Box<CompiledExpr>,
        pattern: CompiledPattern,
        init: Box<CompiledExpr>,
        update: Box<CompiledExpr>,
    },
    Foreach {
        source: Box<CompiledExpr>,
        pattern: CompiledPattern,
        init: Box<CompiledExpr>,
        update: Box<CompiledExpr>,
        extract: Option<Box<CompiledExpr>>,
    },
    Bind {
        source: Box<CompiledExpr>,
        pattern: CompiledPattern,
        body: Box<CompiledExpr>,
    },
    FuncDef {
        func: Box<CompiledFunc>,
        rest: Box<CompiledExpr>,
    },
    /// Call of a user function bound at `slot`; arguments become closures.
    CallDef {
        slot: usize,
        args: Vec<CompiledExpr>,
    },
    /// Call of a filter parameter bound at `slot`.
    CallParam(usize),
    CallBuiltin {
        builtin: Builtin,
        args: Vec<CompiledExpr>,
    },
    Label(Box<CompiledExpr>),
    Break(usize),
    Format(Format),
    FormatString {
        format: Format,
        parts: Vec<CompiledStringPart>,
    },
    Assign {
        op: AssignOp,
        lhs: Box<CompiledExpr>,
        rhs: Box<CompiledExpr>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledFunc {
    pub name: String,
    pub arity: usize,
    pub body: CompiledExpr,
}

#[derive(Debug, Clone)]
pub(crate) enum CompiledStringPart {
    Literal(String),
    Expr(CompiledExpr),
}

/// Destructuring pattern. Runtime binding order equals `Pattern::variables`.
#[derive(Debug, Clone)]
pub(crate) enum CompiledPattern {
    Var,
    Array(Vec<CompiledPattern>),
    Object(Vec<CompiledObjectEntry>),
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledObjectEntry {
    /// Evaluated against the bound value's input, in the scope outside the pattern.
    pub key: CompiledExpr,
    /// `$name` entries also bind the looked-up value.
    pub bind: bool,
    pub value: Option<CompiledPattern>,
}


// ---------------------------------------------------------------------------
// Compiler state
// ---------------------------------------------------------------------------

/// One lexical binding. Each entry matches exactly one runtime `Env` push.
#[derive(Debug, Clone)]
enum ScopeEntry {
    Var(String),
    Def { name: String, arity: usize },
    Param(String),
    Label(String),
}

pub(crate) struct Compiler {
    scope: Vec<ScopeEntry>,
    const_pool: Vec<JValue>,
}

impl Compiler {
    pub(crate) fn new() -> Self {
        Compiler {
            scope: Vec::new(),
            const_pool: Vec::new(),
        }
    }

    // ── Internal helpers ────────────────────────────────────────────────

    /// Intern a `JValue` constant and return its pool index.
    fn intern_const(&mut self, v: JValue) -> u32 {
        // Linear scan is fine for the small pools real filters produce.
        for (i, c) in self.const_pool.iter().enumerate() {
            if c.type_name() == v.type_name() && c == &v {
                return i as u32;
            }
        }
        let idx = self.const_pool.len() as u32;
        self.const_pool.push(v);
        idx
    }

    /// Slot of the innermost scope entry matching `pred`.
    fn resolve(&self, pred: impl Fn(&ScopeEntry) -> bool) -> Option<usize> {
        self.scope.iter().rev().position(pred)
    }

    fn with_scope<T>(
        &mut self,
        entries: impl IntoIterator<Item = ScopeEntry>,
        f: impl FnOnce(&mut Self) -> Result<T, CompileError>,
    ) -> Result<T, CompileError> {
        let mark = self.scope.len();
        self.scope.extend(entries);
        let result = f(self);
        self.scope.truncate(mark);
        result
    }

    fn boxed(&mut self, ast: &AstNode) -> Result<Box<CompiledExpr>, CompileError> {
        Ok(Box::new(self.compile_expr(ast)?))
    }

    // ── Core compilation ─────────────────────────────────────────────────

    fn compile_expr(&mut self, ast: &AstNode) -> Result<CompiledExpr, CompileError> {
        Ok(match ast {
            AstNode::Identity => CompiledExpr::Identity,
            AstNode::RecurseDefault => CompiledExpr::RecurseDefault,
            AstNode::Literal(v) => CompiledExpr::Const(self.intern_const(v.clone())),
            AstNode::Variable(name) => {
                let slot = self
                    .resolve(|e| matches!(e, ScopeEntry::Var(n) if n == name))
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                CompiledExpr::Var(slot)
            }
            AstNode::Location { line } => {
                let mut loc = IndexMap::new();
                loc.insert("file".to_string(), JValue::string("<stdin>"));
                loc.insert("line".to_string(), JValue::from(*line));
                CompiledExpr::Const(self.intern_const(JValue::object(loc)))
            }
            AstNode::Index { base, index } => CompiledExpr::Index {
                base: self.boxed(base)?,
                index: self.boxed(index)?,
            },
            AstNode::Slice { base, from, to } => CompiledExpr::Slice {
                base: self.boxed(base)?,
                from: from.as_deref().map(|e| self.boxed(e)).transpose()?,
                to: to.as_deref().map(|e| self.boxed(e)).transpose()?,
            },
            AstNode::Iterate { base } => CompiledExpr::Iterate(self.boxed(base)?),
            AstNode::Optional(body) => CompiledExpr::Try {
                body: self.boxed(body)?,
                handler: None,
            },
            AstNode::Pipe { lhs, rhs } => CompiledExpr::Pipe(self.boxed(lhs)?, self.boxed(rhs)?),
            AstNode::Comma { lhs, rhs } => CompiledExpr::Comma(self.boxed(lhs)?, self.boxed(rhs)?),
            AstNode::Alternative { lhs, rhs } => {
                CompiledExpr::Alternative(self.boxed(lhs)?, self.boxed(rhs)?)
            }
            AstNode::Binary { op, lhs, rhs } => CompiledExpr::Binary {
                op: *op,
                lhs: self.boxed(lhs)?,
                rhs: self.boxed(rhs)?,
            },
            AstNode::Assign { op, lhs, rhs } => CompiledExpr::Assign {
                op: *op,
                lhs: self.boxed(lhs)?,
                rhs: self.boxed(rhs)?,
            },
            AstNode::Negate(operand) => CompiledExpr::Negate(self.boxed(operand)?),
            AstNode::Array(inner) => {
                CompiledExpr::Array(inner.as_deref().map(|e| self.boxed(e)).transpose()?)
            }
            AstNode::Object(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.compile_expr(k)?, self.compile_expr(v)?));
                }
                CompiledExpr::Object(out)
            }
            AstNode::Function { name, args } => self.compile_call(name, args)?,
            AstNode::If { branches, otherwise } => {
                let mut out = Vec::with_capacity(branches.len());
                for (cond, then) in branches {
                    out.push((self.compile_expr(cond)?, self.compile_expr(then)?));
                }
                let otherwise = match otherwise {
                    Some(e) => self.boxed(e)?,
                    None => Box::new(CompiledExpr::Identity),
                };
                CompiledExpr::If {
                    branches: out,
                    otherwise,
                }
            }
            AstNode::Try { body, handler } => CompiledExpr::Try {
                body: self.boxed(body)?,
                handler: handler.as_deref().map(|e| self.boxed(e)).transpose()?,
            },
            AstNode::Reduce {
                source,
                pattern,
                init,
                update,
            } => {
                let source = self.boxed(source)?;
                let init = self.boxed(init)?;
                let compiled = self.compile_pattern(pattern)?;
                let update = self.with_scope(pattern_scope(pattern), |c| c.boxed(update))?;
                CompiledExpr::Reduce {
                    source,
                    pattern: compiled,
                    init,
                    update,
                }
            }
            AstNode::Foreach {
                source,
                pattern,
                init,
                update,
                extract,
            } => {
                let source = self.boxed(source)?;
                let init = self.boxed(init)?;
                let compiled = self.compile_pattern(pattern)?;
                let (update, extract) = self.with_scope(pattern_scope(pattern), |c| {
                    let update = c.boxed(update)?;
                    let extract = extract.as_deref().map(|e| c.boxed(e)).transpose()?;
                    Ok((update, extract))
                })?;
                CompiledExpr::Foreach {
                    source,
                    pattern: compiled,
                    init,
                    update,
                    extract,
                }
            }
            AstNode::Bind {
                source,
                pattern,
                body,
            } => {
                let source = self.boxed(source)?;
                let compiled = self.compile_pattern(pattern)?;
                let body = self.with_scope(pattern_scope(pattern), |c| c.boxed(body))?;
                CompiledExpr::Bind {
                    source,
                    pattern: compiled,
                    body,
                }
            }
            AstNode::FuncDef { def, rest } => {
                let func = self.compile_funcdef(def)?;
                let entry = ScopeEntry::Def {
                    name: def.name.clone(),
                    arity: def.params.len(),
                };
                let rest = self.with_scope([entry], |c| c.boxed(rest))?;
                CompiledExpr::FuncDef {
                    func: Box::new(func),
                    rest,
                }
            }
            AstNode::Label { name, body } => {
                let body = self.with_scope([ScopeEntry::Label(name.clone())], |c| c.boxed(body))?;
                CompiledExpr::Label(body)
            }
            AstNode::Break(name) => {
                let slot = self
                    .resolve(|e| matches!(e, ScopeEntry::Label(n) if n == name))
                    .ok_or_else(|| CompileError::UndefinedLabel(name.clone()))?;
                CompiledExpr::Break(slot)
            }
            AstNode::Format(name) => CompiledExpr::Format(resolve_format(name)?),
            AstNode::FormatString { format, parts } => {
                let format = match format {
                    Some(name) => resolve_format(name)?,
                    None => Format::Text,
                };
                let mut out = Vec::with_capacity(parts.len());
                for part in parts {
                    out.push(match part {
                        StringPart::Literal(s) => CompiledStringPart::Literal(s.clone()),
                        StringPart::Expr(e) => CompiledStringPart::Expr(self.compile_expr(e)?),
                    });
                }
                CompiledExpr::FormatString { format, parts: out }
            }
        })
    }

    /// User definitions and filter parameters shadow builtins; the innermost
    /// matching name/arity wins.
    fn compile_call(&mut self, name: &str, args: &[AstNode]) -> Result<CompiledExpr, CompileError> {
        let arity = args.len();
        let slot = self.resolve(|e| match e {
            ScopeEntry::Def { name: n, arity: a } => n == name && *a == arity,
            ScopeEntry::Param(n) => arity == 0 && n == name,
            _ => false,
        });

        let mut compiled_args = Vec::with_capacity(arity);
        for arg in args {
            compiled_args.push(self.compile_expr(arg)?);
        }

        if let Some(slot) = slot {
            return Ok(match &self.scope[self.scope.len() - 1 - slot] {
                ScopeEntry::Param(_) => CompiledExpr::CallParam(slot),
                _ => CompiledExpr::CallDef {
                    slot,
                    args: compiled_args,
                },
            });
        }

        match functions::lookup(name, arity) {
            Some(builtin) => Ok(CompiledExpr::CallBuiltin {
                builtin,
                args: compiled_args,
            }),
            None => Err(CompileError::UndefinedFunction {
                name: name.to_string(),
                arity,
            }),
        }
    }

    /// Body scope: definition site, the function itself, then its parameters.
    /// `$x` parameters are bound from their filter counterpart, first one outermost.
    fn compile_funcdef(&mut self, def: &FuncDef) -> Result<CompiledFunc, CompileError> {
        let mut entries = vec![ScopeEntry::Def {
            name: def.name.clone(),
            arity: def.params.len(),
        }];
        for param in &def.params {
            entries.push(ScopeEntry::Param(match param {
                Param::Filter(n) | Param::Value(n) => n.clone(),
            }));
        }

        let body = self.with_scope(entries, |c| c.compile_value_params(&def.params, 0, &def.body))?;
        Ok(CompiledFunc {
            name: def.name.clone(),
            arity: def.params.len(),
            body,
        })
    }

    fn compile_value_params(
        &mut self,
        params: &[Param],
        idx: usize,
        body: &AstNode,
    ) -> Result<CompiledExpr, CompileError> {
        let Some(param) = params.get(idx) else {
            return self.compile_expr(body);
        };
        match param {
            Param::Filter(_) => self.compile_value_params(params, idx + 1, body),
            Param::Value(name) => {
                let slot = self
                    .resolve(|e| matches!(e, ScopeEntry::Param(n) if n == name))
                    .ok_or_else(|| CompileError::UndefinedFunction {
                        name: name.clone(),
                        arity: 0,
                    })?;
                let inner = self.with_scope([ScopeEntry::Var(name.clone())], |c| {
                    c.compile_value_params(params, idx + 1, body)
                })?;
                Ok(CompiledExpr::Bind {
                    source: Box::new(CompiledExpr::CallParam(slot)),
                    pattern: CompiledPattern::Var,
                    body: Box::new(inner),
                })
            }
        }
    }

    fn compile_pattern(&mut self, pattern: &Pattern) -> Result<CompiledPattern, CompileError> {
        Ok(match pattern {
            Pattern::Variable(_) => CompiledPattern::Var,
            Pattern::Array(items) => CompiledPattern::Array(
                items
                    .iter()
                    .map(|p| self.compile_pattern(p))
                    .collect::<Result<_, _>>()?,
            ),
            Pattern::Object(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for ObjectPatternEntry { key, bind, value } in entries {
                    out.push(CompiledObjectEntry {
                        key: self.compile_expr(key)?,
                        bind: bind.is_some(),
                        value: value.as_ref().map(|p| self.compile_pattern(p)).transpose()?,
                    });
                }
                CompiledPattern::Object(out)
            }
        })
    }

    pub(crate) fn finish(self, root: CompiledExpr) -> Program {
        Program::new(root, self.const_pool)
    }
}

fn pattern_scope(pattern: &Pattern) -> Vec<ScopeEntry> {
    pattern
        .variables()
        .into_iter()
        .map(|n| ScopeEntry::Var(n.to_string()))
        .collect()
}

fn resolve_format(name: &str) -> Result<Format, CompileError> {
    Format::from_name(name).ok_or_else(|| CompileError::UnknownFormat(name.to_string()))
}

/// Compile a parsed filter into a runnable program.
pub fn compile(ast: &AstNode) -> Result<Program, CompileError> {
    let mut compiler = Compiler::new();
    let root = compiler.compile_expr(ast)?;
    Ok(compiler.finish(root))
}

/// Lex, parse and compile filter source text.
pub fn compile_str(source: &str) -> Result<Program, CompileError> {
    let ast = parser::parse(source)?;
    compile(&ast)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(src: &str) -> Program {
        compile_str(src).unwrap()
    }

    #[test]
    fn test_constants_are_interned() {
        let program = compiled("1, 1, \"a\", 1");
        assert_eq!(program.const_pool().len(), 2);
    }

    #[test]
    fn test_true_and_one_are_distinct_constants() {
        let program = compiled("1, true, null, false");
        assert_eq!(program.const_pool().len(), 4);
    }

    #[test]
    fn test_undefined_names() {
        assert_eq!(
            compile_str("foo(1)").unwrap_err(),
            CompileError::UndefinedFunction {
                name: "foo".into(),
                arity: 1
            }
        );
        assert_eq!(
            compile_str("$nope").unwrap_err(),
            CompileError::UndefinedVariable("nope".into())
        );
        assert_eq!(
            compile_str("break $out").unwrap_err(),
            CompileError::UndefinedLabel("out".into())
        );
        assert_eq!(
            compile_str("@nope").unwrap_err(),
            CompileError::UnknownFormat("nope".into())
        );
    }

    #[test]
    fn test_arity_mismatch_is_compile_error() {
        assert!(matches!(
            compile_str("length(1)"),
            Err(CompileError::UndefinedFunction { .. })
        ));
        assert!(matches!(
            compile_str("def f(g): g; f"),
            Err(CompileError::UndefinedFunction { .. })
        ));
        assert_eq!(compile_str("map").unwrap_err().to_string(), "map/0 is not defined");
    }

    #[test]
    fn test_scoping() {
        assert!(compile_str(". as $x | $x").is_ok());
        assert!(compile_str("(. as $x | $x) | $x").is_err());
        assert!(compile_str("def f($a; g): $a, a, g; f(1; 2)").is_ok());
        assert!(compile_str("def f: def g: f; g; f").is_ok());
        assert!(compile_str("reduce .[] as [$a, {b: $c}] (0; $a + $c)").is_ok());
        assert!(compile_str("reduce .[] as $x (0; .) | $x").is_err());
        assert!(compile_str("label $f | break $f").is_ok());
    }

    #[test]
    fn test_user_definition_shadows_builtin() {
        let program = compiled("def length: 1; length");
        match program.root() {
            CompiledExpr::FuncDef { rest, .. } => {
                assert!(matches!(**rest, CompiledExpr::CallDef { slot: 0, .. }))
            }
            other => panic!("expected def, got {:?}", other),
        }
    }

    #[test]
    fn test_slots_count_from_innermost() {
        let program = compiled(". as $a | . as $b | $a");
        match program.root() {
            CompiledExpr::Bind { body, .. } => match &**body {
                CompiledExpr::Bind { body, .. } => assert!(matches!(**body, CompiledExpr::Var(1))),
                other => panic!("expected bind, got {:?}", other),
            },
            other => panic!("expected bind, got {:?}", other),
        }
    }
}
