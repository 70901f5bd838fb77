// Expression evaluator
// Runs compiled expressions as lazy generators of results

use std::iter;
use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::BinaryOp;
use crate::compiler::{CompiledExpr, CompiledFunc, CompiledPattern, CompiledStringPart};
use crate::datetime::DateTimeError;
use crate::format::Format;
use crate::utils::{describe, resolve_index, slice_bounds, with_stack};
use crate::value::JValue;
use crate::vm::{emit_then_descend, empty, once, then, Bind, Deep, Env, Exn, Frame, LabelId, Results, Unfold, ValueResult, Vm};

/// Evaluation errors surfaced to callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// Raised by `error`, or by a builtin or operator on bad input.
    #[error("{}", error_message(.0))]
    Raised(JValue),

    /// `break` escaped every enclosing label.
    #[error("break")]
    Break,
}

impl RuntimeError {
    /// The error value as a `catch` handler would see it.
    pub fn value(&self) -> JValue {
        match self {
            RuntimeError::Raised(v) => v.clone(),
            RuntimeError::Break => JValue::string("break"),
        }
    }
}

/// Message text for an error value: strings verbatim, anything else as JSON.
pub fn error_message(value: &JValue) -> String {
    match value {
        JValue::String(s) => s.to_string(),
        other => format!("{} (not a string)", other),
    }
}

impl From<Exn> for RuntimeError {
    fn from(exn: Exn) -> Self {
        match exn {
            Exn::Error(v) => RuntimeError::Raised(v),
            Exn::Break(_) => RuntimeError::Break,
        }
    }
}

impl From<DateTimeError> for Exn {
    fn from(e: DateTimeError) -> Self {
        Exn::msg(e.to_string())
    }
}

type Pairs<'a> = Box<dyn Iterator<Item = Result<(JValue, JValue), Exn>> + 'a>;
type Strings<'a> = Box<dyn Iterator<Item = Result<String, Exn>> + 'a>;

// ── Generator evaluation ─────────────────────────────────────────────────────

impl<'a> Vm<'a> {
    /// Outputs of `expr` applied to `input`, produced on demand.
    pub(crate) fn eval(self, expr: &'a CompiledExpr, env: Env<'a>, input: JValue) -> Results<'a> {
        match expr {
            CompiledExpr::Identity => once(Ok(input)),
            CompiledExpr::RecurseDefault => Box::new(recurse_values(input)),
            CompiledExpr::Const(idx) => once(Ok(self.constant(*idx))),
            CompiledExpr::Var(slot) => once(Ok(env.var(*slot))),

            CompiledExpr::Index { base, index } => {
                if let CompiledExpr::Const(idx) = **index {
                    let key = self.constant(idx);
                    return Box::new(self.eval(base, env, input).map(move |v| index_value(&v?, &key)));
                }
                // Keys outermost, like the rest of the cartesian constructs.
                let (env2, input2) = (env.clone(), input.clone());
                Box::new(self.eval(index, env, input).flat_map(move |k| {
                    let (env, input) = (env2.clone(), input2.clone());
                    then(k, move |k| {
                        Box::new(self.eval(base, env, input).map(move |v| index_value(&v?, &k)))
                    })
                }))
            }

            CompiledExpr::Slice { base, from, to } => {
                let bounds = self.slice_bound_pairs(from.as_deref(), to.as_deref(), &env, &input);
                Box::new(bounds.flat_map(move |b| {
                    let (env, input) = (env.clone(), input.clone());
                    then(b, move |(from, to)| {
                        Box::new(
                            self.eval(base, env, input)
                                .map(move |v| slice_value(&v?, &from, &to)),
                        )
                    })
                }))
            }

            CompiledExpr::Iterate(base) => {
                Box::new(self.eval(base, env, input).flat_map(|v| then(v, iterate_values)))
            }

            CompiledExpr::Pipe(lhs, rhs) => {
                Box::new(self.eval(lhs, env.clone(), input).flat_map(move |v| {
                    let env = env.clone();
                    then(v, move |v| self.eval(rhs, env, v))
                }))
            }

            CompiledExpr::Comma(lhs, rhs) => Box::new(
                self.eval(lhs, env.clone(), input.clone())
                    .chain(iter::once_with(move || self.eval(rhs, env, input)).flatten()),
            ),

            CompiledExpr::Alternative(lhs, rhs) => {
                let mut kept = self.eval(lhs, env.clone(), input.clone()).filter(|r| match r {
                    Ok(v) => v.is_truthy(),
                    Err(Exn::Break(_)) => true,
                    Err(Exn::Error(_)) => false,
                });
                match kept.next() {
                    Some(first) => Box::new(iter::once(first).chain(kept)),
                    None => self.eval(rhs, env, input),
                }
            }

            CompiledExpr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => self.logic(lhs, rhs, false, env, input),
            CompiledExpr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => self.logic(lhs, rhs, true, env, input),
            CompiledExpr::Binary { op, lhs, rhs } => {
                let op = *op;
                Box::new(self.cartesian(lhs, rhs, env, input).map(move |pair| {
                    let (l, r) = pair?;
                    binary_op(op, &l, &r)
                }))
            }

            CompiledExpr::Negate(operand) => Box::new(self.eval(operand, env, input).map(|v| match v? {
                JValue::Number(n) => Ok(JValue::Number(-n)),
                other => Err(Exn::msg(format!("{} cannot be negated", describe(&other)))),
            })),

            CompiledExpr::Array(None) => once(Ok(JValue::empty_array())),
            CompiledExpr::Array(Some(inner)) => Box::new(iter::once_with(move || {
                self.eval(inner, env, input)
                    .collect::<Result<Vec<_>, _>>()
                    .map(JValue::array)
            })),

            CompiledExpr::Object(entries) => self.object(entries, IndexMap::new(), env, input),

            CompiledExpr::If { branches, otherwise } => self.branch(branches, otherwise, env, input),

            CompiledExpr::Try { body, handler } => {
                let handler_env = env.clone();
                let handler = handler.as_deref().map(|h| {
                    Box::new(move |e: JValue| self.eval(h, handler_env, e)) as Handler<'a, JValue>
                });
                Box::new(TryCatch::new(self.eval(body, env, input), handler))
            }

            CompiledExpr::Reduce {
                source,
                pattern,
                init,
                update,
            } => Box::new(self.eval(init, env.clone(), input.clone()).flat_map(move |acc| {
                let (env, input) = (env.clone(), input.clone());
                then(acc, move |acc| {
                    Box::new(iter::once_with(move || {
                        self.reduce(source, pattern, update, env, input, acc)
                    }))
                })
            })),

            CompiledExpr::Foreach {
                source,
                pattern,
                init,
                update,
                extract,
            } => Box::new(self.eval(init, env.clone(), input.clone()).flat_map(move |acc| {
                let (env, input) = (env.clone(), input.clone());
                then(acc, move |acc| {
                    self.foreach(source, pattern, update, extract.as_deref(), env, input, acc)
                })
            })),

            CompiledExpr::Bind {
                source,
                pattern,
                body,
            } => Box::new(self.eval(source, env.clone(), input.clone()).flat_map(move |x| {
                let input = input.clone();
                let bound = x.and_then(|x| self.bind_pattern(pattern, x, &env));
                then(bound, move |envs| {
                    Box::new(
                        envs.into_iter()
                            .flat_map(move |e| self.eval(body, e, input.clone())),
                    )
                })
            })),

            CompiledExpr::FuncDef { func, rest } => {
                let func: &'a CompiledFunc = func;
                let env = env.push(Bind::Def {
                    func,
                    env: env.clone(),
                });
                self.eval(rest, env, input)
            }

            CompiledExpr::CallDef { slot, args } => {
                let (func, def_env) = match env.get(*slot) {
                    Bind::Def { func, env } => (*func, env.clone()),
                    _ => panic!("BUG: slot {} is not a function", slot),
                };
                let vm = match self.enter(func) {
                    Ok(vm) => vm,
                    Err(e) => return once(Err(e)),
                };
                let mut call_env = def_env.push(Bind::Def {
                    func,
                    env: def_env.clone(),
                });
                for arg in args {
                    call_env = call_env.push(Bind::Closure {
                        expr: arg,
                        env: env.clone(),
                    });
                }
                Box::new(Deep::new(with_stack(|| vm.eval(&func.body, call_env, input))))
            }

            CompiledExpr::CallParam(slot) => {
                let (expr, closure_env) = match env.get(*slot) {
                    Bind::Closure { expr, env } => (*expr, env.clone()),
                    _ => panic!("BUG: slot {} is not a filter parameter", slot),
                };
                self.eval(expr, closure_env, input)
            }

            CompiledExpr::CallBuiltin { builtin, args } => self.call_builtin(*builtin, args, env, input),

            CompiledExpr::Label(body) => {
                let id: LabelId = Rc::new(());
                let env = env.push(Bind::Label(id.clone()));
                Box::new(self.eval(body, env, input).map_while(move |r| match r {
                    Err(Exn::Break(ref b)) if Rc::ptr_eq(b, &id) => None,
                    r => Some(r),
                }))
            }

            CompiledExpr::Break(slot) => once(Err(Exn::Break(env.label(*slot)))),

            CompiledExpr::Format(format) => once(format.apply(&input).map(JValue::string)),

            CompiledExpr::FormatString { format, parts } => {
                Box::new(self.interpolate(*format, parts, env, input).map(|s| s.map(JValue::string)))
            }

            CompiledExpr::Assign { op, lhs, rhs } => self.assign(*op, lhs, rhs, env, input),
        }
    }

    /// `f(l, r)` for every pair of outputs, right-hand side outermost.
    pub(crate) fn cartesian(
        self,
        lhs: &'a CompiledExpr,
        rhs: &'a CompiledExpr,
        env: Env<'a>,
        input: JValue,
    ) -> Pairs<'a> {
        Box::new(self.eval(rhs, env.clone(), input.clone()).flat_map(move |r| {
            let (env, input) = (env.clone(), input.clone());
            then(r, move |r| {
                Box::new(self.eval(lhs, env, input).map(move |l| -> Result<_, Exn> { Ok((l?, r.clone())) }))
            })
        }))
    }

    /// Slice bounds; an absent bound is `null`. `from` is outermost.
    pub(crate) fn slice_bound_pairs(
        self,
        from: Option<&'a CompiledExpr>,
        to: Option<&'a CompiledExpr>,
        env: &Env<'a>,
        input: &JValue,
    ) -> Pairs<'a> {
        let froms = match from {
            Some(f) => self.eval(f, env.clone(), input.clone()),
            None => once(Ok(JValue::Null)),
        };
        let (env, input) = (env.clone(), input.clone());
        Box::new(froms.flat_map(move |f| {
            let tos = match to {
                Some(t) => self.eval(t, env.clone(), input.clone()),
                None => once(Ok(JValue::Null)),
            };
            then(f, move |f| Box::new(tos.map(move |t| -> Result<_, Exn> { Ok((f.clone(), t?)) })))
        }))
    }

    /// Short-circuiting `and` (`stop == false`) and `or` (`stop == true`).
    fn logic(
        self,
        lhs: &'a CompiledExpr,
        rhs: &'a CompiledExpr,
        stop: bool,
        env: Env<'a>,
        input: JValue,
    ) -> Results<'a> {
        Box::new(self.eval(lhs, env.clone(), input.clone()).flat_map(move |l| {
            let (env, input) = (env.clone(), input.clone());
            then(l, move |l| {
                if l.is_truthy() == stop {
                    once(Ok(JValue::Bool(stop)))
                } else {
                    Box::new(
                        self.eval(rhs, env, input)
                            .map(|r| r.map(|v| JValue::Bool(v.is_truthy()))),
                    )
                }
            })
        }))
    }

    /// Object construction; the first entry varies slowest.
    fn object(
        self,
        entries: &'a [(CompiledExpr, CompiledExpr)],
        acc: IndexMap<String, JValue>,
        env: Env<'a>,
        input: JValue,
    ) -> Results<'a> {
        let Some(((key, value), rest)) = entries.split_first() else {
            return once(Ok(JValue::object(acc)));
        };
        Box::new(self.eval(key, env.clone(), input.clone()).flat_map(move |k| {
            let (env, input, acc) = (env.clone(), input.clone(), acc.clone());
            then(k.and_then(object_key), move |k| {
                Box::new(self.eval(value, env.clone(), input.clone()).flat_map(move |v| {
                    let (env, input, mut acc, k) = (env.clone(), input.clone(), acc.clone(), k.clone());
                    then(v, move |v| {
                        acc.insert(k, v);
                        self.object(rest, acc, env, input)
                    })
                }))
            })
        }))
    }

    fn branch(
        self,
        branches: &'a [(CompiledExpr, CompiledExpr)],
        otherwise: &'a CompiledExpr,
        env: Env<'a>,
        input: JValue,
    ) -> Results<'a> {
        let Some(((cond, body), rest)) = branches.split_first() else {
            return self.eval(otherwise, env, input);
        };
        Box::new(self.eval(cond, env.clone(), input.clone()).flat_map(move |c| {
            let (env, input) = (env.clone(), input.clone());
            then(c, move |c| {
                if c.is_truthy() {
                    self.eval(body, env, input)
                } else {
                    self.branch(rest, otherwise, env, input)
                }
            })
        }))
    }

    /// Fold `update` over the outputs of `source`. An update with no output
    /// resets the state to `null`; with several, the last one is kept.
    fn reduce(
        self,
        source: &'a CompiledExpr,
        pattern: &'a CompiledPattern,
        update: &'a CompiledExpr,
        env: Env<'a>,
        input: JValue,
        init: JValue,
    ) -> ValueResult {
        let mut acc = init;
        for x in self.eval(source, env.clone(), input) {
            for bound in self.bind_pattern(pattern, x?, &env)? {
                acc = last_output(self.eval(update, bound, acc))?.unwrap_or(JValue::Null);
            }
        }
        Ok(acc)
    }

    /// Like `reduce`, but emits every update output (through `extract`) as it
    /// is pulled. The last output becomes the next state; no output keeps it.
    #[allow(clippy::too_many_arguments)]
    fn foreach(
        self,
        source: &'a CompiledExpr,
        pattern: &'a CompiledPattern,
        update: &'a CompiledExpr,
        extract: Option<&'a CompiledExpr>,
        env: Env<'a>,
        input: JValue,
        init: JValue,
    ) -> Results<'a> {
        let bind_env = env.clone();
        let bindings = self.eval(source, env, input).flat_map(move |x| {
            match x.and_then(|x| self.bind_pattern(pattern, x, &bind_env)) {
                Ok(envs) => Box::new(envs.into_iter().map(Ok)) as Box<dyn Iterator<Item = Result<Env<'a>, Exn>> + 'a>,
                Err(e) => Box::new(iter::once(Err(e))),
            }
        });

        Box::new(Foreach {
            vm: self,
            update,
            extract,
            bindings: Box::new(bindings),
            state: init,
            running: None,
            pending: empty(),
            done: false,
        })
    }

    /// Environments produced by destructuring `value` with `pattern`.
    ///
    /// Computed key expressions with several outputs give several
    /// environments. Variables are pushed in `Pattern::variables` order.
    pub(crate) fn bind_pattern(
        self,
        pattern: &'a CompiledPattern,
        value: JValue,
        env: &Env<'a>,
    ) -> Result<Vec<Env<'a>>, Exn> {
        self.bind_all(pattern, value, vec![env.clone()], env)
    }

    fn bind_all(
        self,
        pattern: &'a CompiledPattern,
        value: JValue,
        envs: Vec<Env<'a>>,
        outer: &Env<'a>,
    ) -> Result<Vec<Env<'a>>, Exn> {
        match pattern {
            CompiledPattern::Var => Ok(envs.into_iter().map(|e| e.push_var(value.clone())).collect()),
            CompiledPattern::Array(items) => {
                let mut envs = envs;
                for (i, item) in items.iter().enumerate() {
                    let element = index_value(&value, &JValue::from(i))?;
                    envs = self.bind_all(item, element, envs, outer)?;
                }
                Ok(envs)
            }
            CompiledPattern::Object(entries) => {
                let mut envs = envs;
                for entry in entries {
                    let mut next = Vec::new();
                    for key in self.eval(&entry.key, outer.clone(), value.clone()) {
                        let key = key?;
                        if !key.is_string() {
                            return Err(Exn::msg(format!(
                                "Cannot index {} with {}",
                                value.type_name(),
                                key.type_name()
                            )));
                        }
                        let field = index_value(&value, &key)?;
                        let branch: Vec<Env<'a>> = if entry.bind {
                            envs.iter().map(|e| e.push_var(field.clone())).collect()
                        } else {
                            envs.clone()
                        };
                        match &entry.value {
                            Some(p) => next.extend(self.bind_all(p, field, branch, outer)?),
                            None => next.extend(branch),
                        }
                    }
                    envs = next;
                }
                Ok(envs)
            }
        }
    }

    /// String interpolation; later parts vary slowest.
    fn interpolate(
        self,
        format: Format,
        parts: &'a [CompiledStringPart],
        env: Env<'a>,
        input: JValue,
    ) -> Strings<'a> {
        let Some((last, init)) = parts.split_last() else {
            return Box::new(iter::once(Ok(String::new())));
        };
        match last {
            CompiledStringPart::Literal(text) => Box::new(
                self.interpolate(format, init, env, input)
                    .map(move |prefix| prefix.map(|p| p + text)),
            ),
            CompiledStringPart::Expr(expr) => {
                Box::new(self.eval(expr, env.clone(), input.clone()).flat_map(move |v| {
                    let (env, input) = (env.clone(), input.clone());
                    then(v.and_then(|v| format.apply(&v)), move |text| {
                        Box::new(
                            self.interpolate(format, init, env, input)
                                .map(move |prefix| prefix.map(|p| p + &text)),
                        )
                    })
                }))
            }
        }
    }
}

/// `body`'s outputs until its first error, then the handler's outputs for
/// that error. Breaks pass through untouched.
pub(crate) struct TryCatch<'a, T> {
    body: Box<dyn Iterator<Item = Result<T, Exn>> + 'a>,
    handler: Option<Handler<'a, T>>,
    rest: Option<Box<dyn Iterator<Item = Result<T, Exn>> + 'a>>,
    caught: bool,
}

pub(crate) type Handler<'a, T> = Box<dyn FnOnce(JValue) -> Box<dyn Iterator<Item = Result<T, Exn>> + 'a> + 'a>;

impl<'a, T> TryCatch<'a, T> {
    pub(crate) fn new(
        body: Box<dyn Iterator<Item = Result<T, Exn>> + 'a>,
        handler: Option<Handler<'a, T>>,
    ) -> Self {
        TryCatch {
            body,
            handler,
            rest: None,
            caught: false,
        }
    }
}

impl<T> Iterator for TryCatch<'_, T> {
    type Item = Result<T, Exn>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(rest) = &mut self.rest {
            return rest.next();
        }
        if self.caught {
            return None;
        }
        match self.body.next() {
            Some(Err(Exn::Error(e))) => {
                self.caught = true;
                let mut rest = (self.handler.take()?)(e);
                let first = rest.next();
                self.rest = Some(rest);
                first
            }
            other => other,
        }
    }
}

/// Pull-driven `foreach`: one running update generator at a time. The
/// source advances only once the current update is exhausted.
struct Foreach<'a> {
    vm: Vm<'a>,
    update: &'a CompiledExpr,
    extract: Option<&'a CompiledExpr>,
    bindings: Box<dyn Iterator<Item = Result<Env<'a>, Exn>> + 'a>,
    state: JValue,
    running: Option<(Env<'a>, Results<'a>)>,
    pending: Results<'a>,
    done: bool,
}

impl Iterator for Foreach<'_> {
    type Item = ValueResult;

    fn next(&mut self) -> Option<ValueResult> {
        loop {
            if let Some(r) = self.pending.next() {
                return Some(r);
            }
            if self.done {
                return None;
            }
            if let Some((bound, updates)) = &mut self.running {
                match updates.next() {
                    Some(Ok(v)) => {
                        self.state = v.clone();
                        self.pending = match self.extract {
                            Some(e) => self.vm.eval(e, bound.clone(), v),
                            None => once(Ok(v)),
                        };
                    }
                    Some(Err(e)) => {
                        self.done = true;
                        self.running = None;
                        return Some(Err(e));
                    }
                    None => self.running = None,
                }
                continue;
            }
            match self.bindings.next() {
                Some(Ok(bound)) => {
                    let updates = self.vm.eval(self.update, bound.clone(), self.state.clone());
                    self.running = Some((bound, updates));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

/// Last output of a generator, stopping at the first error.
pub(crate) fn last_output(results: Results<'_>) -> Result<Option<JValue>, Exn> {
    let mut last = None;
    for r in results {
        last = Some(r?);
    }
    Ok(last)
}

// ── Value operations ─────────────────────────────────────────────────────────

fn object_key(key: JValue) -> Result<String, Exn> {
    match key {
        JValue::String(s) => Ok(s.to_string()),
        _ => Err(Exn::msg("Object keys must be strings")),
    }
}

/// `.[]` on a single value.
pub(crate) fn iterate_values<'a>(value: JValue) -> Results<'a> {
    match value {
        JValue::Array(arr) => Box::new((0..arr.len()).map(move |i| Ok(arr[i].clone()))),
        JValue::Object(map) => {
            Box::new((0..map.len()).filter_map(move |i| map.get_index(i).map(|(_, v)| Ok(v.clone()))))
        }
        other => once(Err(cannot_iterate(&other))),
    }
}

pub(crate) fn cannot_iterate(value: &JValue) -> Exn {
    match value {
        JValue::Null => Exn::msg("Cannot iterate over null"),
        other => Exn::msg(format!("Cannot iterate over {}", describe(other))),
    }
}

/// Direct children of arrays and objects; nothing for scalars.
pub(crate) fn child_values(value: &JValue) -> Vec<JValue> {
    match value {
        JValue::Array(arr) => arr.to_vec(),
        JValue::Object(map) => map.values().cloned().collect(),
        _ => Vec::new(),
    }
}

/// `..`: the input and all of its descendants, pre-order.
pub(crate) fn recurse_values<'a>(input: JValue) -> impl Iterator<Item = ValueResult> + 'a {
    Unfold::new(emit_then_descend(input), |v: JValue| -> Frame<'a, JValue> {
        Box::new(child_values(&v).into_iter().flat_map(emit_then_descend))
    })
}

/// `value[key]` with jq's rules for each container and key type.
pub(crate) fn index_value(value: &JValue, key: &JValue) -> ValueResult {
    match (value, key) {
        (JValue::Object(map), JValue::String(k)) => Ok(map.get(&**k).cloned().unwrap_or(JValue::Null)),
        (JValue::Array(arr), JValue::Number(n)) => {
            if n.is_nan() {
                return Ok(JValue::Null);
            }
            let item = resolve_index(n.floor() as i64, arr.len()).and_then(|i| arr.get(i));
            Ok(item.cloned().unwrap_or(JValue::Null))
        }
        (JValue::Null, JValue::String(_) | JValue::Number(_) | JValue::Object(_) | JValue::Null) => {
            Ok(JValue::Null)
        }
        (JValue::Array(_) | JValue::String(_), JValue::Object(range)) => slice_value(
            value,
            range.get("start").unwrap_or(&JValue::Null),
            range.get("end").unwrap_or(&JValue::Null),
        ),
        (JValue::Array(arr), JValue::Array(sub)) => Ok(subarray_indices(arr, sub)),
        (_, JValue::String(k)) => Err(Exn::msg(format!(
            "Cannot index {} with \"{}\"",
            value.type_name(),
            k
        ))),
        _ => Err(Exn::msg(format!(
            "Cannot index {} with {}",
            value.type_name(),
            key.type_name()
        ))),
    }
}

/// Start positions of `sub` within `arr`.
pub(crate) fn subarray_indices(arr: &[JValue], sub: &[JValue]) -> JValue {
    if sub.is_empty() || sub.len() > arr.len() {
        return JValue::empty_array();
    }
    (0..=arr.len() - sub.len())
        .filter(|&i| arr[i..i + sub.len()] == *sub)
        .map(JValue::from)
        .collect()
}

fn slice_bound(bound: &JValue) -> Result<Option<f64>, Exn> {
    match bound {
        JValue::Null => Ok(None),
        JValue::Number(n) => Ok(Some(*n)),
        _ => Err(Exn::msg("Start and end indices of an array slice must be numbers")),
    }
}

/// `value[from:to]` for arrays and strings (by codepoint); `null` stays `null`.
pub(crate) fn slice_value(value: &JValue, from: &JValue, to: &JValue) -> ValueResult {
    let (from, to) = (slice_bound(from)?, slice_bound(to)?);
    match value {
        JValue::Null => Ok(JValue::Null),
        JValue::Array(arr) => {
            let (start, end) = slice_bounds(from, to, arr.len());
            Ok(JValue::array(arr[start..end].to_vec()))
        }
        JValue::String(s) => {
            let (start, end) = slice_bounds(from, to, s.chars().count());
            Ok(JValue::string(s.chars().skip(start).take(end - start).collect::<String>()))
        }
        other => Err(Exn::msg(format!("Cannot index {} with object", other.type_name()))),
    }
}

fn operands_error(l: &JValue, r: &JValue, what: &str) -> Exn {
    Exn::msg(format!("{} and {} cannot be {}", describe(l), describe(r), what))
}

/// Apply a non-short-circuiting binary operator to two values.
pub(crate) fn binary_op(op: BinaryOp, l: &JValue, r: &JValue) -> ValueResult {
    match op {
        BinaryOp::Add => add_values(l, r),
        BinaryOp::Subtract => subtract_values(l, r),
        BinaryOp::Multiply => multiply_values(l, r),
        BinaryOp::Divide => divide_values(l, r),
        BinaryOp::Modulo => modulo_values(l, r),
        BinaryOp::Equal => Ok(JValue::Bool(l == r)),
        BinaryOp::NotEqual => Ok(JValue::Bool(l != r)),
        BinaryOp::LessThan => Ok(JValue::Bool(l.compare(r).is_lt())),
        BinaryOp::LessThanOrEqual => Ok(JValue::Bool(l.compare(r).is_le())),
        BinaryOp::GreaterThan => Ok(JValue::Bool(l.compare(r).is_gt())),
        BinaryOp::GreaterThanOrEqual => Ok(JValue::Bool(l.compare(r).is_ge())),
        BinaryOp::And => Ok(JValue::Bool(l.is_truthy() && r.is_truthy())),
        BinaryOp::Or => Ok(JValue::Bool(l.is_truthy() || r.is_truthy())),
    }
}

pub(crate) fn add_values(l: &JValue, r: &JValue) -> ValueResult {
    match (l, r) {
        (JValue::Null, other) | (other, JValue::Null) => Ok(other.clone()),
        (JValue::Number(a), JValue::Number(b)) => Ok(JValue::Number(a + b)),
        (JValue::String(a), JValue::String(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(JValue::string(s))
        }
        (JValue::Array(a), JValue::Array(b)) => {
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend(a.iter().cloned());
            out.extend(b.iter().cloned());
            Ok(JValue::array(out))
        }
        (JValue::Object(a), JValue::Object(b)) => {
            let mut out = (**a).clone();
            for (k, v) in b.iter() {
                out.insert(k.clone(), v.clone());
            }
            Ok(JValue::object(out))
        }
        _ => Err(operands_error(l, r, "added")),
    }
}

fn subtract_values(l: &JValue, r: &JValue) -> ValueResult {
    match (l, r) {
        (JValue::Number(a), JValue::Number(b)) => Ok(JValue::Number(a - b)),
        (JValue::Array(a), JValue::Array(b)) => {
            Ok(a.iter().filter(|x| !b.contains(x)).cloned().collect())
        }
        _ => Err(operands_error(l, r, "subtracted")),
    }
}

fn repeat_string(s: &str, n: f64) -> JValue {
    if n.is_nan() || n <= 0.0 {
        return JValue::Null;
    }
    let count = (n as usize).max(1);
    JValue::string(s.repeat(count))
}

fn deep_merge(a: &IndexMap<String, JValue>, b: &IndexMap<String, JValue>) -> IndexMap<String, JValue> {
    let mut out = a.clone();
    for (k, bv) in b {
        let merged = match (out.get(k), bv) {
            (Some(JValue::Object(x)), JValue::Object(y)) => JValue::object(deep_merge(x, y)),
            _ => bv.clone(),
        };
        out.insert(k.clone(), merged);
    }
    out
}

fn multiply_values(l: &JValue, r: &JValue) -> ValueResult {
    match (l, r) {
        (JValue::Number(a), JValue::Number(b)) => Ok(JValue::Number(a * b)),
        (JValue::String(s), JValue::Number(n)) | (JValue::Number(n), JValue::String(s)) => {
            Ok(repeat_string(s, *n))
        }
        (JValue::Object(a), JValue::Object(b)) => Ok(JValue::object(deep_merge(a, b))),
        _ => Err(operands_error(l, r, "multiplied")),
    }
}

/// `split/1` semantics shared with `/` on strings.
pub(crate) fn split_string(s: &str, sep: &str) -> JValue {
    if s.is_empty() {
        return JValue::empty_array();
    }
    if sep.is_empty() {
        return s.chars().map(|c| JValue::string(c.to_string())).collect();
    }
    s.split(sep).map(JValue::from).collect()
}

fn divide_values(l: &JValue, r: &JValue) -> ValueResult {
    match (l, r) {
        (JValue::Number(_), JValue::Number(b)) if *b == 0.0 => {
            Err(operands_error(l, r, "divided because the divisor is zero"))
        }
        (JValue::Number(a), JValue::Number(b)) => Ok(JValue::Number(a / b)),
        (JValue::String(a), JValue::String(b)) => Ok(split_string(a, b)),
        _ => Err(operands_error(l, r, "divided")),
    }
}

fn modulo_values(l: &JValue, r: &JValue) -> ValueResult {
    match (l, r) {
        (JValue::Number(a), JValue::Number(b)) => {
            let (a, b) = (*a as i64, *b as i64);
            if b == 0 {
                return Err(operands_error(l, r, "divided because the divisor is zero"));
            }
            Ok(JValue::from(a.checked_rem(b).unwrap_or(0)))
        }
        _ => Err(operands_error(l, r, "divided")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_str;
    use crate::jvalue;

    fn run(filter: &str, input: JValue) -> Result<Vec<JValue>, RuntimeError> {
        let program = compile_str(filter).unwrap();
        program.run(input).collect()
    }

    fn run_ok(filter: &str, input: JValue) -> Vec<JValue> {
        run(filter, input).unwrap()
    }

    fn run_err(filter: &str, input: JValue) -> String {
        run(filter, input).unwrap_err().to_string()
    }

    #[test]
    fn test_identity_and_fields() {
        assert_eq!(run_ok(".", jvalue!(1)), vec![jvalue!(1)]);
        assert_eq!(run_ok(".a", jvalue!({"a": 2})), vec![jvalue!(2)]);
        assert_eq!(run_ok(".a.b", jvalue!({"a": {"b": 3}})), vec![jvalue!(3)]);
        assert_eq!(run_ok(".missing", jvalue!({})), vec![jvalue!(null)]);
        assert_eq!(run_ok(".a", jvalue!(null)), vec![jvalue!(null)]);
    }

    #[test]
    fn test_array_indexing() {
        let input = jvalue!([10, 20, 30]);
        assert_eq!(run_ok(".[0]", input.clone()), vec![jvalue!(10)]);
        assert_eq!(run_ok(".[-1]", input.clone()), vec![jvalue!(30)]);
        assert_eq!(run_ok(".[5]", input.clone()), vec![jvalue!(null)]);
        assert_eq!(run_ok(".[1:]", input.clone()), vec![jvalue!([20, 30])]);
        assert_eq!(run_ok(".[:-1]", input.clone()), vec![jvalue!([10, 20])]);
        assert_eq!(run_ok(".[0,2]", input), vec![jvalue!(10), jvalue!(30)]);
        assert_eq!(run_ok(".[2:4]", jvalue!("abcdef")), vec![jvalue!("cd")]);
        assert_eq!(run_ok(".[[1,2]]", jvalue!([0, 1, 2, 1, 2])), vec![jvalue!([1, 3])]);
    }

    #[test]
    fn test_index_errors() {
        assert_eq!(run_err(".foo", jvalue!(1)), "Cannot index number with \"foo\"");
        assert_eq!(run_err(".[0]", jvalue!({})), "Cannot index object with number");
        assert_eq!(run_err(".[]", jvalue!(1)), "Cannot iterate over number (1)");
        assert_eq!(run_err(".[]", jvalue!(null)), "Cannot iterate over null");
    }

    #[test]
    fn test_iterate_and_pipe() {
        assert_eq!(
            run_ok(".[] | . * 2", jvalue!([1, 2, 3])),
            vec![jvalue!(2), jvalue!(4), jvalue!(6)]
        );
        assert_eq!(run_ok("[.[]]", jvalue!({"a": 1, "b": 2})), vec![jvalue!([1, 2])]);
    }

    #[test]
    fn test_comma_and_cartesian_order() {
        assert_eq!(
            run_ok("[(1,2) + (10,20)]", jvalue!(null)),
            vec![jvalue!([11, 12, 21, 22])]
        );
        assert_eq!(
            run_ok("{a: (1,2), b: (3,4)} | [.a, .b]", jvalue!(null)),
            vec![jvalue!([1, 3]), jvalue!([1, 4]), jvalue!([2, 3]), jvalue!([2, 4])]
        );
        assert_eq!(
            run_ok("\"\\(1,2)-\\(3,4)\"", jvalue!(null)),
            vec![jvalue!("1-3"), jvalue!("2-3"), jvalue!("1-4"), jvalue!("2-4")]
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run_ok("1 + 2 * 3", jvalue!(null)), vec![jvalue!(7)]);
        assert_eq!(run_ok("null + 1", jvalue!(null)), vec![jvalue!(1)]);
        assert_eq!(run_ok("\"a\" + \"b\"", jvalue!(null)), vec![jvalue!("ab")]);
        assert_eq!(run_ok("[1,2,3,1] - [1]", jvalue!(null)), vec![jvalue!([2, 3])]);
        assert_eq!(run_ok("{a:1} + {b:2}", jvalue!(null)), vec![jvalue!({"a": 1, "b": 2})]);
        assert_eq!(
            run_ok("{a:{b:1}} * {a:{c:2}}", jvalue!(null)),
            vec![jvalue!({"a": {"b": 1, "c": 2}})]
        );
        assert_eq!(run_ok("\"ab\" * 3", jvalue!(null)), vec![jvalue!("ababab")]);
        assert_eq!(run_ok("\"ab\" * 0", jvalue!(null)), vec![jvalue!(null)]);
        assert_eq!(run_ok("\"a,b\" / \",\"", jvalue!(null)), vec![jvalue!(["a", "b"])]);
        assert_eq!(run_ok("7 % 3, -7 % 3", jvalue!(null)), vec![jvalue!(1), jvalue!(-1)]);
        assert_eq!(run_ok("-.", jvalue!(3)), vec![jvalue!(-3)]);
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(
            run_err("{} + 1", jvalue!(null)),
            "object ({}) and number (1) cannot be added"
        );
        assert_eq!(
            run_err("1 / 0", jvalue!(null)),
            "number (1) and number (0) cannot be divided because the divisor is zero"
        );
        assert_eq!(
            run_err("1 % 0", jvalue!(null)),
            "number (1) and number (0) cannot be divided because the divisor is zero"
        );
        assert_eq!(run_err("-\"a\"", jvalue!(null)), "string (\"a\") cannot be negated");
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(run_ok("1 < 2, \"a\" > 1, [] == []", jvalue!(null)), vec![jvalue!(true); 3]);
        assert_eq!(
            run_ok("[(true,false) and (true,false)]", jvalue!(null)),
            vec![jvalue!([true, false, false])]
        );
        assert_eq!(run_ok("true or error(\"x\")", jvalue!(null)), vec![jvalue!(true)]);
        assert_eq!(run_ok("false and error(\"x\")", jvalue!(null)), vec![jvalue!(false)]);
    }

    #[test]
    fn test_alternative() {
        assert_eq!(run_ok(".a // 1", jvalue!({})), vec![jvalue!(1)]);
        assert_eq!(run_ok(".a // 1", jvalue!({"a": false})), vec![jvalue!(1)]);
        assert_eq!(run_ok("(1, null, 2) // 3", jvalue!(null)), vec![jvalue!(1), jvalue!(2)]);
        assert_eq!(run_ok("error(\"x\") // 3", jvalue!(null)), vec![jvalue!(3)]);
        assert_eq!(run_ok("empty // 3", jvalue!(null)), vec![jvalue!(3)]);
    }

    #[test]
    fn test_if() {
        assert_eq!(run_ok("if . then 1 else 2 end", jvalue!(true)), vec![jvalue!(1)]);
        assert_eq!(run_ok("if . then 1 end", jvalue!(false)), vec![jvalue!(false)]);
        assert_eq!(
            run_ok("if . == 1 then \"a\" elif . == 2 then \"b\" else \"c\" end", jvalue!(2)),
            vec![jvalue!("b")]
        );
        assert_eq!(
            run_ok("if (true, false) then 1 else 2 end", jvalue!(null)),
            vec![jvalue!(1), jvalue!(2)]
        );
    }

    #[test]
    fn test_try_catch() {
        assert_eq!(run_ok("try error(\"x\") catch .", jvalue!(null)), vec![jvalue!("x")]);
        assert_eq!(run_ok("[.[] | try if . == 2 then error(\"bad\") else . end]", jvalue!([1, 2, 3])), vec![jvalue!([1, 3])]);
        assert_eq!(run_ok("[(1, error(\"x\"), 3)?]", jvalue!(null)), vec![jvalue!([1])]);
        assert_eq!(run_ok("try error({a: 1}) catch .a", jvalue!(null)), vec![jvalue!(1)]);
        assert_eq!(run_ok(".a?", jvalue!(1)), Vec::<JValue>::new());
        assert_eq!(run_err("try error(\"x\") catch error(\"y\")", jvalue!(null)), "y");
    }

    #[test]
    fn test_error_messages_for_non_strings() {
        assert_eq!(run_err("error({a: 1})", jvalue!(null)), "{\"a\":1} (not a string)");
        assert_eq!(run_err("error", jvalue!("boom")), "boom");
    }

    #[test]
    fn test_reduce_and_foreach() {
        assert_eq!(run_ok("reduce .[] as $x (0; . + $x)", jvalue!([1, 2, 3])), vec![jvalue!(6)]);
        assert_eq!(run_ok("reduce empty as $x (0; . + 1)", jvalue!(null)), vec![jvalue!(0)]);
        assert_eq!(run_ok("reduce .[] as $x (0; empty)", jvalue!([1])), vec![jvalue!(null)]);
        assert_eq!(
            run_ok("[foreach .[] as $x (0; . + $x)]", jvalue!([1, 2, 3])),
            vec![jvalue!([1, 3, 6])]
        );
        assert_eq!(
            run_ok("[foreach .[] as $x (0; . + $x; [$x, .])]", jvalue!([1, 2])),
            vec![jvalue!([[1, 1], [2, 3]])]
        );
        assert_eq!(
            run_ok("reduce .[] as [$a, $b] (0; . + $a * $b)", jvalue!([[1, 2], [3, 4]])),
            vec![jvalue!(14)]
        );
    }

    #[test]
    fn test_destructuring() {
        assert_eq!(
            run_ok(". as [$a, {b: $c}] | [$a, $c]", jvalue!([1, {"b": 2}])),
            vec![jvalue!([1, 2])]
        );
        assert_eq!(
            run_ok(". as {$a, b: [$c]} | $a + $c", jvalue!({"a": 1, "b": [2]})),
            vec![jvalue!(3)]
        );
        assert_eq!(
            run_ok(". as {(\"a\", \"b\"): $v} | $v", jvalue!({"a": 1, "b": 2})),
            vec![jvalue!(1), jvalue!(2)]
        );
        assert_eq!(run_ok(". as [$a] | $a", jvalue!(null)), vec![jvalue!(null)]);
    }

    #[test]
    fn test_functions_and_closures() {
        assert_eq!(run_ok("def inc: . + 1; inc | inc", jvalue!(1)), vec![jvalue!(3)]);
        assert_eq!(run_ok("def f(g): [g, g]; f(. * 2)", jvalue!(3)), vec![jvalue!([6, 6])]);
        assert_eq!(run_ok("def f($a; $b): $a + $b; f(1; 2)", jvalue!(null)), vec![jvalue!(3)]);
        assert_eq!(run_ok("def f($a): a + 1; f(1)", jvalue!(null)), vec![jvalue!(2)]);
        assert_eq!(
            run_ok("def fac: if . <= 1 then 1 else . * (. - 1 | fac) end; fac", jvalue!(10)),
            vec![jvalue!(3628800)]
        );
        // Closures see the bindings of their definition site.
        assert_eq!(
            run_ok("1 as $x | def f: $x; 2 as $x | [f, $x]", jvalue!(null)),
            vec![jvalue!([1, 2])]
        );
        assert_eq!(
            run_ok("def f(g): def h: g; 5 | h; f(. + 1)", jvalue!(1)),
            vec![jvalue!(6)]
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(
            run_ok("[label $out | 1, 2, break $out, 3]", jvalue!(null)),
            vec![jvalue!([1, 2])]
        );
        assert_eq!(
            run_ok("[label $a | label $b | 1, break $a, 2] ", jvalue!(null)),
            vec![jvalue!([1])]
        );
        assert_eq!(
            run_ok("[.[] | label $skip | if . == 2 then break $skip else . end]", jvalue!([1, 2, 3])),
            vec![jvalue!([1, 3])]
        );
        assert_eq!(
            run_ok("try (label $x | break $x) catch \"caught\"", jvalue!(null)),
            Vec::<JValue>::new()
        );
    }

    #[test]
    fn test_recurse_default() {
        assert_eq!(
            run_ok("[..]", jvalue!([1, [2]])),
            vec![jvalue!([[1, [2]], 1, [2], 2])]
        );
        assert_eq!(run_ok("[.. | numbers]", jvalue!({"a": 1, "b": {"c": 2}})), vec![jvalue!([1, 2])]);
    }

    #[test]
    fn test_location() {
        assert_eq!(
            run_ok("$__loc__", jvalue!(null)),
            vec![jvalue!({"file": "<stdin>", "line": 1})]
        );
    }

    #[test]
    fn test_errors_stop_the_stream() {
        let program = compile_str("1, error(\"x\"), 2").unwrap();
        let outputs: Vec<_> = program.run(jvalue!(null)).collect();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0], Ok(jvalue!(1)));
        assert_eq!(outputs[1], Err(RuntimeError::Raised(jvalue!("x"))));
    }

    #[test]
    fn test_laziness_with_infinite_generators() {
        assert_eq!(run_ok("first(range(1; infinite))", jvalue!(null)), vec![jvalue!(1)]);
        assert_eq!(
            run_ok("[limit(4; repeat(. * 2))]", jvalue!(1)),
            vec![jvalue!([1, 2, 4, 8])]
        );
    }
}
