// Path tracking and update assignment
// Evaluates path expressions to (value, path) pairs and writes values back

use std::cmp::Ordering;
use std::iter;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::AssignOp;
use crate::compiler::{CompiledExpr, CompiledFunc};
use crate::evaluator::{binary_op, cannot_iterate, index_value, slice_value, Handler, TryCatch};
use crate::functions::Builtin;
use crate::utils::{excerpt, resolve_index, slice_bounds, with_stack};
use crate::value::JValue;
use crate::vm::{emit_then_descend, then, Bind, Deep, Env, Exn, Frame, LabelId, Results, Unfold, ValueResult, Vm};

/// Location of a value relative to the input of a path expression.
pub(crate) type Path = Vec<JValue>;

/// A value together with the path it was reached by.
pub(crate) type PathValue = (JValue, Path);

pub(crate) type PathResults<'a> = Box<dyn Iterator<Item = Result<PathValue, Exn>> + 'a>;

/// Largest array index `setpath` will grow an array to.
const MAX_ARRAY_INDEX: usize = 536_870_911;

fn path_once<'a>(pv: Result<PathValue, Exn>) -> PathResults<'a> {
    Box::new(iter::once(pv))
}

fn extend(path: &Path, key: JValue) -> Path {
    let mut p = Vec::with_capacity(path.len() + 1);
    p.extend(path.iter().cloned());
    p.push(key);
    p
}

pub(crate) fn invalid_path(value: &JValue) -> Exn {
    Exn::msg(format!("Invalid path expression with result {}", excerpt(value)))
}

/// Outputs of a value-only expression used where a path is required.
fn not_a_path<'a>(results: Results<'a>) -> PathResults<'a> {
    Box::new(results.map(|r| -> Result<PathValue, Exn> { Err(invalid_path(&r?)) }))
}

/// Children of a container paired with their paths.
fn child_paths(value: &JValue, path: &Path) -> Vec<PathValue> {
    match value {
        JValue::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), extend(path, JValue::from(i))))
            .collect(),
        JValue::Object(map) => map
            .iter()
            .map(|(k, v)| (v.clone(), extend(path, JValue::string(k.as_str()))))
            .collect(),
        _ => Vec::new(),
    }
}

/// `.[]` with paths.
fn iterate_paths<'a>((value, path): PathValue) -> PathResults<'a> {
    match value {
        JValue::Array(_) | JValue::Object(_) => Box::new(child_paths(&value, &path).into_iter().map(Ok)),
        other => path_once(Err(cannot_iterate(&other))),
    }
}

/// `..` with paths, pre-order.
pub(crate) fn recurse_paths<'a>(current: PathValue) -> PathResults<'a> {
    Box::new(Unfold::new(emit_then_descend(current), |(v, p): PathValue| -> Frame<'a, PathValue> {
        Box::new(child_paths(&v, &p).into_iter().flat_map(emit_then_descend))
    }))
}

impl<'a> Vm<'a> {
    /// Evaluate `expr` as a path expression starting from `current`.
    pub(crate) fn eval_paths(self, expr: &'a CompiledExpr, env: Env<'a>, current: PathValue) -> PathResults<'a> {
        match expr {
            CompiledExpr::Identity => path_once(Ok(current)),
            CompiledExpr::RecurseDefault => recurse_paths(current),

            CompiledExpr::Index { base, index } => {
                let keys = self.eval(index, env.clone(), current.0.clone());
                Box::new(keys.flat_map(move |k| {
                    let (env, current) = (env.clone(), current.clone());
                    then(k, move |k| {
                        Box::new(self.eval_paths(base, env, current).map(move |pv| -> Result<PathValue, Exn> {
                            let (v, p) = pv?;
                            Ok((index_value(&v, &k)?, extend(&p, k.clone())))
                        }))
                    })
                }))
            }

            CompiledExpr::Slice { base, from, to } => {
                let bounds = self.slice_bound_pairs(from.as_deref(), to.as_deref(), &env, &current.0);
                Box::new(bounds.flat_map(move |b| {
                    let (env, current) = (env.clone(), current.clone());
                    then(b, move |(from, to)| {
                        let key: JValue = [("start", from.clone()), ("end", to.clone())]
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), v))
                            .collect::<indexmap::IndexMap<_, _>>()
                            .into();
                        Box::new(self.eval_paths(base, env, current).map(move |pv| -> Result<PathValue, Exn> {
                            let (v, p) = pv?;
                            Ok((slice_value(&v, &from, &to)?, extend(&p, key.clone())))
                        }))
                    })
                }))
            }

            CompiledExpr::Iterate(base) => {
                Box::new(self.eval_paths(base, env, current).flat_map(|pv| then(pv, iterate_paths)))
            }

            CompiledExpr::Pipe(lhs, rhs) => Box::new(self.eval_paths(lhs, env.clone(), current).flat_map(move |pv| {
                let env = env.clone();
                then(pv, move |pv| self.eval_paths(rhs, env, pv))
            })),

            CompiledExpr::Comma(lhs, rhs) => Box::new(
                self.eval_paths(lhs, env.clone(), current.clone())
                    .chain(iter::once_with(move || self.eval_paths(rhs, env, current)).flatten()),
            ),

            CompiledExpr::Alternative(lhs, rhs) => {
                let mut kept = self.eval_paths(lhs, env.clone(), current.clone()).filter(|r| match r {
                    Ok((v, _)) => v.is_truthy(),
                    Err(Exn::Break(_)) => true,
                    Err(Exn::Error(_)) => false,
                });
                match kept.next() {
                    Some(first) => Box::new(iter::once(first).chain(kept)),
                    None => self.eval_paths(rhs, env, current),
                }
            }

            CompiledExpr::If { branches, otherwise } => self.branch_paths(branches, otherwise, env, current),

            CompiledExpr::Try { body, handler } => {
                let handler_env = env.clone();
                let handler = handler.as_deref().map(|h| {
                    Box::new(move |e: JValue| not_a_path(self.eval(h, handler_env, e))) as Handler<'a, PathValue>
                });
                Box::new(TryCatch::new(self.eval_paths(body, env, current), handler))
            }

            CompiledExpr::Reduce {
                source,
                pattern,
                init,
                update,
            } => Box::new(self.eval_paths(init, env.clone(), current.clone()).flat_map(move |acc| {
                let (env, input) = (env.clone(), current.0.clone());
                then(acc, move |mut acc| {
                    Box::new(iter::once_with(move || -> Result<PathValue, Exn> {
                        for x in self.eval(source, env.clone(), input) {
                            for bound in self.bind_pattern(pattern, x?, &env)? {
                                let mut last = None;
                                for pv in self.eval_paths(update, bound, acc.clone()) {
                                    last = Some(pv?);
                                }
                                acc = last.unwrap_or((JValue::Null, acc.1));
                            }
                        }
                        Ok(acc)
                    }))
                })
            })),

            CompiledExpr::Bind {
                source,
                pattern,
                body,
            } => Box::new(self.eval(source, env.clone(), current.0.clone()).flat_map(move |x| {
                let current = current.clone();
                let bound = x.and_then(|x| self.bind_pattern(pattern, x, &env));
                then(bound, move |envs| {
                    Box::new(
                        envs.into_iter()
                            .flat_map(move |e| self.eval_paths(body, e, current.clone())),
                    )
                })
            })),

            CompiledExpr::FuncDef { func, rest } => {
                let func: &'a CompiledFunc = func;
                let env = env.push(Bind::Def {
                    func,
                    env: env.clone(),
                });
                self.eval_paths(rest, env, current)
            }

            CompiledExpr::CallDef { slot, args } => {
                let (func, def_env) = match env.get(*slot) {
                    Bind::Def { func, env } => (*func, env.clone()),
                    _ => panic!("BUG: slot {} is not a function", slot),
                };
                let vm = match self.enter(func) {
                    Ok(vm) => vm,
                    Err(e) => return path_once(Err(e)),
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
                Box::new(Deep::new(with_stack(|| vm.eval_paths(&func.body, call_env, current))))
            }

            CompiledExpr::CallParam(slot) => {
                let (expr, closure_env) = match env.get(*slot) {
                    Bind::Closure { expr, env } => (*expr, env.clone()),
                    _ => panic!("BUG: slot {} is not a filter parameter", slot),
                };
                self.eval_paths(expr, closure_env, current)
            }

            CompiledExpr::CallBuiltin { builtin, args } => self.builtin_paths(*builtin, args, env, current),

            CompiledExpr::Label(body) => {
                let id: LabelId = Rc::new(());
                let env = env.push(Bind::Label(id.clone()));
                Box::new(self.eval_paths(body, env, current).map_while(move |r| match r {
                    Err(Exn::Break(ref b)) if Rc::ptr_eq(b, &id) => None,
                    r => Some(r),
                }))
            }

            CompiledExpr::Break(slot) => path_once(Err(Exn::Break(env.label(*slot)))),

            // Everything else produces values that have no location.
            _ => not_a_path(self.eval(expr, env, current.0)),
        }
    }

    fn branch_paths(
        self,
        branches: &'a [(CompiledExpr, CompiledExpr)],
        otherwise: &'a CompiledExpr,
        env: Env<'a>,
        current: PathValue,
    ) -> PathResults<'a> {
        let Some(((cond, body), rest)) = branches.split_first() else {
            return self.eval_paths(otherwise, env, current);
        };
        Box::new(self.eval(cond, env.clone(), current.0.clone()).flat_map(move |c| {
            let (env, current) = (env.clone(), current.clone());
            then(c, move |c| {
                if c.is_truthy() {
                    self.eval_paths(body, env, current)
                } else {
                    self.branch_paths(rest, otherwise, env, current)
                }
            })
        }))
    }

    /// Builtins that pass paths through; the rest are not path expressions.
    fn builtin_paths(
        self,
        builtin: Builtin,
        args: &'a [CompiledExpr],
        env: Env<'a>,
        current: PathValue,
    ) -> PathResults<'a> {
        match (builtin, args) {
            (Builtin::Empty, _) => Box::new(iter::empty()),
            (Builtin::Error, _) => path_once(Err(Exn::Error(current.0))),
            (Builtin::ErrorWith, [msg]) => Box::new(
                self.eval(msg, env, current.0)
                    .map(|m| -> Result<PathValue, Exn> { Err(Exn::Error(m?)) }),
            ),
            (Builtin::Select, [cond]) => self.select_paths(cond, env, current),
            (Builtin::Recurse, []) => recurse_paths(current),
            (Builtin::RecurseWith, [f]) => Box::new(Unfold::new(
                emit_then_descend(current),
                move |pv: PathValue| -> Frame<'a, PathValue> {
                    Box::new(
                        self.eval_paths(f, env.clone(), pv)
                            .map(|r| r.map(|pv| emit_then_descend(pv)))
                            .flat_map(|r| match r {
                                Ok(frame) => frame,
                                Err(e) => Box::new(iter::once(Err(e))),
                            }),
                    )
                },
            )),
            (Builtin::RecurseWhile, [f, cond]) => Box::new(Unfold::new(
                emit_then_descend(current),
                move |pv: PathValue| -> Frame<'a, PathValue> {
                    let env = env.clone();
                    Box::new(self.eval_paths(f, env.clone(), pv).flat_map(move |r| {
                        let selected = then(r, |pv| self.select_paths(cond, env.clone(), pv));
                        selected.flat_map(|r| match r {
                            Ok(pv) => emit_then_descend(pv),
                            Err(e) => Box::new(iter::once(Err(e))),
                        })
                    }))
                },
            )),
            (Builtin::GetPath, [p]) => Box::new(self.eval(p, env, current.0.clone()).map(move |path| -> Result<PathValue, Exn> {
                let path = path_array(&path?)?;
                let value = getpath(&current.0, &path)?;
                let mut full = current.1.clone();
                full.extend(path);
                Ok((value, full))
            })),
            (Builtin::First, []) => self.index_path(current, JValue::from(0i64)),
            (Builtin::Last, []) => self.index_path(current, JValue::from(-1i64)),
            (Builtin::FirstOf, [f]) => Box::new(self.eval_paths(f, env, current).take(1)),
            (Builtin::LastOf, [f]) => Box::new(iter::once_with(move || -> Result<Option<PathValue>, Exn> {
                let mut last = None;
                for pv in self.eval_paths(f, env, current) {
                    last = Some(pv?);
                }
                Ok(last)
            })
            .filter_map(|r| r.transpose())),
            (Builtin::Limit, [n, f]) => Box::new(self.eval(n, env.clone(), current.0.clone()).flat_map(move |n| {
                let (env, current) = (env.clone(), current.clone());
                then(n.and_then(|n| limit_count(&n)), move |n| match n {
                    Some(n) => Box::new(self.eval_paths(f, env, current).take(n)),
                    None => self.eval_paths(f, env, current),
                })
            })),
            (Builtin::Nth, [n]) => Box::new(self.eval(n, env, current.0.clone()).flat_map(move |n| {
                let current = current.clone();
                then(n, move |n| self.index_path(current, n))
            })),
            _ if builtin.type_filter().is_some() => {
                let wanted = builtin.type_filter();
                Box::new(iter::once(Ok(current)).filter(move |r| match r {
                    Ok((v, _)) => builtin_type_matches(wanted, v),
                    Err(_) => true,
                }))
            }
            _ => not_a_path(self.call_builtin(builtin, args, env, current.0)),
        }
    }

    fn select_paths(self, cond: &'a CompiledExpr, env: Env<'a>, current: PathValue) -> PathResults<'a> {
        Box::new(self.eval(cond, env, current.0.clone()).filter_map(move |c| match c {
            Ok(c) if c.is_truthy() => Some(Ok(current.clone())),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }))
    }

    fn index_path(self, (value, path): PathValue, key: JValue) -> PathResults<'a> {
        path_once(index_value(&value, &key).map(|v| (v, extend(&path, key))))
    }

    /// All paths of `expr` evaluated on `input`, as arrays.
    pub(crate) fn paths_of(self, expr: &'a CompiledExpr, env: Env<'a>, input: JValue) -> Box<dyn Iterator<Item = Result<Path, Exn>> + 'a> {
        Box::new(self.eval_paths(expr, env, (input, Vec::new())).map(|r| r.map(|(_, p)| p)))
    }

    /// Rewrite every location `lhs` denotes in `input` with `f`. Paths whose
    /// update yields nothing are deleted once all updates are done.
    fn modify(
        self,
        lhs: &'a CompiledExpr,
        env: Env<'a>,
        input: JValue,
        mut f: impl FnMut(JValue) -> Result<Option<JValue>, Exn>,
    ) -> ValueResult {
        let paths: Vec<Path> = self.paths_of(lhs, env, input.clone()).collect::<Result<_, _>>()?;
        let mut acc = input;
        let mut deleted = Vec::new();
        for path in paths {
            let old = getpath(&acc, &path)?;
            match f(old)? {
                Some(new) => acc = setpath(acc, &path, new)?,
                None => deleted.push(path),
            }
        }
        delpaths(acc, deleted)
    }

    /// `lhs = rhs`, `lhs |= f` and the arithmetic update operators.
    pub(crate) fn assign(
        self,
        op: AssignOp,
        lhs: &'a CompiledExpr,
        rhs: &'a CompiledExpr,
        env: Env<'a>,
        input: JValue,
    ) -> Box<dyn Iterator<Item = ValueResult> + 'a> {
        if let AssignOp::Update = op {
            return Box::new(iter::once_with(move || {
                let update_env = env.clone();
                self.modify(lhs, env, input, |old| {
                    self.eval(rhs, update_env.clone(), old).next().transpose()
                })
            }));
        }
        // The right-hand side sees the original input; each of its outputs
        // produces one result.
        Box::new(self.eval(rhs, env.clone(), input.clone()).map(move |v| {
            let v = v?;
            self.modify(lhs, env.clone(), input.clone(), |old| match op {
                AssignOp::Arithmetic(bop) => binary_op(bop, &old, &v).map(Some),
                AssignOp::Alternative if old.is_truthy() => Ok(Some(old)),
                AssignOp::Set | AssignOp::Alternative | AssignOp::Update => Ok(Some(v.clone())),
            })
        }))
    }
}

fn builtin_type_matches(wanted: Option<fn(&JValue) -> bool>, value: &JValue) -> bool {
    wanted.is_some_and(|f| f(value))
}

/// `limit` count: `None` means unlimited (negative counts).
pub(crate) fn limit_count(n: &JValue) -> Result<Option<usize>, Exn> {
    match n {
        JValue::Number(n) if *n < 0.0 => Ok(None),
        JValue::Number(n) => Ok(Some(*n as usize)),
        other => Err(Exn::msg(format!(
            "Invalid limit {}: must be a number",
            excerpt(other)
        ))),
    }
}

/// A path argument: must be an array.
pub(crate) fn path_array(value: &JValue) -> Result<Path, Exn> {
    match value {
        JValue::Array(arr) => Ok(arr.to_vec()),
        _ => Err(Exn::msg("Path must be specified as an array")),
    }
}

// ── Structural operations ────────────────────────────────────────────────────

/// Value at `path`; `null` once the walk reaches `null`.
pub(crate) fn getpath(value: &JValue, path: &[JValue]) -> ValueResult {
    let mut cur = value.clone();
    for key in path {
        if cur.is_null() {
            return Ok(JValue::Null);
        }
        cur = index_value(&cur, key)?;
    }
    Ok(cur)
}

/// Copy of `root` with the value at `path` replaced, creating containers
/// along the way. Untouched parts stay shared.
pub(crate) fn setpath(root: JValue, path: &[JValue], new: JValue) -> ValueResult {
    let Some((key, rest)) = path.split_first() else {
        return Ok(new);
    };
    match (root, key) {
        (JValue::Null, JValue::String(_)) => setpath(JValue::empty_object(), path, new),
        (JValue::Null, JValue::Number(_) | JValue::Object(_)) => setpath(JValue::empty_array(), path, new),
        (JValue::Object(mut map), JValue::String(k)) => {
            let m = Arc::make_mut(&mut map);
            let child = match m.get_mut(&**k) {
                Some(slot) => std::mem::replace(slot, JValue::Null),
                None => JValue::Null,
            };
            let updated = setpath(child, rest, new)?;
            m.insert(k.to_string(), updated);
            Ok(JValue::Object(map))
        }
        (JValue::Array(mut arr), JValue::Number(n)) => {
            let idx = resolve_index(n.floor() as i64, arr.len())
                .ok_or_else(|| Exn::msg("Out of bounds negative array index"))?;
            if idx > MAX_ARRAY_INDEX {
                return Err(Exn::msg("Array index too large"));
            }
            let a = Arc::make_mut(&mut arr);
            if idx >= a.len() {
                a.resize(idx + 1, JValue::Null);
            }
            let child = std::mem::replace(&mut a[idx], JValue::Null);
            a[idx] = setpath(child, rest, new)?;
            Ok(JValue::Array(arr))
        }
        (JValue::Array(mut arr), JValue::Object(range)) => {
            let (start, end) = range_bounds(range, arr.len())?;
            let current = JValue::array(arr[start..end].to_vec());
            let replacement = match setpath(current, rest, new)? {
                JValue::Array(items) => items,
                _ => return Err(Exn::msg("A slice of an array can only be assigned another array")),
            };
            Arc::make_mut(&mut arr).splice(start..end, replacement.iter().cloned());
            Ok(JValue::Array(arr))
        }
        (root, JValue::String(k)) => Err(Exn::msg(format!(
            "Cannot index {} with \"{}\"",
            root.type_name(),
            k
        ))),
        (root, key) => Err(Exn::msg(format!(
            "Cannot update field at {} index of {}",
            key.type_name(),
            root.type_name()
        ))),
    }
}

fn range_bounds(range: &indexmap::IndexMap<String, JValue>, len: usize) -> Result<(usize, usize), Exn> {
    let bound = |name: &str| -> Result<Option<f64>, Exn> {
        match range.get(name) {
            None | Some(JValue::Null) => Ok(None),
            Some(JValue::Number(n)) => Ok(Some(*n)),
            Some(_) => Err(Exn::msg("Start and end indices of an array slice must be numbers")),
        }
    };
    Ok(slice_bounds(bound("start")?, bound("end")?, len))
}

fn compare_paths(a: &[JValue], b: &[JValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    a.len().cmp(&b.len())
}

/// Delete every path in `paths`, longest and rightmost first so earlier
/// deletions never shift later ones.
pub(crate) fn delpaths(value: JValue, mut paths: Vec<Path>) -> ValueResult {
    paths.sort_by(|a, b| compare_paths(a, b));
    paths.dedup_by(|a, b| compare_paths(a, b) == Ordering::Equal);
    let mut out = value;
    for path in paths.iter().rev() {
        out = delpath(out, path)?;
    }
    Ok(out)
}

fn delpath(value: JValue, path: &[JValue]) -> ValueResult {
    match path {
        [] => Ok(JValue::Null),
        [key] => delete_key(value, key),
        [key, rest @ ..] => {
            if value.is_null() {
                return Ok(value);
            }
            let child = index_value(&value, key)?;
            if child.is_null() {
                return Ok(value);
            }
            let updated = delpath(child, rest)?;
            setpath(value, std::slice::from_ref(key), updated)
        }
    }
}

fn delete_key(value: JValue, key: &JValue) -> ValueResult {
    match (value, key) {
        (JValue::Null, _) => Ok(JValue::Null),
        (JValue::Object(mut map), JValue::String(k)) => {
            if map.contains_key(&**k) {
                Arc::make_mut(&mut map).shift_remove(&**k);
            }
            Ok(JValue::Object(map))
        }
        (JValue::Array(mut arr), JValue::Number(n)) => {
            let idx = resolve_index(n.floor() as i64, arr.len())
                .ok_or_else(|| Exn::msg("Out of bounds negative array index"))?;
            if idx < arr.len() {
                Arc::make_mut(&mut arr).remove(idx);
            }
            Ok(JValue::Array(arr))
        }
        (JValue::Array(mut arr), JValue::Object(range)) => {
            let (start, end) = range_bounds(range, arr.len())?;
            if start < end {
                Arc::make_mut(&mut arr).drain(start..end);
            }
            Ok(JValue::Array(arr))
        }
        (value, JValue::String(_)) => Err(Exn::msg(format!(
            "Cannot delete field at object index of {}",
            value.type_name()
        ))),
        (value, _) => Err(Exn::msg(format!("Cannot delete field at index of {}", value.type_name()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_str;
    use crate::jvalue;

    fn run(filter: &str, input: JValue) -> Vec<JValue> {
        compile_str(filter).unwrap().run(input).collect::<Result<_, _>>().unwrap()
    }

    fn run_err(filter: &str, input: JValue) -> String {
        compile_str(filter)
            .unwrap()
            .run(input)
            .find_map(|r| r.err())
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_setpath_creates_containers() {
        assert_eq!(
            setpath(JValue::Null, &[jvalue!("a"), jvalue!(1)], jvalue!(true)).unwrap(),
            jvalue!({"a": [null, true]})
        );
        assert_eq!(
            setpath(jvalue!([1, 2, 3]), &[jvalue!(-1)], jvalue!(9)).unwrap(),
            jvalue!([1, 2, 9])
        );
        assert!(setpath(jvalue!([1]), &[jvalue!(-5)], jvalue!(9)).is_err());
        assert!(setpath(jvalue!(1), &[jvalue!("a")], jvalue!(9)).is_err());
    }

    #[test]
    fn test_setpath_shares_untouched_children() {
        let original = jvalue!({"a": [1, 2], "b": [3]});
        let updated = setpath(original.clone(), &[jvalue!("b"), jvalue!(0)], jvalue!(4)).unwrap();
        match (original.get("a"), updated.get("a")) {
            (Some(JValue::Array(x)), Some(JValue::Array(y))) => assert!(Arc::ptr_eq(x, y)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(original, jvalue!({"a": [1, 2], "b": [3]}));
    }

    #[test]
    fn test_delpaths_order() {
        assert_eq!(
            delpaths(jvalue!([0, 1, 2, 3]), vec![vec![jvalue!(0)], vec![jvalue!(2)]]).unwrap(),
            jvalue!([1, 3])
        );
        assert_eq!(
            delpaths(jvalue!({"a": {"b": 1, "c": 2}}), vec![vec![jvalue!("a"), jvalue!("b")]]).unwrap(),
            jvalue!({"a": {"c": 2}})
        );
        assert_eq!(delpaths(jvalue!(5), vec![vec![]]).unwrap(), jvalue!(null));
    }

    #[test]
    fn test_path_builtin() {
        assert_eq!(run("[path(..)]", jvalue!({"a": [1]})), vec![jvalue!([[], ["a"], ["a", 0]])]);
        assert_eq!(run("path(.a[0].b)", jvalue!(null)), vec![jvalue!(["a", 0, "b"])]);
        assert_eq!(
            run("[path(.[] | select(. > 1))]", jvalue!([1, 2, 3])),
            vec![jvalue!([[1], [2]])]
        );
        assert_eq!(run("path(.[1:3])", jvalue!([1, 2, 3])), vec![jvalue!([{"start": 1, "end": 3}])]);
        assert_eq!(run("[paths]", jvalue!({"a": {"b": 1}})), vec![jvalue!([["a"], ["a", "b"]])]);
        assert_eq!(run("[leaf_paths]", jvalue!({"a": {"b": 1}})), vec![jvalue!([["a", "b"]])]);
    }

    #[test]
    fn test_path_of_non_path_expression() {
        assert_eq!(run_err("path(1)", jvalue!(null)), "Invalid path expression with result 1");
        assert_eq!(
            run_err(".a + 1 |= 2", jvalue!({"a": 1})),
            "Invalid path expression with result 2"
        );
    }

    #[test]
    fn test_update_assignment() {
        assert_eq!(run(".a |= . + 1", jvalue!({"a": 1})), vec![jvalue!({"a": 2})]);
        assert_eq!(run(".[] |= . * 2", jvalue!([1, 2])), vec![jvalue!([2, 4])]);
        assert_eq!(run(".a.b |= 5", jvalue!(null)), vec![jvalue!({"a": {"b": 5}})]);
        assert_eq!(
            run("(.[] | select(. > 1)) |= empty", jvalue!([1, 2, 3, 1])),
            vec![jvalue!([1, 1])]
        );
        assert_eq!(run(".a |= (1, 2)", jvalue!({})), vec![jvalue!({"a": 1})]);
    }

    #[test]
    fn test_plain_and_arithmetic_assignment() {
        assert_eq!(run(".a = .b", jvalue!({"b": 3})), vec![jvalue!({"b": 3, "a": 3})]);
        assert_eq!(
            run(".a = (1, 2)", jvalue!({})),
            vec![jvalue!({"a": 1}), jvalue!({"a": 2})]
        );
        assert_eq!(run(".[] += 10", jvalue!([1, 2])), vec![jvalue!([11, 12])]);
        assert_eq!(run(".a -= 1 | .a *= 3", jvalue!({"a": 3})), vec![jvalue!({"a": 6})]);
        assert_eq!(run(".a /= 2 | .a %= 3", jvalue!({"a": 10})), vec![jvalue!({"a": 2})]);
        assert_eq!(
            run(".a //= 1 | .b //= 2", jvalue!({"a": 5})),
            vec![jvalue!({"a": 5, "b": 2})]
        );
    }

    #[test]
    fn test_update_through_user_functions_and_builtins() {
        assert_eq!(
            run("def f: .a; f |= 1", jvalue!({"a": 0})),
            vec![jvalue!({"a": 1})]
        );
        assert_eq!(
            run("(.[] | select(type == \"number\")) |= . + 1", jvalue!([1, "x"])),
            vec![jvalue!([2, "x"])]
        );
        assert_eq!(run("first(.[]) |= 9", jvalue!([1, 2])), vec![jvalue!([9, 2])]);
        assert_eq!(run("getpath([\"a\", \"b\"]) |= 1", jvalue!({})), vec![jvalue!({"a": {"b": 1}})]);
        assert_eq!(run("(.. | numbers) |= . + 1", jvalue!([1, [2]])), vec![jvalue!([2, [3]])]);
        assert_eq!(run(".a? |= 1", jvalue!({})), vec![jvalue!({"a": 1})]);
        assert_eq!(run("(.a // .b) |= 1", jvalue!({"b": 0})), vec![jvalue!({"b": 1})]);
    }

    #[test]
    fn test_del() {
        assert_eq!(run("del(.a)", jvalue!({"a": 1, "b": 2})), vec![jvalue!({"b": 2})]);
        assert_eq!(run("del(.[1, 2])", jvalue!([0, 1, 2, 3])), vec![jvalue!([0, 3])]);
        assert_eq!(run("del(.[] | select(. == 2))", jvalue!([1, 2, 3])), vec![jvalue!([1, 3])]);
        assert_eq!(run("del(.[1:])", jvalue!([1, 2, 3])), vec![jvalue!([1])]);
        assert_eq!(run("del(.missing.deep)", jvalue!({})), vec![jvalue!({})]);
    }

    #[test]
    fn test_slice_assignment() {
        assert_eq!(run(".[1:2] = [\"x\", \"y\"]", jvalue!([1, 2, 3])), vec![jvalue!([1, "x", "y", 3])]);
        assert_eq!(
            run_err(".[0:1] = 5", jvalue!([1])),
            "A slice of an array can only be assigned another array"
        );
    }
}
