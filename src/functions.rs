// Built-in function implementations
// Static (name, arity) table resolved at compile time, plus the native code behind it

use std::iter;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::compiler::CompiledExpr;
use crate::datetime;
use crate::evaluator::{add_values, cannot_iterate, index_value, iterate_values, last_output, recurse_values};
use crate::paths::{delpaths, getpath, limit_count, path_array, recurse_paths, setpath};
use crate::utils::{describe, excerpt};
use crate::value::JValue;
use crate::vm::{emit_then_descend, empty, once, then, Env, Exn, Frame, Results, Step, Unfold, ValueResult, Vm};

/// Unary math functions over numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Math {
    Floor,
    Ceil,
    Round,
    Trunc,
    Sqrt,
    Fabs,
    Log,
    Log2,
    Log10,
    Exp,
    Exp2,
    Exp10,
}

impl Math {
    fn apply(self, n: f64) -> f64 {
        match self {
            Math::Floor => n.floor(),
            Math::Ceil => n.ceil(),
            Math::Round => n.round(),
            Math::Trunc => n.trunc(),
            Math::Sqrt => n.sqrt(),
            Math::Fabs => n.abs(),
            Math::Log => n.ln(),
            Math::Log2 => n.log2(),
            Math::Log10 => n.log10(),
            Math::Exp => n.exp(),
            Math::Exp2 => n.exp2(),
            Math::Exp10 => 10f64.powf(n),
        }
    }
}

/// A native builtin. Several names may share one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    // Generators and control
    Empty,
    Error,
    ErrorWith,
    Not,
    Select,
    Recurse,
    RecurseWith,
    RecurseWhile,
    Range,
    RangeUpto,
    RangeBy,
    First,
    Last,
    FirstOf,
    LastOf,
    Nth,
    NthOf,
    Limit,
    Until,
    While,
    IsEmpty,
    Any,
    AnyOf,
    AnyWith,
    All,
    AllOf,
    AllWith,
    In,
    Inside,
    InSource,
    InSourceWith,
    Debug,
    DebugWith,
    Stderr,
    Builtins,

    // Type selectors
    Arrays,
    Objects,
    Iterables,
    Booleans,
    Numbers,
    Strings,
    Nulls,
    Scalars,
    Values,

    // Paths
    PathOf,
    Paths,
    PathsWith,
    LeafPaths,
    GetPath,
    SetPath,
    DelPaths,
    Del,
    Pick,
    MapValues,
    Walk,

    // Collections
    Length,
    Utf8ByteLength,
    Keys,
    KeysUnsorted,
    Has,
    Map,
    Add,
    AddOf,
    Reverse,
    Sort,
    SortBy,
    GroupBy,
    Unique,
    UniqueBy,
    Min,
    Max,
    MinBy,
    MaxBy,
    Contains,
    Indices,
    Index,
    RIndex,
    Flatten,
    FlattenDepth,
    ToEntries,
    FromEntries,
    WithEntries,
    Transpose,
    ToArray,

    // Types and conversion
    Type,
    ToString,
    ToNumber,
    ToJson,
    FromJson,

    // Numbers
    Math(Math),
    Abs,
    Pow,
    Infinite,
    Nan,
    IsInfinite,
    IsNan,
    IsNormal,

    // Strings
    AsciiDowncase,
    AsciiUpcase,
    Explode,
    Implode,
    LTrimStr,
    RTrimStr,
    Trim,
    LTrim,
    RTrim,
    StartsWith,
    EndsWith,
    Split,
    SplitRegex,
    Join,
    Test,
    TestWith,
    Match,
    MatchWith,
    Capture,
    CaptureWith,
    Scan,
    ScanWith,
    Splits,
    SplitsWith,
    Sub,
    SubWith,
    GSub,
    GSubWith,

    // Dates
    Now,
    ToDate,
    FromDate,
    StrFTime,
    StrPTime,
    GmTime,
    MkTime,
}

static BUILTINS: &[(&str, usize, Builtin)] = &[
    ("empty", 0, Builtin::Empty),
    ("error", 0, Builtin::Error),
    ("error", 1, Builtin::ErrorWith),
    ("not", 0, Builtin::Not),
    ("select", 1, Builtin::Select),
    ("recurse", 0, Builtin::Recurse),
    ("recurse", 1, Builtin::RecurseWith),
    ("recurse", 2, Builtin::RecurseWhile),
    ("repeat", 1, Builtin::RecurseWith),
    ("range", 1, Builtin::Range),
    ("range", 2, Builtin::RangeUpto),
    ("range", 3, Builtin::RangeBy),
    ("first", 0, Builtin::First),
    ("last", 0, Builtin::Last),
    ("first", 1, Builtin::FirstOf),
    ("last", 1, Builtin::LastOf),
    ("nth", 1, Builtin::Nth),
    ("nth", 2, Builtin::NthOf),
    ("limit", 2, Builtin::Limit),
    ("until", 2, Builtin::Until),
    ("while", 2, Builtin::While),
    ("isempty", 1, Builtin::IsEmpty),
    ("any", 0, Builtin::Any),
    ("any", 1, Builtin::AnyOf),
    ("any", 2, Builtin::AnyWith),
    ("all", 0, Builtin::All),
    ("all", 1, Builtin::AllOf),
    ("all", 2, Builtin::AllWith),
    ("in", 1, Builtin::In),
    ("inside", 1, Builtin::Inside),
    ("IN", 1, Builtin::InSource),
    ("IN", 2, Builtin::InSourceWith),
    ("debug", 0, Builtin::Debug),
    ("debug", 1, Builtin::DebugWith),
    ("stderr", 0, Builtin::Stderr),
    ("builtins", 0, Builtin::Builtins),
    ("arrays", 0, Builtin::Arrays),
    ("objects", 0, Builtin::Objects),
    ("iterables", 0, Builtin::Iterables),
    ("booleans", 0, Builtin::Booleans),
    ("numbers", 0, Builtin::Numbers),
    ("strings", 0, Builtin::Strings),
    ("nulls", 0, Builtin::Nulls),
    ("scalars", 0, Builtin::Scalars),
    ("values", 0, Builtin::Values),
    ("path", 1, Builtin::PathOf),
    ("paths", 0, Builtin::Paths),
    ("paths", 1, Builtin::PathsWith),
    ("leaf_paths", 0, Builtin::LeafPaths),
    ("getpath", 1, Builtin::GetPath),
    ("setpath", 2, Builtin::SetPath),
    ("delpaths", 1, Builtin::DelPaths),
    ("del", 1, Builtin::Del),
    ("pick", 1, Builtin::Pick),
    ("map_values", 1, Builtin::MapValues),
    ("walk", 1, Builtin::Walk),
    ("length", 0, Builtin::Length),
    ("utf8bytelength", 0, Builtin::Utf8ByteLength),
    ("keys", 0, Builtin::Keys),
    ("keys_unsorted", 0, Builtin::KeysUnsorted),
    ("has", 1, Builtin::Has),
    ("map", 1, Builtin::Map),
    ("add", 0, Builtin::Add),
    ("add", 1, Builtin::AddOf),
    ("reverse", 0, Builtin::Reverse),
    ("sort", 0, Builtin::Sort),
    ("sort_by", 1, Builtin::SortBy),
    ("group_by", 1, Builtin::GroupBy),
    ("unique", 0, Builtin::Unique),
    ("unique_by", 1, Builtin::UniqueBy),
    ("min", 0, Builtin::Min),
    ("max", 0, Builtin::Max),
    ("min_by", 1, Builtin::MinBy),
    ("max_by", 1, Builtin::MaxBy),
    ("contains", 1, Builtin::Contains),
    ("indices", 1, Builtin::Indices),
    ("index", 1, Builtin::Index),
    ("rindex", 1, Builtin::RIndex),
    ("flatten", 0, Builtin::Flatten),
    ("flatten", 1, Builtin::FlattenDepth),
    ("to_entries", 0, Builtin::ToEntries),
    ("from_entries", 0, Builtin::FromEntries),
    ("with_entries", 1, Builtin::WithEntries),
    ("transpose", 0, Builtin::Transpose),
    ("toarray", 0, Builtin::ToArray),
    ("type", 0, Builtin::Type),
    ("tostring", 0, Builtin::ToString),
    ("tonumber", 0, Builtin::ToNumber),
    ("tojson", 0, Builtin::ToJson),
    ("fromjson", 0, Builtin::FromJson),
    ("floor", 0, Builtin::Math(Math::Floor)),
    ("ceil", 0, Builtin::Math(Math::Ceil)),
    ("round", 0, Builtin::Math(Math::Round)),
    ("trunc", 0, Builtin::Math(Math::Trunc)),
    ("sqrt", 0, Builtin::Math(Math::Sqrt)),
    ("fabs", 0, Builtin::Math(Math::Fabs)),
    ("log", 0, Builtin::Math(Math::Log)),
    ("log2", 0, Builtin::Math(Math::Log2)),
    ("log10", 0, Builtin::Math(Math::Log10)),
    ("exp", 0, Builtin::Math(Math::Exp)),
    ("exp2", 0, Builtin::Math(Math::Exp2)),
    ("exp10", 0, Builtin::Math(Math::Exp10)),
    ("abs", 0, Builtin::Abs),
    ("pow", 2, Builtin::Pow),
    ("infinite", 0, Builtin::Infinite),
    ("nan", 0, Builtin::Nan),
    ("isinfinite", 0, Builtin::IsInfinite),
    ("isnan", 0, Builtin::IsNan),
    ("isnormal", 0, Builtin::IsNormal),
    ("ascii_downcase", 0, Builtin::AsciiDowncase),
    ("ascii_upcase", 0, Builtin::AsciiUpcase),
    ("explode", 0, Builtin::Explode),
    ("implode", 0, Builtin::Implode),
    ("ltrimstr", 1, Builtin::LTrimStr),
    ("rtrimstr", 1, Builtin::RTrimStr),
    ("trim", 0, Builtin::Trim),
    ("ltrim", 0, Builtin::LTrim),
    ("rtrim", 0, Builtin::RTrim),
    ("startswith", 1, Builtin::StartsWith),
    ("endswith", 1, Builtin::EndsWith),
    ("split", 1, Builtin::Split),
    ("split", 2, Builtin::SplitRegex),
    ("join", 1, Builtin::Join),
    ("test", 1, Builtin::Test),
    ("test", 2, Builtin::TestWith),
    ("match", 1, Builtin::Match),
    ("match", 2, Builtin::MatchWith),
    ("capture", 1, Builtin::Capture),
    ("capture", 2, Builtin::CaptureWith),
    ("scan", 1, Builtin::Scan),
    ("scan", 2, Builtin::ScanWith),
    ("splits", 1, Builtin::Splits),
    ("splits", 2, Builtin::SplitsWith),
    ("sub", 2, Builtin::Sub),
    ("sub", 3, Builtin::SubWith),
    ("gsub", 2, Builtin::GSub),
    ("gsub", 3, Builtin::GSubWith),
    ("now", 0, Builtin::Now),
    ("todate", 0, Builtin::ToDate),
    ("todateiso8601", 0, Builtin::ToDate),
    ("date", 0, Builtin::ToDate),
    ("fromdate", 0, Builtin::FromDate),
    ("fromdateiso8601", 0, Builtin::FromDate),
    ("strftime", 1, Builtin::StrFTime),
    ("strptime", 1, Builtin::StrPTime),
    ("gmtime", 0, Builtin::GmTime),
    ("mktime", 0, Builtin::MkTime),
];

/// Resolve a builtin by name and arity.
pub(crate) fn lookup(name: &str, arity: usize) -> Option<Builtin> {
    BUILTINS
        .iter()
        .find(|(n, a, _)| *n == name && *a == arity)
        .map(|(_, _, b)| *b)
}

/// `name/arity` for every builtin, in table order.
pub(crate) fn signatures() -> impl Iterator<Item = String> {
    BUILTINS.iter().map(|(name, arity, _)| format!("{}/{}", name, arity))
}

impl Builtin {
    /// The predicate behind a type selector such as `numbers`.
    pub(crate) fn type_filter(self) -> Option<fn(&JValue) -> bool> {
        match self {
            Builtin::Arrays => Some(JValue::is_array),
            Builtin::Objects => Some(JValue::is_object),
            Builtin::Iterables => Some(|v| v.is_array() || v.is_object()),
            Builtin::Booleans => Some(JValue::is_bool),
            Builtin::Numbers => Some(JValue::is_number),
            Builtin::Strings => Some(JValue::is_string),
            Builtin::Nulls => Some(JValue::is_null),
            Builtin::Scalars => Some(|v| !(v.is_array() || v.is_object())),
            Builtin::Values => Some(|v| !v.is_null()),
            _ => None,
        }
    }
}

type Tuples<'a> = Box<dyn Iterator<Item = Result<Vec<JValue>, Exn>> + 'a>;

fn collected<'a>(values: Result<Vec<JValue>, Exn>) -> Results<'a> {
    match values {
        Ok(values) => Box::new(values.into_iter().map(Ok)),
        Err(e) => once(Err(e)),
    }
}

fn record<'k>(entries: impl IntoIterator<Item = (&'k str, JValue)>) -> JValue {
    JValue::object(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

fn emit_debug(value: &JValue) {
    debug!(target: "jqlite::debug", "{}", JValue::array(vec![JValue::from("DEBUG:"), value.clone()]));
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

impl<'a> Vm<'a> {
    /// Run `builtin` with its (unevaluated) arguments on `input`.
    pub(crate) fn call_builtin(
        self,
        builtin: Builtin,
        args: &'a [CompiledExpr],
        env: Env<'a>,
        input: JValue,
    ) -> Results<'a> {
        if let Some(keep) = builtin.type_filter() {
            return Box::new(iter::once(input).filter(move |v| keep(v)).map(Ok::<JValue, Exn>));
        }
        match builtin {
            Builtin::Empty => empty(),
            Builtin::Error => once(Err(Exn::Error(input))),
            Builtin::ErrorWith => self.with_args(args, env, input, |_, a| once(Err(Exn::Error(a[0].clone())))),
            Builtin::Not => once(Ok(JValue::Bool(!input.is_truthy()))),
            Builtin::Select => self.select(&args[0], env, input),
            Builtin::Recurse => Box::new(recurse_values(input)),
            Builtin::RecurseWith => self.recurse_with(&args[0], None, env, input),
            Builtin::RecurseWhile => self.recurse_with(&args[0], Some(&args[1]), env, input),
            Builtin::Range => self.with_args(args, env, input, |_, a| {
                numeric::range(&JValue::from(0i64), &a[0], &JValue::from(1i64))
            }),
            Builtin::RangeUpto => {
                self.with_args(args, env, input, |_, a| numeric::range(&a[0], &a[1], &JValue::from(1i64)))
            }
            Builtin::RangeBy => self.with_args(args, env, input, |_, a| numeric::range(&a[0], &a[1], &a[2])),
            Builtin::First => once(index_value(&input, &JValue::from(0i64))),
            Builtin::Last => once(index_value(&input, &JValue::from(-1i64))),
            Builtin::FirstOf => Box::new(self.eval(&args[0], env, input).take(1)),
            Builtin::LastOf => {
                let f = &args[0];
                Box::new(
                    iter::once_with(move || last_output(self.eval(f, env, input)))
                        .filter_map(|r| r.transpose()),
                )
            }
            Builtin::Nth => self.map_args(args, env, input, |input, a| index_value(input, &a[0])),
            Builtin::NthOf => {
                let f = &args[1];
                let f_env = env.clone();
                self.with_args(&args[..1], env, input, move |input, a| {
                    let n = match &a[0] {
                        JValue::Number(n) if *n < 0.0 => {
                            return once(Err(Exn::msg("Out of bounds negative array index")))
                        }
                        JValue::Number(n) => *n as usize,
                        other => return once(Err(Exn::msg(format!("{} cannot be used as an index", describe(other))))),
                    };
                    Box::new(
                        self.eval(f, f_env.clone(), input.clone())
                            .enumerate()
                            .filter(move |(i, r)| *i >= n || r.is_err())
                            .map(|(_, r)| r)
                            .take(1),
                    )
                })
            }
            Builtin::Limit => {
                let f = &args[1];
                let f_env = env.clone();
                self.with_args(&args[..1], env, input, move |input, a| {
                    let outputs = self.eval(f, f_env.clone(), input.clone());
                    match limit_count(&a[0]) {
                        Ok(Some(n)) => Box::new(outputs.take(n)),
                        Ok(None) => outputs,
                        Err(e) => once(Err(e)),
                    }
                })
            }
            Builtin::Until => self.until(&args[0], &args[1], env, input),
            Builtin::While => self.while_(&args[0], &args[1], env, input),
            Builtin::IsEmpty => {
                let f = &args[0];
                Box::new(iter::once_with(move || match self.eval(f, env, input).next() {
                    None => Ok(JValue::Bool(true)),
                    Some(Ok(_)) => Ok(JValue::Bool(false)),
                    Some(Err(e)) => Err(e),
                }))
            }
            Builtin::Any => self.quantify(iterate_values(input), None, env, true),
            Builtin::AnyOf => self.quantify(iterate_values(input), Some(&args[0]), env, true),
            Builtin::AnyWith => {
                let generator = self.eval(&args[0], env.clone(), input);
                self.quantify(generator, Some(&args[1]), env, true)
            }
            Builtin::All => self.quantify(iterate_values(input), None, env, false),
            Builtin::AllOf => self.quantify(iterate_values(input), Some(&args[0]), env, false),
            Builtin::AllWith => {
                let generator = self.eval(&args[0], env.clone(), input);
                self.quantify(generator, Some(&args[1]), env, false)
            }
            Builtin::In => self.map_args(args, env, input, |input, a| object::has(&a[0], input)),
            Builtin::Inside => self.map_args(args, env, input, |input, a| {
                object::contains(&a[0], input).map(JValue::Bool)
            }),
            Builtin::InSource => {
                let target = input.clone();
                let hits = self
                    .eval(&args[0], env.clone(), input)
                    .map(move |x| -> ValueResult { Ok(JValue::Bool(x? == target)) });
                self.quantify(Box::new(hits), None, env, true)
            }
            Builtin::InSourceWith => {
                let hits = self
                    .cartesian(&args[0], &args[1], env.clone(), input)
                    .map(|pair| -> ValueResult {
                        let (x, y) = pair?;
                        Ok(JValue::Bool(x == y))
                    });
                self.quantify(Box::new(hits), None, env, true)
            }
            Builtin::Debug => {
                emit_debug(&input);
                once(Ok(input))
            }
            Builtin::DebugWith => {
                let messages = self.eval(&args[0], env, input.clone()).filter_map(|m| match m {
                    Ok(m) => {
                        emit_debug(&m);
                        None
                    }
                    Err(e) => Some(Err(e)),
                });
                Box::new(messages.chain(iter::once(Ok(input))))
            }
            Builtin::Stderr => {
                info!(target: "jqlite::stderr", "{}", input);
                once(Ok(input))
            }
            Builtin::Builtins => once(Ok(signatures().map(JValue::from).collect())),

            Builtin::PathOf => {
                Box::new(self.paths_of(&args[0], env, input).map(|p| p.map(JValue::array)))
            }
            Builtin::Paths => Box::new(
                recurse_paths((input, Vec::new()))
                    .skip(1)
                    .map(|r| r.map(|(_, p)| JValue::array(p))),
            ),
            Builtin::PathsWith => {
                let f = &args[0];
                Box::new(recurse_paths((input, Vec::new())).skip(1).flat_map(move |r| {
                    let env = env.clone();
                    then(r, move |(v, p)| {
                        let path = JValue::array(p);
                        Box::new(self.eval(f, env, v).filter_map(move |c| match c {
                            Ok(c) if c.is_truthy() => Some(Ok(path.clone())),
                            Ok(_) => None,
                            Err(e) => Some(Err(e)),
                        }))
                    })
                }))
            }
            Builtin::LeafPaths => Box::new(recurse_paths((input, Vec::new())).skip(1).filter_map(|r| match r {
                Ok((v, p)) if !(v.is_array() || v.is_object()) => Some(Ok(JValue::array(p))),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            })),
            Builtin::GetPath => self.map_args(args, env, input, |input, a| getpath(input, &path_array(&a[0])?)),
            Builtin::SetPath => self.map_args(args, env, input, |input, a| {
                setpath(input.clone(), &path_array(&a[0])?, a[1].clone())
            }),
            Builtin::DelPaths => self.map_args(args, env, input, |input, a| {
                let paths = match &a[0] {
                    JValue::Array(ps) => ps.iter().map(path_array).collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(Exn::msg("Paths must be specified as an array")),
                };
                delpaths(input.clone(), paths)
            }),
            Builtin::Del => {
                let f = &args[0];
                Box::new(iter::once_with(move || {
                    let paths = self.paths_of(f, env, input.clone()).collect::<Result<Vec<_>, _>>()?;
                    delpaths(input, paths)
                }))
            }
            Builtin::Pick => {
                let f = &args[0];
                Box::new(iter::once_with(move || {
                    let mut out = JValue::Null;
                    for path in self.paths_of(f, env, input.clone()) {
                        let path = path?;
                        let value = getpath(&input, &path)?;
                        out = setpath(out, &path, value)?;
                    }
                    Ok(out)
                }))
            }
            Builtin::MapValues => {
                let f = &args[0];
                Box::new(iter::once_with(move || self.map_values(f, &env, input)))
            }
            Builtin::Walk => self.walk(&args[0], env, input),

            Builtin::Length => once(object::length(&input)),
            Builtin::Utf8ByteLength => once(string::utf8_byte_length(&input)),
            Builtin::Keys => once(object::keys(&input, true)),
            Builtin::KeysUnsorted => once(object::keys(&input, false)),
            Builtin::Has => self.map_args(args, env, input, |input, a| object::has(input, &a[0])),
            Builtin::Map => {
                let f = &args[0];
                Box::new(iter::once_with(move || {
                    iterate_values(input)
                        .flat_map(|v| then(v, |v| self.eval(f, env.clone(), v)))
                        .collect::<Result<Vec<_>, _>>()
                        .map(JValue::array)
                }))
            }
            Builtin::Add => once(match &input {
                JValue::Null => Ok(JValue::Null),
                _ => array::add(iterate_values(input)),
            }),
            Builtin::AddOf => {
                let f = &args[0];
                Box::new(iter::once_with(move || array::add(self.eval(f, env, input))))
            }
            Builtin::Reverse => once(array::reverse(&input)),
            Builtin::Sort => once(array::sortable(&input).map(|items| array::sort(items.to_vec()))),
            Builtin::SortBy => self.by_key(&args[0], env, input, array::sort_keyed),
            Builtin::GroupBy => self.by_key(&args[0], env, input, array::group_keyed),
            Builtin::Unique => once(array::sortable(&input).map(|items| array::unique(items.to_vec()))),
            Builtin::UniqueBy => self.by_key(&args[0], env, input, array::unique_keyed),
            Builtin::Min => once(array::sortable(&input).map(|items| array::extreme(keyed_self(items), false))),
            Builtin::Max => once(array::sortable(&input).map(|items| array::extreme(keyed_self(items), true))),
            Builtin::MinBy => self.by_key(&args[0], env, input, |pairs| array::extreme(pairs, false)),
            Builtin::MaxBy => self.by_key(&args[0], env, input, |pairs| array::extreme(pairs, true)),
            Builtin::Contains => self.map_args(args, env, input, |input, a| {
                object::contains(input, &a[0]).map(JValue::Bool)
            }),
            Builtin::Indices => self.map_args(args, env, input, |input, a| array::indices(input, &a[0])),
            Builtin::Index => self.map_args(args, env, input, |input, a| {
                index_value(&array::indices(input, &a[0])?, &JValue::from(0i64))
            }),
            Builtin::RIndex => self.map_args(args, env, input, |input, a| {
                array::last_of(&array::indices(input, &a[0])?)
            }),
            Builtin::Flatten => once(array::flatten_values(&input, f64::INFINITY)),
            Builtin::FlattenDepth => self.map_args(args, env, input, |input, a| match &a[0] {
                JValue::Number(d) if *d < 0.0 => Err(Exn::msg("flatten depth must not be negative")),
                JValue::Number(d) => array::flatten_values(input, *d),
                other => Err(Exn::msg(format!("{} cannot be used as a flatten depth", describe(other)))),
            }),
            Builtin::ToEntries => once(object::to_entries(&input)),
            Builtin::FromEntries => once(object::from_entries(input)),
            Builtin::WithEntries => {
                let f = &args[0];
                Box::new(iter::once_with(move || {
                    let entries = object::to_entries(&input)?;
                    let mapped = iterate_values(entries)
                        .flat_map(|e| then(e, |e| self.eval(f, env.clone(), e)))
                        .collect::<Result<Vec<_>, _>>()?;
                    object::from_entries(JValue::array(mapped))
                }))
            }
            Builtin::Transpose => once(array::transpose(&input)),
            Builtin::ToArray => once(Ok(match input {
                JValue::Array(_) => input,
                other => JValue::array(vec![other]),
            })),

            Builtin::Type => once(Ok(JValue::from(input.type_name()))),
            Builtin::ToString => once(Ok(JValue::string(crate::utils::to_text(&input)))),
            Builtin::ToNumber => once(numeric::tonumber(&input)),
            Builtin::ToJson => once(Ok(JValue::string(input.to_string()))),
            Builtin::FromJson => once(string::fromjson(&input)),

            Builtin::Math(op) => once(numeric::math(op, &input)),
            Builtin::Abs => once(numeric::abs(&input)),
            Builtin::Pow => self.map_args(args, env, input, |_, a| numeric::pow(&a[0], &a[1])),
            Builtin::Infinite => once(Ok(JValue::Number(f64::INFINITY))),
            Builtin::Nan => once(Ok(JValue::Number(f64::NAN))),
            Builtin::IsInfinite => once(numeric::classify(&input, f64::is_infinite)),
            Builtin::IsNan => once(numeric::classify(&input, f64::is_nan)),
            Builtin::IsNormal => once(numeric::classify(&input, f64::is_normal)),

            Builtin::AsciiDowncase => once(string::ascii_case(&input, false)),
            Builtin::AsciiUpcase => once(string::ascii_case(&input, true)),
            Builtin::Explode => once(string::explode(&input)),
            Builtin::Implode => once(string::implode(&input)),
            Builtin::LTrimStr => self.map_args(args, env, input, |input, a| Ok(string::trim_affix(input, &a[0], true))),
            Builtin::RTrimStr => self.map_args(args, env, input, |input, a| Ok(string::trim_affix(input, &a[0], false))),
            Builtin::Trim => once(string::trim(&input, true, true)),
            Builtin::LTrim => once(string::trim(&input, true, false)),
            Builtin::RTrim => once(string::trim(&input, false, true)),
            Builtin::StartsWith => self.map_args(args, env, input, |input, a| string::affix_test(input, &a[0], true)),
            Builtin::EndsWith => self.map_args(args, env, input, |input, a| string::affix_test(input, &a[0], false)),
            Builtin::Split => self.map_args(args, env, input, |input, a| string::split(input, &a[0])),
            Builtin::SplitRegex => self.map_args(args, env, input, |input, a| matching::split(input, &a[0], &a[1])),
            Builtin::Join => self.map_args(args, env, input, |input, a| string::join(input, &a[0])),
            Builtin::Test | Builtin::TestWith => self.with_regex(args, env, input, |input, re, flags| {
                once(matching::test(input, re, flags))
            }),
            Builtin::Match | Builtin::MatchWith => self.with_regex(args, env, input, |input, re, flags| {
                collected(matching::find(input, re, flags, false).map(|found| found.into_iter().map(|m| m.value).collect()))
            }),
            Builtin::Capture | Builtin::CaptureWith => self.with_regex(args, env, input, |input, re, flags| {
                collected(
                    matching::find(input, re, flags, false)
                        .map(|found| found.iter().map(|m| matching::capture_object(&m.value)).collect()),
                )
            }),
            Builtin::Scan | Builtin::ScanWith => self.with_regex(args, env, input, |input, re, flags| {
                collected(
                    matching::find(input, re, flags, true)
                        .map(|found| found.iter().map(|m| matching::scan_item(&m.value)).collect()),
                )
            }),
            Builtin::Splits | Builtin::SplitsWith => self.with_regex(args, env, input, |input, re, flags| {
                match matching::split(input, re, flags) {
                    Ok(parts) => iterate_values(parts),
                    Err(e) => once(Err(e)),
                }
            }),
            Builtin::Sub | Builtin::SubWith => self.substitute_all(args, env, input, false),
            Builtin::GSub | Builtin::GSubWith => self.substitute_all(args, env, input, true),

            Builtin::Now => once(Ok(JValue::Number(datetime::now()))),
            Builtin::ToDate => once(datetime::todate(&input).map_err(Exn::from)),
            Builtin::FromDate => once(datetime::fromdate(&input).map_err(Exn::from)),
            Builtin::StrFTime => self.map_args(args, env, input, |input, a| Ok(datetime::strftime(input, &a[0])?)),
            Builtin::StrPTime => self.map_args(args, env, input, |input, a| Ok(datetime::strptime(input, &a[0])?)),
            Builtin::GmTime => once(datetime::gmtime(&input).map_err(Exn::from)),
            Builtin::MkTime => once(datetime::mktime(&input).map_err(Exn::from)),

            Builtin::Arrays
            | Builtin::Objects
            | Builtin::Iterables
            | Builtin::Booleans
            | Builtin::Numbers
            | Builtin::Strings
            | Builtin::Nulls
            | Builtin::Scalars
            | Builtin::Values => panic!("BUG: type selector {:?} reached dispatch", builtin),
        }
    }

    /// Every combination of the value arguments' outputs, first argument
    /// varying slowest.
    fn arg_tuples(self, args: &'a [CompiledExpr], env: Env<'a>, input: JValue) -> Tuples<'a> {
        let Some((first, rest)) = args.split_first() else {
            return Box::new(iter::once(Ok(Vec::new())));
        };
        Box::new(self.eval(first, env.clone(), input.clone()).flat_map(move |x| {
            let (env, input) = (env.clone(), input.clone());
            then(x, move |x| -> Tuples<'a> {
                Box::new(self.arg_tuples(rest, env, input).map(move |tail| -> Result<Vec<JValue>, Exn> {
                    let mut values = vec![x.clone()];
                    values.extend(tail?);
                    Ok(values)
                }))
            })
        }))
    }

    fn with_args(
        self,
        args: &'a [CompiledExpr],
        env: Env<'a>,
        input: JValue,
        f: impl Fn(&JValue, &[JValue]) -> Results<'a> + 'a,
    ) -> Results<'a> {
        let tuples = self.arg_tuples(args, env, input.clone());
        Box::new(tuples.flat_map(move |t| then(t, |t| f(&input, &t))))
    }

    fn map_args(
        self,
        args: &'a [CompiledExpr],
        env: Env<'a>,
        input: JValue,
        f: impl Fn(&JValue, &[JValue]) -> ValueResult + 'a,
    ) -> Results<'a> {
        self.with_args(args, env, input, move |input, a| once(f(input, a)))
    }

    /// Regex builtins: `f(re)` with null flags, or `f(re; flags)`. A single
    /// array argument is read as `[re, flags]`.
    fn with_regex(
        self,
        args: &'a [CompiledExpr],
        env: Env<'a>,
        input: JValue,
        f: impl Fn(&JValue, &JValue, &JValue) -> Results<'a> + 'a,
    ) -> Results<'a> {
        self.with_args(args, env, input, move |input, a| match a {
            [JValue::Array(spec)] => {
                let re = spec.first().cloned().unwrap_or(JValue::Null);
                let flags = spec.get(1).cloned().unwrap_or(JValue::Null);
                f(input, &re, &flags)
            }
            [re] => f(input, re, &JValue::Null),
            [re, flags] => f(input, re, flags),
            _ => panic!("BUG: regex builtin called with {} arguments", a.len()),
        })
    }

    fn select(self, cond: &'a CompiledExpr, env: Env<'a>, input: JValue) -> Results<'a> {
        Box::new(self.eval(cond, env, input.clone()).filter_map(move |c| match c {
            Ok(c) if c.is_truthy() => Some(Ok(input.clone())),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        }))
    }

    /// `recurse(f)` and `recurse(f; cond)`.
    fn recurse_with(
        self,
        f: &'a CompiledExpr,
        cond: Option<&'a CompiledExpr>,
        env: Env<'a>,
        input: JValue,
    ) -> Results<'a> {
        Box::new(Unfold::new(emit_then_descend(input), move |v: JValue| -> Frame<'a, JValue> {
            let next = self.eval(f, env.clone(), v);
            let next: Results<'a> = match cond {
                Some(cond) => {
                    let env = env.clone();
                    Box::new(next.flat_map(move |u| then(u, |u| self.select(cond, env.clone(), u))))
                }
                None => next,
            };
            Box::new(next.flat_map(|r| match r {
                Ok(u) => emit_then_descend(u),
                Err(e) => Box::new(iter::once(Err(e))) as Frame<'a, JValue>,
            }))
        }))
    }

    /// `until(cond; update)`: apply `update` until `cond` holds.
    fn until(self, cond: &'a CompiledExpr, update: &'a CompiledExpr, env: Env<'a>, input: JValue) -> Results<'a> {
        let root: Frame<'a, JValue> = Box::new(iter::once(Ok(Step::Descend(input))));
        Box::new(Unfold::new(root, move |v: JValue| -> Frame<'a, JValue> {
            let env = env.clone();
            Box::new(self.eval(cond, env.clone(), v.clone()).flat_map(move |c| {
                let (env, v) = (env.clone(), v.clone());
                then(c, move |c| -> Frame<'a, JValue> {
                    if c.is_truthy() {
                        Box::new(iter::once(Ok(Step::Emit(v))))
                    } else {
                        Box::new(self.eval(update, env, v).map(|u| u.map(Step::Descend)))
                    }
                })
            }))
        }))
    }

    /// `while(cond; update)`: emit while `cond` holds, applying `update`.
    fn while_(self, cond: &'a CompiledExpr, update: &'a CompiledExpr, env: Env<'a>, input: JValue) -> Results<'a> {
        let root: Frame<'a, JValue> = Box::new(iter::once(Ok(Step::Descend(input))));
        Box::new(Unfold::new(root, move |v: JValue| -> Frame<'a, JValue> {
            let env = env.clone();
            Box::new(self.eval(cond, env.clone(), v.clone()).flat_map(move |c| {
                let (env, v) = (env.clone(), v.clone());
                then(c, move |c| -> Frame<'a, JValue> {
                    if !c.is_truthy() {
                        return Box::new(iter::empty());
                    }
                    let next = self.eval(update, env, v.clone()).map(|u| u.map(Step::Descend));
                    Box::new(iter::once(Ok(Step::Emit(v))).chain(next))
                })
            }))
        }))
    }

    /// `any` (`want == true`) and `all` (`want == false`), stopping at the
    /// first deciding output.
    fn quantify(
        self,
        generator: Results<'a>,
        cond: Option<&'a CompiledExpr>,
        env: Env<'a>,
        want: bool,
    ) -> Results<'a> {
        Box::new(iter::once_with(move || -> ValueResult {
            for x in generator {
                let x = x?;
                let outcomes = match cond {
                    Some(c) => self.eval(c, env.clone(), x),
                    None => once(Ok(x)),
                };
                for c in outcomes {
                    if c?.is_truthy() == want {
                        return Ok(JValue::Bool(want));
                    }
                }
            }
            Ok(JValue::Bool(!want))
        }))
    }

    /// Pair each element with `[f]` and hand the pairs to `finish`.
    fn by_key(
        self,
        f: &'a CompiledExpr,
        env: Env<'a>,
        input: JValue,
        finish: fn(Vec<(JValue, JValue)>) -> JValue,
    ) -> Results<'a> {
        Box::new(iter::once_with(move || {
            let items = array::sortable(&input)?;
            let mut pairs = Vec::with_capacity(items.len());
            for item in items.iter() {
                let key = self
                    .eval(f, env.clone(), item.clone())
                    .collect::<Result<Vec<_>, _>>()?;
                pairs.push((JValue::array(key), item.clone()));
            }
            Ok(finish(pairs))
        }))
    }

    /// `map_values(f)`: first output of `f` per element; none deletes it.
    fn map_values(self, f: &'a CompiledExpr, env: &Env<'a>, input: JValue) -> ValueResult {
        match input {
            JValue::Array(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for v in arr.iter() {
                    if let Some(x) = self.eval(f, env.clone(), v.clone()).next().transpose()? {
                        out.push(x);
                    }
                }
                Ok(JValue::array(out))
            }
            JValue::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map.iter() {
                    if let Some(x) = self.eval(f, env.clone(), v.clone()).next().transpose()? {
                        out.insert(k.clone(), x);
                    }
                }
                Ok(JValue::object(out))
            }
            other => Err(cannot_iterate(&other)),
        }
    }

    /// `walk(f)`: rewrite children bottom-up, then apply `f`.
    fn walk(self, f: &'a CompiledExpr, env: Env<'a>, input: JValue) -> Results<'a> {
        let children = self.walk_children(f, &env, input);
        then(children, move |v| self.eval(f, env, v))
    }

    fn walk_children(self, f: &'a CompiledExpr, env: &Env<'a>, input: JValue) -> ValueResult {
        match input {
            JValue::Array(arr) => {
                let mut out = Vec::with_capacity(arr.len());
                for v in arr.iter() {
                    for w in self.walk(f, env.clone(), v.clone()) {
                        out.push(w?);
                    }
                }
                Ok(JValue::array(out))
            }
            JValue::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map.iter() {
                    if let Some(w) = self.walk(f, env.clone(), v.clone()).next().transpose()? {
                        out.insert(k.clone(), w);
                    }
                }
                Ok(JValue::object(out))
            }
            other => Ok(other),
        }
    }

    /// `sub` and `gsub`. The regex and flags are value arguments; the
    /// replacement runs on each match's capture object.
    fn substitute_all(self, args: &'a [CompiledExpr], env: Env<'a>, input: JValue, global: bool) -> Results<'a> {
        let replacement = &args[1];
        let flag_args: &'a [CompiledExpr] = if args.len() > 2 { &args[2..] } else { &[] };
        let outer_env = env.clone();
        self.with_args(&args[..1], env, input, move |input, re| {
            let (re, env) = (re[0].clone(), outer_env.clone());
            self.with_args(flag_args, env.clone(), input.clone(), move |input, flags| {
                let flags = flags.first().cloned().unwrap_or(JValue::Null);
                collected(self.substitute(input, &re, replacement, &flags, global, &env))
            })
        })
    }

    fn substitute(
        self,
        input: &JValue,
        re: &JValue,
        replacement: &'a CompiledExpr,
        flags: &JValue,
        global: bool,
        env: &Env<'a>,
    ) -> Result<Vec<JValue>, Exn> {
        let text = match input {
            JValue::String(s) => s.clone(),
            other => return Err(matching::not_a_string(other)),
        };
        let found = matching::find(input, re, flags, global)?;
        let mut partials = vec![JValue::string("")];
        let mut prev = 0;
        for m in &found {
            let gap = JValue::string(&text[prev..m.start]);
            let choices = self
                .eval(replacement, env.clone(), matching::capture_object(&m.value))
                .collect::<Result<Vec<_>, _>>()?;
            let mut next = Vec::with_capacity(partials.len() * choices.len());
            for partial in &partials {
                let prefix = add_values(partial, &gap)?;
                for choice in &choices {
                    next.push(add_values(&prefix, choice)?);
                }
            }
            partials = next;
            prev = m.end;
        }
        let tail = JValue::string(&text[prev..]);
        partials.iter().map(|p| add_values(p, &tail)).collect()
    }
}

fn keyed_self(items: &[JValue]) -> Vec<(JValue, JValue)> {
    items.iter().map(|v| (v.clone(), v.clone())).collect()
}

fn not_number(value: &JValue) -> Exn {
    Exn::msg(format!("{} number required", describe(value)))
}

// ── Numbers ──────────────────────────────────────────────────────────────────

/// Built-in numeric functions
pub(crate) mod numeric {
    use super::*;

    fn number(value: &JValue) -> Result<f64, Exn> {
        match value {
            JValue::Number(n) => Ok(*n),
            other => Err(not_number(other)),
        }
    }

    pub(crate) fn math(op: Math, value: &JValue) -> ValueResult {
        Ok(JValue::Number(op.apply(number(value)?)))
    }

    pub(crate) fn abs(value: &JValue) -> ValueResult {
        match value {
            JValue::Number(n) => Ok(JValue::Number(n.abs())),
            other => Err(Exn::msg(format!("{} has no absolute value", describe(other)))),
        }
    }

    pub(crate) fn pow(base: &JValue, exp: &JValue) -> ValueResult {
        Ok(JValue::Number(number(base)?.powf(number(exp)?)))
    }

    pub(crate) fn classify(value: &JValue, test: fn(f64) -> bool) -> ValueResult {
        Ok(JValue::Bool(test(number(value)?)))
    }

    pub(crate) fn tonumber(value: &JValue) -> ValueResult {
        match value {
            JValue::Number(_) => Ok(value.clone()),
            JValue::String(s) => match JValue::from_json_str(s) {
                Ok(n @ JValue::Number(_)) => Ok(n),
                _ => Err(Exn::msg(format!("Cannot parse {} as JSON", excerpt(value)))),
            },
            other => Err(Exn::msg(format!("{} cannot be parsed as a number", describe(other)))),
        }
    }

    /// `range(from; upto; by)`, produced lazily by repeated addition.
    /// A zero step yields nothing.
    pub(crate) fn range<'a>(from: &JValue, upto: &JValue, by: &JValue) -> Results<'a> {
        let (from, upto, by) = match (from, upto, by) {
            (JValue::Number(f), JValue::Number(u), JValue::Number(b)) => (*f, *u, *b),
            _ => return once(Err(Exn::msg("Range bounds must be numeric"))),
        };
        if by == 0.0 || by.is_nan() {
            return empty();
        }
        Box::new(
            iter::successors(Some(from), move |x| Some(x + by))
                .take_while(move |x| if by > 0.0 { *x < upto } else { *x > upto })
                .map(|x| Ok(JValue::Number(x))),
        )
    }
}

// ── Strings ──────────────────────────────────────────────────────────────────

/// Built-in string functions
pub(crate) mod string {
    use super::*;
    use crate::evaluator::split_string;

    pub(crate) fn utf8_byte_length(value: &JValue) -> ValueResult {
        match value {
            JValue::String(s) => Ok(JValue::from(s.len())),
            other => Err(Exn::msg(format!("{} only strings have UTF-8 byte length", describe(other)))),
        }
    }

    pub(crate) fn fromjson(value: &JValue) -> ValueResult {
        match value {
            JValue::String(s) => JValue::from_json_str(s)
                .map_err(|e| Exn::msg(format!("{} (while parsing '{}')", e, s))),
            other => Err(Exn::msg(format!("{} only strings can be parsed", describe(other)))),
        }
    }

    pub(crate) fn ascii_case(value: &JValue, upper: bool) -> ValueResult {
        match value {
            JValue::String(s) if upper => Ok(JValue::string(s.to_ascii_uppercase())),
            JValue::String(s) => Ok(JValue::string(s.to_ascii_lowercase())),
            _ if upper => Err(Exn::msg("ascii_upcase input must be a string")),
            _ => Err(Exn::msg("ascii_downcase input must be a string")),
        }
    }

    pub(crate) fn explode(value: &JValue) -> ValueResult {
        match value {
            JValue::String(s) => Ok(s.chars().map(|c| JValue::from(c as i64)).collect()),
            _ => Err(Exn::msg("explode input must be a string")),
        }
    }

    pub(crate) fn implode(value: &JValue) -> ValueResult {
        let JValue::Array(codes) = value else {
            return Err(Exn::msg("implode input must be an array"));
        };
        let mut out = String::with_capacity(codes.len());
        for code in codes.iter() {
            let JValue::Number(n) = code else {
                return Err(Exn::msg("Unicode codepoint must be numeric"));
            };
            let c = char::from_u32(*n as u32).ok_or_else(|| Exn::msg("Invalid codepoint literal"))?;
            out.push(c);
        }
        Ok(JValue::string(out))
    }

    /// `ltrimstr` / `rtrimstr`: anything that is not a matching string
    /// passes through.
    pub(crate) fn trim_affix(value: &JValue, affix: &JValue, left: bool) -> JValue {
        if let (JValue::String(s), JValue::String(a)) = (value, affix) {
            let stripped = if left { s.strip_prefix(&**a) } else { s.strip_suffix(&**a) };
            if let Some(rest) = stripped {
                return JValue::string(rest);
            }
        }
        value.clone()
    }

    pub(crate) fn trim(value: &JValue, left: bool, right: bool) -> ValueResult {
        let JValue::String(s) = value else {
            return Err(Exn::msg("trim input must be a string"));
        };
        let trimmed = match (left, right) {
            (true, true) => s.trim(),
            (true, false) => s.trim_start(),
            _ => s.trim_end(),
        };
        Ok(JValue::string(trimmed))
    }

    pub(crate) fn affix_test(value: &JValue, affix: &JValue, start: bool) -> ValueResult {
        match (value, affix) {
            (JValue::String(s), JValue::String(a)) if start => Ok(JValue::Bool(s.starts_with(&**a))),
            (JValue::String(s), JValue::String(a)) => Ok(JValue::Bool(s.ends_with(&**a))),
            _ if start => Err(Exn::msg("startswith() requires string inputs")),
            _ => Err(Exn::msg("endswith() requires string inputs")),
        }
    }

    pub(crate) fn split(value: &JValue, sep: &JValue) -> ValueResult {
        match (value, sep) {
            (JValue::String(s), JValue::String(sep)) => Ok(split_string(s, sep)),
            _ => Err(Exn::msg("split input and separator must be strings")),
        }
    }

    /// `join(sep)`: nulls become empty, numbers and booleans their JSON text.
    /// Anything else fails the way string concatenation would.
    pub(crate) fn join(value: &JValue, sep: &JValue) -> ValueResult {
        let mut acc: Option<JValue> = None;
        for item in iterate_values(value.clone()) {
            let item = match item? {
                JValue::Null => JValue::string(""),
                v @ (JValue::Number(_) | JValue::Bool(_)) => JValue::string(v.to_string()),
                v => v,
            };
            let head = match acc {
                None => JValue::string(""),
                Some(prev) => add_values(&prev, sep)?,
            };
            acc = Some(add_values(&head, &item)?);
        }
        Ok(acc.unwrap_or_else(|| JValue::string("")))
    }
}

// ── Objects and containment ──────────────────────────────────────────────────

/// Built-in object functions
pub(crate) mod object {
    use super::*;

    pub(crate) fn length(value: &JValue) -> ValueResult {
        match value {
            JValue::Null => Ok(JValue::from(0i64)),
            JValue::Bool(_) => Err(Exn::msg(format!("{} has no length", describe(value)))),
            JValue::Number(n) => Ok(JValue::Number(n.abs())),
            JValue::String(s) => Ok(JValue::from(s.chars().count())),
            JValue::Array(arr) => Ok(JValue::from(arr.len())),
            JValue::Object(map) => Ok(JValue::from(map.len())),
        }
    }

    pub(crate) fn keys(value: &JValue, sorted: bool) -> ValueResult {
        match value {
            JValue::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                if sorted {
                    keys.sort();
                }
                Ok(keys.into_iter().map(|k| JValue::from(k.as_str())).collect())
            }
            JValue::Array(arr) => Ok((0..arr.len()).map(JValue::from).collect()),
            other => Err(Exn::msg(format!("{} has no keys", describe(other)))),
        }
    }

    pub(crate) fn has(container: &JValue, key: &JValue) -> ValueResult {
        match (container, key) {
            (JValue::Object(map), JValue::String(k)) => Ok(JValue::Bool(map.contains_key(&**k))),
            (JValue::Array(arr), JValue::Number(n)) => Ok(JValue::Bool(*n >= 0.0 && (*n as usize) < arr.len())),
            _ => Err(Exn::msg(format!(
                "Cannot check whether {} has a {} key",
                container.type_name(),
                key.type_name()
            ))),
        }
    }

    /// Recursive containment: substrings, subsets of array elements and
    /// object fields, equality for everything else of the same type.
    pub(crate) fn contains(a: &JValue, b: &JValue) -> Result<bool, Exn> {
        match (a, b) {
            (JValue::Object(x), JValue::Object(y)) => {
                for (k, bv) in y.iter() {
                    match x.get(k) {
                        Some(av) if contains(av, bv)? => {}
                        _ => return Ok(false),
                    }
                }
                Ok(true)
            }
            (JValue::Array(x), JValue::Array(y)) => {
                'outer: for bv in y.iter() {
                    for av in x.iter() {
                        if contains(av, bv)? {
                            continue 'outer;
                        }
                    }
                    return Ok(false);
                }
                Ok(true)
            }
            (JValue::String(x), JValue::String(y)) => Ok(x.contains(&**y)),
            _ if a.type_name() == b.type_name() => Ok(a == b),
            _ => Err(Exn::msg(format!(
                "{} and {} cannot have their containment checked",
                describe(a),
                describe(b)
            ))),
        }
    }

    pub(crate) fn to_entries(value: &JValue) -> ValueResult {
        let keys = keys(value, false)?;
        let mut entries = Vec::new();
        for key in iterate_values(keys) {
            let key = key?;
            let value = index_value(value, &key)?;
            entries.push(record([("key", key), ("value", value)]));
        }
        Ok(JValue::array(entries))
    }

    /// Accepts `key`/`k`/`name`/`Name`/`K`/`Key` and `value`/`v`; non-string
    /// keys are converted with `tojson`.
    pub(crate) fn from_entries(value: JValue) -> ValueResult {
        let mut out = IndexMap::new();
        for entry in iterate_values(value) {
            let entry = entry?;
            let field = |name: &str| index_value(&entry, &JValue::from(name));
            let mut key = field("key")?;
            if key.is_null() {
                for alt in ["k", "name", "Name", "K", "Key"] {
                    key = field(alt)?;
                    if key.is_truthy() {
                        break;
                    }
                }
            }
            let key = match key {
                JValue::String(s) => s.to_string(),
                other => other.to_string(),
            };
            let value = if has(&entry, &JValue::from("value"))?.is_truthy() {
                field("value")?
            } else {
                field("v")?
            };
            out.insert(key, value);
        }
        Ok(JValue::object(out))
    }
}

// ── Arrays ───────────────────────────────────────────────────────────────────

/// Built-in array functions
pub(crate) mod array {
    use super::*;
    use crate::evaluator::{slice_value, subarray_indices};
    use crate::utils::{char_offset, flatten};

    pub(crate) fn sortable(value: &JValue) -> Result<&Vec<JValue>, Exn> {
        match value {
            JValue::Array(arr) => Ok(arr),
            other => Err(Exn::msg(format!("{} cannot be sorted, as it is not an array", describe(other)))),
        }
    }

    pub(crate) fn add(items: impl Iterator<Item = ValueResult>) -> ValueResult {
        let mut acc = JValue::Null;
        for item in items {
            acc = add_values(&acc, &item?)?;
        }
        Ok(acc)
    }

    pub(crate) fn reverse(value: &JValue) -> ValueResult {
        match value {
            JValue::Null => Ok(JValue::empty_array()),
            JValue::Array(arr) => Ok(arr.iter().rev().cloned().collect()),
            JValue::String(s) => Ok(JValue::string(s.chars().rev().collect::<String>())),
            other => Err(Exn::msg(format!("Cannot index {} with number", other.type_name()))),
        }
    }

    pub(crate) fn sort(mut items: Vec<JValue>) -> JValue {
        items.sort_by(|a, b| a.compare(b));
        JValue::array(items)
    }

    pub(crate) fn unique(mut items: Vec<JValue>) -> JValue {
        items.sort_by(|a, b| a.compare(b));
        items.dedup_by(|a, b| a.compare(b).is_eq());
        JValue::array(items)
    }

    fn sort_pairs(pairs: &mut [(JValue, JValue)]) {
        pairs.sort_by(|a, b| a.0.compare(&b.0));
    }

    pub(crate) fn sort_keyed(mut pairs: Vec<(JValue, JValue)>) -> JValue {
        sort_pairs(&mut pairs);
        pairs.into_iter().map(|(_, v)| v).collect()
    }

    fn groups(mut pairs: Vec<(JValue, JValue)>) -> Vec<Vec<JValue>> {
        sort_pairs(&mut pairs);
        let mut groups: Vec<Vec<JValue>> = Vec::new();
        let mut last_key: Option<JValue> = None;
        for (key, value) in pairs {
            let same = matches!(&last_key, Some(k) if k.compare(&key).is_eq());
            match groups.last_mut() {
                Some(group) if same => group.push(value),
                _ => {
                    groups.push(vec![value]);
                    last_key = Some(key);
                }
            }
        }
        groups
    }

    pub(crate) fn group_keyed(pairs: Vec<(JValue, JValue)>) -> JValue {
        groups(pairs).into_iter().map(JValue::array).collect()
    }

    pub(crate) fn unique_keyed(pairs: Vec<(JValue, JValue)>) -> JValue {
        groups(pairs)
            .into_iter()
            .filter_map(|g| g.into_iter().next())
            .collect()
    }

    /// Minimum (first of equals) or maximum (last of equals) by key;
    /// `null` when empty.
    pub(crate) fn extreme(pairs: Vec<(JValue, JValue)>, max: bool) -> JValue {
        let mut best: Option<(JValue, JValue)> = None;
        for (key, value) in pairs {
            let better = match &best {
                None => true,
                Some((k, _)) if max => key.compare(k).is_ge(),
                Some((k, _)) => key.compare(k).is_lt(),
            };
            if better {
                best = Some((key, value));
            }
        }
        best.map_or(JValue::Null, |(_, v)| v)
    }

    /// `indices(i)`: codepoint offsets in strings, element or sub-array
    /// positions in arrays, plain indexing otherwise.
    pub(crate) fn indices(value: &JValue, needle: &JValue) -> ValueResult {
        match (value, needle) {
            (JValue::Null, _) => Ok(JValue::Null),
            (JValue::String(s), JValue::String(n)) => {
                if n.is_empty() {
                    return Ok(JValue::empty_array());
                }
                Ok(s.char_indices()
                    .filter(|(i, _)| s[*i..].starts_with(&**n))
                    .map(|(i, _)| JValue::from(char_offset(s, i)))
                    .collect())
            }
            (JValue::Array(arr), JValue::Array(sub)) => Ok(subarray_indices(arr, sub)),
            (JValue::Array(arr), item) => Ok(subarray_indices(arr, std::slice::from_ref(item))),
            _ => index_value(value, needle),
        }
    }

    pub(crate) fn flatten_values(value: &JValue, depth: f64) -> ValueResult {
        let depth = if depth >= usize::MAX as f64 { usize::MAX } else { depth as usize };
        match value {
            JValue::Array(arr) => Ok(JValue::array(flatten(arr, depth))),
            JValue::Object(map) => {
                let values: Vec<JValue> = map.values().cloned().collect();
                Ok(JValue::array(flatten(&values, depth)))
            }
            other => Err(cannot_iterate(other)),
        }
    }

    /// Rows padded with `null` to the longest row.
    pub(crate) fn transpose(value: &JValue) -> ValueResult {
        let rows = sortable(value)?;
        let mut width = 0;
        for row in rows.iter() {
            width = width.max(super::object::length(row)?.as_f64().unwrap_or(0.0) as usize);
        }
        let mut out = Vec::with_capacity(width);
        for i in 0..width {
            let column = rows
                .iter()
                .map(|row| index_value(row, &JValue::from(i)))
                .collect::<Result<Vec<_>, _>>()?;
            out.push(JValue::array(column));
        }
        Ok(JValue::array(out))
    }

    /// `.[-1:][0]`: the last element, or `null`.
    pub(crate) fn last_of(value: &JValue) -> ValueResult {
        let tail = slice_value(value, &JValue::from(-1i64), &JValue::Null)?;
        index_value(&tail, &JValue::from(0i64))
    }
}

// ── Regular expressions ──────────────────────────────────────────────────────

/// `test`, `match`, `capture`, `scan`, `split/2` and `sub` support
pub(crate) mod matching {
    use super::*;
    use crate::utils::char_offset;
    use regex::{Regex, RegexBuilder};

    /// One match: byte range in the subject plus its match object.
    pub(crate) struct Found {
        pub(crate) start: usize,
        pub(crate) end: usize,
        pub(crate) value: JValue,
    }

    pub(crate) fn not_a_string(value: &JValue) -> Exn {
        Exn::msg(format!("{} cannot be matched, as it is not a string", describe(value)))
    }

    struct Compiled {
        regex: Regex,
        global: bool,
        skip_empty: bool,
    }

    fn compile(re: &JValue, flags: &JValue) -> Result<Compiled, Exn> {
        let JValue::String(pattern) = re else {
            return Err(not_a_string(re));
        };
        let flags = match flags {
            JValue::Null => "",
            JValue::String(f) => &**f,
            other => return Err(Exn::msg(format!("{} is not a string", describe(other)))),
        };
        let mut builder = RegexBuilder::new(pattern);
        let (mut global, mut skip_empty) = (false, false);
        for flag in flags.chars() {
            match flag {
                'g' => global = true,
                'n' => skip_empty = true,
                'i' => {
                    builder.case_insensitive(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                's' | 'p' => {
                    builder.dot_matches_new_line(true);
                }
                'l' => {}
                _ => return Err(Exn::msg(format!("{} is not a valid modifier string", flags))),
            }
        }
        let regex = builder
            .build()
            .map_err(|e| Exn::msg(format!("{} (at offset 0) is not a valid regex: {}", pattern, e)))?;
        Ok(Compiled {
            regex,
            global,
            skip_empty,
        })
    }

    fn subject(input: &JValue) -> Result<&str, Exn> {
        match input {
            JValue::String(s) => Ok(&**s),
            other => Err(not_a_string(other)),
        }
    }

    pub(crate) fn test(input: &JValue, re: &JValue, flags: &JValue) -> ValueResult {
        let text = subject(input)?;
        Ok(JValue::Bool(compile(re, flags)?.regex.is_match(text)))
    }

    fn span(text: &str, start: usize, matched: &str) -> (JValue, JValue) {
        (
            JValue::from(char_offset(text, start)),
            JValue::from(matched.chars().count()),
        )
    }

    /// Matches of `re` in `input`; only the first unless the `g` flag or
    /// `force_global` is set.
    pub(crate) fn find(input: &JValue, re: &JValue, flags: &JValue, force_global: bool) -> Result<Vec<Found>, Exn> {
        let text = subject(input)?;
        let compiled = compile(re, flags)?;
        let global = compiled.global || force_global;
        let names: Vec<JValue> = compiled
            .regex
            .capture_names()
            .skip(1)
            .map(|n| n.map_or(JValue::Null, JValue::from))
            .collect();

        let mut found = Vec::new();
        for caps in compiled.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if compiled.skip_empty && whole.as_str().is_empty() {
                continue;
            }
            let captures: Vec<JValue> = names
                .iter()
                .enumerate()
                .map(|(i, name)| match caps.get(i + 1) {
                    Some(m) => {
                        let (offset, length) = span(text, m.start(), m.as_str());
                        record([
                            ("offset", offset),
                            ("length", length),
                            ("string", JValue::from(m.as_str())),
                            ("name", name.clone()),
                        ])
                    }
                    None => record([
                        ("offset", JValue::from(-1i64)),
                        ("length", JValue::from(0i64)),
                        ("string", JValue::Null),
                        ("name", name.clone()),
                    ]),
                })
                .collect();
            let (offset, length) = span(text, whole.start(), whole.as_str());
            found.push(Found {
                start: whole.start(),
                end: whole.end(),
                value: record([
                    ("offset", offset),
                    ("length", length),
                    ("string", JValue::from(whole.as_str())),
                    ("captures", JValue::array(captures)),
                ]),
            });
            if !global {
                break;
            }
        }
        Ok(found)
    }

    fn captures_of(m: &JValue) -> Vec<JValue> {
        match m.get("captures") {
            Some(JValue::Array(caps)) => caps.to_vec(),
            _ => Vec::new(),
        }
    }

    /// Named captures of a match object as `{name: string}`.
    pub(crate) fn capture_object(m: &JValue) -> JValue {
        let mut out = IndexMap::new();
        for cap in captures_of(m) {
            if let Some(JValue::String(name)) = cap.get("name") {
                out.insert(name.to_string(), cap.get("string").cloned().unwrap_or(JValue::Null));
            }
        }
        JValue::object(out)
    }

    /// `scan` output: the capture strings if there are groups, else the match.
    pub(crate) fn scan_item(m: &JValue) -> JValue {
        let caps = captures_of(m);
        if caps.is_empty() {
            return m.get("string").cloned().unwrap_or(JValue::Null);
        }
        caps.iter()
            .map(|c| c.get("string").cloned().unwrap_or(JValue::Null))
            .collect()
    }

    /// `split(re; flags)`: the pieces between every match.
    pub(crate) fn split(input: &JValue, re: &JValue, flags: &JValue) -> ValueResult {
        let text = subject(input)?;
        let mut pieces = Vec::new();
        let mut prev = 0;
        for m in find(input, re, flags, true)? {
            pieces.push(JValue::from(&text[prev..m.start]));
            prev = m.end;
        }
        pieces.push(JValue::from(&text[prev..]));
        Ok(JValue::array(pieces))
    }
}
