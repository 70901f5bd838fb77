//! Runtime machinery shared by the evaluator, path tracking and builtins.
//!
//! A `Program` is produced by `crate::compiler::compile`. Running it creates a
//! `Vm`, a copyable handle on the program, and returns an `Outputs` iterator
//! that pulls results lazily from the generator tree built by
//! `Vm::eval`.
//!
//! Variable, function, closure and label bindings live in `Env`, a persistent
//! cons list. Extending an environment never copies it, and a closure keeps
//! exactly the bindings that were visible where it was created. Lookups walk
//! the list, so their cost is the lexical slot number resolved at compile
//! time.

use std::iter;
use std::rc::Rc;

use crate::compiler::{CompiledExpr, CompiledFunc};
use crate::evaluator::RuntimeError;
use crate::utils::with_stack;
use crate::value::JValue;

/// User-function calls nested deeper than this raise an error.
pub(crate) const MAX_CALL_DEPTH: u32 = 100_000;

// ---------------------------------------------------------------------------
// Results and control transfer
// ---------------------------------------------------------------------------

/// Identity of one activation of `label $name`.
pub(crate) type LabelId = Rc<()>;

/// Non-value outcome of a generator step.
#[derive(Debug, Clone)]
pub(crate) enum Exn {
    /// A raised error carrying its error value.
    Error(JValue),
    /// `break $name` unwinding to the label activation it names.
    Break(LabelId),
}

impl Exn {
    pub(crate) fn msg(message: impl Into<String>) -> Self {
        Exn::Error(JValue::string(message.into()))
    }
}

pub(crate) type ValueResult = Result<JValue, Exn>;
pub(crate) type Results<'a> = Box<dyn Iterator<Item = ValueResult> + 'a>;

pub(crate) fn once<'a>(r: ValueResult) -> Results<'a> {
    Box::new(iter::once(r))
}

pub(crate) fn empty<'a>() -> Results<'a> {
    Box::new(iter::empty())
}

/// Continue with `f` on success, or yield the single error.
pub(crate) fn then<'a, T, U: 'a>(
    x: Result<T, Exn>,
    f: impl FnOnce(T) -> Box<dyn Iterator<Item = Result<U, Exn>> + 'a>,
) -> Box<dyn Iterator<Item = Result<U, Exn>> + 'a> {
    match x {
        Ok(x) => f(x),
        Err(e) => Box::new(iter::once(Err(e))),
    }
}

// ---------------------------------------------------------------------------
// Depth-first unfolding
// ---------------------------------------------------------------------------

/// One item of an unfolding frame.
pub(crate) enum Step<T> {
    /// Produce the item.
    Emit(T),
    /// Push the frame generated from the item.
    Descend(T),
}

pub(crate) type Frame<'a, T> = Box<dyn Iterator<Item = Result<Step<T>, Exn>> + 'a>;

/// Pre-order traversal driven by an explicit stack of frames, so deep
/// recursion (`recurse`, `while`, `until`, `..`) never grows the native stack.
pub(crate) struct Unfold<'a, T, F> {
    stack: Vec<Frame<'a, T>>,
    descend: F,
}

impl<'a, T, F> Unfold<'a, T, F>
where
    F: FnMut(T) -> Frame<'a, T>,
{
    pub(crate) fn new(root: Frame<'a, T>, descend: F) -> Self {
        Unfold {
            stack: vec![root],
            descend,
        }
    }
}

impl<'a, T, F> Iterator for Unfold<'a, T, F>
where
    F: FnMut(T) -> Frame<'a, T>,
{
    type Item = Result<T, Exn>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let top = self.stack.last_mut()?;
            match top.next() {
                Some(Ok(Step::Emit(item))) => return Some(Ok(item)),
                Some(Ok(Step::Descend(item))) => {
                    let frame = (self.descend)(item);
                    self.stack.push(frame);
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// `[Emit(x), Descend(x)]`: emit an item, then visit what it expands to.
pub(crate) fn emit_then_descend<'a, T: Clone + 'a>(x: T) -> Frame<'a, T> {
    Box::new([Ok(Step::Emit(x.clone())), Ok(Step::Descend(x))].into_iter())
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// One binding in the environment.
pub(crate) enum Bind<'a> {
    Var(JValue),
    /// A user function together with the environment it was defined in.
    Def {
        func: &'a CompiledFunc,
        env: Env<'a>,
    },
    /// A filter argument together with the caller's environment.
    Closure {
        expr: &'a CompiledExpr,
        env: Env<'a>,
    },
    Label(LabelId),
}

struct Node<'a> {
    bind: Bind<'a>,
    parent: Env<'a>,
}

/// Persistent cons list of bindings; slot 0 is the innermost binding.
#[derive(Clone, Default)]
pub(crate) struct Env<'a>(Option<Rc<Node<'a>>>);

impl<'a> Env<'a> {
    pub(crate) fn new() -> Self {
        Env(None)
    }

    pub(crate) fn push(&self, bind: Bind<'a>) -> Self {
        Env(Some(Rc::new(Node {
            bind,
            parent: self.clone(),
        })))
    }

    pub(crate) fn push_var(&self, value: JValue) -> Self {
        self.push(Bind::Var(value))
    }

    /// Binding at `slot`. Slots are resolved by the compiler, so a missing
    /// binding is an internal invariant violation.
    pub(crate) fn get(&self, slot: usize) -> &Bind<'a> {
        let mut node = self.0.as_deref();
        for _ in 0..slot {
            node = node.and_then(|n| n.parent.0.as_deref());
        }
        match node {
            Some(n) => &n.bind,
            None => panic!("BUG: environment slot {} out of range", slot),
        }
    }

    pub(crate) fn var(&self, slot: usize) -> JValue {
        match self.get(slot) {
            Bind::Var(v) => v.clone(),
            _ => panic!("BUG: slot {} is not a variable", slot),
        }
    }

    pub(crate) fn label(&self, slot: usize) -> LabelId {
        match self.get(slot) {
            Bind::Label(id) => id.clone(),
            _ => panic!("BUG: slot {} is not a label", slot),
        }
    }
}

impl Drop for Env<'_> {
    /// Unlink uniquely owned nodes iteratively; long chains from deep
    /// recursion would otherwise overflow the stack on drop.
    fn drop(&mut self) {
        let mut cur = self.0.take();
        while let Some(rc) = cur {
            match Rc::try_unwrap(rc) {
                Ok(mut node) => cur = node.parent.0.take(),
                Err(_) => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Program and VM handle
// ---------------------------------------------------------------------------

/// A compiled filter: the resolved expression tree plus its constant pool.
///
/// Immutable after compilation, so one program can be shared across threads
/// and run concurrently.
#[derive(Debug, Clone)]
pub struct Program {
    root: CompiledExpr,
    const_pool: Vec<JValue>,
}

impl Program {
    pub(crate) fn new(root: CompiledExpr, const_pool: Vec<JValue>) -> Self {
        Program { root, const_pool }
    }

    pub(crate) fn root(&self) -> &CompiledExpr {
        &self.root
    }

    pub fn const_pool(&self) -> &[JValue] {
        &self.const_pool
    }

    /// Run the program on `input`, producing outputs lazily.
    pub fn run(&self, input: JValue) -> Outputs<'_> {
        let vm = Vm { program: self, depth: 0 };
        Outputs {
            inner: vm.eval(self.root(), Env::new(), input),
            finished: false,
        }
    }
}

/// Copyable handle threaded through evaluation.
#[derive(Clone, Copy)]
pub(crate) struct Vm<'a> {
    program: &'a Program,
    /// User-function calls between the root and this point.
    depth: u32,
}

impl<'a> Vm<'a> {
    /// Handle for the body of a call to `func`.
    pub(crate) fn enter(self, func: &CompiledFunc) -> Result<Vm<'a>, Exn> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Exn::msg(format!(
                "{}/{} exceeded the maximum call depth of {}",
                func.name, func.arity, MAX_CALL_DEPTH
            )));
        }
        Ok(Vm {
            depth: self.depth + 1,
            ..self
        })
    }

    #[inline]
    pub(crate) fn constant(&self, idx: u32) -> JValue {
        match self.program.const_pool.get(idx as usize) {
            Some(v) => v.clone(),
            None => panic!("BUG: constant {} out of range", idx),
        }
    }
}

/// Generator whose steps and drop run under `with_stack`, so chains of
/// nested user-function calls grow the stack instead of overflowing it.
pub(crate) struct Deep<I>(Option<I>);

impl<I> Deep<I> {
    pub(crate) fn new(inner: I) -> Self {
        Deep(Some(inner))
    }
}

impl<I: Iterator> Iterator for Deep<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let inner = self.0.as_mut()?;
        with_stack(|| inner.next())
    }
}

impl<I> Drop for Deep<I> {
    fn drop(&mut self) {
        let inner = self.0.take();
        with_stack(move || drop(inner));
    }
}

/// Lazily produced filter outputs. The sequence ends after the first error.
pub struct Outputs<'a> {
    inner: Results<'a>,
    finished: bool,
}

impl Iterator for Outputs<'_> {
    type Item = Result<JValue, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.inner.next() {
            Some(Ok(v)) => Some(Ok(v)),
            Some(Err(exn)) => {
                self.finished = true;
                Some(Err(RuntimeError::from(exn)))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}
