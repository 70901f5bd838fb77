// jqlite - A jq-style JSON filter engine
// Copyright (c) 2025 jqlite contributors
// Licensed under the MIT License

//! # jqlite
//!
//! An embeddable engine for the jq filter language: text in, JSON text out.
//!
//! A filter is lexed, parsed and compiled once into a [`CompiledFilter`],
//! then run any number of times. Evaluation is lazy: every expression is a
//! generator, and outputs are computed only as far as the caller pulls them.
//!
//! ## Architecture
//!
//! - `lexer` - Tokenizer (filter text to tokens)
//! - `parser` - Pratt parser (tokens to AST)
//! - `ast` - Abstract Syntax Tree definitions
//! - `compiler` - Scope resolution and desugaring into the program IR
//! - `vm` - Program, lexical environment and the lazy output iterator
//! - `evaluator` - Generator semantics of every expression node
//! - `paths` - Path tracking for `path(f)`, assignment and `del`
//! - `functions` - The builtin table
//! - `format` - `@csv`, `@base64` and the other output formats
//! - `datetime` - Date and time builtins
//! - `value` - The JSON value model, ordering and serialization
//!
//! ## Example
//!
//! ```
//! use jqlite::{evaluate, FilterOptions, Output};
//!
//! let options = FilterOptions::default().with_all_outputs(true);
//! let out = evaluate(r#"{"a":[1,2,3]}"#, ".a[] | . * 2", &options).unwrap();
//! assert_eq!(out, Output::All(vec!["2".into(), "4".into(), "6".into()]));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

pub mod ast;
pub mod compiler;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod value;
pub mod vm;
mod datetime;
mod format;
mod functions;
mod paths;
mod utils;

pub use compiler::CompileError;
pub use evaluator::RuntimeError;
pub use value::{JValue, RenderStyle};
pub use vm::{Outputs, Program};

/// Options controlling how results are rendered and how many are returned.
///
/// Deserializable with every field optional, so a host can pass options as
/// JSON: `{"compact_output": false, "all_outputs": true}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Emit string results without quotes.
    pub raw_output: bool,
    /// Single-line output; `false` pretty-prints with a two-space indent.
    pub compact_output: bool,
    /// Emit object keys in sorted order.
    pub sort_keys: bool,
    /// Return every output instead of only the first.
    #[serde(alias = "multiple_outputs")]
    pub all_outputs: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        FilterOptions {
            raw_output: false,
            compact_output: true,
            sort_keys: false,
            all_outputs: false,
        }
    }
}

impl FilterOptions {
    pub fn with_raw_output(mut self, raw_output: bool) -> Self {
        self.raw_output = raw_output;
        self
    }

    pub fn with_compact_output(mut self, compact_output: bool) -> Self {
        self.compact_output = compact_output;
        self
    }

    pub fn with_sort_keys(mut self, sort_keys: bool) -> Self {
        self.sort_keys = sort_keys;
        self
    }

    pub fn with_all_outputs(mut self, all_outputs: bool) -> Self {
        self.all_outputs = all_outputs;
        self
    }

    fn style(&self) -> RenderStyle {
        RenderStyle {
            pretty: !self.compact_output,
            sort_keys: self.sort_keys,
            raw: self.raw_output,
        }
    }
}

/// Rendered results of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// The first output, or `null` if there was none.
    First(String),
    /// Every output, in order.
    All(Vec<String>),
}

/// Errors surfaced by [`evaluate`] and [`CompiledFilter::apply`].
#[derive(Error, Debug)]
pub enum Error {
    /// The input text is not valid JSON.
    #[error("invalid JSON input: {0}")]
    Parse(#[source] serde_json::Error),

    /// The filter failed to lex, parse or compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Evaluation raised an uncaught error. `partial` holds the rendered
    /// outputs produced before it.
    #[error("{error}")]
    Runtime {
        error: RuntimeError,
        partial: Vec<String>,
    },

    /// A non-recoverable engine failure, never caused by the filter itself.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A compiled filter, reusable across inputs and threads.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    program: Program,
    source: String,
}

impl CompiledFilter {
    /// Lex, parse and compile `source`.
    pub fn compile(source: &str) -> Result<CompiledFilter, CompileError> {
        let program = compiler::compile_str(source)?;
        debug!(
            filter_len = source.len(),
            constants = program.const_pool().len(),
            "compiled filter"
        );
        Ok(CompiledFilter {
            program,
            source: source.to_string(),
        })
    }

    /// The filter text this was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Run on an already parsed value. Outputs are produced lazily.
    pub fn run(&self, input: JValue) -> Outputs<'_> {
        self.program.run(input)
    }

    /// Parse `json`, run the filter on it and render the results.
    pub fn apply(&self, json: &str, options: &FilterOptions) -> Result<Output, Error> {
        let input = JValue::from_json_str(json).map_err(Error::Parse)?;
        debug!(all_outputs = options.all_outputs, "running filter");
        let style = options.style();
        let render = |value: &JValue| -> Result<String, Error> {
            let text = value.render(style).map_err(|e| Error::Internal(e.to_string()))?;
            trace!(output = %text, "filter output");
            Ok(text)
        };

        let mut outputs = self.run(input);
        if !options.all_outputs {
            return match outputs.next() {
                Some(Ok(value)) => Ok(Output::First(render(&value)?)),
                Some(Err(error)) => Err(Error::Runtime {
                    error,
                    partial: Vec::new(),
                }),
                None => Ok(Output::First("null".to_string())),
            };
        }

        let mut rendered = Vec::new();
        for output in outputs {
            match output {
                Ok(value) => rendered.push(render(&value)?),
                Err(error) => {
                    return Err(Error::Runtime {
                        error,
                        partial: rendered,
                    })
                }
            }
        }
        Ok(Output::All(rendered))
    }
}

/// Compile `filter`, run it on the JSON text `json` and render the results.
///
/// The filter is compiled before the input is parsed, so a bad filter is
/// reported even when the input is also invalid.
pub fn evaluate(json: &str, filter: &str, options: &FilterOptions) -> Result<Output, Error> {
    CompiledFilter::compile(filter)?.apply(json, options)
}

/// Check that `filter` lexes, parses and compiles. No input is needed.
pub fn validate(filter: &str) -> Result<bool, CompileError> {
    CompiledFilter::compile(filter).map(|_| true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_compiled_filter_is_shareable() {
        assert_send_sync::<CompiledFilter>();
    }

    #[test]
    fn test_options_default() {
        let options = FilterOptions::default();
        assert!(options.compact_output);
        assert!(!options.all_outputs && !options.raw_output && !options.sort_keys);
    }

    #[test]
    fn test_options_from_json() {
        let options: FilterOptions = serde_json::from_str(r#"{"multiple_outputs": true, "raw_output": true}"#).unwrap();
        assert!(options.all_outputs && options.raw_output && options.compact_output);
    }

    #[test]
    fn test_first_only_without_outputs() {
        let out = evaluate("1", "empty", &FilterOptions::default()).unwrap();
        assert_eq!(out, Output::First("null".into()));
    }

    #[test]
    fn test_runtime_error_keeps_partial_outputs() {
        let options = FilterOptions::default().with_all_outputs(true);
        match evaluate("[1, \"a\", 2]", ".[] | . + 1", &options) {
            Err(Error::Runtime { error, partial }) => {
                assert_eq!(partial, vec!["2".to_string()]);
                assert_eq!(error.to_string(), "string (\"a\") and number (1) cannot be added");
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_checked_before_input() {
        assert!(matches!(
            evaluate("not json", ".[", &FilterOptions::default()),
            Err(Error::Compile(_))
        ));
        assert!(matches!(
            evaluate("not json", ".", &FilterOptions::default()),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(validate(".a | map(. + 1)").unwrap());
        assert!(validate("nosuchfn(1)").is_err());
    }
}
