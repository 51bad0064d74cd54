// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Small text-template language used for selectors, conditions and values.
//!
//! A template is literal text interleaved with `{{ ... }}` actions. Actions
//! hold a *pipeline*: commands separated by `|`, where the value produced by
//! one command is passed as the final argument of the next. Supported forms:
//!
//! - literals: `"str"`, `` `raw` ``, `42`, `1.5`, `true`, `false`, `nil`
//! - data access: `.`, `.Self`, `.Self.Name`, `$var`, `$var.Field`, `(pipeline).Field`
//! - calls: `fn arg1 arg2`, piped `x | fn arg1`
//! - variables: `{{ $x := pipeline }}`, `{{ $x = pipeline }}`
//! - control: `{{ if p }}..{{ else if q }}..{{ else }}..{{ end }}`,
//!   `{{ range p }}..{{ else }}..{{ end }}` (with optional `$i, $e :=`)
//! - trim markers `{{- ` and ` -}}`, comments `{{/* ... */}}`
//!
//! Functions are supplied by the caller through [`Functions`]; a fixed set of
//! comparison and logic builtins is always available.

mod exec;
pub mod funcs;
mod parse;

pub use exec::Functions;

use thiserror::Error;

use crate::value::Value;

/// Errors produced while parsing, executing or decoding a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template text is malformed.
    #[error("template parse error in {template:?}: {message}")]
    Parse {
        /// Template source.
        template: String,
        /// Description of the problem.
        message: String,
    },
    /// Evaluation failed.
    #[error("template exec error: {0}")]
    Exec(String),
    /// A function was called that no provider knows.
    #[error("function \"{0}\" not defined")]
    UnknownFunction(String),
    /// A function rejected its arguments or failed.
    #[error("error calling {name}: {message}")]
    Function {
        /// Function name.
        name: String,
        /// Failure description.
        message: String,
    },
    /// Rendered output could not be decoded into the requested type.
    #[error("cannot decode template result '{output}' into {target}: {message}")]
    Decode {
        /// Trimmed rendered text.
        output: String,
        /// Requested type.
        target: &'static str,
        /// Underlying decoder message.
        message: String,
    },
    /// A selector template rendered the zero resource id.
    #[error("selector '{0}' is zero")]
    ZeroSelector(String),
}

impl TemplateError {
    /// Shorthand for a [`TemplateError::Function`] error.
    pub fn func(name: &str, message: impl Into<String>) -> Self {
        Self::Function {
            name: name.to_owned(),
            message: message.into(),
        }
    }
}

/// A parsed template, ready to execute any number of times.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parses `source`.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let nodes = parse::parse(source).map_err(|message| TemplateError::Parse {
            template: source.to_owned(),
            message,
        })?;
        Ok(Self {
            source: source.to_owned(),
            nodes,
        })
    }

    /// Original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// `true` when the template contains at least one action.
    pub fn has_actions(&self) -> bool {
        self.nodes.iter().any(|n| !matches!(n, Node::Text(_)))
    }

    /// Renders the template against `data`.
    pub fn execute(&self, funcs: &dyn Functions, data: &Value) -> Result<String, TemplateError> {
        exec::execute(&self.nodes, funcs, data)
    }
}

/// Parses and renders in one call.
pub fn render(source: &str, funcs: &dyn Functions, data: &Value) -> Result<String, TemplateError> {
    Template::parse(source)?.execute(funcs, data)
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        over: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Pipeline {
    pub(crate) vars: Vec<String>,
    pub(crate) declare: bool,
    pub(crate) commands: Vec<Command>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Command {
    pub(crate) operands: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    Literal(Value),
    Dot(Vec<String>),
    Var(String, Vec<String>),
    Func(String),
    Sub(Box<Pipeline>, Vec<String>),
}
