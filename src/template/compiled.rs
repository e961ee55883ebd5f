//! Compiled template and its asynchronous renderer

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use thiserror::Error;

use super::helpers::{HelperError, HelperRegistry};
use super::parser::{parse, BlockKind, CompileError, Expression, Node, Param, PathExpr};

/// Options applied when compiling a template
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// HTML-escape `{{ }}` interpolations
    pub escape_html: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { escape_html: true }
    }
}

/// Failure while rendering a compiled template
#[derive(Debug, Error)]
pub enum RenderFailure {
    #[error("missing helper: {0}")]
    MissingHelper(String),

    #[error("helper '{name}' failed: {source}")]
    Helper {
        name: String,
        #[source]
        source: HelperError,
    },
}

/// A reusable, compiled template.
///
/// Rendering is a pure function of the context: the same context always
/// produces the same output, apart from whatever the registered helpers do.
/// Cloning is cheap; the node tree and helper registry are shared.
#[derive(Debug, Clone)]
pub struct CompiledTemplate {
    nodes: Arc<Vec<Node>>,
    helpers: Arc<HelperRegistry>,
    escape_html: bool,
}

#[derive(Debug, Clone, Default)]
struct LoopData {
    index: Option<usize>,
    key: Option<String>,
    first: bool,
    last: bool,
}

#[derive(Debug, Clone)]
struct Scope {
    this: Value,
    root: Arc<Value>,
    data: LoopData,
}

impl Scope {
    fn child(&self, this: Value, data: LoopData) -> Self {
        Self {
            this,
            root: self.root.clone(),
            data,
        }
    }
}

impl CompiledTemplate {
    /// Compile template source against a helper registry
    pub fn compile(
        source: &str,
        helpers: Arc<HelperRegistry>,
        options: CompileOptions,
    ) -> Result<Self, CompileError> {
        let nodes = parse(source)?;
        Ok(Self {
            nodes: Arc::new(nodes),
            helpers,
            escape_html: options.escape_html,
        })
    }

    /// Render the template against a substitution context
    pub async fn render(&self, context: &Value) -> Result<String, RenderFailure> {
        let scope = Scope {
            this: context.clone(),
            root: Arc::new(context.clone()),
            data: LoopData::default(),
        };
        self.render_nodes(&self.nodes, scope).await
    }

    fn render_nodes<'a>(
        &'a self,
        nodes: &'a [Node],
        scope: Scope,
    ) -> BoxFuture<'a, Result<String, RenderFailure>> {
        async move {
            let mut out = String::new();

            for node in nodes {
                match node {
                    Node::Text(text) => out.push_str(text),
                    Node::Interpolate { expr, escape } => {
                        let value = self.evaluate(expr, &scope).await?;
                        let text = stringify(&value);
                        if *escape && self.escape_html {
                            out.push_str(&escape_html(&text));
                        } else {
                            out.push_str(&text);
                        }
                    }
                    Node::Block {
                        kind,
                        param,
                        body,
                        inverse,
                    } => {
                        let value = resolve_param(param, &scope);
                        let rendered = self
                            .render_block(*kind, value, body, inverse, &scope)
                            .await?;
                        out.push_str(&rendered);
                    }
                }
            }

            Ok(out)
        }
        .boxed()
    }

    async fn render_block(
        &self,
        kind: BlockKind,
        value: Value,
        body: &[Node],
        inverse: &[Node],
        scope: &Scope,
    ) -> Result<String, RenderFailure> {
        match kind {
            BlockKind::If if is_truthy(&value) => self.render_nodes(body, scope.clone()).await,
            BlockKind::If => self.render_nodes(inverse, scope.clone()).await,
            BlockKind::Unless if is_truthy(&value) => {
                self.render_nodes(inverse, scope.clone()).await
            }
            BlockKind::Unless => self.render_nodes(body, scope.clone()).await,
            BlockKind::With if is_truthy(&value) => {
                let child = scope.child(value, scope.data.clone());
                self.render_nodes(body, child).await
            }
            BlockKind::With => self.render_nodes(inverse, scope.clone()).await,
            BlockKind::Each => match value {
                Value::Array(items) if !items.is_empty() => {
                    let last = items.len() - 1;
                    let mut out = String::new();
                    for (index, item) in items.into_iter().enumerate() {
                        let data = LoopData {
                            index: Some(index),
                            key: None,
                            first: index == 0,
                            last: index == last,
                        };
                        out.push_str(&self.render_nodes(body, scope.child(item, data)).await?);
                    }
                    Ok(out)
                }
                Value::Object(map) if !map.is_empty() => {
                    let last = map.len() - 1;
                    let mut out = String::new();
                    for (index, (key, item)) in map.into_iter().enumerate() {
                        let data = LoopData {
                            index: Some(index),
                            key: Some(key),
                            first: index == 0,
                            last: index == last,
                        };
                        out.push_str(&self.render_nodes(body, scope.child(item, data)).await?);
                    }
                    Ok(out)
                }
                _ => self.render_nodes(inverse, scope.clone()).await,
            },
        }
    }

    async fn evaluate(&self, expr: &Expression, scope: &Scope) -> Result<Value, RenderFailure> {
        let has_arguments = !expr.params.is_empty() || !expr.hash.is_empty();

        let Some(helper) = self.helpers.get(&expr.head) else {
            if has_arguments {
                return Err(RenderFailure::MissingHelper(expr.head.clone()));
            }
            return Ok(resolve_path(&expr.path, scope));
        };

        let args: Vec<Value> = expr
            .params
            .iter()
            .map(|p| resolve_param(p, scope))
            .collect();
        let hash: Map<String, Value> = expr
            .hash
            .iter()
            .map(|(k, p)| (k.clone(), resolve_param(p, scope)))
            .collect();

        helper
            .call(&args, &hash)
            .await
            .map_err(|source| RenderFailure::Helper {
                name: expr.head.clone(),
                source,
            })
    }
}

fn resolve_param(param: &Param, scope: &Scope) -> Value {
    match param {
        Param::Literal(value) => value.clone(),
        Param::Path(path) => resolve_path(path, scope),
    }
}

fn resolve_path(path: &PathExpr, scope: &Scope) -> Value {
    match path {
        PathExpr::Context(segments) => lookup(&scope.this, segments),
        PathExpr::Root(segments) => lookup(&scope.root, segments),
        PathExpr::Data(name) => match name.as_str() {
            "index" => scope.data.index.map(Value::from).unwrap_or(Value::Null),
            "key" => scope
                .data
                .key
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            "first" if scope.data.index.is_some() => Value::Bool(scope.data.first),
            "last" if scope.data.index.is_some() => Value::Bool(scope.data.last),
            _ => Value::Null,
        },
    }
}

fn lookup(value: &Value, segments: &[String]) -> Value {
    let mut current = value;
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) if segment == "length" => return Value::from(items.len()),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::String(s) if segment == "length" => return Value::from(s.chars().count()),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// String form of a value as it appears in rendered output
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}
