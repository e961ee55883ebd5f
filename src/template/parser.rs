//! Template parser
//!
//! Turns Handlebars-style markup into a node tree that `CompiledTemplate`
//! walks at render time. Supported syntax:
//! - `{{path}}` (escaped) and `{{{path}}}` / `{{& path}}` (raw)
//! - `{{helper arg "literal" key=value}}`
//! - `{{#if}}`, `{{#unless}}`, `{{#each}}`, `{{#with}}` with optional `{{else}}`,
//!   chained as `{{else if other}}` under a single closing tag
//! - `{{! comment }}` and `{{!-- comment --}}`
//! - `~` whitespace control on either side of a tag, including `{{~{raw}~}}`
//! - segment literals such as `{{Attributes.[Favorite Color]}}`
//!
//! Partials (`{{> name}}`) and other unsupported sigils are compile errors.

use serde_json::Value;
use thiserror::Error;

/// Syntax error found while compiling a template
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} at offset {offset}")]
pub struct CompileError {
    pub message: String,
    pub offset: usize,
}

impl CompileError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A value lookup inside the render context
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PathExpr {
    /// Relative to the current context; empty for `this` / `.`
    Context(Vec<String>),
    /// `@root.a.b`
    Root(Vec<String>),
    /// Loop data such as `@index` or `@key`
    Data(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Param {
    Path(PathExpr),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expression {
    /// Raw head token, used for helper lookup
    pub head: String,
    /// Head token interpreted as a path
    pub path: PathExpr,
    pub params: Vec<Param>,
    pub hash: Vec<(String, Param)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    If,
    Unless,
    Each,
    With,
}

impl BlockKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "if" => Some(Self::If),
            "unless" => Some(Self::Unless),
            "each" => Some(Self::Each),
            "with" => Some(Self::With),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Interpolate {
        expr: Expression,
        escape: bool,
    },
    Block {
        kind: BlockKind,
        param: Param,
        body: Vec<Node>,
        inverse: Vec<Node>,
    },
}

enum TagKind<'a> {
    Comment,
    Raw(&'a str),
    Mustache(&'a str),
}

struct Tag<'a> {
    kind: TagKind<'a>,
    strip_before: bool,
    strip_after: bool,
    len: usize,
}

struct OpenBlock {
    kind: BlockKind,
    /// Name expected on the closing tag
    name: String,
    /// Opened by `{{else <helper>}}`; closes together with its parent
    chained: bool,
    param: Param,
    body: Vec<Node>,
    inverse: Vec<Node>,
    in_else: bool,
    offset: usize,
}

impl OpenBlock {
    fn active(&mut self) -> &mut Vec<Node> {
        if self.in_else {
            &mut self.inverse
        } else {
            &mut self.body
        }
    }
}

fn target<'a>(root: &'a mut Vec<Node>, stack: &'a mut [OpenBlock]) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(block) => block.active(),
        None => root,
    }
}

/// Parse template source into a node tree
pub(crate) fn parse(source: &str) -> Result<Vec<Node>, CompileError> {
    let mut root = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();
    let mut rest = source;
    let mut strip_leading = false;

    while !rest.is_empty() {
        let Some(open) = rest.find("{{") else {
            push_text(target(&mut root, &mut stack), rest, strip_leading, false);
            break;
        };

        let offset = source.len() - rest.len() + open;
        let (text, tag_src) = rest.split_at(open);
        let tag = scan_tag(tag_src, offset)?;

        push_text(
            target(&mut root, &mut stack),
            text,
            strip_leading,
            tag.strip_before,
        );
        strip_leading = tag.strip_after;
        rest = &tag_src[tag.len..];

        let inner = match tag.kind {
            TagKind::Comment => continue,
            TagKind::Raw(inner) => {
                let expr = parse_expression(inner, offset)?;
                target(&mut root, &mut stack).push(Node::Interpolate {
                    expr,
                    escape: false,
                });
                continue;
            }
            TagKind::Mustache(inner) => inner.trim(),
        };

        if inner.is_empty() {
            return Err(CompileError::new("empty expression", offset));
        }

        if let Some(open_src) = inner.strip_prefix('#') {
            let (kind, name, param) = parse_block_open(open_src, offset)?;
            stack.push(OpenBlock {
                kind,
                name,
                chained: false,
                param,
                body: Vec::new(),
                inverse: Vec::new(),
                in_else: false,
                offset,
            });
        } else if let Some(close_src) = inner.strip_prefix('/') {
            let name = close_src.trim();
            loop {
                let block = stack.pop().ok_or_else(|| {
                    CompileError::new(format!("unexpected closing tag '{}'", name), offset)
                })?;
                if block.name != name {
                    return Err(CompileError::new(
                        format!("'{}' closed by '{}'", block.name, name),
                        offset,
                    ));
                }
                let chained = block.chained;
                target(&mut root, &mut stack).push(Node::Block {
                    kind: block.kind,
                    param: block.param,
                    body: block.body,
                    inverse: block.inverse,
                });
                if !chained {
                    break;
                }
            }
        } else if inner == "else" || inner == "^" || is_else_chain(inner) {
            let block = stack
                .last_mut()
                .ok_or_else(|| CompileError::new("'else' outside of a block", offset))?;
            if block.in_else {
                return Err(CompileError::new(
                    format!("duplicate 'else' in '{}'", block.name),
                    offset,
                ));
            }
            block.in_else = true;

            if let Some(chain_src) = inner.strip_prefix("else").filter(|_| is_else_chain(inner)) {
                let closing = block.name.clone();
                let (kind, _, param) = parse_block_open(chain_src, offset)?;
                stack.push(OpenBlock {
                    kind,
                    name: closing,
                    chained: true,
                    param,
                    body: Vec::new(),
                    inverse: Vec::new(),
                    in_else: false,
                    offset,
                });
            }
        } else if let Some(raw_src) = inner.strip_prefix('&') {
            let expr = parse_expression(raw_src, offset)?;
            target(&mut root, &mut stack).push(Node::Interpolate {
                expr,
                escape: false,
            });
        } else {
            let expr = parse_expression(inner, offset)?;
            target(&mut root, &mut stack).push(Node::Interpolate { expr, escape: true });
        }
    }

    if let Some(block) = stack.pop() {
        return Err(CompileError::new(
            format!("unclosed block '{}'", block.name),
            block.offset,
        ));
    }

    Ok(root)
}

/// `{{else if x}}` and friends
fn is_else_chain(inner: &str) -> bool {
    inner
        .strip_prefix("else")
        .map_or(false, |rest| rest.starts_with(char::is_whitespace))
}

fn parse_block_open(src: &str, offset: usize) -> Result<(BlockKind, String, Param), CompileError> {
    let mut expr = parse_expression(src, offset)?;
    let kind = BlockKind::from_name(&expr.head).ok_or_else(|| {
        CompileError::new(
            format!("unsupported block helper '{}'", expr.head),
            offset,
        )
    })?;
    if expr.params.len() != 1 || !expr.hash.is_empty() {
        return Err(CompileError::new(
            format!("#{} requires exactly one argument", expr.head),
            offset,
        ));
    }
    let param = expr.params.remove(0);
    Ok((kind, expr.head, param))
}

fn push_text(nodes: &mut Vec<Node>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start();
    }
    if trim_end {
        text = text.trim_end();
    }
    if !text.is_empty() {
        nodes.push(Node::Text(text.to_string()));
    }
}

fn scan_tag(src: &str, offset: usize) -> Result<Tag<'_>, CompileError> {
    if src.starts_with("{{!--") {
        let end = src[5..]
            .find("--}}")
            .ok_or_else(|| CompileError::new("unterminated comment", offset))?;
        return Ok(Tag {
            kind: TagKind::Comment,
            strip_before: false,
            strip_after: false,
            len: 5 + end + 4,
        });
    }

    let mut start = 2;
    let strip_before = src[start..].starts_with('~');
    if strip_before {
        start += 1;
    }

    // Triple-stash, optionally wrapped as `{{~{ ... }~}}`
    if src[start..].starts_with('{') {
        start += 1;
        let (end, close_len, strip_after) = find_raw_close(&src[start..])
            .ok_or_else(|| CompileError::new("unterminated mustache", offset))?;
        return Ok(Tag {
            kind: TagKind::Raw(&src[start..start + end]),
            strip_before,
            strip_after,
            len: start + end + close_len,
        });
    }

    let end = src[start..]
        .find("}}")
        .ok_or_else(|| CompileError::new("unterminated mustache", offset))?;
    let mut inner = &src[start..start + end];

    let strip_after = inner.ends_with('~');
    if strip_after {
        inner = &inner[..inner.len() - 1];
    }

    let kind = if inner.trim_start().starts_with('!') {
        TagKind::Comment
    } else {
        TagKind::Mustache(inner)
    };

    Ok(Tag {
        kind,
        strip_before,
        strip_after,
        len: start + end + 2,
    })
}

/// Position of `}}}` or `}~}}`, with the closer length and whether it strips
fn find_raw_close(body: &str) -> Option<(usize, usize, bool)> {
    let plain = body.find("}}}").map(|i| (i, 3, false));
    let stripped = body.find("}~}}").map(|i| (i, 4, true));
    match (plain, stripped) {
        (Some(p), Some(t)) => Some(if t.0 < p.0 { t } else { p }),
        (p, t) => p.or(t),
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Hash(String, Box<Token>),
}

fn tokenize(src: &str, offset: usize) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '"' || c == '\'' {
            let (literal, next) = read_quoted(&chars, i, offset)?;
            tokens.push(Token::Str(literal));
            i = next;
            continue;
        }

        let (word, next) = read_word(&chars, i, true, offset)?;
        i = next;

        if i < chars.len() && chars[i] == '=' {
            i += 1;
            if word.is_empty() || i >= chars.len() || chars[i].is_whitespace() {
                return Err(CompileError::new("malformed hash argument", offset));
            }
            let value = if chars[i] == '"' || chars[i] == '\'' {
                let (literal, next) = read_quoted(&chars, i, offset)?;
                i = next;
                Token::Str(literal)
            } else {
                let (word, next) = read_word(&chars, i, false, offset)?;
                i = next;
                Token::Word(word)
            };
            tokens.push(Token::Hash(word, Box::new(value)));
        } else {
            tokens.push(Token::Word(word));
        }
    }

    Ok(tokens)
}

/// Read a bare word, keeping `[segment literals]` intact
fn read_word(
    chars: &[char],
    start: usize,
    stop_at_eq: bool,
    offset: usize,
) -> Result<(String, usize), CompileError> {
    let mut i = start;
    while i < chars.len() && !chars[i].is_whitespace() && !(stop_at_eq && chars[i] == '=') {
        if chars[i] == '[' {
            while i < chars.len() && chars[i] != ']' {
                i += 1;
            }
            if i >= chars.len() {
                return Err(CompileError::new("unterminated segment literal", offset));
            }
        }
        i += 1;
    }
    Ok((chars[start..i].iter().collect(), i))
}

fn read_quoted(chars: &[char], start: usize, offset: usize) -> Result<(String, usize), CompileError> {
    let quote = chars[start];
    let mut end = start + 1;
    while end < chars.len() && chars[end] != quote {
        end += 1;
    }
    if end >= chars.len() {
        return Err(CompileError::new("unterminated string literal", offset));
    }
    Ok((chars[start + 1..end].iter().collect(), end + 1))
}

fn parse_expression(src: &str, offset: usize) -> Result<Expression, CompileError> {
    let mut tokens = tokenize(src, offset)?.into_iter();

    let head = match tokens.next() {
        Some(Token::Word(word)) => word,
        Some(_) => {
            return Err(CompileError::new(
                "expected a path or helper name",
                offset,
            ))
        }
        None => return Err(CompileError::new("empty expression", offset)),
    };
    if head.starts_with('>') {
        return Err(CompileError::new("partials are not supported", offset));
    }
    if head.starts_with(|c: char| c.is_ascii_punctuation() && !"@[._$-".contains(c)) {
        return Err(CompileError::new(
            format!("unexpected '{}' in expression", &head[..1]),
            offset,
        ));
    }
    let path = parse_path(&head, offset)?;

    let mut params = Vec::new();
    let mut hash = Vec::new();
    for token in tokens {
        match token {
            Token::Hash(key, value) => hash.push((key, token_to_param(*value, offset)?)),
            other => params.push(token_to_param(other, offset)?),
        }
    }

    Ok(Expression {
        head,
        path,
        params,
        hash,
    })
}

fn token_to_param(token: Token, offset: usize) -> Result<Param, CompileError> {
    match token {
        Token::Str(s) => Ok(Param::Literal(Value::String(s))),
        Token::Word(word) => word_to_param(&word, offset),
        Token::Hash(key, _) => Err(CompileError::new(
            format!("unexpected hash argument '{}'", key),
            offset,
        )),
    }
}

fn word_to_param(word: &str, offset: usize) -> Result<Param, CompileError> {
    match word {
        "true" => return Ok(Param::Literal(Value::Bool(true))),
        "false" => return Ok(Param::Literal(Value::Bool(false))),
        "null" | "undefined" => return Ok(Param::Literal(Value::Null)),
        _ => {}
    }

    if let Ok(n) = word.parse::<i64>() {
        return Ok(Param::Literal(Value::from(n)));
    }
    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Some(n) = word
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return Ok(Param::Literal(Value::Number(n)));
        }
    }

    Ok(Param::Path(parse_path(word, offset)?))
}

fn parse_path(word: &str, offset: usize) -> Result<PathExpr, CompileError> {
    if word == "this" || word == "." {
        return Ok(PathExpr::Context(Vec::new()));
    }
    if word == "@root" {
        return Ok(PathExpr::Root(Vec::new()));
    }
    if let Some(rest) = word.strip_prefix("@root.") {
        return Ok(PathExpr::Root(split_segments(rest, word, offset)?));
    }
    if let Some(name) = word.strip_prefix('@') {
        if name.is_empty() {
            return Err(CompileError::new("invalid path '@'", offset));
        }
        return Ok(PathExpr::Data(name.to_string()));
    }

    let rest = word
        .strip_prefix("this.")
        .or_else(|| word.strip_prefix("./"))
        .unwrap_or(word);
    Ok(PathExpr::Context(split_segments(rest, word, offset)?))
}

fn split_segments(path: &str, word: &str, offset: usize) -> Result<Vec<String>, CompileError> {
    let invalid = || CompileError::new(format!("invalid path '{}'", word), offset);
    let mut segments = Vec::new();
    let mut rest = path;

    loop {
        let segment = if let Some(literal) = rest.strip_prefix('[') {
            let close = literal.find(']').ok_or_else(invalid)?;
            let segment = &literal[..close];
            rest = &literal[close + 1..];
            segment
        } else {
            let end = rest.find('.').unwrap_or(rest.len());
            let segment = &rest[..end];
            if segment.contains(|c| c == '[' || c == ']') {
                return Err(invalid());
            }
            rest = &rest[end..];
            segment
        };
        if segment.is_empty() {
            return Err(invalid());
        }
        segments.push(segment.to_string());

        if rest.is_empty() {
            return Ok(segments);
        }
        rest = rest.strip_prefix('.').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
    }
}
