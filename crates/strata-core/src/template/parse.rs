// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lexer and parser for [`super::Template`].
use super::{Command, Node, Operand, Pipeline};
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Ident(String),
    Dot(Vec<String>),
    Var(String, Vec<String>),
    Fields(Vec<String>),
    LParen,
    RParen,
    Pipe,
    Comma,
    Declare,
    Assign,
}

enum Item {
    Text(String),
    Action(Vec<Tok>),
}

pub(super) fn parse(source: &str) -> Result<Vec<Node>, String> {
    let items = split(source)?;
    let mut stack: Vec<Frame> = vec![Frame::root()];
    for item in items {
        match item {
            Item::Text(t) => push(&mut stack, Node::Text(t))?,
            Item::Action(toks) => action(&mut stack, toks)?,
        }
    }
    if stack.len() != 1 {
        return Err("unexpected EOF: missing {{ end }}".to_owned());
    }
    stack
        .pop()
        .map(|f| f.then)
        .ok_or_else(|| "internal parser state lost".to_owned())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Root,
    If,
    Range,
}

struct Frame {
    kind: FrameKind,
    cond: Option<Pipeline>,
    then: Vec<Node>,
    otherwise: Vec<Node>,
    in_else: bool,
    // `else if` opens a frame that closes together with its parent on `end`.
    chained: bool,
}

impl Frame {
    fn root() -> Self {
        Self::open(FrameKind::Root, None, false)
    }

    fn open(kind: FrameKind, cond: Option<Pipeline>, chained: bool) -> Self {
        Self {
            kind,
            cond,
            then: Vec::new(),
            otherwise: Vec::new(),
            in_else: false,
            chained,
        }
    }

    fn close(self) -> Result<Node, String> {
        let cond = self.cond.ok_or_else(|| "block without condition".to_owned())?;
        Ok(match self.kind {
            FrameKind::Range => Node::Range {
                over: cond,
                body: self.then,
                otherwise: self.otherwise,
            },
            _ => Node::If {
                cond,
                then: self.then,
                otherwise: self.otherwise,
            },
        })
    }
}

fn push(stack: &mut [Frame], node: Node) -> Result<(), String> {
    let top = stack.last_mut().ok_or_else(|| "empty parser stack".to_owned())?;
    if top.in_else {
        top.otherwise.push(node);
    } else {
        top.then.push(node);
    }
    Ok(())
}

fn close_top(stack: &mut Vec<Frame>) -> Result<(), String> {
    let frame = stack.pop().ok_or_else(|| "empty parser stack".to_owned())?;
    let chained = frame.chained;
    let node = frame.close()?;
    push(stack, node)?;
    if chained {
        close_top(stack)?;
    }
    Ok(())
}

fn action(stack: &mut Vec<Frame>, toks: Vec<Tok>) -> Result<(), String> {
    match toks.first() {
        None => Ok(()),
        Some(Tok::Ident(kw)) if kw == "if" || kw == "range" => {
            let kind = if kw == "if" { FrameKind::If } else { FrameKind::Range };
            let cond = pipeline(&toks[1..])?;
            stack.push(Frame::open(kind, Some(cond), false));
            Ok(())
        }
        Some(Tok::Ident(kw)) if kw == "else" => {
            let top = stack.last_mut().ok_or_else(|| "empty parser stack".to_owned())?;
            if top.kind == FrameKind::Root || top.in_else {
                return Err("unexpected {{ else }}".to_owned());
            }
            top.in_else = true;
            match toks.get(1) {
                None => Ok(()),
                Some(Tok::Ident(kw)) if kw == "if" => {
                    let cond = pipeline(&toks[2..])?;
                    stack.push(Frame::open(FrameKind::If, Some(cond), true));
                    Ok(())
                }
                Some(other) => Err(format!("unexpected {other:?} after else")),
            }
        }
        Some(Tok::Ident(kw)) if kw == "end" => {
            if toks.len() > 1 {
                return Err("unexpected tokens after end".to_owned());
            }
            if stack.len() <= 1 {
                return Err("unexpected {{ end }}".to_owned());
            }
            close_top(stack)
        }
        Some(_) => {
            let p = pipeline(&toks)?;
            push(stack, Node::Action(p))
        }
    }
}

fn pipeline(toks: &[Tok]) -> Result<Pipeline, String> {
    let mut vars = Vec::new();
    let mut declare = false;
    let mut rest = toks;
    // `$a :=`, `$a =`, `$i, $e :=`
    let decl_end = toks
        .iter()
        .position(|t| matches!(t, Tok::Declare | Tok::Assign));
    if let Some(end) = decl_end {
        let head = &toks[..end];
        let all_vars = head
            .iter()
            .all(|t| matches!(t, Tok::Var(_, f) if f.is_empty()) || matches!(t, Tok::Comma));
        if all_vars && !head.is_empty() {
            for t in head {
                if let Tok::Var(name, _) = t {
                    vars.push(name.clone());
                }
            }
            declare = matches!(toks[end], Tok::Declare);
            rest = &toks[end + 1..];
        }
    }
    let mut commands = Vec::new();
    let mut pos = 0;
    loop {
        let (cmd, next) = command(rest, pos)?;
        commands.push(cmd);
        pos = next;
        match rest.get(pos) {
            None => break,
            Some(Tok::Pipe) => pos += 1,
            Some(other) => return Err(format!("unexpected {other:?} in pipeline")),
        }
    }
    Ok(Pipeline {
        vars,
        declare,
        commands,
    })
}

fn command(toks: &[Tok], mut pos: usize) -> Result<(Command, usize), String> {
    let mut operands = Vec::new();
    while let Some(tok) = toks.get(pos) {
        let operand = match tok {
            Tok::Pipe | Tok::RParen => break,
            Tok::Str(s) => Operand::Literal(Value::String(s.clone())),
            Tok::Int(i) => Operand::Literal(Value::Int(*i)),
            Tok::Float(x) => Operand::Literal(Value::Float(*x)),
            Tok::Bool(b) => Operand::Literal(Value::Bool(*b)),
            Tok::Nil => Operand::Literal(Value::Null),
            Tok::Ident(name) => Operand::Func(name.clone()),
            Tok::Dot(fields) => Operand::Dot(fields.clone()),
            Tok::Var(name, fields) => Operand::Var(name.clone(), fields.clone()),
            Tok::LParen => {
                let close = matching_paren(toks, pos)?;
                let inner = pipeline(&toks[pos + 1..close])?;
                pos = close;
                let fields = match toks.get(pos + 1) {
                    Some(Tok::Fields(f)) => {
                        pos += 1;
                        f.clone()
                    }
                    _ => Vec::new(),
                };
                Operand::Sub(Box::new(inner), fields)
            }
            other => return Err(format!("unexpected {other:?} in command")),
        };
        operands.push(operand);
        pos += 1;
    }
    if operands.is_empty() {
        return Err("empty command".to_owned());
    }
    Ok((Command { operands }, pos))
}

fn matching_paren(toks: &[Tok], open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    for (i, t) in toks.iter().enumerate().skip(open) {
        match t {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err("unclosed left paren".to_owned())
}

fn split(source: &str) -> Result<Vec<Item>, String> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut trim_next = false;
    while !rest.is_empty() {
        let Some(open) = rest.find("{{") else {
            let text = if trim_next { rest.trim_start() } else { rest };
            if !text.is_empty() {
                items.push(Item::Text(text.to_owned()));
            }
            break;
        };
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        let mut body = &rest[open + 2..];
        if body.starts_with("- ") || body.starts_with("-\t") || body.starts_with("-\n") {
            text = text.trim_end();
            body = &body[1..];
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_owned()));
        }
        let (toks, consumed, trim) = lex_action(body)?;
        trim_next = trim;
        if let Some(toks) = toks {
            items.push(Item::Action(toks));
        }
        rest = &body[consumed..];
    }
    Ok(items)
}

/// Lexes one action body. Returns the tokens (`None` for comments), the bytes
/// consumed including the closing delimiter, and whether a right trim marker
/// was present.
fn lex_action(body: &str) -> Result<(Option<Vec<Tok>>, usize, bool), String> {
    let trimmed = body.trim_start();
    if trimmed.starts_with("/*") {
        let end = body.find("*/").ok_or_else(|| "unclosed comment".to_owned())?;
        let after = &body[end + 2..];
        let after_trim = after.trim_start();
        let (trim, skip) = if let Some(r) = after_trim.strip_prefix("-}}") {
            (true, after.len() - r.len())
        } else if let Some(r) = after_trim.strip_prefix("}}") {
            (false, after.len() - r.len())
        } else {
            return Err("comment must be followed by }}".to_owned());
        };
        return Ok((None, end + 2 + skip, trim));
    }

    let chars: Vec<(usize, char)> = body.char_indices().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (at, c) = chars[i];
        if c.is_whitespace() {
            // ` -}}` right trim marker
            let rest = &body[at..];
            let ws = rest.len() - rest.trim_start().len();
            if rest[ws..].starts_with("-}}") {
                return Ok((Some(toks), at + ws + 3, true));
            }
            i += 1;
            continue;
        }
        if body[at..].starts_with("}}") {
            return Ok((Some(toks), at + 2, false));
        }
        match c {
            '"' => {
                let (s, next) = lex_string(&chars, i)?;
                toks.push(Tok::Str(s));
                i = next;
            }
            '`' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j].1 != '`' {
                    j += 1;
                }
                if j >= chars.len() {
                    return Err("unterminated raw string".to_owned());
                }
                toks.push(Tok::Str(chars[start..j].iter().map(|(_, c)| *c).collect()));
                i = j + 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
                let dot_next = chars.get(i).is_some_and(|(_, c)| *c == '.');
                let ident_next = chars.get(i + 1).is_some_and(|(_, c)| is_ident_start(*c));
                if dot_next && ident_next {
                    let (fields, next) = lex_fields(&chars, i);
                    toks.push(Tok::Fields(fields));
                    i = next;
                }
            }
            '|' => {
                toks.push(Tok::Pipe);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            ':' if chars.get(i + 1).is_some_and(|(_, c)| *c == '=') => {
                toks.push(Tok::Declare);
                i += 2;
            }
            '=' => {
                toks.push(Tok::Assign);
                i += 1;
            }
            '.' => {
                let (fields, next) = lex_fields(&chars, i);
                toks.push(Tok::Dot(fields));
                i = next;
            }
            '$' => {
                let mut j = i + 1;
                while j < chars.len() && is_ident_char(chars[j].1) {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().map(|(_, c)| *c).collect();
                let (fields, next) = lex_fields(&chars, j);
                toks.push(Tok::Var(name, fields));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|(_, d)| d.is_ascii_digit())) => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                    j += 1;
                }
                let text: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                if text.contains('.') {
                    toks.push(Tok::Float(text.parse().map_err(|_| format!("bad number {text}"))?));
                } else {
                    toks.push(Tok::Int(text.parse().map_err(|_| format!("bad number {text}"))?));
                }
                i = j;
            }
            c if is_ident_start(c) => {
                let mut j = i;
                while j < chars.len() && is_ident_char(chars[j].1) {
                    j += 1;
                }
                let word: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                toks.push(match word.as_str() {
                    "true" => Tok::Bool(true),
                    "false" => Tok::Bool(false),
                    "nil" => Tok::Nil,
                    _ => Tok::Ident(word),
                });
                i = j;
            }
            other => return Err(format!("unexpected character {other:?} in action")),
        }
    }
    Err("unclosed action".to_owned())
}

fn lex_string(chars: &[(usize, char)], open: usize) -> Result<(String, usize), String> {
    let mut out = String::new();
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i].1 {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let esc = chars.get(i + 1).map(|(_, c)| *c).ok_or_else(|| "unterminated quoted string".to_owned())?;
                out.push(match esc {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated quoted string".to_owned())
}

/// Reads `.A.B.C` starting at a `.`; a bare `.` yields no fields.
fn lex_fields(chars: &[(usize, char)], mut i: usize) -> (Vec<String>, usize) {
    let mut fields = Vec::new();
    while i < chars.len() && chars[i].1 == '.' {
        let mut j = i + 1;
        while j < chars.len() && is_ident_char(chars[j].1) {
            j += 1;
        }
        if j == i + 1 {
            // bare dot
            return (fields, j);
        }
        fields.push(chars[i + 1..j].iter().map(|(_, c)| *c).collect());
        i = j;
    }
    (fields, i)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn lexes_fields_vars_and_literals() {
        let (toks, used, trim) = lex_action(" $x.Name | f .Self.Type \"s\" 3 -1.5 }}tail").unwrap();
        assert!(!trim);
        assert_eq!(used, " $x.Name | f .Self.Type \"s\" 3 -1.5 }}".len());
        assert_eq!(
            toks.unwrap(),
            vec![
                Tok::Var("x".into(), vec!["Name".into()]),
                Tok::Pipe,
                Tok::Ident("f".into()),
                Tok::Dot(vec!["Self".into(), "Type".into()]),
                Tok::Str("s".into()),
                Tok::Int(3),
                Tok::Float(-1.5),
            ]
        );
    }

    #[test]
    fn paren_fields_attach_to_subexpression() {
        let nodes = parse("{{ (f .).Name }}").unwrap();
        let Node::Action(p) = &nodes[0] else {
            panic!("expected action")
        };
        assert!(matches!(&p.commands[0].operands[0], Operand::Sub(_, f) if f == &vec!["Name".to_owned()]));
    }
}
