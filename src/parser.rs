use std::collections::VecDeque;
use std::iter::Zip;
use std::ops::RangeFrom;
use std::str::SplitInclusive;
use std::sync::Arc;

use crate::{
    ast::{Node, NodeKind},
    error::{ErrorKind, TemplateError, TemplateResult},
};

/// Lazily splits a template into a flat stream of [`Node`]s, one source line
/// at a time.
///
/// Tags never span lines. Every node carries the line it was found on, and
/// all nodes of a standalone line are flagged as such so the renderer can
/// elide the line's whitespace.
#[derive(Debug, Clone)]
pub struct Tokenizer<'s> {
    lines: Zip<RangeFrom<usize>, SplitInclusive<'s, char>>,
    file: Arc<str>,
    pending: VecDeque<Node>,
    failed: bool,
}

impl<'s> Tokenizer<'s> {
    fn new(source: &'s str, file: &str) -> Self {
        Self {
            lines: (1..).zip(source.split_inclusive('\n')),
            file: Arc::from(file),
            pending: VecDeque::new(),
            failed: false,
        }
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = TemplateResult<Node>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(node) = self.pending.pop_front() {
                return Some(Ok(node));
            }
            if self.failed {
                return None;
            }

            let (line_number, line) = self.lines.next()?;
            match tokenize_line(line, line_number, &self.file) {
                Ok(nodes) => self.pending.extend(nodes),
                Err(error) => {
                    self.failed = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

/// Splits one line, including its newline, into text and tag nodes.
///
/// The output always alternates text and tag, starting and ending with a
/// (possibly empty) text node.
fn tokenize_line(text: &str, line_number: usize, file: &Arc<str>) -> TemplateResult<Vec<Node>> {
    let line: Arc<str> = Arc::from(text);
    let mut nodes = Vec::new();
    let mut tail = text;

    while let Some((head, rest)) = tail.split_once("{{") {
        let Some((kind, content, rest)) = split_tag(rest) else {
            let node = Node::new(NodeKind::Error, rest, file, &line, line_number);
            return Err(TemplateError::new(node, ErrorKind::UnterminatedTag));
        };
        nodes.push(Node::new(NodeKind::Text, head, file, &line, line_number));
        nodes.push(Node::new(kind, content, file, &line, line_number));
        tail = rest;
    }
    nodes.push(Node::new(NodeKind::Text, tail, file, &line, line_number));

    if is_standalone(&nodes) {
        for node in &mut nodes {
            node.standalone = true;
        }
    }

    Ok(nodes)
}

/// Given the text following a `{{`, returns the tag kind, its content and the
/// text after the closing delimiter.
fn split_tag(rest: &str) -> Option<(NodeKind, &str, &str)> {
    // Triple mustache: {{{ name }}}
    if let Some((body, tail)) = rest
        .strip_prefix('{')
        .and_then(|inner| inner.split_once("}}}"))
    {
        return Some((NodeKind::RawVariable, body.trim(), tail));
    }

    let (body, tail) = rest.split_once("}}")?;
    let mut chars = body.chars();
    let kind = match chars.next() {
        Some('!') => NodeKind::Comment,
        Some('#') => NodeKind::SectionOpen,
        Some('^') => NodeKind::SectionInvert,
        Some('/') => NodeKind::SectionClose,
        Some('>') => NodeKind::Partial,
        Some('&') => NodeKind::RawVariable,
        Some(_) | None => return Some((NodeKind::Variable, body.trim(), tail)),
    };
    Some((kind, chars.as_str().trim(), tail))
}

/// A line is standalone when it holds only whitespace around a single
/// control tag.
fn is_standalone(nodes: &[Node]) -> bool {
    match nodes {
        [before, tag, after] => {
            before.content.trim().is_empty()
                && tag.kind.is_standalone_tag()
                && after.content.trim().is_empty()
        }
        _ => false,
    }
}

/// Tokenize `source`, using `file` to identify it in errors.
pub fn tokenize<'s>(source: &'s str, file: &str) -> Tokenizer<'s> {
    Tokenizer::new(source, file)
}

/// Sibling nodes collected at each nesting depth. Every open frame pairs its
/// section's opening node with the body collected so far.
#[derive(Default)]
struct SectionStack {
    root: Vec<Node>,
    open: Vec<(Node, Vec<Node>)>,
}

impl SectionStack {
    fn top(&mut self) -> &mut Vec<Node> {
        match self.open.last_mut() {
            Some((_, body)) => body,
            None => &mut self.root,
        }
    }

    fn open(&mut self, opener: Node) {
        self.open.push((opener, Vec::new()));
    }

    fn close(&mut self, closer: Node) -> TemplateResult<()> {
        let Some((mut opener, body)) = self.open.pop() else {
            return Err(TemplateError::new(
                closer,
                ErrorKind::SectionMismatch {
                    expected: String::new(),
                },
            ));
        };

        if opener.content != closer.content {
            return Err(TemplateError::new(
                closer,
                ErrorKind::SectionMismatch {
                    expected: opener.content,
                },
            ));
        }

        opener.children = body;
        self.top().push(opener);
        Ok(())
    }

    fn finish(mut self) -> TemplateResult<Vec<Node>> {
        match self.open.pop() {
            Some((opener, _)) => Err(TemplateError::new(opener, ErrorKind::UnclosedSection)),
            None => Ok(self.root),
        }
    }
}

/// Build a tree out of a token stream, nesting section bodies under their
/// opening node.
pub(crate) fn parse_tokens<I>(tokens: I) -> TemplateResult<Vec<Node>>
where
    I: IntoIterator<Item = TemplateResult<Node>>,
{
    let mut stack = SectionStack::default();
    for token in tokens {
        let node = token?;
        match node.kind {
            NodeKind::SectionOpen | NodeKind::SectionInvert => stack.open(node),
            NodeKind::SectionClose => stack.close(node)?,
            NodeKind::Text
            | NodeKind::Variable
            | NodeKind::Comment
            | NodeKind::Partial
            | NodeKind::RawVariable
            | NodeKind::Error => stack.top().push(node),
        }
    }
    stack.finish()
}

/// Parse a template into its tree of nodes.
///
/// # Errors
/// - If a tag is not closed on the line it was opened on.
/// - If a section is closed with a name other than the one it was opened
///   with, or is never closed.
pub fn parse(source: &str, file: &str) -> TemplateResult<Vec<Node>> {
    parse_tokens(tokenize(source, file))
}
