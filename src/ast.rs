use std::sync::Arc;

/// The kind of a [`Node`], decided by the tag's sigil.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Literal template text between tags.
    Text,
    /// `{{ name }}`, escaped on output.
    Variable,
    /// `{{! ... }}`
    Comment,
    /// `{{# name }}`
    SectionOpen,
    /// `{{^ name }}`
    SectionInvert,
    /// `{{/ name }}`, only ever seen in the flat token stream.
    SectionClose,
    /// `{{> name }}`
    Partial,
    /// `{{& name }}` or `{{{ name }}}`, emitted without escaping.
    RawVariable,
    /// The remainder of a line holding an unterminated tag.
    Error,
}

impl NodeKind {
    /// Tags which may stand alone on a line and have their line elided.
    pub const fn is_standalone_tag(self) -> bool {
        match self {
            Self::Comment
            | Self::SectionOpen
            | Self::SectionInvert
            | Self::SectionClose
            | Self::Partial => true,
            Self::Text | Self::Variable | Self::RawVariable | Self::Error => false,
        }
    }
}

/// A token of a template, and after parsing a node of its tree.
///
/// Sections own their body through `children`. Once parsed a tree is never
/// mutated, so it can be cached and rendered from many threads at once.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) content: String,
    pub(crate) file: Arc<str>,
    pub(crate) line: Arc<str>,
    pub(crate) line_number: usize,
    pub(crate) standalone: bool,
    pub(crate) children: Vec<Node>,
}

impl Node {
    pub(crate) fn new(
        kind: NodeKind,
        content: impl Into<String>,
        file: &Arc<str>,
        line: &Arc<str>,
        line_number: usize,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            file: Arc::clone(file),
            line: Arc::clone(line),
            line_number,
            standalone: false,
            children: Vec::new(),
        }
    }

    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// The tag name for tags, or the raw text for [`NodeKind::Text`].
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Identifier of the template this node came from.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// The full source line, including its newline.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// 1-indexed line number.
    pub const fn line_number(&self) -> usize {
        self.line_number
    }

    /// Whether this node sits on a line holding nothing but whitespace and
    /// a single control tag.
    pub const fn is_standalone(&self) -> bool {
        self.standalone
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }
}
