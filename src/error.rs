use std::path::PathBuf;

use crate::ast::Node;

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;
pub type MinistacheResult<T> = std::result::Result<T, MinistacheError>;

/// Signalled by a context layer which refuses a key, as opposed to simply
/// not having it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("lookup of '{key}' failed: {reason}")]
pub struct LookupError {
    pub key: String,
    pub reason: String,
}

impl LookupError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self::new(key, "no such key")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("unterminated tag (expected '}}}}')")]
    UnterminatedTag,
    #[error("section closed without matching open (expected '{expected}')")]
    SectionMismatch { expected: String },
    #[error("unclosed section")]
    UnclosedSection,
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("failed to read partial {}", .path.display())]
    PartialIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The single error type of the crate, pinned to the node which caused it.
///
/// Displays as `"<token>" in <file>:<line>`; the underlying cause is
/// available through [`TemplateError::kind`] and
/// [`std::error::Error::source`].
#[derive(Debug, thiserror::Error)]
#[error("\"{}\" in {}:{}", .node.content(), .node.file(), .node.line_number())]
pub struct TemplateError {
    node: Box<Node>,
    #[source]
    kind: ErrorKind,
}

impl TemplateError {
    pub(crate) fn new(node: Node, kind: ErrorKind) -> Self {
        Self {
            node: Box::new(node),
            kind,
        }
    }

    /// The node the error is pinned to.
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

/// Failure of a [`PartialResolver`](crate::PartialResolver).
///
/// A partial which simply does not exist is not an error; resolvers return
/// an empty template for it.
#[derive(Debug, thiserror::Error)]
pub enum PartialError {
    /// The partial was found but is not a valid template.
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to read partial {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PartialError {
    /// Pin this failure to the partial tag which triggered it.
    pub(crate) fn pin(self, node: &Node) -> TemplateError {
        match self {
            Self::Template(error) => error,
            Self::Io { path, source } => {
                TemplateError::new(node.clone(), ErrorKind::PartialIo { path, source })
            }
        }
    }
}

/// Errors of the [`MinistacheEngine`](crate::MinistacheEngine) facade.
#[derive(Debug, thiserror::Error)]
pub enum MinistacheError {
    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },
    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("failed to read template {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<PartialError> for MinistacheError {
    fn from(error: PartialError) -> Self {
        match error {
            PartialError::Template(error) => Self::Template(error),
            PartialError::Io { path, source } => Self::Io { path, source },
        }
    }
}
