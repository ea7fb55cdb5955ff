mod ast;
mod engine;
mod error;
mod interface;
mod parser;
mod template;

// Public exports.
pub use ast::{Node, NodeKind};
pub use engine::{
    Config, EscapeMode, FileSystemResolver, MinistacheEngine, PartialMap, TemplateCache,
};
pub use error::{
    ErrorKind, LookupError, MinistacheError, MinistacheResult, PartialError, TemplateError,
    TemplateResult,
};
pub use interface::{
    Context, Escape, Lambda, Lookup, Map, MinistacheInterface, NoPartials, PartialResolver,
    Strict, Value,
};
pub use parser::{Tokenizer, parse, tokenize};
pub use template::{Renderer, Template, escape_html, no_escape, render};
