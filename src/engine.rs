use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::ast::Node;
use crate::error::{MinistacheError, MinistacheResult, PartialError, TemplateResult};
use crate::interface::{Context, Escape, MinistacheInterface, PartialResolver};
use crate::parser::parse;
use crate::template::{Renderer, Template, escape_html, no_escape};

/// Cache key: (partial name, indent)
type CacheKey = (String, String);

/// One cache entry. Filled by the first caller, which holds the lock while
/// parsing so racing callers wait instead of parsing again.
type Slot = Arc<Mutex<Option<Arc<[Node]>>>>;

/// Memoizes parsed partials by name and indent.
///
/// Each key is parsed at most once, even when first requested by several
/// threads at the same time. Entries are never invalidated: templates are
/// assumed not to change for the lifetime of the cache. Create one cache per
/// template root; sharing a cache between unrelated roots mixes their
/// entries.
#[derive(Debug, Default)]
pub struct TemplateCache {
    slots: RwLock<HashMap<CacheKey, Slot>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str, indent: &str) -> Slot {
        let key = (name.to_owned(), indent.to_owned());
        let existing = self.slots.read().get(&key).map(Arc::clone);
        match existing {
            Some(slot) => slot,
            None => Arc::clone(self.slots.write().entry(key).or_default()),
        }
    }

    /// Return the cached tree for `(name, indent)`, calling `load` to build
    /// it on first use.
    ///
    /// A failed load leaves the entry empty, so a later call retries.
    ///
    /// # Errors
    /// - Whatever `load` returns.
    pub fn get_or_parse<F>(
        &self,
        name: &str,
        indent: &str,
        load: F,
    ) -> Result<Arc<[Node]>, PartialError>
    where
        F: FnOnce() -> Result<Arc<[Node]>, PartialError>,
    {
        let slot = self.slot(name, indent);
        let mut entry = slot.lock();
        if let Some(nodes) = entry.as_ref() {
            trace!(name, indent, "partial cache hit");
            return Ok(Arc::clone(nodes));
        }

        debug!(name, indent, "parsing partial");
        let nodes = load()?;
        *entry = Some(Arc::clone(&nodes));
        Ok(nodes)
    }

    /// The cached tree for `(name, indent)`, if it has been parsed.
    pub fn get(&self, name: &str, indent: &str) -> Option<Arc<[Node]>> {
        let key = (name.to_owned(), indent.to_owned());
        let slot = self.slots.read().get(&key).map(Arc::clone)?;
        slot.lock().clone()
    }

    /// Fill an empty entry with an already parsed tree.
    pub(crate) fn seed(&self, name: &str, indent: &str, nodes: Arc<[Node]>) {
        let slot = self.slot(name, indent);
        let mut entry = slot.lock();
        if entry.is_none() {
            *entry = Some(nodes);
        }
    }

    /// Drop every entry for `name`, whatever its indent.
    pub(crate) fn forget(&self, name: &str) {
        self.slots.write().retain(|(key, _), _| key != name);
    }

    pub fn contains(&self, name: &str, indent: &str) -> bool {
        self.get(name, indent).is_some()
    }

    /// Number of parsed entries.
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.read().values().map(Arc::clone).collect();
        slots.iter().filter(|slot| slot.lock().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Prefix every line of `source` with `indent`.
pub(crate) fn indent_lines<'a>(source: &'a str, indent: &str) -> Cow<'a, str> {
    if indent.is_empty() {
        return Cow::Borrowed(source);
    }

    let mut indented = String::with_capacity(source.len().saturating_add(indent.len()));
    for line in source.split_inclusive('\n') {
        indented.push_str(indent);
        indented.push_str(line);
    }
    Cow::Owned(indented)
}

fn empty() -> Arc<[Node]> {
    Arc::from(Vec::new())
}

/// Partials held in memory, by name.
///
/// ```
/// use ministache::{Context, PartialMap, Renderer, Value, escape_html, parse};
///
/// let mut partials = PartialMap::new();
/// partials.insert("item", "- {{.}}\n").unwrap();
///
/// let nodes = parse("{{#items}}\n  {{> item}}\n{{/items}}\n", "list").unwrap();
/// let data: Value = [("items", vec!["a", "b"])].into_iter().collect();
///
/// let output = Renderer::new(&escape_html, &partials)
///     .render(&nodes, &Context::new(&data))
///     .unwrap();
/// assert_eq!(output, "  - a\n  - b\n");
/// ```
#[derive(Debug, Default)]
pub struct PartialMap {
    sources: HashMap<String, String>,
    cache: Arc<TemplateCache>,
}

impl PartialMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(cache: Arc<TemplateCache>) -> Self {
        Self {
            sources: HashMap::new(),
            cache,
        }
    }

    /// Add a partial, checking that it parses.
    ///
    /// Adding a name again replaces the partial, including every indented
    /// parse cached for it.
    ///
    /// # Errors
    /// - If the partial does not parse.
    pub fn insert<N: Into<String>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> TemplateResult<&mut Self> {
        let name = name.into();
        let source = source.into();
        let nodes: Arc<[Node]> = parse(&source, &name)?.into();

        self.cache.forget(&name);
        self.cache.seed(&name, "", nodes);

        self.sources.insert(name, source);
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

impl PartialResolver for PartialMap {
    fn resolve(&self, name: &str, indent: &str) -> Result<Arc<[Node]>, PartialError> {
        let Some(source) = self.sources.get(name) else {
            debug!(name, "partial not found");
            return Ok(empty());
        };

        self.cache.get_or_parse(name, indent, || {
            Ok(parse(&indent_lines(source, indent), name)?.into())
        })
    }
}

/// Resolves partials to files below a template root.
///
/// `{{> user/card }}` reads `<root>/user/card.<extension>`. A file which does
/// not exist resolves to an empty template, as does a name which would leave
/// the root (`..`, or an absolute path).
#[derive(Debug)]
pub struct FileSystemResolver {
    root: PathBuf,
    extension: String,
    cache: Arc<TemplateCache>,
}

impl FileSystemResolver {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_owned(),
            cache: Arc::default(),
        }
    }

    /// Use `extension` for template files. An empty extension means partial
    /// names are used as file names verbatim.
    #[must_use]
    pub fn with_extension<E: Into<String>>(mut self, extension: E) -> Self {
        self.extension = extension.into();
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The file read for `name`, or `None` if it lies outside the root.
    pub fn path_for(&self, name: &str) -> Option<PathBuf> {
        let inside_root = Path::new(name)
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !inside_root {
            return None;
        }

        Some(if self.extension.is_empty() {
            self.root.join(name)
        } else {
            self.root.join(format!("{}.{}", name, self.extension))
        })
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

impl PartialResolver for FileSystemResolver {
    fn resolve(&self, name: &str, indent: &str) -> Result<Arc<[Node]>, PartialError> {
        let Some(path) = self.path_for(name) else {
            debug!(name, "partial name leaves the template root");
            return Ok(empty());
        };
        trace!(name, path = %path.display(), "resolving partial");

        self.cache.get_or_parse(name, indent, || {
            let source = match std::fs::read_to_string(&path) {
                Ok(source) => source,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    debug!(name, path = %path.display(), "partial not found");
                    return Ok(empty());
                }
                Err(source) => {
                    return Err(PartialError::Io {
                        path: path.clone(),
                        source,
                    });
                }
            };
            let file = path.to_string_lossy();
            Ok(parse(&indent_lines(&source, indent), &file)?.into())
        })
    }
}

const DEFAULT_EXTENSION: &str = "mustache";

/// How `{{ name }}` output is escaped.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum EscapeMode {
    #[default]
    Html,
    None,
}

impl EscapeMode {
    pub fn function(self) -> fn(&str) -> String {
        match self {
            Self::Html => escape_html,
            Self::None => no_escape,
        }
    }
}

/// Engine configuration.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory searched for partials which were not added to the engine.
    pub template_root: Option<PathBuf>,
    /// Extension of template files below `template_root`.
    pub extension: String,
    pub escape: EscapeMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template_root: None,
            extension: DEFAULT_EXTENSION.to_owned(),
            escape: EscapeMode::default(),
        }
    }
}

/// `MinistacheEngine` is the primary implementation of the
/// [`MinistacheInterface`] trait.
///
/// It owns a set of named templates, which double as partials, and
/// optionally a template root on disk which is searched for any other
/// partial. Each engine has its own caches.
///
/// # Examples
///
/// ```
/// use ministache::{Context, MinistacheEngine, MinistacheInterface, Value};
///
/// let mut engine = MinistacheEngine::new();
/// engine.add_template("greeting", "Hello, {{> name }}!").unwrap();
/// engine.add_template("name", "{{ name }}").unwrap();
///
/// let data: Value = [("name", "World")].into_iter().collect();
/// let output = engine.render("greeting", &Context::new(&data)).unwrap();
/// assert_eq!(output, "Hello, World!");
/// ```
pub struct MinistacheEngine {
    config: Config,
    escape: Arc<Escape>,
    templates: PartialMap,
    files: Option<FileSystemResolver>,
}

impl fmt::Debug for MinistacheEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MinistacheEngine")
            .field("config", &self.config)
            .field("templates", &self.templates)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

impl MinistacheEngine {
    /// Creates a new engine with no templates and HTML escaping.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let files = config.template_root.as_ref().map(|root| {
            FileSystemResolver::new(root.clone()).with_extension(config.extension.clone())
        });
        Self {
            escape: Arc::new(config.escape.function()),
            templates: PartialMap::new(),
            files,
            config,
        }
    }

    /// Replace the escape function chosen by the configuration.
    #[must_use]
    pub fn with_escape<F>(mut self, escape: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.escape = Arc::new(escape);
        self
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains(name)
    }

    /// Parse an anonymous template.
    ///
    /// # Errors
    /// - If the template does not parse.
    pub fn compile<S: Into<String>>(&self, source: S) -> TemplateResult<Template> {
        Template::new(source)
    }

    /// Render a parsed template with this engine's escaping and partials.
    ///
    /// # Errors
    /// - If rendering fails.
    pub fn render_template(
        &self,
        template: &Template,
        context: &Context<'_>,
    ) -> TemplateResult<String> {
        Renderer::new(self.escape.as_ref(), self).render(&template.nodes, context)
    }

    /// Parse and render a template in one go.
    ///
    /// # Errors
    /// - If the template does not parse, or rendering fails.
    pub fn render_str<S: Into<String>>(
        &self,
        source: S,
        context: &Context<'_>,
    ) -> MinistacheResult<String> {
        let template = self.compile(source)?;
        Ok(self.render_template(&template, context)?)
    }
}

impl Default for MinistacheEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialResolver for MinistacheEngine {
    fn resolve(&self, name: &str, indent: &str) -> Result<Arc<[Node]>, PartialError> {
        if self.templates.contains(name) {
            return self.templates.resolve(name, indent);
        }
        match &self.files {
            Some(files) => files.resolve(name, indent),
            None => {
                debug!(name, "partial not found");
                Ok(empty())
            }
        }
    }
}

impl MinistacheInterface for MinistacheEngine {
    fn add_template<N: AsRef<str>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> MinistacheResult<()> {
        let name = name.as_ref();

        if self.templates.contains(name) {
            return Err(MinistacheError::TemplateExists {
                template_name: name.to_string(),
            });
        }

        self.templates.insert(name, source)?;
        Ok(())
    }

    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: &Context<'_>,
    ) -> MinistacheResult<String> {
        let name = template_name.as_ref();
        if !self.templates.contains(name) {
            return Err(MinistacheError::MissingTemplate {
                template_name: name.to_string(),
            });
        }

        trace!(template = name, "rendering");
        let nodes = self.templates.resolve(name, "")?;
        Ok(Renderer::new(self.escape.as_ref(), self).render(&nodes, context)?)
    }
}
