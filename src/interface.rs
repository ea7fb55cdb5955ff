use std::{
    borrow::Cow,
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

use crate::ast::Node;
use crate::error::{LookupError, MinistacheResult, PartialError, TemplateResult};

/// An escaping function, applied to the output of `{{ name }}` tags.
pub type Escape = dyn Fn(&str) -> String + Send + Sync;

/// A mapping scope: one level of nested data.
pub type Map = BTreeMap<String, Value>;

type LambdaFn = dyn Fn(&[Node], &Context<'_>, &Escape) -> TemplateResult<String> + Send + Sync;

/// A callable section value.
///
/// When a section resolves to a lambda, the lambda receives the section's
/// unrendered children, the current context and the escape function. Its
/// output replaces the section verbatim.
#[derive(Clone)]
pub struct Lambda(Arc<LambdaFn>);

impl Lambda {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[Node], &Context<'_>, &Escape) -> TemplateResult<String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(
        &self,
        children: &[Node],
        context: &Context<'_>,
        escape: &Escape,
    ) -> TemplateResult<String> {
        (self.0)(children, context, escape)
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Lambda(..)")
    }
}

impl PartialEq for Lambda {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A value in a rendering context.
///
/// The variant decides how a section treats the value: lists iterate, maps
/// open a new scope, lambdas take over rendering and everything else is
/// tested for truthiness.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(Map),
    Lambda(Lambda),
}

impl Value {
    /// `null`, `false`, zero, the empty string and the empty list are falsy.
    /// Everything else, including an empty map, is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Float(value) => *value != 0.0,
            Self::String(value) => !value.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(_) | Self::Lambda(_) => true,
        }
    }

    /// The text substituted for this value by a variable tag.
    ///
    /// Only scalars have a textual form; `null`, lists, maps and lambdas
    /// render as the empty string.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            Self::String(value) => Cow::Borrowed(value),
            Self::Bool(value) => Cow::Borrowed(if *value { "true" } else { "false" }),
            Self::Int(value) => Cow::Owned(value.to_string()),
            Self::Float(value) => Cow::Owned(value.to_string()),
            Self::Null | Self::List(_) | Self::Map(_) | Self::Lambda(_) => Cow::Borrowed(""),
        }
    }

    pub const fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            Self::Null
            | Self::Bool(_)
            | Self::Int(_)
            | Self::Float(_)
            | Self::String(_)
            | Self::List(_)
            | Self::Lambda(_) => None,
        }
    }

    /// Look up `key` if this value is a map.
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_map().and_then(|map| map.get(key))
    }

    pub fn lambda<F>(f: F) -> Self
    where
        F: Fn(&[Node], &Context<'_>, &Escape) -> TemplateResult<String> + Send + Sync + 'static,
    {
        Self::Lambda(Lambda::new(f))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Map(value)
    }
}

impl From<Lambda> for Value {
    fn from(value: Lambda) -> Self {
        Self::Lambda(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<K: Into<String>, V: Into<Self>> FromIterator<(K, V)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Map(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// The capability a context layer must provide.
///
/// Returning `Ok(None)` lets the lookup fall through to outer layers.
/// Returning an error aborts rendering with a
/// [`TemplateError`](crate::TemplateError) pinned to the tag being rendered.
pub trait Lookup {
    /// # Errors
    /// - If the layer refuses the key outright.
    fn lookup(&self, key: &str) -> Result<Option<&Value>, LookupError>;
}

impl Lookup for Map {
    fn lookup(&self, key: &str) -> Result<Option<&Value>, LookupError> {
        Ok(self.get(key))
    }
}

impl Lookup for HashMap<String, Value> {
    fn lookup(&self, key: &str) -> Result<Option<&Value>, LookupError> {
        Ok(self.get(key))
    }
}

impl Lookup for Value {
    fn lookup(&self, key: &str) -> Result<Option<&Value>, LookupError> {
        Ok(self.get(key))
    }
}

/// Wraps a layer so that a missing key is an error instead of a miss.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Strict<L>(pub L);

impl<L: Lookup> Lookup for Strict<L> {
    fn lookup(&self, key: &str) -> Result<Option<&Value>, LookupError> {
        match self.0.lookup(key)? {
            Some(value) => Ok(Some(value)),
            None => Err(LookupError::missing(key)),
        }
    }
}

#[derive(Clone, Copy)]
enum Layer<'a> {
    Scope(&'a dyn Lookup),
    /// The implicit `{".": item}` scope of a non-map section value.
    Item(&'a Value),
}

impl<'a> Layer<'a> {
    fn lookup(self, key: &str) -> Result<Option<&'a Value>, LookupError> {
        match self {
            Self::Scope(scope) => scope.lookup(key),
            Self::Item(item) => Ok((key == ".").then_some(item)),
        }
    }
}

/// A chain of scopes, searched innermost first.
///
/// Pushing a scope borrows the current context rather than copying it, so
/// entering a section costs one small value on the stack.
///
/// ```
/// use ministache::{Context, Map, Value};
///
/// let outer: Map = [("name".to_string(), Value::from("outer"))].into();
/// let inner: Map = [("name".to_string(), Value::from("inner"))].into();
///
/// let context = Context::new(&outer);
/// assert_eq!(context.get("name").unwrap(), Some(&Value::from("outer")));
/// assert_eq!(context.push(&inner).get("name").unwrap(), Some(&Value::from("inner")));
/// ```
#[derive(Clone, Copy)]
pub struct Context<'a> {
    layer: Option<Layer<'a>>,
    parent: Option<&'a Context<'a>>,
}

impl Default for Context<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("depth", &self.depth())
            .finish()
    }
}

impl<'a> Context<'a> {
    /// A context with no scopes; every lookup misses.
    pub const fn empty() -> Self {
        Self {
            layer: None,
            parent: None,
        }
    }

    pub fn new(scope: &'a dyn Lookup) -> Self {
        Self {
            layer: Some(Layer::Scope(scope)),
            parent: None,
        }
    }

    /// A new context with `scope` searched before every scope of `self`.
    pub fn push<'b>(&'b self, scope: &'b dyn Lookup) -> Context<'b> {
        Context {
            layer: Some(Layer::Scope(scope)),
            parent: Some(self),
        }
    }

    pub(crate) fn push_item<'b>(&'b self, item: &'b Value) -> Context<'b> {
        Context {
            layer: Some(Layer::Item(item)),
            parent: Some(self),
        }
    }

    /// Enter the scope of a section value: maps are searched as-is, any
    /// other value is reachable as `.`.
    pub(crate) fn enter<'b>(&'b self, value: &'b Value) -> Context<'b> {
        match value {
            Value::Map(map) => self.push(map),
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::List(_)
            | Value::Lambda(_) => self.push_item(value),
        }
    }

    /// Number of scopes in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0_usize;
        let mut current = Some(self);
        while let Some(context) = current {
            if context.layer.is_some() {
                depth = depth.saturating_add(1);
            }
            current = context.parent;
        }
        depth
    }

    fn resolve(&self, key: &str) -> Result<Option<&'a Value>, LookupError> {
        let mut current = Some(self);
        while let Some(context) = current {
            if let Some(layer) = context.layer {
                if let Some(value) = layer.lookup(key)? {
                    return Ok(Some(value));
                }
            }
            current = context.parent;
        }
        Ok(None)
    }

    /// Look up a tag name.
    ///
    /// `.` names the current item. Dotted names resolve their first segment
    /// through the whole chain and the remaining segments through nested
    /// maps.
    ///
    /// # Errors
    /// - If a layer refuses the first segment of the name.
    pub fn get(&self, name: &str) -> Result<Option<&'a Value>, LookupError> {
        if name == "." {
            return self.resolve(name);
        }

        let mut segments = name.split('.');
        let Some(first) = segments.next() else {
            return Ok(None);
        };
        let mut value = self.resolve(first)?;
        for segment in segments {
            value = value.and_then(|value| value.get(segment));
        }
        Ok(value)
    }
}

/// Supplies the parsed templates named by `{{> name }}` tags.
///
/// `indent` is the whitespace preceding a partial tag which stands alone on
/// its line; resolvers prefix every line of the partial with it before
/// parsing, so nested partials inherit the indentation of their inclusion
/// point.
pub trait PartialResolver {
    /// Returns the parsed partial, or an empty template if there is no
    /// partial called `name`.
    ///
    /// # Errors
    /// - If the partial exists but cannot be read or parsed.
    fn resolve(&self, name: &str, indent: &str) -> Result<Arc<[Node]>, PartialError>;
}

impl<F> PartialResolver for F
where
    F: Fn(&str, &str) -> Result<Arc<[Node]>, PartialError>,
{
    fn resolve(&self, name: &str, indent: &str) -> Result<Arc<[Node]>, PartialError> {
        self(name, indent)
    }
}

/// A resolver without partials: every `{{> name }}` renders nothing.
#[derive(Debug, Copy, Clone, Default)]
pub struct NoPartials;

impl PartialResolver for NoPartials {
    fn resolve(&self, _name: &str, _indent: &str) -> Result<Arc<[Node]>, PartialError> {
        Ok(Arc::from(Vec::new()))
    }
}

/// `MinistacheInterface` is the facade of a Mustache engine: a set of named
/// templates, rendered by name.
pub trait MinistacheInterface {
    /// `add_template` parses a template and makes it available by name, both
    /// for [`render`](Self::render) and as a partial.
    ///
    /// # Errors
    /// - If the template name is a duplicate.
    /// - If the template does not parse.
    fn add_template<N: AsRef<str>, S: Into<String>>(
        &mut self,
        name: N,
        source: S,
    ) -> MinistacheResult<()>;

    /// `render` renders a named template with the given context.
    ///
    /// # Errors
    /// - If the template name is not found.
    /// - If rendering fails.
    fn render<N: AsRef<str>>(
        &self,
        template_name: N,
        context: &Context<'_>,
    ) -> MinistacheResult<String>;
}

#[cfg(feature = "serde")]
mod serde_impls {
    use std::fmt;

    use serde::{
        Deserialize, Deserializer, Serialize, Serializer,
        de::{MapAccess, SeqAccess, Visitor},
    };

    use super::{Map, Value};

    impl Serialize for Value {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            match self {
                Self::Null => serializer.serialize_unit(),
                Self::Bool(value) => serializer.serialize_bool(*value),
                Self::Int(value) => serializer.serialize_i64(*value),
                Self::Float(value) => serializer.serialize_f64(*value),
                Self::String(value) => serializer.serialize_str(value),
                Self::List(items) => items.serialize(serializer),
                Self::Map(map) => map.serialize(serializer),
                Self::Lambda(_) => Err(serde::ser::Error::custom(
                    "lambdas cannot be serialized",
                )),
            }
        }
    }

    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Value;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a template context value")
        }

        fn visit_unit<E>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_none<E>(self) -> Result<Value, E> {
            Ok(Value::Null)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
            Value::deserialize(deserializer)
        }

        fn visit_bool<E>(self, value: bool) -> Result<Value, E> {
            Ok(Value::Bool(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Value, E> {
            Ok(Value::Int(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Value, E> {
            #[allow(
                clippy::cast_precision_loss,
                reason = "integers beyond i64 are kept approximately"
            )]
            let fallback = value as f64;
            Ok(i64::try_from(value).map_or(Value::Float(fallback), Value::Int))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Value, E> {
            Ok(Value::Float(value))
        }

        fn visit_str<E>(self, value: &str) -> Result<Value, E> {
            Ok(Value::String(value.to_owned()))
        }

        fn visit_string<E>(self, value: String) -> Result<Value, E> {
            Ok(Value::String(value))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
            let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(item) = seq.next_element()? {
                items.push(item);
            }
            Ok(Value::List(items))
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
            let mut map = Map::new();
            while let Some((key, value)) = access.next_entry::<String, Value>()? {
                map.insert(key, value);
            }
            Ok(Value::Map(map))
        }
    }

    impl<'de> Deserialize<'de> for Value {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ValueVisitor)
        }
    }
}
