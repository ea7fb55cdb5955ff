use std::sync::Arc;

use crate::ast::{Node, NodeKind};
use crate::error::{TemplateError, TemplateResult};
use crate::interface::{Context, Escape, NoPartials, PartialResolver, Value};
use crate::parser::parse;

/// Escape text for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Pass text through untouched.
pub fn no_escape(text: &str) -> String {
    text.to_owned()
}

/// Renders parsed templates.
///
/// A renderer only borrows its escape function and partial resolver, and
/// never mutates the nodes it walks; one tree may be rendered by any number
/// of renderers at once.
#[derive(Clone, Copy)]
pub struct Renderer<'r> {
    escape: &'r Escape,
    partials: &'r dyn PartialResolver,
}

impl<'r> Renderer<'r> {
    pub fn new(escape: &'r Escape, partials: &'r dyn PartialResolver) -> Self {
        Self { escape, partials }
    }

    /// Render `nodes` against `context`.
    ///
    /// # Errors
    /// - If a context layer refuses a lookup.
    /// - If a partial cannot be read or parsed.
    /// - If a lambda fails.
    pub fn render(&self, nodes: &[Node], context: &Context<'_>) -> TemplateResult<String> {
        let mut output = String::new();
        self.render_into(nodes, context, &mut output)?;
        Ok(output)
    }

    fn render_into(
        &self,
        nodes: &[Node],
        context: &Context<'_>,
        output: &mut String,
    ) -> TemplateResult<()> {
        for node in nodes {
            self.render_node(node, context, output)?;
        }
        Ok(())
    }

    fn render_node(
        &self,
        node: &Node,
        context: &Context<'_>,
        output: &mut String,
    ) -> TemplateResult<()> {
        match node.kind {
            NodeKind::Text => {
                if !node.standalone {
                    output.push_str(&node.content);
                }
            }
            NodeKind::Variable => {
                if let Some(value) = lookup(node, context)?.filter(|value| value.is_truthy()) {
                    output.push_str(&(self.escape)(&value.to_text()));
                }
            }
            NodeKind::RawVariable => {
                if let Some(value) = lookup(node, context)?.filter(|value| value.is_truthy()) {
                    output.push_str(&value.to_text());
                }
            }
            NodeKind::SectionOpen => self.render_section(node, context, output)?,
            NodeKind::SectionInvert => {
                if !lookup(node, context)?.is_some_and(Value::is_truthy) {
                    self.render_into(&node.children, context, output)?;
                }
            }
            NodeKind::Partial => {
                let partial = self
                    .partials
                    .resolve(&node.content, partial_indent(node))
                    .map_err(|error| error.pin(node))?;
                self.render_into(&partial, context, output)?;
            }
            // Comments only matter for standalone detection, and closing
            // tags never survive parsing.
            NodeKind::Comment | NodeKind::SectionClose | NodeKind::Error => {}
        }
        Ok(())
    }

    fn render_section(
        &self,
        node: &Node,
        context: &Context<'_>,
        output: &mut String,
    ) -> TemplateResult<()> {
        let Some(value) = lookup(node, context)? else {
            return Ok(());
        };

        match value {
            Value::List(items) => {
                for item in items {
                    self.render_into(&node.children, &context.enter(item), output)?;
                }
            }
            Value::Lambda(lambda) => {
                output.push_str(&lambda.call(&node.children, context, self.escape)?);
            }
            Value::Null
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::String(_)
            | Value::Map(_) => {
                if value.is_truthy() {
                    self.render_into(&node.children, &context.enter(value), output)?;
                }
            }
        }
        Ok(())
    }
}

fn lookup<'a>(node: &Node, context: &Context<'a>) -> TemplateResult<Option<&'a Value>> {
    context
        .get(&node.content)
        .map_err(|error| TemplateError::new(node.clone(), error.into()))
}

/// The whitespace in front of a partial tag standing alone on its line.
fn partial_indent(node: &Node) -> &str {
    if node.standalone {
        node.line.split_once("{{").map_or("", |(indent, _)| indent)
    } else {
        ""
    }
}

/// Render `nodes` without partials.
///
/// # Errors
/// - If a context layer refuses a lookup, or a lambda fails.
pub fn render(nodes: &[Node], context: &Context<'_>, escape: &Escape) -> TemplateResult<String> {
    Renderer::new(escape, &NoPartials).render(nodes, context)
}

/// A Template is a parsed template which can be rendered any number of times.
///
/// # Example
///
/// ```rust
/// use ministache::{Context, NoPartials, Template, Value, escape_html};
///
/// let template = Template::new("Hello, {{ name }}!").unwrap();
/// let data: Value = [("name", "<World>")].into_iter().collect();
///
/// let result = template
///     .render(&Context::new(&data), &escape_html, &NoPartials)
///     .unwrap();
/// assert_eq!(result, "Hello, &lt;World&gt;!");
/// ```
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    file: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) nodes: Arc<[Node]>,
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            source: String,
            #[serde(default)]
            file: String,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;

        // The tree is rebuilt rather than trusted from the input.
        Self::parse(helper.source, helper.file)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse template: {}", e)))
    }
}

impl Template {
    /// Parse an anonymous template.
    ///
    /// # Errors
    /// - If the template has an unterminated tag, or its sections do not
    ///   match.
    pub fn new<T: Into<String>>(source: T) -> TemplateResult<Self> {
        Self::parse(source, "")
    }

    /// Parse a template, naming it `file` in errors.
    ///
    /// # Errors
    /// - If the template has an unterminated tag, or its sections do not
    ///   match.
    pub fn parse<T: Into<String>, F: Into<String>>(source: T, file: F) -> TemplateResult<Self> {
        let source = source.into();
        let file = file.into();
        let nodes = parse(&source, &file)?.into();
        Ok(Self {
            source,
            file,
            nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Render the template.
    ///
    /// # Errors
    /// - If a context layer refuses a lookup.
    /// - If a partial cannot be read or parsed.
    /// - If a lambda fails.
    pub fn render(
        &self,
        context: &Context<'_>,
        escape: &Escape,
        partials: &dyn PartialResolver,
    ) -> TemplateResult<String> {
        Renderer::new(escape, partials).render(&self.nodes, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PartialError};
    use crate::interface::{Map, Strict};

    fn data<const N: usize>(entries: [(&str, Value); N]) -> Value {
        entries.into_iter().collect()
    }

    fn render_str(source: &str, data: &Value) -> String {
        let nodes = parse(source, "test").unwrap();
        render(&nodes, &Context::new(data), &escape_html).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
        assert_eq!(no_escape("<b>"), "<b>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_plain_text_round_trip() {
        let source = "No tags here.\n  Indented line\r\n\n} { }} {\nend";
        assert_eq!(render_str(source, &Value::Null), source);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_section_truthiness() {
        assert_eq!(render_str("{{#a}}X{{/a}}", &data([])), "");
        assert_eq!(render_str("{{#a}}X{{/a}}", &data([("a", true.into())])), "X");
        assert_eq!(render_str("{{#a}}X{{/a}}", &data([("a", false.into())])), "");
        assert_eq!(render_str("{{#a}}X{{/a}}", &data([("a", 0.into())])), "");
        assert_eq!(render_str("{{#a}}X{{/a}}", &data([("a", "".into())])), "");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_empty_map_is_truthy() {
        let context = data([("m", Value::Map(Map::new()))]);
        assert_eq!(render_str("[{{#m}}X{{/m}}][{{^m}}Y{{/m}}]", &context), "[X][]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inverted_section() {
        assert_eq!(render_str("{{^a}}Y{{/a}}", &data([])), "Y");
        assert_eq!(render_str("{{^a}}Y{{/a}}", &data([("a", 1.into())])), "");
        assert_eq!(
            render_str("{{^a}}Y{{/a}}", &data([("a", Value::List(vec![]))])),
            "Y"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inverted_section_keeps_context() {
        let context = data([("name", "Joe".into())]);
        assert_eq!(render_str("{{^a}}{{name}}{{/a}}", &context), "Joe");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_iteration_order() {
        let context = data([("a", vec![1, 2, 3].into())]);
        assert_eq!(render_str("{{#a}}{{.}}{{/a}}", &context), "123");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_iteration_over_maps() {
        let people = Value::List(vec![
            data([("name", "Ann".into())]),
            data([("name", "Bob".into())]),
        ]);
        let context = data([("people", people), ("sep", ";".into())]);
        assert_eq!(
            render_str("{{#people}}{{name}}{{sep}}{{/people}}", &context),
            "Ann;Bob;"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_lists() {
        let context = data([(
            "rows",
            Value::List(vec![vec![1, 2].into(), vec![3].into()]),
        )]);
        assert_eq!(
            render_str("{{#rows}}[{{#.}}{{.}}{{/.}}]{{/rows}}", &context),
            "[12][3]"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_section_scopes_map() {
        let context = data([
            ("person", data([("name", "Ann".into())])),
            ("greeting", "Hi".into()),
        ]);
        assert_eq!(
            render_str("{{#person}}{{greeting}} {{name}}{{/person}}", &context),
            "Hi Ann"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_section_scalar_is_dot() {
        let context = data([("word", "bird".into())]);
        assert_eq!(render_str("{{#word}}{{.}} is the word{{/word}}", &context), "bird is the word");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaping_only_applies_to_variables() {
        let context = data([("a", "<b>".into())]);
        assert_eq!(render_str("{{a}}", &context), "&lt;b&gt;");
        assert_eq!(render_str("{{&a}}", &context), "<b>");
        assert_eq!(render_str("{{{a}}}", &context), "<b>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_custom_escape() {
        let nodes = parse("{{a}} {{&a}}", "test").unwrap();
        let context = data([("a", "x y".into())]);
        let shout = |text: &str| text.to_uppercase();
        let output = render(&nodes, &Context::new(&context), &shout).unwrap();
        assert_eq!(output, "X Y x y");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_missing_and_falsy_variables_are_empty() {
        assert_eq!(render_str("[{{missing}}]", &data([])), "[]");
        assert_eq!(render_str("[{{n}}]", &data([("n", 0.into())])), "[]");
        assert_eq!(render_str("[{{n}}]", &data([("n", Value::Null)])), "[]");
        assert_eq!(render_str("[{{n}}]", &data([("n", 85.into())])), "[85]");
        assert_eq!(render_str("[{{n}}]", &data([("n", 1.21.into())])), "[1.21]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_standalone_lines_are_removed() {
        let context = data([("a", true.into())]);
        assert_eq!(render_str("{{#a}}\nX\n{{/a}}\n", &context), "X\n");
        assert_eq!(
            render_str("| This Is\n  {{#a}}\n|\n  {{/a}}\n| A Line\n", &context),
            "| This Is\n|\n| A Line\n"
        );
        assert_eq!(
            render_str("Begin.\n{{! Comment Block! }}\nEnd.\n", &context),
            "Begin.\nEnd.\n"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_inline_tags_keep_whitespace() {
        let context = data([("a", true.into())]);
        assert_eq!(render_str(" {{#a}}YES{{/a}}\n", &context), " YES\n");
        assert_eq!(render_str("12345{{! Comment Block! }}67890", &context), "1234567890");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dotted_names() {
        let context = data([("a", data([("b", data([("c", "deep".into())]))]))]);
        assert_eq!(render_str("{{a.b.c}}", &context), "deep");
        assert_eq!(render_str("{{#a.b}}{{c}}{{/a.b}}", &context), "deep");
        assert_eq!(render_str("[{{a.x.c}}]", &context), "[]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lambda_section() {
        let context = data([(
            "wrap",
            Value::lambda(|children, context, escape| {
                let inner = render(children, context, escape)?;
                Ok(format!("<b>{}</b>", inner))
            }),
        ), ("name", "Willy".into())]);
        assert_eq!(
            render_str("{{#wrap}}{{name}} is awesome.{{/wrap}}", &context),
            "<b>Willy is awesome.</b>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_lambda_output_is_verbatim() {
        let context = data([("lambda", Value::lambda(|_, _, _| Ok("{{not a tag}}".to_string())))]);
        assert_eq!(render_str("{{#lambda}}ignored{{/lambda}}", &context), "{{not a tag}}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_strict_layer_error_points_at_tag() {
        let strict = Strict(Map::new());
        let nodes = parse("ok\n  {{ name }}", "page").unwrap();
        let err = render(&nodes, &Context::new(&strict), &escape_html).unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::Lookup(_)));
        assert_eq!(err.node().kind(), NodeKind::Variable);
        assert_eq!(err.to_string(), "\"name\" in page:2");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_partials_share_context() {
        let partial = parse("{{outer}}!", "partial").unwrap();
        let resolver = move |name: &str, _indent: &str| -> Result<Arc<[Node]>, PartialError> {
            if name == "p" {
                Ok(Arc::from(partial.clone()))
            } else {
                Ok(Arc::from(Vec::new()))
            }
        };

        let nodes = parse("[{{>p}}][{{>missing}}]", "test").unwrap();
        let context = data([("outer", "seen".into())]);
        let output = Renderer::new(&escape_html, &resolver)
            .render(&nodes, &Context::new(&context))
            .unwrap();
        assert_eq!(output, "[seen!][]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_standalone_partial_gets_indent() {
        let nodes = parse("a\n  {{> p }}\nb {{>p}}\n", "test").unwrap();
        let resolver = |_: &str, indent: &str| -> Result<Arc<[Node]>, PartialError> {
            let source = format!("{}<{}>\n", indent, indent.len());
            Ok(Arc::from(parse(&source, "p")?))
        };
        let output = Renderer::new(&escape_html, &resolver)
            .render(&nodes, &Context::empty())
            .unwrap();
        assert_eq!(output, "a\n  <2>\nb <0>\n\n");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_render() {
        let template = Template::parse("{{#items}}{{.}},{{/items}}", "list").unwrap();
        let context = data([("items", vec!["a", "b"].into())]);
        let output = template
            .render(&Context::new(&context), &no_escape, &NoPartials)
            .unwrap();

        assert_eq!(output, "a,b,");
        assert_eq!(template.file(), "list");
        assert_eq!(template.source(), "{{#items}}{{.}},{{/items}}");
    }
}
