use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use scraper::node::Element;
use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};

use crate::error::RuleError;

static RULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^([A-Za-z][A-Za-z0-9-]*)?(?:\.([\w-]+)|#([\w-]+)|\[([\w:-]+)=["']?([^"'\]]+)["']?\])?$"#)
        .unwrap()
});

/// Elements whose content is never text.
const ALWAYS_SKIPPED: &[&str] = &["script", "style", "noscript", "template", "svg", "iframe"];

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Predicate over one element: tag name and/or a single attribute.
///
/// Textual forms: `tag`, `.class`, `#id`, `[attr=value]`, and the tag-prefixed
/// variants `tag.class`, `tag#id`, `tag[attr=value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    tag: Option<String>,
    attr: Option<(String, String)>,
}

impl FilterRule {
    pub fn parse(rule: &str) -> Result<Self, RuleError> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(RuleError::Empty);
        }
        let caps = RULE_RE.captures(rule).ok_or(RuleError::Syntax)?;
        let tag = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
        let attr = if let Some(class) = caps.get(2) {
            Some(("class".to_string(), class.as_str().to_string()))
        } else if let Some(id) = caps.get(3) {
            Some(("id".to_string(), id.as_str().to_string()))
        } else {
            caps.get(4)
                .zip(caps.get(5))
                .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.as_str().to_string()))
        };
        if tag.is_none() && attr.is_none() {
            return Err(RuleError::Syntax);
        }
        Ok(Self { tag, attr })
    }

    pub fn matches(&self, el: &Element) -> bool {
        if let Some(tag) = &self.tag {
            if !el.name().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        match &self.attr {
            None => true,
            Some((name, value)) if name == "class" => el.classes().any(|c| c == value.as_str()),
            Some((name, value)) => el.attr(name) == Some(value.as_str()),
        }
    }

    /// Number of elements in the document matching this rule.
    pub fn count_in(&self, html: &Html) -> usize {
        html.root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| self.matches(e.value()))
            .count()
    }
}

impl fmt::Display for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tag) = &self.tag {
            f.write_str(tag)?;
        }
        match &self.attr {
            Some((name, value)) if name == "class" => write!(f, ".{}", value),
            Some((name, value)) if name == "id" => write!(f, "#{}", value),
            Some((name, value)) => write!(f, "[{}={}]", name, value),
            None => Ok(()),
        }
    }
}

/// Rule table as it appears in configuration. `None` keeps the built-in list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleTable {
    #[serde(default)]
    pub include: Option<Vec<String>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
}

/// Parse a list of textual rules, reporting the first one that fails.
pub fn parse_rules<S: AsRef<str>>(rules: &[S]) -> Result<Vec<FilterRule>, (String, RuleError)> {
    rules
        .iter()
        .map(|r| FilterRule::parse(r.as_ref()).map_err(|e| (r.as_ref().to_string(), e)))
        .collect()
}

enum Step<'a> {
    Enter(ElementRef<'a>),
    Text(&'a str),
    Break,
}

/// Boilerplate remover: picks an inclusion root, then serializes its text
/// while skipping excluded subtrees.
#[derive(Debug, Clone, Default)]
pub struct StructuralFilter {
    include: Vec<FilterRule>,
    exclude: Vec<FilterRule>,
}

impl StructuralFilter {
    pub fn new(include: Vec<FilterRule>, exclude: Vec<FilterRule>) -> Self {
        Self { include, exclude }
    }

    /// First element (document order) matching any inclusion rule, or the
    /// whole document when none does.
    pub fn root<'a>(&self, html: &'a Html) -> ElementRef<'a> {
        let whole = html.root_element();
        if self.include.is_empty() {
            return whole;
        }
        whole
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|e| self.include.iter().any(|r| r.matches(e.value())))
            .unwrap_or(whole)
    }

    pub fn filter(&self, html: &Html) -> String {
        self.filter_element(self.root(html))
    }

    /// Outermost elements inside the root matching `record`, in document order.
    pub fn records<'a>(&self, html: &'a Html, record: &FilterRule) -> Vec<ElementRef<'a>> {
        let root = self.root(html);
        root.descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| record.matches(e.value()))
            .filter(|e| {
                !e.ancestors()
                    .filter_map(ElementRef::wrap)
                    .take_while(|a| a.id() != root.id())
                    .any(|a| record.matches(a.value()) || self.skips(a.value()))
            })
            .collect()
    }

    /// Collapsed text of `el`, excluded subtrees removed.
    pub fn filter_element(&self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        let mut stack = vec![Step::Enter(el)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Text(t) => out.push_str(t),
                Step::Break => out.push(' '),
                Step::Enter(el) => {
                    if BLOCK_TAGS.contains(&el.value().name()) {
                        out.push(' ');
                        stack.push(Step::Break);
                    }
                    let children: Vec<_> = el.children().collect();
                    for child in children.into_iter().rev() {
                        match child.value() {
                            Node::Text(t) => stack.push(Step::Text(&**t)),
                            Node::Element(e) if !self.skips(e) => {
                                if let Some(child_el) = ElementRef::wrap(child) {
                                    stack.push(Step::Enter(child_el));
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        collapse_whitespace(&out)
    }

    fn skips(&self, el: &Element) -> bool {
        ALWAYS_SKIPPED.contains(&el.name()) || self.exclude.iter().any(|r| r.matches(el))
    }
}

/// Text of the first descendant of `el` matching `rule`.
pub fn first_text(el: ElementRef<'_>, rule: &FilterRule) -> Option<String> {
    el.descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| rule.matches(e.value()))
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
