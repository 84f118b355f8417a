use crate::{rule::escape_regex, FilterType};
use lazy_static::lazy_static;
use regex::Regex;

const ANY_TAG: &str = "([a-zA-Z0-9]+)";

/// An element hiding selector in the subset of CSS that can be turned into a Privoxy content filter: a single class,
/// a single id, or one or more attribute selectors, each optionally prefixed by a tag name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    kind: SelectorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorKind {
    Class(String),
    Id(String),
    Attributes(Vec<Attribute>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    name: String,
    matcher: Option<(AttributeOperator, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttributeOperator {
    Exact,
    Contain,
    StartsWith,
    EndsWith,
}

impl AttributeOperator {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" => Some(Self::Exact),
            "*=" => Some(Self::Contain),
            "^=" => Some(Self::StartsWith),
            "$=" => Some(Self::EndsWith),
            _ => None,
        }
    }

    fn filter_type(self) -> FilterType {
        match self {
            Self::Exact => FilterType::AttributeExact,
            Self::Contain => FilterType::AttributeContain,
            Self::StartsWith => FilterType::AttributeStartsWith,
            Self::EndsWith => FilterType::AttributeEndsWith,
        }
    }
}

impl Selector {
    /// Parses a selector. Returns `None` for anything outside the supported subset, such as combinators,
    /// pseudo-classes or selector lists.
    pub fn parse(selector: &str) -> Option<Self> {
        lazy_static! {
            static ref CLASS: Regex = Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*)?\.([a-zA-Z0-9_-]+)$").unwrap();
            static ref ID: Regex = Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*)?#([a-zA-Z0-9_-]+)$").unwrap();
            static ref ATTRIBUTES: Regex = Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*)?((?:\[[^\]]+\])+)$").unwrap();
            static ref ATTRIBUTE: Regex = Regex::new(
                r#"\[\s*([a-zA-Z0-9_:-]+)\s*(?:([*^$]?=)\s*(?:"([^"]*)"|'([^']*)'|([^\]\s"']+))\s*)?\]"#
            )
            .unwrap();
        }

        let selector = selector.trim();
        let tag = |name: Option<regex::Match>| name.map(|m| m.as_str().to_lowercase());

        if let Some(cap) = CLASS.captures(selector) {
            return Some(Self {
                tag: tag(cap.get(1)),
                kind: SelectorKind::Class(cap[2].to_string()),
            });
        }

        if let Some(cap) = ID.captures(selector) {
            return Some(Self {
                tag: tag(cap.get(1)),
                kind: SelectorKind::Id(cap[2].to_string()),
            });
        }

        let cap = ATTRIBUTES.captures(selector)?;
        let attributes_text = &cap[2];
        let mut attributes = Vec::new();
        let mut consumed = 0;

        for attr in ATTRIBUTE.captures_iter(attributes_text) {
            let whole = attr.get(0)?;
            // every bracket must be a well-formed attribute selector, without gaps in between
            if whole.start() != consumed {
                return None;
            }
            consumed = whole.end();

            let matcher = match attr.get(2) {
                Some(op) => {
                    let value = attr.get(3).or_else(|| attr.get(4)).or_else(|| attr.get(5))?;
                    if value.as_str().is_empty() {
                        return None;
                    }
                    Some((AttributeOperator::from_token(op.as_str())?, value.as_str().to_string()))
                }
                None => None,
            };

            attributes.push(Attribute {
                name: attr[1].to_lowercase(),
                matcher,
            });
        }

        if consumed != attributes_text.len() || attributes.is_empty() {
            return None;
        }

        Some(Self {
            tag: tag(cap.get(1)),
            kind: SelectorKind::Attributes(attributes),
        })
    }

    /// Returns the filter type this selector belongs to. Combined attribute selectors take the type of their first
    /// attribute that compares a value.
    pub fn filter_type(&self) -> FilterType {
        match &self.kind {
            SelectorKind::Class(_) => FilterType::Class,
            SelectorKind::Id(_) => FilterType::Id,
            SelectorKind::Attributes(attributes) => attributes
                .iter()
                .find_map(|attr| attr.matcher.as_ref().map(|(op, _)| op.filter_type()))
                .unwrap_or(FilterType::AttributeName),
        }
    }

    /// Renders the selector as a Privoxy filter job that removes every matching element along with its content.
    pub fn to_filter_job(&self) -> String {
        let tag = match &self.tag {
            Some(tag) => format!("({})", escape(tag)),
            None => ANY_TAG.to_string(),
        };

        let conditions: Vec<String> = match &self.kind {
            SelectorKind::Class(class) => vec![format!(
                r#"\sclass=["'](?:[^"']*\s)?{}(?:\s[^"']*)?["']"#,
                escape(class)
            )],
            SelectorKind::Id(id) => vec![format!(r#"\sid=["']{}["']"#, escape(id))],
            SelectorKind::Attributes(attributes) => attributes.iter().map(Attribute::condition).collect(),
        };

        let mut job = format!("s@<{}", tag);
        for condition in conditions {
            job.push_str("[^>]*");
            job.push_str(&condition);
        }
        job.push_str(r"[^>]*>.*</\1>@@gU");
        job
    }
}

impl Attribute {
    fn condition(&self) -> String {
        let name = escape(&self.name);
        match &self.matcher {
            None => format!(r"\s{}(?=[\s=/>])", name),
            Some((op, value)) => {
                let value = escape(value);
                match op {
                    AttributeOperator::Exact => format!(r#"\s{}=["']{}["']"#, name, value),
                    AttributeOperator::Contain => format!(r#"\s{}=["'][^"']*{}"#, name, value),
                    AttributeOperator::StartsWith => format!(r#"\s{}=["']{}"#, name, value),
                    AttributeOperator::EndsWith => format!(r#"\s{}=["'][^"']*{}["']"#, name, value),
                }
            }
        }
    }
}

// '@' is the job's delimiter and '#' starts a comment in Privoxy's files
fn escape(text: &str) -> String {
    escape_regex(text).replace('@', r"\@").replace('#', r"\#")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::Selector;
    use crate::FilterType;
    use fancy_regex::Regex;

    /// Applies a filter job to a document. The job's ungreedy flag only changes the element content's `.*`, which is
    /// made lazy instead.
    pub(crate) fn apply_job(job: &str, document: &str) -> String {
        let pattern = job
            .strip_prefix("s@")
            .and_then(|rest| rest.strip_suffix("@@gU"))
            .expect("job is not a removal job");
        let pattern = pattern.replace(r">.*</\1>", r">.*?</\1>");
        let re = Regex::new(&pattern).expect("job pattern is not a valid regex");
        re.replace_all(document, "").into_owned()
    }

    #[test]
    fn parse_class() {
        let selector = Selector::parse(".ad_970x250").unwrap();
        assert_eq!(selector.filter_type(), FilterType::Class);

        let selector = Selector::parse("div.AdRight2").unwrap();
        assert_eq!(selector.filter_type(), FilterType::Class);
        assert_eq!(selector.tag.as_deref(), Some("div"));
    }

    #[test]
    fn parse_id() {
        let selector = Selector::parse("#sellwild-loader").unwrap();
        assert_eq!(selector.filter_type(), FilterType::Id);
    }

    #[test]
    fn parse_attributes() {
        let cases = [
            ("[data-taboola-options]", FilterType::AttributeName),
            ("[data-freestar-ad][id]", FilterType::AttributeName),
            (r#"[data-role="tile-ads-module"]"#, FilterType::AttributeExact),
            (r#"[onclick*="content.ad/"]"#, FilterType::AttributeContain),
            (r#"[class^="adDisplay-module_"]"#, FilterType::AttributeStartsWith),
            (r#"a[href$=".gif"]"#, FilterType::AttributeEndsWith),
            (r#"[id][data-role='ad']"#, FilterType::AttributeExact),
        ];

        for (text, expected) in cases {
            let selector = Selector::parse(text).unwrap_or_else(|| panic!("failed to parse {}", text));
            assert_eq!(selector.filter_type(), expected, "{}", text);
        }
    }

    #[test]
    fn reject_unsupported_selectors() {
        for text in [
            "div > .ad",
            ".ad, .banner",
            ".ad:not(.x)",
            "div .ad",
            ".ad.banner",
            "[data-x~=\"y\"]",
            "[data-x=\"\"]",
            "[data-x]junk",
            "",
        ] {
            assert!(Selector::parse(text).is_none(), "{}", text);
        }
    }

    #[test]
    fn class_job() {
        let job = Selector::parse(".ad").unwrap().to_filter_job();
        assert_eq!(
            job,
            r#"s@<([a-zA-Z0-9]+)[^>]*\sclass=["'](?:[^"']*\s)?ad(?:\s[^"']*)?["'][^>]*>.*</\1>@@gU"#
        );
    }

    #[test]
    fn job_escapes_delimiter() {
        let job = Selector::parse(r#"[href^="mailto:ads@example.com"]"#).unwrap().to_filter_job();
        assert!(job.contains(r"ads\@example\.com"));
    }

    #[test]
    fn job_escapes_comment_marker() {
        let job = Selector::parse(r##"a[href^="#ad-"]"##).unwrap().to_filter_job();
        assert_eq!(job, r#"s@<(a)[^>]*\shref=["']\#ad-[^>]*>.*</\1>@@gU"#);
        assert_eq!(job.matches('#').count(), job.matches(r"\#").count());
    }

    #[test]
    fn presence_needs_whole_attribute_name() {
        let document = concat!(
            r#"<div id="x">gone</div>"#,
            r#"<div id>gone</div>"#,
            r#"<div id-foo="x">kept</div>"#,
            r#"<div data-id="x">kept</div>"#,
            r#"<img id/>"#,
        );

        let job = Selector::parse("[id]").unwrap().to_filter_job();
        assert!(job.contains(r"\sid(?=[\s=/>])"), "{}", job);

        let filtered = apply_job(&job, document);
        assert_eq!(filtered, concat!(r#"<div id-foo="x">kept</div>"#, r#"<div data-id="x">kept</div>"#, r#"<img id/>"#));
    }

    #[test]
    fn jobs_remove_only_matching_elements() {
        let document = concat!(
            r#"<div class="ad_970x250">gone</div>"#,
            r#"<div class="x AdRight2 y">gone</div>"#,
            r#"<div id="sellwild-loader">gone</div>"#,
            r#"<span class="ajlkl">kept</span>"#,
            r#"<div class="adDisplay-modul">kept</div>"#,
            r#"<p data-freestar-ad id="f">gone</p>"#,
            r#"<p data-freestar-ad>kept</p>"#,
            r#"<a onclick="location.href='https://1337x.vpnonly.site/go'">gone</a>"#,
        );

        let mut filtered = document.to_string();
        for text in [
            ".ad_970x250",
            ".AdRight2",
            "#sellwild-loader",
            "[data-freestar-ad][id]",
            r#"[onclick^="location.href='https://1337x.vpnonly.site/"]"#,
            r#"[class^="adDisplay-module_"]"#,
        ] {
            filtered = apply_job(&Selector::parse(text).unwrap().to_filter_job(), &filtered);
        }

        assert!(!filtered.contains("gone"), "{}", filtered);
        assert_eq!(filtered.matches("kept").count(), 3, "{}", filtered);
    }
}
