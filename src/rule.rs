use crate::Selector;
use lazy_static::lazy_static;
use regex::Regex;

const SEPARATOR: &str = "(?:[/?&=:;]|$)";

/// A single line of an AdblockPlus list, classified by its syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Empty lines, comments and the list header.
    Ignored,
    /// Block requests to URLs matching the Privoxy pattern.
    Block {
        /// The translated Privoxy URL pattern.
        pattern: String,
        /// The rule only applies to images.
        image: bool,
    },
    /// Never block requests to URLs matching the Privoxy pattern.
    Exception {
        /// The translated Privoxy URL pattern.
        pattern: String,
        /// The rule only applies to images.
        image: bool,
    },
    /// Hide elements matching the selector, either everywhere or on the given domains. Domains prefixed with `~` are
    /// excluded.
    ElementHide {
        /// The domains the rule is restricted to.
        domains: Vec<String>,
        /// The selector of the hidden elements.
        selector: Selector,
    },
    /// Don't hide elements matching the selector on the given domains.
    ElementHideException {
        /// The domains the exception applies to.
        domains: Vec<String>,
        /// The selector of the elements.
        selector: Selector,
    },
    /// A rule that cannot be expressed in Privoxy's configuration.
    Unsupported(
        /// Why the rule is not supported.
        &'static str,
    ),
}

impl Rule {
    /// Classifies a single list line.
    pub fn parse(line: &str) -> Rule {
        lazy_static! {
            static ref ELEMENT: Regex = Regex::new(r"^([^\s#/|@$]*)(#@?[?$%]?#)(.+)$").unwrap();
        }

        let line = line.trim();
        if line.is_empty() || line.starts_with('!') || line.starts_with("[Adblock") {
            return Rule::Ignored;
        }

        if let Some(cap) = ELEMENT.captures(line) {
            let exception = match &cap[2] {
                "##" => false,
                "#@#" => true,
                _ => return Rule::Unsupported("extended element hiding rule"),
            };

            let domains = parse_domains(&cap[1]);
            return match Selector::parse(&cap[3]) {
                Some(selector) if exception => Rule::ElementHideException { domains, selector },
                Some(selector) => Rule::ElementHide { domains, selector },
                None => Rule::Unsupported("unsupported element hiding selector"),
            };
        }

        if line.contains("$$") {
            return Rule::Unsupported("HTML filtering rule");
        }

        let (exception, line) = match line.strip_prefix("@@") {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let (body, image) = match split_options(line) {
            Ok(split) => split,
            Err(reason) => return Rule::Unsupported(reason),
        };

        if body.len() > 2 && body.starts_with('/') && body.ends_with('/') {
            return Rule::Unsupported("regular expression rule");
        }

        let pattern = match translate_pattern(body) {
            Some(pattern) => pattern,
            None => return Rule::Unsupported("unsupported URL pattern"),
        };

        if exception {
            Rule::Exception { pattern, image }
        } else {
            Rule::Block { pattern, image }
        }
    }
}

fn parse_domains(domains: &str) -> Vec<String> {
    domains
        .split(',')
        .map(|domain| domain.trim().to_lowercase())
        .filter(|domain| !domain.is_empty())
        .collect()
}

/// Splits a network rule into its pattern and whether it only applies to images. `image` is the only option Privoxy
/// can express.
fn split_options(line: &str) -> Result<(&str, bool), &'static str> {
    let (body, options) = match line.rsplit_once('$') {
        Some((body, options)) if !options.is_empty() && !options.contains('/') => (body, options),
        _ => return Ok((line, false)),
    };

    let mut image = false;
    for option in options.split(',') {
        match option.trim() {
            "image" => image = true,
            _ => return Err("rule options"),
        }
    }

    Ok((body, image))
}

/// Translates an AdblockPlus network pattern into a Privoxy URL pattern.
fn translate_pattern(body: &str) -> Option<String> {
    if body.contains(|c: char| c.is_whitespace() || c == '#') {
        return None;
    }

    if let Some(rest) = body.strip_prefix("||") {
        return translate_anchored(rest, true);
    }

    if let Some(rest) = body.strip_prefix('|') {
        lazy_static! {
            static ref SCHEME: Regex = Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").unwrap();
        }

        let scheme = SCHEME.find(rest)?;
        return translate_anchored(&rest[scheme.end()..], false);
    }

    let body = body.trim_start_matches('*');
    if body.trim_matches(|c: char| c == '*' || c == '^' || c == '|').is_empty() {
        // would match every URL
        return None;
    }

    match body.strip_prefix('/') {
        Some(rest) => Some(format!("/(?:.*/)?{}", translate_path(rest))),
        None => Some(format!("/.*{}", translate_path(body))),
    }
}

/// Translates a pattern anchored at the start of the host. With `subdomains` the pattern also matches every
/// subdomain of the host.
fn translate_anchored(rest: &str, subdomains: bool) -> Option<String> {
    let host_end = rest.find(|c: char| matches!(c, '/' | '^' | '|' | '?' | ':')).unwrap_or(rest.len());
    let host = rest[..host_end].to_lowercase();
    let remainder = &rest[host_end..];

    if host.is_empty()
        || !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '*'))
    {
        return None;
    }

    let path = match remainder {
        "" | "^" | "|" | "^|" => String::new(),
        _ => match remainder.chars().next() {
            Some('/') => translate_path(remainder),
            Some('^') => format!("/{}", translate_path(remainder[1..].trim_start_matches('/'))),
            Some('?') => format!("/{}", translate_path(remainder)),
            _ => return None,
        },
    };

    Some(format!("{}{}{}", if subdomains { "." } else { "" }, host, path))
}

/// Translates the path part of a pattern into a Privoxy path regex.
fn translate_path(path: &str) -> String {
    let path = path.trim_end_matches('*');
    let mut translated = String::with_capacity(path.len() * 2);
    let last = path.len().saturating_sub(1);

    for (idx, c) in path.char_indices() {
        match c {
            '*' => translated.push_str(".*"),
            '^' => translated.push_str(SEPARATOR),
            '|' if idx == last => translated.push('$'),
            c => push_escaped(&mut translated, c),
        }
    }

    translated
}

/// Escapes the PCRE metacharacters in the given text.
pub(crate) fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        push_escaped(&mut escaped, c);
    }
    escaped
}

fn push_escaped(out: &mut String, c: char) {
    if matches!(
        c,
        '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
    ) {
        out.push('\\');
    }
    out.push(c);
}

#[cfg(test)]
mod tests {
    use super::Rule;
    use crate::{FilterType, Selector};

    fn block(pattern: &str) -> Rule {
        Rule::Block {
            pattern: pattern.to_string(),
            image: false,
        }
    }

    #[test]
    fn ignore_comments_and_header() {
        for line in ["", "   ", "! Title: EasyList", "[Adblock Plus 2.0]"] {
            assert_eq!(Rule::parse(line), Rule::Ignored, "{:?}", line);
        }
    }

    #[test]
    fn domain_anchor() {
        assert_eq!(Rule::parse("||pubfeed.linkby.com^"), block(".pubfeed.linkby.com"));
        assert_eq!(Rule::parse("||Andrwe.org/ads/"), block(".andrwe.org/ads/"));
        assert_eq!(
            Rule::parse("||example.com^banner"),
            block(".example.com/banner")
        );
        assert_eq!(
            Rule::parse("||example.com/ads/*.gif|"),
            block(r".example.com/ads/.*\.gif$")
        );
    }

    #[test]
    fn address_anchor() {
        assert_eq!(
            Rule::parse("|https://ads.example.com/track?id="),
            block(r"ads.example.com/track\?id=")
        );
        assert!(matches!(Rule::parse("|/path"), Rule::Unsupported(_)));
    }

    #[test]
    fn unanchored_patterns() {
        assert_eq!(Rule::parse("/banner/ad-"), block("/(?:.*/)?banner/ad-"));
        assert_eq!(
            Rule::parse("-ad-banner."),
            block(r"/.*-ad-banner\.")
        );
        assert_eq!(
            Rule::parse("&ad_type=^"),
            block("/.*&ad_type=(?:[/?&=:;]|$)")
        );
    }

    #[test]
    fn exceptions_and_image_option() {
        assert_eq!(
            Rule::parse("@@||cdn.example.com/ads/logo.png$image"),
            Rule::Exception {
                pattern: r".cdn.example.com/ads/logo\.png".to_string(),
                image: true,
            }
        );
        assert_eq!(
            Rule::parse("||ads.example.com/img/$image"),
            Rule::Block {
                pattern: ".ads.example.com/img/".to_string(),
                image: true,
            }
        );
    }

    #[test]
    fn unsupported_rules() {
        for line in [
            "||example.com^$third-party",
            "@@||example.com^$document",
            r"/^https?:\/\/s3\.*.*\.amazonaws\.com\/[a-f0-9]{45,}\/[a-f,0-9]{8,10}$/$script,third-party",
            "/banner[0-9]+/",
            "example.com#?#div:-abp-has(.ad)",
            "example.com#$#abort-on-property-read ads",
            "example.com$$script[data-src]",
            "##div > .ad",
            "*",
            "||",
            "||exa mple.com^",
        ] {
            assert!(matches!(Rule::parse(line), Rule::Unsupported(_)), "{}", line);
        }
    }

    #[test]
    fn element_hiding() {
        match Rule::parse("##.ad_970x250") {
            Rule::ElementHide { domains, selector } => {
                assert!(domains.is_empty());
                assert_eq!(selector.filter_type(), FilterType::Class);
            }
            other => panic!("unexpected rule {:?}", other),
        }

        assert_eq!(
            Rule::parse("example.com,~Sub.Example.com###sellwild-loader"),
            Rule::ElementHide {
                domains: vec!["example.com".to_string(), "~sub.example.com".to_string()],
                selector: Selector::parse("#sellwild-loader").unwrap(),
            }
        );

        assert_eq!(
            Rule::parse("example.com#@#[data-taboola-options]"),
            Rule::ElementHideException {
                domains: vec!["example.com".to_string()],
                selector: Selector::parse("[data-taboola-options]").unwrap(),
            }
        );
    }
}
