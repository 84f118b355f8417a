use crate::{atomic, FilterType, Result, Rule, Selector};
use chrono::Local;
use std::{
    collections::{BTreeMap, HashSet},
    fmt::Write,
    path::{Path, PathBuf},
};

/// The extension of generated action files.
pub const ACTION_EXTENSION: &str = "script.action";
/// The extension of generated filter files.
pub const FILTER_EXTENSION: &str = "script.filter";

/// Counts of how a list's rules were converted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConversionStats {
    /// URL blocking rules.
    pub blocked: usize,
    /// URL exception rules.
    pub exceptions: usize,
    /// Element hiding rules and their exceptions.
    pub hidden: usize,
    /// Rules that couldn't be converted.
    pub skipped: usize,
}

impl ConversionStats {
    /// Returns the amount of converted rules.
    pub fn converted(&self) -> usize {
        self.blocked + self.exceptions + self.hidden
    }
}

/// A list that was converted into a Privoxy action and filter file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedList {
    /// The list's name.
    pub name: String,
    /// Path of the generated action file.
    pub action_file: PathBuf,
    /// Path of the generated filter file.
    pub filter_file: PathBuf,
    /// How the list's rules were converted.
    pub stats: ConversionStats,
}

/// What happened to a rule added into a [`ListOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    /// The rule is part of the output.
    Converted,
    /// The rule carries no meaning, such as a comment.
    Ignored,
    /// The rule was dropped.
    Skipped(
        /// Why the rule was dropped.
        &'static str,
    ),
}

// keeps insertion order while dropping duplicates
#[derive(Debug, Default)]
struct Section {
    entries: Vec<String>,
    seen: HashSet<String>,
}

impl Section {
    fn push(&mut self, entry: String) {
        if self.seen.insert(entry.clone()) {
            self.entries.push(entry);
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct SiteFilter {
    domains: Vec<String>,
    excluded: Vec<String>,
    jobs: Section,
}

/// The Privoxy configuration generated from a single list.
///
/// Rules are added one by one with [`add_rule`](ListOutput::add_rule). URL rules end up in the action file as
/// `block` sections. Element hiding rules become filter jobs in the filter file, each filter enabled for the
/// matching URLs in the action file:
/// - Generic rules of each [filter type](FilterType) are collected into a filter named `<list>_<type>` that's
///   enabled for every URL.
/// - Rules restricted to domains are collected into filters named `<list>_site_<n>`, one for every distinct set of
///   domains, enabled only for those domains and disabled again for their excluded subdomains.
/// - Exceptions and excluded domains disable the generic filter of the rule's type for those domains.
#[derive(Debug)]
pub struct ListOutput {
    name: String,
    source: String,
    filter_types: Vec<FilterType>,
    block: Section,
    block_image: Section,
    exception: Section,
    exception_image: Section,
    generic: BTreeMap<FilterType, Section>,
    generic_exceptions: BTreeMap<FilterType, Section>,
    sites: Vec<SiteFilter>,
    stats: ConversionStats,
}

impl ListOutput {
    /// Returns a new empty output for the list with the given name and source. Element hiding rules are only
    /// converted for the given filter types.
    pub fn new<N, S>(name: N, source: S, filter_types: &[FilterType]) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            source: source.into(),
            filter_types: filter_types.to_vec(),
            block: Section::default(),
            block_image: Section::default(),
            exception: Section::default(),
            exception_image: Section::default(),
            generic: BTreeMap::new(),
            generic_exceptions: BTreeMap::new(),
            sites: Vec::new(),
            stats: ConversionStats::default(),
        }
    }

    /// Returns the conversion counts so far.
    pub fn stats(&self) -> ConversionStats {
        self.stats
    }

    /// Adds a classified rule into the output.
    pub fn add_rule(&mut self, rule: Rule) -> RuleOutcome {
        let outcome = match rule {
            Rule::Ignored => return RuleOutcome::Ignored,
            Rule::Unsupported(reason) => RuleOutcome::Skipped(reason),
            Rule::Block { pattern, image } => {
                self.stats.blocked += 1;
                let section = if image { &mut self.block_image } else { &mut self.block };
                section.push(pattern);
                RuleOutcome::Converted
            }
            Rule::Exception { pattern, image } => {
                self.stats.exceptions += 1;
                let section = if image {
                    &mut self.exception_image
                } else {
                    &mut self.exception
                };
                section.push(pattern);
                RuleOutcome::Converted
            }
            Rule::ElementHide { domains, selector } => self.add_hide(domains, &selector),
            Rule::ElementHideException { domains, selector } => self.add_hide_exception(domains, &selector),
        };

        if let RuleOutcome::Skipped(_) = outcome {
            self.stats.skipped += 1;
        }

        outcome
    }

    fn add_hide(&mut self, domains: Vec<String>, selector: &Selector) -> RuleOutcome {
        let ty = selector.filter_type();
        if !self.filter_types.contains(&ty) {
            return RuleOutcome::Skipped("filter type not enabled");
        }

        let (excluded, included): (Vec<String>, Vec<String>) =
            domains.into_iter().partition(|domain| domain.starts_with('~'));

        if included.is_empty() {
            self.generic.entry(ty).or_default().push(selector.to_filter_job());

            let exceptions = self.generic_exceptions.entry(ty).or_default();
            for domain in excluded {
                exceptions.push(domain_pattern(&domain[1..]));
            }
        } else {
            let excluded: Vec<String> = excluded
                .iter()
                .map(|domain| domain.trim_start_matches('~').to_string())
                .collect();
            let idx = match self
                .sites
                .iter()
                .position(|site| site.domains == included && site.excluded == excluded)
            {
                Some(idx) => idx,
                None => {
                    self.sites.push(SiteFilter {
                        domains: included,
                        excluded,
                        jobs: Section::default(),
                    });
                    self.sites.len() - 1
                }
            };
            self.sites[idx].jobs.push(selector.to_filter_job());
        }

        self.stats.hidden += 1;
        RuleOutcome::Converted
    }

    fn add_hide_exception(&mut self, domains: Vec<String>, selector: &Selector) -> RuleOutcome {
        let ty = selector.filter_type();
        if !self.filter_types.contains(&ty) {
            return RuleOutcome::Skipped("filter type not enabled");
        }

        let domains: Vec<&String> = domains.iter().filter(|domain| !domain.starts_with('~')).collect();
        if domains.is_empty() {
            return RuleOutcome::Skipped("element hiding exception without domains");
        }

        let exceptions = self.generic_exceptions.entry(ty).or_default();
        for domain in domains {
            exceptions.push(domain_pattern(domain));
        }

        self.stats.hidden += 1;
        RuleOutcome::Converted
    }

    fn filter_name(&self, ty: FilterType) -> String {
        format!("{}_{}", self.name, ty)
    }

    fn site_filter_name(&self, idx: usize) -> String {
        format!("{}_site_{}", self.name, idx + 1)
    }

    /// Renders the Privoxy action file.
    pub fn render_action(&self) -> String {
        let mut out = self.header(ACTION_EXTENSION);

        let blocks = [
            (format!("{{ +block{{{}}} }}", self.name), &self.block),
            (format!("{{ +block{{{}}} +handle-as-image }}", self.name), &self.block_image),
            (String::from("{ -block }"), &self.exception),
            (String::from("{ -block +handle-as-image }"), &self.exception_image),
        ];
        for (actions, section) in blocks {
            write_section(&mut out, &actions, &section.entries);
        }

        for (ty, jobs) in &self.generic {
            if !jobs.is_empty() {
                write_section(
                    &mut out,
                    &format!("{{ +filter{{{}}} }}", self.filter_name(*ty)),
                    &[String::from("/")],
                );
            }
        }

        for (ty, domains) in &self.generic_exceptions {
            write_section(
                &mut out,
                &format!("{{ -filter{{{}}} }}", self.filter_name(*ty)),
                &domains.entries,
            );
        }

        for (idx, site) in self.sites.iter().enumerate() {
            let domains: Vec<String> = site.domains.iter().map(|domain| domain_pattern(domain)).collect();
            write_section(
                &mut out,
                &format!("{{ +filter{{{}}} }}", self.site_filter_name(idx)),
                &domains,
            );

            let excluded: Vec<String> = site.excluded.iter().map(|domain| domain_pattern(domain)).collect();
            write_section(
                &mut out,
                &format!("{{ -filter{{{}}} }}", self.site_filter_name(idx)),
                &excluded,
            );
        }

        out
    }

    /// Renders the Privoxy filter file.
    pub fn render_filter(&self) -> String {
        let mut out = self.header(FILTER_EXTENSION);

        for (ty, jobs) in &self.generic {
            let header = format!(
                "FILTER: {} Tag filter of {}: {}",
                self.filter_name(*ty),
                self.name,
                ty.description()
            );
            write_section(&mut out, &header, &jobs.entries);
        }

        for (idx, site) in self.sites.iter().enumerate() {
            let header = format!(
                "FILTER: {} Tag filter of {} for {}",
                self.site_filter_name(idx),
                self.name,
                site.domains.join(", ")
            );
            write_section(&mut out, &header, &site.jobs.entries);
        }

        out
    }

    /// Writes the action and filter files into the given directory.
    pub fn write(self, dir: &Path) -> Result<ConvertedList> {
        let action_file = dir.join(format!("{}.{}", self.name, ACTION_EXTENSION));
        let filter_file = dir.join(format!("{}.{}", self.name, FILTER_EXTENSION));

        atomic::write_atomic(&action_file, self.render_action().as_bytes())?;
        atomic::write_atomic(&filter_file, self.render_filter().as_bytes())?;

        Ok(ConvertedList {
            name: self.name,
            action_file,
            filter_file,
            stats: self.stats,
        })
    }

    fn header(&self, extension: &str) -> String {
        format!(
            "# {}.{} generated from {}\n# {}\n",
            self.name,
            extension,
            self.source,
            get_generated_at_comment()
        )
    }
}

fn write_section(out: &mut String, header: &str, entries: &[String]) {
    if entries.is_empty() {
        return;
    }

    // writing into a string never fails
    let _ = writeln!(out, "\n{}", header);
    for entry in entries {
        let _ = writeln!(out, "{}", entry);
    }
}

// a leading dot matches the domain and all its subdomains
fn domain_pattern(domain: &str) -> String {
    format!(".{}", domain.trim_start_matches('.'))
}

fn get_generated_at_comment() -> String {
    format!(
        "Generated at {} with {} v{}",
        Local::now(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::{ListOutput, RuleOutcome};
    use crate::{selector::tests::apply_job, FilterType, Rule};

    const LIST: &str = r#"[Adblock Plus 2.0]
! Title: test list
||andrwe.org/ads/
||andrwe.jp/ads/
||pubfeed.linkby.com^
||pubfeed.linkby.com^
||ads.example.com/img/$image
@@||duckduckgo.com^
@@||example.com/logo.png$image
||example.com^$third-party
##.ad_970x250
###sellwild-loader
##.AdRight2
##[data-taboola-options]
##[data-freestar-ad][id]
##[data-role="tile-ads-module"]
##[onclick*="content.ad/"]
##[class^="adDisplay-module_"]
##[onclick^="location.href='https://1337x.vpnonly.site/"]
~example.org##.banner
example.com,example.net##.sponsor
example.com,example.net##.promo
other.com##.promo
example.org#@#.ad_970x250
#@#.ad_970x250
##div > .nested
"#;

    fn convert(filter_types: &[FilterType]) -> ListOutput {
        let mut output = ListOutput::new("test", "https://example.com/test.txt", filter_types);
        for line in LIST.lines() {
            output.add_rule(Rule::parse(line));
        }
        output
    }

    fn body(rendered: &str) -> Vec<&str> {
        rendered.lines().filter(|line| !line.starts_with('#')).collect()
    }

    #[test]
    fn action_file() {
        let output = convert(&FilterType::ALL);
        let action = output.render_action();

        let expected = [
            "",
            "{ +block{test} }",
            ".andrwe.org/ads/",
            ".andrwe.jp/ads/",
            ".pubfeed.linkby.com",
            "",
            "{ +block{test} +handle-as-image }",
            ".ads.example.com/img/",
            "",
            "{ -block }",
            ".duckduckgo.com",
            "",
            "{ -block +handle-as-image }",
            r".example.com/logo\.png",
            "",
            "{ +filter{test_attribute_global_name} }",
            "/",
            "",
            "{ +filter{test_attribute_global_exact} }",
            "/",
            "",
            "{ +filter{test_attribute_global_contain} }",
            "/",
            "",
            "{ +filter{test_attribute_global_startswith} }",
            "/",
            "",
            "{ +filter{test_class_global} }",
            "/",
            "",
            "{ +filter{test_id_global} }",
            "/",
            "",
            "{ -filter{test_class_global} }",
            ".example.org",
            "",
            "{ +filter{test_site_1} }",
            ".example.com",
            ".example.net",
            "",
            "{ +filter{test_site_2} }",
            ".other.com",
        ];
        assert_eq!(body(&action), expected);
    }

    #[test]
    fn filter_file() {
        let output = convert(&FilterType::ALL);
        let filter = output.render_filter();

        assert!(filter.contains("\nFILTER: test_class_global Tag filter of test: elements with a blocked class\n"));
        assert!(filter.contains("\nFILTER: test_site_1 Tag filter of test for example.com, example.net\n"));
        assert_eq!(filter.matches("FILTER: ").count(), 8);
        assert_eq!(filter.lines().filter(|line| line.starts_with("s@")).count(), 13);
    }

    #[test]
    fn stats() {
        let stats = convert(&FilterType::ALL).stats();
        assert_eq!(stats.blocked, 5);
        assert_eq!(stats.exceptions, 2);
        assert_eq!(stats.hidden, 14);
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.converted(), 21);
    }

    #[test]
    fn site_filters_keep_excluded_domains() {
        let mut output = ListOutput::new("t", "https://example.com/t.txt", &FilterType::ALL);
        for line in [
            "example.com,~sub.example.com##.ad",
            "example.com,~sub.example.com##.banner",
            "example.com##.promo",
        ] {
            assert_eq!(output.add_rule(Rule::parse(line)), RuleOutcome::Converted, "{}", line);
        }

        let expected = [
            "",
            "{ +filter{t_site_1} }",
            ".example.com",
            "",
            "{ -filter{t_site_1} }",
            ".sub.example.com",
            "",
            "{ +filter{t_site_2} }",
            ".example.com",
        ];
        assert_eq!(body(&output.render_action()), expected);

        let filter = output.render_filter();
        assert_eq!(filter.matches("FILTER: t_site_").count(), 2);
        assert_eq!(filter.lines().filter(|line| line.starts_with("s@")).count(), 3);
    }

    #[test]
    fn disabled_filter_types_are_skipped() {
        let output = convert(&[FilterType::Class]);
        let action = output.render_action();

        assert!(action.contains("{ +filter{test_class_global} }"));
        assert!(!action.contains("test_id_global"));
        assert!(!action.contains("attribute_global"));
        assert!(output.render_filter().contains("FILTER: test_class_global"));
        assert_eq!(
            ListOutput::new("x", "x", &[FilterType::Class]).add_rule(Rule::parse("###banner")),
            RuleOutcome::Skipped("filter type not enabled")
        );
    }

    #[test]
    fn generic_filters_clean_document() {
        let document = concat!(
            "<html><body>\n",
            r#"<div class="ad_970x250">removed</div>"#,
            "\n",
            r#"<div id="sellwild-loader">removed</div>"#,
            "\n",
            r#"<div class="AdRight2 wide">removed</div>"#,
            "\n",
            r#"<div data-taboola-options="{}">removed</div>"#,
            "\n",
            r#"<div data-freestar-ad id="fs">removed</div>"#,
            "\n",
            r#"<section data-role="tile-ads-module">removed</section>"#,
            "\n",
            r#"<a onclick="content.ad/">removed</a>"#,
            "\n",
            r#"<div class="adDisplay-module_foobar">removed</div>"#,
            "\n",
            r#"<a onclick="location.href='https://1337x.vpnonly.site/'">removed</a>"#,
            "\n",
            r#"<p class="ajlkl">survivor</p>"#,
            "\n",
            r#"<div class="adDisplay-modul">survivor</div>"#,
            "\n",
            "</body></html>\n",
        );

        let filter = convert(&FilterType::ALL).render_filter();
        let mut filtered = document.to_string();
        let mut in_generic = false;
        for line in filter.lines() {
            if line.starts_with("FILTER: ") {
                in_generic = !line.contains("_site_");
            } else if in_generic && line.starts_with("s@") {
                filtered = apply_job(line, &filtered);
            }
        }

        assert!(!filtered.contains("removed"), "{}", filtered);
        assert_eq!(filtered.matches("survivor").count(), 2, "{}", filtered);
    }

    #[test]
    fn write_files() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let converted = convert(&FilterType::ALL).write(dir.path()).expect("failed to write output");

        assert_eq!(converted.action_file, dir.path().join("test.script.action"));
        assert_eq!(converted.filter_file, dir.path().join("test.script.filter"));
        assert!(std::fs::read_to_string(&converted.action_file)
            .unwrap()
            .starts_with("# test.script.action generated from https://example.com/test.txt\n"));
        assert!(converted.filter_file.is_file());
    }
}
