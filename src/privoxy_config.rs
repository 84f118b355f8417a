use crate::{atomic, BlocklistError, ConvertedList, Result};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

const BEGIN_MARKER: &str = "# privoxy-blocklist begin ";
const END_MARKER: &str = "# privoxy-blocklist end ";
// set on the first begin marker when a newline had to be added to the end of the file before the stanzas
const EOL_FLAG: &str = "+eol";
const DIRECTIVES: [&str; 2] = ["actionsfile", "filterfile"];

/// A block of lines in the Privoxy config that belongs to a single converted list.
///
/// A stanza is delimited by marker comments naming the list, so it can be found again and replaced or removed
/// without touching anything else in the config:
/// ```ignore
/// # privoxy-blocklist begin easylist
/// actionsfile /etc/privoxy/easylist.script.action
/// filterfile /etc/privoxy/easylist.script.filter
/// # privoxy-blocklist end easylist
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStanza {
    list: String,
    body: Vec<String>,
}

/// A Privoxy config with all stanzas removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stripped {
    /// The config without any stanzas.
    pub content: String,
    /// Byte offset in the content where the first stanza was, if there were any.
    pub position: Option<usize>,
    /// The removed stanzas.
    pub stanzas: Vec<ConfigStanza>,
}

impl ConfigStanza {
    /// Returns a new stanza for the given list with the given lines.
    pub fn new<S>(list: S, body: Vec<String>) -> Self
    where
        S: Into<String>,
    {
        Self {
            list: list.into(),
            body,
        }
    }

    /// Returns a stanza that activates the given action and filter file.
    pub fn for_files<S>(list: S, action_file: &Path, filter_file: &Path) -> Self
    where
        S: Into<String>,
    {
        Self::new(
            list,
            vec![
                format!("actionsfile {}", action_file.display()),
                format!("filterfile {}", filter_file.display()),
            ],
        )
    }

    /// Returns the name of the list the stanza belongs to.
    pub fn list(&self) -> &str {
        &self.list
    }

    /// Returns the stanza's lines between its markers.
    pub fn body(&self) -> &[String] {
        &self.body
    }

    /// Returns the files referenced by the stanza's `actionsfile` and `filterfile` directives.
    pub fn referenced_files(&self) -> Vec<PathBuf> {
        self.body
            .iter()
            .filter_map(|line| directive_value(line))
            .map(PathBuf::from)
            .collect()
    }

    fn render(&self, out: &mut String, eol_flag: bool) {
        out.push_str(BEGIN_MARKER);
        out.push_str(&self.list);
        if eol_flag {
            out.push(' ');
            out.push_str(EOL_FLAG);
        }
        out.push('\n');

        for line in &self.body {
            out.push_str(line);
            out.push('\n');
        }

        out.push_str(END_MARKER);
        out.push_str(&self.list);
        out.push('\n');
    }
}

impl From<&ConvertedList> for ConfigStanza {
    fn from(list: &ConvertedList) -> Self {
        Self::for_files(list.name.as_str(), &list.action_file, &list.filter_file)
    }
}

/// Removes every stanza from the given config. The stanzas are removed as whole lines, so the result is exactly the
/// config as it was before the stanzas were inserted.
///
/// # Errors
///
/// Returns [`BlocklistError::MalformedConfig`] if a stanza is unterminated, nested in another or its end marker
/// doesn't match its begin marker.
pub fn strip_stanzas(content: &str) -> Result<Stripped> {
    let mut stripped = String::with_capacity(content.len());
    let mut position = None;
    let mut stanzas = Vec::new();
    let mut current: Option<(String, Vec<String>)> = None;
    let mut added_eol = false;
    let mut last_end = None;

    for (idx, line) in content.split_inclusive('\n').enumerate() {
        let text = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
        let line_number = idx + 1;

        match current.take() {
            None => {
                if let Some((list, eol)) = parse_begin(text) {
                    position.get_or_insert(stripped.len());
                    added_eol |= eol;
                    current = Some((list.to_string(), Vec::new()));
                } else if let Some(list) = parse_end(text) {
                    return Err(BlocklistError::MalformedConfig(format!(
                        "line {}: end of '{}' without a beginning",
                        line_number, list
                    )));
                } else {
                    stripped.push_str(line);
                }
            }
            Some((list, mut body)) => {
                if let Some(end) = parse_end(text) {
                    if end != list {
                        return Err(BlocklistError::MalformedConfig(format!(
                            "line {}: end of '{}' inside '{}'",
                            line_number, end, list
                        )));
                    }

                    stanzas.push(ConfigStanza::new(list, body));
                    last_end = Some(stripped.len());
                } else if let Some((nested, _)) = parse_begin(text) {
                    return Err(BlocklistError::MalformedConfig(format!(
                        "line {}: beginning of '{}' inside '{}'",
                        line_number, nested, list
                    )));
                } else {
                    body.push(text.to_string());
                    current = Some((list, body));
                }
            }
        }
    }

    if let Some((list, _)) = current {
        return Err(BlocklistError::MalformedConfig(format!("'{}' has no end", list)));
    }

    if added_eol && last_end == Some(stripped.len()) && stripped.ends_with('\n') {
        stripped.pop();
        position = position.map(|pos| pos.min(stripped.len()));
    }

    Ok(Stripped {
        content: stripped,
        position,
        stanzas,
    })
}

/// Replaces every stanza in the given config with the given stanzas. The new stanzas are inserted where the old ones
/// were, or, if there were none, after the last `actionsfile` or `filterfile` directive. Without any directives
/// they're appended to the end.
///
/// Merging the same stanzas again returns the same config.
///
/// # Errors
///
/// Returns [`BlocklistError::MalformedConfig`] if the config has malformed stanzas. See [`strip_stanzas`].
pub fn merge_stanzas(content: &str, stanzas: &[ConfigStanza]) -> Result<String> {
    let Stripped {
        content: mut merged,
        position,
        ..
    } = strip_stanzas(content)?;

    if stanzas.is_empty() {
        return Ok(merged);
    }

    let position = position.unwrap_or_else(|| insertion_point(&merged));
    let needs_eol = position == merged.len() && !merged.is_empty() && !merged.ends_with('\n');

    let mut rendered = String::new();
    if needs_eol {
        rendered.push('\n');
    }
    for (idx, stanza) in stanzas.iter().enumerate() {
        stanza.render(&mut rendered, needs_eol && idx == 0);
    }

    merged.insert_str(position, &rendered);
    Ok(merged)
}

/// A handle on the live Privoxy config file.
///
/// Every change is written into a temporary file next to the config, which is then renamed over it, so Privoxy never
/// sees a partially written config. The config's permissions are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivoxyConfig {
    path: PathBuf,
}

impl PrivoxyConfig {
    /// Returns a handle on the config at the given path.
    pub fn new<P>(path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        Self { path: path.into() }
    }

    /// Returns the config's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the config.
    ///
    /// # Errors
    ///
    /// Returns [`BlocklistError::ConfigNotFound`] if the config doesn't exist.
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BlocklistError::ConfigNotFound(self.path.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns the stanzas currently in the config.
    pub fn stanzas(&self) -> Result<Vec<ConfigStanza>> {
        Ok(strip_stanzas(&self.read()?)?.stanzas)
    }

    /// Replaces the stanzas in the config with the given ones. Returns whether the config changed; an unchanged config
    /// isn't rewritten.
    pub fn activate(&self, stanzas: &[ConfigStanza]) -> Result<bool> {
        let content = self.read()?;
        let merged = merge_stanzas(&content, stanzas)?;

        if merged == content {
            return Ok(false);
        }

        atomic::write_atomic(&self.path, merged.as_bytes())?;
        Ok(true)
    }

    /// Removes every stanza from the config and returns them.
    pub fn remove(&self) -> Result<Vec<ConfigStanza>> {
        let content = self.read()?;
        let stripped = strip_stanzas(&content)?;

        if !stripped.stanzas.is_empty() {
            atomic::write_atomic(&self.path, stripped.content.as_bytes())?;
        }

        Ok(stripped.stanzas)
    }
}

fn parse_begin(line: &str) -> Option<(&str, bool)> {
    let mut words = line.strip_prefix(BEGIN_MARKER)?.split_whitespace();
    let list = words.next()?;
    let eol = words.next() == Some(EOL_FLAG);
    Some((list, eol))
}

fn parse_end(line: &str) -> Option<&str> {
    line.strip_prefix(END_MARKER)?.split_whitespace().next()
}

fn directive_value(line: &str) -> Option<&str> {
    let line = line.trim_start();
    DIRECTIVES.iter().find_map(|directive| {
        let value = line.strip_prefix(directive)?;
        value
            .starts_with(char::is_whitespace)
            .then(|| value.trim())
            .filter(|value| !value.is_empty())
    })
}

/// Returns the byte offset just after the last uncommented `actionsfile` or `filterfile` directive, or the end of the
/// content without any directives.
fn insertion_point(content: &str) -> usize {
    let mut offset = 0;
    let mut point = content.len();

    for line in content.split_inclusive('\n') {
        offset += line.len();
        if directive_value(line).is_some() {
            point = offset;
        }
    }

    point
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
confdir /etc/privoxy
# actionsfile commented.action
actionsfile match-all.action
actionsfile default.action
actionsfile user.action
filterfile default.filter
filterfile user.filter
listen-address 127.0.0.1:8118
";

    fn stanzas() -> Vec<ConfigStanza> {
        vec![
            ConfigStanza::for_files(
                "easylist",
                Path::new("/etc/privoxy/easylist.script.action"),
                Path::new("/etc/privoxy/easylist.script.filter"),
            ),
            ConfigStanza::for_files(
                "easyprivacy",
                Path::new("/etc/privoxy/easyprivacy.script.action"),
                Path::new("/etc/privoxy/easyprivacy.script.filter"),
            ),
        ]
    }

    #[test]
    fn insert_after_last_directive() {
        let merged = merge_stanzas(CONFIG, &stanzas()).unwrap();
        let expected = "\
confdir /etc/privoxy
# actionsfile commented.action
actionsfile match-all.action
actionsfile default.action
actionsfile user.action
filterfile default.filter
filterfile user.filter
# privoxy-blocklist begin easylist
actionsfile /etc/privoxy/easylist.script.action
filterfile /etc/privoxy/easylist.script.filter
# privoxy-blocklist end easylist
# privoxy-blocklist begin easyprivacy
actionsfile /etc/privoxy/easyprivacy.script.action
filterfile /etc/privoxy/easyprivacy.script.filter
# privoxy-blocklist end easyprivacy
listen-address 127.0.0.1:8118
";
        assert_eq!(merged, expected);
    }

    #[test]
    fn merge_is_idempotent() {
        let once = merge_stanzas(CONFIG, &stanzas()).unwrap();
        let twice = merge_stanzas(&once, &stanzas()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_restores_original() {
        for config in [CONFIG, "", "listen-address 127.0.0.1:8118", "confdir /etc/privoxy\n\n"] {
            let merged = merge_stanzas(config, &stanzas()).unwrap();
            let stripped = strip_stanzas(&merged).unwrap();
            assert_eq!(stripped.content, config);
            assert_eq!(stripped.stanzas, stanzas());
            assert_eq!(merge_stanzas(&merged, &stanzas()).unwrap(), merged, "{:?}", config);
        }
    }

    #[test]
    fn append_without_trailing_newline() {
        let merged = merge_stanzas("listen-address 127.0.0.1:8118", &stanzas()[..1]).unwrap();
        assert!(merged.starts_with("listen-address 127.0.0.1:8118\n# privoxy-blocklist begin easylist +eol\n"));
        assert!(merged.ends_with("# privoxy-blocklist end easylist\n"));
    }

    #[test]
    fn replace_in_place() {
        let merged = merge_stanzas(CONFIG, &stanzas()).unwrap();
        let moved = format!("# moved to top\n{}", merged);
        let replaced = merge_stanzas(&moved, &stanzas()[1..]).unwrap();

        assert!(!replaced.contains("easylist.script"));
        assert!(replaced.contains("filterfile user.filter\n# privoxy-blocklist begin easyprivacy\n"));
    }

    #[test]
    fn merge_without_stanzas_removes_all() {
        let merged = merge_stanzas(CONFIG, &stanzas()).unwrap();
        assert_eq!(merge_stanzas(&merged, &[]).unwrap(), CONFIG);
    }

    #[test]
    fn malformed_stanzas() {
        let unterminated = "# privoxy-blocklist begin easylist\nactionsfile x\n";
        let mismatched = "# privoxy-blocklist begin easylist\n# privoxy-blocklist end other\n";
        let nested = "# privoxy-blocklist begin a\n# privoxy-blocklist begin b\n";
        let orphan = "# privoxy-blocklist end a\n";

        for config in [unterminated, mismatched, nested, orphan] {
            assert!(
                matches!(strip_stanzas(config), Err(BlocklistError::MalformedConfig(_))),
                "{:?}",
                config
            );
        }
    }

    #[test]
    fn referenced_files() {
        let files = stanzas()[0].referenced_files();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/etc/privoxy/easylist.script.action"),
                PathBuf::from("/etc/privoxy/easylist.script.filter"),
            ]
        );
    }

    #[test]
    fn activate_and_remove_round_trip() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join("config");
        fs::write(&path, CONFIG).unwrap();
        let config = PrivoxyConfig::new(&path);

        assert!(config.activate(&stanzas()).unwrap());
        let activated = fs::read(&path).unwrap();
        assert!(!config.activate(&stanzas()).unwrap());
        assert_eq!(fs::read(&path).unwrap(), activated);
        assert_eq!(config.stanzas().unwrap(), stanzas());

        assert_eq!(config.remove().unwrap(), stanzas());
        assert_eq!(fs::read_to_string(&path).unwrap(), CONFIG);
        assert!(config.remove().unwrap().is_empty());
    }

    #[test]
    fn missing_config() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let config = PrivoxyConfig::new(dir.path().join("config"));

        assert!(matches!(config.activate(&stanzas()), Err(BlocklistError::ConfigNotFound(_))));
    }
}
