use crate::{atomic, Blocklist, BlocklistError, FilterType, ListSource, Result};
use log::*;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use url::Url;

/// Where the options are persisted unless another path is given.
pub const DEFAULT_OPTIONS_PATH: &str = "/etc/privoxy-blocklist.toml";
pub(crate) const DEFAULT_LISTS_DIR: &str = "/etc/privoxy";
const DEFAULT_PRIVOXY_CONFIG: &str = "/etc/privoxy/config";
const DEFAULT_URLS: [&str; 2] = [
    "https://easylist-downloads.adblockplus.org/easylistgermany.txt",
    "https://easylist.to/easylist/easylist.txt",
];
const TMP_DIR_NAME: &str = "privoxy-blocklist";

pub(crate) fn default_tmp_dir() -> PathBuf {
    env::temp_dir().join(TMP_DIR_NAME)
}

/// The options stored in the options file between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedOptions {
    /// URLs of the lists to convert.
    pub urls: Vec<Url>,
    /// Names of the enabled [filter types](FilterType).
    pub filters: Vec<String>,
    /// Directory for the cached copies of the lists.
    pub tmp_dir: PathBuf,
    /// Path of Privoxy's config file.
    pub privoxy_config: PathBuf,
    /// Directory for the generated files. Defaults to the directory of Privoxy's config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lists_dir: Option<PathBuf>,
    /// Logging verbosity from 0 to 2.
    pub verbosity: u8,
}

/// The outcome of loading the options file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded {
    /// The options file existed and was loaded.
    Existing(PersistedOptions),
    /// The options file didn't exist, so one with the default options was created.
    Bootstrapped(PersistedOptions),
}

/// Options given for a single run, taking precedence over the persisted ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub urls: Option<Vec<Url>>,
    pub filters: Option<Vec<String>>,
    pub tmp_dir: Option<PathBuf>,
    pub privoxy_config: Option<PathBuf>,
    pub lists_dir: Option<PathBuf>,
    pub verbosity: Option<u8>,
}

/// The validated options a run works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub sources: Vec<ListSource>,
    pub filters: Vec<FilterType>,
    pub tmp_dir: PathBuf,
    pub privoxy_config: PathBuf,
    pub lists_dir: PathBuf,
    pub verbosity: u8,
}

impl Default for PersistedOptions {
    fn default() -> Self {
        Self {
            urls: DEFAULT_URLS
                .iter()
                .filter_map(|url| Url::parse(url).ok())
                .collect(),
            filters: FilterType::all_names(),
            tmp_dir: default_tmp_dir(),
            privoxy_config: PathBuf::from(DEFAULT_PRIVOXY_CONFIG),
            lists_dir: None,
            verbosity: 0,
        }
    }
}

impl PersistedOptions {
    /// Loads the options file at the given path. If there is none, the default options are stored there instead.
    pub fn load_or_bootstrap(path: &Path) -> Result<Loaded> {
        if path.exists() {
            debug!("Loading options from {}", path.display());
            return Ok(Loaded::Existing(confy::load_path(path)?));
        }

        let options = Self::default();
        options.store(path)?;
        Ok(Loaded::Bootstrapped(options))
    }

    /// Builds the options for a run that doesn't use an options file.
    ///
    /// # Errors
    ///
    /// Returns [`BlocklistError::MissingOption`] if the list URLs or Privoxy's config file aren't given.
    pub fn from_overrides(overrides: &Overrides) -> Result<Self> {
        if overrides.urls.as_ref().map_or(true, Vec::is_empty) {
            return Err(BlocklistError::MissingOption("URLS"));
        }

        if overrides.privoxy_config.is_none() {
            return Err(BlocklistError::MissingOption("PRIVOXY_CONF"));
        }

        let mut options = Self::default();
        options.apply(overrides);
        Ok(options)
    }

    /// Stores the options into the given path, replacing any existing file at once.
    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = atomic::temp_file_for(path)?;
        confy::store_path(file.path(), self)?;
        atomic::persist(file, path)
    }

    /// Replaces every option that's overridden.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(urls) = &overrides.urls {
            self.urls = urls.clone();
        }

        if let Some(filters) = &overrides.filters {
            self.filters = filters.clone();
        }

        if let Some(tmp_dir) = &overrides.tmp_dir {
            self.tmp_dir = tmp_dir.clone();
        }

        if let Some(privoxy_config) = &overrides.privoxy_config {
            self.privoxy_config = privoxy_config.clone();
        }

        if let Some(lists_dir) = &overrides.lists_dir {
            self.lists_dir = Some(lists_dir.clone());
        }

        if let Some(verbosity) = overrides.verbosity {
            self.verbosity = verbosity;
        }
    }
}

impl Overrides {
    /// Fills every option that wasn't given with the value of its environment variable, if set. `URLS` and `FILTERS`
    /// are whitespace separated lists.
    ///
    /// # Errors
    ///
    /// Returns [`BlocklistError::Url`] for an invalid URL in `URLS` and [`BlocklistError::InvalidOption`] for a `DBG`
    /// that isn't a number.
    pub fn fill_from_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|value| !value.trim().is_empty());

        if self.urls.is_none() {
            if let Some(urls) = var("URLS") {
                self.urls = Some(
                    urls.split_whitespace()
                        .map(Url::parse)
                        .collect::<std::result::Result<_, _>>()?,
                );
            }
        }

        if self.filters.is_none() {
            self.filters = var("FILTERS").map(|filters| filters.split_whitespace().map(str::to_string).collect());
        }

        if self.tmp_dir.is_none() {
            self.tmp_dir = var("TMPDIR").map(PathBuf::from);
        }

        if self.privoxy_config.is_none() {
            self.privoxy_config = var("PRIVOXY_CONF").map(PathBuf::from);
        }

        if self.lists_dir.is_none() {
            self.lists_dir = var("LISTS_DIR").map(PathBuf::from);
        }

        if self.verbosity.is_none() {
            if let Some(dbg) = var("DBG") {
                let verbosity = dbg
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| BlocklistError::InvalidOption("DBG", dbg.clone()))?;
                self.verbosity = Some(verbosity);
            }
        }

        Ok(())
    }
}

impl Settings {
    /// Validates the given options.
    ///
    /// # Errors
    ///
    /// Returns [`BlocklistError::UnknownFilter`] for the first unknown filter type name.
    pub fn from_options(options: &PersistedOptions) -> Result<Self> {
        let filters = FilterType::parse_many(&options.filters)?;
        let lists_dir = match &options.lists_dir {
            Some(dir) => dir.clone(),
            None => options
                .privoxy_config
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        };

        Ok(Self {
            sources: options.urls.iter().cloned().map(ListSource::with_url).collect(),
            filters,
            tmp_dir: options.tmp_dir.clone(),
            privoxy_config: options.privoxy_config.clone(),
            lists_dir,
            verbosity: options.verbosity,
        })
    }

    /// Returns a [`Blocklist`] for these settings.
    pub fn blocklist<'a>(&self, http_timeout: u64) -> Result<Blocklist<'a>> {
        Blocklist::builder()
            .add_many_sources(self.sources.iter().cloned())
            .add_many_filters(self.filters.iter().copied())
            .lists_dir(&self.lists_dir)
            .cache_dir(&self.tmp_dir)
            .http_timeout(http_timeout)
            .build()
    }
}
