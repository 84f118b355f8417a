use crate::{
    blocklist::noop_callback, options, Blocklist, BlocklistError, FilterType, ListSource, Result, HTTP_CONNECT_TIMEOUT,
};
use std::{collections::HashSet, path::PathBuf};

pub struct BlocklistBuilder {
    sources: Vec<ListSource>,
    filters: Vec<FilterType>,
    lists_dir: PathBuf,
    cache_dir: PathBuf,
    http_timeout: u64,
}

impl<'a> BlocklistBuilder {
    pub(crate) fn new() -> Self {
        Self {
            sources: Vec::new(),
            filters: Vec::new(),
            lists_dir: PathBuf::from(options::DEFAULT_LISTS_DIR),
            cache_dir: options::default_tmp_dir(),
            http_timeout: HTTP_CONNECT_TIMEOUT,
        }
    }

    /// Builds the [`Blocklist`]. Lists sharing a name are renamed with a numeric suffix so their files don't
    /// overwrite each other.
    ///
    /// # Errors
    ///
    /// Returns [`BlocklistError::NoSources`] or [`BlocklistError::NoFilters`] if either is empty.
    pub fn build(self) -> Result<Blocklist<'a>> {
        if self.sources.is_empty() {
            return Err(BlocklistError::NoSources);
        }

        if self.filters.is_empty() {
            return Err(BlocklistError::NoFilters);
        }

        Ok(Blocklist {
            sources: unique_names(self.sources),
            filters: self.filters,
            lists_dir: self.lists_dir,
            cache_dir: self.cache_dir,
            http_timeout: self.http_timeout,
            prog_callback: Box::new(noop_callback),
        })
    }

    #[must_use]
    pub fn add_source(mut self, source: ListSource) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn add_many_sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = ListSource>,
    {
        self.sources.extend(sources);
        self
    }

    #[must_use]
    pub fn add_filter(mut self, filter: FilterType) -> Self {
        if !self.filters.contains(&filter) {
            self.filters.push(filter);
        }
        self
    }

    #[must_use]
    pub fn add_many_filters<I>(self, filters: I) -> Self
    where
        I: IntoIterator<Item = FilterType>,
    {
        filters.into_iter().fold(self, Self::add_filter)
    }

    #[must_use]
    pub fn lists_dir<P>(mut self, dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.lists_dir = dir.into();
        self
    }

    #[must_use]
    pub fn cache_dir<P>(mut self, dir: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.cache_dir = dir.into();
        self
    }

    #[must_use]
    pub fn http_timeout(mut self, timeout: u64) -> Self {
        self.http_timeout = timeout;
        self
    }
}

fn unique_names(mut sources: Vec<ListSource>) -> Vec<ListSource> {
    let mut taken = HashSet::new();

    for source in &mut sources {
        let base = source.name.clone();
        let mut suffix = 1;
        while !taken.insert(source.name.clone()) {
            suffix += 1;
            source.name = format!("{}_{}", base, suffix);
        }
    }

    sources
}
