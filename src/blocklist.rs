use crate::{
    source::Retrieval, BlocklistBuilder, BlocklistError, ConvertedList, FilterType, ListOutput, ListSource,
    ProgressRead, Result, Rule, RuleOutcome,
};
use log::*;
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

/// The default timeout for connecting to a list's server, in milliseconds.
pub const HTTP_CONNECT_TIMEOUT: u64 = 30_000;
const BYTE_ORDER_MARK: char = '\u{feff}';
const LIST_HEADER: &str = "[Adblock";

type ProgressCallback<'a> = Box<dyn Fn(Progress) + 'a>;

/// Fetches a set of AdblockPlus lists and converts each one into a Privoxy action and filter file.
///
/// Lists are processed one after another. Every downloaded list is kept in the cache directory, so a list that hasn't
/// changed isn't transferred again, and a list that can't be fetched is converted from its cached copy instead.
pub struct Blocklist<'a> {
    pub(crate) sources: Vec<ListSource>,
    pub(crate) filters: Vec<FilterType>,
    pub(crate) lists_dir: PathBuf,
    pub(crate) cache_dir: PathBuf,
    pub(crate) http_timeout: u64,
    pub(crate) prog_callback: ProgressCallback<'a>,
}

/// Describes what a [`Blocklist`] is doing while it runs.
#[derive(Debug)]
pub enum Progress<'a> {
    /// Processing a list began.
    ProcessingList {
        /// The list.
        source: &'a ListSource,
    },
    /// The transfer of a list began.
    BeginListRead {
        /// The list.
        source: &'a ListSource,
        /// The list's length in bytes, if known.
        length: Option<u64>,
    },
    /// Part of a list was transferred.
    ReadProgress {
        /// The list.
        source: &'a ListSource,
        /// The amount of bytes transferred so far.
        bytes: u64,
        /// The amount of bytes transferred since the previous event.
        delta: u64,
    },
    /// A list was transferred completely.
    FinishListRead {
        /// The list.
        source: &'a ListSource,
    },
    /// A list hasn't changed since its cached copy was downloaded.
    ListNotModified {
        /// The list.
        source: &'a ListSource,
    },
    /// Fetching a list failed.
    ReadingListFailed {
        /// The list.
        source: &'a ListSource,
        /// Why it failed.
        reason: &'a BlocklistError,
    },
    /// A list that couldn't be fetched is converted from its cached copy.
    UsingCachedCopy {
        /// The list.
        source: &'a ListSource,
        /// Path of the cached copy.
        path: &'a Path,
    },
    /// A list doesn't begin with an AdblockPlus header. It's converted anyway.
    MissingHeader {
        /// The list.
        source: &'a ListSource,
    },
    /// A line in a list couldn't be converted.
    RuleSkipped {
        /// The list.
        source: &'a ListSource,
        /// The line's number, starting from 1.
        line_number: usize,
        /// The line.
        line: &'a str,
        /// Why the line was skipped.
        reason: &'static str,
    },
    /// A list was converted and its files written.
    ListConverted {
        /// The list.
        source: &'a ListSource,
        /// The written files.
        list: &'a ConvertedList,
    },
}

/// The outcome of a [`Blocklist`] run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Every list that was converted, including the ones converted from a cached copy.
    pub converted: Vec<ConvertedList>,
    /// Every list that couldn't be fetched.
    pub failed: Vec<FailedList>,
}

/// A list that couldn't be fetched.
#[derive(Debug)]
pub struct FailedList {
    /// The list.
    pub source: ListSource,
    /// Why fetching it failed.
    pub reason: BlocklistError,
}

impl RunReport {
    /// Returns whether any list failed to be fetched.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl<'a> Blocklist<'a> {
    /// Returns a new [`BlocklistBuilder`].
    pub fn builder() -> BlocklistBuilder {
        BlocklistBuilder::new()
    }

    /// Sets the callback that receives [`Progress`] events while running.
    #[must_use]
    pub fn progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + 'a,
    {
        self.prog_callback = Box::new(callback);
        self
    }

    /// Returns the configured list sources.
    pub fn sources(&self) -> &[ListSource] {
        &self.sources
    }

    /// Returns the directory the generated files are written into.
    pub fn lists_dir(&self) -> &Path {
        &self.lists_dir
    }

    /// Fetches and converts every list.
    ///
    /// # Errors
    ///
    /// Failing to fetch a list isn't an error; it's recorded in the returned report instead. Failing to create the
    /// cache or lists directory, or to write a list's files, is.
    pub fn run(self) -> Result<RunReport> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.lists_dir)?;

        let mut report = RunReport::default();
        for source in &self.sources {
            (self.prog_callback)(Progress::ProcessingList { source });

            let path = match self.fetch(source) {
                Ok(path) => path,
                Err(reason) => {
                    (self.prog_callback)(Progress::ReadingListFailed {
                        source,
                        reason: &reason,
                    });

                    let cached = source.cached_copy(&self.cache_dir);
                    report.failed.push(FailedList {
                        source: source.clone(),
                        reason,
                    });

                    match cached {
                        Some(path) => {
                            (self.prog_callback)(Progress::UsingCachedCopy { source, path: &path });
                            path
                        }
                        None => continue,
                    }
                }
            };

            let list = self.convert(source, &path)?;
            (self.prog_callback)(Progress::ListConverted { source, list: &list });
            report.converted.push(list);
        }

        Ok(report)
    }

    /// Brings the list's cached copy up to date and returns its path.
    fn fetch(&self, source: &ListSource) -> Result<PathBuf> {
        let cb = &self.prog_callback;

        let (length, reader, last_modified) = match source.retrieve(&self.cache_dir, self.http_timeout)? {
            Retrieval::Download {
                length,
                last_modified,
                reader,
            } => (length, reader, last_modified),
            Retrieval::Local { path, length } => {
                let file = File::open(&path)?;
                (Some(length), Box::new(file) as Box<dyn io::Read>, None)
            }
            Retrieval::NotModified => {
                cb(Progress::ListNotModified { source });
                return Ok(source.cache_path(&self.cache_dir));
            }
        };

        cb(Progress::BeginListRead { source, length });
        let reader = ProgressRead::new(reader, |bytes, delta| cb(Progress::ReadProgress { source, bytes, delta }));
        let path = source.store(&self.cache_dir, reader, last_modified.as_deref())?;
        cb(Progress::FinishListRead { source });

        Ok(path)
    }

    fn convert(&self, source: &ListSource, path: &Path) -> Result<ConvertedList> {
        debug!("Converting {} from {}", source.url(), path.display());

        let reader = BufReader::new(File::open(path)?);
        let mut output = ListOutput::new(source.name(), source.url().as_str(), &self.filters);
        let mut header_checked = false;

        for (line_idx, line) in reader.lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    trace!("Skipping undecodable line {} in {}", line_idx + 1, source.url());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let line = line.trim_start_matches(BYTE_ORDER_MARK);

            if !header_checked && !line.trim().is_empty() {
                header_checked = true;
                if !line.trim_start().starts_with(LIST_HEADER) {
                    (self.prog_callback)(Progress::MissingHeader { source });
                }
            }

            if let RuleOutcome::Skipped(reason) = output.add_rule(Rule::parse(line)) {
                (self.prog_callback)(Progress::RuleSkipped {
                    source,
                    line_number: line_idx + 1,
                    line,
                    reason,
                });
            }
        }

        output.write(&self.lists_dir)
    }
}

pub(crate) fn noop_callback(_: Progress) {}
