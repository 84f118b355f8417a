use crate::{atomic, BlocklistError, Result};
use log::*;
use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

const HTTP_READ_TIMEOUT: u64 = 10_000;
const CACHE_EXTENSION: &str = "txt";
const MARKER_EXTENSION: &str = "last-modified";

/// A remote or local AdblockPlus list.
///
/// Every list has a name derived from its URL, which is used to name the cached copy of the list, the generated
/// Privoxy files and the filters inside them. The name is the last segment of the URL's path without a `.txt`
/// extension, so `https://easylist.to/easylist/easyprivacy.txt` is named `easyprivacy`.
///
/// Various URL schemes are supported:
/// - `http`/`https`: The list is requested from the web, only transferring it again if it was modified since the
///   cached copy was downloaded.
/// - `file`: The list is read from a file in the local filesystem. The path in the URL is assumed to be an absolute
///   path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListSource {
    pub(crate) name: String,
    pub(crate) url: Url,
}

/// What retrieving a list yielded.
pub(crate) enum Retrieval {
    /// The list was requested and its content is being transferred.
    Download {
        length: Option<u64>,
        last_modified: Option<String>,
        reader: Box<dyn Read>,
    },
    /// The list hasn't changed since the cached copy was downloaded.
    NotModified,
    /// The list is a local file.
    Local { path: PathBuf, length: u64 },
}

impl ListSource {
    /// Returns a new list source with the given URL. If you wish to supply an already constructed [`Url`](url::Url),
    /// please use the [with_url](ListSource::with_url) method.
    ///
    /// # Errors
    ///
    /// Will return [`BlocklistError::Url`](BlocklistError::Url) if the given string fails to be parsed into an URL.
    pub fn new<S>(source: S) -> Result<Self>
    where
        S: AsRef<str>,
    {
        Ok(Self::with_url(Url::parse(source.as_ref())?))
    }

    /// Returns a new list source with the given URL.
    pub fn with_url(url: Url) -> Self {
        Self {
            name: name_from_url(&url),
            url,
        }
    }

    /// Returns the list's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns a reference to the list's URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the path of the list's cached copy in the given cache directory.
    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!("{}.{}", self.name, CACHE_EXTENSION))
    }

    fn marker_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(format!("{}.{}", self.name, MARKER_EXTENSION))
    }

    /// Returns the path of the list's cached copy, if there is one.
    pub(crate) fn cached_copy(&self, cache_dir: &Path) -> Option<PathBuf> {
        let path = self.cache_path(cache_dir);
        path.is_file().then(|| path)
    }

    pub(crate) fn retrieve(&self, cache_dir: &Path, connect_timeout: u64) -> Result<Retrieval> {
        match self.url.scheme() {
            "http" | "https" => {
                let agent = ureq::AgentBuilder::new()
                    .timeout_connect(Duration::from_millis(connect_timeout))
                    .timeout_read(Duration::from_millis(HTTP_READ_TIMEOUT))
                    .build();

                let mut request = agent.get(self.url.as_str());
                let if_modified_since = self.last_modified(cache_dir);
                if let Some(since) = &if_modified_since {
                    debug!("Requesting {} if modified since {}", self.url, since);
                    request = request.set("If-Modified-Since", since);
                }

                let resp = match request.call() {
                    Ok(resp) => resp,
                    Err(ureq::Error::Status(code, resp)) => {
                        return Err(BlocklistError::RequestFailed(code, resp.into_string()?));
                    }
                    Err(e) => return Err(e.into()),
                };
                debug!("Got response status {} for {}", resp.status(), self.url);

                match resp.status() {
                    304 if if_modified_since.is_some() => Ok(Retrieval::NotModified),
                    200..=299 => {
                        let length = resp.header("Content-Length").and_then(|len| len.parse().ok());
                        let last_modified = resp.header("Last-Modified").map(str::to_string);

                        Ok(Retrieval::Download {
                            length,
                            last_modified,
                            reader: Box::new(resp.into_reader()),
                        })
                    }
                    code => Err(BlocklistError::RequestFailed(code, resp.into_string()?)),
                }
            }
            "file" => {
                let path = match self.url.to_file_path() {
                    Ok(path) => path,
                    Err(()) => return Err(BlocklistError::InvalidFilePath(self.url.as_str().to_string())),
                };

                let meta = fs::metadata(&path)?;
                if !meta.is_file() {
                    return Err(BlocklistError::InvalidFilePath(path.display().to_string()));
                }

                Ok(Retrieval::Local {
                    path,
                    length: meta.len(),
                })
            }
            scheme => Err(BlocklistError::UnsupportedUrlScheme(scheme.to_string())),
        }
    }

    /// Stores a downloaded list as the cached copy, along with its last-modified marker if the server sent one.
    /// Returns the path of the cached copy.
    pub(crate) fn store<R>(&self, cache_dir: &Path, mut reader: R, last_modified: Option<&str>) -> Result<PathBuf>
    where
        R: Read,
    {
        let path = self.cache_path(cache_dir);
        let mut file = atomic::temp_file_for(&path)?;
        io::copy(&mut reader, &mut file)?;
        atomic::persist(file, &path)?;

        let marker = self.marker_path(cache_dir);
        match last_modified {
            Some(last_modified) => atomic::write_atomic(&marker, last_modified.as_bytes())?,
            None => match fs::remove_file(&marker) {
                Ok(()) => (),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => return Err(e.into()),
            },
        }

        Ok(path)
    }

    /// Returns the last-modified marker of the cached copy. Without a cached copy there's nothing to compare against,
    /// so the marker is ignored.
    fn last_modified(&self, cache_dir: &Path) -> Option<String> {
        self.cached_copy(cache_dir)?;

        let mut marker = String::new();
        File::open(self.marker_path(cache_dir))
            .and_then(|mut file| file.read_to_string(&mut marker))
            .ok()?;

        let marker = marker.trim();
        (!marker.is_empty()).then(|| marker.to_string())
    }
}

fn name_from_url(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| segment.strip_suffix(".txt").unwrap_or(segment))
        .filter(|segment| !segment.is_empty())
        .or_else(|| url.host_str())
        .unwrap_or("list");

    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
