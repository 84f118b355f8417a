//! Converts AdblockPlus lists into Privoxy action and filter files and activates them in Privoxy's config.
//!
//! A [`Blocklist`] fetches every [`ListSource`], classifies each line into a [`Rule`] and collects the rules into a
//! [`ListOutput`], which is written into the lists directory as a `<name>.script.action` and `<name>.script.filter`
//! file. The generated files are then activated in the Privoxy config through a [`PrivoxyConfig`].

mod atomic;
mod blocklist;
mod builder;
mod dependency;
mod error;
mod filter_type;
mod options;
mod output;
mod privoxy_config;
mod progress_read;
mod rule;
mod selector;
mod source;

pub use blocklist::{Blocklist, FailedList, Progress, RunReport, HTTP_CONNECT_TIMEOUT};
pub use builder::BlocklistBuilder;
pub use dependency::{find_executable, require_privoxy, PRIVOXY_EXECUTABLE};
pub use error::{
    BlocklistError, Result, EXIT_FAILURE, EXIT_FETCH_FAILED, EXIT_FIRST_RUN, EXIT_MISSING_OPTION, EXIT_SUCCESS,
};
pub use filter_type::FilterType;
pub use options::{Loaded, Overrides, PersistedOptions, Settings, DEFAULT_OPTIONS_PATH};
pub use output::{ConversionStats, ConvertedList, ListOutput, RuleOutcome, ACTION_EXTENSION, FILTER_EXTENSION};
pub use privoxy_config::{merge_stanzas, strip_stanzas, ConfigStanza, PrivoxyConfig, Stripped};
pub use rule::Rule;
pub use selector::Selector;
pub use source::ListSource;

use progress_read::ProgressRead;
