mod logging;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::*;
use num_format::{Locale, SystemLocale, ToFormattedString};
use privoxy_blocklist::{
    require_privoxy, BlocklistError, ConfigStanza, Loaded, Overrides, PersistedOptions, PrivoxyConfig, Progress,
    RunReport, Settings, DEFAULT_OPTIONS_PATH, EXIT_FAILURE, EXIT_FETCH_FAILED, EXIT_FIRST_RUN, EXIT_SUCCESS,
    HTTP_CONNECT_TIMEOUT,
};
use std::{cell::RefCell, env, fmt::Display, fs, io, path::PathBuf, process, str::FromStr, time::Instant};
use structopt::StructOpt;
use url::Url;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Copy, Clone)]
struct ConnectTimeout(u64);

impl Default for ConnectTimeout {
    fn default() -> Self {
        Self(HTTP_CONNECT_TIMEOUT)
    }
}

impl FromStr for ConnectTimeout {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl Display for ConnectTimeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, StructOpt)]
#[structopt(name = APP_NAME, author, about)]
struct Opt {
    /// Path of the options file. Created with the default options if it doesn't exist. [default:
    /// /etc/privoxy-blocklist.toml]
    #[structopt(short, long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// URL of a list to convert. Can be given multiple times. [env: URLS]
    #[structopt(short, long = "url", number_of_values = 1)]
    urls: Vec<Url>,
    /// Filter type to convert element hiding rules of. Can be given multiple times. [env: FILTERS]
    #[structopt(short, long = "filter", number_of_values = 1)]
    filters: Vec<String>,
    /// Directory for the downloaded lists. [env: TMPDIR]
    #[structopt(short, long, parse(from_os_str))]
    tmp_dir: Option<PathBuf>,
    /// Path of Privoxy's config file. [env: PRIVOXY_CONF]
    #[structopt(short, long, parse(from_os_str))]
    privoxy_config: Option<PathBuf>,
    /// Directory for the generated action and filter files. Defaults to the directory of Privoxy's config file.
    /// [env: LISTS_DIR]
    #[structopt(short = "d", long, parse(from_os_str))]
    lists_dir: Option<PathBuf>,
    /// Only convert the lists without activating them in Privoxy.
    #[structopt(short = "C", long)]
    convert: bool,
    /// Convert the lists and activate them in Privoxy. This is the default mode.
    #[structopt(short = "A", long)]
    activate: bool,
    /// Store the given options into the options file and exit.
    #[structopt(short = "U", long)]
    update: bool,
    /// Deactivate every list in Privoxy and delete their generated files.
    #[structopt(short, long, conflicts_with_all = &["convert", "update"])]
    remove: bool,
    /// Don't read or create the options file. The list URLs and Privoxy's config file have to be given.
    #[structopt(short, long)]
    non_interactive: bool,
    /// Logging verbosity from 0 to 2. [env: DBG]
    #[structopt(short, long, possible_values = &["0", "1", "2"])]
    verbosity: Option<u8>,
    /// Only log errors.
    #[structopt(short, long, conflicts_with = "verbosity")]
    quiet: bool,
    /// The timeout to wait for connecting to a list's server in milliseconds.
    #[structopt(default_value, long)]
    timeout: ConnectTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Remove,
    Update,
    Convert,
    Activate,
}

impl Opt {
    fn mode(&self) -> Mode {
        if self.remove {
            Mode::Remove
        } else if self.update {
            Mode::Update
        } else if self.convert {
            Mode::Convert
        } else {
            Mode::Activate
        }
    }

    fn overrides(&self) -> Overrides {
        Overrides {
            urls: (!self.urls.is_empty()).then(|| self.urls.clone()),
            filters: (!self.filters.is_empty()).then(|| self.filters.clone()),
            tmp_dir: self.tmp_dir.clone(),
            privoxy_config: self.privoxy_config.clone(),
            lists_dir: self.lists_dir.clone(),
            verbosity: self.verbosity,
        }
    }
}

fn main() {
    let opt = Opt::from_args();

    if let Err(e) = logging::setup_logging(logging::level_for(opt.verbosity.unwrap_or(0), opt.quiet)) {
        eprintln!("Failed to set up logging: {}", e);
        process::exit(EXIT_FAILURE);
    }

    debug!("{:?}", opt);

    let code = match run(&opt, |name| env::var(name).ok()) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            e.downcast_ref::<BlocklistError>()
                .map_or(EXIT_FAILURE, BlocklistError::exit_code)
        }
    };

    process::exit(code);
}

fn run<F>(opt: &Opt, var: F) -> anyhow::Result<i32>
where
    F: Fn(&str) -> Option<String>,
{
    let mode = opt.mode();
    let mut overrides = opt.overrides();
    overrides.fill_from_env(var)?;

    let options = if opt.non_interactive {
        if mode == Mode::Update {
            anyhow::bail!("There is no options file to update in non-interactive mode");
        }

        PersistedOptions::from_overrides(&overrides)?
    } else {
        let path = opt.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OPTIONS_PATH));

        match PersistedOptions::load_or_bootstrap(&path)? {
            Loaded::Bootstrapped(_) => {
                info!(
                    "No config found in {}. Creating default one and exiting because you might have to adjust it.",
                    path.display()
                );
                return Ok(EXIT_FIRST_RUN);
            }
            Loaded::Existing(mut options) => {
                options.apply(&overrides);

                if mode == Mode::Update {
                    Settings::from_options(&options)?;
                    options.store(&path)?;
                    info!("Stored options in {}", path.display());
                    return Ok(EXIT_SUCCESS);
                }

                options
            }
        }
    };

    logging::set_level(logging::level_for(options.verbosity, opt.quiet));
    debug!("{:?}", options);

    let settings = Settings::from_options(&options)?;
    match mode {
        Mode::Remove => {
            require_privoxy()?;
            remove(&settings)
        }
        Mode::Activate => {
            require_privoxy()?;
            convert(opt, &settings, mode)
        }
        Mode::Convert => convert(opt, &settings, mode),
        Mode::Update => Ok(EXIT_SUCCESS),
    }
}

fn convert(opt: &Opt, settings: &Settings, mode: Mode) -> anyhow::Result<i32> {
    let urls: Vec<&str> = settings.sources.iter().map(|source| source.url().as_str()).collect();
    let filters: Vec<String> = settings.filters.iter().map(ToString::to_string).collect();

    info!("URLs: {}", urls.join(" "));
    info!("TMPDIR: {}", settings.tmp_dir.display());
    info!("Content filters: {}", filters.join(" "));
    info!("Target directory for lists: {}", settings.lists_dir.display());

    if mode == Mode::Convert {
        if opt.activate {
            warn!("Both converting and activating were requested, the lists will only be converted");
        }
        info!("Running in Convert Mode");
    } else {
        info!("Running in Activate Mode");
    }

    let report = convert_lists(opt, settings)?;

    if mode == Mode::Convert {
        for list in &report.converted {
            info!("Skip activation of '{}'", list.action_file.display());
            info!("Skip activation of '{}'", list.filter_file.display());
        }
    } else {
        activate(settings, &report)?;
    }

    Ok(if report.has_failures() {
        EXIT_FETCH_FAILED
    } else {
        EXIT_SUCCESS
    })
}

fn convert_lists(opt: &Opt, settings: &Settings) -> anyhow::Result<RunReport> {
    let bar: RefCell<Option<ProgressBar>> = RefCell::new(None);
    let start = Instant::now();

    let report = settings
        .blocklist(opt.timeout.0)?
        .progress_callback(|progress| match progress {
            Progress::ProcessingList { source } => info!("Processing {}", source.url()),
            Progress::BeginListRead { source, length } => {
                match length {
                    Some(len) => debug!("Reading {} with length {}", source.url(), len),
                    None => debug!("Reading {} with indeterminate length", source.url()),
                }

                *bar.borrow_mut() = Some(progress_bar(length, opt.quiet));
            }
            Progress::ReadProgress { delta, .. } => {
                if let Some(bar) = bar.borrow().as_ref() {
                    bar.inc(delta);
                }
            }
            Progress::FinishListRead { .. } => {
                if let Some(bar) = bar.borrow_mut().take() {
                    bar.finish_and_clear();
                }
            }
            Progress::ListNotModified { source } => {
                info!("{} wasn't modified since it was last downloaded", source.url())
            }
            Progress::ReadingListFailed { source, reason } => {
                if let Some(bar) = bar.borrow_mut().take() {
                    bar.abandon();
                }
                error!("Fetching {} failed: {}", source.url(), reason)
            }
            Progress::UsingCachedCopy { source, path } => warn!(
                "Converting the previously downloaded copy of {} from {}",
                source.url(),
                path.display()
            ),
            Progress::MissingHeader { source } => warn!(
                "The list received from {} does not contain AdblockPlus list header. Try to process anyway.",
                source.url()
            ),
            Progress::RuleSkipped {
                source,
                line_number,
                line,
                reason,
            } => debug!("Skipping line {} in {} ({}): {}", line_number, source.name(), reason, line),
            Progress::ListConverted { source, list } => info!(
                "Converted {} rules of {} into {} and {}",
                format_count(list.stats.converted()),
                source.name(),
                list.action_file.display(),
                list.filter_file.display()
            ),
        })
        .run()?;

    let converted: usize = report.converted.iter().map(|list| list.stats.converted()).sum();
    let skipped: usize = report.converted.iter().map(|list| list.stats.skipped).sum();
    info!(
        "Converted {} rules from {} lists in {}s, skipped {} unsupported rules",
        format_count(converted),
        report.converted.len(),
        start.elapsed().as_secs_f32(),
        format_count(skipped)
    );

    Ok(report)
}

fn activate(settings: &Settings, report: &RunReport) -> anyhow::Result<()> {
    let config = PrivoxyConfig::new(&settings.privoxy_config);

    if report.converted.is_empty() {
        warn!("No lists were converted, leaving {} as is", config.path().display());
        return Ok(());
    }

    let stanzas: Vec<ConfigStanza> = report.converted.iter().map(ConfigStanza::from).collect();
    if config.activate(&stanzas)? {
        info!("Activated {} lists in {}", stanzas.len(), config.path().display());
    } else {
        info!("Every list is already active in {}", config.path().display());
    }

    Ok(())
}

fn remove(settings: &Settings) -> anyhow::Result<i32> {
    let config = PrivoxyConfig::new(&settings.privoxy_config);
    let stanzas = config.remove()?;

    if stanzas.is_empty() {
        info!("No lists are active in {}", config.path().display());
    }

    for stanza in &stanzas {
        info!("Deactivated {}", stanza.list());

        for file in stanza.referenced_files() {
            match fs::remove_file(&file) {
                Ok(()) => debug!("Deleted {}", file.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => debug!("{} was already deleted", file.display()),
                Err(e) => return Err(e).with_context(|| format!("Failed to delete {}", file.display())),
            }
        }
    }

    Ok(EXIT_SUCCESS)
}

fn progress_bar(length: Option<u64>, quiet: bool) -> ProgressBar {
    let bar = match length {
        Some(len) => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} ({eta})")
                    .progress_chars("=> "),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {bytes}"));
            bar
        }
    };

    if quiet {
        bar.set_draw_target(ProgressDrawTarget::hidden());
    }

    bar
}

fn format_count(count: usize) -> String {
    match SystemLocale::default() {
        Ok(locale) => count.to_formatted_string(&locale),
        Err(_) => count.to_formatted_string(&Locale::en),
    }
}
