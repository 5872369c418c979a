mod timeline;

use qm_core::FlagState;
use qm_core::Millis;
use qm_core::QmError;
use qm_core::QmResult;
use qm_core::QuietConfig;
use qm_html::HtmlParser;
use qm_nav::RecordingRedirector;
use qm_page::InstanceId;
use qm_page::Page;
use qm_page::RouterAction;
use qm_page::ToggleRouter;
use qm_scheduler::Mode;
use qm_scheduler::SchedulerStats;
use qm_storage::FilePreferenceStore;
use qm_storage::MemoryPreferenceStore;
use qm_storage::PreferenceStore;
use qm_storage::install_defaults;
use qm_surfaces::SUPPRESSED_ATTR;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use timeline::Timeline;
use timeline::apply_step;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";
const DEFAULT_FIXTURE: &str = include_str!("../fixtures/watch.html");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SimOptions {
    fixture: Option<PathBuf>,
    config: Option<PathBuf>,
    timeline: Option<PathBuf>,
    store: Option<PathBuf>,
    url: Option<String>,
    until_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimSummary {
    flag: FlagState,
    mode: Mode,
    suppressed: usize,
    redirects: usize,
    navigations: Vec<Url>,
    stats: SchedulerStats,
    finished_at: Millis,
}

fn main() -> ExitCode {
    init_logging();

    let options = match options_from_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(error) => {
            eprintln!("quietmode-sim startup error: {error}");
            return ExitCode::FAILURE;
        }
    };

    match run(&options) {
        Ok(summary) => {
            info!(
                flag = ?summary.flag,
                mode = summary.mode.as_str(),
                suppressed = summary.suppressed,
                redirects = summary.redirects,
                navigations = summary.navigations.len(),
                apply_passes = summary.stats.apply_passes,
                restore_passes = summary.stats.restore_passes,
                throttled = summary.stats.throttled,
                deferred_for_media = summary.stats.deferred_for_media,
                finished_at = summary.finished_at.0,
                "session finished"
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("quietmode-sim failed [{}]: {}", error.code, error.message);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn options_from_args(args: impl IntoIterator<Item = String>) -> Result<SimOptions, String> {
    let mut options = SimOptions::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = || {
            args.next()
                .ok_or_else(|| format!("missing value after {arg}"))
        };
        match arg.as_str() {
            "--fixture" => options.fixture = Some(PathBuf::from(value()?)),
            "--config" => options.config = Some(PathBuf::from(value()?)),
            "--script" => options.timeline = Some(PathBuf::from(value()?)),
            "--store" => options.store = Some(PathBuf::from(value()?)),
            "--url" => options.url = Some(value()?),
            "--until" => {
                let raw = value()?;
                let until = raw
                    .parse::<u64>()
                    .map_err(|_| format!("invalid millisecond value `{raw}` after --until"))?;
                options.until_ms = Some(until);
            }
            other => {
                return Err(format!(
                    "unsupported argument `{other}` (expected: --fixture|--config|--script|--store|--url|--until)"
                ));
            }
        }
    }
    Ok(options)
}

fn run(options: &SimOptions) -> QmResult<SimSummary> {
    let config = match &options.config {
        Some(path) => QuietConfig::load(path)?,
        None => QuietConfig::default(),
    };
    let html = match &options.fixture {
        Some(path) => fs::read_to_string(path).map_err(|error| {
            QmError::new(
                "sim.fixture_read_failed",
                format!("failed to read fixture `{}`: {error}", path.display()),
            )
        })?,
        None => DEFAULT_FIXTURE.to_owned(),
    };
    let timeline = match &options.timeline {
        Some(path) => Timeline::load(path)?,
        None => Timeline::builtin()?,
    };
    let raw_url = options.url.as_deref().unwrap_or(DEFAULT_URL);
    let url = Url::parse(raw_url).map_err(|error| {
        QmError::new("sim.url_invalid", format!("invalid url `{raw_url}`: {error}"))
    })?;

    let store: Arc<dyn PreferenceStore> = match &options.store {
        Some(path) => Arc::new(FilePreferenceStore::new(path.clone())),
        None => Arc::new(MemoryPreferenceStore::new()),
    };
    if install_defaults(store.as_ref(), &config.store)? {
        info!(key = %config.store.key, "default preference installed");
    }

    let mut router = ToggleRouter::new(
        Arc::clone(&store),
        config.store.clone(),
        config.navigation.clone(),
    )?;
    let (instance, endpoint) = router.connect(url.clone());
    let mut page = Page::attach(
        HtmlParser.parse(&html),
        url,
        config,
        store,
        Some(endpoint),
        RecordingRedirector::default(),
    )?;

    let mut navigations = Vec::new();
    for step in &timeline.steps {
        page.advance(Millis(step.at_ms));
        info!(at = step.at_ms, action = step.action.name(), "step");
        if let Err(error) = apply_step(&mut page, &step.action) {
            warn!(at = step.at_ms, code = error.code, message = %error.message, "step skipped");
            continue;
        }
        if step.action.navigates() {
            router.set_url(instance, page.location().clone());
        }
        route(&mut router, &mut page, instance, &mut navigations);
    }

    let end = options.until_ms.map_or_else(|| timeline.end(), Millis);
    page.advance(end);
    route(&mut router, &mut page, instance, &mut navigations);

    let suppressed = page
        .doc()
        .select_all(&format!("[{SUPPRESSED_ATTR}]"))?
        .len();
    Ok(SimSummary {
        flag: page.flag(),
        mode: page.mode(),
        suppressed,
        redirects: page.redirector().redirects.len(),
        navigations,
        stats: page.scheduler().stats(),
        finished_at: page.now(),
    })
}

/// Lets the router answer queued messages, then lets the page pick up the
/// replies on the same tick.
fn route(router: &mut ToggleRouter, page: &mut Page, instance: InstanceId, navigations: &mut Vec<Url>) {
    for action in router.pump() {
        if let RouterAction::Navigate { to, url } = action {
            info!(instance = to.0, url = %url, "navigation requested");
            if to == instance {
                navigations.push(url);
            }
        }
    }
    page.advance(page.now());
}
