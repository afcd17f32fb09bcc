//! Shared reqwest client construction for page downloads and the search index.

use std::panic::{AssertUnwindSafe, catch_unwind, set_hook, take_hook};
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::warn;

/// Default HTTP connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default total request timeout.
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Redirect hops followed before a fetch is given up.
pub const MAX_REDIRECTS: usize = 10;

/// Browser User-Agent sent with page downloads.
///
/// Many sites serve reduced or blocked pages to unknown agents, and the
/// archive should hold what the user saw.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:131.0) \
    Gecko/20100101 Firefox/131.0";

/// User-Agent for requests to the search index.
#[must_use]
pub fn archiver_user_agent() -> String {
    format!("history-archiver/{}", env!("CARGO_PKG_VERSION"))
}

/// Timeouts and identity of a client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            user_agent: BROWSER_USER_AGENT.to_string(),
            max_redirects: MAX_REDIRECTS,
        }
    }
}

/// Builds a client, retrying with environment proxies if the system proxy
/// lookup panics.
///
/// # Errors
///
/// Returns the reqwest builder error, or a builder error from the fallback
/// attempt if the first build panicked.
pub fn build_client(options: &ClientOptions) -> Result<Client, ClientBuildError> {
    match try_build_client(options, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            warn!(
                "HTTP client builder panicked while loading system proxy settings; retrying with env-proxy fallback"
            );
            match try_build_client(options, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Build(error)) => Err(ClientBuildError::Build(error)),
                Err(BuildClientFailure::Panic) => Err(ClientBuildError::Panicked),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(ClientBuildError::Build(error)),
    }
}

/// Failure to construct an HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
    #[error("HTTP client builder panicked while applying env-proxy fallback")]
    Panicked,
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

// `catch_unwind` does not suppress panic-hook output, so the hook is swapped
// out while a guarded build runs.
static CLIENT_BUILD_PANIC_HOOK_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn try_build_client(
    options: &ClientOptions,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind_silent(AssertUnwindSafe(move || {
        let mut builder = base_client_builder(options);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn catch_unwind_silent<F, T>(operation: F) -> Result<T, Box<dyn std::any::Any + Send + 'static>>
where
    F: FnOnce() -> T + std::panic::UnwindSafe,
{
    let _panic_hook_guard = CLIENT_BUILD_PANIC_HOOK_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let previous_hook = take_hook();
    set_hook(Box::new(|_| {}));
    let outcome = catch_unwind(operation);
    set_hook(previous_hook);
    outcome
}

fn base_client_builder(options: &ClientOptions) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
        .timeout(Duration::from_secs(options.read_timeout_secs))
        .gzip(true)
        .redirect(Policy::limited(options.max_redirects))
        .user_agent(options.user_agent.clone())
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = env_proxy_for_scheme("https")
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = env_proxy_for_scheme("http")
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn env_proxy_for_scheme(scheme: &str) -> Option<String> {
    let names: &[&str] = match scheme {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => return None,
    };
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}
