//! Built-in plugins.
//!
//! | Plugin              | Capability | Types                                  |
//! |---------------------|------------|----------------------------------------|
//! | `HttpDownloader`    | downloader | produces `text/html`                   |
//! | `HtmlContentFinder` | filter     | html or fragment to fragment           |
//! | `HtmlExtractor`     | extractor  | html or fragment to `text/plain`       |
//! | `PrefixAllowRule`   | allow rule | identifier `Prefix`                    |
//! | `RegexAllowRule`    | allow rule | identifier `Regex`                     |
//! | `UrlList`           | source     | `URL<TAB>title` lines from a text file |

mod content_finder;
mod html;
mod html_extractor;
mod http_downloader;
mod prefix;
mod regex_rule;
mod url_list;

use std::sync::Arc;

pub use content_finder::{HtmlContentFinder, HtmlContentFinderPlugin};
pub use html_extractor::{HtmlExtractor, HtmlExtractorPlugin};
pub use http_downloader::{HttpDownloader, HttpDownloaderPlugin};
pub use prefix::{PrefixMatcher, PrefixPlugin};
pub use regex_rule::{RegexMatcher, RegexPlugin};
pub use url_list::{UrlListPlugin, UrlListSource};

use crate::plugin::PluginFactory;

/// The built-in plugins, registered before any extension.
#[must_use]
pub fn builtin_factories() -> Vec<Arc<dyn PluginFactory>> {
    vec![
        Arc::new(HttpDownloaderPlugin),
        Arc::new(HtmlContentFinderPlugin),
        Arc::new(HtmlExtractorPlugin),
        Arc::new(PrefixPlugin),
        Arc::new(RegexPlugin),
        Arc::new(UrlListPlugin),
    ]
}
