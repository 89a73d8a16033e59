//! Resource lister - finds media URLs on a page and names their files

use crate::engine::parse_resource_url;
use crate::error::FetchError;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Fetch a page body with a single GET
pub async fn fetch_page(client: &Client, url: &str) -> Result<String, FetchError> {
    let url = parse_resource_url(url)?;
    info!("Fetching page {}", url);

    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::ServerError {
            status: status.as_u16(),
            message: format!("GET {} failed", url),
        });
    }

    Ok(response.text().await?)
}

/// Collect `https://…​.<ext>` URLs from `html`
///
/// The extension must end the URL's path: it is followed by a delimiter, a
/// query or fragment, or the end of input. A query or fragment is not part of
/// the result. URLs are grouped by extension in the order given, each group
/// in page order, and duplicates keep their first position.
pub fn extract_resource_urls<S: AsRef<str>>(html: &str, extensions: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for ext in extensions {
        let ext = ext.as_ref().trim_start_matches('.');
        let pattern = format!(
            r#"(https://[^\s"'<>()]+?\.{})(?:[\s"'<>()?#,;]|$)"#,
            regex::escape(ext)
        );
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!("Skipping extension {:?}: {}", ext, e);
                continue;
            }
        };

        for caps in re.captures_iter(html) {
            let Some(url) = caps.get(1) else {
                continue;
            };
            if seen.insert(url.as_str().to_string()) {
                urls.push(url.as_str().to_string());
            }
        }
    }

    debug!("Found {} resource URLs", urls.len());
    urls
}

/// Local file name for a resource: the percent-decoded last path segment
pub fn file_name_for(url: &str) -> Result<String, FetchError> {
    let parsed = parse_resource_url(url)?;
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

    let name = urlencoding::decode(segment)
        .map_err(|_| FetchError::InvalidUrl(url.to_string()))?
        .into_owned();

    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(FetchError::InvalidUrl(url.to_string()));
    }
    Ok(name)
}
