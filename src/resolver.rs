use lofty::prelude::*;
use lofty::probe::Probe;
use reqwest::Url;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

pub const UNKNOWN_MEDIA_TITLE: &str = "Unknown media";

/// Lower-cased scheme of a locator, if it parses as an absolute URI.
pub fn scheme_of(locator: &str) -> Option<String> {
    Url::parse(locator)
        .ok()
        .map(|u| u.scheme().to_ascii_lowercase())
}

/// http or https.
pub fn is_network(locator: &str) -> bool {
    matches!(scheme_of(locator).as_deref(), Some("http") | Some("https"))
}

/// Locators that may be stored in a playlist.
pub fn can_be_saved(locator: &str) -> bool {
    matches!(
        scheme_of(locator).as_deref(),
        Some("content") | Some("file") | Some("http") | Some("https")
    )
}

/// Filesystem path behind a `file://` URI or a bare path.
pub fn local_path(locator: &str) -> Option<PathBuf> {
    match Url::parse(locator) {
        Ok(url) if url.scheme() == "file" => url.to_file_path().ok(),
        Ok(_) => None,
        Err(_) if !locator.is_empty() => Some(PathBuf::from(locator)),
        Err(_) => None,
    }
}

pub fn file_uri(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(|u| u.to_string())
}

/// Resolves locators to display names and byte streams.
pub trait ContentResolver: Send + Sync {
    /// Provider-supplied display name. Only consulted for `content` locators.
    fn display_name(&self, locator: &str) -> Option<String>;

    fn open(&self, locator: &str) -> io::Result<Box<dyn Read + Send>>;
}

/// Serves `file://` URIs and bare paths. There is no content provider on the
/// desktop, so `content` locators never resolve.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalContentResolver;

impl ContentResolver for LocalContentResolver {
    fn display_name(&self, _locator: &str) -> Option<String> {
        None
    }

    fn open(&self, locator: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = local_path(locator).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("No local source for {}", locator),
            )
        })?;
        Ok(Box::new(File::open(path)?))
    }
}

/// Human readable name for a locator: the provider's display name for
/// `content` locators, otherwise the decoded last path segment.
pub fn display_name_for(locator: &str, resolver: &dyn ContentResolver) -> String {
    let parsed = Url::parse(locator).ok();

    let provided = match &parsed {
        Some(url) if url.scheme() == "content" => match resolver.display_name(locator) {
            Some(name) if !name.is_empty() => Some(name),
            _ => {
                log::debug!("No display name from resolver for {}", locator);
                None
            }
        },
        _ => None,
    };

    let name = provided.unwrap_or_else(|| match &parsed {
        Some(url) => file_name_from_path(url.path()),
        None => file_name_from_path(locator),
    });

    if name.is_empty() {
        UNKNOWN_MEDIA_TITLE.to_string()
    } else {
        name
    }
}

pub fn file_name_from_path(path: &str) -> String {
    let segment = path.rsplit('/').next().unwrap_or(path);
    let decoded = match urlencoding::decode(segment) {
        Ok(d) => d.into_owned(),
        Err(_) => {
            log::warn!("Failed to URL decode path segment: {}", segment);
            segment.to_string()
        }
    };

    match decoded.find('?') {
        Some(idx) if idx > 0 => decoded[..idx].to_string(),
        _ => decoded,
    }
}

/// Title tag of a local audio/video file, if it has one.
pub fn read_tag_title(path: &Path) -> Option<String> {
    let tagged_file = match Probe::open(path).and_then(|p| p.read()) {
        Ok(f) => f,
        Err(e) => {
            log::debug!("No readable tags in {:?}: {}", path, e);
            return None;
        }
    };

    tagged_file
        .primary_tag()
        .and_then(|t| t.title().map(|c| c.into_owned()))
        .filter(|t| !t.trim().is_empty())
}
