use chrono::Utc;
use url::Url;

use crate::expand::{ExpandEnv, ExpandError, expand_link};
use crate::store::{LinkStore, StoreError};

/// Aliased links may chain several hops before leaving the service; the cap
/// turns cyclic link data into an error instead of unbounded recursion.
const MAX_HOPS: usize = 10;

#[derive(Clone, Debug)]
pub enum ResolveError {
    Store(StoreError),
    Expand(ExpandError),
    /// The chain was still pointing back at this service after MAX_HOPS.
    ResolutionLoop(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::Store(e) => write!(f, "{}", e),
            ResolveError::Expand(e) => write!(f, "{}", e),
            ResolveError::ResolutionLoop(reference) => {
                write!(f, "resolution loop resolving {:?}", reference)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Follows a short-link reference to its final URL.
///
/// References may be a bare name ("meet/foo"), prefixed with the service
/// hostname ("go/meet/foo"), or absolute URLs. A link whose expansion is
/// relative or lands back on this service's hostname is treated as another
/// short-name reference and resolved again, which is how aliases work.
pub async fn resolve(
    store: &dyn LinkStore,
    hostname: &str,
    reference: &str,
) -> Result<String, ResolveError> {
    let mut target = reference.to_string();
    for _ in 0..MAX_HOPS {
        let (short, remainder) = split_reference(&target, hostname);
        let link = store.load(&short).await.map_err(ResolveError::Store)?;
        let env = ExpandEnv {
            now: Utc::now(),
            path: remainder,
            ..Default::default()
        };
        let expanded = expand_link(&link.long, &env).map_err(ResolveError::Expand)?;
        match Url::parse(&expanded) {
            Ok(url) if url.host_str().is_some_and(|host| host != hostname) => return Ok(expanded),
            _ => target = expanded, // relative or self-referential: another go link
        }
    }
    Err(ResolveError::ResolutionLoop(reference.to_string()))
}

// Splits a reference into the short name and the remaining path. A reference
// given as "go/name" parses with no scheme or host, so an explicit
// "<hostname>/" prefix is stripped first.
fn split_reference(reference: &str, hostname: &str) -> (String, String) {
    let path = match Url::parse(reference) {
        Ok(url) => url.path().to_string(),
        Err(_) => {
            let prefix = format!("{hostname}/");
            match reference.strip_prefix(&prefix) {
                Some(rest) => rest.to_string(),
                None => reference.to_string(),
            }
        }
    };
    let trimmed = path.trim_start_matches('/');
    match trimmed.split_once('/') {
        Some((short, remainder)) => (short.to_string(), remainder.to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}
