use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use handlebars::{Handlebars, handlebars_helper};
use regex::Regex;
use url::Url;
use url::form_urlencoded;

/// ExpandEnv is the request context a long URL pattern is expanded against.
#[derive(Clone, Debug, Default)]
pub struct ExpandEnv {
    pub now: DateTime<Utc>,

    /// The remaining path after the short name. For "http://go/who/amelie",
    /// Path is "amelie".
    pub path: String,

    /// The current user, e.g. "foo@example.com", if known.
    pub user: Option<String>,

    /// Query parameters from the original request, in arrival order.
    pub query: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub enum ExpandError {
    /// The pattern referenced the current user and no user is known.
    NoUser,
    /// The pattern failed to parse or execute.
    Template(String),
    /// The executed pattern did not produce a usable URL.
    BadUrl(String),
}

impl std::fmt::Display for ExpandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpandError::NoUser => write!(f, "no user"),
            ExpandError::Template(message) => write!(f, "{}", message),
            ExpandError::BadUrl(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for ExpandError {}

handlebars_helper!(path_escape: |s: String| urlencoding::encode(&s).into_owned());
handlebars_helper!(query_escape: |s: String| urlencoding::encode(&s).into_owned());
handlebars_helper!(to_lower: |s: String| s.to_lowercase());
handlebars_helper!(to_upper: |s: String| s.to_uppercase());
handlebars_helper!(trim_suffix: |s: String, suffix: String| {
    match s.strip_suffix(&suffix) {
        Some(result) => result,
        _ => &s
    }.to_string()
});
handlebars_helper!(trim_prefix: |s: String, prefix: String| {
    match s.strip_prefix(&prefix) {
        Some(result) => result,
        _ => &s
    }.to_string()
});
handlebars_helper!(match_string: |pattern: String, s: String| {
    let re: Result<Regex, _> = pattern.try_into();
    match re {
        Ok(r) => r.is_match(&s),
        _ => false
    }
});

static REGISTRY: OnceLock<Handlebars<'static>> = OnceLock::new();

fn registry() -> &'static Handlebars<'static> {
    REGISTRY.get_or_init(|| {
        let mut bars: Handlebars<'static> = Handlebars::new();
        // expanded output is a URL, not HTML
        bars.register_escape_fn(handlebars::no_escape);
        // unknown field references are hard failures, not empty strings
        bars.set_strict_mode(true);
        bars.register_helper("PathEscape", Box::new(path_escape));
        bars.register_helper("QueryEscape", Box::new(query_escape));
        bars.register_helper("ToLower", Box::new(to_lower));
        bars.register_helper("ToUpper", Box::new(to_upper));
        bars.register_helper("TrimSuffix", Box::new(trim_suffix));
        bars.register_helper("TrimPrefix", Box::new(trim_prefix));
        bars.register_helper("Match", Box::new(match_string));
        bars
    })
}

/// Reports whether `long` parses as a template, without executing it. Used
/// to reject malformed patterns before they reach storage.
pub fn compile_check(long: &str) -> Result<(), ExpandError> {
    handlebars::Template::compile(long)
        .map(|_| ())
        .map_err(|e| ExpandError::Template(e.to_string()))
}

/// Returns the expanded URL to redirect to, executing any embedded template
/// with env data.
///
/// If long contains no template markers, the default behavior is to append
/// env.path to long. Query parameters from the original request are appended
/// to whatever query the expanded URL already carries.
pub fn expand_link(long: &str, env: &ExpandEnv) -> Result<String, ExpandError> {
    let pattern = if long.contains("{{") {
        long.to_string()
    } else if long.ends_with('/') {
        format!("{long}{{{{Path}}}}")
    } else {
        format!("{long}{{{{#if Path}}}}/{{{{Path}}}}{{{{/if}}}}")
    };

    let mut data = serde_json::json!({
        "Path": env.path,
        "Now": env.now.to_rfc3339(),
    });
    if let Some(user) = &env.user {
        data["User"] = serde_json::Value::String(user.clone());
    }

    let expanded = registry()
        .render_template(&pattern, &data)
        .map_err(|e| classify_render_error(e, env.user.is_some()))?;

    check_url(&expanded)?;
    Ok(merge_query(&expanded, &env.query))
}

// A template referencing User with no user in context fails strict-mode
// rendering on the missing User variable; everything else is a plain
// template failure.
fn classify_render_error(err: handlebars::RenderError, has_user: bool) -> ExpandError {
    let message = err.to_string();
    if !has_user && message.contains("User") {
        return ExpandError::NoUser;
    }
    ExpandError::Template(message)
}

// The expanded string is passed through verbatim (escapes in the pattern
// must survive), so validation parses a copy and discards it. Relative
// targets are allowed; they address this same service.
fn check_url(s: &str) -> Result<(), ExpandError> {
    match Url::parse(s) {
        Ok(_) => Ok(()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            static BASE: OnceLock<Url> = OnceLock::new();
            let base = BASE.get_or_init(|| Url::parse("http://go.invalid/").unwrap());
            match base.join(s) {
                Ok(_) => Ok(()),
                Err(e) => Err(ExpandError::BadUrl(format!("{s:?}: {e}"))),
            }
        }
        Err(e) => Err(ExpandError::BadUrl(format!("{s:?}: {e}"))),
    }
}

// Appends request query parameters after any the target already carries;
// duplicate keys accumulate rather than overwrite.
fn merge_query(target: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return target.to_string();
    }

    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };
    let (path, existing) = match base.split_once('?') {
        Some((path, existing)) => (path, Some(existing)),
        None => (base, None),
    };

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Some(existing) = existing {
        serializer.extend_pairs(form_urlencoded::parse(existing.as_bytes()));
    }
    serializer.extend_pairs(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let merged = serializer.finish();

    match fragment {
        Some(fragment) => format!("{path}?{merged}#{fragment}"),
        None => format!("{path}?{merged}"),
    }
}
