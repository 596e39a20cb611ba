use std::convert::Infallible;

use chrono::Utc;
use tracing::{debug, error};
use warp::http::StatusCode;

use crate::expand::{self, ExpandEnv, ExpandError};
use crate::identity::User;
use crate::model::{self, Link};
use crate::store::StoreError;
use crate::{DetailsResponse, SaveRequest, Service, snapshot};

fn status(code: StatusCode) -> Box<dyn warp::Reply> {
    Box::new(warp::reply::with_status(warp::reply(), code))
}

fn error_reply(code: StatusCode, message: String) -> Box<dyn warp::Reply> {
    Box::new(warp::reply::with_status(message, code))
}

// Location is set by hand; running the target through a URL type would
// re-encode escapes the expansion deliberately preserved.
fn redirect(location: String) -> Box<dyn warp::Reply> {
    Box::new(warp::reply::with_header(
        warp::reply::with_status(warp::reply(), StatusCode::FOUND),
        "Location",
        location,
    ))
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .collect()
}

fn percent_decoded(s: &str) -> String {
    urlencoding::decode(s)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Whether user may modify or delete a link: admins may edit anything,
/// owners their own links, and unowned links are editable by anyone.
fn can_edit(owner: &str, user: &User) -> bool {
    owner.is_empty() || user.is_admin || owner == user.login
}

/// Serves the redirect for "/{short}[/remainder]".
pub async fn go(full_path: &str, raw_query: &str, svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    let trimmed = full_path.trim_start_matches('/');
    let (short, remainder) = match trimmed.split_once('/') {
        Some((short, remainder)) => (short, remainder),
        None => (trimmed, ""),
    };
    let short = percent_decoded(short);
    let remainder = percent_decoded(remainder);

    // "{name}+" goes to the detail endpoint
    if let Some(name) = short.strip_suffix('+') {
        return Ok(redirect(format!("/.detail/{name}")));
    }

    let link = match svc.store.load(&short).await {
        Ok(link) => link,
        Err(StoreError::NotFound) => return Ok(status(StatusCode::NOT_FOUND)),
        Err(e) => {
            error!("serving {short:?}: {e}");
            return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
        }
    };

    svc.clicks.record(&link.short).await;

    let user = svc
        .identity
        .current_user()
        .await
        .ok()
        .filter(|user| !user.is_anonymous());
    let env = ExpandEnv {
        now: Utc::now(),
        path: remainder,
        user: user.map(|user| user.login),
        query: parse_query(raw_query),
    };
    match expand::expand_link(&link.long, &env) {
        Ok(target) => {
            debug!("redirecting {short:?} to {target:?}");
            Ok(redirect(target))
        }
        Err(ExpandError::NoUser) => Ok(error_reply(
            StatusCode::UNAUTHORIZED,
            "link requires a valid user".to_string(),
        )),
        Err(e) => {
            error!("expanding {:?}: {e}", link.long);
            Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}")))
        }
    }
}

/// Creates or updates a link. Existing links may only be modified by their
/// owner or an admin; validation happens before any storage mutation.
pub async fn save(request: SaveRequest, svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    if request.short.is_empty() || request.long.is_empty() {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "short and long required".to_string(),
        ));
    }
    if !model::valid_short_name(&request.short) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            "short may only contain letters, numbers, dash, and period".to_string(),
        ));
    }
    if let Err(e) = expand::compile_check(&request.long) {
        return Ok(error_reply(
            StatusCode::BAD_REQUEST,
            format!("long contains an invalid template: {e}"),
        ));
    }

    let user = match svc.identity.current_user().await {
        Ok(user) => user,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}"))),
    };

    let existing = match svc.store.load(&request.short).await {
        Ok(link) => Some(link),
        Err(StoreError::NotFound) => None,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}"))),
    };

    if let Some(link) = &existing
        && !can_edit(&link.owner, &user)
    {
        return Ok(error_reply(
            StatusCode::FORBIDDEN,
            format!("cannot update link owned by {:?}", link.owner),
        ));
    }

    // ownership may be transferred; empty keeps it with the current user
    let owner = match &request.owner {
        Some(owner) if !owner.is_empty() => owner.clone(),
        _ => user.login.clone(),
    };

    let now = Utc::now();
    let is_new = existing.is_none();
    let link = Link {
        short: request.short,
        long: request.long,
        created: existing.as_ref().map(|link| link.created).unwrap_or(now),
        last_edit: now,
        owner,
    };
    if let Err(e) = svc.store.save(&link).await {
        error!("saving {:?}: {e}", link.short);
        return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}")));
    }

    let code = if is_new { StatusCode::CREATED } else { StatusCode::OK };
    Ok(Box::new(warp::reply::with_header(
        warp::reply::with_status(warp::reply::json(&link), code),
        "Location",
        format!("/{}", link.short),
    )))
}

/// Deletes a link and its click stats, owner-authorized.
pub async fn delete(short: &str, svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    if short.is_empty() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "short required".to_string()));
    }
    let short = percent_decoded(short);

    let user = match svc.identity.current_user().await {
        Ok(user) => user,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}"))),
    };

    let link = match svc.store.load(&short).await {
        Ok(link) => link,
        Err(StoreError::NotFound) => return Ok(status(StatusCode::NOT_FOUND)),
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}"))),
    };

    if !can_edit(&link.owner, &user) {
        return Ok(error_reply(
            StatusCode::FORBIDDEN,
            format!("cannot delete link owned by {:?}", link.owner),
        ));
    }

    if let Err(e) = svc.store.delete(&link.short).await {
        error!("deleting {:?}: {e}", link.short);
        return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}")));
    }
    if let Err(e) = svc.clicks.forget(&link.short).await {
        // the link itself is gone; orphaned counts are dropped at read time
        error!("deleting stats for {:?}: {e}", link.short);
    }

    Ok(Box::new(warp::reply::json(&link)))
}

/// Serves every stored link as JSON, sorted by short name.
pub async fn all(svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    if let Err(e) = svc.clicks.flush().await {
        error!("flushing stats: {e}");
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
    }
    match svc.store.load_all().await {
        Ok(mut links) => {
            links.sort_by(|a, b| a.short.cmp(&b.short));
            Ok(Box::new(warp::reply::json(&links)))
        }
        Err(e) => {
            error!("{e}");
            Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Serves one link and its click count as JSON.
pub async fn detail(short: &str, svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    let short = percent_decoded(short);
    match svc.store.load(&short).await {
        Ok(link) => {
            let clicks = svc.clicks.clicks_for(&link.short).await;
            Ok(Box::new(warp::reply::json(&DetailsResponse { link, clicks })))
        }
        Err(StoreError::NotFound) => Ok(status(StatusCode::NOT_FOUND)),
        Err(e) => {
            error!("serving detail {short:?}: {e}");
            Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Serves the links owned by the current user.
pub async fn mine(svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    let user = match svc.identity.current_user().await {
        Ok(user) => user,
        Err(e) => return Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}"))),
    };
    match svc.store.load_all().await {
        Ok(mut links) => {
            links.retain(|link| link.owner == user.login);
            links.sort_by(|a, b| a.short.cmp(&b.short));
            Ok(Box::new(warp::reply::json(&links)))
        }
        Err(e) => {
            error!("{e}");
            Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

/// Serves a snapshot of the link database, one JSON document per line. The
/// same output restores on startup.
pub async fn export(svc: Service) -> Result<Box<dyn warp::Reply>, Infallible> {
    if let Err(e) = svc.clicks.flush().await {
        error!("flushing stats: {e}");
        return Ok(status(StatusCode::INTERNAL_SERVER_ERROR));
    }
    match snapshot::export(svc.store.as_ref()).await {
        Ok(body) => {
            let body = String::from_utf8(body).unwrap_or_default();
            Ok(Box::new(warp::reply::with_header(
                body,
                "Content-Type",
                "application/jsonlines",
            )))
        }
        Err(e) => {
            error!("exporting snapshot: {e}");
            Ok(status(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}
