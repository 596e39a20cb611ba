use std::convert::Infallible;

use warp::{Filter, filters::path::FullPath};

use crate::{SaveRequest, Service, handlers};

fn with_service(svc: Service) -> impl Filter<Extract = (Service,), Error = Infallible> + Clone {
    warp::any().map(move || svc.clone())
}

fn json_body() -> impl Filter<Extract = (SaveRequest,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(1024 * 16).and(warp::body::json())
}

// the query string as received, or empty when the request has none
fn raw_query() -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::query::raw().or(warp::any().map(String::new)).unify()
}

fn all(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path(".all"))
        .and(with_service(svc))
        .and_then(handlers::all)
}

fn detail(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path!(".detail" / String))
        .and(with_service(svc))
        .and_then(|short: String, svc: Service| async move { handlers::detail(&short, svc).await })
}

fn mine(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path(".mine"))
        .and(with_service(svc))
        .and_then(handlers::mine)
}

fn export(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path(".export"))
        .and(with_service(svc))
        .and_then(handlers::export)
}

fn save(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path::end())
        .and(json_body())
        .and(with_service(svc))
        .and_then(handlers::save)
}

fn delete(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::post()
        .and(warp::path!(".delete" / String))
        .and(with_service(svc))
        .and_then(|short: String, svc: Service| async move { handlers::delete(&short, svc).await })
}

fn go(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::get()
        .and(warp::path::full())
        .and(raw_query())
        .and(with_service(svc))
        .and_then(|path: FullPath, query: String, svc: Service| async move {
            handlers::go(path.as_str(), &query, svc).await
        })
}

pub fn routes(svc: Service) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    all(svc.clone())
        .or(detail(svc.clone()))
        .or(mine(svc.clone()))
        .or(export(svc.clone()))
        .or(save(svc.clone()))
        .or(delete(svc.clone()))
        .or(go(svc))
}
