use std::sync::Arc;

use chrono::DateTime;
use golinks::identity::{AnonymousProvider, StaticProvider, User};
use golinks::model::{ClickStats, Link};
use golinks::stats::ClickCounter;
use golinks::store::file::FileStore;
use golinks::store::sqlite::SqliteStore;
use golinks::store::{LinkStore, StoreError};
use golinks::{DetailsResponse, SaveRequest, Service, handlers, snapshot};
use http_body_util::BodyExt;
use warp::reply::Reply;

fn link(short: &str, long: &str, owner: &str) -> Link {
    Link {
        short: short.to_string(),
        long: long.to_string(),
        created: DateTime::from_timestamp(1_660_000_000, 0).unwrap(),
        last_edit: DateTime::from_timestamp(1_660_000_100, 0).unwrap(),
        owner: owner.to_string(),
    }
}

// The storage contract every backend has to satisfy.
async fn check_store_contract(store: &dyn LinkStore) {
    // save then load round-trips all fields
    let plain = link("short", "http://long/", "a@example.com");
    store.save(&plain).await.unwrap();
    assert_eq!(store.load("short").await.unwrap(), plain);

    // case and dash variants normalize to the same record
    let dotted = link("Foo.Bar", "http://foo/", "");
    store.save(&dotted).await.unwrap();
    assert_eq!(store.load("foo.bar").await.unwrap(), dotted);
    assert_eq!(store.load("FOO.BAR").await.unwrap(), dotted);

    let dashed = link("B-c", "http://bc/", "");
    store.save(&dashed).await.unwrap();
    assert_eq!(store.load("bc").await.unwrap(), dashed);
    assert_eq!(store.load("b-C").await.unwrap(), dashed);

    // saving under a colliding spelling overwrites, keeping the new spelling
    let respelled = link("BC", "http://bc2/", "");
    store.save(&respelled).await.unwrap();
    assert_eq!(store.load("b-c").await.unwrap(), respelled);

    // unknown names are NotFound, distinct from other failures
    assert!(matches!(store.load("missing").await, Err(StoreError::NotFound)));

    let mut all = store.load_all().await.unwrap();
    all.sort_by(|a, b| a.short.cmp(&b.short));
    let shorts: Vec<&str> = all.iter().map(|l| l.short.as_str()).collect();
    assert_eq!(shorts, vec!["BC", "Foo.Bar", "short"]);

    // stats accumulate across batches, keyed back to canonical spellings
    store
        .save_stats(&ClickStats::from([("short".to_string(), 1)]))
        .await
        .unwrap();
    store
        .save_stats(&ClickStats::from([("short".to_string(), 2), ("b-c".to_string(), 5)]))
        .await
        .unwrap();
    let stats = store.load_stats().await.unwrap();
    assert_eq!(stats.get("short"), Some(&3));
    assert_eq!(stats.get("BC"), Some(&5));

    // deleting the link leaves counts under the raw id until stats are
    // deleted too
    store.delete("b-C").await.unwrap();
    assert!(matches!(store.load("BC").await, Err(StoreError::NotFound)));
    let stats = store.load_stats().await.unwrap();
    assert_eq!(stats.get("bc"), Some(&5));

    store.delete_stats("B-c").await.unwrap();
    let stats = store.load_stats().await.unwrap();
    assert_eq!(stats.get("bc"), None);
    assert_eq!(stats.get("BC"), None);

    // deleting again reports NotFound
    assert!(matches!(store.delete("b-C").await, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn test_sqlite_store_contract() {
    let store = SqliteStore::in_memory().unwrap();
    check_store_contract(&store).await;
}

#[tokio::test]
async fn test_file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path()).unwrap();
    check_store_contract(&store).await;
}

#[tokio::test]
async fn test_snapshot_restore_never_overwrites() {
    let store = SqliteStore::in_memory().unwrap();
    store
        .save(&link("meet", "https://old.example.com/", ""))
        .await
        .unwrap();

    let data = concat!(
        r#"{"Short":"meet","Long":"https://new.example.com/","Created":"2022-06-02T01:02:03Z","LastEdit":"2022-06-02T01:02:03Z","Owner":"x@example.com"}"#,
        "\n",
        r#"{"Short":"who","Long":"http://who/","Created":"2022-06-02T01:02:03Z","LastEdit":"2022-06-02T01:02:03Z"}"#,
        "\n",
        r#"{"Short":"","Long":"http://nameless/","Created":"2022-06-02T01:02:03Z","LastEdit":"2022-06-02T01:02:03Z"}"#,
        "\n",
    );
    let restored = snapshot::restore(&store, data.as_bytes()).await.unwrap();
    assert_eq!(restored, 1);

    // the existing link kept its target; the new one appeared; the
    // nameless line was skipped
    assert_eq!(store.load("meet").await.unwrap().long, "https://old.example.com/");
    assert_eq!(store.load("who").await.unwrap().long, "http://who/");
    assert_eq!(store.load_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_snapshot_export_restore_round_trip() {
    let store = SqliteStore::in_memory().unwrap();
    store.save(&link("who", "http://who/", "a@example.com")).await.unwrap();
    store.save(&link("meet", "https://meet.google.com/lookup/", "")).await.unwrap();

    let data = snapshot::export(&store).await.unwrap();
    // sorted by short name, one document per line
    let text = String::from_utf8(data.clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains(r#""Short":"meet""#));
    assert!(lines[1].contains(r#""Short":"who""#));

    let copy = SqliteStore::in_memory().unwrap();
    let restored = snapshot::restore(&copy, &data).await.unwrap();
    assert_eq!(restored, 2);
    assert_eq!(copy.load("who").await.unwrap(), store.load("who").await.unwrap());
    assert_eq!(copy.load("meet").await.unwrap(), store.load("meet").await.unwrap());
}

async fn test_service(identity: Arc<dyn golinks::identity::Provider>) -> Service {
    let store: Arc<dyn LinkStore> = Arc::new(SqliteStore::in_memory().unwrap());
    let clicks = Arc::new(ClickCounter::new(Arc::clone(&store)).await.unwrap());
    Service {
        store,
        clicks,
        identity,
    }
}

#[tokio::test]
async fn test_save_redirect_detail_flow() {
    let svc = test_service(Arc::new(StaticProvider(User::named("christopher@example.com")))).await;

    let request = SaveRequest {
        short: "nyt".to_string(),
        long: "https://nytimes.com/tech".to_string(),
        owner: None,
    };
    let response = handlers::save(request, svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::CREATED);
    assert_eq!(response.headers().get("Location").unwrap(), "/nyt");

    // redirect with remainder and query
    let response = handlers::go("/nyt/section", "a=1", svc.clone())
        .await
        .unwrap()
        .into_response();
    assert_eq!(response.status(), warp::http::StatusCode::FOUND);
    assert_eq!(
        response.headers().get("Location").unwrap(),
        "https://nytimes.com/tech/section?a=1"
    );

    // the click shows up in detail
    let response = handlers::detail("nyt", svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let details: DetailsResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(details.link.short, "nyt");
    assert_eq!(details.link.owner, "christopher@example.com");
    assert_eq!(details.clicks, 1);

    // a second save by the owner updates in place and keeps Created
    let request = SaveRequest {
        short: "nyt".to_string(),
        long: "https://nytimes.com/".to_string(),
        owner: None,
    };
    let response = handlers::save(request, svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    let updated = svc.store.load("nyt").await.unwrap();
    assert_eq!(updated.long, "https://nytimes.com/");
    assert_eq!(updated.created, details.link.created);

    // another user may not edit it, an admin may
    let other = Service {
        identity: Arc::new(StaticProvider(User::named("bar@example.com"))),
        ..svc.clone()
    };
    let request = SaveRequest {
        short: "nyt".to_string(),
        long: "https://example.com/".to_string(),
        owner: None,
    };
    let response = handlers::save(request.clone(), other.clone())
        .await
        .unwrap()
        .into_response();
    assert_eq!(response.status(), warp::http::StatusCode::FORBIDDEN);

    let admin = Service {
        identity: Arc::new(StaticProvider(User {
            login: "root@example.com".to_string(),
            is_admin: true,
        })),
        ..svc.clone()
    };
    let request = SaveRequest {
        owner: Some("christopher@example.com".to_string()),
        ..request
    };
    let response = handlers::save(request, admin).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::OK);

    // delete by a non-owner is forbidden, by the owner final
    let response = handlers::delete("nyt", other).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::FORBIDDEN);
    let response = handlers::delete("nyt", svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    let response = handlers::go("/nyt", "", svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_save_validation() {
    let svc = test_service(Arc::new(StaticProvider(User::named("foo@example.com")))).await;

    for (short, long) in [
        ("", "http://x/"),
        ("ok", ""),
        ("bad name", "http://x/"),
        ("ok", "http://x/{{#if Path}}"),
    ] {
        let request = SaveRequest {
            short: short.to_string(),
            long: long.to_string(),
            owner: None,
        };
        let response = handlers::save(request, svc.clone()).await.unwrap().into_response();
        assert_eq!(
            response.status(),
            warp::http::StatusCode::BAD_REQUEST,
            "save({short:?}, {long:?})"
        );
    }

    // nothing was stored along the way
    assert!(svc.store.load_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_user_templates_and_anonymous_requests() {
    let svc = test_service(Arc::new(StaticProvider(User::named("foo@example.com")))).await;

    let request = SaveRequest {
        short: "me".to_string(),
        long: "http://who/{{User}}".to_string(),
        owner: None,
    };
    let response = handlers::save(request, svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::CREATED);

    let response = handlers::go("/me", "", svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::FOUND);
    assert_eq!(
        response.headers().get("Location").unwrap(),
        "http://who/foo@example.com"
    );

    // anonymous requester hits the no-user condition
    let anonymous = Service {
        identity: Arc::new(AnonymousProvider { allow_unknown: true }),
        ..svc.clone()
    };
    let response = handlers::go("/me", "", anonymous.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::UNAUTHORIZED);

    // with unknown users allowed, anonymous saves create unowned links
    let request = SaveRequest {
        short: "open".to_string(),
        long: "http://open/".to_string(),
        owner: None,
    };
    let response = handlers::save(request.clone(), anonymous).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::CREATED);
    assert_eq!(svc.store.load("open").await.unwrap().owner, "");

    // with unknown users rejected, the save fails outright
    let closed = Service {
        identity: Arc::new(AnonymousProvider { allow_unknown: false }),
        ..svc.clone()
    };
    let request = SaveRequest {
        short: "closed".to_string(),
        ..request
    };
    let response = handlers::save(request, closed).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_plus_suffix_redirects_to_detail() {
    let svc = test_service(Arc::new(StaticProvider(User::named("foo@example.com")))).await;
    let response = handlers::go("/nyt+", "", svc).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::FOUND);
    assert_eq!(response.headers().get("Location").unwrap(), "/.detail/nyt");
}

#[tokio::test]
async fn test_mine_filters_by_owner() {
    let svc = test_service(Arc::new(StaticProvider(User::named("user1@example.com")))).await;
    svc.store
        .save(&link("link1", "http://example.com/1", "user1@example.com"))
        .await
        .unwrap();
    svc.store
        .save(&link("link2", "http://example.com/2", "user2@example.com"))
        .await
        .unwrap();
    svc.store
        .save(&link("link3", "http://example.com/3", "user1@example.com"))
        .await
        .unwrap();

    let response = handlers::mine(svc.clone()).await.unwrap().into_response();
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let links: Vec<Link> = serde_json::from_slice(&body).unwrap();
    let shorts: Vec<&str> = links.iter().map(|l| l.short.as_str()).collect();
    assert_eq!(shorts, vec!["link1", "link3"]);
}
