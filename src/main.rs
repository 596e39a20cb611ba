use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use golinks::Service;
use golinks::identity::{AnonymousProvider, Provider, StaticProvider, User};
use golinks::stats::ClickCounter;
use golinks::store::LinkStore;
use golinks::store::file::FileStore;
use golinks::store::sqlite::SqliteStore;
use golinks::{resolve, snapshot};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "private shortlink redirector")]
struct Args {
    /// Service name links are addressed by, the "go" in http://go/foo.
    #[arg(long, env = "GOLINKS_HOSTNAME", default_value = "go")]
    hostname: String,
    #[arg(long, env = "GOLINKS_LISTEN", default_value = "127.0.0.1:3030")]
    listen: SocketAddr,
    /// Path of the SQLite database storing links.
    #[arg(long, env = "GOLINKS_SQLITEDB")]
    sqlitedb: Option<String>,
    /// Directory of per-link JSON files, as an alternative to --sqlitedb.
    #[arg(long, env = "GOLINKS_LINKDIR", conflicts_with = "sqlitedb")]
    linkdir: Option<PathBuf>,
    /// Snapshot file restored on startup; existing links are never
    /// overwritten.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Resolve a link reference to its final URL, print it, and exit.
    #[arg(long)]
    resolve: Option<String>,
    /// Seconds between click-stat flushes to storage.
    #[arg(long, default_value_t = 60)]
    flush_interval: u64,
    /// Login reported for every request, in place of a real identity
    /// service.
    #[arg(long, env = "GOLINKS_LOGIN")]
    login: Option<String>,
    /// Accept requests whose user cannot be determined.
    #[arg(long, default_value_t = false)]
    allow_unknown_users: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    tracing::debug!("{:?}", &args);

    let store: Arc<dyn LinkStore> = if let Some(dir) = &args.linkdir {
        Arc::new(FileStore::open(dir)?)
    } else if let Some(path) = &args.sqlitedb {
        Arc::new(SqliteStore::open(path)?)
    } else if args.resolve.is_some() {
        // resolving from a snapshot needs no durable storage
        Arc::new(SqliteStore::in_memory()?)
    } else {
        return Err("one of --sqlitedb or --linkdir is required".into());
    };

    if let Some(path) = &args.snapshot {
        let data = std::fs::read(path)?;
        if let Err(e) = snapshot::restore(store.as_ref(), &data).await {
            tracing::error!("restoring snapshot: {e}");
        }
    }

    if let Some(reference) = &args.resolve {
        let target = resolve::resolve(store.as_ref(), &args.hostname, reference).await?;
        println!("{target}");
        return Ok(());
    }

    let identity: Arc<dyn Provider> = match &args.login {
        Some(login) => Arc::new(StaticProvider(User::named(login))),
        None => Arc::new(AnonymousProvider {
            allow_unknown: args.allow_unknown_users,
        }),
    };

    let clicks = Arc::new(ClickCounter::new(Arc::clone(&store)).await?);
    tokio::spawn(Arc::clone(&clicks).run_flush_loop(Duration::from_secs(args.flush_interval)));

    let svc = Service {
        store,
        clicks: Arc::clone(&clicks),
        identity,
    };
    let routes = golinks::routes::routes(svc);

    tracing::info!("serving http://{}/ on {}", args.hostname, args.listen);
    warp::serve(routes)
        .bind(args.listen)
        .await
        .graceful(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C signal handler");
        })
        .run()
        .await;

    // clicks from the final interval would otherwise be lost
    if let Err(e) = clicks.flush().await {
        tracing::warn!("final stats flush: {e}");
    }

    tracing::info!("gracefully exited");
    Ok(())
}
