use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod expand;
pub mod handlers;
pub mod identity;
pub mod model;
pub mod resolve;
pub mod routes;
pub mod snapshot;
pub mod stats;
pub mod store;

/// SaveRequest is the body for creating or updating a link. An empty or
/// missing owner assigns the link to the requesting user.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SaveRequest {
    pub short: String,
    pub long: String,
    #[serde(default)]
    pub owner: Option<String>,
}

/// DetailsResponse pairs a link with its current click count.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DetailsResponse {
    pub link: model::Link,
    pub clicks: i64,
}

/// Service is the shared state handed to every request handler.
#[derive(Clone)]
pub struct Service {
    pub store: Arc<dyn store::LinkStore>,
    pub clicks: Arc<stats::ClickCounter>,
    pub identity: Arc<dyn identity::Provider>,
}
