use async_trait::async_trait;

/// User is the identity attached to a request by whatever identity service
/// fronts the deployment. An empty login means the requester is anonymous.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct User {
    pub login: String,
    pub is_admin: bool,
}

impl User {
    pub fn named(login: &str) -> Self {
        Self {
            login: login.to_string(),
            is_admin: false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.login.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct IdentityError(pub String);

impl std::fmt::Display for IdentityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IdentityError {}

/// Provider resolves the identity behind a request. Real deployments wrap a
/// network identity service; the implementations here cover development and
/// open deployments.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn current_user(&self) -> Result<User, IdentityError>;
}

/// Reports the same user for every request.
pub struct StaticProvider(pub User);

#[async_trait]
impl Provider for StaticProvider {
    async fn current_user(&self) -> Result<User, IdentityError> {
        Ok(self.0.clone())
    }
}

/// Reports an anonymous user when unknown requesters are allowed, and an
/// error otherwise.
pub struct AnonymousProvider {
    pub allow_unknown: bool,
}

#[async_trait]
impl Provider for AnonymousProvider {
    async fn current_user(&self) -> Result<User, IdentityError> {
        if self.allow_unknown {
            Ok(User::default())
        } else {
            Err(IdentityError("cannot determine current user".to_string()))
        }
    }
}
