//! Request pipeline: a chain of stages `(context, next) → response` in front
//! of each operation handler. Auth and idempotency are stages; handlers only
//! see an authenticated, deduplicated context.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::auth::{Authenticator, Role, Subject};
use crate::error::{DispatchError, Result};
use crate::idempotency::{Admission, IdemKey, IdempotencyCache, StoredResponse};

/// Everything a stage or handler may read about the in-flight request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: &'static str,
    pub token: Option<String>,
    pub subject: Option<Subject>,
    pub client_key: Option<String>,
    pub body: serde_json::Value,
}

impl RequestContext {
    pub fn new(
        endpoint: &'static str,
        token: Option<&str>,
        client_key: Option<&str>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            endpoint,
            token: token.map(str::to_string),
            subject: None,
            client_key: client_key.map(str::to_string),
            body,
        }
    }

    /// The authenticated subject, or `unauthorized`.
    pub fn subject(&self) -> Result<&Subject> {
        self.subject
            .as_ref()
            .ok_or_else(|| DispatchError::Unauthorized("request has no subject".into()))
    }

    /// The authenticated subject, required to hold `role`.
    pub fn require_role(&self, role: Role) -> Result<&Subject> {
        let subject = self.subject()?;
        if subject.role != role {
            return Err(DispatchError::Unauthorized(format!(
                "operation requires a {} subject",
                match role {
                    Role::Rider => "rider",
                    Role::Driver => "driver",
                }
            )));
        }
        Ok(subject)
    }

    /// Deserialize the request body into its typed record.
    pub fn parse_body<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|err| DispatchError::validation("body", err.to_string()))
    }
}

/// Boundary response; the body is kept as JSON so idempotent replays are
/// byte-identical once serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, payload: &T) -> Result<Response> {
        Ok(Response {
            status,
            body: serde_json::to_value(payload)?,
        })
    }

    pub fn body_string(&self) -> String {
        self.body.to_string()
    }

    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|err| DispatchError::validation("body", err.to_string()))
    }
}

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'a>>;

/// One pipeline stage. Call `next.run(ctx)` to continue the chain.
pub trait Stage: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> StageFuture<'a>;
}

/// Terminal operation handler behind the stages.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &RequestContext) -> Result<Response>;
}

/// The remainder of the chain from a stage's point of view.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub fn run(self, ctx: &'a mut RequestContext) -> StageFuture<'a> {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(
                ctx,
                Next {
                    stages: rest,
                    handler: self.handler,
                },
            ),
            None => Box::pin(async move { self.handler.call(ctx).await }),
        }
    }
}

/// An ordered stage chain shared by a family of endpoints.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        handler: &dyn Handler,
    ) -> Result<Response> {
        Next {
            stages: &self.stages,
            handler,
        }
        .run(ctx)
        .await
    }
}

// ============================================================================
// Auth stage
// ============================================================================

pub struct AuthStage {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthStage {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl Stage for AuthStage {
    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> StageFuture<'a> {
        Box::pin(async move {
            let token = ctx
                .token
                .as_deref()
                .ok_or_else(|| DispatchError::Unauthorized("missing bearer token".into()))?;
            ctx.subject = Some(self.authenticator.authenticate(token)?);
            next.run(ctx).await
        })
    }
}

// ============================================================================
// Idempotency stage
// ============================================================================

pub struct IdempotencyStage {
    cache: Arc<IdempotencyCache>,
}

impl IdempotencyStage {
    pub fn new(cache: Arc<IdempotencyCache>) -> Self {
        Self { cache }
    }
}

impl Stage for IdempotencyStage {
    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> StageFuture<'a> {
        Box::pin(async move {
            // No client key means the caller opted out of replay protection.
            let Some(client_key) = ctx.client_key.clone() else {
                return next.run(ctx).await;
            };
            let subject_id = ctx.subject()?.id.clone();
            let key = IdemKey {
                endpoint: ctx.endpoint.to_string(),
                subject_id,
                client_key,
            };
            let fingerprint = crate::idempotency::fingerprint(&ctx.body);

            match self.cache.admit(&key, &fingerprint).await? {
                Admission::Replay(stored) => {
                    let body = serde_json::from_str(&stored.body)
                        .map_err(|err| DispatchError::Unavailable {
                            dependency: "idempotency cache",
                            details: err.to_string(),
                        })?;
                    Ok(Response {
                        status: stored.status_code,
                        body,
                    })
                }
                Admission::Conflict => Err(DispatchError::conflict(
                    "idempotency key reused with a different request body",
                )),
                Admission::Fresh => match next.run(ctx).await {
                    Ok(response) => {
                        self.cache
                            .complete(
                                &key,
                                fingerprint,
                                StoredResponse {
                                    status_code: response.status,
                                    body: response.body_string(),
                                },
                            )
                            .await;
                        Ok(response)
                    }
                    Err(err) => {
                        // Errors are not replayed; the key stays usable.
                        self.cache.abandon(&key);
                        Err(err)
                    }
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenRegistry;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn call(&self, ctx: &RequestContext) -> Result<Response> {
            Response::json(
                200,
                &json!({
                    "endpoint": ctx.endpoint,
                    "subject": ctx.subject.as_ref().map(|s| s.id.clone()),
                }),
            )
        }
    }

    #[tokio::test]
    async fn auth_stage_populates_subject() {
        let registry = Arc::new(TokenRegistry::new());
        registry.register("tok", Subject::rider("rider-9"));
        let pipeline = Pipeline::new(vec![Arc::new(AuthStage::new(registry))]);

        let mut ctx = RequestContext::new("get_ride", Some("tok"), None, json!({}));
        let response = pipeline.execute(&mut ctx, &EchoHandler).await.unwrap();
        assert_eq!(response.body["subject"], "rider-9");
    }

    #[tokio::test]
    async fn auth_stage_rejects_missing_and_unknown_tokens() {
        let registry = Arc::new(TokenRegistry::new());
        let pipeline = Pipeline::new(vec![Arc::new(AuthStage::new(registry))]);

        let mut ctx = RequestContext::new("get_ride", None, None, json!({}));
        assert!(matches!(
            pipeline.execute(&mut ctx, &EchoHandler).await.unwrap_err(),
            DispatchError::Unauthorized(_)
        ));

        let mut ctx = RequestContext::new("get_ride", Some("bad"), None, json!({}));
        assert!(matches!(
            pipeline.execute(&mut ctx, &EchoHandler).await.unwrap_err(),
            DispatchError::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn require_role_distinguishes_subjects() {
        let mut ctx = RequestContext::new("accept_ride", None, None, json!({}));
        ctx.subject = Some(Subject::driver("drv-1"));
        assert!(ctx.require_role(Role::Driver).is_ok());
        assert!(matches!(
            ctx.require_role(Role::Rider).unwrap_err(),
            DispatchError::Unauthorized(_)
        ));
    }
}
