//! axum integration.
//!
//! ```ignore
//! let agent = Arc::new(BotTelemetryAgent::new(config)?);
//! let app = Router::new()
//!     .route("/", get(index))
//!     .layer(axum::middleware::from_fn_with_state(agent, guard));
//! ```

use crate::agent::{denied_response, BotTelemetryAgent, Verdict};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

/// Middleware that runs every request through the agent.
pub async fn guard(
    State(agent): State<Arc<BotTelemetryAgent>>,
    request: Request,
    next: Next,
) -> Response {
    // The request body is not Sync, so snapshot before awaiting anything.
    let Some(ctx) = agent.context_for(&request) else {
        return next.run(request).await;
    };

    match agent.process(&ctx).await {
        Verdict::PassThrough => next.run(request).await,
        Verdict::Deny => denied_response().map(Body::from),
    }
}
