//! Bearer-token gate in front of the `/api` routes.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

/// Require `Authorization: Bearer <token>` on every request.
///
/// An unset token fails closed: the API answers 503 until one is
/// configured, it never serves open. Anything other than an exact
/// match gets 401 without detail.
pub async fn require_bearer(
    State(expected): State<Option<String>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = expected else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "api token not configured",
        );
    };

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(req).await,
        _ => json_error(StatusCode::UNAUTHORIZED, "unauthorized"),
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(format!(r#"{{"error":"{message}"}}"#)))
        .expect("infallible: static header and body")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn app(token: Option<&str>) -> Router {
        Router::new()
            .route("/probe", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                token.map(str::to_string),
                require_bearer,
            ))
    }

    fn request(auth: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/probe");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn matching_token_passes() {
        let res = app(Some("s3cret"))
            .oneshot(request(Some("Bearer s3cret")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_or_missing_token_is_rejected() {
        let app = app(Some("s3cret"));
        for auth in [None, Some("Bearer nope"), Some("s3cret"), Some("bearer s3cret")] {
            let res = app.clone().oneshot(request(auth)).await.unwrap();
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "auth {auth:?}");
        }
    }

    #[tokio::test]
    async fn unset_token_fails_closed() {
        let res = app(None)
            .oneshot(request(Some("Bearer anything")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
