use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, levels, streak, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(auth::router())
                .merge(users::router())
                .merge(streak::router())
                .merge(levels::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms = latency.as_millis() as u64, "response");
                        } else {
                            tracing::info!(%status, latency_ms = latency.as_millis() as u64, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = build_app(AppState::fake());
        let (status, _) = call(&app, Method::GET, "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_read_own_profile() {
        let app = build_app(AppState::fake());
        let creds = json!({ "identifier": "flow@example.com", "password": "correct-horse" });

        let (status, body) = call(&app, Method::POST, "/api/v1/auth/register", None, Some(creds.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["token_type"], "Bearer");
        let uid = body["user"]["uid"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::POST, "/api/v1/auth/login", None, Some(creds)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["streak"]["continuous_days"], 1);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, me) = call(&app, Method::GET, "/api/v1/users/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["view"], "private");
        assert_eq!(me["email"], "flow@example.com");

        let (_, public) = call(&app, Method::GET, &format!("/api/v1/users/{uid}"), None, None).await;
        assert_eq!(public["view"], "public");
        assert!(public.get("email").is_none());

        let (status, level) = call(&app, Method::GET, "/api/v1/users/me/level", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(level["exp_to_next_level"], 100);

        let (status, logins) = call(&app, Method::GET, "/api/v1/users/me/logins", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logins["dates"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn auth_failures_share_one_response() {
        let app = build_app(AppState::fake());
        call(
            &app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "identifier": "known@example.com", "password": "correct-horse" })),
        )
        .await;

        let (s1, b1) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "identifier": "known@example.com", "password": "wrong-secret" })),
        )
        .await;
        let (s2, b2) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "identifier": "ghost@example.com", "password": "correct-horse" })),
        )
        .await;
        assert_eq!((s1, s2), (StatusCode::UNAUTHORIZED, StatusCode::UNAUTHORIZED));
        assert_eq!(b1, b2);

        let (s3, b3) = call(&app, Method::GET, "/api/v1/users/me", Some("garbage"), None).await;
        assert_eq!(s3, StatusCode::UNAUTHORIZED);
        assert_eq!(b3, b1);

        let (s4, b4) = call(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "identifier": "not-an-email", "password": "correct-horse" })),
        )
        .await;
        assert_eq!(s4, StatusCode::UNAUTHORIZED);
        assert_eq!(b4, b1);
    }

    #[tokio::test]
    async fn admin_routes_check_stored_role() {
        let app = build_app(AppState::fake());
        let (_, body) = call(
            &app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "account": "plain_user", "password": "correct-horse", "channel": "username" })),
        )
        .await;
        let token = body["token"].as_str().unwrap().to_string();
        let uid = body["user"]["uid"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            Method::PUT,
            &format!("/api/v1/admin/users/{uid}/status"),
            Some(&token),
            Some(json!({ "status": "disabled" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn logout_requires_token() {
        let app = build_app(AppState::fake());
        let (status, _) = call(&app, Method::POST, "/api/v1/auth/logout", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
