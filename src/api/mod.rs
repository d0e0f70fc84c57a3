/// API routes and handlers
pub mod account;
pub mod admin;
pub mod middleware;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(account::routes())
        .merge(admin::routes())
}

#[cfg(test)]
mod tests {
    use crate::{
        auth::TokenScope, config::ServerConfig, context::AppContext, db::test_pool,
        server::build_router,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> (Router, AppContext) {
        let ctx = AppContext::from_pool(ServerConfig::for_tests(), test_pool().await);
        (build_router(ctx.clone()), ctx)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_full_lifecycle_over_http() {
        let (app, ctx) = app().await;
        let root = ctx.tokens.issue("root@registry", TokenScope::SuperAdmin).unwrap();

        let (status, mosque) = send(
            &app,
            Method::POST,
            "/api/v1/admin/mosques",
            Some(&root),
            Some(json!({"name": "Central Mosque", "location": "Glasgow"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let mosque_id = mosque["id"].as_str().unwrap().to_string();
        let code = mosque["verification_code"].as_str().unwrap().to_string();

        let (status, admin) = send(
            &app,
            Method::POST,
            &format!("/api/v1/mosques/{}/register", mosque_id),
            None,
            Some(json!({
                "code": code,
                "name": "Bilal",
                "email": "bilal@example.com",
                "password": "a-long-password",
                "application_notes": "Secretary"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(admin.get("password_hash").is_none());
        let admin_id = admin["id"].as_str().unwrap().to_string();

        let credentials = json!({"email": "bilal@example.com", "password": "a-long-password"});
        let (status, outcome) =
            send(&app, Method::POST, "/api/v1/login", None, Some(credentials.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["code"], "PENDING_APPROVAL");

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/api/v1/admin/admins/{}/approve", admin_id),
            Some(&root),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, outcome) =
            send(&app, Method::POST, "/api/v1/login", None, Some(credentials.clone())).await;
        assert_eq!(outcome["outcome"], "success");
        let full = outcome["token"].as_str().unwrap().to_string();

        let (status, own) = send(&app, Method::GET, "/api/v1/me/mosque", Some(&full), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(own["id"], mosque_id.as_str());

        let (status, deletion) = send(
            &app,
            Method::POST,
            &format!("/api/v1/admin/mosques/{}/delete", mosque_id),
            Some(&root),
            Some(json!({"reason": "closed"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deletion["mosque_removed"], true);

        // The earlier full-access token no longer reaches approved-only routes
        let (status, _) = send(&app, Method::GET, "/api/v1/me/mosque", Some(&full), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, outcome) =
            send(&app, Method::POST, "/api/v1/login", None, Some(credentials)).await;
        assert_eq!(outcome["code"], "MOSQUE_DELETED");
        assert_eq!(outcome["deleted_mosque_name"], "Central Mosque");
        let status_token = outcome["token"].as_str().unwrap().to_string();

        let (status, view) =
            send(&app, Method::GET, "/api/v1/me/status", Some(&status_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["admin"]["details"]["status"], "mosque_deleted");

        let (status, _) =
            send(&app, Method::GET, "/api/v1/me/mosque", Some(&status_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(
            &app,
            Method::GET,
            "/api/v1/admin/mosques",
            Some(&status_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_super_admin_routes_require_listed_subject() {
        let (app, ctx) = app().await;

        let (status, _) = send(&app, Method::GET, "/api/v1/admin/mosques", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let stranger = ctx.tokens.issue("stranger", TokenScope::SuperAdmin).unwrap();
        let (status, body) =
            send(&app, Method::GET, "/api/v1/admin/mosques", Some(&stranger), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_self_service_routes_refuse_super_admin_tokens() {
        let (app, ctx) = app().await;
        let root = ctx.tokens.issue("root@registry", TokenScope::SuperAdmin).unwrap();

        let (status, body) = send(&app, Method::GET, "/api/v1/me/status", Some(&root), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "FORBIDDEN");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/me/reverify",
            Some(&root),
            Some(json!({"code": "MSQ-ANY"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_bulk_regenerate_over_http() {
        let (app, ctx) = app().await;
        let root = ctx.tokens.issue("root@registry", TokenScope::SuperAdmin).unwrap();
        let mosque = ctx
            .mosques
            .create_mosque("Masjid Umar", "Cardiff", 30, "root@registry")
            .await
            .unwrap();

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/admin/mosques/bulk-regenerate-codes",
            Some(&root),
            Some(json!({"mosque_ids": [mosque.id, "missing"], "expiry_days": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["status"], "success");
        assert_eq!(results[1]["status"], "error");
        assert_eq!(results[1]["code"], "NOT_FOUND");

        let (status, validation) = send(
            &app,
            Method::POST,
            "/api/v1/mosques/missing/validate-code",
            None,
            Some(json!({"code": "MSQ-ANY"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(validation["valid"], false);

        let (status, audit) =
            send(&app, Method::GET, "/api/v1/admin/audit?limit=10", Some(&root), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit[0]["action_type"], "code_regenerated");
    }
}
