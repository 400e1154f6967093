//! `GET /docs` (Swagger UI) and `GET /api/docs/json` (the OpenAPI document
//! it points at). Supplemented beyond the distilled spec (spec.md §6 lists
//! both endpoints but leaves their content unspecified); served from an
//! embedded string rather than pulling in a codegen macro for two read-only
//! routes.

use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;

const OPENAPI_JSON: &str = include_str!("../../openapi.json");

pub async fn swagger_ui() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>API Gateway docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({
        url: '/api/docs/json',
        dom_id: '#swagger-ui',
      });
    };
  </script>
</body>
</html>"#,
    )
}

pub async fn openapi_json() -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(serde_json::from_str::<serde_json::Value>(OPENAPI_JSON).unwrap_or_default()),
    )
        .into_response()
}
