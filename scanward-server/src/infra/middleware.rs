//! Response hardening and CORS, built from the loaded configuration.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    set_header::SetResponseHeaderLayer,
};

use scanward_config::{CorsConfig, HstsSettings, SecurityConfig};

/// Maximum accepted request body.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn build_hsts_header(settings: &HstsSettings) -> Option<HeaderValue> {
    let mut directives = vec![format!("max-age={}", settings.max_age)];
    if settings.include_subdomains {
        directives.push("includeSubDomains".to_string());
    }
    if settings.preload {
        directives.push("preload".to_string());
    }

    HeaderValue::from_str(&directives.join("; ")).ok()
}

/// Wildcard (or an empty list) allows any origin; otherwise only the listed
/// origins are reflected.
pub fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter(|origin| origin.trim() != "*")
        .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
        .collect();

    let allow_origin = if cors.is_wildcard_included() || origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Adds the static security headers and the body limit to every route.
pub fn harden<S>(router: Router<S>, security: &SecurityConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let router = router.layer(
        ServiceBuilder::new()
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("SAMEORIGIN"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static("x-xss-protection"),
                HeaderValue::from_static("1; mode=block"),
            )),
    );

    match build_hsts_header(&security.hsts) {
        Some(value) => router.layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            value,
        )),
        None => router,
    }
}
