//! Ingress annotations read by the build stages

use k8s_openapi::api::networking::v1::Ingress;
use thiserror::Error;

use super::model::{CookieBasedAffinity, Protocol};

/// Rewrite the request path prefix before forwarding to the backend
pub const BACKEND_PATH_PREFIX: &str = "appgw.ingress.kubernetes.io/backend-path-prefix";
/// Host header sent to the backend
pub const BACKEND_HOSTNAME: &str = "appgw.ingress.kubernetes.io/backend-hostname";
/// `http` or `https` towards the backend
pub const BACKEND_PROTOCOL: &str = "appgw.ingress.kubernetes.io/backend-protocol";
/// `true` enables cookie based session affinity
pub const COOKIE_BASED_AFFINITY: &str = "appgw.ingress.kubernetes.io/cookie-based-affinity";
/// Backend request timeout (seconds)
pub const REQUEST_TIMEOUT: &str = "appgw.ingress.kubernetes.io/request-timeout";
/// `true` redirects HTTP to HTTPS for TLS hosts
pub const SSL_REDIRECT: &str = "appgw.ingress.kubernetes.io/ssl-redirect";
/// Frontend port used instead of 80/443
pub const OVERRIDE_FRONTEND_PORT: &str = "appgw.ingress.kubernetes.io/override-frontend-port";

/// Ingress class annotation
pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";
/// Ingress class handled by this operator
pub const APPLICATION_GATEWAY_INGRESS_CLASS: &str = "azure/application-gateway";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("annotation {annotation} is missing")]
    Missing { annotation: &'static str },

    #[error("annotation {annotation} has invalid value {value:?}")]
    Invalid {
        annotation: &'static str,
        value: String,
    },
}

fn raw<'a>(ingress: &'a Ingress, annotation: &'static str) -> Result<&'a str, AnnotationError> {
    ingress
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotation))
        .map(String::as_str)
        .ok_or(AnnotationError::Missing { annotation })
}

fn parse_bool(ingress: &Ingress, annotation: &'static str) -> Result<bool, AnnotationError> {
    let value = raw(ingress, annotation)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(AnnotationError::Invalid {
            annotation,
            value: value.to_string(),
        }),
    }
}

fn parse_i32(ingress: &Ingress, annotation: &'static str) -> Result<i32, AnnotationError> {
    let value = raw(ingress, annotation)?;
    value.trim().parse().map_err(|_| AnnotationError::Invalid {
        annotation,
        value: value.to_string(),
    })
}

/// True when the ingress is annotated with our ingress class
pub fn is_application_gateway_ingress(ingress: &Ingress) -> bool {
    let by_annotation = raw(ingress, INGRESS_CLASS)
        .is_ok_and(|class| class == APPLICATION_GATEWAY_INGRESS_CLASS);
    let by_class_name = ingress
        .spec
        .as_ref()
        .and_then(|s| s.ingress_class_name.as_deref())
        .is_some_and(|class| class == APPLICATION_GATEWAY_INGRESS_CLASS);
    by_annotation || by_class_name
}

pub fn backend_path_prefix(ingress: &Ingress) -> Result<String, AnnotationError> {
    raw(ingress, BACKEND_PATH_PREFIX).map(str::to_string)
}

pub fn backend_hostname(ingress: &Ingress) -> Result<String, AnnotationError> {
    raw(ingress, BACKEND_HOSTNAME).map(str::to_string)
}

pub fn backend_protocol(ingress: &Ingress) -> Result<Protocol, AnnotationError> {
    let value = raw(ingress, BACKEND_PROTOCOL)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "http" => Ok(Protocol::Http),
        "https" => Ok(Protocol::Https),
        _ => Err(AnnotationError::Invalid {
            annotation: BACKEND_PROTOCOL,
            value: value.to_string(),
        }),
    }
}

pub fn cookie_based_affinity(ingress: &Ingress) -> Result<CookieBasedAffinity, AnnotationError> {
    parse_bool(ingress, COOKIE_BASED_AFFINITY).map(|enabled| {
        if enabled {
            CookieBasedAffinity::Enabled
        } else {
            CookieBasedAffinity::Disabled
        }
    })
}

pub fn request_timeout(ingress: &Ingress) -> Result<i32, AnnotationError> {
    parse_i32(ingress, REQUEST_TIMEOUT)
}

/// Missing or malformed values mean no redirect
pub fn is_ssl_redirect(ingress: &Ingress) -> bool {
    parse_bool(ingress, SSL_REDIRECT).unwrap_or(false)
}

pub fn override_frontend_port(ingress: &Ingress) -> Result<i32, AnnotationError> {
    let port = parse_i32(ingress, OVERRIDE_FRONTEND_PORT)?;
    if (1..=65535).contains(&port) {
        Ok(port)
    } else {
        Err(AnnotationError::Invalid {
            annotation: OVERRIDE_FRONTEND_PORT,
            value: port.to_string(),
        })
    }
}
