#![allow(clippy::collapsible_if)]

use std::{collections::HashSet, net::SocketAddr};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::models::{
    DetectingListenerConfig, GatewayConfig, LoadBalancerConfig, MappingRuleConfig, ProtocolKind,
    StaticRouteConfig, StaticServiceConfig, StickyKeySource, TimeoutConfig, TlsConfig,
};

static TEMPLATE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]*)\}").expect("valid placeholder regex"));

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Route conflict detected: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem found
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !config.http.enabled && config.listeners.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "listeners".to_string(),
            });
        }

        if config.http.enabled {
            if let Err(e) = Self::validate_listen_address(&config.http.listen_addr) {
                errors.push(e);
            }
        }

        for route in &config.http.routes {
            errors.extend(Self::validate_static_route(route));
        }
        for (i, rule) in config.http.mapping_rules.iter().enumerate() {
            errors.extend(Self::validate_mapping_rule(i, rule));
        }
        errors.extend(Self::check_route_conflicts(&config.http.routes));

        let mut names = HashSet::new();
        for listener in &config.listeners {
            if !names.insert(listener.name.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("listener '{}'", listener.name),
                    message: "Listener names must be unique".to_string(),
                });
            }
            errors.extend(Self::validate_listener(listener));
        }

        if config.requires_tls() {
            match &config.tls {
                Some(tls) => {
                    if let Err(e) = Self::validate_tls_config(tls) {
                        errors.push(e);
                    }
                }
                None => errors.push(ValidationError::InvalidTls {
                    message: "A listener accepts TLS but no [tls] section is configured"
                        .to_string(),
                }),
            }
        }

        errors.extend(Self::validate_timeouts(&config.timeouts));

        for service in &config.services {
            errors.extend(Self::validate_service(service));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_static_route(route: &StaticRouteConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let prefix = &route.prefix;

        if !prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("route prefix: {prefix}"),
                message: "Route prefixes must start with '/'".to_string(),
            });
        }

        if route.targets.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("route '{prefix}' targets"),
                message: "Routes must have at least one target".to_string(),
            });
        }
        for (i, target) in route.targets.iter().enumerate() {
            if let Err(e) = Self::validate_url(target, &format!("route '{prefix}' target {}", i + 1))
            {
                errors.push(e);
            }
        }

        if let Err(e) = Self::validate_load_balancer(&format!("route '{prefix}'"), &route.load_balancer)
        {
            errors.push(e);
        }

        errors
    }

    fn validate_mapping_rule(index: usize, rule: &MappingRuleConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let context = format!("mapping rule {}", index + 1);

        if !rule.registry_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{context} registry_prefix"),
                message: "Registry prefixes must start with '/'".to_string(),
            });
        }

        if !rule.uri_template.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("{context} uri_template"),
                message: "URI templates must start with '/'".to_string(),
            });
        }

        for capture in TEMPLATE_PLACEHOLDER.captures_iter(&rule.uri_template) {
            let name = &capture[1];
            if name != "path" && name != "version" {
                errors.push(ValidationError::InvalidField {
                    field: format!("{context} uri_template"),
                    message: format!("Unknown placeholder '{{{name}}}', use {{path}} or {{version}}"),
                });
            }
        }

        if let Err(e) = Self::validate_load_balancer(&context, &rule.load_balancer) {
            errors.push(e);
        }

        errors
    }

    fn validate_listener(listener: &DetectingListenerConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let context = format!("listener '{}'", listener.name);

        if let Err(e) = Self::validate_listen_address(&listener.listen_addr) {
            errors.push(e);
        }

        if listener.protocols.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("{context} protocols"),
                message: "At least one protocol must be configured".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for protocol in &listener.protocols {
            if !seen.insert(*protocol) {
                errors.push(ValidationError::InvalidField {
                    field: format!("{context} protocols"),
                    message: format!("Protocol '{protocol}' is listed more than once"),
                });
            }
        }

        if listener.protocols == [ProtocolKind::Tls] {
            errors.push(ValidationError::InvalidField {
                field: format!("{context} protocols"),
                message: "TLS needs at least one application protocol to detect inside it"
                    .to_string(),
            });
        }

        if listener.default_virtual_host.trim().is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("{context} default_virtual_host"),
                message: "Default virtual host cannot be empty".to_string(),
            });
        }

        if listener.max_detection_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("{context} max_detection_bytes"),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Err(e) = Self::validate_load_balancer(&context, &listener.load_balancer) {
            errors.push(e);
        }

        errors
    }

    fn validate_load_balancer(context: &str, config: &LoadBalancerConfig) -> ValidationResult<()> {
        if config.sticky_capacity == 0 {
            return Err(ValidationError::InvalidField {
                field: format!("{context} load_balancer.sticky_capacity"),
                message: "Sticky cache capacity must be greater than 0".to_string(),
            });
        }

        match &config.sticky_key {
            StickyKeySource::Header { name } | StickyKeySource::Cookie { name }
                if name.trim().is_empty() =>
            {
                Err(ValidationError::InvalidField {
                    field: format!("{context} load_balancer.sticky_key"),
                    message: "Sticky key name cannot be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn validate_timeouts(timeouts: &TimeoutConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for (field, value) in [
            ("timeouts.detection_timeout_ms", timeouts.detection_timeout_ms),
            ("timeouts.connect_timeout_ms", timeouts.connect_timeout_ms),
            ("timeouts.response_timeout_ms", timeouts.response_timeout_ms),
        ] {
            if value == 0 {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }
        errors
    }

    fn validate_service(service: &StaticServiceConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let context = format!("service '{}' in '{}'", service.service_id, service.path);

        if service.path.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{context} path"),
            });
        }
        if service.service_id.is_empty() || service.container_id.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: context.clone(),
                message: "service_id and container_id are required".to_string(),
            });
        }
        for url in &service.urls {
            match url::Url::parse(url) {
                Ok(parsed) if parsed.host().is_some() => {}
                Ok(_) => errors.push(ValidationError::InvalidField {
                    field: format!("{context} url"),
                    message: format!("URL '{url}' has no host"),
                }),
                Err(e) => errors.push(ValidationError::InvalidField {
                    field: format!("{context} url"),
                    message: format!("Invalid URL '{url}': {e}"),
                }),
            }
        }
        errors
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Validate TLS configuration
    fn validate_tls_config(config: &TlsConfig) -> ValidationResult<()> {
        if !std::path::Path::new(&config.cert_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Certificate file does not exist: {}", config.cert_path),
            });
        }

        if !std::path::Path::new(&config.key_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Private key file does not exist: {}", config.key_path),
            });
        }

        Ok(())
    }

    /// Two static routes with the same prefix can never both be selected.
    fn check_route_conflicts(routes: &[StaticRouteConfig]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for route in routes {
            if !seen.insert(route.prefix.as_str()) {
                errors.push(ValidationError::RouteConflict {
                    message: format!("Duplicate route configuration for prefix '{}'", route.prefix),
                });
            }
        }
        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{DetectingListenerConfig, ProtocolKind};

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfig::builder()
            .route(StaticRouteConfig {
                prefix: "/api".to_string(),
                targets: vec!["http://localhost:3000".to_string()],
                load_balancer: LoadBalancerConfig::default(),
                policies: vec![],
                rewrite: false,
            })
            .listener(DetectingListenerConfig::new(
                "brokers",
                "127.0.0.1:61613",
                vec![ProtocolKind::Stomp, ProtocolKind::Mqtt],
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(GatewayConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_rejects_tls_listener_without_certificates() {
        let mut config = minimal_valid_config();
        config.listeners[0].protocols.push(ProtocolKind::Tls);

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("TLS"));
    }

    #[test]
    fn validate_rejects_unknown_template_placeholder() {
        let mut config = minimal_valid_config();
        config.http.mapping_rules.push(MappingRuleConfig {
            registry_prefix: "/webapps".to_string(),
            uri_template: "/{context}".to_string(),
            enabled_versions: vec![],
            load_balancer: LoadBalancerConfig::default(),
            policies: vec![],
            rewrite: false,
        });

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("{context}"));
    }

    #[test]
    fn validate_rejects_duplicate_prefixes_and_zero_timeouts() {
        let mut config = minimal_valid_config();
        let duplicate = config.http.routes[0].clone();
        config.http.routes.push(duplicate);
        config.timeouts.detection_timeout_ms = 0;

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Duplicate route"));
        assert!(message.contains("detection_timeout_ms"));
    }

    #[test]
    fn validate_rejects_non_http_targets() {
        let mut config = minimal_valid_config();
        config.http.routes[0].targets = vec!["stomp://broker:61613".to_string()];

        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_zero_sticky_capacity() {
        let mut config = minimal_valid_config();
        config.listeners[0].load_balancer.sticky_capacity = 0;

        assert!(GatewayConfigValidator::validate(&config).is_err());
    }
}
