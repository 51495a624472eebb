//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Module names are non-empty and unique across all module kinds
//! - Validate value ranges (limits > 0, listener ports set)
//! - Bridge URLs and prefixes are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use url::Url;

use super::schema::ProxyConfig;

/// One semantic problem, located by a dotted path into the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.limits.max_request_bytes == 0 {
        errors.push(ValidationError::new("limits.max_request_bytes", "must be greater than 0"));
    }
    if config.limits.read_chunk_size == 0 {
        errors.push(ValidationError::new("limits.read_chunk_size", "must be greater than 0"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.bridge_request_secs == 0 {
        errors.push(ValidationError::new("timeouts.bridge_request_secs", "must be greater than 0"));
    }
    if config.registry.idle_timeout_secs == 0 {
        errors.push(ValidationError::new("registry.idle_timeout_secs", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<std::net::SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", config.observability.metrics_address),
        ));
    }

    let mut names = HashSet::new();
    let mut check_listener = |section: &str, index: usize, name: &str, port: u16, errors: &mut Vec<ValidationError>| {
        let field = format!("{section}[{index}]");
        if name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !names.insert(name.to_string()) {
            errors.push(ValidationError::new(format!("{field}.name"), format!("duplicate module name {name:?}")));
        }
        if port == 0 {
            errors.push(ValidationError::new(format!("{field}.port"), "must be set"));
        }
    };

    for (i, module) in config.http.iter().enumerate() {
        check_listener("http", i, &module.name, module.port, &mut errors);
        check_max_connections("http", i, module.max_connections, &mut errors);
    }

    for (i, module) in config.http_agent.iter().enumerate() {
        check_listener("http_agent", i, &module.name, module.port, &mut errors);
        check_max_connections("http_agent", i, module.max_connections, &mut errors);
        match Url::parse(&module.bridge_url) {
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
            Ok(_) => errors.push(ValidationError::new(
                format!("http_agent[{i}].bridge_url"),
                "must be an http:// URL with a host",
            )),
            Err(e) => errors.push(ValidationError::new(format!("http_agent[{i}].bridge_url"), e.to_string())),
        }
        check_prefix(&format!("http_agent[{i}].prefix"), &module.prefix, &mut errors);
    }

    for (i, module) in config.bridge_service.iter().enumerate() {
        check_listener("bridge_service", i, &module.name, module.port, &mut errors);
        if module.prefixes.is_empty() {
            errors.push(ValidationError::new(format!("bridge_service[{i}].prefixes"), "must not be empty"));
        }
        for (j, prefix) in module.prefixes.iter().enumerate() {
            check_prefix(&format!("bridge_service[{i}].prefixes[{j}]"), prefix, &mut errors);
        }
    }

    for (i, module) in config.port_map.iter().enumerate() {
        check_listener("port_map", i, &module.name, module.port, &mut errors);
        check_max_connections("port_map", i, module.max_connections, &mut errors);
        if module.target_host.trim().is_empty() {
            errors.push(ValidationError::new(format!("port_map[{i}].target_host"), "must not be empty"));
        }
        if module.target_port == 0 {
            errors.push(ValidationError::new(format!("port_map[{i}].target_port"), "must be set"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_max_connections(section: &str, index: usize, max_connections: usize, errors: &mut Vec<ValidationError>) {
    if max_connections == 0 {
        errors.push(ValidationError::new(
            format!("{section}[{index}].max_connections"),
            "must be greater than 0",
        ));
    }
}

fn check_prefix(field: &str, prefix: &str, errors: &mut Vec<ValidationError>) {
    if !prefix.starts_with('/') {
        errors.push(ValidationError::new(field, format!("{prefix:?} must start with '/'")));
    } else if prefix.contains(['{', '}', '*']) {
        errors.push(ValidationError::new(field, format!("{prefix:?} must not contain route wildcards")));
    }
}
