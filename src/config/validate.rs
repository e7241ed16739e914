use std::collections::HashSet;

use thiserror::Error;

use super::{CheckConfig, Config};

/// Structural problems in a single probe declaration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("http check is missing an endpoint")]
    MissingHttpEndpoint,

    #[error("tcp check is missing a host")]
    MissingTcpHost,

    #[error("tcp check is missing a port")]
    MissingTcpPort,

    #[error("command check is missing a command")]
    MissingCheckCommand,

    #[error("unknown health check type '{0}'")]
    UnknownCheckType(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("config contains no services")]
    NoServices,

    #[error("service name is empty")]
    EmptyServiceName,

    #[error("duplicate service name '{0}'")]
    DuplicateServiceName(String),

    #[error("service '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("service '{service}': {source}")]
    Check {
        service: String,
        #[source]
        source: CheckError,
    },
}

/// Validates a single probe declaration against its declared type.
pub fn validate_check(check: &CheckConfig) -> Result<(), CheckError> {
    match check.kind.as_str() {
        "http" => {
            if check.endpoint.is_empty() {
                return Err(CheckError::MissingHttpEndpoint);
            }
        }
        "tcp" | "grpc" => {
            if check.host.is_empty() {
                return Err(CheckError::MissingTcpHost);
            }
            if check.port == 0 {
                return Err(CheckError::MissingTcpPort);
            }
        }
        "command" | "exec" => {
            if check.command.trim().is_empty() {
                return Err(CheckError::MissingCheckCommand);
            }
        }
        other => return Err(CheckError::UnknownCheckType(other.to_string())),
    }
    Ok(())
}

/// Structural validation of a whole config: at least one service, unique
/// non-empty names, non-empty commands and well-formed probes.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    if config.services.is_empty() {
        return Err(ValidationError::NoServices);
    }

    let mut seen = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() {
            return Err(ValidationError::EmptyServiceName);
        }
        if !seen.insert(service.name.as_str()) {
            return Err(ValidationError::DuplicateServiceName(service.name.clone()));
        }
        if service.command.is_empty() || service.command[0].is_empty() {
            return Err(ValidationError::EmptyCommand(service.name.clone()));
        }
        for check in service.health_checks.iter().chain(&service.listeners) {
            validate_check(check).map_err(|source| ValidationError::Check {
                service: service.name.clone(),
                source,
            })?;
        }
    }
    Ok(())
}
