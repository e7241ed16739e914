use super::command::CommandProbe;
use super::http::HttpProbe;
use super::tcp::TcpProbe;
use super::Checker;
use crate::config::validate::{validate_check, CheckError};
use crate::config::CheckConfig;

/// Maps a probe declaration to a checker instance.
///
/// The declaration is re-validated here so a checker can never be built from
/// fields its type requires but lacks; `UnknownCheckType` surfaces for any
/// unrecognized `type`.
pub fn build_checker(config: &CheckConfig) -> Result<Box<dyn Checker>, CheckError> {
    validate_check(config)?;

    let name = if config.name.is_empty() {
        default_name(config)
    } else {
        config.name.clone()
    };

    let checker: Box<dyn Checker> = match config.kind.as_str() {
        "http" => Box::new(HttpProbe::new(
            name,
            config.endpoint.clone(),
            config.method.clone(),
            config.expected_status,
        )),
        "tcp" => Box::new(TcpProbe::new(name, config.host.clone(), config.port)),
        "grpc" => Box::new(TcpProbe::grpc(name, config.host.clone(), config.port)),
        "command" | "exec" => Box::new(CommandProbe::new(name, config.command.clone())),
        other => return Err(CheckError::UnknownCheckType(other.to_string())),
    };
    Ok(checker)
}

fn default_name(config: &CheckConfig) -> String {
    match config.kind.as_str() {
        "http" => config.endpoint.clone(),
        "tcp" | "grpc" => format!("{}:{}", config.host, config.port),
        _ => config
            .command
            .split_whitespace()
            .next()
            .unwrap_or("command")
            .to_string(),
    }
}
