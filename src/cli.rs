//! Command-line surface.
//!
//! Operator scripts use a colon-prefixed flag syntax (`-c:Upload`,
//! `-u:client1`, repeated `-t:targetName`) rather than clap's usual
//! `--flag value` or `--flag=value` forms. [`parse_args`] rewrites each
//! `-flag:value` token into the two tokens clap expects before handing the
//! rest to a normal derived [`Args`], so the flag spellings operators
//! already use keep working while the in-process type stays idiomatic.

use clap::Parser;

use crate::utils::errors::{AgentError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Upload,
    Start,
    Auto,
    Test,
    SetConfig,
    GetConfig,
    Help,
    Unknown(String),
}

impl From<&str> for Command {
    fn from(value: &str) -> Self {
        match value {
            "Upload" | "upload" => Command::Upload,
            "Start" | "start" => Command::Start,
            "Auto" | "auto" => Command::Auto,
            "Test" | "test" => Command::Test,
            "SetConfig" | "setconfig" => Command::SetConfig,
            "GetConfig" | "getconfig" => Command::GetConfig,
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable file upload agent", long_about = None)]
struct RawArgs {
    #[arg(long = "c")]
    command: Option<String>,

    #[arg(long = "u")]
    client_id: Option<String>,

    #[arg(long = "p")]
    secret: Option<String>,

    #[arg(long = "tenant")]
    tenant: Option<String>,

    #[arg(long = "datatype")]
    datatype: Option<String>,

    #[arg(long = "dataformat")]
    dataformat: Option<String>,

    #[arg(long = "path")]
    path: Option<String>,

    #[arg(long = "e")]
    endpoint: Option<String>,

    #[arg(long = "tokurl")]
    token_url: Option<String>,

    #[arg(long = "t")]
    targets: Vec<String>,
}

/// Parsed command-line arguments, typed for the supervisor's use.
#[derive(Debug, Clone)]
pub struct Args {
    pub command: Command,
    pub client_id: String,
    pub secret: String,
    pub tenant: String,
    pub datatype: String,
    pub dataformat: String,
    pub path: String,
    pub endpoint: String,
    pub token_url: String,
    pub targets: Vec<String>,
}

/// Parse the raw process arguments (excluding argv[0]), honoring both the
/// literal `help` command and the colon-prefixed flag syntax.
pub fn parse_args(raw: &[String]) -> Result<Args> {
    if raw.first().map(String::as_str) == Some("help") {
        return Ok(Args {
            command: Command::Help,
            client_id: String::new(),
            secret: String::new(),
            tenant: String::new(),
            datatype: String::new(),
            dataformat: String::new(),
            path: String::new(),
            endpoint: String::new(),
            token_url: String::new(),
            targets: Vec::new(),
        });
    }

    let rewritten = rewrite_colon_flags(raw);
    let mut tokens = vec!["upload-agent".to_string()];
    tokens.extend(rewritten);

    let raw_args = RawArgs::try_parse_from(tokens)
        .map_err(|e| AgentError::Config(format!("argument error: {e}")))?;

    let command = raw_args.command.as_deref().map(Command::from).unwrap_or(Command::Help);

    Ok(Args {
        command,
        client_id: raw_args.client_id.unwrap_or_default(),
        secret: raw_args.secret.unwrap_or_default(),
        tenant: raw_args.tenant.unwrap_or_default(),
        datatype: raw_args.datatype.unwrap_or_default(),
        dataformat: raw_args.dataformat.unwrap_or_default(),
        path: raw_args.path.unwrap_or_default(),
        endpoint: raw_args.endpoint.unwrap_or_default(),
        token_url: raw_args.token_url.unwrap_or_default(),
        targets: raw_args.targets,
    })
}

/// Usage text printed for `help` or an unrecognized command.
pub fn usage() -> &'static str {
    "upload-agent -c:<Upload|Start|Auto|Test> -u:<clientID> -p:<secret> \
     [-tenant:<tenant>] [-datatype:<type>] [-dataformat:<format>] [-path:<dir>] \
     [-e:<endpoint>] [-tokurl:<tokenURL>] [-t:<targetName>]..."
}

fn rewrite_colon_flags(raw: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len() * 2);
    for arg in raw {
        if let Some(stripped) = arg.strip_prefix('-') {
            if let Some((flag, value)) = stripped.split_once(':') {
                out.push(format!("--{flag}"));
                out.push(value.to_string());
                continue;
            }
        }
        out.push(arg.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_prefixed_flags() {
        let raw = vec![
            "-c:Upload".to_string(),
            "-u:client1".to_string(),
            "-p:secret1".to_string(),
            "-tenant:acme".to_string(),
            "-t:logs".to_string(),
            "-t:metrics".to_string(),
        ];
        let args = parse_args(&raw).unwrap();
        assert_eq!(args.command, Command::Upload);
        assert_eq!(args.client_id, "client1");
        assert_eq!(args.secret, "secret1");
        assert_eq!(args.tenant, "acme");
        assert_eq!(args.targets, vec!["logs".to_string(), "metrics".to_string()]);
    }

    #[test]
    fn literal_help_short_circuits_parsing() {
        let args = parse_args(&["help".to_string()]).unwrap();
        assert_eq!(args.command, Command::Help);
    }

    #[test]
    fn unknown_command_is_preserved() {
        let args = parse_args(&["-c:Frobnicate".to_string()]).unwrap();
        assert_eq!(args.command, Command::Unknown("Frobnicate".to_string()));
    }

    #[test]
    fn missing_command_defaults_to_help() {
        let args = parse_args(&["-u:client1".to_string()]).unwrap();
        assert_eq!(args.command, Command::Help);
    }
}
