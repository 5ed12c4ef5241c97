use anyhow::{Result, anyhow};
use clap::ArgMatches;
use lazy_static::lazy_static;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::injector::InjectionSettings;
use crate::queue::{OverflowPolicy, QueueConfig};
use crate::watch::ReconnectPolicy;

pub static SERVICE_NAME: &str = "log-override";

lazy_static! {
    pub(crate) static ref HOSTNAME: String =
        std::env::var("HOSTNAME").unwrap_or_else(|_| String::from("unknown"));
}

pub struct Config {
    pub log_level: String,
    pub log_fmt: String,
    pub log_no_color: bool,
    pub command: CommandConfig,
}

pub enum CommandConfig {
    Webhook(WebhookConfig),
    Operator(OperatorConfig),
    Crd,
}

pub struct WebhookConfig {
    pub addr: SocketAddr,
    pub tls_config: Option<TlsConfig>,
    pub admission_api_version: String,
    pub injection_settings: InjectionSettings,
}

pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

pub struct OperatorConfig {
    pub config_map_name: String,
    pub queue: QueueConfig,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    pub fn from_args(matches: &ArgMatches) -> Result<Self> {
        let log_level = string_arg(matches, "log-level")?;
        let log_fmt = string_arg(matches, "log-fmt")?;
        let log_no_color = matches.get_flag("log-no-color");

        let command = match matches.subcommand() {
            Some(("webhook", sub)) => CommandConfig::Webhook(webhook_config(sub)?),
            Some(("operator", sub)) => CommandConfig::Operator(operator_config(sub)?),
            Some(("crd", _)) => CommandConfig::Crd,
            Some((name, _)) => return Err(anyhow!("unknown subcommand {name}")),
            None => return Err(anyhow!("a subcommand is required")),
        };

        Ok(Self {
            log_level,
            log_fmt,
            log_no_color,
            command,
        })
    }
}

fn webhook_config(matches: &ArgMatches) -> Result<WebhookConfig> {
    let addr = api_bind_address(matches)?;
    let (cert_file, key_file) = tls_files(matches)?;
    let tls_config = if cert_file.is_empty() {
        None
    } else {
        Some(TlsConfig {
            cert_file: PathBuf::from(cert_file),
            key_file: PathBuf::from(key_file),
        })
    };

    let injection_settings = InjectionSettings {
        annotation: string_arg(matches, "annotation")?,
        volume_name: string_arg(matches, "volume-name")?,
        config_map_name: string_arg(matches, "config-map-name")?,
        mount_path: string_arg(matches, "mount-path")?,
        ..Default::default()
    };

    Ok(WebhookConfig {
        addr,
        tls_config,
        admission_api_version: string_arg(matches, "admission-api-version")?,
        injection_settings,
    })
}

fn operator_config(matches: &ArgMatches) -> Result<OperatorConfig> {
    let overflow = string_arg(matches, "queue-overflow")?
        .parse::<OverflowPolicy>()
        .map_err(|e| anyhow!("error parsing arguments: {e}"))?;
    let capacity = matches
        .get_one::<u64>("queue-capacity")
        .map(|capacity| usize::try_from(*capacity))
        .transpose()
        .map_err(|e| anyhow!("error parsing arguments: invalid queue capacity: {e}"))?;

    Ok(OperatorConfig {
        config_map_name: string_arg(matches, "config-map-name")?,
        queue: QueueConfig { capacity, overflow },
        reconnect: reconnect_policy(matches)?,
    })
}

fn reconnect_policy(matches: &ArgMatches) -> Result<ReconnectPolicy> {
    match string_arg(matches, "reconnect")?.as_str() {
        "disabled" => Ok(ReconnectPolicy::Disabled),
        "backoff" => {
            let min_delay = millis_arg(matches, "reconnect-min-delay-ms")?;
            let max_delay = millis_arg(matches, "reconnect-max-delay-ms")?;
            if min_delay > max_delay {
                return Err(anyhow!(
                    "error parsing arguments: --reconnect-min-delay-ms cannot be greater than --reconnect-max-delay-ms"
                ));
            }
            Ok(ReconnectPolicy::Backoff {
                min_delay,
                max_delay,
            })
        }
        other => Err(anyhow!("unknown reconnect policy {other}")),
    }
}

fn api_bind_address(matches: &ArgMatches) -> Result<SocketAddr> {
    let address = string_arg(matches, "address")?;
    let port = matches
        .get_one::<u16>("port")
        .ok_or_else(|| anyhow!("error parsing arguments: port is not set"))?;
    format!("{address}:{port}")
        .parse()
        .map_err(|e| anyhow!("error parsing arguments: {}", e))
}

fn tls_files(matches: &ArgMatches) -> Result<(String, String)> {
    let cert_file = string_arg(matches, "cert-file")?;
    let key_file = string_arg(matches, "key-file")?;
    if cert_file.is_empty() != key_file.is_empty() {
        Err(anyhow!(
            "error parsing arguments: either both --cert-file and --key-file must be provided, or neither"
        ))
    } else {
        Ok((cert_file, key_file))
    }
}

fn string_arg(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| anyhow!("error parsing arguments: {id} is not set"))
}

fn millis_arg(matches: &ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .map(|ms| Duration::from_millis(*ms))
        .ok_or_else(|| anyhow!("error parsing arguments: {id} is not set"))
}
