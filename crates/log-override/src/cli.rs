use clap::builder::PossibleValue;
use clap::{
    Arg, ArgAction, Command, crate_authors, crate_description, crate_name, crate_version,
    value_parser,
};

use crate::{api::admission_review::DEFAULT_ADMISSION_API_VERSION, injector};

pub fn build_cli() -> Command {
    Command::new(crate_name!())
        .author(crate_authors!())
        .version(crate_version!())
        .about(crate_description!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .args(global_args())
        .subcommand(
            Command::new("webhook")
                .about("Run the mutating admission webhook injecting the log override volume")
                .args(webhook_args()),
        )
        .subcommand(
            Command::new("operator")
                .about("Watch LoggingOverride resources and propagate them to the ConfigMaps")
                .args(operator_args()),
        )
        .subcommand(
            Command::new("crd").about("Print the LoggingOverride CustomResourceDefinition as YAML"),
        )
}

fn global_args() -> Vec<Arg> {
    let mut args = vec![
        Arg::new("log-level")
            .long("log-level")
            .value_name("LOG_LEVEL")
            .env("LOG_OVERRIDE_LOG_LEVEL")
            .default_value("info")
            .global(true)
            .value_parser([
                PossibleValue::new("trace"),
                PossibleValue::new("debug"),
                PossibleValue::new("info"),
                PossibleValue::new("warn"),
                PossibleValue::new("error"),
            ])
            .help("Log level"),
        Arg::new("log-fmt")
            .long("log-fmt")
            .value_name("LOG_FMT")
            .env("LOG_OVERRIDE_LOG_FMT")
            .default_value("text")
            .global(true)
            .value_parser([PossibleValue::new("text"), PossibleValue::new("json")])
            .help("Log output format"),
        Arg::new("log-no-color")
            .long("log-no-color")
            .env("NO_COLOR")
            .global(true)
            .action(ArgAction::SetTrue)
            .help("Disable colored output for logs"),
    ];
    args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    args
}

fn webhook_args() -> Vec<Arg> {
    let mut args = vec![
        Arg::new("address")
            .long("addr")
            .value_name("BIND_ADDRESS")
            .default_value("0.0.0.0")
            .env("LOG_OVERRIDE_BIND_ADDRESS")
            .help("Bind against ADDRESS"),
        Arg::new("port")
            .long("port")
            .value_name("PORT")
            .default_value("8443")
            .env("LOG_OVERRIDE_PORT")
            .value_parser(value_parser!(u16))
            .help("Listen on PORT"),
        Arg::new("cert-file")
            .long("cert-file")
            .value_name("CERT_FILE")
            .default_value("")
            .env("LOG_OVERRIDE_CERT_FILE")
            .help("Path to an X.509 certificate file for HTTPS"),
        Arg::new("key-file")
            .long("key-file")
            .value_name("KEY_FILE")
            .default_value("")
            .env("LOG_OVERRIDE_KEY_FILE")
            .help("Path to an X.509 private key file for HTTPS"),
        Arg::new("admission-api-version")
            .long("admission-api-version")
            .value_name("API_VERSION")
            .default_value(DEFAULT_ADMISSION_API_VERSION)
            .env("LOG_OVERRIDE_ADMISSION_API_VERSION")
            .help("apiVersion the AdmissionReview objects must have, use admission.k8s.io/v1beta1 on older clusters"),
        Arg::new("annotation")
            .long("annotation")
            .value_name("ANNOTATION")
            .default_value(injector::DEFAULT_ANNOTATION)
            .env("LOG_OVERRIDE_ANNOTATION")
            .help("Pod template annotation enabling the injection when set to \"true\""),
        Arg::new("volume-name")
            .long("volume-name")
            .value_name("VOLUME_NAME")
            .default_value(injector::DEFAULT_VOLUME_NAME)
            .env("LOG_OVERRIDE_VOLUME_NAME")
            .help("Name of the injected volume"),
        config_map_name_arg(),
        Arg::new("mount-path")
            .long("mount-path")
            .value_name("MOUNT_PATH")
            .default_value(injector::DEFAULT_MOUNT_PATH)
            .env("LOG_OVERRIDE_MOUNT_PATH")
            .help("Directory where the override file is mounted inside of the containers"),
    ];
    args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    args
}

fn operator_args() -> Vec<Arg> {
    let mut args = vec![
        config_map_name_arg(),
        Arg::new("queue-capacity")
            .long("queue-capacity")
            .value_name("EVENTS")
            .env("LOG_OVERRIDE_QUEUE_CAPACITY")
            .value_parser(value_parser!(u64).range(1..))
            .help("Maximum number of pending events, the queue is unbounded when not set"),
        Arg::new("queue-overflow")
            .long("queue-overflow")
            .value_name("POLICY")
            .default_value("drop-oldest")
            .env("LOG_OVERRIDE_QUEUE_OVERFLOW")
            .value_parser([
                PossibleValue::new("drop-oldest"),
                PossibleValue::new("block"),
                PossibleValue::new("fail-fast"),
            ])
            .help("What to do when a bounded queue is full"),
        Arg::new("reconnect")
            .long("reconnect")
            .value_name("POLICY")
            .default_value("backoff")
            .env("LOG_OVERRIDE_RECONNECT")
            .value_parser([PossibleValue::new("backoff"), PossibleValue::new("disabled")])
            .help("How the watch is restored after an error"),
        Arg::new("reconnect-min-delay-ms")
            .long("reconnect-min-delay-ms")
            .value_name("MILLISECONDS")
            .default_value("500")
            .env("LOG_OVERRIDE_RECONNECT_MIN_DELAY_MS")
            .value_parser(value_parser!(u64))
            .help("Initial delay before re-opening a failed watch"),
        Arg::new("reconnect-max-delay-ms")
            .long("reconnect-max-delay-ms")
            .value_name("MILLISECONDS")
            .default_value("30000")
            .env("LOG_OVERRIDE_RECONNECT_MAX_DELAY_MS")
            .value_parser(value_parser!(u64))
            .help("Upper bound of the delay between two reconnection attempts"),
    ];
    args.sort_by(|a, b| a.get_id().cmp(b.get_id()));
    args
}

fn config_map_name_arg() -> Arg {
    Arg::new("config-map-name")
        .long("config-map-name")
        .value_name("NAME")
        .default_value(injector::DEFAULT_CONFIG_MAP_NAME)
        .env("LOG_OVERRIDE_CONFIG_MAP_NAME")
        .help("Name of the ConfigMap holding the log level overrides")
}
