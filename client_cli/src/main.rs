//! Avalon client CLI

use std::{io::stdout, path::PathBuf};

use avalon_client::{prelude::*, ConnectionContext};
use avalon_config::{Config, MethodCatalog, NetworkProfile};
use erased_serde::Serialize;
use error_stack::{fmt::ColorMode, Report, ResultExt};
use eyre::{eyre, Result, WrapErr};
use thiserror::Error;

/// Suffix of the chaincode methods that start a paginated lookup
const LOOKUP_SUFFIX: &str = "LookUp";

/// Avalon CLI client invokes chaincode on a ledger network through its gateway.
#[derive(clap::Parser, Debug)]
#[command(name = "avalon", version, author)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_name("PATH"), value_hint(clap::ValueHint::FilePath))]
    #[clap(default_value = avalon_config::client::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// More verbose output
    #[arg(short, long)]
    verbose: bool,
    /// Subcommands of client cli
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Subcommand, Debug)]
enum Subcommand {
    /// Invoke a chaincode method
    Invoke(invoke::Args),
    /// Collect every page of a lookup
    Lookup(lookup::Args),
    /// Print chaincode events for a while
    Listen(listen::Args),
    /// Print the method catalogue
    Methods(methods::Args),
}

/// Context inside which command is executed
trait RunContext {
    /// Get access to configuration
    fn configuration(&self) -> &Config;

    /// Chaincode methods known to the client
    ///
    /// # Errors
    /// If the catalogue can't be loaded
    fn catalog(&self) -> Result<MethodCatalog> {
        MethodCatalog::load(&self.configuration().methods).map_err(|report| eyre!("{report:?}"))
    }

    /// Identity and peer to act through
    ///
    /// # Errors
    /// If the network profile can't be loaded ([`MainError::Profile`]) or
    /// doesn't describe a usable peer ([`MainError::Context`])
    fn connection(&self) -> Result<ConnectionContext> {
        let config = self.configuration();
        let profile = NetworkProfile::load(&config.profile)
            .map_err(|report| eyre!("{report:?}").wrap_err(MainError::Profile))?;
        ConnectionContext::resolve(config, profile).wrap_err(MainError::Context)
    }

    /// Serialize and print data
    ///
    /// # Errors
    /// - if serialization fails
    /// - if printing fails
    fn print_data(&mut self, data: &dyn Serialize) -> Result<()>;
}

struct PrintJsonContext<W> {
    write: W,
    config: Config,
}

impl<W: std::io::Write> RunContext for PrintJsonContext<W> {
    fn configuration(&self) -> &Config {
        &self.config
    }

    fn print_data(&mut self, data: &dyn Serialize) -> Result<()> {
        writeln!(&mut self.write, "{}", serde_json::to_string_pretty(data)?)?;
        Ok(())
    }
}

/// Runs subcommand
trait RunArgs {
    /// Runs command
    ///
    /// # Errors
    /// if inner command errors
    fn run(self, context: &mut dyn RunContext) -> Result<()>;
}

macro_rules! match_all {
    (($self:ident, $context:ident), { $($variants:path),* $(,)?}) => {
        match $self {
            $($variants(variant) => RunArgs::run(variant, $context),)*
        }
    };
}

impl RunArgs for Subcommand {
    fn run(self, context: &mut dyn RunContext) -> Result<()> {
        match_all!((self, context), {
            Subcommand::Invoke,
            Subcommand::Lookup,
            Subcommand::Listen,
            Subcommand::Methods,
        })
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
enum MainError {
    #[error("Failed to load the client configuration")]
    Config,
    #[error("Failed to load the network profile")]
    Profile,
    #[error("Failed to resolve the connection")]
    Context,
    #[error("Failed to serialize config")]
    SerializeConfig,
    #[error("Failed to initialize the logger")]
    Logger,
    #[error("Failed to run the command")]
    Subcommand,
}

fn main() -> error_stack::Result<(), MainError> {
    let Args {
        config: config_path,
        subcommand,
        verbose,
    } = clap::Parser::parse();

    error_stack::Report::set_color_mode(color_mode());

    let mut config = Config::load(&config_path)
        .change_context(MainError::Config)
        .attach_printable("config path was set by `--config` argument")?;
    if verbose {
        config.logger.level = avalon_logger::Level::Debug;
        eprintln!(
            "Configuration: {}",
            &serde_json::to_string_pretty(&config)
                .change_context(MainError::SerializeConfig)
                .attach_printable("caused by `--verbose` argument")?
        );
    }

    avalon_logger::install_panic_hook()
        .and_then(|()| avalon_logger::init_global(&config.logger, terminal_colors()))
        .map_err(|err| Report::new(MainError::Logger).attach_printable(format!("{err:?}")))?;

    let mut context = PrintJsonContext {
        write: stdout(),
        config,
    };
    subcommand
        .run(&mut context)
        .map_err(|err| Report::new(failure_kind(&err)).attach_printable(format!("{err:?}")))?;

    Ok(())
}

/// Profile and connection failures keep their kind, anything else is the command's
fn failure_kind(err: &eyre::Report) -> MainError {
    err.downcast_ref::<MainError>()
        .copied()
        .unwrap_or(MainError::Subcommand)
}

fn terminal_colors() -> bool {
    supports_color::on(supports_color::Stream::Stderr).is_some()
}

fn color_mode() -> ColorMode {
    if supports_color::on(supports_color::Stream::Stdout).is_some() && terminal_colors() {
        ColorMode::Color
    } else {
        ColorMode::None
    }
}

/// Print the payload of a successful response, the status and message of
/// a failed one.
///
/// # Errors
/// If printing fails
fn print_response(response: &InvocationResponse, context: &mut dyn RunContext) -> Result<()> {
    match response.payload_value().filter(|_| response.is_success()) {
        Some(payload) => context.print_data(&payload),
        None => context.print_data(response),
    }
}

mod invoke {
    use super::*;

    /// Arguments for the invoke subcommand
    #[derive(clap::Args, Debug, Clone)]
    pub struct Args {
        /// Chaincode to call
        pub chaincode: String,
        /// Method to call
        pub method: String,
        /// Positional arguments, JSON5 objects and arrays are sent as JSON.
        /// Generated from the catalogue when omitted
        pub args: Vec<String>,
        /// Chaincode version, the latest one if omitted
        #[arg(long, default_value = "")]
        pub version: String,
        /// Fetch every page of a lookup instead of the first two
        #[arg(long)]
        pub follow: bool,
    }

    impl RunArgs for Args {
        fn run(self, context: &mut dyn RunContext) -> Result<()> {
            let catalog = context.catalog()?;
            let spec = catalog
                .method(&self.chaincode, &self.method)
                .wrap_err("Method is not in the catalogue")?;

            let args = if self.args.is_empty() {
                let args = RandomFixtures::new().generate_all(&spec.callparams);
                for (param, arg) in spec.callparams.iter().zip(&args) {
                    eprintln!("Generated {} ({}): {arg}", param.name, param.ty.as_str());
                }
                args
            } else {
                self.args.iter().map(|arg| Arg::parse_cli(arg)).collect()
            };

            let client = context.connection()?.client();
            if self.method.ends_with(LOOKUP_SUFFIX) {
                let lookup = Lookup::new(&self.chaincode, &self.method)
                    .with_version(&self.version)
                    .with_filter(args);
                // The first page and the one following it, unless asked for all
                let limit = if self.follow { usize::MAX } else { 2 };
                for page in client.lookup_pages(lookup).take(limit) {
                    context.print_data(&page.wrap_err("Lookup failed")?)?;
                }
                return Ok(());
            }

            let response = client
                .invoke(args, &self.chaincode, &self.method, &self.version, spec.is_query)
                .wrap_err("Failed to invoke the chaincode")?;
            print_response(&response, context)
        }
    }
}

mod lookup {
    use super::*;

    /// Arguments for the lookup subcommand
    #[derive(clap::Args, Debug, Clone)]
    pub struct Args {
        /// Chaincode to call
        pub chaincode: String,
        /// Lookup method, its continuation is `<method>Next`
        pub method: String,
        /// Filter arguments, repeated on every page
        pub filter: Vec<String>,
        /// Chaincode version, the latest one if omitted
        #[arg(long, default_value = "")]
        pub version: String,
    }

    impl RunArgs for Args {
        fn run(self, context: &mut dyn RunContext) -> Result<()> {
            let catalog = context.catalog()?;
            catalog
                .method(&self.chaincode, &self.method)
                .wrap_err("Method is not in the catalogue")?;

            let lookup = Lookup::new(self.chaincode, self.method)
                .with_version(self.version)
                .with_filter(self.filter.iter().map(|arg| Arg::parse_cli(arg)));
            let ids = context
                .connection()?
                .client()
                .lookup_all(lookup)
                .wrap_err("Lookup failed")?;
            context.print_data(&ids)
        }
    }
}

mod listen {
    use std::time::Duration;

    use super::*;

    /// Arguments for the listen subcommand
    #[derive(clap::Args, Debug, Clone)]
    pub struct Args {
        /// How long to listen, in seconds
        pub seconds: u64,
        /// Emitting chaincode
        #[arg(long, default_value = "registry")]
        pub chaincode: String,
        /// Event name
        #[arg(long, default_value = "workerRegistered")]
        pub event: String,
        /// Replay events starting at this block
        #[arg(long)]
        pub start_block: Option<u64>,
        /// File holding the last delivered block, resumed from and updated
        #[arg(long, value_name("PATH"), value_hint(clap::ValueHint::FilePath))]
        pub block_mark: Option<PathBuf>,
    }

    impl RunArgs for Args {
        fn run(self, context: &mut dyn RunContext) -> Result<()> {
            let mut filter = EventFilter::new(self.chaincode, self.event);
            if let Some(block) = self.start_block {
                filter = filter.from_block(block);
            }
            let mut listener = EventListener::new(context.connection()?.gateway(), filter);
            if let Some(path) = self.block_mark {
                listener = listener.with_block_mark(path);
            }
            let stop = listener.stop_handle();

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .wrap_err("Failed to start the async runtime")?;
            eprintln!("Listening to events for {} seconds", self.seconds);

            let mut failure = None;
            let report = runtime
                .block_on(listener.listen(
                    |event| {
                        if let Err(err) = context.print_data(event) {
                            if failure.is_none() {
                                failure = Some(err);
                            }
                            stop.stop();
                        }
                    },
                    Some(Duration::from_secs(self.seconds)),
                ))
                .wrap_err("Failed to listen for events")?;
            if let Some(err) = failure {
                return Err(err);
            }
            eprintln!("Received {} events ({:?})", report.delivered, report.reason);
            Ok(())
        }
    }
}

mod methods {
    use super::*;

    /// Arguments for the methods subcommand
    #[derive(clap::Args, Debug, Clone)]
    pub struct Args {
        /// Only the methods of this chaincode
        pub chaincode: Option<String>,
    }

    impl RunArgs for Args {
        fn run(self, context: &mut dyn RunContext) -> Result<()> {
            let catalog = context.catalog()?;
            match self.chaincode {
                Some(chaincode) => context.print_data(catalog.methods(&chaincode)?),
                None => context.print_data(&catalog),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use avalon_config::{MethodSpec, ParamSpec, ParamType};
    use clap::{CommandFactory, Parser};

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn invoke_takes_trailing_arguments() {
        let args = Args::try_parse_from([
            "avalon",
            "invoke",
            "registry",
            "workerRegister",
            "{workerID: 'ID1'}",
            "--version",
            "1.0",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("client.toml"));
        let Subcommand::Invoke(invoke) = args.subcommand else {
            panic!("expected invoke")
        };
        assert_eq!(invoke.method, "workerRegister");
        assert_eq!(invoke.args, vec!["{workerID: 'ID1'}"]);
        assert_eq!(invoke.version, "1.0");
        assert!(!invoke.follow);
    }

    #[test]
    fn listen_defaults_to_worker_registrations() {
        let args = Args::try_parse_from(["avalon", "-c", "other.toml", "listen", "60"]).unwrap();
        assert_eq!(args.config, PathBuf::from("other.toml"));
        let Subcommand::Listen(listen) = args.subcommand else {
            panic!("expected listen")
        };
        assert_eq!(listen.seconds, 60);
        assert_eq!(listen.chaincode, "registry");
        assert_eq!(listen.event, "workerRegistered");
        assert_eq!(listen.block_mark, None);

        assert!(Args::try_parse_from(["avalon", "listen", "soon"]).is_err());
    }

    /// Catalogue held in memory, no network profile, output captured.
    struct TestContext {
        config: Config,
        catalog: MethodCatalog,
        output: Vec<u8>,
    }

    impl TestContext {
        fn new() -> Self {
            let mut catalog = MethodCatalog::default();
            catalog.insert(
                "registry",
                "workerRetrieve",
                MethodSpec {
                    is_query: true,
                    callparams: vec![ParamSpec {
                        name: "workerID".to_owned(),
                        ty: ParamType::Bytes32,
                    }],
                },
            );
            Self {
                config: Config::default(),
                catalog,
                output: Vec::new(),
            }
        }

        fn printed(&self) -> serde_json::Value {
            serde_json::from_slice(&self.output).unwrap()
        }
    }

    impl RunContext for TestContext {
        fn configuration(&self) -> &Config {
            &self.config
        }

        fn catalog(&self) -> Result<MethodCatalog> {
            Ok(self.catalog.clone())
        }

        fn connection(&self) -> Result<ConnectionContext> {
            Err(eyre!("no network in tests"))
        }

        fn print_data(&mut self, data: &dyn Serialize) -> Result<()> {
            self.output = serde_json::to_vec(data)?;
            Ok(())
        }
    }

    #[test]
    fn missing_profile_is_reported_as_such() {
        let dir = tempfile::tempdir().unwrap();
        let context = PrintJsonContext {
            write: Vec::new(),
            config: Config {
                profile: dir.path().join("network.json"),
                ..Config::default()
            },
        };
        let err = context.connection().unwrap_err();
        assert_eq!(failure_kind(&err), MainError::Profile);
        assert_eq!(failure_kind(&eyre!("lookup failed")), MainError::Subcommand);

        let wrapped = context.connection().wrap_err("Lookup failed").unwrap_err();
        assert_eq!(failure_kind(&wrapped), MainError::Profile);
    }

    #[test]
    fn methods_prints_the_catalogue() {
        let mut context = TestContext::new();
        methods::Args {
            chaincode: Some("registry".to_owned()),
        }
        .run(&mut context)
        .unwrap();
        let printed = context.printed();
        assert_eq!(printed["workerRetrieve"]["isQuery"], true);
        assert_eq!(printed["workerRetrieve"]["callparams"][0]["type"], "bytes32");

        let err = methods::Args {
            chaincode: Some("order".to_owned()),
        }
        .run(&mut context)
        .unwrap_err();
        assert!(err.to_string().contains("Unknown chaincode `order`"));
    }

    #[test]
    fn unknown_method_is_rejected_before_connecting() {
        let mut context = TestContext::new();
        let err = invoke::Args {
            chaincode: "registry".to_owned(),
            method: "workerDelete".to_owned(),
            args: vec![],
            version: String::new(),
            follow: false,
        }
        .run(&mut context)
        .unwrap_err();
        let causes: Vec<_> = err.chain().map(ToString::to_string).collect();
        assert!(causes.iter().any(|cause| cause.contains("workerRetrieve")), "{causes:?}");
    }

    #[test]
    fn failed_response_is_printed_not_raised() {
        let mut context = TestContext::new();
        let failed = InvocationResponse::failure(500, "Worker with ID 'W9' does not exist");
        print_response(&failed, &mut context).unwrap();
        assert_eq!(context.printed()["status"], 500);
        assert_eq!(context.printed()["message"], "Worker with ID 'W9' does not exist");

        let found = InvocationResponse::success(Some(r#"{"workerID":"W1"}"#.to_owned()));
        print_response(&found, &mut context).unwrap();
        assert_eq!(context.printed()["workerID"], "W1");
    }
}
