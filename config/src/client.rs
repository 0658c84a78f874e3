//! Client configuration: where the profile lives, which channel and user to
//! act as, and how to reach the ledger gateway.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    env::{std_env, ReadEnv},
    logger,
};

/// Default path of the client configuration file
pub const DEFAULT_CONFIG_PATH: &str = "client.toml";
/// Default path of the network profile
pub const DEFAULT_PROFILE_PATH: &str = "network.json";
/// Default path of the chaincode method catalogue
pub const DEFAULT_METHODS_PATH: &str = "methods.json";
/// Channel the sample scripts bind to
pub const DEFAULT_CHANNEL: &str = "mychannel";
/// User the sample scripts act as
pub const DEFAULT_USER: &str = "Admin";
/// Default gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:7080";
/// How long a submit may wait for the commit acknowledgment
pub const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overrides the gateway URL
pub const ENV_GATEWAY_URL: &str = "AVALON_GATEWAY_URL";
/// Overrides the channel name
pub const ENV_CHANNEL: &str = "AVALON_CHANNEL";
/// Overrides the user name
pub const ENV_USER: &str = "AVALON_USER";
/// Pins the peer instead of picking one from the organization
pub const ENV_PEER: &str = "AVALON_PEER";
/// Overrides the log level
pub const ENV_LOG_LEVEL: &str = "LOGLEVEL";

/// Login for basic authentication. Cannot contain `:`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WebLogin(String);

impl WebLogin {
    /// Construct new `WebLogin`
    ///
    /// # Errors
    /// Fails if `login` contains `:` character
    pub fn new(login: &str) -> Result<Self, ParseError> {
        Self::from_str(login)
    }
}

impl FromStr for WebLogin {
    type Err = ParseError;

    fn from_str(login: &str) -> Result<Self, Self::Err> {
        if login.contains(':') {
            return Err(ParseError::WebLogin);
        }

        Ok(Self(login.to_owned()))
    }
}

impl fmt::Display for WebLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Deserializing `WebLogin` with `FromStr` implementation
impl<'de> Deserialize<'de> for WebLogin {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FromStr::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Basic Authentication credentials for the gateway
#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
pub struct BasicAuth {
    /// Login for Basic Authentication
    pub login: WebLogin,
    /// Password for Basic Authentication
    #[serde(skip_serializing)]
    pub password: String,
}

/// `[gateway]` section as written in the file
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct GatewayLayer {
    pub url: Option<String>,
    pub commit_timeout_ms: Option<u64>,
    pub basic_auth: Option<BasicAuth>,
}

/// Configuration file as the user wrote it, before defaults, environment
/// overrides and validation.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
#[allow(missing_docs)]
pub struct UserConfig {
    pub profile: Option<PathBuf>,
    pub methods: Option<PathBuf>,
    pub channel: Option<String>,
    pub user: Option<String>,
    pub organization: Option<String>,
    pub peer: Option<String>,
    #[serde(default)]
    pub gateway: GatewayLayer,
    #[serde(default)]
    pub logger: logger::UserLayer,
}

/// Errors found while loading the client configuration
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ParseError {
    #[error("Failed to read the configuration file")]
    ReadFile,
    #[error("Failed to parse the configuration file as TOML")]
    Toml,
    #[error("Invalid gateway URL")]
    InvalidUrl,
    #[error("Unsupported URL scheme: `{scheme}`")]
    UnsupportedUrlScheme { scheme: String },
    #[error("`{field}` must not be empty")]
    Empty { field: &'static str },
    #[error("Invalid log level")]
    LogLevel,
    #[error("Login for basic authentication cannot contain `:` character")]
    WebLogin,
}

/// Collects every validation failure instead of stopping at the first one.
#[derive(Default)]
struct Emitter(Option<Report<ParseError>>);

impl Emitter {
    fn emit(&mut self, report: Report<ParseError>) {
        match &mut self.0 {
            Some(collected) => collected.extend_one(report),
            None => self.0 = Some(report),
        }
    }

    fn into_result(self) -> error_stack::Result<(), ParseError> {
        self.0.map_or(Ok(()), Err)
    }
}

/// Complete client configuration
#[derive(Clone, Debug, Serialize)]
pub struct Config {
    /// Network profile path
    pub profile: PathBuf,
    /// Method catalogue path
    pub methods: PathBuf,
    /// Channel to bind to
    pub channel: String,
    /// User to act as
    pub user: String,
    /// Organization override; the profile's `client.organization` otherwise
    pub organization: Option<String>,
    /// Peer override; a random peer of the organization otherwise
    pub peer: Option<String>,
    /// Ledger gateway endpoint
    pub gateway_url: Url,
    /// How long a submit waits for the commit acknowledgment
    pub commit_timeout: Duration,
    /// Gateway credentials
    pub basic_auth: Option<BasicAuth>,
    /// Logger configuration
    pub logger: logger::Config,
}

impl Default for Config {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self {
            profile: DEFAULT_PROFILE_PATH.into(),
            methods: DEFAULT_METHODS_PATH.into(),
            channel: DEFAULT_CHANNEL.to_owned(),
            user: DEFAULT_USER.to_owned(),
            organization: None,
            peer: None,
            gateway_url: DEFAULT_GATEWAY_URL
                .parse()
                .expect("default gateway URL is valid"),
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            basic_auth: None,
            logger: logger::Config::default(),
        }
    }
}

impl Config {
    /// Load the configuration from a TOML file, applying overrides from the
    /// process environment. Relative `profile` and `methods` paths are
    /// resolved against the directory of the file.
    ///
    /// # Errors
    /// If the file can't be read or parsed, or holds invalid values.
    pub fn load(path: impl AsRef<Path>) -> error_stack::Result<Self, ParseError> {
        Self::load_with_env(path, &std_env)
    }

    /// Same as [`Self::load`] with an explicit environment.
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn load_with_env(
        path: impl AsRef<Path>,
        env: &impl ReadEnv,
    ) -> error_stack::Result<Self, ParseError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .change_context(ParseError::ReadFile)
            .attach_printable_lazy(|| format!("config path: {}", path.display()))?;
        let base_dir = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        Self::from_toml_str(&content, env, base_dir)
            .attach_printable_lazy(|| format!("config path: {}", path.display()))
    }

    /// Parse the configuration from TOML text.
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn from_toml_str(
        content: &str,
        env: &impl ReadEnv,
        base_dir: Option<&Path>,
    ) -> error_stack::Result<Self, ParseError> {
        let user: UserConfig = toml::from_str(content).change_context(ParseError::Toml)?;
        user.parse(env, base_dir)
    }
}

impl UserConfig {
    /// Apply defaults and environment overrides, validate, and construct a
    /// complete [`Config`].
    ///
    /// # Errors
    /// If a set of validity errors occurs.
    pub fn parse(
        self,
        env: &impl ReadEnv,
        base_dir: Option<&Path>,
    ) -> error_stack::Result<Config, ParseError> {
        let Self {
            profile,
            methods,
            channel,
            user,
            organization,
            peer,
            gateway:
                GatewayLayer {
                    url,
                    commit_timeout_ms,
                    basic_auth,
                },
            logger,
        } = self;

        let mut emitter = Emitter::default();

        let channel = env
            .read_env(ENV_CHANNEL)
            .map(|value| value.into_owned())
            .or(channel)
            .unwrap_or_else(|| DEFAULT_CHANNEL.to_owned());
        if channel.trim().is_empty() {
            emitter.emit(Report::new(ParseError::Empty { field: "channel" }));
        }

        let user = env
            .read_env(ENV_USER)
            .map(|value| value.into_owned())
            .or(user)
            .unwrap_or_else(|| DEFAULT_USER.to_owned());
        if user.trim().is_empty() {
            emitter.emit(Report::new(ParseError::Empty { field: "user" }));
        }

        let peer = env.read_env(ENV_PEER).map(|value| value.into_owned()).or(peer);

        let url_origin = if env.read_env(ENV_GATEWAY_URL).is_some() {
            format!("set by `{ENV_GATEWAY_URL}`")
        } else {
            "set by `gateway.url`".to_owned()
        };
        let url = env
            .read_env(ENV_GATEWAY_URL)
            .map(|value| value.into_owned())
            .or(url)
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_owned());
        let gateway_url = match Url::parse(&url) {
            Ok(parsed) => match parsed.scheme() {
                "http" | "https" => Some(parsed),
                scheme => {
                    emitter.emit(
                        Report::new(ParseError::UnsupportedUrlScheme {
                            scheme: scheme.to_owned(),
                        })
                        .attach_printable(url_origin)
                        .attach_printable("Note: only `http` and `https` protocols are supported"),
                    );
                    None
                }
            },
            Err(err) => {
                emitter.emit(
                    Report::new(ParseError::InvalidUrl)
                        .attach_printable(format!("{url}: {err}"))
                        .attach_printable(url_origin),
                );
                None
            }
        };

        let mut logger = logger.complete();
        if let Some(level) = env.read_env(ENV_LOG_LEVEL) {
            match level.parse() {
                Ok(level) => logger.level = level,
                Err(err) => emitter.emit(
                    Report::new(ParseError::LogLevel)
                        .attach_printable(err.to_string())
                        .attach_printable(format!("set by `{ENV_LOG_LEVEL}`")),
                ),
            }
        }

        emitter.into_result()?;
        let gateway_url = gateway_url.ok_or_else(|| Report::new(ParseError::InvalidUrl))?;

        let resolve = |path: Option<PathBuf>, default: &str| {
            let path = path.unwrap_or_else(|| default.into());
            match base_dir {
                Some(dir) if path.is_relative() => dir.join(path),
                _ => path,
            }
        };

        Ok(Config {
            profile: resolve(profile, DEFAULT_PROFILE_PATH),
            methods: resolve(methods, DEFAULT_METHODS_PATH),
            channel,
            user,
            organization,
            peer,
            gateway_url,
            commit_timeout: commit_timeout_ms.map_or(DEFAULT_COMMIT_TIMEOUT, Duration::from_millis),
            basic_auth,
            logger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::TestEnv;

    const FULL: &str = r#"
        profile = "profiles/network.json"
        methods = "/etc/avalon/methods.json"
        channel = "workers"
        user = "User1"
        peer = "peer0.org1.example.com"

        [gateway]
        url = "https://gateway.example.com:7443"
        commit_timeout_ms = 5000
        basic_auth = { login = "mad_hatter", password = "ilovetea" }

        [logger]
        level = "INFO"
        format = "json"
    "#;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("", &TestEnv::new(), None).unwrap();
        assert_eq!(config.channel, DEFAULT_CHANNEL);
        assert_eq!(config.user, DEFAULT_USER);
        assert_eq!(config.profile, PathBuf::from(DEFAULT_PROFILE_PATH));
        assert_eq!(config.gateway_url.as_str(), "http://127.0.0.1:7080/");
        assert_eq!(config.commit_timeout, DEFAULT_COMMIT_TIMEOUT);
        assert_eq!(config.logger.level, logger::Level::Error);
    }

    #[test]
    fn full_file_is_read() {
        let base = Path::new("/srv/avalon");
        let config = Config::from_toml_str(FULL, &TestEnv::new(), Some(base)).unwrap();
        assert_eq!(config.profile, base.join("profiles/network.json"));
        assert_eq!(config.methods, PathBuf::from("/etc/avalon/methods.json"));
        assert_eq!(config.channel, "workers");
        assert_eq!(config.user, "User1");
        assert_eq!(config.peer.as_deref(), Some("peer0.org1.example.com"));
        assert_eq!(config.gateway_url.scheme(), "https");
        assert_eq!(config.commit_timeout, Duration::from_millis(5000));
        let auth = config.basic_auth.unwrap();
        assert_eq!(auth.login.to_string(), "mad_hatter");
        assert_eq!(auth.password, "ilovetea");
        assert_eq!(config.logger.level, logger::Level::Info);
        assert_eq!(config.logger.format, logger::Format::Json);
    }

    #[test]
    fn env_overrides_file() {
        let env = TestEnv::new()
            .set(ENV_GATEWAY_URL, "http://10.0.0.5:9000")
            .set(ENV_CHANNEL, "other")
            .set(ENV_USER, "User2")
            .set(ENV_PEER, "peer1.org1.example.com")
            .set(ENV_LOG_LEVEL, "debug");
        let config = Config::from_toml_str(FULL, &env, None).unwrap();

        assert_eq!(config.gateway_url.as_str(), "http://10.0.0.5:9000/");
        assert_eq!(config.channel, "other");
        assert_eq!(config.user, "User2");
        assert_eq!(config.peer.as_deref(), Some("peer1.org1.example.com"));
        assert_eq!(config.logger.level, logger::Level::Debug);
        assert!(env.unvisited().is_empty());
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        let err = Config::from_toml_str(
            "[gateway]\nurl = \"grpcs://peer0:7051\"",
            &TestEnv::new(),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err.current_context(),
            &ParseError::UnsupportedUrlScheme {
                scheme: "grpcs".to_owned()
            }
        );
    }

    #[test]
    fn all_errors_are_reported_together() {
        let env = TestEnv::new().set(ENV_LOG_LEVEL, "loud");
        let err = Config::from_toml_str("channel = \"\"\nuser = \" \"", &env, None).unwrap_err();
        let contexts: Vec<_> = err.frames().filter_map(|frame| frame.downcast_ref::<ParseError>()).collect();
        assert!(contexts.contains(&&ParseError::Empty { field: "channel" }));
        assert!(contexts.contains(&&ParseError::Empty { field: "user" }));
        assert!(contexts.contains(&&ParseError::LogLevel));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::from_toml_str("chanel = \"typo\"", &TestEnv::new(), None).unwrap_err();
        assert_eq!(err.current_context(), &ParseError::Toml);
    }

    #[test]
    fn login_with_colon_is_rejected() {
        assert_eq!(WebLogin::new("a:b"), Err(ParseError::WebLogin));
        assert!(WebLogin::new("alice").is_ok());
    }
}
