// MIT License
//
// Copyright (c) 2019-2021 Tobias Pfeiffer
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use {
	crate::{
		wire::{InvalidReplyError, Compressor, SUPPORTED_COMPRESSORS},
		topology::CompatibilityError
	},
	std::{str::FromStr, collections::HashMap, time::Duration, fmt},
	serde::Serialize
};

#[cfg(feature = "tls")]
use {crate::__DebugWrapper__, std::sync::Arc};

pub const DEFAULT_MONGO_PORT:               u16      = 27017;
pub const DEFAULT_CONNECT_TIMEOUT:          Duration = Duration::from_secs(10);
/// Socket timeout used when `socketTimeoutMS` is not set.
pub const DEFAULT_SOCKET_TIMEOUT:           Duration = Duration::from_secs(300);
pub const DEFAULT_MIN_POOL_SIZE:            usize    = 0;
pub const DEFAULT_MAX_POOL_SIZE:            usize    = 100;
pub const DEFAULT_LOCAL_THRESHOLD:          Duration = Duration::from_millis(15);
pub const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_FREQUENCY:      Duration = Duration::from_secs(10);
pub const DEFAULT_MIN_HEARTBEAT_FREQUENCY:  Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_FAST_RETRIES:         u32      = 3;
/// Lower bound for `maxStalenessSeconds`.
pub const SMALLEST_MAX_STALENESS:           Duration = Duration::from_secs(90);
pub const IDLE_WRITE_PERIOD:                Duration = Duration::from_secs(10);

/// A `host:port` pair. The host is stored lower-cased so that addresses
/// reported by different members compare equal.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ServerAddress {
	pub host: String,
	pub port: u16
}

impl ServerAddress {
	pub fn new(host: &str, port: u16) -> Self {
		Self { host: host.to_ascii_lowercase(), port }
	}
}

impl FromStr for ServerAddress {
	type Err = ClientOptionsParseError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		let (host, port) = match s.rfind(':') {
			// ipv6 literals without a port, e.g. `[::1]`
			Some(i) if !s[i..].contains(']') => (&s[..i], s[i + 1..].parse()
				.map_err(|e| ClientOptionsParseError::from(("host", e)))?),
			_ => (s, DEFAULT_MONGO_PORT)
		};

		if host.is_empty() || port == 0 {
			return Err(ClientOptionsParseError::from(("host", s.to_string())));
		}

		Ok(Self::new(host, port))
	}
}

impl fmt::Display for ServerAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

/// see https://github.com/mongodb/specifications/blob/master/source/connection-string/connection-string-spec.rst,
/// https://github.com/mongodb/specifications/blob/master/source/uri-options/uri-options.rst
#[derive(Debug, Clone)]
pub struct ClientOptions {
	pub hosts:                   Vec<ServerAddress>,
	pub appname:                 Option<String>,
	pub compressors:             Option<Vec<Compressor>>,
	pub connect_timeout:         Duration,
	pub socket_timeout:          Option<Duration>,
	/// Upper bound for a whole operation, including selection, checkout and I/O.
	pub timeout:                 Option<Duration>,
	pub replica_set:             Option<String>,
	pub direct_connection:       Option<bool>,
	pub retry_reads:             bool,
	pub retry_writes:            bool,
	pub credential:              Credential,
	pub server_selection_config: ServerSelectionConfig,
	pub monitor_options:         ServerMonitorOptions,
	pub pool_options:            ConnectionPoolOptions,
	pub read_preference:         ReadPreference,
	pub write_concern:           Option<WriteConcern>,
	#[cfg(feature = "tls")]
	pub tls_options:             Option<TlsOptions>,
	#[cfg(feature = "tls")]
	pub tls_config:              Option<__DebugWrapper__<Arc<rustls::ClientConfig>>>
}

#[derive(Debug)]
pub enum ClientOptionsParseError {
	InvalidScheme,
	InvalidKey(String),
	InvalidValue { key: &'static str, val: Box<dyn std::fmt::Debug + Send + Sync + 'static> }
}

impl<T: std::fmt::Debug + Send + Sync + 'static> From<(&'static str, T)> for ClientOptionsParseError {
	fn from((key, val): (&'static str, T)) -> Self {
		Self::InvalidValue { key, val: Box::new(val) }
	}
}

impl Default for ClientOptions {
	fn default() -> Self {
		Self {
			hosts:                   Vec::new(),
			appname:                 None,
			compressors:             None,
			connect_timeout:         DEFAULT_CONNECT_TIMEOUT,
			socket_timeout:          None,
			timeout:                 None,
			replica_set:             None,
			direct_connection:       None,
			retry_reads:             true,
			retry_writes:            true,
			credential:              Credential::default(),
			server_selection_config: ServerSelectionConfig::default(),
			monitor_options:         ServerMonitorOptions::default(),
			pool_options:            ConnectionPoolOptions::default(),
			read_preference:         ReadPreference::default(),
			write_concern:           None,
			#[cfg(feature = "tls")]
			tls_options:             None,
			#[cfg(feature = "tls")]
			tls_config:              None
		}
	}
}

impl ClientOptions {
	/// Checks option combinations that cannot be expressed by the types alone.
	pub fn validate(&self) -> Result<()> {
		if self.hosts.is_empty() {
			return Err(ClientOptionsParseError::from(("hosts", "no hosts given")).into());
		}

		if self.direct_connection == Some(true) && self.hosts.len() > 1 {
			return Err(ClientOptionsParseError::from(("directConnection", "multiple hosts")).into());
		}

		if self.pool_options.max_pool_size != 0
			&& self.pool_options.min_pool_size > self.pool_options.max_pool_size {
			return Err(ClientOptionsParseError::from(("minPoolSize", self.pool_options.min_pool_size)).into());
		}

		// certificate and hostname validation cannot be relaxed
		#[cfg(feature = "tls")]
		if let Some(tls) = &self.tls_options {
			let relaxed = [
				("tlsAllowInvalidCertificates", tls.allow_invalid_certificates),
				("tlsAllowInvalidHostnames", tls.allow_invalid_hostnames),
				("tlsInsecure", tls.insecure)
			];

			if let Some((key, _)) = relaxed.iter().find(|(_, set)| *set) {
				return Err(ClientOptionsParseError::from((*key, true)).into());
			}
		}

		self.read_preference.validate(self.monitor_options.heartbeat_frequency)
	}

	/// The timeout applied to a single send/receive.
	pub fn io_timeout(&self) -> Duration {
		self.socket_timeout.unwrap_or(DEFAULT_SOCKET_TIMEOUT)
	}

	/// The longest a checkout waits for a connection to become available,
	/// `server_selection_timeout` unless `waitQueueTimeoutMS` is set.
	pub fn wait_queue_timeout(&self) -> Duration {
		self.pool_options.wait_queue_timeout.unwrap_or(self.server_selection_config.server_selection_timeout)
	}

	/// Builds the rustls client config from the tls options, if not done already.
	#[cfg(feature = "tls")]
	pub fn init_tls_config(&mut self) -> Result<()> {
		let options = match (&self.tls_options, &self.tls_config) {
			(Some(options), None) => options,
			_ => return Ok(())
		};

		let mut config = rustls::ClientConfig::new();

		if let Some(ca_file) = &options.ca_file {
			config.root_store.add_pem_file(&mut std::io::BufReader::new(std::fs::File::open(ca_file)?))
				.map_err(|_| ClientOptionsParseError::from(("tlsCAFile", ca_file.clone())))?;
		}

		if let Some(file) = &options.certificate_key_file {
			let certs = rustls::internal::pemfile::certs(
				&mut std::io::BufReader::new(std::fs::File::open(file)?))
				.map_err(|_| ClientOptionsParseError::from(("tlsCertificateKeyFile", file.clone())))?;
			let mut keys = rustls::internal::pemfile::pkcs8_private_keys(
				&mut std::io::BufReader::new(std::fs::File::open(file)?))
				.map_err(|_| ClientOptionsParseError::from(("tlsCertificateKeyFile", file.clone())))?;

			if keys.is_empty() {
				return Err(ClientOptionsParseError::from(("tlsCertificateKeyFile", file.clone())).into());
			}

			config.set_single_client_cert(certs, keys.remove(0));
		}

		self.tls_config = Some(__DebugWrapper__(Arc::new(config)));
		Ok(())
	}
}

impl FromStr for ClientOptions {
	type Err = Error;

	#[allow(clippy::unit_arg)]
	fn from_str(mut s: &str) -> std::result::Result<Self, Self::Err> {
		let mut self_ = Self::default();

		if !s.starts_with("mongodb://") {
			return Err(ClientOptionsParseError::InvalidScheme.into());
		}

		s = s.trim_start_matches("mongodb://");

		if let Some(i) = s.rfind('@') {
			let mut split = s[..i].splitn(2, ':');
			self_.credential.username = split.next().map(str::to_string);
			self_.credential.password = split.next().map(str::to_string);
			s = &s[i + 1..];
		}

		let i = s.find('/').unwrap_or(s.len());
		self_.hosts = s[..i].split(',')
			.map(str::parse)
			.collect::<std::result::Result<_, _>>()?;

		if i == s.len() { return self_.finish(); }

		s = &s[i + 1..];

		let i = s.find('?').unwrap_or(s.len());
		if i > 0 {
			self_.credential.source = Some(s[..i].to_string());
		}

		if i == s.len() { return self_.finish(); }

		s = &s[i + 1..];

		// options

		s.split('&').filter(|s| !s.is_empty()).map(|s| {
			let i = s.find('=').unwrap_or(s.len());
			(&s[..i], s.get(i + 1..).unwrap_or(""))
		}).try_for_each(|(key, value)| Ok::<_, ClientOptionsParseError>(match key {
			"appname"                      => self_.appname = Some(value.to_string()),
			"authMechanism"                => self_.credential.mechanism = Some(value.parse()
				.map_err(|e| ClientOptionsParseError::from(("authMechanism", e)))?),
			"authSource"                   => self_.credential.source = Some(value.to_string()),
			"compressors"                  => self_.compressors = Some(value.split(',')
				.map(str::parse)
				.filter(|s| if let Ok(s) = s { SUPPORTED_COMPRESSORS.contains(s) } else { true })
				.collect::<std::result::Result<_, _>>()
				.map_err(|_| ClientOptionsParseError::from(("compressors", value.to_string())))?),
			"connectTimeoutMS"             => self_.connect_timeout = Some(parse_ms("connectTimeoutMS", value)?)
				.filter(|v| *v != Duration::default())
				.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
			"directConnection"             => self_.direct_connection = Some(parse_bool("directConnection", value)?),
			"heartbeatFrequencyMS"         => self_.monitor_options.heartbeat_frequency = parse_ms("heartbeatFrequencyMS", value)?,
			"journal"                      => self_.write_concern
				.get_or_insert_with(WriteConcern::default).journal = Some(parse_bool("journal", value)?),
			"localThresholdMS"             => self_.server_selection_config.local_threshold = parse_ms("localThresholdMS", value)?,
			"maxIdleTimeMS"                => self_.pool_options.max_idle_time = Some(parse_ms("maxIdleTimeMS", value)?)
				.filter(|v| *v != Duration::default()),
			"maxPoolSize"                  => self_.pool_options.max_pool_size = value.parse()
				.map_err(|e| ClientOptionsParseError::from(("maxPoolSize", e)))?,
			"maxStalenessSeconds"          => self_.read_preference.max_staleness = match value.parse::<i64>()
				.map_err(|e| ClientOptionsParseError::from(("maxStalenessSeconds", e)))? {
				-1 => None,
				v if v < 0 => return Err(ClientOptionsParseError::from(("maxStalenessSeconds", v))),
				v => Some(Duration::from_secs(v as u64))
			},
			"minHeartbeatFrequencyMS"      => self_.monitor_options.min_heartbeat_frequency = parse_ms("minHeartbeatFrequencyMS", value)?,
			"minPoolSize"                  => self_.pool_options.min_pool_size = value.parse()
				.map_err(|e| ClientOptionsParseError::from(("minPoolSize", e)))?,
			"readPreference"               => self_.read_preference.mode = value.parse()
				.map_err(|e| ClientOptionsParseError::from(("readPreference", e)))?,
			"readPreferenceTags"           => self_.read_preference.tag_sets.push(value.split(',')
				.filter(|s| !s.is_empty())
				.map(|s| {
					let i = s.find(':').unwrap_or(s.len());
					(s[..i].to_string(), s.get(i + 1..).unwrap_or("").to_string())
				}).collect()),
			"replicaSet"                   => self_.replica_set = Some(value.to_string()),
			"retryReads"                   => self_.retry_reads = parse_bool("retryReads", value)?,
			"retryWrites"                  => self_.retry_writes = parse_bool("retryWrites", value)?,
			"serverSelectionTimeoutMS"     => self_.server_selection_config.server_selection_timeout = parse_ms("serverSelectionTimeoutMS", value)?,
			"socketTimeoutMS"              => self_.socket_timeout = Some(parse_ms("socketTimeoutMS", value)?)
				.filter(|v| *v != Duration::default()),
			"timeoutMS"                    => self_.timeout = Some(parse_ms("timeoutMS", value)?)
				.filter(|v| *v != Duration::default()),
			"waitQueueTimeoutMS"           => self_.pool_options.wait_queue_timeout = Some(parse_ms("waitQueueTimeoutMS", value)?)
				.filter(|v| *v != Duration::default()),
			#[cfg(feature = "tls")]
			"tls" | "ssl"                  => if parse_bool("tls", value)? {
				self_.tls_options.get_or_insert_with(TlsOptions::default);
			},
			#[cfg(feature = "tls")]
			"tlsAllowInvalidCertificates"  => self_.tls_options
				.get_or_insert_with(TlsOptions::default).allow_invalid_certificates = parse_bool("tlsAllowInvalidCertificates", value)?,
			#[cfg(feature = "tls")]
			"tlsAllowInvalidHostnames"     => self_.tls_options
				.get_or_insert_with(TlsOptions::default).allow_invalid_hostnames = parse_bool("tlsAllowInvalidHostnames", value)?,
			#[cfg(feature = "tls")]
			"tlsCAFile"                    => self_.tls_options
				.get_or_insert_with(TlsOptions::default).ca_file = Some(value.to_string()),
			#[cfg(feature = "tls")]
			"tlsCertificateKeyFile"        => self_.tls_options
				.get_or_insert_with(TlsOptions::default).certificate_key_file = Some(value.to_string()),
			#[cfg(feature = "tls")]
			"tlsInsecure"                  => self_.tls_options
				.get_or_insert_with(TlsOptions::default).insecure = parse_bool("tlsInsecure", value)?,
			"w"                            => self_.write_concern
				.get_or_insert_with(WriteConcern::default).w = Some(match value.parse::<i32>() {
				Ok(n) => Acknowledgment::Nodes(n),
				Err(_) if value == "majority" => Acknowledgment::Majority,
				Err(_) => Acknowledgment::Custom(value.to_string())
			}),
			"wTimeoutMS"                   => self_.write_concern
				.get_or_insert_with(WriteConcern::default).w_timeout_ms = Some(value.parse()
				.map_err(|e| ClientOptionsParseError::from(("wTimeoutMS", e)))?),
			key => return Err(ClientOptionsParseError::InvalidKey(key.to_string()))
		}))?;

		self_.finish()
	}
}

impl ClientOptions {
	fn finish(mut self) -> Result<Self> {
		#[cfg(feature = "tls")]
		self.init_tls_config()?;
		self.validate()?;
		Ok(self)
	}
}

fn parse_ms(key: &'static str, value: &str) -> std::result::Result<Duration, ClientOptionsParseError> {
	value.parse().map(Duration::from_millis).map_err(|e| ClientOptionsParseError::from((key, e)))
}

fn parse_bool(key: &'static str, value: &str) -> std::result::Result<bool, ClientOptionsParseError> {
	match value {
		"true"  => Ok(true),
		"false" => Ok(false),
		_       => Err(ClientOptionsParseError::from((key, value.to_string())))
	}
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Credential {
	pub username:  Option<String>,
	pub password:  Option<String>,
	pub source:    Option<String>,
	pub mechanism: Option<AuthMech>
}

impl Credential {
	/// The mechanism to authenticate with, if any. A username without an
	/// explicit mechanism defaults to SCRAM-SHA-256.
	pub fn effective_mechanism(&self) -> Option<AuthMech> {
		self.mechanism.or_else(|| self.username.as_ref().map(|_| AuthMech::ScramSha256))
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum AuthMech {
	#[serde(rename = "MONGODB-X509")]
	MongoDbX509,
	#[serde(rename = "GSSAPI")]
	GssApi,
	#[serde(rename = "PLAIN")]
	Plain,
	#[serde(rename = "SCRAM-SHA-1")]
	ScramSha1,
	#[serde(rename = "SCRAM-SHA-256")]
	ScramSha256,
	#[serde(rename = "MONGODB-AWS")]
	MongoDbAws
}

impl FromStr for AuthMech {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(match s {
			"MONGODB-X509"  => Self::MongoDbX509,
			"GSSAPI"        => Self::GssApi,
			"PLAIN"         => Self::Plain,
			"SCRAM-SHA-1"   => Self::ScramSha1,
			"SCRAM-SHA-256" => Self::ScramSha256,
			"MONGODB-AWS"   => Self::MongoDbAws,
			_               => return Err(s.to_string())
		})
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConnectionPoolOptions {
	/// Zero means unbounded.
	pub max_pool_size:      usize,
	pub min_pool_size:      usize,
	pub max_idle_time:      Option<Duration>,
	pub wait_queue_timeout: Option<Duration>
}

impl Default for ConnectionPoolOptions {
	fn default() -> Self {
		Self {
			max_pool_size:      DEFAULT_MAX_POOL_SIZE,
			min_pool_size:      DEFAULT_MIN_POOL_SIZE,
			max_idle_time:      None,
			wait_queue_timeout: None
		}
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ServerSelectionConfig {
	pub local_threshold:          Duration,
	pub server_selection_timeout: Duration
}

impl Default for ServerSelectionConfig {
	fn default() -> Self {
		Self {
			local_threshold:          DEFAULT_LOCAL_THRESHOLD,
			server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT
		}
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ServerMonitorOptions {
	pub heartbeat_frequency:     Duration,
	/// Minimum gap between two checks, also the interval used for fast retries.
	pub min_heartbeat_frequency: Duration,
	/// Consecutive failed checks that are retried at `min_heartbeat_frequency`
	/// before the monitor falls back to `heartbeat_frequency`.
	pub max_fast_retries:        u32
}

impl Default for ServerMonitorOptions {
	fn default() -> Self {
		Self {
			heartbeat_frequency:     DEFAULT_HEARTBEAT_FREQUENCY,
			min_heartbeat_frequency: DEFAULT_MIN_HEARTBEAT_FREQUENCY,
			max_fast_retries:        DEFAULT_MAX_FAST_RETRIES
		}
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReadPreference {
	pub mode:          ReadPreferenceMode,
	pub max_staleness: Option<Duration>,
	pub tag_sets:      Vec<HashMap<String, String>>,
}

impl Default for ReadPreference {
	fn default() -> Self {
		Self::new(ReadPreferenceMode::Primary)
	}
}

impl ReadPreference {
	pub fn new(mode: ReadPreferenceMode) -> Self {
		Self { mode, max_staleness: None, tag_sets: Vec::new() }
	}

	pub fn primary() -> Self {
		Self::new(ReadPreferenceMode::Primary)
	}

	pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
		self.max_staleness = Some(max_staleness);
		self
	}

	pub fn with_tags(mut self, tags: &[(&str, &str)]) -> Self {
		self.tag_sets.push(tags.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect());
		self
	}

	pub fn validate(&self, heartbeat_frequency: Duration) -> Result<()> {
		if self.mode == ReadPreferenceMode::Primary && (self.max_staleness.is_some() || !self.tag_sets.is_empty()) {
			return Err(ClientOptionsParseError::from(("readPreference", "primary with tags or max staleness")).into());
		}

		match self.max_staleness {
			Some(max) if max < SMALLEST_MAX_STALENESS || max < heartbeat_frequency + IDLE_WRITE_PERIOD =>
				Err(ClientOptionsParseError::from(("maxStalenessSeconds", max)).into()),
			_ => Ok(())
		}
	}
}

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum ReadPreferenceMode {
	Primary,
	PrimaryPreferred,
	Secondary,
	SecondaryPreferred,
	Nearest
}

impl FromStr for ReadPreferenceMode {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(match s {
			"primary"            => Self::Primary,
			"primaryPreferred"   => Self::PrimaryPreferred,
			"secondary"          => Self::Secondary,
			"secondaryPreferred" => Self::SecondaryPreferred,
			"nearest"            => Self::Nearest,
			_ => return Err(s.to_string())
		})
	}
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteConcern {
	#[serde(rename = "j", skip_serializing_if = "Option::is_none")]
	pub journal:      Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub w:            Option<Acknowledgment>,
	#[serde(rename = "wtimeout", skip_serializing_if = "Option::is_none")]
	pub w_timeout_ms: Option<i64>
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Acknowledgment {
	Nodes(i32),
	#[serde(serialize_with = "serialize_majority")]
	Majority,
	Custom(String)
}

fn serialize_majority<S: serde::Serializer>(serializer: S) -> std::result::Result<S::Ok, S::Error> {
	serializer.serialize_str("majority")
}

#[cfg(feature = "tls")]
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct TlsOptions {
	pub allow_invalid_certificates: bool,
	pub allow_invalid_hostnames:    bool,
	pub ca_file:                    Option<String>,
	pub certificate_key_file:       Option<String>,
	pub insecure:                   bool,
}

pub type MDBResult<T> = std::result::Result<T, Error>;
pub(super) type Result<T> = MDBResult<T>;

/// Codes of server errors that indicate a replica set state change,
/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#not-writable-primary-and-node-is-recovering
pub const STATE_CHANGE_CODES: [i32; 7] = [
	91,    // ShutdownInProgress
	189,   // PrimarySteppedDown
	10107, // NotWritablePrimary
	11600, // InterruptedAtShutdown
	11602, // InterruptedDueToReplStateChange
	13435, // NotPrimaryNoSecondaryOk
	13436  // NotPrimaryOrSecondary
];

pub const RETRYABLE_CODES: [i32; 12] = [
	6,     // HostUnreachable
	7,     // HostNotFound
	89,    // NetworkTimeout
	91,    // ShutdownInProgress
	189,   // PrimarySteppedDown
	262,   // ExceededTimeLimit
	9001,  // SocketException
	10107, // NotWritablePrimary
	11600, // InterruptedAtShutdown
	11602, // InterruptedDueToReplStateChange
	13435, // NotPrimaryNoSecondaryOk
	13436  // NotPrimaryOrSecondary
];

/// The error returned by every fallible operation of the client. It carries
/// the address of the server that was last attempted, if any.
#[derive(Debug)]
pub struct Error {
	pub kind:    ErrorKind,
	pub address: Option<ServerAddress>
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
	#[error("no suitable server: {0}")]
	NoSuitableServer(String),
	#[error("server wire version is incompatible: {0:?}")]
	IncompatibleServer(CompatibilityError),
	#[error("timed out after {0:?} waiting for a pooled connection")]
	PoolExhausted(Duration),
	#[error("operation deadline expired before the request was sent")]
	DeadlineExpired,
	#[error("connection pool has been closed")]
	PoolClosed,
	#[error("connection closed by peer")]
	ConnectionClosed,
	#[error("network error: {0}")]
	Network(#[from] std::io::Error),
	#[error("ignored stale primary report: {0}")]
	StaleTopology(String),
	#[error("retryable write failed and no other server was available: {0}")]
	RetryableWriteError(Box<Error>),
	#[error("retryable read failed and no other server was available: {0}")]
	RetryableReadError(Box<Error>),
	#[error("command failed with code {code}: {message}")]
	Application {
		code:      i32,
		code_name: Option<String>,
		message:   String
	},
	#[error("invalid reply: {0:?}")]
	InvalidReply(InvalidReplyError),
	#[error("codec error: {0}")]
	Codec(String),
	#[cfg(feature = "auth")]
	#[error("authentication failed: {0:?}")]
	Auth(crate::auth::AuthError),
	#[cfg(feature = "tls")]
	#[error("tls error: {0:?}")]
	Tls(rustls::TLSError),
	#[cfg(feature = "tls")]
	#[error("invalid dns name: {0:?}")]
	Dns(webpki::InvalidDNSNameError),
	#[error("invalid client options: {0:?}")]
	InvalidOptions(ClientOptionsParseError),
	#[error("a lock was poisoned")]
	Sync
}

impl Error {
	pub fn new(kind: ErrorKind, address: Option<ServerAddress>) -> Self {
		Self { kind, address }
	}

	pub fn with_address(mut self, address: &ServerAddress) -> Self {
		self.address = Some(address.clone());
		self
	}

	/// Transport level failures, as opposed to errors reported by the server.
	pub fn is_network(&self) -> bool {
		matches!(self.kind, ErrorKind::Network(_) | ErrorKind::ConnectionClosed)
	}

	/// Server errors signalling that the server is no longer primary or is recovering.
	pub fn is_state_change(&self) -> bool {
		matches!(&self.kind, ErrorKind::Application { code, .. } if STATE_CHANGE_CODES.contains(code))
	}

	/// Whether the operation that produced this error may be retried once.
	pub fn is_retryable(&self) -> bool {
		match &self.kind {
			ErrorKind::Network(_) | ErrorKind::ConnectionClosed => true,
			ErrorKind::Application { code, .. } => RETRYABLE_CODES.contains(code),
			_ => false
		}
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match &self.address {
			Some(address) => write!(f, "{} (server {})", self.kind, address),
			None => self.kind.fmt(f)
		}
	}
}

impl std::error::Error for Error {}

impl<E> From<E> for Error where ErrorKind: From<E> {
	fn from(e: E) -> Self {
		Self { kind: e.into(), address: None }
	}
}

impl From<ClientOptionsParseError> for ErrorKind {
	fn from(e: ClientOptionsParseError) -> Self {
		Self::InvalidOptions(e)
	}
}

impl<T> From<std::sync::PoisonError<T>> for ErrorKind {
	fn from(_: std::sync::PoisonError<T>) -> Self {
		Self::Sync
	}
}

#[cfg(feature = "tls")]
impl From<rustls::TLSError> for ErrorKind {
	fn from(e: rustls::TLSError) -> Self {
		Self::Tls(e)
	}
}

#[cfg(feature = "tls")]
impl From<webpki::InvalidDNSNameError> for ErrorKind {
	fn from(e: webpki::InvalidDNSNameError) -> Self {
		Self::Dns(e)
	}
}

impl From<InvalidReplyError> for ErrorKind {
	fn from(e: InvalidReplyError) -> Self {
		Self::InvalidReply(e)
	}
}

pub(crate) fn bytes_to_hex(src: &[u8], dst: &mut [u8]) {
	fn fmt_digit(v: u8) -> u8 {
		match v {
			0x0..=0x9 => b'0' + v,
			_         => b'a' + v - 0xA
		}
	}

	for (i, v) in src.iter().copied().enumerate() {
		dst[i << 1] = fmt_digit(v >> 4);
		dst[(i << 1) + 1] = fmt_digit(v & 0x0F);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_connection_string() {
		let options = ClientOptions::from_str(
			"mongodb://user:pw@a.example.com:27018,B.example.com/admin?replicaSet=rs0\
			&minPoolSize=2&maxPoolSize=10&heartbeatFrequencyMS=2000&serverSelectionTimeoutMS=500\
			&socketTimeoutMS=100&readPreference=secondaryPreferred&readPreferenceTags=dc:ny,rack:1\
			&maxStalenessSeconds=120&retryWrites=false&w=majority").unwrap();

		assert_eq!(options.hosts, vec![
			ServerAddress::new("a.example.com", 27018),
			ServerAddress::new("b.example.com", DEFAULT_MONGO_PORT)
		]);
		assert_eq!(options.credential.username.as_deref(), Some("user"));
		assert_eq!(options.credential.password.as_deref(), Some("pw"));
		assert_eq!(options.credential.source.as_deref(), Some("admin"));
		assert_eq!(options.replica_set.as_deref(), Some("rs0"));
		assert_eq!(options.pool_options.min_pool_size, 2);
		assert_eq!(options.pool_options.max_pool_size, 10);
		assert_eq!(options.monitor_options.heartbeat_frequency, Duration::from_secs(2));
		assert_eq!(options.server_selection_config.server_selection_timeout, Duration::from_millis(500));
		assert_eq!(options.socket_timeout, Some(Duration::from_millis(100)));
		assert_eq!(options.read_preference.mode, ReadPreferenceMode::SecondaryPreferred);
		assert_eq!(options.read_preference.tag_sets[0].get("dc").map(String::as_str), Some("ny"));
		assert_eq!(options.read_preference.max_staleness, Some(Duration::from_secs(120)));
		assert!(!options.retry_writes);
		assert_eq!(options.write_concern.unwrap().w, Some(Acknowledgment::Majority));
	}

	#[test]
	fn reject_invalid() {
		assert!(matches!(ClientOptions::from_str("http://localhost").unwrap_err().kind,
			ErrorKind::InvalidOptions(ClientOptionsParseError::InvalidScheme)));
		assert!(matches!(ClientOptions::from_str("mongodb://localhost/?foo=bar").unwrap_err().kind,
			ErrorKind::InvalidOptions(ClientOptionsParseError::InvalidKey(_))));
		assert!(ClientOptions::from_str("mongodb://localhost/?maxStalenessSeconds=10&readPreference=secondary").is_err());
		assert!(ClientOptions::from_str("mongodb://a,b/?directConnection=true").is_err());
		assert!(ClientOptions::from_str("mongodb://localhost:notaport").is_err());
	}

	#[test]
	fn address() {
		assert_eq!("LocalHost".parse::<ServerAddress>().unwrap(), ServerAddress::new("localhost", 27017));
		assert_eq!("[::1]".parse::<ServerAddress>().unwrap().port, 27017);
		assert_eq!("[::1]:27019".parse::<ServerAddress>().unwrap().port, 27019);
		assert_eq!(ServerAddress::new("a", 1).to_string(), "a:1");
	}

	#[test]
	fn retryable_classification() {
		let err = Error::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
		assert!(err.is_network() && err.is_retryable());

		let err = Error::from(ErrorKind::Application { code: 10107, code_name: None, message: String::new() });
		assert!(err.is_state_change() && err.is_retryable() && !err.is_network());

		let err = Error::from(ErrorKind::Application { code: 2, code_name: None, message: String::new() });
		assert!(!err.is_retryable());
	}

	#[test]
	fn timeout_fallbacks() {
		let mut options = ClientOptions::default();
		assert_eq!(options.io_timeout(), DEFAULT_SOCKET_TIMEOUT);
		assert_eq!(options.wait_queue_timeout(), DEFAULT_SERVER_SELECTION_TIMEOUT);

		options.socket_timeout = Some(Duration::from_millis(100));
		options.pool_options.wait_queue_timeout = Some(Duration::from_millis(20));
		assert_eq!(options.io_timeout(), Duration::from_millis(100));
		assert_eq!(options.wait_queue_timeout(), Duration::from_millis(20));

		let err = Error::from(ErrorKind::DeadlineExpired);
		assert!(!err.is_network() && !err.is_retryable() && !err.is_state_change());
	}

	#[cfg(feature = "tls")]
	#[test]
	fn reject_relaxed_tls() {
		for key in &["tlsAllowInvalidCertificates", "tlsAllowInvalidHostnames", "tlsInsecure"] {
			let err = ClientOptions::from_str(&format!("mongodb://localhost/?tls=true&{}=true", key)).unwrap_err();
			assert!(matches!(err.kind, ErrorKind::InvalidOptions(ClientOptionsParseError::InvalidValue { key: k, .. }) if k == *key));
		}

		assert!(ClientOptions::from_str("mongodb://localhost/?tls=true&tlsInsecure=false").is_ok());
	}
}
