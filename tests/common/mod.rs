#![allow(dead_code)]

use {
	mongo_topology::{
		*,
		wire::{self, Codec, Establisher, HelloRequest, HelloReply, Stream, Transport},
		topology::ServerDescription
	},
	serde_json::{json, Value},
	std::{
		collections::HashMap,
		io::{self, Read, Write, Cursor},
		sync::{Arc, Mutex, atomic::{AtomicUsize, Ordering}},
		time::{Duration, Instant, SystemTime, UNIX_EPOCH}
	}
};

/// Encodes the core's commands as JSON documents.
pub struct JsonCodec;

impl Codec for JsonCodec {
	fn encode_hello(&self, request: &HelloRequest) -> MDBResult<Vec<u8>> {
		serde_json::to_vec(request).map_err(|e| ErrorKind::Codec(e.to_string()).into())
	}

	fn decode_hello(&self, payload: &[u8]) -> MDBResult<HelloReply> {
		serde_json::from_slice(payload).map_err(|e| ErrorKind::Codec(e.to_string()).into())
	}
}

#[derive(Default)]
struct MockServer {
	hello:       Value,
	down:        bool,
	ops:         usize,
	connections: usize,
	/// connects, refused ones included
	attempts:    usize
}

/// A set of in-memory servers, addressable through `Establisher`.
#[derive(Clone, Default)]
pub struct MockCluster {
	servers:  Arc<Mutex<HashMap<ServerAddress, MockServer>>>,
	/// operations, on any server, answered with a dropped connection
	fail_ops: Arc<AtomicUsize>
}

impl MockCluster {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_hello(&self, address: &str, hello: Value) {
		self.servers.lock().unwrap().entry(addr(address)).or_default().hello = hello;
	}

	pub fn set_down(&self, address: &str, down: bool) {
		self.servers.lock().unwrap().entry(addr(address)).or_default().down = down;
	}

	pub fn fail_next_ops(&self, n: usize) {
		self.fail_ops.store(n, Ordering::SeqCst);
	}

	pub fn ops(&self, address: &str) -> usize {
		self.servers.lock().unwrap().get(&addr(address)).map_or(0, |s| s.ops)
	}

	pub fn attempts(&self, address: &str) -> usize {
		self.servers.lock().unwrap().get(&addr(address)).map_or(0, |s| s.attempts)
	}

	pub fn connections(&self, address: &str) -> usize {
		self.servers.lock().unwrap().get(&addr(address)).map_or(0, |s| s.connections)
	}

	pub fn client(&self, options: ClientOptions) -> Client {
		Client::with_establisher(options, Arc::new(JsonCodec), Arc::new(self.clone())).unwrap()
	}

	/// Answers one request, `None` dropping the connection.
	fn respond(&self, address: &ServerAddress, request: &Value) -> Option<Value> {
		let mut servers = self.servers.lock().unwrap();
		let server = servers.get_mut(address)?;

		if server.down {
			return None;
		}

		if request.get("isMaster").is_some() {
			return Some(server.hello.clone());
		}

		server.ops += 1;
		if self.fail_ops.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
			return None;
		}

		Some(match request.get("fail") {
			Some(Value::Number(code)) => json!({ "ok": 0, "code": code, "errmsg": "command failed" }),
			_ => json!({ "ok": 1, "address": address.to_string() })
		})
	}
}

impl Establisher for MockCluster {
	fn connect(&self, address: &ServerAddress, _options: &ClientOptions, _timeout: Duration) -> MDBResult<Stream> {
		let mut servers = self.servers.lock().unwrap();
		if let Some(server) = servers.get_mut(address) {
			server.attempts += 1;
		}

		match servers.get_mut(address) {
			Some(server) if !server.down => {
				server.connections += 1;
				Ok(Stream::Custom(Box::new(MockStream {
					cluster: self.clone(),
					address: address.clone(),
					input:   Cursor::new(Vec::new()),
					output:  Vec::new(),
					broken:  false
				})))
			}
			_ => Err(io::Error::from(io::ErrorKind::ConnectionRefused).into())
		}
	}
}

/// One client side socket to a mock server. Requests are answered when the
/// writer flushes a complete message.
struct MockStream {
	cluster: MockCluster,
	address: ServerAddress,
	input:   Cursor<Vec<u8>>,
	output:  Vec<u8>,
	broken:  bool
}

impl Read for MockStream {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		if self.broken {
			return Err(io::ErrorKind::ConnectionReset.into());
		}
		self.input.read(buf)
	}
}

impl Write for MockStream {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		if self.broken {
			return Err(io::ErrorKind::BrokenPipe.into());
		}
		self.output.extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		let request = std::mem::take(&mut self.output);
		let (header, payload) = wire::read_message(&mut request.as_slice())
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
		let request: Value = serde_json::from_slice(&payload)?;

		match self.cluster.respond(&self.address, &request) {
			Some(reply) => {
				let mut buf = Vec::new();
				wire::write_message(&mut buf, 0, header.request_id, None, &serde_json::to_vec(&reply)?)?;
				self.input = Cursor::new(buf);
			}
			None => self.broken = true
		}

		Ok(())
	}
}

impl Transport for MockStream {
	fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
		Ok(())
	}
}

/// Asks the server it is sent to for its address.
pub struct Ping {
	pub criteria:     SelectionCriteria,
	pub retryability: Retryability,
	pub fail:         Option<i32>,
	pub timeout:      Option<Duration>
}

impl Ping {
	pub fn read(read_preference: ReadPreference) -> Self {
		Self { criteria: read_preference.into(), retryability: Retryability::Read, fail: None, timeout: None }
	}

	pub fn write() -> Self {
		Self { criteria: SelectionCriteria::Write, retryability: Retryability::Write, fail: None, timeout: None }
	}
}

impl Operation for Ping {
	type Output = ServerAddress;

	fn name(&self) -> &str {
		"ping"
	}

	fn selection_criteria(&self) -> SelectionCriteria {
		self.criteria.clone()
	}

	fn retryability(&self) -> Retryability {
		self.retryability
	}

	fn timeout(&self) -> Option<Duration> {
		self.timeout
	}

	fn encode(&self, _description: &ServerDescription) -> MDBResult<Vec<u8>> {
		serde_json::to_vec(&json!({ "ping": 1, "fail": self.fail }))
			.map_err(|e| ErrorKind::Codec(e.to_string()).into())
	}

	fn handle_response(&self, reply: &[u8], _description: &ServerDescription) -> MDBResult<ServerAddress> {
		let reply: Value = serde_json::from_slice(reply).map_err(|e| ErrorKind::Codec(e.to_string()))?;

		if reply["ok"] != json!(1) {
			return Err(ErrorKind::Application {
				code:      reply["code"].as_i64().unwrap_or_default() as i32,
				code_name: None,
				message:   reply["errmsg"].as_str().unwrap_or_default().to_string()
			}.into());
		}

		reply["address"].as_str().and_then(|s| s.parse().ok())
			.ok_or_else(|| ErrorKind::Codec("missing address".to_string()).into())
	}
}

pub fn addr(s: &str) -> ServerAddress {
	s.parse().unwrap()
}

pub fn options(hosts: &[&str]) -> ClientOptions {
	ClientOptions {
		hosts:                   hosts.iter().map(|h| addr(h)).collect(),
		server_selection_config: ServerSelectionConfig {
			local_threshold:          Duration::from_secs(1),
			server_selection_timeout: Duration::from_millis(1000)
		},
		monitor_options:         ServerMonitorOptions {
			heartbeat_frequency:     Duration::from_millis(50),
			min_heartbeat_frequency: Duration::from_millis(5),
			max_fast_retries:        3
		},
		..ClientOptions::default()
	}
}

fn now_millis() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

pub fn standalone() -> Value {
	json!({ "ok": 1, "ismaster": true, "minWireVersion": 0, "maxWireVersion": 13 })
}

pub fn mongos() -> Value {
	json!({
		"ok": 1, "ismaster": true, "msg": "isdbgrid",
		"minWireVersion": 0, "maxWireVersion": 13, "logicalSessionTimeoutMinutes": 30
	})
}

pub fn primary(me: &str, hosts: &[&str], set_version: i32, election_id: u64) -> Value {
	json!({
		"ok": 1, "ismaster": true, "setName": "rs0", "me": me, "hosts": hosts,
		"setVersion": set_version, "electionId": { "$oid": format!("{:024x}", election_id) },
		"minWireVersion": 0, "maxWireVersion": 13, "logicalSessionTimeoutMinutes": 30,
		"lastWrite": { "lastWriteDate": now_millis() }
	})
}

pub fn secondary(me: &str, hosts: &[&str]) -> Value {
	json!({
		"ok": 1, "ismaster": false, "secondary": true, "setName": "rs0", "me": me, "hosts": hosts,
		"minWireVersion": 0, "maxWireVersion": 13, "logicalSessionTimeoutMinutes": 30,
		"lastWrite": { "lastWriteDate": now_millis() }
	})
}

/// Polls until the condition holds, panicking after a few seconds.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
	let started = Instant::now();
	while !condition() {
		assert!(started.elapsed() < Duration::from_secs(5), "timed out waiting for {}", what);
		std::thread::sleep(Duration::from_millis(5));
	}
}
