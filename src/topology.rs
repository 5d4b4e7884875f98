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
	crate::{*, wire::{HelloReply, Compressor, MIN_WIRE_VERSION, MAX_WIRE_VERSION}, apm::Event, oid::ObjectId, pool::Pool, monitor::Monitor},
	std::{
		sync::{Arc, Mutex, Condvar, RwLock, atomic::{AtomicBool, Ordering}},
		time::{SystemTime, Duration, UNIX_EPOCH},
		collections::HashMap
	}
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ServerType {
	Standalone,
	Mongos,
	RSPrimary,
	RSSecondary,
	RSArbiter,
	RSOther,
	RSGhost,
	Unknown
}

impl Default for ServerType {
	fn default() -> Self {
		Self::Unknown
	}
}

impl ServerType {
	pub fn is_data_bearing(self) -> bool {
		matches!(self, Self::Standalone | Self::Mongos | Self::RSPrimary | Self::RSSecondary)
	}
}

/// An immutable snapshot of one server, replaced wholesale on every check.
///
/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#serverdescription
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescription {
	pub address:                         ServerAddress,
	pub r#type:                          ServerType,
	/// Moving average of the heartbeat round trip times.
	pub rtt:                             Option<Duration>,
	pub last_update_time:                Option<SystemTime>,
	pub error:                           Option<String>,
	// fields from hello
	pub last_write_date:                 Option<SystemTime>,
	pub min_wire_version:                i32,
	pub max_wire_version:                i32,
	pub me:                              Option<ServerAddress>,
	pub hosts:                           Vec<ServerAddress>,
	pub passives:                        Vec<ServerAddress>,
	pub arbiters:                        Vec<ServerAddress>,
	pub tags:                            HashMap<String, String>,
	pub set_name:                        Option<String>,
	pub set_version:                     Option<i32>,
	pub election_id:                     Option<ObjectId>,
	pub primary:                         Option<ServerAddress>,
	pub logical_session_timeout_minutes: Option<i64>,
	// negotiated compressors
	pub compression:                     Vec<Compressor>
}

impl ServerDescription {
	pub fn unknown(address: ServerAddress, error: Option<String>) -> Self {
		Self {
			address,
			r#type:                          ServerType::Unknown,
			rtt:                             None,
			last_update_time:                Some(SystemTime::now()),
			error,
			last_write_date:                 None,
			min_wire_version:                0,
			max_wire_version:                0,
			me:                              None,
			hosts:                           Vec::new(),
			passives:                        Vec::new(),
			arbiters:                        Vec::new(),
			tags:                            HashMap::new(),
			set_name:                        None,
			set_version:                     None,
			election_id:                     None,
			primary:                         None,
			logical_session_timeout_minutes: None,
			compression:                     Vec::new()
		}
	}

	/// Builds a description from a successful hello reply.
	pub fn from_reply(address: ServerAddress, reply: &HelloReply, rtt: Duration) -> Self {
		let r#type = match reply {
			HelloReply { msg: Some(msg), .. } if msg == "isdbgrid" => ServerType::Mongos,
			HelloReply { set_name: Some(_), hidden:       Some(true), .. } => ServerType::RSOther,
			HelloReply { set_name: Some(_), ismaster:     true,       .. } => ServerType::RSPrimary,
			HelloReply { set_name: Some(_), secondary:    Some(true), .. } => ServerType::RSSecondary,
			HelloReply { set_name: Some(_), arbiter_only: Some(true), .. } => ServerType::RSArbiter,
			HelloReply { set_name: Some(_),                           .. } => ServerType::RSOther,
			HelloReply { isreplicaset: Some(true),                    .. } => ServerType::RSGhost,
			_                                                              => ServerType::Standalone
		};

		fn parse(hosts: &Option<Vec<String>>) -> Vec<ServerAddress> {
			hosts.iter().flatten().filter_map(|host| host.parse().ok()).collect()
		}

		Self {
			address,
			r#type,
			rtt:                             Some(rtt),
			last_update_time:                Some(SystemTime::now()),
			error:                           None,
			last_write_date:                 reply.last_write.map(|v|
				UNIX_EPOCH + Duration::from_millis(v.last_write_date.max(0) as u64)),
			min_wire_version:                reply.min_wire_version,
			max_wire_version:                reply.max_wire_version,
			me:                              reply.me.as_deref().and_then(|me| me.parse().ok()),
			hosts:                           parse(&reply.hosts),
			passives:                        parse(&reply.passives),
			arbiters:                        parse(&reply.arbiters),
			tags:                            reply.tags.clone().unwrap_or_default(),
			set_name:                        reply.set_name.clone(),
			set_version:                     reply.set_version,
			election_id:                     reply.election_id,
			primary:                         reply.primary.as_deref().and_then(|primary| primary.parse().ok()),
			logical_session_timeout_minutes: reply.logical_session_timeout_minutes,
			compression:                     reply.compression.clone().unwrap_or_default()
		}
	}

	/// Compares everything but the timing fields, i.e. whether a change
	/// needs to be announced.
	pub fn same_as(&self, other: &Self) -> bool {
		self.address == other.address
			&& self.r#type == other.r#type
			&& self.error == other.error
			&& self.min_wire_version == other.min_wire_version
			&& self.max_wire_version == other.max_wire_version
			&& self.me == other.me
			&& self.hosts == other.hosts
			&& self.passives == other.passives
			&& self.arbiters == other.arbiters
			&& self.tags == other.tags
			&& self.set_name == other.set_name
			&& self.set_version == other.set_version
			&& self.election_id == other.election_id
			&& self.primary == other.primary
			&& self.logical_session_timeout_minutes == other.logical_session_timeout_minutes
	}

	/// All members this server reports.
	pub fn members(&self) -> impl Iterator<Item = &ServerAddress> {
		self.hosts.iter().chain(&self.passives).chain(&self.arbiters)
	}
}

/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#topologydescription
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyDescription {
	pub r#type:                          TopologyType,
	pub set_name:                        Option<String>,
	pub max_set_version:                 Option<i32>,
	pub max_election_id:                 Option<ObjectId>,
	pub servers:                         HashMap<ServerAddress, ServerDescription>,
	pub compatibility_error:             Option<CompatibilityError>,
	pub logical_session_timeout_minutes: Option<i64>
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TopologyType {
	Single,
	ReplicaSetNoPrimary,
	ReplicaSetWithPrimary,
	Sharded,
	Unknown
}

impl Default for TopologyType {
	fn default() -> Self {
		Self::Unknown
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CompatibilityError {
	WireVersionTooOld(ServerAddress),
	WireVersionTooNew(ServerAddress)
}

/// What a transition changed besides the descriptions themselves.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TopologyDiff {
	pub added:   Vec<ServerAddress>,
	pub removed: Vec<ServerAddress>,
	/// Servers whose monitors should check immediately.
	pub check:   Vec<ServerAddress>,
	/// Set if the report was a stale primary claim and has been ignored.
	pub stale:   Option<String>
}

impl TopologyDescription {
	/// The initial description, one Unknown server per seed.
	pub fn new(options: &ClientOptions) -> Self {
		Self {
			r#type:   match (options.direct_connection, &options.replica_set) {
				(Some(true), _) => TopologyType::Single,
				(_, Some(_))    => TopologyType::ReplicaSetNoPrimary,
				_               => TopologyType::Unknown
			},
			set_name: options.replica_set.clone(),
			servers:  options.hosts.iter()
				.map(|address| (address.clone(), ServerDescription::unknown(address.clone(), None)))
				.collect(),
			..Self::default()
		}
	}

	pub fn primary(&self) -> Option<&ServerDescription> {
		self.servers.values().find(|server| server.r#type == ServerType::RSPrimary)
	}

	pub fn supports_sessions(&self) -> bool {
		self.logical_session_timeout_minutes.is_some()
	}

	/// Computes the description following a new server description. Reports
	/// for addresses that are no longer members are ignored.
	///
	/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.rst#updating-the-topologydescription
	pub fn update(&self, description: ServerDescription) -> (Self, TopologyDiff) {
		let mut next = self.clone();
		let mut diff = TopologyDiff::default();

		if !next.servers.contains_key(&description.address) {
			return (next, diff);
		}

		next.apply(description, &mut diff);
		next.update_compatibility();
		next.update_session_timeout();
		(next, diff)
	}

	fn apply(&mut self, description: ServerDescription, diff: &mut TopologyDiff) {
		self.servers.insert(description.address.clone(), description.clone());

		match (self.r#type, description.r#type) {
			(TopologyType::Single, ServerType::Unknown) => (),
			(TopologyType::Single, _) => if let Some(set_name) = &self.set_name {
				if description.set_name.as_ref() != Some(set_name) {
					let error = format!("replica set name mismatch, expected {}", set_name);
					self.servers.insert(description.address.clone(),
						ServerDescription::unknown(description.address.clone(), Some(error)));
				}
			}
			// no-op
			(TopologyType::Unknown, ServerType::Unknown)
			| (TopologyType::Unknown, ServerType::RSGhost)
			| (TopologyType::Sharded, ServerType::Unknown)
			| (TopologyType::Sharded, ServerType::Mongos)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::Unknown)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSGhost) => (),
			// remove
			(TopologyType::Sharded, _)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::Standalone)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::Mongos) => self.remove(&description.address, diff),
			(TopologyType::ReplicaSetWithPrimary, ServerType::Standalone)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::Mongos) => {
				self.remove(&description.address, diff);
				self.check_if_has_primary();
			}
			// update topology type
			(TopologyType::Unknown, ServerType::Standalone) => {
				self.r#type = TopologyType::Single;
				let others = self.servers.keys()
					.filter(|address| **address != description.address)
					.cloned()
					.collect::<Vec<_>>();
				for address in &others {
					self.remove(address, diff);
				}
			}
			(TopologyType::Unknown, ServerType::Mongos) => self.r#type = TopologyType::Sharded,
			// replica sets
			(TopologyType::Unknown, ServerType::RSPrimary)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSPrimary)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSPrimary) =>
				self.update_rs_from_primary(&description, diff),
			(TopologyType::Unknown, ServerType::RSSecondary)
			| (TopologyType::Unknown, ServerType::RSArbiter)
			| (TopologyType::Unknown, ServerType::RSOther)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSSecondary)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSArbiter)
			| (TopologyType::ReplicaSetNoPrimary, ServerType::RSOther) => {
				self.r#type = TopologyType::ReplicaSetNoPrimary;
				self.update_rs_without_primary(&description, diff);
			}
			(TopologyType::ReplicaSetWithPrimary, ServerType::RSSecondary)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSArbiter)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSOther) =>
				self.update_rs_with_primary_from_member(&description, diff),
			(TopologyType::ReplicaSetWithPrimary, ServerType::Unknown)
			| (TopologyType::ReplicaSetWithPrimary, ServerType::RSGhost) =>
				self.check_if_has_primary()
		}
	}

	fn update_rs_from_primary(&mut self, description: &ServerDescription, diff: &mut TopologyDiff) {
		if self.set_name.is_none() {
			self.set_name = description.set_name.clone();
		} else if self.set_name != description.set_name {
			self.remove(&description.address, diff);
			self.check_if_has_primary();
			return;
		}

		// reject stale primaries

		if let (Some(set_version), Some(election_id)) = (description.set_version, description.election_id) {
			if let (Some(max_set_version), Some(max_election_id)) = (self.max_set_version, self.max_election_id) {
				if (max_set_version, max_election_id) > (set_version, election_id) {
					diff.stale = Some(format!(
						"primary {} reported (setVersion {}, electionId {}), last accepted (setVersion {}, electionId {})",
						description.address, set_version, election_id, max_set_version, max_election_id));
					self.servers.insert(description.address.clone(),
						ServerDescription::unknown(description.address.clone(), diff.stale.clone()));
					self.check_if_has_primary();
					return;
				}
			}
			self.max_election_id = Some(election_id);
		}

		if let Some(set_version) = description.set_version {
			if self.max_set_version.map_or(true, |max| set_version > max) {
				self.max_set_version = Some(set_version);
			}
		}

		// demote other primaries

		let demoted = self.servers.values()
			.filter(|server| server.r#type == ServerType::RSPrimary && server.address != description.address)
			.map(|server| server.address.clone())
			.collect::<Vec<_>>();

		for address in demoted {
			self.servers.insert(address.clone(), ServerDescription::unknown(address.clone(), None));
			diff.check.push(address);
		}

		// the primary's view of the membership is authoritative

		for address in description.members() {
			self.add(address, diff);
		}

		let removed = self.servers.keys()
			.filter(|address| !description.members().any(|member| member == *address))
			.cloned()
			.collect::<Vec<_>>();

		for address in &removed {
			self.remove(address, diff);
		}

		self.check_if_has_primary();
	}

	fn update_rs_without_primary(&mut self, description: &ServerDescription, diff: &mut TopologyDiff) {
		if self.set_name.is_none() {
			self.set_name = description.set_name.clone();
		} else if self.set_name != description.set_name {
			self.remove(&description.address, diff);
			return;
		}

		for address in description.members() {
			self.add(address, diff);
		}

		self.check_named_primary(description, diff);

		if description.me.as_ref().map_or(false, |me| *me != description.address) {
			self.remove(&description.address, diff);
		}
	}

	fn update_rs_with_primary_from_member(&mut self, description: &ServerDescription, diff: &mut TopologyDiff) {
		if self.set_name != description.set_name
			|| description.me.as_ref().map_or(false, |me| *me != description.address) {
			self.remove(&description.address, diff);
			self.check_if_has_primary();
			return;
		}

		self.check_if_has_primary();
		self.check_named_primary(description, diff);
	}

	/// Asks for an immediate check of a primary named by a member, if that
	/// server is not known to be primary yet.
	fn check_named_primary(&self, description: &ServerDescription, diff: &mut TopologyDiff) {
		if let Some(primary) = &description.primary {
			if self.servers.get(primary).map_or(false, |server| server.r#type == ServerType::Unknown)
				&& !diff.check.contains(primary) {
				diff.check.push(primary.clone());
			}
		}
	}

	fn check_if_has_primary(&mut self) {
		self.r#type = match self.primary() {
			Some(_) => TopologyType::ReplicaSetWithPrimary,
			None    => TopologyType::ReplicaSetNoPrimary
		};
	}

	fn add(&mut self, address: &ServerAddress, diff: &mut TopologyDiff) {
		if !self.servers.contains_key(address) {
			self.servers.insert(address.clone(), ServerDescription::unknown(address.clone(), None));
			diff.added.push(address.clone());
		}
	}

	fn remove(&mut self, address: &ServerAddress, diff: &mut TopologyDiff) {
		if self.servers.remove(address).is_some() {
			diff.added.retain(|added| added != address);
			diff.removed.push(address.clone());
		}
	}

	fn update_compatibility(&mut self) {
		self.compatibility_error = self.servers.values()
			.filter(|server| server.r#type != ServerType::Unknown)
			.find_map(|server| if server.min_wire_version > MAX_WIRE_VERSION {
				Some(CompatibilityError::WireVersionTooNew(server.address.clone()))
			} else if server.max_wire_version < MIN_WIRE_VERSION {
				Some(CompatibilityError::WireVersionTooOld(server.address.clone()))
			} else {
				None
			});
	}

	/// The minimum over all data bearing servers, `None` if any of them does
	/// not support sessions.
	fn update_session_timeout(&mut self) {
		let mut timeout = None;
		for server in self.servers.values().filter(|server| server.r#type.is_data_bearing()) {
			match server.logical_session_timeout_minutes {
				None => {
					self.logical_session_timeout_minutes = None;
					return;
				}
				Some(v) => timeout = Some(timeout.map_or(v, |t: i64| t.min(v)))
			}
		}
		self.logical_session_timeout_minutes = timeout;
	}
}

/// The live topology: the current snapshot plus one `Server` (pool and
/// monitor) per member.
///
/// Every update produces a numbered snapshot. It becomes the latest one while
/// the server map is locked, and is published to selectors only after its
/// events were dispatched.
#[derive(Debug)]
pub struct Topology {
	latest:    RwLock<Snapshot>,
	published: Mutex<Snapshot>,
	servers:   RwLock<HashMap<ServerAddress, Server>>,
	changed:   Condvar,
	closed:    AtomicBool
}

#[derive(Debug, Clone)]
struct Snapshot {
	version:     u64,
	description: Arc<TopologyDescription>
}

impl Topology {
	pub fn new(options: &ClientOptions) -> Self {
		let snapshot = Snapshot { version: 0, description: Arc::new(TopologyDescription::new(options)) };
		Self {
			latest:    RwLock::new(snapshot.clone()),
			published: Mutex::new(snapshot),
			servers:   RwLock::new(HashMap::new()),
			changed:   Condvar::new(),
			closed:    AtomicBool::new(false)
		}
	}

	/// Starts a server for every seed.
	pub fn init(&self, client: &Client) -> Result<()> {
		let mut servers = self.servers.write()?;
		let description = self.description()?;
		for address in description.servers.keys() {
			servers.insert(address.clone(), Server::new(address, client)?);
		}
		drop(servers);

		// listeners may use the client, so no lock is held while they run
		for address in description.servers.keys() {
			Server::opened(client, address)?;
		}
		Ok(())
	}

	/// The current snapshot.
	pub fn description(&self) -> Result<Arc<TopologyDescription>> {
		Ok(self.published.lock()?.description.clone())
	}

	pub fn server(&self, address: &ServerAddress) -> Result<Option<Server>> {
		Ok(self.servers.read()?.get(address).cloned())
	}

	/// Applies a new server description, starting and stopping servers as the
	/// membership changes, and publishes the resulting snapshot.
	pub fn update(&self, client: &Client, description: ServerDescription) -> Result<()> {
		let mut servers = self.servers.write()?;

		if self.closed.load(Ordering::SeqCst) {
			return Ok(());
		}

		let mut latest = self.latest.write()?;
		let previous = latest.description.clone();
		let address = description.address.clone();
		let (next, diff) = previous.update(description);

		if let Some(stale) = &diff.stale {
			let err = Error::new(ErrorKind::StaleTopology(stale.clone()), Some(address.clone()));
			tracing::debug!(error = %err, "ignored primary report");
		}

		let closed = diff.removed.iter()
			.filter_map(|removed| servers.remove(removed))
			.collect::<Vec<_>>();

		for added in &diff.added {
			servers.insert(added.clone(), Server::new(added, client)?);
		}

		let next = Snapshot { version: latest.version + 1, description: Arc::new(next) };
		*latest = next.clone();
		drop(latest);

		for check in &diff.check {
			if let Some(server) = servers.get(check) {
				server.request_check();
			}
		}

		drop(servers);

		if previous.r#type != next.description.r#type {
			tracing::debug!(from = ?previous.r#type, to = ?next.description.r#type,
				set_name = ?next.description.set_name, "topology type changed");
		}

		for server in &closed {
			server.close(client);
		}

		let dispatched = Self::dispatch_changes(client, &previous, &next.description, &diff, &closed);
		self.publish(next)?;
		dispatched
	}

	fn dispatch_changes(
		client:   &Client,
		previous: &TopologyDescription,
		next:     &TopologyDescription,
		diff:     &TopologyDiff,
		closed:   &[Server]
	) -> Result<()> {
		for server in closed {
			client.dispatch_event(Event::ServerClosed { address: &server.address })?;
		}

		for added in &diff.added {
			Server::opened(client, added)?;
		}

		let mut changed = previous.r#type != next.r#type || !diff.added.is_empty() || !diff.removed.is_empty();

		for (address, new) in &next.servers {
			match previous.servers.get(address) {
				Some(old) if !old.same_as(new) => {
					changed = true;
					client.dispatch_event(Event::ServerDescriptionChanged { address, previous: old, new })?;
				}
				_ => ()
			}
		}

		if changed {
			client.dispatch_event(Event::TopologyDescriptionChanged { previous, new: next })?;
		}

		Ok(())
	}

	/// Makes the snapshot visible and wakes waiting selectors. Snapshots
	/// published out of order never replace a newer one.
	fn publish(&self, snapshot: Snapshot) -> Result<()> {
		let mut published = self.published.lock()?;
		if snapshot.version > published.version {
			*published = snapshot;
		}
		self.changed.notify_all();
		Ok(())
	}

	/// Replaces a server's description with an Unknown one carrying the error.
	pub fn mark_unknown(&self, client: &Client, address: &ServerAddress, error: &Error) -> Result<()> {
		self.update(client, ServerDescription::unknown(address.clone(), Some(error.to_string())))
	}

	/// A counter bumped on every published snapshot.
	pub fn version(&self) -> Result<u64> {
		Ok(self.published.lock()?.version)
	}

	/// Blocks until a snapshot newer than `seen` is published or the timeout
	/// elapses, returning the current version.
	pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> Result<u64> {
		let guard = self.published.lock()?;
		let (guard, _) = self.changed.wait_timeout_while(guard, timeout, |published| published.version == seen)?;
		Ok(guard.version)
	}

	/// Wakes every monitor, e.g. when selection finds no suitable server.
	pub fn request_check_all(&self) -> Result<()> {
		for server in self.servers.read()?.values() {
			server.request_check();
		}
		Ok(())
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Stops all monitors and closes all pools.
	pub fn close(&self, client: &Client) -> Result<()> {
		let mut servers = self.servers.write()?;
		self.closed.store(true, Ordering::SeqCst);
		let closed = servers.drain().map(|(_, server)| server).collect::<Vec<_>>();

		let mut latest = self.latest.write()?;
		latest.version += 1;
		let snapshot = latest.clone();
		drop(latest);
		drop(servers);

		for server in &closed {
			server.close(client);
		}

		self.publish(snapshot)
	}
}

/// A member of the topology: its connection pool and its monitor.
#[derive(Debug, Clone)]
pub struct Server(Arc<ServerInner>);

#[derive(Debug)]
pub struct ServerInner {
	pub address: ServerAddress,
	pub pool:    Pool,
	monitor:     Monitor
}

impl std::ops::Deref for Server {
	type Target = ServerInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl Server {
	/// Creates the pool and starts the monitor. The matching events are
	/// dispatched by `opened`, once the caller released its locks.
	pub fn new(address: &ServerAddress, client: &Client) -> Result<Self> {
		Ok(Self(Arc::new(ServerInner {
			address: address.clone(),
			pool:    Pool::new(address.clone(), client.options.pool_options),
			monitor: Monitor::start(address.clone(), client)?
		})))
	}

	fn opened(client: &Client, address: &ServerAddress) -> Result<()> {
		client.dispatch_event(Event::PoolCreated { address, options: &client.options.pool_options })?;
		client.dispatch_event(Event::ServerOpening { address })
	}

	/// Wakes the monitor for an immediate check.
	pub fn request_check(&self) {
		self.monitor.request_check();
	}

	fn close(&self, client: &Client) {
		self.monitor.stop();
		if let Err(e) = self.pool.close(client) {
			tracing::warn!(address = %self.address, error = %e, "failed to close connection pool");
		}
	}
}
