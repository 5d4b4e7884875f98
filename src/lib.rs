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

#![warn(clippy::all)]
#![allow(clippy::from_over_into)]
#![forbid(unsafe_code)]

use {
	self::{common::Result, topology::{Topology, Server, TopologyDescription}, wire::{Codec, Establisher, TcpEstablisher}},
	std::sync::{Arc, RwLock, atomic::{AtomicI32, AtomicUsize, AtomicBool, Ordering}}
};

pub use self::{
	common::*,
	utils::*,
	oid::ObjectId,
	selection::SelectionCriteria,
	executor::{Operation, Retryability}
};

pub mod common;
pub mod wire;
pub mod oid;
#[cfg(feature = "auth")]
pub mod auth;
pub mod apm;
pub mod topology;
pub mod selection;
pub mod monitor;
pub mod pool;
pub mod executor;
pub mod utils;

pub static DRIVER_NAME: &str = "mongo-rust-driver";

/// Handle to a deployment. Cheap to clone; all clones share the topology,
/// the pools and the monitors.
#[derive(Debug, Clone)]
pub struct Client(Arc<ClientInner>);

pub struct ClientInner {
	pub options:   ClientOptions,
	codec:         Arc<dyn Codec>,
	establisher:   Arc<dyn Establisher>,
	topology:      Topology,
	request_id:    AtomicI32,
	operation_id:  AtomicUsize,
	listeners_set: AtomicBool,
	listeners:     RwLock<Vec<apm::EventListener>>
}

impl std::ops::Deref for Client {
	type Target = ClientInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl std::fmt::Debug for ClientInner {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.debug_struct("ClientInner")
			.field("options", &self.options)
			.field("topology", &self.topology)
			.field("request_id", &self.request_id)
			.field("operation_id", &self.operation_id)
			.field("listeners_set", &self.listeners_set)
			.finish()
	}
}

impl Client {
	/// Creates a client connecting via TCP (and TLS if configured) and starts
	/// monitoring the seed list.
	pub fn new(options: ClientOptions, codec: Arc<dyn Codec>) -> Result<Self> {
		Self::with_establisher(options, codec, Arc::new(TcpEstablisher))
	}

	pub fn with_establisher(options: ClientOptions, codec: Arc<dyn Codec>, establisher: Arc<dyn Establisher>) -> Result<Self> {
		Self::with_listener(options, codec, establisher, None)
	}

	/// Like `with_establisher`, registering the listener before any monitor
	/// starts so that no event is missed.
	pub fn with_listener(
		options:     ClientOptions,
		codec:       Arc<dyn Codec>,
		establisher: Arc<dyn Establisher>,
		listener:    Option<apm::EventListener>
	) -> Result<Self> {
		#[allow(unused_mut)]
		let mut options = options;
		#[cfg(feature = "tls")]
		options.init_tls_config()?;
		options.validate()?;

		let self_ = Self(Arc::new(ClientInner {
			topology:      Topology::new(&options),
			options,
			codec,
			establisher,
			request_id:    AtomicI32::new(1),
			operation_id:  AtomicUsize::new(1),
			listeners_set: AtomicBool::new(listener.is_some()),
			listeners:     RwLock::new(listener.into_iter().collect())
		}));

		tracing::debug!(hosts = ?self_.options.hosts, set_name = ?self_.options.replica_set, "starting topology monitoring");
		self_.topology.init(&self_)?;
		Ok(self_)
	}

	/// The current topology snapshot.
	pub fn topology(&self) -> Result<Arc<TopologyDescription>> {
		self.topology.description()
	}

	/// Blocks until a server suitable for the criteria is known, up to the
	/// server selection timeout.
	pub fn select_server(&self, criteria: &SelectionCriteria) -> Result<Server> {
		self.select_server_with(criteria, &Deadline::after(self.options.timeout), &[])
	}

	/// Selects a server other than the excluded ones. Every published snapshot
	/// is re-evaluated until one is suitable or the selection timeout, bounded
	/// by the deadline, expires.
	///
	/// see https://github.com/mongodb/specifications/blob/master/source/server-selection/server-selection.rst#multi-threaded-or-asynchronous-server-selection
	pub fn select_server_with(
		&self,
		criteria: &SelectionCriteria,
		deadline: &Deadline,
		excluded: &[ServerAddress]
	) -> Result<Server> {
		let config = &self.options.server_selection_config;
		let heartbeat_frequency = self.options.monitor_options.heartbeat_frequency;
		let timeout = deadline.bound(config.server_selection_timeout);
		let selection_deadline = Deadline::after(Some(timeout));

		if let SelectionCriteria::Read(read_preference) = criteria {
			read_preference.validate(heartbeat_frequency)?;
		}

		loop {
			let version = self.topology.version()?;
			let description = self.topology.description()?;

			if let Some(address) = selection::select(
				&description, criteria, config.local_threshold, heartbeat_frequency, excluded)? {
				if let Some(server) = self.topology.server(&address)? {
					return Ok(server);
				}
			}

			let remaining = match selection_deadline.remaining() {
				Some(remaining) if remaining > std::time::Duration::default() && !self.topology.is_closed() => remaining,
				_ => return Err(ErrorKind::NoSuitableServer(format!(
					"{:?} after {:?} in a {:?} topology", criteria, timeout, description.r#type)).into())
			};

			self.topology.request_check_all()?;
			self.topology.wait_for_change(version, remaining)?;
		}
	}

	pub fn add_event_listener(&self, listener: impl Fn(&Self, &apm::Event) + Send + Sync + 'static) -> Result<()> {
		self.listeners_set.store(true, Ordering::SeqCst);
		self.listeners.write()?.push(Box::new(listener));
		Ok(())
	}

	pub fn dispatch_event(&self, event: apm::Event) -> Result<()> {
		if !self.listeners_set.load(Ordering::SeqCst) { return Ok(()); }
		for listener in self.listeners.read()?.iter() {
			listener(self, &event)
		}
		Ok(())
	}

	/// Stops all monitors and closes all pools. Pending selections fail.
	pub fn close(&self) -> Result<()> {
		tracing::debug!("closing client");
		self.topology.close(self)
	}

	pub(crate) fn next_request_id(&self) -> i32 {
		self.request_id.fetch_add(1, Ordering::SeqCst)
	}
}
