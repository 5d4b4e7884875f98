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
		*,
		wire::{self, Stream, Compressor, HelloRequest, HelloReply, InvalidReplyError, SUPPORTED_COMPRESSORS},
		apm::{Event, ConnectionClosedReason, ConnectionCheckOutFailedReason},
		topology::Server
	},
	std::{sync::{Mutex, Condvar}, time::{Duration, Instant}, collections::VecDeque, io}
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
	Idle,
	InUse,
	Closed
}

/// One authenticated stream to a server.
#[derive(Debug)]
pub struct Connection {
	pub id:         usize,
	pub address:    ServerAddress,
	/// Pool generation at creation time.
	pub generation: u64,
	pub state:      ConnectionState,
	/// Request id of the message awaiting its reply.
	pub in_flight:  Option<i32>,
	compressor:     Option<Compressor>,
	stream:         Stream,
	has_error:      bool,
	last_used:      Instant
}

impl Connection {
	pub fn new(id: usize, address: ServerAddress, generation: u64, stream: Stream) -> Self {
		Self {
			id,
			address,
			generation,
			state:      ConnectionState::Idle,
			in_flight:  None,
			compressor: None,
			stream,
			has_error:  false,
			last_used:  Instant::now()
		}
	}

	/// Opens a stream, performs the handshake, negotiates compression and
	/// authenticates. The whole sequence is bounded by the connect timeout.
	pub fn establish(
		client:     &Client,
		address:    &ServerAddress,
		id:         usize,
		generation: u64,
		deadline:   &Deadline
	) -> Result<(Self, HelloReply)> {
		let deadline = Deadline::after(Some(deadline.bound(client.options.connect_timeout)));
		#[allow(unused_mut)]
		let (mut conn, reply) = Self::open(client, address, id, generation, &deadline)?;

		#[cfg(feature = "auth")]
		crate::auth::authenticate(&mut conn, client, &reply, &deadline)?;

		Ok((conn, reply))
	}

	/// Opens a stream and performs the handshake without authenticating, as
	/// done for monitoring connections.
	pub fn open(
		client:     &Client,
		address:    &ServerAddress,
		id:         usize,
		generation: u64,
		deadline:   &Deadline
	) -> Result<(Self, HelloReply)> {
		let timeout = deadline.bound(client.options.connect_timeout);
		if timeout == Duration::default() {
			return Err(ErrorKind::DeadlineExpired.into());
		}

		let deadline = Deadline::after(Some(timeout));
		let stream = client.establisher.connect(address, &client.options, timeout)?;
		let mut conn = Self::new(id, address.clone(), generation, stream);

		let reply = conn.hello(client, &HelloRequest::handshake(&client.options), &deadline)?;

		// first of our compressors the server also supports
		conn.compressor = match (&client.options.compressors, &reply.compression) {
			(Some(ours), Some(theirs)) => ours.iter()
				.find(|c| theirs.contains(c) && SUPPORTED_COMPRESSORS.contains(c))
				.copied(),
			_ => None
		};

		Ok((conn, reply))
	}

	pub fn hello(&mut self, client: &Client, request: &HelloRequest, deadline: &Deadline) -> Result<HelloReply> {
		let payload = client.codec.encode_hello(request)?;
		let reply = client.codec.decode_hello(&self.command(client, &payload, deadline)?)?;
		reply.check()?;
		Ok(reply)
	}

	/// Sends a payload under a fresh request id and returns the reply payload.
	pub fn command(&mut self, client: &Client, payload: &[u8], deadline: &Deadline) -> Result<Vec<u8>> {
		self.round_trip(client.next_request_id(), payload, deadline.bound(client.options.io_timeout()))
	}

	/// Writes one message and reads its reply. Any failure leaves the stream in
	/// an unknown state, so the connection is flagged and never reused.
	pub fn round_trip(&mut self, request_id: i32, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
		if self.state == ConnectionState::Closed {
			return Err(ErrorKind::ConnectionClosed.into());
		}

		// nothing has been written, the stream is still usable
		if timeout == Duration::default() {
			return Err(ErrorKind::DeadlineExpired.into());
		}

		match self.exchange(request_id, payload, timeout) {
			Ok(reply) => {
				self.in_flight = None;
				self.last_used = Instant::now();
				Ok(reply)
			}
			Err(e) => {
				self.has_error = true;
				Err(closed_by_peer(e))
			}
		}
	}

	fn exchange(&mut self, request_id: i32, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
		self.stream.set_timeout(Some(timeout))?;
		self.in_flight = Some(request_id);
		wire::write_message(&mut self.stream, request_id, 0, self.compressor, payload)?;
		let (header, reply) = wire::read_message(&mut self.stream)?;

		if header.response_to != request_id {
			return Err(InvalidReplyError::ResponseTo.into());
		}

		Ok(reply)
	}

	pub fn compressor(&self) -> Option<Compressor> {
		self.compressor
	}

	pub fn has_error(&self) -> bool {
		self.has_error
	}

	fn is_idle_expired(&self, max_idle_time: Option<Duration>) -> bool {
		max_idle_time.map_or(false, |max| self.last_used.elapsed() > max)
	}

	pub fn close(&mut self) {
		self.state = ConnectionState::Closed;
		self.stream.shutdown().unwrap_or(());
		self.stream = Stream::Empty;
	}

	/// Moves the connection out, leaving a closed shell behind.
	fn take(&mut self) -> Self {
		let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
		Self {
			id:         self.id,
			address:    self.address.clone(),
			generation: self.generation,
			state,
			in_flight:  self.in_flight.take(),
			compressor: self.compressor,
			stream:     std::mem::replace(&mut self.stream, Stream::Empty),
			has_error:  self.has_error,
			last_used:  self.last_used
		}
	}
}

fn closed_by_peer(err: Error) -> Error {
	let closed = matches!(&err.kind, ErrorKind::Network(e) if matches!(e.kind(),
		io::ErrorKind::UnexpectedEof
		| io::ErrorKind::ConnectionReset
		| io::ErrorKind::ConnectionAborted
		| io::ErrorKind::BrokenPipe));

	if closed {
		Error::new(ErrorKind::ConnectionClosed, err.address)
	} else {
		err
	}
}

/// The connection pool of one server.
///
/// see https://github.com/mongodb/specifications/blob/master/source/connection-monitoring-and-pooling/connection-monitoring-and-pooling.rst
#[derive(Debug)]
pub struct Pool {
	address:   ServerAddress,
	options:   ConnectionPoolOptions,
	state:     Mutex<PoolState>,
	available: Condvar
}

#[derive(Debug)]
struct PoolState {
	generation:  u64,
	/// most recently checked in last
	idle:        Vec<Connection>,
	/// idle, checked out and pending connections
	total:       usize,
	next_id:     usize,
	closed:      bool,
	next_ticket: u64,
	wait_queue:  VecDeque<u64>
}

enum Acquired {
	Idle(Connection),
	Create(usize, u64)
}

impl Pool {
	pub fn new(address: ServerAddress, options: ConnectionPoolOptions) -> Self {
		Self {
			address,
			options,
			state:     Mutex::new(PoolState {
				generation:  0,
				idle:        Vec::with_capacity(options.min_pool_size),
				total:       0,
				next_id:     1,
				closed:      false,
				next_ticket: 0,
				wait_queue:  VecDeque::new()
			}),
			available: Condvar::new()
		}
	}

	pub fn address(&self) -> &ServerAddress {
		&self.address
	}

	pub fn generation(&self) -> Result<u64> {
		Ok(self.state.lock()?.generation)
	}

	/// Number of connections owned by the pool, idle or checked out.
	pub fn total_connections(&self) -> Result<usize> {
		Ok(self.state.lock()?.total)
	}

	pub fn idle_connections(&self) -> Result<usize> {
		Ok(self.state.lock()?.idle.len())
	}

	/// Checks out a connection, reusing the most recently returned idle one or
	/// establishing a new one while below `max_pool_size`. Waiters are served
	/// in arrival order.
	pub fn checkout(&self, client: &Client, server: &Server, deadline: &Deadline) -> Result<PooledConnection> {
		client.dispatch_event(Event::ConnectionCheckOutStarted { address: &self.address })?;

		let wait_deadline = Deadline::after(Some(deadline.bound(client.options.wait_queue_timeout())));
		let started = Instant::now();
		let mut discarded = Vec::new();

		let mut state = self.state.lock()?;
		let ticket = state.next_ticket;
		state.next_ticket += 1;
		state.wait_queue.push_back(ticket);

		let acquired = loop {
			if state.closed {
				break Err(Error::from(ErrorKind::PoolClosed));
			}

			if state.wait_queue.front() == Some(&ticket) {
				let mut reused = None;
				while let Some(conn) = state.idle.pop() {
					if conn.generation != state.generation {
						state.total -= 1;
						discarded.push((conn, ConnectionClosedReason::Stale));
					} else if conn.is_idle_expired(self.options.max_idle_time) {
						state.total -= 1;
						discarded.push((conn, ConnectionClosedReason::Idle));
					} else {
						reused = Some(conn);
						break;
					}
				}

				if let Some(conn) = reused {
					break Ok(Acquired::Idle(conn));
				}

				if self.options.max_pool_size == 0 || state.total < self.options.max_pool_size {
					state.total += 1;
					let id = state.next_id;
					state.next_id += 1;
					break Ok(Acquired::Create(id, state.generation));
				}
			}

			let remaining = wait_deadline.bound(Duration::MAX);
			if remaining == Duration::default() {
				break Err(ErrorKind::PoolExhausted(started.elapsed()).into());
			}
			state = self.available.wait_timeout(state, remaining)?.0;
		};

		state.wait_queue.retain(|t| *t != ticket);
		drop(state);
		self.available.notify_all();

		for (conn, reason) in discarded {
			self.discard(client, conn, reason);
		}

		let mut conn = match acquired {
			Ok(Acquired::Idle(conn)) => conn,
			Ok(Acquired::Create(id, generation)) => {
				client.dispatch_event(Event::ConnectionCreated { address: &self.address, connection_id: id })?;
				match Connection::establish(client, &self.address, id, generation, deadline) {
					Ok((conn, _)) => {
						client.dispatch_event(Event::ConnectionReady { address: &self.address, connection_id: id })?;
						conn
					}
					Err(e) => {
						self.release_slot()?;
						client.dispatch_event(Event::ConnectionCheckOutFailed {
							address: &self.address,
							reason:  ConnectionCheckOutFailedReason::Error
						})?;
						return Err(e.with_address(&self.address));
					}
				}
			}
			Err(e) => {
				let reason = match e.kind {
					ErrorKind::PoolClosed => ConnectionCheckOutFailedReason::PoolClosed,
					_ => ConnectionCheckOutFailedReason::Timeout
				};
				tracing::debug!(address = %self.address, error = %e, "connection checkout failed");
				client.dispatch_event(Event::ConnectionCheckOutFailed { address: &self.address, reason })?;
				return Err(e.with_address(&self.address));
			}
		};

		conn.state = ConnectionState::InUse;
		client.dispatch_event(Event::ConnectionCheckedOut { address: &self.address, connection_id: conn.id })?;

		Ok(PooledConnection {
			conn,
			server: server.clone(),
			client: client.clone()
		})
	}

	/// Returns a connection. Connections that are stale, errored or returned
	/// after the pool was closed are closed instead of kept.
	pub fn checkin(&self, client: &Client, mut conn: Connection) -> Result<()> {
		client.dispatch_event(Event::ConnectionCheckedIn { address: &self.address, connection_id: conn.id })?;

		let mut state = self.state.lock()?;
		let reason = if state.closed {
			Some(ConnectionClosedReason::PoolClosed)
		} else if conn.generation != state.generation {
			Some(ConnectionClosedReason::Stale)
		} else if conn.has_error || conn.state == ConnectionState::Closed {
			Some(ConnectionClosedReason::Error)
		} else {
			None
		};

		match reason {
			None => {
				conn.state = ConnectionState::Idle;
				conn.last_used = Instant::now();
				state.idle.push(conn);
				drop(state);
			}
			Some(reason) => {
				state.total = state.total.saturating_sub(1);
				drop(state);
				self.discard(client, conn, reason);
			}
		}

		self.available.notify_all();
		Ok(())
	}

	/// Clears the pool: bumps the generation and closes all idle connections.
	/// Checked out connections are closed when they are returned.
	pub fn invalidate(&self, client: &Client) -> Result<u64> {
		let mut state = self.state.lock()?;
		if state.closed {
			return Ok(state.generation);
		}

		state.generation += 1;
		let generation = state.generation;
		let idle = std::mem::take(&mut state.idle);
		state.total -= idle.len();
		drop(state);
		self.available.notify_all();

		tracing::debug!(address = %self.address, generation, "connection pool cleared");

		for conn in idle {
			self.discard(client, conn, ConnectionClosedReason::Stale);
		}

		client.dispatch_event(Event::PoolCleared { address: &self.address, generation })?;
		Ok(generation)
	}

	/// Establishes idle connections until `min_pool_size` is reached.
	pub fn ensure_min(&self, client: &Client) -> Result<()> {
		loop {
			let (id, generation) = {
				let mut state = self.state.lock()?;
				if state.closed || state.total >= self.options.min_pool_size {
					return Ok(());
				}

				state.total += 1;
				let id = state.next_id;
				state.next_id += 1;
				(id, state.generation)
			};

			client.dispatch_event(Event::ConnectionCreated { address: &self.address, connection_id: id })?;

			let (mut conn, _) = match Connection::establish(client, &self.address, id, generation, &Deadline::none()) {
				Ok(conn) => conn,
				Err(e) => {
					self.release_slot()?;
					return Err(e.with_address(&self.address));
				}
			};

			client.dispatch_event(Event::ConnectionReady { address: &self.address, connection_id: id })?;

			let mut state = self.state.lock()?;
			if state.closed || state.generation != generation {
				state.total -= 1;
				drop(state);
				self.discard(client, conn, ConnectionClosedReason::Stale);
				return Ok(());
			}

			conn.last_used = Instant::now();
			state.idle.push(conn);
			drop(state);
			self.available.notify_all();
		}
	}

	/// Closes all idle connections and fails pending and future checkouts.
	pub fn close(&self, client: &Client) -> Result<()> {
		let mut state = self.state.lock()?;
		if state.closed {
			return Ok(());
		}

		state.closed = true;
		let idle = std::mem::take(&mut state.idle);
		state.total -= idle.len();
		drop(state);
		self.available.notify_all();

		for conn in idle {
			self.discard(client, conn, ConnectionClosedReason::PoolClosed);
		}

		client.dispatch_event(Event::PoolClosed { address: &self.address })
	}

	fn release_slot(&self) -> Result<()> {
		let mut state = self.state.lock()?;
		state.total = state.total.saturating_sub(1);
		drop(state);
		self.available.notify_all();
		Ok(())
	}

	fn discard(&self, client: &Client, mut conn: Connection, reason: ConnectionClosedReason) {
		tracing::trace!(address = %self.address, connection_id = conn.id, ?reason, "closing connection");
		conn.close();
		client.dispatch_event(Event::ConnectionClosed {
			address:       &self.address,
			connection_id: conn.id,
			reason
		}).unwrap_or(());
	}
}

/// A checked out connection, returned to its pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
	conn:   Connection,
	server: Server,
	client: Client
}

impl PooledConnection {
	pub fn server(&self) -> &Server {
		&self.server
	}
}

impl Drop for PooledConnection {
	fn drop(&mut self) {
		let conn = self.conn.take();
		if let Err(e) = self.server.pool.checkin(&self.client, conn) {
			tracing::warn!(address = %self.server.address, error = %e, "failed to check in connection");
		}
	}
}

impl std::ops::Deref for PooledConnection {
	type Target = Connection;

	fn deref(&self) -> &Self::Target {
		&self.conn
	}
}

impl std::ops::DerefMut for PooledConnection {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.conn
	}
}
