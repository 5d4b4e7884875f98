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
	crate::{*, selection::SelectionCriteria, topology::{Server, ServerDescription, ServerType, TopologyType}, apm::Event},
	std::{sync::atomic::Ordering, time::{Duration, Instant}}
};

/// Which retry policy an operation falls under.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Retryability {
	Read,
	Write,
	None
}

/// A request the executor can send to a server. Implementations own the
/// document format: they encode the request and decode the reply, turning
/// command failures into `ErrorKind::Application`.
pub trait Operation {
	type Output;

	fn name(&self) -> &str;

	fn selection_criteria(&self) -> SelectionCriteria;

	fn retryability(&self) -> Retryability {
		Retryability::None
	}

	/// Overrides `ClientOptions::timeout` for this operation.
	fn timeout(&self) -> Option<Duration> {
		None
	}

	fn encode(&self, description: &ServerDescription) -> Result<Vec<u8>>;

	fn handle_response(&self, reply: &[u8], description: &ServerDescription) -> Result<Self::Output>;
}

impl Client {
	/// Selects a server and executes the operation on it, retrying once on a
	/// different server if the operation is retryable.
	///
	/// see https://github.com/mongodb/specifications/blob/master/source/retryable-reads/retryable-reads.rst,
	/// https://github.com/mongodb/specifications/blob/master/source/retryable-writes/retryable-writes.rst
	pub fn run<Op: Operation>(&self, op: &Op) -> Result<Op::Output> {
		let deadline = Deadline::after(op.timeout().or(self.options.timeout));
		let criteria = op.selection_criteria();
		let operation_id = self.operation_id.fetch_add(1, Ordering::SeqCst);

		let server = self.select_server_with(&criteria, &deadline, &[])?;
		let description = self.server_description(&server.address)?;

		let first = match self.attempt(&server, op, operation_id, &deadline) {
			Ok(output) => return Ok(output),
			Err(e) => e
		};

		if !self.is_retryable(op.retryability(), &first, &description)? {
			return Err(first);
		}

		tracing::debug!(operation = op.name(), address = %server.address, error = %first, "retrying operation");

		// waits for at most one heartbeat round for another server to show up
		let excluded = [server.address.clone()];
		let retry_deadline = Deadline::after(Some(deadline.bound(self.options.monitor_options.heartbeat_frequency)));
		match self.select_server_with(&criteria, &retry_deadline, &excluded) {
			Ok(server) => self.attempt(&server, op, operation_id, &deadline),
			Err(e) => {
				tracing::debug!(operation = op.name(), error = %e, "no server available for retry");
				let address = first.address.clone();
				let kind = match op.retryability() {
					Retryability::Write => ErrorKind::RetryableWriteError(Box::new(first)),
					_ => ErrorKind::RetryableReadError(Box::new(first))
				};
				Err(Error::new(kind, address))
			}
		}
	}

	/// Executes the operation on the given server without retrying.
	pub fn execute<Op: Operation>(&self, server: &Server, op: &Op) -> Result<Op::Output> {
		let deadline = Deadline::after(op.timeout().or(self.options.timeout));
		let operation_id = self.operation_id.fetch_add(1, Ordering::SeqCst);
		self.attempt(server, op, operation_id, &deadline)
	}

	fn attempt<Op: Operation>(
		&self,
		server:       &Server,
		op:           &Op,
		operation_id: usize,
		deadline:     &Deadline
	) -> Result<Op::Output> {
		let description = self.server_description(&server.address)?;

		let mut conn = match server.pool.checkout(self, server, deadline) {
			Ok(conn) => conn,
			Err(e) => {
				self.handle_error(server, &e, None);
				return Err(e);
			}
		};

		let payload = op.encode(&description).map_err(|e| e.with_address(&server.address))?;
		let request_id = self.next_request_id();

		self.dispatch_event(Event::CommandStarted {
			command_name:  op.name(),
			address:       &server.address,
			request_id,
			operation_id,
			connection_id: conn.id
		})?;

		let started = Instant::now();
		let result = conn.round_trip(request_id, &payload, deadline.bound(self.options.io_timeout()))
			.and_then(|reply| op.handle_response(&reply, &description))
			.map_err(|e| e.with_address(&server.address));
		let duration = started.elapsed();

		match &result {
			Ok(_) => self.dispatch_event(Event::CommandSucceeded {
				duration,
				command_name:  op.name(),
				address:       &server.address,
				request_id,
				operation_id,
				connection_id: conn.id
			})?,
			Err(e) => {
				self.dispatch_event(Event::CommandFailed {
					duration,
					failure:       e,
					command_name:  op.name(),
					address:       &server.address,
					request_id,
					operation_id,
					connection_id: conn.id
				})?;

				let generation = conn.generation;
				drop(conn);
				self.handle_error(server, e, Some(generation));
			}
		}

		result
	}

	/// Reacts to a failed attempt: network errors clear the pool, network and
	/// state change errors mark the server Unknown and trigger a check.
	fn handle_error(&self, server: &Server, err: &Error, generation: Option<u64>) {
		let network = err.is_network();
		if !network && !err.is_state_change() {
			return;
		}

		if network {
			match (generation, server.pool.generation()) {
				// the pool has been cleared since the connection was created
				(Some(generation), Ok(current)) if generation != current => return,
				_ => ()
			}

			if let Err(e) = server.pool.invalidate(self) {
				tracing::warn!(address = %server.address, error = %e, "failed to clear connection pool");
			}
		}

		if let Err(e) = self.topology.mark_unknown(self, &server.address, err) {
			tracing::warn!(address = %server.address, error = %e, "failed to update topology");
		}

		server.request_check();
	}

	fn is_retryable(&self, retryability: Retryability, err: &Error, description: &ServerDescription) -> Result<bool> {
		if !err.is_retryable() {
			return Ok(false);
		}

		Ok(match retryability {
			Retryability::None => false,
			Retryability::Read => self.options.retry_reads,
			Retryability::Write => self.options.retry_writes
				&& self.topology.description()?.r#type != TopologyType::Single
				&& description.r#type != ServerType::Standalone
				&& description.logical_session_timeout_minutes.is_some()
		})
	}

	/// The current description of a server, Unknown if it is no longer a member.
	fn server_description(&self, address: &ServerAddress) -> Result<ServerDescription> {
		Ok(self.topology.description()?.servers.get(address).cloned()
			.unwrap_or_else(|| ServerDescription::unknown(address.clone(), None)))
	}
}
