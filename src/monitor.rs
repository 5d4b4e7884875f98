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
	crate::{*, pool::Connection, wire::{HelloRequest, HelloReply}, apm::Event, topology::ServerDescription},
	std::{sync::{Arc, Weak, Mutex, Condvar}, time::{Duration, Instant}}
};

/// Weight of the newest sample in the round trip time average.
const RTT_ALPHA: f64 = 0.2;

/// Handle to the thread that periodically checks one server.
///
/// see https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-monitoring.rst
#[derive(Debug)]
pub struct Monitor {
	shared: Arc<MonitorShared>
}

#[derive(Debug, Default)]
struct MonitorShared {
	state:   Mutex<MonitorState>,
	condvar: Condvar
}

#[derive(Debug, Default)]
struct MonitorState {
	stopped:         bool,
	check_requested: bool
}

impl Monitor {
	/// Spawns the monitor thread. It holds only a weak reference to the
	/// client and exits once the client is gone or the monitor is stopped.
	pub fn start(address: ServerAddress, client: &Client) -> Result<Self> {
		let shared = Arc::new(MonitorShared::default());
		let worker = Worker {
			address,
			client:   Arc::downgrade(&client.0),
			shared:   shared.clone(),
			options:  client.options.monitor_options,
			conn:     None,
			rtt:      None,
			failures: 0
		};

		std::thread::Builder::new()
			.name("server-monitor".to_string())
			.spawn(move || worker.run())?;

		Ok(Self { shared })
	}

	/// Requests an immediate check, still at most one per `min_heartbeat_frequency`.
	pub fn request_check(&self) {
		if let Ok(mut state) = self.shared.state.lock() {
			state.check_requested = true;
			self.shared.condvar.notify_all();
		}
	}

	pub fn stop(&self) {
		if let Ok(mut state) = self.shared.state.lock() {
			state.stopped = true;
			self.shared.condvar.notify_all();
		}
	}
}

impl Drop for Monitor {
	fn drop(&mut self) {
		self.stop();
	}
}

struct Worker {
	address:  ServerAddress,
	client:   Weak<ClientInner>,
	shared:   Arc<MonitorShared>,
	options:  ServerMonitorOptions,
	/// dedicated, unauthenticated connection
	conn:     Option<Connection>,
	rtt:      Option<Duration>,
	/// consecutive failed checks
	failures: u32
}

impl Worker {
	fn run(mut self) {
		let mut last_check = None;

		loop {
			if !self.wait(last_check) {
				break;
			}

			let client = match self.client.upgrade() {
				Some(client) => Client(client),
				None => break // client has been dropped, kill monitor
			};

			if client.topology.is_closed() {
				break;
			}

			last_check = Some(Instant::now());
			self.check(&client);
		}

		if let Some(mut conn) = self.conn.take() {
			conn.close();
		}

		tracing::trace!(address = %self.address, "server monitor stopped");
	}

	/// Sleeps until the next check is due, returns false once stopped.
	fn wait(&self, last_check: Option<Instant>) -> bool {
		let mut state = match self.shared.state.lock() {
			Ok(state) => state,
			Err(_) => return false
		};

		if let Some(last_check) = last_check {
			loop {
				if state.stopped {
					return false;
				}

				let now = Instant::now();
				let until = next_check(&self.options, self.failures, last_check, state.check_requested);
				if now >= until {
					break;
				}

				state = match self.shared.condvar.wait_timeout(state, until - now) {
					Ok((state, _)) => state,
					Err(_) => return false
				};
			}
		}

		state.check_requested = false;
		!state.stopped
	}

	fn check(&mut self, client: &Client) {
		client.dispatch_event(Event::ServerHeartbeatStarted { address: &self.address }).unwrap_or(());
		let started = Instant::now();

		match self.hello(client) {
			Ok(reply) => {
				let duration = started.elapsed();
				let rtt = average_rtt(self.rtt, duration);
				self.rtt = Some(rtt);
				self.failures = 0;

				client.dispatch_event(Event::ServerHeartbeatSucceeded {
					address: &self.address,
					duration,
					reply:   &reply
				}).unwrap_or(());

				let description = ServerDescription::from_reply(self.address.clone(), &reply, rtt);
				if let Err(e) = client.topology.update(client, description) {
					tracing::warn!(address = %self.address, error = %e, "failed to update topology");
				}

				if let Ok(Some(server)) = client.topology.server(&self.address) {
					if let Err(e) = server.pool.ensure_min(client) {
						tracing::debug!(address = %self.address, error = %e, "failed to populate connection pool");
					}
				}
			}
			Err(e) => {
				let e = e.with_address(&self.address);
				self.failures = self.failures.saturating_add(1);
				self.rtt = None;
				if let Some(mut conn) = self.conn.take() {
					conn.close();
				}

				client.dispatch_event(Event::ServerHeartbeatFailed {
					address:  &self.address,
					duration: started.elapsed(),
					failure:  &e
				}).unwrap_or(());

				tracing::debug!(address = %self.address, error = %e, failures = self.failures, "server check failed");

				if let Ok(Some(server)) = client.topology.server(&self.address) {
					if let Err(e) = server.pool.invalidate(client) {
						tracing::warn!(address = %self.address, error = %e, "failed to clear connection pool");
					}
				}

				if let Err(e) = client.topology.mark_unknown(client, &self.address, &e) {
					tracing::warn!(address = %self.address, error = %e, "failed to update topology");
				}
			}
		}
	}

	fn hello(&mut self, client: &Client) -> Result<HelloReply> {
		let deadline = Deadline::after(Some(client.options.connect_timeout));
		match &mut self.conn {
			Some(conn) => conn.hello(client, &HelloRequest::heartbeat(), &deadline),
			None => {
				let (conn, reply) = Connection::open(client, &self.address, 0, 0, &deadline)?;
				self.conn = Some(conn);
				Ok(reply)
			}
		}
	}
}

/// When the check after `last_check` is due. Failed checks are retried at
/// `min_heartbeat_frequency` up to `max_fast_retries` times in a row, and a
/// requested check never runs sooner than that either.
fn next_check(options: &ServerMonitorOptions, failures: u32, last_check: Instant, check_requested: bool) -> Instant {
	let interval = if check_requested || (failures > 0 && failures <= options.max_fast_retries) {
		options.min_heartbeat_frequency
	} else {
		options.heartbeat_frequency
	};
	last_check + interval.min(options.heartbeat_frequency)
}

/// Exponentially weighted moving average of the round trip time.
fn average_rtt(previous: Option<Duration>, sample: Duration) -> Duration {
	match previous {
		Some(previous) => previous.mul_f64(1.0 - RTT_ALPHA) + sample.mul_f64(RTT_ALPHA),
		None => sample
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rtt_average() {
		let first = average_rtt(None, Duration::from_millis(100));
		assert_eq!(first, Duration::from_millis(100));

		let second = average_rtt(Some(first), Duration::from_millis(200));
		assert!((second.as_secs_f64() - 0.12).abs() < 1e-6);

		let mut rtt = second;
		for _ in 0..100 {
			rtt = average_rtt(Some(rtt), Duration::from_millis(10));
		}
		assert!((rtt.as_secs_f64() - 0.01).abs() < 1e-4);
	}

	#[test]
	fn check_schedule() {
		let options = ServerMonitorOptions {
			heartbeat_frequency:     Duration::from_secs(10),
			min_heartbeat_frequency: Duration::from_millis(500),
			max_fast_retries:        3
		};
		let last = Instant::now();
		let fast = last + options.min_heartbeat_frequency;
		let slow = last + options.heartbeat_frequency;

		assert_eq!(next_check(&options, 0, last, false), slow);
		for failures in 1..=3 {
			assert_eq!(next_check(&options, failures, last, false), fast);
		}
		assert_eq!(next_check(&options, 4, last, false), slow);

		// requested checks wait out the minimum gap
		assert_eq!(next_check(&options, 0, last, true), fast);
		assert_eq!(next_check(&options, 7, last, true), fast);
	}
}
