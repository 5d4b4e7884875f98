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
		Client, Error, ServerAddress, ConnectionPoolOptions,
		wire::HelloReply,
		topology::{ServerDescription, TopologyDescription}
	},
	std::time::Duration
};

pub type EventListener = Box<dyn Fn(&Client, &Event) + Send + Sync>;

/// Command, SDAM and CMAP monitoring events.
///
/// see https://github.com/mongodb/specifications/blob/master/source/command-monitoring/command-monitoring.rst,
/// https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring-monitoring.rst,
/// https://github.com/mongodb/specifications/blob/master/source/connection-monitoring-and-pooling/connection-monitoring-and-pooling.rst
#[derive(Debug)]
pub enum Event<'a> {
	CommandStarted {
		command_name:  &'a str,
		address:       &'a ServerAddress,
		request_id:    i32,
		operation_id:  usize,
		connection_id: usize
	},
	CommandSucceeded {
		duration:      Duration,
		command_name:  &'a str,
		address:       &'a ServerAddress,
		request_id:    i32,
		operation_id:  usize,
		connection_id: usize
	},
	CommandFailed {
		duration:      Duration,
		failure:       &'a Error,
		command_name:  &'a str,
		address:       &'a ServerAddress,
		request_id:    i32,
		operation_id:  usize,
		connection_id: usize
	},
	ServerOpening {
		address: &'a ServerAddress
	},
	ServerClosed {
		address: &'a ServerAddress
	},
	ServerDescriptionChanged {
		address:  &'a ServerAddress,
		previous: &'a ServerDescription,
		new:      &'a ServerDescription
	},
	TopologyDescriptionChanged {
		previous: &'a TopologyDescription,
		new:      &'a TopologyDescription
	},
	ServerHeartbeatStarted {
		address: &'a ServerAddress
	},
	ServerHeartbeatSucceeded {
		address:  &'a ServerAddress,
		duration: Duration,
		reply:    &'a HelloReply
	},
	ServerHeartbeatFailed {
		address:  &'a ServerAddress,
		duration: Duration,
		failure:  &'a Error
	},
	PoolCreated {
		address: &'a ServerAddress,
		options: &'a ConnectionPoolOptions
	},
	PoolCleared {
		address:    &'a ServerAddress,
		generation: u64
	},
	PoolClosed {
		address: &'a ServerAddress
	},
	ConnectionCreated {
		address:       &'a ServerAddress,
		connection_id: usize
	},
	ConnectionReady {
		address:       &'a ServerAddress,
		connection_id: usize
	},
	ConnectionClosed {
		address:       &'a ServerAddress,
		connection_id: usize,
		reason:        ConnectionClosedReason,
	},
	ConnectionCheckOutStarted {
		address:       &'a ServerAddress,
	},
	ConnectionCheckOutFailed {
		address:       &'a ServerAddress,
		reason:        ConnectionCheckOutFailedReason
	},
	ConnectionCheckedOut {
		address:       &'a ServerAddress,
		connection_id: usize
	},
	ConnectionCheckedIn {
		address:       &'a ServerAddress,
		connection_id: usize
	},
}

impl Event<'_> {
	/// The server the event is about, `None` for topology wide events.
	pub fn address(&self) -> Option<&ServerAddress> {
		use self::Event::*;
		match self {
			TopologyDescriptionChanged { .. } => None,
			CommandStarted { address, .. }
			| CommandSucceeded { address, .. }
			| CommandFailed { address, .. }
			| ServerOpening { address }
			| ServerClosed { address }
			| ServerDescriptionChanged { address, .. }
			| ServerHeartbeatStarted { address }
			| ServerHeartbeatSucceeded { address, .. }
			| ServerHeartbeatFailed { address, .. }
			| PoolCreated { address, .. }
			| PoolCleared { address, .. }
			| PoolClosed { address }
			| ConnectionCreated { address, .. }
			| ConnectionReady { address, .. }
			| ConnectionClosed { address, .. }
			| ConnectionCheckOutStarted { address }
			| ConnectionCheckOutFailed { address, .. }
			| ConnectionCheckedOut { address, .. }
			| ConnectionCheckedIn { address, .. } => Some(*address)
		}
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionCheckOutFailedReason {
	PoolClosed,
	Timeout,
	Error
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionClosedReason {
	Stale,
	Idle,
	Error,
	PoolClosed
}
