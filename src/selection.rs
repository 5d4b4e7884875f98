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
	crate::{*, topology::{ServerDescription, ServerType, TopologyDescription, TopologyType}},
	std::time::{Duration, SystemTime, UNIX_EPOCH},
	rand::seq::SliceRandom
};

/// What an operation needs from a server.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SelectionCriteria {
	Read(ReadPreference),
	Write
}

impl SelectionCriteria {
	pub fn is_write(&self) -> bool {
		matches!(self, Self::Write)
	}
}

impl From<ReadPreference> for SelectionCriteria {
	fn from(read_preference: ReadPreference) -> Self {
		Self::Read(read_preference)
	}
}

/// Picks a server for the criteria: filters the eligible servers, applies the
/// latency window and chooses one at random. `Ok(None)` means no server is
/// suitable in this snapshot.
///
/// see https://github.com/mongodb/specifications/blob/master/source/server-selection/server-selection.rst
pub fn select(
	topology:            &TopologyDescription,
	criteria:            &SelectionCriteria,
	local_threshold:     Duration,
	heartbeat_frequency: Duration,
	excluded:            &[ServerAddress]
) -> Result<Option<ServerAddress>> {
	if let Some(err) = &topology.compatibility_error {
		return Err(ErrorKind::IncompatibleServer(err.clone()).into());
	}

	let mut servers = suitable_servers(topology, criteria, heartbeat_frequency);
	servers.retain(|server| !excluded.contains(&server.address));

	Ok(in_latency_window(servers, local_threshold)
		.choose(&mut rand::thread_rng())
		.map(|server| server.address.clone()))
}

/// Servers eligible by topology type, role, staleness and tags.
pub fn suitable_servers<'a>(
	topology:            &'a TopologyDescription,
	criteria:            &SelectionCriteria,
	heartbeat_frequency: Duration
) -> Vec<&'a ServerDescription> {
	let by_type = move |types: &[ServerType]| topology.servers.values()
		.filter(|server| types.contains(&server.r#type))
		.collect::<Vec<_>>();

	let read_preference = match (topology.r#type, criteria) {
		(TopologyType::Unknown, _)       => return Vec::new(),
		(TopologyType::Single, _)        => return topology.servers.values()
			.filter(|server| server.r#type != ServerType::Unknown)
			.collect(),
		(TopologyType::Sharded, _)       => return by_type(&[ServerType::Mongos]),
		(_, SelectionCriteria::Write)    => return by_type(&[ServerType::RSPrimary]),
		(_, SelectionCriteria::Read(rp)) => rp
	};

	let primaries = || by_type(&[ServerType::RSPrimary]);
	let secondaries = || filter_tags(
		filter_stale(topology, by_type(&[ServerType::RSSecondary]), read_preference, heartbeat_frequency),
		read_preference);

	match read_preference.mode {
		ReadPreferenceMode::Primary            => primaries(),
		ReadPreferenceMode::PrimaryPreferred   => Some(primaries())
			.filter(|servers| !servers.is_empty())
			.unwrap_or_else(secondaries),
		ReadPreferenceMode::Secondary          => secondaries(),
		ReadPreferenceMode::SecondaryPreferred => Some(secondaries())
			.filter(|servers| !servers.is_empty())
			.unwrap_or_else(primaries),
		ReadPreferenceMode::Nearest            => filter_tags(filter_stale(
			topology, by_type(&[ServerType::RSPrimary, ServerType::RSSecondary]),
			read_preference, heartbeat_frequency), read_preference)
	}
}

/// Keeps the servers whose round trip time is within `local_threshold` of
/// the fastest one.
pub fn in_latency_window(servers: Vec<&ServerDescription>, local_threshold: Duration) -> Vec<&ServerDescription> {
	let fastest = match servers.iter().map(|server| server.rtt.unwrap_or_default()).min() {
		Some(fastest) => fastest,
		None => return servers
	};

	servers.into_iter()
		.filter(|server| server.rtt.unwrap_or_default() <= fastest + local_threshold)
		.collect()
}

fn millis(t: Option<SystemTime>) -> Option<i128> {
	t.and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map(|d| d.as_millis() as i128)
}

/// Estimated replication lag of a secondary. Without a primary the most
/// recently written secondary serves as reference.
fn staleness(
	topology:            &TopologyDescription,
	server:              &ServerDescription,
	heartbeat_frequency: Duration
) -> Option<Duration> {
	let heartbeat = heartbeat_frequency.as_millis() as i128;
	let last_write = millis(server.last_write_date)?;

	let staleness = match topology.primary() {
		Some(primary) => (millis(server.last_update_time)? - last_write)
			- (millis(primary.last_update_time)? - millis(primary.last_write_date)?)
			+ heartbeat,
		None => topology.servers.values()
			.filter(|s| s.r#type == ServerType::RSSecondary)
			.filter_map(|s| millis(s.last_write_date))
			.max()?
			- last_write
			+ heartbeat
	};

	Some(Duration::from_millis(staleness.max(0) as u64))
}

fn filter_stale<'a>(
	topology:            &TopologyDescription,
	servers:             Vec<&'a ServerDescription>,
	read_preference:     &ReadPreference,
	heartbeat_frequency: Duration
) -> Vec<&'a ServerDescription> {
	let max_staleness = match read_preference.max_staleness {
		Some(max_staleness) => max_staleness,
		None => return servers
	};

	servers.into_iter()
		.filter(|server| server.r#type != ServerType::RSSecondary
			|| staleness(topology, server, heartbeat_frequency)
				.map_or(true, |staleness| staleness <= max_staleness))
		.collect()
}

/// Applies the first tag set that matches at least one server. An empty tag
/// set matches every server.
fn filter_tags<'a>(servers: Vec<&'a ServerDescription>, read_preference: &ReadPreference) -> Vec<&'a ServerDescription> {
	if read_preference.tag_sets.is_empty() {
		return servers;
	}

	for tags in &read_preference.tag_sets {
		let matching = servers.iter()
			.copied()
			.filter(|server| tags.iter().all(|(k, v)| server.tags.get(k) == Some(v)))
			.collect::<Vec<_>>();

		if !matching.is_empty() {
			return matching;
		}
	}

	Vec::new()
}

#[cfg(test)]
mod tests {
	use {super::*, proptest::prelude::*};

	const THRESHOLD: Duration = Duration::from_millis(15);
	const HEARTBEAT: Duration = Duration::from_secs(10);

	fn server(address: &str, r#type: ServerType, rtt_ms: u64) -> ServerDescription {
		let mut server = ServerDescription::unknown(address.parse().unwrap(), None);
		server.r#type = r#type;
		server.rtt = Some(Duration::from_millis(rtt_ms));
		server.max_wire_version = 13;
		server
	}

	fn topology(r#type: TopologyType, servers: Vec<ServerDescription>) -> TopologyDescription {
		TopologyDescription {
			r#type,
			servers: servers.into_iter().map(|s| (s.address.clone(), s)).collect(),
			..TopologyDescription::default()
		}
	}

	fn replica_set() -> TopologyDescription {
		topology(TopologyType::ReplicaSetWithPrimary, vec![
			server("p:1", ServerType::RSPrimary, 5),
			server("s:1", ServerType::RSSecondary, 5),
			server("s:2", ServerType::RSSecondary, 5),
			server("x:1", ServerType::RSArbiter, 1)
		])
	}

	fn pick(topology: &TopologyDescription, criteria: SelectionCriteria) -> Option<String> {
		select(topology, &criteria, THRESHOLD, HEARTBEAT, &[]).unwrap().map(|a| a.to_string())
	}

	fn read(mode: ReadPreferenceMode) -> SelectionCriteria {
		SelectionCriteria::Read(ReadPreference::new(mode))
	}

	#[test]
	fn modes() {
		let rs = replica_set();
		assert_eq!(pick(&rs, read(ReadPreferenceMode::Primary)).as_deref(), Some("p:1"));
		assert_eq!(pick(&rs, SelectionCriteria::Write).as_deref(), Some("p:1"));
		assert_eq!(pick(&rs, read(ReadPreferenceMode::PrimaryPreferred)).as_deref(), Some("p:1"));
		assert!(pick(&rs, read(ReadPreferenceMode::Secondary)).unwrap().starts_with("s:"));
		assert!(pick(&rs, read(ReadPreferenceMode::SecondaryPreferred)).unwrap().starts_with("s:"));
		assert_ne!(pick(&rs, read(ReadPreferenceMode::Nearest)).as_deref(), Some("x:1"));
	}

	#[test]
	fn fallbacks() {
		let no_primary = topology(TopologyType::ReplicaSetNoPrimary, vec![
			server("s:1", ServerType::RSSecondary, 5)
		]);
		assert_eq!(pick(&no_primary, read(ReadPreferenceMode::Primary)), None);
		assert_eq!(pick(&no_primary, SelectionCriteria::Write), None);
		assert_eq!(pick(&no_primary, read(ReadPreferenceMode::PrimaryPreferred)).as_deref(), Some("s:1"));

		let no_secondary = topology(TopologyType::ReplicaSetWithPrimary, vec![
			server("p:1", ServerType::RSPrimary, 5)
		]);
		assert_eq!(pick(&no_secondary, read(ReadPreferenceMode::Secondary)), None);
		assert_eq!(pick(&no_secondary, read(ReadPreferenceMode::SecondaryPreferred)).as_deref(), Some("p:1"));
	}

	#[test]
	fn single_and_sharded() {
		let single = topology(TopologyType::Single, vec![server("a:1", ServerType::Standalone, 100)]);
		assert_eq!(pick(&single, SelectionCriteria::Write).as_deref(), Some("a:1"));
		assert_eq!(pick(&single, read(ReadPreferenceMode::Secondary)).as_deref(), Some("a:1"));

		let unknown = topology(TopologyType::Single, vec![server("a:1", ServerType::Unknown, 1)]);
		assert_eq!(pick(&unknown, SelectionCriteria::Write), None);

		let sharded = topology(TopologyType::Sharded, vec![
			server("m:1", ServerType::Mongos, 5),
			server("u:1", ServerType::Unknown, 1)
		]);
		assert_eq!(pick(&sharded, read(ReadPreferenceMode::Secondary)).as_deref(), Some("m:1"));
		assert_eq!(pick(&sharded, SelectionCriteria::Write).as_deref(), Some("m:1"));

		assert_eq!(pick(&topology(TopologyType::Unknown, vec![server("a:1", ServerType::Standalone, 1)]),
			SelectionCriteria::Write), None);
	}

	#[test]
	fn exclusion() {
		let sharded = topology(TopologyType::Sharded, vec![
			server("m:1", ServerType::Mongos, 5),
			server("m:2", ServerType::Mongos, 5)
		]);
		for _ in 0..10 {
			assert_eq!(select(&sharded, &SelectionCriteria::Write, THRESHOLD, HEARTBEAT,
				&["m:1".parse().unwrap()]).unwrap().map(|a| a.to_string()).as_deref(), Some("m:2"));
		}
	}

	#[test]
	fn tags() {
		let mut rs = replica_set();
		for (address, dc) in &[("s:1", "ny"), ("s:2", "sf")] {
			rs.servers.get_mut(&address.parse().unwrap()).unwrap()
				.tags.insert("dc".to_string(), dc.to_string());
		}

		let criteria = |sets: &[&[(&str, &str)]]| SelectionCriteria::Read(sets.iter()
			.fold(ReadPreference::new(ReadPreferenceMode::Secondary), |rp, tags| rp.with_tags(tags)));

		assert_eq!(pick(&rs, criteria(&[&[("dc", "sf")]])).as_deref(), Some("s:2"));
		assert_eq!(pick(&rs, criteria(&[&[("dc", "la")], &[("dc", "ny")]])).as_deref(), Some("s:1"));
		assert_eq!(pick(&rs, criteria(&[&[("dc", "la")]])), None);
		assert!(pick(&rs, criteria(&[&[("dc", "la")], &[]])).is_some());
	}

	#[test]
	fn max_staleness() {
		let now = SystemTime::now();
		let mut rs = replica_set();
		for (address, lag) in &[("p:1", 0), ("s:1", 5), ("s:2", 200)] {
			let server = rs.servers.get_mut(&address.parse().unwrap()).unwrap();
			server.last_update_time = Some(now);
			server.last_write_date = Some(now - Duration::from_secs(*lag));
		}

		let criteria = SelectionCriteria::Read(ReadPreference::new(ReadPreferenceMode::Secondary)
			.with_max_staleness(Duration::from_secs(90)));
		for _ in 0..10 {
			assert_eq!(pick(&rs, criteria.clone()).as_deref(), Some("s:1"));
		}

		// without a primary the freshest secondary is the reference
		rs.servers.remove(&"p:1".parse().unwrap());
		rs.r#type = TopologyType::ReplicaSetNoPrimary;
		assert_eq!(pick(&rs, criteria).as_deref(), Some("s:1"));
	}

	#[test]
	fn incompatible() {
		let mut rs = replica_set();
		rs.compatibility_error = Some(crate::topology::CompatibilityError::WireVersionTooOld("p:1".parse().unwrap()));
		assert!(matches!(select(&rs, &SelectionCriteria::Write, THRESHOLD, HEARTBEAT, &[]).unwrap_err().kind,
			ErrorKind::IncompatibleServer(_)));
	}

	proptest! {
		#[test]
		fn within_latency_window(rtts in proptest::collection::vec(0..100u64, 1..8), threshold in 0..30u64) {
			let servers = rtts.iter().enumerate()
				.map(|(i, rtt)| server(&format!("m:{}", i + 1), ServerType::Mongos, *rtt))
				.collect::<Vec<_>>();
			let fastest = *rtts.iter().min().unwrap();
			let sharded = topology(TopologyType::Sharded, servers);

			let selected = select(&sharded, &SelectionCriteria::Write,
				Duration::from_millis(threshold), HEARTBEAT, &[]).unwrap().unwrap();
			let rtt = sharded.servers[&selected].rtt.unwrap();
			prop_assert!(rtt <= Duration::from_millis(fastest + threshold));
		}
	}
}
