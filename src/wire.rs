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
	crate::{common::*, oid::ObjectId},
	std::{io::{self, Read, Write}, net::{TcpStream, ToSocketAddrs}, collections::HashMap, time::Duration},
	serde::{Serialize, Deserialize}
};

pub const MIN_WIRE_VERSION: i32 = 6;
pub const MAX_WIRE_VERSION: i32 = 17;
pub const HEADER_LEN:       usize = 16;
/// Length of the OP_COMPRESSED prefix following the header:
/// original op code, uncompressed size and compressor id.
pub const COMPRESSION_LEN:  usize = 9;
pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

#[cfg(feature = "compress")]
pub const SUPPORTED_COMPRESSORS: &[Compressor] = &[Compressor::Zstd];
#[cfg(not(feature = "compress"))]
pub const SUPPORTED_COMPRESSORS: &[Compressor] = &[];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InvalidReplyError {
	/// The opcode was not MSG
	OpCode,
	/// Response_to did not match request_id
	ResponseTo,
	/// Message length out of bounds
	MessageLength,
	/// Invalid or unsupported compressor
	Compression,
	/// The reply signalled failure without an error code
	ErrorCodeNotPresent
}

#[repr(i32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpCode {
	Compressed   = 2012,
	Msg          = 2013
}

impl OpCode {
	fn from_i32(v: i32) -> io::Result<Self> {
		match v {
			2012 => Ok(Self::Compressed),
			2013 => Ok(Self::Msg),
			_    => Err(io::Error::new(io::ErrorKind::InvalidData, "invalid op code"))
		}
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
	pub message_length: u32,
	pub request_id:     i32,
	pub response_to:    i32,
	pub op_code:        OpCode
}

impl Header {
	fn read(reader: &mut impl Read) -> io::Result<Self> {
		let mut buf = [0u8; HEADER_LEN];
		reader.read_exact(&mut buf)?;
		Ok(Self {
			message_length: u32::from_le_bytes([buf[0], buf[1], buf[2],  buf[3]]),
			request_id:     i32::from_le_bytes([buf[4], buf[5], buf[6],  buf[7]]),
			response_to:    i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
			op_code:        OpCode::from_i32(i32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]))?
		})
	}

	fn copy_to_slice(self, slice: &mut [u8]) {
		slice[0..4].copy_from_slice(&self.message_length.to_le_bytes());
		slice[4..8].copy_from_slice(&self.request_id.to_le_bytes());
		slice[8..12].copy_from_slice(&self.response_to.to_le_bytes());
		slice[12..16].copy_from_slice(&(self.op_code as i32).to_le_bytes());
	}
}

struct CompressionData {
	original_opcode:   OpCode,
	uncompressed_size: u32,
	compressor_id:     Compressor
}

impl CompressionData {
	fn read(reader: &mut impl Read) -> io::Result<Self> {
		let mut buf = [0u8; COMPRESSION_LEN];
		reader.read_exact(&mut buf)?;
		Ok(Self {
			original_opcode:   OpCode::from_i32(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))?,
			uncompressed_size: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
			compressor_id:     match buf[8] {
				0 => Compressor::Noop,
				1 => Compressor::Snappy,
				2 => Compressor::Zlib,
				3 => Compressor::Zstd,
				_ => return Err(io::Error::new(
					io::ErrorKind::InvalidData, "invalid compressor"))
			}
		})
	}

	fn copy_to_slice(self, slice: &mut [u8]) {
		slice[0..4].copy_from_slice(&(self.original_opcode as i32).to_le_bytes());
		slice[4..8].copy_from_slice(&self.uncompressed_size.to_le_bytes());
		slice[8] = self.compressor_id as _;
	}
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Compressor {
	Noop   = 0,
	Snappy = 1,
	Zlib   = 2,
	Zstd   = 3
}

impl std::str::FromStr for Compressor {
	type Err = ();

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(match s {
			"noop"   => Self::Noop,
			"snappy" => Self::Snappy,
			"zlib"   => Self::Zlib,
			"zstd"   => Self::Zstd,
			_ => return Err(())
		})
	}
}

impl Serialize for Compressor {
	fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> where
		S: serde::Serializer {
		serializer.serialize_str(match self {
			Self::Noop   => "noop",
			Self::Snappy => "snappy",
			Self::Zlib   => "zlib",
			Self::Zstd   => "zstd"
		})
	}
}

impl<'de> Deserialize<'de> for Compressor {
	fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error> where
		D: serde::Deserializer<'de> {
		Ok(String::deserialize(deserializer)?.parse().unwrap_or(Self::Noop))
	}
}

/// Writes one framed message. With a compressor the payload is wrapped in an
/// OP_COMPRESSED envelope, otherwise it is sent as OP_MSG.
///
/// see https://github.com/mongodb/specifications/blob/master/source/compression/OP_COMPRESSED.rst
pub fn write_message(
	writer:      &mut impl Write,
	request_id:  i32,
	response_to: i32,
	compressor:  Option<Compressor>,
	payload:     &[u8]
) -> io::Result<()> {
	let mut buf;

	match compressor {
		None => {
			buf = vec![0u8; HEADER_LEN];
			buf.extend_from_slice(payload);
			Header {
				message_length: buf.len() as _,
				request_id,
				response_to,
				op_code:        OpCode::Msg
			}.copy_to_slice(&mut buf[..HEADER_LEN]);
		}
		Some(comp) => {
			buf = vec![0u8; HEADER_LEN + COMPRESSION_LEN];

			match comp {
				Compressor::Noop => buf.extend_from_slice(payload),
				#[cfg(feature = "compress")]
				Compressor::Zstd => {
					let mut encoder = zstd::Encoder::new(&mut buf, 0)?;
					encoder.write_all(payload)?;
					encoder.finish()?;
				}
				compressor => return Err(io::Error::new(io::ErrorKind::InvalidInput,
					format!("unsupported compressor: {:?}", compressor)))
			}

			Header {
				message_length: buf.len() as _,
				request_id,
				response_to,
				op_code:        OpCode::Compressed
			}.copy_to_slice(&mut buf[..HEADER_LEN]);

			CompressionData {
				original_opcode:   OpCode::Msg,
				uncompressed_size: payload.len() as _,
				compressor_id:     comp
			}.copy_to_slice(&mut buf[HEADER_LEN..HEADER_LEN + COMPRESSION_LEN]);
		}
	}

	writer.write_all(&buf)?;
	writer.flush()
}

/// Reads one framed message, unwrapping OP_COMPRESSED. The returned header
/// carries the original op code and the uncompressed length.
pub fn read_message(reader: &mut impl Read) -> Result<(Header, Vec<u8>)> {
	let mut header = Header::read(reader)?;
	let len = header.message_length as usize;

	if len < HEADER_LEN || len > MAX_MESSAGE_SIZE {
		return Err(InvalidReplyError::MessageLength.into());
	}

	let mut buf;

	if header.op_code == OpCode::Compressed {
		if len < HEADER_LEN + COMPRESSION_LEN {
			return Err(InvalidReplyError::MessageLength.into());
		}

		let data = CompressionData::read(reader)?;
		if data.uncompressed_size as usize > MAX_MESSAGE_SIZE {
			return Err(InvalidReplyError::MessageLength.into());
		}

		let mut compressed = vec![0u8; len - HEADER_LEN - COMPRESSION_LEN];
		reader.read_exact(&mut compressed)?;

		header.op_code = data.original_opcode;
		header.message_length = data.uncompressed_size;
		buf = vec![0u8; data.uncompressed_size as usize];

		match data.compressor_id {
			Compressor::Noop => {
				if compressed.len() != buf.len() {
					return Err(InvalidReplyError::Compression.into());
				}
				buf.copy_from_slice(&compressed);
			}
			#[cfg(feature = "compress")]
			Compressor::Zstd => zstd::stream::read::Decoder::new(compressed.as_slice())?
				.read_exact(buf.as_mut_slice())?,
			_ => return Err(InvalidReplyError::Compression.into())
		}
	} else {
		buf = vec![0u8; len - HEADER_LEN];
		reader.read_exact(buf.as_mut_slice())?;
	}

	if header.op_code != OpCode::Msg {
		return Err(InvalidReplyError::OpCode.into());
	}

	Ok((header, buf))
}

/// A byte stream other than the built-in TCP and TLS streams, e.g. an
/// in-memory transport.
pub trait Transport: Read + Write + Send {
	/// Applies a read and write timeout, `None` meaning blocking I/O.
	fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

	fn shutdown(&mut self) -> io::Result<()> {
		Ok(())
	}
}

#[allow(clippy::large_enum_variant)]
pub enum Stream {
	Tcp(TcpStream),
	#[cfg(feature = "tls")]
	Tls(Box<rustls::StreamOwned<rustls::ClientSession, TcpStream>>),
	Custom(Box<dyn Transport>),
	Empty
}

impl std::fmt::Debug for Stream {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		f.write_str(match self {
			Self::Tcp(..)    => "Stream::Tcp(...)",
			#[cfg(feature = "tls")]
			Self::Tls(..)    => "Stream::Tls(...)",
			Self::Custom(..) => "Stream::Custom(...)",
			Self::Empty      => "Stream::Empty"
		})
	}
}

impl Stream {
	pub fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
		// a zero duration is rejected by the socket api
		let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
		match self {
			Self::Tcp(stream) => {
				stream.set_read_timeout(timeout)?;
				stream.set_write_timeout(timeout)
			}
			#[cfg(feature = "tls")]
			Self::Tls(stream) => {
				stream.sock.set_read_timeout(timeout)?;
				stream.sock.set_write_timeout(timeout)
			}
			Self::Custom(stream) => stream.set_timeout(timeout),
			Self::Empty => Ok(())
		}
	}

	pub fn shutdown(&mut self) -> io::Result<()> {
		match self {
			Self::Tcp(stream) => stream.shutdown(std::net::Shutdown::Both),
			#[cfg(feature = "tls")]
			Self::Tls(stream) => stream.sock.shutdown(std::net::Shutdown::Both),
			Self::Custom(stream) => stream.shutdown(),
			Self::Empty => Ok(())
		}
	}
}

impl Read for Stream {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		match self {
			Self::Tcp(stream)    => stream.read(buf),
			#[cfg(feature = "tls")]
			Self::Tls(stream)    => stream.read(buf),
			Self::Custom(stream) => stream.read(buf),
			Self::Empty          => Err(io::ErrorKind::NotConnected.into())
		}
	}
}

impl Write for Stream {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self {
			Self::Tcp(stream)    => stream.write(buf),
			#[cfg(feature = "tls")]
			Self::Tls(stream)    => stream.write(buf),
			Self::Custom(stream) => stream.write(buf),
			Self::Empty          => Err(io::ErrorKind::NotConnected.into())
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self {
			Self::Tcp(stream)    => stream.flush(),
			#[cfg(feature = "tls")]
			Self::Tls(stream)    => stream.flush(),
			Self::Custom(stream) => stream.flush(),
			Self::Empty          => Ok(())
		}
	}
}

/// Opens transport streams to servers. Used for both pooled and monitoring
/// connections.
pub trait Establisher: Send + Sync {
	fn connect(&self, address: &ServerAddress, options: &ClientOptions, timeout: Duration) -> Result<Stream>;
}

/// Connects via TCP, wrapping the socket in a TLS session if the options
/// carry a TLS config.
#[derive(Debug, Default, Copy, Clone)]
pub struct TcpEstablisher;

impl Establisher for TcpEstablisher {
	fn connect(&self, address: &ServerAddress, options: &ClientOptions, timeout: Duration) -> Result<Stream> {
		let host = address.host.trim_start_matches('[').trim_end_matches(']');
		let timeout = timeout.max(Duration::from_millis(1));
		let mut last_err = None;
		let mut stream = None;

		for addr in (host, address.port).to_socket_addrs()? {
			match TcpStream::connect_timeout(&addr, timeout) {
				Ok(s) => {
					stream = Some(s);
					break;
				}
				Err(e) => last_err = Some(e)
			}
		}

		let stream = match stream {
			Some(stream) => stream,
			None => return Err(last_err.unwrap_or_else(|| io::Error::new(
				io::ErrorKind::NotFound, "address did not resolve")).into())
		};

		stream.set_nodelay(true)?;

		#[cfg(feature = "tls")]
		{
			if let Some(config) = &options.tls_config {
				let session = rustls::ClientSession::new(
					&config.0, webpki::DNSNameRef::try_from_ascii_str(host)?);
				return Ok(Stream::Tls(Box::new(rustls::StreamOwned::new(session, stream))));
			}
		}

		#[cfg(not(feature = "tls"))]
		let _ = options;

		Ok(Stream::Tcp(stream))
	}
}

/// Encodes and decodes the few commands the core issues itself. All other
/// payloads are produced and consumed by operations.
pub trait Codec: Send + Sync {
	fn encode_hello(&self, request: &HelloRequest) -> Result<Vec<u8>>;

	fn decode_hello(&self, payload: &[u8]) -> Result<HelloReply>;

	#[cfg(feature = "auth")]
	fn encode_sasl(&self, _command: &SaslCommand) -> Result<Vec<u8>> {
		Err(ErrorKind::Auth(crate::auth::AuthError::UnsupportedMechanism).into())
	}

	#[cfg(feature = "auth")]
	fn decode_sasl(&self, _payload: &[u8]) -> Result<SaslReply> {
		Err(ErrorKind::Auth(crate::auth::AuthError::UnsupportedMechanism).into())
	}
}

/// The hello (`isMaster`) command.
///
/// see https://github.com/mongodb/specifications/blob/master/source/mongodb-handshake/handshake.rst
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloRequest<'a> {
	pub is_master:            i32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub client:               Option<ClientMetadata<'a>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub compression:          Option<&'a [Compressor]>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sasl_supported_mechs: Option<String>,
	#[serde(rename = "$db")]
	pub db:                   &'a str
}

impl<'a> HelloRequest<'a> {
	/// The initial hello of a connection, carrying client metadata and the
	/// compressors to negotiate.
	pub fn handshake(options: &'a ClientOptions) -> Self {
		Self {
			is_master:            1,
			client:               Some(ClientMetadata {
				application: options.appname.as_ref().map(|s| ClientMetadataApplication {
					name: s.as_str()
				}),
				..ClientMetadata::default()
			}),
			compression:          options.compressors.as_deref(),
			sasl_supported_mechs: options.credential.username.as_ref().map(|user| format!("{}.{}",
				options.credential.source.as_deref().unwrap_or("admin"), user)),
			db:                   "admin"
		}
	}

	/// A heartbeat on an established monitoring connection.
	pub fn heartbeat() -> Self {
		Self {
			is_master:            1,
			client:               None,
			compression:          None,
			sasl_supported_mechs: None,
			db:                   "admin"
		}
	}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata<'a> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub application: Option<ClientMetadataApplication<'a>>,
	pub driver:      ClientMetadataDriver<'a>,
	pub os:          ClientMetadataOs<'a>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub platform:    Option<&'a str>
}

impl Default for ClientMetadata<'_> {
	fn default() -> Self {
		Self {
			application: None,
			driver: ClientMetadataDriver {
				name:    crate::DRIVER_NAME,
				version: env!("CARGO_PKG_VERSION")
			},
			os: ClientMetadataOs {
				r#type:       std::env::consts::OS,
				name:         None,
				architecture: Some(std::env::consts::ARCH),
				version:      None
			},
			platform: None
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadataApplication<'a> {
	pub name: &'a str
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadataDriver<'a> {
	pub name:    &'a str,
	pub version: &'a str
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientMetadataOs<'a> {
	#[serde(rename = "type")]
	pub r#type:       &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name:         Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub architecture: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub version:      Option<&'a str>
}

/// The reply to a hello. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelloReply {
	pub ok:                              f64,
	pub errmsg:                          Option<String>,
	pub code:                            Option<i32>,
	pub code_name:                       Option<String>,
	#[serde(alias = "isWritablePrimary")]
	pub ismaster:                        bool,
	pub min_wire_version:                i32,
	pub max_wire_version:                i32,
	pub logical_session_timeout_minutes: Option<i64>,
	pub compression:                     Option<Vec<Compressor>>,
	pub sasl_supported_mechs:            Option<Vec<String>>,
	// sharded instances
	pub msg:                             Option<String>,
	// replica sets
	pub set_name:                        Option<String>,
	pub set_version:                     Option<i32>,
	pub secondary:                       Option<bool>,
	pub hosts:                           Option<Vec<String>>,
	pub passives:                        Option<Vec<String>>,
	pub arbiters:                        Option<Vec<String>>,
	pub primary:                         Option<String>,
	pub arbiter_only:                    Option<bool>,
	pub hidden:                          Option<bool>,
	pub tags:                            Option<HashMap<String, String>>,
	pub me:                              Option<String>,
	pub election_id:                     Option<ObjectId>,
	pub last_write:                      Option<LastWrite>,
	pub isreplicaset:                    Option<bool>
}

#[derive(Debug, Copy, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastWrite {
	/// Milliseconds since the unix epoch.
	pub last_write_date: i64
}

impl HelloReply {
	/// Turns a failed reply into an application error.
	#[allow(clippy::float_cmp)]
	pub fn check(&self) -> Result<()> {
		if self.ok == 1f64 {
			return Ok(());
		}

		match self.code {
			Some(code) => Err(ErrorKind::Application {
				code,
				code_name: self.code_name.clone(),
				message:   self.errmsg.clone().unwrap_or_default()
			}.into()),
			None => Err(InvalidReplyError::ErrorCodeNotPresent.into())
		}
	}
}

#[cfg(feature = "auth")]
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SaslCommand<'a> {
	Start(SaslStart<'a>),
	Continue(SaslContinue<'a>)
}

#[cfg(feature = "auth")]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaslStart<'a> {
	pub sasl_start:     i32,
	pub mechanism:      AuthMech,
	#[serde(with = "serde_bytes")]
	pub payload:        &'a [u8],
	pub auto_authorize: i32,
	#[serde(rename = "$db")]
	pub db:             &'a str
}

#[cfg(feature = "auth")]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaslContinue<'a> {
	pub sasl_continue:   i32,
	pub conversation_id: i32,
	#[serde(with = "serde_bytes")]
	pub payload:         &'a [u8],
	#[serde(rename = "$db")]
	pub db:              &'a str
}

#[cfg(feature = "auth")]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaslReply {
	pub ok:              f64,
	pub errmsg:          Option<String>,
	pub code:            Option<i32>,
	pub conversation_id: i32,
	pub done:            bool,
	#[serde(with = "serde_bytes")]
	pub payload:         Vec<u8>
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn frame() {
		let mut buf = Vec::new();
		write_message(&mut buf, 7, 0, None, b"hello").unwrap();
		assert_eq!(buf.len(), HEADER_LEN + 5);
		assert_eq!(&buf[12..16], &2013i32.to_le_bytes());

		let (header, payload) = read_message(&mut buf.as_slice()).unwrap();
		assert_eq!(header.request_id, 7);
		assert_eq!(header.op_code, OpCode::Msg);
		assert_eq!(payload, b"hello");
	}

	#[test]
	fn noop_envelope() {
		let mut buf = Vec::new();
		write_message(&mut buf, 1, 3, Some(Compressor::Noop), b"abc").unwrap();
		assert_eq!(buf.len(), HEADER_LEN + COMPRESSION_LEN + 3);
		assert_eq!(&buf[12..16], &2012i32.to_le_bytes());

		let (header, payload) = read_message(&mut buf.as_slice()).unwrap();
		assert_eq!(header.response_to, 3);
		assert_eq!(header.op_code, OpCode::Msg);
		assert_eq!(payload, b"abc");
	}

	#[cfg(feature = "compress")]
	#[test]
	fn zstd_envelope() {
		let payload = vec![42u8; 4096];
		let mut buf = Vec::new();
		write_message(&mut buf, 1, 0, Some(Compressor::Zstd), &payload).unwrap();
		assert!(buf.len() < payload.len());
		assert_eq!(read_message(&mut buf.as_slice()).unwrap().1, payload);
	}

	#[test]
	fn reject_bad_length() {
		let mut buf = vec![0u8; HEADER_LEN];
		Header { message_length: 4, request_id: 0, response_to: 0, op_code: OpCode::Msg }
			.copy_to_slice(&mut buf);
		assert!(matches!(read_message(&mut buf.as_slice()).unwrap_err().kind,
			ErrorKind::InvalidReply(InvalidReplyError::MessageLength)));
	}

	#[test]
	fn truncated() {
		let mut buf = Vec::new();
		write_message(&mut buf, 1, 0, None, b"hello").unwrap();
		buf.truncate(buf.len() - 2);
		assert!(read_message(&mut buf.as_slice()).unwrap_err().is_network());
	}

	#[test]
	fn hello_reply() {
		let reply: HelloReply = serde_json::from_str(r#"{
			"ok": 1.0, "ismaster": true, "setName": "rs0", "setVersion": 2,
			"electionId": {"$oid": "7fffffff0000000000000001"},
			"hosts": ["a:1", "b:1"], "minWireVersion": 0, "maxWireVersion": 13,
			"lastWrite": {"lastWriteDate": 1000}, "compression": ["zstd", "lz4"]
		}"#).unwrap();
		assert!(reply.ismaster);
		assert_eq!(reply.set_version, Some(2));
		assert_eq!(reply.hosts.as_ref().map(Vec::len), Some(2));
		assert_eq!(reply.compression, Some(vec![Compressor::Zstd, Compressor::Noop]));
		assert!(reply.check().is_ok());

		let reply: HelloReply = serde_json::from_str(r#"{"ok": 0, "code": 13, "errmsg": "unauthorized"}"#).unwrap();
		assert!(matches!(reply.check().unwrap_err().kind, ErrorKind::Application { code: 13, .. }));
	}

	#[test]
	fn hello_request() {
		let options = ClientOptions { appname: Some("app".to_string()), ..ClientOptions::default() };
		let json = serde_json::to_value(HelloRequest::handshake(&options)).unwrap();
		assert_eq!(json["isMaster"], 1);
		assert_eq!(json["$db"], "admin");
		assert_eq!(json["client"]["application"]["name"], "app");
		assert_eq!(json["client"]["driver"]["name"], crate::DRIVER_NAME);
		assert!(json.get("compression").is_none());
	}
}
