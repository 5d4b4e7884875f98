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

use serde::{Serialize, Serializer, Deserialize, Deserializer, de::Error as _};

/// A 12 byte identifier. Replica set primaries report their election id as
/// one, and the ordering of election ids is the byte-wise ordering.
///
/// see https://github.com/mongodb/specifications/blob/master/source/objectid.rst
#[derive(Default, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct ObjectId(pub [u8; 12]);

#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct OidError;

impl std::fmt::Display for OidError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("invalid object id")
	}
}

impl From<u64> for ObjectId {
	/// Places `v` big-endian in the low eight bytes, which keeps the ordering of `v`.
	fn from(v: u64) -> Self {
		let mut id = [0u8; 12];
		id[4..].copy_from_slice(&v.to_be_bytes());
		Self(id)
	}
}

#[derive(Serialize)]
struct ObjectIdSerde<'a> {
	#[serde(rename = "$oid")]
	#[serde(with = "serde_bytes")]
	oid: &'a [u8]
}

#[derive(Serialize, Deserialize)]
struct ObjectIdSerdeJson {
	#[serde(rename = "$oid")]
	oid: String
}

impl Serialize for ObjectId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where
		S: Serializer {
		if serializer.is_human_readable() {
			ObjectIdSerdeJson { oid: self.to_string() }.serialize(serializer)
		} else {
			ObjectIdSerde { oid: &self.0 }.serialize(serializer)
		}
	}
}

impl<'de> Deserialize<'de> for ObjectId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error> where
		D: Deserializer<'de> {
		use std::str::FromStr;
		if deserializer.is_human_readable() {
			ObjectIdSerdeJson::deserialize(deserializer)
				.and_then(|v| Self::from_str(&v.oid).map_err(D::Error::custom))
		} else {
			let v = serde_bytes::ByteBuf::deserialize(deserializer)?;
			if v.len() != 12 {
				return Err(D::Error::custom(OidError));
			}
			let mut oid = [0u8; 12];
			oid.copy_from_slice(&v);
			Ok(Self(oid))
		}
	}
}

impl std::str::FromStr for ObjectId {
	type Err = OidError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.len() != 24 { return Err(OidError) }

		fn parse_digit(ch: char) -> Result<u8, OidError> {
			ch.to_digit(16).map(|v| v as u8).ok_or(OidError)
		}

		let mut id = [0u8; 12];
		let mut iter = s.chars();

		for id in &mut id {
			*id = (iter.next().ok_or(OidError).and_then(parse_digit)? << 4)
				| iter.next().ok_or(OidError).and_then(parse_digit)?;
		}
		Ok(Self(id))
	}
}

impl std::fmt::Debug for ObjectId {
	fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
		f.debug_tuple("ObjectId")
			.field(&self.to_string())
			.finish()
	}
}

impl std::fmt::Display for ObjectId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		let mut buf = [0; 24];
		crate::common::bytes_to_hex(&self.0, &mut buf);
		f.write_str(std::str::from_utf8(&buf).map_err(|_| std::fmt::Error)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::str::FromStr;

	#[test]
	fn parse() {
		assert_eq!(ObjectId::from_str("0123456789ABCDEF01234567"),
				   Ok(ObjectId([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
					   0xCD, 0xEF, 0x01, 0x23, 0x45, 0x67])));
		assert_eq!(ObjectId::from_str("0123"), Err(OidError));
		assert_eq!(ObjectId::from_str("0123456789ABCDEF0123456X"), Err(OidError));
	}

	#[test]
	fn fmt() {
		assert_eq!(ObjectId([0x01, 0x23, 0x45, 0x67, 0x89, 0xAB,
			0xCD, 0xEF, 0x01, 0x23, 0x45, 0x67]).to_string(),
				   "0123456789abcdef01234567")
	}

	#[test]
	fn ordering() {
		assert!(ObjectId::from(1) < ObjectId::from(2));
		assert!(ObjectId::from(255) < ObjectId::from(256));
	}

	#[test]
	fn json() {
		let id = ObjectId::from(7);
		let json = serde_json::to_string(&id).unwrap();
		assert_eq!(json, r#"{"$oid":"000000000000000000000007"}"#);
		assert_eq!(serde_json::from_str::<ObjectId>(&json).unwrap(), id);
	}
}
