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
	crate::{*, wire::{HelloReply, SaslCommand, SaslStart, SaslContinue, SaslReply}, pool::Connection},
	hmac::{Hmac, Mac},
	sha2::{Sha256, Digest},
	rand::Rng
};

const MIN_ITERATIONS: usize = 4096;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AuthError {
	InvalidReply,
	InvalidServerNonce,
	InvalidServerSignature,
	InvalidIterationCount,
	ServerError,
	UnsupportedMechanism,
	InvalidOptions
}

impl From<AuthError> for ErrorKind {
	fn from(e: AuthError) -> Self {
		Self::Auth(e)
	}
}

/// Authenticates a freshly established connection with the client's
/// credential, if one is configured.
///
/// see https://github.com/mongodb/specifications/blob/master/source/auth/auth.rst
pub(crate) fn authenticate(
	conn:     &mut Connection,
	client:   &Client,
	hello:    &HelloReply,
	deadline: &Deadline
) -> Result<()> {
	let credential = &client.options.credential;
	let mechanism = match credential.effective_mechanism() {
		Some(mechanism) => mechanism,
		None => return Ok(())
	};

	// without an explicit mechanism only SCRAM-SHA-256 is attempted
	if credential.mechanism.is_none() {
		if let Some(mechs) = &hello.sasl_supported_mechs {
			if !mechs.iter().any(|m| m == "SCRAM-SHA-256") {
				return Err(AuthError::UnsupportedMechanism.into());
			}
		}
	}

	let username = credential.username.as_deref().ok_or(AuthError::InvalidOptions)?;
	let password = credential.password.as_deref().ok_or(AuthError::InvalidOptions)?;

	match mechanism {
		AuthMech::Plain => auth_plain(conn, client, deadline,
			credential.source.as_deref().unwrap_or("$external"), username, password),
		AuthMech::ScramSha256 => auth_scram(conn, client, deadline,
			credential.source.as_deref().unwrap_or("admin"), username, password),
		_ => Err(AuthError::UnsupportedMechanism.into())
	}
}

#[allow(clippy::float_cmp)]
fn sasl(
	conn:     &mut Connection,
	client:   &Client,
	deadline: &Deadline,
	command:  &SaslCommand
) -> Result<SaslReply> {
	let payload = client.codec.encode_sasl(command)?;
	let reply = client.codec.decode_sasl(&conn.command(client, &payload, deadline)?)?;

	if reply.ok != 1f64 {
		return Err(match reply.code {
			Some(code) => ErrorKind::Application {
				code,
				code_name: None,
				message:   reply.errmsg.unwrap_or_default()
			}.into(),
			None => AuthError::ServerError.into()
		});
	}

	Ok(reply)
}

fn auth_plain(
	conn:     &mut Connection,
	client:   &Client,
	deadline: &Deadline,
	source:   &str,
	username: &str,
	password: &str
) -> Result<()> {
	let reply = sasl(conn, client, deadline, &SaslCommand::Start(SaslStart {
		sasl_start:     1,
		mechanism:      AuthMech::Plain,
		payload:        format!("\0{}\0{}", username, password).as_bytes(),
		auto_authorize: 1,
		db:             source
	}))?;

	if !reply.done {
		return Err(AuthError::InvalidReply.into());
	}

	Ok(())
}

fn auth_scram(
	conn:     &mut Connection,
	client:   &Client,
	deadline: &Deadline,
	source:   &str,
	username: &str,
	password: &str
) -> Result<()> {
	let mut scram = ScramSha256::new(username, password);

	let reply = sasl(conn, client, deadline, &SaslCommand::Start(SaslStart {
		sasl_start:     1,
		mechanism:      AuthMech::ScramSha256,
		payload:        &scram.client_first(),
		auto_authorize: 1,
		db:             source
	}))?;

	let client_final = scram.client_final(&reply.payload)?;
	let conversation_id = reply.conversation_id;

	let reply = sasl(conn, client, deadline, &SaslCommand::Continue(SaslContinue {
		sasl_continue:   1,
		conversation_id,
		payload:         &client_final,
		db:              source
	}))?;

	scram.verify_server_final(&reply.payload)?;

	// some servers require an empty round trip to finish the conversation
	if !reply.done {
		let reply = sasl(conn, client, deadline, &SaslCommand::Continue(SaslContinue {
			sasl_continue:   1,
			conversation_id,
			payload:         &[],
			db:              source
		}))?;

		if !reply.done {
			return Err(AuthError::InvalidReply.into());
		}
	}

	Ok(())
}

/// The client side of a SCRAM-SHA-256 conversation.
///
/// see https://tools.ietf.org/html/rfc7677, https://tools.ietf.org/html/rfc5802
#[derive(Debug)]
pub struct ScramSha256<'a> {
	password:          &'a str,
	client_nonce:      String,
	client_first_bare: String,
	server_signature:  Option<[u8; 32]>
}

impl<'a> ScramSha256<'a> {
	pub fn new(username: &str, password: &'a str) -> Self {
		let mut rng = rand::thread_rng();
		// printable ascii above ','
		let nonce = (0..24)
			.map(|_| rng.gen_range(0x2Du8, 0x7Fu8) as char)
			.collect::<String>();
		Self::with_nonce(username, password, &nonce)
	}

	pub fn with_nonce(username: &str, password: &'a str, nonce: &str) -> Self {
		Self {
			password,
			client_nonce:      nonce.to_string(),
			client_first_bare: format!("n={},r={}", saslname(username), nonce),
			server_signature:  None
		}
	}

	pub fn client_first(&self) -> Vec<u8> {
		format!("n,,{}", self.client_first_bare).into_bytes()
	}

	/// Consumes the server-first message and produces the client-final message.
	pub fn client_final(&mut self, server_first: &[u8]) -> Result<Vec<u8>> {
		let server_first = std::str::from_utf8(server_first).map_err(|_| AuthError::InvalidReply)?;
		let combined_nonce = attribute(server_first, 'r')?;
		let salt = base64::decode(attribute(server_first, 's')?)
			.map_err(|_| AuthError::InvalidReply)?;
		let iterations = attribute(server_first, 'i')?.parse::<usize>()
			.map_err(|_| AuthError::InvalidReply)?;

		if iterations < MIN_ITERATIONS {
			return Err(AuthError::InvalidIterationCount.into());
		} else if !combined_nonce.starts_with(&self.client_nonce) || combined_nonce.len() == self.client_nonce.len() {
			return Err(AuthError::InvalidServerNonce.into());
		}

		let without_proof = format!("c=biws,r={}", combined_nonce);
		let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

		// TODO saslPrep the password
		let mut salted_password = [0u8; 32];
		pbkdf2::pbkdf2::<Hmac<Sha256>>(self.password.as_bytes(), &salt, iterations, &mut salted_password);

		let client_key = hmac(&salted_password, b"Client Key")?;
		let server_key = hmac(&salted_password, b"Server Key")?;
		let stored_key = Sha256::digest(&client_key);
		let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
		self.server_signature = Some(hmac(&server_key, auth_message.as_bytes())?);

		let mut client_proof = [0u8; 32];
		for (i, v) in client_proof.iter_mut().enumerate() {
			*v = client_key[i] ^ client_signature[i];
		}

		Ok(format!("{},p={}", without_proof, base64::encode(&client_proof)).into_bytes())
	}

	/// Checks the server signature of the server-final message.
	pub fn verify_server_final(&self, server_final: &[u8]) -> Result<()> {
		let server_final = std::str::from_utf8(server_final).map_err(|_| AuthError::InvalidReply)?;

		if attribute(server_final, 'e').is_ok() {
			return Err(AuthError::ServerError.into());
		}

		let verifier = base64::decode(attribute(server_final, 'v')?)
			.map_err(|_| AuthError::InvalidReply)?;

		match &self.server_signature {
			Some(signature) if signature[..] == verifier[..] => Ok(()),
			_ => Err(AuthError::InvalidServerSignature.into())
		}
	}
}

fn attribute(message: &str, key: char) -> Result<&str> {
	message.split(',')
		.find_map(|attr| {
			let mut chars = attr.chars();
			(chars.next() == Some(key) && chars.next() == Some('=')).then(|| &attr[2..])
		})
		.ok_or_else(|| AuthError::InvalidReply.into())
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
	let mut mac = Hmac::<Sha256>::new_varkey(key).map_err(|_| AuthError::InvalidReply)?;
	mac.input(data);
	let mut out = [0u8; 32];
	out.copy_from_slice(&mac.result().code());
	Ok(out)
}

fn saslname(username: &str) -> String {
	username.replace('=', "=3D").replace(',', "=2C")
}

#[cfg(test)]
mod tests {
	use super::*;

	const SERVER_FIRST: &[u8] = b"r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

	#[test]
	fn scram_rfc7677() {
		let mut scram = ScramSha256::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO");
		assert_eq!(scram.client_first(), b"n,,n=user,r=rOprNGfwEbeRWgbNEkqO".to_vec());

		let client_final = scram.client_final(SERVER_FIRST).unwrap();
		assert_eq!(std::str::from_utf8(&client_final).unwrap(),
			"c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=");

		scram.verify_server_final(b"v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=").unwrap();
		assert!(matches!(scram.verify_server_final(b"v=AAAA").unwrap_err().kind,
			ErrorKind::Auth(AuthError::InvalidServerSignature)));
		assert!(matches!(scram.verify_server_final(b"e=invalid-proof").unwrap_err().kind,
			ErrorKind::Auth(AuthError::ServerError)));
	}

	#[test]
	fn scram_rejects() {
		let mut scram = ScramSha256::with_nonce("user", "pencil", "other");
		assert!(matches!(scram.client_final(SERVER_FIRST).unwrap_err().kind,
			ErrorKind::Auth(AuthError::InvalidServerNonce)));

		let mut scram = ScramSha256::with_nonce("user", "pencil", "rOprNGfwEbeRWgbNEkqO");
		assert!(matches!(scram.client_final(b"r=rOprNGfwEbeRWgbNEkqOxyz,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=1000")
			.unwrap_err().kind, ErrorKind::Auth(AuthError::InvalidIterationCount)));
		assert!(matches!(scram.client_final(b"s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
			.unwrap_err().kind, ErrorKind::Auth(AuthError::InvalidReply)));
	}

	#[test]
	fn random_nonce() {
		let scram = ScramSha256::new("user", "pencil");
		assert_eq!(scram.client_nonce.len(), 24);
		assert!(!scram.client_nonce.contains(','));
	}

	#[test]
	fn escape_username() {
		assert_eq!(saslname("a=b,c"), "a=3Db=2Cc");
	}
}
