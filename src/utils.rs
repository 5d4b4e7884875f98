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

use std::time::{Duration, Instant};

/// The point in time an operation must complete by. Every bounded wait of an
/// operation (selection, checkout, socket I/O) is clamped to what is left.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
	/// A deadline that never expires; waits are bounded by their own timeouts only.
	pub fn none() -> Self {
		Self(None)
	}

	pub fn after(timeout: Option<Duration>) -> Self {
		Self(timeout.map(|timeout| Instant::now() + timeout))
	}

	/// Time left, `None` if unbounded.
	pub fn remaining(&self) -> Option<Duration> {
		self.0.map(|at| at.saturating_duration_since(Instant::now()))
	}

	pub fn is_expired(&self) -> bool {
		self.remaining() == Some(Duration::default())
	}

	/// Clamps `timeout` to the time left.
	pub fn bound(&self, timeout: Duration) -> Duration {
		match self.remaining() {
			Some(remaining) => remaining.min(timeout),
			None => timeout
		}
	}
}

/// A wrapper that implements `Debug` for a type that doesn't.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Default)]
pub struct __DebugWrapper__<T>(pub T);

impl<T> std::fmt::Debug for __DebugWrapper__<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("NonDebugStruct")
			.finish()
	}
}

impl<T> std::ops::Deref for __DebugWrapper__<T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl<T> std::ops::DerefMut for __DebugWrapper__<T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unbounded() {
		let deadline = Deadline::none();
		assert_eq!(deadline.remaining(), None);
		assert!(!deadline.is_expired());
		assert_eq!(deadline.bound(Duration::from_secs(3)), Duration::from_secs(3));
	}

	#[test]
	fn clamps() {
		let deadline = Deadline::after(Some(Duration::from_secs(60)));
		assert!(deadline.bound(Duration::from_secs(3600)) <= Duration::from_secs(60));
		assert_eq!(deadline.bound(Duration::from_millis(5)), Duration::from_millis(5));
	}

	#[test]
	fn expires() {
		let deadline = Deadline::after(Some(Duration::default()));
		assert!(deadline.is_expired());
		assert_eq!(deadline.bound(Duration::from_secs(1)), Duration::default());
	}
}
