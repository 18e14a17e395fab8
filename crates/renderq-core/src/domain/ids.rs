//! Domain identifiers (strongly-typed IDs).
//!
//! Every identifier is stored as a SQLite `INTEGER`, so the common
//! representation is an `i64`. A phantom marker keeps `JobId`, `ChannelId`
//! and `UserId` apart at compile time while sharing one implementation.
//!
//! Chat-platform snowflakes are unsigned 64-bit values. They are converted
//! with a bit-preserving `as` cast, so `from_u64(x).as_u64() == x` for every
//! `x` even when the stored `i64` is negative.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Marker trait for each identifier kind.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "job-").
    fn prefix() -> &'static str;

    /// Whether the raw value is an unsigned snowflake.
    fn is_snowflake() -> bool {
        true
    }
}

/// Generic identifier backed by a raw `i64`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    raw: i64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(raw: i64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Reinterpret an unsigned snowflake as the stored representation.
    pub const fn from_u64(value: u64) -> Self {
        Self::new(value as i64)
    }

    pub const fn get(&self) -> i64 {
        self.raw
    }

    pub const fn as_u64(&self) -> u64 {
        self.raw as u64
    }
}

impl<T: IdMarker> From<i64> for Id<T> {
    fn from(raw: i64) -> Self {
        Self::new(raw)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if T::is_snowflake() {
            write!(f, "{}{}", T::prefix(), self.as_u64())
        } else {
            write!(f, "{}{}", T::prefix(), self.raw)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }

    fn is_snowflake() -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {}

impl IdMarker for Channel {
    fn prefix() -> &'static str {
        "channel-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "user-"
    }
}

/// Identifier of a job, assigned by the store on insert.
pub type JobId = Id<Job>;

/// Destination channel for results and notices.
pub type ChannelId = Id<Channel>;

/// Requesting actor.
pub type UserId = Id<User>;

impl Id<User> {
    /// Chat mention markup for this user.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.as_u64())
    }
}
