//! Process-unique identifiers for sessions and queries.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;
use rand::distr::Alphanumeric;

const PREFIX_LEN: usize = 16;
const COUNTER_MASK: u32 = 0x7fff_ffff;

/// Produces identifiers of the form `<random prefix>-<counter in base 36>`.
///
/// The prefix is drawn once per generator, so two processes (or two
/// generators) practically never collide; the counter keeps ids from one
/// generator distinct until it wraps at `2^31 - 1`.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    counter: AtomicU32,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        let prefix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(PREFIX_LEN)
            .map(char::from)
            .collect();
        Self {
            prefix,
            counter: AtomicU32::new(0),
        }
    }

    /// Next identifier. Never fails.
    pub fn next_id(&self) -> String {
        let previous = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.wrapping_add(1) & COUNTER_MASK)
            })
            .unwrap_or_else(|n| n);
        let n = previous.wrapping_add(1) & COUNTER_MASK;
        format!("{}-{}", self.prefix, to_base36(n))
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::with_capacity(7);
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}
