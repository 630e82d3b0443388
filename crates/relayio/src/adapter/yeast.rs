//! Compact, collision-free, sortable id generator used for broadcast
//! offsets.
//!
//! Ids are the current unix time in milliseconds encoded in a 64 char
//! url-safe alphabet; ids minted within the same millisecond get a `.<seed>`
//! suffix so they stay unique and ordered.

use std::time::{SystemTime, UNIX_EPOCH};

const ALPHABET: &[u8; 64] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz-_";

/// Encode a number in the yeast alphabet, most significant digit first.
pub(crate) fn encode(mut num: u64) -> String {
    let mut encoded = Vec::new();
    loop {
        encoded.push(ALPHABET[(num % 64) as usize]);
        num /= 64;
        if num == 0 {
            break;
        }
    }
    encoded.reverse();
    String::from_utf8(encoded).unwrap()
}

/// Stateful generator: one instance per adapter.
#[derive(Debug, Default)]
pub(crate) struct Yeaster {
    prev: u64,
    seed: u64,
}

impl Yeaster {
    pub(crate) fn yeast(&mut self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before unix epoch")
            .as_millis() as u64;

        if now == self.prev {
            let seed = self.seed;
            self.seed += 1;
            format!("{}.{}", encode(now), encode(seed))
        } else {
            self.prev = now;
            self.seed = 0;
            encode(now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_known_values() {
        assert_eq!(encode(0), "0");
        assert_eq!(encode(63), "_");
        assert_eq!(encode(64), "10");
        assert_eq!(encode(64 * 64 + 1), "101");
    }

    #[test]
    fn yeast_is_unique_and_increasing() {
        let mut yeaster = Yeaster::default();
        let mut ids: Vec<String> = (0..50).map(|_| yeaster.yeast()).collect();
        let sorted = {
            let mut sorted = ids.clone();
            sorted.sort();
            sorted
        };
        assert_eq!(ids, sorted);
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }
}
