//! Deterministic SHA-256 identities.
//!
//! Parts are length-prefixed before hashing so that `("ab", "c")` and
//! `("a", "bc")` never collide.

use sha2::{Digest, Sha256};

pub(crate) fn digest_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
  let mut hasher = Sha256::new();
  for part in parts {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
  }
  hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn boundaries_are_significant() {
    assert_ne!(digest_parts(["ab", "c"]), digest_parts(["a", "bc"]));
  }

  #[test]
  fn stable_across_calls() {
    assert_eq!(digest_parts(["x", "y"]), digest_parts(["x", "y"]));
    assert_eq!(digest_parts(["x"]).len(), 64);
  }
}
