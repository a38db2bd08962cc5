//! String-backed identifier newtypes.

/// Declare a transparent, string-backed identifier type.
macro_rules! string_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
      serde::Serialize, serde::Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(String);

    impl $name {
      pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

      pub fn as_str(&self) -> &str { &self.0 }

      pub fn is_empty(&self) -> bool { self.0.is_empty() }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl From<&str> for $name {
      fn from(value: &str) -> Self { Self(value.to_owned()) }
    }

    impl From<String> for $name {
      fn from(value: String) -> Self { Self(value) }
    }
  };
}

pub(crate) use string_id;
