//! Macro for implementing Display and FromStr for status enums
//!
//! This macro eliminates boilerplate for status enum conversions by providing
//! a single implementation for both Display and FromStr traits. It handles
//! case-insensitive parsing and consistent string representation.
//!
//! # Example
//!
//! ```rust
//! use calsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum ResponseStatus {
//!     NeedsAction,
//!     Accepted,
//!     Declined,
//! }
//!
//! impl_domain_status_conversions!(ResponseStatus {
//!     NeedsAction => "needsaction",
//!     Accepted => "accepted",
//!     Declined => "declined",
//! });
//! ```

/// Implements Display and FromStr traits for status enums
///
/// This macro generates:
/// - Display trait: converts enum variants to lowercase strings
/// - FromStr trait: parses case-insensitive strings to enum variants
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations
///
/// # Features
///
/// - Case-insensitive parsing (e.g., "PENDING", "pending", "Pending" all work)
/// - Consistent lowercase string output
/// - Descriptive error messages with enum name
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ChannelState {
        Sync,
        Exists,
        NotExists,
    }

    impl_domain_status_conversions!(ChannelState {
        Sync => "sync",
        Exists => "exists",
        NotExists => "not_exists",
    });

    #[test]
    fn test_display_conversion() {
        assert_eq!(ChannelState::Sync.to_string(), "sync");
        assert_eq!(ChannelState::NotExists.to_string(), "not_exists");
    }

    #[test]
    fn test_fromstr_case_insensitive() {
        assert_eq!(ChannelState::from_str("exists").unwrap(), ChannelState::Exists);
        assert_eq!(ChannelState::from_str("EXISTS").unwrap(), ChannelState::Exists);
        assert_eq!(ChannelState::from_str("Not_Exists").unwrap(), ChannelState::NotExists);
    }

    #[test]
    fn test_fromstr_invalid() {
        let result = ChannelState::from_str("deleted");
        assert!(result.unwrap_err().contains("Invalid ChannelState: deleted"));
        assert!(ChannelState::from_str("").is_err());
    }

    #[test]
    fn test_roundtrip() {
        for state in [ChannelState::Sync, ChannelState::Exists, ChannelState::NotExists] {
            assert_eq!(ChannelState::from_str(&state.to_string()).unwrap(), state);
        }
    }
}
