//! HTTP handlers (spec §4.6, component C6). Declared the way the teacher's
//! `lib.rs` declares its `handlers` submodule tree, one file per concern.

pub mod metrics;
pub mod status;
pub mod traces;

/// `clamp(requested, default, max)` applied by every list endpoint
/// (spec §4.6 "Limit clamp").
pub fn clamp_limit(requested: Option<u32>, default: u32, max: u32) -> u32 {
    requested.unwrap_or(default).clamp(1, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_limit_uses_default_when_absent() {
        assert_eq!(clamp_limit(None, 20, 10_000), 20);
    }

    #[test]
    fn clamp_limit_caps_at_max() {
        assert_eq!(clamp_limit(Some(999_999), 20, 10_000), 10_000);
    }

    #[test]
    fn clamp_limit_floors_at_one() {
        assert_eq!(clamp_limit(Some(0), 20, 10_000), 1);
    }
}
