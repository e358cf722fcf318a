//! Identifier helpers for runs and approval requests.

use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Build an id of the form `<prefix>_<millis>_<8 random hex chars>`.
///
/// ```
/// let id = agentgate::utils::prefixed_id("loop");
/// assert!(id.starts_with("loop_"));
/// assert_eq!(id.rsplit('_').next().unwrap().len(), 8);
/// ```
pub fn prefixed_id(prefix: &str) -> String {
    let random: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("{}_{}_{}", prefix, unix_millis(), random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_id_shape() {
        let id = prefixed_id("approval");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "approval");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_prefixed_ids_are_unique() {
        let a = prefixed_id("loop");
        let b = prefixed_id("loop");
        assert_ne!(a, b);
    }
}
