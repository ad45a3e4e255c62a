//! Opaque task id generation

use chrono::Utc;
use std::collections::HashSet;
use uuid::Uuid;

/// Prefix shared by all generated ids
const ID_PREFIX: &str = "t-";

/// Generates opaque, collision-resistant task ids
pub struct IdGenerator;

impl IdGenerator {
    /// Generate a fresh id: creation time in base 36 plus a random suffix
    pub fn generate() -> String {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let random = Uuid::new_v4().simple().to_string();
        format!("{}{}-{}", ID_PREFIX, to_base36(millis), &random[..8])
    }

    /// Generate an id that is not already in `taken`
    pub fn generate_unique(taken: &HashSet<String>) -> String {
        loop {
            let id = Self::generate();
            if !taken.contains(&id) {
                return id;
            }
        }
    }

    /// Whether a string can be used as a task id
    ///
    /// Ids are opaque, but they travel through a single Markdown line and
    /// an HTML comment, so they must be non-empty and free of whitespace.
    pub fn is_valid(id: &str) -> bool {
        !id.is_empty() && !id.contains(char::is_whitespace) && !id.contains("-->")
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_has_prefix() {
        let id = IdGenerator::generate();
        assert!(id.starts_with("t-"));
        assert!(IdGenerator::is_valid(&id));
    }

    #[test]
    fn test_generate_is_unique() {
        let ids: HashSet<String> = (0..500).map(|_| IdGenerator::generate()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn test_generate_unique_avoids_taken() {
        let taken: HashSet<String> = (0..10).map(|_| IdGenerator::generate()).collect();
        let id = IdGenerator::generate_unique(&taken);
        assert!(!taken.contains(&id));
    }

    #[test]
    fn test_is_valid() {
        assert!(IdGenerator::is_valid("task-42"));
        assert!(!IdGenerator::is_valid(""));
        assert!(!IdGenerator::is_valid("has space"));
        assert!(!IdGenerator::is_valid("a-->b"));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
