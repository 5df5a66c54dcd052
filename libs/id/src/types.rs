//! Typed ID definitions for all platform resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.
//! IDs are ULID-based for sortability and uniqueness.

use crate::define_id;

// =============================================================================
// Machines and Locations
// =============================================================================

define_id!(MachineId, "mach");
define_id!(LocationId, "loc");

// =============================================================================
// Jobs
// =============================================================================

define_id!(JobId, "job");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_id_roundtrip() {
        let id = MachineId::new();
        let s = id.to_string();
        let parsed: MachineId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_machine_id_prefix() {
        let id = MachineId::new();
        let s = id.to_string();
        assert!(s.starts_with("mach_"));
    }

    #[test]
    fn test_machine_id_invalid_prefix() {
        let result: Result<MachineId, _> = "job_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn test_machine_id_missing_separator() {
        let result: Result<MachineId, _> = "mach01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::MissingSeparator
        ));
    }

    #[test]
    fn test_machine_id_empty() {
        let result: Result<MachineId, _> = "".parse();
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), crate::IdError::Empty));
    }

    #[test]
    fn test_machine_id_invalid_ulid() {
        let result: Result<MachineId, _> = "mach_invalid".parse();
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            crate::IdError::InvalidUlid(_)
        ));
    }

    #[test]
    fn test_job_id_json_roundtrip() {
        let id = JobId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_machine_id_sortable() {
        let id1 = MachineId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = MachineId::new();
        // ULIDs are time-ordered, so id1 < id2
        assert!(id1 < id2);
    }

    #[test]
    fn test_all_id_prefixes_unique() {
        // Ensure all prefixes are unique
        let prefixes = vec![
            MachineId::PREFIX,
            LocationId::PREFIX,
            JobId::PREFIX,
            RequestId::PREFIX,
        ];

        let unique: std::collections::HashSet<_> = prefixes.iter().collect();
        assert_eq!(prefixes.len(), unique.len(), "Duplicate ID prefixes found!");
    }
}
