//! Generation of cloud-compatible identifiers for devices that are
//! provisioned without preassigned ids.

use uuid::Uuid;

/// Organization ids carry a readable `org_` prefix with a short random
/// suffix.
pub fn generate_org_id() -> String {
    let suffix: String = Uuid::new_v4().simple().to_string();
    format!("org_{}", &suffix[..8])
}

pub fn generate_site_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn generate_device_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_ids_carry_the_expected_prefix() {
        let org_id = generate_org_id();
        assert!(org_id.starts_with("org_"));
        assert_eq!(org_id.len(), "org_".len() + 8);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(generate_device_id(), generate_device_id());
        assert_ne!(generate_site_id(), generate_site_id());
    }

    #[test]
    fn generated_identity_passes_validation() {
        let config = crate::persistence::DeploymentConfig {
            organization_id: generate_org_id(),
            site_id: generate_site_id(),
            device_id: generate_device_id(),
            metadata: None,
        };
        assert!(config.validate().is_ok());
    }
}
