//! Storage configuration - data disks and the optical drive

use converge::{Configuration, NodeConfiguration, ReconcileError, Result, RetryConfig, TargetNode};

use super::NodeSpec;
use crate::config::DeploymentConfig;
use crate::layout::DriveLayout;
use crate::resource::{Disk, OpticalDrive, WaitForDisk};

#[derive(Debug, Clone)]
pub struct StorageConfiguration {
    pub azure: bool,
    pub allocation_unit_kb: u32,
    pub optical_drive_letter: char,
    pub disk_wait: RetryConfig,
}

impl StorageConfiguration {
    pub fn from_config(config: &DeploymentConfig) -> Self {
        Self {
            azure: config.storage.azure,
            allocation_unit_kb: config.storage.allocation_unit_kb,
            optical_drive_letter: config.storage.optical_drive_letter,
            disk_wait: config.retry.disk.to_retry_config(),
        }
    }

    /// The layout a node gets
    pub fn layout_for(&self, node: &TargetNode) -> Result<DriveLayout> {
        let spec = NodeSpec::of(node)?;
        DriveLayout::for_policy(spec.drive_count, self.azure).ok_or_else(|| {
            ReconcileError::ValidationFailure {
                problems: vec![format!(
                    "node '{}': drive count {} is not supported",
                    node.name, spec.drive_count
                )],
            }
        })
    }
}

impl Configuration for StorageConfiguration {
    fn name(&self) -> &str {
        "storage"
    }

    fn declare(&self, node: &TargetNode, out: &mut NodeConfiguration) -> Result<()> {
        let layout = self.layout_for(node)?;

        let optical = if NodeSpec::of(node)?.optical_drive {
            let letter = self.optical_drive_letter.to_ascii_uppercase();
            Some(out.declare("OpticalDrive", OpticalDrive::new(letter)).id())
        } else {
            None
        };

        for drive in &layout.drives {
            let wait = out
                .declare(
                    format!("WaitForDisk{}", drive.disk_number),
                    WaitForDisk::new(drive.disk_number).with_policy(self.disk_wait.clone()),
                )
                .id();
            let disk = Disk::new(drive.disk_number, drive.letter, drive.label)
                .with_allocation_unit(self.allocation_unit_kb);
            out.declare(drive.declaration_name(), disk)
                .depends_on(wait)
                .depends_on_all(optical);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurations::{target_nodes, tests as fixtures};
    use converge::RunPlan;

    fn describe(config: &DeploymentConfig) -> Vec<converge::PlannedDeclaration> {
        let storage = StorageConfiguration::from_config(config);
        RunPlan::build(target_nodes(config), &[&storage])
            .unwrap()
            .nodes
            .remove(0)
            .describe()
    }

    #[test]
    fn test_five_drives_each_wait_for_their_disk() {
        let media = fixtures::media();
        let declarations = describe(&fixtures::deployment(media.path()));

        assert_eq!(declarations[0].name, "OpticalDrive");
        let disks: Vec<_> = declarations
            .iter()
            .filter(|d| d.resource_type == "disk")
            .collect();
        assert_eq!(disks.len(), 5);
        assert_eq!(disks[0].resource_id, "disk:D:");
        assert_eq!(disks[0].depends_on, vec!["WaitForDisk1", "OpticalDrive"]);
        assert_eq!(disks[4].resource_id, "disk:H:");
    }

    #[test]
    fn test_azure_single_drive() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.storage.drive_count = 1;
        config.storage.azure = true;
        config.nodes[0].optical_drive = false;

        let declarations = describe(&config);
        let names: Vec<&str> = declarations.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["WaitForDisk2", "Disk_SQL"]);
        assert_eq!(declarations[1].resource_id, "disk:E:");
    }

    #[test]
    fn test_unsupported_count_is_a_validation_failure() {
        let media = fixtures::media();
        let mut config = fixtures::deployment(media.path());
        config.storage.drive_count = 3;
        let storage = StorageConfiguration::from_config(&config);

        let err = RunPlan::build(target_nodes(&config), &[&storage]).unwrap_err();
        assert!(matches!(err, ReconcileError::ValidationFailure { .. }));
    }
}
