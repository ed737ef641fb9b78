//! Virtual disk devices of a VM, addressed by their `Hard disk N` label

use crate::vim::types::{VirtualDevice, VirtualMachineConfigInfo};
use crate::vim::{fetch, ManagedObjectRef, Vim};
use crate::{Error, Result};

/// Prefix vSphere gives disk device labels
pub const DISK_LABEL_PREFIX: &str = "Hard disk ";

pub fn disk_label(number: u32) -> String {
    format!("{DISK_LABEL_PREFIX}{number}")
}

/// A `VirtualDisk` device as seen in the VM's hardware list
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDiskInfo {
    pub label: String,
    pub key: i32,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
    /// Datastore path, e.g. `[ds1] app01/app01_1.vmdk`
    pub file_name: Option<String>,
    pub datastore: Option<ManagedObjectRef>,
    /// Set once the disk is a First Class Disk
    pub vdisk_id: Option<String>,
    pub capacity_kb: Option<i64>,
}

impl VirtualDiskInfo {
    fn from_device(dev: &VirtualDevice) -> Self {
        let backing = dev.backing.as_ref();
        Self {
            label: dev.label().unwrap_or_default().to_string(),
            key: dev.key,
            controller_key: dev.controller_key,
            unit_number: dev.unit_number,
            file_name: backing.and_then(|b| b.file_name.clone()),
            datastore: backing.and_then(|b| b.datastore.clone()),
            vdisk_id: dev.v_disk_id.as_ref().map(|id| id.id.clone()),
            capacity_kb: dev.capacity_in_kb,
        }
    }

    pub fn is_first_class(&self) -> bool {
        self.vdisk_id.is_some()
    }
}

/// Everything an FCD call needs to address a disk and put it back later
#[derive(Debug, Clone, PartialEq)]
pub struct DiskLocator {
    pub label: String,
    pub vdisk_id: String,
    pub datastore: ManagedObjectRef,
    pub datastore_name: String,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
}

/// All virtual disks in device order
pub fn disks(config: &VirtualMachineConfigInfo) -> Vec<VirtualDiskInfo> {
    config
        .hardware
        .device
        .iter()
        .filter(|d| d.is_disk())
        .map(VirtualDiskInfo::from_device)
        .collect()
}

pub fn find_disk(config: &VirtualMachineConfigInfo, number: u32) -> Result<VirtualDiskInfo> {
    let label = disk_label(number);
    config
        .hardware
        .device
        .iter()
        .filter(|d| d.is_disk())
        .find(|d| d.label() == Some(label.as_str()))
        .map(VirtualDiskInfo::from_device)
        .ok_or(Error::DiskNotFound(label))
}

/// Read the VM's configuration
pub async fn vm_config(vim: &dyn Vim, vm: &ManagedObjectRef) -> Result<VirtualMachineConfigInfo> {
    fetch(vim, vm, "config")
        .await?
        .ok_or_else(|| Error::Decode(format!("{vm} has no config")))
}

/// Resolve disk `number` of `vm` into a locator; the disk must be an FCD
pub async fn locate(vim: &dyn Vim, vm: &ManagedObjectRef, number: u32) -> Result<DiskLocator> {
    let config = vm_config(vim, vm).await?;
    let disk = find_disk(&config, number)?;
    let vdisk_id = disk
        .vdisk_id
        .clone()
        .ok_or_else(|| Error::NotFirstClass(disk.label.clone()))?;
    let datastore = disk
        .datastore
        .clone()
        .ok_or_else(|| Error::Decode(format!("{} has no datastore backing", disk.label)))?;
    let datastore_name = fetch::<String>(vim, &datastore, "name")
        .await?
        .ok_or_else(|| Error::DatastoreNotFound(datastore.value.clone()))?;

    tracing::info!(disk = %disk.label, vdisk_id = %vdisk_id, datastore = %datastore_name, "Located disk");

    Ok(DiskLocator {
        label: disk.label,
        vdisk_id,
        datastore,
        datastore_name,
        controller_key: disk.controller_key,
        unit_number: disk.unit_number,
    })
}

/// Split `[ds1] dir/file.vmdk` into `("ds1", "dir/file.vmdk")`
pub fn parse_datastore_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.trim().strip_prefix('[')?;
    let (datastore, file) = rest.split_once(']')?;
    let file = file.trim_start();
    if datastore.is_empty() || file.is_empty() {
        return None;
    }
    Some((datastore, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::{testing, MockVim};
    use serde_json::{json, Value};

    fn config() -> VirtualMachineConfigInfo {
        serde_json::from_value(testing::vm_config("")).unwrap()
    }

    #[test]
    fn test_disk_label() {
        assert_eq!(disk_label(3), "Hard disk 3");
    }

    #[test]
    fn test_disks_skip_other_devices() {
        let disks = disks(&config());
        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].label, "Hard disk 1");
        assert!(!disks[0].is_first_class());
        assert_eq!(disks[1].vdisk_id.as_deref(), Some("fcd-0002"));
        assert_eq!(disks[1].unit_number, Some(1));
    }

    #[test]
    fn test_find_disk() {
        let disk = find_disk(&config(), 1).unwrap();
        assert_eq!(disk.file_name.as_deref(), Some("[ds1] app01/app01.vmdk"));
        assert!(matches!(find_disk(&config(), 9), Err(Error::DiskNotFound(l)) if l == "Hard disk 9"));
    }

    #[test]
    fn test_label_is_not_a_prefix_match() {
        let config: VirtualMachineConfigInfo = serde_json::from_value(json!({
            "hardware": {"device": [testing::disk("Hard disk 10", 2009, 9, "[ds1] a/a_9.vmdk", None)]}
        }))
        .unwrap();
        assert!(find_disk(&config, 1).is_err());
        assert!(find_disk(&config, 10).is_ok());
    }

    #[test]
    fn test_parse_datastore_path() {
        assert_eq!(
            parse_datastore_path("[ds1] app01/app01_1.vmdk"),
            Some(("ds1", "app01/app01_1.vmdk"))
        );
        assert_eq!(
            parse_datastore_path("[vsan Datastore] 5f2a-1b/disk.vmdk"),
            Some(("vsan Datastore", "5f2a-1b/disk.vmdk"))
        );
        assert_eq!(parse_datastore_path("app01/app01.vmdk"), None);
        assert_eq!(parse_datastore_path("[ds1] "), None);
    }

    #[tokio::test]
    async fn test_locate_fcd() {
        let mut vim = MockVim::new();
        vim.expect_property()
            .returning(|obj, name| Ok(testing::properties(obj, name).unwrap_or(Value::Null)));

        let vm = ManagedObjectRef::new("VirtualMachine", "vm-42");
        let loc = locate(&vim, &vm, 2).await.unwrap();
        assert_eq!(loc.vdisk_id, "fcd-0002");
        assert_eq!(loc.datastore_name, "ds1");
        assert_eq!(loc.controller_key, Some(1000));
        assert_eq!(loc.unit_number, Some(1));

        assert!(matches!(
            locate(&vim, &vm, 1).await,
            Err(Error::NotFirstClass(l)) if l == "Hard disk 1"
        ));
    }
}
