//! FCD-level snapshots: create, list, delete and revert

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::disk::{self, DiskLocator};
use crate::fcd::FcdManager;
use crate::vim::task::run_task;
use crate::vim::types::{
    VStorageObjectSnapshot, VStorageObjectSnapshotInfo, VirtualMachineSnapshotInfo,
    VirtualMachineSnapshotTree,
};
use crate::vim::{fetch, ManagedObjectRef, ObjectId};
use crate::{Error, Result};

/// A VM-level snapshot, flattened from the snapshot tree
#[derive(Debug, Clone, PartialEq)]
pub struct VmSnapshot {
    /// 0 for roots, +1 per level
    pub depth: usize,
    pub name: String,
    pub description: String,
    pub create_time: DateTime<Utc>,
    pub state: String,
}

/// A snapshot of a First Class Disk
#[derive(Debug, Clone, PartialEq)]
pub struct DiskSnapshot {
    pub id: String,
    pub description: String,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub vm: String,
    pub disk: DiskLocator,
    pub vm_snapshots: Vec<VmSnapshot>,
    pub disk_snapshots: Vec<DiskSnapshot>,
}

/// Depth-first walk of the VM snapshot tree
pub fn flatten_tree(roots: &[VirtualMachineSnapshotTree]) -> Vec<VmSnapshot> {
    fn walk(nodes: &[VirtualMachineSnapshotTree], depth: usize, out: &mut Vec<VmSnapshot>) {
        for node in nodes {
            out.push(VmSnapshot {
                depth,
                name: node.name.clone(),
                description: node.description.clone(),
                create_time: node.create_time,
                state: node.state.clone(),
            });
            walk(&node.child_snapshot_list, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    walk(roots, 0, &mut out);
    out
}

impl FcdManager<'_> {
    fn storage_manager(&self) -> Result<&ManagedObjectRef> {
        self.vim
            .content()
            .v_storage_object_manager
            .as_ref()
            .ok_or_else(|| Error::Unsupported("endpoint has no VStorageObjectManager".into()))
    }

    async fn resolve(&self, vm_name: &str, number: u32) -> Result<(ManagedObjectRef, DiskLocator)> {
        let vm = self.find_vm(vm_name).await?;
        let disk = disk::locate(self.vim, &vm, number).await?;
        Ok((vm, disk))
    }

    /// Snapshot disk `number` of the VM; returns the new snapshot id
    pub async fn create_snapshot(&self, vm_name: &str, number: u32, description: &str) -> Result<String> {
        if description.trim().is_empty() {
            return Err(Error::Config("snapshot description cannot be empty".into()));
        }
        let manager = self.storage_manager()?;
        let (_, disk) = self.resolve(vm_name, number).await?;

        tracing::info!(vm = %vm_name, disk = %disk.label, "Creating FCD snapshot");
        let task = self
            .vim
            .invoke(
                manager,
                "VStorageObjectCreateSnapshot_Task",
                json!({
                    "id": ObjectId::new(&disk.vdisk_id),
                    "datastore": disk.datastore,
                    "description": description
                }),
            )
            .await?;
        let info = run_task(self.vim, "VStorageObjectCreateSnapshot_Task", task, &self.policy).await?;

        let snapshot: VStorageObjectSnapshot = info
            .result
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| Error::Decode("snapshot task returned no snapshot".into()))?;

        tracing::info!(disk = %disk.label, snapshot = %snapshot.id.id, "Snapshot created");
        Ok(snapshot.id.id)
    }

    /// VM-level snapshots and the FCD snapshots of disk `number`
    pub async fn list_snapshots(&self, vm_name: &str, number: u32) -> Result<SnapshotReport> {
        let manager = self.storage_manager()?;
        let (vm, disk) = self.resolve(vm_name, number).await?;

        let vm_snapshots = fetch::<VirtualMachineSnapshotInfo>(self.vim, &vm, "snapshot")
            .await?
            .map(|info| flatten_tree(&info.root_snapshot_list))
            .unwrap_or_default();

        let info: VStorageObjectSnapshotInfo = match self
            .vim
            .invoke(
                manager,
                "RetrieveSnapshotInfo",
                json!({"id": ObjectId::new(&disk.vdisk_id), "datastore": disk.datastore}),
            )
            .await?
        {
            serde_json::Value::Null => VStorageObjectSnapshotInfo::default(),
            value => serde_json::from_value(value)?,
        };

        let disk_snapshots = info
            .snapshots
            .into_iter()
            .map(|s| DiskSnapshot {
                id: s.id.id,
                description: s.description,
                create_time: s.create_time,
            })
            .collect();

        Ok(SnapshotReport {
            vm: vm_name.to_string(),
            disk,
            vm_snapshots,
            disk_snapshots,
        })
    }

    pub async fn delete_snapshot(&self, vm_name: &str, number: u32, snapshot_id: &str) -> Result<()> {
        let manager = self.storage_manager()?;
        let (_, disk) = self.resolve(vm_name, number).await?;

        tracing::info!(disk = %disk.label, snapshot = %snapshot_id, "Deleting FCD snapshot");
        let task = self
            .vim
            .invoke(
                manager,
                "DeleteSnapshot_Task",
                json!({
                    "id": ObjectId::new(&disk.vdisk_id),
                    "datastore": disk.datastore,
                    "snapshotId": ObjectId::new(snapshot_id)
                }),
            )
            .await?;
        run_task(self.vim, "DeleteSnapshot_Task", task, &self.policy).await?;
        Ok(())
    }

    /// Revert disk `number` to `snapshot_id`.
    ///
    /// An attached FCD cannot be reverted, so the disk is detached first and
    /// attached back at the same controller slot afterwards, also when the
    /// revert itself fails. The guest only sees the reverted contents after a
    /// reboot.
    pub async fn revert_snapshot(&self, vm_name: &str, number: u32, snapshot_id: &str) -> Result<DiskLocator> {
        let manager = self.storage_manager()?;
        let (vm, disk) = self.resolve(vm_name, number).await?;

        self.detach_from(&vm, &disk).await?;
        tracing::info!(
            disk = %disk.label,
            vdisk_id = %disk.vdisk_id,
            datastore = %disk.datastore_name,
            controller_key = ?disk.controller_key,
            unit_number = ?disk.unit_number,
            "Detached for revert"
        );

        let reverted = self.revert_detached(manager, &disk, snapshot_id).await;
        if let Err(e) = &reverted {
            tracing::warn!(disk = %disk.label, snapshot = %snapshot_id, error = %e, "Revert failed, attaching disk back");
        }

        if let Err(e) = self
            .attach_to(&vm, &disk.vdisk_id, &disk.datastore, disk.controller_key, disk.unit_number)
            .await
        {
            return Err(Error::Reattach {
                disk: disk.label.clone(),
                revert: reverted.err().map(Box::new),
                source: Box::new(e),
            });
        }
        tracing::info!(disk = %disk.label, "Disk attached back");

        reverted?;
        Ok(disk)
    }

    async fn revert_detached(&self, manager: &ManagedObjectRef, disk: &DiskLocator, snapshot_id: &str) -> Result<()> {
        tracing::info!(disk = %disk.label, snapshot = %snapshot_id, "Reverting FCD");
        let task = self
            .vim
            .invoke(
                manager,
                "RevertVStorageObject_Task",
                json!({
                    "id": ObjectId::new(&disk.vdisk_id),
                    "datastore": disk.datastore,
                    "snapshotId": ObjectId::new(snapshot_id)
                }),
            )
            .await?;
        run_task(self.vim, "RevertVStorageObject_Task", task, &self.policy).await?;
        Ok(())
    }
}
