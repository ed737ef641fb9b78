//! First Class Disk operations on a VM: attach, detach, promote, list

use reqwest::Url;
use serde_json::json;

use crate::config::{ConnectionConfig, TaskPolicy};
use crate::disk::{self, DiskLocator, VirtualDiskInfo};
use crate::vim::task::run_task;
use crate::vim::types::VStorageObject;
use crate::vim::{decode, inventory, ManagedObjectRef, ObjectId, Vim};
use crate::{Error, Result};

/// Where to attach an FCD; vCenter picks a slot when controller/unit are unset
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub vm: String,
    pub vdisk_id: String,
    pub datastore: String,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
}

/// A disk registered as FCD by [`FcdManager::promote`]
#[derive(Debug, Clone, PartialEq)]
pub struct PromotedDisk {
    pub number: u32,
    pub label: String,
    pub vdisk_id: String,
}

/// Runs FCD operations over one authenticated session
pub struct FcdManager<'a> {
    pub(crate) vim: &'a dyn Vim,
    pub(crate) policy: TaskPolicy,
    host: String,
}

impl<'a> FcdManager<'a> {
    pub fn new(vim: &'a dyn Vim, config: &ConnectionConfig) -> Self {
        Self {
            vim,
            policy: config.task_policy(),
            host: config.host.trim().to_string(),
        }
    }

    pub async fn find_vm(&self, name: &str) -> Result<ManagedObjectRef> {
        tracing::info!(vm = %name, "Searching for VM");
        inventory::find_vm(self.vim, name).await
    }

    /// Attach an existing FCD to a VM by name
    pub async fn attach(&self, req: &AttachRequest) -> Result<()> {
        let vm = self.find_vm(&req.vm).await?;
        let datastore = inventory::find_datastore(self.vim, &req.datastore).await?;
        self.attach_to(&vm, &req.vdisk_id, &datastore, req.controller_key, req.unit_number)
            .await?;
        tracing::info!(vm = %req.vm, vdisk_id = %req.vdisk_id, "Attached disk");
        Ok(())
    }

    pub(crate) async fn attach_to(
        &self,
        vm: &ManagedObjectRef,
        vdisk_id: &str,
        datastore: &ManagedObjectRef,
        controller_key: Option<i32>,
        unit_number: Option<i32>,
    ) -> Result<()> {
        let mut args = json!({
            "diskId": ObjectId::new(vdisk_id),
            "datastore": datastore,
        });
        if let Some(key) = controller_key {
            args["controllerKey"] = json!(key);
        }
        if let Some(unit) = unit_number {
            args["unitNumber"] = json!(unit);
        }

        tracing::info!(vm = %vm.value, vdisk_id, "Attaching disk");
        let task = self.vim.invoke(vm, "AttachDisk_Task", args).await?;
        run_task(self.vim, "AttachDisk_Task", task, &self.policy).await?;
        Ok(())
    }

    /// Detach disk `number` from the VM; returns what is needed to re-attach it
    pub async fn detach(&self, vm_name: &str, number: u32) -> Result<DiskLocator> {
        let vm = self.find_vm(vm_name).await?;
        let locator = disk::locate(self.vim, &vm, number).await?;
        self.detach_from(&vm, &locator).await?;
        Ok(locator)
    }

    pub(crate) async fn detach_from(&self, vm: &ManagedObjectRef, disk: &DiskLocator) -> Result<()> {
        tracing::info!(vm = %vm.value, disk = %disk.label, vdisk_id = %disk.vdisk_id, "Detaching disk");
        let task = self
            .vim
            .invoke(vm, "DetachDisk_Task", json!({"diskId": ObjectId::new(&disk.vdisk_id)}))
            .await?;
        run_task(self.vim, "DetachDisk_Task", task, &self.policy).await?;
        Ok(())
    }

    /// List the VM's virtual disks with their FCD ids
    pub async fn disks(&self, vm_name: &str) -> Result<Vec<VirtualDiskInfo>> {
        let vm = self.find_vm(vm_name).await?;
        let config = disk::vm_config(self.vim, &vm).await?;
        Ok(disk::disks(&config))
    }

    /// Register each listed disk as an FCD and note its id in the VM annotation.
    ///
    /// Disks are processed independently; one result per requested number.
    /// `datacenter` defaults to the datacenter containing the VM.
    pub async fn promote(
        &self,
        vm_name: &str,
        numbers: &[u32],
        datacenter: Option<&str>,
    ) -> Result<Vec<(u32, Result<PromotedDisk>)>> {
        let vm = self.find_vm(vm_name).await?;
        let datacenter = match datacenter {
            Some(dc) => dc.to_string(),
            None => inventory::datacenter_of(self.vim, &vm).await?,
        };
        tracing::info!(vm = %vm_name, datacenter = %datacenter, disks = ?numbers, "Promoting disks to FCD");

        let mut results = Vec::with_capacity(numbers.len());
        for &number in numbers {
            let result = self.promote_one(&vm, number, &datacenter).await;
            if let Err(e) = &result {
                tracing::warn!(vm = %vm_name, disk = number, error = %e, "Disk not promoted");
            }
            results.push((number, result));
        }
        Ok(results)
    }

    async fn promote_one(&self, vm: &ManagedObjectRef, number: u32, datacenter: &str) -> Result<PromotedDisk> {
        let manager = self
            .vim
            .content()
            .v_storage_object_manager
            .as_ref()
            .ok_or_else(|| Error::Unsupported("endpoint has no VStorageObjectManager".into()))?;

        let config = disk::vm_config(self.vim, vm).await?;
        let disk = disk::find_disk(&config, number)?;
        if let Some(id) = &disk.vdisk_id {
            return Err(Error::AlreadyFirstClass {
                label: disk.label.clone(),
                id: id.clone(),
            });
        }

        let file_name = disk
            .file_name
            .as_deref()
            .ok_or_else(|| Error::Unsupported(format!("{} is not file backed", disk.label)))?;
        let path = register_path(&self.host, datacenter, file_name)?;

        tracing::info!(disk = %disk.label, path = %path, "Registering disk");
        let object: VStorageObject = decode(
            "RegisterDisk",
            self.vim
                .invoke(manager, "RegisterDisk", json!({"path": path.as_str()}))
                .await?,
        )?;
        let vdisk_id = object.config.id.id;

        let annotation = format!(
            "{}{}",
            config.annotation.unwrap_or_default(),
            annotation_note(number, &vdisk_id)
        );
        let task = self
            .vim
            .invoke(
                vm,
                "ReconfigVM_Task",
                json!({"spec": {"_typeName": "VirtualMachineConfigSpec", "annotation": annotation}}),
            )
            .await?;
        run_task(self.vim, "ReconfigVM_Task", task, &self.policy).await?;

        tracing::info!(disk = %disk.label, vdisk_id = %vdisk_id, "Promoted to FCD");
        Ok(PromotedDisk {
            number,
            label: disk.label,
            vdisk_id,
        })
    }
}

/// Line appended to the VM annotation for each promoted disk
pub fn annotation_note(number: u32, vdisk_id: &str) -> String {
    format!("FCD Disk {number} id : {vdisk_id}\n")
}

/// Datastore file URL accepted by `RegisterDisk`:
/// `https://{host}/folder/{path}?dcPath={dc}&dsName={ds}`
pub fn register_path(host: &str, datacenter: &str, file_name: &str) -> Result<Url> {
    let (datastore, path) = disk::parse_datastore_path(file_name)
        .ok_or_else(|| Error::Decode(format!("not a datastore path: {file_name}")))?;

    let mut url = Url::parse(&format!("https://{host}/folder"))
        .map_err(|e| Error::Config(format!("invalid host {host}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("invalid host {host}")))?
        .extend(path.split('/'));
    url.query_pairs_mut()
        .append_pair("dcPath", datacenter)
        .append_pair("dsName", datastore);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vim::{testing, MockVim};
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> ConnectionConfig {
        ConnectionConfig::builder()
            .host("vc.lab.local")
            .user("administrator@vsphere.local")
            .password("secret")
            .poll_interval(Duration::from_millis(1))
            .build()
    }

    /// Inventory plus FCD methods; every call lands in `log`
    fn mock(log: testing::CallLog, annotation: &'static str) -> MockVim {
        let mut vim = MockVim::new();
        vim.expect_content().return_const(testing::content());

        let invoke_log = log.clone();
        vim.expect_invoke().returning(move |obj, method, args| {
            testing::record(&invoke_log, obj, method);
            if let Some(v) = testing::inventory(obj, method, &args) {
                return Ok(v);
            }
            match method {
                "AttachDisk_Task" | "DetachDisk_Task" | "ReconfigVM_Task" => {
                    invoke_log.lock().push(format!("args {args}"));
                    Ok(testing::task_ref("task-1"))
                }
                "RegisterDisk" => {
                    invoke_log.lock().push(format!("args {args}"));
                    Ok(json!({"_typeName": "VStorageObject", "config": {"id": {"_typeName": "ID", "id": "fcd-new"}}}))
                }
                other => Err(Error::Decode(format!("unexpected {other}"))),
            }
        });
        vim.expect_property().returning(move |obj, name| {
            Ok(match (obj.value.as_str(), name) {
                ("task-1", "info") => testing::task_success(None),
                ("vm-42", "config") => testing::vm_config(annotation),
                _ => testing::properties(obj, name).unwrap_or(Value::Null),
            })
        });
        vim
    }

    fn new_log() -> testing::CallLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_register_path() {
        let url = register_path("vc.lab.local", "DC-West", "[ds1] app01/app01_1.vmdk").unwrap();
        assert_eq!(
            url.as_str(),
            "https://vc.lab.local/folder/app01/app01_1.vmdk?dcPath=DC-West&dsName=ds1"
        );
    }

    #[test]
    fn test_register_path_encodes_names() {
        let url = register_path("vc.lab.local", "DC West", "[vsan Datastore] a b/c.vmdk").unwrap();
        assert_eq!(url.path(), "/folder/a%20b/c.vmdk");
        assert_eq!(url.query(), Some("dcPath=DC+West&dsName=vsan+Datastore"));
    }

    #[test]
    fn test_annotation_note() {
        assert_eq!(annotation_note(2, "abc"), "FCD Disk 2 id : abc\n");
    }

    #[tokio::test]
    async fn test_attach_resolves_names() {
        let log = new_log();
        let vim = mock(log.clone(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        fcd.attach(&AttachRequest {
            vm: "app01".into(),
            vdisk_id: "fcd-0009".into(),
            datastore: "ds1".into(),
            controller_key: Some(1000),
            unit_number: Some(3),
        })
        .await
        .unwrap();

        let ops = testing::operations(&log);
        assert_eq!(ops[0], "VirtualMachine:vm-42/AttachDisk_Task");
        let args = &ops[1];
        assert!(args.contains(r#""id":"fcd-0009""#), "{args}");
        assert!(args.contains(r#""value":"datastore-12""#), "{args}");
        assert!(args.contains(r#""controllerKey":1000"#), "{args}");
        assert!(args.contains(r#""unitNumber":3"#), "{args}");
    }

    #[tokio::test]
    async fn test_attach_without_slot() {
        let log = new_log();
        let vim = mock(log.clone(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        fcd.attach(&AttachRequest {
            vm: "app01".into(),
            vdisk_id: "fcd-0009".into(),
            datastore: "ds1".into(),
            controller_key: None,
            unit_number: None,
        })
        .await
        .unwrap();

        let args = &testing::operations(&log)[1];
        assert!(!args.contains("controllerKey"));
        assert!(!args.contains("unitNumber"));
    }

    #[tokio::test]
    async fn test_attach_unknown_datastore() {
        let vim = mock(new_log(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        let err = fcd
            .attach(&AttachRequest {
                vm: "app01".into(),
                vdisk_id: "fcd-0009".into(),
                datastore: "nope".into(),
                controller_key: None,
                unit_number: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DatastoreNotFound(_)));
    }

    #[tokio::test]
    async fn test_detach_fcd() {
        let log = new_log();
        let vim = mock(log.clone(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        let loc = fcd.detach("app01", 2).await.unwrap();
        assert_eq!(loc.vdisk_id, "fcd-0002");
        assert_eq!(loc.datastore_name, "ds1");

        let ops = testing::operations(&log);
        assert_eq!(ops[0], "VirtualMachine:vm-42/DetachDisk_Task");
        assert!(ops[1].contains(r#""id":"fcd-0002""#));
    }

    #[tokio::test]
    async fn test_detach_plain_disk_is_refused() {
        let log = new_log();
        let vim = mock(log.clone(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        assert!(matches!(fcd.detach("app01", 1).await, Err(Error::NotFirstClass(_))));
        assert!(testing::operations(&log).is_empty());
    }

    #[tokio::test]
    async fn test_detach_unknown_vm() {
        let vim = mock(new_log(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);
        assert!(matches!(fcd.detach("db01", 1).await, Err(Error::VmNotFound(_))));
    }

    #[tokio::test]
    async fn test_disks_listing() {
        let vim = mock(new_log(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        let disks = fcd.disks("app01").await.unwrap();
        let ids: Vec<_> = disks.iter().map(|d| d.vdisk_id.as_deref()).collect();
        assert_eq!(ids, vec![None, Some("fcd-0002")]);
    }

    #[tokio::test]
    async fn test_promote_registers_and_annotates() {
        let log = new_log();
        let vim = mock(log.clone(), "owner: ops\n");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        let results = fcd.promote("app01", &[1], None).await.unwrap();
        assert_eq!(results.len(), 1);
        let promoted = results[0].1.as_ref().unwrap();
        assert_eq!(promoted.label, "Hard disk 1");
        assert_eq!(promoted.vdisk_id, "fcd-new");

        let ops = testing::operations(&log);
        assert_eq!(ops[0], "VcenterVStorageObjectManager:VStorageObjectManager/RegisterDisk");
        assert!(ops[1].contains("https://vc.lab.local/folder/app01/app01.vmdk?dcPath=DC-West&dsName=ds1"));
        assert_eq!(ops[2], "VirtualMachine:vm-42/ReconfigVM_Task");
        assert!(ops[3].contains(r#""annotation":"owner: ops\nFCD Disk 1 id : fcd-new\n""#), "{}", ops[3]);
    }

    #[tokio::test]
    async fn test_promote_continues_past_failures() {
        let log = new_log();
        let vim = mock(log.clone(), "");
        let cfg = config();
        let fcd = FcdManager::new(&vim, &cfg);

        let results = fcd.promote("app01", &[2, 7, 1], Some("DC-Other")).await.unwrap();
        assert!(matches!(results[0], (2, Err(Error::AlreadyFirstClass { .. }))));
        assert!(matches!(results[1], (7, Err(Error::DiskNotFound(_)))));
        assert!(matches!(results[2], (1, Ok(_))));

        let ops = testing::operations(&log);
        assert!(ops[1].contains("dcPath=DC-Other"));
    }
}
