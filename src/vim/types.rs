//! VI/JSON data objects used by the FCD operations
//!
//! Only the fields these tools read are modelled; unknown fields are ignored
//! on decode.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Reference to a server-side managed object (`vm-42`, `datastore-12`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct ManagedObjectRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl ManagedObjectRef {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl Serialize for ManagedObjectRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ManagedObjectReference", 3)?;
        s.serialize_field("_typeName", "ManagedObjectReference")?;
        s.serialize_field("type", &self.kind)?;
        s.serialize_field("value", &self.value)?;
        s.end()
    }
}

impl std::fmt::Display for ManagedObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// vStorage object identifier (`vim.vslm.ID`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObjectId {
    pub id: String,
}

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ID", 2)?;
        s.serialize_field("_typeName", "ID")?;
        s.serialize_field("id", &self.id)?;
        s.end()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub api_type: String,
    #[serde(default)]
    pub api_version: String,
    pub instance_uuid: Option<String>,
}

/// Entry points of the API, read once per connection
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: ManagedObjectRef,
    pub property_collector: ManagedObjectRef,
    pub view_manager: Option<ManagedObjectRef>,
    pub session_manager: Option<ManagedObjectRef>,
    pub v_storage_object_manager: Option<ManagedObjectRef>,
    #[serde(default)]
    pub about: AboutInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Success => write!(f, "success"),
            TaskState::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedMethodFault {
    pub localized_message: Option<String>,
    pub fault: Option<Value>,
}

impl LocalizedMethodFault {
    /// Human readable reason, falling back to the fault type name
    pub fn message(&self) -> String {
        if let Some(msg) = self.localized_message.as_deref().filter(|m| !m.is_empty()) {
            return msg.to_string();
        }
        self.fault
            .as_ref()
            .and_then(|f| f.get("_typeName"))
            .and_then(|t| t.as_str())
            .unwrap_or("unknown fault")
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    #[serde(default)]
    pub key: String,
    pub state: TaskState,
    pub description_id: Option<String>,
    pub progress: Option<i32>,
    pub error: Option<LocalizedMethodFault>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub summary: String,
}

/// Device backing; the disk fields are absent for other device kinds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBacking {
    #[serde(rename = "_typeName", default)]
    pub type_name: String,
    pub file_name: Option<String>,
    pub datastore: Option<ManagedObjectRef>,
    pub disk_mode: Option<String>,
}

/// Entry of `config.hardware.device`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualDevice {
    #[serde(rename = "_typeName", default)]
    pub type_name: String,
    pub key: i32,
    pub device_info: Option<Description>,
    pub controller_key: Option<i32>,
    pub unit_number: Option<i32>,
    pub backing: Option<DeviceBacking>,
    pub v_disk_id: Option<ObjectId>,
    #[serde(rename = "capacityInKB")]
    pub capacity_in_kb: Option<i64>,
}

impl VirtualDevice {
    pub fn is_disk(&self) -> bool {
        self.type_name == "VirtualDisk"
    }

    pub fn label(&self) -> Option<&str> {
        self.device_info.as_ref().map(|d| d.label.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VirtualHardware {
    #[serde(default)]
    pub device: Vec<VirtualDevice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineConfigInfo {
    #[serde(default)]
    pub name: String,
    pub annotation: Option<String>,
    #[serde(default)]
    pub hardware: VirtualHardware,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotTree {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub create_time: DateTime<Utc>,
    pub state: String,
    #[serde(default)]
    pub child_snapshot_list: Vec<VirtualMachineSnapshotTree>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotInfo {
    #[serde(default)]
    pub root_snapshot_list: Vec<VirtualMachineSnapshotTree>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VStorageObjectConfig {
    pub id: ObjectId,
    pub name: Option<String>,
    #[serde(rename = "capacityInMB")]
    pub capacity_in_mb: Option<i64>,
}

/// Result of `RegisterDisk`
#[derive(Debug, Clone, Deserialize)]
pub struct VStorageObject {
    pub config: VStorageObjectConfig,
}

/// Result of `VStorageObjectCreateSnapshot_Task`
#[derive(Debug, Clone, Deserialize)]
pub struct VStorageObjectSnapshot {
    pub id: ObjectId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VStorageObjectSnapshotDetail {
    pub id: ObjectId,
    pub backing_object_id: Option<String>,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VStorageObjectSnapshotInfo {
    #[serde(default)]
    pub snapshots: Vec<VStorageObjectSnapshotDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DynamicProperty {
    pub name: String,
    pub val: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectContent {
    pub obj: ManagedObjectRef,
    #[serde(default)]
    pub prop_set: Vec<DynamicProperty>,
}

impl ObjectContent {
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.prop_set.iter().find(|p| p.name == name).map(|p| &p.val)
    }
}

/// One page of `RetrievePropertiesEx`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrieveResult {
    pub token: Option<String>,
    #[serde(default)]
    pub objects: Vec<ObjectContent>,
}
