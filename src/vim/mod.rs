//! Low-level vSphere management API wrappers
//!
//! [`Vim`] is the seam between the FCD operations and the wire: the real
//! implementation is [`VimClient`], tests substitute a mock.

pub mod client;
pub mod inventory;
pub mod task;
pub mod types;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use client::VimClient;
pub use task::wait_for_task;
pub use types::{ManagedObjectRef, ObjectId, ServiceContent, TaskInfo, TaskState};

use crate::Result;

/// Method invocation and property access on managed objects
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Vim: Send + Sync {
    /// Service content read at connect time
    fn content(&self) -> &ServiceContent;

    /// Invoke `method` on `obj` with named arguments; void methods yield `Value::Null`
    async fn invoke(&self, obj: &ManagedObjectRef, method: &str, args: Value) -> Result<Value>;

    /// Read a top-level property; unset properties yield `Value::Null`
    async fn property(&self, obj: &ManagedObjectRef, name: &str) -> Result<Value>;
}

/// Read a property and decode it, `None` when unset
pub async fn fetch<T: DeserializeOwned>(
    vim: &dyn Vim,
    obj: &ManagedObjectRef,
    name: &str,
) -> Result<Option<T>> {
    match vim.property(obj, name).await? {
        Value::Null => Ok(None),
        value => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// Decode a method result that must be present
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    if value.is_null() {
        return Err(crate::Error::Decode(format!("{method} returned no value")));
    }
    Ok(serde_json::from_value(value)?)
}
