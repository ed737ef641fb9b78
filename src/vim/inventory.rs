//! Inventory lookups: objects by name, datacenter of an object

use serde_json::{json, Value};

use super::types::RetrieveResult;
use super::{decode, fetch, ManagedObjectRef, Vim};
use crate::{Error, Result};

/// Find the first managed object of `kind` whose `name` is exactly `name`.
///
/// Scans every object of that kind under the root folder through a
/// container view, which is destroyed before returning.
pub async fn find_by_name(vim: &dyn Vim, kind: &str, name: &str) -> Result<Option<ManagedObjectRef>> {
    let content = vim.content();
    let view_manager = content
        .view_manager
        .as_ref()
        .ok_or_else(|| Error::Unsupported("endpoint has no ViewManager".into()))?;

    let view: ManagedObjectRef = decode(
        "CreateContainerView",
        vim.invoke(
            view_manager,
            "CreateContainerView",
            json!({
                "container": content.root_folder,
                "type": [kind],
                "recursive": true
            }),
        )
        .await?,
    )?;

    let found = scan_names(vim, &view, kind, name).await;

    if let Err(e) = vim.invoke(&view, "DestroyView", json!({})).await {
        tracing::warn!(view = %view.value, error = %e, "Failed to destroy container view");
    }

    let found = found?;
    tracing::debug!(kind, name, found = found.is_some(), "Inventory lookup");
    Ok(found)
}

async fn scan_names(
    vim: &dyn Vim,
    view: &ManagedObjectRef,
    kind: &str,
    name: &str,
) -> Result<Option<ManagedObjectRef>> {
    let collector = &vim.content().property_collector;
    let spec = json!({
        "_typeName": "PropertyFilterSpec",
        "propSet": [{"_typeName": "PropertySpec", "type": kind, "pathSet": ["name"]}],
        "objectSet": [{
            "_typeName": "ObjectSpec",
            "obj": view,
            "skip": true,
            "selectSet": [{
                "_typeName": "TraversalSpec",
                "name": "traverseView",
                "type": "ContainerView",
                "path": "view",
                "skip": false
            }]
        }]
    });

    let mut page = retrieve_page(
        vim.invoke(
            collector,
            "RetrievePropertiesEx",
            json!({"specSet": [spec], "options": {"_typeName": "RetrieveOptions"}}),
        )
        .await?,
    )?;

    loop {
        let hit = page
            .objects
            .iter()
            .find(|o| o.prop("name").and_then(Value::as_str) == Some(name))
            .map(|o| o.obj.clone());

        if let Some(obj) = hit {
            if let Some(token) = page.token.take() {
                if let Err(e) = vim
                    .invoke(collector, "CancelRetrievePropertiesEx", json!({"token": token}))
                    .await
                {
                    tracing::warn!(kind, error = %e, "Failed to cancel property retrieval");
                }
            }
            return Ok(Some(obj));
        }

        let Some(token) = page.token.take() else {
            return Ok(None);
        };
        page = retrieve_page(
            vim.invoke(collector, "ContinueRetrievePropertiesEx", json!({"token": token}))
                .await?,
        )?;
    }
}

/// An empty result set comes back as null
fn retrieve_page(value: Value) -> Result<RetrieveResult> {
    if value.is_null() {
        return Ok(RetrieveResult::default());
    }
    Ok(serde_json::from_value(value)?)
}

pub async fn find_vm(vim: &dyn Vim, name: &str) -> Result<ManagedObjectRef> {
    find_by_name(vim, "VirtualMachine", name)
        .await?
        .ok_or_else(|| Error::VmNotFound(name.to_string()))
}

pub async fn find_datastore(vim: &dyn Vim, name: &str) -> Result<ManagedObjectRef> {
    find_by_name(vim, "Datastore", name)
        .await?
        .ok_or_else(|| Error::DatastoreNotFound(name.to_string()))
}

/// Name of the datacenter containing `obj`, found by walking up `parent`
pub async fn datacenter_of(vim: &dyn Vim, obj: &ManagedObjectRef) -> Result<String> {
    let mut current = obj.clone();

    loop {
        let mut parent: Option<ManagedObjectRef> = fetch(vim, &current, "parent").await?;
        // VMs inside a vApp hang off parentVApp instead
        if parent.is_none() && current.is("VirtualMachine") {
            parent = fetch(vim, &current, "parentVApp").await?;
        }

        let Some(parent) = parent else {
            return Err(Error::DatacenterNotFound(obj.to_string()));
        };

        if parent.is("Datacenter") {
            return fetch::<String>(vim, &parent, "name")
                .await?
                .ok_or_else(|| Error::DatacenterNotFound(obj.to_string()));
        }
        current = parent;
    }
}
