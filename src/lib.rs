//! vSphere First Class Disk tooling
//!
//! Attach, detach and promote First Class Disks (FCDs) on vCenter-managed
//! virtual machines, and create, list, delete and revert FCD snapshots.
//! Calls go over the vSphere Web Services JSON protocol; every long-running
//! operation is a vCenter task that is polled until it finishes.
//!
//! # Example
//!
//! ```no_run
//! use vsphere_fcd::{ConnectionConfig, FcdManager, VimClient};
//!
//! # async fn run() -> vsphere_fcd::Result<()> {
//! let config = ConnectionConfig::builder()
//!     .host("vcenter.example.com")
//!     .user("administrator@vsphere.local")
//!     .password("secret")
//!     .build_validated()?;
//!
//! let client = VimClient::connect(&config).await?;
//! let fcd = FcdManager::new(&client, &config);
//!
//! let snapshot_id = fcd.create_snapshot("app01", 2, "before upgrade").await?;
//! fcd.revert_snapshot("app01", 2, &snapshot_id).await?;
//!
//! client.logout().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod disk;
pub mod error;
pub mod fcd;
pub mod snapshot;
pub mod vim;

pub use config::{ConnectionConfig, TaskPolicy};
pub use disk::{DiskLocator, VirtualDiskInfo};
pub use error::{Error, Result};
pub use fcd::{AttachRequest, FcdManager, PromotedDisk};
pub use snapshot::{DiskSnapshot, SnapshotReport, VmSnapshot};
pub use vim::{Vim, VimClient};
