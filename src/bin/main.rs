//! fcdctl - First Class Disk operations against vCenter

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tabled::{Table, Tabled};
use tracing_subscriber::EnvFilter;
use vsphere_fcd::config::{DEFAULT_API_RELEASE, DEFAULT_PORT};
use vsphere_fcd::{AttachRequest, ConnectionConfig, Error, FcdManager, PromotedDisk, Result, Vim, VimClient};

#[derive(Parser)]
#[command(name = "fcdctl")]
#[command(about = "Attach, detach, promote and snapshot First Class Disks through vCenter")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnArgs {
    /// vCenter host to connect to
    #[arg(short = 's', long, global = true, env = "VSPHERE_HOST")]
    host: Option<String>,
    /// Port to connect on
    #[arg(short = 'o', long, global = true, env = "VSPHERE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
    /// User name to use when connecting
    #[arg(short = 'u', long, global = true, env = "VSPHERE_USER")]
    user: Option<String>,
    /// Password; prompted for when not given
    #[arg(short = 'p', long, global = true, env = "VSPHERE_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Do not verify the server's TLS certificate
    #[arg(short = 'k', long, global = true, env = "VSPHERE_INSECURE")]
    insecure: bool,
    /// VI/JSON release segment of the API path
    #[arg(long, global = true, default_value = DEFAULT_API_RELEASE)]
    api_release: String,
    /// Give up on a task after this many seconds (0 waits forever)
    #[arg(long, global = true, default_value_t = 3600)]
    task_timeout: u64,
    /// Task poll interval in milliseconds
    #[arg(long, global = true, default_value_t = 1000)]
    poll_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the endpoint's product and API version
    About,
    /// Attach an existing First Class Disk to a VM
    Attach {
        /// VM name
        #[arg(short = 'v', long)]
        vm: String,
        /// Identifier of the FCD to attach
        #[arg(long, alias = "vdid")]
        disk_id: String,
        /// Datastore backing the FCD
        #[arg(long, alias = "ds")]
        datastore: String,
        /// Key of the controller the disk connects to
        #[arg(long)]
        controller_key: Option<i32>,
        /// Unit number of the disk on its controller
        #[arg(long)]
        unit_number: Option<i32>,
    },
    /// Detach a First Class Disk from a VM
    Detach {
        #[command(flatten)]
        target: DiskTarget,
    },
    /// Register virtual disks as First Class Disks
    Promote {
        /// VM name
        #[arg(short = 'v', long)]
        vm: String,
        /// Disk numbers, comma separated (e.g. 1,2,3)
        #[arg(short = 'd', long, value_delimiter = ',', required = true)]
        disks: Vec<u32>,
        /// Datacenter name (default: the VM's datacenter)
        #[arg(long)]
        datacenter: Option<String>,
    },
    /// List a VM's disks and their FCD ids
    Disks {
        /// VM name
        #[arg(short = 'v', long)]
        vm: String,
    },
    /// FCD snapshot operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Snapshot a disk
    Create {
        #[command(flatten)]
        target: DiskTarget,
        /// Snapshot description
        #[arg(long)]
        description: String,
    },
    /// Show VM-level and FCD-level snapshots
    List {
        #[command(flatten)]
        target: DiskTarget,
    },
    /// Delete a disk snapshot
    Delete {
        #[command(flatten)]
        target: DiskTarget,
        /// Snapshot id
        #[arg(long, alias = "snid")]
        snapshot_id: String,
    },
    /// Revert a disk to a snapshot (detaches and re-attaches the disk)
    Revert {
        #[command(flatten)]
        target: DiskTarget,
        /// Snapshot id
        #[arg(long, alias = "snid")]
        snapshot_id: String,
    },
}

#[derive(Args)]
struct DiskTarget {
    /// VM name
    #[arg(short = 'v', long)]
    vm: String,
    /// Disk number (the N in "Hard disk N")
    #[arg(short = 'd', long)]
    disk: u32,
}

#[derive(Tabled)]
struct DiskRow {
    #[tabled(rename = "Disk Label")]
    label: String,
    #[tabled(rename = "vDiskId")]
    vdisk_id: String,
    #[tabled(rename = "Capacity")]
    capacity: String,
    #[tabled(rename = "File")]
    file: String,
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Snapshot Id")]
    id: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vsphere_fcd=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = connection_config(&cli.conn)?;
    let client = VimClient::connect(&config).await?;

    let result = dispatch(&client, &config, cli.command).await;
    client.finish(result).await
}

async fn dispatch(client: &VimClient, config: &ConnectionConfig, command: Commands) -> Result<ExitCode> {
    let fcd = FcdManager::new(client, config);

    match command {
        Commands::About => cmd_about(client),
        Commands::Attach {
            vm,
            disk_id,
            datastore,
            controller_key,
            unit_number,
        } => {
            let req = AttachRequest {
                vm,
                vdisk_id: disk_id,
                datastore,
                controller_key,
                unit_number,
            };
            cmd_attach(&fcd, &req).await?;
        }
        Commands::Detach { target } => cmd_detach(&fcd, &target).await?,
        Commands::Promote { vm, disks, datacenter } => {
            return cmd_promote(&fcd, &vm, &disks, datacenter.as_deref()).await;
        }
        Commands::Disks { vm } => cmd_disks(&fcd, &vm).await?,
        Commands::Snapshot { action } => match action {
            SnapshotAction::Create { target, description } => {
                cmd_snapshot_create(&fcd, &target, &description).await?
            }
            SnapshotAction::List { target } => cmd_snapshot_list(&fcd, &target).await?,
            SnapshotAction::Delete { target, snapshot_id } => {
                cmd_snapshot_delete(&fcd, &target, &snapshot_id).await?
            }
            SnapshotAction::Revert { target, snapshot_id } => {
                cmd_snapshot_revert(&fcd, &target, &snapshot_id).await?
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

fn connection_config(args: &ConnArgs) -> Result<ConnectionConfig> {
    let host = args
        .host
        .clone()
        .ok_or_else(|| Error::Config("--host (or VSPHERE_HOST) is required".into()))?;
    let user = args
        .user
        .clone()
        .ok_or_else(|| Error::Config("--user (or VSPHERE_USER) is required".into()))?;
    let password = match &args.password {
        Some(p) => p.clone(),
        None => prompt_password(&host, &user)?,
    };

    ConnectionConfig::builder()
        .host(host)
        .port(args.port)
        .user(user)
        .password(password)
        .insecure(args.insecure)
        .api_release(args.api_release.clone())
        .poll_interval(Duration::from_millis(args.poll_ms))
        .task_timeout(match args.task_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        })
        .build_validated()
}

/// Prompts on the terminal without echoing the input
fn prompt_password(host: &str, user: &str) -> Result<String> {
    let password = rpassword::prompt_password(format!("Enter password for host {} and user {}: ", host, user))?;
    Ok(password)
}

fn cmd_about(client: &VimClient) {
    let about = &client.content().about;
    println!("Product:     {}", about.full_name);
    println!("API type:    {}", about.api_type);
    println!("API version: {}", about.api_version);
    if let Some(uuid) = &about.instance_uuid {
        println!("Instance:    {}", uuid);
    }
}

async fn cmd_attach(fcd: &FcdManager<'_>, req: &AttachRequest) -> Result<()> {
    println!("Attaching disk {} from datastore {} to VM '{}'...", req.vdisk_id, req.datastore, req.vm);
    fcd.attach(req).await?;
    println!("Attached.");
    Ok(())
}

async fn cmd_detach(fcd: &FcdManager<'_>, target: &DiskTarget) -> Result<()> {
    println!("Detaching disk {} from VM '{}'...", target.disk, target.vm);
    let disk = fcd.detach(&target.vm, target.disk).await?;
    println!("Detached {} (vDiskId {}, datastore {}).", disk.label, disk.vdisk_id, disk.datastore_name);
    Ok(())
}

async fn cmd_promote(fcd: &FcdManager<'_>, vm: &str, disks: &[u32], datacenter: Option<&str>) -> Result<ExitCode> {
    let results = fcd.promote(vm, disks, datacenter).await?;

    for (number, result) in &results {
        match result {
            Ok(disk) => println!("Hard disk {} promoted to FCD: {}", number, disk.vdisk_id),
            Err(Error::AlreadyFirstClass { id, .. }) => {
                println!("Hard disk {} skipped, already a FCD: {}", number, id)
            }
            Err(e) => println!("Hard disk {} not promoted: {}", number, e),
        }
    }

    let failed = promote_failures(&results);
    if failed > 0 {
        println!("\n{} of {} disks not promoted.", failed, results.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// Disks that failed; ones already registered are skips, not failures
fn promote_failures(results: &[(u32, Result<PromotedDisk>)]) -> usize {
    results
        .iter()
        .filter(|(_, r)| !matches!(r, Ok(_) | Err(Error::AlreadyFirstClass { .. })))
        .count()
}

async fn cmd_disks(fcd: &FcdManager<'_>, vm: &str) -> Result<()> {
    let disks = fcd.disks(vm).await?;
    if disks.is_empty() {
        println!("The VM does not contain any disk.");
        return Ok(());
    }

    let rows: Vec<DiskRow> = disks
        .into_iter()
        .map(|d| DiskRow {
            label: d.label,
            vdisk_id: d.vdisk_id.unwrap_or_else(|| "not a FCD disk".to_string()),
            capacity: d
                .capacity_kb
                .map(|kb| format!("{} MB", kb / 1024))
                .unwrap_or_else(|| "-".to_string()),
            file: d.file_name.unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

async fn cmd_snapshot_create(fcd: &FcdManager<'_>, target: &DiskTarget, description: &str) -> Result<()> {
    println!("Snapshotting disk {} of VM '{}'...", target.disk, target.vm);
    let id = fcd.create_snapshot(&target.vm, target.disk, description).await?;
    println!("Snapshot created: {}", id);
    Ok(())
}

async fn cmd_snapshot_list(fcd: &FcdManager<'_>, target: &DiskTarget) -> Result<()> {
    let report = fcd.list_snapshots(&target.vm, target.disk).await?;

    println!("VM-level snapshots of '{}':", report.vm);
    if report.vm_snapshots.is_empty() {
        println!("  none");
    }
    for s in &report.vm_snapshots {
        println!(
            "  {}{} | created {} | state {} | {}",
            "  ".repeat(s.depth),
            s.name,
            s.create_time.format("%Y-%m-%d %H:%M:%S UTC"),
            s.state,
            s.description
        );
    }

    println!("\nFCD snapshots of {} ({}):", report.disk.label, report.disk.vdisk_id);
    if report.disk_snapshots.is_empty() {
        println!("  none");
        return Ok(());
    }

    let rows: Vec<SnapshotRow> = report
        .disk_snapshots
        .iter()
        .enumerate()
        .map(|(i, s)| SnapshotRow {
            index: i + 1,
            description: s.description.clone(),
            created: s.create_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            id: s.id.clone(),
        })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

async fn cmd_snapshot_delete(fcd: &FcdManager<'_>, target: &DiskTarget, snapshot_id: &str) -> Result<()> {
    println!("Deleting snapshot {} of disk {}...", snapshot_id, target.disk);
    fcd.delete_snapshot(&target.vm, target.disk, snapshot_id).await?;
    println!("Deleted.");
    Ok(())
}

async fn cmd_snapshot_revert(fcd: &FcdManager<'_>, target: &DiskTarget, snapshot_id: &str) -> Result<()> {
    println!("Reverting disk {} of VM '{}' to snapshot {}...", target.disk, target.vm, snapshot_id);
    let disk = fcd.revert_snapshot(&target.vm, target.disk, snapshot_id).await?;
    println!("Reverted {} and attached it back.", disk.label);
    println!("The guest must be rebooted to see the reverted contents.");
    Ok(())
}
