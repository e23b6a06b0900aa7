use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use lioadm::{
    target_admin, target_volume_id, ChapAuth, Config, Connector, HostExecutor, LioAdm,
    RequestContext, VolumeStore, YamlVolumeStore,
};

#[derive(Parser, Debug)]
#[command(name = "lioadmcli")]
#[command(about = "Manage LIO iSCSI exports through cinder-rtstool", long_about = None)]
struct Args {
    /// Configuration file (yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Volume records (yaml)
    #[arg(short, long, default_value = "/var/lib/lioadm/volumes.yml")]
    volumes: PathBuf,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check that rtstool is usable
    Verify,
    /// List targets known to LIO
    Targets,
    /// Create a target for a backing device
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        path: String,
        /// "<method> <username> <password>"
        #[arg(long)]
        chap: Option<String>,
    },
    /// Remove the target of a volume
    Remove {
        #[arg(long)]
        volume_id: String,
        #[arg(long)]
        volume_name: String,
    },
    /// Check that a target exists
    Show {
        #[arg(long)]
        iqn: String,
    },
    /// Re-assert the export of a volume
    Ensure {
        #[arg(long)]
        volume: String,
        #[arg(long)]
        path: String,
    },
    /// Tear down the export of a volume
    Unexport {
        #[arg(long)]
        volume: String,
    },
    /// Allow an initiator to log in to a volume's target
    Attach {
        #[arg(long)]
        volume: String,
        #[arg(long)]
        initiator: String,
    },
    /// Revoke an initiator's access to a volume's target
    Detach {
        #[arg(long)]
        volume: String,
        #[arg(long)]
        initiator: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => Config::read(path)?,
        None => Config::default(),
    };
    let executor = HostExecutor::new().as_executor();
    let store = Arc::new(YamlVolumeStore::new(&args.volumes));

    if let Cmd::Targets = args.command {
        // listing is LIO specific, so skip helper selection but keep the verify
        let lio = LioAdm::new(cfg, executor, store)?;
        for line in lio.rtstool().list_targets()? {
            println!("{}", line);
        }
        return Ok(());
    }

    let admin = target_admin(cfg, executor, store.clone())?;
    let ctx = RequestContext::new(format!("lioadmcli-{}", std::process::id()));

    match args.command {
        Cmd::Verify => log::info!("rtstool verified"),
        Cmd::Targets => unreachable!(),
        Cmd::Create { name, path, chap } => {
            let chap = chap
                .map(|c| ChapAuth::parse(target_volume_id(&name)?, &c))
                .transpose()?;
            let tid = admin.create_target(&name, 1, 0, &path, chap.as_ref(), true)?;
            println!("{}", tid);
        }
        Cmd::Remove {
            volume_id,
            volume_name,
        } => admin.remove_iscsi_target(0, 0, &volume_id, &volume_name)?,
        Cmd::Show { iqn } => {
            admin.show_target(0, Some(iqn.as_str()))?;
            println!("{}", iqn);
        }
        Cmd::Ensure { volume, path } => {
            let volume = store.get(&ctx, &volume)?;
            admin.ensure_export(&ctx, &volume, &path)?;
        }
        Cmd::Unexport { volume } => {
            let volume = store.get(&ctx, &volume)?;
            admin.remove_export(&ctx, &volume)?;
        }
        Cmd::Attach { volume, initiator } => {
            let volume = store.get(&ctx, &volume)?;
            let info = admin.initialize_connection(&volume, &Connector::new(initiator))?;
            print!("{}", serde_yml::to_string(&info)?);
        }
        Cmd::Detach { volume, initiator } => {
            let volume = store.get(&ctx, &volume)?;
            admin.terminate_connection(&volume, &Connector::new(initiator))?;
        }
    }

    Ok(())
}
