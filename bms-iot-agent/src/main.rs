use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use bms_iot_agent::actors::supervisor::{run_reboot_listener, supervise};
use bms_iot_agent::actors::{
    ActorName, CleanerActor, HeartbeatActor, MailboxRegistry, MonitoringActor, SystemMetricsActor,
    UploaderActor, WriterActor,
};
use bms_iot_agent::bacnet::{ReaderPool, UdpClientFactory};
use bms_iot_agent::ids;
use bms_iot_agent::mqtt::{self, MqttActor};
use bms_iot_agent::persistence::{DeploymentConfig, DeviceStatusUpdate, MonitoringStatus, Store};
use bms_iot_agent::settings::Settings;

#[derive(Parser)]
#[command(name = "bms-iot-agent", version, about = "OpenBMS edge agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent until it is stopped or rebooted.
    Run,
    /// Inspect or set the deployment identity.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Database maintenance.
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Store the {organization, site, device} identity triple. Identifiers
    /// left out are generated.
    Set {
        #[arg(long = "org-id")]
        org_id: Option<String>,
        #[arg(long = "site-id")]
        site_id: Option<String>,
        #[arg(long = "device-id")]
        device_id: Option<String>,
        /// Optional metadata, as a JSON object.
        #[arg(long = "metadata-json")]
        metadata_json: Option<String>,
    },
    /// Print the current deployment configuration.
    Show,
}

#[derive(Subcommand)]
enum DbCommand {
    /// Apply pending schema migrations.
    Migrate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Run => run(settings).await,
        Command::Config { command } => config(settings, command).await,
        Command::Db { command } => db(settings, command).await,
    }
}

async fn db(settings: Settings, command: DbCommand) -> anyhow::Result<()> {
    match command {
        DbCommand::Migrate => {
            let store = Store::open(&settings.database_path).await?;
            store.migrate().await?;
            println!("Migrations applied to {}", settings.database_path.display());
            Ok(())
        }
    }
}

async fn config(settings: Settings, command: ConfigCommand) -> anyhow::Result<()> {
    let store = Store::open(&settings.database_path).await?;
    store.ensure_schema().await?;

    match command {
        ConfigCommand::Set {
            org_id,
            site_id,
            device_id,
            metadata_json,
        } => {
            let metadata = metadata_json
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("--metadata-json is not valid JSON")?;

            let config = DeploymentConfig {
                organization_id: org_id.unwrap_or_else(ids::generate_org_id),
                site_id: site_id.unwrap_or_else(ids::generate_site_id),
                device_id: device_id.unwrap_or_else(ids::generate_device_id),
                metadata,
            };
            if let Err(errors) = config.validate() {
                for error in &errors {
                    eprintln!("  - {error}");
                }
                bail!("invalid deployment configuration");
            }

            store.set_deployment_config(&config).await?;
            println!("Deployment configuration saved:");
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommand::Show => {
            match store.deployment_config().await? {
                Some(config) => println!("{}", serde_json::to_string_pretty(&config)?),
                None => println!("No deployment configuration set"),
            }
            Ok(())
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let store = Store::open(&settings.database_path).await?;
    store.ensure_schema().await?;

    let identity = load_deployment_config(&store).await?;
    initialize_device_status(&store, &identity).await?;

    let mqtt_settings = mqtt::config::load_config(&settings.mqtt_config_path)?;

    let registry = Arc::new(MailboxRegistry::new());
    registry.register(ActorName::Mqtt)?;
    registry.register(ActorName::Bacnet)?;
    registry.register(ActorName::BacnetWriter)?;
    registry.register(ActorName::Uploader)?;
    registry.register(ActorName::Cleaner)?;
    registry.register(ActorName::Heartbeat)?;
    registry.register(ActorName::SystemMetrics)?;
    registry.register(ActorName::Supervisor)?;

    let pool = Arc::new(ReaderPool::new(Arc::new(UdpClientFactory)));
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    let start_mqtt = {
        let registry = registry.clone();
        let store = store.clone();
        let identity = identity.clone();
        let settings = settings.clone();
        let mqtt_settings = mqtt_settings.clone();
        let cancel = cancel.clone();
        move || {
            let actor = MqttActor::new(
                registry.clone(),
                store.clone(),
                mqtt_settings.clone(),
                identity.clone(),
                settings.ca_cert_path.clone(),
                cancel.clone(),
            );
            async move { actor.start().await }
        }
    };

    let start_monitoring = {
        let registry = registry.clone();
        let store = store.clone();
        let pool = pool.clone();
        let identity = identity.clone();
        let cancel = cancel.clone();
        move || {
            let actor = MonitoringActor::new(
                registry.clone(),
                store.clone(),
                pool.clone(),
                identity.clone(),
                cancel.clone(),
            );
            async move { actor.start().await }
        }
    };

    let start_writer = {
        let registry = registry.clone();
        let store = store.clone();
        let pool = pool.clone();
        let cancel = cancel.clone();
        move || {
            let actor = WriterActor::new(
                registry.clone(),
                store.clone(),
                pool.clone(),
                cancel.clone(),
            );
            async move { actor.start().await }
        }
    };

    let start_uploader = {
        let registry = registry.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        move || {
            let actor = UploaderActor::new(registry.clone(), store.clone(), cancel.clone());
            async move { actor.start().await }
        }
    };

    let start_cleaner = {
        let registry = registry.clone();
        let store = store.clone();
        let cancel = cancel.clone();
        move || {
            let actor = CleanerActor::new(registry.clone(), store.clone(), cancel.clone());
            async move { actor.start().await }
        }
    };

    let start_heartbeat = {
        let registry = registry.clone();
        let store = store.clone();
        let identity = identity.clone();
        let cancel = cancel.clone();
        move || {
            let actor = HeartbeatActor::new(
                registry.clone(),
                store.clone(),
                identity.clone(),
                cancel.clone(),
            );
            async move { actor.start().await }
        }
    };

    let start_system_metrics = {
        let registry = registry.clone();
        let store = store.clone();
        let identity = identity.clone();
        let cancel = cancel.clone();
        move || {
            let actor = SystemMetricsActor::new(
                registry.clone(),
                store.clone(),
                identity.clone(),
                cancel.clone(),
            );
            async move { actor.start().await }
        }
    };

    tokio::try_join!(
        supervise("MqttActor", cancel.clone(), start_mqtt),
        supervise("BacnetMonitoringActor", cancel.clone(), start_monitoring),
        supervise("BacnetWriterActor", cancel.clone(), start_writer),
        supervise("UploaderActor", cancel.clone(), start_uploader),
        supervise("CleanerActor", cancel.clone(), start_cleaner),
        supervise("HeartbeatActor", cancel.clone(), start_heartbeat),
        supervise("SystemMetricsActor", cancel.clone(), start_system_metrics),
        run_reboot_listener(registry.clone(), cancel.clone()),
    )?;

    info!("Agent stopped");
    Ok(())
}

async fn load_deployment_config(store: &Store) -> anyhow::Result<DeploymentConfig> {
    let Some(config) = store.deployment_config().await? else {
        error!("No valid deployment configuration found!");
        error!("Run one of the following commands to configure the device:");
        error!("  bms-iot-agent config set --org-id <id> --site-id <id> --device-id <id>");
        bail!("missing deployment configuration");
    };

    if let Err(errors) = config.validate() {
        for problem in &errors {
            error!("  - {problem}");
        }
        bail!("invalid deployment configuration");
    }

    info!("Deployment configuration loaded:");
    info!("  Organization ID: {}", config.organization_id);
    info!("  Site ID: {}", config.site_id);
    info!("  Device ID: {}", config.device_id);
    Ok(config)
}

/// Seeds the status row so every later partial upsert has a base to merge
/// into. A fresh device starts out in active monitoring.
async fn initialize_device_status(
    store: &Store,
    identity: &DeploymentConfig,
) -> anyhow::Result<()> {
    if store
        .latest_device_status(&identity.device_id)
        .await?
        .is_none()
    {
        info!(
            "No monitoring status found for device {}, setting it to active",
            identity.device_id
        );
        let update = DeviceStatusUpdate {
            organization_id: Some(identity.organization_id.clone()),
            site_id: Some(identity.site_id.clone()),
            monitoring_status: Some(MonitoringStatus::Active),
            ..DeviceStatusUpdate::default()
        };
        store
            .upsert_device_status(&identity.device_id, &update)
            .await?;
    }
    Ok(())
}
