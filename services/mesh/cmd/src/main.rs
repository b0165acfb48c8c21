use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use humantime::Duration as HumanDuration;
use mesh_access::{
    AccessMessage, AppKeyAdd, KeySelector, ModelAppBind, ModelSubscriptionAdd, SensorGet,
};
use mesh_crypto::DeviceKey;
use mesh_session::{ChannelBearer, MeshEvent, MeshManager};
use mesh_storage::{open_store, NodeAddress, NodeRecord};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod simulator;

use config::MeshConfig;
use logging::MeshLogFormatter;
use simulator::{provisioning_salt, SimulatedDevice};

/// Sensor Server model
const SENSOR_SERVER_MODEL: u32 = 0x1100;

#[derive(Parser, Debug)]
#[command(name = "mesh-provisioner")]
#[command(about = "Mesh provisioner: key exchange, configuration and sensor readout")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Unicast address given to the simulated device
    #[arg(long, default_value = "0x0100", value_parser = parse_address)]
    device_address: u16,

    /// Group address the sensor model subscribes to
    #[arg(long, default_value = "0xC000", value_parser = parse_address)]
    group_address: u16,

    /// How long to wait for each reply
    #[arg(long, default_value = "5s")]
    reply_timeout: HumanDuration,

    /// Interval between timeout sweeps
    #[arg(long, default_value = "1s")]
    tick: HumanDuration,

    /// Disable coloured log output
    #[arg(long)]
    no_color: bool,
}

fn parse_address(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid address {:?}: {}", value, e))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| {
        let mut filter = EnvFilter::new("info");
        for target in [
            "mesh_provisioner",
            "mesh_session",
            "mesh_wire",
            "mesh_crypto",
            "mesh_access",
            "mesh_storage",
        ] {
            filter = filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
        }
        Ok::<_, anyhow::Error>(filter)
    })?;

    let mut formatter = MeshLogFormatter::new("mesh");
    if args.no_color {
        formatter = formatter.without_color();
    }
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(formatter)
        .init();

    info!("Starting mesh provisioner v{}", env!("CARGO_PKG_VERSION"));

    let mesh_config = MeshConfig::load_from_file(&args.config)?;
    let manager_config = mesh_config.to_manager_config()?;
    let network_key = mesh_config.network_key()?;
    let app_keys = mesh_config.app_keys()?;
    let store = open_store(mesh_config.storage_mode()?).await?;

    info!(
        "Manager config: unicast={:#06x}, ttl={}, ack_timeout={:?}, reassembly_timeout={:?}, ack_partial={}",
        manager_config.unicast_address,
        manager_config.default_ttl,
        manager_config.ack_timeout,
        manager_config.reassembly_timeout,
        manager_config.ack_partial
    );

    let (bearer, mut to_device) = ChannelBearer::new();
    let (manager, mut events) =
        MeshManager::new(manager_config.clone(), &network_key, Arc::new(bearer), store);
    let manager = Arc::new(manager);

    let (app_key_index, app_key) = match app_keys.into_iter().next() {
        Some(entry) => entry,
        None => {
            info!("No application key configured, generating key 0 for this run");
            (0, mesh_crypto::ApplicationKey::generate())
        }
    };
    manager.add_app_key(app_key_index, app_key.clone()).await;

    let restored = manager.load_nodes().await?;
    info!("Restored {} provisioned nodes", restored);
    if manager.node_record(args.device_address).await.is_some() {
        bail!(
            "node {:#06x} is already provisioned; pick another --device-address",
            args.device_address
        );
    }

    // Loopback bearer: the simulated device reads what the manager sends
    let (to_manager, from_device) = mpsc::unbounded_channel();
    let mut device = SimulatedDevice::new(
        args.device_address,
        manager_config.unicast_address,
        &network_key,
        manager_config.net_key_index,
        manager_config.iv_index,
    );
    let device_task = tokio::spawn(async move {
        while let Some((dst, pdu)) = to_device.recv().await {
            if dst != device.address() {
                continue;
            }
            match device.handle(pdu) {
                Ok(replies) => {
                    for reply in replies {
                        if to_manager.send((dst, reply)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => component_warn!("simulator", "Device dropped a PDU: {}", e),
            }
        }
    });
    let manager_task = tokio::spawn(manager.clone().run(from_device, *args.tick));

    let timeout = *args.reply_timeout;
    let device_address = args.device_address;

    // Provisioning
    manager.start_provisioning(device_address).await?;
    wait_for(&mut events, timeout, |event| match event {
        MeshEvent::PublicKeyReceived { peer } if *peer == device_address => Some(Ok(())),
        MeshEvent::ProvisioningFailed { peer, reason } if *peer == device_address => {
            Some(Err(anyhow!("provisioning failed: {}", reason)))
        }
        _ => None,
    })
    .await??;

    let secret = manager
        .take_shared_secret(device_address)
        .await
        .context("provisioning finished without a shared secret")?;
    let device_key = DeviceKey::from_ecdh_secret(secret.as_bytes(), &provisioning_salt());
    manager
        .add_node(NodeRecord {
            unicast_address: NodeAddress(device_address),
            device_key: *device_key.as_bytes(),
            net_key_index: manager_config.net_key_index,
            app_key_indices: vec![app_key_index],
            sequence_number: 0,
        })
        .await?;
    component_info!("demo", "Node {:#06x} provisioned", device_address);

    // Configuration
    let requests = [
        (
            KeySelector::Device,
            AccessMessage::AppKeyAdd(AppKeyAdd {
                net_key_index: manager_config.net_key_index,
                app_key_index,
                app_key,
            }),
        ),
        (
            KeySelector::Device,
            AccessMessage::ModelAppBind(ModelAppBind {
                element_address: device_address,
                app_key_index,
                model_id: SENSOR_SERVER_MODEL,
            }),
        ),
        (
            KeySelector::Device,
            AccessMessage::ModelSubscriptionAdd(ModelSubscriptionAdd {
                element_address: device_address,
                subscription_address: args.group_address,
                model_id: SENSOR_SERVER_MODEL,
            }),
        ),
        (
            KeySelector::Application(app_key_index),
            AccessMessage::SensorGet(SensorGet::default()),
        ),
    ];

    for (key, request) in requests {
        let name = request.name();
        let Some(expected) = request.expected_status() else {
            bail!("{} has no status reply", name);
        };
        let receipt = manager.send(device_address, key, request).await?;
        debug!(
            "{} sent with seq {:#08x} in {} PDUs",
            name, receipt.seq, receipt.segments
        );

        let reply = wait_for(&mut events, timeout, |event| match event {
            MeshEvent::AccessReceived { address, message }
                if *address == device_address && message.opcode() == expected =>
            {
                Some(message.clone())
            }
            _ => None,
        })
        .await?;
        report(&reply);
    }

    component_info!("demo", "Loopback demo finished");
    manager_task.abort();
    device_task.abort();
    Ok(())
}

/// Wait until `select` picks an event, logging everything else
async fn wait_for<T, F>(
    events: &mut mpsc::UnboundedReceiver<MeshEvent>,
    timeout: Duration,
    mut select: F,
) -> Result<T>
where
    F: FnMut(&MeshEvent) -> Option<T>,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if let Some(selected) = select(&event) {
                return Ok(selected);
            }
            debug!("Event: {:?}", event);
        }
        Err(anyhow!("event channel closed"))
    })
    .await
    .map_err(|_| anyhow!("no reply within {:?}", timeout))?
}

fn report(message: &AccessMessage) {
    match message {
        AccessMessage::AppKeyStatus(status) => {
            component_info!("demo", "AppKey {} added: {}", status.app_key_index, status.status)
        }
        AccessMessage::ModelAppStatus(status) => component_info!(
            "demo",
            "Model {:#06x} bound to AppKey {}: {}",
            status.model_id,
            status.app_key_index,
            status.status
        ),
        AccessMessage::ModelSubscriptionStatus(status) => component_info!(
            "demo",
            "Model {:#06x} subscribed to {:#06x}: {}",
            status.model_id,
            status.subscription_address,
            status.status
        ),
        AccessMessage::SensorStatus(status) => {
            for reading in &status.readings {
                component_info!(
                    "demo",
                    "Sensor property {:#06x} = {}",
                    reading.property_id,
                    hex::encode(&reading.value)
                );
            }
        }
        other => component_info!("demo", "{} received", other.name()),
    }
}
