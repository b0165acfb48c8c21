//! In-process node for the loopback demo.
//!
//! The simulated device answers the provisioning public key exchange, then
//! speaks the node side of the transport: it acknowledges segmented
//! transfers and replies to configuration and sensor requests with its own
//! sequence numbers.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use mesh_access::{
    AccessMessage, AppKeyStatus, ConfigStatus, KeySelector, ModelAppStatus,
    ModelSubscriptionStatus, SensorReading, SensorStatus,
};
use mesh_crypto::{s1, ApplicationKey, DeviceKey, EcdhKeyPair, MicSize, NetworkKey, KEY_SIZE};
use mesh_session::transport::receive;
use mesh_session::{
    build_access, build_segment_ack, open_upper, Addressing, NetworkLayer, NodeSession, Received,
    SequenceCounter, UpperKey,
};
use mesh_storage::{NodeAddress, NodeRecord};
use mesh_wire::{unwrap_proxy, ProxyPduType, PublicKeyPdu};

use crate::{component_debug, component_info, component_warn};

const INVALID_APPKEY_INDEX: ConfigStatus = ConfigStatus(0x03);
const INVALID_NETKEY_INDEX: ConfigStatus = ConfigStatus(0x04);
const INVALID_ADDRESS: ConfigStatus = ConfigStatus(0x01);

/// Salt both sides feed into the device key derivation
///
/// Confirmation and random exchange are not run, so the salt is fixed.
pub fn provisioning_salt() -> [u8; KEY_SIZE] {
    s1(b"mesh-provisioner loopback")
}

/// Readings reported by the simulated sensor server
pub fn default_readings() -> Vec<SensorReading> {
    vec![
        // Present Ambient Temperature, 0.5 degC steps
        SensorReading {
            property_id: 0x004F,
            value: Bytes::from_static(&[0x2D]),
        },
        // Present Ambient Relative Humidity, 0.01 % steps
        SensorReading {
            property_id: 0x0076,
            value: Bytes::from_static(&[0x5C, 0x12]),
        },
    ]
}

/// Device side of one provisioned link
pub struct SimulatedDevice {
    address: u16,
    provisioner: u16,
    net_key_index: u16,
    network: NetworkLayer,
    sequence: SequenceCounter,
    key_pair: EcdhKeyPair,
    /// Our view of the provisioner, present once provisioned
    session: Option<NodeSession>,
    app_keys: HashMap<u16, ApplicationKey>,
    bindings: Vec<(u32, u16)>,
    subscriptions: Vec<u16>,
    readings: Vec<SensorReading>,
}

impl SimulatedDevice {
    pub fn new(
        address: u16,
        provisioner: u16,
        network_key: &NetworkKey,
        net_key_index: u16,
        iv_index: u32,
    ) -> Self {
        Self {
            address,
            provisioner,
            net_key_index,
            network: NetworkLayer::new(network_key, iv_index),
            sequence: SequenceCounter::new(address, 0),
            key_pair: EcdhKeyPair::generate(),
            session: None,
            app_keys: HashMap::new(),
            bindings: Vec::new(),
            subscriptions: Vec::new(),
            readings: default_readings(),
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    #[cfg(test)]
    fn is_provisioned(&self) -> bool {
        self.session.is_some()
    }

    /// Model bindings as `(model_id, app_key_index)`
    #[cfg(test)]
    fn bindings(&self) -> &[(u32, u16)] {
        &self.bindings
    }

    /// Handle one PDU from the provisioner and return our replies
    pub fn handle(&mut self, pdu: Bytes) -> Result<Vec<Bytes>> {
        let (header, body) = unwrap_proxy(pdu.clone())?;
        match header.typ {
            ProxyPduType::Provisioning => self.handle_public_key(&pdu).map(|reply| vec![reply]),
            ProxyPduType::Network => self.handle_network(&body),
            other => {
                component_debug!("simulator", "Ignoring proxy PDU {:?}", other);
                Ok(Vec::new())
            }
        }
    }

    fn handle_public_key(&mut self, pdu: &[u8]) -> Result<Bytes> {
        let peer = PublicKeyPdu::decode(pdu)?;
        let secret = self.key_pair.agree(&peer.xy())?;
        let device_key = DeviceKey::from_ecdh_secret(secret.as_bytes(), &provisioning_salt());

        self.session = Some(NodeSession::from_record(&NodeRecord {
            unicast_address: NodeAddress(self.provisioner),
            device_key: *device_key.as_bytes(),
            net_key_index: self.net_key_index,
            app_key_indices: Vec::new(),
            sequence_number: 0,
        }));
        component_info!(
            "simulator",
            "Device {:#06x} derived its device key",
            self.address
        );
        Ok(PublicKeyPdu::from_xy(self.key_pair.public_xy()).encode())
    }

    fn addressing(&self) -> Addressing {
        Addressing {
            src: self.address,
            ttl: 3,
        }
    }

    fn handle_network(&mut self, body: &[u8]) -> Result<Vec<Bytes>> {
        let addressing = self.addressing();
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("network PDU before provisioning"))?;

        let pdu = self.network.decode(body)?;
        if pdu.header.dst != self.address || pdu.header.src != self.provisioner {
            return Ok(Vec::new());
        }

        let mut replies = Vec::new();
        let upper = match receive(
            session,
            &pdu.header,
            pdu.iv_index,
            pdu.transport,
            Instant::now(),
        )? {
            Received::Upper { pdu, ack } => {
                if let Some(ack) = ack {
                    replies.push(build_segment_ack(
                        &self.network,
                        &mut self.sequence,
                        session,
                        addressing,
                        ack.seq_zero,
                        ack.block_ack,
                    )?);
                }
                pdu
            }
            Received::Duplicate(ack) => {
                replies.push(build_segment_ack(
                    &self.network,
                    &mut self.sequence,
                    session,
                    addressing,
                    ack.seq_zero,
                    ack.block_ack,
                )?);
                return Ok(replies);
            }
            other => {
                component_debug!("simulator", "Transport: {:?}", other);
                return Ok(replies);
            }
        };

        let (payload, key) = {
            let candidates: Vec<(u16, &ApplicationKey)> =
                self.app_keys.iter().map(|(index, key)| (*index, key)).collect();
            open_upper(&upper, session.device_key(), &candidates)?
        };
        let message = AccessMessage::decode(payload)?;
        component_info!(
            "simulator",
            "Device {:#06x} received {}",
            self.address,
            message.name()
        );

        if message.is_config() != (key == KeySelector::Device) {
            component_warn!(
                "simulator",
                "{} under the wrong key, ignored",
                message.name()
            );
            return Ok(replies);
        }

        if let Some(reply) = self.respond(message, key) {
            replies.extend(self.seal(&reply, key)?);
        }
        Ok(replies)
    }

    fn respond(&mut self, message: AccessMessage, key: KeySelector) -> Option<AccessMessage> {
        match message {
            AccessMessage::AppKeyAdd(add) => {
                let status = if add.net_key_index != self.net_key_index {
                    INVALID_NETKEY_INDEX
                } else {
                    self.app_keys.insert(add.app_key_index, add.app_key);
                    ConfigStatus::SUCCESS
                };
                Some(AccessMessage::AppKeyStatus(AppKeyStatus {
                    status,
                    net_key_index: add.net_key_index,
                    app_key_index: add.app_key_index,
                }))
            }
            AccessMessage::ModelAppBind(bind) => {
                let status = if bind.element_address != self.address {
                    INVALID_ADDRESS
                } else if !self.app_keys.contains_key(&bind.app_key_index) {
                    INVALID_APPKEY_INDEX
                } else {
                    if !self.bindings.contains(&(bind.model_id, bind.app_key_index)) {
                        self.bindings.push((bind.model_id, bind.app_key_index));
                    }
                    ConfigStatus::SUCCESS
                };
                Some(AccessMessage::ModelAppStatus(ModelAppStatus {
                    status,
                    element_address: bind.element_address,
                    app_key_index: bind.app_key_index,
                    model_id: bind.model_id,
                }))
            }
            AccessMessage::ModelSubscriptionAdd(add) => {
                let status = if add.element_address != self.address {
                    INVALID_ADDRESS
                } else {
                    if !self.subscriptions.contains(&add.subscription_address) {
                        self.subscriptions.push(add.subscription_address);
                    }
                    component_debug!(
                        "simulator",
                        "Subscriptions of {:#06x}: {:04x?}",
                        self.address,
                        self.subscriptions
                    );
                    ConfigStatus::SUCCESS
                };
                Some(AccessMessage::ModelSubscriptionStatus(ModelSubscriptionStatus {
                    status,
                    element_address: add.element_address,
                    subscription_address: add.subscription_address,
                    model_id: add.model_id,
                }))
            }
            AccessMessage::SensorGet(get) => {
                let KeySelector::Application(index) = key else {
                    return None;
                };
                if !self.bindings.iter().any(|(_, bound)| *bound == index) {
                    component_warn!("simulator", "Sensor Get under unbound key {}", index);
                    return None;
                }
                let readings = self
                    .readings
                    .iter()
                    .filter(|r| get.property_id.map_or(true, |id| id == r.property_id))
                    .cloned()
                    .collect();
                Some(AccessMessage::SensorStatus(SensorStatus { readings }))
            }
            other => {
                component_warn!("simulator", "No handler for {}", other.name());
                None
            }
        }
    }

    fn seal(&mut self, message: &AccessMessage, key: KeySelector) -> Result<Vec<Bytes>> {
        let addressing = self.addressing();
        let payload = message.encode()?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("device not provisioned"))?;
        let device_key = session.device_key().clone();
        let upper_key = match key {
            KeySelector::Device => UpperKey::Device(&device_key),
            KeySelector::Application(index) => UpperKey::Application(
                self.app_keys
                    .get(&index)
                    .ok_or_else(|| anyhow!("application key {} unknown", index))?,
            ),
        };
        let outbound = build_access(
            &self.network,
            &mut self.sequence,
            session,
            addressing,
            upper_key,
            &payload,
            MicSize::Short,
        )?;
        Ok(outbound.pdus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_access::{AppKeyAdd, ModelAppBind, SensorGet};
    use mesh_session::{ChannelBearer, ManagerConfig, MeshEvent, MeshManager};
    use mesh_storage::MemoryNodeStore;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const PROVISIONER: u16 = 0x0001;
    const DEVICE: u16 = 0x0100;

    fn net_key() -> NetworkKey {
        NetworkKey::from_bytes([0x4E; 16])
    }

    fn app_key() -> ApplicationKey {
        ApplicationKey::from_bytes([0x61; 16])
    }

    struct Loop {
        manager: MeshManager,
        events: mpsc::UnboundedReceiver<MeshEvent>,
        wire: mpsc::UnboundedReceiver<(u16, Bytes)>,
        device: SimulatedDevice,
    }

    impl Loop {
        async fn new() -> Self {
            let (bearer, wire) = ChannelBearer::new();
            let (manager, events) = MeshManager::new(
                ManagerConfig::default(),
                &net_key(),
                Arc::new(bearer),
                Arc::new(MemoryNodeStore::new()),
            );
            manager.add_app_key(0, app_key()).await;
            Self {
                manager,
                events,
                wire,
                device: SimulatedDevice::new(DEVICE, PROVISIONER, &net_key(), 0, 0),
            }
        }

        /// Shuttle PDUs both ways until the line is quiet
        async fn pump(&mut self) -> Vec<AccessMessage> {
            let mut received = Vec::new();
            while let Ok((dst, pdu)) = self.wire.try_recv() {
                assert_eq!(dst, DEVICE);
                for reply in self.device.handle(pdu).unwrap() {
                    if let Some(message) = self.manager.deliver_pdu(DEVICE, reply).await.unwrap()
                    {
                        received.push(message);
                    }
                }
            }
            received
        }

        fn events(&mut self) -> Vec<MeshEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        async fn provision(&mut self) {
            self.manager.start_provisioning(DEVICE).await.unwrap();
            self.pump().await;
            let secret = self.manager.take_shared_secret(DEVICE).await.unwrap();
            let device_key = DeviceKey::from_ecdh_secret(secret.as_bytes(), &provisioning_salt());
            self.manager
                .add_node(NodeRecord {
                    unicast_address: NodeAddress(DEVICE),
                    device_key: *device_key.as_bytes(),
                    net_key_index: 0,
                    app_key_indices: vec![0],
                    sequence_number: 0,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_provisioning_agrees_on_device_key() {
        let mut link = Loop::new().await;
        assert!(!link.device.is_provisioned());
        link.provision().await;
        assert!(link.device.is_provisioned());

        let events = link.events();
        assert!(events.contains(&MeshEvent::PublicKeySent { peer: DEVICE }));
        assert!(events.contains(&MeshEvent::PublicKeyReceived { peer: DEVICE }));
    }

    #[tokio::test]
    async fn test_configuration_and_sensor_round_trip() {
        let mut link = Loop::new().await;
        link.provision().await;

        link.manager
            .send(
                DEVICE,
                KeySelector::Device,
                AccessMessage::AppKeyAdd(AppKeyAdd {
                    net_key_index: 0,
                    app_key_index: 0,
                    app_key: app_key(),
                }),
            )
            .await
            .unwrap();
        let replies = link.pump().await;
        assert!(matches!(
            replies.as_slice(),
            [AccessMessage::AppKeyStatus(status)] if status.status.is_success()
        ));
        assert!(link
            .events()
            .iter()
            .any(|e| matches!(e, MeshEvent::TransferAcknowledged { address: DEVICE, .. })));

        link.manager
            .send(
                DEVICE,
                KeySelector::Device,
                AccessMessage::ModelAppBind(ModelAppBind {
                    element_address: DEVICE,
                    app_key_index: 0,
                    model_id: 0x1100,
                }),
            )
            .await
            .unwrap();
        link.pump().await;
        assert_eq!(link.device.bindings(), &[(0x1100, 0)]);

        link.manager
            .send(
                DEVICE,
                KeySelector::Application(0),
                AccessMessage::SensorGet(SensorGet {
                    property_id: Some(0x004F),
                }),
            )
            .await
            .unwrap();
        let replies = link.pump().await;
        let [AccessMessage::SensorStatus(status)] = replies.as_slice() else {
            panic!("expected a sensor status, got {:?}", replies);
        };
        assert_eq!(status.readings.len(), 1);
        assert_eq!(status.reading(0x004F).unwrap().value.as_ref(), &[0x2D]);
    }

    #[tokio::test]
    async fn test_undelivered_application_key_is_rejected() {
        let mut link = Loop::new().await;
        link.provision().await;

        // The key was never delivered to the device, so it cannot open this
        link.manager
            .send(
                DEVICE,
                KeySelector::Application(0),
                AccessMessage::SensorGet(SensorGet::default()),
            )
            .await
            .unwrap();
        let (_, pdu) = link.wire.try_recv().unwrap();
        assert!(link.device.handle(pdu).is_err());
    }

    #[test]
    fn test_network_before_provisioning_is_rejected() {
        let mut device = SimulatedDevice::new(DEVICE, PROVISIONER, &net_key(), 0, 0);
        let pdu = mesh_wire::wrap_proxy(ProxyPduType::Network, &[0u8; 20]);
        assert!(device.handle(pdu).is_err());
    }
}
