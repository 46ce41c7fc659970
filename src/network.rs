//! # Thermostat Network
//!
//! A [`Network`] owns the protocol client for one serial bus and the devices
//! attached to it. Operations over several devices go through
//! [`Network::for_each`] with a [`DeviceOp`], which runs one device at a time
//! and collects a result per device so one unreachable thermostat does not
//! stop the rest.

use crate::clock::WeekTime;
use crate::config::NetworkConfig;
use crate::constants::HM_BROADCAST_ADDR;
use crate::dcb::cache::MaxAge;
use crate::dcb::field::{FieldTable, FieldValue};
use crate::dcb::models;
use crate::device::Device;
use crate::error::{ConfigError, FieldError, Result};
use crate::hmbus::frame::Protocol;
use crate::hmbus::protocol::ProtocolClient;
use crate::hmbus::serial::BusPort;
use crate::thermostat::TempState;
use async_trait::async_trait;
use log::{info, warn};
use std::collections::HashSet;

/// An operation applied to each device in turn.
#[async_trait]
pub trait DeviceOp: Send + Sync {
    type Output: Send;

    async fn apply<P: BusPort>(
        &self,
        device: &mut Device,
        client: &mut ProtocolClient<P>,
    ) -> Result<Self::Output>;
}

/// Reads the whole DCB, returning the fields that failed to decode.
pub struct ReadAll;

#[async_trait]
impl DeviceOp for ReadAll {
    type Output = Vec<FieldError>;

    async fn apply<P: BusPort>(
        &self,
        device: &mut Device,
        client: &mut ProtocolClient<P>,
    ) -> Result<Self::Output> {
        device.read_all(client).await
    }
}

/// Reads a field, honouring its default maximum age.
pub struct ReadField(pub String);

#[async_trait]
impl DeviceOp for ReadField {
    type Output = FieldValue;

    async fn apply<P: BusPort>(
        &self,
        device: &mut Device,
        client: &mut ProtocolClient<P>,
    ) -> Result<Self::Output> {
        device.read_field(client, &self.0, MaxAge::Default).await
    }
}

/// Writes one field.
pub struct SetField(pub String, pub FieldValue);

#[async_trait]
impl DeviceOp for SetField {
    type Output = ();

    async fn apply<P: BusPort>(
        &self,
        device: &mut Device,
        client: &mut ProtocolClient<P>,
    ) -> Result<Self::Output> {
        device.set_field(client, &self.0, self.1.clone()).await
    }
}

/// Sets the device clock to local time and reads it back.
pub struct SyncTime;

#[async_trait]
impl DeviceOp for SyncTime {
    type Output = WeekTime;

    async fn apply<P: BusPort>(
        &self,
        device: &mut Device,
        client: &mut ProtocolClient<P>,
    ) -> Result<Self::Output> {
        device.set_time(client).await?;
        device.read_time(client).await
    }
}

/// Classifies what each thermostat is regulating to.
pub struct ReadTempState;

#[async_trait]
impl DeviceOp for ReadTempState {
    type Output = TempState;

    async fn apply<P: BusPort>(
        &self,
        device: &mut Device,
        client: &mut ProtocolClient<P>,
    ) -> Result<Self::Output> {
        device.read_temp_state(client).await
    }
}

pub struct Network<P: BusPort> {
    client: ProtocolClient<P>,
    devices: Vec<Device>,
}

impl<P: BusPort> std::fmt::Debug for Network<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("devices", &self.devices)
            .finish()
    }
}

impl Network<tokio_serial::SerialStream> {
    /// Opens the configured port and builds every configured device.
    pub fn from_config(config: &NetworkConfig) -> Result<Self> {
        let devices = build_devices(config)?;
        let client = ProtocolClient::connect(&config.port, config.bus.clone())?;
        info!("Opened {} with {} devices", config.port, devices.len());
        Ok(Self::new(client, devices)?)
    }
}

/// Builds the devices a configuration describes.
pub fn build_devices(config: &NetworkConfig) -> std::result::Result<Vec<Device>, ConfigError> {
    config
        .devices
        .iter()
        .map(|d| Device::new(d.clone(), config.timing, config.clock))
        .collect()
}

impl<P: BusPort> Network<P> {
    /// Rejects devices sharing a bus address or a name.
    pub fn new(client: ProtocolClient<P>, devices: Vec<Device>) -> std::result::Result<Self, ConfigError> {
        let mut addresses = HashSet::new();
        let mut names = HashSet::new();
        for device in &devices {
            if !addresses.insert(device.address()) {
                return Err(ConfigError::DuplicateAddress(device.address()));
            }
            if !names.insert(device.name().to_string()) {
                return Err(ConfigError::DuplicateDevice(device.name().to_string()));
            }
        }
        Ok(Network { client, devices })
    }

    pub fn client(&self) -> &ProtocolClient<P> {
        &self.client
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> std::result::Result<&Device, ConfigError> {
        self.devices
            .iter()
            .find(|d| d.name() == name)
            .ok_or_else(|| ConfigError::UnknownDevice(name.to_string()))
    }

    /// Runs `op` on the named device.
    pub async fn run<O: DeviceOp>(&mut self, name: &str, op: &O) -> Result<O::Output> {
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.name() == name)
            .ok_or_else(|| ConfigError::UnknownDevice(name.to_string()))?;
        op.apply(device, &mut self.client).await
    }

    /// Runs `op` on every device in configuration order.
    pub async fn for_each<O: DeviceOp>(&mut self, op: &O) -> Vec<(String, Result<O::Output>)> {
        let mut results = Vec::with_capacity(self.devices.len());
        for device in self.devices.iter_mut() {
            let result = op.apply(device, &mut self.client).await;
            if let Err(e) = &result {
                warn!("C{} {}: {}", device.address(), device.name(), e);
            }
            results.push((device.name().to_string(), result));
        }
        results
    }

    /// Writes a field to every thermostat with a single unacknowledged frame.
    ///
    /// The field is located by its unique address, which all models accept
    /// for writes. Devices that have the field record the written value.
    pub async fn broadcast_set_field(&mut self, name: &str, value: FieldValue) -> Result<()> {
        let table: FieldTable = models::full_table()?;
        let field = table.get(table.lookup(name)?);
        self.client
            .set_field(HM_BROADCAST_ADDR, Protocol::default(), field, &value)
            .await?;
        for device in self.devices.iter_mut() {
            device.note_written(name, &value);
        }
        Ok(())
    }
}
