//! # Thermostat Device
//!
//! A [`Device`] is one thermostat on the bus: its configuration, field table,
//! address map and cached snapshot. Reads go through the freshness cache
//! first; only stale fields are planned into bus reads. Every operation
//! borrows the shared [`ProtocolClient`] for its duration.

use crate::clock::{self, WeekTime};
use crate::config::{ClockConfig, DeviceConfig, TimingModel};
use crate::constants::HM_MAX_DEVICE_ADDR;
use crate::dcb::cache::{DecodeChecks, MaxAge, MemoryScheduleStore, ScheduleStore, Snapshot};
use crate::dcb::field::{FieldDescriptor, FieldId, FieldTable, FieldValue};
use crate::dcb::models::{self, DeviceModel, ProgramMode};
use crate::dcb::planner::{Planner, ReadBlock, ReadPlan};
use crate::dcb::AddressMap;
use crate::error::{ConfigError, FieldError, HeatmiserError, Result, TimeError, ValidationError};
use crate::hmbus::frame::Protocol;
use crate::hmbus::protocol::ProtocolClient;
use crate::hmbus::serial::BusPort;
use chrono::{DateTime, Local};
use log::{debug, info, warn};

/// Mask applied to `version` on models that keep the floor limit flag in bit 7.
const VERSION_MASK: u16 = 0x7F;

pub struct Device {
    config: DeviceConfig,
    table: FieldTable,
    map: AddressMap,
    dcb_length: usize,
    timing: TimingModel,
    clock: ClockConfig,
    checks: DecodeChecks,
    snapshot: Snapshot,
    schedules: Box<dyn ScheduleStore>,
    clock_field: Option<FieldId>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.config.name)
            .field("address", &self.config.address)
            .field("model", &self.config.model)
            .field("program_mode", &self.config.program_mode)
            .field("dcb_length", &self.dcb_length)
            .finish()
    }
}

impl Device {
    /// Builds a device with the reference table of its model.
    pub fn new(
        config: DeviceConfig,
        timing: TimingModel,
        clock: ClockConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let table = models::table_for(config.model)?;
        let map = models::map_for(config.model, config.program_mode)?;
        Self::with_table(config, table, map, timing, clock)
    }

    /// Builds a device from an explicit table and map.
    pub fn with_table(
        config: DeviceConfig,
        table: FieldTable,
        map: AddressMap,
        timing: TimingModel,
        clock: ClockConfig,
    ) -> std::result::Result<Self, ConfigError> {
        if config.address == 0 || config.address > HM_MAX_DEVICE_ADDR {
            return Err(ConfigError::InvalidAddress(config.address));
        }
        map.validate_covers(&table)?;
        let dcb_length = map.dcb_length()?;

        let mut checks = DecodeChecks::default();
        for (name, value) in [
            ("DCBlen", dcb_length as u16),
            ("model", config.model.number()),
            ("programmode", config.program_mode.number()),
        ] {
            if let Some(id) = table.id(name) {
                checks.expected.push((id, value));
            }
        }
        if config.model != DeviceModel::PrtHw {
            if let Some(id) = table.id("version") {
                checks.masks.push((id, VERSION_MASK));
            }
        }

        let snapshot = Snapshot::new(table.len(), dcb_length);
        let clock_field = table.id("currenttime");
        debug!(
            "C{} {} {:?} mode, DCB length {}",
            config.address, config.model, config.program_mode, dcb_length
        );
        Ok(Device {
            config,
            table,
            map,
            dcb_length,
            timing,
            clock,
            checks,
            snapshot,
            schedules: Box::new(MemoryScheduleStore::new()),
            clock_field,
        })
    }

    /// Replaces the store that receives decoded schedules.
    pub fn with_schedule_store(mut self, store: Box<dyn ScheduleStore>) -> Self {
        self.schedules = store;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn long_name(&self) -> &str {
        self.config.long_name.as_deref().unwrap_or(&self.config.name)
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }

    pub fn model(&self) -> DeviceModel {
        self.config.model
    }

    pub fn program_mode(&self) -> ProgramMode {
        self.config.program_mode
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn clock_config(&self) -> &ClockConfig {
        &self.clock
    }

    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    pub fn map(&self) -> &AddressMap {
        &self.map
    }

    pub fn dcb_length(&self) -> usize {
        self.dcb_length
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn schedules(&self) -> &dyn ScheduleStore {
        self.schedules.as_ref()
    }

    pub fn is_hot_water(&self) -> bool {
        self.config
            .model
            .capabilities()
            .contains(models::Capabilities::HOT_WATER)
    }

    fn planner(&self) -> Planner<'_> {
        Planner::new(&self.table, &self.map, &self.timing)
    }

    fn descriptor(&self, name: &str) -> std::result::Result<(FieldId, &FieldDescriptor), ValidationError> {
        let id = self.table.lookup(name)?;
        Ok((id, self.table.get(id)))
    }

    /// Looks up a field the device physically has.
    fn present(&self, name: &str) -> std::result::Result<FieldId, ValidationError> {
        let (id, field) = self.descriptor(name)?;
        match self.map.resolve(field.address) {
            Some(_) => Ok(id),
            None => Err(ValidationError::NotPresent(name.to_string())),
        }
    }

    /// Cached value of a field, without touching the bus.
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.table.id(name).and_then(|id| self.snapshot.value(id))
    }

    /// Cached numeric value of a field.
    pub fn int_value(&self, name: &str) -> Option<u16> {
        self.value(name).and_then(FieldValue::as_int)
    }

    /// Cached value divided by the field's divisor.
    pub fn scaled_value(&self, name: &str) -> Option<f64> {
        let id = self.table.id(name)?;
        let value = self.snapshot.value(id)?;
        self.table.get(id).scaled(value)
    }

    /// Floor limiting flag, carried in bit 7 of `version` on models without hot water.
    pub fn floor_limiting(&self) -> Option<bool> {
        if self.config.model == DeviceModel::PrtHw {
            return None;
        }
        let id = self.table.id("version")?;
        self.snapshot.read_at(id)?;
        let offset = self.map.resolve(self.table.get(id).address)? as usize;
        self.snapshot.raw().get(offset).map(|b| b & 0x80 != 0)
    }

    /// Returns a field, reading it from the device if the cached value is too old.
    pub async fn read_field<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        name: &str,
        max_age: MaxAge,
    ) -> Result<FieldValue> {
        let id = self.present(name)?;
        if !self
            .snapshot
            .is_fresh(id, self.table.get(id), max_age, Local::now())
        {
            if !self.config.auto_read {
                return Err(ValidationError::NotRead(name.to_string()).into());
            }
            let errors = self.get_fields_by_id(client, &[id]).await?;
            if self.snapshot.value(id).is_none() {
                let error = errors
                    .into_iter()
                    .find(|e| field_error_name(e) == name)
                    .map(HeatmiserError::from)
                    .unwrap_or_else(|| ValidationError::NotRead(name.to_string()).into());
                return Err(error);
            }
        }
        self.snapshot
            .value(id)
            .cloned()
            .ok_or_else(|| ValidationError::NotRead(name.to_string()).into())
    }

    /// Returns several fields, fetching the stale ones in as few reads as possible.
    ///
    /// Fields the device does not have come back as `None`.
    pub async fn read_fields<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        names: &[&str],
        max_age: MaxAge,
    ) -> Result<Vec<Option<FieldValue>>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.table.lookup(name)?);
        }
        let present: Vec<FieldId> = ids
            .iter()
            .copied()
            .filter(|&id| self.map.resolve(self.table.get(id).address).is_some())
            .collect();
        let stale = self
            .snapshot
            .stale(&self.table, &present, max_age, Local::now());
        if !stale.is_empty() {
            if !self.config.auto_read {
                let first = self.table.get(stale[0]).name.clone();
                return Err(ValidationError::NotRead(first).into());
            }
            self.get_fields_by_id(client, &stale).await?;
        }
        Ok(ids
            .iter()
            .map(|&id| self.snapshot.value(id).cloned())
            .collect())
    }

    /// Reads every field from `first` to `last`, whatever their age.
    pub async fn get_field_range<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        first: &str,
        last: &str,
    ) -> Result<Vec<FieldError>> {
        let first = self.table.lookup(first)?;
        let last = self.table.lookup(last)?;
        let (first, last) = (first.min(last), first.max(last));
        let planner = self.planner();
        let plan = planner.choose(planner.plan_range(first, last), self.dcb_length);
        self.execute(client, plan).await
    }

    /// Reads the given fields, whatever their age.
    pub async fn get_fields<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        names: &[&str],
    ) -> Result<Vec<FieldError>> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.table.lookup(name)?);
        }
        self.get_fields_by_id(client, &ids).await
    }

    async fn get_fields_by_id<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        ids: &[FieldId],
    ) -> Result<Vec<FieldError>> {
        let planner = self.planner();
        let plan = planner.choose(planner.plan_set(ids), self.dcb_length);
        self.execute(client, plan).await
    }

    /// Reads the whole DCB in one transaction.
    pub async fn read_all<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
    ) -> Result<Vec<FieldError>> {
        self.execute(client, ReadPlan::Full).await
    }

    async fn execute<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        plan: ReadPlan,
    ) -> Result<Vec<FieldError>> {
        let mut errors = Vec::new();
        let mut clock_read = false;
        match plan {
            ReadPlan::Full => {
                let data = client
                    .read_all(self.address(), self.protocol(), self.dcb_length as u16)
                    .await
                    .map_err(|e| {
                        warn!("C{} read all failed: {}", self.address(), e);
                        e
                    })?;
                clock_read |= self.apply(0, &data, &mut errors);
                info!("C{} read all", self.address());
            }
            ReadPlan::Blocks(blocks) => {
                for block in &blocks {
                    debug!(
                        "C{} reading {} to {}, {} bytes from {}",
                        self.address(),
                        self.table.get(block.first).name,
                        self.table.get(block.last).name,
                        block.length,
                        block.start
                    );
                    let data = client
                        .read(self.address(), self.protocol(), block.start, block.length as u16)
                        .await
                        .map_err(|e| {
                            warn!("C{} read failed: {}", self.address(), e);
                            e
                        })?;
                    clock_read |= self.apply(block.start, &data, &mut errors);
                }
                info!(
                    "C{} read {} in {} blocks",
                    self.address(),
                    describe(&self.table, &blocks),
                    blocks.len()
                );
            }
        }
        if clock_read {
            self.verify_clock(client).await?;
        }
        Ok(errors)
    }

    /// Decodes one reply into the snapshot; true when it carried the clock.
    fn apply(&mut self, start: u16, data: &[u8], errors: &mut Vec<FieldError>) -> bool {
        let read_at = Local::now();
        let before = self
            .clock_field
            .and_then(|id| self.snapshot.read_at(id));
        errors.extend(self.snapshot.apply_block(
            &self.table,
            &self.map,
            start,
            data,
            read_at,
            &self.checks,
        ));

        for (id, field) in self.table.iter() {
            if field.is_numeric() || self.snapshot.read_at(id) != Some(read_at) {
                continue;
            }
            if let Some(bytes) = self.snapshot.value(id).and_then(FieldValue::as_bytes) {
                if field.length == 12 || field.length == 16 {
                    self.schedules.store(&field.name, bytes);
                }
            }
        }

        let after = self.clock_field.and_then(|id| self.snapshot.read_at(id));
        after.is_some() && after != before
    }

    /// Compares the cached device clock with local time at the moment it was read.
    pub fn check_clock(&self) -> std::result::Result<u32, TimeError> {
        let id = self.clock_field.ok_or(TimeError::NotRead)?;
        let read_at = self.snapshot.read_at(id).ok_or(TimeError::NotRead)?;
        let remote = self
            .snapshot
            .value(id)
            .and_then(FieldValue::as_bytes)
            .and_then(WeekTime::from_bytes)
            .ok_or(TimeError::NotRead)?;
        clock::check(&WeekTime::from_datetime(&read_at), &remote, &self.clock)
    }

    /// Checks the clock, writing local time back if allowed to.
    pub async fn verify_clock<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        match self.check_clock() {
            Ok(_) | Err(TimeError::NotRead) => Ok(()),
            Err(e) if self.clock.auto_correct => {
                warn!("C{} {}, correcting", self.address(), e);
                self.set_time(client).await
            }
            Err(e) => {
                warn!("C{} {}", self.address(), e);
                Err(e.into())
            }
        }
    }

    /// Reads the device clock now.
    pub async fn read_time<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<WeekTime> {
        let value = self.read_field(client, "currenttime", MaxAge::Always).await?;
        value
            .as_bytes()
            .and_then(WeekTime::from_bytes)
            .ok_or_else(|| ValidationError::NotRead("currenttime".into()).into())
    }

    /// Sets the device clock to local time, allowing half a second for the write.
    pub async fn set_time<P: BusPort>(&mut self, client: &mut ProtocolClient<P>) -> Result<()> {
        let now = Local::now() + chrono::Duration::milliseconds(500);
        self.set_time_to(client, &now).await
    }

    pub async fn set_time_to<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        time: &DateTime<Local>,
    ) -> Result<()> {
        let bytes = WeekTime::from_datetime(time).to_bytes();
        self.set_field(client, "currenttime", FieldValue::Raw(bytes)).await
    }

    /// Validates and writes one field, then records what the device will report.
    pub async fn set_field<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        name: &str,
        value: FieldValue,
    ) -> Result<()> {
        let id = self.present(name)?;
        let field = self.table.get(id);
        client
            .set_field(self.config.address, self.config.protocol, field, &value)
            .await?;
        let echoed = field.echoed(&value);
        if echoed.is_none() {
            debug!("C{} {} unknown until read", self.address(), name);
        }
        self.snapshot.set_written(id, echoed, Local::now());
        Ok(())
    }

    /// Validates every field first, then writes them all.
    pub async fn set_fields<P: BusPort>(
        &mut self,
        client: &mut ProtocolClient<P>,
        values: &[(&str, FieldValue)],
    ) -> Result<()> {
        let mut ids = Vec::with_capacity(values.len());
        for (name, _) in values {
            ids.push(self.present(name)?);
        }
        let pairs: Vec<(&FieldDescriptor, FieldValue)> = ids
            .iter()
            .zip(values)
            .map(|(&id, (_, value))| (self.table.get(id), value.clone()))
            .collect();
        client
            .set_fields(self.config.address, self.config.protocol, &pairs)
            .await?;
        let now = Local::now();
        for (&id, (_, value)) in ids.iter().zip(values) {
            let echoed = self.table.get(id).echoed(value);
            self.snapshot.set_written(id, echoed, now);
        }
        Ok(())
    }

    /// Records a value written on this device's behalf, such as by a broadcast.
    pub fn note_written(&mut self, name: &str, value: &FieldValue) {
        if let Ok(id) = self.present(name) {
            let echoed = self.table.get(id).echoed(value);
            self.snapshot.set_written(id, echoed, Local::now());
        }
    }

    /// Raw DCB bytes as last read.
    pub fn raw_data(&self) -> &[u8] {
        self.snapshot.raw()
    }

    /// Raw DCB bytes from the start of `first` to the start of `last`.
    pub fn raw_range(&self, first: &str, last: &str) -> std::result::Result<&[u8], ValidationError> {
        let start = self.present(first)?;
        let end = self.present(last)?;
        let offset = |id: FieldId| {
            self.map
                .resolve(self.table.get(id).address)
                .map(usize::from)
                .unwrap_or_default()
        };
        let (start, end) = (offset(start), offset(end));
        Ok(&self.snapshot.raw()[start.min(end)..start.max(end)])
    }
}

fn field_error_name(error: &FieldError) -> &str {
    match error {
        FieldError::OutOfRange { field, .. }
        | FieldError::Unexpected { field, .. }
        | FieldError::Missing { field, .. } => field,
    }
}

fn describe(table: &FieldTable, blocks: &[ReadBlock]) -> String {
    let parts: Vec<String> = blocks
        .iter()
        .map(|b| {
            let first = &table.get(b.first).name;
            let last = &table.get(b.last).name;
            if b.first == b.last {
                first.clone()
            } else {
                format!("{}..{}", first, last)
            }
        })
        .collect();
    parts.join(", ")
}
