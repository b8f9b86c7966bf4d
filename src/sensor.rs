use crate::api::{Error, Portal};
use crate::model::{Contract, Liters, MonthlyRecent};
use crate::DOMAIN;
use chrono::NaiveDate;
use serde::Serialize;
use std::time::Duration;

/// Default poll period of a meter sensor.
pub const SCAN_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub const UNIT_OF_MEASUREMENT: &str = "L";
pub const ICON: &str = "mdi:water-pump";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Water,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateClass {
    TotalIncreasing,
}

/// Snapshot of a sensor, as published to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorState {
    pub entry_id: String,
    pub entity_id: String,
    pub unique_id: String,
    pub name: String,
    pub meter_id: String,
    pub state: Option<Liters>,
    pub last_reading: Option<NaiveDate>,
    pub available: bool,
    pub unit_of_measurement: &'static str,
    pub device_class: DeviceClass,
    pub state_class: StateClass,
    pub icon: &'static str,
    pub attribution: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly_history: Option<MonthlyRecent>,
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// Water meter sensor. Holds the last successfully read index of one meter.
pub struct MeterSensor {
    entry_id: String,
    meter_id: String,
    name: String,
    attribution: String,
    portal: Box<dyn Portal>,
    state: Option<Liters>,
    last_reading: Option<NaiveDate>,
    available: bool,
    monthly_history: Option<MonthlyRecent>,
}

impl MeterSensor {
    pub fn new(entry_id: String, portal: Box<dyn Portal>, contract: &Contract) -> Self {
        let meter_id = portal.credentials().meter_id.clone().unwrap_or_default();

        MeterSensor {
            entry_id,
            name: format!("{} meter {}", contract.brand_code, meter_id),
            meter_id,
            attribution: contract.brand_code.to_owned(),
            portal,
            state: None,
            last_reading: None,
            available: false,
            monthly_history: None,
        }
    }

    pub fn with_monthly_history(mut self, history: Option<MonthlyRecent>) -> Self {
        self.monthly_history = history;
        self
    }

    pub fn entry_id(&self) -> &str {
        &self.entry_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> String {
        format!("{}_{}", DOMAIN, self.meter_id)
    }

    pub fn native_value(&self) -> Option<Liters> {
        self.state
    }

    pub fn available(&self) -> bool {
        self.available
    }

    /// One poll: read the latest index. On failure the previous value is kept.
    pub async fn update(&mut self) -> Result<(), Error> {
        match self.portal.latest_meter_reading().await {
            Ok(reading) => {
                log::debug!(
                    "{}: {} {} on {}",
                    self.name,
                    reading.volume,
                    UNIT_OF_MEASUREMENT,
                    reading.date
                );
                self.state = Some(reading.volume);
                self.last_reading = Some(reading.date);
                self.available = true;
                Ok(())
            }
            Err(e) => {
                self.available = false;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> SensorState {
        SensorState {
            entry_id: self.entry_id.to_owned(),
            entity_id: format!("sensor.{}", slugify(&self.name)),
            unique_id: self.unique_id(),
            name: self.name.to_owned(),
            meter_id: self.meter_id.to_owned(),
            state: self.state,
            last_reading: self.last_reading,
            available: self.available,
            unit_of_measurement: UNIT_OF_MEASUREMENT,
            device_class: DeviceClass::Water,
            state_class: StateClass::TotalIncreasing,
            icon: ICON,
            attribution: self.attribution.to_owned(),
            monthly_history: self.monthly_history.clone(),
        }
    }
}
