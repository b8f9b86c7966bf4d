//! Entry lifecycle: turns config entries into polled meter sensors.

use crate::api::{Connector, Error};
use crate::entries::{ConfigEntries, ConfigEntry, EntryError};
use crate::flow::{FlowResult, ABORT_ALREADY_CONFIGURED};
use crate::model::{Api, ConfigData};
use crate::sensor::{MeterSensor, SensorState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Receives every sensor snapshot after a poll.
pub type Publisher = Arc<dyn Fn(&SensorState) + Send + Sync>;

/// Shortest accepted poll period.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Build the sensor of `entry`, checking that its credentials are still accepted.
pub async fn setup_entry(
    connector: &dyn Connector,
    entry: &ConfigEntry,
) -> Result<MeterSensor, Error> {
    log::debug!("setting up entry {} ({})", entry.entry_id, entry.title);

    let mut portal = connector.connect(Api::from(&entry.data));
    if !portal.check_credentials().await? {
        return Err(Error::LoginError(format!(
            "credentials of {} are no longer accepted",
            entry.data.username
        )));
    }

    let contract = portal
        .contracts()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::NoContract)?;

    Ok(MeterSensor::new(entry.entry_id.to_owned(), portal, &contract)
        .with_monthly_history(entry.monthly_history()))
}

async fn poll(
    sensor: Arc<tokio::sync::Mutex<MeterSensor>>,
    scan_interval: Duration,
    publisher: Publisher,
) {
    let mut interval = tokio::time::interval(scan_interval);
    loop {
        interval.tick().await;
        let state = {
            let mut sensor = sensor.lock().await;
            if let Err(e) = sensor.update().await {
                log::warn!("Error updating {}: {}", sensor.name(), e);
            }
            sensor.state()
        };
        publisher(&state);
    }
}

struct RunningEntry {
    sensor: Arc<tokio::sync::Mutex<MeterSensor>>,
    poller: JoinHandle<()>,
}

/// Running sensors, one per loaded entry.
pub struct Hub {
    connector: Arc<dyn Connector>,
    scan_interval: Duration,
    publisher: Publisher,
    running: Mutex<HashMap<String, RunningEntry>>,
}

impl Hub {
    pub fn new(
        connector: Arc<dyn Connector>,
        scan_interval: Duration,
        publisher: Publisher,
    ) -> Self {
        if scan_interval < MIN_SCAN_INTERVAL {
            log::warn!(
                "scan interval {:?} is too short, using {:?}",
                scan_interval,
                MIN_SCAN_INTERVAL
            );
        }

        Hub {
            connector,
            scan_interval: scan_interval.max(MIN_SCAN_INTERVAL),
            publisher,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        self.connector.clone()
    }

    pub fn scan_interval(&self) -> Duration {
        self.scan_interval
    }

    fn sensors(&self) -> Vec<Arc<tokio::sync::Mutex<MeterSensor>>> {
        self.running
            .lock()
            .map(|running| running.values().map(|r| r.sensor.clone()).collect())
            .unwrap_or_default()
    }

    fn sensor(&self, entry_id: &str) -> Option<Arc<tokio::sync::Mutex<MeterSensor>>> {
        self.running
            .lock()
            .ok()
            .and_then(|running| running.get(entry_id).map(|r| r.sensor.clone()))
    }

    /// Set up `entry` and start polling it. A loaded entry is replaced.
    pub async fn setup_entry(&self, entry: &ConfigEntry) -> Result<(), Error> {
        let sensor = setup_entry(self.connector.as_ref(), entry).await?;
        log::info!("polling {} every {:?}", sensor.name(), self.scan_interval);

        let sensor = Arc::new(tokio::sync::Mutex::new(sensor));
        let poller = tokio::spawn(poll(
            sensor.clone(),
            self.scan_interval,
            self.publisher.clone(),
        ));

        let previous = self
            .running
            .lock()
            .map_err(|_| Error::InternalError)?
            .insert(entry.entry_id.to_owned(), RunningEntry { sensor, poller });
        if let Some(previous) = previous {
            previous.poller.abort();
        }
        Ok(())
    }

    /// Stop polling `entry_id`. Returns the last state of its sensor, if it was loaded.
    pub async fn unload_entry(&self, entry_id: &str) -> Option<SensorState> {
        let running = self.running.lock().ok()?.remove(entry_id)?;
        running.poller.abort();
        log::info!("unloaded entry {}", entry_id);

        let sensor = running.sensor.lock().await;
        Some(sensor.state())
    }

    pub async fn reload_entry(&self, entry: &ConfigEntry) -> Result<(), Error> {
        self.unload_entry(&entry.entry_id).await;
        self.setup_entry(entry).await
    }

    pub async fn states(&self) -> Vec<SensorState> {
        let mut states = Vec::new();
        for sensor in self.sensors() {
            states.push(sensor.lock().await.state());
        }
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        states
    }

    /// Poll `entry_id` now, outside of its schedule. The snapshot is published even when the
    /// poll fails.
    pub async fn update_entry(&self, entry_id: &str) -> Option<Result<SensorState, Error>> {
        let sensor = self.sensor(entry_id)?;
        let mut sensor = sensor.lock().await;
        let result = sensor.update().await;
        let state = sensor.state();
        (self.publisher)(&state);
        Some(result.map(|_| state))
    }

    /// Store the entry created by a finished config flow and start polling it.
    ///
    /// Other results are passed through. A second entry for the same meter turns into an
    /// `already_configured` abort, and the returned entry never carries the password.
    pub async fn create_entry(
        &self,
        entries: &tokio::sync::Mutex<ConfigEntries>,
        result: FlowResult<ConfigData>,
    ) -> Result<FlowResult<ConfigData>, EntryError> {
        let (title, data) = match result {
            FlowResult::CreateEntry { title, data } => (title, data),
            other => return Ok(other),
        };

        let added = entries.lock().await.add(title, data);
        let entry = match added {
            Ok(entry) => entry,
            Err(EntryError::AlreadyConfigured(unique_id)) => {
                log::info!("{} is already configured", unique_id);
                return Ok(FlowResult::Abort {
                    reason: ABORT_ALREADY_CONFIGURED,
                });
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.setup_entry(&entry).await {
            log::error!("Error setting up entry {}: {}", entry.entry_id, e);
        }

        let entry = entry.redacted();
        Ok(FlowResult::CreateEntry {
            title: entry.title,
            data: entry.data,
        })
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        if let Ok(running) = self.running.get_mut() {
            for entry in running.values() {
                entry.poller.abort();
            }
        }
    }
}
