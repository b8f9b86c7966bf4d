//! In-memory portal used by the wizard, sensor and lifecycle tests.

use crate::api::{Connector, Error, Portal};
use crate::model::{Api, Contract, MeterReading, MonthlyRecent, MonthlyVolume};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

pub const PASSWORD: &str = "secret";
pub const METER_ID: &str = "12345678";

pub struct FakeAccount {
    pub password: String,
    pub portal_down: bool,
    pub default_meter_id: Option<String>,
    pub contracts: Result<Vec<Contract>, Error>,
    pub meters: Vec<String>,
    pub readings: VecDeque<Result<MeterReading, Error>>,
    pub logins: usize,
    pub logouts: usize,
}

impl Default for FakeAccount {
    fn default() -> Self {
        FakeAccount {
            password: PASSWORD.to_string(),
            portal_down: false,
            default_meter_id: Some(METER_ID.to_string()),
            contracts: Ok(vec![contract()]),
            meters: vec![METER_ID.to_string()],
            readings: VecDeque::new(),
            logins: 0,
            logouts: 0,
        }
    }
}

pub fn contract() -> Contract {
    Contract {
        number: "1234567".to_string(),
        brand_code: "SEV".to_string(),
        address: None,
    }
}

pub fn reading(day: u32, volume: f64) -> MeterReading {
    MeterReading {
        date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
        volume,
    }
}

pub fn monthly() -> MonthlyRecent {
    MonthlyRecent {
        monthly: vec![MonthlyVolume {
            label: "Avril".to_string(),
            year: 2024,
            volume: 2500.0,
        }],
        this_year_volume: 8900.0,
        last_year_volume: 52700.0,
        highest_monthly_volume: 6100.0,
        absolute_volume: 512072.0,
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    account: Arc<Mutex<FakeAccount>>,
}

impl FakeConnector {
    pub fn new(account: FakeAccount) -> Self {
        FakeConnector {
            account: Arc::new(Mutex::new(account)),
        }
    }

    pub fn account(&self) -> MutexGuard<'_, FakeAccount> {
        self.account.lock().unwrap()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, api: Api) -> Box<dyn Portal> {
        Box::new(FakePortal {
            api,
            account: self.account.clone(),
        })
    }
}

struct FakePortal {
    api: Api,
    account: Arc<Mutex<FakeAccount>>,
}

#[async_trait]
impl Portal for FakePortal {
    async fn check_credentials(&mut self) -> Result<bool, Error> {
        let mut account = self.account.lock().unwrap();
        if account.portal_down {
            return Err(Error::ApiError("503 Service Unavailable".to_string()));
        }
        account.logins += 1;
        Ok(account.password == self.api.password)
    }

    async fn meter_id(&mut self) -> Result<String, Error> {
        let account = self.account.lock().unwrap();
        account
            .default_meter_id
            .clone()
            .ok_or(Error::MeterIdNotFound)
    }

    async fn contracts(&mut self) -> Result<Vec<Contract>, Error> {
        self.account.lock().unwrap().contracts.clone()
    }

    async fn monthly_recent(&mut self) -> Result<MonthlyRecent, Error> {
        let meter_id = self.api.meter_id.clone().ok_or(Error::MissingMeterId)?;
        let account = self.account.lock().unwrap();
        if account.meters.contains(&meter_id) {
            Ok(monthly())
        } else {
            Err(Error::InvalidResponse(
                r#"{"error": "compteur inconnu"}"#.to_string(),
                "invalid type: map, expected a sequence".to_string(),
            ))
        }
    }

    async fn latest_meter_reading(&mut self) -> Result<MeterReading, Error> {
        self.account
            .lock()
            .unwrap()
            .readings
            .pop_front()
            .unwrap_or(Err(Error::NoReading))
    }

    async fn logout(&mut self) -> Result<(), Error> {
        self.account.lock().unwrap().logouts += 1;
        Ok(())
    }

    fn set_meter_id(&mut self, meter_id: String) {
        self.api.meter_id = Some(meter_id);
    }

    fn credentials(&self) -> &Api {
        &self.api
    }
}
