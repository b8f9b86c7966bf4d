use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type Liters = f64;

/// Credentials of a portal account, optionally bound to one meter.
#[derive(Debug, Clone, PartialEq)]
pub struct Api {
    pub url: String,
    pub username: String,
    pub password: String,
    pub meter_id: Option<String>,
}

#[derive(Debug)]
pub struct LoggedInApi {
    pub url: String,
    pub client: reqwest::Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub number: String,
    pub brand_code: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyVolume {
    pub date: NaiveDate,
    pub day: Liters,
    pub total: Liters,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub date: NaiveDate,
    pub volume: Liters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyVolume {
    pub label: String,
    pub year: i32,
    pub volume: Liters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyRecent {
    pub monthly: Vec<MonthlyVolume>,
    pub this_year_volume: Liters,
    pub last_year_volume: Liters,
    pub highest_monthly_volume: Liters,
    pub absolute_volume: Liters,
}

/// The record persisted once the setup wizard completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigData {
    pub username: String,
    pub password: String,
    pub meter_id: String,
    pub url: String,
}

impl From<&ConfigData> for Api {
    fn from(data: &ConfigData) -> Self {
        Api {
            url: data.url.trim_end_matches('/').to_owned(),
            username: data.username.to_owned(),
            password: data.password.to_owned(),
            meter_id: Some(data.meter_id.to_owned()),
        }
    }
}
