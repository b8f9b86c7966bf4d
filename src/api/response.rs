use serde::de;
use serde::Deserialize;
use serde_json::Value;

/* Contract list, `/donnees-contrats` */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractData {
    pub number: String,
    pub brand_code: String,
    #[serde(default)]
    pub address: Option<String>,
}

pub type GetContracts = Vec<ContractData>;

/* Daily consumption, `/statJData/<year>/<month>/<meter>`: `[date, day_m3, total_m3]` */
#[derive(Deserialize)]
pub struct DailyRow(pub String, pub f64, pub f64);

pub type GetDailyData = Vec<DailyRow>;

/* Monthly consumption row: `[label, year, month_m3, index_m3]` */
#[derive(Deserialize)]
pub struct MonthlyRow(pub String, pub i32, pub f64, pub f64);

/// `/statMData/<meter>` answers monthly rows followed by three bare numbers:
/// this year, last year and the highest month, all in m3.
pub struct GetMonthlyData {
    pub rows: Vec<MonthlyRow>,
    pub this_year: f64,
    pub last_year: f64,
    pub highest: f64,
}

fn pop_volume<E: de::Error>(values: &mut Vec<Value>, what: &'static str) -> Result<f64, E> {
    values
        .pop()
        .as_ref()
        .and_then(Value::as_f64)
        .ok_or_else(|| de::Error::missing_field(what))
}

impl<'de> Deserialize<'de> for GetMonthlyData {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let mut values = Vec::<Value>::deserialize(d)?;

        /* Summary figures come last, in reverse order */
        let highest = pop_volume(&mut values, "highest_monthly_volume")?;
        let last_year = pop_volume(&mut values, "last_year_volume")?;
        let this_year = pop_volume(&mut values, "this_year_volume")?;

        let rows = values
            .into_iter()
            .map(|v| MonthlyRow::deserialize(v).map_err(de::Error::custom))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(GetMonthlyData {
            rows,
            this_year,
            last_year,
            highest,
        })
    }
}
