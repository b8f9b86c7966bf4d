pub mod endpoint;
pub mod error;
pub mod portal;
pub mod response;

use crate::model;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
pub use error::Error;
use lazy_static::lazy_static;
pub use portal::{Connector, Portal, PortalClient, RemoteConnector};
use regex::Regex;
use reqwest::Response;
use response::{GetContracts, GetDailyData, GetMonthlyData};
use serde_json::Value;

use std::collections::HashMap;

/// Base URLs of the provider portals sharing the same backend. The first one is the default.
pub const KNOWN_PROVIDER_URLS: &[&str] = &[
    "https://www.toutsurmoneau.fr/mon-compte-en-ligne",
    "https://www.eau-olivet.fr/mon-compte-en-ligne",
];

const M3_TO_LITERS: f64 = 1000.0;

lazy_static! {
    static ref CSRF_TOKEN: Regex = Regex::new(r#"name="_csrf_token"\s+value="([^"]+)""#).unwrap();
    static ref METER_ID: Regex = Regex::new(r#"data-compteur="([^"]+)""#).unwrap();
}

/// Portal paths are appended to `url`, so a trailing `/` is dropped.
pub fn api(url: String, username: String, password: String) -> model::Api {
    model::Api {
        url: url.trim_end_matches('/').to_owned(),
        username,
        password,
        meter_id: None,
    }
}

fn extract_csrf_token(page: &str) -> Result<String, Error> {
    CSRF_TOKEN
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
        .ok_or_else(|| Error::LoginError("No CSRF token found on login page".to_string()))
}

fn extract_meter_id(page: &str) -> Option<String> {
    METER_ID
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Map Non-200 portal response to Error
fn map_api_err(error: reqwest::Error) -> Error {
    match error.status() {
        Some(http::StatusCode::TOO_MANY_REQUESTS) => Error::RateExceeded(error.to_string()),
        Some(http::StatusCode::UNAUTHORIZED) | Some(http::StatusCode::FORBIDDEN) => {
            Error::LoginError(error.to_string())
        }
        _ => Error::ApiError(error.to_string()),
    }
}

/// The portal answers an accepted login with a redirect away from the login page. A rejected
/// one renders the login form again (200) or redirects back to it.
fn check_login_redirect(response: &Response) -> Result<(), Error> {
    let status = response.status();
    let location = response
        .headers()
        .get(http::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if status.is_redirection() && !location.contains(endpoint::LOGIN) {
        Ok(())
    } else {
        Err(Error::LoginError(format!(
            "Credentials rejected (server responded {})",
            status
        )))
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, Error> {
    NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .map_err(|e| Error::InvalidResponse(s.to_owned(), e.to_string()))
}

pub async fn login(api: &model::Api) -> Result<model::LoggedInApi, Error> {
    let client = reqwest::ClientBuilder::new()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .or(Err(Error::InternalError))?;
    let url = format!("{}{}", api.url, endpoint::LOGIN);

    let page = client
        .get(&url)
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(map_api_err)?
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading login page: {}", e)))?;

    let form = HashMap::from([
        ("_username", api.username.to_owned()),
        ("_password", api.password.to_owned()),
        ("_csrf_token", extract_csrf_token(&page)?),
    ]);

    let response = client
        .post(&url)
        .form(&form)
        .send()
        .await
        .map_err(map_api_err)?;
    check_login_redirect(&response)?;

    Ok(model::LoggedInApi {
        url: api.url.to_owned(),
        client,
    })
}

/// `Ok(false)` when the portal rejects the credentials, `Err` when it could not be asked.
pub async fn check_credentials(api: &model::Api) -> Result<bool, Error> {
    match login(api).await {
        Ok(_) => Ok(true),
        Err(Error::LoginError(e)) => {
            log::debug!("login rejected for {}: {}", api.username, e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

pub async fn logout(api: &model::LoggedInApi) -> Result<(), Error> {
    let url = format!("{}{}", api.url, endpoint::LOGOUT);

    api.client
        .get(url)
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(map_api_err)
        .map(|_| ())
}

async fn get_text(api: &model::LoggedInApi, path: &str) -> Result<String, Error> {
    let url = format!("{}{}", api.url, path);

    let response = api
        .client
        .get(url)
        .header("X-Requested-With", "XMLHttpRequest")
        .send()
        .await
        .map_err(map_api_err)?;

    /* An expired session is redirected to the login page */
    if response.status().is_redirection() {
        return Err(Error::LoginError(format!(
            "Session expired (server responded {})",
            response.status()
        )));
    }

    response
        .error_for_status()
        .map_err(map_api_err)?
        .text()
        .await
        .map_err(|e| Error::ApiError(format!("Error reading portal response: {}", e)))
}

async fn get_json(api: &model::LoggedInApi, path: &str) -> Result<Value, Error> {
    let text = get_text(api, path).await?;

    log::trace!("path: {}, response_text: {}", path, text);

    if text.trim_start().starts_with('<') {
        return Err(Error::LoginError(
            "Session expired (received a page instead of data)".to_string(),
        ));
    }

    serde_json::from_str::<Value>(&text).map_err(|e| Error::InvalidResponse(text, e.to_string()))
}

/// Read the default meter id from the account dashboard.
pub async fn meter_id(api: &model::LoggedInApi) -> Result<String, Error> {
    get_text(api, endpoint::DASHBOARD)
        .await
        .map(|page| extract_meter_id(&page))?
        .ok_or(Error::MeterIdNotFound)
}

pub async fn contracts(api: &model::LoggedInApi) -> Result<Vec<model::Contract>, Error> {
    get_json(api, endpoint::CONTRACTS)
        .await
        .map(serde_json::from_value::<GetContracts>)?
        .or(Err(Error::UnexpectedApiResponse))
        .map(|response| {
            response
                .into_iter()
                .map(|resp| model::Contract {
                    number: resp.number,
                    brand_code: resp.brand_code,
                    address: resp.address,
                })
                .collect()
        })
}

/// Daily volumes of `meter_id` for one calendar month.
pub async fn daily_for_month(
    api: &model::LoggedInApi,
    meter_id: &str,
    year: i32,
    month: u32,
) -> Result<Vec<model::DailyVolume>, Error> {
    let path = format!("{}/{}/{}/{}", endpoint::DAILY_DATA, year, month, meter_id);

    get_json(api, &path)
        .await
        .map(serde_json::from_value::<GetDailyData>)?
        .or(Err(Error::UnexpectedApiResponse))?
        .into_iter()
        .map(|row| -> Result<model::DailyVolume, Error> {
            Ok(model::DailyVolume {
                date: parse_date(&row.0)?,
                day: row.1 * M3_TO_LITERS,
                total: row.2 * M3_TO_LITERS,
            })
        })
        .collect()
}

pub async fn monthly_recent(
    api: &model::LoggedInApi,
    meter_id: &str,
) -> Result<model::MonthlyRecent, Error> {
    let path = format!("{}/{}", endpoint::MONTHLY_DATA, meter_id);

    let value = get_json(api, &path).await?;

    serde_json::from_value::<GetMonthlyData>(value)
        .map_err(|e| Error::InvalidResponse(path, e.to_string()))
        .map(|response| model::MonthlyRecent {
            absolute_volume: response
                .rows
                .last()
                .map(|row| row.3 * M3_TO_LITERS)
                .unwrap_or_default(),
            monthly: response
                .rows
                .into_iter()
                .map(|row| model::MonthlyVolume {
                    label: row.0,
                    year: row.1,
                    volume: row.2 * M3_TO_LITERS,
                })
                .collect(),
            this_year_volume: response.this_year * M3_TO_LITERS,
            last_year_volume: response.last_year * M3_TO_LITERS,
            highest_monthly_volume: response.highest * M3_TO_LITERS,
        })
}

/// Latest day with a non-zero meter index. Days not yet read by the portal come back as zeros.
fn latest_reading(days: &[model::DailyVolume]) -> Option<model::MeterReading> {
    days.iter()
        .rev()
        .find(|d| d.total > 0.0)
        .map(|d| model::MeterReading {
            date: d.date,
            volume: d.total,
        })
}

/// Read the most recent meter index, looking at the month of `today` then at the one before.
pub async fn latest_meter_reading(
    api: &model::LoggedInApi,
    meter_id: &str,
    today: NaiveDate,
) -> Result<model::MeterReading, Error> {
    let previous_month = today
        .with_day(1)
        .and_then(|d| d.pred_opt())
        .ok_or(Error::InternalError)?;

    for day in [today, previous_month] {
        let days = daily_for_month(api, meter_id, day.year(), day.month()).await?;
        if let Some(reading) = latest_reading(&days) {
            return Ok(reading);
        }
        log::debug!(
            "no reading for meter {} in {}-{:02}",
            meter_id,
            day.year(),
            day.month()
        );
    }

    Err(Error::NoReading)
}

#[cfg(test)]
mod test {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};
    use std::fs;
    use std::path::PathBuf;

    fn read_resource(filename: &str) -> String {
        let mut d = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        d.push(format!("resources/test/{}", filename));
        fs::read_to_string(d.as_path()).unwrap()
    }

    fn credentials(server: &ServerGuard) -> model::Api {
        api(
            server.url(),
            "user@example.com".to_string(),
            "secret".to_string(),
        )
    }

    async fn mock_login_page(server: &mut ServerGuard) {
        server
            .mock("GET", endpoint::LOGIN)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(read_resource("login.html"))
            .create_async()
            .await;
    }

    async fn mock_login_accepted(server: &mut ServerGuard) {
        mock_login_page(server).await;
        server
            .mock("POST", endpoint::LOGIN)
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("_username".into(), "user@example.com".into()),
                Matcher::UrlEncoded("_password".into(), "secret".into()),
                Matcher::UrlEncoded("_csrf_token".into(), "a1b2c3d4e5".into()),
            ]))
            .with_status(302)
            .with_header("location", "/tableau-de-bord")
            .create_async()
            .await;
    }

    fn logged_in(server: &ServerGuard) -> model::LoggedInApi {
        model::LoggedInApi {
            url: server.url(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn extract_tokens() {
        assert_eq!(
            "a1b2c3d4e5",
            extract_csrf_token(&read_resource("login.html")).unwrap()
        );
        assert_eq!(
            Some("12345678".to_string()),
            extract_meter_id(&read_resource("dashboard.html"))
        );
        assert_eq!(None, extract_meter_id("<html></html>"));
        assert!(matches!(
            extract_csrf_token("<html></html>"),
            Err(Error::LoginError(_))
        ));
    }

    #[test]
    fn parse_dates() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        assert_eq!(expected, parse_date("03/05/2024").unwrap());
        assert_eq!(expected, parse_date("2024-05-03 00:00:00").unwrap());
        assert!(parse_date("yesterday").is_err());
    }

    #[test]
    fn latest_reading_skips_unread_days() {
        let day = |d, total| model::DailyVolume {
            date: NaiveDate::from_ymd_opt(2024, 5, d).unwrap(),
            day: 0.0,
            total,
        };
        let days = vec![day(1, 1000.0), day(2, 1100.0), day(3, 0.0)];
        assert_eq!(
            Some(model::MeterReading {
                date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                volume: 1100.0
            }),
            latest_reading(&days)
        );
        assert_eq!(None, latest_reading(&[day(1, 0.0)]));
    }

    #[tokio::test]
    async fn login_accepted() {
        let mut server = Server::new_async().await;
        mock_login_accepted(&mut server).await;

        let logged_in = login(&credentials(&server)).await.unwrap();
        assert_eq!(server.url(), logged_in.url);
        assert!(check_credentials(&credentials(&server)).await.unwrap());
    }

    #[tokio::test]
    async fn login_with_trailing_slash_url() {
        let mut server = Server::new_async().await;
        mock_login_accepted(&mut server).await;

        let api = api(
            format!("{}/", server.url()),
            "user@example.com".to_string(),
            "secret".to_string(),
        );
        assert_eq!(server.url(), api.url);
        assert!(check_credentials(&api).await.unwrap());
    }

    #[tokio::test]
    async fn login_rejected() {
        let mut server = Server::new_async().await;
        mock_login_page(&mut server).await;
        server
            .mock("POST", endpoint::LOGIN)
            .with_status(200)
            .with_body(read_resource("login.html"))
            .create_async()
            .await;

        assert!(matches!(
            login(&credentials(&server)).await,
            Err(Error::LoginError(_))
        ));
        assert!(!check_credentials(&credentials(&server)).await.unwrap());
    }

    #[tokio::test]
    async fn login_redirected_back_to_form() {
        let mut server = Server::new_async().await;
        mock_login_page(&mut server).await;
        server
            .mock("POST", endpoint::LOGIN)
            .with_status(302)
            .with_header("location", endpoint::LOGIN)
            .create_async()
            .await;

        assert!(!check_credentials(&credentials(&server)).await.unwrap());
    }

    #[tokio::test]
    async fn check_credentials_portal_down() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", endpoint::LOGIN)
            .with_status(503)
            .create_async()
            .await;

        assert!(matches!(
            check_credentials(&credentials(&server)).await,
            Err(Error::ApiError(_))
        ));
    }

    #[tokio::test]
    async fn dashboard_meter_id() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", endpoint::DASHBOARD)
            .with_status(200)
            .with_body(read_resource("dashboard.html"))
            .create_async()
            .await;

        assert_eq!("12345678", meter_id(&logged_in(&server)).await.unwrap());
    }

    #[tokio::test]
    async fn dashboard_without_meter_id() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", endpoint::DASHBOARD)
            .with_status(200)
            .with_body("<html><body></body></html>")
            .create_async()
            .await;

        assert_eq!(
            Err(Error::MeterIdNotFound),
            meter_id(&logged_in(&server)).await
        );
    }

    #[tokio::test]
    async fn contract_list() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", endpoint::CONTRACTS)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(read_resource("contracts.json"))
            .create_async()
            .await;

        let contracts = contracts(&logged_in(&server)).await.unwrap();
        assert_eq!(2, contracts.len());
        assert_eq!("SEV", contracts[0].brand_code);
        assert_eq!(
            Some("1 rue de la Source, 75001 Paris".to_string()),
            contracts[0].address
        );
    }

    #[tokio::test]
    async fn expired_session_is_a_login_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", endpoint::CONTRACTS)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(read_resource("login.html"))
            .create_async()
            .await;
        server
            .mock("GET", endpoint::DASHBOARD)
            .with_status(302)
            .with_header("location", endpoint::LOGIN)
            .create_async()
            .await;

        let api = logged_in(&server);
        assert!(matches!(contracts(&api).await, Err(Error::LoginError(_))));
        assert!(matches!(meter_id(&api).await, Err(Error::LoginError(_))));
    }

    #[tokio::test]
    async fn rate_limited() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", endpoint::CONTRACTS)
            .with_status(429)
            .create_async()
            .await;

        assert!(matches!(
            contracts(&logged_in(&server)).await,
            Err(Error::RateExceeded(_))
        ));
    }

    #[tokio::test]
    async fn monthly_volumes_in_liters() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/statMData/12345678")
            .with_status(200)
            .with_body(read_resource("statMData.json"))
            .create_async()
            .await;

        let recent = monthly_recent(&logged_in(&server), "12345678")
            .await
            .unwrap();
        assert_eq!(4, recent.monthly.len());
        assert_eq!("Janvier", recent.monthly[0].label);
        assert_eq!(2100.0, recent.monthly[0].volume);
        assert_eq!(8900.0, recent.this_year_volume);
        assert_eq!(52700.0, recent.last_year_volume);
        assert_eq!(6100.0, recent.highest_monthly_volume);
        assert_eq!(512072.0, recent.absolute_volume);
    }

    #[tokio::test]
    async fn monthly_unknown_meter() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/statMData/00000000")
            .with_status(200)
            .with_body(r#"{"error": "compteur inconnu"}"#)
            .create_async()
            .await;

        assert!(matches!(
            monthly_recent(&logged_in(&server), "00000000").await,
            Err(Error::InvalidResponse(_, _))
        ));
    }

    #[tokio::test]
    async fn latest_reading_in_current_month() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/statJData/2024/5/12345678")
            .with_status(200)
            .with_body(read_resource("statJData.json"))
            .create_async()
            .await;

        let today = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let reading = latest_meter_reading(&logged_in(&server), "12345678", today)
            .await
            .unwrap();
        assert_eq!(NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(), reading.date);
        assert_eq!(512463.0, reading.volume);
    }

    #[tokio::test]
    async fn latest_reading_falls_back_to_previous_month() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/statJData/2024/6/12345678")
            .with_status(200)
            .with_body(r#"[["01/06/2024", 0.0, 0.0]]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/statJData/2024/5/12345678")
            .with_status(200)
            .with_body(read_resource("statJData.json"))
            .create_async()
            .await;

        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let reading = latest_meter_reading(&logged_in(&server), "12345678", today)
            .await
            .unwrap();
        assert_eq!(512463.0, reading.volume);
    }

    #[tokio::test]
    async fn latest_reading_none_available() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", Matcher::Regex(r"^/statJData/2024/[56]/12345678$".to_string()))
            .with_status(200)
            .with_body("[]")
            .expect(2)
            .create_async()
            .await;

        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(
            Err(Error::NoReading),
            latest_meter_reading(&logged_in(&server), "12345678", today).await
        );
    }
}
