use super::Error;
use crate::model;
use async_trait::async_trait;

/// Remote water portal as seen by the setup wizard and the meter sensor.
#[async_trait]
pub trait Portal: Send + Sync {
    async fn check_credentials(&mut self) -> Result<bool, Error>;

    /// Default meter of the account, as shown on its dashboard.
    async fn meter_id(&mut self) -> Result<String, Error>;

    async fn contracts(&mut self) -> Result<Vec<model::Contract>, Error>;

    /// Recent monthly volumes of the configured meter.
    async fn monthly_recent(&mut self) -> Result<model::MonthlyRecent, Error>;

    async fn latest_meter_reading(&mut self) -> Result<model::MeterReading, Error>;

    async fn logout(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn set_meter_id(&mut self, meter_id: String);

    fn credentials(&self) -> &model::Api;
}

/// Builds portal clients from credentials.
pub trait Connector: Send + Sync {
    fn connect(&self, api: model::Api) -> Box<dyn Portal>;
}

pub struct RemoteConnector;

impl Connector for RemoteConnector {
    fn connect(&self, api: model::Api) -> Box<dyn Portal> {
        Box::new(PortalClient::new(api))
    }
}

/// `Portal` over HTTP. Logs in on first use and keeps the session until the portal rejects it.
pub struct PortalClient {
    api: model::Api,
    session: Option<model::LoggedInApi>,
}

impl PortalClient {
    pub fn new(api: model::Api) -> Self {
        PortalClient { api, session: None }
    }

    async fn session(&mut self) -> Result<&model::LoggedInApi, Error> {
        if self.session.is_none() {
            log::debug!("logging in to {} as {}", self.api.url, self.api.username);
            self.session = Some(super::login(&self.api).await?);
        }
        self.session.as_ref().ok_or(Error::InternalError)
    }

    fn configured_meter_id(&self) -> Result<String, Error> {
        self.api.meter_id.clone().ok_or(Error::MissingMeterId)
    }

    /// Drop the session after a login error so that the next call logs in again.
    fn track<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(Error::LoginError(e)) = &result {
            log::debug!("dropping portal session: {}", e);
            self.session = None;
        }
        result
    }
}

#[async_trait]
impl Portal for PortalClient {
    async fn check_credentials(&mut self) -> Result<bool, Error> {
        match super::login(&self.api).await {
            Ok(session) => {
                self.session = Some(session);
                Ok(true)
            }
            Err(Error::LoginError(e)) => {
                log::debug!("login rejected for {}: {}", self.api.username, e);
                self.session = None;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn meter_id(&mut self) -> Result<String, Error> {
        let result = match self.session().await {
            Ok(session) => super::meter_id(session).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn contracts(&mut self) -> Result<Vec<model::Contract>, Error> {
        let result = match self.session().await {
            Ok(session) => super::contracts(session).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn monthly_recent(&mut self) -> Result<model::MonthlyRecent, Error> {
        let meter_id = self.configured_meter_id()?;
        let result = match self.session().await {
            Ok(session) => super::monthly_recent(session, &meter_id).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn latest_meter_reading(&mut self) -> Result<model::MeterReading, Error> {
        let meter_id = self.configured_meter_id()?;
        let today = chrono::Local::now().date_naive();
        let result = match self.session().await {
            Ok(session) => super::latest_meter_reading(session, &meter_id, today).await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    async fn logout(&mut self) -> Result<(), Error> {
        match self.session.take() {
            Some(session) => super::logout(&session).await,
            None => Ok(()),
        }
    }

    fn set_meter_id(&mut self, meter_id: String) {
        self.api.meter_id = Some(meter_id);
    }

    fn credentials(&self) -> &model::Api {
        &self.api
    }
}
