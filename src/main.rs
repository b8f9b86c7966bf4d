#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use portail_eau_rs::api::{self, RemoteConnector};
use portail_eau_rs::entries::{ConfigEntries, ConfigEntry, EntryError};
use portail_eau_rs::flow::{ConfigFlow, FlowResult, OptionsFlow, PendingFlows, UserInput, FLOW_TTL};
use portail_eau_rs::integration::{Hub, Publisher};
use portail_eau_rs::model::ConfigData;
use portail_eau_rs::sensor::{SensorState, SCAN_INTERVAL};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Build, Rocket, State};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

mod metrics;

const ENTRIES_PATH: &str = "entries.json";

#[derive(Clone, serde::Deserialize)]
pub struct PortailEauConfig {
    entries_path: String,
    scan_interval: u64,
}

/// Structure containing state for API handlers.
pub struct StateData {
    hub: Hub,
    entries: Mutex<ConfigEntries>,
    /// Flows in progress. A flow is taken out while one of its steps runs.
    flows: Mutex<PendingFlows<ConfigFlow>>,
    options_flows: Mutex<PendingFlows<OptionsFlow>>,
}

#[derive(Serialize)]
struct FlowResponse<D> {
    flow_id: String,
    #[serde(flatten)]
    result: FlowResult<D>,
}

pub fn read_settings() -> Result<PortailEauConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .set_default("entries_path", ENTRIES_PATH)?
        .set_default("scan_interval", SCAN_INTERVAL.as_secs() as i64)?
        .merge(config::Environment::with_prefix("EAU"))?;

    settings.try_into()
}

#[post("/flows")]
async fn start_flow_route(state: &State<StateData>) -> Json<FlowResponse<ConfigData>> {
    let mut flow = ConfigFlow::new(state.hub.connector());
    let result = flow.handle(None).await;

    let flow_id = state.flows.lock().await.add(flow);
    Json(FlowResponse { flow_id, result })
}

#[post("/flows/<flow_id>", data = "<input>")]
async fn flow_step_route(
    flow_id: String,
    input: Option<Json<UserInput>>,
    state: &State<StateData>,
) -> Result<Option<Json<FlowResponse<ConfigData>>>, Status> {
    let flow = state.flows.lock().await.take(&flow_id);
    let mut flow = match flow {
        Some(flow) => flow,
        None => return Ok(None),
    };

    let result = flow.handle(input.map(Json::into_inner)).await;
    log::debug!("flow {} now at step {}", flow_id, flow.step_id());
    if !flow.is_finished() {
        state.flows.lock().await.put_back(flow_id.clone(), flow);
    }

    let result = state
        .hub
        .create_entry(&state.entries, result)
        .await
        .map_err(|e| {
            log::error!("Error storing entry: {}", e);
            Status::InternalServerError
        })?;
    Ok(Some(Json(FlowResponse { flow_id, result })))
}

#[delete("/flows/<flow_id>")]
async fn abort_flow_route(flow_id: String, state: &State<StateData>) -> Option<Status> {
    let flow = state.flows.lock().await.take(&flow_id);
    flow.map(|_| Status::NoContent)
}

#[get("/entries")]
async fn entries_route(state: &State<StateData>) -> Json<Vec<ConfigEntry>> {
    let entries = state.entries.lock().await;
    Json(entries.entries().iter().map(ConfigEntry::redacted).collect())
}

#[delete("/entries/<entry_id>")]
async fn remove_entry_route(
    entry_id: String,
    state: &State<StateData>,
) -> Result<Option<Status>, Status> {
    let removed = state.entries.lock().await.remove(&entry_id);
    match removed {
        Ok(entry) => {
            if let Some(last) = state.hub.unload_entry(&entry.entry_id).await {
                metrics::forget(&last);
            }
            Ok(Some(Status::NoContent))
        }
        Err(EntryError::UnknownEntry(_)) => Ok(None),
        Err(e) => {
            log::error!("Error removing entry {}: {}", entry_id, e);
            Err(Status::InternalServerError)
        }
    }
}

#[post("/entries/<entry_id>/options")]
async fn start_options_route(
    entry_id: String,
    state: &State<StateData>,
) -> Option<Json<FlowResponse<Value>>> {
    let entry = state.entries.lock().await.get(&entry_id).cloned()?;
    let mut flow = OptionsFlow::new(entry, state.hub.connector());
    let result = flow.handle(None).await;

    let flow_id = state.options_flows.lock().await.add(flow);
    Some(Json(FlowResponse { flow_id, result }))
}

#[post("/options/<flow_id>", data = "<input>")]
async fn options_step_route(
    flow_id: String,
    input: Option<Json<UserInput>>,
    state: &State<StateData>,
) -> Result<Option<Json<FlowResponse<Value>>>, Status> {
    let flow = state.options_flows.lock().await.take(&flow_id);
    let mut flow = match flow {
        Some(flow) => flow,
        None => return Ok(None),
    };

    let result = flow.handle(input.map(Json::into_inner)).await;
    let entry_id = flow.entry_id().to_owned();
    if !flow.is_finished() {
        state.options_flows.lock().await.put_back(flow_id.clone(), flow);
    }

    if let FlowResult::CreateEntry { data, .. } = &result {
        let updated = state
            .entries
            .lock()
            .await
            .update_options(&entry_id, data.clone());
        match updated {
            Ok(entry) => {
                if let Err(e) = state.hub.reload_entry(&entry).await {
                    log::error!("Error reloading entry {}: {}", entry_id, e);
                }
            }
            Err(EntryError::UnknownEntry(_)) => return Ok(None),
            Err(e) => {
                log::error!("Error storing options of entry {}: {}", entry_id, e);
                return Err(Status::InternalServerError);
            }
        }
    }

    Ok(Some(Json(FlowResponse { flow_id, result })))
}

#[delete("/options/<flow_id>")]
async fn abort_options_route(flow_id: String, state: &State<StateData>) -> Option<Status> {
    let flow = state.options_flows.lock().await.take(&flow_id);
    flow.map(|_| Status::NoContent)
}

#[get("/sensors")]
async fn sensors_route(state: &State<StateData>) -> Json<Vec<SensorState>> {
    Json(state.hub.states().await)
}

#[post("/sensors/<entry_id>/update")]
async fn update_sensor_route(
    entry_id: String,
    state: &State<StateData>,
) -> Result<Option<Json<SensorState>>, api::Error> {
    match state.hub.update_entry(&entry_id).await {
        Some(result) => result.map(|s| Some(Json(s))),
        None => Ok(None),
    }
}

#[get("/metrics")]
async fn metrics_route() -> Result<String, api::Error> {
    metrics::read().await
}

#[launch]
async fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = read_settings().expect("Configuration error");
    let entries = ConfigEntries::load(&settings.entries_path).expect("Cannot read config entries");

    let publisher: Publisher = Arc::new(metrics::observe);
    let hub = Hub::new(
        Arc::new(RemoteConnector),
        Duration::from_secs(settings.scan_interval),
        publisher,
    );

    for entry in entries.entries() {
        if let Err(e) = hub.setup_entry(entry).await {
            log::error!(
                "Error setting up entry {} ({}): {}",
                entry.entry_id,
                entry.title,
                e
            );
        }
    }

    let state = StateData {
        hub,
        entries: Mutex::new(entries),
        flows: Mutex::new(PendingFlows::new(FLOW_TTL)),
        options_flows: Mutex::new(PendingFlows::new(FLOW_TTL)),
    };

    rocket::build().manage(state).mount(
        "/",
        routes![
            start_flow_route,
            flow_step_route,
            abort_flow_route,
            entries_route,
            remove_entry_route,
            start_options_route,
            options_step_route,
            abort_options_route,
            sensors_route,
            update_sensor_route,
            metrics_route
        ],
    )
}
