//! Setup wizard.
//!
//! A flow is driven one step at a time: `handle(None)` displays the current step,
//! `handle(Some(input))` submits it. Each call returns a [`FlowResult`] telling the caller what
//! to render next.

pub mod options;
pub mod pending;

pub use options::OptionsFlow;
pub use pending::{PendingFlows, FLOW_TTL};

use crate::api::{self, Connector, Error, Portal, KNOWN_PROVIDER_URLS};
use crate::model::{ConfigData, Contract};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const STEP_USER: &str = "user";
pub const STEP_GET_METER_ID: &str = "get_identifier";
pub const STEP_INIT: &str = "init";
pub const STEP_IMPORT: &str = "import_history";
pub const STEP_FINISH: &str = "finish";
const STEP_DONE: &str = "done";

pub const INPUT_URL: &str = "input_url";
pub const INPUT_USERNAME: &str = "input_username";
pub const INPUT_PASSWORD: &str = "input_password";
pub const INPUT_METER_ID: &str = "input_meter_id";

pub const ERROR_BASE: &str = "base";
pub const ERROR_LOGIN_FAILED: &str = "login_failed";
pub const ERROR_UNKNOWN: &str = "unknown";
pub const ERROR_METER_ID_NOT_FOUND: &str = "meter_id_not_found";
pub const ERROR_REQUIRED: &str = "required";
pub const ERROR_INVALID_URL: &str = "invalid_url";

pub const ABORT_FLOW_FINISHED: &str = "flow_finished";
pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
pub const ABORT_IMPORT_FAILED: &str = "import_failed";

pub type UserInput = HashMap<String, String>;
pub type FormErrors = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selector {
    Select {
        options: Vec<String>,
        custom_value: bool,
    },
    Email {
        autocomplete: &'static str,
    },
    Password {
        autocomplete: &'static str,
    },
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub selector: Selector,
}

/// What the host shows after a step. `D` is the payload of a created entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult<D> {
    Form {
        step_id: &'static str,
        data_schema: Vec<FormField>,
        errors: FormErrors,
    },
    Menu {
        step_id: &'static str,
        menu_options: Vec<&'static str>,
    },
    ShowProgress {
        step_id: &'static str,
        progress_action: &'static str,
    },
    ShowProgressDone {
        next_step_id: &'static str,
    },
    CreateEntry {
        title: String,
        data: D,
    },
    Abort {
        reason: &'static str,
    },
}

impl<D> FlowResult<D> {
    pub fn form(step_id: &'static str, data_schema: Vec<FormField>, errors: FormErrors) -> Self {
        FlowResult::Form {
            step_id,
            data_schema,
            errors,
        }
    }
}

/// Value of a required field as submitted, recording `required` against it when missing or blank.
fn raw_required_input<'a>(
    input: &'a UserInput,
    key: &'static str,
    errors: &mut FormErrors,
) -> Option<&'a str> {
    match input.get(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => Some(value.as_str()),
        None => {
            errors.insert(key.to_string(), ERROR_REQUIRED.to_string());
            None
        }
    }
}

/// Trimmed value of a required field.
fn required_input<'a>(
    input: &'a UserInput,
    key: &'static str,
    errors: &mut FormErrors,
) -> Option<&'a str> {
    raw_required_input(input, key, errors).map(str::trim)
}

fn user_schema(url: Option<&str>, username: Option<&str>) -> Vec<FormField> {
    vec![
        FormField {
            name: INPUT_URL,
            required: true,
            default: url
                .or_else(|| KNOWN_PROVIDER_URLS.first().copied())
                .map(str::to_owned),
            selector: Selector::Select {
                options: KNOWN_PROVIDER_URLS.iter().map(|u| u.to_string()).collect(),
                custom_value: true,
            },
        },
        /* autocomplete hints let browsers fill in the account */
        FormField {
            name: INPUT_USERNAME,
            required: true,
            default: username.map(str::to_owned),
            selector: Selector::Email {
                autocomplete: "username",
            },
        },
        FormField {
            name: INPUT_PASSWORD,
            required: true,
            default: None,
            selector: Selector::Password {
                autocomplete: "current-password",
            },
        },
    ]
}

fn meter_id_schema(default: &str) -> Vec<FormField> {
    vec![FormField {
        name: INPUT_METER_ID,
        required: true,
        default: Some(default.to_owned()),
        selector: Selector::Text,
    }]
}

/// State carried from the credential step to the meter id step.
struct FlowData {
    portal: Box<dyn Portal>,
    default_meter_id: Option<String>,
    contract: Contract,
}

/// Log in, then look up the default meter and the first contract of the account.
/// Errors are the form error codes to display.
async fn discover_account(
    connector: &dyn Connector,
    url: &str,
    username: &str,
    password: &str,
) -> Result<FlowData, &'static str> {
    let mut portal = connector.connect(api::api(
        url.to_owned(),
        username.to_owned(),
        password.to_owned(),
    ));

    match portal.check_credentials().await {
        Ok(true) => {}
        Ok(false) => return Err(ERROR_LOGIN_FAILED),
        Err(e) => {
            log::error!("Error checking credentials: {}", e);
            return Err(ERROR_UNKNOWN);
        }
    }

    /* The meter id can still be typed in by hand */
    let default_meter_id = match portal.meter_id().await {
        Ok(meter_id) => {
            log::debug!("default_meter_id {}", meter_id);
            Some(meter_id)
        }
        Err(e) => {
            log::debug!("Error getting meter id: {}", e);
            None
        }
    };

    let contract = portal
        .contracts()
        .await
        .and_then(|contracts| contracts.into_iter().next().ok_or(Error::NoContract))
        .map_err(|e| {
            log::error!("Error reading contracts: {}", e);
            ERROR_UNKNOWN
        })?;

    Ok(FlowData {
        portal,
        default_meter_id,
        contract,
    })
}

/// Links a portal account: credentials first, then the meter to follow.
pub struct ConfigFlow {
    connector: Arc<dyn Connector>,
    step: &'static str,
    data: Option<FlowData>,
}

impl ConfigFlow {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        ConfigFlow {
            connector,
            step: STEP_USER,
            data: None,
        }
    }

    pub fn step_id(&self) -> &'static str {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.step == STEP_DONE
    }

    pub async fn handle(&mut self, input: Option<UserInput>) -> FlowResult<ConfigData> {
        match self.step {
            STEP_USER => self.step_user(input).await,
            STEP_GET_METER_ID => self.step_get_identifier(input).await,
            _ => FlowResult::Abort {
                reason: ABORT_FLOW_FINISHED,
            },
        }
    }

    /// Credentials step.
    pub async fn step_user(&mut self, input: Option<UserInput>) -> FlowResult<ConfigData> {
        let mut errors = FormErrors::new();

        let input = match input {
            Some(input) => input,
            None => return FlowResult::form(STEP_USER, user_schema(None, None), errors),
        };

        let url = required_input(&input, INPUT_URL, &mut errors);
        let username = required_input(&input, INPUT_USERNAME, &mut errors);
        // Passwords may legitimately start or end with spaces.
        let password = raw_required_input(&input, INPUT_PASSWORD, &mut errors);

        if let Some(url) = url {
            if reqwest::Url::parse(url).is_err() {
                errors.insert(INPUT_URL.to_string(), ERROR_INVALID_URL.to_string());
            }
        }

        if let (true, Some(url), Some(username), Some(password)) =
            (errors.is_empty(), url, username, password)
        {
            match discover_account(self.connector.as_ref(), url, username, password).await {
                Ok(data) => {
                    self.data = Some(data);
                    self.step = STEP_GET_METER_ID;
                    return self.step_get_identifier(None).await;
                }
                Err(code) => {
                    errors.insert(ERROR_BASE.to_string(), code.to_string());
                }
            }
        }

        FlowResult::form(STEP_USER, user_schema(url, username), errors)
    }

    /// Meter id confirmation step.
    pub async fn step_get_identifier(
        &mut self,
        input: Option<UserInput>,
    ) -> FlowResult<ConfigData> {
        let data = match self.data.as_mut() {
            Some(data) => data,
            None => {
                return FlowResult::Abort {
                    reason: ERROR_UNKNOWN,
                }
            }
        };
        log::debug!("get_identifier, default = {:?}", data.default_meter_id);

        let mut errors = FormErrors::new();

        match input {
            Some(input) => {
                if let Some(meter_id) = required_input(&input, INPUT_METER_ID, &mut errors) {
                    data.portal.set_meter_id(meter_id.to_owned());

                    /* A meter id is valid when its own data can be read */
                    match data.portal.monthly_recent().await {
                        Ok(_) => {
                            let api = data.portal.credentials();
                            let config = ConfigData {
                                username: api.username.to_owned(),
                                password: api.password.to_owned(),
                                meter_id: meter_id.to_owned(),
                                url: api.url.to_owned(),
                            };
                            let title = data.contract.brand_code.to_owned();

                            self.step = STEP_DONE;
                            self.data = None;
                            return FlowResult::CreateEntry {
                                title,
                                data: config,
                            };
                        }
                        Err(e) => {
                            log::error!("Error validating meter id {}: {}", meter_id, e);
                            errors.insert(ERROR_BASE.to_string(), ERROR_UNKNOWN.to_string());
                        }
                    }
                    data.default_meter_id = Some(meter_id.to_owned());
                }
            }
            None => {
                if data.default_meter_id.is_none() {
                    errors.insert(
                        ERROR_BASE.to_string(),
                        ERROR_METER_ID_NOT_FOUND.to_string(),
                    );
                }
            }
        }

        FlowResult::form(
            STEP_GET_METER_ID,
            meter_id_schema(data.default_meter_id.as_deref().unwrap_or_default()),
            errors,
        )
    }
}
