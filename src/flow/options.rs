//! Options flow of an existing entry: imports the recent monthly history of its meter.

use super::{
    FlowResult, FormErrors, UserInput, ABORT_FLOW_FINISHED, ABORT_IMPORT_FAILED, STEP_DONE,
    STEP_FINISH, STEP_IMPORT, STEP_INIT,
};
use crate::api::{Connector, Error};
use crate::entries::{ConfigEntry, OPTION_MONTHLY_HISTORY};
use crate::model::{Api, MonthlyRecent};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Menu choice submitted on the `init` step.
pub const INPUT_NEXT_STEP: &str = "next_step_id";

pub struct OptionsFlow {
    entry: ConfigEntry,
    connector: Arc<dyn Connector>,
    step: &'static str,
    import: Option<JoinHandle<Result<MonthlyRecent, Error>>>,
    imported: Option<MonthlyRecent>,
}

impl OptionsFlow {
    pub fn new(entry: ConfigEntry, connector: Arc<dyn Connector>) -> Self {
        log::debug!("options flow started for entry {}", entry.entry_id);
        OptionsFlow {
            entry,
            connector,
            step: STEP_INIT,
            import: None,
            imported: None,
        }
    }

    pub fn entry_id(&self) -> &str {
        &self.entry.entry_id
    }

    pub fn step_id(&self) -> &'static str {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.step == STEP_DONE
    }

    pub async fn handle(&mut self, input: Option<UserInput>) -> FlowResult<Value> {
        match self.step {
            STEP_INIT => self.step_init(input).await,
            STEP_IMPORT => self.step_import_history().await,
            STEP_FINISH => self.step_finish(input),
            _ => FlowResult::Abort {
                reason: ABORT_FLOW_FINISHED,
            },
        }
    }

    pub async fn step_init(&mut self, input: Option<UserInput>) -> FlowResult<Value> {
        match input.as_ref().and_then(|i| i.get(INPUT_NEXT_STEP)) {
            Some(next) if next == STEP_IMPORT => {
                self.step = STEP_IMPORT;
                self.step_import_history().await
            }
            _ => FlowResult::Menu {
                step_id: STEP_INIT,
                menu_options: vec![STEP_IMPORT],
            },
        }
    }

    /// Shows progress until the background import completes.
    pub async fn step_import_history(&mut self) -> FlowResult<Value> {
        let task = match self.import.take() {
            Some(task) => task,
            None => {
                log::debug!("importing history of entry {}", self.entry.entry_id);
                let mut portal = self.connector.connect(Api::from(&self.entry.data));
                tokio::spawn(async move {
                    let result = portal.monthly_recent().await;
                    if let Err(e) = portal.logout().await {
                        log::warn!("Error while logging out: {}", e);
                    }
                    result
                })
            }
        };

        if !task.is_finished() {
            self.import = Some(task);
            return FlowResult::ShowProgress {
                step_id: STEP_IMPORT,
                progress_action: STEP_IMPORT,
            };
        }

        match task.await {
            Ok(Ok(history)) => {
                log::debug!(
                    "imported {} months for entry {}",
                    history.monthly.len(),
                    self.entry.entry_id
                );
                self.imported = Some(history);
                self.step = STEP_FINISH;
                FlowResult::ShowProgressDone {
                    next_step_id: STEP_FINISH,
                }
            }
            Ok(Err(e)) => {
                log::error!("Error importing history: {}", e);
                self.step = STEP_DONE;
                FlowResult::Abort {
                    reason: ABORT_IMPORT_FAILED,
                }
            }
            Err(e) => {
                log::error!("History import task failed: {}", e);
                self.step = STEP_DONE;
                FlowResult::Abort {
                    reason: ABORT_IMPORT_FAILED,
                }
            }
        }
    }

    pub fn step_finish(&mut self, input: Option<UserInput>) -> FlowResult<Value> {
        if input.is_none() {
            return FlowResult::form(STEP_FINISH, vec![], FormErrors::new());
        }

        let mut options = match &self.entry.options {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        options.insert(
            OPTION_MONTHLY_HISTORY.to_string(),
            json!(self.imported.take()),
        );

        self.step = STEP_DONE;
        FlowResult::CreateEntry {
            title: self.entry.title.to_owned(),
            data: Value::Object(options),
        }
    }
}

impl Drop for OptionsFlow {
    fn drop(&mut self) {
        if let Some(task) = self.import.take() {
            task.abort();
        }
    }
}
