use reqwest::{
    multipart::{Form, Part},
    Client,
};
use shared::{
    error::ApiError,
    protocol::{ContentUploadResponse, ModelUploadResponse, ProcessRequest, ProcessResponse},
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// Panels of the workbench. Entering a tab triggers a refresh fetch for
/// the data that tab renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkbenchTab {
    #[default]
    Models,
    Process,
}

/// Handle for a successfully uploaded content file: the server-assigned
/// storage name plus the name the user uploaded under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedContent {
    pub stored_name: String,
    pub original_name: String,
}

/// A file handed over by a picker or a drop action.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("server rejected the request: {}", .0.message)]
    Server(ApiError),
    #[error("connection error: {0}")]
    Connection(#[from] reqwest::Error),
    #[error("no file selected")]
    NoFile,
}

/// State-change notifications consumed by a rendering shell. Direct
/// widget mutation stays out of the controller; shells map these onto
/// whatever they draw.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    TabActivated(WorkbenchTab),
    ModelListUpdated(Vec<String>),
    ModelChoicesUpdated(Vec<String>),
    ModelUploaded { filename: String },
    ContentAccepted { original_name: String },
    /// `None` means the selection was cleared and any preview should hide.
    ModelSelectionChanged(Option<String>),
    /// Current state of the process trigger: selected model AND uploaded
    /// content, with no request in flight.
    ReadinessChanged(bool),
    ProcessingStarted,
    ProcessingFinished { download_url: String },
    Error(String),
}

#[derive(Debug, Default)]
struct ControllerState {
    active_tab: WorkbenchTab,
    models: Vec<String>,
    model_choices: Vec<String>,
    selected_model: Option<String>,
    uploaded_content: Option<UploadedContent>,
    processing: bool,
    download_url: Option<String>,
}

fn process_enabled(state: &ControllerState) -> bool {
    state.selected_model.is_some() && state.uploaded_content.is_some() && !state.processing
}

/// Client-side controller for the document workbench: owns the two
/// ephemeral entities (selected model, uploaded content), mirrors the
/// server-owned model list, and gates the process trigger on both
/// entities being present.
pub struct WorkbenchController {
    http: Client,
    server_url: String,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl WorkbenchController {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            inner: Mutex::new(ControllerState::default()),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn active_tab(&self) -> WorkbenchTab {
        self.inner.lock().await.active_tab
    }

    pub async fn model_list(&self) -> Vec<String> {
        self.inner.lock().await.models.clone()
    }

    pub async fn model_choices(&self) -> Vec<String> {
        self.inner.lock().await.model_choices.clone()
    }

    pub async fn selected_model(&self) -> Option<String> {
        self.inner.lock().await.selected_model.clone()
    }

    pub async fn uploaded_content(&self) -> Option<UploadedContent> {
        self.inner.lock().await.uploaded_content.clone()
    }

    pub async fn download_url(&self) -> Option<String> {
        self.inner.lock().await.download_url.clone()
    }

    pub async fn process_enabled(&self) -> bool {
        process_enabled(&*self.inner.lock().await)
    }

    /// Switches the visible tab and issues exactly one refresh fetch for
    /// the entering tab's data. The switch itself never fails; a refresh
    /// failure keeps the previous (stale) data and surfaces an `Error`
    /// event instead.
    pub async fn activate_tab(&self, tab: WorkbenchTab) {
        {
            self.inner.lock().await.active_tab = tab;
        }
        let _ = self.events.send(ControllerEvent::TabActivated(tab));

        let refresh = match tab {
            WorkbenchTab::Models => self.refresh_model_list().await.map(|_| ()),
            WorkbenchTab::Process => self.refresh_model_choices().await.map(|_| ()),
        };
        if let Err(err) = refresh {
            warn!(?tab, %err, "tab refresh failed; keeping previous data");
            let _ = self
                .events
                .send(ControllerEvent::Error(format!("refresh failed: {err}")));
        }
    }

    /// Re-fetches the registry view of uploaded models.
    pub async fn refresh_model_list(&self) -> Result<Vec<String>, ControllerError> {
        let names = self.fetch_model_names().await?;
        {
            self.inner.lock().await.models = names.clone();
        }
        let _ = self
            .events
            .send(ControllerEvent::ModelListUpdated(names.clone()));
        Ok(names)
    }

    /// Re-fetches the dropdown choices on the process tab. A current
    /// selection is kept while the server still lists it; a vanished
    /// selection is cleared so the preview and the readiness gate cannot
    /// point at a model that no longer exists.
    pub async fn refresh_model_choices(&self) -> Result<Vec<String>, ControllerError> {
        let names = self.fetch_model_names().await?;
        let (selection_cleared, enabled_after) = {
            let mut guard = self.inner.lock().await;
            guard.model_choices = names.clone();
            let cleared = match &guard.selected_model {
                Some(selected) if !names.contains(selected) => {
                    guard.selected_model = None;
                    true
                }
                _ => false,
            };
            (cleared, process_enabled(&guard))
        };

        let _ = self
            .events
            .send(ControllerEvent::ModelChoicesUpdated(names.clone()));
        if selection_cleared {
            let _ = self
                .events
                .send(ControllerEvent::ModelSelectionChanged(None));
            let _ = self
                .events
                .send(ControllerEvent::ReadinessChanged(enabled_after));
        }
        Ok(names)
    }

    /// Uploads a model template. Exactly one file per action; a
    /// multi-file drop uses only the first. On success the registry view
    /// is refreshed. A rejected upload mutates nothing.
    pub async fn upload_model(
        &self,
        files: &[FilePayload],
    ) -> Result<ModelUploadResponse, ControllerError> {
        let file = files.first().ok_or(ControllerError::NoFile)?;
        let response: ModelUploadResponse = self.post_file("/api/models", file).await?;
        info!(filename = %response.filename, "model upload accepted");

        if let Err(err) = self.refresh_model_list().await {
            let _ = self
                .events
                .send(ControllerEvent::Error(format!("refresh failed: {err}")));
        }
        let _ = self.events.send(ControllerEvent::ModelUploaded {
            filename: response.filename.clone(),
        });
        Ok(response)
    }

    /// Uploads the content file and stores the returned handle. Replaces
    /// any previously uploaded content.
    pub async fn upload_content(
        &self,
        files: &[FilePayload],
    ) -> Result<ContentUploadResponse, ControllerError> {
        let file = files.first().ok_or(ControllerError::NoFile)?;
        let response: ContentUploadResponse = self.post_file("/api/upload_content", file).await?;
        info!(
            stored_name = %response.filename,
            original_name = %response.original_name,
            "content upload accepted"
        );

        let enabled = {
            let mut guard = self.inner.lock().await;
            guard.uploaded_content = Some(UploadedContent {
                stored_name: response.filename.clone(),
                original_name: response.original_name.clone(),
            });
            process_enabled(&guard)
        };
        let _ = self.events.send(ControllerEvent::ContentAccepted {
            original_name: response.original_name.clone(),
        });
        let _ = self.events.send(ControllerEvent::ReadinessChanged(enabled));
        Ok(response)
    }

    /// Records the dropdown selection. An empty value clears it, which
    /// hides the preview.
    pub async fn select_model(&self, selection: Option<String>) {
        let selection = selection.filter(|value| !value.trim().is_empty());
        let enabled = {
            let mut guard = self.inner.lock().await;
            guard.selected_model = selection.clone();
            process_enabled(&guard)
        };
        let _ = self
            .events
            .send(ControllerEvent::ModelSelectionChanged(selection));
        let _ = self.events.send(ControllerEvent::ReadinessChanged(enabled));
    }

    /// Fires the processing request for the selected model and uploaded
    /// content. A no-op (`Ok(None)`) unless both are set and no request
    /// is already in flight; the in-flight guard is what keeps the
    /// trigger single-shot. On failure the trigger is re-enabled and the
    /// error surfaced.
    pub async fn process(&self) -> Result<Option<ProcessResponse>, ControllerError> {
        let request = {
            let mut guard = self.inner.lock().await;
            let (Some(model), Some(content)) = (&guard.selected_model, &guard.uploaded_content)
            else {
                return Ok(None);
            };
            if guard.processing {
                return Ok(None);
            }
            let request = ProcessRequest {
                model_filename: model.clone(),
                content_filename: content.stored_name.clone(),
            };
            guard.processing = true;
            request
        };

        let _ = self.events.send(ControllerEvent::ProcessingStarted);
        let _ = self.events.send(ControllerEvent::ReadinessChanged(false));

        let result = async {
            let response = self
                .http
                .post(format!("{}/api/process", self.server_url))
                .json(&request)
                .send()
                .await?;
            decode_response::<ProcessResponse>(response).await
        }
        .await;

        match result {
            Ok(response) => {
                let enabled = {
                    let mut guard = self.inner.lock().await;
                    guard.processing = false;
                    guard.download_url = Some(response.download_url.clone());
                    process_enabled(&guard)
                };
                info!(download_url = %response.download_url, "processing finished");
                let _ = self.events.send(ControllerEvent::ProcessingFinished {
                    download_url: response.download_url.clone(),
                });
                let _ = self.events.send(ControllerEvent::ReadinessChanged(enabled));
                Ok(Some(response))
            }
            Err(err) => {
                let enabled = {
                    let mut guard = self.inner.lock().await;
                    guard.processing = false;
                    process_enabled(&guard)
                };
                warn!(%err, "processing failed");
                let _ = self
                    .events
                    .send(ControllerEvent::Error(err.to_string()));
                let _ = self.events.send(ControllerEvent::ReadinessChanged(enabled));
                Err(err)
            }
        }
    }

    /// Fetches the produced artifact behind a download URL returned by a
    /// successful process call.
    pub async fn download(&self, download_url: &str) -> Result<Vec<u8>, ControllerError> {
        let url = if download_url.starts_with("http://") || download_url.starts_with("https://") {
            download_url.to_string()
        } else {
            format!("{}{download_url}", self.server_url)
        };

        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(match response.json::<ApiError>().await {
                Ok(api) => ControllerError::Server(api),
                Err(_) => ControllerError::Server(ApiError::new(
                    shared::error::ErrorCode::Internal,
                    format!("unexpected status {status}"),
                )),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_model_names(&self) -> Result<Vec<String>, ControllerError> {
        let response = self
            .http
            .get(format!("{}/api/models", self.server_url))
            .send()
            .await?;
        decode_response(response).await
    }

    async fn post_file<T: serde::de::DeserializeOwned>(
        &self,
        route: &str,
        file: &FilePayload,
    ) -> Result<T, ControllerError> {
        let part = Part::bytes(file.bytes.clone()).file_name(file.name.clone());
        let form = Form::new().part("file", part);
        let response = self
            .http
            .post(format!("{}{route}", self.server_url))
            .multipart(form)
            .send()
            .await?;
        decode_response(response).await
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ControllerError> {
    if response.status().is_success() {
        return Ok(response.json().await?);
    }

    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(api) => Err(ControllerError::Server(api)),
        Err(_) => Err(ControllerError::Server(ApiError::new(
            shared::error::ErrorCode::Internal,
            format!("unexpected status {status}"),
        ))),
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
