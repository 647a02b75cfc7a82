use std::{path::PathBuf, sync::Arc, thread};

use clap::Parser;
use client_core::{ControllerEvent, FilePayload, WorkbenchController, WorkbenchTab};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use eframe::egui;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    server_url: String,
}

enum BackendCommand {
    ActivateTab(WorkbenchTab),
    UploadModel(Vec<FilePayload>),
    UploadContent(Vec<FilePayload>),
    SelectModel(Option<String>),
    Process,
    SaveArtifact {
        download_url: String,
        suggested_name: String,
    },
}

enum UiEvent {
    Controller(ControllerEvent),
    ActionFailed(String),
    ArtifactSaved(PathBuf),
    BackendFailed(String),
}

fn queue_command(cmd_tx: &Sender<BackendCommand>, cmd: BackendCommand, status: &mut String) {
    match cmd_tx.try_send(cmd) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            *status = "Command queue is full; please retry".to_string();
        }
        Err(TrySendError::Disconnected(_)) => {
            *status = "Backend worker disconnected; restart the app".to_string();
        }
    }
}

/// Converts dropped files into upload payloads. Drops without a usable
/// name or readable bytes are skipped.
fn payloads_from_drops(drops: &[egui::DroppedFile]) -> Vec<FilePayload> {
    drops
        .iter()
        .filter_map(|drop| {
            let name = drop
                .path
                .as_ref()
                .and_then(|path| path.file_name())
                .and_then(|name| name.to_str())
                .map(str::to_string)
                .or_else(|| (!drop.name.is_empty()).then(|| drop.name.clone()))?;
            let bytes = if let Some(bytes) = &drop.bytes {
                bytes.to_vec()
            } else if let Some(path) = &drop.path {
                std::fs::read(path).ok()?
            } else {
                return None;
            };
            Some(FilePayload::new(name, bytes))
        })
        .collect()
}

fn artifact_filename(download_url: &str) -> String {
    download_url
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("processed.docx")
        .to_string()
}

struct WorkbenchApp {
    cmd_tx: Sender<BackendCommand>,
    ui_rx: Receiver<UiEvent>,
    active_tab: WorkbenchTab,
    models: Vec<String>,
    model_choices: Vec<String>,
    selected_model: Option<String>,
    content_name: Option<String>,
    processing: bool,
    process_enabled: bool,
    download_url: Option<String>,
    status: String,
}

impl WorkbenchApp {
    fn new(cmd_tx: Sender<BackendCommand>, ui_rx: Receiver<UiEvent>) -> Self {
        Self {
            cmd_tx,
            ui_rx,
            active_tab: WorkbenchTab::Models,
            models: Vec::new(),
            model_choices: Vec::new(),
            selected_model: None,
            content_name: None,
            processing: false,
            process_enabled: false,
            download_url: None,
            status: "Connecting to server...".to_string(),
        }
    }

    fn process_ui_events(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            match event {
                UiEvent::Controller(event) => self.apply_controller_event(event),
                UiEvent::ActionFailed(message) => {
                    self.status = message;
                }
                UiEvent::ArtifactSaved(path) => {
                    self.status = format!("Saved document to {}", path.display());
                }
                UiEvent::BackendFailed(message) => {
                    self.status = message;
                }
            }
        }
    }

    fn apply_controller_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::TabActivated(tab) => {
                self.active_tab = tab;
            }
            ControllerEvent::ModelListUpdated(models) => {
                self.models = models;
                self.status = format!("{} model(s) registered", self.models.len());
            }
            ControllerEvent::ModelChoicesUpdated(choices) => {
                self.model_choices = choices;
            }
            ControllerEvent::ModelUploaded { filename } => {
                self.status = format!("Model {filename} registered");
            }
            ControllerEvent::ContentAccepted { original_name } => {
                self.status = format!("Content file {original_name} uploaded");
                self.content_name = Some(original_name);
            }
            ControllerEvent::ModelSelectionChanged(selection) => {
                self.selected_model = selection;
            }
            ControllerEvent::ReadinessChanged(enabled) => {
                self.process_enabled = enabled;
            }
            ControllerEvent::ProcessingStarted => {
                self.processing = true;
                self.status = "Processing document...".to_string();
            }
            ControllerEvent::ProcessingFinished { download_url } => {
                self.processing = false;
                self.download_url = Some(download_url);
                self.status = "Document ready".to_string();
            }
            ControllerEvent::Error(message) => {
                self.processing = false;
                self.status = message;
            }
        }
    }

    fn switch_tab(&mut self, tab: WorkbenchTab) {
        if self.active_tab != tab {
            self.active_tab = tab;
            queue_command(
                &self.cmd_tx,
                BackendCommand::ActivateTab(tab),
                &mut self.status,
            );
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let drops = ctx.input(|input| input.raw.dropped_files.clone());
        if drops.is_empty() {
            return;
        }
        let payloads = payloads_from_drops(&drops);
        if payloads.is_empty() {
            self.status = "Dropped file could not be read".to_string();
            return;
        }
        let command = match self.active_tab {
            WorkbenchTab::Models => BackendCommand::UploadModel(payloads),
            WorkbenchTab::Process => BackendCommand::UploadContent(payloads),
        };
        queue_command(&self.cmd_tx, command, &mut self.status);
    }

    fn pick_file(&mut self, kind: WorkbenchTab) {
        let Some(path) = rfd::FileDialog::new()
            .add_filter("Word document", &["docx"])
            .pick_file()
        else {
            return;
        };
        let Some(payload) = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .and_then(|name| std::fs::read(&path).ok().map(|bytes| FilePayload::new(name, bytes)))
        else {
            self.status = format!("Could not read {}", path.display());
            return;
        };
        let command = match kind {
            WorkbenchTab::Models => BackendCommand::UploadModel(vec![payload]),
            WorkbenchTab::Process => BackendCommand::UploadContent(vec![payload]),
        };
        queue_command(&self.cmd_tx, command, &mut self.status);
    }

    fn show_models_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading("Model templates");
        ui.label("Drop a .docx model anywhere in the window, or:");
        if ui.button("Choose model file...").clicked() {
            self.pick_file(WorkbenchTab::Models);
        }
        ui.separator();

        if self.models.is_empty() {
            ui.label("No models registered yet.");
            return;
        }
        egui::Grid::new("models_grid")
            .num_columns(1)
            .striped(true)
            .show(ui, |ui| {
                for model in &self.models {
                    ui.label(model);
                    ui.end_row();
                }
            });
    }

    fn show_process_tab(&mut self, ui: &mut egui::Ui) {
        ui.heading("Generate a document");

        ui.label("Drop the content .docx anywhere in the window, or:");
        if ui.button("Choose content file...").clicked() {
            self.pick_file(WorkbenchTab::Process);
        }
        if let Some(name) = &self.content_name {
            ui.label(format!("Uploaded content: {name}"));
        }
        ui.separator();

        let mut selection_changed = false;
        let previous = self.selected_model.clone();
        egui::ComboBox::from_label("Model")
            .selected_text(
                self.selected_model
                    .as_deref()
                    .unwrap_or("Choose a model..."),
            )
            .show_ui(ui, |ui| {
                if ui
                    .selectable_value(&mut self.selected_model, None, "(none)")
                    .clicked()
                {
                    selection_changed = true;
                }
                for choice in &self.model_choices {
                    if ui
                        .selectable_value(
                            &mut self.selected_model,
                            Some(choice.clone()),
                            choice,
                        )
                        .clicked()
                    {
                        selection_changed = true;
                    }
                }
            });
        if selection_changed && self.selected_model != previous {
            queue_command(
                &self.cmd_tx,
                BackendCommand::SelectModel(self.selected_model.clone()),
                &mut self.status,
            );
        }

        if let Some(selected) = &self.selected_model {
            ui.label(format!("Selected model: {selected}"));
        }
        ui.separator();

        ui.horizontal(|ui| {
            let label = if self.processing {
                "Processing..."
            } else {
                "Process document"
            };
            if ui
                .add_enabled(self.process_enabled, egui::Button::new(label))
                .clicked()
            {
                queue_command(&self.cmd_tx, BackendCommand::Process, &mut self.status);
            }
            if self.processing {
                ui.spinner();
            }
        });

        if let Some(download_url) = self.download_url.clone() {
            ui.separator();
            ui.label("Your document is ready.");
            if ui.button("Save result...").clicked() {
                queue_command(
                    &self.cmd_tx,
                    BackendCommand::SaveArtifact {
                        suggested_name: artifact_filename(&download_url),
                        download_url,
                    },
                    &mut self.status,
                );
            }
        }
    }
}

impl eframe::App for WorkbenchApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_ui_events();
        self.handle_dropped_files(ctx);

        egui::TopBottomPanel::top("tab_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui
                    .selectable_label(self.active_tab == WorkbenchTab::Models, "Models")
                    .clicked()
                {
                    self.switch_tab(WorkbenchTab::Models);
                }
                if ui
                    .selectable_label(self.active_tab == WorkbenchTab::Process, "Process")
                    .clicked()
                {
                    self.switch_tab(WorkbenchTab::Process);
                }
            });
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.label(&self.status);
        });

        egui::CentralPanel::default().show(ctx, |ui| match self.active_tab {
            WorkbenchTab::Models => self.show_models_tab(ui),
            WorkbenchTab::Process => self.show_process_tab(ui),
        });

        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}

fn spawn_backend_thread(
    server_url: String,
    cmd_rx: Receiver<BackendCommand>,
    ui_tx: Sender<UiEvent>,
) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                let _ = ui_tx.try_send(UiEvent::BackendFailed(format!(
                    "backend worker startup failure: failed to build runtime: {err}"
                )));
                tracing::error!("failed to build backend runtime: {err}");
                return;
            }
        };

        runtime.block_on(async move {
            let controller = Arc::new(WorkbenchController::new(server_url));

            {
                let mut events = controller.subscribe_events();
                let ui_tx = ui_tx.clone();
                tokio::spawn(async move {
                    while let Ok(event) = events.recv().await {
                        let _ = ui_tx.try_send(UiEvent::Controller(event));
                    }
                });
            }

            controller.activate_tab(WorkbenchTab::Models).await;

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    BackendCommand::ActivateTab(tab) => {
                        controller.activate_tab(tab).await;
                    }
                    BackendCommand::UploadModel(files) => {
                        if let Err(err) = controller.upload_model(&files).await {
                            let _ = ui_tx
                                .try_send(UiEvent::ActionFailed(format!("Upload failed: {err}")));
                        }
                    }
                    BackendCommand::UploadContent(files) => {
                        if let Err(err) = controller.upload_content(&files).await {
                            let _ = ui_tx
                                .try_send(UiEvent::ActionFailed(format!("Upload failed: {err}")));
                        }
                    }
                    BackendCommand::SelectModel(selection) => {
                        controller.select_model(selection).await;
                    }
                    BackendCommand::Process => {
                        // Failure already surfaces through controller events.
                        let _ = controller.process().await;
                    }
                    BackendCommand::SaveArtifact {
                        download_url,
                        suggested_name,
                    } => match controller.download(&download_url).await {
                        Ok(bytes) => {
                            let save_path = rfd::FileDialog::new()
                                .set_file_name(&suggested_name)
                                .save_file();
                            if let Some(path) = save_path {
                                match std::fs::write(&path, bytes) {
                                    Ok(()) => {
                                        let _ = ui_tx.try_send(UiEvent::ArtifactSaved(path));
                                    }
                                    Err(err) => {
                                        let _ = ui_tx.try_send(UiEvent::ActionFailed(format!(
                                            "Failed to save document: {err}"
                                        )));
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            let _ = ui_tx.try_send(UiEvent::ActionFailed(format!(
                                "Failed to download document: {err}"
                            )));
                        }
                    },
                }
            }
        });
    });
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(256);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(1024);
    spawn_backend_thread(args.server_url, cmd_rx, ui_tx);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Document Workbench")
            .with_inner_size([900.0, 600.0])
            .with_min_inner_size([640.0, 480.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Document Workbench",
        options,
        Box::new(|_cc| Ok(Box::new(WorkbenchApp::new(cmd_tx, ui_rx)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_filename_uses_url_tail() {
        assert_eq!(
            artifact_filename("/api/download/processed_abc_report.docx"),
            "processed_abc_report.docx"
        );
        assert_eq!(artifact_filename(""), "processed.docx");
    }

    #[test]
    fn dropped_file_with_inline_bytes_becomes_payload() {
        let drop = egui::DroppedFile {
            name: "report.docx".to_string(),
            bytes: Some(Arc::from(b"bytes".as_slice())),
            ..Default::default()
        };
        let payloads = payloads_from_drops(&[drop]);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].name, "report.docx");
        assert_eq!(payloads[0].bytes, b"bytes");
    }

    #[test]
    fn unreadable_drop_is_skipped() {
        let drop = egui::DroppedFile::default();
        assert!(payloads_from_drops(&[drop]).is_empty());
    }
}
