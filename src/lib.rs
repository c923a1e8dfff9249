mod backend;
mod config;
mod status;

use backend::BackendSupervisor;
use config::BackendConfig;
use status::{IndicatorReport, StatusBoard};
use std::sync::Arc;
use tauri::{
    webview::PageLoadEvent, AppHandle, Emitter, Manager, RunEvent, State, Url, WebviewUrl,
    WebviewWindowBuilder, WindowEvent,
};
use tauri_plugin_shell::ShellExt;

const MAIN_WINDOW: &str = "main";

/// Event emitted when the backend fails to become ready in time, so the
/// page can render an explicit failure state.
const ERROR_EVENT: &str = "backend-error";

/// Current indicator snapshot, for pages that query instead of listening.
#[tauri::command]
fn backend_status(board: State<Arc<StatusBoard>>) -> IndicatorReport {
    board.report()
}

/// Whether the supervisor currently holds a live backend process.
#[tauri::command]
fn backend_running(supervisor: State<Arc<BackendSupervisor>>) -> bool {
    supervisor.is_running()
}

/// Open a link in the system's default handler instead of the app window.
#[tauri::command]
fn open_external(app: AppHandle, url: String) -> Result<(), String> {
    if !is_openable_externally(&url) {
        return Err(format!("refusing to open url: {}", url));
    }
    app.shell().open(url, None).map_err(|e| e.to_string())
}

/// Only web and mail links get handed to the system opener.
fn is_openable_externally(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://") || url.starts_with("mailto:")
}

/// Whether a navigation target stays on the backend. Everything else is
/// delegated to the system handler and denied in-window.
fn is_backend_origin(backend_root: &Url, candidate: &Url) -> bool {
    // about:blank shows up during webview setup
    if candidate.scheme() == "about" {
        return true;
    }
    candidate.scheme() == backend_root.scheme()
        && candidate.host_str() == backend_root.host_str()
        && candidate.port_or_known_default() == backend_root.port_or_known_default()
}

/// Build the main window hidden, pointed at the backend root. The first load
/// is attempted immediately; the readiness wait re-navigates once the
/// backend actually answers, replacing any early error page.
fn build_main_window(
    handle: &AppHandle,
    backend_root: &Url,
) -> tauri::Result<tauri::WebviewWindow> {
    let origin = backend_root.clone();
    let opener = handle.clone();

    WebviewWindowBuilder::new(
        handle,
        MAIN_WINDOW,
        WebviewUrl::External(backend_root.clone()),
    )
    .title("Engineering Tools")
    .inner_size(1280.0, 860.0)
    .min_inner_size(900.0, 600.0)
    .visible(false)
    .on_navigation(move |url| {
        if is_backend_origin(&origin, url) {
            return true;
        }
        log::info!("delegating external navigation to system handler: {}", url);
        if let Err(e) = opener.shell().open(url.as_str(), None) {
            log::warn!("failed to open external url: {}", e);
        }
        false
    })
    .build()
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let config = BackendConfig::from_env();
    let supervisor = Arc::new(BackendSupervisor::new(config.clone()));
    let board = Arc::new(StatusBoard::new());
    let supervisor_for_shutdown = supervisor.clone();

    tauri::Builder::default()
        .plugin(tauri_plugin_shell::init())
        .manage(supervisor.clone())
        .manage(board.clone())
        .setup(move |app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            // Spawn failure is logged, never fatal: the host stays up and
            // the page shows the degraded state instead.
            if let Err(e) = supervisor.start() {
                log::warn!("backend did not start: {}", e);
            }

            let backend_root: Url = config.root_url().parse()?;
            let handle = app.handle().clone();
            let window = build_main_window(&handle, &backend_root)?;

            #[cfg(debug_assertions)]
            if config::devtools_enabled() {
                window.open_devtools();
            }
            #[cfg(not(debug_assertions))]
            let _ = window;

            let board = board.clone();
            let supervisor = supervisor.clone();
            let status_url = config.status_url();
            let client = reqwest::Client::new();
            tauri::async_runtime::spawn(async move {
                match status::wait_for_ready(&client, &status_url, status::READY_DEADLINE).await {
                    Ok(()) => {
                        log::info!("backend ready at {}", backend_root);
                        if let Some(window) = handle.get_webview_window(MAIN_WINDOW) {
                            if let Err(e) = window.navigate(backend_root.clone()) {
                                log::warn!("failed to navigate to backend root: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        log::warn!("{}", e);
                        // A refused initial load does not reliably fire a
                        // finished-load event, so the page-load hook may
                        // never run; reveal the window here or the host
                        // looks dead with nothing on screen.
                        if let Some(window) = handle.get_webview_window(MAIN_WINDOW) {
                            if let Err(show_error) = window.show() {
                                log::warn!("failed to show main window: {}", show_error);
                            }
                        }
                        let _ = handle.emit(ERROR_EVENT, &e);
                    }
                }

                status::run_poll_loop(handle, board, supervisor, client, status_url).await;
            });

            Ok(())
        })
        .on_page_load(|webview, payload| {
            if let PageLoadEvent::Finished = payload.event() {
                let window = webview.window();
                if window.label() == MAIN_WINDOW && !window.is_visible().unwrap_or(true) {
                    log::info!("first page load finished, showing window");
                    if let Err(e) = window.show() {
                        log::warn!("failed to show main window: {}", e);
                    }
                }
            }
        })
        .on_window_event(|window, event| {
            if window.label() != MAIN_WINDOW {
                return;
            }
            if let WindowEvent::CloseRequested { .. } = event {
                log::info!("main window closing - stopping backend");
                let supervisor: State<Arc<BackendSupervisor>> = window.state();
                supervisor.stop();
            }
        })
        .invoke_handler(tauri::generate_handler![
            backend_status,
            backend_running,
            open_external,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(move |_app_handle, event| {
            if let RunEvent::Exit = event {
                // Backstop for exits that never went through window close;
                // stop() is idempotent so the usual path costs nothing here.
                log::info!("app shutting down - stopping backend");
                supervisor_for_shutdown.stop();
            }
        });
}
