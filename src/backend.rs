use crate::config::BackendConfig;
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

/// Supervises the single backend process. The child handle is owned
/// exclusively here; nobody else touches it.
pub struct BackendSupervisor {
    config: BackendConfig,
    child: Mutex<Option<Child>>,
    last_exit_code: Mutex<Option<i32>>,
}

impl BackendSupervisor {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            last_exit_code: Mutex::new(None),
        }
    }

    /// Spawn the backend with its fixed command line and working directory,
    /// wiring stdout/stderr into the host log. A missing or unlaunchable
    /// executable is an error for the caller to log, never a reason to
    /// bring the host down.
    pub fn start(&self) -> Result<(), String> {
        let mut slot = self.child.lock();
        if slot.is_some() {
            return Err("backend is already running".to_string());
        }

        let mut command = Command::new(&self.config.executable);
        command
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group so stop() can take out the whole tree
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|e| {
            format!(
                "failed to spawn backend {}: {}",
                self.config.executable.display(),
                e
            )
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, false);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, true);
        }

        log::info!("backend spawned (pid {})", child.id());
        *slot = Some(child);
        *self.last_exit_code.lock() = None;
        Ok(())
    }

    /// Terminate the backend if one is held. Safe to call at any time:
    /// a second call, or a call after the child already exited, is a no-op.
    pub fn stop(&self) {
        let mut slot = self.child.lock();
        let Some(mut child) = slot.take() else {
            log::debug!("stop requested with no backend running");
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("backend already exited: {}", status);
                *self.last_exit_code.lock() = status.code();
                return;
            }
            Ok(None) => {}
            Err(e) => log::warn!("could not query backend state before stop: {}", e),
        }

        let pid = child.id();
        log::info!("stopping backend (pid {})", pid);

        #[cfg(unix)]
        unsafe {
            // SIGTERM the process group first so the backend can flush,
            // then SIGKILL whatever is left
            libc::kill(-(pid as i32), libc::SIGTERM);
            thread::sleep(Duration::from_millis(200));
            libc::kill(-(pid as i32), libc::SIGKILL);
        }

        #[cfg(windows)]
        {
            let _ = child.kill();
        }

        // Reap to avoid leaving a zombie behind
        match child.wait() {
            Ok(status) => {
                log::info!("backend stopped: {}", status);
                *self.last_exit_code.lock() = status.code();
            }
            Err(e) => log::warn!("failed to reap backend: {}", e),
        }
    }

    /// Observe an exit without blocking. Logs the exit code once and clears
    /// the handle; there is no restart policy — a crashed backend stays down
    /// until the application is relaunched.
    pub fn poll_exit(&self) {
        let mut slot = self.child.lock();
        let Some(child) = slot.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                log::warn!("backend exited unexpectedly: {}", status);
                *self.last_exit_code.lock() = status.code();
                *slot = None;
            }
            Ok(None) => {}
            Err(e) => log::warn!("failed to poll backend exit: {}", e),
        }
    }

    /// Whether a live child is currently held.
    pub fn is_running(&self) -> bool {
        self.poll_exit();
        self.child.lock().is_some()
    }

    /// Exit code of the last observed exit, if the child exited normally.
    pub fn last_exit_code(&self) -> Option<i32> {
        *self.last_exit_code.lock()
    }
}

impl Drop for BackendSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Re-log each line the backend writes, under its own target so the two
/// processes stay distinguishable in one sink.
fn forward_output<R: Read + Send + 'static>(stream: R, is_stderr: bool) {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if is_stderr {
                        log::warn!(target: "backend", "{}", line);
                    } else {
                        log::info!(target: "backend", "{}", line);
                    }
                }
                Err(_) => break,
            }
        }
    });
}
