use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::codec::to_display_source;

pub const BEFORE_AFTER_INTERVAL: Duration = Duration::from_millis(1500);

/// Scoped two-frame ticker behind the before/after modal.
///
/// Renders the first frame right away, then alternates every `interval`
/// until stopped. Dropping the handle stops and joins the ticker thread.
pub struct FrameToggle {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FrameToggle {
    pub fn start<R>(frames: [String; 2], interval: Duration, mut render: R) -> std::io::Result<Self>
    where
        R: FnMut(&str) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("before-after-toggle".to_string())
            .spawn(move || {
                let mut current = 0usize;
                render(&to_display_source(&frames[current]));
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            current = 1 - current;
                            render(&to_display_source(&frames[current]));
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FrameToggle {
    fn drop(&mut self) {
        self.stop();
    }
}
