//! Event funnel onto the GPU command thread.
//!
//! The renderer drains the dispatcher at the top of every draw callback, so
//! cross-thread work (settings notifications, timer ticks) always executes
//! on the GPU command thread, interleaved with nothing else. The dispatcher
//! binds to the first thread that drains it and panics on access from any
//! other thread: touching GPU state off that thread is a broken threading
//! contract, not a runtime condition to recover from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::types::RenderMode;

/// Structured settings notification from the preferences collaborator.
///
/// Any subset of flags may be set in a single notification; the renderer
/// handles them in a fixed order (empty queue, media reload, interval
/// change, recreate world, redraw).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsEvent {
    pub recreate_world: bool,
    pub redraw: bool,
    pub empty_texture_queue: bool,
    pub media_reload: bool,
    pub media_interval_changed: bool,
}

/// Work items delivered to the GPU command thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Settings(SettingsEvent),
    /// The inter-transition delay elapsed; pick the next transition.
    SelectTransition,
    /// The periodic media scan fired.
    MediaScanTick,
}

struct Shared {
    tx: Sender<EngineEvent>,
    redraw_requested: AtomicBool,
    continuous: AtomicBool,
}

/// Cloneable producer side of the dispatcher, safe to use from any thread.
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Posts an event for the GPU thread and requests a redraw so it is
    /// drained promptly even in render-on-demand mode.
    pub fn post(&self, event: EngineEvent) {
        // Send only fails when the consumer is gone; the event is moot then.
        let _ = self.shared.tx.send(event);
        self.request_render();
    }

    /// Asks the host to schedule one frame.
    pub fn request_render(&self) {
        self.shared.redraw_requested.store(true, Ordering::Release);
    }

    /// Current render mode, polled by the host between frames.
    pub fn render_mode(&self) -> RenderMode {
        if self.shared.continuous.load(Ordering::Acquire) {
            RenderMode::Continuous
        } else {
            RenderMode::OnDemand
        }
    }

    /// Consumes a pending redraw request, if any.
    pub fn take_redraw_request(&self) -> bool {
        self.shared.redraw_requested.swap(false, Ordering::AcqRel)
    }
}

/// Consumer side, owned by the renderer and drained on the GPU thread.
pub struct GpuDispatcher {
    rx: Receiver<EngineEvent>,
    shared: Arc<Shared>,
    gpu_thread: OnceLock<ThreadId>,
}

impl GpuDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            rx,
            shared: Arc::new(Shared {
                tx,
                redraw_requested: AtomicBool::new(false),
                continuous: AtomicBool::new(false),
            }),
            gpu_thread: OnceLock::new(),
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Drains all queued events in arrival order. The first call binds the
    /// dispatcher to the calling thread; later calls assert the binding.
    pub fn drain(&self) -> Vec<EngineEvent> {
        self.assert_gpu_thread();
        self.rx.try_iter().collect()
    }

    /// Panics when called off the GPU command thread.
    pub fn assert_gpu_thread(&self) {
        let current = thread::current().id();
        let bound = *self.gpu_thread.get_or_init(|| current);
        assert_eq!(
            bound, current,
            "GPU state touched off the GPU command thread"
        );
    }

    pub fn set_render_mode(&self, mode: RenderMode) {
        self.assert_gpu_thread();
        self.shared
            .continuous
            .store(mode == RenderMode::Continuous, Ordering::Release);
    }

    pub fn render_mode(&self) -> RenderMode {
        self.handle().render_mode()
    }
}

impl Default for GpuDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellable one-shot timer posting an event after a delay.
///
/// Cancellation is synchronous: once [`cancel`](DelayedEvent::cancel)
/// returns, the event will not be delivered. Dropping the handle cancels.
pub struct DelayedEvent {
    fired_or_cancelled: Arc<Mutex<bool>>,
}

impl DelayedEvent {
    pub fn schedule(handle: DispatcherHandle, delay: Duration, event: EngineEvent) -> Self {
        let flag = Arc::new(Mutex::new(false));
        let timer_flag = Arc::clone(&flag);
        thread::spawn(move || {
            thread::sleep(delay);
            let mut done = timer_flag.lock().expect("timer flag poisoned");
            if !*done {
                *done = true;
                // Posting under the lock makes cancellation synchronous.
                handle.post(event);
            }
        });
        Self {
            fired_or_cancelled: flag,
        }
    }

    pub fn cancel(&self) {
        let mut done = self.fired_or_cancelled.lock().expect("timer flag poisoned");
        *done = true;
    }
}

impl Drop for DelayedEvent {
    fn drop(&mut self) {
        self.cancel();
    }
}
