//! Transition state machine and effect registry.
//!
//! The machine walks `Idle → Selecting → Running → Completing → Idle`.
//! Exactly one transition is in flight per renderer; a select request while
//! the machine is not idle is deferred (the scheduler re-arms only after the
//! machine returns to idle). Progress is derived from the start timestamp,
//! never from tick counts, so a paused transition resumes exactly where it
//! left off.

use std::time::{Duration, Instant};

use collageconfig::EffectKind;

/// Blend parameters for one frame mid-transition.
///
/// The outgoing quad shows the frame's current texture, the incoming quad
/// its pending texture. Offsets are in frame widths; `x_scale` squeezes
/// around the horizontal center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameBlend {
    pub out_alpha: f32,
    pub in_alpha: f32,
    pub out_offset_x: f32,
    pub in_offset_x: f32,
    pub out_x_scale: f32,
    pub in_x_scale: f32,
}

impl FrameBlend {
    fn outgoing_only() -> Self {
        Self {
            out_alpha: 1.0,
            in_alpha: 0.0,
            out_offset_x: 0.0,
            in_offset_x: 0.0,
            out_x_scale: 1.0,
            in_x_scale: 1.0,
        }
    }
}

/// A timed visual effect. Implementations are pure functions of progress.
pub trait Effect: Send {
    fn duration(&self) -> Duration;
    fn blend(&self, progress: f32) -> FrameBlend;
}

/// Registry factory mapping a configured effect kind to its implementation.
pub fn create_effect(kind: EffectKind) -> Box<dyn Effect> {
    match kind {
        EffectKind::Fade => Box::new(FadeEffect),
        EffectKind::Slide => Box::new(SlideEffect),
        EffectKind::Flip => Box::new(FlipEffect),
        EffectKind::Swap => Box::new(SwapEffect),
    }
}

/// Crossfade between outgoing and incoming textures.
struct FadeEffect;

impl Effect for FadeEffect {
    fn duration(&self) -> Duration {
        Duration::from_millis(1000)
    }

    fn blend(&self, progress: f32) -> FrameBlend {
        let t = smoothstep(progress);
        FrameBlend {
            out_alpha: 1.0 - t,
            in_alpha: t,
            ..FrameBlend::outgoing_only()
        }
    }
}

/// The incoming photo slides in from the right, pushing the old one out.
struct SlideEffect;

impl Effect for SlideEffect {
    fn duration(&self) -> Duration {
        Duration::from_millis(900)
    }

    fn blend(&self, progress: f32) -> FrameBlend {
        let t = smoothstep(progress);
        FrameBlend {
            out_alpha: 1.0,
            in_alpha: 1.0,
            out_offset_x: -t,
            in_offset_x: 1.0 - t,
            out_x_scale: 1.0,
            in_x_scale: 1.0,
        }
    }
}

/// Horizontal flip: the outgoing photo squeezes shut, the incoming one
/// opens.
struct FlipEffect;

impl Effect for FlipEffect {
    fn duration(&self) -> Duration {
        Duration::from_millis(1200)
    }

    fn blend(&self, progress: f32) -> FrameBlend {
        let t = progress.clamp(0.0, 1.0);
        if t < 0.5 {
            FrameBlend {
                out_x_scale: 1.0 - 2.0 * t,
                ..FrameBlend::outgoing_only()
            }
        } else {
            FrameBlend {
                out_alpha: 0.0,
                in_alpha: 1.0,
                out_offset_x: 0.0,
                in_offset_x: 0.0,
                out_x_scale: 1.0,
                in_x_scale: 2.0 * t - 1.0,
            }
        }
    }
}

/// Instant replacement.
struct SwapEffect;

impl Effect for SwapEffect {
    fn duration(&self) -> Duration {
        Duration::ZERO
    }

    fn blend(&self, _progress: f32) -> FrameBlend {
        FrameBlend {
            out_alpha: 0.0,
            in_alpha: 1.0,
            out_offset_x: 0.0,
            in_offset_x: 0.0,
            out_x_scale: 1.0,
            in_x_scale: 1.0,
        }
    }
}

fn smoothstep(t: f32) -> f32 {
    let clamped = t.clamp(0.0, 1.0);
    clamped * clamped * (3.0 - 2.0 * clamped)
}

enum Phase {
    Idle,
    Selecting,
    Running {
        frame: usize,
        effect: Box<dyn Effect>,
        started: Instant,
    },
    Completing {
        frame: usize,
    },
}

/// Drives at most one transition at a time.
pub struct TransitionEngine {
    phase: Phase,
    max_duration: Duration,
}

impl TransitionEngine {
    pub fn new(max_duration: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            max_duration,
        }
    }

    pub fn set_max_duration(&mut self, max_duration: Duration) {
        self.max_duration = max_duration;
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Starts selection. Returns false when a transition is already in
    /// flight; the caller defers and re-arms after the machine idles.
    pub fn begin_select(&mut self) -> bool {
        if self.is_idle() {
            self.phase = Phase::Selecting;
            true
        } else {
            false
        }
    }

    /// Commits the selection and enters `Running`.
    pub fn commit(&mut self, frame: usize, kind: EffectKind, now: Instant) {
        debug_assert!(matches!(self.phase, Phase::Selecting));
        self.phase = Phase::Running {
            frame,
            effect: create_effect(kind),
            started: now,
        };
    }

    /// Abandons a selection that found no candidate.
    pub fn abort_select(&mut self) {
        debug_assert!(matches!(self.phase, Phase::Selecting));
        self.phase = Phase::Idle;
    }

    pub fn running_frame(&self) -> Option<usize> {
        match self.phase {
            Phase::Running { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// Elapsed-time-derived progress of the running effect.
    pub fn progress(&self, now: Instant) -> Option<f32> {
        match &self.phase {
            Phase::Running {
                effect, started, ..
            } => {
                let duration = effect.duration();
                if duration.is_zero() {
                    return Some(1.0);
                }
                let elapsed = now.saturating_duration_since(*started);
                Some((elapsed.as_secs_f32() / duration.as_secs_f32()).min(1.0))
            }
            _ => None,
        }
    }

    /// True while an effect is animating and has neither finished nor
    /// exceeded its deadline.
    pub fn has_running(&self, now: Instant) -> bool {
        match self.progress(now) {
            Some(progress) => progress < 1.0 && !self.timed_out(now),
            None => false,
        }
    }

    /// A stuck effect must never block the render loop: past the maximum
    /// duration the renderer force-completes regardless of progress.
    pub fn timed_out(&self, now: Instant) -> bool {
        match &self.phase {
            Phase::Running { started, .. } => {
                now.saturating_duration_since(*started) > self.max_duration
            }
            _ => false,
        }
    }

    /// Blend parameters for the running frame.
    pub fn blend(&self, now: Instant) -> Option<(usize, FrameBlend)> {
        match &self.phase {
            Phase::Running { frame, effect, .. } => {
                let progress = self.progress(now)?;
                Some((*frame, effect.blend(progress)))
            }
            _ => None,
        }
    }

    /// Enters `Completing`; the caller commits the pending texture and then
    /// calls [`finish`](TransitionEngine::finish).
    pub fn begin_complete(&mut self) -> Option<usize> {
        match self.phase {
            Phase::Running { frame, .. } => {
                self.phase = Phase::Completing { frame };
                Some(frame)
            }
            _ => None,
        }
    }

    pub fn finish(&mut self) {
        debug_assert!(matches!(self.phase, Phase::Completing { .. }));
        self.phase = Phase::Idle;
    }

    /// Drops any in-flight transition; used when the world is recreated.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }
}
