//! Motion Algorithm (C3, §4.3): noise auto-tune, diff, threshold auto-tune,
//! light switch detection, reference update, labeling, smart mask, and
//! despeckle, driving an IDLE/DETECTING/TRIGGERED/RECORDING/COOLDOWN state
//! machine. Each operation below is one clearly-named method rather than
//! one monolithic function.

pub mod despeckle;
pub mod labeling;

use crate::frame::{Frame, Masks, ReferenceFrame};
use rayon::prelude::*;

/// Per-camera motion configuration, a subset of the Config Store's
/// per-camera override table (§10).
#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub threshold: u32,
    pub threshold_maximum: u32,
    pub threshold_ratio_change: u8,
    pub threshold_sdevx: f64,
    pub threshold_sdevy: f64,
    pub threshold_sdevxy: f64,
    pub threshold_tune_enabled: bool,
    pub threshold_tune_multiple: f64,
    pub lightswitch_percent: u32,
    pub lightswitch_frames: u32,
    pub minimum_motion_frames: u32,
    pub event_gap_secs: i64,
    pub static_object_time_secs: i64,
    pub smart_mask_speed: u8,
    pub labelgroup_max: u32,
    pub labelsize_max: u32,
    pub despeckle_ops: String,
    pub emulate_motion: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        MotionConfig {
            threshold: 1500,
            threshold_maximum: 0,
            threshold_ratio_change: 64,
            threshold_sdevx: 0.0,
            threshold_sdevy: 0.0,
            threshold_sdevxy: 0.0,
            threshold_tune_enabled: false,
            threshold_tune_multiple: 1.5,
            lightswitch_percent: 0,
            lightswitch_frames: 5,
            minimum_motion_frames: 1,
            event_gap_secs: 60,
            static_object_time_secs: 0,
            smart_mask_speed: 0,
            labelgroup_max: u32::MAX,
            labelsize_max: u32::MAX,
            despeckle_ops: String::new(),
            emulate_motion: false,
        }
    }
}

/// §4.3 state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Idle,
    Detecting,
    Triggered,
    Recording,
    Cooldown,
}

/// Result of running one frame through `Detector::process`.
#[derive(Debug, Clone, Default)]
pub struct DetectionOutcome {
    pub qualifies: bool,
    pub diffs_raw: i64,
    pub diffs: i64,
    pub diffs_ratio: f64,
    pub light_switch: bool,
    pub labels: labeling::LabelResult,
}

pub struct Detector {
    pub cfg: MotionConfig,
    pub state: MotionState,
    pub noise: u32,
    pub working_threshold: u32,
    pub threshold_ema: f64,
    consecutive_qualifying: u32,
    lightswitch_streak: u32,
    paused: bool,
}

impl Detector {
    pub fn new(cfg: MotionConfig) -> Self {
        let working_threshold = cfg.threshold;
        Detector {
            cfg,
            state: MotionState::Idle,
            noise: 4,
            working_threshold,
            threshold_ema: 0.0,
            consecutive_qualifying: 0,
            lightswitch_streak: 0,
            paused: false,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
        self.state = MotionState::Idle;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    /// Noise auto-tune (§4.3 "Noise auto-tune"). Operates on the luma plane.
    pub fn noise_tune(&mut self, reference: &[u8], current: &[u8], masks: &Masks) -> u32 {
        let smart_final = &masks.smart_final;
        let mut sum: i64 = 0;
        let mut count: i64 = 0;
        for i in 0..reference.len() {
            let suppressed = smart_final.as_ref().map(|m| m[i] == 0).unwrap_or(false);
            if suppressed {
                continue;
            }
            let d = (reference[i] as i32 - current[i] as i32).unsigned_abs() as i64;
            let weight = masks.fixed_weight(i) as i64;
            let weighted = d * weight / 255;
            sum += weighted + 1;
            count += 1;
        }
        if count > 3 {
            sum /= count / 3;
        }
        let new_noise = 4 + (self.noise as i64 + sum) / 2;
        self.noise = new_noise.max(0) as u32;
        self.noise
    }

    /// Standard absolute difference against the reference frame (§4.3
    /// "Difference").
    pub fn diff(&mut self, reference: &[u8], current: &[u8], masks: &Masks) -> (i64, i64, f64) {
        let threshold_change = self.cfg.threshold_ratio_change as i32;
        let mut diffs_raw = 0i64;
        let mut diffs = 0i64;
        for i in 0..reference.len() {
            if !masks.smart_allows(i) {
                continue;
            }
            let d = (reference[i] as i32 - current[i] as i32).abs();
            if d > self.noise as i32 {
                diffs_raw += 1;
            }
            if d > threshold_change && masks.fixed_weight(i) > 0 {
                diffs += 1;
            }
        }
        let ratio = if reference.is_empty() {
            0.0
        } else {
            diffs as f64 / reference.len() as f64
        };
        (diffs_raw, diffs, ratio)
    }

    /// Threshold auto-tune (§4.3): EWMA of `diffs`, clamped to
    /// `[threshold, threshold_maximum]` when enabled.
    pub fn threshold_autotune(&mut self, diffs: i64) {
        if !self.cfg.threshold_tune_enabled {
            self.working_threshold = self.cfg.threshold;
            return;
        }
        const ALPHA: f64 = 0.2;
        self.threshold_ema = ALPHA * diffs as f64 + (1.0 - ALPHA) * self.threshold_ema;
        let proposed = (self.threshold_ema * self.cfg.threshold_tune_multiple) as u32;
        let max = if self.cfg.threshold_maximum > 0 {
            self.cfg.threshold_maximum
        } else {
            u32::MAX
        };
        self.working_threshold = proposed.clamp(self.cfg.threshold, max);
    }

    /// Light-switch detection (§4.3). Returns true when this frame should
    /// be discarded as a global illumination change.
    pub fn light_switch(&mut self, changed_pixels: u64, total_pixels: u64) -> bool {
        if total_pixels == 0 {
            return false;
        }
        let percent = (changed_pixels * 100) / total_pixels;
        if percent as u32 >= self.cfg.lightswitch_percent && self.cfg.lightswitch_percent > 0 {
            self.lightswitch_streak += 1;
            self.lightswitch_streak >= self.cfg.lightswitch_frames
        } else {
            self.lightswitch_streak = 0;
            false
        }
    }

    pub fn lightswitch_streak(&self) -> u32 {
        self.lightswitch_streak
    }

    pub fn reset_lightswitch(&mut self) {
        self.lightswitch_streak = 0;
    }

    /// Reference update (§4.3 "Reference update"). Non-motion pixels
    /// converge toward current; pixels inside the motion box are held. A
    /// pixel held longer than `static_object_time` is released back into
    /// normal learning (§9 open-question decision (b): this governs
    /// learning resumption only, never event-close timing).
    pub fn reference_update(
        &self,
        reference: &mut ReferenceFrame,
        current: &[u8],
        motion_box: Option<&labeling::LabelBox>,
        fps: f64,
    ) {
        let w = reference.width() as i32;
        let max_dyn = if fps > 0.0 {
            (self.cfg.static_object_time_secs as f64 * fps) as u32
        } else {
            u32::MAX
        };
        for (i, refpix) in reference.image.y.iter_mut().enumerate() {
            let x = (i as i32) % w;
            let y = (i as i32) / w;
            let inside_motion = motion_box
                .map(|b| x >= b.minx && x <= b.maxx && y >= b.miny && y <= b.maxy)
                .unwrap_or(false);

            let held = inside_motion && reference.ref_dyn[i] < max_dyn;
            if held {
                reference.ref_dyn[i] = reference.ref_dyn[i].saturating_add(1);
                continue;
            }
            reference.ref_dyn[i] = 0;
            let cur = current[i] as i32;
            let r = *refpix as i32;
            *refpix = (r + (cur - r) / 16) as u8;
        }
    }

    /// Smart mask learning (§4.3 "Smart mask"). Disabled when
    /// `smart_mask_speed == 0`.
    pub fn smart_mask_update(&self, masks: &mut Masks, reference: &[u8], current: &[u8], threshold: u16) {
        if self.cfg.smart_mask_speed == 0 {
            return;
        }
        if masks.smart_counters.len() != reference.len() {
            masks.smart_counters = vec![0u16; reference.len()];
        }
        if masks.smart_final.is_none() {
            masks.smart_final = Some(vec![0u8; reference.len()]);
        }
        let bound = (self.cfg.smart_mask_speed as u16) * 32;
        let final_mask = masks.smart_final.as_mut().unwrap();
        for i in 0..reference.len() {
            let d = (reference[i] as i32 - current[i] as i32).abs();
            if d > 0 {
                masks.smart_counters[i] = masks.smart_counters[i].saturating_add(1).min(bound);
            } else if masks.smart_counters[i] > 0 {
                masks.smart_counters[i] -= 1;
            }
            final_mask[i] = if masks.smart_counters[i] > threshold { 1 } else { 0 };
        }
    }

    /// Runs one full detection cycle for `current` against `reference`
    /// (§4.3, composing noise/diff/threshold-tune/light-switch/labeling).
    pub fn process(&mut self, reference: &ReferenceFrame, current: &Frame, masks: &Masks) -> DetectionOutcome {
        if self.paused {
            return DetectionOutcome::default();
        }
        let w = current.width() as usize;
        let h = current.height() as usize;

        self.noise_tune(&reference.image.y, &current.image.y, masks);
        let (diffs_raw, diffs, ratio) = self.diff(&reference.image.y, &current.image.y, masks);
        self.threshold_autotune(diffs);

        let light_switch = self.light_switch(diffs as u64, (w * h) as u64);
        if light_switch {
            self.reset_lightswitch();
            return DetectionOutcome {
                light_switch: true,
                diffs_raw,
                diffs,
                diffs_ratio: ratio,
                ..Default::default()
            };
        }

        let threshold_change = self.cfg.threshold_ratio_change as i32;
        let mut thresholded: Vec<u8> = (0..w * h)
            .into_par_iter()
            .map(|i| {
                if !masks.smart_allows(i) {
                    return 0;
                }
                let d = (reference.image.y[i] as i32 - current.image.y[i] as i32).abs();
                if d > threshold_change {
                    255
                } else {
                    0
                }
            })
            .collect();

        if !self.cfg.despeckle_ops.is_empty() {
            despeckle::apply(&self.cfg.despeckle_ops, &mut thresholded, w, h);
        }
        let labels = labeling::label(&thresholded, w, h, self.cfg.labelgroup_max, self.cfg.labelsize_max);

        let meets_threshold = diffs >= self.working_threshold as i64
            && (self.cfg.threshold_maximum == 0 || diffs <= self.cfg.threshold_maximum as i64);
        let meets_sdev = (self.cfg.threshold_sdevx == 0.0 || labels.stddev_x >= self.cfg.threshold_sdevx)
            && (self.cfg.threshold_sdevy == 0.0 || labels.stddev_y >= self.cfg.threshold_sdevy)
            && (self.cfg.threshold_sdevxy == 0.0 || labels.stddev_xy >= self.cfg.threshold_sdevxy);

        let qualifies = self.cfg.emulate_motion || (meets_threshold && meets_sdev);
        self.advance_state(qualifies);

        DetectionOutcome {
            qualifies,
            diffs_raw,
            diffs,
            diffs_ratio: ratio,
            light_switch: false,
            labels,
        }
    }

    fn advance_state(&mut self, qualifies: bool) {
        if self.cfg.emulate_motion {
            self.state = MotionState::Recording;
            return;
        }
        match self.state {
            MotionState::Idle => {
                self.consecutive_qualifying = if qualifies { 1 } else { 0 };
                if qualifies {
                    self.state = MotionState::Detecting;
                }
            }
            MotionState::Detecting => {
                if qualifies {
                    self.consecutive_qualifying += 1;
                    if self.consecutive_qualifying >= self.cfg.minimum_motion_frames {
                        self.state = MotionState::Triggered;
                    }
                } else {
                    self.consecutive_qualifying = 0;
                    self.state = MotionState::Idle;
                }
            }
            MotionState::Triggered => {
                self.state = MotionState::Recording;
            }
            MotionState::Recording | MotionState::Cooldown => {
                // event-gap timing is owned by the pipeline (has the clock);
                // `advance_to_cooldown`/`advance_to_idle` drive this transition.
            }
        }
    }

    pub fn advance_to_cooldown(&mut self) {
        if self.state == MotionState::Recording {
            self.state = MotionState::Cooldown;
        }
    }

    pub fn advance_to_idle(&mut self) {
        if self.state == MotionState::Cooldown {
            self.state = MotionState::Idle;
            self.consecutive_qualifying = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Yuv420Image;

    #[test]
    fn noise_tune_baseline_matches_spec_scenario() {
        // §8 scenario 1: motionsize=240000, ref==new==0x80, mask=None,
        // smartmask_final all-allow, cnt->noise=4.
        let reference = vec![0x80u8; 240_000];
        let current = vec![0x80u8; 240_000];
        let masks = Masks {
            smart_final: Some(vec![0xFFu8; 240_000]),
            ..Default::default()
        };
        let mut det = Detector::new(MotionConfig::default());
        det.noise = 4;
        let noise = det.noise_tune(&reference, &current, &masks);
        assert_eq!(noise, 7);
    }

    #[test]
    fn light_switch_triggers_after_configured_frame_count() {
        let mut cfg = MotionConfig::default();
        cfg.lightswitch_percent = 50;
        cfg.lightswitch_frames = 5;
        let mut det = Detector::new(cfg);
        for i in 0..5 {
            let triggered = det.light_switch(600, 1000);
            if i < 4 {
                assert!(!triggered);
            } else {
                assert!(triggered);
            }
        }
    }

    #[test]
    fn state_machine_requires_minimum_motion_frames() {
        let mut cfg = MotionConfig::default();
        cfg.minimum_motion_frames = 3;
        let mut det = Detector::new(cfg);
        assert_eq!(det.state, MotionState::Idle);
        det.advance_state(true);
        assert_eq!(det.state, MotionState::Detecting);
        det.advance_state(true);
        assert_eq!(det.state, MotionState::Detecting);
        det.advance_state(true);
        assert_eq!(det.state, MotionState::Triggered);
        det.advance_state(true);
        assert_eq!(det.state, MotionState::Recording);
    }

    #[test]
    fn emulate_motion_forces_recording() {
        let mut cfg = MotionConfig::default();
        cfg.emulate_motion = true;
        let mut det = Detector::new(cfg);
        det.advance_state(false);
        assert_eq!(det.state, MotionState::Recording);
    }

    #[test]
    fn reference_update_holds_pixels_inside_motion_box() {
        let reference_img = Yuv420Image::blank(4, 4, 100);
        let mut reference = ReferenceFrame::new(reference_img);
        let current = vec![200u8; 16];
        let det = Detector::new(MotionConfig::default());
        let bbox = labeling::LabelBox { minx: 0, maxx: 1, miny: 0, maxy: 1, pixel_count: 4 };
        det.reference_update(&mut reference, &current, Some(&bbox), 10.0);
        // pixel (0,0) is inside the box: held, unchanged.
        assert_eq!(reference.image.y[0], 100);
        // pixel (3,3) is outside: converges toward current.
        assert!(reference.image.y[15] > 100);
    }
}
