//! Teleop mapper & safety monitor (§4.D): maps leader joint readings
//! (radians) to follower joint commands (milli-degrees) through a
//! once-established pose baseline, enforcing per-joint deviation limits.

use crate::error::{HorusError, HorusResult};
use crate::joints::{JointMeta, JointUnit, JointVector};
use std::time::{Duration, Instant};

/// `{leader_baseline, follower_baseline, established, timestamp}` (§3).
/// Created on the first leader sample received after node start; never
/// mutated thereafter.
#[derive(Debug, Clone)]
pub struct PoseMappingBaseline {
    pub leader_baseline: Vec<f64>,
    pub follower_baseline: Vec<i32>,
    pub established: bool,
    pub established_at: Option<Instant>,
}

impl PoseMappingBaseline {
    fn not_yet(follower_baseline: Vec<i32>) -> Self {
        Self {
            leader_baseline: Vec::new(),
            follower_baseline,
            established: false,
            established_at: None,
        }
    }
}

/// §4.D state machine: `AwaitingFollower -> BaselineEstablished -> Emergency` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperState {
    AwaitingFollower,
    BaselineEstablished,
    Emergency,
}

/// Deviation thresholds, compared in the follower's milli-degree units.
#[derive(Debug, Clone, Copy)]
pub struct DeviationThresholds {
    pub warning_milli_deg: f64,
    pub emergency_milli_deg: f64,
}

impl Default for DeviationThresholds {
    fn default() -> Self {
        Self {
            warning_milli_deg: 30.0 * 1000.0,
            emergency_milli_deg: 60.0 * 1000.0,
        }
    }
}

const WARNING_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Consumes leader joint vectors, emits follower targets, enforces
/// deviation thresholds, and drives emergency stop.
pub struct TeleopMapper {
    joint_meta: Vec<JointMeta>,
    unit_scale: f64,
    state: MapperState,
    baseline: PoseMappingBaseline,
    last_warning_logged: Option<Instant>,
}

impl TeleopMapper {
    /// `joint_meta` supplies the per-joint direction sign (§4.D step 3).
    /// `follower_baseline` is read once from the follower on node start
    /// (§4.D step 1), before the mapper is constructed.
    pub fn new(joint_meta: Vec<JointMeta>, follower_baseline: Vec<i32>) -> HorusResult<Self> {
        let unit_scale = JointVector::unit_scale(JointUnit::Radians, JointUnit::RawUnits)?;
        Ok(Self {
            joint_meta,
            unit_scale,
            state: MapperState::AwaitingFollower,
            baseline: PoseMappingBaseline::not_yet(follower_baseline),
            last_warning_logged: None,
        })
    }

    pub fn state(&self) -> MapperState {
        self.state
    }

    pub fn baseline(&self) -> &PoseMappingBaseline {
        &self.baseline
    }

    /// Feed one leader reading (radians) and the most recent follower
    /// actual position (milli-degrees). Returns the follower target to
    /// emit, or `None` if no command should be sent this tick (baseline not
    /// yet established, or already in `Emergency`).
    pub fn on_leader_sample(
        &mut self,
        leader_current: &[f64],
        follower_actual: &[i32],
        thresholds: DeviationThresholds,
    ) -> HorusResult<Option<Vec<i32>>> {
        if self.state == MapperState::Emergency {
            return Ok(None);
        }

        if !self.baseline.established {
            self.baseline.leader_baseline = leader_current.to_vec();
            self.baseline.established = true;
            self.baseline.established_at = Some(Instant::now());
            self.state = MapperState::BaselineEstablished;
            log::info!(
                "teleop mapping established: leader_baseline={:?} follower_baseline={:?}",
                self.baseline.leader_baseline,
                self.baseline.follower_baseline
            );
            return Ok(None);
        }

        if leader_current.len() != self.baseline.leader_baseline.len()
            || follower_actual.len() != self.baseline.follower_baseline.len()
        {
            return Err(HorusError::invalid_input(
                "joint vector length does not match the established baseline",
            ));
        }

        let n = leader_current.len();
        let mut targets = Vec::with_capacity(n);
        for i in 0..n {
            let sign = self.joint_meta.get(i).map(|m| m.direction_sign as f64).unwrap_or(1.0);
            let delta = (leader_current[i] - self.baseline.leader_baseline[i]) * sign * self.unit_scale;
            targets.push(self.baseline.follower_baseline[i] + delta.round() as i32);
        }

        let mut max_deviation = 0.0f64;
        let mut max_joint = 0usize;
        for i in 0..n {
            let dev = (targets[i] - follower_actual[i]).abs() as f64;
            if dev > max_deviation {
                max_deviation = dev;
                max_joint = i;
            }
        }

        if max_deviation > thresholds.emergency_milli_deg {
            self.state = MapperState::Emergency;
            log::error!(
                "EMERGENCY STOP: joint {} deviated {:.1} milli-deg (limit {:.1}); session requires restart",
                max_joint,
                max_deviation,
                thresholds.emergency_milli_deg
            );
            return Err(HorusError::EmergencyStop {
                joint_index: max_joint,
                deviation_deg: max_deviation / 1000.0,
                limit_deg: thresholds.emergency_milli_deg / 1000.0,
            });
        }

        if max_deviation > thresholds.warning_milli_deg {
            let should_log = self
                .last_warning_logged
                .map(|t| t.elapsed() >= WARNING_LOG_INTERVAL)
                .unwrap_or(true);
            if should_log {
                log::warn!(
                    "joint {} deviation {:.1} milli-deg exceeds warning threshold {:.1}",
                    max_joint,
                    max_deviation,
                    thresholds.warning_milli_deg
                );
                self.last_warning_logged = Some(Instant::now());
            }
        }

        Ok(Some(targets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(n: usize) -> Vec<JointMeta> {
        (0..n).map(|i| JointMeta::new(format!("j{}", i), JointUnit::Radians)).collect()
    }

    #[test]
    fn first_sample_establishes_baseline_without_emitting() {
        let mut mapper = TeleopMapper::new(meta(3), vec![0, 0, 0]).unwrap();
        let out = mapper
            .on_leader_sample(&[0.1, 0.2, 0.3], &[0, 0, 0], DeviationThresholds::default())
            .unwrap();
        assert!(out.is_none());
        assert_eq!(mapper.state(), MapperState::BaselineEstablished);
    }

    #[test]
    fn subsequent_samples_apply_mapping_formula() {
        let mut mapper = TeleopMapper::new(meta(1), vec![1000]).unwrap();
        mapper.on_leader_sample(&[0.0], &[1000], DeviationThresholds::default()).unwrap();

        // follower is frozen right where the target lands, so no deviation.
        let scale = JointVector::unit_scale(JointUnit::Radians, JointUnit::RawUnits).unwrap();
        let delta_rad = 0.01;
        let expected_target = 1000 + (delta_rad * scale).round() as i32;

        let out = mapper
            .on_leader_sample(&[delta_rad], &[expected_target], DeviationThresholds::default())
            .unwrap();
        assert_eq!(out.unwrap(), vec![expected_target]);
    }

    #[test]
    fn large_deviation_triggers_emergency_and_suppresses_future_commands() {
        let mut mapper = TeleopMapper::new(meta(1), vec![0]).unwrap();
        mapper.on_leader_sample(&[0.0], &[0], DeviationThresholds::default()).unwrap();

        let err = mapper
            .on_leader_sample(&[0.0], &[100_000], DeviationThresholds::default())
            .unwrap_err();
        assert!(matches!(err, HorusError::EmergencyStop { .. }));
        assert_eq!(mapper.state(), MapperState::Emergency);

        let out = mapper
            .on_leader_sample(&[1.0], &[0], DeviationThresholds::default())
            .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn direction_sign_mirrors_before_baseline_subtraction() {
        let mut meta = meta(1);
        meta[0].direction_sign = -1;
        let mut mapper = TeleopMapper::new(meta, vec![0]).unwrap();
        mapper.on_leader_sample(&[0.0], &[0], DeviationThresholds::default()).unwrap();

        let scale = JointVector::unit_scale(JointUnit::Radians, JointUnit::RawUnits).unwrap();
        let out = mapper
            .on_leader_sample(&[0.01], &[-(0.01 * scale).round() as i32], DeviationThresholds::default())
            .unwrap();
        assert_eq!(out.unwrap(), vec![-(0.01 * scale).round() as i32]);
    }
}
