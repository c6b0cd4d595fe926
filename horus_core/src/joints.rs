//! Joint vectors, per-joint metadata, and unit conversion.
//!
//! §3 DATA MODEL: a joint vector is meaningful only together with the bus
//! it came from. All joints of one bus share one unit system (mixed-unit
//! buses are out of scope — see open question 1 in the design notes: a
//! gripper historically declared `RANGE_0_100` on a bus otherwise in
//! radians produced a 57296x blow-up through the leader->follower scale
//! factor. This type makes that class of bug unrepresentable: the unit is
//! a property of the `JointVector`, not of each element.

use serde::{Deserialize, Serialize};

/// Unit system a joint bus reports/accepts values in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointUnit {
    Radians,
    Degrees,
    /// Normalized gripper-style range, 0-100.
    Range0To100,
    /// Raw integer units with no physical meaning outside the bus (e.g. follower milli-degrees).
    RawUnits,
}

impl JointUnit {
    /// Radians -> this unit's scale, i.e. `value_in_this_unit = value_in_radians * scale()`.
    fn scale_from_radians(self) -> f64 {
        match self {
            JointUnit::Radians => 1.0,
            JointUnit::Degrees => 180.0 / std::f64::consts::PI,
            JointUnit::RawUnits => 1000.0 * 180.0 / std::f64::consts::PI, // milli-degrees
            JointUnit::Range0To100 => {
                // Not a linear function of radians in general; a bus declared
                // in this unit must not be converted through radians. See
                // `JointVector::convert_to` which refuses this combination.
                1.0
            }
        }
    }
}

/// Per-joint static metadata, set once at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointMeta {
    pub id: String,
    pub direction_sign: i8, // +1 or -1
    pub range_min: f64,
    pub range_max: f64,
    pub homing_offset: f64,
    pub unit: JointUnit,
}

impl JointMeta {
    pub fn new(id: impl Into<String>, unit: JointUnit) -> Self {
        Self {
            id: id.into(),
            direction_sign: 1,
            range_min: f64::NEG_INFINITY,
            range_max: f64::INFINITY,
            homing_offset: 0.0,
            unit,
        }
    }

    pub fn mirrored(mut self) -> Self {
        self.direction_sign = -1;
        self
    }
}

/// An ordered vector of joint scalars sharing one unit system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointVector {
    pub unit: JointUnit,
    pub values: Vec<f64>,
}

impl JointVector {
    pub fn new(unit: JointUnit, values: Vec<f64>) -> Self {
        Self { unit, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert every element from this vector's unit into `target`, via radians
    /// as the common pivot. Refuses `Range0To100` on either side since that
    /// unit has no fixed linear relationship to radians (it is normalized per
    /// joint range, which this crate treats as a config-time-only concern).
    pub fn convert_to(&self, target: JointUnit) -> Result<JointVector, crate::error::HorusError> {
        if self.unit == target {
            return Ok(self.clone());
        }
        if self.unit == JointUnit::Range0To100 || target == JointUnit::Range0To100 {
            return Err(crate::error::HorusError::invalid_input(format!(
                "cannot convert between {:?} and {:?}: range_0_100 has no fixed linear unit scale",
                self.unit, target
            )));
        }
        let from_scale = self.unit.scale_from_radians();
        let to_scale = target.scale_from_radians();
        let values = self
            .values
            .iter()
            .map(|v| (v / from_scale) * to_scale)
            .collect();
        Ok(JointVector::new(target, values))
    }

    /// The scalar that converts one element of `from` into one element of `to`,
    /// used by the teleop mapper (§4.D step 3) rather than converting whole
    /// vectors per tick.
    pub fn unit_scale(from: JointUnit, to: JointUnit) -> Result<f64, crate::error::HorusError> {
        if from == JointUnit::Range0To100 || to == JointUnit::Range0To100 {
            return Err(crate::error::HorusError::invalid_input(
                "range_0_100 has no fixed unit scale",
            ));
        }
        Ok(to.scale_from_radians() / from.scale_from_radians())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radians_to_raw_units_is_the_known_constant() {
        let scale = JointVector::unit_scale(JointUnit::Radians, JointUnit::RawUnits).unwrap();
        assert!((scale - 57295.779_513).abs() < 1e-3);
    }

    #[test]
    fn round_trip_through_degrees_is_identity() {
        let v = JointVector::new(JointUnit::Radians, vec![0.1, -0.2, 1.5]);
        let degrees = v.convert_to(JointUnit::Degrees).unwrap();
        let back = degrees.convert_to(JointUnit::Radians).unwrap();
        for (a, b) in v.values.iter().zip(back.values.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn range_0_100_conversion_is_rejected() {
        let v = JointVector::new(JointUnit::Range0To100, vec![50.0]);
        assert!(v.convert_to(JointUnit::Radians).is_err());
    }
}
