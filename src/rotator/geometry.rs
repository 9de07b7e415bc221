//! Rotator geometry model: "real" (true sky az/el) ↔ "motor" (raw hardware
//! axis) coordinate transforms, accounting for platform tilt, payload
//! lateral tilt, and per-axis gain/offset (spec §4.I).
//!
//! Grounded on the Python original's quaternion-based `to_real`/`to_motor`.
//! No quaternion crate appears in the teacher's or pack's dependency
//! stack, so the handful of operations actually needed (compose two
//! rotations, rotate a vector, recover yaw/pitch) are reimplemented
//! directly here rather than pulling in a new dependency for them.

/// A unit quaternion `w + xi + yj + zk`, body-fixed rotation convention.
#[derive(Debug, Clone, Copy)]
struct Quaternion {
    w: f64,
    x: f64,
    y: f64,
    z: f64,
}

impl Quaternion {
    const IDENTITY: Quaternion = Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    /// Rotation by `angle_rad` about the Z axis.
    fn rotation_z(angle_rad: f64) -> Quaternion {
        Quaternion { w: (angle_rad / 2.0).cos(), x: 0.0, y: 0.0, z: (angle_rad / 2.0).sin() }
    }

    /// Rotation by `angle_rad` about the Y axis.
    fn rotation_y(angle_rad: f64) -> Quaternion {
        Quaternion { w: (angle_rad / 2.0).cos(), x: 0.0, y: (angle_rad / 2.0).sin(), z: 0.0 }
    }

    /// Rotation by `angle_rad` about an arbitrary unit axis.
    fn from_axis_angle(axis: [f64; 3], angle_rad: f64) -> Quaternion {
        let half = angle_rad / 2.0;
        let s = half.sin();
        Quaternion { w: half.cos(), x: axis[0] * s, y: axis[1] * s, z: axis[2] * s }
    }

    fn mul(self, other: Quaternion) -> Quaternion {
        Quaternion {
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
        }
    }

    fn conj(self) -> Quaternion {
        Quaternion { w: self.w, x: -self.x, y: -self.y, z: -self.z }
    }

    /// Rotates the vector `v` by this quaternion: `q v q*`.
    fn rotate(self, v: [f64; 3]) -> [f64; 3] {
        let qv = Quaternion { w: 0.0, x: v[0], y: v[1], z: v[2] };
        let r = self.mul(qv).mul(self.conj());
        [r.x, r.y, r.z]
    }

    /// `zy` Euler composition in the body-fixed convention used by the
    /// original: az about Z, then el about Y.
    fn from_az_el(az_rad: f64, el_rad: f64) -> Quaternion {
        Quaternion::rotation_z(az_rad).mul(Quaternion::rotation_y(el_rad))
    }

    /// Recovers (yaw, pitch) in degrees from a composed rotation, matching
    /// the original's `to_ypr`/`to_azel`.
    fn to_az_el_deg(self) -> (f64, f64) {
        let (q0, q1, q2, q3) = (self.w, self.x, self.y, self.z);
        let pitch = (-2.0 * (q1 * q3 - q0 * q2)).clamp(-1.0, 1.0).asin();
        let yaw = (q1 * q2 + q0 * q3).atan2(0.5 - q2 * q2 - q3 * q3);
        (yaw.to_degrees(), pitch.to_degrees())
    }
}

/// Wraps an angle in degrees to `(-180, 180]`.
pub fn wrapdeg(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

/// Rotator geometry parameters (spec §4.I "optional rotator geometry
/// model"): per-axis gain/offset plus a platform tilt (direction + angle)
/// and a payload lateral tilt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AzElRotator {
    /// Elevation offset, degrees, motor-side.
    pub el_off: f64,
    /// Azimuth offset, degrees, motor-side.
    pub az_off: f64,
    /// Elevation gain (motor degrees per real degree).
    pub el_gain: f64,
    /// Azimuth gain (motor degrees per real degree).
    pub az_gain: f64,
    /// Azimuth the platform is tilted toward, degrees.
    pub tilt_az: f64,
    /// Platform tilt angle, degrees.
    pub tilt_angle: f64,
    /// Payload lateral tilt about its own boresight, degrees.
    pub lateral_tilt: f64,
}

impl Default for AzElRotator {
    fn default() -> Self {
        Self { el_off: 0.0, az_off: 0.0, el_gain: 1.0, az_gain: 1.0, tilt_az: 0.0, tilt_angle: 0.0, lateral_tilt: 0.0 }
    }
}

impl AzElRotator {
    fn payload_q(&self) -> Quaternion {
        Quaternion::rotation_z(self.lateral_tilt.to_radians())
    }

    fn platform_q(&self) -> Quaternion {
        let tilt_axis_rotation = Quaternion::rotation_z((self.tilt_az - 90.0).to_radians());
        let tilt_axis = tilt_axis_rotation.rotate([1.0, 0.0, 0.0]);
        Quaternion::from_axis_angle(tilt_axis, self.tilt_angle.to_radians())
    }

    /// Converts a motor-side (az, el) reading into true sky (az, el).
    pub fn to_real(&self, az: f64, el: f64) -> (f64, f64) {
        let az_m = wrapdeg((az - self.az_off) / self.az_gain).to_radians();
        let el_m = ((el - self.el_off) / self.el_gain).to_radians();

        let q_m = Quaternion::from_az_el(az_m, el_m);
        let q_r = self.platform_q().mul(q_m).mul(self.payload_q());
        let (az_r, el_r) = q_r.to_az_el_deg();

        let az_r = if (az_r - az).abs() > 180.0 { az_r + 360.0 } else { az_r };
        (az_r, el_r)
    }

    /// Converts a true sky (az, el) target into the motor-side (az, el)
    /// command that points the hardware at it.
    pub fn to_motor(&self, az: f64, el: f64) -> (f64, f64) {
        let q_r = Quaternion::from_az_el(az.to_radians(), el.to_radians());
        let q_m = self.platform_q().conj().mul(q_r).mul(self.payload_q().conj());
        let (az_m, el_m) = q_m.to_az_el_deg();

        let az_m = wrapdeg(az_m * self.az_gain + self.az_off);
        let el_m = el_m * self.el_gain + self.el_off;

        let az_m = if (az_m - az).abs() > 180.0 { az_m + 360.0 } else { az_m };
        (az_m, el_m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapdeg_normalizes_into_symmetric_range() {
        assert!((wrapdeg(370.0) - 10.0).abs() < 1e-9);
        assert!((wrapdeg(-190.0) - 170.0).abs() < 1e-9);
        assert!((wrapdeg(180.0) - 180.0).abs() < 1e-9);
    }

    #[test]
    fn identity_rotator_is_a_no_op() {
        let rotator = AzElRotator::default();
        let (az, el) = rotator.to_real(123.4, 45.6);
        assert!((az - 123.4).abs() < 1e-6);
        assert!((el - 45.6).abs() < 1e-6);
    }

    #[test]
    fn to_real_and_to_motor_are_mutual_inverses() {
        let rotator = AzElRotator {
            el_off: 1.5,
            az_off: -2.0,
            el_gain: 1.02,
            az_gain: 0.98,
            tilt_az: 30.0,
            tilt_angle: 1.2,
            lateral_tilt: 0.5,
            ..Default::default()
        };
        let (motor_az, motor_el) = rotator.to_motor(200.0, 33.0);
        let (az, el) = rotator.to_real(motor_az, motor_el);
        assert!((az - 200.0).abs() < 1e-3, "az roundtrip: {az} vs 200.0");
        assert!((el - 33.0).abs() < 1e-3, "el roundtrip: {el} vs 33.0");
    }

    #[test]
    fn gain_and_offset_only_scale_and_shift_when_untilted() {
        let rotator = AzElRotator { el_off: 5.0, az_off: 10.0, el_gain: 2.0, az_gain: 1.0, ..Default::default() };
        let (motor_az, motor_el) = rotator.to_motor(90.0, 20.0);
        assert!((motor_az - 100.0).abs() < 1e-6);
        assert!((motor_el - 45.0).abs() < 1e-6);
    }
}
