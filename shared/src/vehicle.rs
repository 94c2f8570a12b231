//! Vehicle mass classes and body-section classification.
//!
//! The damage resolver transforms a contact point into the struck vehicle's
//! local frame and buckets it into one of six body sections using the fixed
//! longitudinal boundary planes of that vehicle's class.

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Number of body sections on every vehicle.
pub const SECTION_COUNT: usize = 6;

/// Mass/type class of a vehicle. Heavier classes hit harder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    Light,
    Medium,
    Heavy,
}

impl VehicleClass {
    /// Longitudinal boundary planes (front plane, rear plane) in the local
    /// frame: `z > front` is a front section, `z < rear` a rear section,
    /// mid otherwise. Units are meters from the vehicle center.
    pub fn section_planes(&self) -> (f32, f32) {
        match self {
            VehicleClass::Light => (0.6, -0.6),
            VehicleClass::Medium => (0.8, -0.8),
            VehicleClass::Heavy => (1.1, -1.1),
        }
    }

    fn mass_factor(&self) -> f32 {
        match self {
            VehicleClass::Light => 0.8,
            VehicleClass::Medium => 1.0,
            VehicleClass::Heavy => 1.25,
        }
    }

    /// Multiplier applied to damage this class inflicts on `victim`.
    /// A heavy ramming a light car hits for more than the reverse.
    pub fn damage_multiplier(&self, victim: VehicleClass) -> f32 {
        self.mass_factor() / victim.mass_factor()
    }
}

/// One of the six body sections of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    FrontLeft,
    FrontRight,
    MidLeft,
    MidRight,
    RearLeft,
    RearRight,
}

impl Section {
    pub const ALL: [Section; SECTION_COUNT] = [
        Section::FrontLeft,
        Section::FrontRight,
        Section::MidLeft,
        Section::MidRight,
        Section::RearLeft,
        Section::RearRight,
    ];

    /// Index into the per-section damage array carried by damage messages.
    pub fn index(&self) -> usize {
        match self {
            Section::FrontLeft => 0,
            Section::FrontRight => 1,
            Section::MidLeft => 2,
            Section::MidRight => 3,
            Section::RearLeft => 4,
            Section::RearRight => 5,
        }
    }

    /// Classifies a contact point given in the vehicle's local frame.
    pub fn from_local_point(point: &Vec3, class: VehicleClass) -> Section {
        let (front, rear) = class.section_planes();
        let left = point.x < 0.0;
        if point.z > front {
            if left {
                Section::FrontLeft
            } else {
                Section::FrontRight
            }
        } else if point.z < rear {
            if left {
                Section::RearLeft
            } else {
                Section::RearRight
            }
        } else if left {
            Section::MidLeft
        } else {
            Section::MidRight
        }
    }

    /// Relative vulnerability rank. Mid sections cover the cabin and rank
    /// highest, the front crumple zone lowest.
    pub fn vulnerability(&self) -> u8 {
        match self {
            Section::MidLeft | Section::MidRight => 2,
            Section::RearLeft | Section::RearRight => 1,
            Section::FrontLeft | Section::FrontRight => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_indices_cover_array() {
        let mut seen = [false; SECTION_COUNT];
        for section in Section::ALL {
            seen[section.index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_classification_by_class_planes() {
        // z = 0.7 is front territory for a light car but mid for a medium.
        let point = Vec3::new(-0.4, 0.0, 0.7);
        assert_eq!(
            Section::from_local_point(&point, VehicleClass::Light),
            Section::FrontLeft
        );
        assert_eq!(
            Section::from_local_point(&point, VehicleClass::Medium),
            Section::MidLeft
        );
    }

    #[test]
    fn test_left_right_split() {
        let left = Vec3::new(-0.2, 0.0, -2.0);
        let right = Vec3::new(0.2, 0.0, -2.0);
        assert_eq!(
            Section::from_local_point(&left, VehicleClass::Medium),
            Section::RearLeft
        );
        assert_eq!(
            Section::from_local_point(&right, VehicleClass::Medium),
            Section::RearRight
        );
    }

    #[test]
    fn test_heavy_outhits_light() {
        let heavy_on_light = VehicleClass::Heavy.damage_multiplier(VehicleClass::Light);
        let light_on_heavy = VehicleClass::Light.damage_multiplier(VehicleClass::Heavy);
        assert!(heavy_on_light > 1.0);
        assert!(light_on_heavy < 1.0);
        assert_eq!(
            VehicleClass::Medium.damage_multiplier(VehicleClass::Medium),
            1.0
        );
    }

    #[test]
    fn test_cabin_is_most_vulnerable() {
        assert!(Section::MidLeft.vulnerability() > Section::RearLeft.vulnerability());
        assert!(Section::RearRight.vulnerability() > Section::FrontRight.vulnerability());
    }
}
